//! Safe wrappers around the native rattlegram OFDM encoder and decoder.

use std::ffi::c_int;

use anyhow::Result;

use super::{Modem, ModemDecoder, ModemEncoder, StagedInfo};
use crate::config::{InputChannel, OutputChannel};
use crate::error::SessionError;
use crate::message::{CALLSIGN_LEN, Callsign, PAYLOAD_LEN, Payload, trim_control};

// ======================== FFI declarations ========================

/// Opaque type for the native encoder state
#[repr(C)]
pub struct RattlegramEncoder {
    _private: [u8; 0],
}

/// Opaque type for the native decoder state
#[repr(C)]
pub struct RattlegramDecoder {
    _private: [u8; 0],
}

unsafe extern "C" {
    fn rattlegram_encoder_create(sample_rate: c_int) -> *mut RattlegramEncoder;
    fn rattlegram_encoder_destroy(st: *mut RattlegramEncoder);
    fn rattlegram_encoder_configure(
        st: *mut RattlegramEncoder,
        payload: *const u8,
        callsign: *const u8,
        carrier_frequency: c_int,
        noise_symbols: c_int,
        fancy_header: c_int,
    );
    fn rattlegram_encoder_produce(
        st: *mut RattlegramEncoder,
        audio: *mut i16,
        channel_select: c_int,
    ) -> c_int;

    fn rattlegram_decoder_create(sample_rate: c_int) -> *mut RattlegramDecoder;
    fn rattlegram_decoder_destroy(st: *mut RattlegramDecoder);
    fn rattlegram_decoder_feed(
        st: *mut RattlegramDecoder,
        audio: *const i16,
        sample_count: c_int,
        channel_select: c_int,
    ) -> c_int;
    fn rattlegram_decoder_process(st: *mut RattlegramDecoder) -> c_int;
    fn rattlegram_decoder_staged(
        st: *mut RattlegramDecoder,
        carrier_offset: *mut f32,
        mode: *mut c_int,
        callsign: *mut u8,
    );
    fn rattlegram_decoder_fetch(st: *mut RattlegramDecoder, payload: *mut u8) -> c_int;
    fn rattlegram_decoder_spectrum(
        st: *mut RattlegramDecoder,
        spectrum: *mut u32,
        spectrogram: *mut u32,
        spectrum_tint: c_int,
    );
}

// ======================== Encoder ========================

pub struct NativeEncoder {
    state: *mut RattlegramEncoder,
}

// The encoder state is only touched by the transmit worker, one job at a time
unsafe impl Send for NativeEncoder {}

impl NativeEncoder {
    pub fn new(sample_rate: u32) -> Result<Self, SessionError> {
        let state = unsafe { rattlegram_encoder_create(sample_rate as c_int) };
        if state.is_null() {
            return Err(SessionError::CodecInit { kind: "encoder", sample_rate });
        }
        Ok(Self { state })
    }
}

impl ModemEncoder for NativeEncoder {
    fn configure(
        &mut self,
        payload: &Payload,
        callsign: &Callsign,
        carrier_frequency: i32,
        noise_symbols: i32,
        fancy_header: bool,
    ) {
        unsafe {
            rattlegram_encoder_configure(
                self.state,
                payload.as_bytes().as_ptr(),
                callsign.as_bytes().as_ptr(),
                carrier_frequency,
                noise_symbols,
                fancy_header as c_int,
            );
        }
    }

    /// `frame` must hold one full symbol plus guard for the selected channel layout.
    fn produce(&mut self, frame: &mut [i16], channel: OutputChannel) -> bool {
        unsafe { rattlegram_encoder_produce(self.state, frame.as_mut_ptr(), channel.select()) != 0 }
    }
}

impl Drop for NativeEncoder {
    fn drop(&mut self) {
        unsafe {
            rattlegram_encoder_destroy(self.state);
        }
    }
}

// ======================== Decoder ========================

pub struct NativeDecoder {
    state: *mut RattlegramDecoder,
}

// Decoder calls are issued only from the decode thread
unsafe impl Send for NativeDecoder {}

impl NativeDecoder {
    pub fn new(sample_rate: u32) -> Result<Self, SessionError> {
        let state = unsafe { rattlegram_decoder_create(sample_rate as c_int) };
        if state.is_null() {
            return Err(SessionError::CodecInit { kind: "decoder", sample_rate });
        }
        Ok(Self { state })
    }
}

impl ModemDecoder for NativeDecoder {
    fn feed(&mut self, samples: &[i16], sample_count: usize, channel: InputChannel) -> bool {
        let needed = sample_count * channel.channel_count() as usize;
        if samples.len() < needed {
            log::warn!("Short frame: {} samples, expected {}", samples.len(), needed);
            return false;
        }
        unsafe {
            rattlegram_decoder_feed(
                self.state,
                samples.as_ptr(),
                sample_count as c_int,
                channel.select(),
            ) != 0
        }
    }

    fn process(&mut self) -> i32 {
        unsafe { rattlegram_decoder_process(self.state) }
    }

    fn fetch(&mut self, payload: &mut [u8; PAYLOAD_LEN]) -> i32 {
        unsafe { rattlegram_decoder_fetch(self.state, payload.as_mut_ptr()) }
    }

    fn staged(&mut self) -> StagedInfo {
        let mut carrier_offset: f32 = 0.0;
        let mut mode: c_int = 0;
        let mut callsign = [0u8; CALLSIGN_LEN];
        unsafe {
            rattlegram_decoder_staged(self.state, &mut carrier_offset, &mut mode, callsign.as_mut_ptr());
        }
        let end = callsign.iter().position(|&b| b == 0).unwrap_or(CALLSIGN_LEN);
        StagedInfo {
            callsign: trim_control(&String::from_utf8_lossy(&callsign[..end])).to_string(),
            mode,
            carrier_offset,
        }
    }

    fn spectrum(&mut self, spectrum: &mut [u32], spectrogram: &mut [u32], tint: i32) {
        unsafe {
            rattlegram_decoder_spectrum(
                self.state,
                spectrum.as_mut_ptr(),
                spectrogram.as_mut_ptr(),
                tint,
            );
        }
    }
}

impl Drop for NativeDecoder {
    fn drop(&mut self) {
        unsafe {
            rattlegram_decoder_destroy(self.state);
        }
    }
}

/// Engine factory backed by the linked native library.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModem;

impl Modem for NativeModem {
    fn create_decoder(&self, sample_rate: u32) -> Result<Box<dyn ModemDecoder>> {
        Ok(Box::new(NativeDecoder::new(sample_rate)?))
    }

    fn create_encoder(&self, sample_rate: u32) -> Result<Box<dyn ModemEncoder>> {
        Ok(Box::new(NativeEncoder::new(sample_rate)?))
    }
}
