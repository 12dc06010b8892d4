//! modem - boundary to the OFDM modem engine
//!
//! The engine itself is external. This module defines the per-rate decoder and
//! encoder capabilities the session drives, plus owned handles that guarantee
//! each engine instance is destroyed exactly once.

#[cfg(feature = "native-modem")]
pub mod native;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::config::{InputChannel, OutputChannel};
use crate::error::SessionError;
use crate::message::{Callsign, PAYLOAD_LEN, Payload};

/// Spectrum / spectrogram image width in pixels.
pub const SPECTRUM_WIDTH: usize = 360;
/// Spectrum / spectrogram image height in pixels.
pub const SPECTRUM_HEIGHT: usize = 128;
/// Tint colour passed to the engine when rendering the spectrum.
pub const SPECTRUM_TINT: i32 = 255;

/// Factory for per-sample-rate engine instances.
pub trait Modem: Send + Sync {
    fn create_decoder(&self, sample_rate: u32) -> Result<Box<dyn ModemDecoder>>;
    fn create_encoder(&self, sample_rate: u32) -> Result<Box<dyn ModemEncoder>>;
}

pub trait ModemDecoder: Send {
    /// Push one frame of interleaved samples. Returns true when a full symbol
    /// is ready and `process` should be called.
    fn feed(&mut self, samples: &[i16], sample_count: usize, channel: InputChannel) -> bool;
    /// Advance the state machine; returns a raw `DecodeStatus` code.
    fn process(&mut self) -> i32;
    /// Copy the decoded payload out; returns the number of corrected bit
    /// flips, or a negative value when decoding failed.
    fn fetch(&mut self, payload: &mut [u8; PAYLOAD_LEN]) -> i32;
    fn staged(&mut self) -> StagedInfo;
    fn spectrum(&mut self, spectrum: &mut [u32], spectrogram: &mut [u32], tint: i32);
}

pub trait ModemEncoder: Send {
    fn configure(
        &mut self,
        payload: &Payload,
        callsign: &Callsign,
        carrier_frequency: i32,
        noise_symbols: i32,
        fancy_header: bool,
    );
    /// Fill `frame` with the next block of samples; false once the burst is over.
    fn produce(&mut self, frame: &mut [i16], channel: OutputChannel) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Okay,
    Fail,
    Sync,
    Done,
    Heap,
    Nope,
    Ping,
}

impl DecodeStatus {
    pub fn code(self) -> i32 {
        match self {
            DecodeStatus::Okay => 0,
            DecodeStatus::Fail => 1,
            DecodeStatus::Sync => 2,
            DecodeStatus::Done => 3,
            DecodeStatus::Heap => 4,
            DecodeStatus::Nope => 5,
            DecodeStatus::Ping => 6,
        }
    }
}

impl TryFrom<i32> for DecodeStatus {
    type Error = SessionError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DecodeStatus::Okay),
            1 => Ok(DecodeStatus::Fail),
            2 => Ok(DecodeStatus::Sync),
            3 => Ok(DecodeStatus::Done),
            4 => Ok(DecodeStatus::Heap),
            5 => Ok(DecodeStatus::Nope),
            6 => Ok(DecodeStatus::Ping),
            other => Err(SessionError::UnknownStatus(other)),
        }
    }
}

/// Header information available once a preamble has been synchronized.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedInfo {
    pub callsign: String,
    pub mode: i32,
    /// Carrier frequency offset in Hz
    pub carrier_offset: f32,
}

/// Spectrum and spectrogram images, ARGB, `SPECTRUM_WIDTH * SPECTRUM_HEIGHT` each.
#[derive(Clone)]
pub struct SpectrumSnapshot {
    pub spectrum: Arc<[u32]>,
    pub spectrogram: Arc<[u32]>,
}

impl fmt::Debug for SpectrumSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumSnapshot")
            .field("spectrum", &self.spectrum.len())
            .field("spectrogram", &self.spectrogram.len())
            .finish()
    }
}

/// Exclusively owned decoder instance.
pub struct DecoderHandle {
    inner: Option<Box<dyn ModemDecoder>>,
}

impl DecoderHandle {
    pub fn new(decoder: Box<dyn ModemDecoder>) -> Self {
        Self { inner: Some(decoder) }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn feed(&mut self, samples: &[i16], sample_count: usize, channel: InputChannel) -> bool {
        match self.inner.as_mut() {
            Some(decoder) => decoder.feed(samples, sample_count, channel),
            None => false,
        }
    }

    pub fn process(&mut self) -> i32 {
        match self.inner.as_mut() {
            Some(decoder) => decoder.process(),
            None => DecodeStatus::Heap.code(),
        }
    }

    pub fn fetch(&mut self, payload: &mut [u8; PAYLOAD_LEN]) -> i32 {
        match self.inner.as_mut() {
            Some(decoder) => decoder.fetch(payload),
            None => -1,
        }
    }

    pub fn staged(&mut self) -> StagedInfo {
        match self.inner.as_mut() {
            Some(decoder) => decoder.staged(),
            None => StagedInfo { callsign: String::new(), mode: 0, carrier_offset: 0.0 },
        }
    }

    pub fn spectrum(&mut self, spectrum: &mut [u32], spectrogram: &mut [u32]) {
        if let Some(decoder) = self.inner.as_mut() {
            decoder.spectrum(spectrum, spectrogram, SPECTRUM_TINT);
        }
    }

    /// Destroy the engine instance. Later calls are no-ops.
    pub fn close(&mut self) {
        if let Some(decoder) = self.inner.take() {
            drop(decoder);
            log::debug!("Decoder handle destroyed");
        }
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Exclusively owned encoder instance.
pub struct EncoderHandle {
    inner: Option<Box<dyn ModemEncoder>>,
}

impl EncoderHandle {
    pub fn new(encoder: Box<dyn ModemEncoder>) -> Self {
        Self { inner: Some(encoder) }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn configure(
        &mut self,
        payload: &Payload,
        callsign: &Callsign,
        carrier_frequency: i32,
        noise_symbols: i32,
        fancy_header: bool,
    ) {
        if let Some(encoder) = self.inner.as_mut() {
            encoder.configure(payload, callsign, carrier_frequency, noise_symbols, fancy_header);
        }
    }

    pub fn produce(&mut self, frame: &mut [i16], channel: OutputChannel) -> bool {
        match self.inner.as_mut() {
            Some(encoder) => encoder.produce(frame, channel),
            None => false,
        }
    }

    pub fn close(&mut self) {
        if let Some(encoder) = self.inner.take() {
            drop(encoder);
            log::debug!("Encoder handle destroyed");
        }
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        self.close();
    }
}
