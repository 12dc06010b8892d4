use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::audio::{CaptureChannel, samples_from_le_bytes};
use crate::config::{InputChannel, ShutdownPolicy};
use crate::error::SessionError;
use crate::message::{Message, MessageType, PAYLOAD_LEN, Payload, StatusUpdate};
use crate::modem::{
    DecodeStatus, DecoderHandle, SPECTRUM_HEIGHT, SPECTRUM_WIDTH, SpectrumSnapshot, StagedInfo,
};

/// Receives everything the decode loop produces. Called on the decode thread.
pub trait DecodeListener: Send + Sync {
    fn message(&self, message: Message);
    fn status(&self, status: StatusUpdate);
    fn spectrum(&self, snapshot: SpectrumSnapshot);
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub sample_rate: u32,
    pub input_channel: InputChannel,
    /// Initial state of the spectrum flag
    pub update_spectrum: bool,
}

impl DecodeParams {
    /// Samples per channel in one capture frame (20 ms).
    pub fn record_count(&self) -> usize {
        self.sample_rate as usize / 50
    }

    pub fn frame_bytes(&self) -> usize {
        self.record_count() * self.input_channel.channel_count() as usize * 2
    }
}

pub struct DecodeSession {
    capture: Arc<CaptureChannel>,
    closed: Arc<AtomicBool>,
    update_spectrum: Arc<AtomicBool>,
    exited: mpsc::Receiver<()>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl DecodeSession {
    /// Start capture and spawn the decode thread.
    pub fn start(
        params: DecodeParams,
        decoder: DecoderHandle,
        capture: Arc<CaptureChannel>,
        listener: Arc<dyn DecodeListener>,
    ) -> Result<Self> {
        capture.start()?;

        let closed = Arc::new(AtomicBool::new(false));
        let update_spectrum = Arc::new(AtomicBool::new(params.update_spectrum));
        // Held by the decode thread for its whole life; disconnects on exit
        let (exit_tx, exited) = mpsc::channel::<()>();

        let mut worker = DecodeWorker {
            decoder,
            capture: capture.clone(),
            listener,
            closed: closed.clone(),
            update_spectrum: update_spectrum.clone(),
            input_channel: params.input_channel,
            record_count: params.record_count(),
            bytes: vec![0u8; params.frame_bytes()],
            samples: Vec::with_capacity(params.frame_bytes() / 2),
            staged: StagedInfo { callsign: String::new(), mode: 0, carrier_offset: 0.0 },
            payload: [0u8; PAYLOAD_LEN],
        };

        let thread = thread::Builder::new()
            .name("decoder".into())
            .spawn(move || {
                log::info!(
                    "Decoder started: rate={}, record_count={}, channel={:?}",
                    params.sample_rate,
                    params.record_count(),
                    params.input_channel
                );
                let result = worker.run();
                match &result {
                    Ok(()) => log::info!("Decoder stopped"),
                    Err(e) => log::error!("Decoder thread exited with error: {:#}", e),
                }
                worker.decoder.close();
                drop(exit_tx);
                result
            })
            .context("Failed to spawn decoder thread")?;

        Ok(Self { capture, closed, update_spectrum, exited, thread: Some(thread) })
    }

    pub fn set_update_spectrum(&self, enabled: bool) {
        self.update_spectrum.store(enabled, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the decode thread and wait for it to release the decoder.
    pub fn close(&mut self, timeout: Duration, policy: ShutdownPolicy) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            log::warn!("Attempted to close an already closed decode session");
            return Ok(());
        }
        log::debug!("Asking decoder to stop");
        // A paused reader would otherwise never notice the flag
        self.capture.resume();

        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => match policy {
                ShutdownPolicy::ExitProcess => {
                    log::error!("Decoder did not stop within {:?}, exiting", timeout);
                    std::process::exit(1);
                }
                ShutdownPolicy::ReturnError => {
                    log::error!("Decoder did not stop within {:?}", timeout);
                    return Err(SessionError::ShutdownTimeout(timeout).into());
                }
            },
        }

        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Decoder finished with error: {:#}", e),
                Err(_) => log::error!("Decoder thread panicked"),
            }
        }
        self.capture.close();
        Ok(())
    }
}

struct DecodeWorker {
    decoder: DecoderHandle,
    capture: Arc<CaptureChannel>,
    listener: Arc<dyn DecodeListener>,
    closed: Arc<AtomicBool>,
    update_spectrum: Arc<AtomicBool>,
    input_channel: InputChannel,
    record_count: usize,
    bytes: Vec<u8>,
    samples: Vec<i16>,
    staged: StagedInfo,
    payload: [u8; PAYLOAD_LEN],
}

impl DecodeWorker {
    fn run(&mut self) -> Result<()> {
        while !self.closed.load(Ordering::SeqCst) {
            if self.capture.read(&mut self.bytes)?.is_none() {
                log::warn!("Got end of stream from audio capture, stopping");
                break;
            }
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            samples_from_le_bytes(&self.bytes, &mut self.samples);
            self.decode_frame()?;
        }
        Ok(())
    }

    fn decode_frame(&mut self) -> Result<(), SessionError> {
        if !self.decoder.feed(&self.samples, self.record_count, self.input_channel) {
            return Ok(());
        }
        let status = DecodeStatus::try_from(self.decoder.process())?;

        if self.update_spectrum.load(Ordering::Relaxed) {
            let mut spectrum = vec![0u32; SPECTRUM_WIDTH * SPECTRUM_HEIGHT];
            let mut spectrogram = vec![0u32; SPECTRUM_WIDTH * SPECTRUM_HEIGHT];
            self.decoder.spectrum(&mut spectrum, &mut spectrogram);
            self.listener.spectrum(SpectrumSnapshot {
                spectrum: spectrum.into(),
                spectrogram: spectrogram.into(),
            });
        }

        match status {
            DecodeStatus::Okay => {}
            DecodeStatus::Fail => {
                self.listener.status(StatusUpdate::error("Preamble failed"));
            }
            DecodeStatus::Sync => {
                self.stage();
            }
            DecodeStatus::Nope => {
                self.stage();
                let result = format!("Mode {} unsupported", self.staged.mode);
                self.emit(MessageType::ErrorIncoming, None, Some(result));
            }
            DecodeStatus::Ping => {
                self.stage();
                self.emit(MessageType::PingIncoming, None, Some("Got ping".to_string()));
            }
            DecodeStatus::Heap => {
                self.listener.status(StatusUpdate::error("Not enough memory"));
            }
            DecodeStatus::Done => {
                let flips = self.decoder.fetch(&mut self.payload);
                if flips < 0 {
                    self.emit(MessageType::ErrorIncoming, None, Some("Decoding failed".to_string()));
                } else {
                    self.listener
                        .status(StatusUpdate::ok(format!("{} bit flips corrected", flips)));
                    let body = Payload::from_bytes(self.payload).to_text();
                    self.emit(MessageType::NormalIncoming, Some(body), None);
                }
            }
        }
        Ok(())
    }

    fn stage(&mut self) {
        self.staged = self.decoder.staged();
        log::debug!("Staged: {:?}", self.staged);
        self.listener.status(StatusUpdate::ok(format!(
            "From {}: mode {}, CFO {:.2} Hz",
            self.staged.callsign, self.staged.mode, self.staged.carrier_offset
        )));
    }

    fn emit(&self, kind: MessageType, body: Option<String>, decoder_result: Option<String>) {
        self.listener
            .message(Message::new(kind, self.staged.callsign.clone(), body, decoder_result));
    }
}
