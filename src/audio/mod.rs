//! audio - sound card boundary
//!
//! Raw S16LE interleaved PCM in both directions. The ALSA backend lives behind
//! the `alsa` feature; tests drive the session through in-memory sources.

#[cfg(feature = "alsa")]
pub mod alsa_device;
pub mod capture;

use anyhow::Result;

use crate::config::AudioConfig;

pub use capture::CaptureChannel;

/// A capture stream that can be stopped and restarted without being reopened.
pub trait AudioSource: Send {
    /// Open or start the hardware stream.
    fn start(&mut self) -> Result<()>;
    /// Read up to `buf.len()` bytes; `Ok(0)` means the stream has ended.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Stop delivering samples. Buffered input may be discarded.
    fn pause(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
}

pub trait AudioSink: Send {
    /// Play the whole buffer, returning once it has been handed to the device.
    fn play(&mut self, pcm: &[u8]) -> Result<()>;
}

/// Opens capture and playback streams for a given audio configuration.
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self, config: &AudioConfig) -> Result<Box<dyn AudioSource>>;
    fn open_playback(&self, config: &AudioConfig) -> Result<Box<dyn AudioSink>>;
}

/// Reassemble little-endian byte pairs into signed 16-bit samples.
pub fn samples_from_le_bytes(bytes: &[u8], samples: &mut Vec<i16>) {
    samples.clear();
    samples.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}
