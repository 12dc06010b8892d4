//! ALSA PCM device wrappers for modem capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

use super::{AudioBackend, AudioSink, AudioSource};
use crate::config::AudioConfig;

/// Give up on a write after this many consecutive XRUN recoveries.
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        (hwp.get_rate()?, hwp.get_channels()?, hwp.get_period_size()? as usize)
    };

    // The modem is instantiated for one exact rate; resampling is not our job
    if actual_rate != sample_rate {
        bail!(
            "PCM device '{}' ({}) does not support {} Hz (got {} Hz)",
            device,
            dir_name,
            sample_rate,
            actual_rate
        );
    }

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((
        pcm,
        AlsaParams { sample_rate: actual_rate, channels: actual_channels, period_size },
    ))
}

pub struct AlsaCapture {
    device: String,
    sample_rate: u32,
    channels: u32,
    pcm: Option<PCM>,
    scratch: Vec<i16>,
}

impl AlsaCapture {
    pub fn new(device: &str, sample_rate: u32, channels: u32) -> Self {
        Self {
            device: device.to_string(),
            sample_rate,
            channels,
            pcm: None,
            scratch: Vec::new(),
        }
    }

    fn pcm(&self) -> Result<&PCM> {
        self.pcm.as_ref().context("Capture device not started")
    }
}

impl AudioSource for AlsaCapture {
    fn start(&mut self) -> Result<()> {
        if self.pcm.is_none() {
            let (pcm, _params) =
                open_pcm(&self.device, Direction::Capture, self.sample_rate, self.channels, "Capture")?;
            pcm.start()?;
            self.pcm = Some(pcm);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let channels = self.channels as usize;
        let frames = buf.len() / 2 / channels;
        if frames == 0 {
            return Ok(0);
        }
        self.scratch.resize(frames * channels, 0);

        let Some(pcm) = self.pcm.as_ref() else {
            return Ok(0);
        };
        let io = pcm.io_i16()?;
        let mut retry_count = 0u32;
        let read = loop {
            match io.readi(&mut self.scratch) {
                Ok(n) => break n,
                Err(e) => {
                    log::warn!("ALSA capture overrun or error: {}, recovering...", e);
                    retry_count += 1;
                    pcm.prepare().context("Failed to recover PCM capture")?;
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        return Err(e).context("Capture keeps failing after recovery");
                    }
                }
            }
        };

        let samples = read * channels;
        for (pair, sample) in buf.chunks_exact_mut(2).zip(&self.scratch[..samples]) {
            pair.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(samples * 2)
    }

    fn pause(&mut self) -> Result<()> {
        // drop() stops the stream and discards whatever is buffered
        self.pcm()?.drop().context("Failed to stop PCM capture")?;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let pcm = self.pcm()?;
        pcm.prepare().context("Failed to prepare PCM capture")?;
        pcm.start().context("Failed to restart PCM capture")?;
        Ok(())
    }
}

pub struct AlsaPlayback {
    pcm: PCM,
    channels: u32,
    scratch: Vec<i16>,
}

impl AlsaPlayback {
    pub fn open(device: &str, sample_rate: u32, channels: u32) -> Result<Self> {
        let (pcm, params) = open_pcm(device, Direction::Playback, sample_rate, channels, "Playback")?;
        Ok(Self { pcm, channels: params.channels, scratch: Vec::new() })
    }
}

impl AudioSink for AlsaPlayback {
    fn play(&mut self, pcm_bytes: &[u8]) -> Result<()> {
        self.scratch.clear();
        self.scratch.extend(
            pcm_bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );

        let channels = self.channels as usize;
        let total_frames = self.scratch.len() / channels;
        let io = self.pcm.io_i16()?;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        // Retry loop handles short writes and XRUN recovery without losing frames
        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&self.scratch[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;

                    self.pcm.prepare().context("Failed to recover PCM playback")?;

                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }

        // Block until the burst has actually left the speaker, then rearm
        self.pcm.drain().context("Failed to drain PCM playback")?;
        self.pcm.prepare().context("Failed to prepare PCM playback")?;
        Ok(())
    }
}

/// Opens ALSA devices by name.
#[derive(Debug, Clone, Default)]
pub struct AlsaBackend;

impl AudioBackend for AlsaBackend {
    fn open_capture(&self, config: &AudioConfig) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(AlsaCapture::new(
            &config.capture_device,
            config.input_sample_rate.hz(),
            config.input_channel.channel_count(),
        )))
    }

    fn open_playback(&self, config: &AudioConfig) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(AlsaPlayback::open(
            &config.playback_device,
            config.output_sample_rate.hz(),
            config.output_channel.channel_count(),
        )?))
    }
}
