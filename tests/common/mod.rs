#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use rattlegram_rs::audio::{AudioBackend, AudioSink, AudioSource};
use rattlegram_rs::config::{AudioConfig, Config, InputChannel, OutputChannel, ShutdownPolicy};
use rattlegram_rs::message::{CALLSIGN_LEN, Callsign, Message, PAYLOAD_LEN, Payload, StatusUpdate};
use rattlegram_rs::modem::{Modem, ModemDecoder, ModemEncoder, SpectrumSnapshot, StagedInfo};
use rattlegram_rs::Session;

/// Marks the start of a data frame; never a valid byte value.
const MAGIC: i16 = 0x5247;
const HEADER: usize = 1 + CALLSIGN_LEN + PAYLOAD_LEN;
const NOISE: i16 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct Configured {
    pub callsign: String,
    pub carrier_frequency: i32,
    pub noise_symbols: i32,
    pub fancy_header: bool,
}

/// Toy modem: one sample per byte behind a magic marker, preceded by noise frames.
#[derive(Default)]
pub struct LoopbackModem {
    pub configured: Arc<Mutex<Vec<Configured>>>,
    pub decoder_rates: Arc<Mutex<Vec<u32>>>,
    pub encoder_rates: Arc<Mutex<Vec<u32>>>,
}

impl Modem for LoopbackModem {
    fn create_decoder(&self, sample_rate: u32) -> Result<Box<dyn ModemDecoder>> {
        self.decoder_rates.lock().unwrap().push(sample_rate);
        Ok(Box::new(LoopbackDecoder::default()))
    }

    fn create_encoder(&self, sample_rate: u32) -> Result<Box<dyn ModemEncoder>> {
        self.encoder_rates.lock().unwrap().push(sample_rate);
        Ok(Box::new(LoopbackEncoder {
            configured: self.configured.clone(),
            burst: VecDeque::new(),
        }))
    }
}

struct LoopbackEncoder {
    configured: Arc<Mutex<Vec<Configured>>>,
    burst: VecDeque<Vec<i16>>,
}

impl ModemEncoder for LoopbackEncoder {
    fn configure(
        &mut self,
        payload: &Payload,
        callsign: &Callsign,
        carrier_frequency: i32,
        noise_symbols: i32,
        fancy_header: bool,
    ) {
        self.configured.lock().unwrap().push(Configured {
            callsign: callsign.as_str().to_string(),
            carrier_frequency,
            noise_symbols,
            fancy_header,
        });
        self.burst.clear();
        for _ in 0..noise_symbols {
            self.burst.push_back(vec![NOISE]);
        }
        let mut data = vec![MAGIC];
        data.extend(callsign.as_bytes().iter().map(|&b| b as i16));
        data.extend(payload.as_bytes().iter().map(|&b| b as i16));
        self.burst.push_back(data);
    }

    fn produce(&mut self, frame: &mut [i16], _channel: OutputChannel) -> bool {
        let Some(data) = self.burst.pop_front() else {
            return false;
        };
        frame.fill(0);
        if data.len() == 1 {
            frame.fill(data[0]);
        } else {
            frame[..data.len()].copy_from_slice(&data);
        }
        true
    }
}

#[derive(Default)]
struct LoopbackDecoder {
    buf: Vec<i16>,
    staged: Option<StagedInfo>,
    pending: Option<[u8; PAYLOAD_LEN]>,
    ready: Option<[u8; PAYLOAD_LEN]>,
}

impl ModemDecoder for LoopbackDecoder {
    fn feed(&mut self, samples: &[i16], sample_count: usize, _channel: InputChannel) -> bool {
        self.buf.extend_from_slice(&samples[..sample_count]);
        true
    }

    fn process(&mut self) -> i32 {
        if let Some(payload) = self.pending.take() {
            self.ready = Some(payload);
            return 3;
        }
        let Some(start) = self.buf.iter().position(|&s| s == MAGIC) else {
            let keep = self.buf.len().saturating_sub(HEADER);
            self.buf.drain(..keep);
            return 0;
        };
        if self.buf.len() < start + HEADER {
            return 0;
        }

        let frame: Vec<u8> = self.buf[start + 1..start + HEADER].iter().map(|&s| s as u8).collect();
        self.buf.drain(..start + HEADER);

        let call_end = frame[..CALLSIGN_LEN].iter().position(|&b| b == 0).unwrap_or(CALLSIGN_LEN);
        self.staged = Some(StagedInfo {
            callsign: String::from_utf8_lossy(&frame[..call_end]).to_string(),
            mode: 16,
            carrier_offset: 0.25,
        });
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&frame[CALLSIGN_LEN..]);

        if payload.iter().all(|&b| b == 0) {
            6
        } else {
            self.pending = Some(payload);
            2
        }
    }

    fn fetch(&mut self, payload: &mut [u8; PAYLOAD_LEN]) -> i32 {
        match self.ready.take() {
            Some(ready) => {
                payload.copy_from_slice(&ready);
                0
            }
            None => -1,
        }
    }

    fn staged(&mut self) -> StagedInfo {
        self.staged
            .clone()
            .unwrap_or(StagedInfo { callsign: String::new(), mode: 0, carrier_offset: 0.0 })
    }

    fn spectrum(&mut self, spectrum: &mut [u32], spectrogram: &mut [u32], _tint: i32) {
        spectrum.fill(0xff00ff00);
        spectrogram.fill(0xff000000);
    }
}

/// One direction of the acoustic path.
#[derive(Default)]
pub struct Air {
    queue: Mutex<VecDeque<u8>>,
}

struct AirSource {
    air: Arc<Air>,
    paused: bool,
}

impl AudioSource for AirSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut queue = self.air.queue.lock().unwrap();
        if queue.is_empty() {
            drop(queue);
            // silence, a little faster than real time
            thread::sleep(Duration::from_millis(1));
            buf.fill(0);
            return Ok(buf.len());
        }
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn pause(&mut self) -> Result<()> {
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.paused = false;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Played {
    pub at: DateTime<Local>,
    pub bytes: usize,
}

struct AirSink {
    air: Arc<Air>,
    played: Arc<Mutex<Vec<Played>>>,
}

impl AudioSink for AirSink {
    fn play(&mut self, pcm: &[u8]) -> Result<()> {
        self.played.lock().unwrap().push(Played { at: Local::now(), bytes: pcm.len() });
        self.air.queue.lock().unwrap().extend(pcm.iter().copied());
        Ok(())
    }
}

pub struct AirBackend {
    capture: Arc<Air>,
    playback: Arc<Air>,
    pub played: Arc<Mutex<Vec<Played>>>,
}

impl AudioBackend for AirBackend {
    fn open_capture(&self, _config: &AudioConfig) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(AirSource { air: self.capture.clone(), paused: false }))
    }

    fn open_playback(&self, _config: &AudioConfig) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(AirSink { air: self.playback.clone(), played: self.played.clone() }))
    }
}

/// Two backends wired so that each one hears what the other plays.
pub fn air_pair() -> (Arc<AirBackend>, Arc<AirBackend>) {
    let a_to_b = Arc::new(Air::default());
    let b_to_a = Arc::new(Air::default());
    let a = AirBackend {
        capture: b_to_a.clone(),
        playback: a_to_b.clone(),
        played: Arc::default(),
    };
    let b = AirBackend { capture: a_to_b, playback: b_to_a, played: Arc::default() };
    (Arc::new(a), Arc::new(b))
}

/// Capture that never returns, standing in for a wedged driver.
pub struct StuckBackend {
    pub entered: Arc<AtomicBool>,
}

struct StuckSource {
    entered: Arc<AtomicBool>,
}

impl AudioSource for StuckSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        self.entered.store(true, Ordering::SeqCst);
        loop {
            thread::park();
        }
    }

    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }
}

impl AudioBackend for StuckBackend {
    fn open_capture(&self, _config: &AudioConfig) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(StuckSource { entered: self.entered.clone() }))
    }

    fn open_playback(&self, _config: &AudioConfig) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(AirSink { air: Arc::default(), played: Arc::default() }))
    }
}

/// Silent capture, playback that always fails.
pub struct BrokenSpeakerBackend;

struct BrokenSpeaker;

impl AudioSink for BrokenSpeaker {
    fn play(&mut self, _pcm: &[u8]) -> Result<()> {
        anyhow::bail!("speaker unplugged")
    }
}

impl AudioBackend for BrokenSpeakerBackend {
    fn open_capture(&self, _config: &AudioConfig) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(AirSource { air: Arc::default(), paused: false }))
    }

    fn open_playback(&self, _config: &AudioConfig) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(BrokenSpeaker))
    }
}

pub fn test_config(callsign: &str) -> Config {
    let mut config = Config::default();
    config.transmit.callsign = callsign.to_string();
    config.session.shutdown_policy = ShutdownPolicy::ReturnError;
    config.session.shutdown_timeout_ms = 2000;
    config
}

pub fn session(config: Config, modem: Arc<LoopbackModem>, audio: Arc<dyn AudioBackend>) -> Arc<Session> {
    Arc::new(Session::new(config, modem, audio, Handle::current()))
}

pub fn watch_messages(session: &Session) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.events().messages.subscribe(move |m| {
        let _ = tx.send(m);
    });
    rx
}

pub fn watch_status(session: &Session) -> mpsc::UnboundedReceiver<StatusUpdate> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.events().status.subscribe(move |s| {
        let _ = tx.send(s);
    });
    rx
}

pub fn watch_spectrum(session: &Session) -> mpsc::UnboundedReceiver<SpectrumSnapshot> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.events().spectrum.subscribe(move |s| {
        let _ = tx.send(s);
    });
    rx
}

/// Wait for the first event matching `pred`, skipping the rest.
pub async fn wait_for<T>(rx: &mut mpsc::UnboundedReceiver<T>, pred: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let item = rx.recv().await.expect("event bus dropped");
            if pred(&item) {
                return item;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn shutdown(session: &Arc<Session>) -> Result<()> {
    let session = session.clone();
    tokio::task::spawn_blocking(move || session.shutdown()).await?
}

pub async fn init(session: &Arc<Session>) -> Result<()> {
    let session = session.clone();
    tokio::task::spawn_blocking(move || session.init()).await?
}
