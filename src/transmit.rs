use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::audio::{AudioSink, CaptureChannel};
use crate::config::OutputChannel;
use crate::error::SessionError;
use crate::event_bus::SessionEvents;
use crate::message::{Callsign, Payload, TransmissionSettings};
use crate::modem::EncoderHandle;

/// Upper bound on produce() rounds for a single burst.
pub const REPEAT_COUNT: usize = 50;

pub type FailureCallback = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

pub struct TransmitRequest {
    pub payload: Payload,
    pub callsign: Callsign,
    pub settings: TransmissionSettings,
    /// Runs on the worker right before audio is produced
    pub before_transmit: Box<dyn FnOnce() + Send>,
}

/// Samples in one encoder output frame: one symbol plus its guard interval.
pub fn frame_len(sample_rate: u32, channel: OutputChannel) -> usize {
    let symbol = 1280 * sample_rate as usize / 8000;
    let guard = symbol / 8;
    (symbol + guard) * channel.channel_count() as usize
}

/// Resumes the capture channel however the playback scope is left.
struct MuteGuard<'a> {
    capture: Option<&'a CaptureChannel>,
}

impl<'a> MuteGuard<'a> {
    fn engage(capture: &'a CaptureChannel, enabled: bool) -> Self {
        if enabled {
            capture.pause();
            Self { capture: Some(capture) }
        } else {
            Self { capture: None }
        }
    }
}

impl Drop for MuteGuard<'_> {
    fn drop(&mut self) {
        if let Some(capture) = self.capture {
            capture.resume();
        }
    }
}

/// Encoder, playback device and receiver mute policy for one session.
pub struct Transmitter {
    encoder: EncoderHandle,
    sink: Box<dyn AudioSink>,
    receiver: Arc<CaptureChannel>,
    mute_while_transmitting: bool,
    events: Arc<SessionEvents>,
    frame: Vec<i16>,
}

impl Transmitter {
    pub fn new(
        encoder: EncoderHandle,
        sink: Box<dyn AudioSink>,
        receiver: Arc<CaptureChannel>,
        sample_rate: u32,
        output_channel: OutputChannel,
        mute_while_transmitting: bool,
        events: Arc<SessionEvents>,
    ) -> Self {
        Self {
            encoder,
            sink,
            receiver,
            mute_while_transmitting,
            events,
            frame: vec![0; frame_len(sample_rate, output_channel)],
        }
    }

    pub fn transmit(&mut self, request: TransmitRequest) -> Result<()> {
        let TransmitRequest { payload, callsign, settings, before_transmit } = request;
        before_transmit();

        let audio = self.produce(&payload, &callsign, &settings);
        log::debug!(
            "Produced {} bytes for {:?} (carrier={} Hz, noise={})",
            audio.len(),
            callsign,
            settings.carrier_frequency,
            settings.noise_symbols
        );

        self.events.transmission_begin.publish(());
        {
            let _mute = MuteGuard::engage(&self.receiver, self.mute_while_transmitting);
            self.sink.play(&audio)?;
        }
        self.events.listening_begin.publish(());
        Ok(())
    }

    fn produce(&mut self, payload: &Payload, callsign: &Callsign, settings: &TransmissionSettings) -> Bytes {
        self.encoder.configure(
            payload,
            callsign,
            settings.carrier_frequency,
            settings.noise_symbols,
            settings.fancy_header,
        );

        let mut audio = BytesMut::with_capacity(self.frame.len() * 2 * REPEAT_COUNT);
        for _ in 0..REPEAT_COUNT {
            if !self.encoder.produce(&mut self.frame, settings.channel_select) {
                break;
            }
            for sample in &self.frame {
                audio.put_i16_le(*sample);
            }
        }
        audio.freeze()
    }
}

struct Job {
    due: Instant,
    seq: u64,
    request: TransmitRequest,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the earliest due, then earliest submitted
impl Ord for Job {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single worker that runs transmissions strictly one at a time.
pub struct TransmitScheduler {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    next_seq: AtomicU64,
}

impl TransmitScheduler {
    pub fn spawn(runtime: &Handle, transmitter: Transmitter, on_failure: FailureCallback) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(worker(rx, Arc::new(Mutex::new(transmitter)), on_failure));
        Self { tx: Mutex::new(Some(tx)), next_seq: AtomicU64::new(0) }
    }

    /// Queue a transmission. Never blocks.
    pub fn submit(&self, request: TransmitRequest) -> Result<(), SessionError> {
        let due = match request.settings.delay {
            Some(delay) => Instant::now() + delay,
            None => Instant::now(),
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(Job { due, seq, request }).map_err(|_| SessionError::Closed),
            None => Err(SessionError::Closed),
        }
    }

    /// Stop accepting work. Pending jobs are dropped; a job already playing finishes.
    pub fn close(&self) {
        if self.tx.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            log::debug!("Transmit scheduler closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<Job>,
    transmitter: Arc<Mutex<Transmitter>>,
    on_failure: FailureCallback,
) {
    log::info!("Transmit worker started");
    let mut queue: BinaryHeap<Job> = BinaryHeap::new();

    loop {
        let next_due = queue.peek().map(|job| job.due);
        tokio::select! {
            biased;

            job = rx.recv() => match job {
                Some(job) => queue.push(job),
                None => break,
            },

            _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                if let Some(job) = queue.pop() {
                    run_job(&transmitter, job.request, &on_failure).await;
                }
            }
        }
    }

    if !queue.is_empty() {
        log::info!("Discarding {} pending transmissions", queue.len());
    }
    log::info!("Transmit worker stopped");
}

async fn run_job(
    transmitter: &Arc<Mutex<Transmitter>>,
    request: TransmitRequest,
    on_failure: &FailureCallback,
) {
    let transmitter = transmitter.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut transmitter = transmitter.lock().unwrap_or_else(|e| e.into_inner());
        transmitter.transmit(request)
    })
    .await;

    let error = match result {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => anyhow!("transmission aborted: {}", e),
    };
    log::error!("Error transmitting audio output: {:#}", error);
    on_failure(&error);
}
