//! Pausable capture channel shared by the decode thread and the transmitter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use anyhow::{Context, Result};

use super::AudioSource;

#[derive(Debug, Default)]
struct GateState {
    paused: bool,
    closed: bool,
}

/// Gate that can be closed on one thread and reopened on another.
#[derive(Debug, Default)]
pub struct PauseGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl PauseGate {
    /// Returns true if the gate was open.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        !std::mem::replace(&mut state.paused, true)
    }

    /// Returns true if the gate was closed.
    pub fn open(&self) -> bool {
        let was_paused =
            std::mem::replace(&mut self.state.lock().unwrap_or_else(|e| e.into_inner()).paused, false);
        self.changed.notify_all();
        was_paused
    }

    /// Release every waiter for good; `wait` returns false from now on.
    pub fn shutdown(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
        self.changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).paused
    }

    /// Block while the gate is closed. Returns false once shut down.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.paused && !state.closed {
            state = self.changed.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        !state.closed
    }
}

struct Stream {
    source: Option<Box<dyn AudioSource>>,
    /// Whether the hardware is actually stopped
    stopped: bool,
}

impl Stream {
    /// Bring the hardware in line with the gate.
    fn sync(&mut self, paused: bool) {
        if paused == self.stopped {
            return;
        }
        let Some(source) = self.source.as_mut() else {
            return;
        };
        let result = if paused { source.pause() } else { source.resume() };
        match result {
            Ok(()) => self.stopped = paused,
            Err(e) if paused => log::warn!("Failed to pause audio capture: {:#}", e),
            Err(e) => log::warn!("Failed to resume audio capture: {:#}", e),
        }
    }
}

pub struct CaptureChannel {
    stream: Mutex<Stream>,
    gate: PauseGate,
    closed: AtomicBool,
}

impl CaptureChannel {
    pub fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            stream: Mutex::new(Stream { source: Some(source), stopped: false }),
            gate: PauseGate::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn start(&self) -> Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        match stream.source.as_mut() {
            Some(source) => source.start().context("Failed to start audio capture"),
            None => anyhow::bail!("Capture channel is closed"),
        }
    }

    /// Fill `buf` completely. `Ok(None)` means end of stream.
    pub fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        loop {
            if !self.gate.wait() {
                return Ok(None);
            }
            let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
            // pause() may have won the race between the gate and the lock
            if self.gate.is_paused() {
                continue;
            }
            let Some(source) = stream.source.as_mut() else {
                return Ok(None);
            };

            let mut filled = 0;
            while filled < buf.len() {
                let n = source.read(&mut buf[filled..])?;
                if n == 0 {
                    return Ok(None);
                }
                filled += n;
            }
            return Ok(Some(filled));
        }
    }

    /// Stop capture; waits for any in-flight read to complete first.
    ///
    /// The gate holds the wanted state and the hardware follows it under the
    /// stream lock, so whichever of pause/resume syncs last sees the final
    /// gate state.
    pub fn pause(&self) {
        if self.closed.load(Ordering::SeqCst) || !self.gate.close() {
            return;
        }
        log::debug!("Pausing audio capture");
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        stream.sync(self.gate.is_paused());
    }

    pub fn resume(&self) {
        // never touches the stream lock while open, so a stuck read cannot block it
        if !self.gate.is_paused() {
            return;
        }
        log::debug!("Resuming audio capture");
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        self.gate.open();
        stream.sync(self.gate.is_paused());
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Wake every blocked reader and release the device.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate.shutdown();
        let source = self.stream.lock().unwrap_or_else(|e| e.into_inner()).source.take();
        drop(source);
        log::debug!("Audio capture closed");
    }
}
