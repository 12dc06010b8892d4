use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use tokio::runtime::Handle;

use crate::audio::{AudioBackend, CaptureChannel};
use crate::config::Config;
use crate::decode_session::{DecodeListener, DecodeParams, DecodeSession};
use crate::error::SessionError;
use crate::event_bus::SessionEvents;
use crate::message::{
    Callsign, Message, MessageType, Payload, StatusUpdate, TransmissionSettings,
};
use crate::modem::{DecoderHandle, EncoderHandle, Modem, SpectrumSnapshot};
use crate::repeater::{RepeatValidator, ValidationResult};
use crate::transmit::{FailureCallback, TransmitRequest, TransmitScheduler, Transmitter};

/// Append-only record of every message sent or received.
pub struct MessageLog {
    messages: Mutex<Vec<Message>>,
    events: Arc<SessionEvents>,
}

impl MessageLog {
    fn new(events: Arc<SessionEvents>) -> Self {
        Self { messages: Mutex::new(Vec::new()), events }
    }

    pub fn push(&self, message: Message) {
        log::info!("{}", message);
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        self.events.messages.publish(message);
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// State shared with the decode thread and transmit jobs.
struct Shared {
    config: RwLock<Config>,
    events: Arc<SessionEvents>,
    log: MessageLog,
    repeater_enabled: AtomicBool,
    show_spectrum: AtomicBool,
    outbox: RwLock<Option<Arc<TransmitScheduler>>>,
}

impl Shared {
    fn config(&self) -> Config {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn status(&self, status: StatusUpdate) {
        log::debug!("Status: {}", status);
        self.events.status.publish(status);
    }

    fn submit_transmission(
        self: &Arc<Self>,
        callsign: &str,
        body: &str,
        delay: Option<Duration>,
    ) -> Result<(), SessionError> {
        let scheduler = self
            .outbox
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SessionError::NotRunning)?;

        let config = self.config();
        let callsign = Callsign::new(callsign);
        let settings = TransmissionSettings {
            carrier_frequency: config.transmit.carrier_frequency,
            noise_symbols: config.transmit.leading_noise.noise_symbols(),
            fancy_header: config.transmit.fancy_header,
            channel_select: config.audio.output_channel,
            delay,
        };

        let (kind, record_body) = if body.is_empty() {
            (MessageType::PingOutgoing, None)
        } else {
            (MessageType::NormalOutgoing, Some(body.to_string()))
        };
        let shared = self.clone();
        let record_call = callsign.as_str().to_string();
        let before_transmit = Box::new(move || {
            shared.log.push(Message::new(kind, record_call, record_body, None));
        });

        log::debug!("Queueing {:?} from {:?}, delay {:?}", kind, callsign, delay);
        scheduler.submit(TransmitRequest {
            payload: Payload::from_text(body),
            callsign,
            settings,
            before_transmit,
        })
    }
}

/// Listener for the decode thread: logs messages and relays them when repeating.
struct IncomingHandler {
    shared: Arc<Shared>,
    validator: Mutex<RepeatValidator>,
}

impl IncomingHandler {
    fn repeat(&self, message: &Message) {
        let result = self
            .validator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .validate(message);

        match result {
            ValidationResult::Valid => {
                let delay = self.shared.config().repeater.delay();
                log::debug!("Repeating message from {}, delay {:?}", message.callsign, delay);
                let body = message.body.as_deref().unwrap_or("");
                if let Err(e) = self.shared.submit_transmission(&message.callsign, body, delay) {
                    log::warn!("Failed to queue repeat: {}", e);
                }
            }
            ValidationResult::DebounceInvalid => {
                self.shared.status(StatusUpdate::ignored("Ignoring repeated message"));
            }
            ValidationResult::InvalidMessage => {
                self.shared.status(StatusUpdate::ignored("Invalid message, will not repeat"));
            }
            ValidationResult::FailedMessage => {}
            ValidationResult::IsOutgoingMessage => {
                log::error!("Got an outgoing message from the decoder: {}", message);
            }
        }
    }
}

impl DecodeListener for IncomingHandler {
    fn message(&self, message: Message) {
        if !self.shared.repeater_enabled.load(Ordering::SeqCst) {
            self.shared.log.push(message);
            return;
        }
        // logged first so a relay record never precedes what triggered it
        self.shared.log.push(message.clone());
        self.repeat(&message);
    }

    fn status(&self, status: StatusUpdate) {
        self.shared.status(status);
    }

    fn spectrum(&self, snapshot: SpectrumSnapshot) {
        self.shared.events.spectrum.publish(snapshot);
    }
}

struct Running {
    decode: DecodeSession,
    scheduler: Arc<TransmitScheduler>,
}

/// One half-duplex modem session: decode loop, transmit worker and repeater.
pub struct Session {
    shared: Arc<Shared>,
    modem: Arc<dyn Modem>,
    audio: Arc<dyn AudioBackend>,
    runtime: Handle,
    running: Mutex<Option<Running>>,
}

impl Session {
    pub fn new(
        config: Config,
        modem: Arc<dyn Modem>,
        audio: Arc<dyn AudioBackend>,
        runtime: Handle,
    ) -> Self {
        let events = Arc::new(SessionEvents::new(runtime.clone()));
        let shared = Arc::new(Shared {
            repeater_enabled: AtomicBool::new(config.repeater.enabled),
            show_spectrum: AtomicBool::new(config.session.show_spectrum),
            config: RwLock::new(config),
            log: MessageLog::new(events.clone()),
            events,
            outbox: RwLock::new(None),
        });
        Self { shared, modem, audio, runtime, running: Mutex::new(None) }
    }

    /// Open the devices, create the codec instances and start listening.
    pub fn init(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Err(SessionError::AlreadyRunning.into());
        }

        let config = self.shared.config();
        let audio = &config.audio;
        let input_rate = audio.input_sample_rate.hz();
        let output_rate = audio.output_sample_rate.hz();
        log::info!(
            "Initializing session: input={} Hz {:?}, output={} Hz {:?}",
            input_rate,
            audio.input_channel,
            output_rate,
            audio.output_channel
        );

        let decoder = DecoderHandle::new(self.modem.create_decoder(input_rate)?);
        let encoder = EncoderHandle::new(self.modem.create_encoder(output_rate)?);

        let capture = match self.audio.open_capture(audio) {
            Ok(source) => Arc::new(CaptureChannel::new(source)),
            Err(e) => return Err(self.input_failed(e)),
        };
        let sink = self.audio.open_playback(audio)?;

        let transmitter = Transmitter::new(
            encoder,
            sink,
            capture.clone(),
            output_rate,
            audio.output_channel,
            config.transmit.mute_while_transmitting,
            self.shared.events.clone(),
        );
        let events = self.shared.events.clone();
        let on_failure: FailureCallback = Arc::new(move |e: &anyhow::Error| {
            events
                .status
                .publish(StatusUpdate::error(format!("Transmission failed: {:#}", e)));
        });
        let scheduler = Arc::new(TransmitScheduler::spawn(&self.runtime, transmitter, on_failure));

        let validator =
            RepeatValidator::seeded(&self.shared.log.snapshot(), config.repeater.debounce());
        let handler = Arc::new(IncomingHandler {
            shared: self.shared.clone(),
            validator: Mutex::new(validator),
        });

        let params = DecodeParams {
            sample_rate: input_rate,
            input_channel: audio.input_channel,
            update_spectrum: self.shared.show_spectrum.load(Ordering::SeqCst),
        };
        let decode = match DecodeSession::start(params, decoder, capture.clone(), handler) {
            Ok(decode) => decode,
            Err(e) => {
                scheduler.close();
                capture.close();
                return Err(self.input_failed(e));
            }
        };

        *self.shared.outbox.write().unwrap_or_else(|e| e.into_inner()) = Some(scheduler.clone());
        *running = Some(Running { decode, scheduler });
        self.shared.status(StatusUpdate::ok("Listening"));
        Ok(())
    }

    fn input_failed(&self, e: anyhow::Error) -> anyhow::Error {
        log::error!("Error starting audio input system: {:#}", e);
        self.shared.status(StatusUpdate::error("Error starting audio input system"));
        e
    }

    /// Stop transmitting and wait for the decode thread to exit.
    ///
    /// Blocks for up to `session.shutdown_timeout_ms`; call it from a blocking
    /// context when inside the runtime.
    pub fn shutdown(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut current) = running.take() else {
            log::debug!("Session already stopped");
            return Ok(());
        };
        log::info!("Shutting down session");

        *self.shared.outbox.write().unwrap_or_else(|e| e.into_inner()) = None;
        current.scheduler.close();

        let session = self.shared.config().session;
        current.decode.close(session.shutdown_timeout(), session.shutdown_policy)
    }

    /// Close everything, then initialize again from the current config.
    pub fn reinitialize(&self) -> Result<()> {
        self.shutdown()?;
        self.init()
    }

    /// Store a new configuration, restarting if the audio path changed.
    pub fn apply_config(&self, config: Config) -> Result<()> {
        let needs_reinit = {
            let mut current = self.shared.config.write().unwrap_or_else(|e| e.into_inner());
            let needs_reinit = current.requires_reinit(&config);
            *current = config.clone();
            needs_reinit
        };
        self.set_repeater_enabled(config.repeater.enabled);
        self.set_show_spectrum(config.session.show_spectrum);

        if needs_reinit && self.is_running() {
            log::info!("Audio configuration changed, reinitializing");
            self.reinitialize()?;
        }
        Ok(())
    }

    /// Queue an outgoing message. An empty body sends a ping.
    pub fn transmit(&self, callsign: &str, body: &str, delay: Option<Duration>) -> Result<()> {
        self.shared.submit_transmission(callsign, body, delay)?;
        Ok(())
    }

    pub fn set_repeater_enabled(&self, enabled: bool) {
        if self.shared.repeater_enabled.swap(enabled, Ordering::SeqCst) != enabled {
            log::info!("Repeater mode {}", if enabled { "enabled" } else { "disabled" });
        }
        self.shared
            .config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .repeater
            .enabled = enabled;
    }

    pub fn set_show_spectrum(&self, enabled: bool) {
        self.shared.show_spectrum.store(enabled, Ordering::SeqCst);
        self.shared
            .config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .show_spectrum = enabled;
        if let Some(running) = self.running.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            running.decode.set_update_spectrum(enabled);
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.log.snapshot()
    }

    pub fn events(&self) -> &Arc<SessionEvents> {
        &self.shared.events
    }

    pub fn config(&self) -> Config {
        self.shared.config()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}
