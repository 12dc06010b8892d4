use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// Sample rates the modem has decoder/encoder instantiations for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    Hz8000,
    Hz16000,
    Hz32000,
    Hz44100,
    Hz48000,
}

impl SampleRate {
    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz32000 => 32000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            8000 => Ok(SampleRate::Hz8000),
            16000 => Ok(SampleRate::Hz16000),
            32000 => Ok(SampleRate::Hz32000),
            44100 => Ok(SampleRate::Hz44100),
            48000 => Ok(SampleRate::Hz48000),
            other => Err(format!("unsupported sample rate {} Hz", other)),
        }
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.hz()
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hz())
    }
}

/// Which part of the captured signal the decoder listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputChannel {
    /// Mono capture
    Default,
    First,
    Second,
    Summation,
    Analytic,
}

impl InputChannel {
    /// Channel selector understood by the codec.
    pub fn select(self) -> i32 {
        match self {
            InputChannel::Default => 0,
            InputChannel::First => 1,
            InputChannel::Second => 2,
            InputChannel::Summation => 3,
            InputChannel::Analytic => 4,
        }
    }

    /// Number of interleaved channels captured from the device.
    pub fn channel_count(self) -> u32 {
        match self {
            InputChannel::Default => 1,
            _ => 2,
        }
    }
}

impl FromStr for InputChannel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(InputChannel::Default),
            "first" => Ok(InputChannel::First),
            "second" => Ok(InputChannel::Second),
            "summation" => Ok(InputChannel::Summation),
            "analytic" => Ok(InputChannel::Analytic),
            other => Err(anyhow!("unknown input channel '{}'", other)),
        }
    }
}

/// Which output channel(s) the encoder writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    /// Mono playback
    Default,
    First,
    Second,
    Analytic,
}

impl OutputChannel {
    pub fn select(self) -> i32 {
        match self {
            OutputChannel::Default => 0,
            OutputChannel::First => 1,
            OutputChannel::Second => 2,
            OutputChannel::Analytic => 4,
        }
    }

    pub fn channel_count(self) -> u32 {
        match self {
            OutputChannel::Default => 1,
            _ => 2,
        }
    }
}

impl FromStr for OutputChannel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(OutputChannel::Default),
            "first" => Ok(OutputChannel::First),
            "second" => Ok(OutputChannel::Second),
            "analytic" => Ok(OutputChannel::Analytic),
            other => Err(anyhow!("unknown output channel '{}'", other)),
        }
    }
}

/// Leading noise sent before the preamble, expressed as a duration choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadingNoise {
    Disabled,
    QuarterSecond,
    HalfSecond,
    OneSecond,
    TwoSeconds,
    FourSeconds,
}

impl LeadingNoise {
    /// Number of noise symbols the encoder emits for this setting.
    pub fn noise_symbols(self) -> i32 {
        match self {
            LeadingNoise::Disabled => 0,
            LeadingNoise::QuarterSecond => 1,
            LeadingNoise::HalfSecond => 3,
            LeadingNoise::OneSecond => 6,
            LeadingNoise::TwoSeconds => 11,
            LeadingNoise::FourSeconds => 22,
        }
    }
}

impl FromStr for LeadingNoise {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "disabled" => Ok(LeadingNoise::Disabled),
            "quarter_second" => Ok(LeadingNoise::QuarterSecond),
            "half_second" => Ok(LeadingNoise::HalfSecond),
            "one_second" => Ok(LeadingNoise::OneSecond),
            "two_seconds" => Ok(LeadingNoise::TwoSeconds),
            "four_seconds" => Ok(LeadingNoise::FourSeconds),
            other => Err(anyhow!("unknown leading noise '{}'", other)),
        }
    }
}

/// What shutdown does when the decode thread misses the exit rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Terminate the process so a stuck audio driver cannot freeze it silently.
    #[default]
    ExitProcess,
    /// Return `SessionError::ShutdownTimeout` to the caller.
    ReturnError,
}

impl FromStr for ShutdownPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exit_process" => Ok(ShutdownPolicy::ExitProcess),
            "return_error" => Ok(ShutdownPolicy::ReturnError),
            other => Err(anyhow!("unknown shutdown policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(anyhow!("unknown output format '{}'", other)),
        }
    }
}

/// Sound card routing. Any change here requires a session reinitialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Capture and decoder rate
    pub input_sample_rate: SampleRate,
    /// Playback and encoder rate
    pub output_sample_rate: SampleRate,
    pub input_channel: InputChannel,
    pub output_channel: OutputChannel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitConfig {
    pub callsign: String,
    /// Carrier center frequency in Hz
    pub carrier_frequency: i32,
    pub leading_noise: LeadingNoise,
    pub fancy_header: bool,
    /// Pause capture while our own transmission is playing
    pub mute_while_transmitting: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeaterConfig {
    pub enabled: bool,
    /// Delay before re-transmitting; zero or negative means immediately
    pub delay_ms: i64,
    /// Window during which an identical message is not repeated again
    pub debounce_ms: u64,
}

impl RepeaterConfig {
    pub fn delay(&self) -> Option<Duration> {
        if self.delay_ms <= 0 {
            None
        } else {
            Some(Duration::from_millis(self.delay_ms as u64))
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub show_spectrum: bool,
    pub shutdown_timeout_ms: u64,
    #[serde(default)]
    pub shutdown_policy: ShutdownPolicy,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl SessionConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub audio: AudioConfig,
    pub transmit: TransmitConfig,
    pub repeater: RepeaterConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Build the configuration from values baked in at compile time.
    /// All parameters come from config.toml, read by build.rs.
    pub fn new() -> Result<Self> {
        let input_sample_rate: u32 = env!("AUDIO_INPUT_SAMPLE_RATE")
            .parse()
            .context("Failed to parse AUDIO_INPUT_SAMPLE_RATE")?;
        let output_sample_rate: u32 = env!("AUDIO_OUTPUT_SAMPLE_RATE")
            .parse()
            .context("Failed to parse AUDIO_OUTPUT_SAMPLE_RATE")?;

        Ok(Self {
            audio: AudioConfig {
                capture_device: env!("AUDIO_CAPTURE_DEVICE").to_string(),
                playback_device: env!("AUDIO_PLAYBACK_DEVICE").to_string(),
                input_sample_rate: SampleRate::try_from(input_sample_rate).map_err(|e| anyhow!(e))?,
                output_sample_rate: SampleRate::try_from(output_sample_rate)
                    .map_err(|e| anyhow!(e))?,
                input_channel: env!("AUDIO_INPUT_CHANNEL").parse()?,
                output_channel: env!("AUDIO_OUTPUT_CHANNEL").parse()?,
            },
            transmit: TransmitConfig {
                callsign: env!("TRANSMIT_CALLSIGN").to_string(),
                carrier_frequency: env!("TRANSMIT_CARRIER_FREQUENCY")
                    .parse()
                    .context("Failed to parse TRANSMIT_CARRIER_FREQUENCY")?,
                leading_noise: env!("TRANSMIT_LEADING_NOISE").parse()?,
                fancy_header: env!("TRANSMIT_FANCY_HEADER")
                    .parse()
                    .context("Failed to parse TRANSMIT_FANCY_HEADER")?,
                mute_while_transmitting: env!("TRANSMIT_MUTE_WHILE_TRANSMITTING")
                    .parse()
                    .context("Failed to parse TRANSMIT_MUTE_WHILE_TRANSMITTING")?,
            },
            repeater: RepeaterConfig {
                enabled: env!("REPEATER_ENABLED")
                    .parse()
                    .context("Failed to parse REPEATER_ENABLED")?,
                delay_ms: env!("REPEATER_DELAY_MS")
                    .parse()
                    .context("Failed to parse REPEATER_DELAY_MS")?,
                debounce_ms: env!("REPEATER_DEBOUNCE_MS")
                    .parse()
                    .context("Failed to parse REPEATER_DEBOUNCE_MS")?,
            },
            session: SessionConfig {
                show_spectrum: env!("SESSION_SHOW_SPECTRUM")
                    .parse()
                    .context("Failed to parse SESSION_SHOW_SPECTRUM")?,
                shutdown_timeout_ms: env!("SESSION_SHUTDOWN_TIMEOUT_MS")
                    .parse()
                    .context("Failed to parse SESSION_SHUTDOWN_TIMEOUT_MS")?,
                shutdown_policy: env!("SESSION_SHUTDOWN_POLICY").parse()?,
                output_format: env!("SESSION_OUTPUT_FORMAT").parse()?,
            },
        })
    }

    /// Load a config file at runtime, using the same layout as config.toml.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.session.shutdown_timeout_ms == 0 {
            bail!("session.shutdown_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Whether switching from `self` to `other` needs a close-then-init cycle.
    /// Everything else is read per request.
    pub fn requires_reinit(&self, other: &Config) -> bool {
        self.audio != other.audio
            || self.repeater.debounce_ms != other.repeater.debounce_ms
            || self.transmit.mute_while_transmitting != other.transmit.mute_while_transmitting
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                capture_device: "default".to_string(),
                playback_device: "default".to_string(),
                input_sample_rate: SampleRate::Hz8000,
                output_sample_rate: SampleRate::Hz8000,
                input_channel: InputChannel::Default,
                output_channel: OutputChannel::Default,
            },
            transmit: TransmitConfig {
                callsign: "ANONYMOUS".to_string(),
                carrier_frequency: 1500,
                leading_noise: LeadingNoise::QuarterSecond,
                fancy_header: false,
                mute_while_transmitting: true,
            },
            repeater: RepeaterConfig {
                enabled: false,
                delay_ms: 1000,
                debounce_ms: 60_000,
            },
            session: SessionConfig {
                show_spectrum: false,
                shutdown_timeout_ms: 3000,
                shutdown_policy: ShutdownPolicy::ExitProcess,
                output_format: OutputFormat::Text,
            },
        }
    }
}
