use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    audio: Audio,
    transmit: Transmit,
    repeater: Repeater,
    session: Session,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    input_sample_rate: u32,
    output_sample_rate: u32,
    input_channel: String,
    output_channel: String,
}

#[derive(Deserialize)]
struct Transmit {
    callsign: String,
    carrier_frequency: i32,
    leading_noise: String,
    fancy_header: bool,
    mute_while_transmitting: bool,
}

#[derive(Deserialize)]
struct Repeater {
    enabled: bool,
    delay_ms: i64,
    debounce_ms: u64,
}

#[derive(Deserialize)]
struct Session {
    show_spectrum: bool,
    shutdown_timeout_ms: u64,
    shutdown_policy: String,
    output_format: String,
}

// Read config.toml at compile time and expose it as environment variables
// for Config::new().
fn bake_config() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // audio
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_INPUT_SAMPLE_RATE={}", config.audio.input_sample_rate);
    println!("cargo:rustc-env=AUDIO_OUTPUT_SAMPLE_RATE={}", config.audio.output_sample_rate);
    println!("cargo:rustc-env=AUDIO_INPUT_CHANNEL={}", config.audio.input_channel);
    println!("cargo:rustc-env=AUDIO_OUTPUT_CHANNEL={}", config.audio.output_channel);

    // transmit
    println!("cargo:rustc-env=TRANSMIT_CALLSIGN={}", config.transmit.callsign);
    println!("cargo:rustc-env=TRANSMIT_CARRIER_FREQUENCY={}", config.transmit.carrier_frequency);
    println!("cargo:rustc-env=TRANSMIT_LEADING_NOISE={}", config.transmit.leading_noise);
    println!("cargo:rustc-env=TRANSMIT_FANCY_HEADER={}", config.transmit.fancy_header);
    println!(
        "cargo:rustc-env=TRANSMIT_MUTE_WHILE_TRANSMITTING={}",
        config.transmit.mute_while_transmitting
    );

    // repeater
    println!("cargo:rustc-env=REPEATER_ENABLED={}", config.repeater.enabled);
    println!("cargo:rustc-env=REPEATER_DELAY_MS={}", config.repeater.delay_ms);
    println!("cargo:rustc-env=REPEATER_DEBOUNCE_MS={}", config.repeater.debounce_ms);

    // session
    println!("cargo:rustc-env=SESSION_SHOW_SPECTRUM={}", config.session.show_spectrum);
    println!("cargo:rustc-env=SESSION_SHUTDOWN_TIMEOUT_MS={}", config.session.shutdown_timeout_ms);
    println!("cargo:rustc-env=SESSION_SHUTDOWN_POLICY={}", config.session.shutdown_policy);
    println!("cargo:rustc-env=SESSION_OUTPUT_FORMAT={}", config.session.output_format);
}

fn link_native_modem() {
    if std::env::var_os("CARGO_FEATURE_NATIVE_MODEM").is_none() {
        return;
    }

    let target = std::env::var("TARGET").unwrap_or_default();

    if target.contains("musl") {
        // musl: prebuilt static library, no pkg-config
        if let Ok(sysroot) = std::env::var("MUSL_SYSROOT") {
            println!("cargo:rustc-link-search=native={}/usr/lib", sysroot);
        }
        println!("cargo:rustc-link-lib=static=rattlegram");
        println!("cargo:rustc-link-lib=stdc++");
        return;
    }

    pkg_config::Config::new()
        .probe("rattlegram")
        .expect("Failed to find the rattlegram modem library. Please install librattlegram-dev.");
}

fn main() {
    bake_config();
    link_native_modem();
}
