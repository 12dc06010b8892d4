use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::signal;

use rattlegram_rs::audio::alsa_device::AlsaBackend;
use rattlegram_rs::config::OutputFormat;
use rattlegram_rs::modem::native::NativeModem;
use rattlegram_rs::{Config, Session};

enum Command<'a> {
    Send(&'a str),
    Ping,
    Repeater(bool),
    Spectrum(bool),
    Reinit,
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg.trim() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.starts_with('/') {
        return if line.is_empty() { None } else { Some(Command::Send(line)) };
    }
    let (name, arg) = line.split_once(' ').unwrap_or((line, ""));
    match name {
        "/ping" => Some(Command::Ping),
        "/repeater" => parse_switch(arg).map(Command::Repeater),
        "/spectrum" => parse_switch(arg).map(Command::Spectrum),
        "/reinit" => Some(Command::Reinit),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Optional runtime config path; otherwise the values baked in from config.toml
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path)?,
        None => Config::new().context("Failed to load built-in config")?,
    };
    let output_format = config.session.output_format;
    let callsign = config.transmit.callsign.clone();

    let session = Arc::new(Session::new(
        config,
        Arc::new(NativeModem),
        Arc::new(AlsaBackend),
        Handle::current(),
    ));

    let events = session.events();
    events.messages.subscribe(move |message| match output_format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => match serde_json::to_string(&message) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize message: {}", e),
        },
    });
    events.status.subscribe(move |status| match output_format {
        OutputFormat::Text => eprintln!("{}", status),
        OutputFormat::Json => match serde_json::to_string(&status) {
            Ok(line) => eprintln!("{}", line),
            Err(e) => log::warn!("Failed to serialize status: {}", e),
        },
    });
    events.transmission_begin.subscribe(|()| log::info!("Transmitting"));
    events.listening_begin.subscribe(|()| log::info!("Listening"));

    {
        let session = session.clone();
        tokio::task::spawn_blocking(move || session.init()).await??;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    // keep listening until Ctrl+C
                    log::info!("stdin closed");
                    stdin_open = false;
                    continue;
                };
                let result = match parse_command(&line) {
                    Some(Command::Send(body)) => session.transmit(&callsign, body, None),
                    Some(Command::Ping) => session.transmit(&callsign, "", None),
                    Some(Command::Repeater(enabled)) => {
                        session.set_repeater_enabled(enabled);
                        Ok(())
                    }
                    Some(Command::Spectrum(enabled)) => {
                        session.set_show_spectrum(enabled);
                        Ok(())
                    }
                    Some(Command::Reinit) => {
                        let session = session.clone();
                        tokio::task::spawn_blocking(move || session.reinitialize()).await?
                    }
                    None => {
                        log::warn!("Unknown command: {}", line);
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    log::error!("{:#}", e);
                }
            }
        }
    }

    let session = session.clone();
    tokio::task::spawn_blocking(move || session.shutdown()).await??;
    Ok(())
}
