//! Half-duplex session manager for an OFDM text modem on a sound card.
//!
//! Captured audio runs through a decode loop on its own thread; outgoing
//! messages are encoded and played by a single transmit worker that mutes the
//! receiver while it plays. In repeater mode decoded messages are relayed
//! again, de-duplicated over a debounce window.

pub mod audio;
pub mod config;
pub mod decode_session;
pub mod error;
pub mod event_bus;
pub mod message;
pub mod modem;
pub mod repeater;
pub mod session;
pub mod transmit;

pub use config::Config;
pub use error::SessionError;
pub use session::Session;
