use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::OutputChannel;

/// Size of the modem payload buffer in bytes.
pub const PAYLOAD_LEN: usize = 170;
/// Size of the callsign buffer in bytes, NUL terminator included.
pub const CALLSIGN_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    NormalIncoming,
    ErrorIncoming,
    PingIncoming,
    NormalOutgoing,
    PingOutgoing,
}

impl MessageType {
    pub fn direction(self) -> Direction {
        match self {
            MessageType::NormalIncoming | MessageType::ErrorIncoming | MessageType::PingIncoming => {
                Direction::Incoming
            }
            MessageType::NormalOutgoing | MessageType::PingOutgoing => Direction::Outgoing,
        }
    }

    pub fn is_failed(self) -> bool {
        matches!(self, MessageType::ErrorIncoming)
    }

    fn glyph(self) -> &'static str {
        match self {
            MessageType::NormalIncoming => ">>",
            MessageType::ErrorIncoming => "!>",
            MessageType::PingIncoming => "P>",
            MessageType::NormalOutgoing => "<<",
            MessageType::PingOutgoing => "P<",
        }
    }
}

/// One entry of the message log, decoded or sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub callsign: String,
    pub body: Option<String>,
    /// Diagnostic text from the decoder, e.g. "Decoding failed"
    pub decoder_result: Option<String>,
    pub timestamp: DateTime<Local>,
    pub kind: MessageType,
}

impl Message {
    pub fn new(
        kind: MessageType,
        callsign: impl Into<String>,
        body: Option<String>,
        decoder_result: Option<String>,
    ) -> Self {
        Self {
            callsign: callsign.into(),
            body,
            decoder_result,
            timestamp: Local::now(),
            kind,
        }
    }

    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }

    /// Text shown after the callsign in the log line.
    pub fn text(&self) -> &str {
        match self.kind {
            MessageType::PingIncoming => "<Received ping>",
            MessageType::PingOutgoing => "<Sent ping>",
            MessageType::ErrorIncoming => self.decoder_result.as_deref().unwrap_or(""),
            MessageType::NormalIncoming | MessageType::NormalOutgoing => {
                self.body.as_deref().unwrap_or("")
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.kind.glyph(),
            self.callsign,
            self.text()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    Ok,
    Error,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub kind: StatusType,
    pub message: String,
}

impl StatusUpdate {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { kind: StatusType::Ok, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { kind: StatusType::Error, message: message.into() }
    }

    pub fn ignored(message: impl Into<String>) -> Self {
        Self { kind: StatusType::Ignored, message: message.into() }
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            StatusType::Ok => "ok",
            StatusType::Error => "error",
            StatusType::Ignored => "ignored",
        };
        write!(f, "[{}] {}", tag, self.message)
    }
}

/// Fixed-size modem payload: UTF-8 text, zero padded.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload([u8; PAYLOAD_LEN]);

impl Payload {
    /// Encode `text`, cutting it at the last character that still fits.
    pub fn from_text(text: &str) -> Self {
        let mut end = text.len().min(PAYLOAD_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = [0u8; PAYLOAD_LEN];
        buf[..end].copy_from_slice(&text.as_bytes()[..end]);
        Self(buf)
    }

    pub fn from_bytes(bytes: [u8; PAYLOAD_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PAYLOAD_LEN] {
        &self.0
    }

    /// Decode back to text with padding and surrounding whitespace removed.
    pub fn to_text(&self) -> String {
        trim_control(&String::from_utf8_lossy(&self.0)).to_string()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.to_text()).finish()
    }
}

/// Fixed-size NUL-terminated callsign as the encoder expects it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Callsign([u8; CALLSIGN_LEN]);

impl Callsign {
    pub fn new(callsign: &str) -> Self {
        let mut buf = [0u8; CALLSIGN_LEN];
        let chars = callsign
            .chars()
            .map(|c| c.to_ascii_uppercase())
            .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == ' ')
            .take(CALLSIGN_LEN - 1);
        for (slot, c) in buf.iter_mut().zip(chars) {
            *slot = c as u8;
        }
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; CALLSIGN_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(CALLSIGN_LEN);
        // only ASCII is ever written into the buffer
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }
}

impl fmt::Debug for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callsign").field(&self.as_str()).finish()
    }
}

/// Per-request encoder parameters, fixed at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionSettings {
    pub carrier_frequency: i32,
    pub noise_symbols: i32,
    pub fancy_header: bool,
    pub channel_select: OutputChannel,
    pub delay: Option<Duration>,
}

/// Strip leading and trailing NUL and ASCII whitespace.
pub fn trim_control(text: &str) -> &str {
    text.trim_matches(|c: char| c <= ' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(kind: MessageType, body: Option<&str>, result: Option<&str>) -> Message {
        Message {
            callsign: "N0CALL".to_string(),
            body: body.map(str::to_string),
            decoder_result: result.map(str::to_string),
            timestamp: Local.with_ymd_and_hms(2024, 3, 1, 7, 5, 9).unwrap(),
            kind,
        }
    }

    #[test]
    fn display_uses_direction_glyphs() {
        assert_eq!(
            at(MessageType::NormalIncoming, Some("hello"), None).to_string(),
            "[07:05:09] >> N0CALL: hello"
        );
        assert_eq!(
            at(MessageType::ErrorIncoming, None, Some("Decoding failed")).to_string(),
            "[07:05:09] !> N0CALL: Decoding failed"
        );
        assert_eq!(
            at(MessageType::PingIncoming, None, Some("Got ping")).to_string(),
            "[07:05:09] P> N0CALL: <Received ping>"
        );
        assert_eq!(
            at(MessageType::NormalOutgoing, Some("hi"), None).to_string(),
            "[07:05:09] << N0CALL: hi"
        );
        assert_eq!(
            at(MessageType::PingOutgoing, None, None).to_string(),
            "[07:05:09] P< N0CALL: <Sent ping>"
        );
    }

    #[test]
    fn only_error_incoming_is_failed() {
        assert!(MessageType::ErrorIncoming.is_failed());
        assert!(!MessageType::NormalIncoming.is_failed());
        assert!(!MessageType::PingIncoming.is_failed());
        assert_eq!(MessageType::PingOutgoing.direction(), Direction::Outgoing);
        assert_eq!(MessageType::PingIncoming.direction(), Direction::Incoming);
    }

    #[test]
    fn payload_is_zero_padded() {
        let payload = Payload::from_text("abc");
        assert_eq!(&payload.as_bytes()[..3], b"abc");
        assert!(payload.as_bytes()[3..].iter().all(|&b| b == 0));
        assert_eq!(payload.to_text(), "abc");
    }

    #[test]
    fn payload_truncates_on_char_boundary() {
        // 169 ASCII bytes followed by a two byte character
        let text = format!("{}é", "a".repeat(PAYLOAD_LEN - 1));
        let payload = Payload::from_text(&text);
        assert_eq!(payload.as_bytes()[PAYLOAD_LEN - 1], 0);
        assert_eq!(payload.to_text(), "a".repeat(PAYLOAD_LEN - 1));

        let exact = "b".repeat(PAYLOAD_LEN + 10);
        assert_eq!(Payload::from_text(&exact).to_text(), "b".repeat(PAYLOAD_LEN));
    }

    #[test]
    fn callsign_is_sanitized_and_terminated() {
        let call = Callsign::new("n0call/p-long");
        assert_eq!(call.as_str(), "N0CALLPLO");
        assert_eq!(call.as_bytes()[CALLSIGN_LEN - 1], 0);
        assert_eq!(Callsign::new("").as_str(), "");
    }

    #[test]
    fn trim_removes_nul_and_whitespace() {
        assert_eq!(trim_control("\0 hi there \n\0\0"), "hi there");
    }

    #[test]
    fn message_serializes_to_json() {
        let json = serde_json::to_value(at(MessageType::NormalIncoming, Some("x"), None)).unwrap();
        assert_eq!(json["kind"], "normal_incoming");
        assert_eq!(json["callsign"], "N0CALL");
    }
}
