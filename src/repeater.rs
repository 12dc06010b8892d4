//! Decides whether an incoming message should be relayed again.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::message::{Direction, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    IsOutgoingMessage,
    FailedMessage,
    InvalidMessage,
    DebounceInvalid,
}

type Key = (String, Option<String>);

pub struct RepeatValidator {
    window: chrono::Duration,
    accepted: HashMap<Key, DateTime<Local>>,
}

impl RepeatValidator {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            accepted: HashMap::new(),
        }
    }

    /// Start with the recent incoming traffic already inside the window.
    pub fn seeded<'a>(history: impl IntoIterator<Item = &'a Message>, window: Duration) -> Self {
        let mut validator = Self::new(window);
        let now = Local::now();
        for message in history {
            if message.direction() != Direction::Incoming
                || message.kind.is_failed()
                || message.callsign.is_empty()
                || validator.is_expired(message.timestamp, now)
            {
                continue;
            }
            let key = (message.callsign.clone(), message.body.clone());
            let entry = validator.accepted.entry(key).or_insert(message.timestamp);
            if *entry < message.timestamp {
                *entry = message.timestamp;
            }
        }
        log::debug!("Repeat validator seeded with {} entries", validator.accepted.len());
        validator
    }

    pub fn validate(&mut self, message: &Message) -> ValidationResult {
        let now = message.timestamp;
        self.sweep(now);

        if message.direction() == Direction::Outgoing {
            log::debug!("{:?} is outgoing, will not repeat", message.kind);
            return ValidationResult::IsOutgoingMessage;
        }
        if message.kind.is_failed() {
            log::debug!("{:?} is failed, will not repeat", message.kind);
            return ValidationResult::FailedMessage;
        }
        if message.callsign.is_empty() {
            log::debug!("{:?} has no callsign, will not repeat", message.kind);
            return ValidationResult::InvalidMessage;
        }

        let key = (message.callsign.clone(), message.body.clone());
        if let Some(&seen) = self.accepted.get(&key) {
            if !self.is_expired(seen, now) {
                log::debug!("{:?} repeated within debounce window", key);
                return ValidationResult::DebounceInvalid;
            }
        }
        self.accepted.insert(key, now);
        ValidationResult::Valid
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    fn is_expired(&self, seen: DateTime<Local>, now: DateTime<Local>) -> bool {
        match seen.checked_add_signed(self.window) {
            Some(until) => until <= now,
            None => false,
        }
    }

    fn sweep(&mut self, now: DateTime<Local>) {
        let window = self.window;
        self.accepted.retain(|_, seen| match seen.checked_add_signed(window) {
            Some(until) => until > now,
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    const WINDOW: Duration = Duration::from_secs(60);

    fn incoming(callsign: &str, body: &str, secs: i64) -> Message {
        let mut message = Message::new(
            MessageType::NormalIncoming,
            callsign,
            Some(body.to_string()),
            None,
        );
        message.timestamp = message.timestamp + chrono::Duration::seconds(secs);
        message
    }

    #[test]
    fn rejections_are_checked_in_order() {
        let mut v = RepeatValidator::new(WINDOW);

        let mut outgoing = incoming("", "x", 0);
        outgoing.kind = MessageType::NormalOutgoing;
        assert_eq!(v.validate(&outgoing), ValidationResult::IsOutgoingMessage);

        let mut failed = incoming("", "x", 0);
        failed.kind = MessageType::ErrorIncoming;
        assert_eq!(v.validate(&failed), ValidationResult::FailedMessage);

        assert_eq!(v.validate(&incoming("", "x", 0)), ValidationResult::InvalidMessage);
        assert!(v.is_empty());
    }

    #[test]
    fn duplicate_inside_window_is_debounced() {
        let mut v = RepeatValidator::new(WINDOW);
        assert_eq!(v.validate(&incoming("N0CALL", "hello", 0)), ValidationResult::Valid);
        assert_eq!(v.validate(&incoming("N0CALL", "hello", 30)), ValidationResult::DebounceInvalid);
        assert_eq!(v.validate(&incoming("N0CALL", "other", 30)), ValidationResult::Valid);
        assert_eq!(v.validate(&incoming("K1ABC", "hello", 30)), ValidationResult::Valid);
    }

    #[test]
    fn duplicate_after_window_is_accepted_again() {
        let mut v = RepeatValidator::new(WINDOW);
        assert_eq!(v.validate(&incoming("N0CALL", "hello", 0)), ValidationResult::Valid);
        assert_eq!(v.validate(&incoming("N0CALL", "hello", 60)), ValidationResult::Valid);
    }

    #[test]
    fn rejection_does_not_extend_window() {
        let mut v = RepeatValidator::new(WINDOW);
        assert_eq!(v.validate(&incoming("N0CALL", "hello", 0)), ValidationResult::Valid);
        assert_eq!(v.validate(&incoming("N0CALL", "hello", 50)), ValidationResult::DebounceInvalid);
        assert_eq!(v.validate(&incoming("N0CALL", "hello", 61)), ValidationResult::Valid);
    }

    #[test]
    fn pings_are_keyed_by_empty_body() {
        let mut v = RepeatValidator::new(WINDOW);
        let ping = Message::new(MessageType::PingIncoming, "N0CALL", None, Some("Got ping".into()));
        assert_eq!(v.validate(&ping), ValidationResult::Valid);
        assert_eq!(v.validate(&ping), ValidationResult::DebounceInvalid);
    }

    #[test]
    fn expired_entries_are_swept() {
        let mut v = RepeatValidator::new(WINDOW);
        for i in 0..10 {
            v.validate(&incoming("N0CALL", &i.to_string(), 0));
        }
        assert_eq!(v.len(), 10);
        v.validate(&incoming("K1ABC", "late", 120));
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn seeding_remembers_recent_incoming() {
        let history = vec![
            incoming("N0CALL", "hello", -10),
            incoming("K1ABC", "stale", -600),
            {
                let mut failed = incoming("N0CALL", "broken", -5);
                failed.kind = MessageType::ErrorIncoming;
                failed
            },
        ];
        let mut v = RepeatValidator::seeded(&history, WINDOW);
        assert_eq!(v.len(), 1);
        assert_eq!(v.validate(&incoming("N0CALL", "hello", 0)), ValidationResult::DebounceInvalid);
        assert_eq!(v.validate(&incoming("K1ABC", "stale", 0)), ValidationResult::Valid);
    }
}
