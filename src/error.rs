use std::time::Duration;

use thiserror::Error;

/// Failures that callers need to tell apart from generic device or I/O errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The codec returned a null handle; the session cannot start.
    #[error("failed to create modem {kind} for sample rate {sample_rate} Hz")]
    CodecInit { kind: &'static str, sample_rate: u32 },

    /// The codec reported a status code this binding does not know.
    #[error("unknown decoder status code {0}, codec and binding disagree")]
    UnknownStatus(i32),

    /// The decode thread did not reach the exit rendezvous in time.
    #[error("decode loop did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("session is not running")]
    NotRunning,

    #[error("session is already running")]
    AlreadyRunning,

    /// The transmit scheduler no longer accepts requests.
    #[error("transmit scheduler is closed")]
    Closed,
}
