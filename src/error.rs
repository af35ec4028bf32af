use std::{io, result::Result as StdResult};
use thiserror::Error as ThisError;

/// Unified DVR-IP client result type.
pub type Result<T> = StdResult<T, DvrError>;

/// DVR-IP client error type.
///
/// Frame-level errors (`MalformedFrame`, `ResponseTooShort`) are local to one
/// decode attempt and never kill the connection by themselves. `Io` and
/// `ConnectionClosed` are fatal to the whole client and surface to the
/// reconnect supervisor. `Timeout` is always distinct from `Cancelled`:
/// a timed-out command failed, a cancelled one was torn down on purpose.
#[derive(Debug, ThisError)]
pub enum DvrError {
    /// Underlying I/O error from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Magic/terminator mismatch or a length field inconsistent with the
    /// available bytes.
    #[error("malformed frame: {detail}")]
    MalformedFrame { detail: &'static str },

    /// Decoded frame's sequence disagrees with what the pending operation
    /// expected.
    #[error("unexpected sequence: expected {expected}, received {actual}")]
    UnexpectedSequence { expected: u32, actual: u32 },

    /// Decoded frame's command id disagrees with what the pending operation
    /// expected.
    #[error("unexpected command: expected {expected}, received {actual}")]
    UnexpectedCommand { expected: u16, actual: u16 },

    /// Frame shorter than its declared payload length.
    #[error("response is too short")]
    ResponseTooShort,

    /// Reply carried a non-success `Ret` code.
    #[error("{op} command failed: {reason}")]
    CommandFailed {
        op: &'static str,
        ret: i32,
        reason: String,
    },

    /// Send did not complete, or no matching reply arrived, within the
    /// round-trip deadline.
    #[error("{op} command timed out")]
    Timeout { op: &'static str },

    /// The client's root cancellation fired during the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation requires an authenticated session.
    #[error("not logged in")]
    NotLoggedIn,

    /// Login attempted twice on the same client instance.
    #[error("already logged in")]
    AlreadyLoggedIn,

    /// Operation attempted on a disposed client.
    #[error("client disposed")]
    Disposed,

    /// Login reply carried an unusable `SessionID` string.
    #[error("invalid session id in login reply: {0}")]
    InvalidSessionId(String),

    /// The device closed the TCP connection.
    #[error("connection closed by device")]
    ConnectionClosed,

    /// The session never reached the ready state.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// A config payload did not have the JSON shape the accessor expects.
    #[error("unexpected shape for config {name}")]
    ConfigShape { name: String },

    /// Payload (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
