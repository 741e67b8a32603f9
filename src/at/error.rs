//! AT-specific error type.
//!
//! One error struct for the whole crate: a kind, a human-readable
//! message, and optionally the serial port the failure belongs to.
//! Modem-reported `ERROR` / `+CME ERROR` outcomes are NOT errors in
//! this sense; they resolve as data (`AtResponse`) so callers can
//! branch on them.

use serde::{Deserialize, Serialize};

/// Error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AtErrorKind {
    /// Serial-level I/O failure.
    Transport,
    /// A transport deadline elapsed.
    Timeout,
    /// Unknown character-set label.
    UnsupportedEncoding,
    /// A command argument shape that cannot be rendered.
    UnsupportedArgument,
    /// The modem went silent mid-transaction.
    NoResponse,
    /// A wait-for-event read produced a line that is not a notification.
    UnknownEvent,
    /// A reply line matched no known shape.
    UnrecognizedResponse,
    /// The text-entry handshake broke down.
    TextMode,
    /// The modem did not answer the handshake ping.
    NoPingReply,
    /// Device-layer failure (the modem refused an operation).
    Device,
}

/// The AT error type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtError {
    pub kind: AtErrorKind,
    pub message: String,
    /// Port the error belongs to, when known.
    pub port_name: Option<String>,
}

/// Convenience result alias.
pub type AtResult<T> = Result<T, AtError>;

// ── Construction helpers ────────────────────────────────────────────

impl AtError {
    pub fn new(kind: AtErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            port_name: None,
        }
    }

    pub fn with_port(mut self, port_name: impl Into<String>) -> Self {
        self.port_name = Some(port_name.into());
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::Timeout, message)
    }

    pub fn unsupported_encoding(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::UnsupportedEncoding, message)
    }

    pub fn unsupported_argument(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::UnsupportedArgument, message)
    }

    pub fn no_response(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::NoResponse, message)
    }

    pub fn unknown_event(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::UnknownEvent, message)
    }

    pub fn unrecognized_response(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::UnrecognizedResponse, message)
    }

    pub fn text_mode(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::TextMode, message)
    }

    pub fn no_ping_reply(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::NoPingReply, message)
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::new(AtErrorKind::Device, message)
    }
}

impl std::fmt::Display for AtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.port_name {
            Some(port) => write!(f, "[AT {:?}] {} (port {})", self.kind, self.message, port),
            None => write!(f, "[AT {:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for AtError {}

impl From<std::io::Error> for AtError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(e.to_string()),
            _ => Self::transport(e.to_string()),
        }
    }
}

impl From<AtError> for String {
    fn from(e: AtError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_port() {
        let e = AtError::transport("read failed").with_port("/dev/ttyUSB2");
        assert_eq!(e.to_string(), "[AT Transport] read failed (port /dev/ttyUSB2)");
    }

    #[test]
    fn test_io_timeout_maps_to_timeout_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        let e = AtError::from(io);
        assert_eq!(e.kind, AtErrorKind::Timeout);
    }

    #[test]
    fn test_io_other_maps_to_transport_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let e = AtError::from(io);
        assert_eq!(e.kind, AtErrorKind::Transport);
    }

    #[test]
    fn test_string_conversion() {
        let s: String = AtError::no_ping_reply("no reply").into();
        assert!(s.contains("NoPingReply"));
    }
}
