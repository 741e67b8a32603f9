//! Core data types for the AT transaction engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::at::error::{AtError, AtResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Wire control bytes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Command-line terminator.
pub const CR: u8 = 0x0D;
/// Text-entry terminator (SUB).
pub const SUB: u8 = 0x1A;
/// Text-entry abort (ESC).
pub const ESC: u8 = 0x1B;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Character encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Character set used for string command arguments and quoted response
/// tokens. Selected on the modem with `AT+CSCS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Encoding {
    /// Passthrough (7-bit default alphabet, carried byte-for-byte).
    Gsm,
    /// UTF-16BE code units rendered as uppercase hex digit pairs.
    Ucs2,
}

impl Encoding {
    /// Label as the modem spells it.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gsm => "GSM",
            Self::Ucs2 => "UCS2",
        }
    }

    /// Parse a character-set label.
    pub fn parse(s: &str) -> AtResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GSM" => Ok(Self::Gsm),
            "UCS2" => Ok(Self::Ucs2),
            other => Err(AtError::unsupported_encoding(format!(
                "unknown character set: {other}"
            ))),
        }
    }

    /// SMS data-coding-scheme value for `AT+CSMP`.
    pub fn dcs(&self) -> i64 {
        match self {
            Self::Gsm => 0,
            Self::Ucs2 => 8,
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::Gsm
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Field values
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scalar inside a response field-tuple, and also the accepted
/// shape of a `write` command argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AtValue {
    /// Decimal or `0x`-hex numeric token.
    Int(i64),
    /// Double-quoted string content (codec-decoded unless suppressed).
    Text(String),
    /// Any other bare token, verbatim.
    Raw(String),
}

impl AtValue {
    pub fn int(v: i64) -> Self {
        Self::Int(v)
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn raw(s: impl Into<String>) -> Self {
        Self::Raw(s.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Textual content of a `Text` or `Raw` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Raw(s) => Some(s.as_str()),
            Self::Int(_) => None,
        }
    }

    /// Render for display / reassembly: integers as decimal, text and
    /// raw tokens verbatim.
    pub fn render(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Text(s) | Self::Raw(s) => s.clone(),
        }
    }
}

/// Ordered scalars parsed from one response segment.
pub type FieldTuple = Vec<AtValue>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal outcome of a command transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    /// Terminal `OK`.
    Ok,
    /// Terminal `ERROR`.
    Error,
    /// Terminal `+CME ERROR: <code-or-text>`.
    CmeError,
}

impl ResponseStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::CmeError => "+CME ERROR",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn is_error(&self) -> bool {
        !self.is_ok()
    }
}

/// Resolved result of one command transaction. Only produced once a
/// terminal marker has been observed for the in-flight command. A
/// modem-reported failure is carried here as data, not raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtResponse {
    pub status: ResponseStatus,
    /// Accumulated field-tuples; for a CME failure, the single parsed
    /// code tuple.
    pub records: Vec<FieldTuple>,
}

impl AtResponse {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// First field-tuple, if any.
    pub fn first(&self) -> Option<&FieldTuple> {
        self.records.first()
    }

    /// Scalar at `(tuple, field)` position.
    pub fn field(&self, tuple: usize, field: usize) -> Option<&AtValue> {
        self.records.get(tuple).and_then(|t| t.get(field))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Unsolicited events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An unsolicited result code (`+NAME: fields` arriving outside a
/// direct command reply). `name` carries no `+` sigil.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtEvent {
    pub name: String,
    pub fields: FieldTuple,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What to do with a reply line that matches no known shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponsePolicy {
    /// Fail the transaction with `UnrecognizedResponse`.
    Strict,
    /// Fold the stray line into the accumulator as a one-token tuple.
    /// Required for list replies whose body rows carry no `<CMD>:`
    /// prefix (e.g. `+CMGL`).
    Permissive,
}

impl ResponsePolicy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Permissive => "permissive",
        }
    }
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self::Strict
    }
}

/// Engine session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtConfig {
    /// Default per-read deadline while waiting for a reply line.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Short deadline used to spot the `>` text-entry prompt, which
    /// arrives without a line terminator.
    #[serde(default = "default_parse_timeout_ms")]
    pub parse_timeout_ms: u64,
    #[serde(default)]
    pub response_policy: ResponsePolicy,
}

fn default_response_timeout_ms() -> u64 {
    60_000
}

fn default_parse_timeout_ms() -> u64 {
    100
}

impl AtConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }
}

impl Default for AtConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            parse_timeout_ms: default_parse_timeout_ms(),
            response_policy: ResponsePolicy::default(),
        }
    }
}

/// Serial port settings for the concrete transport. The data format is
/// fixed at 8-N-1, which is what AT ports speak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// RTS/CTS hardware flow control.
    #[serde(default = "default_true")]
    pub hardware_flow: bool,
    /// Assert DTR on open.
    #[serde(default = "default_true")]
    pub assert_dtr: bool,
    /// Transport default read deadline.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_true() -> bool {
    true
}

fn default_read_timeout_ms() -> u64 {
    60_000
}

impl PortConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: default_baud_rate(),
            hardware_flow: default_true(),
            assert_dtr: default_true(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
