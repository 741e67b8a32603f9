//! AT engine: sub-modules.

pub mod channel;
pub mod encoding;
pub mod error;
pub mod parser;
pub mod scanner;
pub mod sim7080;
pub mod transport;
pub mod types;

// Re-export top-level items for convenience.
pub use channel::{AtChannel, AtRequest};
pub use error::{AtError, AtErrorKind, AtResult};
pub use scanner::{find_at_port, scan_modem_ports, ModemPortInfo, ScanOptions};
pub use sim7080::{LinkState, ModemIdentity, Sim7080, SmsMessage};
pub use transport::{LineTransport, SerialLineTransport, SimulatedTransport};
pub use types::*;
