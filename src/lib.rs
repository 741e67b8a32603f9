//! # atmodem – Cellular AT Command Engine
//!
//! Queue-driven AT command transactions for cellular modems over a
//! serial port:
//!
//! - **Port Discovery** – find a module's AT interface among its USB serial ports
//! - **Transport** – line-oriented async reads and raw writes over an exclusive port
//! - **Transactions** – FIFO request queue, field-tuple response parsing, URC buffering
//! - **Encodings** – GSM passthrough and UCS2 hex for arguments and payloads
//! - **SIM7080** – SMS send/receive, SIM probing, paced delivery polling

pub mod at;
