//! Line-oriented transport over a serial port.
//!
//! The engine reads one line at a time. A "line" is everything up to
//! and including an LF; when the read deadline fires first, whatever
//! partial bytes have accumulated are returned instead, which is how
//! the `>` text-entry prompt (which has no terminator) is observed.
//! An empty return means the deadline passed with no data at all.

use async_trait::async_trait;
use bytes::BytesMut;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::at::error::{AtError, AtResult};
use crate::at::types::PortConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Byte sink / line source the engine drives. One engine instance owns
/// its transport exclusively.
#[async_trait]
pub trait LineTransport: Send + Sync {
    /// Send raw bytes on the wire. No termination is appended.
    async fn write(&self, bytes: &[u8]) -> AtResult<()>;

    /// Block up to `timeout` (the transport default when None) for one
    /// LF-delimited line. Returns the partial buffer at deadline, or
    /// an empty vec when the deadline passed with no data.
    async fn read_line(&self, timeout: Option<Duration>) -> AtResult<Vec<u8>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Line buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates raw reads and hands out complete lines. Bytes read past
/// a line terminator stay buffered for the next call.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Next complete line, terminator included.
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        Some(self.buf.split_to(pos + 1).to_vec())
    }

    /// Everything buffered, terminated or not.
    pub fn take_all(&mut self) -> Vec<u8> {
        self.buf.split_to(self.buf.len()).to_vec()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Serial transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Concrete transport over a `serialport` handle. Blocking port I/O is
/// bridged onto the runtime with `spawn_blocking`; the engine issues
/// one call at a time, so the port mutex is uncontended.
pub struct SerialLineTransport {
    port_name: String,
    default_timeout: Duration,
    port: Arc<StdMutex<Box<dyn SerialPort>>>,
    buf: Arc<StdMutex<LineBuffer>>,
}

impl SerialLineTransport {
    /// Open the port described by `config`, 8-N-1.
    pub fn open(config: &PortConfig) -> AtResult<Self> {
        let flow = if config.hardware_flow {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let mut port = serialport::new(config.port_name.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| {
                AtError::transport(format!("failed to open serial port: {e}"))
                    .with_port(config.port_name.as_str())
            })?;
        if config.assert_dtr {
            port.write_data_terminal_ready(true).map_err(|e| {
                AtError::transport(format!("failed to assert DTR: {e}"))
                    .with_port(config.port_name.as_str())
            })?;
        }
        log::debug!(
            "opened {} at {} baud (flow: {:?})",
            config.port_name,
            config.baud_rate,
            flow
        );
        Ok(Self {
            port_name: config.port_name.clone(),
            default_timeout: config.read_timeout(),
            port: Arc::new(StdMutex::new(port)),
            buf: Arc::new(StdMutex::new(LineBuffer::new())),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LineTransport for SerialLineTransport {
    async fn write(&self, bytes: &[u8]) -> AtResult<()> {
        log::trace!(">>> {}", bytes.escape_ascii());
        let port = Arc::clone(&self.port);
        let port_name = self.port_name.clone();
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> AtResult<()> {
            let mut port = lock(&port);
            port.write_all(&data)
                .and_then(|_| port.flush())
                .map_err(|e| AtError::from(e).with_port(port_name))
        })
        .await
        .map_err(|e| AtError::transport(format!("serial writer task failed: {e}")))?
    }

    async fn read_line(&self, timeout: Option<Duration>) -> AtResult<Vec<u8>> {
        let limit = timeout.unwrap_or(self.default_timeout);
        let port = Arc::clone(&self.port);
        let buf = Arc::clone(&self.buf);
        let port_name = self.port_name.clone();
        let line = tokio::task::spawn_blocking(move || -> AtResult<Vec<u8>> {
            let mut buf = lock(&buf);
            if let Some(line) = buf.take_line() {
                return Ok(line);
            }
            let mut port = lock(&port);
            let deadline = Instant::now() + limit;
            let mut chunk = [0u8; 256];
            loop {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(buf.take_all());
                }
                port.set_timeout(deadline - now)
                    .map_err(|e| AtError::transport(e.to_string()).with_port(port_name.clone()))?;
                match port.read(&mut chunk) {
                    Ok(0) => return Ok(buf.take_all()),
                    Ok(n) => {
                        buf.extend(&chunk[..n]);
                        if let Some(line) = buf.take_line() {
                            return Ok(line);
                        }
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock =>
                    {
                        return Ok(buf.take_all());
                    }
                    Err(e) => return Err(AtError::from(e).with_port(port_name.clone())),
                }
            }
        })
        .await
        .map_err(|e| AtError::transport(format!("serial reader task failed: {e}")))??;
        if !line.is_empty() {
            log::trace!("<<< {}", String::from_utf8_lossy(&line).trim_end());
        }
        Ok(line)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully in-memory transport for unit tests and demos. RX lines are
/// scripted in advance; every engine write is recorded for assertion.
pub struct SimulatedTransport {
    rx: Mutex<VecDeque<Vec<u8>>>,
    tx: Mutex<Vec<Vec<u8>>>,
    reads: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rx: Mutex::new(VecDeque::new()),
            tx: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        })
    }

    /// Script one inbound line; CRLF is appended.
    pub async fn inject_line(&self, line: &str) {
        self.rx
            .lock()
            .await
            .push_back(format!("{line}\r\n").into_bytes());
    }

    /// Script inbound bytes verbatim (e.g. the unterminated `> `
    /// prompt).
    pub async fn inject_chunk(&self, bytes: &[u8]) {
        self.rx.lock().await.push_back(bytes.to_vec());
    }

    /// Script one empty read (a deadline passing with no data).
    pub async fn inject_silence(&self) {
        self.rx.lock().await.push_back(Vec::new());
    }

    /// Take all recorded writes, clearing the record.
    pub async fn drain_tx(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.tx.lock().await)
    }

    /// Number of `read_line` calls made so far.
    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LineTransport for SimulatedTransport {
    async fn write(&self, bytes: &[u8]) -> AtResult<()> {
        log::trace!(">>> {}", bytes.escape_ascii());
        self.tx.lock().await.push(bytes.to_vec());
        Ok(())
    }

    async fn read_line(&self, _timeout: Option<Duration>) -> AtResult<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let line = self.rx.lock().await.pop_front().unwrap_or_default();
        if !line.is_empty() {
            log::trace!("<<< {}", String::from_utf8_lossy(&line).trim_end());
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_splits_on_lf() {
        let mut buf = LineBuffer::new();
        buf.extend(b"OK\r\n+CMTI");
        assert_eq!(buf.take_line(), Some(b"OK\r\n".to_vec()));
        assert_eq!(buf.take_line(), None);
        buf.extend(b": \"SM\",3\r\n");
        assert_eq!(buf.take_line(), Some(b"+CMTI: \"SM\",3\r\n".to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_buffer_take_all_returns_partial() {
        let mut buf = LineBuffer::new();
        buf.extend(b"> ");
        assert_eq!(buf.take_line(), None);
        assert_eq!(buf.take_all(), b"> ".to_vec());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_simulated_transport_scripts_in_order() {
        let transport = SimulatedTransport::new();
        transport.inject_line("OK").await;
        transport.inject_chunk(b"> ").await;
        transport.inject_silence().await;

        assert_eq!(transport.read_line(None).await.unwrap(), b"OK\r\n".to_vec());
        assert_eq!(transport.read_line(None).await.unwrap(), b"> ".to_vec());
        assert!(transport.read_line(None).await.unwrap().is_empty());
        // Exhausted script keeps reading as silence.
        assert!(transport.read_line(None).await.unwrap().is_empty());
        assert_eq!(transport.read_calls(), 4);
    }

    #[tokio::test]
    async fn test_simulated_transport_records_writes() {
        let transport = SimulatedTransport::new();
        transport.write(b"AT\r").await.unwrap();
        transport.write(&[0x1A]).await.unwrap();
        let tx = transport.drain_tx().await;
        assert_eq!(tx, vec![b"AT\r".to_vec(), vec![0x1A]]);
        assert!(transport.drain_tx().await.is_empty());
    }
}
