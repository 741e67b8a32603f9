//! The AT transaction engine.
//!
//! Callers enqueue requests (commands, follow-up text payloads,
//! response/event waits) and the processing loop drains them strictly
//! in FIFO order against transport input. Unsolicited result codes
//! observed while a command is in flight are buffered on the event
//! queue without disturbing that command's resolution.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::at::encoding::encode_text;
use crate::at::error::{AtError, AtResult};
use crate::at::parser::{parse_event, parse_fields};
use crate::at::transport::LineTransport;
use crate::at::types::{
    AtConfig, AtEvent, AtResponse, AtValue, Encoding, FieldTuple, ResponsePolicy, ResponseStatus,
    CR, ESC, SUB,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One queued unit of work. Created by the builder methods, consumed
/// exactly once by the processing loop, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtRequest {
    /// Bytes written verbatim, no terminator appended.
    RawWrite(Vec<u8>),
    /// Read and discard lines until a read comes back empty.
    Flush(Duration),
    /// Read one line and parse it as an unsolicited result code.
    WaitEvent(Option<Duration>),
    /// A command line to transmit and read replies for.
    Command {
        name: String,
        payload: String,
        /// Governs codec handling of quoted strings in this command's
        /// reply lines (set false by `write_literal`).
        encode_strings: bool,
    },
    /// Resolve the in-flight command's response to the caller.
    SendResponse {
        name: Option<String>,
        timeout: Option<Duration>,
    },
    /// Payload for a text-entry prompt; must directly follow the
    /// Command that triggers the prompt.
    TextData(String),
}

/// How a command's read loop ended when a terminal marker arrived.
enum CommandRun {
    /// A queued `SendResponse` was consumed; hand the response up now.
    Resolved(AtResponse),
    /// No resolver queued; the drain continues.
    Completed(AtResponse),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One AT command channel over an exclusively-owned transport.
pub struct AtChannel {
    transport: Arc<dyn LineTransport>,
    config: AtConfig,
    encoding: Encoding,
    requests: VecDeque<AtRequest>,
    events: VecDeque<AtEvent>,
}

impl AtChannel {
    pub fn new(transport: Arc<dyn LineTransport>, config: AtConfig) -> Self {
        Self {
            transport,
            config,
            encoding: Encoding::default(),
            requests: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Active character set for string arguments and quoted reply
    /// tokens.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn config(&self) -> &AtConfig {
        &self.config
    }

    /// Queued events not yet handed to a caller.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    // ── Request builders ────────────────────────────────────────────

    /// Enqueue raw bytes to send verbatim.
    pub fn raw_write(&mut self, bytes: impl Into<Vec<u8>>) {
        self.requests.push_back(AtRequest::RawWrite(bytes.into()));
    }

    /// Enqueue a flush: discard inbound lines until one read times
    /// out. Used to clear residual chatter before a handshake.
    pub fn flush(&mut self, timeout: Duration) {
        self.requests.push_back(AtRequest::Flush(timeout));
    }

    /// Enqueue `<cmd>=?`.
    pub fn test(&mut self, cmd: &str) {
        self.push_command(cmd, format!("{cmd}=?"), true);
    }

    /// Enqueue `<cmd>` as-is (bare commands such as `ATE0`, or
    /// execute-form `+` commands).
    pub fn exec(&mut self, cmd: &str) {
        self.push_command(cmd, cmd.to_string(), true);
    }

    /// `<cmd>?` query, driven to its response.
    pub async fn read(&mut self, cmd: &str, timeout: Option<Duration>) -> AtResult<AtResponse> {
        self.push_command(cmd, format!("{cmd}?"), true);
        self.get_response(Some(cmd), timeout).await
    }

    /// Enqueue `<cmd>=a1,a2,...` with string arguments quoted and
    /// passed through the active codec.
    pub fn write(&mut self, cmd: &str, args: &[AtValue]) -> AtResult<()> {
        self.push_write(cmd, args, true)
    }

    /// Like [`write`](Self::write) but string arguments are quoted
    /// verbatim, and quoted tokens in the reply are left undecoded.
    pub fn write_literal(&mut self, cmd: &str, args: &[AtValue]) -> AtResult<()> {
        self.push_write(cmd, args, false)
    }

    /// Enqueue the payload for a text-entry prompt. Must directly
    /// follow the command that opens the prompt.
    pub fn write_data(&mut self, text: impl Into<String>) {
        self.requests.push_back(AtRequest::TextData(text.into()));
    }

    /// Enqueue a response request and run the processing loop until it
    /// resolves.
    pub async fn get_response(
        &mut self,
        cmd: Option<&str>,
        timeout: Option<Duration>,
    ) -> AtResult<AtResponse> {
        self.requests.push_back(AtRequest::SendResponse {
            name: cmd.map(str::to_string),
            timeout,
        });
        match self.process().await? {
            Some(resp) => Ok(resp),
            None => Err(AtError::no_response(
                "request queue drained without resolving a response",
            )),
        }
    }

    /// Return a queued event immediately if one is waiting, else read
    /// one line and parse it as an event, returning None on silence.
    pub async fn wait_event(&mut self, timeout: Option<Duration>) -> AtResult<Option<AtEvent>> {
        if let Some(ev) = self.events.pop_front() {
            return Ok(Some(ev));
        }
        self.requests.push_back(AtRequest::WaitEvent(timeout));
        self.process().await?;
        Ok(self.events.pop_front())
    }

    // ── Handshake ───────────────────────────────────────────────────

    /// True iff the modem answered the `AT` probe with any terminal
    /// reply. Every failure is converted to false, never propagated.
    pub async fn ping(&mut self) -> bool {
        self.exec("AT");
        self.get_response(None, None).await.is_ok()
    }

    /// Select the character set on the modem. The `+CSCS` argument is
    /// itself always GSM-coded; the session encoding flips to `enc`
    /// only after the modem acknowledged the write.
    pub async fn set_encoding(&mut self, enc: Encoding) -> AtResult<AtResponse> {
        self.push_write("+CSCS", &[AtValue::text(enc.label())], false)?;
        let resp = self.get_response(Some("+CSCS"), None).await?;
        if resp.is_ok() {
            self.encoding = enc;
        }
        Ok(resp)
    }

    /// Modem bring-up: auto-baud training, escape out of a stuck text
    /// prompt, echo off, GSM character set, then a ping gate.
    pub async fn init(&mut self) -> AtResult<()> {
        self.raw_write(&b"ATATATAT\r"[..]);
        self.flush(self.config.parse_timeout());
        self.raw_write(vec![ESC, ESC, CR]);
        self.flush(self.config.parse_timeout());
        self.exec("ATE0");
        self.get_response(None, None).await?;
        self.set_encoding(Encoding::Gsm).await?;
        if !self.ping().await {
            return Err(AtError::no_ping_reply("modem did not answer AT after handshake"));
        }
        Ok(())
    }

    // ── Builders, internal ──────────────────────────────────────────

    fn push_command(&mut self, name: &str, payload: String, encode_strings: bool) {
        self.requests.push_back(AtRequest::Command {
            name: name.to_string(),
            payload,
            encode_strings,
        });
    }

    fn push_write(&mut self, cmd: &str, args: &[AtValue], encode_strings: bool) -> AtResult<()> {
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                AtValue::Int(v) => rendered.push(v.to_string()),
                AtValue::Text(s) => {
                    let body = if encode_strings {
                        encode_text(s, self.encoding)
                    } else {
                        s.clone()
                    };
                    rendered.push(format!("\"{body}\""));
                }
                AtValue::Raw(s) => {
                    return Err(AtError::unsupported_argument(format!(
                        "raw token {s:?} cannot be rendered as a command argument"
                    )));
                }
            }
        }
        let payload = format!("{cmd}={}", rendered.join(","));
        self.push_command(cmd, payload, encode_strings);
        Ok(())
    }

    // ── Processing loop ─────────────────────────────────────────────

    /// Drain the request queue. Returns a response only when a queued
    /// `SendResponse` resolved one. A failure abandons the rest of the
    /// batch; leftovers must not leak into the next transaction.
    async fn process(&mut self) -> AtResult<Option<AtResponse>> {
        let result = self.run_queue().await;
        if result.is_err() {
            self.requests.clear();
        }
        result
    }

    async fn run_queue(&mut self) -> AtResult<Option<AtResponse>> {
        let mut last: Option<AtResponse> = None;
        while let Some(req) = self.requests.pop_front() {
            match req {
                AtRequest::RawWrite(bytes) => {
                    self.transport.write(&bytes).await?;
                }
                AtRequest::Flush(timeout) => loop {
                    let line = self.transport.read_line(Some(timeout)).await?;
                    if line.is_empty() {
                        break;
                    }
                },
                AtRequest::WaitEvent(timeout) => {
                    let deadline = timeout.unwrap_or_else(|| self.config.response_timeout());
                    let raw = self.transport.read_line(Some(deadline)).await?;
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();
                    if line.is_empty() {
                        return Ok(None);
                    }
                    match parse_event(line, self.encoding) {
                        Some(ev) => {
                            log::debug!("event queued: {} {:?}", ev.name, ev.fields);
                            self.events.push_back(ev);
                            return Ok(None);
                        }
                        None => {
                            return Err(AtError::unknown_event(format!("unknown event: {line}")));
                        }
                    }
                }
                AtRequest::Command {
                    name,
                    payload,
                    encode_strings,
                } => match self.run_command(&name, &payload, encode_strings).await? {
                    CommandRun::Resolved(resp) => return Ok(Some(resp)),
                    CommandRun::Completed(resp) => last = Some(resp),
                },
                AtRequest::SendResponse { name, .. } => {
                    return Err(AtError::no_response(format!(
                        "response requested for {} with no command in flight",
                        name.as_deref().unwrap_or("<any>")
                    )));
                }
                AtRequest::TextData(_) => {
                    return Err(AtError::text_mode(
                        "text payload queued with no preceding command prompt",
                    ));
                }
            }
        }
        Ok(last)
    }

    /// Transmit one command line and read replies until its terminal
    /// marker.
    async fn run_command(
        &mut self,
        name: &str,
        payload: &str,
        encode_strings: bool,
    ) -> AtResult<CommandRun> {
        // Only +-prefixed commands take the AT prefix; bare commands
        // (ATE0, AT itself) already carry it.
        let line = if name.starts_with('+') {
            format!("AT{payload}\r")
        } else {
            format!("{payload}\r")
        };
        self.transport.write(line.as_bytes()).await?;

        let mut records: Vec<FieldTuple> = Vec::new();
        loop {
            let raw = self
                .transport
                .read_line(Some(self.next_read_timeout()))
                .await?;
            if raw.is_empty() {
                return Err(AtError::no_response(format!("no response to {name}")));
            }
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            if text == "OK" {
                return Ok(self.finish(AtResponse {
                    status: ResponseStatus::Ok,
                    records,
                }));
            }

            if text == "ERROR" {
                return Ok(self.finish(AtResponse {
                    status: ResponseStatus::Error,
                    records,
                }));
            }

            if let Some(rest) = echo_rest(text, name) {
                records.push(parse_fields(rest, self.encoding, encode_strings)?);
                continue;
            }

            if let Some(rest) = text.strip_prefix("+CME ERROR:") {
                let tuple = parse_fields(rest.trim_start(), self.encoding, encode_strings)?;
                return Ok(self.finish(AtResponse {
                    status: ResponseStatus::CmeError,
                    records: vec![tuple],
                }));
            }

            if text == ">" {
                self.send_text_payload().await?;
                continue;
            }

            if let Some(ev) = parse_event(text, self.encoding) {
                log::debug!("event queued: {} {:?}", ev.name, ev.fields);
                self.events.push_back(ev);
                continue;
            }

            match self.config.response_policy {
                ResponsePolicy::Strict => {
                    return Err(AtError::unrecognized_response(format!(
                        "unrecognised reply to {name}: {text}"
                    )));
                }
                ResponsePolicy::Permissive => {
                    records.push(vec![AtValue::raw(text)]);
                }
            }
        }
    }

    /// Per-read deadline for the in-flight command, looked up fresh on
    /// every read. A queued text payload forces the short prompt
    /// timeout and a queued response request may carry an override;
    /// otherwise the session default applies.
    fn next_read_timeout(&self) -> Duration {
        match self.requests.front() {
            Some(AtRequest::TextData(_)) => self.config.parse_timeout(),
            Some(AtRequest::SendResponse {
                timeout: Some(t), ..
            }) => *t,
            _ => self.config.response_timeout(),
        }
    }

    /// Consume a queued `SendResponse` if one is next.
    fn finish(&mut self, resp: AtResponse) -> CommandRun {
        if let Some(AtRequest::SendResponse { name, .. }) = self.requests.front() {
            log::debug!(
                "resolving {} response: {}",
                name.as_deref().unwrap_or("<any>"),
                resp.status.label()
            );
            self.requests.pop_front();
            return CommandRun::Resolved(resp);
        }
        CommandRun::Completed(resp)
    }

    /// Answer a `>` prompt with the queued text payload.
    async fn send_text_payload(&mut self) -> AtResult<()> {
        let text = match self.requests.pop_front() {
            Some(AtRequest::TextData(t)) => t,
            other => {
                if let Some(req) = other {
                    self.requests.push_front(req);
                }
                return Err(AtError::text_mode(
                    "text prompt received with no queued payload",
                ));
            }
        };

        match self.encoding {
            Encoding::Gsm => {
                // One prompt per transmitted line in this mode; the
                // final line goes out without a carriage return.
                let lines: Vec<&str> = text.split('\n').collect();
                let final_index = lines.len() - 1;
                for (i, line) in lines.iter().enumerate() {
                    let chunk = if i != final_index {
                        format!("{line}\r")
                    } else {
                        (*line).to_string()
                    };
                    self.transport.write(chunk.as_bytes()).await?;
                    let echo = self
                        .transport
                        .read_line(Some(self.config.parse_timeout()))
                        .await?;
                    if String::from_utf8_lossy(&echo).trim() != ">" {
                        return Err(AtError::text_mode(
                            "no continuation prompt during text entry",
                        ));
                    }
                }
            }
            enc => {
                let encoded = encode_text(&text, enc);
                self.transport.write(encoded.as_bytes()).await?;
            }
        }
        self.transport.write(&[SUB]).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split a `<name>: rest` reply line belonging to the in-flight
/// command, returning the field text.
fn echo_rest<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)?
        .strip_prefix(':')
        .map(str::trim_start)
}
