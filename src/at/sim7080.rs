//! SIM7080 cellular module support.
//!
//! High-level SMS operations on top of an [`AtChannel`]: SIM probing,
//! subscriber lookup, text-mode send and receive, and a paced polling
//! loop that folds `+CMTI` delivery notifications into an inbox.
//!
//! The module enumerates several UART functions over USB (diagnostics,
//! NMEA, AT, QFLOG, DAM, modem); all traffic here goes through the AT
//! command interface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::at::channel::AtChannel;
use crate::at::encoding::decode_text;
use crate::at::error::{AtError, AtResult};
use crate::at::transport::LineTransport;
use crate::at::types::{AtConfig, AtValue, Encoding, ResponsePolicy};

/// Network acknowledgement of an SMS submit can take up to 60 s.
const SMS_SUBMIT_TIMEOUT: Duration = Duration::from_secs(65);

/// Minimum spacing between modem polls.
const POLL_INTERVAL_SECS: i64 = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the module stands in its bring-up ladder. A failed SIM probe
/// drops it back to `Reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkState {
    /// SIM not yet confirmed; subscriber data unknown.
    Reset,
    /// SIM ready, text mode selected; inbox not yet fetched.
    Idle,
    /// Inbox fetched; waiting on delivery notifications.
    Ready,
}

impl LinkState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Idle => "idle",
            Self::Ready => "ready",
        }
    }
}

/// One received text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsMessage {
    /// Storage index on the module.
    pub index: i64,
    /// Storage status, e.g. "REC UNREAD".
    pub status: String,
    /// Originating address, decoded.
    pub sender: String,
    /// Service-centre timestamp as reported, e.g. "21/08/10,12:34:56+32".
    pub timestamp: String,
    /// Message body, decoded.
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// SIM and firmware identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemIdentity {
    pub iccid: String,
    pub imsi: String,
    pub firmware: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SIM7080 controller owning one AT channel.
pub struct Sim7080 {
    chan: AtChannel,
    state: LinkState,
    number: Option<String>,
    inbox: VecDeque<SmsMessage>,
    poll_interval: chrono::Duration,
    last_poll: DateTime<Utc>,
}

impl Sim7080 {
    /// Bare reply lines (inbox bodies, ICCID digits) must survive as
    /// raw records, so the channel runs with the permissive policy.
    pub fn new(transport: Arc<dyn LineTransport>) -> Self {
        let config = AtConfig {
            response_policy: ResponsePolicy::Permissive,
            ..AtConfig::default()
        };
        let poll_interval = chrono::Duration::seconds(POLL_INTERVAL_SECS);
        Self {
            chan: AtChannel::new(transport, config),
            state: LinkState::Reset,
            number: None,
            inbox: VecDeque::new(),
            poll_interval,
            // Backdated so the first poll fires immediately.
            last_poll: Utc::now() - poll_interval * 10,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Own subscriber number, once discovered.
    pub fn subscriber(&self) -> Option<&str> {
        self.number.as_deref()
    }

    pub fn pending_messages(&self) -> usize {
        self.inbox.len()
    }

    /// Direct access to the underlying channel.
    pub fn channel(&mut self) -> &mut AtChannel {
        &mut self.chan
    }

    // ── Bring-up ────────────────────────────────────────────────────

    pub async fn init(&mut self) -> AtResult<()> {
        log::info!("modem init");
        self.chan.init().await
    }

    /// True iff the SIM reports `READY` to a `+CPIN` query.
    pub async fn probe_sim(&mut self) -> AtResult<bool> {
        let resp = self.chan.read("+CPIN", None).await?;
        let ready = resp
            .first()
            .and_then(|t| t.first())
            .and_then(AtValue::as_str)
            == Some("READY");
        Ok(ready)
    }

    /// Own number from the SIM phonebook. Missing provisioning is
    /// reported as `None`, not an error.
    pub async fn subscriber_number(&mut self) -> AtResult<Option<String>> {
        self.chan.exec("+CNUM");
        let resp = self.chan.get_response(Some("+CNUM"), None).await?;
        if !resp.is_ok() {
            log::warn!("subscriber number query failed: {}", resp.status.label());
            return Ok(None);
        }
        let num = resp
            .field(0, 1)
            .and_then(AtValue::as_str)
            .map(str::to_string);
        match &num {
            Some(n) => log::info!("subscriber number {n}"),
            None => log::warn!("subscriber number not provisioned"),
        }
        Ok(num)
    }

    /// Switch on `+CME ERROR` text/code reporting.
    pub async fn enable_verbose_errors(&mut self) -> AtResult<()> {
        self.chan.write("+CMEE", &[AtValue::int(2)])?;
        let resp = self.chan.get_response(Some("+CMEE"), None).await?;
        if !resp.is_ok() {
            log::warn!("verbose CME errors not enabled: {}", resp.status.label());
        }
        Ok(())
    }

    /// SIM and firmware identifiers (`+CCID`, `+CIMI`, `+GSV`).
    pub async fn identity(&mut self) -> AtResult<ModemIdentity> {
        let iccid = self.exec_single("+CCID").await?;
        let imsi = self.exec_single("+CIMI").await?;
        let firmware = self.exec_single("+GSV").await?;
        log::info!("ICCID {iccid}, IMSI {imsi}");
        Ok(ModemIdentity {
            iccid,
            imsi,
            firmware,
        })
    }

    // ── SMS ─────────────────────────────────────────────────────────

    /// Send a text-mode SMS under the given character set, returning
    /// the network-assigned message reference. The session always
    /// drops back to GSM afterwards, including on failure.
    pub async fn send_sms(&mut self, number: &str, text: &str, enc: Encoding) -> AtResult<i64> {
        log::info!("sending SMS({}) to {}: {}", enc.label(), number, text);
        self.switch_encoding(enc).await?;
        let result = self.submit_sms(number, text, enc).await;
        let restore = self.switch_encoding(Encoding::Gsm).await;
        let reference = result?;
        restore?;
        Ok(reference)
    }

    /// Fetch all stored messages into the inbox, returning how many
    /// arrived. The session drops back to GSM afterwards.
    pub async fn fetch_inbox(&mut self, enc: Encoding) -> AtResult<usize> {
        self.switch_encoding(enc).await?;
        let result = self.list_messages(enc).await;
        let restore = self.switch_encoding(Encoding::Gsm).await;
        let count = result?;
        restore?;
        Ok(count)
    }

    /// Advance the bring-up ladder one rung and service delivery
    /// notifications once `Ready`. A SIM dropout resets the ladder.
    pub async fn poll(&mut self, timeout: Option<Duration>) -> AtResult<()> {
        if !self.probe_sim().await? {
            log::warn!("SIM card not ready");
            self.state = LinkState::Reset;
            self.number = None;
            return Ok(());
        }

        if self.state == LinkState::Reset {
            self.number = self.subscriber_number().await?;
            self.chan.write("+CMGF", &[AtValue::int(1)])?;
            self.chan.get_response(Some("+CMGF"), None).await?;
            self.state = LinkState::Idle;
        }

        if self.state == LinkState::Idle {
            self.fetch_inbox(Encoding::Ucs2).await?;
            self.state = LinkState::Ready;
        }

        if self.state == LinkState::Ready {
            match self.chan.wait_event(timeout).await? {
                None => return Ok(()),
                Some(ev) if ev.name == "CMTI" => {
                    self.fetch_inbox(Encoding::Ucs2).await?;
                }
                Some(ev) => {
                    log::debug!("unhandled event: {} {:?}", ev.name, ev.fields);
                }
            }
        }
        Ok(())
    }

    /// Pop the next received message, polling the modem first when the
    /// poll interval has elapsed. Catch-up after a long gap is capped
    /// at one interval of credit.
    pub async fn next_message(
        &mut self,
        timeout: Option<Duration>,
    ) -> AtResult<Option<SmsMessage>> {
        if let Some(msg) = self.inbox.pop_front() {
            return Ok(Some(msg));
        }

        let now = Utc::now();
        if now - self.last_poll >= self.poll_interval {
            log::info!("polling");
            self.poll(timeout).await?;
            if now - self.last_poll >= self.poll_interval * 2 {
                self.last_poll = now;
            } else {
                self.last_poll = self.last_poll + self.poll_interval;
            }
        }
        Ok(self.inbox.pop_front())
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Select a character set and fail on refusal.
    async fn switch_encoding(&mut self, enc: Encoding) -> AtResult<()> {
        let resp = self.chan.set_encoding(enc).await?;
        if !resp.is_ok() {
            return Err(AtError::device(format!(
                "character set {} refused: {}",
                enc.label(),
                resp.status.label()
            )));
        }
        Ok(())
    }

    async fn submit_sms(&mut self, number: &str, text: &str, enc: Encoding) -> AtResult<i64> {
        self.chan.write(
            "+CSMP",
            &[
                AtValue::int(17),
                AtValue::int(167),
                AtValue::int(0),
                AtValue::int(enc.dcs()),
            ],
        )?;
        let recipient = format!("+{}", number.trim_start_matches('+'));
        self.chan.write("+CMGS", &[AtValue::text(recipient)])?;
        self.chan.write_data(text);
        let resp = self
            .chan
            .get_response(Some("+CMGS"), Some(SMS_SUBMIT_TIMEOUT))
            .await?;
        if !resp.is_ok() {
            return Err(AtError::device(format!(
                "SMS submit refused: {}",
                resp.status.label()
            )));
        }
        match resp.field(0, 0).and_then(AtValue::as_int) {
            Some(mr) => Ok(mr),
            None => Err(AtError::device(
                "SMS submit reply carried no message reference",
            )),
        }
    }

    /// Run `+CMGL` and fold its reply rows into the inbox. Rows pair
    /// up as one header line plus one body line per message.
    async fn list_messages(&mut self, enc: Encoding) -> AtResult<usize> {
        // The stat argument must reach the modem as the literal string
        // ALL, and header fields come back undecoded.
        self.chan.write_literal("+CMGL", &[AtValue::text("ALL")])?;
        let resp = self.chan.get_response(Some("+CMGL"), None).await?;
        if !resp.is_ok() {
            return Err(AtError::device(format!(
                "inbox listing refused: {}",
                resp.status.label()
            )));
        }

        let rows = &resp.records;
        let mut received = 0;
        let mut i = 0;
        while i + 1 < rows.len() {
            let info = &rows[i];
            let body = &rows[i + 1];
            i += 2;

            let index = match info.first().and_then(AtValue::as_int) {
                Some(v) => v,
                None => {
                    log::warn!("malformed inbox header row: {info:?}");
                    continue;
                }
            };
            let status = info
                .get(1)
                .and_then(AtValue::as_str)
                .unwrap_or_default()
                .to_string();
            let sender_raw = info.get(2).and_then(AtValue::as_str).unwrap_or_default();
            let sender = self.decode_lenient(sender_raw, enc);
            // The service-centre timestamp carries a comma inside its
            // quotes and therefore spans the remaining tokens.
            let timestamp = if info.len() > 3 {
                info[3..]
                    .iter()
                    .map(AtValue::render)
                    .collect::<Vec<_>>()
                    .join(",")
                    .trim_matches('"')
                    .to_string()
            } else {
                String::new()
            };
            let body_raw = body.first().and_then(AtValue::as_str).unwrap_or_default();
            let text = self.decode_lenient(body_raw, enc);

            log::info!("received SMS from {sender}: {text}");
            self.inbox.push_back(SmsMessage {
                index,
                status,
                sender,
                timestamp,
                text,
                received_at: Utc::now(),
            });
            received += 1;
        }
        Ok(received)
    }

    /// Decode a field, falling back to the raw text when the payload
    /// does not match the advertised character set.
    fn decode_lenient(&self, raw: &str, enc: Encoding) -> String {
        match decode_text(raw, enc) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("field not decodable as {}: {e}", enc.label());
                raw.to_string()
            }
        }
    }

    /// Execute a command whose reply is one or more bare lines and
    /// join them into a single string.
    async fn exec_single(&mut self, cmd: &str) -> AtResult<String> {
        self.chan.exec(cmd);
        let resp = self.chan.get_response(Some(cmd), None).await?;
        if !resp.is_ok() {
            return Err(AtError::device(format!(
                "{cmd} failed: {}",
                resp.status.label()
            )));
        }
        let parts: Vec<String> = resp
            .records
            .iter()
            .filter_map(|t| t.first())
            .map(AtValue::render)
            .collect();
        Ok(parts.join(" "))
    }
}
