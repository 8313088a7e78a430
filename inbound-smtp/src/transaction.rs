//! Per-connection transaction state.
//!
//! A [`Transaction`] tracks one message attempt on one connection: which
//! commands have completed (its [`Markers`]), the negotiated dialect, the
//! sender and recipients, the DATA buffer and anything extensions chose to
//! stash in its [`Extras`]. `RSET`, `STARTTLS` and a completed `DATA` phase
//! swap in a [`Transaction::successor`] instead of clearing state in place.

use core::fmt::{self, Display, Formatter};
use std::{
    any::Any,
    net::SocketAddr,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU32, Ordering},
    },
    time::SystemTime,
};

use ahash::{AHashMap, AHashSet};
use inbound_common::{config::SessionTimeouts, internal};
use serde::Deserialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    address::{Mailbox, Sender},
    error::StateError,
};

/// The transport security state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum SocketMode {
    /// Plaintext on a listener that does not offer TLS material up front
    Plain,
    /// TLS from the first byte
    ImplicitTls,
    /// Plaintext on a listener configured for STARTTLS
    StartTlsPending,
    /// Plaintext that has been upgraded with STARTTLS
    Upgraded,
}

impl SocketMode {
    /// Whether `STARTTLS` may be attempted in this mode.
    #[must_use]
    pub const fn can_upgrade(self) -> bool {
        matches!(self, Self::Plain | Self::StartTlsPending)
    }

    #[must_use]
    pub const fn is_encrypted(self) -> bool {
        matches!(self, Self::ImplicitTls | Self::Upgraded)
    }
}

impl Display for SocketMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Plain => "plain",
            Self::ImplicitTls => "implicit-tls",
            Self::StartTlsPending => "starttls",
            Self::Upgraded => "upgraded",
        })
    }
}

/// The protocol dialect chosen by the client's greeting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum Dialect {
    /// `HELO`, plain SMTP
    Smtp,
    /// `EHLO`, extended SMTP
    Esmtp,
}

impl Dialect {
    pub(crate) const fn marker(self) -> Marker {
        match self {
            Self::Smtp => Marker::Helo,
            Self::Esmtp => Marker::Ehlo,
        }
    }
}

/// A command that has completed on the current transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub enum Marker {
    #[serde(rename = "HELO")]
    Helo,
    #[serde(rename = "EHLO")]
    Ehlo,
    #[serde(rename = "MAIL FROM")]
    MailFrom,
    #[serde(rename = "RCPT TO")]
    RcptTo,
    #[serde(rename = "DATA")]
    Data,
    #[serde(rename = "DATA:DISALLOWED")]
    DataDisallowed,
    #[serde(rename = "RSET")]
    Rset,
    #[serde(rename = "STARTTLS")]
    StartTls,
}

impl Display for Marker {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::DataDisallowed => "DATA:DISALLOWED",
            Self::Rset => "RSET",
            Self::StartTls => "STARTTLS",
        })
    }
}

/// The grow-only set of completed commands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Markers(AHashSet<Marker>);

impl Markers {
    pub fn insert(&mut self, marker: Marker) {
        self.0.insert(marker);
    }

    #[must_use]
    pub fn contains(&self, marker: Marker) -> bool {
        self.0.contains(&marker)
    }

    #[must_use]
    pub fn any(&self, markers: &[Marker]) -> bool {
        markers.iter().any(|marker| self.0.contains(marker))
    }

    #[must_use]
    pub fn all(&self, markers: &[Marker]) -> bool {
        markers.iter().all(|marker| self.0.contains(marker))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// String keyed storage for data extensions share with each other, e.g.
/// cached DNS records looked up by one extension and read by another.
///
/// Values are written through a shared reference so extensions can store
/// data while only being handed a read-only view of the transaction.
#[derive(Default)]
pub struct Extras(RwLock<AHashMap<String, Arc<dyn Any + Send + Sync>>>);

impl Extras {
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), Arc::new(value));
    }

    /// Fetch the value stored under `key`, if there is one of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }
}

impl fmt::Debug for Extras {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_set()
            .entries(
                self.0
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .keys(),
            )
            .finish()
    }
}

/// A score in `[0, 1]`, stored in hundredths.
#[derive(Debug, Default)]
pub struct SpamScore(AtomicU32);

impl SpamScore {
    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from(self.0.load(Ordering::Relaxed)) / 100.0
    }

    /// Clamp `score` to `[0, 1]` and keep two decimal places.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "The value is clamped to [0, 100] before the cast"
    )]
    pub fn set(&self, score: f64) {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        self.0
            .store((score * 100.0).round() as u32, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Received,
    Sent,
}

/// One line of the conversation, as seen by this transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub direction: Direction,
    pub content: String,
    pub at: SystemTime,
}

/// Why a transaction timed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    Idle,
    Lifetime,
}

#[derive(Debug, Default)]
struct DataState {
    sending: bool,
    lines: Vec<String>,
    size: usize,
    bypass_size_check: bool,
}

#[derive(Debug)]
pub struct Transaction {
    id: Uuid,
    created: Instant,
    created_at: SystemTime,
    /// When the connection this transaction belongs to was opened. Carried
    /// over to successors so the lifetime limit covers the whole connection.
    connected: Instant,
    peer: SocketAddr,
    markers: Markers,
    locked: bool,
    closed: bool,
    socket_mode: SocketMode,
    dialect: Option<Dialect>,
    from_domain: Option<String>,
    data: DataState,
    sender: Option<Sender>,
    recipients: Vec<Mailbox>,
    extras: Extras,
    spam_score: SpamScore,
    last_received: Instant,
    last_sent: Instant,
    log: Vec<LogEntry>,
}

impl Transaction {
    #[must_use]
    pub fn new(peer: SocketAddr, socket_mode: SocketMode) -> Self {
        let now = Instant::now();

        Self {
            id: Uuid::new_v4(),
            created: now,
            created_at: SystemTime::now(),
            connected: now,
            peer,
            markers: Markers::default(),
            locked: false,
            closed: false,
            socket_mode,
            dialect: None,
            from_domain: None,
            data: DataState::default(),
            sender: None,
            recipients: Vec::new(),
            extras: Extras::default(),
            spam_score: SpamScore::default(),
            last_received: now,
            last_sent: now,
            log: Vec::new(),
        }
    }

    /// A fresh transaction for the same connection.
    ///
    /// The peer, socket mode and connection age always carry over. With
    /// `keep_greeting` the dialect, its HELO/EHLO marker and the client's
    /// announced domain do too, so the client need not greet again.
    #[must_use]
    pub fn successor(&self, keep_greeting: bool) -> Self {
        let mut next = Self::new(self.peer, self.socket_mode);
        next.connected = self.connected;
        next.last_received = self.last_received;
        next.last_sent = self.last_sent;

        if keep_greeting && let Some(dialect) = self.dialect {
            next.dialect = Some(dialect);
            next.markers.insert(dialect.marker());
            next.from_domain.clone_from(&self.from_domain);
        }

        next
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created.elapsed()
    }

    #[must_use]
    pub const fn markers(&self) -> &Markers {
        &self.markers
    }

    pub fn push_marker(&mut self, marker: Marker) {
        self.markers.insert(marker);
    }

    #[must_use]
    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains(marker)
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    pub const fn lock(&mut self) {
        self.locked = true;
    }

    /// Release the lock taken while a line is processed. A closed
    /// transaction stays locked.
    pub const fn unlock(&mut self) {
        if !self.closed {
            self.locked = false;
        }
    }

    /// Mark the transaction closed, returning `false` if it already was.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }

        internal!("Closing transaction {}", self.id);
        self.closed = true;
        self.locked = true;
        true
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub const fn socket_mode(&self) -> SocketMode {
        self.socket_mode
    }

    /// Record a completed STARTTLS upgrade.
    ///
    /// # Errors
    /// If the connection is already encrypted
    pub fn upgrade_socket(&mut self) -> Result<(), StateError> {
        if !self.socket_mode.can_upgrade() {
            return Err(StateError::NotUpgradable(self.socket_mode));
        }

        self.socket_mode = SocketMode::Upgraded;
        Ok(())
    }

    #[must_use]
    pub const fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    /// Set the dialect, which only ever happens once per transaction.
    /// Returns `false` (and leaves the dialect alone) on a second attempt.
    pub fn set_dialect(&mut self, dialect: Dialect) -> bool {
        if let Some(current) = self.dialect {
            internal!(
                level = DEBUG,
                "Dialect already set to {current:?}, ignoring {dialect:?}"
            );
            return false;
        }

        self.dialect = Some(dialect);
        true
    }

    #[must_use]
    pub fn from_domain(&self) -> Option<&str> {
        self.from_domain.as_deref()
    }

    pub fn set_from_domain(&mut self, domain: impl Into<String>) {
        self.from_domain = Some(domain.into());
    }

    #[must_use]
    pub const fn sender(&self) -> Option<&Sender> {
        self.sender.as_ref()
    }

    pub fn set_sender(&mut self, sender: Sender) {
        self.sender = Some(sender);
    }

    #[must_use]
    pub fn recipients(&self) -> &[Mailbox] {
        &self.recipients
    }

    pub fn add_recipient(&mut self, recipient: Mailbox) {
        self.recipients.push(recipient);
    }

    #[must_use]
    pub const fn is_sending_data(&self) -> bool {
        self.data.sending
    }

    pub fn begin_data(&mut self) {
        self.data = DataState {
            sending: true,
            bypass_size_check: self.data.bypass_size_check,
            ..DataState::default()
        };
    }

    /// Buffer one chunk of the message body.
    ///
    /// # Errors
    /// If no DATA phase is in progress
    pub fn append_data(&mut self, chunk: String) -> Result<(), StateError> {
        if !self.data.sending {
            return Err(StateError::NotSendingData);
        }

        self.data.size += chunk.len();
        self.data.lines.push(chunk);
        Ok(())
    }

    /// Drop the buffered body while staying in the DATA phase, used when an
    /// extension rejects the message part way through.
    ///
    /// # Errors
    /// If no DATA phase is in progress
    pub fn discard_data(&mut self) -> Result<(), StateError> {
        if !self.data.sending {
            return Err(StateError::NotSendingData);
        }

        self.data.lines.clear();
        self.data.size = 0;
        Ok(())
    }

    /// Leave the DATA phase, keeping the buffered body readable.
    ///
    /// # Errors
    /// If no DATA phase is in progress
    pub fn end_data(&mut self) -> Result<(), StateError> {
        if !self.data.sending {
            return Err(StateError::NotSendingData);
        }

        self.data.sending = false;
        Ok(())
    }

    /// Total bytes buffered in the current DATA phase.
    #[must_use]
    pub const fn data_size(&self) -> usize {
        self.data.size
    }

    #[must_use]
    pub fn data_lines(&self) -> &[String] {
        &self.data.lines
    }

    /// The buffered body as one string.
    #[must_use]
    pub fn body(&self) -> String {
        self.data.lines.concat()
    }

    #[must_use]
    pub const fn bypass_size_check(&self) -> bool {
        self.data.bypass_size_check
    }

    pub const fn set_bypass_size_check(&mut self) {
        self.data.bypass_size_check = true;
    }

    #[must_use]
    pub const fn extras(&self) -> &Extras {
        &self.extras
    }

    #[must_use]
    pub const fn spam_score(&self) -> &SpamScore {
        &self.spam_score
    }

    /// Append a line to the conversation log and refresh the matching
    /// activity timestamp.
    pub fn record(&mut self, direction: Direction, content: impl Into<String>) {
        match direction {
            Direction::Received => self.last_received = Instant::now(),
            Direction::Sent => self.last_sent = Instant::now(),
        }

        self.log.push(LogEntry {
            direction,
            content: content.into(),
            at: SystemTime::now(),
        });
    }

    /// Refresh the receive timestamp without logging, used for DATA lines.
    pub fn touch(&mut self) {
        self.last_received = Instant::now();
    }

    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    #[must_use]
    pub const fn last_received(&self) -> Instant {
        self.last_received
    }

    #[must_use]
    pub const fn last_sent(&self) -> Instant {
        self.last_sent
    }

    /// The earliest moment [`Transaction::expired`] will report a timeout,
    /// unless something is received first.
    #[must_use]
    pub fn deadline(&self, timeouts: &SessionTimeouts) -> (Instant, Expiry) {
        let lifetime = self.connected + timeouts.connection();
        let idle = self.last_received + timeouts.idle();

        if lifetime <= idle {
            (lifetime, Expiry::Lifetime)
        } else {
            (idle, Expiry::Idle)
        }
    }

    /// Check both timeouts against `now`.
    #[must_use]
    pub fn expired(&self, timeouts: &SessionTimeouts, now: Instant) -> Option<Expiry> {
        if now.saturating_duration_since(self.connected) >= timeouts.connection() {
            Some(Expiry::Lifetime)
        } else if now.saturating_duration_since(self.last_received) >= timeouts.idle() {
            Some(Expiry::Idle)
        } else {
            None
        }
    }
}
