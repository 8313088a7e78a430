//! The per-connection driver.
//!
//! A [`Session`] owns the transport and the current [`Transaction`]. It
//! frames incoming bytes into lines, hands each one to the interpreter,
//! writes the replies and acts on the returned [`Event`]. Shutdown signals
//! and timeouts are raced against every read and every command.

use std::{net::SocketAddr, sync::Arc};

use inbound_common::{Signal, error::SessionError, incoming, internal, outgoing, status::Status};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast::{Receiver, error::RecvError},
    time::{Instant, MissedTickBehavior},
};
use tokio_rustls::TlsAcceptor;

use crate::{
    catalog::Catalog,
    config::{ListenerMode, SmtpConfig},
    connection::Connection,
    error::{ConnectionError, ConnectionResult, TlsError},
    extensions::Registry,
    handlers::{Engine, Event},
    interpreter::interpret,
    transaction::{Direction, Expiry, Transaction},
};

const READ_BUFFER: usize = 4096;

/// Longest line accepted from a client, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 8192;

#[derive(Clone)]
pub struct SessionConfig {
    pub mode: ListenerMode,
    pub smtp: Arc<SmtpConfig>,
    pub registry: Arc<Registry>,
    pub acceptor: Option<TlsAcceptor>,
}

impl SessionConfig {
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("SessionConfig")
            .field("mode", &self.mode)
            .field("smtp", &self.smtp)
            .field("registry", &self.registry)
            .field("tls", &self.acceptor.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct SessionConfigBuilder {
    mode: ListenerMode,
    smtp: Arc<SmtpConfig>,
    registry: Arc<Registry>,
    acceptor: Option<TlsAcceptor>,
}

impl SessionConfigBuilder {
    #[must_use]
    pub const fn with_mode(mut self, mode: ListenerMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_smtp(mut self, smtp: Arc<SmtpConfig>) -> Self {
        self.smtp = smtp;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// The acceptor used for implicit TLS and `STARTTLS`
    #[must_use]
    pub fn with_acceptor(mut self, acceptor: Option<TlsAcceptor>) -> Self {
        self.acceptor = acceptor;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            mode: self.mode,
            smtp: self.smtp,
            registry: self.registry,
            acceptor: self.acceptor,
        }
    }
}

enum Wake {
    Shutdown,
    Tick,
    Read(ConnectionResult<usize>),
}

/// Why a session stopped before the client was done.
#[derive(Clone, Copy, Debug)]
enum Interrupt {
    Shutdown,
    Expired(Expiry),
}

/// Resolves once `signal` asks for a shutdown or can no longer deliver one.
async fn shutdown_requested(signal: &mut Receiver<Signal>) {
    loop {
        match signal.recv().await {
            Ok(Signal::Shutdown) | Err(RecvError::Closed) => return,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
}

/// Drive `work` to completion unless a shutdown is requested or `deadline`
/// passes first, in which case `work` is dropped where it stands.
async fn guarded<F: Future>(
    work: F,
    signal: &mut Receiver<Signal>,
    (deadline, expiry): (Instant, Expiry),
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        output = work => Ok(output),
        () = shutdown_requested(signal) => Err(Interrupt::Shutdown),
        () = tokio::time::sleep_until(deadline) => Err(Interrupt::Expired(expiry)),
    }
}

pub struct Session<Stream> {
    peer: SocketAddr,
    connection: Option<Connection<Stream>>,
    transaction: Transaction,
    config: Arc<SmtpConfig>,
    registry: Arc<Registry>,
    catalog: Catalog,
    acceptor: Option<TlsAcceptor>,
    mode: ListenerMode,
    /// Bytes received but not yet terminated by a newline
    pending: Vec<u8>,
}

impl<Stream> Session<Stream>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[must_use]
    pub fn create(stream: Stream, peer: SocketAddr, config: SessionConfig) -> Self {
        let socket_mode = config.mode.socket_mode(config.acceptor.is_some());

        Self {
            peer,
            connection: Some(Connection::plain(stream)),
            transaction: Transaction::new(peer, socket_mode),
            catalog: Catalog::new(&config.smtp.server),
            config: config.smtp,
            registry: config.registry,
            acceptor: config.acceptor,
            mode: config.mode,
            pending: Vec::new(),
        }
    }

    /// Serve the connection until the client quits, the peer goes away, a
    /// timeout fires or `signal` asks for a shutdown.
    ///
    /// # Errors
    /// On I/O or TLS failures, timeouts and shutdown
    #[tracing::instrument(level = "trace", skip_all, fields(peer = %self.peer))]
    pub async fn run(mut self, mut signal: Receiver<Signal>) -> Result<(), SessionError> {
        internal!(level = DEBUG, "Connected");

        let result = self.converse(&mut signal).await;

        self.transaction.close();
        if let Some(mut connection) = self.connection.take() {
            connection.shutdown().await;
        }

        internal!(level = DEBUG, "Connection closed");
        result
    }

    async fn converse(&mut self, signal: &mut Receiver<Signal>) -> Result<(), SessionError> {
        let timeouts = self.config.timeouts;

        if self.mode.requires_tls() {
            let deadline = self.transaction.deadline(&timeouts);
            match guarded(self.handshake(), signal, deadline).await {
                Ok(handshake) => handshake?,
                Err(interrupt) => return Err(self.interrupted(interrupt).await),
            }
        }

        let greeting = self.catalog.render(Status::ServiceReady, None);
        self.send(&[greeting]).await?;

        let mut ticker = tokio::time::interval(timeouts.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buffer = vec![0; READ_BUFFER];

        loop {
            loop {
                match self.next_line() {
                    Ok(Some(line)) => {
                        if self.handle(&line, signal).await? {
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        internal!(level = WARN, "{err}");
                        let notice = self
                            .catalog
                            .render(Status::Unrecognised, Some("Line too long"));
                        self.send(&[notice]).await?;
                        return Err(err.into());
                    }
                }
            }

            let Some(connection) = self.connection.as_mut() else {
                return Ok(());
            };

            let wake = tokio::select! {
                () = shutdown_requested(signal) => Wake::Shutdown,
                _ = ticker.tick() => Wake::Tick,
                read = connection.receive(&mut buffer) => Wake::Read(read),
            };

            match wake {
                Wake::Shutdown => return Err(self.interrupted(Interrupt::Shutdown).await),
                Wake::Tick => {
                    if let Some(expiry) = self.transaction.expired(&timeouts, Instant::now()) {
                        return Err(self.interrupted(Interrupt::Expired(expiry)).await);
                    }
                }
                Wake::Read(read) => match read? {
                    0 => {
                        internal!("Peer closed the connection");
                        return Ok(());
                    }
                    read => self.pending.extend_from_slice(&buffer[..read]),
                },
            }
        }
    }

    /// Tell the client why the session is ending and produce the matching
    /// error. A failed write takes precedence.
    async fn interrupted(&mut self, interrupt: Interrupt) -> SessionError {
        let (notice, error) = match interrupt {
            Interrupt::Shutdown => {
                internal!(level = INFO, "Shutdown requested, closing connection");
                (Status::Unavailable, SessionError::Shutdown)
            }
            Interrupt::Expired(expiry) => {
                let timeouts = self.config.timeouts;
                let secs = match expiry {
                    Expiry::Idle => timeouts.idle_secs,
                    Expiry::Lifetime => timeouts.connection_secs,
                };

                tracing::warn!(peer = %self.peer, ?expiry, secs, "Client connection timed out");
                (Status::GoodBye, SessionError::Timeout(secs))
            }
        };

        let notice = self.catalog.render(notice, None);
        match self.send(&[notice]).await {
            Ok(()) => error,
            Err(err) => err,
        }
    }

    /// Take the next complete line out of the pending buffer, without its
    /// line terminator.
    fn next_line(&mut self) -> Result<Option<String>, ConnectionError> {
        match self.pending.iter().position(|&byte| byte == b'\n') {
            Some(end) => {
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }

                if line.len() > MAX_LINE_LENGTH {
                    return Err(ConnectionError::LineTooLong(MAX_LINE_LENGTH));
                }

                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
            None if self.pending.len() > MAX_LINE_LENGTH => {
                Err(ConnectionError::LineTooLong(MAX_LINE_LENGTH))
            }
            None => Ok(None),
        }
    }

    /// Interpret one line and act on the response. Returns `true` once the
    /// connection should be closed.
    ///
    /// The command races the shutdown signal and the transaction's timeouts,
    /// so an extension that never answers cannot hold the connection open.
    async fn handle(
        &mut self,
        line: &str,
        signal: &mut Receiver<Signal>,
    ) -> Result<bool, SessionError> {
        incoming!("{line}");

        let mode = self.transaction.socket_mode();
        let encrypted = self.connection.as_ref().is_some_and(Connection::is_tls);
        if encrypted != mode.is_encrypted() {
            internal!(level = ERROR, "Transport does not match socket mode {mode}");
            return Err(SessionError::Protocol(format!(
                "Transport does not match socket mode {mode}"
            )));
        }

        self.transaction.touch();
        let deadline = self.transaction.deadline(&self.config.timeouts);

        let engine = Engine {
            config: self.config.as_ref(),
            registry: self.registry.as_ref(),
            catalog: &self.catalog,
            tls_available: self.acceptor.is_some() && self.mode == ListenerMode::StartTls,
        };

        let response =
            match guarded(interpret(&engine, &mut self.transaction, line), signal, deadline).await
            {
                Ok(response) => response,
                Err(interrupt) => return Err(self.interrupted(interrupt).await),
            };
        self.send(&response.lines).await?;

        match response.event {
            Event::ConnectionKeepAlive => Ok(false),
            Event::ConnectionClose => Ok(true),
            Event::Upgrade => {
                // Anything pipelined behind STARTTLS arrived in the clear
                self.pending.clear();
                let deadline = self.transaction.deadline(&self.config.timeouts);
                match guarded(self.handshake(), signal, deadline).await {
                    Ok(handshake) => handshake?,
                    Err(interrupt) => return Err(self.interrupted(interrupt).await),
                }
                self.transaction.upgrade_socket()?;
                Ok(false)
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let acceptor = self
            .acceptor
            .as_ref()
            .ok_or(ConnectionError::Tls(TlsError::NotConfigured))?;
        let connection = self.connection.take().ok_or(ConnectionError::Closed)?;

        let (connection, info) = connection
            .upgrade(acceptor)
            .await
            .map_err(ConnectionError::from)?;

        internal!(
            level = DEBUG,
            "Connection upgraded to {} using {}",
            info.version,
            info.cipher
        );

        self.connection = Some(connection);
        Ok(())
    }

    /// Write and record each line. Once the connection is gone this only
    /// records.
    async fn send(&mut self, lines: &[String]) -> Result<(), SessionError> {
        for line in lines {
            outgoing!("{line}");
            self.transaction.record(Direction::Sent, line.as_str());

            if let Some(connection) = self.connection.as_mut() {
                connection.send(line).await.map_err(|err| {
                    internal!(level = ERROR, "Failed to send response: {err}");
                    SessionError::from(err)
                })?;
            }
        }

        Ok(())
    }
}
