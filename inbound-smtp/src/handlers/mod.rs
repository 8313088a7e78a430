//! One handler per builtin verb.
//!
//! Handlers check their preconditions against the transaction's markers,
//! run the extensions registered for their command, update the transaction
//! and return the reply lines for the session to write. They never touch
//! the transport themselves, so a handler that needs the connection closed
//! or upgraded says so through the [`Event`] it returns.

use inbound_common::status::Status;

use crate::{catalog::Catalog, config::SmtpConfig, extensions::Registry};

pub mod custom;
pub mod data;
pub mod greeting;
pub mod mail;
pub mod rcpt;
pub mod rset;
pub mod simple;
pub mod starttls;
pub mod vrfy;

/// What the session should do once the reply has been written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    ConnectionKeepAlive,
    ConnectionClose,
    /// Perform the server side of a TLS handshake
    Upgrade,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub lines: Vec<String>,
    pub event: Event,
}

impl Response {
    /// Nothing to send, wait for the next line.
    #[must_use]
    pub const fn silent() -> Self {
        Self {
            lines: Vec::new(),
            event: Event::ConnectionKeepAlive,
        }
    }

    #[must_use]
    pub fn keep(lines: Vec<String>) -> Self {
        Self {
            lines,
            event: Event::ConnectionKeepAlive,
        }
    }

    #[must_use]
    pub fn close(lines: Vec<String>) -> Self {
        Self {
            lines,
            event: Event::ConnectionClose,
        }
    }

    #[must_use]
    pub fn upgrade(lines: Vec<String>) -> Self {
        Self {
            lines,
            event: Event::Upgrade,
        }
    }

    /// The three digit code of the last line, for logging and tests.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.lines.last().and_then(|line| line.get(..3))
    }
}

/// The shared, read-only state every handler works against.
#[derive(Clone, Copy, Debug)]
pub struct Engine<'a> {
    pub config: &'a SmtpConfig,
    pub registry: &'a Registry,
    pub catalog: &'a Catalog,
    /// Whether this connection has TLS material it could upgrade with
    pub tls_available: bool,
}

impl Engine<'_> {
    #[must_use]
    pub fn render(&self, status: Status, detail: Option<&str>) -> String {
        self.catalog.render(status, detail)
    }

    #[must_use]
    pub fn keep(&self, status: Status) -> Response {
        Response::keep(vec![self.render(status, None)])
    }

    #[must_use]
    pub fn close(&self, status: Status) -> Response {
        Response::close(vec![self.render(status, None)])
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the handler tests.

    use crate::{
        catalog::Catalog,
        config::SmtpConfig,
        extensions::Registry,
        handlers::Engine,
        transaction::{Dialect, Marker, SocketMode, Transaction},
    };

    pub struct Fixture {
        pub config: SmtpConfig,
        pub registry: Registry,
        pub catalog: Catalog,
        pub tls_available: bool,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_registry(Registry::new())
        }

        pub fn with_registry(registry: Registry) -> Self {
            let config = SmtpConfig::default();
            Self {
                catalog: Catalog::new(&config.server),
                config,
                registry,
                tls_available: false,
            }
        }

        pub fn engine(&self) -> Engine<'_> {
            Engine {
                config: &self.config,
                registry: &self.registry,
                catalog: &self.catalog,
                tls_available: self.tls_available,
            }
        }
    }

    pub fn transaction() -> Transaction {
        Transaction::new("192.0.2.1:40000".parse().unwrap(), SocketMode::Plain)
    }

    /// A transaction that has completed `EHLO` and, optionally, more.
    pub fn greeted(markers: &[Marker]) -> Transaction {
        let mut tx = transaction();
        tx.set_dialect(Dialect::Esmtp);
        tx.push_marker(Marker::Ehlo);
        for marker in markers {
            tx.push_marker(*marker);
        }
        tx
    }
}
