//! Error types for the inbound-smtp engine.

use std::io;

use inbound_common::error::SessionError;
use thiserror::Error;

use crate::transaction::SocketMode;

/// Errors raised while reading from or writing to a client.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client sent a line longer than the configured maximum.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("Connection closed by peer")]
    Closed,

    #[error("TLS upgrade failed: {0}")]
    Tls(#[from] TlsError),
}

/// Errors raised while preparing or performing a TLS handshake.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// No acceptor was configured for this listener.
    #[error("TLS is not configured")]
    NotConfigured,

    #[error("Connection is already encrypted")]
    AlreadyEncrypted,

    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

/// Errors raised while building the extension registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("An extension with id '{0}' is already registered")]
    DuplicateId(String),

    #[error("Extension '{id}' requires '{missing}', which is not registered")]
    MissingDependency { id: String, missing: String },

    #[error("A custom command named '{0}' would shadow a built-in command")]
    ReservedCommand(String),

    #[error("Invalid parameters for custom command '{command}': {reason}")]
    InvalidSchema { command: String, reason: String },
}

/// Invalid transitions on a [`crate::transaction::Transaction`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("No DATA phase is in progress")]
    NotSendingData,

    #[error("Cannot upgrade a connection in {0} mode")]
    NotUpgradable(SocketMode),
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Io(err) => Self::Connection(err),
            err => Self::Protocol(err.to_string()),
        }
    }
}

impl From<StateError> for SessionError {
    fn from(err: StateError) -> Self {
        Self::Protocol(err.to_string())
    }
}

pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

pub type TlsResult<T> = std::result::Result<T, TlsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_display() {
        assert_eq!(
            ConnectionError::LineTooLong(1000).to_string(),
            "Line exceeds 1000 bytes"
        );
        assert_eq!(
            ConnectionError::Closed.to_string(),
            "Connection closed by peer"
        );
        assert_eq!(
            ConnectionError::from(TlsError::NotConfigured).to_string(),
            "TLS upgrade failed: TLS is not configured"
        );
    }

    #[test]
    fn tls_error_display() {
        let err = TlsError::KeyLoad {
            path: "/etc/inbound/key.pem".to_string(),
            reason: "no key found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load TLS private key from /etc/inbound/key.pem: no key found"
        );
    }

    #[test]
    fn registry_error_display() {
        assert_eq!(
            RegistryError::MissingDependency {
                id: "SPF".to_string(),
                missing: "DNS".to_string()
            }
            .to_string(),
            "Extension 'SPF' requires 'DNS', which is not registered"
        );
        assert_eq!(
            StateError::NotUpgradable(SocketMode::ImplicitTls).to_string(),
            "Cannot upgrade a connection in implicit-tls mode"
        );
    }

    #[test]
    fn io_error_conversion() {
        let err: ConnectionError =
            io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into();
        assert!(matches!(err, ConnectionError::Io(_)));

        assert!(matches!(
            SessionError::from(err),
            SessionError::Connection(_)
        ));
        assert!(SessionError::from(ConnectionError::LineTooLong(8192)).is_client_error());
    }
}
