pub mod address;
pub mod catalog;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod handlers;
pub mod interpreter;
pub mod params;
pub mod session;
pub mod transaction;

use std::{net::SocketAddr, sync::Arc};

use inbound_common::{
    Signal,
    config::TlsContext,
    error::{ProtocolError, SessionError},
    traits::protocol::{Protocol, SessionHandler},
};
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsAcceptor;

pub use crate::{
    config::{ListenerMode, SmtpConfig},
    extensions::Registry,
    session::{Session, SessionConfig},
    transaction::Transaction,
};

#[derive(Default, Deserialize)]
pub struct Smtp;

#[derive(Clone, Default, Deserialize)]
pub struct SmtpArgs {
    #[serde(default)]
    mode: ListenerMode,
    /// Overrides the engine wide TLS material for this listener
    #[serde(default)]
    tls: Option<TlsContext>,
    #[serde(skip)]
    config: Arc<SmtpConfig>,
    #[serde(skip)]
    registry: Arc<Registry>,
    #[serde(skip)]
    acceptor: Option<TlsAcceptor>,
}

impl std::fmt::Debug for SmtpArgs {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("SmtpArgs")
            .field("mode", &self.mode)
            .field("tls", &self.tls)
            .field("extensions", &self.registry)
            .field("acceptor", &self.acceptor.is_some())
            .finish_non_exhaustive()
    }
}

impl SmtpArgs {
    /// Create a new `SmtpArgs` builder
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: ListenerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set TLS material for this listener only
    #[must_use]
    pub fn with_tls(mut self, tls: Option<TlsContext>) -> Self {
        self.tls = tls;
        self
    }

    /// Set the engine wide configuration
    #[must_use]
    pub fn with_config(mut self, config: Arc<SmtpConfig>) -> Self {
        self.config = config;
        self
    }

    /// Set the extensions every session on this listener consults
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub const fn mode(&self) -> ListenerMode {
        self.mode
    }

    /// The TLS material in effect: the listener's own, else the engine's.
    #[must_use]
    pub fn tls(&self) -> Option<&TlsContext> {
        self.tls.as_ref().or(self.config.tls.as_ref())
    }

    #[must_use]
    pub const fn has_acceptor(&self) -> bool {
        self.acceptor.is_some()
    }
}

impl Protocol for Smtp {
    type Session = Session<TcpStream>;
    type Args = SmtpArgs;

    fn ty() -> &'static str {
        "SMTP"
    }

    #[tracing::instrument(level = "trace", skip(self, stream, args))]
    fn handle(&self, stream: TcpStream, peer: SocketAddr, args: Self::Args) -> Self::Session {
        Session::create(
            stream,
            peer,
            SessionConfig::builder()
                .with_mode(args.mode)
                .with_smtp(args.config)
                .with_registry(args.registry)
                .with_acceptor(args.acceptor)
                .build(),
        )
    }

    #[tracing::instrument(skip_all, fields(mode = ?args.mode))]
    fn validate(&mut self, args: &mut Self::Args) -> Result<(), ProtocolError> {
        let tls = match (args.mode, args.tls().cloned()) {
            (ListenerMode::ImplicitTls, None) => return Err(ProtocolError::MissingField("tls")),
            (ListenerMode::Plain, _) | (_, None) => None,
            (_, Some(tls)) => Some(tls),
        };

        args.acceptor = match tls {
            Some(tls) => {
                for (what, path) in [("Certificate", &tls.certificate), ("Key", &tls.key)] {
                    if !path.try_exists()? {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("Unable to find TLS {what} {}", path.display()),
                        )
                        .into());
                    }
                }

                let acceptor = connection::acceptor(&tls.certificate, &tls.key).map_err(|err| {
                    ProtocolError::InvalidConfiguration {
                        field: "tls".to_string(),
                        reason: err.to_string(),
                    }
                })?;

                Some(acceptor)
            }
            None => None,
        };

        Ok(())
    }
}

impl<Stream> SessionHandler for Session<Stream>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(self, signal: tokio::sync::broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        Self::run(self, signal).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use inbound_common::{config::TlsContext, error::ProtocolError, traits::Protocol};

    use super::{ListenerMode, Smtp, SmtpArgs, SmtpConfig};

    fn missing() -> TlsContext {
        TlsContext {
            certificate: "/nonexistent/certificate.pem".into(),
            key: "/nonexistent/key.pem".into(),
        }
    }

    #[test]
    fn implicit_tls_requires_material() {
        let mut args = SmtpArgs::builder().with_mode(ListenerMode::ImplicitTls);

        assert!(matches!(
            Smtp.validate(&mut args),
            Err(ProtocolError::MissingField("tls"))
        ));
    }

    #[test]
    fn missing_files_are_reported() {
        let mut args = SmtpArgs::builder()
            .with_mode(ListenerMode::StartTls)
            .with_tls(Some(missing()));

        let err = Smtp.validate(&mut args).unwrap_err();
        assert_eq!(
            err.to_string(),
            "I/O error during validation: Unable to find TLS Certificate /nonexistent/certificate.pem"
        );
    }

    #[test]
    fn plain_listener_ignores_tls() {
        let mut args = SmtpArgs::builder()
            .with_mode(ListenerMode::Plain)
            .with_tls(Some(missing()));

        assert!(Smtp.validate(&mut args).is_ok());
        assert!(!args.has_acceptor());
    }

    #[test]
    fn starttls_without_material_is_plain() {
        let mut args = SmtpArgs::builder();

        assert_eq!(args.mode(), ListenerMode::StartTls);
        assert!(Smtp.validate(&mut args).is_ok());
        assert!(!args.has_acceptor());
    }

    #[test]
    fn listener_tls_overrides_engine_tls() {
        let engine = TlsContext {
            certificate: "/etc/inbound/cert.pem".into(),
            key: "/etc/inbound/key.pem".into(),
        };
        let args = SmtpArgs::builder().with_config(Arc::new(SmtpConfig {
            tls: Some(engine.clone()),
            ..SmtpConfig::default()
        }));
        assert_eq!(args.tls(), Some(&engine));

        let args = args.with_tls(Some(missing()));
        assert_eq!(args.tls(), Some(&missing()));
    }
}
