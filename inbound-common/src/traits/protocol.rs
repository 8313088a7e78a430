use std::{fmt::Debug, future::Future, net::SocketAddr};

use serde::Deserialize;
use tokio::{net::TcpStream, sync::broadcast};

use crate::{
    Signal,
    error::{ProtocolError, SessionError},
};

/// A single accepted connection, driven to completion by its listener.
pub trait SessionHandler {
    /// Serve the connection until the client leaves, an error occurs, or
    /// `signal` asks for shutdown.
    fn run(
        self,
        signal: broadcast::Receiver<Signal>,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// A wire protocol a [`Listener`](crate::listener::Listener) can serve.
pub trait Protocol: Default + Send + Sync {
    type Session: SessionHandler + Send + 'static;
    /// Per-listener settings, read from the `args` of a listener's
    /// configuration.
    type Args: Default + Clone + Debug + Send + Sync + for<'a> Deserialize<'a>;

    fn handle(&self, stream: TcpStream, peer: SocketAddr, args: Self::Args) -> Self::Session;

    /// Check `args` before the listener binds, filling in anything that is
    /// expensive to build per connection (a TLS acceptor, say).
    ///
    /// # Errors
    /// If the arguments cannot be served, e.g. TLS material is missing
    fn validate(&mut self, args: &mut Self::Args) -> Result<(), ProtocolError>;

    fn ty() -> &'static str;
}
