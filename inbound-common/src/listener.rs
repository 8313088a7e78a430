use std::net::SocketAddr;

use futures_util::future::join_all;
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::{
    Signal,
    error::{ListenerError, ProtocolError},
    internal,
    traits::protocol::{Protocol, SessionHandler},
};

const fn enabled() -> bool {
    true
}

#[derive(Deserialize)]
pub struct Listener<Proto: Protocol> {
    #[serde(skip)]
    handler: Proto,
    socket: SocketAddr,
    #[serde(default = "enabled")]
    enabled: bool,
    #[serde(default)]
    args: Proto::Args,
}

impl<Proto: Protocol> Listener<Proto> {
    #[must_use]
    pub fn new(socket: SocketAddr, args: Proto::Args) -> Self {
        Self {
            handler: Proto::default(),
            socket,
            enabled: true,
            args,
        }
    }

    #[must_use]
    pub const fn socket(&self) -> SocketAddr {
        self.socket
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn map_args<F>(&mut self, f: F)
    where
        F: Fn(Proto::Args) -> Proto::Args,
    {
        self.args = f(std::mem::take(&mut self.args));
    }

    #[tracing::instrument(skip(self), fields(socket = %self.socket))]
    pub fn init(&mut self) -> Result<(), ProtocolError> {
        self.handler.validate(&mut self.args)
    }

    ///
    /// Bind to the configured socket and serve connections until a shutdown
    /// signal arrives
    ///
    /// # Errors
    /// If binding fails or the listener stops accepting connections
    ///
    pub async fn serve(
        &self,
        shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        let listener =
            TcpListener::bind(self.socket)
                .await
                .map_err(|source| ListenerError::BindFailed {
                    address: self.socket.to_string(),
                    source,
                })?;

        self.serve_on(listener, shutdown).await
    }

    ///
    /// Serve connections from an already bound listener
    ///
    /// # Errors
    /// If accepting a connection fails
    ///
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(socket = %self.socket))]
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        internal!("Serving {:?} with {:?}", self.socket, self.args);

        let mut sessions = Vec::default();
        let (address, port) = (self.socket.ip(), self.socket.port());

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(tokio::sync::broadcast::error::RecvError::Closed)) {
                        internal!(level = INFO, "{} Listener {}:{} Received Shutdown signal, finishing sessions ...", Proto::ty(), address, port);
                        join_all(sessions).await;
                        return Ok(());
                    }
                }

                connection = listener.accept() => {
                    tracing::debug!("Connection received on {}", self.socket);

                    let (stream, peer) = connection?;
                    let handler = self.handler.handle(stream, peer, self.args.clone());
                    let signal = shutdown.resubscribe();

                    sessions.retain(|session: &tokio::task::JoinHandle<()>| !session.is_finished());
                    sessions.push(tokio::spawn(async move {
                        match handler.run(signal).await {
                            Ok(()) => {}
                            Err(err) if err.is_shutdown() => internal!(level = DEBUG, "{err}"),
                            Err(err) if err.is_client_error() => internal!(level = INFO, "{err}"),
                            Err(err) => internal!(level = ERROR, "Error: {err}"),
                        }
                    }));
                }
            }
        }
    }
}
