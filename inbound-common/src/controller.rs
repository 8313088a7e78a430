use futures_util::future::join_all;
use serde::Deserialize;
use tokio::sync::broadcast::Receiver;

use crate::{
    Signal, error::ControllerError, internal, listener::Listener, traits::Protocol,
};

#[derive(Default, Deserialize)]
pub struct Controller<Proto: Protocol> {
    #[serde(alias = "listener")]
    listeners: Vec<Listener<Proto>>,
}

impl<Proto: Protocol> Controller<Proto> {
    #[must_use]
    pub const fn new(listeners: Vec<Listener<Proto>>) -> Self {
        Self { listeners }
    }

    /// Map over the args of all listeners, allowing modification before initialization
    ///
    /// This is useful for injecting dependencies that cannot be deserialized,
    /// such as the shared extension registry.
    pub fn map_args<F>(&mut self, f: F)
    where
        F: Fn(Proto::Args) -> Proto::Args,
    {
        for listener in &mut self.listeners {
            listener.map_args(&f);
        }
    }

    ///
    /// Initialise this controller, dropping any disabled listeners
    ///
    /// # Errors
    /// Any errors initialising this controller
    ///
    pub fn init(&mut self) -> Result<(), ControllerError> {
        internal!("Initialising Controller for {}", Proto::ty());

        self.listeners.retain(|listener| {
            if !listener.is_enabled() {
                internal!(level = INFO, "{} Listener {} is disabled", Proto::ty(), listener.socket());
            }

            listener.is_enabled()
        });

        self.listeners
            .iter_mut()
            .try_for_each(Listener::init)
            .map_err(ControllerError::from)
    }

    #[must_use]
    pub fn listeners(&self) -> &[Listener<Proto>] {
        &self.listeners
    }

    ///
    /// # Errors
    /// If any of the listeners have a failure
    ///
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
    pub async fn control(self, signal: Receiver<Signal>) -> Result<(), ControllerError> {
        join_all(
            self.listeners
                .iter()
                .map(|l| l.serve(signal.resubscribe())),
        )
        .await
        .into_iter()
        .try_for_each(|result| result.map_err(ControllerError::from))
    }
}
