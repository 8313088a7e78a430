use std::sync::{Arc, LazyLock};

use inbound_common::{
    Signal,
    config::{SessionTimeouts, TlsContext},
    controller::Controller,
    internal, logging,
};
use inbound_smtp::{
    Registry, Smtp, SmtpConfig,
    config::{Identity, Policy},
    extensions::builtin,
};
use serde::Deserialize;
use tokio::sync::broadcast;

/// The whole of a configuration file.
#[derive(Deserialize)]
pub struct Inbound {
    #[serde(alias = "smtp")]
    smtp_controller: Controller<Smtp>,
    #[serde(default)]
    server: Identity,
    #[serde(default)]
    tls: Option<TlsContext>,
    #[serde(default = "max_message_size")]
    max_message_size: usize,
    #[serde(default)]
    timeouts: SessionTimeouts,
    #[serde(default)]
    policy: Policy,
}

fn max_message_size() -> usize {
    SmtpConfig::default().max_message_size
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Inbound {
    /// The engine settings every listener shares.
    #[must_use]
    pub fn smtp_config(&self) -> SmtpConfig {
        SmtpConfig {
            server: self.server.clone(),
            tls: self.tls.clone(),
            max_message_size: self.max_message_size,
            timeouts: self.timeouts,
            policy: self.policy.clone(),
        }
    }

    /// Add the builtin extensions to `registry`, hand it and the engine
    /// settings to every listener, then validate the listeners.
    ///
    /// # Errors
    /// If an extension id clashes with a builtin one, or a listener's
    /// configuration is invalid
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub fn init(&mut self, mut registry: Registry) -> anyhow::Result<()> {
        let config = Arc::new(self.smtp_config());

        builtin::bootstrap(&mut registry, &config)?;
        internal!(level = DEBUG, "Extensions: {registry:?}");

        let registry = Arc::new(registry);
        self.smtp_controller.map_args(|args| {
            args.with_config(Arc::clone(&config))
                .with_registry(Arc::clone(&registry))
        });

        self.smtp_controller.init()?;

        Ok(())
    }

    /// Run this controller with only the builtin extensions
    ///
    /// # Errors
    /// See [`Inbound::run_with`]
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_with(Registry::new()).await
    }

    /// Run this controller, and everything it controls, until every listener
    /// has shut down
    ///
    /// # Errors
    ///
    /// This function will return an error if the extensions or listeners
    /// fail to initialise, or a listener fails while serving.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run_with(mut self, registry: Registry) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        self.init(registry)?;

        let ret = tokio::select! {
            r = self.smtp_controller.control(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}
