//! End-to-end test harness for Inbound
//!
//! Starts a real SMTP listener on an ephemeral port and talks to it over TCP.
//!
//! # Example
//!
//! ```no_run
//! use support::harness::Harness;
//!
//! #[tokio::test]
//! async fn test_greeting() {
//!     let harness = Harness::builder().build().await.unwrap();
//!     let mut client = harness.connect().await.unwrap();
//!
//!     assert!(client.reply().await.unwrap()[0].starts_with("220"));
//!
//!     harness.shutdown().await;
//! }
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use inbound_common::{Signal, error::ListenerError, listener::Listener};
use inbound_smtp::{ListenerMode, Registry, Smtp, SmtpArgs, SmtpConfig, extensions::builtin};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::broadcast,
    task::JoinHandle,
    time::timeout,
};

/// A running listener
pub struct Harness {
    address: SocketAddr,
    shutdown_tx: broadcast::Sender<Signal>,
    handle: JoinHandle<Result<(), ListenerError>>,
}

impl Harness {
    /// Create a new builder for configuring the test harness
    #[must_use]
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Open a new client connection to the listener
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(&self) -> anyhow::Result<Client> {
        let (reader, writer) = TcpStream::connect(self.address).await?.into_split();

        Ok(Client {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Send the shutdown signal and wait for the listener to finish its
    /// sessions.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(Signal::Shutdown);
        let _ = timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Builder for configuring a [`Harness`]
#[derive(Default)]
pub struct HarnessBuilder {
    config: SmtpConfig,
    registry: Registry,
}

impl HarnessBuilder {
    #[must_use]
    pub fn with_config(mut self, config: SmtpConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `registry` in place of an empty one; the builtin extensions are
    /// added to it either way
    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Bind a plain listener to an ephemeral port and start serving
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or fails validation.
    pub async fn build(mut self) -> anyhow::Result<Harness> {
        builtin::bootstrap(&mut self.registry, &self.config)?;

        let tcp = TcpListener::bind("127.0.0.1:0").await?;
        let address = tcp.local_addr()?;

        let mut listener = Listener::<Smtp>::new(
            address,
            SmtpArgs::builder()
                .with_mode(ListenerMode::Plain)
                .with_config(Arc::new(self.config))
                .with_registry(Arc::new(self.registry)),
        );
        listener.init()?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        let handle = tokio::spawn(async move { listener.serve_on(tcp, shutdown_rx).await });

        Ok(Harness {
            address,
            shutdown_tx,
            handle,
        })
    }
}

/// A line based SMTP client
pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Write `data` exactly as given
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn send(&mut self, data: &str) -> anyhow::Result<()> {
        self.writer.write_all(data.as_bytes()).await?;
        Ok(())
    }

    /// Read one complete reply, every line of a multi-line reply included
    ///
    /// # Errors
    ///
    /// Returns an error if the connection closes mid reply or no reply
    /// arrives within 5 seconds.
    pub async fn reply(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();

        loop {
            let Some(line) = timeout(Duration::from_secs(5), self.lines.next_line()).await?? else {
                anyhow::bail!("Connection closed after {lines:?}");
            };

            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);

            if last {
                return Ok(lines);
            }
        }
    }

    /// Send `line` with its terminator and return the three digit code of
    /// the reply
    ///
    /// # Errors
    ///
    /// See [`Client::reply`]
    pub async fn command(&mut self, line: &str) -> anyhow::Result<String> {
        self.send(&format!("{line}\r\n")).await?;

        let reply = self.reply().await?;
        Ok(reply
            .last()
            .and_then(|line| line.get(..3))
            .unwrap_or_default()
            .to_string())
    }

    /// Whether the server has closed the connection
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            timeout(Duration::from_secs(5), self.lines.next_line()).await,
            Ok(Ok(None) | Err(_))
        )
    }
}
