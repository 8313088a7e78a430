//! Engine-wide settings shared by every connection.

use inbound_common::config::{SessionTimeouts, TlsContext};
use serde::Deserialize;

use crate::transaction::SocketMode;

/// How a listener's connections start out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum ListenerMode {
    /// Plain text, `STARTTLS` is offered when TLS material is configured
    #[default]
    StartTls,
    /// Plain text for the whole connection
    Plain,
    /// TLS from the first byte
    ImplicitTls,
}

impl ListenerMode {
    /// The socket mode a new transaction on this listener starts in.
    #[must_use]
    pub const fn socket_mode(self, tls_configured: bool) -> SocketMode {
        match self {
            Self::StartTls if tls_configured => SocketMode::StartTlsPending,
            Self::StartTls | Self::Plain => SocketMode::Plain,
            Self::ImplicitTls => SocketMode::ImplicitTls,
        }
    }

    #[must_use]
    pub const fn requires_tls(self) -> bool {
        matches!(self, Self::ImplicitTls)
    }
}

/// Strings substituted into reply text.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Identity {
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default = "defaults::host")]
    pub domain: String,
    #[serde(default = "defaults::vendor")]
    pub vendor: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            domain: defaults::host(),
            vendor: defaults::vendor(),
        }
    }
}

/// What SPF-evaluating extensions should do with a failing sender.
///
/// The engine itself never evaluates SPF, it only carries the setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum SpfAction {
    Drop,
    #[default]
    Mark,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Policy {
    /// Close the connection after an extension denies `MAIL FROM`, rather
    /// than replying 454 and waiting for the next command.
    #[serde(default)]
    pub mail_from_deny_closes: bool,
    #[serde(default)]
    pub spf: SpfAction,
    /// Register the builtin extension rejecting senders whose declared
    /// `SIZE=` exceeds the maximum message size.
    #[serde(default = "defaults::enabled")]
    pub enforce_declared_size: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            mail_from_deny_closes: false,
            spf: SpfAction::default(),
            enforce_declared_size: defaults::enabled(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub server: Identity,
    #[serde(default)]
    pub tls: Option<TlsContext>,
    /// Maximum accepted message size in bytes, 0 for no limit.
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub timeouts: SessionTimeouts,
    #[serde(default)]
    pub policy: Policy,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: Identity::default(),
            tls: None,
            max_message_size: defaults::max_message_size(),
            timeouts: SessionTimeouts::default(),
            policy: Policy::default(),
        }
    }
}

mod defaults {
    pub fn host() -> String {
        "localhost".to_string()
    }

    pub fn vendor() -> String {
        "Inbound".to_string()
    }

    pub const fn enabled() -> bool {
        true
    }

    pub const fn max_message_size() -> usize {
        10 * 1024 * 1024
    }
}
