//! Typed extension points.
//!
//! Each command that accepts third-party logic has its own trait and its
//! own context type. A context is a cheap `Copy` view built fresh for every
//! callback, so nothing one extension does to it can leak into the next;
//! data meant to be shared between extensions goes through the
//! transaction's [`Extras`](crate::transaction::Extras).
//!
//! Extensions are collected in a [`Registry`] at start-up and invoked by the
//! command handlers, which fold their answers with the rules in [`fold`].

use core::fmt::{self, Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use inbound_common::status::Status;
use serde::Deserialize;

use crate::{
    address::{Mailbox, Sender},
    command::Command,
    config::SmtpConfig,
    error::RegistryError,
    params::{Matcher, Parameters, Schema},
    transaction::{Dialect, Marker, Markers, Transaction},
};

pub mod builtin;
pub mod fold;
mod registry;

pub use registry::{Entry, Registry};

/// An extension's verdict on `MAIL FROM`, `RCPT TO`, `STARTTLS` or `DATA`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
    /// Allow, and skip every extension registered after this one
    AllowFinal,
    /// Deny, and skip every extension registered after this one
    DenyFinal,
}

impl Action {
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::AllowFinal | Self::DenyFinal)
    }

    #[must_use]
    pub const fn is_allow(self) -> bool {
        matches!(self, Self::Allow | Self::AllowFinal)
    }
}

impl Display for Action {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
            Self::AllowFinal => "ALLOW:FINAL",
            Self::DenyFinal => "DENY:FINAL",
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MailFromContext<'a> {
    pub transaction: &'a Transaction,
    pub sender: &'a Sender,
    pub config: &'a SmtpConfig,
    pub raw: &'a str,
}

#[derive(Clone, Copy, Debug)]
pub struct RcptToContext<'a> {
    pub transaction: &'a Transaction,
    pub recipient: &'a Mailbox,
    pub config: &'a SmtpConfig,
    pub raw: &'a str,
}

#[derive(Clone, Copy, Debug)]
pub struct StartTlsContext<'a> {
    pub transaction: &'a Transaction,
    pub config: &'a SmtpConfig,
}

/// Seen once when `DATA` is issued (with no `chunk`) and once for every
/// line of the body after that.
#[derive(Clone, Copy, Debug)]
pub struct DataContext<'a> {
    pub transaction: &'a Transaction,
    pub chunk: Option<&'a str>,
    /// Size of `chunk`, including its line terminator
    pub current_size: usize,
    /// Size of the body so far, including `chunk`
    pub total_size: usize,
    pub config: &'a SmtpConfig,
}

#[derive(Clone, Copy, Debug)]
pub struct VrfyContext<'a> {
    pub transaction: &'a Transaction,
    /// Everything after `VRFY`
    pub query: &'a [String],
    pub config: &'a SmtpConfig,
}

/// The fire-and-forget extension points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Notification {
    Noop,
    Rset,
    Quit,
    /// A message body has been completely received.
    Received,
}

#[derive(Clone, Copy, Debug)]
pub struct NotifyContext<'a> {
    pub notification: Notification,
    pub transaction: &'a Transaction,
    pub config: &'a SmtpConfig,
}

#[derive(Clone, Copy, Debug)]
pub struct CustomContext<'a> {
    pub transaction: &'a Transaction,
    pub command: &'a Command,
    pub parameters: &'a Parameters,
    pub config: &'a SmtpConfig,
}

/// What a `DATA` extension wants done with the message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataDecision {
    pub action: Option<Action>,
    /// Accept the message regardless of the configured size limit.
    pub bypass_size_check: bool,
}

impl DataDecision {
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            action: Some(Action::Allow),
            bypass_size_check: false,
        }
    }

    #[must_use]
    pub const fn deny() -> Self {
        Self {
            action: Some(Action::Deny),
            bypass_size_check: false,
        }
    }

    #[must_use]
    pub const fn bypass() -> Self {
        Self {
            action: None,
            bypass_size_check: true,
        }
    }
}

/// One answer to a `VRFY` query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub username: Option<String>,
    pub address: String,
}

impl Candidate {
    pub fn new(username: Option<&str>, address: impl Into<String>) -> Self {
        Self {
            username: username.map(str::to_string),
            address: address.into(),
        }
    }
}

impl Display for Candidate {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(username) => write!(fmt, "{username} <{}>", self.address),
            None => write!(fmt, "<{}>", self.address),
        }
    }
}

/// A custom command's reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub detail: Option<String>,
}

impl Reply {
    #[must_use]
    pub const fn new(status: Status) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[async_trait]
pub trait MailFromExtension: Send + Sync {
    /// `None` leaves the decision to the other extensions.
    async fn check(&self, ctx: MailFromContext<'_>) -> anyhow::Result<Option<Action>>;
}

#[async_trait]
pub trait RcptToExtension: Send + Sync {
    async fn check(&self, ctx: RcptToContext<'_>) -> anyhow::Result<Option<Action>>;
}

#[async_trait]
pub trait StartTlsExtension: Send + Sync {
    async fn check(&self, ctx: StartTlsContext<'_>) -> anyhow::Result<Option<Action>>;
}

#[async_trait]
pub trait DataExtension: Send + Sync {
    async fn check(&self, ctx: DataContext<'_>) -> anyhow::Result<DataDecision>;
}

#[async_trait]
pub trait VrfyExtension: Send + Sync {
    async fn lookup(&self, ctx: VrfyContext<'_>) -> anyhow::Result<Vec<Candidate>>;
}

#[async_trait]
pub trait NotifyExtension: Send + Sync {
    async fn notify(&self, ctx: NotifyContext<'_>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CustomCommandHandler: Send + Sync {
    /// Returning a reply stops any further handlers for the command and sends
    /// it; returning `None` on every handler yields `250 OK`.
    async fn handle(&self, ctx: CustomContext<'_>) -> anyhow::Result<Option<Reply>>;
}

/// A callback tagged with the extension point it serves.
#[derive(Clone)]
pub enum Hook {
    MailFrom(Arc<dyn MailFromExtension>),
    RcptTo(Arc<dyn RcptToExtension>),
    StartTls(Arc<dyn StartTlsExtension>),
    Data(Arc<dyn DataExtension>),
    Vrfy(Arc<dyn VrfyExtension>),
    Notify(Notification, Arc<dyn NotifyExtension>),
}

impl Hook {
    const fn kind(&self) -> &'static str {
        match self {
            Self::MailFrom(_) => "MAILFROM",
            Self::RcptTo(_) => "RCPTTO",
            Self::StartTls(_) => "STARTTLS",
            Self::Data(_) => "DATA",
            Self::Vrfy(_) => "VRFY",
            Self::Notify(Notification::Noop, _) => "NOOP",
            Self::Notify(Notification::Rset, _) => "RSET",
            Self::Notify(Notification::Quit, _) => "QUIT",
            Self::Notify(Notification::Received, _) => "RECEIVED",
        }
    }
}

/// Which greeting a custom command may follow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum Applicability {
    /// Only after `HELO` (or before any greeting)
    Smtp,
    /// Only after `EHLO`
    Esmtp,
    #[default]
    Any,
}

impl Applicability {
    #[must_use]
    pub fn permits(self, dialect: Option<Dialect>) -> bool {
        match self {
            Self::Any => true,
            Self::Smtp => dialect != Some(Dialect::Esmtp),
            Self::Esmtp => dialect == Some(Dialect::Esmtp),
        }
    }
}

/// Everything the interpreter needs to know about a custom command, apart
/// from the handler itself.
#[derive(Clone, Debug)]
pub struct CustomCommand {
    name: String,
    matcher: Matcher,
    required_stages: Vec<Marker>,
    disallowed_stages: Vec<Marker>,
    applicability: Applicability,
    feature: Option<String>,
}

impl CustomCommand {
    /// # Errors
    /// If the parameter schema cannot be compiled
    pub fn new(name: &str, schema: &Schema) -> Result<Self, RegistryError> {
        let name = name.trim().to_ascii_uppercase();
        let matcher = schema
            .compile(&name)
            .map_err(|err| RegistryError::InvalidSchema {
                command: name.clone(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            name,
            matcher,
            required_stages: Vec::new(),
            disallowed_stages: Vec::new(),
            applicability: Applicability::default(),
            feature: None,
        })
    }

    /// Markers that must all be set before the command is accepted.
    #[must_use]
    pub fn requires(mut self, stages: &[Marker]) -> Self {
        self.required_stages.extend_from_slice(stages);
        self
    }

    /// Markers any one of which makes the command out of sequence.
    #[must_use]
    pub fn disallows(mut self, stages: &[Marker]) -> Self {
        self.disallowed_stages.extend_from_slice(stages);
        self
    }

    #[must_use]
    pub const fn applies_to(mut self, applicability: Applicability) -> Self {
        self.applicability = applicability;
        self
    }

    /// Advertise `feature` in the `EHLO` reply.
    #[must_use]
    pub fn advertise(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    #[must_use]
    pub fn feature(&self) -> Option<&str> {
        self.feature.as_deref()
    }

    #[must_use]
    pub const fn applicability(&self) -> Applicability {
        self.applicability
    }

    /// Whether the command is in sequence given the completed `markers`.
    #[must_use]
    pub fn in_sequence(&self, markers: &Markers) -> bool {
        !markers.any(&self.disallowed_stages) && markers.all(&self.required_stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Schema;

    #[test]
    fn actions() {
        assert!(Action::AllowFinal.is_final());
        assert!(Action::AllowFinal.is_allow());
        assert!(!Action::Deny.is_final());
        assert!(!Action::DenyFinal.is_allow());
        assert_eq!(Action::DenyFinal.to_string(), "DENY:FINAL");
    }

    #[test]
    fn candidates() {
        assert_eq!(
            Candidate::new(Some("jdoe"), "jdoe@example.com").to_string(),
            "jdoe <jdoe@example.com>"
        );
        assert_eq!(
            Candidate::new(None, "postmaster@example.com").to_string(),
            "<postmaster@example.com>"
        );
    }

    #[test]
    fn applicability() {
        assert!(Applicability::Any.permits(None));
        assert!(Applicability::Smtp.permits(None));
        assert!(Applicability::Smtp.permits(Some(Dialect::Smtp)));
        assert!(!Applicability::Smtp.permits(Some(Dialect::Esmtp)));
        assert!(Applicability::Esmtp.permits(Some(Dialect::Esmtp)));
        assert!(!Applicability::Esmtp.permits(None));
    }

    #[test]
    fn stage_constraints() {
        let command = CustomCommand::new("xclient", &Schema::new())
            .unwrap()
            .requires(&[Marker::Ehlo])
            .disallows(&[Marker::MailFrom]);
        assert_eq!(command.name(), "XCLIENT");

        let mut markers = Markers::default();
        assert!(!command.in_sequence(&markers));

        markers.insert(Marker::Ehlo);
        assert!(command.in_sequence(&markers));

        markers.insert(Marker::MailFrom);
        assert!(!command.in_sequence(&markers));
    }
}
