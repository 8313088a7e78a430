use inbound_common::{internal, status::Status};

use super::{Engine, Response};
use crate::{
    address::process_sender,
    command::Command,
    extensions::{MailFromContext, fold},
    transaction::{Marker, Transaction},
};

/// `MAIL FROM`.
pub async fn mail_from(engine: &Engine<'_>, tx: &mut Transaction, command: &Command) -> Response {
    if !tx.markers().any(&[Marker::Helo, Marker::Ehlo]) || tx.has_marker(Marker::MailFrom) {
        return engine.close(Status::InvalidCommandSequence);
    }

    let sender = match process_sender(command.raw()) {
        Ok(sender) => sender,
        Err(err) => {
            internal!(level = DEBUG, "Invalid sender in '{}': {err}", command.raw());
            return engine.close(Status::MailboxNameNotAllowed);
        }
    };

    let action = fold::mail_from(
        engine.registry.mail_from(),
        MailFromContext {
            transaction: tx,
            sender: &sender,
            config: engine.config,
            raw: command.raw(),
        },
    )
    .await;

    if !action.is_allow() {
        internal!(level = INFO, "Sender {} denied", sender.address());
        return if engine.config.policy.mail_from_deny_closes {
            engine.close(Status::PolicyDeferred)
        } else {
            engine.keep(Status::PolicyDeferred)
        };
    }

    tx.set_sender(sender);
    tx.push_marker(Marker::MailFrom);
    engine.keep(Status::Ok)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::mail_from;
    use crate::{
        address::Body,
        command::Command,
        extensions::{Action, Hook, MailFromContext, MailFromExtension, Registry},
        handlers::{
            Event,
            testing::{Fixture, greeted, transaction},
        },
        transaction::Marker,
    };

    struct Deny;

    #[async_trait]
    impl MailFromExtension for Deny {
        async fn check(&self, ctx: MailFromContext<'_>) -> anyhow::Result<Option<Action>> {
            Ok((ctx.sender.domain() == "spam.example").then_some(Action::Deny))
        }
    }

    fn denying() -> Fixture {
        let mut registry = Registry::new();
        registry
            .register(Hook::MailFrom(Arc::new(Deny)), Some("DENY-SPAM"))
            .unwrap();
        Fixture::with_registry(registry)
    }

    #[tokio::test]
    async fn accepted() {
        let fixture = Fixture::new();
        let mut tx = greeted(&[]);

        let response = mail_from(
            &fixture.engine(),
            &mut tx,
            &Command::parse("MAIL FROM:<user@domain.com> BODY=7BIT"),
        )
        .await;

        assert_eq!(response.lines, vec!["250 OK"]);
        assert!(tx.has_marker(Marker::MailFrom));

        let sender = tx.sender().unwrap();
        assert_eq!(sender.address(), "user@domain.com");
        assert_eq!(sender.body, Body::SevenBit);
    }

    #[tokio::test]
    async fn requires_greeting() {
        let fixture = Fixture::new();
        let mut tx = transaction();

        let response = mail_from(
            &fixture.engine(),
            &mut tx,
            &Command::parse("MAIL FROM:<user@domain.com>"),
        )
        .await;

        assert_eq!(response.code(), Some("503"));
        assert_eq!(response.event, Event::ConnectionClose);
        assert!(tx.sender().is_none());
    }

    #[tokio::test]
    async fn repeated() {
        let fixture = Fixture::new();
        let mut tx = greeted(&[]);
        let engine = fixture.engine();

        mail_from(&engine, &mut tx, &Command::parse("MAIL FROM:<a@b.com>")).await;
        let response = mail_from(&engine, &mut tx, &Command::parse("MAIL FROM:<c@d.com>")).await;

        assert_eq!(response.code(), Some("503"));
        assert_eq!(tx.sender().map(|s| s.address()), Some("a@b.com".to_string()));
    }

    #[tokio::test]
    async fn unparsable_sender() {
        let fixture = Fixture::new();
        let mut tx = greeted(&[]);

        let response = mail_from(
            &fixture.engine(),
            &mut tx,
            &Command::parse("MAIL FROM:<not an address>"),
        )
        .await;

        assert_eq!(response.code(), Some("553"));
        assert_eq!(response.event, Event::ConnectionClose);
    }

    #[tokio::test]
    async fn denied_stays_open() {
        let fixture = denying();
        let mut tx = greeted(&[]);

        let response = mail_from(
            &fixture.engine(),
            &mut tx,
            &Command::parse("MAIL FROM:<bulk@spam.example>"),
        )
        .await;

        assert_eq!(response.code(), Some("454"));
        assert!(response.lines[0].contains("refused by policy"));
        assert_eq!(response.event, Event::ConnectionKeepAlive);
        assert!(!tx.has_marker(Marker::MailFrom));

        let response = mail_from(
            &fixture.engine(),
            &mut tx,
            &Command::parse("MAIL FROM:<someone@example.com>"),
        )
        .await;
        assert_eq!(response.code(), Some("250"));
    }

    #[tokio::test]
    async fn denied_can_close() {
        let mut fixture = denying();
        fixture.config.policy.mail_from_deny_closes = true;
        let mut tx = greeted(&[]);

        let response = mail_from(
            &fixture.engine(),
            &mut tx,
            &Command::parse("MAIL FROM:<bulk@spam.example>"),
        )
        .await;

        assert_eq!(response.code(), Some("454"));
        assert_eq!(response.event, Event::ConnectionClose);
    }
}
