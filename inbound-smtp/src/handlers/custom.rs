use inbound_common::{internal, status::Status};

use super::{Engine, Response};
use crate::{
    command::Command,
    extensions::{CustomContext, fold},
    transaction::Transaction,
};

/// Anything that is not a builtin verb.
///
/// Every custom command registered under the name and applicable to the
/// connection's dialect gets a turn, in registration order: its stage
/// constraints are checked, the line is parsed against its schema and its
/// handler runs. The first reply (or failure) is sent; if nothing replied
/// the answer is `250 OK`. A name nobody registered is unrecognised.
pub async fn dispatch(engine: &Engine<'_>, tx: &Transaction, command: &Command) -> Response {
    let mut found = false;

    for (definition, entry) in engine.registry.custom_command(command.name()) {
        if !definition.applicability().permits(tx.dialect()) {
            continue;
        }

        found = true;
        internal!(
            level = DEBUG,
            "Running custom command {} ({})",
            definition.name(),
            entry.id()
        );

        if !definition.in_sequence(tx.markers()) {
            return engine.keep(Status::InvalidCommandSequence);
        }

        let parameters = match definition.matcher().parse(command.raw()) {
            Ok(parameters) => parameters,
            Err(err) => {
                return Response::keep(vec![engine.render(err.status, Some(&err.message))]);
            }
        };

        let reply = fold::custom(
            entry,
            CustomContext {
                transaction: tx,
                command,
                parameters: &parameters,
                config: engine.config,
            },
        )
        .await;

        if let Some(reply) = reply {
            return Response::keep(vec![engine.render(reply.status, reply.detail.as_deref())]);
        }
    }

    if found {
        engine.keep(Status::Ok)
    } else {
        internal!(level = DEBUG, "Unrecognised command '{}'", command.raw());
        Response::keep(vec![engine.render(
            Status::Unrecognised,
            Some(command.name()),
        )])
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use inbound_common::status::Status;

    use super::dispatch;
    use crate::{
        command::Command,
        extensions::{
            Applicability, CustomCommand, CustomCommandHandler, CustomContext, Registry, Reply,
        },
        handlers::{
            Event,
            testing::{Fixture, greeted, transaction},
        },
        params::{Schema, Value},
        transaction::{Dialect, Marker, SocketMode, Transaction},
    };

    struct Version;

    #[async_trait]
    impl CustomCommandHandler for Version {
        async fn handle(&self, ctx: CustomContext<'_>) -> anyhow::Result<Option<Reply>> {
            Ok(match ctx.parameters.value("VERSION") {
                Some(Value::Number(5)) => None,
                _ => Some(Reply::new(Status::ParameterNotImplemented).with_detail("VERSION")),
            })
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl CustomCommandHandler for Counting {
        async fn handle(&self, _: CustomContext<'_>) -> anyhow::Result<Option<Reply>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn fixture(calls: &Arc<AtomicUsize>) -> Fixture {
        let schema = Schema::new()
            .with_spec("VERSION", "number:REQUIRED")
            .unwrap();

        let mut registry = Registry::new();
        registry
            .register_custom_command(
                CustomCommand::new("XHELLO", &schema)
                    .unwrap()
                    .requires(&[Marker::Ehlo])
                    .disallows(&[Marker::MailFrom])
                    .applies_to(Applicability::Esmtp),
                Arc::new(Version),
                None,
            )
            .unwrap();
        registry
            .register_custom_command(
                CustomCommand::new("XHELLO", &schema).unwrap(),
                Arc::new(Counting(Arc::clone(calls))),
                None,
            )
            .unwrap();

        Fixture::with_registry(registry)
    }

    async fn run(fixture: &Fixture, tx: &Transaction, line: &str) -> Vec<String> {
        dispatch(&fixture.engine(), tx, &Command::parse(line))
            .await
            .lines
    }

    #[tokio::test]
    async fn handlers_run_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fixture = fixture(&calls);
        let tx = greeted(&[]);

        assert_eq!(run(&fixture, &tx, "XHELLO: VERSION=5").await, vec!["250 OK"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            run(&fixture, &tx, "XHELLO: VERSION=4").await,
            vec!["504 localhost Command parameter not implemented | [Details] VERSION"]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parse_failures() {
        let fixture = fixture(&Arc::new(AtomicUsize::new(0)));

        assert_eq!(
            run(&fixture, &greeted(&[]), "XHELLO: VERSION=five").await,
            vec![
                "501 localhost Syntax error in parameters or arguments | [Details] Command 'XHELLO' Parameters is invalid, no matches"
            ]
        );
    }

    #[tokio::test]
    async fn stage_constraints() {
        let fixture = fixture(&Arc::new(AtomicUsize::new(0)));

        let lines = run(&fixture, &greeted(&[Marker::MailFrom]), "XHELLO: VERSION=5").await;
        assert_eq!(lines, vec!["503 localhost Bad sequence of commands"]);
    }

    #[tokio::test]
    async fn dialect_filter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fixture = fixture(&calls);

        let mut tx = Transaction::new("192.0.2.1:25".parse().unwrap(), SocketMode::Plain);
        tx.set_dialect(Dialect::Smtp);
        tx.push_marker(Marker::Helo);

        // Only the dialect-agnostic registration applies after HELO
        assert_eq!(run(&fixture, &tx, "XHELLO: VERSION=4").await, vec!["250 OK"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unrecognised() {
        let fixture = Fixture::new();
        let response = dispatch(
            &fixture.engine(),
            &transaction(),
            &Command::parse("FOO bar"),
        )
        .await;

        assert_eq!(
            response.lines,
            vec!["500 localhost Syntax error, command unrecognized | [Details] FOO"]
        );
        assert_eq!(response.event, Event::ConnectionKeepAlive);
    }
}
