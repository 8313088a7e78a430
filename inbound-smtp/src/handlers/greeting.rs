use inbound_common::{internal, status::Status};

use super::{Engine, Response};
use crate::{
    address::validate_domain,
    command::Command,
    transaction::{Dialect, Marker, Transaction},
};

/// The `EHLO` feature list, without the greeting line or the final `HELP`.
pub fn features(engine: &Engine<'_>, tx: &Transaction) -> Vec<String> {
    let mut features = vec![
        "8BITMIME".to_string(),
        "SMTPUTF8".to_string(),
        "VRFY".to_string(),
    ];

    if engine.config.max_message_size > 0 {
        features.push(format!("SIZE {}", engine.config.max_message_size));
    }

    if engine.tls_available && tx.socket_mode().can_upgrade() {
        features.push("STARTTLS".to_string());
    }

    features.extend(engine.registry.features().into_iter().map(str::to_string));
    features
}

/// `HELO` and `EHLO`.
pub fn greet(
    engine: &Engine<'_>,
    tx: &mut Transaction,
    command: &Command,
    dialect: Dialect,
) -> Response {
    if tx.markers().any(&[Marker::Helo, Marker::Ehlo]) {
        return engine.close(Status::InvalidCommandSequence);
    }

    let tokens = command.raw().split_whitespace().collect::<Vec<_>>();
    let domain = match tokens.as_slice() {
        [_, domain] if validate_domain(domain).is_ok() => *domain,
        _ => {
            internal!(level = DEBUG, "Rejecting greeting '{}'", command.raw());
            return Response::close(vec![
                engine.render(Status::Unrecognised, Some(command.raw())),
            ]);
        }
    };

    tx.set_dialect(dialect);
    tx.push_marker(dialect.marker());
    tx.set_from_domain(domain);

    match dialect {
        Dialect::Smtp => engine.keep(Status::Greeting),
        Dialect::Esmtp => Response::keep(engine.catalog.render_list(
            Status::GreetingContinued,
            features(engine, tx),
            "HELP",
        )),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::greet;
    use crate::{
        command::Command,
        handlers::{
            Event,
            testing::{Fixture, transaction},
        },
        transaction::{Dialect, Marker, SocketMode},
    };

    #[test]
    fn ehlo() {
        let fixture = Fixture::new();
        let mut tx = transaction();

        let response = greet(
            &fixture.engine(),
            &mut tx,
            &Command::parse("EHLO client.example.com"),
            Dialect::Esmtp,
        );

        assert_eq!(
            response.lines,
            vec![
                "250-localhost is my domain name.",
                "250-8BITMIME",
                "250-SMTPUTF8",
                "250-VRFY",
                "250-SIZE 10485760",
                "250 HELP",
            ]
        );
        assert_eq!(response.event, Event::ConnectionKeepAlive);
        assert_eq!(tx.dialect(), Some(Dialect::Esmtp));
        assert!(tx.has_marker(Marker::Ehlo));
        assert_eq!(tx.from_domain(), Some("client.example.com"));
    }

    #[test]
    fn starttls_is_advertised_when_possible() {
        let mut fixture = Fixture::new();
        fixture.tls_available = true;

        let mut tx = transaction();
        let response = greet(
            &fixture.engine(),
            &mut tx,
            &Command::parse("EHLO [192.0.2.1]"),
            Dialect::Esmtp,
        );
        assert!(response.lines.contains(&"250-STARTTLS".to_string()));

        let mut tx = crate::transaction::Transaction::new(
            "192.0.2.1:465".parse().unwrap(),
            SocketMode::ImplicitTls,
        );
        let response = greet(
            &fixture.engine(),
            &mut tx,
            &Command::parse("EHLO [192.0.2.1]"),
            Dialect::Esmtp,
        );
        assert!(!response.lines.contains(&"250-STARTTLS".to_string()));
    }

    #[test]
    fn helo() {
        let fixture = Fixture::new();
        let mut tx = transaction();

        let response = greet(
            &fixture.engine(),
            &mut tx,
            &Command::parse("HELO client.example.com"),
            Dialect::Smtp,
        );

        assert_eq!(response.lines, vec!["250 localhost is my domain name."]);
        assert!(tx.has_marker(Marker::Helo));
    }

    #[test]
    fn second_greeting_is_out_of_sequence() {
        let fixture = Fixture::new();
        let mut tx = transaction();
        let engine = fixture.engine();

        greet(
            &engine,
            &mut tx,
            &Command::parse("EHLO client.example.com"),
            Dialect::Esmtp,
        );
        let response = greet(
            &engine,
            &mut tx,
            &Command::parse("HELO client.example.com"),
            Dialect::Smtp,
        );

        assert_eq!(response.code(), Some("503"));
        assert_eq!(response.event, Event::ConnectionClose);
        assert_eq!(tx.dialect(), Some(Dialect::Esmtp));
    }

    #[test]
    fn malformed_greeting() {
        let fixture = Fixture::new();

        for line in ["EHLO", "EHLO a.com b.com", "EHLO -bad-.com"] {
            let mut tx = transaction();
            let response = greet(
                &fixture.engine(),
                &mut tx,
                &Command::parse(line),
                Dialect::Esmtp,
            );

            assert_eq!(response.code(), Some("500"), "{line}");
            assert_eq!(response.event, Event::ConnectionClose);
            assert!(tx.markers().is_empty());
        }
    }
}
