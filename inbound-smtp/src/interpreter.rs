//! Routes each received line to the right handler.

use inbound_common::internal;

use crate::{
    command::{Command, Verb},
    handlers::{
        Engine, Response, custom, data, greeting, mail, rcpt, rset, simple, starttls, vrfy,
    },
    transaction::{Dialect, Direction, Transaction},
};

/// Process one line, without its terminator.
///
/// While a message body is being received every line belongs to it;
/// otherwise the line is tokenized and dispatched by its verb, with
/// anything unknown handed to the custom commands. A locked transaction
/// is still busy with an earlier line, or closed, and dispatches nothing.
#[tracing::instrument(level = "trace", skip_all, fields(transaction = %tx.id()))]
pub async fn interpret(engine: &Engine<'_>, tx: &mut Transaction, line: &str) -> Response {
    if tx.is_locked() {
        internal!(level = WARN, "Transaction {} is locked, dropping line", tx.id());
        return Response::silent();
    }

    if tx.is_sending_data() {
        return data::continuation(engine, tx, line).await;
    }

    tx.record(Direction::Received, line);
    tx.lock();

    let command = Command::parse(line);
    internal!("Dispatching {}", command.name());

    let response = match command.verb() {
        Some(Verb::Helo) => greeting::greet(engine, tx, &command, Dialect::Smtp),
        Some(Verb::Ehlo) => greeting::greet(engine, tx, &command, Dialect::Esmtp),
        Some(Verb::MailFrom) => mail::mail_from(engine, tx, &command).await,
        Some(Verb::RcptTo) => rcpt::rcpt_to(engine, tx, &command).await,
        Some(Verb::Data) => data::data(engine, tx, &command).await,
        Some(Verb::Rset) => rset::rset(engine, tx).await,
        Some(Verb::Noop) => simple::noop(engine, tx).await,
        Some(Verb::Quit) => simple::quit(engine, tx).await,
        Some(Verb::Help) => simple::help(engine),
        Some(Verb::Vrfy) => vrfy::vrfy(engine, tx, &command).await,
        Some(Verb::StartTls) => starttls::starttls(engine, tx).await,
        None => custom::dispatch(engine, tx, &command).await,
    };

    tx.unlock();
    response
}
