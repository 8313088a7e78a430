use inbound_common::{internal, status::Status};

use super::{Engine, Response};
use crate::{
    address::process_recipient,
    command::Command,
    extensions::{RcptToContext, fold},
    transaction::{Marker, Transaction},
};

/// `RCPT TO`. Unlike the other sequencing errors, a missing `MAIL FROM`
/// leaves the connection open.
pub async fn rcpt_to(engine: &Engine<'_>, tx: &mut Transaction, command: &Command) -> Response {
    if !tx.has_marker(Marker::MailFrom) {
        return engine.keep(Status::InvalidCommandSequence);
    }

    let recipient = match process_recipient(command.raw()) {
        Ok(recipient) => recipient,
        Err(err) => {
            internal!(level = DEBUG, "Invalid recipient in '{}': {err}", command.raw());
            return engine.close(Status::MailboxNameNotAllowed);
        }
    };

    let action = fold::rcpt_to(
        engine.registry.rcpt_to(),
        RcptToContext {
            transaction: tx,
            recipient: &recipient,
            config: engine.config,
            raw: command.raw(),
        },
    )
    .await;

    if !action.is_allow() {
        internal!(level = INFO, "Recipient {recipient} denied");
        return engine.keep(Status::MailboxBusy);
    }

    tx.add_recipient(recipient);
    tx.push_marker(Marker::RcptTo);
    engine.keep(Status::Ok)
}
