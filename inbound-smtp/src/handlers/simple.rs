use inbound_common::status::Status;

use super::{Engine, Response};
use crate::{
    command::Verb,
    extensions::{Notification, NotifyContext, fold},
    transaction::Transaction,
};

async fn notify(engine: &Engine<'_>, tx: &Transaction, notification: Notification) {
    fold::notify(
        engine.registry.notify(notification),
        NotifyContext {
            notification,
            transaction: tx,
            config: engine.config,
        },
    )
    .await;
}

pub async fn noop(engine: &Engine<'_>, tx: &Transaction) -> Response {
    notify(engine, tx, Notification::Noop).await;
    engine.keep(Status::Ok)
}

pub async fn quit(engine: &Engine<'_>, tx: &mut Transaction) -> Response {
    notify(engine, tx, Notification::Quit).await;
    tx.close();
    engine.close(Status::GoodBye)
}

/// Every command the server understands, builtin ones first.
pub fn help(engine: &Engine<'_>) -> Response {
    let commands = Verb::ALL
        .iter()
        .map(|verb| verb.as_str())
        .chain(engine.registry.custom_names());

    Response::keep(
        engine
            .catalog
            .render_list(Status::HelpHeader, commands, "HELP"),
    )
}
