use inbound_common::status::Status;

use super::{Engine, Response};
use crate::{
    command::Command,
    extensions::{VrfyContext, fold},
    transaction::Transaction,
};

/// `VRFY` lists whatever the extensions could find, or falls back to 252.
pub async fn vrfy(engine: &Engine<'_>, tx: &Transaction, command: &Command) -> Response {
    let candidates = fold::vrfy(
        engine.registry.vrfy(),
        VrfyContext {
            transaction: tx,
            query: command.arguments(),
            config: engine.config,
        },
    )
    .await;

    let Some((last, rest)) = candidates.split_last() else {
        return engine.keep(Status::CannotVerify);
    };

    Response::keep(
        rest.iter()
            .map(|candidate| engine.render(Status::ListItem, Some(&candidate.to_string())))
            .chain(std::iter::once(
                engine.render(Status::ListEnd, Some(&last.to_string())),
            ))
            .collect(),
    )
}
