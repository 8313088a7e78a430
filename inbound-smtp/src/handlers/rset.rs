use inbound_common::status::Status;

use super::{Engine, Response};
use crate::{
    extensions::{Notification, NotifyContext, fold},
    transaction::{Marker, Transaction},
};

/// `RSET` swaps in a fresh transaction that remembers the greeting.
pub async fn rset(engine: &Engine<'_>, tx: &mut Transaction) -> Response {
    if !tx.markers().any(&[Marker::Helo, Marker::Ehlo]) {
        return engine.close(Status::InvalidCommandSequence);
    }

    fold::notify(
        engine.registry.notify(Notification::Rset),
        NotifyContext {
            notification: Notification::Rset,
            transaction: tx,
            config: engine.config,
        },
    )
    .await;

    tx.close();
    *tx = tx.successor(true);
    tx.push_marker(Marker::Rset);

    engine.keep(Status::Ok)
}
