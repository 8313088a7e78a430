use inbound_common::{internal, status::Status};

use super::{Engine, Response};
use crate::{
    extensions::{StartTlsContext, fold},
    transaction::Transaction,
};

/// `STARTTLS`. On success the transaction is replaced with one that knows
/// nothing of the plaintext conversation, and the session performs the
/// handshake once the go-ahead has been written.
pub async fn starttls(engine: &Engine<'_>, tx: &mut Transaction) -> Response {
    if !engine.tls_available || !tx.socket_mode().can_upgrade() {
        internal!(
            level = DEBUG,
            "STARTTLS unavailable in {} mode",
            tx.socket_mode()
        );
        return engine.keep(Status::TlsUnavailable);
    }

    let action = fold::starttls(
        engine.registry.starttls(),
        StartTlsContext {
            transaction: tx,
            config: engine.config,
        },
    )
    .await;

    if !action.is_allow() {
        return engine.keep(Status::TlsUnavailable);
    }

    tx.close();
    *tx = tx.successor(false);

    Response::upgrade(vec![engine.render(Status::GoAhead, None)])
}
