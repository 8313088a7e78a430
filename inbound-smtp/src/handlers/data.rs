use inbound_common::{internal, status::Status};

use super::{Engine, Response};
use crate::{
    command::Command,
    extensions::{Action, DataContext, Notification, NotifyContext, fold},
    transaction::{Marker, Transaction},
};

/// `DATA`.
pub async fn data(engine: &Engine<'_>, tx: &mut Transaction, command: &Command) -> Response {
    let ready = tx.markers().any(&[Marker::Helo, Marker::Ehlo])
        && tx.markers().all(&[Marker::MailFrom, Marker::RcptTo])
        && !tx.markers().any(&[Marker::Data, Marker::DataDisallowed]);

    if !ready {
        return engine.close(Status::InvalidCommandSequence);
    }

    if !command.arguments().is_empty() {
        return Response::close(vec![engine.render(
            Status::InvalidParameters,
            Some(command.raw()),
        )]);
    }

    let decision = fold::data(
        engine.registry.data(),
        DataContext {
            transaction: tx,
            chunk: None,
            current_size: 0,
            total_size: 0,
            config: engine.config,
        },
    )
    .await;

    if decision.bypass_size_check {
        tx.set_bypass_size_check();
    }

    if !decision.action.is_none_or(Action::is_allow) {
        internal!(level = INFO, "DATA denied for transaction {}", tx.id());
        tx.push_marker(Marker::DataDisallowed);
        return engine.keep(Status::PolicyDeferred);
    }

    tx.begin_data();
    tx.push_marker(Marker::Data);
    engine.keep(Status::StartMailInput)
}

/// A line received while a message body is being transferred.
pub async fn continuation(engine: &Engine<'_>, tx: &mut Transaction, line: &str) -> Response {
    tx.touch();

    if line == "." {
        return complete(engine, tx).await;
    }

    // Once denied, the rest of the body is read and thrown away
    if tx.has_marker(Marker::DataDisallowed) {
        return Response::silent();
    }

    let line = line
        .strip_prefix('.')
        .filter(|rest| rest.starts_with('.'))
        .unwrap_or(line);
    let chunk = format!("{line}\r\n");
    let total_size = tx.data_size() + chunk.len();

    let decision = fold::data(
        engine.registry.data(),
        DataContext {
            transaction: tx,
            chunk: Some(&chunk),
            current_size: chunk.len(),
            total_size,
            config: engine.config,
        },
    )
    .await;

    if decision.bypass_size_check {
        tx.set_bypass_size_check();
    }

    if !decision.action.is_none_or(Action::is_allow) {
        internal!(level = INFO, "Message body denied for transaction {}", tx.id());
        tx.push_marker(Marker::DataDisallowed);
        // The buffer is known to be active here
        let _ = tx.discard_data();
        return Response::silent();
    }

    let max = engine.config.max_message_size;
    if !tx.bypass_size_check() && max > 0 && total_size > max {
        internal!(
            level = INFO,
            "Message size {total_size} exceeds maximum of {max}, closing"
        );
        let _ = tx.discard_data();
        return engine.close(Status::ExceededStorage);
    }

    match tx.append_data(chunk) {
        Ok(()) => Response::silent(),
        Err(err) => {
            internal!(level = ERROR, "{err}");
            engine.close(Status::ActionUnavailable)
        }
    }
}

/// The terminating `.` of a message body.
async fn complete(engine: &Engine<'_>, tx: &mut Transaction) -> Response {
    if let Err(err) = tx.end_data() {
        internal!(level = ERROR, "{err}");
        return engine.close(Status::ActionUnavailable);
    }

    let response = if tx.has_marker(Marker::DataDisallowed) {
        engine.keep(Status::PolicyDeferred)
    } else {
        internal!(
            level = INFO,
            "Received {} bytes from {} for {} recipient(s)",
            tx.data_size(),
            tx.sender().map_or_else(String::new, |sender| sender.address()),
            tx.recipients().len()
        );

        fold::notify(
            engine.registry.notify(Notification::Received),
            NotifyContext {
                notification: Notification::Received,
                transaction: tx,
                config: engine.config,
            },
        )
        .await;

        engine.keep(Status::Ok)
    };

    tx.close();
    *tx = tx.successor(true);
    response
}
