//! Combining the answers of every extension registered for a command.
//!
//! Deciding extensions (`MAIL FROM`, `RCPT TO`, `STARTTLS`, `DATA`, `VRFY`
//! and custom commands) are awaited one after another in registration
//! order. The last action given wins, unless it is a `FINAL` one, in which
//! case the extensions after it are never invoked. Fire-and-forget
//! extensions run concurrently and are all awaited before returning.
//!
//! An extension returning an error, or panicking, is logged and treated as
//! having made no decision.

use std::panic::AssertUnwindSafe;

use futures_util::{
    FutureExt,
    future::{BoxFuture, join_all},
};
use inbound_common::internal;

use super::{
    Action, Candidate, CustomCommandHandler, CustomContext, DataContext, DataDecision,
    DataExtension, Entry, MailFromContext, MailFromExtension, NotifyContext, NotifyExtension,
    RcptToContext, RcptToExtension, Reply, StartTlsContext, StartTlsExtension, VrfyContext,
    VrfyExtension,
};
use crate::address::{Mailbox, validate_username};

async fn guard<T, F>(id: &str, call: F) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            internal!(level = WARN, "Extension {id} failed: {err:#}");
            None
        }
        Err(_) => {
            internal!(level = ERROR, "Extension {id} panicked");
            None
        }
    }
}

/// One not-yet-polled `check` per extension, with the extension's id.
type Checks<'a> = Vec<(&'a str, BoxFuture<'a, anyhow::Result<Option<Action>>>)>;

async fn actions(checks: Checks<'_>) -> Action {
    let mut outcome = Action::Allow;

    // An extension's check does nothing until awaited, so stopping here
    // means later extensions never run
    for (id, call) in checks {
        if let Some(action) = guard(id, call).await.flatten() {
            internal!("Extension {id} decided {action}");
            outcome = action;

            if action.is_final() {
                break;
            }
        }
    }

    outcome
}

pub async fn mail_from(
    entries: &[Entry<dyn MailFromExtension>],
    ctx: MailFromContext<'_>,
) -> Action {
    actions(
        entries
            .iter()
            .map(|entry| (entry.id(), entry.extension().check(ctx)))
            .collect(),
    )
    .await
}

pub async fn rcpt_to(entries: &[Entry<dyn RcptToExtension>], ctx: RcptToContext<'_>) -> Action {
    actions(
        entries
            .iter()
            .map(|entry| (entry.id(), entry.extension().check(ctx)))
            .collect(),
    )
    .await
}

pub async fn starttls(
    entries: &[Entry<dyn StartTlsExtension>],
    ctx: StartTlsContext<'_>,
) -> Action {
    actions(
        entries
            .iter()
            .map(|entry| (entry.id(), entry.extension().check(ctx)))
            .collect(),
    )
    .await
}

/// Fold `DATA` decisions. A bypass requested by any extension that ran
/// sticks, whatever the final action.
pub async fn data(entries: &[Entry<dyn DataExtension>], ctx: DataContext<'_>) -> DataDecision {
    let mut outcome = DataDecision::default();

    for entry in entries {
        let Some(decision) = guard(entry.id(), entry.extension().check(ctx)).await else {
            continue;
        };

        outcome.bypass_size_check |= decision.bypass_size_check;

        if let Some(action) = decision.action {
            internal!("Extension {} decided {action}", entry.id());
            outcome.action = Some(action);

            if action.is_final() {
                break;
            }
        }
    }

    outcome
}

fn is_valid(candidate: &Candidate) -> bool {
    Mailbox::parse(&candidate.address).is_ok()
        && candidate
            .username
            .as_deref()
            .is_none_or(validate_username)
}

/// Collect `VRFY` candidates, dropping any that are not well formed.
pub async fn vrfy(entries: &[Entry<dyn VrfyExtension>], ctx: VrfyContext<'_>) -> Vec<Candidate> {
    let mut found = Vec::new();

    for entry in entries {
        for candidate in guard(entry.id(), entry.extension().lookup(ctx))
            .await
            .unwrap_or_default()
        {
            if is_valid(&candidate) {
                found.push(candidate);
            } else {
                internal!(
                    level = WARN,
                    "Extension {} gave an invalid VRFY candidate: {candidate}",
                    entry.id()
                );
            }
        }
    }

    found
}

pub async fn notify(entries: &[Entry<dyn NotifyExtension>], ctx: NotifyContext<'_>) {
    join_all(
        entries
            .iter()
            .map(|entry| guard(entry.id(), entry.extension().notify(ctx))),
    )
    .await;
}

/// Run one custom command handler. `None` lets the next handler for the
/// same command have a go.
pub async fn custom(
    entry: &Entry<dyn CustomCommandHandler>,
    ctx: CustomContext<'_>,
) -> Option<Reply> {
    guard(entry.id(), entry.extension().handle(ctx))
        .await
        .flatten()
}
