//! Extensions shipped with the engine.

use std::sync::Arc;

use async_trait::async_trait;
use inbound_common::internal;

use super::{Action, Hook, MailFromContext, MailFromExtension, Registry};
use crate::{config::SmtpConfig, error::RegistryError};

pub const DECLARED_SIZE: &str = "BUILTIN-MAILFROM-DECLARED-SIZE";

/// Rejects a sender whose `SIZE=` is larger than the message size limit,
/// before any of the message is transferred.
#[derive(Debug, Default)]
pub struct DeclaredSize;

#[async_trait]
impl MailFromExtension for DeclaredSize {
    async fn check(&self, ctx: MailFromContext<'_>) -> anyhow::Result<Option<Action>> {
        let max = ctx.config.max_message_size;

        Ok(match ctx.sender.size {
            Some(declared) if max > 0 && usize::try_from(declared).is_ok_and(|size| size > max) => {
                internal!(
                    level = INFO,
                    "Declared size {declared} exceeds maximum of {max}"
                );
                Some(Action::DenyFinal)
            }
            _ => None,
        })
    }
}

/// Register the builtin extensions `config` asks for.
///
/// # Errors
/// If an id used by a builtin extension has already been taken
pub fn bootstrap(registry: &mut Registry, config: &SmtpConfig) -> Result<(), RegistryError> {
    if config.policy.enforce_declared_size && !registry.extension_exists(&[DECLARED_SIZE]) {
        registry.register(Hook::MailFrom(Arc::new(DeclaredSize)), Some(DECLARED_SIZE))?;
    }

    Ok(())
}
