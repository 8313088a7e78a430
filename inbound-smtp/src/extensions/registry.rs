use core::fmt;
use std::sync::Arc;

use ahash::AHashSet;
use inbound_common::internal;

use super::{
    CustomCommand, CustomCommandHandler, DataExtension, Hook, MailFromExtension, Notification,
    NotifyExtension, RcptToExtension, StartTlsExtension, VrfyExtension,
};
use crate::{command::Verb, error::RegistryError};

/// A registered callback and the id it was registered under.
pub struct Entry<E: ?Sized> {
    id: String,
    extension: Arc<E>,
}

impl<E: ?Sized> Entry<E> {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn extension(&self) -> &E {
        &self.extension
    }
}

impl<E: ?Sized> Clone for Entry<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            extension: Arc::clone(&self.extension),
        }
    }
}

impl<E: ?Sized> fmt::Debug for Entry<E> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("Entry").field(&self.id).finish()
    }
}

/// Every extension known to the process, in registration order.
///
/// The registry is filled in before any listener starts and is shared
/// read-only between connections afterwards.
#[derive(Default)]
pub struct Registry {
    ids: AHashSet<String>,
    generated: usize,
    mail_from: Vec<Entry<dyn MailFromExtension>>,
    rcpt_to: Vec<Entry<dyn RcptToExtension>>,
    starttls: Vec<Entry<dyn StartTlsExtension>>,
    data: Vec<Entry<dyn DataExtension>>,
    vrfy: Vec<Entry<dyn VrfyExtension>>,
    noop: Vec<Entry<dyn NotifyExtension>>,
    rset: Vec<Entry<dyn NotifyExtension>>,
    quit: Vec<Entry<dyn NotifyExtension>>,
    received: Vec<Entry<dyn NotifyExtension>>,
    custom: Vec<(CustomCommand, Entry<dyn CustomCommandHandler>)>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&mut self, kind: &str, id: Option<&str>) -> Result<String, RegistryError> {
        let id = match id {
            Some(id) if self.ids.contains(id) => {
                return Err(RegistryError::DuplicateId(id.to_string()));
            }
            Some(id) => id.to_string(),
            None => loop {
                self.generated += 1;
                let candidate = format!("{kind}-{}", self.generated);
                if !self.ids.contains(&candidate) {
                    break candidate;
                }
            },
        };

        self.ids.insert(id.clone());
        Ok(id)
    }

    /// Register `hook`, returning the id it was stored under.
    ///
    /// # Errors
    /// If `id` is already taken
    pub fn register(&mut self, hook: Hook, id: Option<&str>) -> Result<String, RegistryError> {
        let id = self.claim(hook.kind(), id)?;
        internal!(level = DEBUG, "Registering {} extension {id}", hook.kind());

        let entry_id = id.clone();
        match hook {
            Hook::MailFrom(extension) => self.mail_from.push(Entry {
                id: entry_id,
                extension,
            }),
            Hook::RcptTo(extension) => self.rcpt_to.push(Entry {
                id: entry_id,
                extension,
            }),
            Hook::StartTls(extension) => self.starttls.push(Entry {
                id: entry_id,
                extension,
            }),
            Hook::Data(extension) => self.data.push(Entry {
                id: entry_id,
                extension,
            }),
            Hook::Vrfy(extension) => self.vrfy.push(Entry {
                id: entry_id,
                extension,
            }),
            Hook::Notify(notification, extension) => {
                let list = match notification {
                    Notification::Noop => &mut self.noop,
                    Notification::Rset => &mut self.rset,
                    Notification::Quit => &mut self.quit,
                    Notification::Received => &mut self.received,
                };
                list.push(Entry {
                    id: entry_id,
                    extension,
                });
            }
        }

        Ok(id)
    }

    /// Register a handler for a verb the engine does not implement itself.
    /// Several handlers may share a command name; they run in registration
    /// order.
    ///
    /// # Errors
    /// If `id` is already taken, or the name is a builtin verb
    pub fn register_custom_command(
        &mut self,
        command: CustomCommand,
        handler: Arc<dyn CustomCommandHandler>,
        id: Option<&str>,
    ) -> Result<String, RegistryError> {
        if Verb::lookup(command.name()).is_some() {
            return Err(RegistryError::ReservedCommand(command.name().to_string()));
        }

        let id = self.claim(command.name(), id)?;
        internal!(
            level = DEBUG,
            "Registering custom command {} as {id}",
            command.name()
        );

        self.custom.push((
            command,
            Entry {
                id: id.clone(),
                extension: handler,
            },
        ));

        Ok(id)
    }

    /// Whether every one of `ids` has been registered.
    #[must_use]
    pub fn extension_exists(&self, ids: &[&str]) -> bool {
        ids.iter().all(|id| self.ids.contains(*id))
    }

    /// Fail unless every one of `dependencies` has been registered, for
    /// extensions that build on the results of others.
    ///
    /// # Errors
    /// Naming the first missing dependency
    pub fn require(&self, id: &str, dependencies: &[&str]) -> Result<(), RegistryError> {
        dependencies
            .iter()
            .find(|dependency| !self.ids.contains(**dependency))
            .map_or(Ok(()), |missing| {
                Err(RegistryError::MissingDependency {
                    id: id.to_string(),
                    missing: (*missing).to_string(),
                })
            })
    }

    #[must_use]
    pub fn mail_from(&self) -> &[Entry<dyn MailFromExtension>] {
        &self.mail_from
    }

    #[must_use]
    pub fn rcpt_to(&self) -> &[Entry<dyn RcptToExtension>] {
        &self.rcpt_to
    }

    #[must_use]
    pub fn starttls(&self) -> &[Entry<dyn StartTlsExtension>] {
        &self.starttls
    }

    #[must_use]
    pub fn data(&self) -> &[Entry<dyn DataExtension>] {
        &self.data
    }

    #[must_use]
    pub fn vrfy(&self) -> &[Entry<dyn VrfyExtension>] {
        &self.vrfy
    }

    #[must_use]
    pub fn notify(&self, notification: Notification) -> &[Entry<dyn NotifyExtension>] {
        match notification {
            Notification::Noop => &self.noop,
            Notification::Rset => &self.rset,
            Notification::Quit => &self.quit,
            Notification::Received => &self.received,
        }
    }

    /// Handlers registered for the custom command `name`, in order.
    pub fn custom_command<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a (CustomCommand, Entry<dyn CustomCommandHandler>)> + 'a {
        self.custom
            .iter()
            .filter(move |(command, _)| command.name().eq_ignore_ascii_case(name))
    }

    pub fn custom_commands(&self) -> impl Iterator<Item = &CustomCommand> {
        self.custom.iter().map(|(command, _)| command)
    }

    /// Distinct custom command names, in registration order.
    #[must_use]
    pub fn custom_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for command in self.custom_commands() {
            if !names.contains(&command.name()) {
                names.push(command.name());
            }
        }
        names
    }

    /// Distinct features advertised by custom commands, in registration order.
    #[must_use]
    pub fn features(&self) -> Vec<&str> {
        let mut features = Vec::new();
        for feature in self.custom_commands().filter_map(CustomCommand::feature) {
            if !features.contains(&feature) {
                features.push(feature);
            }
        }
        features
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Registry")
            .field("mail_from", &self.mail_from)
            .field("rcpt_to", &self.rcpt_to)
            .field("starttls", &self.starttls)
            .field("data", &self.data)
            .field("vrfy", &self.vrfy)
            .field("noop", &self.noop)
            .field("rset", &self.rset)
            .field("quit", &self.quit)
            .field("received", &self.received)
            .field(
                "custom",
                &self.custom.iter().map(|(_, entry)| entry).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
