//! Per-connection timeout configuration.
//!
//! A session is closed when either no line has been received for
//! [`SessionTimeouts::idle`] or the connection has been open for longer than
//! [`SessionTimeouts::connection`]. Both are checked every
//! [`SessionTimeouts::tick`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimeouts {
    /// Maximum time between two received lines.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::idle_secs")]
    pub idle_secs: u64,

    /// Maximum total connection duration.
    ///
    /// Default: 900 seconds (15 minutes)
    #[serde(default = "defaults::connection_secs")]
    pub connection_secs: u64,

    /// How often the timeouts are checked.
    ///
    /// Default: 500 milliseconds
    #[serde(default = "defaults::tick_millis")]
    pub tick_millis: u64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            idle_secs: defaults::idle_secs(),
            connection_secs: defaults::connection_secs(),
            tick_millis: defaults::tick_millis(),
        }
    }
}

impl SessionTimeouts {
    #[must_use]
    pub const fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    #[must_use]
    pub const fn connection(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }

    /// The check interval, never shorter than a millisecond so the ticker
    /// cannot spin.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }
}

mod defaults {
    pub const fn idle_secs() -> u64 {
        60
    }

    pub const fn connection_secs() -> u64 {
        900
    }

    pub const fn tick_millis() -> u64 {
        500
    }
}
