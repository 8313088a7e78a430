//! TLS material for implicit TLS listeners and STARTTLS upgrades.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Paths to a PEM encoded certificate chain and its private key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsContext {
    pub certificate: PathBuf,
    pub key: PathBuf,
}
