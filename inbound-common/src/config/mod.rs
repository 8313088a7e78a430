//! Configuration types shared by every protocol.
//!
//! - [`timeouts`]: idle and absolute connection timeouts
//! - [`tls`]: certificate and key material

pub mod timeouts;
pub mod tls;

pub use timeouts::SessionTimeouts;
pub use tls::TlsContext;
