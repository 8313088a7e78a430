pub mod controller;

pub use controller::{Inbound, SHUTDOWN_BROADCAST};
