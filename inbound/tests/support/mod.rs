//! Test support utilities for end-to-end testing

pub mod harness;

pub use harness::Harness;
