//! Helpers shared by the binaries.

pub mod bootstrap;
pub mod retry;
