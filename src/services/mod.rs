//! Services built on the RPC layer.
//!
//! - `users`: answers user-creation requests, announces user deletion
//! - `notes`: deletes a user's notes when told to, no reply
//! - `registration`: requester side of user creation
//!
//! Stores are in-memory; the relational repositories behind the real
//! services sit outside this crate.

pub mod notes;
pub mod registration;
pub mod users;

/// Errors reported by in-memory stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Row already exists: {0}")]
    AlreadyExists(String),

    #[error("No such row: {0}")]
    NotFound(String),
}
