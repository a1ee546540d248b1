//! Notes owned by users, and the consumer that purges them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use super::users::DeleteUserNotes;
use crate::rpc::{Operation, OperationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: u64,
    pub owner_id: String,
    pub title: String,
}

/// Outcome of purging a user's notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesDeleted {
    pub deleted: usize,
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn add(&self, owner_id: &str, title: &str) -> u64;
    async fn count_by_owner(&self, owner_id: &str) -> usize;
    /// Remove every note of `owner_id`, returning how many went.
    async fn delete_all_by_owner(&self, owner_id: &str) -> usize;
}

#[derive(Default)]
pub struct InMemoryNoteStore {
    notes: RwLock<Vec<Note>>,
    next_id: AtomicU64,
}

impl InMemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NoteStore for InMemoryNoteStore {
    async fn add(&self, owner_id: &str, title: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.notes.write().await.push(Note {
            id,
            owner_id: owner_id.to_string(),
            title: title.to_string(),
        });
        id
    }

    async fn count_by_owner(&self, owner_id: &str) -> usize {
        self.notes
            .read()
            .await
            .iter()
            .filter(|n| n.owner_id == owner_id)
            .count()
    }

    async fn delete_all_by_owner(&self, owner_id: &str) -> usize {
        let mut notes = self.notes.write().await;
        let before = notes.len();
        notes.retain(|n| n.owner_id != owner_id);
        before - notes.len()
    }
}

/// Fire-and-forget consumer purging a deleted user's notes.
pub struct DeleteNotesOperation {
    store: Arc<dyn NoteStore>,
}

impl DeleteNotesOperation {
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Operation for DeleteNotesOperation {
    type Request = DeleteUserNotes;
    type Response = NotesDeleted;

    async fn execute(&self, request: DeleteUserNotes) -> Result<NotesDeleted, OperationError> {
        let deleted = self.store.delete_all_by_owner(&request.user_id).await;
        info!(user_id = %request.user_id, deleted, "Deleted user's notes");
        Ok(NotesDeleted { deleted })
    }
}
