//! User records and the user-creation responder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::StoreError;
use crate::rpc::{ErrorKind, Operation, OperationError, RemoteError, RpcClient, RpcError};

/// Longest accepted username.
pub const MAX_USERNAME_LEN: usize = 50;
/// Accepted age range, inclusive.
pub const MIN_AGE: i64 = 18;
pub const MAX_AGE: i64 = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

/// Body of a user-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub gender: Gender,
    pub age: i64,
}

impl CreateUserRequest {
    /// Check field constraints, reporting the first violation.
    pub fn validate(&self) -> Result<(), RemoteError> {
        if self.username.is_empty() || self.username.chars().count() > MAX_USERNAME_LEN {
            return Err(RemoteError::new(
                ErrorKind::InvalidRequest,
                format!("username must be 1 to {} characters", MAX_USERNAME_LEN),
            ));
        }
        if !(MIN_AGE..=MAX_AGE).contains(&self.age) {
            return Err(RemoteError::new(
                ErrorKind::InvalidRequest,
                format!("age must be between {} and {}", MIN_AGE, MAX_AGE),
            ));
        }
        Ok(())
    }
}

/// Result of a successful user creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedUser {
    pub created_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub gender: Gender,
    pub age: i64,
}

/// Storage for user records. Usernames are unique.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, request: CreateUserRequest) -> Result<Uuid, StoreError>;
    async fn get(&self, id: Uuid) -> Result<User, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, request: CreateUserRequest) -> Result<Uuid, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == request.username) {
            return Err(StoreError::AlreadyExists(request.username));
        }

        let id = Uuid::new_v4();
        users.insert(
            id,
            User {
                id,
                username: request.username,
                gender: request.gender,
                age: request.age,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<User, StoreError> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// Responder operation creating a user per request.
pub struct CreateUserOperation {
    store: Arc<dyn UserStore>,
}

impl CreateUserOperation {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Operation for CreateUserOperation {
    type Request = CreateUserRequest;
    type Response = CreatedUser;

    async fn execute(&self, request: CreateUserRequest) -> Result<CreatedUser, OperationError> {
        request.validate()?;

        let username = request.username.clone();
        match self.store.create(request).await {
            Ok(id) => {
                info!(username = %username, user_id = %id, "Created user");
                Ok(CreatedUser {
                    created_user_id: id.simple().to_string(),
                })
            }
            Err(StoreError::AlreadyExists(_)) => {
                Err(RemoteError::conflict("username already exists")
                    .with_status_hint(409)
                    .into())
            }
            Err(e) => Err(OperationError::Unexpected(e.to_string())),
        }
    }
}

/// Errors of [`UserService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Unable to find user with id - {0}")]
    NotFound(Uuid),

    #[error("Unable to send message, publisher unavailable: {0}")]
    Broker(#[source] RpcError),
}

/// Message asking the notes service to drop everything a user owned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUserNotes {
    pub user_id: String,
}

/// User operations that notify other services.
pub struct UserService {
    store: Arc<dyn UserStore>,
    rpc: Arc<RpcClient>,
    delete_notes_queue: String,
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        rpc: Arc<RpcClient>,
        delete_notes_queue: impl Into<String>,
    ) -> Self {
        Self {
            store,
            rpc,
            delete_notes_queue: delete_notes_queue.into(),
        }
    }

    /// Delete a user after announcing it to the notes service.
    ///
    /// The user is kept when the announcement cannot be published.
    pub async fn delete(&self, user_id: Uuid) -> Result<(), UserServiceError> {
        self.store
            .get(user_id)
            .await
            .map_err(|_| UserServiceError::NotFound(user_id))?;

        let message = DeleteUserNotes {
            user_id: user_id.simple().to_string(),
        };
        self.rpc
            .cast_json(&self.delete_notes_queue, &message)
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, error = %e, "Unable to announce user deletion");
                UserServiceError::Broker(e)
            })?;

        self.store
            .delete(user_id)
            .await
            .map_err(|_| UserServiceError::NotFound(user_id))?;

        info!(user_id = %user_id, "Deleted user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    fn alice() -> CreateUserRequest {
        CreateUserRequest {
            username: "alice".to_string(),
            gender: Gender::Female,
            age: 30,
        }
    }

    #[test]
    fn test_request_decodes_from_wire() {
        let request: CreateUserRequest =
            serde_json::from_str(r#"{"username":"alice","gender":"female","age":30}"#).unwrap();
        assert_eq!(request, alice());
    }

    #[test]
    fn test_unknown_gender_is_rejected_at_decode() {
        let result: Result<CreateUserRequest, _> =
            serde_json::from_str(r#"{"username":"alice","gender":"robot","age":30}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_age_range() {
        let mut request = alice();
        request.age = 17;
        assert_eq!(
            request.validate().unwrap_err().kind,
            ErrorKind::InvalidRequest
        );
        request.age = 110;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_ages_decode_and_fail_validation() {
        for age in [300, -1] {
            let request: CreateUserRequest = serde_json::from_value(serde_json::json!({
                "username": "alice",
                "gender": "female",
                "age": age,
            }))
            .unwrap();
            assert_eq!(
                request.validate().unwrap_err().kind,
                ErrorKind::InvalidRequest
            );
        }
    }

    #[test]
    fn test_validate_username_length() {
        let mut request = alice();
        request.username = "x".repeat(MAX_USERNAME_LEN + 1);
        assert!(request.validate().is_err());
        request.username = "x".repeat(MAX_USERNAME_LEN);
        assert!(request.validate().is_ok());
        request.username = String::new();
        assert!(request.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_user_returns_hex_id() {
        let store = Arc::new(InMemoryUserStore::new());
        let operation = CreateUserOperation::new(store.clone());

        let created = operation.execute(alice()).await.unwrap();

        let id = Uuid::parse_str(&created.created_user_id).unwrap();
        assert_eq!(created.created_user_id.len(), 32);
        assert_eq!(store.get(id).await.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_create_duplicate_user_conflicts() {
        let store = Arc::new(InMemoryUserStore::new());
        let operation = CreateUserOperation::new(store.clone());
        operation.execute(alice()).await.unwrap();

        match operation.execute(alice()).await {
            Err(OperationError::Rejected(error)) => {
                assert_eq!(error.kind, ErrorKind::Conflict);
                assert_eq!(error.message, "username already exists");
                assert_eq!(error.http_status(), 409);
            }
            other => panic!("expected conflict, got {:?}", other.map(|_| ())),
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_create_invalid_user_is_rejected() {
        let operation = CreateUserOperation::new(Arc::new(InMemoryUserStore::new()));
        let mut request = alice();
        request.age = 5;

        assert!(matches!(
            operation.execute(request).await,
            Err(OperationError::Rejected(RemoteError {
                kind: ErrorKind::InvalidRequest,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_delete_announces_then_removes() {
        let store = Arc::new(InMemoryUserStore::new());
        let broker = Arc::new(MockBroker::new());
        let rpc = Arc::new(RpcClient::new(broker.clone()));
        let service = UserService::new(store.clone(), rpc, "delete_notes_queue");

        let id = store.create(alice()).await.unwrap();
        service.delete(id).await.unwrap();

        assert!(store.is_empty().await);
        let published = broker.take_published().await;
        assert_eq!(published[0].0, "delete_notes_queue");
        let message: DeleteUserNotes = serde_json::from_slice(&published[0].1.body).unwrap();
        assert_eq!(message.user_id, id.simple().to_string());
    }

    #[tokio::test]
    async fn test_delete_keeps_user_when_broker_down() {
        let store = Arc::new(InMemoryUserStore::new());
        let broker = Arc::new(MockBroker::new());
        broker.set_fail_on_connect(true).await;
        let rpc = Arc::new(RpcClient::new(broker));
        let service = UserService::new(store.clone(), rpc, "delete_notes_queue");

        let id = store.create(alice()).await.unwrap();
        let result = service.delete(id).await;

        assert!(matches!(result, Err(UserServiceError::Broker(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_user() {
        let broker = Arc::new(MockBroker::new());
        let service = UserService::new(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(RpcClient::new(broker.clone())),
            "delete_notes_queue",
        );

        let result = service.delete(Uuid::new_v4()).await;
        assert!(matches!(result, Err(UserServiceError::NotFound(_))));
        assert_eq!(broker.published_count().await, 0);
    }
}
