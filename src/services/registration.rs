//! Requester side of user creation, as used by a registration front end.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::users::{CreateUserRequest, CreatedUser};
use crate::rpc::{RpcClient, RpcError};

/// Name reported in errors originating from the user service.
pub const USER_SERVICE: &str = "user_service";

/// Failure of a call into another service, shaped for an HTTP edge.
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    /// Broker down or no reply in time.
    #[error("{service} is unavailable: {source}")]
    Unavailable {
        service: &'static str,
        #[source]
        source: RpcError,
    },

    /// The service answered with a business failure.
    #[error("{service} rejected the request ({status}): {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// The reply could not be encoded or understood.
    #[error("{service} broke the reply contract: {source}")]
    Contract {
        service: &'static str,
        #[source]
        source: RpcError,
    },
}

impl IntegrationError {
    pub fn http_status(&self) -> u16 {
        match self {
            IntegrationError::Unavailable { .. } => 503,
            IntegrationError::Rejected { status, .. } => *status,
            IntegrationError::Contract { .. } => 502,
        }
    }

    fn from_rpc(service: &'static str, source: RpcError) -> Self {
        if source.is_retryable() {
            IntegrationError::Unavailable { service, source }
        } else {
            IntegrationError::Contract { service, source }
        }
    }
}

/// Typed client for the user service's creation queue.
pub struct UserServiceClient {
    rpc: Arc<RpcClient>,
    queue: String,
    timeout: Duration,
}

impl UserServiceClient {
    pub fn new(rpc: Arc<RpcClient>, queue: impl Into<String>, timeout: Duration) -> Self {
        Self {
            rpc,
            queue: queue.into(),
            timeout,
        }
    }

    pub async fn create_user(
        &self,
        request: &CreateUserRequest,
    ) -> Result<CreatedUser, IntegrationError> {
        let reply = self
            .rpc
            .call_json::<_, CreatedUser>(&self.queue, request, self.timeout)
            .await
            .map_err(|e| {
                warn!(username = %request.username, error = %e, "User creation call failed");
                IntegrationError::from_rpc(USER_SERVICE, e)
            })?
            .into_result()
            .map_err(|e| {
                warn!(username = %request.username, error = %e, "User service broke reply contract");
                IntegrationError::from_rpc(USER_SERVICE, e)
            })?;

        match reply {
            Ok(created) => {
                info!(
                    username = %request.username,
                    user_id = %created.created_user_id,
                    "Registered user"
                );
                Ok(created)
            }
            Err(remote) => Err(IntegrationError::Rejected {
                service: USER_SERVICE,
                status: remote.http_status(),
                message: remote.message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Delivery, Envelope, MockBroker};
    use crate::services::users::Gender;
    use serde_json::json;

    const QUEUE: &str = "user_creation_queue";

    fn alice() -> CreateUserRequest {
        CreateUserRequest {
            username: "alice".to_string(),
            gender: Gender::Female,
            age: 30,
        }
    }

    /// Publish `body` as the reply to the single request seen so far.
    async fn answer(broker: &MockBroker, rpc: &RpcClient, body: serde_json::Value) {
        broker.wait_for_published(1).await;
        let (_, request) = broker.take_published().await.remove(0);
        let reply = Envelope::reply(
            request.correlation_id,
            serde_json::to_vec(&body).unwrap(),
        );
        let reply_queue = rpc.reply_queue().unwrap().to_string();
        broker.deliver(&reply_queue, Delivery::new(reply)).await;
    }

    fn setup() -> (Arc<MockBroker>, Arc<RpcClient>, UserServiceClient) {
        let broker = Arc::new(MockBroker::new());
        let rpc = Arc::new(RpcClient::new(broker.clone()));
        let client = UserServiceClient::new(rpc.clone(), QUEUE, Duration::from_secs(2));
        (broker, rpc, client)
    }

    #[tokio::test]
    async fn test_create_user_success() {
        let (broker, rpc, client) = setup();

        let request = alice();
        let (result, _) = tokio::join!(
            client.create_user(&request),
            answer(&broker, &rpc, json!({"result": {"created_user_id": "U1"}, "error": null}))
        );

        assert_eq!(result.unwrap().created_user_id, "U1");
    }

    #[tokio::test]
    async fn test_conflict_maps_to_status() {
        let (broker, rpc, client) = setup();

        let request = alice();
        let (result, _) = tokio::join!(
            client.create_user(&request),
            answer(
                &broker,
                &rpc,
                json!({
                    "result": null,
                    "error": {"kind": "conflict", "message": "username already exists", "status_hint": 409}
                })
            )
        );

        match result.unwrap_err() {
            err @ IntegrationError::Rejected { .. } => {
                assert_eq!(err.http_status(), 409);
                assert!(err.to_string().contains("username already exists"));
            }
            other => panic!("expected rejection, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_broker_down_is_unavailable() {
        let (broker, _rpc, client) = setup();
        broker.set_fail_on_connect(true).await;

        let err = client.create_user(&alice()).await.unwrap_err();
        assert!(matches!(err, IntegrationError::Unavailable { .. }));
        assert_eq!(err.http_status(), 503);
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let broker = Arc::new(MockBroker::new());
        let rpc = Arc::new(RpcClient::new(broker));
        let client = UserServiceClient::new(rpc.clone(), QUEUE, Duration::from_millis(50));

        let err = client.create_user(&alice()).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(rpc.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_reply_shape_is_contract_error() {
        let (broker, rpc, client) = setup();

        let request = alice();
        let (result, _) = tokio::join!(
            client.create_user(&request),
            answer(&broker, &rpc, json!({"result": {"id": 7}, "error": null}))
        );

        let err = result.unwrap_err();
        assert!(matches!(err, IntegrationError::Contract { .. }));
        assert_eq!(err.http_status(), 502);
    }

    #[tokio::test]
    async fn test_reply_without_result_or_error_is_contract_error() {
        let (broker, rpc, client) = setup();

        let request = alice();
        let (result, _) = tokio::join!(
            client.create_user(&request),
            answer(&broker, &rpc, json!({"result": null, "error": null}))
        );

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            IntegrationError::Contract {
                source: RpcError::MalformedReply(_),
                ..
            }
        ));
        assert_eq!(err.http_status(), 502);
    }
}
