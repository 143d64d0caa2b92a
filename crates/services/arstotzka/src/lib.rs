//! HTTP client for the arstotzka cross-service coordinator.
//!
//! Implements the four [`Mediator`] operations the replication engine uses:
//! reserving the service lease, creating an action for a sequence
//! advancement, transitioning the action to a terminal status, and releasing
//! the lease.

use std::time::Duration;

use osmdbt_replication::{
    mediator::{ActionId, ActionUpdate, Mediator, MediatorError},
    sequence::Sequence,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

/// Connection options for the coordinator.
#[derive(Debug, Clone)]
pub struct ArstotzkaOptions {
    /// Coordinator base URL.
    pub url: String,
    /// Identifier under which this service reserves access.
    pub service_id: String,
    pub timeout: Duration,
}

/// A [`Mediator`] backed by the arstotzka HTTP API.
#[derive(Debug, Clone)]
pub struct ArstotzkaMediator {
    client: reqwest::Client,
    base_url: Url,
    service_id: String,
}

impl ArstotzkaMediator {
    pub fn new(options: &ArstotzkaOptions) -> Result<Self, ArstotzkaError> {
        // A trailing slash makes `Url::join` treat the base as a directory.
        let mut base = options.url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(ArstotzkaError::InvalidUrl)?;

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(ArstotzkaError::Client)?;

        Ok(Self {
            client,
            base_url,
            service_id: options.service_id.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ArstotzkaError> {
        self.base_url
            .join(path)
            .map_err(ArstotzkaError::InvalidUrl)
    }

    /// Fails with [`ArstotzkaError::Response`] on non-2xx, attaching the
    /// response body for the log line.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ArstotzkaError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ArstotzkaError::Response { status, body })
    }
}

#[derive(Serialize)]
struct CreateActionRequest {
    state: u64,
}

#[derive(Deserialize)]
struct CreateActionResponse {
    id: String,
}

#[derive(Serialize)]
struct UpdateActionRequest {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<serde_json::Value>,
}

impl Mediator for ArstotzkaMediator {
    async fn reserve_access(&self) -> Result<(), MediatorError> {
        let url = self
            .endpoint(&format!("services/{}/reserve", self.service_id))
            .map_err(into_mediator_error)?;
        tracing::debug!(%url, "reserving service access");

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|err| into_mediator_error(ArstotzkaError::Request(err)))?;
        Self::check(response).await.map_err(into_mediator_error)?;
        Ok(())
    }

    async fn create_action(&self, state: Sequence) -> Result<ActionId, MediatorError> {
        let url = self
            .endpoint(&format!("services/{}/actions", self.service_id))
            .map_err(into_mediator_error)?;
        tracing::debug!(%url, %state, "creating action");

        let response = self
            .client
            .post(url)
            .json(&CreateActionRequest {
                state: state.value(),
            })
            .send()
            .await
            .map_err(|err| into_mediator_error(ArstotzkaError::Request(err)))?;
        let response = Self::check(response).await.map_err(into_mediator_error)?;

        let created: CreateActionResponse = response
            .json()
            .await
            .map_err(|err| into_mediator_error(ArstotzkaError::InvalidResponse(err)))?;
        Ok(ActionId::new(created.id))
    }

    async fn update_action(
        &self,
        action: &ActionId,
        update: ActionUpdate,
    ) -> Result<(), MediatorError> {
        let url = self
            .endpoint(&format!("actions/{}", action.as_str()))
            .map_err(into_mediator_error)?;
        tracing::debug!(%url, status = update.status.as_str(), "updating action");

        let response = self
            .client
            .patch(url)
            .json(&UpdateActionRequest {
                status: update.status.as_str(),
                error: update.error,
                info: update.info,
            })
            .send()
            .await
            .map_err(|err| into_mediator_error(ArstotzkaError::Request(err)))?;
        Self::check(response).await.map_err(into_mediator_error)?;
        Ok(())
    }

    async fn remove_lock(&self) -> Result<(), MediatorError> {
        let url = self
            .endpoint(&format!("services/{}/lock", self.service_id))
            .map_err(into_mediator_error)?;
        tracing::debug!(%url, "releasing service lock");

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|err| into_mediator_error(ArstotzkaError::Request(err)))?;
        Self::check(response).await.map_err(into_mediator_error)?;
        Ok(())
    }
}

fn into_mediator_error(err: ArstotzkaError) -> MediatorError {
    MediatorError(Box::new(err))
}

/// Errors from the coordinator client.
#[derive(Debug, thiserror::Error)]
pub enum ArstotzkaError {
    #[error("invalid mediator url: {0}")]
    InvalidUrl(#[source] url::ParseError),

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request could not be sent or timed out.
    #[error("mediator request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The coordinator rejected the request.
    #[error("mediator responded with {status}: {body}")]
    Response { status: StatusCode, body: String },

    /// The coordinator responded 2xx but with an unusable body.
    #[error("mediator response was not valid JSON: {0}")]
    InvalidResponse(#[source] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mediator(url: &str) -> ArstotzkaMediator {
        ArstotzkaMediator::new(&ArstotzkaOptions {
            url: url.to_string(),
            service_id: "osmdbt".to_string(),
            timeout: Duration::from_secs(5),
        })
        .expect("valid options")
    }

    #[test]
    fn endpoints_are_joined_under_the_base_url() {
        //* Given
        let mediator = mediator("http://arstotzka:8081/api/v1");

        //* Then
        assert_eq!(
            mediator.endpoint("services/osmdbt/reserve").unwrap().as_str(),
            "http://arstotzka:8081/api/v1/services/osmdbt/reserve",
        );
        assert_eq!(
            mediator.endpoint("actions/42").unwrap().as_str(),
            "http://arstotzka:8081/api/v1/actions/42",
        );
    }

    #[test]
    fn update_request_omits_empty_fields() {
        //* Given
        let request = UpdateActionRequest {
            status: "COMPLETED",
            error: None,
            info: Some(serde_json::json!({"count": 1})),
        };

        //* When
        let body = serde_json::to_value(&request).expect("serializable");

        //* Then
        assert_eq!(
            body,
            serde_json::json!({"status": "COMPLETED", "info": {"count": 1}}),
        );
    }

    #[test]
    fn rejects_unparseable_url() {
        let result = ArstotzkaMediator::new(&ArstotzkaOptions {
            url: "not a url".to_string(),
            service_id: "osmdbt".to_string(),
            timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(ArstotzkaError::InvalidUrl(_))));
    }
}
