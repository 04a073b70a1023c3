//! ARM REST client over reqwest.
//!
//! Requests carry a bearer token, the `api-version` query parameter and a
//! fresh `x-ms-client-request-id`. Transient failures are retried according to
//! the configured [`RetryPolicy`]; long-running writes are polled to
//! completion with the configured [`PollPolicy`].

use super::lro::{poll_until_done, OperationStatus, PollPolicy};
use super::{ClientFactory, Precondition, ResourceClient};
use crate::config::{ArmConfig, Config};
use crate::error::{Error, RemoteErrorKind, RemoteOperationError, Result};
use crate::reconcile::{FetchResult, ObservedState};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const ASYNC_OPERATION: &str = "azure-asyncoperation";
const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

#[derive(Debug, Deserialize)]
struct ArmErrorBody {
    error: ArmErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ArmErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Where to look for the outcome of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollTarget {
    /// `Azure-AsyncOperation` status resource
    AsyncOperation(Url),
    /// `Location` header; 202 while running
    Location(Url),
    /// The resource itself, via `properties.provisioningState`
    Resource,
}

/// Shared HTTP settings for every client a factory hands out.
#[derive(Clone)]
struct Transport {
    http: Client,
    endpoint: Url,
    token: Option<String>,
    retry: RetryPolicy,
    polling: PollPolicy,
    cancel: CancellationToken,
}

/// Client for one API version of the ARM control plane.
#[derive(Clone)]
pub struct ArmClient {
    transport: Transport,
    provider: String,
    api_version: String,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.transport.endpoint.as_str())
            .field("provider", &self.provider)
            .field("api_version", &self.api_version)
            .field("token", &self.transport.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ArmClient {
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    fn resource_url(&self, id: &str) -> Result<Url> {
        let mut url = self
            .transport
            .endpoint
            .join(id.trim_start_matches('/'))
            .map_err(|e| {
                Error::invalid_argument("id", format!("invalid resource id '{id}': {e}"))
            })?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    /// Send one request and turn non-success statuses into errors.
    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        precondition: &Precondition,
    ) -> Result<Response> {
        let request_id = Uuid::new_v4().to_string();
        debug!(%method, %url, request_id = %request_id, "sending ARM request");

        let mut request = self
            .transport
            .http
            .request(method, url)
            .header(CLIENT_REQUEST_ID, &request_id);
        if let Some(token) = &self.transport.token {
            request = request.bearer_auth(token);
        }
        if let Some((name, value)) = precondition.header() {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await.into())
        }
    }

    /// Send with transport-level retries.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        precondition: &Precondition,
    ) -> Result<Response> {
        let name = method.to_string();
        self.transport
            .retry
            .execute(&self.transport.cancel, &name, || {
                self.send_once(method.clone(), url.clone(), body, precondition)
            })
            .await
    }

    async fn get_value(&self, id: &str) -> Result<Value> {
        let response = self
            .send(Method::GET, self.resource_url(id)?, None, &Precondition::None)
            .await?;
        read_json(response).await
    }

    /// Finish a write: poll when the service answered asynchronously, then
    /// return the resource as it is now.
    async fn complete_write(&self, id: &str, operation: &str, response: Response) -> Result<Value> {
        let status = response.status();
        let target = poll_target(status, response.headers());
        let retry_after = retry_after(response.headers());
        let body = read_json(response).await?;

        let target = match target {
            Some(target) => target,
            None if is_provisioning(&body) => PollTarget::Resource,
            None => return Ok(body),
        };

        info!(id, operation, "waiting for long-running operation");
        self.wait(id, operation, &target, retry_after).await?;
        self.get_value(id).await
    }

    async fn wait(
        &self,
        id: &str,
        operation: &str,
        target: &PollTarget,
        first_retry_after: Option<Duration>,
    ) -> Result<()> {
        let mut hint = first_retry_after;
        poll_until_done(
            &self.transport.polling,
            &self.transport.cancel,
            operation,
            || {
                let suggested = hint.take();
                async move {
                    let status = self.check(id, target).await?;
                    Ok::<_, Error>(match status {
                        OperationStatus::InProgress { retry_after } => OperationStatus::InProgress {
                            retry_after: retry_after.or(suggested),
                        },
                        other => other,
                    })
                }
            },
        )
        .await
    }

    async fn check(&self, id: &str, target: &PollTarget) -> Result<OperationStatus> {
        match target {
            PollTarget::AsyncOperation(url) => {
                let response = self
                    .send(Method::GET, url.clone(), None, &Precondition::None)
                    .await?;
                let retry_after = retry_after(response.headers());
                let body = read_json(response).await?;
                Ok(status_from_body(&body, retry_after))
            }
            PollTarget::Location(url) => {
                let response = self
                    .send(Method::GET, url.clone(), None, &Precondition::None)
                    .await?;
                if response.status() == StatusCode::ACCEPTED {
                    Ok(OperationStatus::InProgress {
                        retry_after: retry_after(response.headers()),
                    })
                } else {
                    Ok(OperationStatus::Succeeded)
                }
            }
            PollTarget::Resource => {
                let body = self.get_value(id).await?;
                let state = body
                    .pointer("/properties/provisioningState")
                    .and_then(Value::as_str)
                    .unwrap_or("Succeeded");
                Ok(OperationStatus::from_arm(state, None))
            }
        }
    }
}

#[async_trait]
impl ResourceClient for ArmClient {
    async fn get(&self, id: &str) -> FetchResult {
        match self.get_value(id).await {
            Ok(value) => FetchResult::Found(ObservedState::new(value)),
            Err(Error::Remote(e)) if e.kind == RemoteErrorKind::NotFound => FetchResult::NotFound,
            Err(Error::Remote(e)) => FetchResult::Failed(e),
            Err(other) => FetchResult::Failed(RemoteOperationError::new(
                RemoteErrorKind::Unknown,
                other.to_string(),
            )),
        }
    }

    async fn create_or_update(
        &self,
        id: &str,
        body: &Value,
        precondition: &Precondition,
    ) -> Result<Value> {
        let response = self
            .send(Method::PUT, self.resource_url(id)?, Some(body), precondition)
            .await?;
        self.complete_write(id, "create_or_update", response).await
    }

    async fn update(&self, id: &str, patch: &Value, precondition: &Precondition) -> Result<Value> {
        let response = self
            .send(Method::PATCH, self.resource_url(id)?, Some(patch), precondition)
            .await?;
        self.complete_write(id, "update", response).await
    }

    async fn delete(&self, id: &str, precondition: &Precondition) -> Result<()> {
        let response = match self
            .send(Method::DELETE, self.resource_url(id)?, None, precondition)
            .await
        {
            Ok(response) => response,
            Err(Error::Remote(e)) if e.kind == RemoteErrorKind::NotFound => {
                debug!(id, "resource already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(target) = poll_target(response.status(), response.headers()) {
            let hint = retry_after(response.headers());
            info!(id, "waiting for delete to finish");
            match self.wait(id, "delete", &target, hint).await {
                Err(Error::Remote(e)) if e.kind == RemoteErrorKind::NotFound => {}
                other => other?,
            }
        }
        Ok(())
    }
}

/// Builds [`ArmClient`]s that share one connection pool.
#[derive(Clone)]
pub struct ArmClientFactory {
    transport: Transport,
}

impl ArmClientFactory {
    pub fn new(
        arm: &ArmConfig,
        retry: RetryPolicy,
        polling: PollPolicy,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut endpoint = Url::parse(&arm.endpoint)
            .map_err(|e| Error::Config(format!("invalid ARM endpoint '{}': {e}", arm.endpoint)))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let http = Client::builder()
            .timeout(arm.request_timeout)
            .user_agent(format!("armctl/{}", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            transport: Transport {
                http,
                endpoint,
                token: arm.token.clone(),
                retry,
                polling,
                cancel,
            },
        })
    }

    /// Factory configured from the `arm`, `retry` and `polling` sections.
    pub fn from_config(config: &Config, cancel: CancellationToken) -> Result<Self> {
        Self::new(
            &config.arm,
            config.retry.clone(),
            config.polling.clone(),
            cancel,
        )
    }

    /// Concrete client, for callers that need more than the trait.
    pub fn arm_client(&self, provider: &str, api_version: &str) -> ArmClient {
        ArmClient {
            transport: self.transport.clone(),
            provider: provider.to_string(),
            api_version: api_version.to_string(),
        }
    }
}

impl ClientFactory for ArmClientFactory {
    fn client(&self, provider: &str, api_version: &str) -> Result<Arc<dyn ResourceClient>> {
        if api_version.trim().is_empty() {
            return Err(Error::Config(format!(
                "no API version configured for provider '{provider}'"
            )));
        }
        Ok(Arc::new(self.arm_client(provider, api_version)))
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    RemoteOperationError::new(RemoteErrorKind::Unknown, format!("request failed: {err}")).into()
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn poll_target(status: StatusCode, headers: &HeaderMap) -> Option<PollTarget> {
    if status != StatusCode::CREATED && status != StatusCode::ACCEPTED {
        return None;
    }
    let header_url = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Url::parse(v).ok())
    };
    if let Some(url) = header_url(ASYNC_OPERATION) {
        return Some(PollTarget::AsyncOperation(url));
    }
    if let Some(url) = header_url(LOCATION.as_str()) {
        return Some(PollTarget::Location(url));
    }
    (status == StatusCode::ACCEPTED).then_some(PollTarget::Resource)
}

fn is_provisioning(body: &Value) -> bool {
    body.pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .map(|state| !OperationStatus::from_arm(state, None).is_terminal())
        .unwrap_or(false)
}

fn status_from_body(body: &Value, retry_after: Option<Duration>) -> OperationStatus {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("InProgress");
    let message = body.pointer("/error/message").and_then(Value::as_str);
    match OperationStatus::from_arm(status, message) {
        OperationStatus::InProgress { .. } => OperationStatus::InProgress { retry_after },
        other => other,
    }
}

/// Response body as JSON. A body the service should never send (an HTML page
/// from a gateway, say) is a failed request, not bad input.
async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport_error)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| {
        RemoteOperationError::new(
            RemoteErrorKind::Unknown,
            format!("response body is not valid JSON: {e}"),
        )
        .with_status(status.as_u16())
        .into()
    })
}

async fn error_from_response(response: Response) -> RemoteOperationError {
    let status = response.status();
    let hint = retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();

    let mut error = match serde_json::from_str::<ArmErrorBody>(&text) {
        Ok(ArmErrorBody { error }) => {
            let message = error.message.unwrap_or_else(|| {
                status.canonical_reason().unwrap_or("request failed").to_string()
            });
            let remote = RemoteOperationError::from_status(status.as_u16(), message);
            match error.code {
                Some(code) => remote.with_code(code),
                None => remote,
            }
        }
        Err(_) if text.trim().is_empty() => RemoteOperationError::from_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("request failed"),
        ),
        Err(_) => RemoteOperationError::from_status(status.as_u16(), text),
    };
    if let Some(delay) = hint {
        error = error.with_retry_after(delay);
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_poll_target_prefers_async_operation() {
        let mut headers = HeaderMap::new();
        headers.insert(
            ASYNC_OPERATION,
            HeaderValue::from_static("https://management.azure.com/operations/1"),
        );
        headers.insert(
            LOCATION,
            HeaderValue::from_static("https://management.azure.com/results/1"),
        );
        assert!(matches!(
            poll_target(StatusCode::CREATED, &headers),
            Some(PollTarget::AsyncOperation(_))
        ));

        headers.remove(ASYNC_OPERATION);
        assert!(matches!(
            poll_target(StatusCode::ACCEPTED, &headers),
            Some(PollTarget::Location(_))
        ));
        assert_eq!(poll_target(StatusCode::OK, &headers), None);
    }

    #[test]
    fn test_accepted_without_headers_polls_resource() {
        assert_eq!(
            poll_target(StatusCode::ACCEPTED, &HeaderMap::new()),
            Some(PollTarget::Resource)
        );
        assert_eq!(poll_target(StatusCode::CREATED, &HeaderMap::new()), None);
    }

    #[test]
    fn test_status_from_body() {
        assert_eq!(
            status_from_body(&json!({"status": "Succeeded"}), None),
            OperationStatus::Succeeded
        );
        assert_eq!(
            status_from_body(
                &json!({
                    "status": "Failed",
                    "error": {"code": "Quota", "message": "quota exceeded"}
                }),
                None
            ),
            OperationStatus::Failed("quota exceeded".into())
        );
        assert_eq!(
            status_from_body(&json!({"status": "InProgress"}), Some(Duration::from_secs(3))),
            OperationStatus::InProgress {
                retry_after: Some(Duration::from_secs(3))
            }
        );
    }

    #[test]
    fn test_is_provisioning() {
        assert!(is_provisioning(&json!({"properties": {"provisioningState": "Creating"}})));
        assert!(!is_provisioning(&json!({"properties": {"provisioningState": "Succeeded"}})));
        assert!(!is_provisioning(&json!({"name": "rg"})));
    }

    #[test]
    fn test_debug_redacts_token() {
        let arm = ArmConfig {
            token: Some("secret-token".into()),
            ..ArmConfig::default()
        };
        let factory = ArmClientFactory::new(
            &arm,
            RetryPolicy::no_retry(),
            PollPolicy::default(),
            CancellationToken::new(),
        )
        .unwrap();
        let client = factory.arm_client("Microsoft.Resources", "2021-04-01");
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_resource_url_carries_api_version() {
        let factory = ArmClientFactory::new(
            &ArmConfig::default(),
            RetryPolicy::no_retry(),
            PollPolicy::default(),
            CancellationToken::new(),
        )
        .unwrap();
        let client = factory.arm_client("Microsoft.Resources", "2021-04-01");
        let url = client
            .resource_url("/subscriptions/sub/resourcegroups/rg")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://management.azure.com/subscriptions/sub/resourcegroups/rg?api-version=2021-04-01"
        );
    }
}
