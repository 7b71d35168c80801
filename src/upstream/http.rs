use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::client::UpstreamClient;
use super::error::UpstreamError;
use super::types::{Event, EventCode, MerchantStatus, MerchantSummary, OrderDetail, PollCategory, RawEvent};
use crate::auth::CredentialManager;
use crate::models::OrderId;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, IsTransient};

// ============================================================================
// HTTP Upstream Client
// ============================================================================
//
// reqwest client for the order and merchant APIs. Every request:
// 1. passes through the circuit breaker (only transient errors trip it)
// 2. carries a bearer token from the shared CredentialManager
// 3. maps the status code onto UpstreamError
//
// A 401 on a business endpoint means the cached token went stale before we
// expected; the credential is invalidated and the call counts as transient,
// so the next poll refreshes.
//
// ============================================================================

const ORDER_API: &str = "/order/v1.0";
const MERCHANT_API: &str = "/merchant/v1.0";

#[derive(Serialize)]
struct AckEntry<'a> {
    id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancellationRequest<'a> {
    reason: &'a str,
    cancellation_code: &'a str,
}

pub struct HttpUpstreamClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
    /// Sent as `x-polling-merchants`; empty polls every merchant of the app
    merchant_ids: Vec<String>,
    breaker: CircuitBreaker,
}

impl HttpUpstreamClient {
    pub fn new(
        base_url: &str,
        credentials: Arc<CredentialManager>,
        merchant_ids: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            merchant_ids,
            breaker: CircuitBreaker::new("upstream", CircuitBreakerConfig::default()),
        })
    }

    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new("upstream", config);
        self
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn url(&self, api: &str, path: &str) -> String {
        format!("{}{}{}", self.base_url, api, path)
    }

    async fn guarded<T, F>(&self, operation: F) -> Result<T, UpstreamError>
    where
        F: std::future::Future<Output = Result<T, UpstreamError>>,
    {
        self.breaker
            .call(|err: &UpstreamError| err.is_transient(), operation)
            .await
            .map_err(|err| match err {
                CircuitBreakerError::CircuitOpen => {
                    UpstreamError::Transient("circuit breaker open".to_string())
                }
                CircuitBreakerError::OperationFailed(err) => err,
            })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, UpstreamError> {
        let token = self.credentials.get_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            self.credentials.invalidate().await;
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

/// Map a non-success status onto the error taxonomy
fn classify_status(status: StatusCode, body: String) -> UpstreamError {
    match status {
        StatusCode::UNAUTHORIZED => UpstreamError::Transient(format!("token refused (401): {body}")),
        StatusCode::NOT_FOUND => UpstreamError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            UpstreamError::Transient(format!("status {status}: {body}"))
        }
        s if s.is_server_error() => UpstreamError::Transient(format!("status {status}: {body}")),
        s => UpstreamError::Rejected {
            status: s.as_u16(),
            body,
        },
    }
}

/// The status endpoint answers with either an object or a list of
/// per-operation objects; the first entry is the merchant's status.
fn parse_merchant_status(
    body: serde_json::Value,
    merchant_id: &str,
) -> Result<MerchantStatus, UpstreamError> {
    let value = match body {
        serde_json::Value::Array(mut entries) => {
            if entries.is_empty() {
                return Err(UpstreamError::NotFound(format!("no status for merchant {merchant_id}")));
            }
            entries.swap_remove(0)
        }
        other => other,
    };

    let mut status: MerchantStatus =
        serde_json::from_value(value).map_err(|e| UpstreamError::Decode(e.to_string()))?;
    status.merchant_id = merchant_id.to_string();
    Ok(status)
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn poll_events(&self, limit: usize) -> Result<Vec<Event>, UpstreamError> {
        let types = EventCode::POLLED.join(",");

        self.guarded(async {
            let mut request = self
                .client
                .get(self.url(ORDER_API, "/events:polling"))
                .query(&[
                    ("groups", "ORDER"),
                    ("types", types.as_str()),
                    ("categories", "ALL"),
                    ("excludeHeartbeat", "true"),
                ]);
            if !self.merchant_ids.is_empty() {
                request = request.header("x-polling-merchants", self.merchant_ids.join(","));
            }

            let response = self.send(request).await?;
            if response.status() == StatusCode::NO_CONTENT {
                return Ok(Vec::new());
            }

            let raw: Vec<RawEvent> = response.json().await?;
            Ok(raw
                .into_iter()
                .take(limit)
                .map(|event| Event::from_raw(PollCategory::Orders, event))
                .collect())
        })
        .await
    }

    async fn acknowledge(&self, event_ids: &[String]) -> Result<(), UpstreamError> {
        if event_ids.is_empty() {
            return Ok(());
        }

        let body: Vec<AckEntry<'_>> = event_ids.iter().map(|id| AckEntry { id }).collect();

        self.guarded(async {
            let request = self
                .client
                .post(self.url(ORDER_API, "/events/acknowledgment"))
                .json(&body);
            self.send(request).await?;
            Ok(())
        })
        .await
    }

    async fn order_detail(&self, order_id: &OrderId) -> Result<OrderDetail, UpstreamError> {
        self.guarded(async {
            let request = self
                .client
                .get(self.url(ORDER_API, &format!("/orders/{}", order_id)));
            let detail: OrderDetail = self.send(request).await?.json().await?;
            Ok(detail)
        })
        .await
    }

    async fn confirm_order(&self, order_id: &OrderId) -> Result<(), UpstreamError> {
        self.guarded(async {
            let request = self
                .client
                .post(self.url(ORDER_API, &format!("/orders/{}/confirm", order_id)));
            self.send(request).await?;
            Ok(())
        })
        .await
    }

    async fn request_cancellation(
        &self,
        order_id: &OrderId,
        reason: &str,
        cancellation_code: &str,
    ) -> Result<(), UpstreamError> {
        let body = CancellationRequest {
            reason,
            cancellation_code,
        };

        self.guarded(async {
            let request = self
                .client
                .post(self.url(ORDER_API, &format!("/orders/{}/requestCancellation", order_id)))
                .json(&body);
            self.send(request).await?;
            Ok(())
        })
        .await
    }

    async fn list_merchants(&self) -> Result<Vec<MerchantSummary>, UpstreamError> {
        self.guarded(async {
            let request = self.client.get(self.url(MERCHANT_API, "/merchants"));
            let merchants: Vec<MerchantSummary> = self.send(request).await?.json().await?;
            Ok(merchants)
        })
        .await
    }

    async fn merchant_status(&self, merchant_id: &str) -> Result<MerchantStatus, UpstreamError> {
        self.guarded(async {
            let request = self
                .client
                .get(self.url(MERCHANT_API, &format!("/merchants/{}/status", merchant_id)));
            let body: serde_json::Value = self.send(request).await?.json().await?;
            parse_merchant_status(body, merchant_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::types::MerchantState;
    use serde_json::json;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::UNAUTHORIZED, String::new()).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, String::new()),
            UpstreamError::NotFound(_)
        ));
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad".to_string()),
            UpstreamError::Rejected {
                status: 422,
                body: "bad".to_string()
            }
        );
    }

    #[test]
    fn test_merchant_status_list_takes_first_entry() {
        let body = json!([
            {"operation": "delivery", "state": "CLOSED", "available": false,
             "message": {"title": "Closed", "subtitle": "Outside opening hours"}},
            {"operation": "takeout", "state": "OK"}
        ]);
        let status = parse_merchant_status(body, "m-1").unwrap();

        assert_eq!(status.merchant_id, "m-1");
        assert_eq!(status.state, MerchantState::Closed);
        assert_eq!(status.message.unwrap().text(), Some("Outside opening hours"));
    }

    #[test]
    fn test_merchant_status_object_and_empty_list() {
        let status = parse_merchant_status(json!({"state": "OK"}), "m-2").unwrap();
        assert_eq!(status.state, MerchantState::Ok);

        assert!(matches!(
            parse_merchant_status(json!([]), "m-3"),
            Err(UpstreamError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_credentials_surface_as_auth_error() {
        use crate::testing::ScriptedTokenSource;

        let credentials = Arc::new(CredentialManager::new(
            Arc::new(ScriptedTokenSource::rejecting()),
            Duration::from_secs(60),
        ));
        // Nothing listens here; the token check fails before any request
        let client = HttpUpstreamClient::new(
            "http://127.0.0.1:9",
            credentials,
            Vec::new(),
            Duration::from_secs(1),
        )
        .unwrap();

        let err = client.poll_events(10).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(client.breaker_state(), CircuitState::Closed);
    }
}
