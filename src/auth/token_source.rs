use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::errors::CredentialError;

// ============================================================================
// Token Source
// ============================================================================

pub const TOKEN_PATH: &str = "/authentication/v1.0/oauth/token";

/// Lifetime assumed when the token endpoint omits `expiresIn`
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Token as issued by the authorization server
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

/// Anything that can mint a new access token
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<IssuedToken, CredentialError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

/// Client-credentials grant against the upstream token endpoint
pub struct HttpTokenSource {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenSource {
    pub fn new(
        api_url: &str,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            token_url: format!("{}{}", api_url, TOKEN_PATH),
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self) -> Result<IssuedToken, CredentialError> {
        let form = [
            ("grantType", "client_credentials"),
            ("clientId", self.client_id.as_str()),
            ("clientSecret", self.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Unavailable(format!("invalid token response: {e}")))?;

        Ok(IssuedToken {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }
}

fn classify_status(status: StatusCode, body: String) -> CredentialError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CredentialError::Rejected(format!("status {status}: {body}"))
        }
        _ => CredentialError::Unavailable(format!("status {status}: {body}")),
    }
}
