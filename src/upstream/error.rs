use crate::auth::CredentialError;
use crate::utils::IsTransient;

// ============================================================================
// Upstream Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    /// Credentials refused; polling must stop
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connectivity, timeouts, 5xx, 429, open circuit, expired token
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("not found upstream: {0}")]
    NotFound(String),

    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpstreamError::Auth(_))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Auth(_) => "auth",
            UpstreamError::Transient(_) => "transient",
            UpstreamError::NotFound(_) => "not_found",
            UpstreamError::Rejected { .. } => "rejected",
            UpstreamError::Decode(_) => "decode",
        }
    }
}

impl IsTransient for UpstreamError {
    fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }
}

impl From<CredentialError> for UpstreamError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Rejected(msg) => UpstreamError::Auth(msg),
            CredentialError::Unavailable(msg) => UpstreamError::Transient(msg),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else {
            UpstreamError::Transient(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_map_to_fatal_or_transient() {
        let fatal: UpstreamError = CredentialError::Rejected("bad secret".into()).into();
        assert!(fatal.is_fatal());
        assert!(!fatal.is_transient());

        let transient: UpstreamError = CredentialError::Unavailable("503".into()).into();
        assert!(transient.is_transient());
        assert!(!transient.is_fatal());
    }
}
