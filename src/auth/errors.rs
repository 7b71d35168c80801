use crate::utils::IsTransient;

// ============================================================================
// Credential Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CredentialError {
    /// Client id/secret refused by the token endpoint. Fatal: polling cannot
    /// make progress until the operator fixes the credentials.
    #[error("credentials rejected by token endpoint: {0}")]
    Rejected(String),

    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),
}

impl CredentialError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CredentialError::Rejected(_))
    }
}

impl IsTransient for CredentialError {
    fn is_transient(&self) -> bool {
        matches!(self, CredentialError::Unavailable(_))
    }
}
