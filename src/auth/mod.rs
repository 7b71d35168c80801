// ============================================================================
// Authentication
// ============================================================================
//
// - CredentialManager: cached access token with single-flight refresh
// - TokenSource: where new tokens come from (HTTP client-credentials grant)
// - CredentialError: Rejected is fatal, Unavailable is transient
//
// ============================================================================

pub mod credential;
pub mod errors;
pub mod token_source;

pub use credential::{Credential, CredentialManager};
pub use errors::CredentialError;
pub use token_source::{HttpTokenSource, IssuedToken, TokenSource};
