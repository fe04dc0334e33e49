//! Subscriber authentication
//!
//! Subscribers present a token in the `token` query parameter of the
//! WebSocket upgrade request. The [`AuthGate`] asks an [`Authority`] whether
//! the token is valid before the connection is admitted. Results are not
//! cached: every connection costs one validation call.

pub mod http;

use std::future::Future;
use std::sync::Arc;

pub use http::HttpAuthority;

/// Something that can decide whether a subscriber token is valid
///
/// Implementations must not fail: any error resolves to `false`.
pub trait Authority: Send + Sync + 'static {
    fn validate(&self, token: &str) -> impl Future<Output = bool> + Send;
}

impl<A: Authority> Authority for Arc<A> {
    fn validate(&self, token: &str) -> impl Future<Output = bool> + Send {
        (**self).validate(token)
    }
}

/// Why a subscriber was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// No token (or an empty one) in the upgrade request
    #[error("Authentication token required")]
    MissingToken,
    /// The authority did not accept the token
    #[error("Invalid authentication token")]
    InvalidToken,
}

impl AuthFailure {
    /// Close reason sent to the refused subscriber
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::MissingToken => "Authentication token required",
            AuthFailure::InvalidToken => "Invalid authentication token",
        }
    }
}

/// Admission check in front of the subscriber endpoint
#[derive(Debug, Clone)]
pub struct AuthGate<A> {
    authority: A,
}

impl<A: Authority> AuthGate<A> {
    pub fn new(authority: A) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    /// Validate an optional token
    ///
    /// A missing or empty token is refused without contacting the authority.
    pub async fn check(&self, token: Option<&str>) -> Result<(), AuthFailure> {
        let token = match token {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AuthFailure::MissingToken),
        };

        if self.authority.validate(token).await {
            Ok(())
        } else {
            Err(AuthFailure::InvalidToken)
        }
    }
}

/// Extract the `token` query parameter from a request query string
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}
