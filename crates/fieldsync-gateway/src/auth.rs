//! Bearer authentication against the single configured server secret.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::compare::eq_public_len;
use crate::error::GatewayError;
use crate::AppState;

/// Scheme prefix every credential must carry, including the trailing space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// The shared secret presented by every authenticated client.
///
/// Immutable once constructed. `Debug` never prints the bytes.
#[derive(Clone)]
pub struct ServerSecret(Arc<[u8]>);

impl ServerSecret {
    /// Wrap a secret. Returns `None` for an empty secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Option<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return None;
        }
        Some(Self(secret.into()))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the secret in bytes. Not considered sensitive.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerSecret(<redacted>)")
    }
}

/// Validates `Authorization` header values.
#[derive(Debug, Clone)]
pub struct BearerAuthenticator {
    secret: ServerSecret,
}

impl BearerAuthenticator {
    pub fn new(secret: ServerSecret) -> Self {
        Self { secret }
    }

    /// Check a raw header value.
    ///
    /// The length is checked first since the expected length is known to
    /// every legitimate client. The token itself is compared in constant
    /// time.
    pub fn is_authorized(&self, header: Option<&[u8]>) -> bool {
        let Some(value) = header else {
            return false;
        };

        let secret = self.secret.as_bytes();
        if value.len() != BEARER_PREFIX.len() + secret.len() {
            return false;
        }

        let (prefix, token) = value.split_at(BEARER_PREFIX.len());
        let prefix_ok = prefix == BEARER_PREFIX.as_bytes();
        let token_ok = eq_public_len(secret, token);
        prefix_ok & token_ok
    }

    /// Check the `Authorization` header of a request.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), GatewayError> {
        let header = headers.get(AUTHORIZATION).map(|value| value.as_bytes());
        if self.is_authorized(header) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized)
        }
    }
}

/// Middleware rejecting any request without a valid bearer credential
/// before the handler runs.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if let Err(err) = state.auth.authorize(request.headers()) {
        tracing::debug!(path = %request.uri().path(), "rejected unauthenticated request");
        return Err(err);
    }
    Ok(next.run(request).await)
}
