use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::fmt;
use uuid::Uuid;

use super::AuthUser;
use crate::errors::ServiceError;

/// Header carrying the guest session id for anonymous cart callers
pub const GUEST_ID_HEADER: &str = "x-guest-id";

const MIN_GUEST_ID_LEN: usize = 16;
const MAX_GUEST_ID_LEN: usize = 64;

/// Who owns the cart being operated on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    User(Uuid),
    Guest(String),
}

impl CallerIdentity {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            CallerIdentity::User(id) => Some(*id),
            CallerIdentity::Guest(_) => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, CallerIdentity::Guest(_))
    }

    /// Validates a guest id received from a client
    pub fn guest(guest_id: &str) -> Result<Self, ServiceError> {
        let guest_id = guest_id.trim();
        let valid_len = (MIN_GUEST_ID_LEN..=MAX_GUEST_ID_LEN).contains(&guest_id.len());
        let valid_chars = guest_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid_len && valid_chars {
            Ok(CallerIdentity::Guest(guest_id.to_string()))
        } else {
            Err(ServiceError::ValidationError(format!(
                "{GUEST_ID_HEADER} must be {MIN_GUEST_ID_LEN}-{MAX_GUEST_ID_LEN} alphanumeric characters"
            )))
        }
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerIdentity::User(id) => write!(f, "user:{id}"),
            CallerIdentity::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

/// An authenticated user wins over a guest header
#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(CallerIdentity::User(user.user_id));
        }

        match parts
            .headers
            .get(GUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(guest_id) => CallerIdentity::guest(guest_id),
            None => Err(ServiceError::Unauthorized(format!(
                "Sign in or send a {GUEST_ID_HEADER} header"
            ))),
        }
    }
}
