/*!
 * # Authentication and Authorization Module
 *
 * Bearer JWT validation for the storefront API. Tokens are issued by the
 * identity provider that fronts the storefront; this service only verifies
 * them (HS256, issuer and audience checked) and exposes the caller as an
 * [`AuthUser`] request extension.
 *
 * Cart routes additionally accept anonymous guests, see [`identity`].
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;

pub mod identity;

pub use identity::{CallerIdentity, GUEST_ID_HEADER};

pub const ADMIN_ROLE: &str = "admin";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,           // Subject (user ID)
    pub name: Option<String>,  // User's name
    pub email: Option<String>, // User's email
    #[serde(default)]
    pub roles: Vec<String>, // User's roles
    pub jti: String,           // JWT ID (unique identifier for this token)
    pub iat: i64,              // Issued at time
    pub exp: i64,              // Expiration time
    pub nbf: i64,              // Not valid before time
    pub iss: String,           // Issuer
    pub aud: String,           // Audience
}

/// Authenticated user data extracted from the JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub token_id: String,
}

impl AuthUser {
    /// Check if the user has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check if the user is an admin
    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Owners and admins may act on a user's resources
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.user_id == owner_id || self.is_admin()
    }
}

impl TryFrom<Claims> for AuthUser {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(Self {
            user_id,
            name: claims.name,
            email: claims.email,
            roles: claims.roles,
            token_id: claims.jti,
        })
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
    ) -> Result<Self, AuthError> {
        if jwt_secret.trim().is_empty() {
            return Err(AuthError::InternalError(
                "JWT secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
        })
    }

    pub fn from_app_config(config: &crate::config::AppConfig) -> Result<Self, AuthError> {
        Self::new(
            config.jwt_secret.clone(),
            config.auth_audience.clone(),
            config.auth_issuer.clone(),
            Duration::from_secs(config.jwt_expiration_secs),
        )
    }
}

/// Verifies bearer tokens; can also mint them for operators and tests
#[derive(Debug, Clone)]
pub struct AuthService {
    pub config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Mint an access token for a user
    pub fn issue_token(
        &self,
        user_id: Uuid,
        email: Option<String>,
        roles: Vec<String>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(self.config.access_token_expiration)
                .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            name: None,
            email,
            roles,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.jwt_issuer]);
        validation.set_audience(&[&self.config.jwt_audience]);
        validation.validate_nbf = true;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    /// Resolve the caller from the `Authorization` header, if one is present
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthUser>, AuthError> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| AuthError::InvalidToken)?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.validate_token(token)?;
        AuthUser::try_from(claims).map(Some)
    }
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingAuth,

    #[error("No bearer token provided")]
    MissingToken,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth
            | AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::TokenExpired => ServiceError::Unauthorized(err.to_string()),
            AuthError::InsufficientPermissions => ServiceError::Forbidden(err.to_string()),
            AuthError::TokenCreation(_) | AuthError::InternalError(_) => {
                ServiceError::InternalError(err.to_string())
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

fn auth_service_from(request: &Request) -> Result<Arc<AuthService>, AuthError> {
    request
        .extensions()
        .get::<Arc<AuthService>>()
        .cloned()
        .ok_or_else(|| AuthError::InternalError("Authentication service not available".into()))
}

/// Makes the auth service available to the auth middlewares further down the stack
pub async fn inject_auth_service(
    State(auth_service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(auth_service);
    next.run(request).await
}

/// Authentication middleware: a valid bearer token is required
pub async fn auth_middleware(mut request: Request, next: Next) -> Result<Response, AuthError> {
    let auth_service = auth_service_from(&request)?;
    let user = auth_service
        .authenticate(request.headers())?
        .ok_or(AuthError::MissingAuth)?;

    debug!(user_id = %user.user_id, "authenticated request");
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Authenticates the caller when a bearer token is sent; anonymous requests pass through
pub async fn optional_auth_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_service = auth_service_from(&request)?;
    if let Some(user) = auth_service.authenticate(request.headers())? {
        request.extensions_mut().insert(user);
    }
    Ok(next.run(request).await)
}

/// Role middleware to check if a user has the required role
pub async fn role_middleware(
    State(required_role): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.has_role(&required_role) {
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_optional_auth(self) -> Self;
    fn with_role(self, role: &str) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_optional_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(optional_auth_middleware))
    }

    fn with_role(self, role: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            role.to_string(),
            role_middleware,
        ))
        .with_auth()
    }
}
