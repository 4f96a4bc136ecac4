//! Authentication gate
//!
//! Every protected request runs the same checks, in this order, stopping at
//! the first failure:
//!
//! 1. revocation ledger lookup
//! 2. signature and expiry verification
//! 3. subject extraction
//! 4. credential store lookup
//!
//! All rejections reach the client as the same 401 with a
//! `WWW-Authenticate: Bearer` challenge. The specific reason is only
//! written to the audit log.

use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::jwt::{unix_now, JwtError, TokenCodec, TokenPayload};
use super::revocation::TokenRevocationLedger;
use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::error::AppError;
use crate::state::AppState;
use vj_core::{User, UserStore, VjError};

/// Why a bearer token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthorizedReason {
    /// No `Authorization: Bearer` header
    MissingCredentials,
    Blacklisted,
    Malformed,
    Expired,
    SubjectMissing,
    UserNotFound,
}

impl UnauthorizedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnauthorizedReason::MissingCredentials => "missing_credentials",
            UnauthorizedReason::Blacklisted => "blacklisted",
            UnauthorizedReason::Malformed => "malformed",
            UnauthorizedReason::Expired => "expired",
            UnauthorizedReason::SubjectMissing => "subject_missing",
            UnauthorizedReason::UserNotFound => "user_not_found",
        }
    }
}

impl std::fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication middleware errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthorized: {0}")]
    Unauthorized(UnauthorizedReason),

    #[error("admin privileges required")]
    AdminRequired,

    /// The store could not be asked; this is not an authentication failure
    #[error("credential store error: {0}")]
    Store(#[from] VjError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::Unauthorized(_) => AppError::Unauthorized,
            AuthError::AdminRequired => {
                AppError::Forbidden("Admin privileges required".to_string())
            }
            AuthError::Store(e) => AppError::from(e),
        }
        .into_response()
    }
}

/// Identity resolved by the gate, available to handlers through
/// `Extension<AuthenticatedUser>`
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    /// The raw bearer token, needed to revoke it on logout
    pub token: String,
    pub payload: TokenPayload,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.user.is_admin
    }
}

/// Resolves bearer tokens to users
#[derive(Clone)]
pub struct AuthGate {
    codec: TokenCodec,
    ledger: TokenRevocationLedger,
    store: Arc<dyn UserStore>,
}

impl AuthGate {
    pub fn new(codec: TokenCodec, ledger: TokenRevocationLedger, store: Arc<dyn UserStore>) -> Self {
        Self {
            codec,
            ledger,
            store,
        }
    }

    /// Resolve `token` to a user or say why it was rejected
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if self.ledger.is_revoked(token).await {
            return Err(AuthError::Unauthorized(self.revoked_reason(token)));
        }

        let payload = self.codec.decode(token).map_err(|e| {
            AuthError::Unauthorized(match e {
                JwtError::Expired => UnauthorizedReason::Expired,
                _ => UnauthorizedReason::Malformed,
            })
        })?;

        if payload.subject.trim().is_empty() {
            return Err(AuthError::Unauthorized(UnauthorizedReason::SubjectMissing));
        }

        let user = self
            .store
            .get_by_email(&payload.subject)
            .await?
            .ok_or(AuthError::Unauthorized(UnauthorizedReason::UserNotFound))?;

        Ok(AuthenticatedUser {
            user,
            token: token.to_string(),
            payload,
        })
    }

    /// A revoked token past its `exp` is reported as expired
    fn revoked_reason(&self, token: &str) -> UnauthorizedReason {
        match (self.codec.peek_expiry(token), unix_now()) {
            (Some(exp), Ok(now)) if exp < now => UnauthorizedReason::Expired,
            _ => UnauthorizedReason::Blacklisted,
        }
    }
}

/// Pull the token out of `Authorization: Bearer <token>`
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Middleware that requires a valid, unrevoked bearer token
///
/// On success the request gains an `AuthenticatedUser` extension.
///
/// ```ignore
/// let protected = Router::new()
///     .route("/me", get(me))
///     .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let result = match bearer_token(request.headers()) {
        Some(token) => state.gate.authenticate(token).await,
        None => Err(AuthError::Unauthorized(
            UnauthorizedReason::MissingCredentials,
        )),
    };

    match result {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(AuthError::Unauthorized(reason)) => {
            let ctx = RequestContext::from_headers(request.headers());
            audit_log(&AuditEvent::InvalidToken {
                reason: reason.to_string(),
                ip_address: ctx.ip_address,
                user_agent: ctx.user_agent,
            });
            Err(AuthError::Unauthorized(reason))
        }
        Err(e) => Err(e),
    }
}

/// Admin-only layer; must run after `auth_middleware`
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(AuthError::Unauthorized(
            UnauthorizedReason::MissingCredentials,
        ))?;

    if !user.is_admin() {
        let ctx = RequestContext::from_headers(request.headers());
        audit_log(&AuditEvent::AccessDenied {
            uid: user.user.uid.clone(),
            resource: request.uri().path().to_string(),
            ip_address: ctx.ip_address,
            user_agent: ctx.user_agent,
        });
        return Err(AuthError::AdminRequired);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::Claims;
    use crate::cache::MemoryCache;
    use crate::retry::RetryConfig;
    use axum::http::{HeaderMap, HeaderValue};
    use jsonwebtoken::Algorithm;
    use std::time::Duration;
    use vj_core::{MemoryUserStore, NewUser};

    struct Fixture {
        cache: Arc<MemoryCache>,
        store: Arc<MemoryUserStore>,
        codec: TokenCodec,
        ledger: TokenRevocationLedger,
        gate: AuthGate,
    }

    async fn fixture() -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryUserStore::new());
        store
            .create(NewUser {
                uid: "1000000001".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: "hash".to_string(),
                nick_name: None,
                phone: None,
                is_admin: false,
            })
            .await
            .unwrap();

        let codec =
            TokenCodec::new("gate-secret", Algorithm::HS256, Duration::from_secs(1800)).unwrap();
        let ledger = TokenRevocationLedger::new(
            cache.clone(),
            RetryConfig {
                initial_backoff: Duration::from_millis(1),
                ..Default::default()
            },
        );
        let gate = AuthGate::new(codec.clone(), ledger.clone(), store.clone());

        Fixture {
            cache,
            store,
            codec,
            ledger,
            gate,
        }
    }

    fn reason(result: Result<AuthenticatedUser, AuthError>) -> UnauthorizedReason {
        match result {
            Err(AuthError::Unauthorized(reason)) => reason,
            other => panic!("expected unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_valid_token_resolves_user() {
        let f = fixture().await;
        let token = f.codec.issue("alice@example.com").unwrap().token;

        let auth = f.gate.authenticate(&token).await.unwrap();
        assert_eq!(auth.user.uid, "1000000001");
        assert_eq!(auth.token, token);
        assert_eq!(auth.payload.subject, "alice@example.com");
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let f = fixture().await;
        let token = f.codec.issue("alice@example.com").unwrap().token;
        f.ledger.revoke(&token, Duration::from_secs(60)).await.unwrap();

        assert_eq!(
            reason(f.gate.authenticate(&token).await),
            UnauthorizedReason::Blacklisted
        );
    }

    #[tokio::test]
    async fn test_blacklist_checked_before_decode() {
        let f = fixture().await;
        f.ledger
            .revoke("not-a-jwt", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            reason(f.gate.authenticate("not-a-jwt").await),
            UnauthorizedReason::Blacklisted
        );
        assert_eq!(
            reason(f.gate.authenticate("also-not-a-jwt").await),
            UnauthorizedReason::Malformed
        );
    }

    #[tokio::test]
    async fn test_expired_token_reported_as_expired_even_if_revoked() {
        let f = fixture().await;
        let now = unix_now().unwrap();
        let token = f
            .codec
            .encode(&Claims {
                sub: "alice@example.com".to_string(),
                iat: now - 100,
                exp: now - 10,
                jti: String::new(),
            })
            .unwrap();

        assert_eq!(
            reason(f.gate.authenticate(&token).await),
            UnauthorizedReason::Expired
        );

        f.ledger.revoke(&token, Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            reason(f.gate.authenticate(&token).await),
            UnauthorizedReason::Expired
        );
    }

    #[tokio::test]
    async fn test_subject_and_user_checks() {
        let f = fixture().await;

        let token = f.codec.issue("").unwrap().token;
        assert_eq!(
            reason(f.gate.authenticate(&token).await),
            UnauthorizedReason::SubjectMissing
        );

        let token = f.codec.issue("ghost@example.com").unwrap().token;
        assert_eq!(
            reason(f.gate.authenticate(&token).await),
            UnauthorizedReason::UserNotFound
        );
    }

    #[tokio::test]
    async fn test_cache_outage_fails_open() {
        let f = fixture().await;
        let token = f.codec.issue("alice@example.com").unwrap().token;
        f.cache.set_available(false);

        assert!(f.gate.authenticate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_outage_is_not_unauthorized() {
        let f = fixture().await;
        let token = f.codec.issue("alice@example.com").unwrap().token;
        f.store.set_available(false);

        assert!(matches!(
            f.gate.authenticate(&token).await,
            Err(AuthError::Store(_))
        ));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
