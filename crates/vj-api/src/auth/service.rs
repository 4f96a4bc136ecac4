//! Account service
//!
//! Registration, login, logout and self-service account changes. Handlers
//! stay thin; every rule about who may do what lives here.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::jwt::{unix_now, IssuedToken, TokenCodec};
use super::middleware::AuthenticatedUser;
use super::models::{RegisterRequest, UpdatePasswordRequest, UpdateProfileRequest};
use super::password::{validate_password_strength, CredentialHasher};
use super::revocation::TokenRevocationLedger;
use super::uid_pool::UidPool;
use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::error::AppError;
use vj_core::{NewUser, User, UserStore};

/// Claims attempted before giving up on a uid that keeps colliding at insert
const MAX_UID_ATTEMPTS: u32 = 3;

/// Verified against when the email is unknown, so both login failures cost one hash
const DUMMY_PASSWORD: &str = "vj-login-timing-equalizer";

/// Outcome of a logout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// A revocation entry was written
    Revoked,
    /// The token had already expired; nothing to revoke
    AlreadyExpired,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    codec: TokenCodec,
    hasher: CredentialHasher,
    ledger: TokenRevocationLedger,
    uid_pool: UidPool,
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        codec: TokenCodec,
        hasher: CredentialHasher,
        ledger: TokenRevocationLedger,
        uid_pool: UidPool,
    ) -> Self {
        Self {
            store,
            codec,
            hasher,
            ledger,
            uid_pool,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn uid_pool(&self) -> &UidPool {
        &self.uid_pool
    }

    /// Register a new account and issue its first token
    ///
    /// # Returns
    ///
    /// * `Ok(IssuedToken)` - Token for the new account
    /// * `Err(AppError::Conflict)` - Email already registered
    /// * `Err(AppError::BadRequest)` - Invalid email or weak password
    pub async fn register(
        &self,
        request: RegisterRequest,
        ctx: &RequestContext,
    ) -> Result<IssuedToken, AppError> {
        let email = request.email.trim().to_string();
        if let Err(reason) = validate_email(&email) {
            return Err(self.registration_failed(&email, ctx, AppError::BadRequest(reason)));
        }
        if let Err(reason) = validate_password_strength(&request.password) {
            return Err(self.registration_failed(&email, ctx, AppError::BadRequest(reason)));
        }

        if self.store.get_by_email(&email).await?.is_some() {
            return Err(self.registration_failed(
                &email,
                ctx,
                AppError::Conflict("Email already registered".to_string()),
            ));
        }

        let password_hash = self.hash(request.password).await?;

        let mut user = None;
        for attempt in 1..=MAX_UID_ATTEMPTS {
            let uid = self.uid_pool.claim().await?;
            let new_user = NewUser {
                uid: uid.clone(),
                email: email.clone(),
                password_hash: password_hash.clone(),
                nick_name: non_empty(request.nick_name.clone()),
                phone: non_empty(request.phone.clone()),
                is_admin: false,
            };

            match self.store.create(new_user).await {
                Ok(created) => {
                    user = Some(created);
                    break;
                }
                Err(e) if e.is_unique_violation_on("uid") => {
                    warn!(attempt, uid = %uid, "Allocated uid already taken at insert, claiming another");
                }
                Err(e) => {
                    let err = AppError::from(e);
                    return Err(self.registration_failed(&email, ctx, err));
                }
            }
        }

        let user = user.ok_or_else(|| {
            AppError::Internal(format!(
                "could not allocate a free uid after {MAX_UID_ATTEMPTS} attempts"
            ))
        })?;

        audit_log(&AuditEvent::RegistrationSuccess {
            uid: user.uid.clone(),
            email: user.email.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });
        info!(uid = %user.uid, "User registered");

        self.issue(&user.email)
    }

    /// Exchange email and password for a token
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        ctx: &RequestContext,
    ) -> Result<IssuedToken, AppError> {
        let email = email.trim();
        let Some(user) = self.store.get_by_email(email).await? else {
            self.verify_against_dummy(password).await;
            return Err(self.login_failed(email, "unknown email", ctx, AppError::InvalidCredentials));
        };

        if !self.verify(password, &user.password_hash).await? {
            return Err(self.login_failed(email, "wrong password", ctx, AppError::InvalidCredentials));
        }

        if !user.is_active {
            return Err(self.login_failed(
                email,
                "account disabled",
                ctx,
                AppError::Forbidden("Account is disabled".to_string()),
            ));
        }

        audit_log(&AuditEvent::LoginSuccess {
            uid: user.uid.clone(),
            email: user.email.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });

        self.issue(&user.email)
    }

    /// Revoke the caller's token for the rest of its lifetime
    pub async fn logout(
        &self,
        auth: &AuthenticatedUser,
        ctx: &RequestContext,
    ) -> Result<LogoutOutcome, AppError> {
        let now = unix_now().map_err(|e| AppError::Internal(e.to_string()))?;
        let remaining = auth.payload.remaining_at(now);

        let outcome = if remaining.is_zero() {
            debug!(uid = %auth.user.uid, "Token already expired at logout");
            LogoutOutcome::AlreadyExpired
        } else {
            self.ledger.revoke(&auth.token, remaining).await?;
            LogoutOutcome::Revoked
        };

        audit_log(&AuditEvent::Logout {
            uid: auth.user.uid.clone(),
            email: auth.user.email.clone(),
            revoked: outcome == LogoutOutcome::Revoked,
            ip_address: ctx.ip_address.clone(),
        });

        Ok(outcome)
    }

    /// Update profile fields of account `target_id` (self or admin)
    pub async fn update_profile(
        &self,
        actor: &User,
        target_id: i64,
        request: UpdateProfileRequest,
        ctx: &RequestContext,
    ) -> Result<User, AppError> {
        let mut user = self.authorized_target(actor, target_id, "profile", ctx).await?;
        let mut fields = Vec::new();

        if let Some(email) = non_empty(request.email) {
            let email = email.trim().to_string();
            if email != user.email {
                validate_email(&email).map_err(AppError::BadRequest)?;
                if self.store.get_by_email(&email).await?.is_some() {
                    return Err(AppError::Conflict("Email already registered".to_string()));
                }
                user.email = email;
                fields.push("email".to_string());
            }
        }
        if let Some(nick_name) = non_empty(request.nick_name) {
            user.nick_name = Some(nick_name);
            fields.push("nick_name".to_string());
        }
        if let Some(phone) = non_empty(request.phone) {
            user.phone = Some(phone);
            fields.push("phone".to_string());
        }

        if fields.is_empty() {
            return Ok(user);
        }

        let saved = self.store.save(&user).await?;
        audit_log(&AuditEvent::ProfileUpdate {
            actor_uid: actor.uid.clone(),
            target_id,
            fields,
            ip_address: ctx.ip_address.clone(),
        });
        Ok(saved)
    }

    /// Replace the password of account `target_id` (self or admin)
    pub async fn update_password(
        &self,
        actor: &User,
        target_id: i64,
        request: UpdatePasswordRequest,
        ctx: &RequestContext,
    ) -> Result<(), AppError> {
        let mut user = self.authorized_target(actor, target_id, "password", ctx).await?;
        validate_password_strength(&request.password).map_err(AppError::BadRequest)?;

        user.password_hash = self.hash(request.password).await?;
        self.store.save(&user).await?;

        audit_log(&AuditEvent::PasswordChange {
            actor_uid: actor.uid.clone(),
            target_id,
            ip_address: ctx.ip_address.clone(),
        });
        Ok(())
    }

    /// Look an account up by its public identifier
    pub async fn find_by_uid(&self, uid: &str) -> Result<User, AppError> {
        self.store
            .get_by_uid(uid)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    fn issue(&self, email: &str) -> Result<IssuedToken, AppError> {
        self.codec
            .issue(email)
            .map_err(|e| AppError::Internal(format!("Failed to issue token: {e}")))
    }

    async fn authorized_target(
        &self,
        actor: &User,
        target_id: i64,
        what: &str,
        ctx: &RequestContext,
    ) -> Result<User, AppError> {
        if !actor.can_manage(target_id) {
            audit_log(&AuditEvent::AccessDenied {
                uid: actor.uid.clone(),
                resource: format!("user/{target_id}/{what}"),
                ip_address: ctx.ip_address.clone(),
                user_agent: ctx.user_agent.clone(),
            });
            return Err(AppError::Forbidden("Not enough permissions".to_string()));
        }

        self.store
            .get_by_id(target_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    /// Argon2 is CPU-bound, keep it off the async workers
    async fn hash(&self, password: String) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("Hashing task failed: {e}")))?
            .map_err(AppError::from)
    }

    async fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        let (password, hash) = (password.to_string(), hash.to_string());
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Verification task failed: {e}")))?
            .map_err(AppError::from)
    }

    async fn verify_against_dummy(&self, password: &str) {
        let hash = match self
            .dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD.to_string()))
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                debug!(error = ?e, "Dummy password hash unavailable");
                return;
            }
        };
        if let Err(e) = self.verify(password, hash).await {
            debug!(error = ?e, "Dummy password verification failed");
        }
    }

    fn registration_failed(&self, email: &str, ctx: &RequestContext, err: AppError) -> AppError {
        audit_log(&AuditEvent::RegistrationFailure {
            email: email.to_string(),
            reason: format!("{err:?}"),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });
        err
    }

    fn login_failed(
        &self,
        email: &str,
        reason: &str,
        ctx: &RequestContext,
        err: AppError,
    ) -> AppError {
        audit_log(&AuditEvent::LoginFailure {
            email: email.to_string(),
            reason: reason.to_string(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });
        err
    }
}

/// Minimal structural email check: one `@`, non-empty local part, dotted domain
pub fn validate_email(email: &str) -> Result<(), String> {
    let invalid = || Err("Invalid email format".to_string());
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return invalid();
    }
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.') =>
        {
            Ok(())
        }
        _ => invalid(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::PasswordConfig;
    use crate::cache::{Cache, MemoryCache};
    use crate::retry::RetryConfig;
    use jsonwebtoken::Algorithm;
    use std::time::Duration;
    use vj_core::{MemoryUserStore, UidPoolConfig};

    struct Fixture {
        cache: Arc<MemoryCache>,
        store: Arc<MemoryUserStore>,
        service: AuthService,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryUserStore::new());
        let codec =
            TokenCodec::new("svc-secret", Algorithm::HS256, Duration::from_secs(1800)).unwrap();
        let ledger = TokenRevocationLedger::new(
            cache.clone(),
            RetryConfig {
                initial_backoff: Duration::from_millis(1),
                ..Default::default()
            },
        );
        let pool = UidPool::new(
            cache.clone(),
            store.clone(),
            UidPoolConfig {
                capacity: 10,
                threshold: 0,
                ..Default::default()
            },
        );
        let hasher = CredentialHasher::new(&PasswordConfig::minimal()).unwrap();
        let service = AuthService::new(store.clone(), codec, hasher, ledger, pool);
        Fixture {
            cache,
            store,
            service,
        }
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "secret-pass".to_string(),
            nick_name: Some("nick".to_string()),
            phone: Some("".to_string()),
        }
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.example.org").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@localhost").is_err());
        assert!(validate_email("user@@example.com").is_err());
        assert!(validate_email("us er@example.com").is_err());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let f = fixture();
        let ctx = RequestContext::default();

        f.service
            .register(register_request("new@example.com"), &ctx)
            .await
            .unwrap();
        let user = f.store.get_by_email("new@example.com").await.unwrap().unwrap();
        assert!(vj_core::is_valid_uid(&user.uid, 10));
        assert_eq!(user.nick_name.as_deref(), Some("nick"));
        assert_eq!(user.phone, None);
        assert_ne!(user.password_hash, "secret-pass");

        assert!(f
            .service
            .login("new@example.com", "secret-pass", &ctx)
            .await
            .is_ok());
        assert!(matches!(
            f.service.login("new@example.com", "nope-nope", &ctx).await,
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            f.service.login("ghost@example.com", "secret-pass", &ctx).await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_unknown_email_still_verifies_a_hash() {
        let f = fixture();
        let ctx = RequestContext::default();
        assert!(!f.service.dummy_hash.initialized());

        assert!(matches!(
            f.service.login("ghost@example.com", "secret-pass", &ctx).await,
            Err(AppError::InvalidCredentials)
        ));

        let dummy = f.service.dummy_hash.get().unwrap();
        assert!(dummy.starts_with("$argon2id$"));

        // Shared across clones and computed once
        let clone = f.service.clone();
        assert!(matches!(
            clone.login("ghost2@example.com", "x", &ctx).await,
            Err(AppError::InvalidCredentials)
        ));
        assert_eq!(clone.dummy_hash.get().unwrap(), dummy);
    }

    #[tokio::test]
    async fn test_register_duplicate_email_conflicts() {
        let f = fixture();
        let ctx = RequestContext::default();
        f.service
            .register(register_request("dup@example.com"), &ctx)
            .await
            .unwrap();

        let err = f
            .service
            .register(register_request("dup@example.com"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_register_reclaims_on_uid_collision() {
        let f = fixture();
        let ctx = RequestContext::default();

        f.service
            .register(register_request("first@example.com"), &ctx)
            .await
            .unwrap();
        let taken = f
            .store
            .get_by_email("first@example.com")
            .await
            .unwrap()
            .unwrap()
            .uid;

        // Drain the pool and plant the taken uid as its only member
        while f.cache.set_pop(&f.service.uid_pool().config().key).await.unwrap().is_some() {}
        f.cache
            .set_add(&f.service.uid_pool().config().key, &[taken.clone()])
            .await
            .unwrap();

        f.service
            .register(register_request("second@example.com"), &ctx)
            .await
            .unwrap();
        let second = f.store.get_by_email("second@example.com").await.unwrap().unwrap();
        assert_ne!(second.uid, taken);
    }

    #[tokio::test]
    async fn test_inactive_account_cannot_login() {
        let f = fixture();
        let ctx = RequestContext::default();
        f.service
            .register(register_request("off@example.com"), &ctx)
            .await
            .unwrap();

        let mut user = f.store.get_by_email("off@example.com").await.unwrap().unwrap();
        user.is_active = false;
        f.store.save(&user).await.unwrap();

        assert!(matches!(
            f.service.login("off@example.com", "secret-pass", &ctx).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_update_permissions() {
        let f = fixture();
        let ctx = RequestContext::default();
        f.service.register(register_request("a@example.com"), &ctx).await.unwrap();
        f.service.register(register_request("b@example.com"), &ctx).await.unwrap();
        let a = f.store.get_by_email("a@example.com").await.unwrap().unwrap();
        let b = f.store.get_by_email("b@example.com").await.unwrap().unwrap();

        let err = f
            .service
            .update_profile(&a, b.id, UpdateProfileRequest::default(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = f
            .service
            .update_profile(
                &a,
                a.id,
                UpdateProfileRequest {
                    email: Some("b@example.com".to_string()),
                    ..Default::default()
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let updated = f
            .service
            .update_profile(
                &a,
                a.id,
                UpdateProfileRequest {
                    nick_name: Some("renamed".to_string()),
                    ..Default::default()
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(updated.nick_name.as_deref(), Some("renamed"));

        let mut admin = a.clone();
        admin.is_admin = true;
        let err = f
            .service
            .update_profile(&admin, 999, UpdateProfileRequest::default(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_password() {
        let f = fixture();
        let ctx = RequestContext::default();
        f.service.register(register_request("p@example.com"), &ctx).await.unwrap();
        let user = f.store.get_by_email("p@example.com").await.unwrap().unwrap();

        f.service
            .update_password(
                &user,
                user.id,
                UpdatePasswordRequest {
                    password: "brand-new-pass".to_string(),
                },
                &ctx,
            )
            .await
            .unwrap();

        assert!(f.service.login("p@example.com", "brand-new-pass", &ctx).await.is_ok());
        assert!(f.service.login("p@example.com", "secret-pass", &ctx).await.is_err());
    }
}
