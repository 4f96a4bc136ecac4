//! vjudge API - authentication and account service
//!
//! Provides the HTTP surface for registration, login, logout and account
//! management, with bearer-token revocation backed by Redis.

pub mod audit;
pub mod auth;
pub mod cache;
pub mod error;
pub mod handlers;
pub mod retry;
pub mod routes;
pub mod state;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::models::{
    LoginForm, MessageResponse, RegisterRequest, TokenEnvelope, TokenResponse,
    UpdatePasswordRequest, UpdateProfileRequest, UserEnvelope, UserResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "vjudge API",
        description = "Accounts, bearer-token authentication and logout revocation"
    ),
    paths(
        handlers::health::ping,
        handlers::health::readiness_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::me_handler,
        handlers::auth::logout_handler,
        handlers::users::update_profile_handler,
        handlers::users::update_password_handler,
        handlers::users::get_user_by_uid_handler,
    ),
    components(schemas(
        RegisterRequest,
        LoginForm,
        UpdateProfileRequest,
        UpdatePasswordRequest,
        TokenResponse,
        UserResponse,
        TokenEnvelope,
        UserEnvelope,
        MessageResponse,
        error::ApiError,
        handlers::health::PingResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
    )),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "auth", description = "Registration, login and logout"),
        (name = "users", description = "Account management"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

/// Paths served at the root rather than under the base prefix
const ROOT_PATHS: &[&str] = &["/ping", "/ready"];

impl ApiDoc {
    /// OpenAPI document with account paths mounted under `prefix`
    pub fn with_prefix(prefix: &str) -> utoipa::openapi::OpenApi {
        let mut doc = Self::openapi();
        let paths = std::mem::take(&mut doc.paths.paths);
        doc.paths.paths = paths
            .into_iter()
            .map(|(path, item)| {
                if ROOT_PATHS.contains(&path.as_str()) {
                    (path, item)
                } else {
                    (format!("{prefix}{path}"), item)
                }
            })
            .collect();
        doc
    }
}

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}

async fn count_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    state.increment_requests();
    next.run(request).await
}

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let prefix = state.config.server.base_prefix.clone();
    let api = routes::api_routes(state.clone());

    let app = Router::new()
        .route("/ping", get(handlers::health::ping))
        .route("/ready", get(handlers::health::readiness_check));
    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(&prefix, api)
    };

    app.layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::with_prefix(&prefix)),
        )
}

/// In-memory backends for integration tests
#[cfg(feature = "test-utils")]
pub mod testing {
    use super::*;
    use crate::auth::{CredentialHasher, PasswordConfig};
    use crate::cache::MemoryCache;
    use vj_core::{AppConfig, MemoryUserStore, UidPoolConfig};

    /// Application state wired to in-memory backends the test can poke at
    pub struct TestApp {
        pub state: Arc<AppState>,
        pub cache: Arc<MemoryCache>,
        pub store: Arc<MemoryUserStore>,
    }

    impl TestApp {
        pub fn router(&self) -> Router {
            create_router(self.state.clone())
        }
    }

    /// Config with short revocation backoff and a small identifier pool
    pub fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.secret_key = "test-secret-key".to_string();
        config.auth.revoke_initial_backoff_ms = 1;
        config.uid_pool = UidPoolConfig {
            capacity: 20,
            threshold: 5,
            ..Default::default()
        };
        config
    }

    pub fn test_app_with_config(config: AppConfig) -> TestApp {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryUserStore::new());
        let hasher = match CredentialHasher::new(&PasswordConfig::minimal()) {
            Ok(hasher) => hasher,
            Err(e) => panic!("test hasher params rejected: {e}"),
        };
        let state = match AppState::new(config, store.clone(), cache.clone(), hasher) {
            Ok(state) => Arc::new(state),
            Err(e) => panic!("test config rejected: {e}"),
        };
        TestApp {
            state,
            cache,
            store,
        }
    }

    pub fn test_app() -> TestApp {
        test_app_with_config(test_config())
    }
}

/// Router over fresh in-memory backends
#[cfg(feature = "test-utils")]
pub fn create_router_for_testing() -> Router {
    testing::test_app().router()
}
