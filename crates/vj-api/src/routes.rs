//! API route definitions

use crate::auth::middleware::{auth_middleware, require_admin};
use crate::handlers::{auth, users};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create the routes mounted under the configured base prefix
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/register", post(auth::register_handler))
        .route("/login", post(auth::login_handler));

    // Admin routes; the admin check needs the user the gate resolved
    let admin_routes = Router::new()
        .route("/admin/users/:uid", get(users::get_user_by_uid_handler))
        .route_layer(middleware::from_fn(require_admin));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/me", get(auth::me_handler))
        .route("/logout", post(auth::logout_handler))
        .route("/user/:id/reset", post(users::update_profile_handler))
        .route("/user/:id/pass", post(users::update_password_handler))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
