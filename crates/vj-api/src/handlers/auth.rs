//! Authentication API handlers
//!
//! Registration, login, logout and the current-user profile.

use crate::audit::RequestContext;
use crate::auth::{
    ApiResponse, AuthenticatedUser, LoginForm, LogoutOutcome, MessageResponse, RegisterRequest,
    TokenEnvelope, TokenResponse, UserEnvelope, UserResponse,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Form, Json,
};
use std::sync::Arc;

/// Register a new user account
///
/// Creates the account with a freshly allocated public uid and returns a
/// bearer token for it.
///
/// # Request Body
///
/// * `email` - Valid email address (unique)
/// * `password` - 6 to 128 characters
/// * `nick_name`, `phone` - Optional profile fields
///
/// # Responses
///
/// * `201 Created` - Account created, token in `data`
/// * `400 Bad Request` - Invalid email or weak password
/// * `409 Conflict` - Email already registered
#[utoipa::path(
    post,
    path = "/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = TokenEnvelope),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = RequestContext::from_headers(&headers);
    let issued = state.auth.register(request, &ctx).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            201,
            "Registration successful",
            TokenResponse::bearer(issued.token),
        )),
    ))
}

/// Login with email and password
///
/// Form-encoded, OAuth2 password flow style: `username` carries the email.
///
/// # Responses
///
/// * `200 OK` - Bearer token
/// * `401 Unauthorized` - Unknown email or wrong password
/// * `403 Forbidden` - Account disabled
#[utoipa::path(
    post,
    path = "/login",
    tag = "auth",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 403, description = "Account disabled", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = RequestContext::from_headers(&headers);
    let issued = state.auth.login(&form.username, &form.password, &ctx).await?;

    Ok(Json(TokenResponse::bearer(issued.token)))
}

/// Get current user profile
#[utoipa::path(
    get,
    path = "/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user profile", body = UserEnvelope),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(Extension(auth): Extension<AuthenticatedUser>) -> impl IntoResponse {
    Json(ApiResponse::ok(
        "User profile retrieved",
        UserResponse::from(&auth.user),
    ))
}

/// Logout current session
///
/// Revokes the presented token for the rest of its lifetime. Once this
/// returns 200 the token is rejected by every protected route.
///
/// # Responses
///
/// * `200 OK` - Token revoked, or already expired
/// * `401 Unauthorized` - Invalid or missing authentication
/// * `503 Service Unavailable` - Revocation could not be recorded; retry
#[utoipa::path(
    post,
    path = "/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 503, description = "Revocation store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let ctx = RequestContext::from_headers(&headers);
    let msg = match state.auth.logout(&auth, &ctx).await? {
        LogoutOutcome::Revoked => "Logged out successfully",
        LogoutOutcome::AlreadyExpired => "Token already expired, no logout needed",
    };

    Ok(Json(MessageResponse::ok(msg)))
}
