//! Account management handlers
//!
//! Users may change their own profile and password; admins may change anyone's.

use crate::audit::RequestContext;
use crate::auth::{
    ApiResponse, AuthenticatedUser, MessageResponse, UpdatePasswordRequest, UpdateProfileRequest,
    UserEnvelope, UserResponse,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

/// Update profile fields of a user
///
/// Absent or empty fields are left unchanged.
///
/// # Responses
///
/// * `200 OK` - Updated profile
/// * `403 Forbidden` - Neither the account owner nor an admin
/// * `404 Not Found` - No such user
/// * `409 Conflict` - New email already in use
#[utoipa::path(
    post,
    path = "/user/{id}/reset",
    tag = "users",
    params(("id" = i64, Path, description = "Internal user id")),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserEnvelope),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Not enough permissions", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = RequestContext::from_headers(&headers);
    let user = state
        .auth
        .update_profile(&auth.user, id, request, &ctx)
        .await?;

    Ok(Json(ApiResponse::ok(
        "Profile updated",
        UserResponse::from(&user),
    )))
}

/// Replace a user's password
#[utoipa::path(
    post,
    path = "/user/{id}/pass",
    tag = "users",
    params(("id" = i64, Path, description = "Internal user id")),
    request_body = UpdatePasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Weak password", body = crate::error::ApiError),
        (status = 403, description = "Not enough permissions", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = RequestContext::from_headers(&headers);
    state
        .auth
        .update_password(&auth.user, id, request, &ctx)
        .await?;

    Ok(Json(MessageResponse::ok("Password updated")))
}

/// Look a user up by public uid (admin only)
#[utoipa::path(
    get,
    path = "/admin/users/{uid}",
    tag = "users",
    params(("uid" = String, Path, description = "Public 10-digit identifier")),
    responses(
        (status = 200, description = "User profile", body = UserEnvelope),
        (status = 403, description = "Admin privileges required", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_user_by_uid_handler(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.find_by_uid(&uid).await?;

    Ok(Json(ApiResponse::ok("User found", UserResponse::from(&user))))
}
