//! Request and response bodies for the auth and user endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use vj_core::User;

/// Registration request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Login email (unique)
    pub email: String,
    /// Plaintext password, 6 to 128 characters
    pub password: String,
    pub nick_name: Option<String>,
    pub phone: Option<String>,
}

/// Login form (`application/x-www-form-urlencoded`)
///
/// `username` carries the email, matching the OAuth2 password flow.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Partial profile update; absent or empty fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub nick_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

/// Bearer token handed to the client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always "bearer"
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// Public view of an account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    /// Internal id, used by `/user/{id}/...` routes
    pub id: i64,
    /// Public 10-digit identifier
    pub uid: String,
    pub email: String,
    pub nick_name: Option<String>,
    pub phone: Option<String>,
    /// 0 male, 1 female, 2 unknown
    pub gender: i32,
    pub avatar: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            uid: user.uid.clone(),
            email: user.email.clone(),
            nick_name: user.nick_name.clone(),
            phone: user.phone.clone(),
            gender: user.gender.into(),
            avatar: user.avatar.clone(),
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}

/// Standard success envelope
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[aliases(TokenEnvelope = ApiResponse<TokenResponse>, UserEnvelope = ApiResponse<UserResponse>)]
pub struct ApiResponse<T> {
    /// Mirrors the HTTP status
    pub code: u16,
    pub msg: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(code: u16, msg: impl Into<String>, data: T) -> Self {
        Self {
            code,
            msg: msg.into(),
            data,
        }
    }

    pub fn ok(msg: impl Into<String>, data: T) -> Self {
        Self::new(200, msg, data)
    }
}

/// Envelope without a payload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub code: u16,
    pub msg: String,
}

impl MessageResponse {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: 200,
            msg: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vj_core::{Gender, DEFAULT_AVATAR};

    #[test]
    fn test_user_response_hides_credentials() {
        let now = Utc::now();
        let user = User {
            id: 3,
            uid: "0123456789".to_string(),
            email: "user@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            nick_name: Some("nick".to_string()),
            phone: None,
            gender: Gender::Female,
            avatar: DEFAULT_AVATAR.to_string(),
            is_admin: false,
            is_active: true,
            is_deleted: false,
            created_at: now,
            modified_at: now,
        };

        let json = serde_json::to_value(UserResponse::from(&user)).unwrap();
        assert_eq!(json["uid"], "0123456789");
        assert_eq!(json["gender"], 1);
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(ApiResponse::new(
            201,
            "Registered",
            TokenResponse::bearer("abc".to_string()),
        ))
        .unwrap();
        assert_eq!(json["code"], 201);
        assert_eq!(json["data"]["token_type"], "bearer");
    }
}
