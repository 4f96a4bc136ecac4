//! Authentication and authorization module
//!
//! - Token issue and verification (HS-signed JWT, `sub` + `exp`)
//! - Password hashing with Argon2
//! - Token revocation ledger backed by the cache
//! - Identifier pool for new account uids
//! - Gate middleware for protected routes
//! - Account service used by the handlers

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod revocation;
pub mod service;
pub mod uid_pool;

pub use jwt::{Claims, IssuedToken, JwtError, TokenCodec, TokenPayload};
pub use middleware::{
    auth_middleware, bearer_token, require_admin, AuthError, AuthGate, AuthenticatedUser,
    UnauthorizedReason,
};
pub use models::{
    ApiResponse, LoginForm, MessageResponse, RegisterRequest, TokenEnvelope, TokenResponse,
    UpdatePasswordRequest, UpdateProfileRequest, UserEnvelope, UserResponse,
};
pub use password::{validate_password_strength, CredentialHasher, PasswordConfig, PasswordError};
pub use revocation::{blacklist_key, RevocationError, TokenRevocationLedger};
pub use service::{AuthService, LogoutOutcome};
pub use uid_pool::{UidPool, UidPoolError};
