//! JWT token issuance and verification
//!
//! Access tokens are HMAC-signed and self-contained: the subject is the
//! user's login email and `exp` is an absolute expiry in seconds since the
//! epoch. Nothing is stored server-side unless the token is revoked.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use vj_core::AuthConfig;

/// JWT claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - user's login email
    pub sub: String,
    /// Issued at timestamp (Unix epoch); zero when the issuer omitted it
    #[serde(default)]
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    /// Token id; keeps tokens issued in the same second distinct
    #[serde(default)]
    pub jti: String,
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[source] jsonwebtoken::errors::Error),

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    /// Not a JWT, wrong algorithm, or required claims missing
    #[error("Malformed token")]
    Malformed,

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

/// Verified contents of an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub subject: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

impl TokenPayload {
    /// Validity left at `now` (seconds since epoch); zero once expired
    pub fn remaining_at(&self, now: u64) -> Duration {
        Duration::from_secs(self.expires_at.saturating_sub(now))
    }
}

/// A freshly signed token and its absolute expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: u64,
}

/// Current time in seconds since the Unix epoch
pub fn unix_now() -> Result<u64, JwtError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Issues and verifies access tokens with one symmetric key
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Create a codec for an HMAC algorithm
    ///
    /// # Arguments
    ///
    /// * `secret` - Shared signing secret
    /// * `algorithm` - One of HS256, HS384, HS512
    /// * `ttl` - Lifetime of tokens produced by [`TokenCodec::issue`]
    pub fn new(secret: &str, algorithm: Algorithm, ttl: Duration) -> Result<Self, JwtError> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(JwtError::UnsupportedAlgorithm(format!("{algorithm:?}")));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            ttl,
        })
    }

    /// Build from the `auth` configuration section
    pub fn from_config(config: &AuthConfig) -> Result<Self, JwtError> {
        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|_| JwtError::UnsupportedAlgorithm(config.algorithm.clone()))?;
        Self::new(
            &config.secret_key,
            algorithm,
            Duration::from_secs(config.access_token_expire_minutes * 60),
        )
    }

    /// Default token lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `subject` with the default lifetime
    pub fn issue(&self, subject: &str) -> Result<IssuedToken, JwtError> {
        self.issue_with_ttl(subject, self.ttl)
    }

    /// Issue a token for `subject` expiring `ttl` from now
    pub fn issue_with_ttl(&self, subject: &str, ttl: Duration) -> Result<IssuedToken, JwtError> {
        let now = unix_now()?;
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl.as_secs(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = self.encode(&claims)?;
        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
        })
    }

    /// Sign arbitrary claims
    pub fn encode(&self, claims: &Claims) -> Result<String, JwtError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(JwtError::EncodingError)
    }

    /// Verify signature and expiry and extract the payload
    ///
    /// # Returns
    ///
    /// * `Ok(TokenPayload)` - Verified subject and timestamps
    /// * `Err(JwtError::Expired)` - `exp` is in the past (no leeway)
    /// * `Err(JwtError::InvalidSignature)` - Signed with another key or tampered
    /// * `Err(JwtError::Malformed)` - Anything else
    pub fn decode(&self, token: &str) -> Result<TokenPayload, JwtError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::Malformed,
            }
        })?;

        Ok(TokenPayload {
            subject: data.claims.sub,
            issued_at: data.claims.iat,
            expires_at: data.claims.exp,
        })
    }

    /// Read `exp` without verifying the signature.
    ///
    /// Only for labelling log entries; never trust the result for access.
    pub fn peek_expiry(&self, token: &str) -> Option<u64> {
        #[derive(Deserialize)]
        struct ExpOnly {
            exp: u64,
        }

        let mut validation = Validation::new(self.algorithm);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<ExpOnly>(token, &self.decoding_key, &validation)
            .ok()
            .map(|data| data.claims.exp)
    }
}
