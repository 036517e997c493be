//! Accounts, passwords, and bearer tokens.
//!
//! Passwords are hashed with Argon2id. Tokens are HS256 JWTs carrying the
//! user's id, email, role, name, and linked teacher.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::{Result, TutorError};

/// Prefix of every teacher code.
pub const TEACHER_CODE_PREFIX: &str = "OCTO-";

const TEACHER_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TEACHER_CODE_LEN: usize = 5;

// ============================================================================
// Role
// ============================================================================

/// What kind of account a user holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Self-directed learner.
    Individual,
    /// Learner linked (optionally) to a teacher.
    Student,
    /// Teacher with a shareable code.
    Teacher,
}

impl Role {
    /// Database and wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Student => "student",
            Self::Teacher => "teacher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "individual" => Ok(Self::Individual),
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            other => Err(TutorError::invalid_input(format!("Unknown role '{other}'"))),
        }
    }
}

// ============================================================================
// Passwords
// ============================================================================

/// Hashes a password with Argon2id, returning the PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| TutorError::PasswordHash(format!("Failed to hash password: {e}")))
}

/// Checks a password against a stored PHC hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| TutorError::PasswordHash(format!("Invalid password hash format: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

// ============================================================================
// Validation helpers
// ============================================================================

fn pattern_matches(pattern: &'static OnceLock<Option<Regex>>, source: &str, text: &str) -> bool {
    pattern
        .get_or_init(|| Regex::new(source).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

/// Whether `email` looks like an address.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    pattern_matches(&PATTERN, r"^[^@\s]+@[^@\s]+\.[^@\s]+$", email)
}

/// Whether `code` has the `OCTO-XXXXX` shape.
#[must_use]
pub fn is_valid_teacher_code(code: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    pattern_matches(&PATTERN, r"^OCTO-[A-Z0-9]{5}$", code)
}

/// Generates a fresh teacher code: `OCTO-` and five uppercase alphanumerics.
#[must_use]
pub fn generate_teacher_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TEACHER_CODE_LEN)
        .map(|_| char::from(TEACHER_CODE_ALPHABET[rng.gen_range(0..TEACHER_CODE_ALPHABET.len())]))
        .collect();
    format!("{TEACHER_CODE_PREFIX}{suffix}")
}

// ============================================================================
// Tokens
// ============================================================================

/// Payload of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User id.
    pub sub: i64,
    /// User email.
    pub email: String,
    /// Account role.
    pub role: Role,
    /// Display name.
    pub name: String,
    /// Linked teacher, for students.
    pub teacher_id: Option<i64>,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expiry (Unix seconds).
    pub exp: i64,
}

/// Who a token is being issued for.
#[derive(Debug, Clone)]
pub struct TokenSubject<'a> {
    /// User id.
    pub id: i64,
    /// User email.
    pub email: &'a str,
    /// Account role.
    pub role: Role,
    /// Display name.
    pub name: &'a str,
    /// Linked teacher.
    pub teacher_id: Option<i64>,
}

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Creates an issuer from a shared secret.
    #[must_use]
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Creates an issuer from the auth configuration section.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_secs)
    }

    /// Issues a token for `subject`.
    pub fn issue(&self, subject: &TokenSubject<'_>) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject.id,
            email: subject.email.to_string(),
            role: subject.role,
            name: subject.name.to_string(),
            teacher_id: subject.teacher_id,
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Verifies a token's signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::Unauthorized`] with "Invalid token" for any
    /// failure.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                TutorError::unauthorized("Invalid token")
            })
    }
}
