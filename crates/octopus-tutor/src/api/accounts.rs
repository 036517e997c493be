//! Signup, login, and the current user.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ApiResult, AppState, AuthUser};
use crate::auth::{self, Role, TokenSubject};
use crate::error::TutorError;
use crate::store::{NewUser, User};

/// Attempts at drawing an unused teacher code.
const TEACHER_CODE_ATTEMPTS: usize = 5;

/// Request body for `POST /api/auth/signup`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    /// Login email.
    #[serde(default)]
    pub email: String,
    /// Plain-text password.
    #[serde(default)]
    pub password: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// `individual`, `student`, or `teacher`.
    #[serde(default)]
    pub role: String,
    /// A teacher's code, for students joining a class.
    #[serde(default)]
    pub teacher_code: Option<String>,
}

/// Request body for `POST /api/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Plain-text password.
    pub password: String,
}

/// Response body for signup and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Bearer token for later requests.
    pub token: String,
    /// The account.
    pub user: User,
}

fn issue_token(state: &AppState, user: &User) -> ApiResult<String> {
    Ok(state.tokens.issue(&TokenSubject {
        id: user.id,
        email: &user.email,
        role: user.role,
        name: &user.name,
        teacher_id: user.teacher_id,
    })?)
}

/// Resolves a student's optional teacher code to the teacher's id.
fn linked_teacher(state: &AppState, code: Option<&str>) -> ApiResult<Option<i64>> {
    let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    let code = code.to_ascii_uppercase();
    if !auth::is_valid_teacher_code(&code) {
        return Err(TutorError::invalid_input("Invalid teacher code").into());
    }
    match state.store.teacher_by_code(&code)? {
        Some(teacher) => Ok(Some(teacher.id)),
        None => Err(TutorError::invalid_input("Invalid teacher code").into()),
    }
}

/// Handler for `POST /api/auth/signup`.
pub(super) async fn handle_signup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let email = request.email.trim().to_ascii_lowercase();
    let name = request.name.trim();
    if email.is_empty() || request.password.is_empty() || name.is_empty() || request.role.is_empty() {
        return Err(TutorError::invalid_input("Email, password, name and role are required").into());
    }
    if !auth::is_valid_email(&email) {
        return Err(TutorError::invalid_input("Invalid email address").into());
    }
    let role: Role = request.role.trim().to_ascii_lowercase().parse()?;

    let teacher_id = if role == Role::Student {
        linked_teacher(&state, request.teacher_code.as_deref())?
    } else {
        None
    };

    let password_hash = auth::hash_password(&request.password)?;

    let mut attempts = 0;
    let user = loop {
        let teacher_code = (role == Role::Teacher).then(auth::generate_teacher_code);
        let result = state.store.create_user(&NewUser {
            email: &email,
            password_hash: &password_hash,
            name,
            role,
            teacher_code: teacher_code.as_deref(),
            teacher_id,
        });
        attempts += 1;
        match result {
            Err(TutorError::Conflict(message))
                if role == Role::Teacher
                    && message == "Teacher code already in use"
                    && attempts < TEACHER_CODE_ATTEMPTS =>
            {
                warn!(attempts, "Teacher code collision, drawing another");
            }
            other => break other?,
        }
    };

    info!(user_id = user.id, role = %user.role, "Account created");
    let token = issue_token(&state, &user)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// Handler for `POST /api/auth/login`.
pub(super) async fn handle_login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = request.email.trim().to_ascii_lowercase();
    let invalid = || TutorError::unauthorized("Invalid credentials");

    let (user, hash) = state.store.credentials(&email)?.ok_or_else(invalid)?;
    if !auth::verify_password(&request.password, &hash)? {
        warn!(user_id = user.id, "Login rejected: wrong password");
        return Err(invalid().into());
    }

    let token = issue_token(&state, &user)?;
    Ok(Json(AuthResponse { token, user }))
}

/// Handler for `GET /api/me`.
pub(super) async fn handle_me(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<User>> {
    let user = state
        .store
        .user(caller.id())?
        .ok_or_else(|| TutorError::not_found("User not found"))?;
    Ok(Json(user))
}
