//! HTTP API for the Octopus tutor.
//!
//! Every route lives under `/api`. Authenticated routes expect an
//! `Authorization: Bearer <token>` header issued by signup or login.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Liveness
//! - `POST /api/auth/signup`, `POST /api/auth/login`, `GET /api/me` - Accounts
//! - `POST /api/analyze`, `POST /api/teach` - Stateless model calls
//! - `GET /api/session` and `POST /api/session/*` - The learner's session
//! - `POST /api/activity`, `GET /api/badges`, `POST /api/quiz/grade` - Progress
//! - `/api/messages/*` - Messaging
//! - `/api/teacher/*` - Teacher dashboard
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use octopus_tutor::{create_router, AppState, ChatCompletionsClient, Config, Store};
//!
//! # async fn example() -> octopus_tutor::Result<()> {
//! let config = Config::default();
//! let store = Store::open_in_memory()?;
//! let model = ChatCompletionsClient::new(config.llm.clone())?;
//! let state = AppState::new(config, Arc::new(store), Arc::new(model));
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

mod accounts;
mod community;
mod tutoring;


pub use accounts::{AuthResponse, LoginRequest, SignupRequest};
pub use community::{
    ActivityResponse, GradeRequest, GradeResponse, ProblemOfTheWeekRequest, ReportQuery,
    SendMessageRequest, StudentDetail, SummaryResponse, UnreadCount,
};
pub use tutoring::{
    AnalyzeRequest, ConceptRequest, ProblemRequest, SessionResponse, TeachRequest,
    TeachTurnRequest,
};

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, warn};

use crate::auth::{Claims, Role, TokenIssuer};
use crate::config::Config;
use crate::error::TutorError;
use crate::llm::TutorModel;
use crate::session::SessionRegistry;
use crate::store::Store;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Accounts, activity, and messages.
    pub store: Arc<Store>,
    /// The model behind generation, teaching, and insights.
    pub model: Arc<dyn TutorModel>,
    /// Signs and verifies bearer tokens.
    pub tokens: TokenIssuer,
    /// Live learner sessions.
    pub sessions: SessionRegistry,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates the state, deriving the token issuer from `config.auth`.
    #[must_use]
    pub fn new(config: Config, store: Arc<Store>, model: Arc<dyn TutorModel>) -> Self {
        let tokens = TokenIssuer::from_config(&config.auth);
        Self {
            config,
            store,
            model,
            tokens,
            sessions: SessionRegistry::new(),
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

/// A [`TutorError`] on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError(TutorError);

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            TutorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TutorError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TutorError::Forbidden => StatusCode::FORBIDDEN,
            TutorError::NotFound(_) => StatusCode::NOT_FOUND,
            TutorError::Conflict(_) => StatusCode::CONFLICT,
            TutorError::InvalidStateTransition { .. } | TutorError::SolutionLocked { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            TutorError::LlmApiError { .. } | TutorError::LlmMalformedResponse { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            "Internal server error".to_string()
        } else {
            if self.0.is_client_error() {
                debug!(error = %self.0, status = status.as_u16(), "Request rejected");
            } else {
                warn!(error = %self.0, status = status.as_u16(), "Upstream model failure");
            }
            self.0.user_message()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Result type for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Authentication
// ============================================================================

/// The caller, from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl AuthUser {
    /// The caller's user id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.0.sub
    }

    /// Fails with [`TutorError::Forbidden`] unless the caller is a teacher.
    pub fn require_teacher(&self) -> ApiResult<()> {
        if self.0.role == Role::Teacher {
            Ok(())
        } else {
            Err(TutorError::Forbidden.into())
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> ApiResult<Self> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| TutorError::unauthorized("Unauthorized"))?;

        Ok(Self(state.tokens.verify(token)?))
    }
}

// ============================================================================
// Router Setup
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Creates the HTTP router with all API endpoints.
///
/// Routes are nested under `/api` with request tracing and permissive CORS.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handle_health))
        .route("/auth/signup", post(accounts::handle_signup))
        .route("/auth/login", post(accounts::handle_login))
        .route("/me", get(accounts::handle_me))
        .route("/analyze", post(tutoring::handle_analyze))
        .route("/teach", post(tutoring::handle_teach))
        .route("/session", get(tutoring::handle_snapshot))
        .route("/session/problem", post(tutoring::handle_submit_problem))
        .route("/session/toggle", post(tutoring::handle_toggle))
        .route("/session/learn", post(tutoring::handle_learn))
        .route("/session/teach", post(tutoring::handle_teach_turn))
        .route("/session/back", post(tutoring::handle_back))
        .route("/session/complete", post(tutoring::handle_complete))
        .route("/session/solution", post(tutoring::handle_solution))
        .route("/session/reset", post(tutoring::handle_reset))
        .route("/session/dismiss-error", post(tutoring::handle_dismiss_error))
        .route("/activity", post(community::handle_record_activity))
        .route("/badges", get(community::handle_badges))
        .route("/quiz/grade", post(community::handle_grade_quiz))
        .route("/messages/send", post(community::handle_send_message))
        .route("/messages/unread/count", get(community::handle_unread_count))
        .route("/messages/:other", get(community::handle_conversation))
        .route("/teacher/students", get(community::handle_students))
        .route("/teacher/student/:id", get(community::handle_student_detail))
        .route("/teacher/summary", get(community::handle_class_summary))
        .route("/teacher/report", get(community::handle_class_report))
        .route(
            "/teacher/problem-of-the-week",
            get(community::handle_get_problem_of_the_week)
                .post(community::handle_set_problem_of_the_week),
        );

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}
