//! Octopus Tutor
//!
//! Breaks a math problem into a two-level forest of prerequisite concepts,
//! walks the learner through them one at a time, and unlocks a worked
//! solution once every concept is marked understood. Also serves accounts,
//! progress badges, quizzes, messaging, and a teacher dashboard over HTTP.

pub mod api;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod llm;
pub mod prerequisite;
pub mod problem;
pub mod quiz;
pub mod session;
pub mod store;

pub use api::{create_router, ApiError, AppState, AuthUser, ErrorResponse, SessionResponse};
pub use auth::{Claims, Role, TokenIssuer};
pub use config::{AuthConfig, Config, LlmConfig, LlmProvider, QuizConfig, ServerConfig};
pub use error::{LlmErrorKind, Result, TutorError};
pub use llm::{ChatCompletionsClient, ChatMessage, ChatRole, TeachingReply, TutorModel};
pub use prerequisite::PrerequisiteNode;
pub use problem::{GeneratedProblem, MathProblem, SolutionStep, SolutionWalkthrough};
pub use quiz::{QuizOutcome, QuizQuestion, QuizRun};
pub use session::{SessionRegistry, SessionSnapshot, SubmitOutcome, TutorSession, View};
pub use store::{ActivityKind, Badge, NewActivity, Store, User};
