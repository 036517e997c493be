//! Problem analysis, teaching, and the learner's session.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiResult, AppState, AuthUser};
use crate::error::TutorError;
use crate::llm::{ChatMessage, TeachingReply};
use crate::problem::MathProblem;
use crate::session::{self, SessionSnapshot, SubmitOutcome, TutorSession};
use crate::store::{ActivityKind, Badge, NewActivity};

/// Request body for `POST /api/analyze` and `POST /api/session/problem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemRequest {
    /// The problem as typed.
    pub problem: String,
}

/// Alias kept for the stateless route.
pub type AnalyzeRequest = ProblemRequest;

/// Request body for `POST /api/teach`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachRequest {
    /// Concept being taught.
    pub concept: String,
    /// Conversation so far, ending with the learner's message.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

/// Request body for routes that name a concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptRequest {
    /// Concept id.
    pub id: String,
}

/// Request body for `POST /api/session/teach`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachTurnRequest {
    /// The learner's message.
    pub message: String,
}

/// Response body for session routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// The session after the operation.
    pub session: SessionSnapshot,
    /// Outcome of a problem submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SubmitOutcome>,
    /// The tutor's reply to a teaching turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<TeachingReply>,
    /// Badges earned by the activity this operation recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_badges: Vec<Badge>,
}

impl SessionResponse {
    fn of(session: SessionSnapshot) -> Self {
        Self {
            session,
            result: None,
            reply: None,
            new_badges: Vec::new(),
        }
    }
}

fn record(state: &AppState, user_id: i64, activity: &NewActivity) -> ApiResult<Vec<Badge>> {
    Ok(state.store.record_activity(user_id, activity)?)
}

/// Handler for `POST /api/analyze`.
///
/// Runs one generation round trip without touching the caller's session.
pub(super) async fn handle_analyze(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<MathProblem>> {
    let text = request.problem.trim();
    if text.is_empty() {
        return Err(TutorError::invalid_input("Problem text must not be empty").into());
    }
    let generated = state.model.generate(text).await?;
    Ok(Json(MathProblem::from_generated(text, generated)))
}

/// Handler for `POST /api/teach`.
pub(super) async fn handle_teach(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    Json(request): Json<TeachRequest>,
) -> ApiResult<Json<TeachingReply>> {
    let concept = request.concept.trim();
    if concept.is_empty() {
        return Err(TutorError::invalid_input("Concept must not be empty").into());
    }
    Ok(Json(state.model.teach(concept, &request.history).await?))
}

/// Handler for `GET /api/session`.
pub(super) async fn handle_snapshot(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Json<SessionSnapshot> {
    let session = state.sessions.session_for(caller.id()).await;
    let snapshot = session.lock().await.snapshot();
    Json(snapshot)
}

/// Handler for `POST /api/session/problem`.
pub(super) async fn handle_submit_problem(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(request): Json<ProblemRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.sessions.session_for(caller.id()).await;
    let outcome = session::submit_problem(&session, state.model.as_ref(), &request.problem).await?;
    debug!(user_id = caller.id(), outcome = ?outcome, "Problem submitted");

    let new_badges = if outcome == SubmitOutcome::Analyzed {
        record(
            &state,
            caller.id(),
            &NewActivity::new(ActivityKind::Analyze).with_problem(request.problem.trim()),
        )?
    } else {
        Vec::new()
    };

    let snapshot = session.lock().await.snapshot();
    Ok(Json(SessionResponse {
        result: Some(outcome),
        new_badges,
        ..SessionResponse::of(snapshot)
    }))
}

/// Handler for `POST /api/session/toggle`.
pub(super) async fn handle_toggle(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(request): Json<ConceptRequest>,
) -> Json<SessionResponse> {
    let session = state.sessions.session_for(caller.id()).await;
    let mut guard = session.lock().await;
    guard.toggle(&request.id);
    Json(SessionResponse::of(guard.snapshot()))
}

/// Handler for `POST /api/session/learn`.
pub(super) async fn handle_learn(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(request): Json<ConceptRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.sessions.session_for(caller.id()).await;
    let (label, problem, snapshot) = {
        let mut guard = session.lock().await;
        let label = guard.select_concept_to_learn(&request.id)?;
        let problem = guard.problem().map(|p| p.original_problem.clone());
        (label, problem, guard.snapshot())
    };

    let mut activity = NewActivity::new(ActivityKind::Learn).with_concept(label);
    activity.problem_text = problem;
    let new_badges = record(&state, caller.id(), &activity)?;

    Ok(Json(SessionResponse {
        new_badges,
        ..SessionResponse::of(snapshot)
    }))
}

/// Handler for `POST /api/session/teach`.
pub(super) async fn handle_teach_turn(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(request): Json<TeachTurnRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.sessions.session_for(caller.id()).await;
    let reply = session::teach_turn(&session, state.model.as_ref(), &request.message).await?;
    let snapshot = session.lock().await.snapshot();
    Ok(Json(SessionResponse {
        reply: Some(reply),
        ..SessionResponse::of(snapshot)
    }))
}

/// Handler for `POST /api/session/back`.
pub(super) async fn handle_back(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.sessions.session_for(caller.id()).await;
    let mut guard = session.lock().await;
    guard.back()?;
    Ok(Json(SessionResponse::of(guard.snapshot())))
}

/// Handler for `POST /api/session/complete`.
pub(super) async fn handle_complete(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.sessions.session_for(caller.id()).await;
    let (completed, problem, snapshot) = {
        let mut guard = session.lock().await;
        let completed = guard.complete_concept()?;
        let problem = guard.problem().map(|p| p.original_problem.clone());
        (completed, problem, guard.snapshot())
    };

    let new_badges = match completed {
        Some(label) => {
            let mut activity = NewActivity::new(ActivityKind::Complete).with_concept(label);
            activity.problem_text = problem;
            record(&state, caller.id(), &activity)?
        }
        None => Vec::new(),
    };

    Ok(Json(SessionResponse {
        new_badges,
        ..SessionResponse::of(snapshot)
    }))
}

/// Handler for `POST /api/session/solution`.
pub(super) async fn handle_solution(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.sessions.session_for(caller.id()).await;
    let (problem, snapshot) = {
        let mut guard = session.lock().await;
        guard.proceed_to_solution()?;
        let problem = guard.problem().map(|p| p.original_problem.clone());
        (problem, guard.snapshot())
    };

    let mut activity = NewActivity::new(ActivityKind::Solve);
    activity.problem_text = problem;
    let new_badges = record(&state, caller.id(), &activity)?;

    Ok(Json(SessionResponse {
        new_badges,
        ..SessionResponse::of(snapshot)
    }))
}

/// Handler for `POST /api/session/reset`.
///
/// The session leaves the registry; the next request starts a fresh one.
pub(super) async fn handle_reset(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Json<SessionResponse> {
    if let Some(session) = state.sessions.remove(caller.id()).await {
        session.lock().await.reset();
    }
    Json(SessionResponse::of(TutorSession::new().snapshot()))
}

/// Handler for `POST /api/session/dismiss-error`.
pub(super) async fn handle_dismiss_error(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Json<SessionResponse> {
    let session = state.sessions.session_for(caller.id()).await;
    let mut guard = session.lock().await;
    guard.dismiss_error();
    Json(SessionResponse::of(guard.snapshot()))
}
