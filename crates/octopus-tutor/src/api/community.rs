//! Progress, quizzes, messaging, and the teacher dashboard.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use octopus_report::{json::JsonGenerator, MarkdownGenerator};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiResult, AppState, AuthUser};
use crate::auth::Role;
use crate::dashboard;
use crate::error::TutorError;
use crate::quiz::{self, QuizOutcome, QuizQuestion};
use crate::store::{Activity, ActivityKind, Badge, Message, NewActivity, ProblemOfTheWeek, User};

/// Activity rows shown on a student's detail page.
const STUDENT_DETAIL_LIMIT: usize = 50;

/// Response body for routes that record activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    /// Badges awarded by this activity.
    pub new_badges: Vec<Badge>,
}

/// Request body for `POST /api/quiz/grade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    /// The quiz as it was shown.
    pub questions: Vec<QuizQuestion>,
    /// Chosen option per question; `null` for skipped.
    pub answers: Vec<Option<usize>>,
    /// Concept the quiz covered.
    #[serde(default)]
    pub concept: Option<String>,
}

/// Response body for `POST /api/quiz/grade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResponse {
    /// The grade.
    #[serde(flatten)]
    pub outcome: QuizOutcome,
    /// Badges awarded by the recorded result.
    pub new_badges: Vec<Badge>,
}

/// Request body for `POST /api/messages/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Recipient's user id.
    pub receiver_id: i64,
    /// Message text.
    pub content: String,
}

/// Response body for `GET /api/messages/unread/count`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnreadCount {
    /// Unread messages addressed to the caller.
    pub count: i64,
}

/// Response body for `GET /api/teacher/student/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentDetail {
    /// The student.
    pub student: User,
    /// Recent activity, newest first.
    pub activities: Vec<Activity>,
}

/// Response body for `GET /api/teacher/summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    /// Insight paragraph.
    pub summary: String,
}

/// Query for `GET /api/teacher/report`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportQuery {
    /// `markdown` (default) or `json`.
    #[serde(default)]
    pub format: Option<String>,
    /// Ask the model for an insight paragraph.
    #[serde(default)]
    pub insight: bool,
}

/// Request body for `POST /api/teacher/problem-of-the-week`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemOfTheWeekRequest {
    /// The problem text.
    pub problem_text: String,
}

// ============================================================================
// Progress
// ============================================================================

/// Handler for `POST /api/activity`.
pub(super) async fn handle_record_activity(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(activity): Json<NewActivity>,
) -> ApiResult<Json<ActivityResponse>> {
    let new_badges = state.store.record_activity(caller.id(), &activity)?;
    Ok(Json(ActivityResponse { new_badges }))
}

/// Handler for `GET /api/badges`.
pub(super) async fn handle_badges(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<Vec<Badge>>> {
    Ok(Json(state.store.badges_for(caller.id())?))
}

/// Handler for `POST /api/quiz/grade`.
pub(super) async fn handle_grade_quiz(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(request): Json<GradeRequest>,
) -> ApiResult<Json<GradeResponse>> {
    let outcome = quiz::grade(&request.questions, &request.answers, state.config.quiz.pass_percent)?;

    let kind = if outcome.passed {
        ActivityKind::QuizPass
    } else {
        ActivityKind::QuizFail
    };
    let mut activity = NewActivity::new(kind).with_score(i64::from(outcome.percent));
    activity.concept_label = request.concept.filter(|c| !c.trim().is_empty());
    let new_badges = state.store.record_activity(caller.id(), &activity)?;

    info!(
        user_id = caller.id(),
        score = outcome.score,
        total = outcome.total,
        passed = outcome.passed,
        "Quiz graded"
    );
    Ok(Json(GradeResponse { outcome, new_badges }))
}

// ============================================================================
// Messaging
// ============================================================================

/// Handler for `POST /api/messages/send`.
pub(super) async fn handle_send_message(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let content = request.content.trim();
    if content.is_empty() {
        return Err(TutorError::invalid_input("Message must not be empty").into());
    }
    let message = state.store.send_message(caller.id(), request.receiver_id, content)?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Handler for `GET /api/messages/:other`.
pub(super) async fn handle_conversation(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(other): Path<i64>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.store.conversation(caller.id(), other)?))
}

/// Handler for `GET /api/messages/unread/count`.
pub(super) async fn handle_unread_count(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<UnreadCount>> {
    Ok(Json(UnreadCount {
        count: state.store.unread_count(caller.id())?,
    }))
}

// ============================================================================
// Teacher dashboard
// ============================================================================

/// Handler for `GET /api/teacher/students`.
pub(super) async fn handle_students(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<Vec<User>>> {
    caller.require_teacher()?;
    Ok(Json(state.store.students_of(caller.id())?))
}

/// Handler for `GET /api/teacher/student/:id`.
pub(super) async fn handle_student_detail(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(student_id): Path<i64>,
) -> ApiResult<Json<StudentDetail>> {
    caller.require_teacher()?;
    let student = state
        .store
        .student_of(caller.id(), student_id)?
        .ok_or_else(|| TutorError::not_found("Student not found or does not belong to this teacher"))?;
    let activities = state.store.activities(student.id, STUDENT_DETAIL_LIMIT)?;
    Ok(Json(StudentDetail { student, activities }))
}

/// Handler for `GET /api/teacher/summary`.
pub(super) async fn handle_class_summary(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<SummaryResponse>> {
    caller.require_teacher()?;
    let summary = dashboard::class_summary(&state.store, state.model.as_ref(), caller.id()).await?;
    Ok(Json(SummaryResponse { summary }))
}

/// Handler for `GET /api/teacher/report`.
pub(super) async fn handle_class_report(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Response> {
    caller.require_teacher()?;
    let teacher = state
        .store
        .user(caller.id())?
        .ok_or_else(|| TutorError::not_found("User not found"))?;

    let insight = if query.insight {
        Some(dashboard::class_summary(&state.store, state.model.as_ref(), teacher.id).await?)
    } else {
        None
    };
    let report = dashboard::class_report(&state.store, &teacher, insight)?;

    match query.format.as_deref().unwrap_or("markdown") {
        "markdown" | "md" => {
            let markdown = MarkdownGenerator::new(&report).generate();
            Ok(([(CONTENT_TYPE, "text/markdown; charset=utf-8")], markdown).into_response())
        }
        "json" => {
            let json = JsonGenerator::new(&report).generate().map_err(TutorError::from)?;
            Ok(([(CONTENT_TYPE, "application/json")], json).into_response())
        }
        other => Err(TutorError::invalid_input(format!("Unknown report format '{other}'")).into()),
    }
}

/// Handler for `GET /api/teacher/problem-of-the-week`.
///
/// Teachers see their own problem, students their teacher's.
pub(super) async fn handle_get_problem_of_the_week(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Json<Option<ProblemOfTheWeek>>> {
    let teacher_id = match caller.0.role {
        Role::Teacher => Some(caller.id()),
        Role::Student => caller.0.teacher_id,
        Role::Individual => None,
    };
    let problem = match teacher_id {
        Some(id) => state.store.problem_of_the_week(id)?,
        None => None,
    };
    Ok(Json(problem))
}

/// Handler for `POST /api/teacher/problem-of-the-week`.
pub(super) async fn handle_set_problem_of_the_week(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(request): Json<ProblemOfTheWeekRequest>,
) -> ApiResult<Json<ProblemOfTheWeek>> {
    caller.require_teacher()?;
    let text = request.problem_text.trim();
    if text.is_empty() {
        return Err(TutorError::invalid_input("Problem text must not be empty").into());
    }
    info!(teacher_id = caller.id(), "Problem of the week updated");
    Ok(Json(state.store.set_problem_of_the_week(caller.id(), text)?))
}
