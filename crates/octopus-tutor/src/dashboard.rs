//! Teacher dashboard queries built on the store.

use octopus_report::{ActivityRecord, ClassReport, RosterEntry};
use tracing::debug;

use crate::error::Result;
use crate::llm::TutorModel;
use crate::store::{ActivityKind, ClassActivity, Store, User};

/// Shown instead of an insight when a teacher has no students.
pub const NO_STUDENTS_MESSAGE: &str =
    "You haven't linked any students yet. Share your teacher code to get started!";

/// Activity rows sent to the model for a class insight.
pub const SUMMARY_ACTIVITY_LIMIT: usize = 50;

/// Activity rows aggregated into a class report.
pub const REPORT_ACTIVITY_LIMIT: usize = 10_000;

const fn report_kind(kind: ActivityKind) -> octopus_report::ActivityKind {
    match kind {
        ActivityKind::Analyze => octopus_report::ActivityKind::Analyze,
        ActivityKind::Learn => octopus_report::ActivityKind::Learn,
        ActivityKind::Complete => octopus_report::ActivityKind::Complete,
        ActivityKind::Solve => octopus_report::ActivityKind::Solve,
        ActivityKind::QuizPass => octopus_report::ActivityKind::QuizPass,
        ActivityKind::QuizFail => octopus_report::ActivityKind::QuizFail,
    }
}

fn activity_record(row: ClassActivity) -> ActivityRecord {
    let mut record = ActivityRecord::new(row.student_id, report_kind(row.kind), row.created_at)
        .with_duration(u64::try_from(row.duration_seconds).unwrap_or(0));
    record.concept_label = row.concept_label;
    record.score = row.score;
    record
}

/// Asks the model for a short insight about the teacher's class.
///
/// Returns [`NO_STUDENTS_MESSAGE`] without calling the model when no student
/// is linked.
pub async fn class_summary(store: &Store, model: &dyn TutorModel, teacher_id: i64) -> Result<String> {
    if store.students_of(teacher_id)?.is_empty() {
        return Ok(NO_STUDENTS_MESSAGE.to_string());
    }
    let activity = store.class_activity(teacher_id, SUMMARY_ACTIVITY_LIMIT)?;
    debug!(teacher_id, rows = activity.len(), "Summarizing class activity");
    let activity_json = serde_json::to_string(&activity)?;
    model.summarize_class(&activity_json).await
}

/// Aggregates the teacher's roster and class activity into a report.
pub fn class_report(store: &Store, teacher: &User, insight: Option<String>) -> Result<ClassReport> {
    let roster = store
        .students_of(teacher.id)?
        .into_iter()
        .map(|student| RosterEntry::new(student.id, student.name));
    let activities = store
        .class_activity(teacher.id, REPORT_ACTIVITY_LIMIT)?
        .into_iter()
        .map(activity_record);

    let mut builder = ClassReport::builder()
        .teacher_name(teacher.name.clone())
        .roster(roster)
        .activities(activities);
    if let Some(insight) = insight {
        builder = builder.insight(insight);
    }
    Ok(builder.build()?)
}
