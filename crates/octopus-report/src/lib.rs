//! Octopus Class Reports
//!
//! This crate turns a teacher's roster and their students' activity log into
//! a [`ClassReport`]: per-student aggregates, class totals, and the concepts
//! students keep failing quizzes on. Reports serialize to JSON or render to
//! Markdown.
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON
//! - [`MarkdownGenerator`] - Human-readable Markdown
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use octopus_report::{ActivityKind, ActivityRecord, ClassReport, RosterEntry, MarkdownGenerator};
//!
//! let report = ClassReport::builder()
//!     .teacher_name("Ms. Rivera")
//!     .student(RosterEntry::new(1, "Alice"))
//!     .activity(ActivityRecord::new(1, ActivityKind::Solve, Utc::now()))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(report.students[0].problems_solved, 1);
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Octopus Class Report: Ms. Rivera"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Activity input (local copy to avoid cross-crate dependency)
// ============================================================================

/// What a student did.
///
/// Mirrors the tutoring service's activity kinds so this crate stays
/// independent of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Submitted a problem for analysis.
    Analyze,
    /// Opened a concept's teaching session.
    Learn,
    /// Marked a concept as understood.
    Complete,
    /// Reached a problem's solution.
    Solve,
    /// Passed a quiz.
    QuizPass,
    /// Failed a quiz.
    QuizFail,
}

/// A student on the teacher's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Student id.
    pub id: i64,
    /// Display name.
    pub name: String,
}

impl RosterEntry {
    /// Creates a roster entry.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// One logged activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Who did it.
    pub student_id: i64,
    /// What happened.
    pub kind: ActivityKind,
    /// The concept involved.
    pub concept_label: Option<String>,
    /// Time spent, in seconds.
    pub duration_seconds: u64,
    /// Quiz score as a percentage.
    pub score: Option<i64>,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    /// Creates a record with no details.
    #[must_use]
    pub const fn new(student_id: i64, kind: ActivityKind, created_at: DateTime<Utc>) -> Self {
        Self {
            student_id,
            kind,
            concept_label: None,
            duration_seconds: 0,
            score: None,
            created_at,
        }
    }

    /// Attaches a concept label.
    #[must_use]
    pub fn with_concept(mut self, label: impl Into<String>) -> Self {
        self.concept_label = Some(label.into());
        self
    }

    /// Attaches a quiz score.
    #[must_use]
    pub const fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    /// Attaches time spent.
    #[must_use]
    pub const fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }
}

// ============================================================================
// Report
// ============================================================================

/// A teacher's class digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    /// Teacher the report is for.
    pub teacher_name: String,

    /// When the report was built.
    pub generated_at: DateTime<Utc>,

    /// One digest per rostered student, in roster order.
    pub students: Vec<StudentDigest>,

    /// Concepts with failed quizzes, worst first.
    pub concepts_to_review: Vec<ConceptStat>,

    /// Optional narrative insight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<String>,
}

impl ClassReport {
    /// Creates a new report builder.
    #[must_use]
    pub fn builder() -> ClassReportBuilder {
        ClassReportBuilder::default()
    }

    /// Serializes the report to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }

    /// Sums the per-student digests.
    #[must_use]
    pub fn totals(&self) -> ClassTotals {
        self.students.iter().fold(ClassTotals::default(), |mut acc, s| {
            acc.students += 1;
            acc.active_students += usize::from(s.last_active.is_some());
            acc.problems_solved += s.problems_solved;
            acc.concepts_completed += s.concepts_completed;
            acc.quizzes_passed += s.quizzes_passed;
            acc.quizzes_failed += s.quizzes_failed;
            acc.total_seconds += s.total_seconds;
            acc
        })
    }
}

/// Class-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassTotals {
    /// Rostered students.
    pub students: usize,
    /// Students with any activity.
    pub active_students: usize,
    /// Problems solved.
    pub problems_solved: usize,
    /// Concepts completed.
    pub concepts_completed: usize,
    /// Quizzes passed.
    pub quizzes_passed: usize,
    /// Quizzes failed.
    pub quizzes_failed: usize,
    /// Time spent, in seconds.
    pub total_seconds: u64,
}

impl ClassTotals {
    /// Quiz pass rate as a whole percentage, if any quiz was taken.
    #[must_use]
    pub fn pass_rate(&self) -> Option<usize> {
        let taken = self.quizzes_passed + self.quizzes_failed;
        (taken > 0).then(|| self.quizzes_passed * 100 / taken)
    }
}

/// Per-student aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentDigest {
    /// Student id.
    pub student_id: i64,
    /// Display name.
    pub name: String,
    /// `analyze` count.
    pub problems_analyzed: usize,
    /// `learn` count.
    pub concepts_started: usize,
    /// `complete` count.
    pub concepts_completed: usize,
    /// `solve` count.
    pub problems_solved: usize,
    /// `quiz_pass` count.
    pub quizzes_passed: usize,
    /// `quiz_fail` count.
    pub quizzes_failed: usize,
    /// Mean quiz score, if any quiz carried one.
    pub average_quiz_score: Option<f64>,
    /// Time spent, in seconds.
    pub total_seconds: u64,
    /// Most recent activity.
    pub last_active: Option<DateTime<Utc>>,
}

impl StudentDigest {
    fn new(entry: &RosterEntry) -> Self {
        Self {
            student_id: entry.id,
            name: entry.name.clone(),
            ..Self::default()
        }
    }

    fn absorb(&mut self, record: &ActivityRecord) {
        match record.kind {
            ActivityKind::Analyze => self.problems_analyzed += 1,
            ActivityKind::Learn => self.concepts_started += 1,
            ActivityKind::Complete => self.concepts_completed += 1,
            ActivityKind::Solve => self.problems_solved += 1,
            ActivityKind::QuizPass => self.quizzes_passed += 1,
            ActivityKind::QuizFail => self.quizzes_failed += 1,
        }
        self.total_seconds += record.duration_seconds;
        if self.last_active.map_or(true, |last| record.created_at > last) {
            self.last_active = Some(record.created_at);
        }
    }
}

/// A concept students failed quizzes on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptStat {
    /// Concept label.
    pub concept: String,
    /// Failed quizzes on it.
    pub failures: usize,
    /// Distinct students who failed it.
    pub students: usize,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ClassReport`].
#[derive(Debug, Clone, Default)]
pub struct ClassReportBuilder {
    teacher_name: Option<String>,
    generated_at: Option<DateTime<Utc>>,
    roster: Vec<RosterEntry>,
    activities: Vec<ActivityRecord>,
    insight: Option<String>,
}

impl ClassReportBuilder {
    /// Sets the teacher's name.
    #[must_use]
    pub fn teacher_name(mut self, name: impl Into<String>) -> Self {
        self.teacher_name = Some(name.into());
        self
    }

    /// Fixes the generation time (defaults to now).
    #[must_use]
    pub const fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    /// Adds one student to the roster.
    #[must_use]
    pub fn student(mut self, entry: RosterEntry) -> Self {
        self.roster.push(entry);
        self
    }

    /// Adds students to the roster.
    #[must_use]
    pub fn roster(mut self, roster: impl IntoIterator<Item = RosterEntry>) -> Self {
        self.roster.extend(roster);
        self
    }

    /// Adds one activity.
    #[must_use]
    pub fn activity(mut self, record: ActivityRecord) -> Self {
        self.activities.push(record);
        self
    }

    /// Adds activities.
    #[must_use]
    pub fn activities(mut self, records: impl IntoIterator<Item = ActivityRecord>) -> Self {
        self.activities.extend(records);
        self
    }

    /// Attaches a narrative insight.
    #[must_use]
    pub fn insight(mut self, insight: impl Into<String>) -> Self {
        self.insight = Some(insight.into());
        self
    }

    /// Aggregates the activities into a report.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::InvalidData`] if the teacher name is missing,
    /// a student id repeats in the roster, or an activity belongs to a
    /// student not on the roster.
    pub fn build(self) -> Result<ClassReport> {
        let teacher_name = self
            .teacher_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ReportError::InvalidData("teacher name is required".to_string()))?;

        let mut index = HashMap::with_capacity(self.roster.len());
        let mut students = Vec::with_capacity(self.roster.len());
        for entry in &self.roster {
            if index.insert(entry.id, students.len()).is_some() {
                return Err(ReportError::InvalidData(format!(
                    "student {} appears twice in the roster",
                    entry.id
                )));
            }
            students.push(StudentDigest::new(entry));
        }

        let mut scores: HashMap<i64, (i64, usize)> = HashMap::new();
        let mut failures: BTreeMap<&str, (usize, HashSet<i64>)> = BTreeMap::new();

        for record in &self.activities {
            let slot = *index.get(&record.student_id).ok_or_else(|| {
                ReportError::InvalidData(format!(
                    "activity for student {} who is not on the roster",
                    record.student_id
                ))
            })?;
            students[slot].absorb(record);

            if matches!(record.kind, ActivityKind::QuizPass | ActivityKind::QuizFail) {
                if let Some(score) = record.score {
                    let entry = scores.entry(record.student_id).or_default();
                    entry.0 += score;
                    entry.1 += 1;
                }
            }
            if record.kind == ActivityKind::QuizFail {
                if let Some(concept) = record.concept_label.as_deref() {
                    let entry = failures.entry(concept).or_default();
                    entry.0 += 1;
                    entry.1.insert(record.student_id);
                }
            }
        }

        for student in &mut students {
            if let Some(&(sum, count)) = scores.get(&student.student_id) {
                #[allow(clippy::cast_precision_loss)]
                let average = sum as f64 / count as f64;
                student.average_quiz_score = Some(average);
            }
        }

        let mut concepts_to_review: Vec<ConceptStat> = failures
            .into_iter()
            .map(|(concept, (failures, who))| ConceptStat {
                concept: concept.to_string(),
                failures,
                students: who.len(),
            })
            .collect();
        concepts_to_review.sort_by(|a, b| b.failures.cmp(&a.failures).then_with(|| a.concept.cmp(&b.concept)));

        Ok(ClassReport {
            teacher_name,
            generated_at: self.generated_at.unwrap_or_else(Utc::now),
            students,
            concepts_to_review,
            insight: self.insight,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
