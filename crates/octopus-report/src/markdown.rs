//! Markdown rendering of class reports.
//!
//! The document has a summary table, a per-student table, the concepts
//! students failed quizzes on, an optional insight, and a footer stamped with
//! the report's generation time.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{ClassReport, ConceptStat, StudentDigest};

/// Generates Markdown from a [`ClassReport`].
pub struct MarkdownGenerator<'a> {
    report: &'a ClassReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a ClassReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_students(&mut output);
        self.write_concepts(&mut output);
        self.write_insight(&mut output);
        self.write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Octopus Class Report: {}\n",
            escape_markdown(&self.report.teacher_name)
        );
    }

    fn write_summary(&self, output: &mut String) {
        let totals = self.report.totals();
        let pass_rate = totals.pass_rate().map_or_else(
            || "n/a".to_string(),
            |rate| {
                format!(
                    "{rate}% ({}/{})",
                    totals.quizzes_passed,
                    totals.quizzes_passed + totals.quizzes_failed
                )
            },
        );

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Students | {} |", totals.students);
        let _ = writeln!(output, "| Active Students | {} |", totals.active_students);
        let _ = writeln!(output, "| Problems Solved | {} |", totals.problems_solved);
        let _ = writeln!(output, "| Concepts Completed | {} |", totals.concepts_completed);
        let _ = writeln!(output, "| Quiz Pass Rate | {pass_rate} |");
        let _ = writeln!(output, "| Time Spent | {} |", format_duration(totals.total_seconds));
        let _ = writeln!(output);
    }

    fn write_students(&self, output: &mut String) {
        let _ = writeln!(output, "## Students\n");

        if self.report.students.is_empty() {
            let _ = writeln!(output, "*No students linked yet.*\n");
            return;
        }

        let _ = writeln!(
            output,
            "| Student | Analyzed | Completed | Solved | Quizzes Passed | Avg Score | Time | Last Active |"
        );
        let _ = writeln!(
            output,
            "|---------|----------|-----------|--------|----------------|-----------|------|-------------|"
        );
        for student in &self.report.students {
            Self::write_student_row(output, student);
        }
        let _ = writeln!(output);
    }

    fn write_student_row(output: &mut String, student: &StudentDigest) {
        let quizzes = student.quizzes_passed + student.quizzes_failed;
        let average = student
            .average_quiz_score
            .map_or_else(|| "-".to_string(), |score| format!("{score:.0}%"));
        let last_active = student
            .last_active
            .as_ref()
            .map_or_else(|| "never".to_string(), format_timestamp);

        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {}/{} | {} | {} | {} |",
            escape_markdown(&student.name),
            student.problems_analyzed,
            student.concepts_completed,
            student.problems_solved,
            student.quizzes_passed,
            quizzes,
            average,
            format_duration(student.total_seconds),
            last_active
        );
    }

    fn write_concepts(&self, output: &mut String) {
        let _ = writeln!(output, "## Concepts Needing Review\n");

        if self.report.concepts_to_review.is_empty() {
            let _ = writeln!(output, "No failed quizzes recorded.\n");
            return;
        }

        let _ = writeln!(output, "| Concept | Failed Quizzes | Students |");
        let _ = writeln!(output, "|---------|----------------|----------|");
        for stat in &self.report.concepts_to_review {
            Self::write_concept_row(output, stat);
        }
        let _ = writeln!(output);
    }

    fn write_concept_row(output: &mut String, stat: &ConceptStat) {
        let _ = writeln!(
            output,
            "| {} | {} | {} |",
            escape_markdown(&stat.concept),
            stat.failures,
            stat.students
        );
    }

    fn write_insight(&self, output: &mut String) {
        let Some(insight) = self.report.insight.as_deref() else {
            return;
        };
        let insight = insight.trim();
        if insight.is_empty() {
            return;
        }
        let _ = writeln!(output, "## Insight\n");
        let _ = writeln!(output, "{insight}\n");
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---");
        let _ = writeln!(
            output,
            "*Generated by Octopus at {}*",
            format_timestamp(&self.report.generated_at)
        );
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a duration in seconds to a human-readable string.
///
/// Examples:
/// - 65 seconds -> "1m 5s"
/// - 3661 seconds -> "1h 1m 1s"
/// - 45 seconds -> "45s"
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();

    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

/// Format: "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes Markdown control characters so names render literally in tables.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
