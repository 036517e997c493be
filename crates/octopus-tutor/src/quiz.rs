//! Multiple-choice quizzes and grading.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// One multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    /// The question text.
    pub question: String,
    /// Answer options, in display order.
    pub options: Vec<String>,
    /// Index of the correct option.
    pub correct_index: usize,
    /// Shown after the question is answered.
    #[serde(default)]
    pub explanation: String,
}

impl QuizQuestion {
    fn validate(&self, position: usize) -> Result<()> {
        if self.options.len() < 2 {
            return Err(TutorError::invalid_input(format!(
                "Question {} needs at least two options",
                position + 1
            )));
        }
        if self.correct_index >= self.options.len() {
            return Err(TutorError::invalid_input(format!(
                "Question {} has correctIndex {} but only {} options",
                position + 1,
                self.correct_index,
                self.options.len()
            )));
        }
        Ok(())
    }
}

/// Result of a graded quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOutcome {
    /// Correct answers.
    pub score: usize,
    /// Number of questions.
    pub total: usize,
    /// Score as a whole percentage, rounded down.
    pub percent: u32,
    /// Whether `percent` reached the pass mark.
    pub passed: bool,
}

impl QuizOutcome {
    fn new(score: usize, total: usize, pass_percent: u32) -> Self {
        let percent = u32::try_from(score * 100 / total.max(1)).unwrap_or(100);
        Self {
            score,
            total,
            percent,
            passed: percent >= pass_percent,
        }
    }
}

fn validate_questions(questions: &[QuizQuestion]) -> Result<()> {
    if questions.is_empty() {
        return Err(TutorError::invalid_input("Quiz has no questions"));
    }
    questions
        .iter()
        .enumerate()
        .try_for_each(|(i, question)| question.validate(i))
}

/// Grades a completed quiz.
///
/// `answers[i]` is the option chosen for question `i`; `None` means the
/// question was skipped and counts as wrong.
///
/// # Errors
///
/// Returns [`TutorError::InvalidInput`] for an empty quiz, a question whose
/// `correct_index` is out of range, or an answer count that does not match
/// the number of questions.
pub fn grade(questions: &[QuizQuestion], answers: &[Option<usize>], pass_percent: u32) -> Result<QuizOutcome> {
    validate_questions(questions)?;
    if answers.len() != questions.len() {
        return Err(TutorError::invalid_input(format!(
            "Expected {} answers, got {}",
            questions.len(),
            answers.len()
        )));
    }

    let score = questions
        .iter()
        .zip(answers)
        .filter(|(question, answer)| **answer == Some(question.correct_index))
        .count();

    Ok(QuizOutcome::new(score, questions.len(), pass_percent))
}

/// Step-by-step walk through a quiz.
///
/// Each question accepts one selection; later selections on the same
/// question are ignored.
#[derive(Debug, Clone)]
pub struct QuizRun {
    questions: Vec<QuizQuestion>,
    current: usize,
    selected: Option<usize>,
    score: usize,
}

/// Where a [`QuizRun`] stands after [`QuizRun::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizProgress {
    /// Moved on to the question at this index.
    Question(usize),
    /// No questions remain.
    Finished(QuizOutcome),
}

impl QuizRun {
    /// Starts a run.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::InvalidInput`] for an invalid quiz.
    pub fn new(questions: Vec<QuizQuestion>) -> Result<Self> {
        validate_questions(&questions)?;
        Ok(Self {
            questions,
            current: 0,
            selected: None,
            score: 0,
        })
    }

    /// The question being shown.
    #[must_use]
    pub fn current(&self) -> &QuizQuestion {
        &self.questions[self.current.min(self.questions.len() - 1)]
    }

    /// Zero-based index of the current question.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.current
    }

    /// Correct answers so far.
    #[must_use]
    pub const fn score(&self) -> usize {
        self.score
    }

    /// Whether the current question has been answered.
    #[must_use]
    pub const fn is_answered(&self) -> bool {
        self.selected.is_some()
    }

    /// Selects an option for the current question.
    ///
    /// Returns whether the selection was correct, or `None` if the question
    /// was already answered or `option` is out of range.
    pub fn select(&mut self, option: usize) -> Option<bool> {
        if self.selected.is_some() || option >= self.current().options.len() {
            return None;
        }
        self.selected = Some(option);
        let correct = option == self.current().correct_index;
        if correct {
            self.score += 1;
        }
        Some(correct)
    }

    /// Advances to the next question, or finishes the quiz.
    pub fn next(&mut self, pass_percent: u32) -> QuizProgress {
        if self.current + 1 < self.questions.len() {
            self.current += 1;
            self.selected = None;
            QuizProgress::Question(self.current)
        } else {
            QuizProgress::Finished(QuizOutcome::new(self.score, self.questions.len(), pass_percent))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn question(correct_index: usize) -> QuizQuestion {
        QuizQuestion {
            question: "What is 1/2 + 1/4?".to_string(),
            options: vec!["1/6".to_string(), "3/4".to_string(), "2/6".to_string()],
            correct_index,
            explanation: "Use a common denominator.".to_string(),
        }
    }

    #[test]
    fn test_grade_counts_correct_answers() {
        let questions = vec![question(1), question(0), question(2)];

        let outcome = grade(&questions, &[Some(1), Some(0), Some(1)], 70).unwrap();

        assert_eq!(outcome.score, 2);
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.percent, 66);
        assert!(!outcome.passed);
    }

    #[test]
    fn test_grade_pass_mark_is_inclusive() {
        let questions: Vec<_> = (0..10).map(|_| question(1)).collect();
        let mut answers = vec![Some(1); 7];
        answers.extend([Some(0), None, Some(2)]);

        let outcome = grade(&questions, &answers, 70).unwrap();

        assert_eq!(outcome.percent, 70);
        assert!(outcome.passed);
    }

    #[test]
    fn test_grade_rejects_invalid_quizzes() {
        assert!(matches!(grade(&[], &[], 70), Err(TutorError::InvalidInput(_))));
        assert!(grade(&[question(5)], &[Some(0)], 70).is_err());
        assert!(grade(&[question(1)], &[Some(1), Some(1)], 70).is_err());

        let mut single = question(0);
        single.options.truncate(1);
        assert!(grade(&[single], &[Some(0)], 70).is_err());
    }

    #[test]
    fn test_run_ignores_second_selection() {
        let mut run = QuizRun::new(vec![question(1), question(2)]).unwrap();

        assert_eq!(run.select(0), Some(false));
        assert_eq!(run.select(1), None);
        assert!(run.is_answered());
        assert_eq!(run.score(), 0);

        assert_eq!(run.next(50), QuizProgress::Question(1));
        assert!(!run.is_answered());
        assert_eq!(run.select(2), Some(true));

        let QuizProgress::Finished(outcome) = run.next(50) else {
            unreachable!("quiz should be finished");
        };
        assert_eq!(outcome.score, 1);
        assert_eq!(outcome.percent, 50);
        assert!(outcome.passed);
    }

    #[test]
    fn test_run_rejects_out_of_range_option() {
        let mut run = QuizRun::new(vec![question(0)]).unwrap();
        assert_eq!(run.select(9), None);
        assert!(!run.is_answered());
        assert_eq!(run.position(), 0);
        assert_eq!(run.current().correct_index, 0);
    }

    #[test]
    fn test_question_deserializes_camel_case() {
        let q: QuizQuestion = serde_json::from_str(
            r#"{"question": "2+2?", "options": ["3", "4"], "correctIndex": 1}"#,
        )
        .unwrap();
        assert_eq!(q.correct_index, 1);
        assert!(q.explanation.is_empty());
    }
}
