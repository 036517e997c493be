//! The per-learner session controller.
//!
//! A [`TutorSession`] owns the active [`MathProblem`] and decides which
//! screen the learner is on. The view moves through:
//!
//! - `Input` -> `Tree` after an accepted generation round trip
//! - `Tree` -> `Learning` when a concept is selected
//! - `Learning` -> `Tree` via back (keeps the active concept) or via
//!   complete (toggles it once, then clears it)
//! - `Tree` -> `Solution` once every prerequisite is completed
//! - `Solution` -> `Tree` via back
//! - any view -> `Input` on reset, discarding the problem
//!
//! The only asynchronous step is generation. [`submit_problem`] holds the
//! lock just long enough to raise the loading flag, so a second submission
//! arriving mid-flight sees the flag and is ignored. Each round trip carries
//! a ticket; a reset invalidates it, and a round trip that is dropped before
//! it settles lowers the flag on its way out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, TutorError};
use crate::llm::{ChatMessage, TeachingReply, TutorModel};
use crate::prerequisite::{self, PrerequisiteNode};
use crate::problem::{GeneratedProblem, MathProblem, SolutionWalkthrough};

/// Shown when the model produced no prerequisites.
pub const NO_PREREQUISITES_MESSAGE: &str =
    "We couldn't identify any prerequisites for this problem. Try rephrasing it.";

/// Shown when the model produced no worked solution.
pub const NO_SOLUTION_MESSAGE: &str = "Failed to generate a step-by-step solution. Please try again.";

/// Shown when a submission was cut off before the model answered.
pub const INTERRUPTED_MESSAGE: &str = "The analysis was interrupted. Please submit the problem again.";

/// Opening line of every learning conversation.
#[must_use]
pub fn greeting(label: &str) -> String {
    format!("Hello! Let's dive into **{label}**. To start, what's your current understanding of this concept?")
}

// ============================================================================
// View
// ============================================================================

/// The screen the learner is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Problem entry.
    #[default]
    Input,
    /// The prerequisite map.
    Tree,
    /// Interactive teaching of the active concept.
    Learning,
    /// Worked solution of the similar problem.
    Solution,
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Tree => write!(f, "tree"),
            Self::Learning => write!(f, "learning"),
            Self::Solution => write!(f, "solution"),
        }
    }
}

/// Result of a problem submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The problem was accepted and the view is now `Tree`.
    Analyzed,
    /// A generation was already in flight; nothing happened.
    Ignored,
    /// Generation failed or was rejected; the view stays `Input` and the
    /// message is surfaced on the session.
    Failed(String),
    /// The session was reset while the model worked; the result was
    /// discarded.
    Superseded,
}

// ============================================================================
// TutorSession
// ============================================================================

/// State of one learner's problem-solving session.
#[derive(Debug, Clone, Default)]
pub struct TutorSession {
    view: View,
    problem: Option<MathProblem>,
    active_concept: Option<String>,
    loading: bool,
    generation: u64,
    error: Option<String>,
    transcript: Vec<ChatMessage>,
}

impl TutorSession {
    /// Creates an empty session on the input screen.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current view.
    #[must_use]
    pub const fn view(&self) -> View {
        self.view
    }

    /// The active problem, if one was accepted.
    #[must_use]
    pub const fn problem(&self) -> Option<&MathProblem> {
        self.problem.as_ref()
    }

    /// Id of the concept being taught, if any.
    #[must_use]
    pub fn active_concept(&self) -> Option<&str> {
        self.active_concept.as_deref()
    }

    /// Whether a generation round trip is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// The surfaced error message, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The learning conversation for the active concept.
    #[must_use]
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// The forest of the active problem, or an empty one.
    #[must_use]
    pub fn forest(&self) -> &[PrerequisiteNode] {
        self.problem
            .as_ref()
            .map_or(&[][..], |problem| problem.prerequisites.as_slice())
    }

    /// Whether every prerequisite is completed. Always recomputed.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.problem.as_ref().is_some_and(MathProblem::all_completed)
    }

    /// Raises the loading flag before a generation round trip.
    ///
    /// Returns the round trip's ticket, or `Ok(None)` when one is already in
    /// flight.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::InvalidStateTransition`] outside the input view.
    pub fn begin_generation(&mut self) -> Result<Option<u64>> {
        if self.loading {
            debug!("Submission ignored: generation already in flight");
            return Ok(None);
        }
        if self.view != View::Input {
            return Err(TutorError::invalid_transition(self.view, View::Tree));
        }
        self.generation += 1;
        self.loading = true;
        self.error = None;
        Ok(Some(self.generation))
    }

    /// Applies the result of the round trip holding `ticket`.
    ///
    /// The problem is accepted only if both the forest and the worked
    /// solution are non-empty. Any other outcome leaves the view at `Input`
    /// with a surfaced message. A ticket invalidated by [`reset`](Self::reset)
    /// changes nothing and yields [`SubmitOutcome::Superseded`].
    pub fn finish_generation(
        &mut self,
        ticket: u64,
        original_problem: &str,
        result: Result<GeneratedProblem>,
    ) -> SubmitOutcome {
        if !self.holds(ticket) {
            debug!(ticket, "Discarding generation result after reset");
            return SubmitOutcome::Superseded;
        }
        self.loading = false;

        let generated = match result {
            Ok(generated) => generated,
            Err(e) => {
                warn!(error = %e, "Problem generation failed");
                return self.fail(e.user_message());
            }
        };

        if generated.prerequisites.is_empty() {
            warn!("Generation returned no prerequisites");
            return self.fail(NO_PREREQUISITES_MESSAGE.to_string());
        }
        if generated.similar_solution.is_empty() {
            warn!("Generation returned no solution steps");
            return self.fail(NO_SOLUTION_MESSAGE.to_string());
        }

        let problem = MathProblem::from_generated(original_problem, generated);
        info!(
            roots = problem.prerequisites.len(),
            steps = problem.similar_solution.len(),
            "Problem accepted"
        );
        self.problem = Some(problem);
        self.active_concept = None;
        self.transcript.clear();
        self.error = None;
        self.view = View::Tree;
        SubmitOutcome::Analyzed
    }

    /// Lowers the loading flag for a round trip that ended without a result.
    pub fn abandon_generation(&mut self, ticket: u64) {
        if self.holds(ticket) {
            warn!(ticket, "Generation abandoned before it finished");
            self.loading = false;
            self.error = Some(INTERRUPTED_MESSAGE.to_string());
        }
    }

    const fn holds(&self, ticket: u64) -> bool {
        self.loading && self.generation == ticket
    }

    fn fail(&mut self, message: String) -> SubmitOutcome {
        self.error = Some(message.clone());
        SubmitOutcome::Failed(message)
    }

    /// Flips the completion flag of `id`. Unknown ids and a missing problem
    /// are no-ops.
    ///
    /// Returns `true` if a node was toggled.
    pub fn toggle(&mut self, id: &str) -> bool {
        self.problem
            .as_mut()
            .is_some_and(|problem| problem.toggle(id))
    }

    /// Opens the learning screen for `id`.
    ///
    /// Seeds the transcript with a greeting and returns the concept label.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::InvalidStateTransition`] outside the tree view
    /// and [`TutorError::NotFound`] for an id absent from the forest.
    pub fn select_concept_to_learn(&mut self, id: &str) -> Result<String> {
        if self.view != View::Tree {
            return Err(TutorError::invalid_transition(self.view, View::Learning));
        }
        let label = prerequisite::find_label(self.forest(), id)
            .ok_or_else(|| TutorError::not_found(format!("Concept '{id}' not found")))?
            .to_string();

        self.active_concept = Some(id.to_string());
        self.transcript = vec![ChatMessage::model(greeting(&label))];
        self.view = View::Learning;
        debug!(concept = %id, "Learning started");
        Ok(label)
    }

    /// Navigates back one screen.
    ///
    /// From `Learning` the active concept is kept; from `Solution` the
    /// learner returns to the map.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::InvalidStateTransition`] from `Input` or `Tree`,
    /// which have no previous screen (use [`reset`](Self::reset)).
    pub fn back(&mut self) -> Result<View> {
        match self.view {
            View::Learning | View::Solution => {
                self.view = View::Tree;
                Ok(self.view)
            }
            View::Input | View::Tree => Err(TutorError::invalid_transition(self.view, View::Input)),
        }
    }

    /// Marks the active concept as understood and returns to the map.
    ///
    /// The active concept is toggled exactly once and then cleared. With no
    /// active concept nothing is toggled, but the view still moves to
    /// `Tree`. Returns the label of the toggled concept.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::InvalidStateTransition`] when no problem is
    /// loaded or the learner is on the solution screen.
    pub fn complete_concept(&mut self) -> Result<Option<String>> {
        if self.problem.is_none() || matches!(self.view, View::Input | View::Solution) {
            return Err(TutorError::invalid_transition(self.view, View::Tree));
        }

        let completed = self.active_concept.take().map(|id| {
            let label = prerequisite::label_or_id(self.forest(), &id).to_string();
            self.toggle(&id);
            label
        });

        self.transcript.clear();
        self.view = View::Tree;
        Ok(completed)
    }

    /// Opens the worked solution.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::InvalidStateTransition`] outside the tree view
    /// and [`TutorError::SolutionLocked`] while any prerequisite is
    /// incomplete.
    pub fn proceed_to_solution(&mut self) -> Result<()> {
        if self.view != View::Tree {
            return Err(TutorError::invalid_transition(self.view, View::Solution));
        }
        if !self.all_completed() {
            return Err(TutorError::SolutionLocked {
                remaining: prerequisite::remaining(self.forest()),
            });
        }
        self.view = View::Solution;
        Ok(())
    }

    /// Discards the problem and returns to the input screen.
    ///
    /// A generation already in flight is invalidated; its result is dropped
    /// when it arrives.
    pub fn reset(&mut self) {
        if self.loading {
            self.generation += 1;
            self.loading = false;
        }
        self.problem = None;
        self.active_concept = None;
        self.error = None;
        self.transcript.clear();
        self.view = View::Input;
    }

    /// Clears the surfaced error message.
    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// The solution screen's content, resolved against the forest.
    #[must_use]
    pub fn solution_walkthrough(&self) -> Option<SolutionWalkthrough> {
        self.problem.as_ref().map(MathProblem::walkthrough)
    }

    /// Appends a learner message and returns what the model needs for the
    /// reply.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::InvalidStateTransition`] outside the learning
    /// view and [`TutorError::InvalidInput`] for a blank message.
    pub fn begin_teaching_turn(&mut self, message: &str) -> Result<TeachingTurn> {
        let Some(id) = self.active_concept.clone().filter(|_| self.view == View::Learning) else {
            return Err(TutorError::invalid_transition(self.view, View::Learning));
        };
        if message.trim().is_empty() {
            return Err(TutorError::invalid_input("Message must not be empty"));
        }
        let concept_label = prerequisite::label_or_id(self.forest(), &id).to_string();
        self.transcript.push(ChatMessage::user(message));
        Ok(TeachingTurn {
            concept_id: id,
            concept_label,
            history: self.transcript.clone(),
        })
    }

    /// Appends the tutor's reply if the learner is still on the same
    /// concept.
    pub fn finish_teaching_turn(&mut self, turn: &TeachingTurn, reply: &TeachingReply) {
        if self.view == View::Learning && self.active_concept.as_deref() == Some(turn.concept_id.as_str()) {
            self.transcript.push(ChatMessage::model(reply.text.clone()));
        } else {
            debug!(concept = %turn.concept_id, "Dropping teaching reply for an inactive concept");
        }
    }

    /// Read-only view for the presentation layer.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            view: self.view,
            loading: self.loading,
            error: self.error.clone(),
            problem: self.problem.clone(),
            active_concept_id: self.active_concept.clone(),
            active_concept_label: self
                .active_concept
                .as_deref()
                .map(|id| prerequisite::label_or_id(self.forest(), id).to_string()),
            all_completed: self.all_completed(),
            transcript: self.transcript.clone(),
            solution: if self.view == View::Solution {
                self.solution_walkthrough()
            } else {
                None
            },
        }
    }
}

/// A teaching request captured from the session.
#[derive(Debug, Clone)]
pub struct TeachingTurn {
    /// Id of the concept being taught.
    pub concept_id: String,
    /// Its display label.
    pub concept_label: String,
    /// The conversation including the new learner message.
    pub history: Vec<ChatMessage>,
}

/// Serializable copy of a session's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Current view.
    pub view: View,
    /// Whether a generation is in flight.
    pub loading: bool,
    /// Surfaced error message.
    pub error: Option<String>,
    /// Active problem.
    pub problem: Option<MathProblem>,
    /// Active concept id.
    pub active_concept_id: Option<String>,
    /// Active concept label (falls back to the id).
    pub active_concept_label: Option<String>,
    /// Completion predicate, recomputed for this snapshot.
    pub all_completed: bool,
    /// Learning conversation.
    pub transcript: Vec<ChatMessage>,
    /// Resolved solution, present only on the solution screen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<SolutionWalkthrough>,
}

// ============================================================================
// Async entry points
// ============================================================================

/// Submits a problem for analysis.
///
/// The lock is released while the model works. A submission that finds a
/// round trip already in flight returns [`SubmitOutcome::Ignored`] without
/// calling the model.
///
/// # Errors
///
/// Returns [`TutorError::InvalidStateTransition`] outside the input view and
/// [`TutorError::InvalidInput`] for blank text. Model failures are not
/// errors here; they come back as [`SubmitOutcome::Failed`].
pub async fn submit_problem(
    session: &Mutex<TutorSession>,
    model: &dyn TutorModel,
    text: &str,
) -> Result<SubmitOutcome> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TutorError::invalid_input("Problem text must not be empty"));
    }

    let Some(ticket) = session.lock().await.begin_generation()? else {
        return Ok(SubmitOutcome::Ignored);
    };

    let mut pending = PendingGeneration {
        session,
        ticket,
        settled: false,
    };
    let result = model.generate(text).await;
    let outcome = session.lock().await.finish_generation(ticket, text, result);
    pending.settled = true;
    Ok(outcome)
}

/// Lowers the loading flag if a submission is dropped before it settles.
struct PendingGeneration<'a> {
    session: &'a Mutex<TutorSession>,
    ticket: u64,
    settled: bool,
}

impl Drop for PendingGeneration<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.session.try_lock() {
            Ok(mut session) => session.abandon_generation(self.ticket),
            Err(_) => warn!(ticket = self.ticket, "Session busy while abandoning generation; reset clears it"),
        }
    }
}

/// Runs one teaching turn in the learning view.
///
/// The learner's message stays in the transcript even if the model fails.
///
/// # Errors
///
/// Propagates validation errors from
/// [`TutorSession::begin_teaching_turn`] and model errors.
pub async fn teach_turn(
    session: &Mutex<TutorSession>,
    model: &dyn TutorModel,
    message: &str,
) -> Result<TeachingReply> {
    let turn = session.lock().await.begin_teaching_turn(message)?;
    let reply = model.teach(&turn.concept_label, &turn.history).await?;
    session.lock().await.finish_teaching_turn(&turn, &reply);
    Ok(reply)
}

// ============================================================================
// SessionRegistry
// ============================================================================

/// In-memory sessions keyed by user id. Nothing here is persisted.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<i64, Arc<Mutex<TutorSession>>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the user's session, creating it on first use.
    pub async fn session_for(&self, user_id: i64) -> Arc<Mutex<TutorSession>> {
        if let Some(session) = self.sessions.read().await.get(&user_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(user_id).or_default())
    }

    /// Drops the user's session and returns it.
    pub async fn remove(&self, user_id: i64) -> Option<Arc<Mutex<TutorSession>>> {
        self.sessions.write().await.remove(&user_id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::problem::SolutionStep;

    fn generated() -> GeneratedProblem {
        GeneratedProblem {
            prerequisites: vec![
                PrerequisiteNode::new("a", "Algebra").with_child(PrerequisiteNode::new("a1", "Variables")),
                PrerequisiteNode::new("b", "Balance"),
            ],
            similar_problem: Some("Solve 3x = 9".to_string()),
            similar_solution: vec![SolutionStep::new("Divide by 3", "Isolate x").referencing("a1")],
        }
    }

    fn session_on_tree() -> TutorSession {
        let mut session = TutorSession::new();
        let ticket = session.begin_generation().unwrap().unwrap();
        assert_eq!(
            session.finish_generation(ticket, "Solve 2x = 4", Ok(generated())),
            SubmitOutcome::Analyzed
        );
        session
    }

    fn complete_all(session: &mut TutorSession) {
        for id in ["a", "a1", "b"] {
            session.toggle(id);
        }
    }

    // ------------------------------------------------------------------------
    // View
    // ------------------------------------------------------------------------

    #[test]
    fn test_view_serialization() {
        assert_eq!(serde_json::to_string(&View::Learning).unwrap(), r#""learning""#);
        assert_eq!(View::Solution.to_string(), "solution");
        assert_eq!(View::default(), View::Input);
    }

    // ------------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------------

    #[test]
    fn test_accepted_generation_moves_to_tree() {
        let session = session_on_tree();

        assert_eq!(session.view(), View::Tree);
        assert!(!session.is_loading());
        assert!(session.error().is_none());
        assert_eq!(session.problem().unwrap().original_problem, "Solve 2x = 4");
    }

    #[test]
    fn test_empty_prerequisites_refused() {
        let mut session = TutorSession::new();
        let ticket = session.begin_generation().unwrap().unwrap();
        let mut response = generated();
        response.prerequisites.clear();

        let outcome = session.finish_generation(ticket, "p", Ok(response));

        assert_eq!(outcome, SubmitOutcome::Failed(NO_PREREQUISITES_MESSAGE.to_string()));
        assert_eq!(session.view(), View::Input);
        assert_eq!(session.error(), Some(NO_PREREQUISITES_MESSAGE));
        assert!(session.problem().is_none());
    }

    #[test]
    fn test_empty_solution_refused() {
        let mut session = TutorSession::new();
        let ticket = session.begin_generation().unwrap().unwrap();
        let mut response = generated();
        response.similar_solution.clear();

        let outcome = session.finish_generation(ticket, "p", Ok(response));

        assert_eq!(outcome, SubmitOutcome::Failed(NO_SOLUTION_MESSAGE.to_string()));
        assert_eq!(session.view(), View::Input);
    }

    #[test]
    fn test_collaborator_failure_surfaces_message() {
        let mut session = TutorSession::new();
        let ticket = session.begin_generation().unwrap().unwrap();

        let outcome = session.finish_generation(
            ticket,
            "p",
            Err(TutorError::llm_api_error(
                crate::error::LlmErrorKind::Network,
                "connection refused",
            )),
        );

        assert_eq!(outcome, SubmitOutcome::Failed("connection refused".to_string()));
        assert_eq!(session.view(), View::Input);
        assert!(!session.is_loading());

        session.dismiss_error();
        assert!(session.error().is_none());
    }

    #[test]
    fn test_begin_generation_while_loading_is_ignored() {
        let mut session = TutorSession::new();
        assert!(session.begin_generation().unwrap().is_some());
        assert!(session.begin_generation().unwrap().is_none());
    }

    #[test]
    fn test_reset_invalidates_pending_generation() {
        let mut session = TutorSession::new();
        let stale = session.begin_generation().unwrap().unwrap();

        session.reset();
        assert!(!session.is_loading());

        let fresh = session.begin_generation().unwrap().unwrap();
        assert_ne!(stale, fresh);
        assert_eq!(
            session.finish_generation(stale, "old", Ok(generated())),
            SubmitOutcome::Superseded
        );
        assert!(session.is_loading());
        assert!(session.problem().is_none());

        assert_eq!(
            session.finish_generation(fresh, "new", Ok(generated())),
            SubmitOutcome::Analyzed
        );
        assert_eq!(session.problem().unwrap().original_problem, "new");
    }

    #[test]
    fn test_abandon_generation_lowers_flag_once() {
        let mut session = TutorSession::new();
        let ticket = session.begin_generation().unwrap().unwrap();

        session.abandon_generation(ticket + 1);
        assert!(session.is_loading());

        session.abandon_generation(ticket);
        assert!(!session.is_loading());
        assert_eq!(session.error(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(session.view(), View::Input);
    }

    #[test]
    fn test_begin_generation_outside_input_rejected() {
        let mut session = session_on_tree();
        let err = session.begin_generation().unwrap_err();
        assert!(matches!(err, TutorError::InvalidStateTransition { .. }));
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    #[test]
    fn test_select_concept_seeds_greeting() {
        let mut session = session_on_tree();

        let label = session.select_concept_to_learn("a1").unwrap();

        assert_eq!(label, "Variables");
        assert_eq!(session.view(), View::Learning);
        assert_eq!(session.active_concept(), Some("a1"));
        assert_eq!(session.transcript().len(), 1);
        assert!(session.transcript()[0].text.contains("**Variables**"));
    }

    #[test]
    fn test_select_unknown_concept_rejected() {
        let mut session = session_on_tree();
        let err = session.select_concept_to_learn("ghost").unwrap_err();
        assert!(matches!(err, TutorError::NotFound(_)));
        assert_eq!(session.view(), View::Tree);
    }

    #[test]
    fn test_back_from_learning_keeps_active_concept() {
        let mut session = session_on_tree();
        session.select_concept_to_learn("a").unwrap();

        assert_eq!(session.back().unwrap(), View::Tree);
        assert_eq!(session.active_concept(), Some("a"));
        assert!(!session.forest()[0].completed);
    }

    #[test]
    fn test_complete_concept_toggles_once_and_clears() {
        let mut session = session_on_tree();
        session.select_concept_to_learn("a1").unwrap();

        let label = session.complete_concept().unwrap();

        assert_eq!(label.as_deref(), Some("Variables"));
        assert_eq!(session.view(), View::Tree);
        assert!(session.active_concept().is_none());
        assert!(session.forest()[0].children[0].completed);
        assert!(!session.forest()[0].completed);
        assert!(session.transcript().is_empty());

        // A second completion with nothing active must not flip it back.
        assert_eq!(session.complete_concept().unwrap(), None);
        assert!(session.forest()[0].children[0].completed);
    }

    #[test]
    fn test_complete_concept_without_active_concept_moves_to_tree() {
        let mut session = session_on_tree();
        let before = session.forest().to_vec();

        assert_eq!(session.complete_concept().unwrap(), None);
        assert_eq!(session.view(), View::Tree);
        assert_eq!(session.forest(), before.as_slice());
    }

    #[test]
    fn test_complete_concept_without_problem_rejected() {
        let mut session = TutorSession::new();
        assert!(session.complete_concept().is_err());
    }

    #[test]
    fn test_solution_gated_by_completion() {
        let mut session = session_on_tree();
        session.toggle("a");

        let err = session.proceed_to_solution().unwrap_err();
        assert!(matches!(err, TutorError::SolutionLocked { remaining: 2 }));

        session.toggle("a1");
        session.toggle("b");
        session.proceed_to_solution().unwrap();
        assert_eq!(session.view(), View::Solution);

        let snapshot = session.snapshot();
        assert!(snapshot.all_completed);
        assert_eq!(snapshot.solution.unwrap().steps[0].concepts[0].label, "Variables");

        assert_eq!(session.back().unwrap(), View::Tree);
        assert!(session.snapshot().solution.is_none());
    }

    #[test]
    fn test_toggle_recomputes_completion() {
        let mut session = session_on_tree();
        complete_all(&mut session);
        assert!(session.all_completed());

        session.toggle("a1");
        assert!(!session.all_completed());
    }

    #[test]
    fn test_toggle_without_problem_is_noop() {
        let mut session = TutorSession::new();
        assert!(!session.toggle("a"));
        assert!(!session.toggle("ghost"));
    }

    #[test]
    fn test_back_from_input_rejected() {
        let mut session = TutorSession::new();
        assert!(session.back().is_err());
    }

    #[test]
    fn test_reset_discards_problem() {
        let mut session = session_on_tree();
        session.select_concept_to_learn("a").unwrap();

        session.reset();

        assert_eq!(session.view(), View::Input);
        assert!(session.problem().is_none());
        assert!(session.active_concept().is_none());
        assert!(session.transcript().is_empty());
        assert!(!session.all_completed());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let mut session = session_on_tree();
        session.select_concept_to_learn("a1").unwrap();

        let json = serde_json::to_value(session.snapshot()).unwrap();

        assert_eq!(json["view"], "learning");
        assert_eq!(json["activeConceptId"], "a1");
        assert_eq!(json["activeConceptLabel"], "Variables");
        assert_eq!(json["allCompleted"], false);
        assert!(json.get("solution").is_none());
    }

    // ------------------------------------------------------------------------
    // Async entry points
    // ------------------------------------------------------------------------

    /// Model whose `generate` blocks until released.
    struct GatedModel {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    impl GatedModel {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl TutorModel for GatedModel {
        async fn generate(&self, _problem: &str) -> Result<GeneratedProblem> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(generated())
        }

        async fn teach(&self, concept: &str, history: &[ChatMessage]) -> Result<TeachingReply> {
            Ok(TeachingReply {
                text: format!("{concept}: {} lines so far", history.len()),
                illustration_prompt: None,
            })
        }

        async fn summarize_class(&self, _activity_json: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_second_submission_while_pending_is_ignored() {
        let session = Arc::new(Mutex::new(TutorSession::new()));
        let model = Arc::new(GatedModel::new());

        let first = {
            let session = Arc::clone(&session);
            let model = Arc::clone(&model);
            tokio::spawn(async move { submit_problem(&session, model.as_ref(), "Solve 2x = 4").await })
        };
        model.entered.notified().await;
        assert!(session.lock().await.is_loading());

        let second = submit_problem(&session, model.as_ref(), "Solve 5x = 10").await.unwrap();
        assert_eq!(second, SubmitOutcome::Ignored);

        model.release.notify_one();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first, SubmitOutcome::Analyzed);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        let session = session.lock().await;
        assert_eq!(session.problem().unwrap().original_problem, "Solve 2x = 4");
    }

    #[tokio::test]
    async fn test_dropped_submission_does_not_block_the_next() {
        let session = Arc::new(Mutex::new(TutorSession::new()));
        let model = Arc::new(GatedModel::new());

        let first = {
            let session = Arc::clone(&session);
            let model = Arc::clone(&model);
            tokio::spawn(async move { submit_problem(&session, model.as_ref(), "Solve 2x = 4").await })
        };
        model.entered.notified().await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        {
            let session = session.lock().await;
            assert!(!session.is_loading());
            assert_eq!(session.error(), Some(INTERRUPTED_MESSAGE));
        }

        model.release.notify_one();
        let second = submit_problem(&session, model.as_ref(), "Solve 5x = 10").await.unwrap();

        assert_eq!(second, SubmitOutcome::Analyzed);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.lock().await.problem().unwrap().original_problem, "Solve 5x = 10");
    }

    #[tokio::test]
    async fn test_reset_mid_flight_discards_late_result() {
        let session = Arc::new(Mutex::new(TutorSession::new()));
        let model = Arc::new(GatedModel::new());

        let first = {
            let session = Arc::clone(&session);
            let model = Arc::clone(&model);
            tokio::spawn(async move { submit_problem(&session, model.as_ref(), "Solve 2x = 4").await })
        };
        model.entered.notified().await;
        session.lock().await.reset();

        model.release.notify_one();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first, SubmitOutcome::Superseded);
        let session = session.lock().await;
        assert_eq!(session.view(), View::Input);
        assert!(session.problem().is_none());
        assert!(!session.is_loading());
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn test_submit_blank_problem_rejected() {
        let session = Mutex::new(TutorSession::new());
        let model = GatedModel::new();

        let err = submit_problem(&session, &model, "   ").await.unwrap_err();

        assert!(matches!(err, TutorError::InvalidInput(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teach_turn_appends_both_sides() {
        let session = Mutex::new(session_on_tree());
        session.lock().await.select_concept_to_learn("a").unwrap();
        let model = GatedModel::new();

        let reply = teach_turn(&session, &model, "I know a little").await.unwrap();

        assert_eq!(reply.text, "Algebra: 2 lines so far");
        let session = session.lock().await;
        assert_eq!(session.transcript().len(), 3);
        assert_eq!(session.transcript()[1], ChatMessage::user("I know a little"));
    }

    #[tokio::test]
    async fn test_teach_turn_outside_learning_rejected() {
        let session = Mutex::new(session_on_tree());
        let model = GatedModel::new();

        let err = teach_turn(&session, &model, "hi").await.unwrap_err();
        assert!(matches!(err, TutorError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_registry_reuses_sessions() {
        let registry = SessionRegistry::new();

        let first = registry.session_for(7).await;
        first.lock().await.dismiss_error();
        let again = registry.session_for(7).await;
        let other = registry.session_for(8).await;

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));

        let removed = registry.remove(7).await.unwrap();
        assert!(Arc::ptr_eq(&first, &removed));
        assert!(registry.remove(7).await.is_none());
        assert!(!Arc::ptr_eq(&first, &registry.session_for(7).await));
    }
}
