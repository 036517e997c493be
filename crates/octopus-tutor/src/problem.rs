//! Problem records: the generated forest, similar problem, and worked solution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, TutorError};
use crate::prerequisite::{self, PrerequisiteNode};

/// One logical move in a worked solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionStep {
    /// The move itself.
    pub step: String,

    /// Why and how the move works.
    #[serde(default)]
    pub explanation: String,

    /// Prerequisite ids used by this step. May reference ids absent from
    /// the forest.
    #[serde(default)]
    pub prerequisite_ids: Vec<String>,
}

impl SolutionStep {
    /// Creates a step with no prerequisite references.
    #[must_use]
    pub fn new(step: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            explanation: explanation.into(),
            prerequisite_ids: Vec::new(),
        }
    }

    /// Adds a prerequisite reference.
    #[must_use]
    pub fn referencing(mut self, id: impl Into<String>) -> Self {
        self.prerequisite_ids.push(id.into());
        self
    }
}

/// What the LLM collaborator returns for a submitted problem, after
/// normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedProblem {
    /// Prerequisite forest, possibly empty.
    pub prerequisites: Vec<PrerequisiteNode>,

    /// Analog problem sharing the same concepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similar_problem: Option<String>,

    /// Worked solution of the similar problem, possibly empty.
    pub similar_solution: Vec<SolutionStep>,
}

impl GeneratedProblem {
    /// Parses the raw message content returned by the model.
    ///
    /// Empty content is read as `{}`. A `prerequisites` or `similarSolution`
    /// field that is missing, not an array, or not decodable becomes an
    /// empty list; the caller decides whether an empty list is acceptable.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::LlmMalformedResponse`] if the content is not a
    /// JSON object.
    pub fn from_model_output(content: &str) -> Result<Self> {
        let content = if content.trim().is_empty() { "{}" } else { content };
        let value: Value = serde_json::from_str(content)
            .map_err(|e| TutorError::llm_malformed(format!("content is not JSON: {e}")))?;
        let Value::Object(mut object) = value else {
            return Err(TutorError::llm_malformed("content is not a JSON object"));
        };

        let prerequisites = take_array(&mut object, "prerequisites");
        let similar_solution = take_array(&mut object, "similarSolution");
        let similar_problem = match object.remove("similarProblem") {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text),
            _ => None,
        };

        Ok(Self {
            prerequisites,
            similar_problem,
            similar_solution,
        })
    }
}

fn take_array<T: serde::de::DeserializeOwned>(
    object: &mut serde_json::Map<String, Value>,
    field: &str,
) -> Vec<T> {
    match object.remove(field) {
        Some(value @ Value::Array(_)) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(field, error = %e, "Model returned undecodable entries, fixing...");
            Vec::new()
        }),
        Some(_) => {
            warn!(field, "Model returned invalid format, fixing...");
            Vec::new()
        }
        None => {
            warn!(field, "Model omitted field, fixing...");
            Vec::new()
        }
    }
}

/// The aggregate for one problem-solving session.
///
/// Created whole from one generation round trip and discarded on reset.
/// Only the completion flags inside `prerequisites` change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MathProblem {
    /// The problem as the learner typed it.
    pub original_problem: String,

    /// Prerequisite forest.
    pub prerequisites: Vec<PrerequisiteNode>,

    /// Analog problem, if the model produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similar_problem: Option<String>,

    /// Worked solution of the similar problem.
    #[serde(default)]
    pub similar_solution: Vec<SolutionStep>,
}

impl MathProblem {
    /// Builds the session aggregate from a generation result.
    ///
    /// The forest is normalized: every node starts incomplete and the depth
    /// limit is enforced.
    #[must_use]
    pub fn from_generated(original_problem: impl Into<String>, generated: GeneratedProblem) -> Self {
        Self {
            original_problem: original_problem.into(),
            prerequisites: prerequisite::normalize(generated.prerequisites),
            similar_problem: generated.similar_problem,
            similar_solution: generated.similar_solution,
        }
    }

    /// Flips the completion flag of the first node matching `id`.
    ///
    /// Returns `true` if a node matched.
    pub fn toggle(&mut self, id: &str) -> bool {
        let matched = prerequisite::find_node(&self.prerequisites, id).is_some();
        self.prerequisites = prerequisite::toggle(&self.prerequisites, id);
        matched
    }

    /// Whether every prerequisite (roots and children) is completed.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        prerequisite::all_completed(&self.prerequisites)
    }

    /// Resolves the worked solution for display, replacing prerequisite ids
    /// with labels where the forest knows them.
    #[must_use]
    pub fn walkthrough(&self) -> SolutionWalkthrough {
        let steps = self
            .similar_solution
            .iter()
            .map(|step| ResolvedStep {
                step: step.step.clone(),
                explanation: step.explanation.clone(),
                concepts: step
                    .prerequisite_ids
                    .iter()
                    .map(|id| ConceptRef {
                        id: id.clone(),
                        label: prerequisite::label_or_id(&self.prerequisites, id).to_string(),
                    })
                    .collect(),
            })
            .collect();

        SolutionWalkthrough {
            original_problem: self.original_problem.clone(),
            similar_problem: self.similar_problem.clone().unwrap_or_default(),
            steps,
        }
    }
}

/// A prerequisite reference resolved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRef {
    /// The referenced id.
    pub id: String,
    /// Its label, or the id itself if the forest has no such node.
    pub label: String,
}

/// A solution step with resolved concept references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStep {
    /// The move.
    pub step: String,
    /// Its explanation.
    pub explanation: String,
    /// Concepts the step relies on.
    pub concepts: Vec<ConceptRef>,
}

/// The solution screen's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionWalkthrough {
    /// The learner's problem.
    pub original_problem: String,
    /// The analog problem (empty if none was generated).
    pub similar_problem: String,
    /// Resolved steps.
    pub steps: Vec<ResolvedStep>,
}
