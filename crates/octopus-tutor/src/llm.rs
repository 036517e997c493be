//! The LLM collaborator.
//!
//! [`TutorModel`] is the seam between the tutoring core and whichever model
//! answers. [`ChatCompletionsClient`] implements it against any
//! OpenAI-compatible `/chat/completions` endpoint (Groq by default).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{LlmConfig, LlmProvider, PLACEHOLDER_API_KEY};
use crate::error::{LlmErrorKind, Result, TutorError};
use crate::problem::GeneratedProblem;

/// Replacement text when the model returns no explanation.
pub const FALLBACK_TEACHING_TEXT: &str =
    "I'm sorry, I couldn't generate an explanation. Please try again.";

/// Replacement text when the model returns no class insight.
pub const FALLBACK_INSIGHT_TEXT: &str = "No insights available.";

const GENERATE_SYSTEM_PROMPT: &str = r#"You are a math expert. Analyze the problem and return a JSON object.
The JSON MUST follow this schema:
{
  "prerequisites": [
    {
      "id": "string",
      "label": "string",
      "description": "string",
      "children": [
        { "id": "string", "label": "string", "description": "string" }
      ]
    }
  ],
  "similarProblem": "string",
  "similarSolution": [
    {
      "step": "string",
      "explanation": "string",
      "prerequisiteIds": ["string"]
    }
  ]
}"#;

const TEACH_SYSTEM_PROMPT: &str = "You are a helpful math teacher. Use real-world examples and ask for input. Return JSON with 'text' and optional 'illustrationPrompt'.";

const INSIGHT_SYSTEM_PROMPT: &str = r#"You are Octopus Insight, an experienced and empathetic educational consultant.
Give a teacher actionable, human-sounding insights about their classroom.

GUIDELINES:
- Be warm, professional, and specific.
- Focus on CONCEPTS. If students struggle with a concept, name it.
- Identify patterns, such as several students failing quizzes on the same topic.
- Give specific advice, e.g. "It might be worth a quick review of [Concept] next session."
- Use the student names provided.
- If data is sparse, suggest how to gather more (e.g. encourage quizzes).
- Keep it under 150 words."#;

fn generate_user_prompt(problem: &str) -> String {
    format!(
        r#"Analyze this math problem: "{problem}".

CRITICAL INSTRUCTIONS:
1. Identify the core concepts (prerequisites) needed to solve it. Organize them in a logical tree structure (max depth 2).
2. Create a similar but different math problem that uses the same core concepts.
3. Provide a HIGHLY DETAILED, step-by-step solution for the SIMILAR problem.
   - Each step must focus on a single logical move.
   - The "explanation" for each step must explain the "why" and "how" behind the math.
   - Explicitly link each step to the relevant prerequisite IDs from your list.

Your goal is to teach the user how to solve the original problem by walking them through a perfectly explained similar example."#
    )
}

// ============================================================================
// Conversation types
// ============================================================================

/// Who said a line in a teaching conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The learner.
    User,
    /// The tutor model.
    Model,
}

impl ChatRole {
    /// Role name on the chat-completions wire.
    const fn wire_name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "assistant",
        }
    }
}

/// One line of a teaching conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: ChatRole,
    /// Markdown text.
    pub text: String,
}

impl ChatMessage {
    /// A learner message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    /// A tutor message.
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
        }
    }
}

/// The tutor's reply to one teaching turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingReply {
    /// Explanation text (Markdown).
    pub text: String,

    /// Optional prompt for an illustration of the explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illustration_prompt: Option<String>,
}

impl TeachingReply {
    /// Parses the model's JSON content, substituting the fallback text when
    /// `text` is missing or empty.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError::LlmMalformedResponse`] if the content is not JSON.
    pub fn from_model_output(content: &str) -> Result<Self> {
        let content = if content.trim().is_empty() { "{}" } else { content };
        let value: Value = serde_json::from_str(content)
            .map_err(|e| TutorError::llm_malformed(format!("content is not JSON: {e}")))?;

        let text = value
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .map_or_else(|| FALLBACK_TEACHING_TEXT.to_string(), ToString::to_string);
        let illustration_prompt = value
            .get("illustrationPrompt")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .map(ToString::to_string);

        Ok(Self {
            text,
            illustration_prompt,
        })
    }
}

// ============================================================================
// TutorModel
// ============================================================================

/// The external model the tutoring core relies on.
#[async_trait]
pub trait TutorModel: Send + Sync {
    /// Decomposes a problem into prerequisites and produces a similar
    /// problem with a worked solution. Fields are normalized, so empty
    /// lists are possible.
    async fn generate(&self, problem: &str) -> Result<GeneratedProblem>;

    /// Produces the next teaching turn for `concept` given the conversation
    /// so far.
    async fn teach(&self, concept: &str, history: &[ChatMessage]) -> Result<TeachingReply>;

    /// Writes a short classroom insight from recent activity (JSON).
    async fn summarize_class(&self, activity_json: &str) -> Result<String>;
}

// ============================================================================
// ChatCompletionsClient
// ============================================================================

/// [`TutorModel`] over an OpenAI-compatible chat-completions API.
///
/// The API key is checked on every call rather than at construction, so the
/// service starts without one and reports the problem per request.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl ChatCompletionsClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent("octopus-tutor/0.1");
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| TutorError::llm_api_error(LlmErrorKind::Other, e.to_string()))?;

        if let Some(key) = usable_key(config.api_key.as_deref()) {
            if config.provider == LlmProvider::Groq && !key.starts_with("gsk_") {
                warn!("GROQ_API_KEY does not start with 'gsk_'. It might be invalid.");
            }
        }

        Ok(Self { config, http })
    }

    fn api_key(&self) -> Result<&str> {
        usable_key(self.config.api_key.as_deref()).ok_or_else(|| {
            let var = self.config.provider.api_key_env();
            TutorError::llm_api_error(
                LlmErrorKind::Authentication,
                format!("{var} is missing. Please add your API key to the environment."),
            )
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Sends one completion request and returns the first choice's content.
    async fn complete(&self, messages: Vec<Value>, json_mode: bool) -> Result<String> {
        let api_key = self.api_key()?;
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        debug!(model = %self.config.model, json_mode, "Sending chat completion request");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TutorError::llm_api_error(LlmErrorKind::Network, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let kind = LlmErrorKind::from_status(status.as_u16());
            let message = if kind == LlmErrorKind::Authentication {
                format!(
                    "Invalid {} API key. Please check your key.",
                    provider_name(self.config.provider)
                )
            } else {
                format!("provider returned {status}: {}", truncate(&detail, 200))
            };
            return Err(TutorError::llm_api_error(kind, message));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| TutorError::llm_malformed(format!("unexpected completion body: {e}")))?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl TutorModel for ChatCompletionsClient {
    async fn generate(&self, problem: &str) -> Result<GeneratedProblem> {
        let messages = vec![
            json!({ "role": "system", "content": GENERATE_SYSTEM_PROMPT }),
            json!({ "role": "user", "content": generate_user_prompt(problem) }),
        ];
        let content = self.complete(messages, true).await?;
        GeneratedProblem::from_model_output(&content)
    }

    async fn teach(&self, concept: &str, history: &[ChatMessage]) -> Result<TeachingReply> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({ "role": "system", "content": TEACH_SYSTEM_PROMPT }));
        messages.extend(
            history
                .iter()
                .map(|m| json!({ "role": m.role.wire_name(), "content": m.text })),
        );
        messages.push(json!({
            "role": "user",
            "content": format!("Explain the concept: \"{concept}\". Keep it interactive."),
        }));

        let content = self.complete(messages, true).await?;
        TeachingReply::from_model_output(&content)
    }

    async fn summarize_class(&self, activity_json: &str) -> Result<String> {
        let system = format!(
            "{INSIGHT_SYSTEM_PROMPT}\n\nHere is the recent activity data for your students: {activity_json}"
        );
        let messages = vec![json!({ "role": "system", "content": system })];
        let content = self.complete(messages, false).await?;
        Ok(if content.trim().is_empty() {
            FALLBACK_INSIGHT_TEXT.to_string()
        } else {
            content
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn usable_key(key: Option<&str>) -> Option<&str> {
    key.map(str::trim)
        .filter(|k| !k.is_empty() && *k != PLACEHOLDER_API_KEY)
}

const fn provider_name(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Groq => "Groq",
        LlmProvider::Gemini => "Gemini",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
