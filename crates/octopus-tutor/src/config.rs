//! Configuration types for the Octopus tutoring service.
//!
//! Configuration is read from `octopus.json` (camelCase keys, every field
//! optional), then secrets are overlaid from the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "octopus.json";

/// Placeholder key shipped in sample environments; treated as missing.
pub const PLACEHOLDER_API_KEY: &str = "MY_GROQ_API_KEY";

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

fn default_database() -> String {
    "octopus.db".to_string()
}

fn default_jwt_secret() -> String {
    "octopus-dev-secret-change-me".to_string()
}

/// Seven days.
const fn default_token_ttl() -> u64 {
    7 * 24 * 60 * 60
}

const fn default_pass_percent() -> u32 {
    70
}

/// Main configuration for the tutoring service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: DatabasePath,

    /// LLM collaborator settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Token signing settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Quiz grading settings.
    #[serde(default)]
    pub quiz: QuizConfig,
}

fn default_database_path() -> DatabasePath {
    DatabasePath(default_database())
}

/// SQLite database location. `:memory:` opens a private in-memory database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabasePath(pub String);

impl Default for DatabasePath {
    fn default() -> Self {
        default_database_path()
    }
}

impl DatabasePath {
    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON or
    /// invalid values.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `octopus.json` from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values, and
    /// `TutorError::ConfigValidationError` if values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays secrets and paths from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlays values from an arbitrary variable lookup.
    ///
    /// Reads the provider's API key variable (`GROQ_API_KEY` or
    /// `GEMINI_API_KEY`), `JWT_SECRET`, and `OCTOPUS_DATABASE`. Empty values
    /// are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(self.llm.provider.api_key_env()) {
            self.llm.api_key = Some(key);
        }
        if let Some(secret) = non_empty("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(database) = non_empty("OCTOPUS_DATABASE") {
            self.database = DatabasePath(database);
        }
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(TutorError::config_validation(
                "server.host must not be empty",
                "Set server.host to an address such as 127.0.0.1 in your octopus.json",
            ));
        }

        if self.database.as_str().trim().is_empty() {
            return Err(TutorError::config_validation(
                "database must not be empty",
                "Provide a SQLite file path (or ':memory:') in your octopus.json",
            ));
        }

        if self.llm.model.trim().is_empty() {
            return Err(TutorError::config_validation(
                "llm.model must not be empty",
                "Set llm.model, e.g. 'llama-3.3-70b-versatile'",
            ));
        }

        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://") {
            return Err(TutorError::config_validation(
                format!("llm.baseUrl '{}' is not an http(s) URL", self.llm.base_url),
                "Use the provider's OpenAI-compatible endpoint, e.g. https://api.groq.com/openai/v1",
            ));
        }

        if self.llm.request_timeout_secs == Some(0) {
            return Err(TutorError::config_validation(
                "llm.requestTimeoutSecs must be greater than 0",
                "Remove llm.requestTimeoutSecs to wait indefinitely, or set it to at least 1",
            ));
        }

        if self.auth.jwt_secret.trim().is_empty() {
            return Err(TutorError::config_validation(
                "auth.jwtSecret must not be empty",
                "Set JWT_SECRET in the environment or auth.jwtSecret in your octopus.json",
            ));
        }

        if self.auth.token_ttl_secs == 0 {
            return Err(TutorError::config_validation(
                "auth.tokenTtlSecs must be greater than 0",
                "Set auth.tokenTtlSecs to at least 60 in your octopus.json",
            ));
        }

        if self.quiz.pass_percent == 0 || self.quiz.pass_percent > 100 {
            return Err(TutorError::config_validation(
                format!("quiz.passPercent must be between 1 and 100 (got {})", self.quiz.pass_percent),
                "Set quiz.passPercent to a percentage such as 70",
            ));
        }

        Ok(())
    }

    /// Returns `true` if the token secret is still the built-in development value.
    #[must_use]
    pub fn uses_default_secret(&self) -> bool {
        self.auth.jwt_secret == default_jwt_secret()
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port (0 picks an ephemeral port).
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Supported LLM providers. Both are reached through an OpenAI-compatible
/// chat-completions endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProvider {
    /// Groq (default).
    #[default]
    Groq,
    /// Google Gemini.
    Gemini,
}

impl LlmProvider {
    /// Parses a string into an `LlmProvider`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    /// Environment variable holding this provider's API key.
    #[must_use]
    pub const fn api_key_env(&self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Default OpenAI-compatible base URL.
    #[must_use]
    pub const fn default_base_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    /// Default model name.
    #[must_use]
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Gemini => "gemini-2.0-flash",
        }
    }
}

impl<'de> Deserialize<'de> for LlmProvider {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid LLM provider '{s}': expected one of 'groq', 'gemini'"
            ))
        })
    }
}

impl Serialize for LlmProvider {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Groq => "groq",
            Self::Gemini => "gemini",
        };
        serializer.serialize_str(s)
    }
}

/// LLM collaborator settings.
///
/// `model` and `baseUrl` default to the provider's values when omitted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Which provider to call.
    pub provider: LlmProvider,

    /// Model name.
    pub model: String,

    /// OpenAI-compatible base URL (without `/chat/completions`).
    pub base_url: String,

    /// API key. Usually supplied through the environment.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Optional request timeout; `None` waits for the provider indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::for_provider(LlmProvider::default())
    }
}

impl LlmConfig {
    /// Default settings for a provider.
    #[must_use]
    pub fn for_provider(provider: LlmProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            base_url: provider.default_base_url().to_string(),
            api_key: None,
            request_timeout_secs: None,
        }
    }
}

impl<'de> Deserialize<'de> for LlmConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            #[serde(default)]
            provider: LlmProvider,
            model: Option<String>,
            base_url: Option<String>,
            api_key: Option<String>,
            request_timeout_secs: Option<u64>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let defaults = LlmConfig::for_provider(raw.provider);
        Ok(Self {
            provider: raw.provider,
            model: raw.model.unwrap_or(defaults.model),
            base_url: raw.base_url.unwrap_or(defaults.base_url),
            api_key: raw.api_key,
            request_timeout_secs: raw.request_timeout_secs,
        })
    }
}

/// Token signing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// HMAC secret for HS256 tokens.
    #[serde(default = "default_jwt_secret", skip_serializing)]
    pub jwt_secret: String,

    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

/// Quiz grading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizConfig {
    /// Minimum percentage of correct answers that counts as a pass.
    #[serde(default = "default_pass_percent")]
    pub pass_percent: u32,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            pass_percent: default_pass_percent(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.as_str(), "octopus.db");
        assert_eq!(config.llm.provider, LlmProvider::Groq);
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(config.llm.base_url, "https://api.groq.com/openai/v1");
        assert!(config.llm.api_key.is_none());
        assert!(config.llm.request_timeout_secs.is_none());
        assert_eq!(config.auth.token_ttl_secs, 604_800);
        assert_eq!(config.quiz.pass_percent, 70);
        assert!(config.uses_default_secret());
        config.validate().unwrap();
    }

    #[test]
    fn test_llm_provider_case_insensitive() {
        let provider: LlmProvider = serde_json::from_str(r#""GEMINI""#).unwrap();
        assert_eq!(provider, LlmProvider::Gemini);
        let provider: LlmProvider = serde_json::from_str(r#""Groq""#).unwrap();
        assert_eq!(provider, LlmProvider::Groq);
    }

    #[test]
    fn test_invalid_llm_provider_error() {
        let result: std::result::Result<LlmProvider, _> = serde_json::from_str(r#""claude""#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid LLM provider 'claude'"));
    }

    #[test]
    fn test_llm_provider_serialization() {
        assert_eq!(serde_json::to_string(&LlmProvider::Groq).unwrap(), "\"groq\"");
        assert_eq!(serde_json::to_string(&LlmProvider::Gemini).unwrap(), "\"gemini\"");
    }

    #[test]
    fn test_llm_config_uses_provider_defaults() {
        let config: Config = serde_json::from_str(r#"{"llm": {"provider": "gemini"}}"#).unwrap();

        assert_eq!(config.llm.model, "gemini-2.0-flash");
        assert!(config.llm.base_url.contains("generativelanguage.googleapis.com"));
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "server": { "port": 8080 },
            "database": "/var/lib/octopus/octopus.db",
            "llm": { "model": "llama-3.1-8b-instant", "requestTimeoutSecs": 30 },
            "quiz": { "passPercent": 80 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.as_str(), "/var/lib/octopus/octopus.db");
        assert_eq!(config.llm.model, "llama-3.1-8b-instant");
        assert_eq!(config.llm.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(config.llm.request_timeout_secs, Some(30));
        assert_eq!(config.quiz.pass_percent, 80);
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut config = Config::default();
        config.llm.api_key = Some("gsk_secret".to_string());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("gsk_secret"));
        assert!(!json.contains("jwtSecret"));
    }

    #[test]
    fn test_apply_env_from_overrides_secrets() {
        let vars: HashMap<&str, &str> = [
            ("GROQ_API_KEY", "gsk_live"),
            ("GEMINI_API_KEY", "gemini-key"),
            ("JWT_SECRET", "a-much-better-secret"),
            ("OCTOPUS_DATABASE", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.llm.api_key.as_deref(), Some("gsk_live"));
        assert_eq!(config.auth.jwt_secret, "a-much-better-secret");
        assert_eq!(config.database.as_str(), "octopus.db");
        assert!(!config.uses_default_secret());
    }

    #[test]
    fn test_apply_env_from_reads_provider_specific_key() {
        let mut config = Config::default();
        config.llm = LlmConfig::for_provider(LlmProvider::Gemini);
        config.apply_env_from(|key| (key == "GEMINI_API_KEY").then(|| "gemini-key".to_string()));

        assert_eq!(config.llm.api_key.as_deref(), Some("gemini-key"));
    }

    #[test]
    fn test_load_from_file_valid_json() {
        let config_path = std::env::temp_dir().join("test_octopus_valid.json");
        std::fs::write(&config_path, r#"{"server": {"port": 4000}}"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.server.port, 4000);

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let config_path = std::env::temp_dir().join("test_octopus_invalid.json");
        std::fs::write(&config_path, "{ not json").unwrap();

        let result = Config::load_from_file(&config_path);
        assert!(matches!(result, Err(TutorError::ConfigParseError { .. })));

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(Path::new("/nonexistent/octopus.json")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_load_from_dir_no_config_returns_default() {
        let temp_dir = std::env::temp_dir().join("test_octopus_empty_dir");
        std::fs::create_dir_all(&temp_dir).unwrap();

        let config = Config::load_from_dir(&temp_dir).unwrap();
        assert_eq!(config.database.as_str(), "octopus.db");

        std::fs::remove_dir(&temp_dir).ok();
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        let config_path = std::env::temp_dir().join("test_octopus_validation.json");
        std::fs::write(&config_path, r#"{"quiz": {"passPercent": 0}}"#).unwrap();

        let result = Config::load_from_file(&config_path);
        assert!(matches!(result, Err(TutorError::ConfigValidationError { .. })));

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_config_validation_failures() {
        let mut config = Config::default();
        config.auth.jwt_secret = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.base_url = "ftp://example.com".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("not an http(s) URL"));

        let mut config = Config::default();
        config.llm.request_timeout_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.quiz.pass_percent = 101;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.database = DatabasePath(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config: Config = serde_json::from_str(r#"{"futureFeature": true}"#).unwrap();
        assert_eq!(config.server.port, 3000);
    }
}
