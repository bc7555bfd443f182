//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is built once at startup and passed down explicitly.
//! Values are layered, lowest priority first:
//!
//! 1. built-in defaults
//! 2. a named profile from `config/profiles.yaml`
//! 3. environment variables
//! 4. command-line overrides
//!
//! and the result is checked with [`PipelineConfig::validate`] before any
//! session state is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::dataset::CHATML;
use crate::llm::CompletionOptions;
use crate::scheduler::{RetryPolicy, WorkerPoolConfig};

/// Default location of the profile file, relative to the working directory.
pub const DEFAULT_PROFILES_PATH: &str = "config/profiles.yaml";
/// Profile used when none is named.
pub const DEFAULT_PROFILE: &str = "default";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required secret is not configured.
    #[error("Missing required secret: {0}")]
    MissingSecret(String),

    /// A configuration value could not be parsed.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// A named profile was requested but does not exist.
    #[error("Profile '{profile}' not found in {}", path.display())]
    ProfileNotFound { profile: String, path: PathBuf },

    /// The profile file exists but could not be parsed.
    #[error("Invalid profile file {}: {reason}", path.display())]
    ProfileFile { path: PathBuf, reason: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Completion service
    /// Full chat-completions endpoint URL.
    pub llm_api_url: String,
    /// Bearer token for the completion service. Required.
    pub llm_api_key: Option<String>,
    /// Model used for planning, scoring, distillation and generation.
    pub llm_model: String,
    /// Model used for the automatic curation reviewer.
    pub reviewer_model: String,

    // Search service
    /// Base URL of the SearxNG-compatible search instance.
    pub searxng_url: String,
    /// Result URLs taken per search query.
    pub search_depth: usize,

    // Curation
    /// Minimum relevance score for a document to be kept.
    pub relevance_threshold: f64,
    /// Pause after curation filtering for a manual review.
    pub human_in_the_loop: bool,

    // Concurrency and timeouts
    /// Worker count for search and fetch batches.
    pub fetch_concurrency: usize,
    /// Worker count for completion batches.
    pub llm_concurrency: usize,
    /// Bound on each search or fetch request.
    pub request_timeout: Duration,
    /// Bound on each completion request.
    pub llm_timeout: Duration,
    /// Attempts per item, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub retry_base_delay: Duration,

    // Output
    /// `chatml` or a path to a tera chat template.
    pub chat_template: String,
    /// Reference conversation text for persona styling.
    pub persona_file: PathBuf,
    /// Directory under which new session directories are created.
    pub sessions_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm_api_url: "http://localhost:3000/api/chat/completions".to_string(),
            llm_api_key: None,
            llm_model: "deepseek-chat".to_string(),
            reviewer_model: "deepseek-chat".to_string(),

            searxng_url: "http://localhost:8080".to_string(),
            search_depth: 3,

            relevance_threshold: 0.7,
            human_in_the_loop: false,

            fetch_concurrency: 10,
            llm_concurrency: 5,
            request_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(300),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),

            chat_template: CHATML.to_string(),
            persona_file: PathBuf::from("persona_chat_history.txt"),
            sessions_root: PathBuf::from("."),
        }
    }
}

/// Values a profile may set. Absent fields keep the current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileOverrides {
    pub search_depth: Option<usize>,
    pub relevance_threshold: Option<f64>,
    pub llm_model: Option<String>,
    pub reviewer_model: Option<String>,
    pub searxng_url: Option<String>,
    pub llm_api_url: Option<String>,
    pub chat_template: Option<String>,
    pub persona_file: Option<PathBuf>,
    pub fetch_concurrency: Option<usize>,
    pub llm_concurrency: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub llm_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profiles: BTreeMap<String, ProfileOverrides>,
}

/// Command-line overrides; the highest-priority layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub llm_api_key: Option<String>,
    pub llm_api_url: Option<String>,
    pub llm_model: Option<String>,
    pub reviewer_model: Option<String>,
    pub searxng_url: Option<String>,
    pub search_depth: Option<usize>,
    pub relevance_threshold: Option<f64>,
    pub human_in_the_loop: bool,
    pub chat_template: Option<String>,
    pub persona_file: Option<PathBuf>,
    pub sessions_root: Option<PathBuf>,
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the full configuration for a run and validates it.
    ///
    /// `profile` names an entry in the profile file; `None` uses the
    /// `default` profile if present and built-in defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the profile is missing or malformed, an
    /// environment variable does not parse, or validation fails.
    pub fn load(
        profiles_path: &Path,
        profile: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(layer) = load_profile(profiles_path, profile)? {
            config.apply_profile(&layer);
        }
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Applies profile values over the current configuration.
    pub fn apply_profile(&mut self, profile: &ProfileOverrides) {
        if let Some(v) = profile.search_depth {
            self.search_depth = v;
        }
        if let Some(v) = profile.relevance_threshold {
            self.relevance_threshold = v;
        }
        if let Some(v) = &profile.llm_model {
            self.llm_model = v.clone();
        }
        if let Some(v) = &profile.reviewer_model {
            self.reviewer_model = v.clone();
        }
        if let Some(v) = &profile.searxng_url {
            self.searxng_url = v.clone();
        }
        if let Some(v) = &profile.llm_api_url {
            self.llm_api_url = v.clone();
        }
        if let Some(v) = &profile.chat_template {
            self.chat_template = v.clone();
        }
        if let Some(v) = &profile.persona_file {
            self.persona_file = v.clone();
        }
        if let Some(v) = profile.fetch_concurrency {
            self.fetch_concurrency = v;
        }
        if let Some(v) = profile.llm_concurrency {
            self.llm_concurrency = v;
        }
        if let Some(secs) = profile.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = profile.llm_timeout_secs {
            self.llm_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = profile.max_attempts {
            self.max_attempts = v;
        }
    }

    /// Applies environment variables read through `lookup`.
    ///
    /// # Environment Variables
    ///
    /// - `LLM_API_KEY`: completion service bearer token (required)
    /// - `LLM_API_URL`: completion endpoint URL
    /// - `LLM_MODEL_ID`: main model
    /// - `REVIEWER_MODEL_ID`: reviewer model
    /// - `SEARXNG_INSTANCE_URL`: search instance base URL
    /// - `KNOWLEDGE_FORGE_FETCH_CONCURRENCY`: search/fetch worker count
    /// - `KNOWLEDGE_FORGE_LLM_CONCURRENCY`: completion worker count
    /// - `KNOWLEDGE_FORGE_HUMAN_IN_THE_LOOP`: pause curation for manual review
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("LLM_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.llm_api_key = Some(val);
        }
        if let Some(val) = lookup("LLM_API_URL") {
            self.llm_api_url = val;
        }
        if let Some(val) = lookup("LLM_MODEL_ID") {
            self.llm_model = val;
        }
        if let Some(val) = lookup("REVIEWER_MODEL_ID") {
            self.reviewer_model = val;
        }
        if let Some(val) = lookup("SEARXNG_INSTANCE_URL") {
            self.searxng_url = val;
        }
        if let Some(val) = lookup("KNOWLEDGE_FORGE_FETCH_CONCURRENCY") {
            self.fetch_concurrency = parse_env_value(&val, "KNOWLEDGE_FORGE_FETCH_CONCURRENCY")?;
        }
        if let Some(val) = lookup("KNOWLEDGE_FORGE_LLM_CONCURRENCY") {
            self.llm_concurrency = parse_env_value(&val, "KNOWLEDGE_FORGE_LLM_CONCURRENCY")?;
        }
        if let Some(val) = lookup("KNOWLEDGE_FORGE_HUMAN_IN_THE_LOOP") {
            self.human_in_the_loop = parse_env_bool(&val, "KNOWLEDGE_FORGE_HUMAN_IN_THE_LOOP")?;
        }
        Ok(())
    }

    /// Applies command-line overrides.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.llm_api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            self.llm_api_key = Some(v.clone());
        }
        if let Some(v) = &overrides.llm_api_url {
            self.llm_api_url = v.clone();
        }
        if let Some(v) = &overrides.llm_model {
            self.llm_model = v.clone();
        }
        if let Some(v) = &overrides.reviewer_model {
            self.reviewer_model = v.clone();
        }
        if let Some(v) = &overrides.searxng_url {
            self.searxng_url = v.clone();
        }
        if let Some(v) = overrides.search_depth {
            self.search_depth = v;
        }
        if let Some(v) = overrides.relevance_threshold {
            self.relevance_threshold = v;
        }
        if overrides.human_in_the_loop {
            self.human_in_the_loop = true;
        }
        if let Some(v) = &overrides.chat_template {
            self.chat_template = v.clone();
        }
        if let Some(v) = &overrides.persona_file {
            self.persona_file = v.clone();
        }
        if let Some(v) = &overrides.sessions_root {
            self.sessions_root = v.clone();
        }
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingSecret` if no API key is configured and
    /// `ConfigError::ValidationFailed` if any other value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_key = self
            .llm_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if !has_key {
            return Err(ConfigError::MissingSecret("LLM_API_KEY".to_string()));
        }

        if self.llm_api_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "llm_api_url cannot be empty".to_string(),
            ));
        }

        if self.searxng_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "searxng_url cannot be empty".to_string(),
            ));
        }

        if self.llm_model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "llm_model cannot be empty".to_string(),
            ));
        }

        if self.reviewer_model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "reviewer_model cannot be empty".to_string(),
            ));
        }

        if self.search_depth == 0 {
            return Err(ConfigError::ValidationFailed(
                "search_depth must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(ConfigError::ValidationFailed(
                "relevance_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.fetch_concurrency == 0 || self.llm_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency bounds must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() || self.llm_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.chat_template.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "chat_template cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Retry schedule shared by every batch.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(self.retry_base_delay)
    }

    /// Pool settings for search and fetch batches.
    pub fn fetch_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.fetch_concurrency)
            .with_item_timeout(self.request_timeout)
            .with_retry(self.retry_policy())
    }

    /// Pool settings for completion batches.
    pub fn llm_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.llm_concurrency)
            .with_item_timeout(self.llm_timeout)
            .with_retry(self.retry_policy())
    }

    /// Completion options for the main model.
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions::new(self.llm_model.clone())
    }

    /// Completion options for the reviewer model.
    pub fn reviewer_options(&self) -> CompletionOptions {
        CompletionOptions::new(self.reviewer_model.clone())
    }

    /// Builder method to set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.llm_api_key = Some(key.into());
        self
    }

    /// Builder method to set both concurrency bounds.
    pub fn with_concurrency(mut self, fetch: usize, llm: usize) -> Self {
        self.fetch_concurrency = fetch;
        self.llm_concurrency = llm;
        self
    }

    /// Builder method to set the relevance threshold.
    pub fn with_relevance_threshold(mut self, threshold: f64) -> Self {
        self.relevance_threshold = threshold;
        self
    }

    /// Builder method to enable or disable the curation pause.
    pub fn with_human_in_the_loop(mut self, enabled: bool) -> Self {
        self.human_in_the_loop = enabled;
        self
    }

    /// Builder method to set the search depth.
    pub fn with_search_depth(mut self, depth: usize) -> Self {
        self.search_depth = depth;
        self
    }

    /// Builder method to set the persona reference file.
    pub fn with_persona_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.persona_file = path.into();
        self
    }

    /// Builder method to set the chat template.
    pub fn with_chat_template(mut self, template: impl Into<String>) -> Self {
        self.chat_template = template.into();
        self
    }

    /// Builder method to set the per-item retry schedule.
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base_delay = base_delay;
        self
    }
}

/// Reads one profile from the profile file.
///
/// A missing file yields `None`. A missing `default` profile also yields
/// `None`; any other missing profile is an error.
pub fn load_profile(
    path: &Path,
    profile: Option<&str>,
) -> Result<Option<ProfileOverrides>, ConfigError> {
    let name = profile.unwrap_or(DEFAULT_PROFILE);
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if profile.is_some_and(|p| p != DEFAULT_PROFILE) {
                return Err(ConfigError::ProfileNotFound {
                    profile: name.to_string(),
                    path: path.to_path_buf(),
                });
            }
            return Ok(None);
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    let file: ProfileFile =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ProfileFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    match file.profiles.get(name) {
        Some(found) => Ok(Some(found.clone())),
        None if name == DEFAULT_PROFILE => Ok(None),
        None => Err(ConfigError::ProfileNotFound {
            profile: name.to_string(),
            path: path.to_path_buf(),
        }),
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid() -> PipelineConfig {
        PipelineConfig::default().with_api_key("sk-test")
    }

    fn profile_file(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.search_depth, 3);
        assert!((config.relevance_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.llm_model, "deepseek-chat");
        assert_eq!(config.fetch_concurrency, 10);
        assert_eq!(config.llm_concurrency, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.llm_timeout, Duration::from_secs(300));
        assert_eq!(config.chat_template, "chatml");
        assert!(!config.human_in_the_loop);
        assert!(config.llm_api_key.is_none());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validation_missing_secret() {
        let err = PipelineConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(ref k) if k == "LLM_API_KEY"));

        let blank = PipelineConfig::default().with_api_key("  ");
        assert!(matches!(
            blank.validate(),
            Err(ConfigError::MissingSecret(_))
        ));
    }

    #[test]
    fn test_validation_invalid_threshold() {
        let config = valid().with_relevance_threshold(1.5);
        assert!(config.validate().is_err());

        let config = valid().with_relevance_threshold(-0.1);
        assert!(config.validate().is_err());

        let config = valid().with_relevance_threshold(1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let config = valid().with_concurrency(0, 5);
        assert!(config.validate().is_err());

        let config = valid().with_concurrency(10, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_search_depth() {
        let config = valid().with_search_depth(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_timeout() {
        let mut config = valid();
        config.llm_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_model() {
        let mut config = valid();
        config.reviewer_model = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_layer() {
        let env: HashMap<&str, &str> = [
            ("LLM_API_KEY", "sk-env"),
            ("LLM_MODEL_ID", "gpt-4o-mini"),
            ("SEARXNG_INSTANCE_URL", "http://search:8888"),
            ("KNOWLEDGE_FORGE_LLM_CONCURRENCY", "2"),
            ("KNOWLEDGE_FORGE_HUMAN_IN_THE_LOOP", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.llm_api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.reviewer_model, "deepseek-chat");
        assert_eq!(config.searxng_url, "http://search:8888");
        assert_eq!(config.llm_concurrency, 2);
        assert!(config.human_in_the_loop);
    }

    #[test]
    fn test_cli_api_key_beats_env() {
        let mut config = PipelineConfig::default();
        config
            .apply_env_from(|k| (k == "LLM_API_KEY").then(|| "sk-env".into()))
            .unwrap();
        config.apply_overrides(&ConfigOverrides {
            llm_api_key: Some("sk-cli".to_string()),
            ..Default::default()
        });
        assert_eq!(config.llm_api_key.as_deref(), Some("sk-cli"));

        // A blank flag keeps the env key.
        config.apply_overrides(&ConfigOverrides {
            llm_api_key: Some("  ".to_string()),
            ..Default::default()
        });
        assert_eq!(config.llm_api_key.as_deref(), Some("sk-cli"));
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env_from(|k| (k == "KNOWLEDGE_FORGE_FETCH_CONCURRENCY").then(|| "many".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_layer_priority() {
        let file = profile_file(
            "profiles:\n  deep:\n    search_depth: 8\n    llm_model: profile-model\n    relevance_threshold: 0.5\n",
        );
        let mut config = PipelineConfig::default();
        config.apply_profile(&load_profile(file.path(), Some("deep")).unwrap().unwrap());
        config
            .apply_env_from(|k| (k == "LLM_MODEL_ID").then(|| "env-model".into()))
            .unwrap();
        config.apply_overrides(&ConfigOverrides {
            relevance_threshold: Some(0.9),
            ..Default::default()
        });

        assert_eq!(config.search_depth, 8);
        assert_eq!(config.llm_model, "env-model");
        assert!((config.relevance_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_profile_file_uses_defaults() {
        let missing = Path::new("/nonexistent/profiles.yaml");
        assert!(load_profile(missing, None).unwrap().is_none());
        assert!(matches!(
            load_profile(missing, Some("quick_test")),
            Err(ConfigError::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn test_shipped_profiles_parse() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_PROFILES_PATH);
        let quick = load_profile(&path, Some("quick_test")).unwrap().unwrap();
        assert_eq!(quick.search_depth, Some(1));

        let mut config = PipelineConfig::default();
        config.apply_profile(&load_profile(&path, None).unwrap().unwrap());
        assert_eq!(config.search_depth, 3);
        assert_eq!(config.chat_template, CHATML);
    }

    #[test]
    fn test_unknown_profile_is_error() {
        let file = profile_file("profiles:\n  default:\n    search_depth: 2\n");
        assert_eq!(
            load_profile(file.path(), None).unwrap().unwrap().search_depth,
            Some(2)
        );
        assert!(matches!(
            load_profile(file.path(), Some("nope")),
            Err(ConfigError::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_profile_file() {
        let file = profile_file("profiles: [unclosed");
        assert!(matches!(
            load_profile(file.path(), None),
            Err(ConfigError::ProfileFile { .. })
        ));
    }

    #[test]
    fn test_pool_settings_follow_config() {
        let config = valid().with_concurrency(4, 2);
        assert_eq!(config.fetch_pool().num_workers, 4);
        assert_eq!(config.llm_pool().num_workers, 2);
        assert_eq!(config.llm_pool().item_timeout, Duration::from_secs(300));
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("TRUE", "k").unwrap());
        assert!(!parse_env_bool("off", "k").unwrap());
        assert!(parse_env_bool("maybe", "k").is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingSecret("LLM_API_KEY".to_string());
        assert_eq!(err.to_string(), "Missing required secret: LLM_API_KEY");

        let err = ConfigError::InvalidValue {
            key: "KNOWLEDGE_FORGE_LLM_CONCURRENCY".to_string(),
            message: "could not parse 'x'".to_string(),
        };
        assert!(err.to_string().contains("KNOWLEDGE_FORGE_LLM_CONCURRENCY"));
    }
}
