//! Pipeline configuration for the orchestrator.
//!
//! This module provides configuration options for the generation workflow,
//! including the retry bound, fan-out width, error detail bounds, structural
//! rule limits, timeouts and storage settings.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Number of branch kinds each pipeline kind provides.
pub const MAX_BRANCH_COUNT: usize = 2;

/// Smallest accepted bound for persisted error details.
pub const MIN_ERROR_DETAIL_LENGTH: usize = 16;

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Workflow settings
    /// Maximum Generate attempts before semantic failures escalate.
    pub max_iterations: u32,
    /// Number of post-processing branches run in parallel.
    pub branch_count: usize,
    /// Maximum length (in characters) of a persisted error detail.
    pub max_error_detail_length: usize,
    /// Deadline for every collaborator call.
    pub stage_timeout: Duration,

    // Structural rules
    /// Exact number of incorrect quiz options.
    pub quiz_incorrect_options: usize,
    /// Expected number of recommended responses; other counts only warn.
    pub recommended_responses: usize,
    /// Word limit for a scene's dialogue line.
    pub max_dialogue_words: usize,

    // Runtime settings
    /// Path of the SQLite job database.
    pub database_path: String,
    /// Number of workers draining the job event queue.
    pub num_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // Workflow defaults
            max_iterations: 3,
            branch_count: 2,
            max_error_detail_length: 255,
            stage_timeout: Duration::from_secs(300), // 5 minutes

            // Rule defaults
            quiz_incorrect_options: 3,
            recommended_responses: 2,
            max_dialogue_words: 15,

            // Runtime defaults
            database_path: "./forge-jobs.db".to_string(),
            num_workers: 4,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FORGE_MAX_ITERATIONS`: Generate attempt bound (default: 3)
    /// - `FORGE_BRANCH_COUNT`: Post-processing branches (default: 2)
    /// - `FORGE_MAX_ERROR_DETAIL_LENGTH`: Error detail bound (default: 255)
    /// - `FORGE_STAGE_TIMEOUT_SECS`: Collaborator call deadline (default: 300)
    /// - `FORGE_QUIZ_INCORRECT_OPTIONS`: Incorrect quiz options (default: 3)
    /// - `FORGE_RECOMMENDED_RESPONSES`: Expected responses (default: 2)
    /// - `FORGE_MAX_DIALOGUE_WORDS`: Dialogue word limit (default: 15)
    /// - `FORGE_DATABASE_PATH`: SQLite job database (default: ./forge-jobs.db)
    /// - `FORGE_NUM_WORKERS`: Worker count (default: 4)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Workflow settings
        if let Ok(val) = std::env::var("FORGE_MAX_ITERATIONS") {
            config.max_iterations = parse_env_value(&val, "FORGE_MAX_ITERATIONS")?;
        }

        if let Ok(val) = std::env::var("FORGE_BRANCH_COUNT") {
            config.branch_count = parse_env_value(&val, "FORGE_BRANCH_COUNT")?;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_ERROR_DETAIL_LENGTH") {
            config.max_error_detail_length =
                parse_env_value(&val, "FORGE_MAX_ERROR_DETAIL_LENGTH")?;
        }

        if let Ok(val) = std::env::var("FORGE_STAGE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FORGE_STAGE_TIMEOUT_SECS")?;
            config.stage_timeout = Duration::from_secs(secs);
        }

        // Structural rules
        if let Ok(val) = std::env::var("FORGE_QUIZ_INCORRECT_OPTIONS") {
            config.quiz_incorrect_options = parse_env_value(&val, "FORGE_QUIZ_INCORRECT_OPTIONS")?;
        }

        if let Ok(val) = std::env::var("FORGE_RECOMMENDED_RESPONSES") {
            config.recommended_responses = parse_env_value(&val, "FORGE_RECOMMENDED_RESPONSES")?;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_DIALOGUE_WORDS") {
            config.max_dialogue_words = parse_env_value(&val, "FORGE_MAX_DIALOGUE_WORDS")?;
        }

        // Runtime settings
        if let Ok(val) = std::env::var("FORGE_DATABASE_PATH") {
            config.database_path = val;
        }

        if let Ok(val) = std::env::var("FORGE_NUM_WORKERS") {
            config.num_workers = parse_env_value(&val, "FORGE_NUM_WORKERS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.branch_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "branch_count must be at least 1".to_string(),
            ));
        }

        if self.branch_count > MAX_BRANCH_COUNT {
            return Err(ConfigError::ValidationFailed(format!(
                "branch_count must not exceed {}",
                MAX_BRANCH_COUNT
            )));
        }

        if self.max_error_detail_length < MIN_ERROR_DETAIL_LENGTH {
            return Err(ConfigError::ValidationFailed(format!(
                "max_error_detail_length must be at least {}",
                MIN_ERROR_DETAIL_LENGTH
            )));
        }

        if self.stage_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "stage_timeout must be greater than 0".to_string(),
            ));
        }

        if self.quiz_incorrect_options == 0 {
            return Err(ConfigError::ValidationFailed(
                "quiz_incorrect_options must be greater than 0".to_string(),
            ));
        }

        if self.max_dialogue_words == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_dialogue_words must be greater than 0".to_string(),
            ));
        }

        if self.database_path.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_path cannot be empty".to_string(),
            ));
        }

        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Upper bound on `advance` calls a job can need to reach a terminal status.
    pub fn max_transitions(&self) -> usize {
        // Pending, then three stages per attempt, then post-process, compose.
        1 + 3 * (self.max_iterations.max(1) as usize) + 2
    }

    /// Builder method to set the iteration bound.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Builder method to set the fan-out width.
    pub fn with_branch_count(mut self, count: usize) -> Self {
        self.branch_count = count;
        self
    }

    /// Builder method to set the error detail bound.
    pub fn with_max_error_detail_length(mut self, len: usize) -> Self {
        self.max_error_detail_length = len;
        self
    }

    /// Builder method to set the collaborator call deadline.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Builder method to set the incorrect quiz option count.
    pub fn with_quiz_incorrect_options(mut self, count: usize) -> Self {
        self.quiz_incorrect_options = count;
        self
    }

    /// Builder method to set the expected response count.
    pub fn with_recommended_responses(mut self, count: usize) -> Self {
        self.recommended_responses = count;
        self
    }

    /// Builder method to set the dialogue word limit.
    pub fn with_max_dialogue_words(mut self, words: usize) -> Self {
        self.max_dialogue_words = words;
        self
    }

    /// Builder method to set the database path.
    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Builder method to set the worker count.
    pub fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
