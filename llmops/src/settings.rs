//! Layered configuration
//!
//! Settings are resolved in this order, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. a `.env` file in the working directory, if present
//! 4. the process environment
//!
//! Environment variable names are the upper-case field names (`ENVIRONMENT`,
//! `LOG_LEVEL`, `COST_ALERT_THRESHOLD`, ...). Keys are matched case
//! insensitively and empty values are ignored.
//!
//! # Examples
//!
//! ```rust
//! use llmops::settings::{Environment, Settings};
//!
//! let settings = Settings::default()
//!     .with_environment(Environment::Staging)
//!     .with_cost_alert_threshold(25.0);
//!
//! assert!(settings.validate().is_ok());
//! assert_eq!(settings.evaluation_metrics(), vec!["accuracy", "latency", "cost", "user_satisfaction"]);
//! ```

use model::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

pub const DOTENV_FILE: &str = ".env";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Could not render settings as TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid settings: {reason}")]
    Invalid { reason: String },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "plain" | "console" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub environment: Environment,
    pub debug: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_openai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_openai_endpoint: Option<String>,

    pub default_model: String,
    pub default_provider: ProviderKind,

    pub model_registry_uri: String,
    pub mlflow_tracking_uri: String,
    /// Keep experiment tracking in-process instead of calling MLflow
    pub demo_mode: bool,

    pub prometheus_port: u16,
    pub grafana_url: String,

    /// Daily cost in USD above which a cost alert fires
    pub cost_alert_threshold: f64,
    pub token_cost_tracking: bool,

    pub ab_test_enabled: bool,
    pub ab_test_traffic_split: f64,

    pub prompt_versioning_enabled: bool,

    pub evaluation_dataset_path: String,
    /// Comma separated
    pub evaluation_metrics: String,

    pub log_level: String,
    pub log_format: LogFormat,

    pub max_requests_per_minute: u32,
    pub max_tokens_per_request: u32,

    pub api_host: String,
    pub api_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            debug: true,
            openai_api_key: None,
            anthropic_api_key: None,
            azure_openai_api_key: None,
            azure_openai_endpoint: None,
            default_model: "gpt-4".to_string(),
            default_provider: ProviderKind::OpenAi,
            model_registry_uri: "sqlite:///./models.db".to_string(),
            mlflow_tracking_uri: "http://localhost:5000".to_string(),
            demo_mode: true,
            prometheus_port: 8000,
            grafana_url: "http://localhost:3000".to_string(),
            cost_alert_threshold: 100.0,
            token_cost_tracking: true,
            ab_test_enabled: true,
            ab_test_traffic_split: 0.5,
            prompt_versioning_enabled: true,
            evaluation_dataset_path: "data/evaluation/".to_string(),
            evaluation_metrics: "accuracy,latency,cost,user_satisfaction".to_string(),
            log_level: "INFO".to_string(),
            log_format: LogFormat::Json,
            max_requests_per_minute: 60,
            max_tokens_per_request: 4000,
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
        }
    }
}

/// Parsing of a single environment value into a field type
trait EnvValue: Sized {
    fn parse_env(raw: &str) -> Result<Self, String>;
}

impl EnvValue for String {
    fn parse_env(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl EnvValue for Option<String> {
    fn parse_env(raw: &str) -> Result<Self, String> {
        Ok(Some(raw.to_string()))
    }
}

impl EnvValue for bool {
    fn parse_env(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(format!("'{}' is not a boolean", other)),
        }
    }
}

macro_rules! env_value_from_str {
    ($($ty:ty),*) => {
        $(
            impl EnvValue for $ty {
                fn parse_env(raw: &str) -> Result<Self, String> {
                    raw.trim().parse::<$ty>().map_err(|e| e.to_string())
                }
            }
        )*
    };
}

env_value_from_str!(u16, u32, u64, f64, Environment, LogFormat, ProviderKind);

macro_rules! apply_env {
    ($settings:ident, $vars:ident; $($field:ident),* $(,)?) => {
        $(
            let key = stringify!($field).to_ascii_uppercase();
            if let Some(raw) = $vars.get(&key) {
                $settings.$field = EnvValue::parse_env(raw).map_err(|reason| {
                    SettingsError::InvalidValue {
                        key: key.clone(),
                        value: raw.clone(),
                        reason,
                    }
                })?;
            }
        )*
    };
}

impl Settings {
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_demo_mode(mut self, demo_mode: bool) -> Self {
        self.demo_mode = demo_mode;
        self
    }

    pub fn with_cost_alert_threshold(mut self, threshold: f64) -> Self {
        self.cost_alert_threshold = threshold;
        self
    }

    pub fn with_ab_testing(mut self, enabled: bool) -> Self {
        self.ab_test_enabled = enabled;
        self
    }

    pub fn with_rate_limits(mut self, requests_per_minute: u32, tokens_per_request: u32) -> Self {
        self.max_requests_per_minute = requests_per_minute;
        self.max_tokens_per_request = tokens_per_request;
        self
    }

    pub fn with_api_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.api_host = host.into();
        self.api_port = port;
        self
    }

    pub fn evaluation_metrics(&self) -> Vec<&str> {
        self.evaluation_metrics
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .collect()
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn validate(&self) -> SettingsResult<()> {
        if !(0.0..=1.0).contains(&self.ab_test_traffic_split) {
            return Err(SettingsError::Invalid {
                reason: format!(
                    "ab_test_traffic_split must be between 0 and 1, got {}",
                    self.ab_test_traffic_split
                ),
            });
        }

        if self.cost_alert_threshold < 0.0 {
            return Err(SettingsError::Invalid {
                reason: "cost_alert_threshold cannot be negative".to_string(),
            });
        }

        if self.max_requests_per_minute == 0 || self.max_tokens_per_request == 0 {
            return Err(SettingsError::Invalid {
                reason: "rate limits must be positive".to_string(),
            });
        }

        const LEVELS: [&str; 7] = ["trace", "debug", "info", "warn", "warning", "error", "critical"];
        if !LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(SettingsError::Invalid {
                reason: format!("unknown log level '{}'", self.log_level),
            });
        }

        Ok(())
    }

    pub fn from_toml_str(contents: &str) -> SettingsResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file(path: &Path) -> SettingsResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Effective settings as TOML, secrets masked
    pub fn to_toml(&self) -> SettingsResult<String> {
        Ok(toml::to_string_pretty(&self.redacted())?)
    }

    pub fn redacted(&self) -> Self {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "***".to_string());
        Self {
            openai_api_key: mask(&self.openai_api_key),
            anthropic_api_key: mask(&self.anthropic_api_key),
            azure_openai_api_key: mask(&self.azure_openai_api_key),
            ..self.clone()
        }
    }

    /// Resolve settings from an optional TOML file, `./.env` and the process environment
    pub fn load(config_path: Option<&Path>) -> SettingsResult<Self> {
        Self::load_from(
            config_path,
            Some(Path::new(DOTENV_FILE)),
            std::env::vars(),
        )
    }

    /// [`Settings::load`] with explicit sources
    pub fn load_from<I>(
        config_path: Option<&Path>,
        dotenv_path: Option<&Path>,
        env: I,
    ) -> SettingsResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = match config_path {
            Some(path) => {
                debug!(path = %path.display(), "loading settings file");
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        let mut vars = HashMap::new();
        if let Some(path) = dotenv_path.filter(|p| p.is_file()) {
            debug!(path = %path.display(), "loading .env file");
            for item in dotenvy::from_path_iter(path)? {
                let (key, value) = item?;
                insert_var(&mut vars, key, value);
            }
        }
        for (key, value) in env {
            insert_var(&mut vars, key, value);
        }

        settings.apply_overrides(&vars)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`Settings::load`], but falls back to defaults on any error
    pub fn load_or_default(config_path: Option<&Path>) -> Self {
        match Self::load(config_path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "failed to load settings, using defaults");
                Self::default()
            }
        }
    }

    fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> SettingsResult<()> {
        apply_env!(self, vars;
            environment,
            debug,
            openai_api_key,
            anthropic_api_key,
            azure_openai_api_key,
            azure_openai_endpoint,
            default_model,
            default_provider,
            model_registry_uri,
            mlflow_tracking_uri,
            demo_mode,
            prometheus_port,
            grafana_url,
            cost_alert_threshold,
            token_cost_tracking,
            ab_test_enabled,
            ab_test_traffic_split,
            prompt_versioning_enabled,
            evaluation_dataset_path,
            evaluation_metrics,
            log_level,
            log_format,
            max_requests_per_minute,
            max_tokens_per_request,
            api_host,
            api_port,
        );
        Ok(())
    }
}

fn insert_var(vars: &mut HashMap<String, String>, key: String, value: String) {
    if value.trim().is_empty() {
        return;
    }
    vars.insert(key.to_ascii_uppercase(), value);
}
