//! Prompt versioning and A/B testing
//!
//! Every prompt belongs to a template name (`chatbot`, `summarization`, ...)
//! and gets a sequential version per template. At most one version of a
//! template is `active`; activating another deprecates the previous one.
//! Two versions can be put into an A/B test, during which users are
//! assigned to a variant by a stable hash of their id.
//!
//! Templates use `{name}` placeholders. `{{` and `}}` produce literal braces.
//!
//! # Examples
//!
//! ```rust
//! use llmops::prompts::PromptManager;
//! use std::collections::HashMap;
//!
//! let mut prompts = PromptManager::new();
//! let id = prompts
//!     .create("greeting", "Hallo {name}!", vec!["name".into()], None, Vec::new());
//! prompts.activate(&id).unwrap();
//!
//! let vars = HashMap::from([("name".to_string(), "Welt".to_string())]);
//! assert_eq!(prompts.render("greeting", &vars, None).unwrap(), "Hallo Welt!");
//! ```

use crate::settings::Settings;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// How long an A/B test runs after it was started
pub const AB_TEST_DURATION_HOURS: i64 = 24;

#[derive(Error, Debug, PartialEq)]
pub enum PromptError {
    #[error("Prompt not found: {id}")]
    NotFound { id: String },

    #[error("No prompt found for template {template}")]
    TemplateNotFound { template: String },

    #[error("Missing variables: {}", .names.join(", "))]
    MissingVariables { names: Vec<String> },

    #[error("Invalid variable in template: {name}")]
    UnknownPlaceholder { name: String },

    #[error("Malformed template: {reason}")]
    MalformedTemplate { reason: String },

    #[error("A/B testing is disabled")]
    AbTestingDisabled,

    #[error("Traffic split must be between 0 and 1, got {split}")]
    InvalidSplit { split: f64 },
}

pub type PromptResult<T> = Result<T, PromptError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStatus {
    Draft,
    Active,
    Testing,
    Deprecated,
}

impl fmt::Display for PromptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PromptStatus::Draft => "draft",
            PromptStatus::Active => "active",
            PromptStatus::Testing => "testing",
            PromptStatus::Deprecated => "deprecated",
        };
        f.write_str(s)
    }
}

impl FromStr for PromptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(PromptStatus::Draft),
            "active" => Ok(PromptStatus::Active),
            "testing" => Ok(PromptStatus::Testing),
            "deprecated" => Ok(PromptStatus::Deprecated),
            other => Err(format!("unknown prompt status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub template_name: String,
    pub version: String,
    pub template: String,
    pub variables: Vec<String>,
    pub status: PromptStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub performance_metrics: HashMap<String, f64>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// A template shipped with the service, used when no version is stored
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTemplate {
    pub name: &'static str,
    pub version: &'static str,
    pub template: &'static str,
    pub variables: &'static [&'static str],
}

pub const BUILTIN_TEMPLATES: [BuiltinTemplate; 3] = [
    BuiltinTemplate {
        name: "chatbot",
        version: "1.0",
        template: "\nDu bist ein hilfreicher Assistent. Antworte auf Deutsch und sei freundlich und professionell.\n\nKontext: {context}\nFrage: {question}\n\nAntwort:",
        variables: &["context", "question"],
    },
    BuiltinTemplate {
        name: "summarization",
        version: "1.0",
        template: "\nFasse den folgenden Text in maximal 100 Wörtern zusammen:\n\nText: {text}\n\nZusammenfassung:",
        variables: &["text"],
    },
    BuiltinTemplate {
        name: "translation",
        version: "1.0",
        template: "\nÜbersetze den folgenden Text von {source_language} nach {target_language}:\n\nText: {text}\n\nÜbersetzung:",
        variables: &["source_language", "target_language", "text"],
    },
];

pub fn builtin_template(name: &str) -> Option<&'static BuiltinTemplate> {
    BUILTIN_TEMPLATES.iter().find(|t| t.name == name)
}

/// Substitute `{name}` placeholders
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> PromptResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => {
                            return Err(PromptError::MalformedTemplate {
                                reason: "unclosed '{'".to_string(),
                            })
                        }
                        Some(ch) => name.push(ch),
                    }
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(PromptError::MalformedTemplate {
                        reason: "empty placeholder '{}'".to_string(),
                    });
                }
                let value = variables
                    .get(name)
                    .ok_or_else(|| PromptError::UnknownPlaceholder {
                        name: name.to_string(),
                    })?;
                out.push_str(value);
            }
            '}' => {
                return Err(PromptError::MalformedTemplate {
                    reason: "single '}' encountered".to_string(),
                })
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Which side of an A/B test a request lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

/// Bucket in `0..100` derived from the first 8 bytes of SHA-256 over the user id
pub fn user_bucket(user_id: &str) -> u64 {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) % 100
}

/// Stable assignment: variant B when the bucket falls below `split * 100`
pub fn variant_for_user(user_id: &str, traffic_split: f64) -> Variant {
    if (user_bucket(user_id) as f64) < traffic_split * 100.0 {
        Variant::B
    } else {
        Variant::A
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestConfig {
    pub template_name: String,
    pub prompt_a: String,
    pub prompt_b: String,
    pub traffic_split: f64,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl AbTestConfig {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.expires_at
    }

    pub fn prompt_for(&self, variant: Variant) -> &str {
        match variant {
            Variant::A => &self.prompt_a,
            Variant::B => &self.prompt_b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptManager {
    prompts: HashMap<String, PromptVersion>,
    ab_tests: HashMap<String, AbTestConfig>,
    ab_test_enabled: bool,
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptManager {
    pub fn new() -> Self {
        Self {
            prompts: HashMap::new(),
            ab_tests: HashMap::new(),
            ab_test_enabled: true,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new().with_ab_testing(settings.ab_test_enabled)
    }

    pub fn with_ab_testing(mut self, enabled: bool) -> Self {
        self.ab_test_enabled = enabled;
        self
    }

    /// Store a new draft version and return its id
    pub fn create(
        &mut self,
        template_name: &str,
        template: &str,
        variables: Vec<String>,
        description: Option<String>,
        tags: Vec<String>,
    ) -> String {
        let now = Utc::now();
        let base_id = format!(
            "{}_{}_{}",
            template_name,
            now.format("%Y-%m-%dT%H:%M:%S%.6f"),
            short_hash(template)
        );
        let mut id = base_id.clone();
        let mut n = 1;
        while self.prompts.contains_key(&id) {
            id = format!("{}_{}", base_id, n);
            n += 1;
        }

        let existing = self
            .prompts
            .values()
            .filter(|p| p.template_name == template_name)
            .count();

        let prompt = PromptVersion {
            id: id.clone(),
            template_name: template_name.to_string(),
            version: format!("v{}", existing + 1),
            template: template.to_string(),
            variables,
            status: PromptStatus::Draft,
            created_at: now,
            updated_at: now,
            performance_metrics: HashMap::new(),
            description,
            tags,
        };

        info!(template = template_name, version = %prompt.version, id = %id, "prompt created");
        self.prompts.insert(id.clone(), prompt);
        id
    }

    pub fn get(&self, id: &str) -> Option<&PromptVersion> {
        self.prompts.get(id)
    }

    pub fn get_active(&self, template_name: &str) -> Option<&PromptVersion> {
        self.prompts
            .values()
            .filter(|p| p.template_name == template_name && p.status == PromptStatus::Active)
            .max_by_key(|p| p.updated_at)
    }

    /// Make `id` the active version of its template
    pub fn activate(&mut self, id: &str) -> PromptResult<()> {
        let template_name = self
            .prompts
            .get(id)
            .map(|p| p.template_name.clone())
            .ok_or_else(|| PromptError::NotFound { id: id.to_string() })?;

        let now = Utc::now();
        for other in self.prompts.values_mut() {
            if other.template_name == template_name
                && other.status == PromptStatus::Active
                && other.id != id
            {
                other.status = PromptStatus::Deprecated;
                other.updated_at = now;
            }
        }

        if let Some(prompt) = self.prompts.get_mut(id) {
            prompt.status = PromptStatus::Active;
            prompt.updated_at = now;
            info!(template = %template_name, version = %prompt.version, "prompt activated");
        }
        Ok(())
    }

    /// Render a stored version, the active version, or the built-in template
    pub fn render(
        &self,
        template_name: &str,
        variables: &HashMap<String, String>,
        prompt_id: Option<&str>,
    ) -> PromptResult<String> {
        let prompt = match prompt_id {
            Some(id) => self.get(id),
            None => self.get_active(template_name),
        };

        let Some(prompt) = prompt else {
            let builtin = builtin_template(template_name).ok_or_else(|| {
                PromptError::TemplateNotFound {
                    template: template_name.to_string(),
                }
            })?;
            return render_template(builtin.template, variables);
        };

        let mut missing: Vec<String> = prompt
            .variables
            .iter()
            .filter(|v| !variables.contains_key(*v))
            .cloned()
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(PromptError::MissingVariables { names: missing });
        }

        render_template(&prompt.template, variables)
    }

    pub fn start_ab_test(
        &mut self,
        template_name: &str,
        prompt_a: &str,
        prompt_b: &str,
        traffic_split: f64,
    ) -> PromptResult<()> {
        if !self.ab_test_enabled {
            return Err(PromptError::AbTestingDisabled);
        }
        if !(0.0..=1.0).contains(&traffic_split) {
            return Err(PromptError::InvalidSplit {
                split: traffic_split,
            });
        }
        for id in [prompt_a, prompt_b] {
            if !self.prompts.contains_key(id) {
                return Err(PromptError::NotFound { id: id.to_string() });
            }
        }

        let now = Utc::now();
        for id in [prompt_a, prompt_b] {
            if let Some(prompt) = self.prompts.get_mut(id) {
                prompt.status = PromptStatus::Testing;
                prompt.updated_at = now;
            }
        }

        self.ab_tests.insert(
            template_name.to_string(),
            AbTestConfig {
                template_name: template_name.to_string(),
                prompt_a: prompt_a.to_string(),
                prompt_b: prompt_b.to_string(),
                traffic_split,
                started_at: now,
                expires_at: now + Duration::hours(AB_TEST_DURATION_HOURS),
                active: true,
            },
        );

        info!(template = template_name, split = traffic_split, "A/B test started");
        Ok(())
    }

    pub fn stop_ab_test(&mut self, template_name: &str) -> Option<AbTestConfig> {
        let stopped = self.ab_tests.remove(template_name);
        if stopped.is_some() {
            info!(template = template_name, "A/B test stopped");
        }
        stopped
    }

    /// Live test for a template, if any
    pub fn ab_test(&self, template_name: &str) -> Option<&AbTestConfig> {
        self.ab_tests
            .get(template_name)
            .filter(|t| t.is_live(Utc::now()))
    }

    /// Prompt to serve under an A/B test, or the active prompt when no test is live
    pub fn ab_test_prompt(&self, template_name: &str, user_id: Option<&str>) -> Option<&PromptVersion> {
        let Some(test) = self.ab_test(template_name) else {
            return self.get_active(template_name);
        };

        let variant = match user_id {
            Some(user) => variant_for_user(user, test.traffic_split),
            None if rand::random::<f64>() < test.traffic_split => Variant::B,
            None => Variant::A,
        };
        self.get(test.prompt_for(variant))
    }

    /// Merge metrics into a prompt
    pub fn update_metrics(&mut self, id: &str, metrics: HashMap<String, f64>) -> PromptResult<()> {
        let prompt = self
            .prompts
            .get_mut(id)
            .ok_or_else(|| PromptError::NotFound { id: id.to_string() })?;
        prompt.performance_metrics.extend(metrics);
        prompt.updated_at = Utc::now();
        Ok(())
    }

    /// Filtered prompts, most recently updated first
    pub fn list(&self, template_name: Option<&str>, status: Option<PromptStatus>) -> Vec<&PromptVersion> {
        let mut prompts: Vec<&PromptVersion> = self
            .prompts
            .values()
            .filter(|p| template_name.map_or(true, |t| p.template_name == t))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect();
        prompts.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.version.cmp(&a.version))
                .then_with(|| a.id.cmp(&b.id))
        });
        prompts
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn delete(&mut self, id: &str) -> PromptResult<PromptVersion> {
        let removed = self
            .prompts
            .remove(id)
            .ok_or_else(|| PromptError::NotFound { id: id.to_string() })?;
        info!(id, "prompt deleted");
        Ok(removed)
    }
}
