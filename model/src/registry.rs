//! Model registry
//!
//! Keeps every registered model version with its parameters, lifecycle status
//! and performance metrics. Versions are derived from the registration time and
//! a hash of the parameters, so identical parameters registered at different
//! times still get distinct versions.
//!
//! # Examples
//!
//! ```rust
//! use model::registry::{ModelRegistry, ModelStatus};
//! use model::ProviderKind;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = ModelRegistry::new();
//! let params = json!({"temperature": 0.7, "max_tokens": 4096});
//! let version = registry
//!     .register("gpt-4", ProviderKind::OpenAi, params.as_object().cloned().unwrap_or_default(), None)
//!     .await?;
//!
//! registry.deploy("gpt-4", &version)?;
//! assert_eq!(registry.get("gpt-4", None).unwrap().status, ModelStatus::Deployed);
//! # Ok(())
//! # }
//! ```

use crate::catalog::ModelCatalog;
use crate::provider::ProviderKind;
use crate::tracking::{ExperimentTracker, NoopTracker};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Version alias that resolves to the most recently updated entry
pub const LATEST: &str = "latest";

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Model {name} version {version} not found")]
    NotFound { name: String, version: String },

    #[error("Invalid model name: {reason}")]
    InvalidName { reason: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Lifecycle status of a model version
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Training,
    Ready,
    Deployed,
    Deprecated,
    Failed,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelStatus::Training => "training",
            ModelStatus::Ready => "ready",
            ModelStatus::Deployed => "deployed",
            ModelStatus::Deprecated => "deprecated",
            ModelStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One registered model version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub version: String,
    pub provider: ProviderKind,
    pub status: ModelStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parameters: Map<String, Value>,
    pub performance_metrics: HashMap<String, f64>,
    pub cost_per_1k_tokens: f64,
    pub description: Option<String>,
}

/// Side-by-side view of two model versions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelComparison {
    pub model1: ModelSummary,
    pub model2: ModelSummary,
    /// `model2` cost minus `model1` cost, per 1k tokens
    pub cost_difference: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub version: String,
    pub provider: ProviderKind,
    pub cost_per_1k_tokens: f64,
    pub performance_metrics: HashMap<String, f64>,
}

impl From<&ModelMetadata> for ModelSummary {
    fn from(model: &ModelMetadata) -> Self {
        Self {
            name: model.name.clone(),
            version: model.version.clone(),
            provider: model.provider,
            cost_per_1k_tokens: model.cost_per_1k_tokens,
            performance_metrics: model.performance_metrics.clone(),
        }
    }
}

pub struct ModelRegistry {
    /// Entries in registration order
    models: Vec<ModelMetadata>,
    catalog: ModelCatalog,
    tracker: Arc<dyn ExperimentTracker>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Registry with the built-in catalog and no experiment tracking
    pub fn new() -> Self {
        Self::with_tracker(ModelCatalog::builtin(), Arc::new(NoopTracker))
    }

    pub fn with_tracker(catalog: ModelCatalog, tracker: Arc<dyn ExperimentTracker>) -> Self {
        Self {
            models: Vec::new(),
            catalog,
            tracker,
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn tracker_name(&self) -> &'static str {
        self.tracker.tracker_name()
    }

    pub fn tracker(&self) -> Arc<dyn ExperimentTracker> {
        Arc::clone(&self.tracker)
    }

    /// Register a new model version and return the version string
    pub async fn register(
        &mut self,
        name: &str,
        provider: ProviderKind,
        parameters: Map<String, Value>,
        description: Option<String>,
    ) -> RegistryResult<String> {
        let metadata = self.insert(name, provider, parameters, description)?;
        track_registration(self.tracker.as_ref(), &metadata).await;
        Ok(metadata.version)
    }

    /// Store a new model version without reporting it to the tracker.
    ///
    /// Shared registries use this under their lock and call
    /// [`track_registration`] after releasing it.
    pub fn insert(
        &mut self,
        name: &str,
        provider: ProviderKind,
        parameters: Map<String, Value>,
        description: Option<String>,
    ) -> RegistryResult<ModelMetadata> {
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidName {
                reason: "name cannot be empty".to_string(),
            });
        }

        let now = Utc::now();
        let version = self.unique_version(
            name,
            generate_version(now.with_timezone(&Local), &parameters),
        );

        let metadata = ModelMetadata {
            name: name.to_string(),
            version: version.clone(),
            provider,
            status: ModelStatus::Ready,
            created_at: now,
            updated_at: now,
            parameters,
            performance_metrics: HashMap::new(),
            cost_per_1k_tokens: self.catalog.get(name).cost_per_1k_tokens,
            description,
        };

        self.models.push(metadata.clone());
        info!(model = name, version = %version, "model registered");
        Ok(metadata)
    }

    /// Mark a model version as deployed
    pub fn deploy(&mut self, name: &str, version: &str) -> RegistryResult<()> {
        let model = self.entry_mut(name, version)?;
        model.status = ModelStatus::Deployed;
        model.updated_at = Utc::now();
        info!(model = name, version, "model deployed");
        Ok(())
    }

    /// Mark a model version as deprecated
    pub fn deprecate(&mut self, name: &str, version: &str) -> RegistryResult<()> {
        let model = self.entry_mut(name, version)?;
        model.status = ModelStatus::Deprecated;
        model.updated_at = Utc::now();
        info!(model = name, version, "model deprecated");
        Ok(())
    }

    /// Look up a model. `None` or [`LATEST`] picks the most recently updated version.
    pub fn get(&self, name: &str, version: Option<&str>) -> Option<&ModelMetadata> {
        match version {
            Some(v) if v != LATEST => self
                .models
                .iter()
                .find(|m| m.name == name && m.version == v),
            _ => self
                .models
                .iter()
                .filter(|m| m.name == name)
                .max_by_key(|m| m.updated_at),
        }
    }

    pub fn list(&self) -> &[ModelMetadata] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn count_by_status(&self) -> HashMap<ModelStatus, usize> {
        let mut counts = HashMap::new();
        for model in &self.models {
            *counts.entry(model.status).or_insert(0) += 1;
        }
        counts
    }

    /// Merge performance metrics into a model version
    pub async fn update_metrics(
        &mut self,
        name: &str,
        version: &str,
        metrics: HashMap<String, f64>,
    ) -> RegistryResult<()> {
        let tracker = Arc::clone(&self.tracker);
        let model = self.entry_mut(name, version)?;
        model.performance_metrics.extend(metrics.clone());
        model.updated_at = Utc::now();

        if let Err(e) = tracker.log_metrics(name, version, &metrics).await {
            warn!(model = name, version, error = %e, "metric logging failed");
        }
        Ok(())
    }

    /// Cost in USD of `token_count` tokens on a model version; 0.0 for unknown models
    pub fn cost(&self, name: &str, version: Option<&str>, token_count: u64) -> f64 {
        self.get(name, version)
            .map(|m| (token_count as f64 / 1000.0) * m.cost_per_1k_tokens)
            .unwrap_or(0.0)
    }

    pub fn compare(
        &self,
        model1: &str,
        version1: &str,
        model2: &str,
        version2: &str,
    ) -> RegistryResult<ModelComparison> {
        let m1 = self
            .get(model1, Some(version1))
            .ok_or_else(|| not_found(model1, version1))?;
        let m2 = self
            .get(model2, Some(version2))
            .ok_or_else(|| not_found(model2, version2))?;

        Ok(ModelComparison {
            model1: m1.into(),
            model2: m2.into(),
            cost_difference: m2.cost_per_1k_tokens - m1.cost_per_1k_tokens,
        })
    }

    fn entry_mut(&mut self, name: &str, version: &str) -> RegistryResult<&mut ModelMetadata> {
        self.models
            .iter_mut()
            .find(|m| m.name == name && m.version == version)
            .ok_or_else(|| not_found(name, version))
    }

    fn unique_version(&self, name: &str, candidate: String) -> String {
        let taken = |v: &str| self.models.iter().any(|m| m.name == name && m.version == v);
        if !taken(&candidate) {
            return candidate;
        }
        let mut n = 1;
        loop {
            let next = format!("{}_{}", candidate, n);
            if !taken(&next) {
                return next;
            }
            n += 1;
        }
    }
}

/// Report a registration; tracker failures only warn
pub async fn track_registration(tracker: &dyn ExperimentTracker, metadata: &ModelMetadata) {
    if let Err(e) = tracker.log_registration(metadata).await {
        warn!(
            model = %metadata.name,
            version = %metadata.version,
            tracker = tracker.tracker_name(),
            error = %e,
            "experiment tracking failed, model registered locally only"
        );
    }
}

fn not_found(name: &str, version: &str) -> RegistryError {
    RegistryError::NotFound {
        name: name.to_string(),
        version: version.to_string(),
    }
}

/// `<timestamp>_<first 8 hex chars of SHA-256 over the sorted-key JSON parameters>`
pub fn generate_version<Tz>(at: DateTime<Tz>, parameters: &Map<String, Value>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    format!(
        "{}_{}",
        at.format("%Y-%m-%dT%H:%M:%S%.6f"),
        parameter_hash(parameters)
    )
}

fn parameter_hash(parameters: &Map<String, Value>) -> String {
    // serde_json's default map is ordered by key
    let canonical = Value::Object(parameters.clone()).to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[derive(Default)]
    struct RecordingTracker {
        registrations: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ExperimentTracker for RecordingTracker {
        async fn log_registration(&self, model: &ModelMetadata) -> ModelResult<()> {
            if self.fail {
                return Err(crate::provider::ModelError::Tracking {
                    message: "down".to_string(),
                });
            }
            self.registrations.lock().unwrap().push(model.version.clone());
            Ok(())
        }

        async fn log_metrics(
            &self,
            _name: &str,
            _version: &str,
            _metrics: &HashMap<String, f64>,
        ) -> ModelResult<()> {
            Ok(())
        }

        fn tracker_name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_register_model() {
        let mut registry = ModelRegistry::new();
        let version = registry
            .register(
                "test-model",
                ProviderKind::OpenAi,
                params(json!({"temperature": 0.5})),
                Some("Test Model".to_string()),
            )
            .await
            .unwrap();

        assert!(!version.is_empty());
        let model = registry.get("test-model", Some(&version)).unwrap();
        assert_eq!(model.status, ModelStatus::Ready);
        assert_eq!(model.description.as_deref(), Some("Test Model"));
        // unknown names are priced like gpt-4
        assert_eq!(model.cost_per_1k_tokens, 0.03);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let mut registry = ModelRegistry::new();
        let result = registry
            .register(" ", ProviderKind::OpenAi, Map::new(), None)
            .await;
        assert!(matches!(result, Err(RegistryError::InvalidName { .. })));
    }

    #[test]
    fn test_version_format_and_key_order() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:30:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = generate_version(at, &params(json!({"a": 1, "b": 2})));
        let b = generate_version(at, &params(json!({"b": 2, "a": 1})));
        assert_eq!(a, b);
        assert!(a.starts_with("2024-05-01T12:30:00.123456_"));
        let hash = a.rsplit('_').next().unwrap();
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

        let c = generate_version(at, &params(json!({"a": 2})));
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_version_uses_local_wall_clock() {
        let before = Local::now().format("%Y-%m-%dT%H").to_string();
        let mut registry = ModelRegistry::new();
        let version = registry
            .register("clock", ProviderKind::OpenAi, Map::new(), None)
            .await
            .unwrap();
        let after = Local::now().format("%Y-%m-%dT%H").to_string();
        assert!(version.starts_with(&before) || version.starts_with(&after));
    }

    #[tokio::test]
    async fn test_insert_skips_tracker_until_reported() {
        let tracker = Arc::new(RecordingTracker::default());
        let mut registry = ModelRegistry::with_tracker(ModelCatalog::builtin(), tracker.clone());
        let metadata = registry
            .insert("gpt-4", ProviderKind::OpenAi, Map::new(), None)
            .unwrap();
        assert!(registry.get("gpt-4", Some(&metadata.version)).is_some());
        assert!(tracker.registrations.lock().unwrap().is_empty());

        track_registration(registry.tracker().as_ref(), &metadata).await;
        assert_eq!(
            *tracker.registrations.lock().unwrap(),
            vec![metadata.version.clone()]
        );
    }

    #[tokio::test]
    async fn test_versions_are_unique_per_model() {
        let mut registry = ModelRegistry::new();
        let mut versions = Vec::new();
        for _ in 0..5 {
            versions.push(
                registry
                    .register("dup", ProviderKind::OpenAi, Map::new(), None)
                    .await
                    .unwrap(),
            );
        }
        versions.sort();
        versions.dedup();
        assert_eq!(versions.len(), 5);
    }

    #[tokio::test]
    async fn test_deploy_model() {
        let mut registry = ModelRegistry::new();
        let version = registry
            .register(
                "deploy-test",
                ProviderKind::OpenAi,
                params(json!({"temperature": 0.7})),
                None,
            )
            .await
            .unwrap();

        registry.deploy("deploy-test", &version).unwrap();
        let model = registry.get("deploy-test", Some(&version)).unwrap();
        assert_eq!(model.status, ModelStatus::Deployed);
        assert!(model.updated_at >= model.created_at);

        let missing = registry.deploy("deploy-test", "nope");
        assert_eq!(
            missing,
            Err(RegistryError::NotFound {
                name: "deploy-test".to_string(),
                version: "nope".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_latest_resolves_to_most_recently_updated() {
        let mut registry = ModelRegistry::new();
        let first = registry
            .register("m", ProviderKind::OpenAi, params(json!({"v": 1})), None)
            .await
            .unwrap();
        let second = registry
            .register("m", ProviderKind::OpenAi, params(json!({"v": 2})), None)
            .await
            .unwrap();

        assert_eq!(registry.get("m", None).unwrap().version, second);
        assert_eq!(registry.get("m", Some(LATEST)).unwrap().version, second);

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        registry.deprecate("m", &first).unwrap();
        assert_eq!(registry.get("m", None).unwrap().version, first);
        assert_eq!(
            registry.get("m", Some(&first)).unwrap().status,
            ModelStatus::Deprecated
        );
        assert!(registry.get("other", None).is_none());
    }

    #[tokio::test]
    async fn test_update_metrics_and_cost() {
        let mut registry = ModelRegistry::new();
        let version = registry
            .register("gpt-3.5-turbo", ProviderKind::OpenAi, Map::new(), None)
            .await
            .unwrap();

        registry
            .update_metrics(
                "gpt-3.5-turbo",
                &version,
                HashMap::from([("accuracy".to_string(), 0.8)]),
            )
            .await
            .unwrap();
        registry
            .update_metrics(
                "gpt-3.5-turbo",
                &version,
                HashMap::from([("latency_ms".to_string(), 900.0)]),
            )
            .await
            .unwrap();

        let model = registry.get("gpt-3.5-turbo", Some(&version)).unwrap();
        assert_eq!(model.performance_metrics.len(), 2);
        assert_eq!(model.performance_metrics["accuracy"], 0.8);

        assert!((registry.cost("gpt-3.5-turbo", Some(&version), 1000) - 0.002).abs() < 1e-12);
        assert_eq!(registry.cost("unknown", None, 1000), 0.0);

        assert!(registry
            .update_metrics("gpt-3.5-turbo", "missing", HashMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_model_comparison() {
        let mut registry = ModelRegistry::new();
        let v1 = registry
            .register("gpt-4", ProviderKind::OpenAi, params(json!({"temperature": 0.5})), None)
            .await
            .unwrap();
        let v2 = registry
            .register(
                "claude-3-sonnet",
                ProviderKind::Anthropic,
                params(json!({"temperature": 0.7})),
                None,
            )
            .await
            .unwrap();

        let comparison = registry.compare("gpt-4", &v1, "claude-3-sonnet", &v2).unwrap();
        assert_eq!(comparison.model1.name, "gpt-4");
        assert_eq!(comparison.model2.provider, ProviderKind::Anthropic);
        assert!((comparison.cost_difference - (0.003 - 0.03)).abs() < 1e-12);

        assert!(registry.compare("gpt-4", &v1, "missing", "x").is_err());
    }

    #[tokio::test]
    async fn test_tracker_receives_registrations() {
        let tracker = Arc::new(RecordingTracker::default());
        let mut registry = ModelRegistry::with_tracker(ModelCatalog::builtin(), tracker.clone());
        let version = registry
            .register("gpt-4", ProviderKind::OpenAi, Map::new(), None)
            .await
            .unwrap();
        assert_eq!(*tracker.registrations.lock().unwrap(), vec![version]);
        assert_eq!(registry.tracker_name(), "recording");
    }

    #[tokio::test]
    async fn test_tracker_failure_does_not_block_registration() {
        let tracker = Arc::new(RecordingTracker {
            fail: true,
            ..Default::default()
        });
        let mut registry = ModelRegistry::with_tracker(ModelCatalog::builtin(), tracker);
        let version = registry
            .register("gpt-4", ProviderKind::OpenAi, Map::new(), None)
            .await
            .unwrap();
        assert!(registry.get("gpt-4", Some(&version)).is_some());
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let mut registry = ModelRegistry::new();
        let a = registry
            .register("a", ProviderKind::OpenAi, Map::new(), None)
            .await
            .unwrap();
        registry
            .register("b", ProviderKind::OpenAi, Map::new(), None)
            .await
            .unwrap();
        registry.deploy("a", &a).unwrap();

        let counts = registry.count_by_status();
        assert_eq!(counts[&ModelStatus::Deployed], 1);
        assert_eq!(counts[&ModelStatus::Ready], 1);
        assert_eq!(ModelStatus::Deployed.to_string(), "deployed");
    }
}
