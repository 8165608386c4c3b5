//! Experiment tracking for registered models
//!
//! Registrations and metric updates are mirrored to an experiment tracker.
//! [`NoopTracker`] keeps everything local; [`MlflowTracker`] talks to an
//! MLflow tracking server over its REST API.

use crate::provider::{ModelError, ModelResult};
use crate::registry::ModelMetadata;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Record a newly registered model version
    async fn log_registration(&self, model: &ModelMetadata) -> ModelResult<()>;

    /// Record updated performance metrics for a model version
    async fn log_metrics(
        &self,
        name: &str,
        version: &str,
        metrics: &HashMap<String, f64>,
    ) -> ModelResult<()>;

    fn tracker_name(&self) -> &'static str;
}

/// Tracker for demo mode; nothing leaves the process
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

#[async_trait]
impl ExperimentTracker for NoopTracker {
    async fn log_registration(&self, model: &ModelMetadata) -> ModelResult<()> {
        debug!(
            model = %model.name,
            version = %model.version,
            "demo mode: skipping experiment tracking"
        );
        Ok(())
    }

    async fn log_metrics(
        &self,
        name: &str,
        version: &str,
        metrics: &HashMap<String, f64>,
    ) -> ModelResult<()> {
        debug!(model = name, version, count = metrics.len(), "demo mode: skipping metric logging");
        Ok(())
    }

    fn tracker_name(&self) -> &'static str {
        "noop"
    }
}

/// MLflow REST client
#[derive(Debug, Clone)]
pub struct MlflowTracker {
    client: reqwest::Client,
    base_url: String,
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunPayload,
}

#[derive(Deserialize)]
struct RunPayload {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
}

impl MlflowTracker {
    pub fn new(base_url: impl Into<String>) -> ModelResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ModelError::InvalidConfig {
                message: format!("MLflow URL must start with http:// or https://: {}", base_url),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            experiment_id: "0".to_string(),
        })
    }

    pub fn with_experiment_id(mut self, experiment_id: impl Into<String>) -> Self {
        self.experiment_id = experiment_id.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> ModelResult<reqwest::Response> {
        let response = self.client.post(self.endpoint(path)).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Tracking {
                message: format!("{} returned {}: {}", path, status, text),
            });
        }
        Ok(response)
    }

    async fn start_run(&self, name: &str, version: &str) -> ModelResult<String> {
        let body = json!({
            "experiment_id": self.experiment_id,
            "start_time": now_millis(),
            "tags": [
                {"key": "model_name", "value": name},
                {"key": "model_version", "value": version},
            ],
        });
        let created: CreateRunResponse = self.post("runs/create", body).await?.json().await?;
        Ok(created.run.info.run_id)
    }

    async fn finish_run(&self, run_id: &str) -> ModelResult<()> {
        let body = json!({
            "run_id": run_id,
            "status": "FINISHED",
            "end_time": now_millis(),
        });
        self.post("runs/update", body).await?;
        Ok(())
    }

    async fn log_batch(&self, run_id: &str, params: Vec<Value>, metrics: Vec<Value>) -> ModelResult<()> {
        let body = json!({
            "run_id": run_id,
            "params": params,
            "metrics": metrics,
        });
        self.post("runs/log-batch", body).await?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn metric_entry(key: &str, value: f64) -> Value {
    json!({"key": key, "value": value, "timestamp": now_millis(), "step": 0})
}

/// MLflow params are strings; JSON strings are passed through unquoted
fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ExperimentTracker for MlflowTracker {
    async fn log_registration(&self, model: &ModelMetadata) -> ModelResult<()> {
        let run_id = self.start_run(&model.name, &model.version).await?;

        let mut params: Vec<Value> = model
            .parameters
            .iter()
            .map(|(key, value)| json!({"key": key, "value": param_value(value)}))
            .collect();
        params.push(json!({"key": "provider", "value": model.provider.as_str()}));

        let metrics = vec![metric_entry("cost_per_1k_tokens", model.cost_per_1k_tokens)];
        self.log_batch(&run_id, params, metrics).await?;
        self.finish_run(&run_id).await?;

        info!(model = %model.name, version = %model.version, run_id = %run_id, "MLflow run created");
        Ok(())
    }

    async fn log_metrics(
        &self,
        name: &str,
        version: &str,
        metrics: &HashMap<String, f64>,
    ) -> ModelResult<()> {
        let run_id = self.start_run(name, version).await?;
        let entries = metrics
            .iter()
            .map(|(key, value)| metric_entry(key, *value))
            .collect();
        self.log_batch(&run_id, Vec::new(), entries).await?;
        self.finish_run(&run_id).await
    }

    fn tracker_name(&self) -> &'static str {
        "mlflow"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mlflow_url_validation() {
        assert!(MlflowTracker::new("localhost:5000").is_err());

        let tracker = MlflowTracker::new("http://localhost:5000/").unwrap();
        assert_eq!(tracker.base_url(), "http://localhost:5000");
        assert_eq!(
            tracker.endpoint("runs/create"),
            "http://localhost:5000/api/2.0/mlflow/runs/create"
        );
        assert_eq!(tracker.tracker_name(), "mlflow");
    }

    #[test]
    fn test_param_values_are_unquoted_strings() {
        assert_eq!(param_value(&json!("gpt-4")), "gpt-4");
        assert_eq!(param_value(&json!(0.7)), "0.7");
        assert_eq!(param_value(&json!(4096)), "4096");
    }

    #[tokio::test]
    async fn test_noop_tracker_accepts_everything() {
        let tracker = NoopTracker;
        let metrics = HashMap::from([("accuracy".to_string(), 0.9)]);
        tracker.log_metrics("gpt-4", "v", &metrics).await.unwrap();
        assert_eq!(tracker.tracker_name(), "noop");
    }

    #[tokio::test]
    async fn test_unreachable_mlflow_reports_error() {
        // port 9 (discard) is closed on test machines
        let tracker = MlflowTracker::new("http://127.0.0.1:9").unwrap();
        let metrics = HashMap::from([("accuracy".to_string(), 0.9)]);
        let result = tracker.log_metrics("gpt-4", "v", &metrics).await;
        assert!(result.is_err());
    }
}
