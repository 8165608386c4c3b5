//! Request monitoring, cost tracking and alerting
//!
//! Every LLM call is logged through [`LlmMonitor::log_request`], which counts
//! tokens, prices the call, keeps the record for 24 hours and updates the
//! Prometheus metrics. Aggregations (cost, latency, errors) are computed over
//! the retained records.
//!
//! # Examples
//!
//! ```rust
//! use llmops::monitoring::{LlmMonitor, RequestLog};
//!
//! let monitor = LlmMonitor::new();
//! let record = monitor.log_request(
//!     RequestLog::new("req_1", "gpt-4", "latest", "Was ist Python?", "Eine Sprache.", 420.0)
//!         .with_user_id("demo_user"),
//! );
//! assert!(record.cost_usd > 0.0);
//!
//! let performance = monitor.performance_metrics(None, 1).unwrap();
//! assert_eq!(performance.total_requests, 1);
//! ```

use crate::settings::Settings;
use crate::telemetry::MetricsRegistry;
use chrono::{DateTime, Duration, Utc};
use model::{ApproxTokenizer, ModelCatalog, TokenCounter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

/// How long request records are kept
pub const RETENTION_HOURS: i64 = 24;

pub const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Error, Debug, PartialEq)]
pub enum MonitoringError {
    #[error("Alert {id} not found")]
    AlertNotFound { id: String },

    #[error("Invalid time window: {reason}")]
    InvalidWindow { reason: String },
}

pub type MonitoringResult<T> = Result<T, MonitoringError>;

/// The `[now - hours, now]` window; zero hours is widened to one
pub fn window(hours: u32) -> MonitoringResult<(DateTime<Utc>, DateTime<Utc>)> {
    let hours = hours.max(1);
    let end = Utc::now();
    let start = Duration::try_hours(i64::from(hours))
        .and_then(|span| end.checked_sub_signed(span))
        .ok_or_else(|| MonitoringError::InvalidWindow {
            reason: format!("{} hours reaches past the earliest representable time", hours),
        })?;
    Ok((start, end))
}

/// A request as reported by the caller, before tokens and cost are known
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub request_id: String,
    pub model_name: String,
    pub model_version: String,
    pub prompt: String,
    pub response: String,
    pub latency_ms: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub prompt_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: Map<String, Value>,
}

impl RequestLog {
    /// A successful request
    pub fn new(
        request_id: impl Into<String>,
        model_name: impl Into<String>,
        model_version: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
        latency_ms: f64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            model_name: model_name.into(),
            model_version: model_version.into(),
            prompt: prompt.into(),
            response: response.into(),
            latency_ms,
            success: true,
            error_message: None,
            prompt_id: None,
            user_id: None,
            metadata: Map::new(),
        }
    }

    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }

    pub fn with_prompt_id(mut self, prompt_id: Option<String>) -> Self {
        self.prompt_id = prompt_id;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequestRecord {
    pub request_id: String,
    pub model_name: String,
    pub model_version: String,
    pub prompt_id: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: f64,
    pub cost_usd: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: Map<String, Value>,
}

impl LlmRequestRecord {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMetrics {
    pub total_cost_usd: f64,
    pub cost_per_request: f64,
    pub cost_per_token: f64,
    pub requests_count: usize,
    pub tokens_count: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub success_rate: f64,
    pub requests_per_hour: f64,
    pub total_requests: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub error_types: BTreeMap<String, usize>,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Default)]
struct AlertLog {
    alerts: Vec<Alert>,
    counter: u64,
}

/// p95 as `sorted[floor(n * 0.95)]`, clamped to the last element
pub fn p95(latencies: &[f64]) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let index = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
    sorted[index]
}

pub struct LlmMonitor {
    records: Mutex<Vec<LlmRequestRecord>>,
    alerts: Mutex<AlertLog>,
    metrics: MetricsRegistry,
    tokenizer: Box<dyn TokenCounter>,
    catalog: ModelCatalog,
    cost_alert_threshold: f64,
    token_cost_tracking: bool,
}

impl Default for LlmMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmMonitor {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            alerts: Mutex::new(AlertLog::default()),
            metrics: MetricsRegistry::new(),
            tokenizer: Box::new(ApproxTokenizer::new()),
            catalog: ModelCatalog::builtin(),
            cost_alert_threshold: 100.0,
            token_cost_tracking: true,
        }
    }

    pub fn from_settings(settings: &Settings, catalog: ModelCatalog) -> Self {
        Self::new()
            .with_catalog(catalog)
            .with_cost_alert_threshold(settings.cost_alert_threshold)
            .with_token_cost_tracking(settings.token_cost_tracking)
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn TokenCounter>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_cost_alert_threshold(mut self, threshold: f64) -> Self {
        self.cost_alert_threshold = threshold;
        self
    }

    pub fn with_token_cost_tracking(mut self, enabled: bool) -> Self {
        self.token_cost_tracking = enabled;
        self
    }

    pub fn count_tokens(&self, text: &str) -> u64 {
        self.tokenizer.count(text) as u64
    }

    /// Price in USD; zero when cost tracking is off
    pub fn calculate_cost(&self, model_name: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        if !self.token_cost_tracking {
            return 0.0;
        }
        self.catalog
            .cost_for_tokens(model_name, input_tokens, output_tokens)
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn log_request(&self, log: RequestLog) -> LlmRequestRecord {
        let input_tokens = self.count_tokens(&log.prompt);
        let output_tokens = if log.response.is_empty() {
            0
        } else {
            self.count_tokens(&log.response)
        };
        let cost_usd = self.calculate_cost(&log.model_name, input_tokens, output_tokens);

        let record = LlmRequestRecord {
            request_id: log.request_id,
            model_name: log.model_name,
            model_version: log.model_version,
            prompt_id: log.prompt_id,
            user_id: log.user_id,
            timestamp: Utc::now(),
            input_tokens,
            output_tokens,
            latency_ms: log.latency_ms,
            cost_usd,
            success: log.success,
            error_message: log.error_message,
            metadata: log.metadata,
        };

        self.update_metrics(&record);
        info!(
            request_id = %record.request_id,
            model = %record.model_name,
            version = %record.model_version,
            input_tokens,
            output_tokens,
            latency_ms = record.latency_ms,
            cost_usd,
            success = record.success,
            "LLM request processed"
        );

        self.store(record.clone());
        record
    }

    /// Keep a finished record, dropping anything past retention
    pub fn store(&self, record: LlmRequestRecord) {
        let cutoff = Utc::now() - Duration::hours(RETENTION_HOURS);
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.retain(|r| r.timestamp >= cutoff);
        if record.timestamp >= cutoff {
            records.push(record);
        }
    }

    pub fn record_count(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn update_metrics(&self, record: &LlmRequestRecord) {
        let status = if record.success { "success" } else { "error" };
        let prompt_id = record.prompt_id.as_deref().unwrap_or("unknown");
        let model = record.model_name.as_str();

        self.metrics.counter_inc(
            "llm_requests_total",
            "Total number of LLM requests",
            &[("model", model), ("status", status), ("prompt_id", prompt_id)],
            1.0,
        );
        self.metrics.histogram_observe(
            "llm_request_duration_seconds",
            "LLM request latency in seconds",
            &[("model", model), ("prompt_id", prompt_id)],
            record.latency_ms / 1000.0,
        );
        self.metrics.counter_inc(
            "llm_tokens_total",
            "Total number of tokens processed",
            &[("model", model), ("token_type", "input")],
            record.input_tokens as f64,
        );
        self.metrics.counter_inc(
            "llm_tokens_total",
            "Total number of tokens processed",
            &[("model", model), ("token_type", "output")],
            record.output_tokens as f64,
        );
        self.metrics.gauge_add(
            "llm_cost_usd",
            "Total cost in USD",
            &[("model", model), ("period", "daily")],
            record.cost_usd,
        );
    }

    fn records_between(
        &self,
        model_name: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<LlmRequestRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .filter(|r| model_name.map_or(true, |m| r.model_name == m))
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Cost over a window, by default the last 24 hours
    pub fn cost_metrics(
        &self,
        model_name: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> MonitoringResult<CostMetrics> {
        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or_else(|| end - Duration::days(1));
        if start > end {
            return Err(MonitoringError::InvalidWindow {
                reason: format!("start {} is after end {}", start, end),
            });
        }

        let records = self.records_between(model_name, start, end);
        let total_cost_usd: f64 = records.iter().map(|r| r.cost_usd).sum();
        let tokens_count: u64 = records.iter().map(LlmRequestRecord::total_tokens).sum();
        let requests_count = records.len();

        Ok(CostMetrics {
            total_cost_usd,
            cost_per_request: if requests_count > 0 {
                total_cost_usd / requests_count as f64
            } else {
                0.0
            },
            cost_per_token: if tokens_count > 0 {
                total_cost_usd / tokens_count as f64
            } else {
                0.0
            },
            requests_count,
            tokens_count,
            period_start: start,
            period_end: end,
        })
    }

    /// Latency and success statistics over the last `hours`
    pub fn performance_metrics(
        &self,
        model_name: Option<&str>,
        hours: u32,
    ) -> MonitoringResult<PerformanceMetrics> {
        let (start, end) = window(hours)?;
        let records = self.records_between(model_name, start, end);
        if records.is_empty() {
            return Ok(PerformanceMetrics::default());
        }

        let latencies: Vec<f64> = records.iter().map(|r| r.latency_ms).collect();
        let n = latencies.len() as f64;
        let successes = records.iter().filter(|r| r.success).count() as f64;

        Ok(PerformanceMetrics {
            avg_latency_ms: latencies.iter().sum::<f64>() / n,
            min_latency_ms: latencies.iter().copied().fold(f64::INFINITY, f64::min),
            max_latency_ms: latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            p95_latency_ms: p95(&latencies),
            success_rate: successes / n,
            requests_per_hour: n / f64::from(hours.max(1)),
            total_requests: records.len(),
        })
    }

    /// Failed requests over the last `hours`, grouped by message
    pub fn error_summary(&self, hours: u32) -> MonitoringResult<ErrorSummary> {
        let (start, end) = window(hours)?;
        let records = self.records_between(None, start, end);

        let mut error_types = BTreeMap::new();
        for record in records.iter().filter(|r| !r.success) {
            let message = record
                .error_message
                .clone()
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
            *error_types.entry(message).or_insert(0) += 1;
        }

        let total_errors: usize = error_types.values().sum();
        Ok(ErrorSummary {
            total_errors,
            error_types,
            error_rate: if records.is_empty() {
                0.0
            } else {
                total_errors as f64 / records.len() as f64
            },
        })
    }

    /// Raise a cost alert when the last 24h exceed the threshold.
    ///
    /// An unacknowledged cost alert is reused instead of raising a duplicate.
    pub fn check_cost_alerts(&self) -> MonitoringResult<Vec<Alert>> {
        let daily = self.cost_metrics(None, None, None)?;
        if daily.total_cost_usd <= self.cost_alert_threshold {
            return Ok(Vec::new());
        }

        let message = format!(
            "Daily cost ({:.2} USD) above threshold ({} USD)",
            daily.total_cost_usd, self.cost_alert_threshold
        );

        let mut log = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = log
            .alerts
            .iter_mut()
            .find(|a| a.alert_type == "cost_alert" && !a.acknowledged)
        {
            existing.message = message;
            existing.timestamp = Utc::now();
            return Ok(vec![existing.clone()]);
        }

        log.counter += 1;
        let alert = Alert {
            id: format!("alert_{}", log.counter),
            alert_type: "cost_alert".to_string(),
            message,
            severity: AlertSeverity::High,
            timestamp: Utc::now(),
            acknowledged: false,
        };
        warn!(alert_id = %alert.id, severity = %alert.severity, "{}", alert.message);
        log.alerts.push(alert.clone());
        Ok(vec![alert])
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> MonitoringResult<()> {
        let mut log = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        let alert = log
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| MonitoringError::AlertNotFound {
                id: alert_id.to_string(),
            })?;
        alert.acknowledged = true;
        info!(alert_id, "alert acknowledged");
        Ok(())
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        let log = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        log.alerts.iter().filter(|a| !a.acknowledged).cloned().collect()
    }

    /// Newest first
    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        let log = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        log.alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn render_prometheus(&self) -> String {
        self.metrics.render()
    }
}
