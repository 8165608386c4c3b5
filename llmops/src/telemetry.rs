//! Logging setup and Prometheus-style metrics
//!
//! [`init_logging`] installs the global `tracing` subscriber. [`MetricsRegistry`]
//! holds labelled counters, gauges and histograms and renders them in the
//! Prometheus text exposition format.
//!
//! # Examples
//!
//! ```rust
//! use llmops::telemetry::MetricsRegistry;
//!
//! let metrics = MetricsRegistry::new();
//! metrics.counter_inc("llm_requests_total", "Total LLM requests", &[("model", "gpt-4")], 1.0);
//! metrics.histogram_observe("llm_request_duration_seconds", "Latency", &[("model", "gpt-4")], 0.42);
//!
//! let text = metrics.render();
//! assert!(text.contains("llm_requests_total{model=\"gpt-4\"} 1"));
//! assert!(text.contains("llm_request_duration_seconds_count{model=\"gpt-4\"} 1"));
//! ```

use crate::settings::{LogFormat, Settings};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Logging initialization failed: {reason}")]
    InitializationFailed { reason: String },
}

/// Default Prometheus histogram buckets, in seconds
pub const DEFAULT_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Map a configured level name onto a `tracing` directive
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_logging(settings: &Settings) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&settings.log_level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match settings.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    result.map_err(|e| TelemetryError::InitializationFailed {
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

type LabelSet = Vec<(String, String)>;

#[derive(Debug, Clone)]
struct HistogramData {
    /// Cumulative per bucket
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

#[derive(Debug, Clone)]
enum Series {
    Value(f64),
    Histogram(HistogramData),
}

#[derive(Debug, Clone)]
struct Family {
    help: String,
    kind: MetricKind,
    series: BTreeMap<LabelSet, Series>,
}

/// Thread-safe store of labelled metrics. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    families: Arc<Mutex<BTreeMap<String, Family>>>,
}

fn label_set(labels: &[(&str, &str)]) -> LabelSet {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_series<F>(&self, name: &str, help: &str, kind: MetricKind, labels: &[(&str, &str)], f: F)
    where
        F: FnOnce(&mut Series),
    {
        let mut families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        let family = families.entry(name.to_string()).or_insert_with(|| Family {
            help: help.to_string(),
            kind,
            series: BTreeMap::new(),
        });
        let series = family
            .series
            .entry(label_set(labels))
            .or_insert_with(|| match kind {
                MetricKind::Histogram => Series::Histogram(HistogramData {
                    counts: vec![0; DEFAULT_BUCKETS.len()],
                    sum: 0.0,
                    count: 0,
                }),
                _ => Series::Value(0.0),
            });
        f(series);
    }

    pub fn counter_inc(&self, name: &str, help: &str, labels: &[(&str, &str)], by: f64) {
        self.with_series(name, help, MetricKind::Counter, labels, |series| {
            if let Series::Value(v) = series {
                *v += by.max(0.0);
            }
        });
    }

    pub fn gauge_set(&self, name: &str, help: &str, labels: &[(&str, &str)], value: f64) {
        self.with_series(name, help, MetricKind::Gauge, labels, |series| {
            if let Series::Value(v) = series {
                *v = value;
            }
        });
    }

    pub fn gauge_add(&self, name: &str, help: &str, labels: &[(&str, &str)], by: f64) {
        self.with_series(name, help, MetricKind::Gauge, labels, |series| {
            if let Series::Value(v) = series {
                *v += by;
            }
        });
    }

    pub fn histogram_observe(&self, name: &str, help: &str, labels: &[(&str, &str)], value: f64) {
        self.with_series(name, help, MetricKind::Histogram, labels, |series| {
            if let Series::Histogram(h) = series {
                for (bucket, count) in DEFAULT_BUCKETS.iter().zip(h.counts.iter_mut()) {
                    if value <= *bucket {
                        *count += 1;
                    }
                }
                h.sum += value;
                h.count += 1;
            }
        });
    }

    /// Current value of a counter or gauge series
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        match families.get(name)?.series.get(&label_set(labels))? {
            Series::Value(v) => Some(*v),
            Series::Histogram(_) => None,
        }
    }

    /// Observation count of a histogram series
    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        let families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        match families.get(name)?.series.get(&label_set(labels))? {
            Series::Histogram(h) => Some(h.count),
            Series::Value(_) => None,
        }
    }

    /// Sum over all series of a counter or gauge
    pub fn total(&self, name: &str) -> f64 {
        let families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        families
            .get(name)
            .map(|family| {
                family
                    .series
                    .values()
                    .map(|s| match s {
                        Series::Value(v) => *v,
                        Series::Histogram(h) => h.count as f64,
                    })
                    .sum()
            })
            .unwrap_or(0.0)
    }

    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        let families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        families.get(name).map(|f| f.kind)
    }

    /// Prometheus text exposition format
    pub fn render(&self) -> String {
        let families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();

        for (name, family) in families.iter() {
            let _ = writeln!(out, "# HELP {} {}", name, family.help);
            let _ = writeln!(out, "# TYPE {} {}", name, family.kind.as_str());

            for (labels, series) in &family.series {
                match series {
                    Series::Value(v) => {
                        let _ = writeln!(out, "{}{} {}", name, format_labels(labels, None), v);
                    }
                    Series::Histogram(h) => {
                        for (bucket, count) in DEFAULT_BUCKETS.iter().zip(&h.counts) {
                            let le = bucket.to_string();
                            let _ = writeln!(
                                out,
                                "{}_bucket{} {}",
                                name,
                                format_labels(labels, Some(&le)),
                                count
                            );
                        }
                        let _ = writeln!(
                            out,
                            "{}_bucket{} {}",
                            name,
                            format_labels(labels, Some("+Inf")),
                            h.count
                        );
                        let _ = writeln!(out, "{}_sum{} {}", name, format_labels(labels, None), h.sum);
                        let _ = writeln!(out, "{}_count{} {}", name, format_labels(labels, None), h.count);
                    }
                }
            }
        }

        out
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_labels(labels: &LabelSet, le: Option<&str>) -> String {
    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    if let Some(le) = le {
        pairs.push(format!("le=\"{}\"", le));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("INFO"), "info");
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("critical"), "error");
        assert_eq!(level_directive("nonsense"), "info");
    }

    #[test]
    fn test_counters_accumulate_per_label_set() {
        let metrics = MetricsRegistry::new();
        let ok = [("model", "gpt-4"), ("status", "success")];
        let err = [("model", "gpt-4"), ("status", "error")];

        metrics.counter_inc("requests", "Requests", &ok, 1.0);
        metrics.counter_inc("requests", "Requests", &ok, 1.0);
        metrics.counter_inc("requests", "Requests", &err, 1.0);
        metrics.counter_inc("requests", "Requests", &err, -5.0);

        assert_eq!(metrics.value("requests", &ok), Some(2.0));
        assert_eq!(metrics.value("requests", &err), Some(1.0));
        assert_eq!(metrics.total("requests"), 3.0);
        assert_eq!(metrics.kind("requests"), Some(MetricKind::Counter));
    }

    #[test]
    fn test_gauges() {
        let metrics = MetricsRegistry::new();
        metrics.gauge_set("active_models", "Models", &[], 3.0);
        metrics.gauge_set("active_models", "Models", &[], 2.0);
        metrics.gauge_add("cost", "Cost", &[("period", "daily")], 0.25);
        metrics.gauge_add("cost", "Cost", &[("period", "daily")], 0.5);

        assert_eq!(metrics.value("active_models", &[]), Some(2.0));
        assert_eq!(metrics.value("cost", &[("period", "daily")]), Some(0.75));
        assert_eq!(metrics.value("missing", &[]), None);
    }

    #[test]
    fn test_histogram_rendering() {
        let metrics = MetricsRegistry::new();
        let labels = [("endpoint", "/health")];
        metrics.histogram_observe("duration", "Duration", &labels, 0.003);
        metrics.histogram_observe("duration", "Duration", &labels, 0.2);
        metrics.histogram_observe("duration", "Duration", &labels, 20.0);

        assert_eq!(metrics.histogram_count("duration", &labels), Some(3));

        let text = metrics.render();
        assert!(text.contains("# HELP duration Duration\n"));
        assert!(text.contains("# TYPE duration histogram\n"));
        assert!(text.contains("duration_bucket{endpoint=\"/health\",le=\"0.005\"} 1\n"));
        assert!(text.contains("duration_bucket{endpoint=\"/health\",le=\"0.25\"} 2\n"));
        assert!(text.contains("duration_bucket{endpoint=\"/health\",le=\"10\"} 2\n"));
        assert!(text.contains("duration_bucket{endpoint=\"/health\",le=\"+Inf\"} 3\n"));
        assert!(text.contains("duration_count{endpoint=\"/health\"} 3\n"));
    }

    #[test]
    fn test_label_values_are_escaped() {
        let metrics = MetricsRegistry::new();
        metrics.counter_inc("errors", "Errors", &[("message", "bad \"input\"\n")], 1.0);
        assert!(metrics
            .render()
            .contains("errors{message=\"bad \\\"input\\\"\\n\"} 1\n"));
    }

    #[test]
    fn test_clones_share_state() {
        let metrics = MetricsRegistry::new();
        let clone = metrics.clone();
        clone.counter_inc("shared", "Shared", &[], 4.0);
        assert_eq!(metrics.value("shared", &[]), Some(4.0));
        assert!(metrics.render().contains("# TYPE shared counter\nshared 4\n"));
    }
}
