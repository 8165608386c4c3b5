pub mod api;
pub mod demo;
pub mod evaluation;
pub mod monitoring;
pub mod prompts;
pub mod settings;
pub mod telemetry;

pub use api::{router, serve, ApiError, ApiResult, AppState, RateLimiter};
pub use demo::{DemoError, DemoResult};
pub use evaluation::{
    builtin_test_cases, EvalComparison, EvalDifferences, EvalResult, EvaluationError,
    EvaluationResult, EvaluationSummary, ExportFormat, ModelEvalStats, ModelEvaluator, TestCase,
};
pub use monitoring::{
    Alert, AlertSeverity, CostMetrics, ErrorSummary, LlmMonitor, LlmRequestRecord,
    MonitoringError, MonitoringResult, PerformanceMetrics, RequestLog,
};
pub use prompts::{
    AbTestConfig, PromptError, PromptManager, PromptResult, PromptStatus, PromptVersion, Variant,
};
pub use settings::{Environment, LogFormat, Settings, SettingsError, SettingsResult};
pub use telemetry::{init_logging, MetricsRegistry, TelemetryError};
