//! HTTP API
//!
//! An axum router over the shared service state: model registry, prompt
//! manager, request monitor and evaluator. Every request is counted and timed
//! for `/metrics`; errors are returned as `{"detail": "..."}`.

use crate::evaluation::{ExportFormat, ModelEvaluator};
use crate::monitoring::{self, LlmMonitor, RequestLog};
use crate::prompts::{PromptManager, PromptStatus};
use crate::settings::Settings;
use crate::telemetry::MetricsRegistry;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use model::{
    track_registration, ChatMessage, ChatRequest, ExperimentTracker, MlflowTracker, ModelError,
    ModelProvider, ModelRegistry, ModelResult, NoopTracker, ProviderKind, RegistryError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            RegistryError::InvalidName { .. } => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<crate::prompts::PromptError> for ApiError {
    fn from(e: crate::prompts::PromptError) -> Self {
        use crate::prompts::PromptError;
        match e {
            PromptError::NotFound { .. } | PromptError::TemplateNotFound { .. } => {
                ApiError::NotFound(e.to_string())
            }
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<crate::evaluation::EvaluationError> for ApiError {
    fn from(e: crate::evaluation::EvaluationError) -> Self {
        use crate::evaluation::EvaluationError;
        match e {
            EvaluationError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            EvaluationError::NoTestCases | EvaluationError::UnsupportedFormat { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            EvaluationError::Serialization(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<crate::monitoring::MonitoringError> for ApiError {
    fn from(e: crate::monitoring::MonitoringError) -> Self {
        use crate::monitoring::MonitoringError;
        match e {
            MonitoringError::AlertNotFound { .. } => ApiError::NotFound(e.to_string()),
            MonitoringError::InvalidWindow { .. } => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::ModelNotFound { .. } => ApiError::NotFound(e.to_string()),
            ModelError::InvalidConfig { .. } => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

/// Sliding one-minute window per caller
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit: limit as usize,
            window: Duration::from_secs(60),
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Record a hit for `key`; false when the caller is over the limit
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        // Callers that went quiet would otherwise keep their entry forever
        hits.retain(|_, window| {
            while window
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.window)
            {
                window.pop_front();
            }
            !window.is_empty()
        });

        let window = hits.entry(key.to_string()).or_default();
        if window.len() >= self.limit {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Number of callers with hits inside the current window
    pub fn tracked_keys(&self) -> usize {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Shared service state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<RwLock<ModelRegistry>>,
    pub prompts: Arc<RwLock<PromptManager>>,
    pub monitor: Arc<LlmMonitor>,
    pub evaluator: Arc<tokio::sync::Mutex<ModelEvaluator>>,
    pub provider: Arc<dyn ModelProvider>,
    pub metrics: MetricsRegistry,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Build every component from settings. Outside demo mode registrations are tracked in MLflow.
    pub fn new(settings: Settings, provider: Arc<dyn ModelProvider>) -> ModelResult<Self> {
        let tracker: Arc<dyn ExperimentTracker> = if settings.demo_mode {
            Arc::new(NoopTracker)
        } else {
            Arc::new(MlflowTracker::new(settings.mlflow_tracking_uri.clone())?)
        };

        let registry = ModelRegistry::with_tracker(model::ModelCatalog::builtin(), tracker);
        let monitor = Arc::new(LlmMonitor::from_settings(
            &settings,
            registry.catalog().clone(),
        ));
        let evaluator = ModelEvaluator::new(Arc::clone(&provider), Arc::clone(&monitor));

        Ok(Self {
            registry: Arc::new(RwLock::new(registry)),
            prompts: Arc::new(RwLock::new(PromptManager::from_settings(&settings))),
            monitor,
            evaluator: Arc::new(tokio::sync::Mutex::new(evaluator)),
            provider,
            metrics: MetricsRegistry::new(),
            rate_limiter: Arc::new(RateLimiter::per_minute(settings.max_requests_per_minute)),
            settings: Arc::new(settings),
        })
    }

    pub fn with_evaluator(mut self, evaluator: ModelEvaluator) -> Self {
        self.evaluator = Arc::new(tokio::sync::Mutex::new(evaluator));
        self
    }

    async fn refresh_gauges(&self) {
        let models = self.registry.read().await.len();
        let prompts = self.prompts.read().await.len();
        self.metrics.gauge_set(
            "llm_ops_active_models",
            "Number of active models in registry",
            &[],
            models as f64,
        );
        self.metrics.gauge_set(
            "llm_ops_active_prompts",
            "Number of active prompts",
            &[],
            prompts as f64,
        );
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/llm/request", post(llm_request))
        .route("/models/register", post(register_model))
        .route("/models", get(list_models))
        .route("/models/:name/:version/deploy", post(deploy_model))
        .route("/prompts/create", post(create_prompt))
        .route("/prompts", get(list_prompts))
        .route("/prompts/:id/activate", post(activate_prompt))
        .route("/prompts/render", post(render_prompt))
        .route("/ab-tests", post(start_ab_test))
        .route("/ab-tests/:template/assignment", get(ab_test_assignment))
        .route("/monitoring/metrics", get(monitoring_metrics))
        .route("/monitoring/alerts", get(monitoring_alerts))
        .route("/evaluations", post(run_evaluation))
        .route("/evaluations/:id/export", get(export_evaluation))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(address = %listener.local_addr()?, "LLM-Ops API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not install Ctrl-C handler");
            }
        })
        .await
}

async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    state.metrics.histogram_observe(
        "llm_ops_request_duration_seconds",
        "LLM-Ops API request duration in seconds",
        &[("endpoint", &endpoint), ("method", &method)],
        started.elapsed().as_secs_f64(),
    );
    state.metrics.counter_inc(
        "llm_ops_requests_total",
        "Total number of LLM-Ops API requests",
        &[("endpoint", &endpoint), ("method", &method), ("status", &status)],
        1.0,
    );
    response
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let tracker = state.registry.read().await.tracker_name();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
        "services": {
            "model_manager": "active",
            "prompt_manager": "active",
            "monitor": "active",
            "experiment_tracker": tracker,
        }
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    state.refresh_gauges().await;
    let mut body = state.metrics.render();
    body.push_str(&state.monitor.render_prometheus());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct LlmRequestBody {
    pub model_name: String,
    pub model_version: Option<String>,
    pub prompt: String,
    pub user_id: Option<String>,
    pub prompt_id: Option<String>,
    /// Rendered into the stored prompt when `prompt_id` is set
    pub variables: Option<HashMap<String, String>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmResponseBody {
    pub request_id: String,
    pub response: String,
    pub model_name: String,
    pub model_version: String,
    pub latency_ms: f64,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

async fn llm_request(
    State(state): State<AppState>,
    Json(body): Json<LlmRequestBody>,
) -> ApiResult<Json<LlmResponseBody>> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();

    match process_llm_request(&state, &body, &request_id, started).await {
        Ok(response) => {
            state.refresh_gauges().await;
            Ok(Json(response))
        }
        Err(e) => {
            let mut log = RequestLog::new(
                request_id,
                body.model_name.as_str(),
                body.model_version.as_deref().unwrap_or("unknown"),
                body.prompt.as_str(),
                "",
                started.elapsed().as_secs_f64() * 1000.0,
            )
            .failed(e.to_string())
            .with_prompt_id(body.prompt_id.clone());
            if let Some(user) = &body.user_id {
                log = log.with_user_id(user.as_str());
            }
            state.monitor.log_request(log);
            Err(e)
        }
    }
}

async fn process_llm_request(
    state: &AppState,
    body: &LlmRequestBody,
    request_id: &str,
    started: Instant,
) -> ApiResult<LlmResponseBody> {
    let caller = body.user_id.as_deref().unwrap_or("anonymous");
    if !state.rate_limiter.check(caller) {
        return Err(ApiError::RateLimited(format!(
            "Rate limit of {} requests per minute exceeded",
            state.settings.max_requests_per_minute
        )));
    }

    let model_version = state
        .registry
        .read()
        .await
        .get(&body.model_name, body.model_version.as_deref())
        .map(|m| m.version.clone())
        .ok_or_else(|| ApiError::NotFound("Model not found".to_string()))?;

    let prompt_text = match (&body.prompt_id, &body.variables) {
        (Some(id), Some(variables)) => {
            let prompts = state.prompts.read().await;
            let prompt = prompts
                .get(id)
                .ok_or_else(|| ApiError::NotFound(format!("Prompt not found: {}", id)))?;
            prompts.render(&prompt.template_name, variables, Some(id.as_str()))?
        }
        _ => body.prompt.clone(),
    };

    let input_tokens = state.monitor.count_tokens(&prompt_text);
    let max_tokens = state.settings.max_tokens_per_request;
    if input_tokens > max_tokens as u64 {
        return Err(ApiError::BadRequest(format!(
            "Prompt has {} tokens, limit is {}",
            input_tokens, max_tokens
        )));
    }

    let request = ChatRequest::new(&body.model_name, vec![ChatMessage::user(prompt_text.as_str())])
        .with_max_tokens(max_tokens);
    let response = state.provider.chat(request).await?;
    let response_text = response.text().to_string();
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let mut log = RequestLog::new(
        request_id,
        body.model_name.as_str(),
        model_version.as_str(),
        prompt_text.as_str(),
        response_text.as_str(),
        latency_ms,
    )
    .with_prompt_id(body.prompt_id.clone())
    .with_metadata(body.metadata.clone());
    if let Some(user) = &body.user_id {
        log = log.with_user_id(user.as_str());
    }
    let record = state.monitor.log_request(log);

    Ok(LlmResponseBody {
        request_id: request_id.to_string(),
        response: response_text,
        model_name: body.model_name.clone(),
        model_version,
        latency_ms,
        cost_usd: record.cost_usd,
        input_tokens: record.input_tokens,
        output_tokens: record.output_tokens,
    })
}

#[derive(Debug, Deserialize)]
pub struct ModelRegistration {
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub description: Option<String>,
}

async fn register_model(
    State(state): State<AppState>,
    Json(body): Json<ModelRegistration>,
) -> ApiResult<Json<Value>> {
    let provider: ProviderKind = body.provider.parse()?;
    let (metadata, tracker) = {
        let mut registry = state.registry.write().await;
        let metadata =
            registry.insert(&body.name, provider, body.parameters, body.description)?;
        (metadata, registry.tracker())
    };
    state.refresh_gauges().await;
    // The tracker talks to MLflow over the network; keep the registry unlocked meanwhile
    track_registration(tracker.as_ref(), &metadata).await;
    let version = metadata.version;

    Ok(Json(json!({
        "message": "Model registered successfully",
        "model_name": body.name,
        "version": version,
    })))
}

async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let registry = state.registry.read().await;
    let models: Vec<Value> = registry
        .list()
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "version": m.version,
                "provider": m.provider,
                "status": m.status,
                "created_at": m.created_at.to_rfc3339(),
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

async fn deploy_model(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state.registry.write().await.deploy(&name, &version)?;
    Ok(Json(json!({
        "message": "Model deployed successfully",
        "model_name": name,
        "version": version,
        "status": "deployed",
    })))
}

#[derive(Debug, Deserialize)]
pub struct PromptCreation {
    pub template_name: String,
    pub template: String,
    #[serde(default)]
    pub variables: Vec<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

async fn create_prompt(
    State(state): State<AppState>,
    Json(body): Json<PromptCreation>,
) -> ApiResult<Json<Value>> {
    if body.template_name.trim().is_empty() {
        return Err(ApiError::BadRequest("template_name cannot be empty".to_string()));
    }

    let (prompt_id, version) = {
        let mut prompts = state.prompts.write().await;
        let id = prompts.create(
            &body.template_name,
            &body.template,
            body.variables,
            body.description,
            body.tags,
        );
        let version = prompts.get(&id).map(|p| p.version.clone()).unwrap_or_default();
        (id, version)
    };
    state.refresh_gauges().await;

    Ok(Json(json!({
        "message": "Prompt created successfully",
        "prompt_id": prompt_id,
        "version": version,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PromptFilter {
    pub template_name: Option<String>,
    pub status: Option<String>,
}

async fn list_prompts(
    State(state): State<AppState>,
    Query(filter): Query<PromptFilter>,
) -> ApiResult<Json<Value>> {
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<PromptStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let prompts = state.prompts.read().await;
    let listed: Vec<Value> = prompts
        .list(filter.template_name.as_deref(), status)
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "template_name": p.template_name,
                "version": p.version,
                "status": p.status,
                "created_at": p.created_at.to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(json!({ "prompts": listed })))
}

async fn activate_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.prompts.write().await.activate(&id)?;
    Ok(Json(json!({
        "message": "Prompt activated successfully",
        "prompt_id": id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RenderBody {
    pub template_name: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub prompt_id: Option<String>,
}

async fn render_prompt(
    State(state): State<AppState>,
    Json(body): Json<RenderBody>,
) -> ApiResult<Json<Value>> {
    let rendered = state.prompts.read().await.render(
        &body.template_name,
        &body.variables,
        body.prompt_id.as_deref(),
    )?;
    Ok(Json(json!({
        "template_name": body.template_name,
        "rendered_prompt": rendered,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AbTestBody {
    pub template_name: String,
    pub prompt_a: String,
    pub prompt_b: String,
    pub traffic_split: Option<f64>,
}

async fn start_ab_test(
    State(state): State<AppState>,
    Json(body): Json<AbTestBody>,
) -> ApiResult<Json<Value>> {
    let split = body
        .traffic_split
        .unwrap_or(state.settings.ab_test_traffic_split);

    let mut prompts = state.prompts.write().await;
    prompts.start_ab_test(&body.template_name, &body.prompt_a, &body.prompt_b, split)?;
    let expires_at = prompts
        .ab_test(&body.template_name)
        .map(|t| t.expires_at.to_rfc3339());

    Ok(Json(json!({
        "message": "A/B test started",
        "template_name": body.template_name,
        "traffic_split": split,
        "expires_at": expires_at,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AssignmentQuery {
    pub user_id: Option<String>,
}

async fn ab_test_assignment(
    State(state): State<AppState>,
    Path(template): Path<String>,
    Query(query): Query<AssignmentQuery>,
) -> ApiResult<Json<Value>> {
    let prompts = state.prompts.read().await;
    let prompt = prompts
        .ab_test_prompt(&template, query.user_id.as_deref())
        .ok_or_else(|| ApiError::NotFound(format!("No prompt found for template {}", template)))?;

    Ok(Json(json!({
        "template_name": template,
        "user_id": query.user_id,
        "ab_test_active": prompts.ab_test(&template).is_some(),
        "prompt": {
            "id": prompt.id,
            "version": prompt.version,
            "status": prompt.status,
            "template": prompt.template,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<u32>,
    pub model_name: Option<String>,
}

async fn monitoring_metrics(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> ApiResult<Json<Value>> {
    let hours = window.hours.unwrap_or(24);
    let model = window.model_name.as_deref();
    let (start, end) = monitoring::window(hours)?;
    let cost = state.monitor.cost_metrics(model, Some(start), Some(end))?;
    let performance = state.monitor.performance_metrics(model, hours)?;
    let errors = state.monitor.error_summary(hours)?;

    Ok(Json(json!({
        "cost_metrics": cost,
        "performance_metrics": performance,
        "error_summary": errors,
    })))
}

async fn monitoring_alerts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let alerts = state.monitor.check_cost_alerts()?;
    Ok(Json(json!({ "alerts": alerts })))
}

#[derive(Debug, Deserialize)]
pub struct EvaluationBody {
    pub model_name: String,
    pub model_version: Option<String>,
    pub prompt_template: Option<String>,
    pub prompt_id: Option<String>,
    pub test_case_ids: Option<Vec<String>>,
    pub user_id: Option<String>,
}

async fn run_evaluation(
    State(state): State<AppState>,
    Json(body): Json<EvaluationBody>,
) -> ApiResult<Json<Value>> {
    let template = match (&body.prompt_template, &body.prompt_id) {
        (Some(template), _) => template.clone(),
        (None, Some(id)) => state
            .prompts
            .read()
            .await
            .get(id)
            .map(|p| p.template.clone())
            .ok_or_else(|| ApiError::NotFound(format!("Prompt not found: {}", id)))?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "either prompt_template or prompt_id is required".to_string(),
            ))
        }
    };
    let version = body.model_version.as_deref().unwrap_or(model::LATEST);

    let mut evaluator = state.evaluator.lock().await;
    let evaluation_id = evaluator
        .evaluate_model(
            &body.model_name,
            version,
            &template,
            body.test_case_ids.as_deref(),
            body.user_id.as_deref(),
        )
        .await?;
    let summary = evaluator
        .summary(&evaluation_id)
        .ok_or_else(|| ApiError::Internal(format!("summary for {} missing", evaluation_id)))?;

    Ok(Json(serde_json::to_value(summary).map_err(|e| ApiError::Internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

async fn export_evaluation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format: ExportFormat = query.format.as_deref().unwrap_or("json").parse()?;
    let body = state.evaluator.lock().await.export(&id, format)?;
    let content_type = match format {
        ExportFormat::Json => "application/json",
        ExportFormat::Csv => "text/csv; charset=utf-8",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));
        assert!(limiter.check("bob"));
    }

    #[test]
    fn test_rate_limiter_forgets_idle_callers() {
        let limiter = RateLimiter::per_minute(1).with_window(Duration::from_millis(20));
        for i in 0..50 {
            assert!(limiter.check(&format!("rotating_{}", i)));
        }
        assert_eq!(limiter.tracked_keys(), 50);

        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("fresh"));
        assert_eq!(limiter.tracked_keys(), 1);

        // the window for the surviving caller still applies
        assert!(!limiter.check("fresh"));
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            ApiError::from(RegistryError::NotFound {
                name: "m".into(),
                version: "v".into()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(crate::prompts::PromptError::AbTestingDisabled).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ModelError::ServiceUnavailable {
                message: "down".into()
            })
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::RateLimited("slow down".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_state_requires_valid_mlflow_uri_outside_demo_mode() {
        let mut settings = Settings::default().with_demo_mode(false);
        settings.mlflow_tracking_uri = "localhost:5000".to_string();
        let provider: Arc<dyn ModelProvider> = Arc::new(model::SimulatedProvider::demo());
        assert!(AppState::new(settings, Arc::clone(&provider)).is_err());
        assert!(AppState::new(Settings::default(), provider).is_ok());
    }
}
