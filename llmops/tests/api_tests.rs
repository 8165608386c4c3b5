use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use llmops::{router, AppState, LlmRequestRecord, ModelEvaluator, Settings};
use model::{
    ExperimentTracker, ModelCatalog, ModelMetadata, ModelProvider, ModelRegistry, ModelResult,
    SimulatedProvider,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower::ServiceExt;

fn state_with(settings: Settings) -> AppState {
    let provider: Arc<dyn ModelProvider> = Arc::new(SimulatedProvider::demo());
    let state = AppState::new(settings, Arc::clone(&provider)).unwrap();
    let evaluator =
        ModelEvaluator::new(provider, Arc::clone(&state.monitor)).with_pacing(Duration::ZERO);
    state.with_evaluator(evaluator)
}

fn test_app() -> (Router, AppState) {
    let state = state_with(Settings::default());
    (router(state.clone()), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register(app: &Router, name: &str, provider: &str) -> String {
    let (status, body) = send(
        app,
        post(
            "/models/register",
            json!({ "name": name, "provider": provider, "parameters": { "temperature": 0.7 } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["version"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].as_f64().unwrap() > 0.0);
    assert_eq!(body["services"]["experiment_tracker"], "noop");
}

#[tokio::test]
async fn test_llm_request_for_registered_model() {
    let (app, state) = test_app();
    let version = register(&app, "gpt-4", "openai").await;

    let (status, body) = send(
        &app,
        post(
            "/llm/request",
            json!({ "model_name": "gpt-4", "prompt": "Hello there", "user_id": "u1" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_version"], version.as_str());
    assert!(body["response"]
        .as_str()
        .unwrap()
        .starts_with("Simulated response for: Hello there"));
    assert!(body["cost_usd"].as_f64().unwrap() > 0.0);
    assert_eq!(state.monitor.record_count(), 1);
    assert_eq!(state.monitor.error_summary(1).unwrap().total_errors, 0);
}

#[tokio::test]
async fn test_unknown_model_is_404_and_logged_as_failure() {
    let (app, state) = test_app();
    let (status, body) = send(
        &app,
        post("/llm/request", json!({ "model_name": "nope", "prompt": "hi" })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Model not found");

    let errors = state.monitor.error_summary(1).unwrap();
    assert_eq!(errors.total_errors, 1);
    assert_eq!(errors.error_types.get("Model not found"), Some(&1));
}

#[tokio::test]
async fn test_rate_limit_per_user() {
    let (app, _) = {
        let state = state_with(Settings::default().with_rate_limits(2, 4000));
        (router(state.clone()), state)
    };
    register(&app, "gpt-4", "openai").await;

    let request = || post("/llm/request", json!({ "model_name": "gpt-4", "prompt": "hi", "user_id": "u1" }));
    assert_eq!(send(&app, request()).await.0, StatusCode::OK);
    assert_eq!(send(&app, request()).await.0, StatusCode::OK);
    assert_eq!(send(&app, request()).await.0, StatusCode::TOO_MANY_REQUESTS);

    let other = post("/llm/request", json!({ "model_name": "gpt-4", "prompt": "hi", "user_id": "u2" }));
    assert_eq!(send(&app, other).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_prompt_over_token_limit_is_rejected() {
    let state = state_with(Settings::default().with_rate_limits(60, 5));
    let app = router(state);
    register(&app, "gpt-4", "openai").await;

    let (status, body) = send(
        &app,
        post(
            "/llm/request",
            json!({ "model_name": "gpt-4", "prompt": "one two three four five six seven eight" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("limit is 5"));
}

#[tokio::test]
async fn test_register_rejects_unknown_provider() {
    let (app, _) = test_app();
    let (status, _) = send(
        &app,
        post("/models/register", json!({ "name": "x", "provider": "acme" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_model_listing_and_deploy() {
    let (app, _) = test_app();
    let version = register(&app, "claude-3-sonnet", "anthropic").await;

    let (status, body) = send(
        &app,
        post(&format!("/models/claude-3-sonnet/{}/deploy", version), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "deployed");

    let (_, body) = send(&app, get("/models")).await;
    let models = body["models"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["provider"], "anthropic");
    assert_eq!(models[0]["status"], "deployed");

    let (status, _) = send(&app, post("/models/claude-3-sonnet/v0/deploy", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_prompt_lifecycle() {
    let (app, _) = test_app();
    let (status, created) = send(
        &app,
        post(
            "/prompts/create",
            json!({ "template_name": "greeting", "template": "Hallo {name}!", "variables": ["name"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = created["prompt_id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, post(&format!("/prompts/{}/activate", id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = send(&app, get("/prompts?template_name=greeting&status=active")).await;
    assert_eq!(listed["prompts"].as_array().unwrap().len(), 1);

    let (status, rendered) = send(
        &app,
        post(
            "/prompts/render",
            json!({ "template_name": "greeting", "variables": { "name": "Welt" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rendered["rendered_prompt"], "Hallo Welt!");

    let (status, _) = send(&app, post("/prompts/missing/activate", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/prompts?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ab_test_assignment() {
    let (app, _) = test_app();
    let mut ids = Vec::new();
    for template in ["Kurz: {question}", "Ausführlich: {question}"] {
        let (_, created) = send(
            &app,
            post(
                "/prompts/create",
                json!({ "template_name": "ab", "template": template, "variables": ["question"] }),
            ),
        )
        .await;
        ids.push(created["prompt_id"].as_str().unwrap().to_string());
    }

    let (status, started) = send(
        &app,
        post(
            "/ab-tests",
            json!({ "template_name": "ab", "prompt_a": ids[0], "prompt_b": ids[1] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["traffic_split"], 0.5);

    let (status, first) = send(&app, get("/ab-tests/ab/assignment?user_id=user_7")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["ab_test_active"], true);
    let assigned = first["prompt"]["id"].as_str().unwrap().to_string();
    assert!(ids.contains(&assigned));

    let (_, again) = send(&app, get("/ab-tests/ab/assignment?user_id=user_7")).await;
    assert_eq!(again["prompt"]["id"], assigned.as_str());

    let (status, _) = send(&app, get("/ab-tests/unknown/assignment?user_id=user_7")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_ab_split_is_rejected() {
    let (app, _) = test_app();
    let (status, _) = send(
        &app,
        post(
            "/ab-tests",
            json!({ "template_name": "ab", "prompt_a": "a", "prompt_b": "b", "traffic_split": 1.5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_monitoring_metrics_and_alerts() {
    let state = state_with(Settings::default().with_cost_alert_threshold(0.000001));
    let app = router(state);
    register(&app, "gpt-4", "openai").await;
    send(
        &app,
        post("/llm/request", json!({ "model_name": "gpt-4", "prompt": "Was ist Python?" })),
    )
    .await;

    let (status, body) = send(&app, get("/monitoring/metrics?hours=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cost_metrics"]["requests_count"], 1);
    assert_eq!(body["performance_metrics"]["total_requests"], 1);
    assert_eq!(body["error_summary"]["total_errors"], 0);

    let (status, body) = send(&app, get("/monitoring/alerts")).await;
    assert_eq!(status, StatusCode::OK);
    let alerts = body["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["type"], "cost_alert");
}

fn stored_record(hours_ago: i64) -> LlmRequestRecord {
    LlmRequestRecord {
        request_id: format!("old_{}", hours_ago),
        model_name: "gpt-4".to_string(),
        model_version: "v1".to_string(),
        prompt_id: None,
        user_id: None,
        timestamp: Utc::now() - chrono::Duration::hours(hours_ago),
        input_tokens: 100,
        output_tokens: 100,
        latency_ms: 250.0,
        cost_usd: 0.5,
        success: true,
        error_message: None,
        metadata: Map::new(),
    }
}

#[tokio::test]
async fn test_monitoring_window_applies_to_cost() {
    let (app, state) = test_app();
    state.monitor.store(stored_record(0));
    state.monitor.store(stored_record(5));

    let (status, body) = send(&app, get("/monitoring/metrics?hours=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cost_metrics"]["requests_count"], 1);
    assert_eq!(body["cost_metrics"]["total_cost_usd"], 0.5);

    let (_, body) = send(&app, get("/monitoring/metrics?hours=6")).await;
    assert_eq!(body["cost_metrics"]["requests_count"], 2);
    assert_eq!(body["performance_metrics"]["total_requests"], 2);
}

#[tokio::test]
async fn test_monitoring_window_out_of_range_is_bad_request() {
    let (app, _) = test_app();
    let (status, body) = send(&app, get("/monitoring/metrics?hours=4294967295")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Invalid time window"));

    // the server keeps answering afterwards
    assert_eq!(send(&app, get("/health")).await.0, StatusCode::OK);
}

struct SlowTracker {
    delay: Duration,
}

#[async_trait]
impl ExperimentTracker for SlowTracker {
    async fn log_registration(&self, _model: &ModelMetadata) -> ModelResult<()> {
        tokio::time::sleep(self.delay).await;
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
        "slow"
    }
}

#[tokio::test]
async fn test_registration_tracking_does_not_block_readers() {
    let mut state = state_with(Settings::default());
    state.registry = Arc::new(RwLock::new(ModelRegistry::with_tracker(
        ModelCatalog::builtin(),
        Arc::new(SlowTracker {
            delay: Duration::from_secs(2),
        }),
    )));
    let app = router(state);

    let registering = {
        let app = app.clone();
        tokio::spawn(async move {
            send(
                &app,
                post("/models/register", json!({ "name": "gpt-4", "provider": "openai" })),
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, body) =
        tokio::time::timeout(Duration::from_millis(500), send(&app, get("/models")))
            .await
            .expect("GET /models waited on the tracker");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"].as_array().unwrap().len(), 1);

    let (status, _) = registering.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_prometheus_endpoint_counts_requests() {
    let (app, state) = test_app();
    send(&app, get("/health")).await;
    register(&app, "gpt-4", "openai").await;

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec(),
    )
    .unwrap();

    assert!(text.contains("# TYPE llm_ops_requests_total counter"));
    assert!(text.contains("llm_ops_active_models 1"));
    assert!(text.contains("llm_ops_request_duration_seconds_bucket"));
    assert_eq!(
        state.metrics.value(
            "llm_ops_requests_total",
            &[("endpoint", "/health"), ("method", "GET"), ("status", "200")]
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_evaluation_and_export() {
    let (app, _) = test_app();
    let (status, summary) = send(
        &app,
        post(
            "/evaluations",
            json!({
                "model_name": "gpt-4",
                "prompt_template": "Frage: {question}\nKontext: {context}",
                "test_case_ids": ["chat_001"]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_tests"], 1);
    assert_eq!(summary["successful_tests"], 1);
    let id = summary["evaluation_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/evaluations/{}/export?format=csv", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );

    let (status, _) = send(&app, get(&format!("/evaluations/{}/export?format=xml", id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/evaluations/eval_missing/export")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_evaluation_requires_a_template() {
    let (app, _) = test_app();
    let (status, body) = send(&app, post("/evaluations", json!({ "model_name": "gpt-4" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("prompt_template"));
}
