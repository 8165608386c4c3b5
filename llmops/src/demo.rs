//! Offline walkthrough of every component
//!
//! Registers models, versions prompts, runs an A/B test, logs simulated
//! requests, evaluates two models and reports costs. Output goes to any
//! [`std::io::Write`] so the walkthrough can be captured in tests.

use crate::api::AppState;
use crate::evaluation::{EvaluationError, TestCase};
use crate::monitoring::{MonitoringError, RequestLog};
use crate::prompts::PromptError;
use model::{ProviderKind, RegistryError, LATEST};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::io::Write;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Monitoring(#[from] MonitoringError),
}

pub type DemoResult<T> = Result<T, DemoError>;

const EVAL_TEMPLATE: &str = "
Du bist ein hilfreicher Assistent. Antworte auf Deutsch.

Frage: {question}

Antwort:";

const SIMULATED_LATENCY_MS: f64 = 500.0;

fn section(out: &mut impl Write, number: u8, title: &str) -> std::io::Result<()> {
    writeln!(out, "\n{}. {}", number, title)?;
    writeln!(out, "{}", "-".repeat(30))
}

fn parameters(max_tokens: u32, model: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("temperature".to_string(), json!(0.7));
    params.insert("max_tokens".to_string(), json!(max_tokens));
    params.insert("model".to_string(), json!(model));
    params
}

/// Run all six sections against `state`
pub async fn run(state: &AppState, out: &mut impl Write) -> DemoResult<()> {
    info!("starting demo walkthrough");
    writeln!(out, "LLM-Ops walkthrough")?;
    writeln!(out, "{}", "=".repeat(60))?;

    section(out, 1, "MODEL MANAGEMENT")?;
    model_management(state, out).await?;

    section(out, 2, "PROMPT ENGINEERING")?;
    prompt_engineering(state, out).await?;

    section(out, 3, "A/B TESTING")?;
    ab_testing(state, out).await?;

    section(out, 4, "MONITORING & OBSERVABILITY")?;
    monitoring(state, out)?;

    section(out, 5, "MODEL EVALUATION")?;
    evaluation(state, out).await?;

    section(out, 6, "COST MANAGEMENT")?;
    cost_management(state, out)?;

    writeln!(out, "\nWalkthrough complete.")?;
    Ok(())
}

async fn model_management(state: &AppState, out: &mut impl Write) -> DemoResult<()> {
    writeln!(out, "Registering models...")?;
    let mut registry = state.registry.write().await;

    let gpt4 = registry
        .register(
            "gpt-4",
            ProviderKind::OpenAi,
            parameters(4096, "gpt-4"),
            Some("GPT-4 for complex tasks".to_string()),
        )
        .await?;
    registry
        .register(
            "gpt-3.5-turbo",
            ProviderKind::OpenAi,
            parameters(2048, "gpt-3.5-turbo"),
            Some("GPT-3.5 for simple tasks".to_string()),
        )
        .await?;
    registry
        .register(
            "claude-3-sonnet",
            ProviderKind::Anthropic,
            parameters(4096, "claude-3-sonnet"),
            Some("Claude for creative tasks".to_string()),
        )
        .await?;

    registry.deploy("gpt-4", &gpt4)?;

    writeln!(out, "Registered models: {}", registry.len())?;
    for m in registry.list() {
        writeln!(out, "  - {} {} ({})", m.name, m.version, m.status)?;
    }
    Ok(())
}

async fn prompt_engineering(state: &AppState, out: &mut impl Write) -> DemoResult<()> {
    writeln!(out, "Creating prompt versions...")?;
    let mut prompts = state.prompts.write().await;

    prompts.create(
        "chatbot",
        "\nDu bist ein hilfreicher Assistent. Antworte auf Deutsch und sei freundlich.\n\nFrage: {question}\n\nAntwort:",
        vec!["question".to_string()],
        Some("Simple chatbot prompt v1".to_string()),
        Vec::new(),
    );
    let v2 = prompts.create(
        "chatbot",
        "\nDu bist ein professioneller Assistent mit umfangreichem Wissen. \nAntworte auf Deutsch, sei freundlich und gib detaillierte, hilfreiche Antworten.\n\nKontext: {context}\nFrage: {question}\n\nAntwort:",
        vec!["context".to_string(), "question".to_string()],
        Some("Improved chatbot prompt v2".to_string()),
        Vec::new(),
    );
    prompts.activate(&v2)?;

    let variables: HashMap<String, String> = [
        ("context", "Der Benutzer ist neu hier"),
        ("question", "Wie kann ich dir helfen?"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let rendered = prompts.render("chatbot", &variables, None)?;
    let preview: String = rendered.chars().take(200).collect();
    writeln!(out, "Rendered prompt:\n{}...", preview)?;

    let chatbot = prompts.list(Some("chatbot"), None);
    writeln!(out, "Chatbot prompts: {}", chatbot.len())?;
    for p in chatbot {
        writeln!(out, "  - {} {} ({})", p.template_name, p.version, p.status)?;
    }
    Ok(())
}

async fn ab_testing(state: &AppState, out: &mut impl Write) -> DemoResult<()> {
    writeln!(out, "Starting an A/B test between prompt versions...")?;
    let mut prompts = state.prompts.write().await;

    let a = prompts.create(
        "ab_test",
        "Antworte kurz und prägnant: {question}",
        vec!["question".to_string()],
        Some("Short answers".to_string()),
        Vec::new(),
    );
    let b = prompts.create(
        "ab_test",
        "Gib eine ausführliche und detaillierte Antwort: {question}",
        vec!["question".to_string()],
        Some("Detailed answers".to_string()),
        Vec::new(),
    );
    prompts.start_ab_test("ab_test", &a, &b, 0.5)?;

    for i in 0..10 {
        let user_id = format!("user_{}", i);
        if let Some(prompt) = prompts.ab_test_prompt("ab_test", Some(user_id.as_str())) {
            writeln!(out, "User {}: prompt version {}", user_id, prompt.version)?;
        }
    }
    writeln!(out, "A/B test running, prompts are assigned by user id")?;
    Ok(())
}

fn monitoring(state: &AppState, out: &mut impl Write) -> DemoResult<()> {
    writeln!(out, "Logging simulated requests...")?;
    let requests = [
        ("Erkläre mir Machine Learning", "gpt-4"),
        ("Was ist Python?", "gpt-3.5-turbo"),
        ("Schreibe eine Kurzgeschichte", "claude-3-sonnet"),
    ];

    for (i, (prompt, model_name)) in requests.iter().enumerate() {
        let request_id = format!("req_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let log = RequestLog::new(
            request_id,
            *model_name,
            LATEST,
            *prompt,
            format!("Simulated answer for: {}", prompt),
            SIMULATED_LATENCY_MS,
        )
        .with_user_id(format!("demo_user_{}", i));
        state.monitor.log_request(log);
        writeln!(
            out,
            "Request {} logged: {} ({:.0}ms)",
            i + 1,
            model_name,
            SIMULATED_LATENCY_MS
        )?;
    }

    let performance = state.monitor.performance_metrics(None, 1)?;
    writeln!(out, "\nPerformance (last hour):")?;
    writeln!(out, "  - Average latency: {:.0}ms", performance.avg_latency_ms)?;
    writeln!(out, "  - Success rate: {:.1}%", performance.success_rate * 100.0)?;
    writeln!(out, "  - Requests per hour: {:.1}", performance.requests_per_hour)?;
    Ok(())
}

async fn evaluation(state: &AppState, out: &mut impl Write) -> DemoResult<()> {
    writeln!(out, "Evaluating models...")?;
    let mut evaluator = state.evaluator.lock().await;

    evaluator.add_test_case(
        TestCase::new("eval_001", [("question", "Was ist Python?")])
            .with_expected_output("Programmiersprache")
            .with_category("basic_qa"),
    );
    evaluator.add_test_case(
        TestCase::new("eval_002", [("question", "Erkläre Machine Learning")])
            .with_expected_output("künstliche Intelligenz")
            .with_category("technical_qa"),
    );
    let ids = vec!["eval_001".to_string(), "eval_002".to_string()];

    let evaluation_id = evaluator
        .evaluate_model("gpt-4", LATEST, EVAL_TEMPLATE, Some(ids.as_slice()), None)
        .await?;
    writeln!(out, "Evaluation finished: {}", evaluation_id)?;

    let comparison = evaluator
        .compare_models(
            ("gpt-4", LATEST),
            ("gpt-3.5-turbo", LATEST),
            EVAL_TEMPLATE,
            Some(ids.as_slice()),
        )
        .await?;
    writeln!(out, "\nModel comparison:")?;
    writeln!(out, "  GPT-4 accuracy: {:.2}", comparison.model1.avg_accuracy)?;
    writeln!(out, "  GPT-3.5 accuracy: {:.2}", comparison.model2.avg_accuracy)?;
    writeln!(out, "  Difference: {:.2}", comparison.differences.accuracy_diff)?;
    Ok(())
}

fn cost_management(state: &AppState, out: &mut impl Write) -> DemoResult<()> {
    writeln!(out, "Analysing costs and alerts...")?;
    let cost = state.monitor.cost_metrics(None, None, None)?;
    writeln!(out, "Cost metrics (last 24h):")?;
    writeln!(out, "  - Total cost: ${:.4}", cost.total_cost_usd)?;
    writeln!(out, "  - Cost per request: ${:.4}", cost.cost_per_request)?;
    writeln!(out, "  - Cost per token: ${:.6}", cost.cost_per_token)?;
    writeln!(out, "  - Requests: {}", cost.requests_count)?;
    writeln!(out, "  - Tokens: {}", cost.tokens_count)?;

    let alerts = state.monitor.check_cost_alerts()?;
    if alerts.is_empty() {
        writeln!(out, "\nNo cost alerts, spending within budget")?;
    } else {
        writeln!(out, "\nCost alerts:")?;
        for alert in &alerts {
            writeln!(out, "  - {}", alert.message)?;
        }
    }

    let errors = state.monitor.error_summary(24)?;
    writeln!(out, "\nError summary (last 24h):")?;
    writeln!(out, "  - Total errors: {}", errors.total_errors)?;
    writeln!(out, "  - Error rate: {:.1}%", errors.error_rate * 100.0)?;
    if !errors.error_types.is_empty() {
        writeln!(out, "  - Error types:")?;
        for (kind, count) in &errors.error_types {
            writeln!(out, "    * {}: {}", kind, count)?;
        }
    }
    Ok(())
}
