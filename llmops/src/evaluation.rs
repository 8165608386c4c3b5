//! Evaluation harness
//!
//! Runs a prompt template against a set of test cases on a model, scores the
//! answers and keeps per-run summaries for comparison and export.
//!
//! # Examples
//!
//! ```rust
//! use llmops::evaluation::ModelEvaluator;
//! use llmops::monitoring::LlmMonitor;
//! use model::SimulatedProvider;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut evaluator = ModelEvaluator::new(
//!     Arc::new(SimulatedProvider::demo()),
//!     Arc::new(LlmMonitor::new()),
//! )
//! .with_pacing(Duration::ZERO);
//!
//! let template = "Übersetze von {source_language} nach {target_language}: {text}";
//! let ids = vec!["translation_001".to_string()];
//! let eval_id = evaluator.evaluate_model("gpt-4", "latest", template, Some(&ids), None).await?;
//!
//! let summary = evaluator.summary(&eval_id).unwrap();
//! assert_eq!(summary.avg_accuracy, 1.0);
//! # Ok(())
//! # }
//! ```

use crate::monitoring::LlmMonitor;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use model::{ChatMessage, ChatRequest, KeywordJudge, ModelProvider, ResponseJudge};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Pause between two test cases of a run
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Evaluation not found: {id}")]
    NotFound { id: String },

    #[error("No test cases selected")]
    NoTestCases,

    #[error("Unsupported export format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EvalResult<T> = Result<T, EvaluationError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub input_data: HashMap<String, String>,
    pub expected_output: Option<String>,
    pub expected_tokens: Option<u64>,
    pub max_latency_ms: Option<f64>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
}

impl TestCase {
    pub fn new<I, K, V>(id: impl Into<String>, input_data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            input_data: input_data
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            expected_output: None,
            expected_tokens: None,
            max_latency_ms: None,
            category: None,
            difficulty: None,
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_expected_tokens(mut self, tokens: u64) -> Self {
        self.expected_tokens = Some(tokens);
        self
    }

    pub fn with_max_latency_ms(mut self, max_latency_ms: f64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = Some(difficulty.into());
        self
    }
}

/// Cases every evaluator starts with
pub fn builtin_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::new(
            "chat_001",
            [
                ("context", "Hallo, wie geht es dir?"),
                ("question", "Kannst du mir bei einer Frage helfen?"),
            ],
        )
        .with_expected_output("freundlich und hilfsbereit")
        .with_category("chat")
        .with_difficulty("easy"),
        TestCase::new(
            "summarization_001",
            [(
                "text",
                "Dies ist ein langer Text über künstliche Intelligenz und maschinelles Lernen. Die Technologie entwickelt sich schnell und wird in vielen Bereichen eingesetzt.",
            )],
        )
        .with_expected_tokens(50)
        .with_category("summarization")
        .with_difficulty("medium"),
        TestCase::new(
            "translation_001",
            [
                ("source_language", "Deutsch"),
                ("target_language", "Englisch"),
                ("text", "Guten Tag, wie geht es Ihnen?"),
            ],
        )
        .with_expected_output("Good day, how are you?")
        .with_category("translation")
        .with_difficulty("easy"),
        TestCase::new(
            "complex_001",
            [
                ("context", "Ein komplexes technisches Problem"),
                (
                    "question",
                    "Erkläre mir die Unterschiede zwischen verschiedenen Machine Learning Algorithmen",
                ),
            ],
        )
        .with_max_latency_ms(5000.0)
        .with_category("complex_qa")
        .with_difficulty("hard"),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub test_case_id: String,
    pub model_name: String,
    pub model_version: String,
    pub prompt_id: Option<String>,
    pub actual_output: String,
    pub actual_tokens: u64,
    pub latency_ms: f64,
    pub cost_usd: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub accuracy_score: Option<f64>,
    pub user_satisfaction_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub evaluation_id: String,
    pub model_name: String,
    pub model_version: String,
    pub prompt_id: Option<String>,
    pub total_tests: usize,
    pub successful_tests: usize,
    pub avg_accuracy: f64,
    pub avg_latency_ms: f64,
    pub total_cost_usd: f64,
    pub avg_cost_per_test: f64,
    pub success_rate: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub test_categories: BTreeMap<String, usize>,
    pub error_summary: BTreeMap<String, usize>,
}

/// Per-model side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvalStats {
    pub name: String,
    pub version: String,
    pub evaluation_id: String,
    pub total_tests: usize,
    pub successful_tests: usize,
    pub avg_accuracy: f64,
    pub avg_latency_ms: f64,
    pub total_cost_usd: f64,
    pub success_rate: f64,
}

impl From<&EvaluationSummary> for ModelEvalStats {
    fn from(summary: &EvaluationSummary) -> Self {
        Self {
            name: summary.model_name.clone(),
            version: summary.model_version.clone(),
            evaluation_id: summary.evaluation_id.clone(),
            total_tests: summary.total_tests,
            successful_tests: summary.successful_tests,
            avg_accuracy: summary.avg_accuracy,
            avg_latency_ms: summary.avg_latency_ms,
            total_cost_usd: summary.total_cost_usd,
            success_rate: summary.success_rate,
        }
    }
}

/// `model2 - model1` for each statistic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalDifferences {
    pub accuracy_diff: f64,
    pub latency_diff: f64,
    pub cost_diff: f64,
    pub success_rate_diff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalComparison {
    pub model1: ModelEvalStats,
    pub model2: ModelEvalStats,
    pub differences: EvalDifferences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(EvaluationError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn opt_to_string<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(T::to_string).unwrap_or_default()
}

pub struct ModelEvaluator {
    provider: Arc<dyn ModelProvider>,
    monitor: Arc<LlmMonitor>,
    judge: Box<dyn ResponseJudge>,
    test_cases: Vec<TestCase>,
    results: HashMap<String, Vec<EvaluationResult>>,
    summaries: HashMap<String, EvaluationSummary>,
    pacing: Duration,
}

impl ModelEvaluator {
    /// Evaluator with the built-in test cases and keyword scoring.
    ///
    /// The monitor is used for token counting and pricing only; evaluation
    /// calls are not logged as production requests.
    pub fn new(provider: Arc<dyn ModelProvider>, monitor: Arc<LlmMonitor>) -> Self {
        Self {
            provider,
            monitor,
            judge: Box::new(KeywordJudge),
            test_cases: builtin_test_cases(),
            results: HashMap::new(),
            summaries: HashMap::new(),
            pacing: DEFAULT_PACING,
        }
    }

    pub fn with_judge(mut self, judge: Box<dyn ResponseJudge>) -> Self {
        self.judge = judge;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Add a case, replacing one with the same id
    pub fn add_test_case(&mut self, test_case: TestCase) {
        match self.test_cases.iter_mut().find(|t| t.id == test_case.id) {
            Some(existing) => *existing = test_case,
            None => self.test_cases.push(test_case),
        }
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    fn select(&self, ids: Option<&[String]>) -> Vec<TestCase> {
        match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.test_cases.iter().find(|t| &t.id == id))
                .cloned()
                .collect(),
            None => self.test_cases.clone(),
        }
    }

    /// Run `template` over the selected cases (all when `None`) and return the evaluation id.
    ///
    /// Unknown ids are skipped. A case that cannot be rendered or whose call
    /// fails is recorded as a failed result.
    pub async fn evaluate_model(
        &mut self,
        model_name: &str,
        model_version: &str,
        template: &str,
        test_case_ids: Option<&[String]>,
        user_id: Option<&str>,
    ) -> EvalResult<String> {
        let cases = self.select(test_case_ids);
        if cases.is_empty() {
            return Err(EvaluationError::NoTestCases);
        }

        let evaluation_id = format!("eval_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        info!(
            evaluation_id = %evaluation_id,
            model = model_name,
            user_id = user_id.unwrap_or("-"),
            cases = cases.len(),
            "starting evaluation"
        );

        let start_time = Utc::now();
        let mut results = Vec::with_capacity(cases.len());
        for (i, case) in cases.iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let result = match self.run_single(case, model_name, model_version, template).await {
                Ok(result) => result,
                Err(message) => {
                    warn!(test_case = %case.id, error = %message, "test case failed");
                    EvaluationResult {
                        test_case_id: case.id.clone(),
                        model_name: model_name.to_string(),
                        model_version: model_version.to_string(),
                        prompt_id: None,
                        actual_output: String::new(),
                        actual_tokens: 0,
                        latency_ms: 0.0,
                        cost_usd: 0.0,
                        success: false,
                        error_message: Some(message),
                        accuracy_score: None,
                        user_satisfaction_score: None,
                        timestamp: Utc::now(),
                    }
                }
            };
            results.push(result);
        }
        let end_time = Utc::now();

        let summary = self.summarize(&evaluation_id, model_name, model_version, &results, start_time, end_time);
        info!(
            evaluation_id = %evaluation_id,
            success_rate = summary.success_rate,
            avg_accuracy = summary.avg_accuracy,
            "evaluation finished"
        );

        self.results.insert(evaluation_id.clone(), results);
        self.summaries.insert(evaluation_id.clone(), summary);
        Ok(evaluation_id)
    }

    async fn run_single(
        &self,
        case: &TestCase,
        model_name: &str,
        model_version: &str,
        template: &str,
    ) -> Result<EvaluationResult, String> {
        let rendered = crate::prompts::render_template(template, &case.input_data)
            .map_err(|e| format!("Missing variable in prompt: {}", e))?;

        let request = ChatRequest::new(model_name, vec![ChatMessage::user(rendered.as_str())]);
        let started = Instant::now();
        let response = self
            .provider
            .chat(request)
            .await
            .map_err(|e| e.to_string())?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let actual_output = response.text().to_string();
        let input_tokens = self.monitor.count_tokens(&rendered);
        let output_tokens = self.monitor.count_tokens(&actual_output);
        let actual_tokens = self.monitor.count_tokens(&format!("{}{}", rendered, actual_output));
        let cost_usd = self.monitor.calculate_cost(model_name, input_tokens, output_tokens);

        let accuracy_score = case
            .expected_output
            .as_deref()
            .map(|expected| self.judge.score(&actual_output, expected));

        Ok(EvaluationResult {
            test_case_id: case.id.clone(),
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            prompt_id: None,
            actual_output,
            actual_tokens,
            latency_ms,
            cost_usd,
            success: true,
            error_message: None,
            accuracy_score,
            user_satisfaction_score: None,
            timestamp: Utc::now(),
        })
    }

    fn summarize(
        &self,
        evaluation_id: &str,
        model_name: &str,
        model_version: &str,
        results: &[EvaluationResult],
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> EvaluationSummary {
        let successful: Vec<&EvaluationResult> = results.iter().filter(|r| r.success).collect();
        let accuracies: Vec<f64> = successful.iter().filter_map(|r| r.accuracy_score).collect();
        let latencies: Vec<f64> = successful.iter().map(|r| r.latency_ms).collect();
        let total_cost_usd: f64 = successful.iter().map(|r| r.cost_usd).sum();

        let mut test_categories = BTreeMap::new();
        let mut error_summary = BTreeMap::new();
        for result in results {
            let category = self
                .test_cases
                .iter()
                .find(|t| t.id == result.test_case_id)
                .and_then(|t| t.category.clone());
            if let Some(category) = category {
                *test_categories.entry(category).or_insert(0) += 1;
            }
            if let (false, Some(message)) = (result.success, &result.error_message) {
                *error_summary.entry(message.clone()).or_insert(0) += 1;
            }
        }

        let total = results.len();
        EvaluationSummary {
            evaluation_id: evaluation_id.to_string(),
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            prompt_id: None,
            total_tests: total,
            successful_tests: successful.len(),
            avg_accuracy: mean(&accuracies),
            avg_latency_ms: mean(&latencies),
            total_cost_usd,
            avg_cost_per_test: if total > 0 {
                total_cost_usd / total as f64
            } else {
                0.0
            },
            success_rate: if total > 0 {
                successful.len() as f64 / total as f64
            } else {
                0.0
            },
            start_time,
            end_time,
            test_categories,
            error_summary,
        }
    }

    /// Evaluate two models on the same cases
    pub async fn compare_models(
        &mut self,
        model1: (&str, &str),
        model2: (&str, &str),
        template: &str,
        test_case_ids: Option<&[String]>,
    ) -> EvalResult<EvalComparison> {
        info!(model1 = model1.0, model2 = model2.0, "comparing models");
        let eval1 = self
            .evaluate_model(model1.0, model1.1, template, test_case_ids, None)
            .await?;
        let eval2 = self
            .evaluate_model(model2.0, model2.1, template, test_case_ids, None)
            .await?;

        let stats1 = ModelEvalStats::from(self.summary_or_err(&eval1)?);
        let stats2 = ModelEvalStats::from(self.summary_or_err(&eval2)?);
        let differences = EvalDifferences {
            accuracy_diff: stats2.avg_accuracy - stats1.avg_accuracy,
            latency_diff: stats2.avg_latency_ms - stats1.avg_latency_ms,
            cost_diff: stats2.total_cost_usd - stats1.total_cost_usd,
            success_rate_diff: stats2.success_rate - stats1.success_rate,
        };

        Ok(EvalComparison {
            model1: stats1,
            model2: stats2,
            differences,
        })
    }

    fn summary_or_err(&self, evaluation_id: &str) -> EvalResult<&EvaluationSummary> {
        self.summaries
            .get(evaluation_id)
            .ok_or_else(|| EvaluationError::NotFound {
                id: evaluation_id.to_string(),
            })
    }

    pub fn summary(&self, evaluation_id: &str) -> Option<&EvaluationSummary> {
        self.summaries.get(evaluation_id)
    }

    pub fn results(&self, evaluation_id: &str) -> Option<&[EvaluationResult]> {
        self.results.get(evaluation_id).map(Vec::as_slice)
    }

    /// Runs that finished within the last `days`, newest first
    pub fn evaluation_history(&self, model_name: Option<&str>, days: u32) -> Vec<&EvaluationSummary> {
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);
        let mut history: Vec<&EvaluationSummary> = self
            .summaries
            .values()
            .filter(|s| model_name.map_or(true, |m| s.model_name == m))
            .filter(|s| s.end_time >= cutoff)
            .collect();
        history.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        history
    }

    pub fn export(&self, evaluation_id: &str, format: ExportFormat) -> EvalResult<String> {
        let results = self
            .results
            .get(evaluation_id)
            .ok_or_else(|| EvaluationError::NotFound {
                id: evaluation_id.to_string(),
            })?;

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(results)?),
            ExportFormat::Csv => {
                let mut output = String::new();
                output.push_str("test_case_id,model_name,model_version,prompt_id,actual_output,actual_tokens,latency_ms,cost_usd,success,error_message,accuracy_score,user_satisfaction_score,timestamp\n");
                for r in results {
                    let _ = writeln!(
                        output,
                        "{},{},{},{},{},{},{},{},{},{},{},{},{}",
                        csv_field(&r.test_case_id),
                        csv_field(&r.model_name),
                        csv_field(&r.model_version),
                        csv_field(&opt_to_string(&r.prompt_id)),
                        csv_field(&r.actual_output),
                        r.actual_tokens,
                        r.latency_ms,
                        r.cost_usd,
                        r.success,
                        csv_field(&opt_to_string(&r.error_message)),
                        opt_to_string(&r.accuracy_score),
                        opt_to_string(&r.user_satisfaction_score),
                        r.timestamp.to_rfc3339(),
                    );
                }
                Ok(output)
            }
        }
    }
}
