use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model used when a name is not in the catalog
pub const FALLBACK_MODEL: &str = "gpt-4";

/// Static configuration for one model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub max_tokens: u32,
    pub temperature: f32,
    /// USD per 1000 tokens, input and output priced alike
    pub cost_per_1k_tokens: f64,
}

impl ModelSpec {
    pub fn new(provider: ProviderKind, cost_per_1k_tokens: f64) -> Self {
        Self {
            provider,
            max_tokens: 4096,
            temperature: 0.7,
            cost_per_1k_tokens,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("Max tokens must be greater than 0".to_string());
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err("Temperature must be between 0.0 and 2.0".to_string());
        }

        if self.cost_per_1k_tokens < 0.0 || !self.cost_per_1k_tokens.is_finite() {
            return Err("Cost per 1k tokens must be a non-negative number".to_string());
        }

        Ok(())
    }

    /// Price of `tokens` tokens in USD
    pub fn cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1000.0) * self.cost_per_1k_tokens
    }
}

/// Per-model pricing and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: HashMap<String, ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(
            "gpt-4",
            ModelSpec::new(ProviderKind::OpenAi, 0.03).with_max_tokens(8192),
        );
        catalog.insert("gpt-3.5-turbo", ModelSpec::new(ProviderKind::OpenAi, 0.002));
        catalog.insert(
            "claude-3-opus",
            ModelSpec::new(ProviderKind::Anthropic, 0.015),
        );
        catalog.insert(
            "claude-3-sonnet",
            ModelSpec::new(ProviderKind::Anthropic, 0.003),
        );
        catalog
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: ModelSpec) {
        self.models.insert(name.into(), spec);
    }

    /// Exact lookup without fallback
    pub fn lookup(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    /// Lookup that falls back to [`FALLBACK_MODEL`], then to a free OpenAI spec
    pub fn get(&self, name: &str) -> ModelSpec {
        self.models
            .get(name)
            .or_else(|| self.models.get(FALLBACK_MODEL))
            .cloned()
            .unwrap_or_else(|| ModelSpec::new(ProviderKind::OpenAi, 0.0))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Cost of a request; input and output tokens share one price
    pub fn cost_for_tokens(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.get(model).cost(input_tokens + output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(
            catalog.names(),
            vec!["claude-3-opus", "claude-3-sonnet", "gpt-3.5-turbo", "gpt-4"]
        );

        let gpt4 = catalog.lookup("gpt-4").unwrap();
        assert_eq!(gpt4.provider, ProviderKind::OpenAi);
        assert_eq!(gpt4.max_tokens, 8192);
        assert_eq!(gpt4.cost_per_1k_tokens, 0.03);

        let sonnet = catalog.lookup("claude-3-sonnet").unwrap();
        assert_eq!(sonnet.provider, ProviderKind::Anthropic);
        assert_eq!(sonnet.cost_per_1k_tokens, 0.003);
    }

    #[test]
    fn test_unknown_model_falls_back_to_gpt4() {
        let catalog = ModelCatalog::builtin();
        assert!(catalog.lookup("integration-test").is_none());
        assert_eq!(catalog.get("integration-test").cost_per_1k_tokens, 0.03);

        let empty = ModelCatalog::empty();
        assert_eq!(empty.get("anything").cost_per_1k_tokens, 0.0);
    }

    #[test]
    fn test_cost_calculation() {
        let catalog = ModelCatalog::builtin();
        let gpt4 = catalog.cost_for_tokens("gpt-4", 100, 50);
        assert!((gpt4 - 0.0045).abs() < 1e-12);

        let gpt35 = catalog.cost_for_tokens("gpt-3.5-turbo", 100, 50);
        let sonnet = catalog.cost_for_tokens("claude-3-sonnet", 100, 50);
        assert!(gpt35 < sonnet && sonnet < gpt4);

        assert_eq!(catalog.cost_for_tokens("gpt-4", 0, 0), 0.0);
    }

    #[test]
    fn test_spec_validation() {
        let mut spec = ModelSpec::new(ProviderKind::OpenAi, 0.01);
        assert!(spec.validate().is_ok());

        spec.max_tokens = 0;
        assert!(spec.validate().is_err());

        spec.max_tokens = 1024;
        spec.temperature = 2.5;
        assert!(spec.validate().is_err());

        spec.temperature = 0.2;
        spec.cost_per_1k_tokens = -1.0;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_custom_entries() {
        let mut catalog = ModelCatalog::builtin();
        catalog.insert(
            "local-llama",
            ModelSpec::new(ProviderKind::OpenAi, 0.0)
                .with_max_tokens(2048)
                .with_temperature(0.2),
        );
        let spec = catalog.lookup("local-llama").unwrap();
        assert_eq!(spec.max_tokens, 2048);
        assert_eq!(spec.temperature, 0.2);
        assert_eq!(catalog.cost_for_tokens("local-llama", 1000, 1000), 0.0);
    }

    #[test]
    fn test_serialization() {
        let catalog = ModelCatalog::builtin();
        let json = serde_json::to_string(&catalog).unwrap();
        let deserialized: ModelCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.lookup("gpt-4"), catalog.lookup("gpt-4"));
    }
}
