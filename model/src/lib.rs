pub mod catalog;
pub mod judge;
pub mod provider;
pub mod registry;
pub mod tokenizer;
pub mod tracking;
pub mod types;

pub use catalog::{ModelCatalog, ModelSpec, FALLBACK_MODEL};
pub use judge::{accuracy_score, KeywordJudge, ResponseJudge};
pub use provider::{ModelError, ModelProvider, ModelResult, ProviderKind, SimulatedProvider};
pub use registry::{
    track_registration, ModelComparison, ModelMetadata, ModelRegistry, ModelStatus, ModelSummary,
    RegistryError, RegistryResult, LATEST,
};
pub use tokenizer::{ApproxTokenizer, TokenCounter};
pub use tracking::{ExperimentTracker, MlflowTracker, NoopTracker};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, MessageRole, Usage};

pub mod prelude {
    pub use crate::catalog::*;
    pub use crate::judge::*;
    pub use crate::provider::*;
    pub use crate::registry::*;
    pub use crate::tokenizer::*;
    pub use crate::tracking::*;
    pub use crate::types::*;
}
