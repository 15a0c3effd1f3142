use async_trait::async_trait;

use crate::errors::LlmError;
use crate::messages::PromptEntry;
use crate::stream::DeltaStream;

/// A request to the language model: ordered entries plus an optional
/// instruction the client sends as its system prompt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelRequest {
    pub instruction: Option<String>,
    pub entries: Vec<PromptEntry>,
}

impl ModelRequest {
    pub fn new(entries: Vec<PromptEntry>) -> Self {
        Self { instruction: None, entries }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

/// Generative-language backend. The wire protocol is the implementor's concern.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Blocking completion. Returns every text candidate the backend produced.
    async fn query(&self, request: &ModelRequest) -> Result<Vec<String>, LlmError>;

    /// Streaming completion. Dropping the stream cancels the request.
    async fn query_stream(&self, request: &ModelRequest) -> Result<DeltaStream, LlmError>;

    /// Whether `entries` would exceed the model's prompt budget.
    fn is_over_token_budget(&self, entries: &[PromptEntry]) -> bool;
}
