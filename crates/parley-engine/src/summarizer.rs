use std::sync::Arc;

use tracing::{debug, instrument, warn};

use parley_core::ids::{MessageId, SessionId};
use parley_core::messages::{ChatSummary, PromptEntry};
use parley_core::provider::{LanguageModel, ModelRequest};
use parley_core::store::SummaryStore;

use crate::error::EngineError;
use crate::prompts::DEFAULT_SUMMARY_PROMPT;

/// Compresses a window of prompt entries into one persisted summary.
pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    summaries: Arc<dyn SummaryStore>,
    instruction: String,
}

impl Summarizer {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        summaries: Arc<dyn SummaryStore>,
        instruction: Option<String>,
    ) -> Self {
        let instruction = instruction
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SUMMARY_PROMPT.to_string());
        Self { model, summaries, instruction }
    }

    #[instrument(skip(self, entries), fields(session_id = %session_id, anchor_id = %anchor_id, entries = entries.len()))]
    pub async fn summarize(
        &self,
        session_id: &SessionId,
        anchor_id: &MessageId,
        entries: Vec<PromptEntry>,
    ) -> Result<ChatSummary, EngineError> {
        let request = ModelRequest::new(entries).with_instruction(self.instruction.clone());
        let mut texts = self.model.query(&request).await?;
        if texts.len() > 1 {
            warn!(candidates = texts.len(), "summary query returned multiple candidates, keeping the first");
        }
        if texts.is_empty() {
            return Err(EngineError::EmptySummary);
        }
        let content = texts.swap_remove(0);

        let summary = ChatSummary::new(session_id.clone(), anchor_id.clone(), content);
        self.summaries.create_summary(&summary).await?;
        debug!(summary_id = %summary.id, chars = summary.content.chars().count(), "summary persisted");
        Ok(summary)
    }
}
