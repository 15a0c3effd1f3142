//! Token-bounded prompt assembly with rolling summaries.
//!
//! History after the latest summary's anchor is read in id order and
//! filtered. When the raw history is too long or the assembled prompt is
//! over the model budget, everything but the protected tail is summarized
//! and the build restarts once from the new summary.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use parley_core::context::PromptContext;
use parley_core::ids::{MessageId, SessionId};
use parley_core::messages::{ChatMessage, PromptEntry, Progress};
use parley_core::provider::LanguageModel;
use parley_core::settings::ContextSettings;
use parley_core::store::{MessageStore, Paging, SummaryStore};

use crate::error::EngineError;
use crate::prompts::{append_summary, is_error_message};
use crate::summarizer::Summarizer;

/// At or below this many entries compaction cannot make progress.
const MIN_COMPACTABLE_ENTRIES: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextConfig {
    pub max_history_messages: usize,
    pub protected_tail: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_history_messages: 20, protected_tail: 3 }
    }
}

impl From<&ContextSettings> for ContextConfig {
    fn from(s: &ContextSettings) -> Self {
        Self {
            max_history_messages: s.max_history_messages,
            protected_tail: s.protected_tail.max(1),
        }
    }
}

/// Where history stops relative to the message being answered. Ids compare
/// lexically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryMode {
    /// Stop after the candidate: history may include it.
    Generate,
    /// Stop at the candidate: history never includes it.
    Regenerate,
}

impl HistoryMode {
    pub fn excludes(&self, history_id: &MessageId, candidate_id: &MessageId) -> bool {
        match self {
            Self::Generate => history_id > candidate_id,
            Self::Regenerate => history_id >= candidate_id,
        }
    }
}

enum Assembly {
    Context(PromptContext),
    Summarized,
}

pub struct ContextBuilder {
    messages: Arc<dyn MessageStore>,
    summaries: Arc<dyn SummaryStore>,
    model: Arc<dyn LanguageModel>,
    summarizer: Summarizer,
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        summaries: Arc<dyn SummaryStore>,
        model: Arc<dyn LanguageModel>,
        summarizer: Summarizer,
        config: ContextConfig,
    ) -> Self {
        Self { messages, summaries, model, summarizer, config }
    }

    /// Prompt context for answering `candidate`, compacting history first
    /// when needed.
    #[instrument(skip(self, candidate, base_prompt), fields(session_id = %candidate.session_id, msg_id = %candidate.id))]
    pub async fn build(
        &self,
        candidate: &ChatMessage,
        base_prompt: &str,
        mode: HistoryMode,
    ) -> Result<PromptContext, EngineError> {
        match self.assemble(candidate, base_prompt, mode, false).await? {
            Assembly::Context(ctx) => Ok(ctx),
            // Only produced in summary-only mode.
            Assembly::Summarized => Err(EngineError::ContextBudgetExhausted {
                session_id: candidate.session_id.clone(),
            }),
        }
    }

    /// Compact the session if it needs it, without producing a context.
    /// Returns whether a new summary was written.
    #[instrument(skip(self, candidate, base_prompt), fields(session_id = %candidate.session_id, msg_id = %candidate.id))]
    pub async fn refresh_summary(
        &self,
        candidate: &ChatMessage,
        base_prompt: &str,
    ) -> Result<bool, EngineError> {
        let assembly = self.assemble(candidate, base_prompt, HistoryMode::Generate, true).await?;
        Ok(matches!(assembly, Assembly::Summarized))
    }

    async fn assemble(
        &self,
        candidate: &ChatMessage,
        base_prompt: &str,
        mode: HistoryMode,
        summary_only: bool,
    ) -> Result<Assembly, EngineError> {
        let session_id = &candidate.session_id;

        for attempt in 0..2 {
            let retried = attempt > 0;
            let summary = self.summaries.latest_summary(session_id).await?;

            let system = match &summary {
                Some(s) => append_summary(base_prompt, &s.content),
                None => base_prompt.to_string(),
            };
            let mut entries = Vec::new();
            if !system.is_empty() {
                entries.push(PromptEntry::system(system));
            }
            let history_start = entries.len();

            let history = self
                .messages
                .list_session_messages(session_id, summary.as_ref().map(|s| &s.anchor_id), Paging::All)
                .await?;

            let mut survivors: Vec<&MessageId> = Vec::new();
            let mut includes_anchor = false;
            for msg in &history {
                if mode.excludes(&msg.id, &candidate.id) {
                    break;
                }
                if msg.id == candidate.id {
                    entries.push(PromptEntry::new(msg.role, candidate.message.clone()));
                    includes_anchor = true;
                } else if msg.progress == Progress::Complete && !is_error_message(&msg.message) {
                    entries.push(PromptEntry::new(msg.role, msg.message.clone()));
                } else {
                    continue;
                }
                survivors.push(&msg.id);
            }

            // A candidate missing from history is appended on send and
            // counts against the same budget.
            let over_budget = if includes_anchor {
                self.model.is_over_token_budget(&entries)
            } else {
                let mut outbound = entries.clone();
                outbound.push(PromptEntry::new(candidate.role, candidate.message.clone()));
                self.model.is_over_token_budget(&outbound)
            };
            debug!(
                attempt,
                raw = history.len(),
                survivors = survivors.len(),
                entries = entries.len(),
                over_budget,
                has_summary = summary.is_some(),
                "context assembled"
            );

            if history.len() <= self.config.max_history_messages && !over_budget {
                return Ok(Assembly::Context(PromptContext {
                    session_id: session_id.clone(),
                    anchor_id: candidate.id.clone(),
                    base_prompt: base_prompt.to_string(),
                    entries,
                    includes_anchor,
                }));
            }

            if entries.len() <= MIN_COMPACTABLE_ENTRIES || retried {
                warn!(session_id = %session_id, msg_id = %candidate.id, "context budget exhausted after compaction");
                return Err(EngineError::ContextBudgetExhausted { session_id: session_id.clone() });
            }

            let cut = if survivors.len() >= self.config.protected_tail {
                self.config.protected_tail
            } else {
                1
            };
            // The newest survivor before the protected tail.
            let Some(anchor_id) = survivors
                .len()
                .checked_sub(cut + 1)
                .map(|idx| survivors[idx].clone())
            else {
                return self.nothing_to_summarize(session_id, candidate, base_prompt, entries, includes_anchor, over_budget);
            };

            let mut input = entries[..entries.len() - cut].to_vec();
            while self.model.is_over_token_budget(&input) && input.len() > history_start {
                let _ = input.remove(history_start);
            }
            if input.len() == history_start {
                return self.nothing_to_summarize(session_id, candidate, base_prompt, entries, includes_anchor, over_budget);
            }

            let _ = self.summarizer.summarize(session_id, &anchor_id, input).await?;
            if summary_only {
                return Ok(Assembly::Summarized);
            }
        }

        Err(EngineError::ContextBudgetExhausted { session_id: session_id.clone() })
    }

    fn nothing_to_summarize(
        &self,
        session_id: &SessionId,
        candidate: &ChatMessage,
        base_prompt: &str,
        entries: Vec<PromptEntry>,
        includes_anchor: bool,
        over_budget: bool,
    ) -> Result<Assembly, EngineError> {
        if over_budget {
            warn!(session_id = %session_id, msg_id = %candidate.id, "no history left to summarize");
            return Err(EngineError::ContextBudgetExhausted { session_id: session_id.clone() });
        }
        Ok(Assembly::Context(PromptContext {
            session_id: session_id.clone(),
            anchor_id: candidate.id.clone(),
            base_prompt: base_prompt.to_string(),
            entries,
            includes_anchor,
        }))
    }
}
