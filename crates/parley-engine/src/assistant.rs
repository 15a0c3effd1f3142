use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use parley_core::events::Notifier;
use parley_core::ids::SessionId;
use parley_core::messages::{ChatMessage, MessageExt};
use parley_core::provider::LanguageModel;
use parley_core::settings::ParleySettings;
use parley_core::store::{MessageStore, Sequencer, SummaryStore};

use crate::context::{ContextBuilder, ContextConfig, HistoryMode};
use crate::error::EngineError;
use crate::summarizer::Summarizer;
use crate::turn::{TurnConfig, TurnOrchestrator, TurnOutcome};

/// External collaborators the engine runs against.
#[derive(Clone)]
pub struct EngineDeps {
    pub messages: Arc<dyn MessageStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub sequencer: Arc<dyn Sequencer>,
    pub model: Arc<dyn LanguageModel>,
    pub notifier: Arc<dyn Notifier>,
}

/// Entry point for callers: build the context for a question, then stream
/// the answer into a placeholder created by [`Assistant::init_turn`].
pub struct Assistant {
    messages: Arc<dyn MessageStore>,
    context: ContextBuilder,
    turns: TurnOrchestrator,
}

impl Assistant {
    pub fn new(deps: EngineDeps, settings: &ParleySettings) -> Self {
        let summarizer = Summarizer::new(
            deps.model.clone(),
            deps.summaries.clone(),
            settings.context.summary_prompt.clone(),
        );
        let context = ContextBuilder::new(
            deps.messages.clone(),
            deps.summaries,
            deps.model.clone(),
            summarizer,
            ContextConfig::from(&settings.context),
        );
        let turns = TurnOrchestrator::new(
            deps.messages.clone(),
            deps.sequencer,
            deps.model,
            deps.notifier,
            TurnConfig::from(&settings.turn),
        );
        Self { messages: deps.messages, context, turns }
    }

    pub async fn init_turn(
        &self,
        question: &ChatMessage,
        ext: MessageExt,
    ) -> Result<ChatMessage, EngineError> {
        self.turns.init_turn(question, ext).await
    }

    /// Answer `question` with history up to and including it.
    pub async fn respond(
        &self,
        question: &ChatMessage,
        answer: &ChatMessage,
        base_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        self.answer(question, answer, base_prompt, HistoryMode::Generate, cancel).await
    }

    /// Answer `question` again, with history strictly before it.
    pub async fn regenerate(
        &self,
        question: &ChatMessage,
        answer: &ChatMessage,
        base_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        self.answer(question, answer, base_prompt, HistoryMode::Regenerate, cancel).await
    }

    async fn answer(
        &self,
        question: &ChatMessage,
        answer: &ChatMessage,
        base_prompt: &str,
        mode: HistoryMode,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let ctx = match self.context.build(question, base_prompt, mode).await {
            Ok(ctx) => ctx,
            Err(err) => {
                self.turns.abort_turn(answer, &err).await;
                return Err(err);
            }
        };
        self.turns.run_turn(&ctx, question, answer, cancel).await
    }

    /// Compact the session's history ahead of the next turn. Returns whether
    /// a summary was written.
    #[instrument(skip(self, base_prompt), fields(session_id = %session_id))]
    pub async fn refresh_summary(
        &self,
        session_id: &SessionId,
        base_prompt: &str,
    ) -> Result<bool, EngineError> {
        let Some(latest) = self.messages.latest_message(session_id).await? else {
            return Ok(false);
        };
        let written = self.context.refresh_summary(&latest, base_prompt).await?;
        if written {
            info!("session history compacted");
        }
        Ok(written)
    }
}
