//! One assistant turn: placeholder, streamed delivery, terminal status.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use parley_core::context::PromptContext;
use parley_core::events::{Notifier, StreamMessage, Topic, TurnEvent};
use parley_core::ids::{MessageId, SessionId};
use parley_core::messages::{ChatMessage, MessageExt, MessageKind, Progress};
use parley_core::provider::{LanguageModel, ModelRequest};
use parley_core::settings::TurnSettings;
use parley_core::store::{MessageStore, Sequencer};
use parley_core::stream::StreamDelta;

use crate::error::EngineError;
use crate::prompts::ASSISTANT_FAILED_MESSAGE;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnConfig {
    /// Upper bound on one whole turn, from opening the stream to the last delta.
    pub deadline: Duration,
    /// Budget for failure finalization, which ignores the caller's cancellation.
    pub finalize_timeout: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self { deadline: Duration::from_secs(180), finalize_timeout: Duration::from_secs(5) }
    }
}

impl From<&TurnSettings> for TurnConfig {
    fn from(s: &TurnSettings) -> Self {
        Self {
            deadline: Duration::from_secs(s.deadline_secs),
            finalize_timeout: Duration::from_secs(s.finalize_timeout_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The answer was stored and marked complete.
    Completed { chars: usize, intercepted: bool },
    /// Upstream produced nothing. The placeholder was deleted.
    Empty,
}

pub struct TurnOrchestrator {
    messages: Arc<dyn MessageStore>,
    sequencer: Arc<dyn Sequencer>,
    model: Arc<dyn LanguageModel>,
    notifier: Arc<dyn Notifier>,
    config: TurnConfig,
}

impl TurnOrchestrator {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        sequencer: Arc<dyn Sequencer>,
        model: Arc<dyn LanguageModel>,
        notifier: Arc<dyn Notifier>,
        config: TurnConfig,
    ) -> Self {
        Self { messages, sequencer, model, notifier, config }
    }

    /// Allocate and persist the assistant placeholder answering `question`,
    /// together with its ext record, then announce it.
    #[instrument(skip_all, fields(session_id = %question.session_id, question_id = %question.id))]
    pub async fn init_turn(
        &self,
        question: &ChatMessage,
        ext: MessageExt,
    ) -> Result<ChatMessage, EngineError> {
        let id = self.sequencer.next_message_id();
        let sequence = self.sequencer.next_sequence(&question.space_id, &question.session_id).await?;
        let placeholder = ChatMessage::assistant_placeholder(question, id, sequence);

        let mut ext = ext;
        ext.message_id = Some(placeholder.id.clone());
        self.messages.create_with_ext(&placeholder, &ext).await?;
        debug!(msg_id = %placeholder.id, sequence, "assistant placeholder created");

        let topic = Topic::for_session(&placeholder.session_id);
        if let Err(e) = self
            .notifier
            .publish(&topic, &TurnEvent::AssistantInit(placeholder.meta()))
            .await
        {
            warn!(msg_id = %placeholder.id, error = %e, "failed to announce assistant turn");
        }
        Ok(placeholder)
    }

    /// Stream the answer to `candidate` into `answer`. On error the message
    /// is finalized as canceled or failed before the error is returned.
    #[instrument(skip_all, fields(session_id = %answer.session_id, msg_id = %answer.id))]
    pub async fn run_turn(
        &self,
        ctx: &PromptContext,
        candidate: &ChatMessage,
        answer: &ChatMessage,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        match self.stream_answer(ctx, candidate, answer, cancel).await {
            Ok(outcome) => {
                debug!(?outcome, "turn finished");
                Ok(outcome)
            }
            Err(err) => {
                self.abort_turn(answer, &err).await;
                Err(err)
            }
        }
    }

    async fn stream_answer(
        &self,
        ctx: &PromptContext,
        candidate: &ChatMessage,
        answer: &ChatMessage,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let request = ModelRequest::new(ctx.outbound(candidate));
        let deadline = tokio::time::sleep(self.config.deadline);
        tokio::pin!(deadline);

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = &mut deadline => return Err(EngineError::DeadlineExceeded(self.config.deadline)),
            opened = self.model.query_stream(&request) => opened?,
        };

        let mut sink = TurnSink::new(self.messages.clone(), self.notifier.clone(), answer);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = &mut deadline => return Err(EngineError::DeadlineExceeded(self.config.deadline)),
                next = stream.next() => next,
            };
            let Some(item) = next else { break };
            let delta = item?;
            if let Some(reason) = delta.abnormal_finish() {
                return Err(EngineError::UpstreamFinish(reason.to_string()));
            }
            sink.on_chunk(delta).await?;
        }
        Ok(sink.on_close().await)
    }

    /// Best-effort terminal write after a failed turn. Runs under its own
    /// timeout and never returns an error.
    #[instrument(skip_all, fields(session_id = %answer.session_id, msg_id = %answer.id, cause = %err))]
    pub async fn abort_turn(&self, answer: &ChatMessage, err: &EngineError) {
        let (text, progress) = if err.is_cancellation() {
            ("", Progress::Canceled)
        } else {
            (ASSISTANT_FAILED_MESSAGE, Progress::Failed)
        };

        let finalize = async {
            if let Err(e) = self.messages.rewrite(&answer.id, text, progress).await {
                error!(error = %e, "failed to persist terminal status");
            }
            let event = TurnEvent::AssistantFailed(StreamMessage {
                message_id: answer.id.clone(),
                session_id: answer.session_id.clone(),
                message: text.to_string(),
                start_at: 0,
                progress,
                kind: MessageKind::Text,
            });
            if let Err(e) = self.notifier.publish(&Topic::for_session(&answer.session_id), &event).await {
                error!(error = %e, "failed to publish terminal status");
            }
        };

        if tokio::time::timeout(self.config.finalize_timeout, finalize).await.is_err() {
            error!(timeout = ?self.config.finalize_timeout, "turn finalization timed out");
        } else {
            debug!(%progress, "turn finalized after error");
        }
    }
}

/// Persists then publishes every delta of one answer.
struct TurnSink {
    messages: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    answer_id: MessageId,
    session_id: SessionId,
    topic: Topic,
    /// Characters delivered to clients so far.
    sent: usize,
    intercepted: bool,
}

impl TurnSink {
    fn new(messages: Arc<dyn MessageStore>, notifier: Arc<dyn Notifier>, answer: &ChatMessage) -> Self {
        Self {
            messages,
            notifier,
            answer_id: answer.id.clone(),
            session_id: answer.session_id.clone(),
            topic: Topic::for_session(&answer.session_id),
            sent: 0,
            intercepted: false,
        }
    }

    fn payload(&self, message: String, start_at: usize, progress: Progress) -> StreamMessage {
        StreamMessage {
            message_id: self.answer_id.clone(),
            session_id: self.session_id.clone(),
            message,
            start_at,
            progress,
            kind: MessageKind::Text,
        }
    }

    async fn on_chunk(&mut self, delta: StreamDelta) -> Result<(), EngineError> {
        if delta.intercepted {
            self.messages.rewrite(&self.answer_id, &delta.text, Progress::Intercepted).await?;
            self.sent = delta.text.chars().count();
            self.intercepted = true;
            warn!(msg_id = %self.answer_id, "answer replaced by moderation");
            let event = TurnEvent::AssistantDone(self.payload(delta.text, 0, Progress::Intercepted));
            self.notifier.publish(&self.topic, &event).await?;
            return Ok(());
        }

        if delta.text.is_empty() {
            return Ok(());
        }
        self.messages.append(&self.answer_id, &delta.text, Progress::Generating).await?;
        let start_at = self.sent;
        self.sent += delta.text.chars().count();
        let event = TurnEvent::AssistantContinue(self.payload(delta.text, start_at, Progress::Generating));
        self.notifier.publish(&self.topic, &event).await?;
        Ok(())
    }

    /// Terminal step of a clean stream. Failures here are logged only: the
    /// answer is already stored and must not be rewritten as failed.
    async fn on_close(self) -> TurnOutcome {
        if self.sent == 0 {
            if let Err(e) = self.messages.delete(&self.answer_id).await {
                error!(msg_id = %self.answer_id, error = %e, "failed to remove empty placeholder");
            }
            warn!(msg_id = %self.answer_id, "upstream produced no content, placeholder removed");
            let event = TurnEvent::AssistantFailed(self.payload(
                ASSISTANT_FAILED_MESSAGE.to_string(),
                0,
                Progress::Failed,
            ));
            if let Err(e) = self.notifier.publish(&self.topic, &event).await {
                error!(msg_id = %self.answer_id, error = %e, "failed to publish empty answer");
            }
            return TurnOutcome::Empty;
        }

        if let Err(e) = self.messages.update_progress(&self.answer_id, Progress::Complete).await {
            error!(msg_id = %self.answer_id, error = %e, "failed to mark answer complete");
        }
        let event = TurnEvent::AssistantDone(self.payload(String::new(), self.sent, Progress::Complete));
        if let Err(e) = self.notifier.publish(&self.topic, &event).await {
            error!(msg_id = %self.answer_id, error = %e, "failed to publish completed answer");
        }
        TurnOutcome::Completed { chars: self.sent, intercepted: self.intercepted }
    }
}
