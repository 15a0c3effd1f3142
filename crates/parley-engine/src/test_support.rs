//! Recording store and notifier wrappers sharing one ordered log, so tests
//! can assert how persistence and notification interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use parley_core::errors::{NotifyError, StoreError};
use parley_core::events::{Notifier, Topic, TurnEvent};
use parley_core::ids::{MessageId, SessionId, SpaceId, UserId};
use parley_core::messages::{ChatMessage, MessageExt, Progress};
use parley_core::store::{MessageStore, Paging};
use parley_llm::MockModel;
use parley_store::{Database, MessageRepo, SequenceRepo, SummaryRepo};

use crate::assistant::EngineDeps;
use crate::turn::{TurnConfig, TurnOrchestrator};

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

pub(crate) const SESSION: &str = "sess_a";
pub(crate) const SPACE: &str = "space_a";

pub(crate) struct RecordingStore {
    inner: MessageRepo,
    log: Log,
}

impl RecordingStore {
    fn record(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn create(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.inner.create(message).await?;
        self.record(format!("store:create:{}", message.id));
        Ok(())
    }

    async fn create_with_ext(&self, message: &ChatMessage, ext: &MessageExt) -> Result<(), StoreError> {
        self.inner.create_with_ext(message, ext).await?;
        self.record(format!("store:create_with_ext:{}", message.progress));
        Ok(())
    }

    async fn append(&self, id: &MessageId, text: &str, progress: Progress) -> Result<(), StoreError> {
        self.inner.append(id, text, progress).await?;
        self.record(format!("store:append:{progress}:{text}"));
        Ok(())
    }

    async fn rewrite(&self, id: &MessageId, text: &str, progress: Progress) -> Result<(), StoreError> {
        self.inner.rewrite(id, text, progress).await?;
        self.record(format!("store:rewrite:{progress}:{text}"));
        Ok(())
    }

    async fn update_progress(&self, id: &MessageId, progress: Progress) -> Result<(), StoreError> {
        self.inner.update_progress(id, progress).await?;
        self.record(format!("store:update_progress:{progress}"));
        Ok(())
    }

    async fn delete(&self, id: &MessageId) -> Result<(), StoreError> {
        self.inner.delete(id).await?;
        self.record("store:delete".to_string());
        Ok(())
    }

    async fn get(&self, id: &MessageId) -> Result<Option<ChatMessage>, StoreError> {
        self.inner.get(id).await
    }

    async fn list_session_messages(
        &self,
        session_id: &SessionId,
        after: Option<&MessageId>,
        paging: Paging,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.inner.list_session_messages(session_id, after, paging).await
    }

    async fn latest_message(&self, session_id: &SessionId) -> Result<Option<ChatMessage>, StoreError> {
        self.inner.latest_message(session_id).await
    }
}

pub(crate) struct RecordingNotifier {
    log: Log,
    events: Mutex<Vec<TurnEvent>>,
    fail: AtomicBool,
    fail_kind: Mutex<Option<&'static str>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<TurnEvent> {
        self.events.lock().clone()
    }

    /// Every later publish returns `Closed`.
    pub(crate) fn fail_from_now(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Publishes of events named `kind` return `Closed`, others go through.
    pub(crate) fn fail_on(&self, kind: &'static str) {
        *self.fail_kind.lock() = Some(kind);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, topic: &Topic, event: &TurnEvent) -> Result<(), NotifyError> {
        let rejected = *self.fail_kind.lock() == Some(event.kind());
        if rejected || self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Closed(format!("{topic} unavailable")));
        }
        self.log.lock().push(format!("notify:{}:{}", event.kind(), event.progress()));
        self.events.lock().push(event.clone());
        Ok(())
    }
}

pub(crate) struct Harness {
    pub repo: Arc<MessageRepo>,
    pub summaries: Arc<SummaryRepo>,
    pub sequencer: Arc<SequenceRepo>,
    pub store: Arc<RecordingStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub model: Arc<MockModel>,
    log: Log,
}

impl Harness {
    pub(crate) fn new(model: MockModel) -> Self {
        let db = Database::in_memory().unwrap();
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        Self {
            repo: Arc::new(MessageRepo::new(db.clone())),
            summaries: Arc::new(SummaryRepo::new(db.clone())),
            sequencer: Arc::new(SequenceRepo::new(db.clone())),
            store: Arc::new(RecordingStore { inner: MessageRepo::new(db.clone()), log: log.clone() }),
            notifier: Arc::new(RecordingNotifier {
                log: log.clone(),
                events: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                fail_kind: Mutex::new(None),
            }),
            model: Arc::new(model),
            log,
        }
    }

    pub(crate) fn orchestrator(&self, config: TurnConfig) -> TurnOrchestrator {
        TurnOrchestrator::new(
            self.store.clone(),
            self.sequencer.clone(),
            self.model.clone(),
            self.notifier.clone(),
            config,
        )
    }

    pub(crate) fn deps(&self) -> EngineDeps {
        EngineDeps {
            messages: self.store.clone(),
            summaries: self.summaries.clone(),
            sequencer: self.sequencer.clone(),
            model: self.model.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Persist a completed user message with a fresh sequence number.
    pub(crate) async fn seed_question(&self, text: &str) -> ChatMessage {
        use parley_core::store::Sequencer;
        let seq = self
            .sequencer
            .next_sequence(&SpaceId::from_raw(SPACE), &SessionId::from_raw(SESSION))
            .await
            .unwrap();
        let q = question(seq, text);
        self.repo.create(&q).await.unwrap();
        q
    }

    /// Drain the shared log.
    pub(crate) fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}

pub(crate) fn question(seq: i64, text: &str) -> ChatMessage {
    ChatMessage::user_text(
        MessageId::from_raw(format!("msg_{seq:04}")),
        SpaceId::from_raw(SPACE),
        SessionId::from_raw(SESSION),
        UserId::from_raw("user_a"),
        seq,
        text,
    )
}

pub(crate) fn ext_for(q: &ChatMessage) -> MessageExt {
    MessageExt::new(q.session_id.clone(), q.space_id.clone())
}
