use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use parley_core::errors::LlmError;
use parley_core::messages::PromptEntry;
use parley_core::provider::{LanguageModel, ModelRequest};
use parley_core::stream::{DeltaStream, StreamDelta};

use crate::budget::TokenBudget;

/// Pre-programmed streaming responses for deterministic testing.
pub enum MockStream {
    /// Yield these items, then close.
    Items(Vec<Result<StreamDelta, LlmError>>),
    /// Yield these deltas, then never yield again.
    Pending(Vec<StreamDelta>),
    /// Fail the `query_stream` call itself.
    Error(LlmError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockStream>),
}

impl MockStream {
    /// One delta per chunk followed by a `"stop"` finish.
    pub fn text_chunks(chunks: &[&str]) -> Self {
        let mut items: Vec<_> = chunks.iter().map(|c| Ok(StreamDelta::text(*c))).collect();
        items.push(Ok(StreamDelta::stop()));
        Self::Items(items)
    }

    pub fn empty() -> Self {
        Self::Items(vec![Ok(StreamDelta::stop())])
    }

    pub fn delayed(delay: Duration, inner: MockStream) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Pre-programmed blocking responses.
pub enum MockQuery {
    Texts(Vec<String>),
    Error(LlmError),
}

impl MockQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Texts(vec![text.into()])
    }
}

/// Language model that replays scripted responses in order and records
/// every request it receives.
pub struct MockModel {
    streams: Mutex<VecDeque<MockStream>>,
    queries: Mutex<VecDeque<MockQuery>>,
    requests: Mutex<Vec<ModelRequest>>,
    stream_calls: AtomicUsize,
    query_calls: AtomicUsize,
    budget: Option<TokenBudget>,
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            queries: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            stream_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            budget: None,
        }
    }

    pub fn with_streams(self, streams: Vec<MockStream>) -> Self {
        self.streams.lock().extend(streams);
        self
    }

    pub fn with_queries(self, queries: Vec<MockQuery>) -> Self {
        self.queries.lock().extend(queries);
        self
    }

    /// Without a budget the model never reports an overflow.
    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::Relaxed)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn query(&self, request: &ModelRequest) -> Result<Vec<String>, LlmError> {
        let idx = self.query_calls.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());
        let next = self.queries.lock().pop_front();
        match next {
            Some(MockQuery::Texts(texts)) => Ok(texts),
            Some(MockQuery::Error(e)) => Err(e),
            None => Err(LlmError::InvalidRequest(format!(
                "MockModel: no query response configured for call {idx}"
            ))),
        }
    }

    async fn query_stream(&self, request: &ModelRequest) -> Result<DeltaStream, LlmError> {
        let idx = self.stream_calls.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());
        let next = self.streams.lock().pop_front();
        let mut current = next.ok_or_else(|| {
            LlmError::InvalidRequest(format!(
                "MockModel: no stream response configured for call {idx}"
            ))
        })?;
        // Nested delays are unrolled instead of recursing.
        loop {
            match current {
                MockStream::Items(items) => return Ok(Box::pin(stream::iter(items))),
                MockStream::Pending(deltas) => {
                    let head = stream::iter(deltas.into_iter().map(Ok::<_, LlmError>));
                    return Ok(Box::pin(head.chain(stream::pending())));
                }
                MockStream::Error(e) => return Err(e),
                MockStream::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }

    fn is_over_token_budget(&self, entries: &[PromptEntry]) -> bool {
        self.budget.is_some_and(|b| b.is_over(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut stream: DeltaStream) -> Vec<Result<StreamDelta, LlmError>> {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn text_chunks_then_stop() {
        let mock = MockModel::new().with_streams(vec![MockStream::text_chunks(&["hello", " world"])]);
        let items = collect(mock.query_stream(&ModelRequest::default()).await.unwrap()).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().text, "hello");
        assert_eq!(items[1].as_ref().unwrap().text, " world");
        assert_eq!(items[2].as_ref().unwrap().finish_reason.as_deref(), Some("stop"));
        assert_eq!(mock.stream_calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_streams_error() {
        let mock = MockModel::new().with_streams(vec![MockStream::empty()]);
        assert!(mock.query_stream(&ModelRequest::default()).await.is_ok());
        assert!(matches!(
            mock.query_stream(&ModelRequest::default()).await,
            Err(LlmError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn scripted_queries_in_order() {
        let mock = MockModel::new().with_queries(vec![
            MockQuery::text("first"),
            MockQuery::Error(LlmError::NetworkError("down".into())),
        ]);
        assert_eq!(mock.query(&ModelRequest::default()).await.unwrap(), vec!["first"]);
        assert!(mock.query(&ModelRequest::default()).await.is_err());
        assert!(mock.query(&ModelRequest::default()).await.is_err());
        assert_eq!(mock.query_calls(), 3);
    }

    #[tokio::test]
    async fn records_requests() {
        let mock = MockModel::new().with_queries(vec![MockQuery::text("ok")]);
        let req = ModelRequest::new(vec![PromptEntry::user("hi")]).with_instruction("sum");
        mock.query(&req).await.unwrap();
        assert_eq!(mock.requests(), vec![req]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_stream() {
        let mock = MockModel::new().with_streams(vec![MockStream::delayed(
            Duration::from_millis(50),
            MockStream::text_chunks(&["late"]),
        )]);
        let start = tokio::time::Instant::now();
        let stream = mock.query_stream(&ModelRequest::default()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(collect(stream).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_stream_never_closes() {
        let mock = MockModel::new().with_streams(vec![MockStream::Pending(vec![StreamDelta::text("a")])]);
        let mut stream = mock.query_stream(&ModelRequest::default()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().text, "a");
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
        assert!(next.is_err(), "stream should still be open");
    }

    #[test]
    fn budget_is_optional() {
        let entries = vec![PromptEntry::user("x".repeat(1000))];
        assert!(!MockModel::new().is_over_token_budget(&entries));
        let tight = MockModel::new().with_budget(TokenBudget::new(100, 10));
        assert!(tight.is_over_token_budget(&entries));
    }
}
