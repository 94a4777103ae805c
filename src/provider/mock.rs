//! Scripted provider adapter for tests.
//!
//! Replies are queued ahead of time and popped one per attempt; every
//! received (system, user) prompt pair is recorded so tests can assert on
//! exactly what the engine sent. The retry loop is the same one the real
//! adapters use, so rate-limit scripting exercises genuine backoff.

use super::adapter::{ProviderAdapter, ProviderKind, ProviderResponse};
use super::error::ProviderError;
use super::retry::{run_with_backoff, Backoff};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const MOCK_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Error(ProviderError),
}

pub struct MockAdapter {
    replies: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<(String, String)>>,
    calls: AtomicUsize,
    kind: ProviderKind,
    model: String,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::with_kind(ProviderKind::Gemini)
    }

    pub fn with_kind(kind: ProviderKind) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            kind,
            model: "mock-model".to_string(),
        }
    }

    pub fn push(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.push(MockReply::Text(content.into()));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.push(MockReply::Error(error));
    }

    pub fn push_rate_limited(&self) {
        self.push(MockReply::Error(ProviderError::RateLimited(
            "rate limit exceeded".into(),
        )));
    }

    /// Number of raw attempts made, retries included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    /// Every (system, user) prompt pair received, in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Result<String, ProviderError> {
        let reply = self.replies.lock().unwrap().pop_front().ok_or_else(|| {
            ProviderError::InvalidResponse("no scripted replies left in queue".into())
        })?;
        match reply {
            MockReply::Text(content) => Ok(content),
            MockReply::Error(error) => Err(error),
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    async fn analyze(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_retries: u32,
    ) -> Result<ProviderResponse, ProviderError> {
        let backoff = Backoff::Fixed(Duration::from_secs(MOCK_BACKOFF_SECS));
        let content = run_with_backoff(max_retries, backoff, || {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            let reply = self.next_reply();
            async move { reply }
        })
        .await?;

        Ok(ProviderResponse {
            content,
            provider: self.kind,
            model: self.model.clone(),
            usage: None,
        })
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn replies_pop_in_order() {
        let adapter = MockAdapter::new();
        adapter.push_text("first");
        adapter.push_text("second");

        let r1 = adapter.analyze("s", "u", 0).await.unwrap();
        let r2 = adapter.analyze("s", "u", 0).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
        assert_eq!(adapter.remaining(), 0);
    }

    #[tokio::test]
    async fn empty_queue_is_an_error() {
        let adapter = MockAdapter::new();
        assert!(adapter.analyze("s", "u", 0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_retry_with_observable_sleeps() {
        let adapter = MockAdapter::new();
        adapter.push_rate_limited();
        adapter.push_rate_limited();
        adapter.push_text(r#"{"1": "bicycle_theft_outdoor"}"#);

        let start = Instant::now();
        let response = adapter.analyze("sys", "user", 5).await.unwrap();

        assert_eq!(response.content, r#"{"1": "bicycle_theft_outdoor"}"#);
        assert_eq!(adapter.calls(), 3);
        assert_eq!(
            start.elapsed(),
            Duration::from_secs(2 * MOCK_BACKOFF_SECS),
            "exactly two backoff sleeps"
        );
    }

    #[tokio::test]
    async fn terminal_errors_pass_through() {
        let adapter = MockAdapter::new();
        adapter.push_error(ProviderError::Blocked("safety".into()));
        let result = adapter.analyze("s", "u", 5).await;
        assert!(matches!(result, Err(ProviderError::Blocked(_))));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn prompts_are_recorded() {
        let adapter = MockAdapter::new();
        adapter.push_text("x");
        adapter.analyze("system here", "user here", 0).await.unwrap();
        let prompts = adapter.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0, "system here");
        assert_eq!(prompts[0].1, "user here");
    }
}
