use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use parley_core::errors::GenerationError;
use parley_core::session::ChatTurn;

use crate::responder::Responder;

/// Pre-programmed replies for deterministic testing without API calls.
pub enum MockReply {
    Text(String),
    Error(GenerationError),
    /// Wait a duration, then resolve to the inner reply.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delayed(delay, Box::new(inner))
    }
}

/// Mock responder that consumes replies in order. Both `generate_reply` and
/// `generate_greeting` pull from the same queue.
pub struct MockResponder {
    replies: Mutex<std::vec::IntoIter<MockReply>>,
    call_count: AtomicUsize,
    /// Context windows observed by generate_reply, for assertions.
    seen_contexts: Mutex<Vec<Vec<ChatTurn>>>,
}

impl MockResponder {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter()),
            call_count: AtomicUsize::new(0),
            seen_contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Context windows passed to `generate_reply`, in call order.
    pub fn seen_contexts(&self) -> Vec<Vec<ChatTurn>> {
        self.seen_contexts.lock().unwrap().clone()
    }

    async fn next_reply(&self) -> Result<String, GenerationError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        let reply = self.replies.lock().unwrap().next();
        let Some(reply) = reply else {
            return Err(GenerationError::Upstream(format!(
                "MockResponder: no reply configured for call {idx}"
            )));
        };

        let mut current = reply;
        loop {
            match current {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(e) => return Err(e),
                MockReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    current = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl Responder for MockResponder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_reply(&self, turns: &[ChatTurn]) -> Result<String, GenerationError> {
        self.seen_contexts.lock().unwrap().push(turns.to_vec());
        self.next_reply().await
    }

    async fn generate_greeting(&self) -> Result<String, GenerationError> {
        self.next_reply().await
    }
}
