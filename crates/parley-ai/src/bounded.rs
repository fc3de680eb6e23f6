use std::time::Duration;

use async_trait::async_trait;

use parley_core::errors::GenerationError;
use parley_core::session::ChatTurn;

use crate::responder::Responder;

/// Wraps a responder with a wall-clock bound. An elapsed deadline is
/// reported as `GenerationError::Timeout`, which the orchestrator treats
/// identically to any other generation failure.
pub struct BoundedResponder<R> {
    inner: R,
    timeout: Duration,
}

impl<R: Responder> BoundedResponder<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<R: Responder> Responder for BoundedResponder<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate_reply(&self, turns: &[ChatTurn]) -> Result<String, GenerationError> {
        match tokio::time::timeout(self.timeout, self.inner.generate_reply(turns)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout)),
        }
    }

    async fn generate_greeting(&self) -> Result<String, GenerationError> {
        match tokio::time::timeout(self.timeout, self.inner.generate_greeting()).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout)),
        }
    }
}
