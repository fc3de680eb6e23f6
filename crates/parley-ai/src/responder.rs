use async_trait::async_trait;

use parley_core::errors::GenerationError;
use parley_core::session::ChatTurn;

/// The external AI responder collaborator.
///
/// Opaque beyond this signature: latency and failure modes are outside the
/// hub's control and must be treated as unbounded. The orchestrator wraps
/// every call with a timeout (`BoundedResponder`).
#[async_trait]
pub trait Responder: Send + Sync {
    fn name(&self) -> &str;

    /// Generate a reply to the given ordered context window.
    async fn generate_reply(&self, turns: &[ChatTurn]) -> Result<String, GenerationError>;

    /// Generate the opening message for a freshly created session.
    async fn generate_greeting(&self) -> Result<String, GenerationError>;
}

/// Responder used when no upstream is configured. Every call fails, which
/// the orchestrator turns into its fixed fallback message.
pub struct DisabledResponder;

#[async_trait]
impl Responder for DisabledResponder {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate_reply(&self, _turns: &[ChatTurn]) -> Result<String, GenerationError> {
        Err(GenerationError::Upstream("no responder configured".into()))
    }

    async fn generate_greeting(&self) -> Result<String, GenerationError> {
        Err(GenerationError::Upstream("no responder configured".into()))
    }
}
