use std::net::IpAddr;
use std::time::Duration;

/// Failure of the external AI responder. Recovered locally by the turn
/// orchestrator; never surfaced to participants as a raw error.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("responder upstream error: {0}")]
    Upstream(String),
    #[error("responder timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed responder output: {0}")]
    InvalidResponse(String),
}

/// Error taxonomy for hub operations.
///
/// None of these are process-fatal: the worst outcome is a single connection
/// being closed by the admission gate or the reaper.
#[derive(Clone, Debug, thiserror::Error)]
pub enum HubError {
    /// Missing or invalid credential. The connection stays usable for retry.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Per-address connection ceiling reached. The transport must be closed
    /// before any session state is created.
    #[error("connection limit reached for {addr}")]
    AdmissionRejected { addr: IpAddr },

    /// Session missing, inactive, or mismatched for the attempted action.
    /// Surfaced to the sender only, never broadcast.
    #[error("session state: {0}")]
    SessionState(String),

    /// A non-host attempted a host-only action. Surfaced to the sender only.
    #[error("not authorized: {0}")]
    Authorization(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// A single recipient's transport was unreachable during fan-out.
    /// Logged and skipped; never aborts delivery to the rest.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl HubError {
    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::AdmissionRejected { .. } => "admission_rejected",
            Self::SessionState(_) => "session_state",
            Self::Authorization(_) => "authorization",
            Self::Generation(_) => "generation",
            Self::Delivery(_) => "delivery",
        }
    }

    /// Whether this error should be answered to the sender as a wire
    /// `error` event (as opposed to being recovered internally).
    pub fn is_client_visible(&self) -> bool {
        !matches!(self, Self::Generation(_) | Self::Delivery(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings() {
        assert_eq!(HubError::Auth("no token".into()).kind(), "auth");
        assert_eq!(
            HubError::AdmissionRejected { addr: "10.0.0.1".parse().unwrap() }.kind(),
            "admission_rejected"
        );
        assert_eq!(HubError::SessionState("gone".into()).kind(), "session_state");
        assert_eq!(HubError::Authorization("not host".into()).kind(), "authorization");
        assert_eq!(HubError::Delivery("closed".into()).kind(), "delivery");
    }

    #[test]
    fn generation_errors_are_internal() {
        let e: HubError = GenerationError::Timeout(Duration::from_secs(60)).into();
        assert_eq!(e.kind(), "generation");
        assert!(!e.is_client_visible());

        assert!(HubError::Auth("bad".into()).is_client_visible());
        assert!(HubError::SessionState("missing".into()).is_client_visible());
    }

    #[test]
    fn display_messages() {
        let e = HubError::Authorization("only the host can end the session".into());
        assert!(e.to_string().contains("not authorized"));

        let g = GenerationError::Upstream("503".into());
        assert!(g.to_string().contains("upstream"));
    }
}
