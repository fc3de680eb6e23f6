//! Real-time session and broadcast engine.
//!
//! The hub owns every piece of live state: connections, sessions, the
//! per-address admission gate, and the per-session AI turn queues. All state
//! is in-memory and process-local; the SQLite archive is a best-effort side
//! channel.

pub mod admission;
pub mod broadcast;
pub mod connections;
pub mod hub;
pub mod orchestrator;
pub mod reaper;
pub mod sessions;

pub use admission::AdmissionGate;
pub use broadcast::Broadcaster;
pub use connections::{Connection, ConnectionRegistry};
pub use hub::{Hub, HubConfig};
pub use orchestrator::{TurnJob, TurnOrchestrator};
pub use reaper::spawn_reaper;
pub use sessions::{Disposition, JoinOptions, LeaveOutcome, SessionRegistry};
