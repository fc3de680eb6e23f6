pub mod auth;
pub mod errors;
pub mod ids;
pub mod protocol;
pub mod session;

pub use errors::{GenerationError, HubError};
pub use ids::{ConnectionId, MessageId, SessionId, UserId};
pub use protocol::{ClientEvent, ServerEvent};
pub use session::{ChatRole, ChatTurn, Message, Participant, SessionSnapshot};
