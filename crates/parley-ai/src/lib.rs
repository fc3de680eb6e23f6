pub mod bounded;
pub mod mock;
pub mod openai;
pub mod responder;

pub use bounded::BoundedResponder;
pub use mock::{MockReply, MockResponder};
pub use openai::OpenAiResponder;
pub use responder::{DisabledResponder, Responder};
