mod cancel;
mod error;
mod events;
mod orchestrator;
mod state;

pub use cancel::CancelHandle;
pub use error::PipelineError;
pub use events::{EventSender, PipelineEvent};
pub use orchestrator::{Orchestrator, TurnOutcome, TurnRequest};
pub use state::{
    new_conversation_id, ConversationMode, ConversationState, Message, MessageMeta, MessageRole,
};
