mod router;
mod store;
mod unread;

pub use router::{MessageRouter, SessionState};
pub use store::{ConversationStore, DEFAULT_MAX_MESSAGES};
pub use unread::UnreadIndex;
