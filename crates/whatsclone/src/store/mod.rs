//! Local durable store for conversations and messages.
//!
//! Every message the relay sees is written here first. The remote mirror is
//! rebuilt from this store on resync.

mod models;
mod repository;

pub use models::{Conversation, Direction, NewMessage, OutboundRecord, StoredMessage, TEXT_MESSAGE};
pub use repository::LocalStore;
