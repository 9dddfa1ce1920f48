//! Remote sync channel.
//!
//! A push-based key/value tree mirrored to a realtime database. The relay
//! writes conversations, messages and connection status here and reads its
//! command inbox from it.

mod error;
mod firebase;
mod memory;
pub mod paths;
mod push_id;
mod sync;
mod traits;

pub use error::{RemoteError, RemoteResult};
pub use firebase::{ChildTracker, FirebaseChannel};
pub use memory::MemoryChannel;
pub use push_id::PushIdGenerator;
pub use sync::{ConnectionStatus, SyncChannel};
pub use traits::{ChildEvent, ChildSubscription, RemoteChannel};

use serde_json::{Value, json};

/// Placeholder the server replaces with its own clock on write.
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}
