//! Per-user dialog sessions: the in-memory store and its maintenance task.

mod refresher;
mod store;

pub use refresher::{DialogRefresher, EvictReason, RefresherConfig, RefresherHandle};
pub use store::{
    ChatMessage, Role, Session, SessionRecord, SessionRef, SessionStore, SessionSummary,
};
