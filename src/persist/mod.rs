//! Durable storage for evicted dialog sessions.

mod sink;
mod writer;

pub use sink::RotatingFileSink;
pub use writer::{
    PersistItem, PersistQueue, PersistWriter, WriterConfig, WriterHandle, persist_queue,
};
