pub mod consumer;
pub mod dedup;

pub use consumer::EventQueueConsumer;
pub use dedup::{EventDeduplicator, SkipReason};
