//! Distributed job queue: broker abstraction, retry/backoff policy, and
//! the queue manager implementing enqueue/dequeue, dead-lettering,
//! stalled-job recovery, and the parent/child dependency barrier that
//! fan-out/fan-in analysis stages rely on.

pub mod broker;
pub mod job;
pub mod manager;
pub mod retry;

pub use broker::{Broker, InMemoryBroker, RedisBroker};
pub use job::{JobHandle, JobRecord, JobState};
pub use manager::QueueManager;
pub use retry::RetryPolicy;
