//! Build scheduling: a bounded, prioritized work queue with a worker pool
//! and a retry controller for transient build failures.

pub mod queue;
pub mod retry;

pub use queue::{BuildQueue, QueueError};
pub use retry::{BuildAttempt, BuildRunner, RetryController, RetryPolicy};
