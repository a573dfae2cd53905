//! Repository fetching and clone coordination.
//!
//! [`GitFetcher`] shells out to `git` to clone, update, or pin-checkout a
//! single repository. [`CloneCoordinator`] fans a repository list out to a
//! bounded worker pool and aggregates the results. [`classify`] maps fetch
//! failures onto the stable issue taxonomy.

pub mod classify;
pub mod coordinator;
pub mod fetcher;

pub use classify::classify;
pub use coordinator::{CloneCoordinator, CloneOutcome};
pub use fetcher::{FetchError, FetchResult, Fetcher, GitFetcher};
