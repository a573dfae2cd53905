//! Core domain types for the docbuilder documentation aggregator.
//!
//! This crate contains:
//! - Stage and issue-code enumerations shared by the pipeline and the report
//! - Stage errors and their transient/permanent discrimination
//! - Repository, doc-file, and build-state types
//! - The build report (schema v1) and its outcome derivation
//! - Build jobs, lifecycle events, and the observer capability set
//!
//! Everything here is I/O-free; the pipeline, git, and scheduler crates
//! build on these types.

pub mod docfile;
pub mod error;
pub mod event;
pub mod issue;
pub mod job;
pub mod observer;
pub mod report;
pub mod repository;
pub mod stage;
pub mod state;

pub use error::{Error, Result};
pub use issue::{Issue, IssueCode, Severity};
pub use report::{BuildReport, Outcome};
pub use stage::{
    ClassifiedError, RenderError, Stage, StageError, StageErrorKind, StageOutcome, StageStatus,
};
