//! The staged build pipeline: stage runner, report persistence, skip
//! evaluation, renderer invocation, and the top-level build service.

pub mod generator;
pub mod renderer;
pub mod report;
pub mod runner;
pub mod service;
pub mod skip;
pub mod stages;
pub mod workspace;

/// Version of the stage pipeline definition, recorded on every report.
pub const PIPELINE_VERSION: &str = "1";

/// Renderer output directory under the output root.
pub const PUBLIC_DIR: &str = "public";

/// Staged markdown tree under the output root.
pub const CONTENT_DIR: &str = "content";

pub use generator::{SiteGenerator, StagedGenerator};
pub use renderer::{HugoRenderer, RenderSummary, Renderer};
pub use report::{ReportBuilder, ToolVersions};
pub use runner::StageRunner;
pub use service::{BuildRequest, BuildResult, BuildService, BuildStatus};
pub use skip::{SkipEvaluator, SkipState, SkipStateStore};
