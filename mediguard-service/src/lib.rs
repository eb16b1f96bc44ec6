//! MediGuard analysis service: a staged Identity → Billing → Discharge
//! pipeline producing a fraud-risk and discharge-readiness assessment for
//! one patient at a time, plus a deterministic readiness-only entry point
//! that needs no generation backend.

pub mod error;
pub mod extract;
pub mod llm;
pub mod pipeline;
pub mod readiness;
pub mod records;
pub mod tasks;

pub use error::{AnalysisError, Stage};
pub use pipeline::{AnalysisPipeline, PipelineResult, ReadinessMode, evaluate_readiness};
pub use readiness::{Priority, ReadinessVerdict};
