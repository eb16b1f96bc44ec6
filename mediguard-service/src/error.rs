use std::fmt;

use thiserror::Error;

/// Pipeline stage names, used to attribute failures to the stage that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Identity,
    Billing,
    Discharge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Identity => write!(f, "identity"),
            Stage::Billing => write!(f, "billing"),
            Stage::Discharge => write!(f, "discharge"),
        }
    }
}

/// Errors produced by the analysis service.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Patient identifier absent from the record repository. Not retried;
    /// the readiness-only entry point degrades this to a fixed verdict
    /// instead of surfacing it.
    #[error("patient not found: {0}")]
    PatientNotFound(String),

    /// The generation backend returned text that failed structural or
    /// schema validation. Fatal for identity and billing; the LLM discharge
    /// variant degrades to a fixed verdict instead.
    #[error("{stage} stage returned malformed output: {reason} (raw: {excerpt:?})")]
    MalformedOutput {
        stage: Stage,
        reason: String,
        excerpt: String,
    },

    /// Underlying data source could not be read.
    #[error("record source {source_name} unavailable")]
    RepositoryUnavailable {
        source_name: String,
        #[source]
        cause: anyhow::Error,
    },

    /// The generation backend call itself failed (network, provider, ...).
    #[error("{stage} stage generation call failed: {message}")]
    Backend { stage: Stage, message: String },

    /// Orchestration-level failure that is not one of the domain errors
    /// above (missing state section, serialization problem, ...).
    #[error("pipeline error: {0}")]
    Pipeline(String),
}

/// Bounded excerpt of raw backend output, kept short enough for logs and
/// error payloads.
pub fn excerpt(raw: &str) -> String {
    const MAX: usize = 200;
    if raw.len() <= MAX {
        raw.to_string()
    } else {
        let mut end = MAX;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &raw[..end])
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
