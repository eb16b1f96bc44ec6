//! Pipeline orchestration: threads one context through the fixed
//! Identity → Billing → Discharge sequence and projects the accumulated
//! state into a [`PipelineResult`]. A stage failure aborts the run; partial
//! state is never returned as if complete.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stage_flow::{Context, FlowError, Graph, GraphBuilder};
use tracing::info;

use crate::error::{AnalysisError, Result};
use crate::llm::GenerationBackend;
use crate::readiness::{self, ReadinessVerdict};
use crate::records::RecordRepository;
use crate::tasks::types::{
    BillingAssessment, FinalSummary, IdentityAssessment, LlmFallbackDiagnostics, context_keys,
    sections,
};
use crate::tasks::{BillingTask, DischargeLlmTask, DischargeRulesTask, IdentityTask, identity};

/// Which discharge variant a deployment runs. Two conflicting evaluation
/// strategies exist by design; this is the per-deployment selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessMode {
    /// Deterministic rule engine (default).
    #[default]
    Rules,
    /// Generation-backed variant with the fixed degraded fallback.
    Llm,
}

impl ReadinessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessMode::Rules => "rules",
            ReadinessMode::Llm => "llm",
        }
    }
}

impl std::str::FromStr for ReadinessMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rules" => Ok(ReadinessMode::Rules),
            "llm" => Ok(ReadinessMode::Llm),
            other => Err(format!("unknown readiness mode: {other}")),
        }
    }
}

/// Full accumulated output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub patient_id: String,
    pub identity: IdentityAssessment,
    pub billing: BillingAssessment,
    pub discharge: ReadinessVerdict,
    #[serde(rename = "final")]
    pub final_summary: FinalSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discharge_diagnostics: Option<LlmFallbackDiagnostics>,
    pub analyzed_at: DateTime<Utc>,
}

/// The staged analysis pipeline. Cheap to share; one instance serves all
/// concurrent runs since per-run state lives in each run's own context.
pub struct AnalysisPipeline {
    graph: Graph,
    repository: Arc<dyn RecordRepository>,
    backend: Arc<dyn GenerationBackend>,
    mode: ReadinessMode,
}

impl AnalysisPipeline {
    pub fn new(
        repository: Arc<dyn RecordRepository>,
        backend: Arc<dyn GenerationBackend>,
        mode: ReadinessMode,
    ) -> Self {
        let graph = build_graph(repository.clone(), backend.clone());
        Self {
            graph,
            repository,
            backend,
            mode,
        }
    }

    /// Run the full Identity → Billing → Discharge pipeline for one
    /// patient.
    pub async fn run(&self, patient_id: &str) -> Result<PipelineResult> {
        let context = Context::new();
        context
            .set(context_keys::PATIENT_ID, patient_id)
            .await
            .map_err(flow_to_analysis)?;
        context
            .set(context_keys::READINESS_MODE, self.mode.as_str())
            .await
            .map_err(flow_to_analysis)?;

        info!(patient_id = %patient_id, mode = self.mode.as_str(), "starting pipeline run");

        self.graph
            .run(context.clone())
            .await
            .map_err(flow_to_analysis)?;

        let result = project_result(&context, patient_id).await?;

        info!(
            patient_id = %patient_id,
            fraud_risk_score = result.identity.fraud_risk_score,
            discharge_ready = result.discharge.discharge_ready,
            priority = ?result.discharge.priority_level,
            "pipeline run complete"
        );

        Ok(result)
    }

    /// Identity stage only, without touching the rest of the pipeline.
    pub async fn analyze_identity_only(&self, patient_id: &str) -> Result<IdentityAssessment> {
        let (_, assessment) =
            identity::assess_identity(self.repository.as_ref(), self.backend.as_ref(), patient_id)
                .await?;
        Ok(assessment)
    }

    /// Deterministic readiness entry point; never invokes the generation
    /// backend. Unknown patients degrade to the fixed `patient_not_found`
    /// verdict instead of failing.
    pub fn evaluate_readiness(&self, patient_id: &str) -> Result<ReadinessVerdict> {
        evaluate_readiness(self.repository.as_ref(), patient_id)
    }
}

/// Readiness-only evaluation over a repository.
pub fn evaluate_readiness(
    repository: &dyn RecordRepository,
    patient_id: &str,
) -> Result<ReadinessVerdict> {
    match repository.get_patient(patient_id) {
        Ok(patient) => {
            let evidence = repository.get_clinical_evidence(patient_id);
            Ok(readiness::evaluate(
                patient_id,
                &patient.task,
                &evidence.labs,
                &evidence.imaging,
                &evidence.encounters,
            ))
        }
        Err(AnalysisError::PatientNotFound(_)) => Ok(ReadinessVerdict::patient_not_found(patient_id)),
        Err(e) => Err(e),
    }
}

fn build_graph(repository: Arc<dyn RecordRepository>, backend: Arc<dyn GenerationBackend>) -> Graph {
    let identity = Arc::new(IdentityTask::new(repository.clone(), backend.clone()));
    let billing = Arc::new(BillingTask::new(backend.clone()));
    let discharge_rules = Arc::new(DischargeRulesTask::new(repository.clone()));
    let discharge_llm = Arc::new(DischargeLlmTask::new(repository, backend));

    GraphBuilder::new("mediguard_analysis")
        .add_task(identity)
        .add_task(billing)
        .add_task(discharge_rules)
        .add_task(discharge_llm)
        .add_edge(IdentityTask::ID, BillingTask::ID)
        .add_conditional_edge(BillingTask::ID, DischargeLlmTask::ID, |ctx| {
            ctx.get_sync::<String>(context_keys::READINESS_MODE)
                .as_deref()
                == Some("llm")
        })
        .add_edge(BillingTask::ID, DischargeRulesTask::ID)
        .build()
}

/// Unwrap the domain error a stage failed with; anything else is an
/// orchestration-level error.
fn flow_to_analysis(err: FlowError) -> AnalysisError {
    match err {
        FlowError::TaskFailed { task_id, source } => match source.downcast::<AnalysisError>() {
            Ok(analysis) => analysis,
            Err(other) => AnalysisError::Pipeline(format!("task {task_id} failed: {other}")),
        },
        other => AnalysisError::Pipeline(other.to_string()),
    }
}

async fn project_result(context: &Context, patient_id: &str) -> Result<PipelineResult> {
    let missing = |section: &str| AnalysisError::Pipeline(format!("{section} section missing"));

    let identity: IdentityAssessment = context
        .get(sections::IDENTITY)
        .await
        .ok_or_else(|| missing(sections::IDENTITY))?;
    let billing: BillingAssessment = context
        .get(sections::BILLING)
        .await
        .ok_or_else(|| missing(sections::BILLING))?;
    let discharge: ReadinessVerdict = context
        .get(sections::DISCHARGE)
        .await
        .ok_or_else(|| missing(sections::DISCHARGE))?;
    let final_summary: FinalSummary = context
        .get(sections::FINAL)
        .await
        .ok_or_else(|| missing(sections::FINAL))?;
    let discharge_diagnostics: Option<LlmFallbackDiagnostics> =
        context.get(context_keys::DISCHARGE_DIAGNOSTICS).await;

    Ok(PipelineResult {
        patient_id: patient_id.to_string(),
        identity,
        billing,
        discharge,
        final_summary,
        discharge_diagnostics,
        analyzed_at: Utc::now(),
    })
}
