use std::sync::Arc;

use async_trait::async_trait;
use stage_flow::{Context, FlowError, NextAction, Result, Task, TaskResult};
use tracing::info;

use crate::error::{AnalysisError, Stage, excerpt};
use crate::extract;
use crate::llm::GenerationBackend;
use crate::records::RecordRepository;
use crate::tasks::types::{
    IDENTITY_SCHEMA, IdentityAssessment, RecordSnapshot, context_keys, sections,
};

/// Identity & claims fraud stage: snapshots the patient's records, asks the
/// generation backend for a fraud assessment and stores the validated
/// output. Writes the `raw` and `identity` sections.
pub struct IdentityTask {
    repository: Arc<dyn RecordRepository>,
    backend: Arc<dyn GenerationBackend>,
}

impl IdentityTask {
    pub const ID: &'static str = "identity";

    pub fn new(repository: Arc<dyn RecordRepository>, backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            repository,
            backend,
        }
    }
}

/// Take the repository snapshot the identity stage works from.
pub fn snapshot_records(
    repository: &dyn RecordRepository,
    patient_id: &str,
) -> crate::error::Result<RecordSnapshot> {
    let patient = repository.get_patient(patient_id)?;
    let claims = repository.get_claims(patient_id);
    let claim_ids: Vec<String> = claims.iter().map(|c| c.claim_id.clone()).collect();
    let claim_lines = repository.get_claim_lines(&claim_ids);
    Ok(RecordSnapshot {
        patient,
        claims,
        claim_lines,
    })
}

pub fn build_identity_prompt(snapshot: &RecordSnapshot) -> crate::error::Result<String> {
    let patient = serde_json::to_string_pretty(&snapshot.patient)
        .map_err(|e| AnalysisError::Pipeline(e.to_string()))?;
    let claims = serde_json::to_string_pretty(&snapshot.claims)
        .map_err(|e| AnalysisError::Pipeline(e.to_string()))?;
    let claim_lines = serde_json::to_string_pretty(&snapshot.claim_lines)
        .map_err(|e| AnalysisError::Pipeline(e.to_string()))?;

    Ok(format!(
        r#"You are the Identity & Claims Fraud Agent.

Patient Information: {patient}
Claims: {claims}
Claim Lines: {claim_lines}

Analyze this patient's data for fraud and identity misuse. Check for:
1. Duplicate or inconsistent patient information across claims (compare DOB, name, contact details)
2. Suspicious diagnosis-procedure combinations (procedures that don't match diagnoses)
3. Claims with unusually high or unrealistic amounts (compare total_claim_cost to typical ranges)
4. Patterns commonly associated with identity misuse (multiple claims with different patient details, rapid claim sequences, etc.)

Return ONLY a JSON object with these exact fields:
- fraud_risk_score (number 0-100) - overall fraud risk assessment
- identity_misuse_flag (boolean) - true if identity misuse is detected, false otherwise
- reasons (array of strings) - list of specific reasons/flags found

Example: {{"fraud_risk_score": 45, "identity_misuse_flag": true, "reasons": ["Duplicate patient information across multiple claims"]}}"#
    ))
}

/// Run the identity analysis outside the pipeline (single-stage entry
/// point): snapshot, generate, extract, validate.
pub async fn assess_identity(
    repository: &dyn RecordRepository,
    backend: &dyn GenerationBackend,
    patient_id: &str,
) -> crate::error::Result<(RecordSnapshot, IdentityAssessment)> {
    let snapshot = snapshot_records(repository, patient_id)?;
    let prompt = build_identity_prompt(&snapshot)?;

    let response = backend
        .generate(&prompt)
        .await
        .map_err(|e| AnalysisError::Backend {
            stage: Stage::Identity,
            message: e.to_string(),
        })?;

    let value =
        extract::extract(&response, IDENTITY_SCHEMA).map_err(|e| AnalysisError::MalformedOutput {
            stage: Stage::Identity,
            reason: e.reason,
            excerpt: e.excerpt,
        })?;

    let assessment: IdentityAssessment =
        serde_json::from_value(value).map_err(|e| AnalysisError::MalformedOutput {
            stage: Stage::Identity,
            reason: e.to_string(),
            excerpt: excerpt(&response),
        })?;

    Ok((snapshot, assessment))
}

#[async_trait]
impl Task for IdentityTask {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let patient_id: String = context
            .get(context_keys::PATIENT_ID)
            .await
            .ok_or_else(|| FlowError::ContextError("patient_id not found".to_string()))?;

        info!(task_id = %self.id(), patient_id = %patient_id, "running identity analysis");

        let (snapshot, assessment) =
            assess_identity(self.repository.as_ref(), self.backend.as_ref(), &patient_id)
                .await
                .map_err(|e| FlowError::task_failed(Self::ID, e))?;

        info!(
            patient_id = %patient_id,
            fraud_risk_score = assessment.fraud_risk_score,
            identity_misuse = assessment.identity_misuse_flag,
            "identity analysis complete"
        );

        context.add_section(sections::RAW, &snapshot).await?;
        context.add_section(sections::IDENTITY, &assessment).await?;

        Ok(TaskResult::new(None, NextAction::Continue))
    }
}
