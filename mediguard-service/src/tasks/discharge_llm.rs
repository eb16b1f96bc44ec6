use std::sync::Arc;

use async_trait::async_trait;
use stage_flow::{Context, FlowError, NextAction, Result, Task, TaskResult};
use tracing::{info, warn};

use crate::error::{AnalysisError, Stage};
use crate::extract;
use crate::llm::GenerationBackend;
use crate::readiness::{ReadinessVerdict, derive_priority};
use crate::records::{ClinicalEvidence, RecordRepository};
use crate::tasks::types::{
    DISCHARGE_SCHEMA, LlmFallbackDiagnostics, RecordSnapshot, context_keys, sections,
};
use crate::tasks::write_discharge_and_final;

/// Generation-backed discharge variant. Builds a prompt from the patient's
/// task status and clinical evidence and extracts a verdict from the
/// backend's response. Extraction failure is non-fatal here: the stage
/// degrades to a fixed verdict and preserves the raw text and parse error
/// for diagnostics.
pub struct DischargeLlmTask {
    repository: Arc<dyn RecordRepository>,
    backend: Arc<dyn GenerationBackend>,
}

impl DischargeLlmTask {
    pub const ID: &'static str = "discharge_llm";

    pub fn new(repository: Arc<dyn RecordRepository>, backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            repository,
            backend,
        }
    }
}

fn build_discharge_prompt(
    snapshot: &RecordSnapshot,
    evidence: &ClinicalEvidence,
) -> crate::error::Result<String> {
    let patient = serde_json::to_string_pretty(&snapshot.patient)
        .map_err(|e| AnalysisError::Pipeline(e.to_string()))?;
    let evidence_json =
        serde_json::to_string_pretty(evidence).map_err(|e| AnalysisError::Pipeline(e.to_string()))?;

    Ok(format!(
        r#"You are the Discharge Agent.

Patient: {patient}
Current task status: {task}
Clinical evidence (labs, imaging, encounters): {evidence_json}

Assess whether this patient is ready for discharge.

Return ONLY a JSON object with these exact fields:
- discharge_ready (boolean)
- blockers (array of strings)
- delay_hours (number)

Example: {{"discharge_ready": true, "blockers": [], "delay_hours": 0}}"#,
        task = snapshot.patient.task,
    ))
}

#[async_trait]
impl Task for DischargeLlmTask {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let snapshot: RecordSnapshot = context
            .get(sections::RAW)
            .await
            .ok_or_else(|| FlowError::ContextError("raw section not found".to_string()))?;
        let patient_id = snapshot.patient.patient_id.clone();

        info!(task_id = %self.id(), patient_id = %patient_id, "running LLM discharge assessment");

        let evidence = self.repository.get_clinical_evidence(&patient_id);
        let prompt = build_discharge_prompt(&snapshot, &evidence)
            .map_err(|e| FlowError::task_failed(Self::ID, e))?;

        // A failed backend call is still fatal; only malformed output has a
        // defined fallback.
        let response =
            self.backend
                .generate(&prompt)
                .await
                .map_err(|e| AnalysisError::Backend {
                    stage: Stage::Discharge,
                    message: e.to_string(),
                })
                .map_err(|e| FlowError::task_failed(Self::ID, e))?;

        let verdict = match extract::extract(&response, DISCHARGE_SCHEMA) {
            Ok(value) => {
                // The schema guarantees these fields exist with the right
                // types; priority is derived with the engine's rule.
                let ready = value["discharge_ready"].as_bool().unwrap_or(false);
                let blockers = value["blockers"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let delay_hours = value["delay_hours"].as_f64().unwrap_or(0.0);

                ReadinessVerdict {
                    patient_id: patient_id.clone(),
                    discharge_ready: ready,
                    blockers,
                    delay_hours,
                    priority_level: derive_priority(ready, delay_hours),
                }
            }
            Err(e) => {
                warn!(
                    patient_id = %patient_id,
                    parse_error = %e.reason,
                    raw = %e.excerpt,
                    "discharge output malformed, falling back to degraded verdict"
                );
                context
                    .set(
                        context_keys::DISCHARGE_DIAGNOSTICS,
                        LlmFallbackDiagnostics {
                            raw_excerpt: e.excerpt,
                            parse_error: e.reason,
                        },
                    )
                    .await?;
                ReadinessVerdict::llm_parse_fallback(&patient_id)
            }
        };

        write_discharge_and_final(&context, &patient_id, &verdict).await?;

        Ok(TaskResult::new(None, NextAction::End))
    }
}
