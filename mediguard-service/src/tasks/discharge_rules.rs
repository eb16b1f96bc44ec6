use std::sync::Arc;

use async_trait::async_trait;
use stage_flow::{Context, FlowError, NextAction, Result, Task, TaskResult};
use tracing::info;

use crate::readiness;
use crate::records::RecordRepository;
use crate::tasks::types::{RecordSnapshot, sections};
use crate::tasks::write_discharge_and_final;

/// Deterministic discharge stage: delegates to the readiness rule engine
/// using freshly fetched clinical evidence. This is the default variant.
/// Writes the `discharge` and `final` sections and ends the run.
pub struct DischargeRulesTask {
    repository: Arc<dyn RecordRepository>,
}

impl DischargeRulesTask {
    pub const ID: &'static str = "discharge_rules";

    pub fn new(repository: Arc<dyn RecordRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Task for DischargeRulesTask {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let snapshot: RecordSnapshot = context
            .get(sections::RAW)
            .await
            .ok_or_else(|| FlowError::ContextError("raw section not found".to_string()))?;
        let patient_id = snapshot.patient.patient_id.clone();

        info!(task_id = %self.id(), patient_id = %patient_id, "evaluating discharge readiness");

        let evidence = self.repository.get_clinical_evidence(&patient_id);
        let verdict = readiness::evaluate(
            &patient_id,
            &snapshot.patient.task,
            &evidence.labs,
            &evidence.imaging,
            &evidence.encounters,
        );

        info!(
            patient_id = %patient_id,
            ready = verdict.discharge_ready,
            blockers = verdict.blockers.len(),
            delay_hours = verdict.delay_hours,
            "readiness verdict computed"
        );

        write_discharge_and_final(&context, &patient_id, &verdict).await?;

        Ok(TaskResult::new(None, NextAction::End))
    }
}
