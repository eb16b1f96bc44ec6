use std::sync::Arc;

use async_trait::async_trait;
use stage_flow::{Context, FlowError, NextAction, Result, Task, TaskResult};
use tracing::info;

use crate::error::{AnalysisError, Stage, excerpt};
use crate::extract;
use crate::llm::GenerationBackend;
use crate::tasks::types::{BILLING_SCHEMA, BillingAssessment, IdentityAssessment, sections};

/// Billing fraud stage. Works only from the identity stage's
/// already-validated output; it does not re-read raw records. Writes the
/// `billing` section.
pub struct BillingTask {
    backend: Arc<dyn GenerationBackend>,
}

impl BillingTask {
    pub const ID: &'static str = "billing";

    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }
}

fn build_billing_prompt(identity: &IdentityAssessment) -> crate::error::Result<String> {
    let identity_json =
        serde_json::to_string(identity).map_err(|e| AnalysisError::Pipeline(e.to_string()))?;

    Ok(format!(
        r#"You are the Billing Fraud Agent.

Identity Analysis: {identity_json}

Return ONLY a JSON object with these exact fields:
- billing_risk_score (number 0-100)
- billing_flags (array of strings)
- billing_explanation (string)

Example: {{"billing_risk_score": 15, "billing_flags": ["normal_range"], "billing_explanation": "No billing anomalies"}}"#
    ))
}

#[async_trait]
impl Task for BillingTask {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let identity: IdentityAssessment = context
            .get(sections::IDENTITY)
            .await
            .ok_or_else(|| FlowError::ContextError("identity section not found".to_string()))?;

        info!(task_id = %self.id(), "running billing analysis");

        let assessment = self
            .assess(&identity)
            .await
            .map_err(|e| FlowError::task_failed(Self::ID, e))?;

        info!(
            billing_risk_score = assessment.billing_risk_score,
            flags = assessment.billing_flags.len(),
            "billing analysis complete"
        );

        context.add_section(sections::BILLING, &assessment).await?;

        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

impl BillingTask {
    async fn assess(
        &self,
        identity: &IdentityAssessment,
    ) -> crate::error::Result<BillingAssessment> {
        let prompt = build_billing_prompt(identity)?;

        let response = self
            .backend
            .generate(&prompt)
            .await
            .map_err(|e| AnalysisError::Backend {
                stage: Stage::Billing,
                message: e.to_string(),
            })?;

        let value = extract::extract(&response, BILLING_SCHEMA).map_err(|e| {
            AnalysisError::MalformedOutput {
                stage: Stage::Billing,
                reason: e.reason,
                excerpt: e.excerpt,
            }
        })?;

        serde_json::from_value(value).map_err(|e| AnalysisError::MalformedOutput {
            stage: Stage::Billing,
            reason: e.to_string(),
            excerpt: excerpt(&response),
        })
    }
}
