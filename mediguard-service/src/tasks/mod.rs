//! Pipeline stage tasks: Identity → Billing → Discharge.

pub mod billing;
pub mod discharge_llm;
pub mod discharge_rules;
pub mod identity;
pub mod types;

pub use billing::BillingTask;
pub use discharge_llm::DischargeLlmTask;
pub use discharge_rules::DischargeRulesTask;
pub use identity::IdentityTask;

use stage_flow::{Context, FlowError, Result};

use crate::readiness::ReadinessVerdict;
use crate::tasks::types::{BillingAssessment, FinalSummary, IdentityAssessment, sections};

/// Last-stage bookkeeping shared by both discharge variants: store the
/// verdict and compose the typed final summary from the three stage
/// outputs.
pub(crate) async fn write_discharge_and_final(
    context: &Context,
    patient_id: &str,
    verdict: &ReadinessVerdict,
) -> Result<()> {
    let identity: IdentityAssessment = context
        .get(sections::IDENTITY)
        .await
        .ok_or_else(|| FlowError::ContextError("identity section not found".to_string()))?;
    let billing: BillingAssessment = context
        .get(sections::BILLING)
        .await
        .ok_or_else(|| FlowError::ContextError("billing section not found".to_string()))?;

    let summary = FinalSummary::compose(patient_id, &identity, &billing, verdict);

    context.add_section(sections::DISCHARGE, verdict).await?;
    context.add_section(sections::FINAL, &summary).await?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stage_flow::{Context, FlowError};

    use super::test_support::*;
    use super::*;
    use crate::error::AnalysisError;
    use crate::readiness::Priority;
    use crate::tasks::types::{RecordSnapshot, context_keys};
    use stage_flow::Task;

    async fn seeded_context(patient_id: &str) -> Context {
        let ctx = Context::new();
        ctx.set(context_keys::PATIENT_ID, patient_id).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn identity_task_writes_raw_and_identity_sections() {
        let repo = record_set("P1", "None");
        let backend = ScriptedBackend::new(["```json\n".to_string() + IDENTITY_OK + "\n```"]);
        let task = IdentityTask::new(repo, backend);

        let ctx = seeded_context("P1").await;
        task.run(ctx.clone()).await.unwrap();

        let snapshot: RecordSnapshot = ctx.get(types::sections::RAW).await.unwrap();
        assert_eq!(snapshot.patient.patient_id, "P1");
        assert_eq!(snapshot.claims.len(), 1);
        assert_eq!(snapshot.claim_lines.len(), 1);

        let identity: types::IdentityAssessment = ctx.get(types::sections::IDENTITY).await.unwrap();
        assert_eq!(identity.fraud_risk_score, 40.0);
        assert!(!identity.identity_misuse_flag);
    }

    #[tokio::test]
    async fn identity_task_fails_for_unknown_patient() {
        let repo = record_set("P1", "None");
        let backend = ScriptedBackend::new([IDENTITY_OK]);
        let task = IdentityTask::new(repo, backend);

        let ctx = seeded_context("nobody").await;
        let err = task.run(ctx).await.unwrap_err();
        match err {
            FlowError::TaskFailed { task_id, source } => {
                assert_eq!(task_id, "identity");
                let analysis = source.downcast::<AnalysisError>().unwrap();
                assert!(matches!(analysis, AnalysisError::PatientNotFound(id) if id == "nobody"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn billing_task_reads_only_identity_output() {
        let backend = ScriptedBackend::new([BILLING_OK]);
        let task = BillingTask::new(backend);

        let ctx = Context::new();
        ctx.add_section(
            types::sections::IDENTITY,
            types::IdentityAssessment {
                fraud_risk_score: 40.0,
                identity_misuse_flag: false,
                reasons: vec![],
            },
        )
        .await
        .unwrap();

        task.run(ctx.clone()).await.unwrap();
        let billing: types::BillingAssessment = ctx.get(types::sections::BILLING).await.unwrap();
        assert_eq!(billing.billing_risk_score, 15.0);
    }

    #[tokio::test]
    async fn billing_task_malformed_output_names_the_stage() {
        let backend = ScriptedBackend::new(["not json at all"]);
        let task = BillingTask::new(backend);

        let ctx = Context::new();
        ctx.add_section(
            types::sections::IDENTITY,
            types::IdentityAssessment {
                fraud_risk_score: 40.0,
                identity_misuse_flag: false,
                reasons: vec![],
            },
        )
        .await
        .unwrap();

        let err = task.run(ctx).await.unwrap_err();
        match err {
            FlowError::TaskFailed { task_id, source } => {
                assert_eq!(task_id, "billing");
                let analysis = source.downcast::<AnalysisError>().unwrap();
                match analysis {
                    AnalysisError::MalformedOutput { stage, excerpt, .. } => {
                        assert_eq!(stage, crate::error::Stage::Billing);
                        assert_eq!(excerpt, "not json at all");
                    }
                    other => panic!("unexpected error: {other:?}"),
                }
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    async fn context_after_identity_and_billing(repo: &Arc<crate::records::RecordSet>) -> Context {
        let ctx = seeded_context("P1").await;
        let backend = ScriptedBackend::new([IDENTITY_OK, BILLING_OK]);
        IdentityTask::new(repo.clone(), backend.clone())
            .run(ctx.clone())
            .await
            .unwrap();
        BillingTask::new(backend).run(ctx.clone()).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn discharge_rules_task_composes_final_summary() {
        let repo = record_set("P1", "None");
        let ctx = context_after_identity_and_billing(&repo).await;

        DischargeRulesTask::new(repo).run(ctx.clone()).await.unwrap();

        let verdict: crate::readiness::ReadinessVerdict =
            ctx.get(types::sections::DISCHARGE).await.unwrap();
        assert!(verdict.discharge_ready);
        assert_eq!(verdict.priority_level, Priority::Low);

        let summary: types::FinalSummary = ctx.get(types::sections::FINAL).await.unwrap();
        assert_eq!(summary.patient_id, "P1");
        assert_eq!(summary.fraud_risk_score, 40.0);
        assert_eq!(summary.billing_risk_score, 15.0);
        assert!(summary.discharge_ready);

        // All earlier sections are still present, in stage order.
        assert_eq!(
            ctx.section_names(),
            vec!["raw", "identity", "billing", "discharge", "final"]
        );
    }

    #[tokio::test]
    async fn discharge_llm_task_parses_backend_verdict() {
        let repo = record_set("P1", "None");
        let ctx = context_after_identity_and_billing(&repo).await;

        let backend = ScriptedBackend::new([DISCHARGE_OK]);
        DischargeLlmTask::new(repo, backend)
            .run(ctx.clone())
            .await
            .unwrap();

        let verdict: crate::readiness::ReadinessVerdict =
            ctx.get(types::sections::DISCHARGE).await.unwrap();
        assert!(verdict.discharge_ready);
        assert_eq!(verdict.priority_level, Priority::Low);
    }

    #[tokio::test]
    async fn discharge_llm_task_falls_back_on_malformed_output() {
        let repo = record_set("P1", "None");
        let ctx = context_after_identity_and_billing(&repo).await;

        let backend = ScriptedBackend::new(["the patient seems fine to me"]);
        DischargeLlmTask::new(repo, backend)
            .run(ctx.clone())
            .await
            .unwrap();

        let verdict: crate::readiness::ReadinessVerdict =
            ctx.get(types::sections::DISCHARGE).await.unwrap();
        assert!(!verdict.discharge_ready);
        assert_eq!(verdict.blockers, vec!["llm_parse_error"]);
        assert_eq!(verdict.delay_hours, 0.0);
        assert_eq!(verdict.priority_level, Priority::Medium);

        // Raw text and parse error are preserved for diagnostics.
        let diagnostics: types::LlmFallbackDiagnostics = ctx
            .get(types::context_keys::DISCHARGE_DIAGNOSTICS)
            .await
            .unwrap();
        assert_eq!(diagnostics.raw_excerpt, "the patient seems fine to me");
        assert!(diagnostics.parse_error.starts_with("invalid JSON"));
    }
}
