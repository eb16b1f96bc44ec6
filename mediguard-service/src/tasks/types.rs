use serde::{Deserialize, Serialize};

use crate::extract::{FieldKind, FieldSpec};
use crate::readiness::{Priority, ReadinessVerdict};
use crate::records::{ClaimLineRecord, ClaimRecord, PatientRecord};

/// Names of the insert-only pipeline state sections, in stage order.
pub mod sections {
    pub const RAW: &str = "raw";
    pub const IDENTITY: &str = "identity";
    pub const BILLING: &str = "billing";
    pub const DISCHARGE: &str = "discharge";
    pub const FINAL: &str = "final";
}

/// Plain (non-section) context keys.
pub mod context_keys {
    pub const PATIENT_ID: &str = "patient_id";
    pub const READINESS_MODE: &str = "readiness_mode";
    pub const DISCHARGE_DIAGNOSTICS: &str = "discharge_diagnostics";
}

/// Repository snapshot taken by the identity stage and carried in the `raw`
/// section for later stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub patient: PatientRecord,
    pub claims: Vec<ClaimRecord>,
    pub claim_lines: Vec<ClaimLineRecord>,
}

/// Validated output of the identity stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityAssessment {
    pub fraud_risk_score: f64,
    pub identity_misuse_flag: bool,
    pub reasons: Vec<String>,
}

/// Validated output of the billing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingAssessment {
    pub billing_risk_score: f64,
    pub billing_flags: Vec<String>,
    pub billing_explanation: String,
}

/// Diagnostics preserved when the LLM discharge variant falls back to its
/// fixed degraded verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmFallbackDiagnostics {
    pub raw_excerpt: String,
    pub parse_error: String,
}

/// Flat merged summary of all three stages. Every field is sourced from one
/// named stage output, so there is no key-collision ambiguity between
/// stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSummary {
    pub patient_id: String,
    // identity
    pub fraud_risk_score: f64,
    pub identity_misuse_flag: bool,
    pub identity_reasons: Vec<String>,
    // billing
    pub billing_risk_score: f64,
    pub billing_flags: Vec<String>,
    pub billing_explanation: String,
    // discharge
    pub discharge_ready: bool,
    pub discharge_blockers: Vec<String>,
    pub delay_hours: f64,
    pub priority_level: Priority,
}

impl FinalSummary {
    pub fn compose(
        patient_id: &str,
        identity: &IdentityAssessment,
        billing: &BillingAssessment,
        discharge: &ReadinessVerdict,
    ) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            fraud_risk_score: identity.fraud_risk_score,
            identity_misuse_flag: identity.identity_misuse_flag,
            identity_reasons: identity.reasons.clone(),
            billing_risk_score: billing.billing_risk_score,
            billing_flags: billing.billing_flags.clone(),
            billing_explanation: billing.billing_explanation.clone(),
            discharge_ready: discharge.discharge_ready,
            discharge_blockers: discharge.blockers.clone(),
            delay_hours: discharge.delay_hours,
            priority_level: discharge.priority_level,
        }
    }
}

/// Required-field schema for the identity stage output.
pub const IDENTITY_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "fraud_risk_score",
        kind: FieldKind::NumberInRange(0.0, 100.0),
    },
    FieldSpec {
        name: "identity_misuse_flag",
        kind: FieldKind::Bool,
    },
    FieldSpec {
        name: "reasons",
        kind: FieldKind::TextList,
    },
];

/// Required-field schema for the billing stage output.
pub const BILLING_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "billing_risk_score",
        kind: FieldKind::Number,
    },
    FieldSpec {
        name: "billing_flags",
        kind: FieldKind::TextList,
    },
    FieldSpec {
        name: "billing_explanation",
        kind: FieldKind::Text,
    },
];

/// Required-field schema for the generation-backed discharge variant.
pub const DISCHARGE_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        name: "discharge_ready",
        kind: FieldKind::Bool,
    },
    FieldSpec {
        name: "blockers",
        kind: FieldKind::TextList,
    },
    FieldSpec {
        name: "delay_hours",
        kind: FieldKind::Number,
    },
];
