//! Patient, claim and clinical-evidence records plus the repository that
//! serves them. Records are loaded once at process start and are read-only
//! for the lifetime of the service, so concurrent pipeline runs need no
//! locking here.

pub mod csv_store;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Demographic and billing attributes of a patient, immutable for the
/// duration of an analysis run. `task` is an enum-like status string:
/// `"Pending Lab"`, `"Pending Imaging"`, `"Missing Consult"` or `"None"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub name: String,
    pub dob: String,
    pub phone: String,
    pub email: String,
    pub diagnosis: String,
    pub procedure: String,
    pub amount: f64,
    pub task: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: String,
    pub patient_id: String,
    #[serde(default)]
    pub primary_diagnosis_code: String,
    #[serde(default)]
    pub primary_diagnosis_description: String,
    pub total_claim_cost: f64,
    #[serde(default)]
    pub admission_date: String,
    #[serde(default)]
    pub discharge_date: String,
    #[serde(default)]
    pub service_date: String,
    #[serde(default)]
    pub encounter_class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimLineRecord {
    pub claim_id: String,
    pub line_id: u32,
    #[serde(default)]
    pub cpt_hcpcs_code: String,
    #[serde(default)]
    pub description: String,
    pub charge_amount: f64,
    pub units: u32,
    #[serde(default)]
    pub reason_code: String,
    #[serde(default)]
    pub reason_description: String,
}

/// One lab observation row. A missing `value` means the result is still
/// pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabObservation {
    pub patient_id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagingStudy {
    pub patient_id: String,
    #[serde(default)]
    pub modality: String,
    pub status: String,
}

/// One encounter row. A missing `stop` time means the encounter is still
/// open, i.e. the patient has not been discharged from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncounterRecord {
    pub patient_id: String,
    #[serde(default)]
    pub start: String,
    pub stop: Option<String>,
}

/// Clinical evidence for one patient, grouped the way the readiness engine
/// consumes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinicalEvidence {
    pub labs: Vec<LabObservation>,
    pub imaging: Vec<ImagingStudy>,
    pub encounters: Vec<EncounterRecord>,
}

/// Read-only access to patient records. Implementations must be safe to
/// share across concurrent pipeline runs.
pub trait RecordRepository: Send + Sync {
    /// Fetch a patient by id, failing with [`AnalysisError::PatientNotFound`]
    /// if the identifier is unknown.
    fn get_patient(&self, patient_id: &str) -> Result<PatientRecord>;

    /// All claims referencing this patient, possibly empty.
    fn get_claims(&self, patient_id: &str) -> Vec<ClaimRecord>;

    /// All claim lines belonging to any of the given claims.
    fn get_claim_lines(&self, claim_ids: &[String]) -> Vec<ClaimLineRecord>;

    /// Lab, imaging and encounter rows for this patient, each possibly
    /// empty, in source order.
    fn get_clinical_evidence(&self, patient_id: &str) -> ClinicalEvidence;

    /// First `limit` patient ids in source order, for discovery endpoints.
    fn sample_patient_ids(&self, limit: usize) -> Vec<String>;
}

/// In-memory record set. The CSV store produces one of these at startup;
/// tests construct them directly.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub patients: Vec<PatientRecord>,
    pub claims: Vec<ClaimRecord>,
    pub claim_lines: Vec<ClaimLineRecord>,
    pub labs: Vec<LabObservation>,
    pub imaging: Vec<ImagingStudy>,
    pub encounters: Vec<EncounterRecord>,
}

impl RecordRepository for RecordSet {
    fn get_patient(&self, patient_id: &str) -> Result<PatientRecord> {
        self.patients
            .iter()
            .find(|p| p.patient_id == patient_id)
            .cloned()
            .ok_or_else(|| AnalysisError::PatientNotFound(patient_id.to_string()))
    }

    fn get_claims(&self, patient_id: &str) -> Vec<ClaimRecord> {
        self.claims
            .iter()
            .filter(|c| c.patient_id == patient_id)
            .cloned()
            .collect()
    }

    fn get_claim_lines(&self, claim_ids: &[String]) -> Vec<ClaimLineRecord> {
        self.claim_lines
            .iter()
            .filter(|l| claim_ids.contains(&l.claim_id))
            .cloned()
            .collect()
    }

    fn get_clinical_evidence(&self, patient_id: &str) -> ClinicalEvidence {
        ClinicalEvidence {
            labs: self
                .labs
                .iter()
                .filter(|r| r.patient_id == patient_id)
                .cloned()
                .collect(),
            imaging: self
                .imaging
                .iter()
                .filter(|r| r.patient_id == patient_id)
                .cloned()
                .collect(),
            encounters: self
                .encounters
                .iter()
                .filter(|r| r.patient_id == patient_id)
                .cloned()
                .collect(),
        }
    }

    fn sample_patient_ids(&self, limit: usize) -> Vec<String> {
        self.patients
            .iter()
            .take(limit)
            .map(|p| p.patient_id.clone())
            .collect()
    }
}
