//! CSV-backed record loading. All six source files are read once at
//! startup into a [`RecordSet`]; a failed read surfaces as
//! [`AnalysisError::RepositoryUnavailable`] naming the offending file.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::{AnalysisError, Result};
use crate::records::RecordSet;

fn load_rows<T: DeserializeOwned>(dir: &Path, file_name: &str) -> Result<Vec<T>> {
    let path = dir.join(file_name);
    let mut reader =
        csv::Reader::from_path(&path).map_err(|e| AnalysisError::RepositoryUnavailable {
            source_name: file_name.to_string(),
            cause: e.into(),
        })?;

    let mut rows = Vec::new();
    for row in reader.deserialize() {
        let row: T = row.map_err(|e| AnalysisError::RepositoryUnavailable {
            source_name: file_name.to_string(),
            cause: e.into(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Load all record sources from a data directory.
///
/// Expected files: `patients.csv`, `claims.csv`, `claim_lines.csv`,
/// `observations.csv`, `ImagingStudies.csv`, `encounters.csv`.
pub fn load(dir: impl AsRef<Path>) -> Result<RecordSet> {
    let dir = dir.as_ref();

    let records = RecordSet {
        patients: load_rows(dir, "patients.csv")?,
        claims: load_rows(dir, "claims.csv")?,
        claim_lines: load_rows(dir, "claim_lines.csv")?,
        labs: load_rows(dir, "observations.csv")?,
        imaging: load_rows(dir, "ImagingStudies.csv")?,
        encounters: load_rows(dir, "encounters.csv")?,
    };

    info!(
        patients = records.patients.len(),
        claims = records.claims.len(),
        claim_lines = records.claim_lines.len(),
        labs = records.labs.len(),
        imaging = records.imaging.len(),
        encounters = records.encounters.len(),
        "loaded record set from {}",
        dir.display()
    );

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_fixture(dir: &Path) {
        fs::write(
            dir.join("patients.csv"),
            "patient_id,name,dob,phone,email,diagnosis,procedure,amount,task\n\
             P0000001,Jane Doe,1970-01-01,555-0100,jane@example.com,I10,99214,1200.50,Pending Lab\n",
        )
        .unwrap();
        fs::write(
            dir.join("claims.csv"),
            "claim_id,patient_id,primary_diagnosis_code,primary_diagnosis_description,total_claim_cost,admission_date,discharge_date,service_date,encounter_class\n\
             C1,P0000001,I10,Essential hypertension,3400.00,2024-01-02,2024-01-05,2024-01-02,inpatient\n",
        )
        .unwrap();
        fs::write(
            dir.join("claim_lines.csv"),
            "claim_id,line_id,cpt_hcpcs_code,description,charge_amount,units,reason_code,reason_description\n\
             C1,1,99214,Office visit,240.00,1,I10,Essential hypertension\n",
        )
        .unwrap();
        fs::write(
            dir.join("observations.csv"),
            "patient_id,code,description,value\nP0000001,718-7,Hemoglobin,\n",
        )
        .unwrap();
        fs::write(
            dir.join("ImagingStudies.csv"),
            "patient_id,modality,status\nP0000001,CT,pending\n",
        )
        .unwrap();
        fs::write(
            dir.join("encounters.csv"),
            "patient_id,start,stop\nP0000001,2024-01-02T08:00:00Z,\n",
        )
        .unwrap();
    }

    #[test]
    fn loads_all_sources_and_maps_empty_cells_to_none() {
        let dir = std::env::temp_dir().join(format!("mediguard-csv-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_fixture(&dir);

        let records = load(&dir).unwrap();
        assert_eq!(records.patients.len(), 1);
        assert_eq!(records.patients[0].task, "Pending Lab");
        assert_eq!(records.claims[0].total_claim_cost, 3400.00);
        assert_eq!(records.claim_lines[0].units, 1);

        // Empty CSV cells become None for optional fields.
        assert!(records.labs[0].value.is_none());
        assert!(records.encounters[0].stop.is_none());
        assert_eq!(records.imaging[0].status, "pending");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_names_the_source() {
        let dir = std::env::temp_dir().join("mediguard-csv-missing");
        fs::create_dir_all(&dir).unwrap();

        let err = load(&dir).unwrap_err();
        match err {
            AnalysisError::RepositoryUnavailable { source_name, .. } => {
                assert_eq!(source_name, "patients.csv");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
