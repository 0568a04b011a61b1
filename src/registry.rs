use serde::Serialize;

use crate::catalog::ReferenceCatalog;
use crate::domain::PatientId;
use crate::error::KiraError;
use crate::provenance::{self, IngestionMetadata};
use crate::store::{Database, NamespaceTables, record_count, table_exists};

const ORPHAN_SAMPLE: usize = 25;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub patient_id: PatientId,
    pub records: usize,
    /// Stored transcripts missing from the reference catalog.
    pub orphaned_records: usize,
    pub orphaned_sample: Vec<String>,
    pub baseline_violations: usize,
    pub non_positive_violations: usize,
    pub metadata_present: bool,
}

impl ValidationReport {
    pub fn violations(&self) -> usize {
        self.orphaned_records
            + self.baseline_violations
            + self.non_positive_violations
            + usize::from(!self.metadata_present)
    }

    pub fn is_valid(&self) -> bool {
        self.violations() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceInfo {
    pub patient_id: PatientId,
    pub records: usize,
    pub metadata: Option<IngestionMetadata>,
}

pub fn list(db: &Database) -> Result<Vec<PatientId>, KiraError> {
    db.namespaces()
}

/// Read-only integrity check of one namespace against the catalog.
pub fn validate(
    db: &Database,
    catalog: &dyn ReferenceCatalog,
    patient: &PatientId,
) -> Result<ValidationReport, KiraError> {
    let conn = db
        .open_namespace(patient)?
        .ok_or_else(|| KiraError::NamespaceNotFound(patient.to_string()))?;
    let tables = NamespaceTables::for_patient(patient);

    let mut report = ValidationReport {
        patient_id: patient.clone(),
        records: 0,
        orphaned_records: 0,
        orphaned_sample: Vec::new(),
        baseline_violations: 0,
        non_positive_violations: 0,
        metadata_present: false,
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT transcript_id, fold_change FROM {} ORDER BY transcript_id",
        tables.expression_quoted()
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    for row in rows {
        let (transcript_id, fold_change) = row?;
        report.records += 1;
        if catalog.lookup_transcript(&transcript_id)?.is_none() {
            report.orphaned_records += 1;
            if report.orphaned_sample.len() < ORPHAN_SAMPLE {
                report.orphaned_sample.push(transcript_id);
            }
        }
        if fold_change == 1.0 {
            report.baseline_violations += 1;
        }
        if fold_change <= 0.0 || !fold_change.is_finite() {
            report.non_positive_violations += 1;
        }
    }

    if table_exists(&conn, &tables.metadata)? {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", tables.metadata_quoted()),
            [],
            |row| row.get(0),
        )?;
        report.metadata_present = count == 1;
    }

    if !report.is_valid() {
        tracing::warn!(
            patient = %patient,
            orphaned = report.orphaned_records,
            baseline = report.baseline_violations,
            non_positive = report.non_positive_violations,
            "namespace failed validation"
        );
    }
    Ok(report)
}

pub fn info(db: &Database, patient: &PatientId) -> Result<NamespaceInfo, KiraError> {
    let conn = db
        .open_namespace(patient)?
        .ok_or_else(|| KiraError::NamespaceNotFound(patient.to_string()))?;
    let tables = NamespaceTables::for_patient(patient);
    Ok(NamespaceInfo {
        patient_id: patient.clone(),
        records: record_count(&conn, &tables)?,
        metadata: provenance::read(&conn, patient)?,
    })
}

/// Irreversibly removes the namespace. Confirmation is the caller's job. The
/// emptied file stays in place so a concurrent run for the same patient never
/// loses the file it holds open.
pub fn drop_namespace(db: &Database, patient: &PatientId) -> Result<usize, KiraError> {
    if !db.namespace_exists(patient)? {
        return Err(KiraError::NamespaceNotFound(patient.to_string()));
    }
    let uow = db.begin(patient)?;
    let tables = NamespaceTables::for_patient(patient);
    if !table_exists(&uow, &tables.expression)? {
        return Err(KiraError::NamespaceNotFound(patient.to_string()));
    }
    let records = record_count(&uow, &tables)?;
    uow.execute_batch(&format!(
        "DROP TABLE {}; DROP TABLE IF EXISTS {};",
        tables.expression_quoted(),
        tables.metadata_quoted()
    ))?;
    uow.commit()?;
    tracing::info!(patient = %patient, records, "namespace dropped");
    Ok(records)
}
