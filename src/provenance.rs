use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::detect::DetectionConfidence;
use crate::domain::{FormatProfile, PatientId};
use crate::error::KiraError;
use crate::normalize::ValueStats;
use crate::provision::{FORMAT_VERSION, NamespaceHandle};
use crate::resolve::MatchStats;
use crate::store::{NamespaceTables, UnitOfWork, table_exists};
use crate::table::SourceInfo;
use crate::writer::WriteReport;

/// Audit record of the run that produced a namespace's current contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionMetadata {
    pub patient_id: PatientId,
    pub source: SourceInfo,
    pub profile: FormatProfile,
    pub detection: DetectionConfidence,
    pub matching: MatchStats,
    pub values: ValueStats,
    pub write: WriteReport,
    pub started_at: String,
    pub completed_at: String,
    pub tool_version: String,
}

/// Overwrites the namespace's single metadata row within the run's transaction.
pub fn record(
    uow: &UnitOfWork,
    handle: &NamespaceHandle,
    metadata: &IngestionMetadata,
) -> Result<(), KiraError> {
    let document = serde_json::to_string(metadata)
        .map_err(|err| KiraError::Transaction(format!("serialize metadata: {err}")))?;
    uow.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (singleton, format_version, patient_id, source_path, \
             total_rows, stored_records, match_rate, completed_at, document) \
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            handle.tables.metadata_quoted()
        ),
        params![
            FORMAT_VERSION,
            metadata.patient_id.as_str(),
            metadata.source.path,
            i64::try_from(metadata.matching.total_rows).unwrap_or(i64::MAX),
            i64::try_from(metadata.write.inserted).unwrap_or(i64::MAX),
            metadata.matching.match_rate,
            metadata.completed_at,
            document,
        ],
    )?;
    tracing::info!(
        patient = %handle.patient_id,
        records = metadata.write.inserted,
        match_rate = metadata.matching.match_rate,
        "provenance recorded"
    );
    Ok(())
}

pub fn read(conn: &Connection, patient: &PatientId) -> Result<Option<IngestionMetadata>, KiraError> {
    let tables = NamespaceTables::for_patient(patient);
    if !table_exists(conn, &tables.metadata)? {
        return Ok(None);
    }
    let document: Option<String> = conn
        .query_row(
            &format!("SELECT document FROM {}", tables.metadata_quoted()),
            [],
            |row| row.get(0),
        )
        .optional()?;
    document
        .map(|document| {
            serde_json::from_str(&document).map_err(|err| KiraError::SchemaConflict {
                namespace: tables.metadata.clone(),
                message: format!("unreadable metadata document: {err}"),
            })
        })
        .transpose()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;
    use crate::config::StoreSettings;
    use crate::domain::{IdKind, ValueKind};
    use crate::provision::provision;
    use crate::store::Database;

    fn metadata(patient: &PatientId, inserted: usize) -> IngestionMetadata {
        IngestionMetadata {
            patient_id: patient.clone(),
            source: SourceInfo {
                path: "de.tsv".to_string(),
                bytes: 42,
                modified_at: None,
            },
            profile: FormatProfile {
                id_column: "transcript_id".to_string(),
                id_kind: IdKind::TranscriptId,
                value_column: "fold_change".to_string(),
                value_kind: ValueKind::LinearFold,
            },
            detection: DetectionConfidence::Header,
            matching: MatchStats {
                total_rows: 3,
                matched_rows: 3,
                match_rate: 1.0,
                ..MatchStats::default()
            },
            values: ValueStats::default(),
            write: WriteReport {
                replaced: 0,
                inserted,
                batches: 1,
            },
            started_at: now_rfc3339(),
            completed_at: now_rfc3339(),
            tool_version: "test".to_string(),
        }
    }

    #[test]
    fn latest_record_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("vault.sqlite")).unwrap();
        let db = Database::open(&path, &StoreSettings::default()).unwrap();
        let patient: PatientId = "p1".parse().unwrap();

        let uow = db.begin(&patient).unwrap();
        assert!(read(&uow, &patient).unwrap().is_none());
        let handle = provision(&uow, &patient).unwrap();
        record(&uow, &handle, &metadata(&patient, 3)).unwrap();
        record(&uow, &handle, &metadata(&patient, 2)).unwrap();
        uow.commit().unwrap();

        let conn = db.open_namespace(&patient).unwrap().unwrap();
        let stored = read(&conn, &patient).unwrap().unwrap();
        assert_eq!(stored.write.inserted, 2);
        assert_eq!(stored.source.path, "de.tsv");
        let rows: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", handle.tables.metadata_quoted()),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }
}
