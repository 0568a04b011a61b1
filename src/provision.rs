use rusqlite::{Connection, OptionalExtension};

use crate::domain::PatientId;
use crate::error::KiraError;
use crate::store::{NamespaceTables, UnitOfWork, table_exists};

/// Layout version written into every namespace's metadata row.
pub const FORMAT_VERSION: i64 = 1;

const EXPRESSION_COLUMNS: &[&str] = &["transcript_id", "fold_change"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHandle {
    pub patient_id: PatientId,
    pub tables: NamespaceTables,
    /// False when the namespace existed before this run.
    pub created: bool,
}

/// Creates the patient's namespace if missing. Runs inside the caller's unit of
/// work, so a failed first ingestion leaves no namespace behind.
pub fn provision(uow: &UnitOfWork, patient: &PatientId) -> Result<NamespaceHandle, KiraError> {
    let tables = NamespaceTables::for_patient(patient);
    let existed = table_exists(uow, &tables.expression)?;
    if existed {
        check_layout(uow, &tables)?;
    }

    uow.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {expression} (
            transcript_id TEXT PRIMARY KEY NOT NULL,
            fold_change REAL NOT NULL CHECK (fold_change > 0 AND fold_change <> 1.0)
        ) WITHOUT ROWID;
        CREATE TABLE IF NOT EXISTS {metadata} (
            singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
            format_version INTEGER NOT NULL,
            patient_id TEXT NOT NULL,
            source_path TEXT NOT NULL,
            total_rows INTEGER NOT NULL,
            stored_records INTEGER NOT NULL,
            match_rate REAL NOT NULL,
            completed_at TEXT NOT NULL,
            document TEXT NOT NULL
        );",
        expression = tables.expression_quoted(),
        metadata = tables.metadata_quoted(),
    ))?;

    if existed {
        tracing::debug!(patient = %patient, "namespace already provisioned");
    } else {
        tracing::info!(patient = %patient, "namespace provisioned");
    }

    Ok(NamespaceHandle {
        patient_id: patient.clone(),
        tables,
        created: !existed,
    })
}

fn check_layout(conn: &Connection, tables: &NamespaceTables) -> Result<(), KiraError> {
    let conflict = |message: String| KiraError::SchemaConflict {
        namespace: tables.expression.clone(),
        message,
    };

    let columns = column_names(conn, &tables.expression)?;
    for required in EXPRESSION_COLUMNS {
        if !columns.iter().any(|column| column == required) {
            return Err(conflict(format!("expression table lacks column `{required}`")));
        }
    }

    if !table_exists(conn, &tables.metadata)? {
        return Err(conflict("metadata table is missing".to_string()));
    }
    let version: Option<i64> = conn
        .query_row(
            &format!("SELECT format_version FROM {}", tables.metadata_quoted()),
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| conflict(format!("unreadable metadata: {err}")))?;
    match version {
        Some(FORMAT_VERSION) | None => Ok(()),
        Some(other) => Err(conflict(format!(
            "metadata format version {other}, expected {FORMAT_VERSION}"
        ))),
    }
}

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, KiraError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}
