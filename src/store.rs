use std::fs;
use std::ops::Deref;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::StoreSettings;
use crate::domain::PatientId;
use crate::error::KiraError;

const NAMESPACE_PREFIX: &str = "patient_";
const EXPRESSION_SUFFIX: &str = "__expression";
const METADATA_SUFFIX: &str = "__ingestion_metadata";
const NAMESPACE_DIR_EXTENSION: &str = "namespaces";
const NAMESPACE_FILE_EXTENSION: &str = "sqlite";

/// Handle to a vault: the shared catalog database plus one database file per
/// patient namespace next to it. Not `Sync`: each worker opens its own.
pub struct Database {
    path: Utf8PathBuf,
    namespaces: Utf8PathBuf,
    settings: StoreSettings,
    conn: Connection,
}

impl Database {
    /// `vault.sqlite` keeps its namespaces under `vault.namespaces/`.
    pub fn open(path: &Utf8Path, settings: &StoreSettings) -> Result<Self, KiraError> {
        let namespaces = path.with_extension(NAMESPACE_DIR_EXTENSION);
        fs::create_dir_all(namespaces.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {namespaces}: {err}")))?;
        let conn = open_connection(path, settings)?;
        Ok(Self {
            path: path.to_path_buf(),
            namespaces,
            settings: settings.clone(),
            conn,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn namespace_dir(&self) -> &Utf8Path {
        &self.namespaces
    }

    /// Connection to the shared database holding the reference catalog.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn namespace_path(&self, patient: &PatientId) -> Utf8PathBuf {
        self.namespaces
            .join(format!("{}.{NAMESPACE_FILE_EXTENSION}", patient.namespace()))
    }

    /// Connection to a provisioned namespace, or `None` if it was never
    /// committed. Never creates files.
    pub fn open_namespace(&self, patient: &PatientId) -> Result<Option<Connection>, KiraError> {
        let path = self.namespace_path(patient);
        if !path.exists() {
            return Ok(None);
        }
        let conn = open_connection(&path, &self.settings)?;
        if !table_exists(&conn, &NamespaceTables::for_patient(patient).expression)? {
            return Ok(None);
        }
        Ok(Some(conn))
    }

    pub fn namespace_exists(&self, patient: &PatientId) -> Result<bool, KiraError> {
        Ok(self.open_namespace(patient)?.is_some())
    }

    /// Patients with a provisioned namespace, sorted by id.
    pub fn namespaces(&self) -> Result<Vec<PatientId>, KiraError> {
        let entries = fs::read_dir(self.namespaces.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", self.namespaces)))?;
        let mut patients = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let Some(patient) = name.to_str().and_then(patient_from_file) else {
                continue;
            };
            if self.namespace_exists(&patient)? {
                patients.push(patient);
            }
        }
        patients.sort();
        Ok(patients)
    }

    /// Starts a write transaction on one patient's namespace file. Runs for the
    /// same patient wait here up to the busy timeout; other patients hold
    /// their own locks.
    pub fn begin(&self, patient: &PatientId) -> Result<UnitOfWork, KiraError> {
        let conn = open_connection(&self.namespace_path(patient), &self.settings)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(UnitOfWork {
            conn,
            patient: patient.clone(),
            open: true,
        })
    }
}

fn open_connection(path: &Utf8Path, settings: &StoreSettings) -> Result<Connection, KiraError> {
    let conn = Connection::open(path.as_std_path())?;
    conn.busy_timeout(settings.busy_timeout)?;
    let mut mode: String = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        mode = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    tracing::debug!(path = %path, journal_mode = mode.as_str(), "database opened");
    Ok(conn)
}

/// One ingestion's transaction on a namespace file. Commits only through
/// [`UnitOfWork::commit`]; every other exit path rolls back.
#[derive(Debug)]
pub struct UnitOfWork {
    conn: Connection,
    patient: PatientId,
    open: bool,
}

impl UnitOfWork {
    pub fn patient(&self) -> &PatientId {
        &self.patient
    }

    pub fn commit(mut self) -> Result<(), KiraError> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }
}

impl Deref for UnitOfWork {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::warn!(patient = %self.patient, "unit of work rolled back"),
            Err(err) => tracing::error!(patient = %self.patient, error = %err, "rollback failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTables {
    pub expression: String,
    pub metadata: String,
}

impl NamespaceTables {
    pub fn for_patient(patient: &PatientId) -> Self {
        let namespace = patient.namespace();
        Self {
            expression: format!("{namespace}{EXPRESSION_SUFFIX}"),
            metadata: format!("{namespace}{METADATA_SUFFIX}"),
        }
    }

    pub fn expression_quoted(&self) -> String {
        quote_ident(&self.expression)
    }

    pub fn metadata_quoted(&self) -> String {
        quote_ident(&self.metadata)
    }
}

/// Patient ids are validated to `[a-z0-9_]`, so quoting cannot be escaped.
fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// Inverse of [`Database::namespace_path`] for a file name.
pub fn patient_from_file(name: &str) -> Option<PatientId> {
    name.strip_prefix(NAMESPACE_PREFIX)?
        .strip_suffix(NAMESPACE_FILE_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool, KiraError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn record_count(conn: &Connection, tables: &NamespaceTables) -> Result<usize, KiraError> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", tables.expression_quoted()),
        [],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or(0))
}
