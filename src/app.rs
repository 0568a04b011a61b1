use std::fmt;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::catalog::{CatalogIndex, ReferenceCatalog};
use crate::config::{ResolverSettings, StoreSettings};
use crate::detect::{self, Detection};
use crate::domain::{FormatProfile, PatientId, ResolvedRow};
use crate::error::{IngestionFailure, KiraError};
use crate::normalize::{ValueStats, normalize_matches};
use crate::provenance::{self, IngestionMetadata};
use crate::provision::provision;
use crate::registry::{self, NamespaceInfo, ValidationReport};
use crate::resolve::{MatchStats, Resolver};
use crate::store::{Database, NamespaceTables, record_count};
use crate::table::{RawTable, SourceInfo};
use crate::writer::{CancelFlag, WriteReport, replace_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestPhase {
    Validating,
    Matching,
    Normalizing,
    Provisioning,
    Writing,
    Recording,
    Complete,
    Failed,
}

impl fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestPhase::Validating => "Validating",
            IngestPhase::Matching => "Matching",
            IngestPhase::Normalizing => "Normalizing",
            IngestPhase::Provisioning => "Provisioning",
            IngestPhase::Writing => "Writing",
            IngestPhase::Recording => "Recording",
            IngestPhase::Complete => "Complete",
            IngestPhase::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub enum IngestSource {
    Path(Utf8PathBuf),
    /// Already-parsed table, e.g. from an upload handler.
    Table { table: RawTable, source: SourceInfo },
}

#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub patient_id: String,
    pub source: IngestSource,
    pub dry_run: bool,
    /// Column mapping decided by a human; skips auto-detection.
    pub profile_override: Option<FormatProfile>,
}

/// Statistics collected so far; attached to failures as well as reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub matching: Option<MatchStats>,
    pub values: Option<ValueStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub patient_id: PatientId,
    pub dry_run: bool,
    pub phase: IngestPhase,
    pub source: SourceInfo,
    pub detection: Detection,
    pub matching: MatchStats,
    pub values: ValueStats,
    /// Would-be figures when `dry_run` is set.
    pub write: WriteReport,
    pub namespace_created: bool,
    /// Only set on dry runs; real runs fail instead.
    pub below_min_match_rate: bool,
    pub started_at: String,
    pub completed_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub patients: Vec<PatientId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropResult {
    pub patient_id: PatientId,
    pub removed_records: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: IngestPhase,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: ReferenceCatalog> {
    db: Database,
    catalog: C,
    resolver: ResolverSettings,
    store: StoreSettings,
}

impl<C: ReferenceCatalog> App<C> {
    pub fn new(db: Database, catalog: C, resolver: ResolverSettings, store: StoreSettings) -> Self {
        Self {
            db,
            catalog,
            resolver,
            store,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn ingest(
        &mut self,
        request: IngestionRequest,
        cancel: &CancelFlag,
        sink: &dyn ProgressSink,
    ) -> Result<IngestionReport, IngestionFailure> {
        let started = Instant::now();
        let started_at = provenance::now_rfc3339();
        let mut stats = RunStats::default();
        let emit = |phase: IngestPhase, message: String| {
            sink.event(ProgressEvent {
                phase,
                message: format!("phase={phase}; {message}"),
                elapsed: Some(started.elapsed()),
            })
        };
        let fail = |phase: IngestPhase, error: KiraError, stats: &RunStats| {
            tracing::error!(%phase, error = %error, "ingestion failed");
            sink.event(ProgressEvent {
                phase: IngestPhase::Failed,
                message: format!("phase=Failed; during {phase}: {error}"),
                elapsed: Some(started.elapsed()),
            });
            IngestionFailure::new(phase, error, stats.clone())
        };

        // Validating
        let patient: PatientId = request
            .patient_id
            .parse()
            .map_err(|err| fail(IngestPhase::Validating, err, &stats))?;
        emit(IngestPhase::Validating, format!("patient {patient}"));
        let (table, source) = match request.source {
            IngestSource::Path(path) => RawTable::read_path(&path),
            IngestSource::Table { table, source } => Ok((table, source)),
        }
        .map_err(|err| fail(IngestPhase::Validating, err, &stats))?;
        let detection = match request.profile_override {
            Some(profile) => detect::check_override(&table, profile),
            None => detect::detect(&table),
        }
        .map_err(|err| fail(IngestPhase::Validating, err, &stats))?;
        let rows = table
            .input_rows(&detection.profile)
            .map_err(|err| fail(IngestPhase::Validating, err, &stats))?;
        if rows.is_empty() {
            return Err(fail(
                IngestPhase::Validating,
                KiraError::TableRead("input table has no data rows".to_string()),
                &stats,
            ));
        }
        tracing::info!(
            patient = %patient,
            rows = rows.len(),
            id_column = detection.profile.id_column.as_str(),
            value_column = detection.profile.value_column.as_str(),
            "input validated"
        );

        // Matching
        emit(IngestPhase::Matching, format!("{} rows", rows.len()));
        let index = CatalogIndex::build(&self.catalog)
            .map_err(|err| fail(IngestPhase::Matching, err, &stats))?;
        let outcome =
            Resolver::new(&index, &self.resolver).resolve_rows(rows, detection.profile.id_kind);
        drop(index);
        stats.matching = Some(outcome.stats.clone());
        let matching = outcome.stats;
        let rate_check = matching.enforce_min_rate(self.resolver.min_match_rate);
        tracing::info!(
            patient = %patient,
            matched = matching.matched_rows,
            unresolved = matching.unresolved_rows,
            match_rate = matching.match_rate,
            "identifiers resolved"
        );
        let below_min_match_rate = rate_check.is_err();
        if let Err(err) = rate_check {
            if !request.dry_run {
                return Err(fail(IngestPhase::Matching, err, &stats));
            }
        }

        // Normalizing
        emit(
            IngestPhase::Normalizing,
            format!("{} matched rows", outcome.matches.len()),
        );
        let (records, values) = normalize_matches(
            outcome.matches,
            detection.profile.value_kind,
            self.store.baseline_epsilon,
            self.resolver.unresolved_sample,
        );
        stats.values = Some(values.clone());

        if request.dry_run {
            let existing = self
                .existing_records(&patient)
                .map_err(|err| fail(IngestPhase::Normalizing, err, &stats))?;
            emit(IngestPhase::Complete, "dry run, nothing written".to_string());
            return Ok(IngestionReport {
                write: WriteReport::planned(records.len(), existing.unwrap_or(0), self.store.batch_size),
                namespace_created: existing.is_none(),
                patient_id: patient,
                dry_run: true,
                phase: IngestPhase::Complete,
                source,
                detection,
                matching,
                values,
                below_min_match_rate,
                started_at,
                completed_at: provenance::now_rfc3339(),
            });
        }

        let persisted = persist(
            &self.db,
            &self.store,
            &patient,
            &records,
            cancel,
            &emit,
            |write, completed_at| IngestionMetadata {
                patient_id: patient.clone(),
                source: source.clone(),
                profile: detection.profile.clone(),
                detection: detection.confidence,
                matching: matching.clone(),
                values: values.clone(),
                write: write.clone(),
                started_at: started_at.clone(),
                completed_at: completed_at.to_string(),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
        let (write, namespace_created, completed_at) =
            persisted.map_err(|(phase, err)| fail(phase, err, &stats))?;

        emit(
            IngestPhase::Complete,
            format!("{} records stored", write.inserted),
        );
        tracing::info!(patient = %patient, records = write.inserted, "ingestion complete");
        Ok(IngestionReport {
            patient_id: patient,
            dry_run: false,
            phase: IngestPhase::Complete,
            source,
            detection,
            matching,
            values,
            write,
            namespace_created,
            below_min_match_rate: false,
            started_at,
            completed_at,
        })
    }

    pub fn list(&self) -> Result<ListResult, KiraError> {
        Ok(ListResult {
            patients: registry::list(&self.db)?,
        })
    }

    pub fn validate(&self, patient_id: &str) -> Result<ValidationReport, KiraError> {
        let patient: PatientId = patient_id.parse()?;
        registry::validate(&self.db, &self.catalog, &patient)
    }

    pub fn info(&self, patient_id: &str) -> Result<NamespaceInfo, KiraError> {
        let patient: PatientId = patient_id.parse()?;
        registry::info(&self.db, &patient)
    }

    pub fn drop_patient(&mut self, patient_id: &str) -> Result<DropResult, KiraError> {
        let patient: PatientId = patient_id.parse()?;
        let removed_records = registry::drop_namespace(&self.db, &patient)?;
        Ok(DropResult {
            patient_id: patient,
            removed_records,
        })
    }

    fn existing_records(&self, patient: &PatientId) -> Result<Option<usize>, KiraError> {
        match self.db.open_namespace(patient)? {
            Some(conn) => record_count(&conn, &NamespaceTables::for_patient(patient)).map(Some),
            None => Ok(None),
        }
    }
}

/// Provisioning, writing and recording as one unit of work. Returning early
/// drops the unit of work, which rolls everything back.
fn persist(
    db: &Database,
    settings: &StoreSettings,
    patient: &PatientId,
    records: &[ResolvedRow],
    cancel: &CancelFlag,
    emit: &dyn Fn(IngestPhase, String),
    metadata: impl FnOnce(&WriteReport, &str) -> IngestionMetadata,
) -> Result<(WriteReport, bool, String), (IngestPhase, KiraError)> {
    emit(IngestPhase::Provisioning, format!("namespace {}", patient.namespace()));
    let uow = db.begin(patient).map_err(|err| (IngestPhase::Provisioning, err))?;
    let handle = provision(&uow, patient).map_err(|err| (IngestPhase::Provisioning, err))?;

    emit(IngestPhase::Writing, format!("{} records", records.len()));
    let write = replace_rows(
        &uow,
        &handle,
        records,
        settings.batch_size,
        cancel,
        |batch, written| emit(IngestPhase::Writing, format!("batch {batch}; {written} records")),
    )
    .map_err(|err| (IngestPhase::Writing, err))?;

    emit(IngestPhase::Recording, "provenance".to_string());
    cancel.check().map_err(|err| (IngestPhase::Recording, err))?;
    let completed_at = provenance::now_rfc3339();
    provenance::record(&uow, &handle, &metadata(&write, &completed_at))
        .map_err(|err| (IngestPhase::Recording, err))?;
    uow.commit().map_err(|err| (IngestPhase::Recording, err))?;

    Ok((write, handle.created, completed_at))
}
