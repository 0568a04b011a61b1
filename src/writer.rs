use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::domain::ResolvedRow;
use crate::error::KiraError;
use crate::provision::NamespaceHandle;
use crate::store::UnitOfWork;

/// Cooperative cancellation, honoured at batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), KiraError> {
        if self.is_cancelled() {
            return Err(KiraError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    /// Rows removed from the previous upload.
    pub replaced: usize,
    pub inserted: usize,
    pub batches: usize,
}

impl WriteReport {
    pub fn planned(rows: usize, existing: usize, batch_size: usize) -> Self {
        Self {
            replaced: existing,
            inserted: rows,
            batches: rows.div_ceil(batch_size.max(1)),
        }
    }
}

/// Replaces the namespace's rows with `rows`. Nothing is visible until the
/// caller commits `uow`.
pub fn replace_rows(
    uow: &UnitOfWork,
    handle: &NamespaceHandle,
    rows: &[ResolvedRow],
    batch_size: usize,
    cancel: &CancelFlag,
    mut on_batch: impl FnMut(usize, usize),
) -> Result<WriteReport, KiraError> {
    cancel.check()?;
    let replaced = uow.execute(
        &format!("DELETE FROM {}", handle.tables.expression_quoted()),
        [],
    )?;

    let mut stmt = uow.prepare_cached(&format!(
        "INSERT INTO {} (transcript_id, fold_change) VALUES (?1, ?2)",
        handle.tables.expression_quoted()
    ))?;

    let mut report = WriteReport {
        replaced,
        ..WriteReport::default()
    };
    for batch in rows.chunks(batch_size.max(1)) {
        cancel.check()?;
        for row in batch {
            stmt.execute(params![row.transcript_id().as_str(), row.fold_change()])
                .map_err(|err| match KiraError::from(err) {
                    KiraError::Transaction(message) => KiraError::Transaction(format!(
                        "row {} ({}): {message}",
                        row.source_row_index(),
                        row.transcript_id()
                    )),
                    other => other,
                })?;
        }
        report.batches += 1;
        report.inserted += batch.len();
        tracing::debug!(
            patient = %handle.patient_id,
            batch = report.batches,
            inserted = report.inserted,
            "batch written"
        );
        on_batch(report.batches, report.inserted);
    }
    Ok(report)
}
