use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tempfile::TempDir;

use kira_expression_vault::config::StoreSettings;
use kira_expression_vault::domain::{MatchConfidence, PatientId, ResolvedRow, TranscriptId};
use kira_expression_vault::error::KiraError;
use kira_expression_vault::provision::provision;
use kira_expression_vault::store::{Database, NamespaceTables, record_count};
use kira_expression_vault::writer::{CancelFlag, replace_rows};

fn row(id: &str, fold_change: f64, source_row: usize) -> ResolvedRow {
    ResolvedRow::new(
        TranscriptId::new(id),
        fold_change,
        MatchConfidence::Exact,
        source_row,
    )
    .unwrap()
}

fn open(dir: &TempDir) -> Database {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/vault.sqlite")).unwrap();
    Database::open(&path, &StoreSettings::default()).unwrap()
}

#[test]
fn open_creates_parent_directories_and_uses_wal() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    assert!(dir.path().join("nested/vault.sqlite").exists());
    assert!(dir.path().join("nested/vault.namespaces").is_dir());
    let mode: String = db
        .connection()
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");

    let patient: PatientId = "wal".parse().unwrap();
    let uow = db.begin(&patient).unwrap();
    let mode: String = uow
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn failure_in_last_batch_leaves_no_namespace() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let patient: PatientId = "atom".parse().unwrap();
    let rows = vec![
        row("T1", 2.0, 1),
        row("T2", 3.0, 2),
        row("T3", 4.0, 3),
        row("T4", 5.0, 4),
        row("T1", 6.0, 5),
    ];

    {
        let uow = db.begin(&patient).unwrap();
        let handle = provision(&uow, &patient).unwrap();
        let err = replace_rows(&uow, &handle, &rows, 2, &CancelFlag::new(), |_, _| {}).unwrap_err();
        assert_matches!(err, KiraError::Transaction(message) if message.contains("row 5"));
    }

    assert!(!db.namespace_exists(&patient).unwrap());
}

#[test]
fn failure_keeps_previous_contents() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let patient: PatientId = "atom2".parse().unwrap();

    let uow = db.begin(&patient).unwrap();
    let handle = provision(&uow, &patient).unwrap();
    let report = replace_rows(
        &uow,
        &handle,
        &[row("T1", 2.0, 1), row("T2", 0.5, 2)],
        1000,
        &CancelFlag::new(),
        |_, _| {},
    )
    .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.batches, 1);
    uow.commit().unwrap();

    {
        let uow = db.begin(&patient).unwrap();
        let handle = provision(&uow, &patient).unwrap();
        assert!(!handle.created);
        let cancel = CancelFlag::new();
        let mut seen = Vec::new();
        let err = replace_rows(
            &uow,
            &handle,
            &[row("T3", 2.0, 1), row("T4", 3.0, 2), row("T5", 4.0, 3)],
            1,
            &cancel,
            |batch, written| {
                seen.push((batch, written));
                cancel.cancel();
            },
        )
        .unwrap_err();
        assert_matches!(err, KiraError::Cancelled);
        assert_eq!(seen, vec![(1, 1)]);
    }

    let tables = NamespaceTables::for_patient(&patient);
    let conn = db.open_namespace(&patient).unwrap().unwrap();
    assert_eq!(record_count(&conn, &tables).unwrap(), 2);
}

#[test]
fn provisioning_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let patient: PatientId = "twice".parse().unwrap();
    {
        let db = open(&dir);
        let uow = db.begin(&patient).unwrap();
        assert!(provision(&uow, &patient).unwrap().created);
        uow.commit().unwrap();
    }

    let db = open(&dir);
    let uow = db.begin(&patient).unwrap();
    let handle = provision(&uow, &patient).unwrap();
    assert!(!handle.created);
    assert_eq!(handle.tables, NamespaceTables::for_patient(&patient));
}

#[test]
fn open_unit_of_work_does_not_block_other_patients() {
    let dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("vault.sqlite")).unwrap();
    let settings = StoreSettings {
        busy_timeout: Duration::from_millis(300),
        ..StoreSettings::default()
    };
    let first = Database::open(&path, &settings).unwrap();
    let second = Database::open(&path, &settings).unwrap();
    let alpha: PatientId = "alpha".parse().unwrap();
    let beta: PatientId = "beta".parse().unwrap();

    let held = first.begin(&alpha).unwrap();
    let handle = provision(&held, &alpha).unwrap();
    replace_rows(&held, &handle, &[row("T1", 2.0, 1)], 1000, &CancelFlag::new(), |_, _| {})
        .unwrap();

    let uow = second.begin(&beta).unwrap();
    let handle = provision(&uow, &beta).unwrap();
    replace_rows(&uow, &handle, &[row("T2", 3.0, 1)], 1000, &CancelFlag::new(), |_, _| {})
        .unwrap();
    uow.commit().unwrap();
    assert!(second.namespace_exists(&beta).unwrap());
    assert!(!second.namespace_exists(&alpha).unwrap());

    assert_matches!(second.begin(&alpha), Err(KiraError::Transient(_)));

    held.commit().unwrap();
    assert_eq!(second.namespaces().unwrap(), vec![alpha, beta]);
}
