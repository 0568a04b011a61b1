use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use rusqlite::Connection;
use tempfile::TempDir;

use kira_expression_vault::app::{App, IngestSource, IngestionRequest};
use kira_expression_vault::catalog::{CatalogEntry, SqliteCatalog};
use kira_expression_vault::config::{ResolverSettings, StoreSettings};
use kira_expression_vault::domain::TranscriptId;
use kira_expression_vault::error::KiraError;
use kira_expression_vault::output::JsonOutput;
use kira_expression_vault::store::Database;
use kira_expression_vault::table::{RawTable, SourceInfo};
use kira_expression_vault::writer::CancelFlag;

fn entry(transcript_id: &str, gene_id: &str, gene_symbol: &str) -> CatalogEntry {
    CatalogEntry {
        transcript_id: TranscriptId::new(transcript_id),
        gene_id: gene_id.to_string(),
        gene_symbol: gene_symbol.to_string(),
    }
}

/// Catalog in the vault file, namespaces beside it, as in production.
fn open_app(dir: &TempDir) -> App<SqliteCatalog> {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("vault.sqlite")).unwrap();
    let settings = StoreSettings::default();
    let mut db = Database::open(&path, &settings).unwrap();
    SqliteCatalog::seed(
        db.connection_mut(),
        &[
            entry("ENST00000269305", "ENSG00000141510", "TP53"),
            entry("ENST00000357654", "ENSG00000012048", "BRCA1"),
        ],
    )
    .unwrap();
    let catalog = SqliteCatalog::open(&path, settings.busy_timeout).unwrap();
    App::new(db, catalog, ResolverSettings::default(), settings)
}

fn ingest(app: &mut App<SqliteCatalog>, patient: &str) {
    let content = "transcript_id\tfold_change\nENST00000269305\t2.0\nENST00000357654\t0.5\n";
    app.ingest(
        IngestionRequest {
            patient_id: patient.to_string(),
            source: IngestSource::Table {
                table: RawTable::parse_str(content).unwrap(),
                source: SourceInfo {
                    path: format!("{patient}.tsv"),
                    bytes: content.len() as u64,
                    modified_at: None,
                },
            },
            dry_run: false,
            profile_override: None,
        },
        &CancelFlag::new(),
        &JsonOutput,
    )
    .unwrap();
}

#[test]
fn orphaned_row_is_one_violation() {
    let dir = TempDir::new().unwrap();
    let mut app = open_app(&dir);
    ingest(&mut app, "p5");

    let clean = app.validate("p5").unwrap();
    assert!(clean.is_valid());
    assert_eq!(clean.records, 2);

    app.database()
        .open_namespace(&"p5".parse().unwrap())
        .unwrap()
        .unwrap()
        .execute(
            "INSERT INTO \"patient_p5__expression\" (transcript_id, fold_change) \
             VALUES ('ENST99999999999', 3.0)",
            [],
        )
        .unwrap();

    let report = app.validate("p5").unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.orphaned_records, 1);
    assert_eq!(report.orphaned_sample, vec!["ENST99999999999".to_string()]);
    assert_eq!(report.violations(), 1);
    assert!(!report.is_valid());
}

#[test]
fn list_info_and_drop() {
    let dir = TempDir::new().unwrap();
    let mut app = open_app(&dir);
    ingest(&mut app, "zeta");
    ingest(&mut app, "Alpha");

    let listed = app
        .list()
        .unwrap()
        .patients
        .iter()
        .map(|patient| patient.to_string())
        .collect::<Vec<_>>();
    assert_eq!(listed, vec!["alpha", "zeta"]);

    let info = app.info("ALPHA").unwrap();
    assert_eq!(info.records, 2);
    let metadata = info.metadata.unwrap();
    assert_eq!(metadata.source.path, "Alpha.tsv");
    assert_eq!(metadata.write.inserted, 2);
    assert_eq!(metadata.matching.match_rate, 1.0);

    let dropped = app.drop_patient("zeta").unwrap();
    assert_eq!(dropped.removed_records, 2);
    assert_eq!(app.list().unwrap().patients.len(), 1);
    assert_matches!(app.info("zeta"), Err(KiraError::NamespaceNotFound(_)));
    assert_matches!(app.drop_patient("zeta"), Err(KiraError::NamespaceNotFound(_)));
    assert_matches!(app.validate("zeta"), Err(KiraError::NamespaceNotFound(_)));
}

#[test]
fn stray_files_and_tables_are_not_listed() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir);
    app.database()
        .connection()
        .execute_batch("CREATE TABLE patient_notes__expression (body TEXT)")
        .unwrap();
    let namespaces = app.database().namespace_dir();
    std::fs::write(namespaces.join("README.txt"), "notes").unwrap();
    std::fs::write(namespaces.join("patient_x.sqlite"), b"").unwrap();
    assert!(app.list().unwrap().patients.is_empty());
}

#[test]
fn legacy_table_values_are_counted_as_violations() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir);
    let path = app.database().namespace_path(&"legacy".parse().unwrap());
    Connection::open(path.as_std_path())
        .unwrap()
        .execute_batch(
            "CREATE TABLE \"patient_legacy__expression\" (transcript_id TEXT, fold_change REAL);
             INSERT INTO \"patient_legacy__expression\" VALUES
                 ('ENST00000269305', 1.0),
                 ('ENST00000357654', 0.0),
                 ('ENST00000269305', -2.0);",
        )
        .unwrap();

    let report = app.validate("legacy").unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.orphaned_records, 0);
    assert_eq!(report.baseline_violations, 1);
    assert_eq!(report.non_positive_violations, 2);
    assert!(!report.metadata_present);
    assert_eq!(report.violations(), 4);
    assert_eq!(app.list().unwrap().patients.len(), 1);
}

#[test]
fn metadata_is_readable_from_a_fresh_connection() {
    let dir = TempDir::new().unwrap();
    let mut app = open_app(&dir);
    ingest(&mut app, "p7");

    let path = app.database().namespace_path(&"p7".parse().unwrap());
    let conn = Connection::open(path.as_std_path()).unwrap();
    let (patient, stored, rate): (String, i64, f64) = conn
        .query_row(
            "SELECT patient_id, stored_records, match_rate FROM \"patient_p7__ingestion_metadata\"",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(patient, "p7");
    assert_eq!(stored, 2);
    assert_eq!(rate, 1.0);
}
