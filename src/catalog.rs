use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::TranscriptId;
use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneRef {
    pub gene_id: String,
    pub gene_symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub transcript_id: TranscriptId,
    pub gene_id: String,
    pub gene_symbol: String,
}

/// Read side of the shared reference catalog. Populated by external loaders.
pub trait ReferenceCatalog {
    fn lookup_transcript(&self, id: &str) -> Result<Option<GeneRef>, KiraError>;

    /// Case-insensitive symbol lookup.
    fn lookup_by_symbol(&self, symbol: &str) -> Result<Vec<TranscriptId>, KiraError>;

    /// Every transcript with its gene; used to build the per-run index.
    fn transcripts(&self) -> Result<Vec<CatalogEntry>, KiraError>;
}

pub const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS gene (
    gene_id TEXT PRIMARY KEY,
    gene_symbol TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS gene_symbol_nocase ON gene (gene_symbol COLLATE NOCASE);
CREATE TABLE IF NOT EXISTS transcript (
    transcript_id TEXT PRIMARY KEY,
    gene_id TEXT NOT NULL REFERENCES gene (gene_id)
);
CREATE INDEX IF NOT EXISTS transcript_gene ON transcript (gene_id);
"#;

pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub fn open(path: &Utf8Path, busy_timeout: Duration) -> Result<Self, KiraError> {
        let conn = Connection::open(path.as_std_path())?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Creates the catalog tables; loaders normally own this.
    pub fn install_schema(conn: &Connection) -> Result<(), KiraError> {
        conn.execute_batch(CATALOG_SCHEMA)?;
        Ok(())
    }

    pub fn seed(conn: &mut Connection, entries: &[CatalogEntry]) -> Result<(), KiraError> {
        Self::install_schema(conn)?;
        let tx = conn.transaction()?;
        {
            let mut gene = tx.prepare(
                "INSERT OR IGNORE INTO gene (gene_id, gene_symbol) VALUES (?1, ?2)",
            )?;
            let mut transcript = tx.prepare(
                "INSERT OR REPLACE INTO transcript (transcript_id, gene_id) VALUES (?1, ?2)",
            )?;
            for entry in entries {
                gene.execute(params![entry.gene_id, entry.gene_symbol])?;
                transcript.execute(params![entry.transcript_id.as_str(), entry.gene_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl ReferenceCatalog for SqliteCatalog {
    /// Called once per stored row by `validate`, so the statement is cached.
    fn lookup_transcript(&self, id: &str) -> Result<Option<GeneRef>, KiraError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT g.gene_id, g.gene_symbol FROM transcript t \
                 JOIN gene g ON g.gene_id = t.gene_id WHERE t.transcript_id = ?1",
            )
            .map_err(|err| KiraError::Catalog(err.to_string()))?;
        stmt.query_row(params![id], |row| {
            Ok(GeneRef {
                gene_id: row.get(0)?,
                gene_symbol: row.get(1)?,
            })
        })
        .optional()
        .map_err(|err| KiraError::Catalog(err.to_string()))
    }

    fn lookup_by_symbol(&self, symbol: &str) -> Result<Vec<TranscriptId>, KiraError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.transcript_id FROM gene g JOIN transcript t ON t.gene_id = g.gene_id \
                 WHERE g.gene_symbol = ?1 COLLATE NOCASE ORDER BY t.transcript_id",
            )
            .map_err(|err| KiraError::Catalog(err.to_string()))?;
        let rows = stmt
            .query_map(params![symbol], |row| row.get::<_, String>(0))
            .map_err(|err| KiraError::Catalog(err.to_string()))?;
        rows.map(|row| {
            row.map(TranscriptId::new)
                .map_err(|err| KiraError::Catalog(err.to_string()))
        })
        .collect()
    }

    fn transcripts(&self) -> Result<Vec<CatalogEntry>, KiraError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.transcript_id, g.gene_id, g.gene_symbol FROM transcript t \
                 JOIN gene g ON g.gene_id = t.gene_id",
            )
            .map_err(|err| KiraError::Catalog(err.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CatalogEntry {
                    transcript_id: TranscriptId::new(row.get::<_, String>(0)?),
                    gene_id: row.get(1)?,
                    gene_symbol: row.get(2)?,
                })
            })
            .map_err(|err| KiraError::Catalog(err.to_string()))?;
        rows.map(|row| row.map_err(|err| KiraError::Catalog(err.to_string())))
            .collect()
    }
}

/// In-process catalog for tests and offline dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    transcripts: BTreeMap<String, GeneRef>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transcript_id: &str, gene_id: &str, gene_symbol: &str) -> Self {
        self.insert(transcript_id, gene_id, gene_symbol);
        self
    }

    pub fn insert(&mut self, transcript_id: &str, gene_id: &str, gene_symbol: &str) {
        self.transcripts.insert(
            transcript_id.to_string(),
            GeneRef {
                gene_id: gene_id.to_string(),
                gene_symbol: gene_symbol.to_string(),
            },
        );
    }
}

impl ReferenceCatalog for MemoryCatalog {
    fn lookup_transcript(&self, id: &str) -> Result<Option<GeneRef>, KiraError> {
        Ok(self.transcripts.get(id).cloned())
    }

    fn lookup_by_symbol(&self, symbol: &str) -> Result<Vec<TranscriptId>, KiraError> {
        Ok(self
            .transcripts
            .iter()
            .filter(|(_, gene)| gene.gene_symbol.eq_ignore_ascii_case(symbol))
            .map(|(id, _)| TranscriptId::new(id.clone()))
            .collect())
    }

    fn transcripts(&self) -> Result<Vec<CatalogEntry>, KiraError> {
        Ok(self
            .transcripts
            .iter()
            .map(|(id, gene)| CatalogEntry {
                transcript_id: TranscriptId::new(id.clone()),
                gene_id: gene.gene_id.clone(),
                gene_symbol: gene.gene_symbol.clone(),
            })
            .collect())
    }
}

/// Identifier space of the catalog, built once per ingestion run.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    exact: HashSet<String>,
    unversioned: HashMap<String, Vec<TranscriptId>>,
    symbols: HashMap<String, Vec<TranscriptId>>,
    symbols_by_len: HashMap<usize, Vec<String>>,
}

impl CatalogIndex {
    pub fn build(catalog: &dyn ReferenceCatalog) -> Result<Self, KiraError> {
        let mut index = Self::default();
        for entry in catalog.transcripts()? {
            let id = entry.transcript_id.as_str().to_string();
            index
                .unversioned
                .entry(strip_version(&id).to_string())
                .or_default()
                .push(entry.transcript_id.clone());
            index
                .symbols
                .entry(entry.gene_symbol.to_ascii_uppercase())
                .or_default()
                .push(entry.transcript_id);
            index.exact.insert(id);
        }
        for transcripts in index
            .symbols
            .values_mut()
            .chain(index.unversioned.values_mut())
        {
            transcripts.sort();
            transcripts.dedup();
        }
        for symbol in index.symbols.keys() {
            index
                .symbols_by_len
                .entry(symbol.chars().count())
                .or_default()
                .push(symbol.clone());
        }
        for bucket in index.symbols_by_len.values_mut() {
            bucket.sort();
        }
        tracing::debug!(
            transcripts = index.transcript_count(),
            symbols = index.symbols.len(),
            "catalog index built"
        );
        Ok(index)
    }

    pub fn transcript_count(&self) -> usize {
        self.exact.len()
    }

    pub fn contains(&self, transcript_id: &str) -> bool {
        self.exact.contains(transcript_id)
    }

    pub fn by_unversioned(&self, id: &str) -> &[TranscriptId] {
        self.unversioned
            .get(strip_version(id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// `symbol_upper` must already be upper-cased.
    pub fn by_symbol(&self, symbol_upper: &str) -> &[TranscriptId] {
        self.symbols
            .get(symbol_upper)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn symbols_with_len(&self, len: usize) -> &[String] {
        self.symbols_by_len
            .get(&len)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Drops a trailing `.<digits>` version suffix.
pub fn strip_version(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((base, version))
            if !base.is_empty()
                && !version.is_empty()
                && version.chars().all(|ch| ch.is_ascii_digit()) =>
        {
            base
        }
        _ => id,
    }
}
