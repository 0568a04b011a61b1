use std::fs::File;
use std::io::{BufReader, Read};

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use crate::domain::{FormatProfile, InputRow};
use crate::error::KiraError;

/// Name given to an unnamed leading column (R row names).
pub const ROW_NAMES_COLUMN: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: String,
    pub bytes: u64,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl RawTable {
    pub fn read_path(path: &Utf8Path) -> Result<(Self, SourceInfo), KiraError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| KiraError::TableRead(format!("open {path}: {err}")))?;
        let meta = file
            .metadata()
            .map_err(|err| KiraError::TableRead(format!("stat {path}: {err}")))?;
        let modified_at = meta
            .modified()
            .ok()
            .map(|time| chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339());

        let mut content = String::new();
        let mut reader: Box<dyn Read> = if path.extension() == Some("gz") {
            Box::new(MultiGzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        reader
            .read_to_string(&mut content)
            .map_err(|err| KiraError::TableRead(format!("read {path}: {err}")))?;

        let table = Self::parse_str(&content)?;
        let source = SourceInfo {
            path: path.to_string(),
            bytes: meta.len(),
            modified_at,
        };
        Ok((table, source))
    }

    /// Parses a delimited table; tab vs. comma is decided from the header line.
    pub fn parse_str(content: &str) -> Result<Self, KiraError> {
        let header_line = content
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| KiraError::TableRead("input table is empty".to_string()))?;
        let delimiter = if header_line.contains('\t') { b'\t' } else { b',' };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut headers = reader
            .headers()
            .map_err(|err| KiraError::TableRead(err.to_string()))?
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| KiraError::TableRead(err.to_string()))?;
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }
            records.push(record.iter().map(|field| field.to_string()).collect::<Vec<_>>());
        }

        // write.table() omits the header cell above row names.
        if records
            .first()
            .map(|first| first.len() == headers.len() + 1)
            .unwrap_or(false)
        {
            headers.insert(0, ROW_NAMES_COLUMN.to_string());
        }

        if headers.is_empty() {
            return Err(KiraError::TableRead("input table has no header".to_string()));
        }

        Ok(Self { headers, records })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    }

    pub fn column_sample(&self, index: usize, limit: usize) -> Vec<&str> {
        self.records
            .iter()
            .filter_map(|record| record.get(index).map(|value| value.as_str()))
            .filter(|value| !value.is_empty())
            .take(limit)
            .collect()
    }

    pub fn input_rows(&self, profile: &FormatProfile) -> Result<Vec<InputRow>, KiraError> {
        let id_index = self.column_index(&profile.id_column).ok_or_else(|| {
            KiraError::Detection(format!("identifier column `{}` not present", profile.id_column))
        })?;
        let value_index = self.column_index(&profile.value_column).ok_or_else(|| {
            KiraError::Detection(format!("value column `{}` not present", profile.value_column))
        })?;

        Ok(self
            .records
            .iter()
            .enumerate()
            .map(|(idx, record)| InputRow {
                row_index: idx + 1,
                identifier: record.get(id_index).cloned().unwrap_or_default(),
                raw_value: record.get(value_index).cloned().unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IdKind, ValueKind};

    #[test]
    fn parse_tab_and_comma() {
        let tsv = RawTable::parse_str("transcript_id\tfold_change\nENST1\t2.0\n").unwrap();
        assert_eq!(tsv.headers, vec!["transcript_id", "fold_change"]);
        assert_eq!(tsv.records.len(), 1);

        let csv = RawTable::parse_str("SYMBOL,log2FoldChange\nTP53,1.2\n\n").unwrap();
        assert_eq!(csv.column_index("symbol"), Some(0));
        assert_eq!(csv.records.len(), 1);
    }

    #[test]
    fn row_names_column_is_recovered() {
        let content = "baseMean\tlog2FoldChange\tpadj\nTP53\t10.5\t1.2\t0.01\n";
        let table = RawTable::parse_str(content).unwrap();
        assert_eq!(table.headers[0], ROW_NAMES_COLUMN);
        assert_eq!(table.column_index("log2FoldChange"), Some(2));
    }

    #[test]
    fn input_rows_carry_row_index() {
        let table = RawTable::parse_str("id,fc\nA,2\nB,\n").unwrap();
        let profile = FormatProfile {
            id_column: "id".to_string(),
            id_kind: IdKind::TranscriptId,
            value_column: "fc".to_string(),
            value_kind: ValueKind::LinearFold,
        };
        let rows = table.input_rows(&profile).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].row_index, 2);
        assert_eq!(rows[1].raw_value, "");
    }
}
