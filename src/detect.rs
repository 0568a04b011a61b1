use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{FormatProfile, IdKind, ValueKind};
use crate::error::KiraError;
use crate::table::{ROW_NAMES_COLUMN, RawTable};

pub const ID_CANDIDATES: &[(&str, IdKind)] = &[
    ("transcript_id", IdKind::TranscriptId),
    ("transcript", IdKind::TranscriptId),
    ("id", IdKind::TranscriptId),
    ("ensembl_id", IdKind::TranscriptId),
    ("SYMBOL", IdKind::GeneSymbol),
    ("gene_symbol", IdKind::GeneSymbol),
    ("gene_name", IdKind::GeneSymbol),
];

pub const VALUE_CANDIDATES: &[(&str, ValueKind)] = &[
    ("log2FoldChange", ValueKind::Log2Fold),
    ("log2fc", ValueKind::Log2Fold),
    ("cancer_fold", ValueKind::LinearFold),
    ("fold_change", ValueKind::LinearFold),
    ("fc", ValueKind::LinearFold),
];

const SAMPLE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionConfidence {
    /// Column names settled both roles.
    Header,
    /// The value scale was inferred from the numbers themselves.
    Heuristic,
    /// Supplied by the caller.
    Override,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub profile: FormatProfile,
    pub confidence: DetectionConfidence,
}

pub fn detect(table: &RawTable) -> Result<Detection, KiraError> {
    let (id_column, id_kind) = detect_id_column(table)?;

    if let Some((column, kind)) = first_candidate(&table.headers, VALUE_CANDIDATES) {
        return Ok(Detection {
            profile: FormatProfile {
                id_column,
                id_kind,
                value_column: column,
                value_kind: kind,
            },
            confidence: DetectionConfidence::Header,
        });
    }

    let id_index = table.column_index(&id_column);
    let numeric = table
        .headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| Some(*idx) != id_index)
        .find_map(|(idx, header)| {
            let values = numeric_sample(table, idx);
            (!values.is_empty()).then(|| (header.clone(), values))
        });

    let Some((value_column, values)) = numeric else {
        return Err(KiraError::Detection(format!(
            "no fold change column found (expected one of: {})",
            VALUE_CANDIDATES
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ")
        )));
    };

    let value_kind = classify_values(&values);
    tracing::warn!(
        column = value_column.as_str(),
        kind = %value_kind,
        "value scale inferred from data; confirm or override"
    );
    Ok(Detection {
        profile: FormatProfile {
            id_column,
            id_kind,
            value_column,
            value_kind,
        },
        confidence: DetectionConfidence::Heuristic,
    })
}

/// Checks that a caller-supplied profile refers to columns that exist.
pub fn check_override(table: &RawTable, profile: FormatProfile) -> Result<Detection, KiraError> {
    for column in [&profile.id_column, &profile.value_column] {
        if table.column_index(column).is_none() {
            return Err(KiraError::Detection(format!(
                "override column `{column}` not present in header"
            )));
        }
    }
    Ok(Detection {
        profile,
        confidence: DetectionConfidence::Override,
    })
}

fn detect_id_column(table: &RawTable) -> Result<(String, IdKind), KiraError> {
    if let Some(found) = first_candidate(&table.headers, ID_CANDIDATES) {
        return Ok(found);
    }
    if table.headers.first().map(String::as_str) == Some(ROW_NAMES_COLUMN) {
        let sample = table.column_sample(0, SAMPLE_SIZE);
        let kind = if !sample.is_empty() && sample.iter().all(|value| looks_like_transcript(value))
        {
            IdKind::TranscriptId
        } else {
            IdKind::GeneSymbol
        };
        return Ok((ROW_NAMES_COLUMN.to_string(), kind));
    }
    Err(KiraError::Detection(format!(
        "no identifier column found (expected one of: {})",
        ID_CANDIDATES
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

fn first_candidate<K: Copy>(headers: &[String], candidates: &[(&str, K)]) -> Option<(String, K)> {
    candidates.iter().find_map(|(name, kind)| {
        headers
            .iter()
            .find(|header| header.eq_ignore_ascii_case(name))
            .map(|header| (header.clone(), *kind))
    })
}

fn numeric_sample(table: &RawTable, index: usize) -> Vec<f64> {
    let sample = table.column_sample(index, SAMPLE_SIZE);
    let parsed = sample
        .iter()
        .filter_map(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .collect::<Vec<_>>();
    // Mostly non-numeric columns (e.g. a description) are not candidates.
    if parsed.len() * 2 < sample.len() {
        return Vec::new();
    }
    parsed
}

/// Log2 changes scatter around 0 and go negative; linear ratios sit around 1.
pub fn classify_values(values: &[f64]) -> ValueKind {
    if values.iter().any(|value| *value < 0.0) {
        return ValueKind::Log2Fold;
    }
    if values.is_empty() {
        return ValueKind::LinearFold;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[sorted.len() / 2];
    if median.abs() < (median - 1.0).abs() {
        ValueKind::Log2Fold
    } else {
        ValueKind::LinearFold
    }
}

fn looks_like_transcript(value: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(ENS[A-Z]*T\d{6,}|[NX][MR]_\d+)(\.\d+)?$").expect("static regex")
        })
        .is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_names_win_over_symbols() {
        let table = RawTable::parse_str("SYMBOL\tTranscript_ID\tfc\nTP53\tENST1\t2\n").unwrap();
        let detection = detect(&table).unwrap();
        assert_eq!(detection.profile.id_column, "Transcript_ID");
        assert_eq!(detection.profile.id_kind, IdKind::TranscriptId);
        assert_eq!(detection.confidence, DetectionConfidence::Header);
    }

    #[test]
    fn log2_column_beats_linear() {
        let table = RawTable::parse_str("gene_name,fold_change,log2fc\nTP53,2,1\n").unwrap();
        let detection = detect(&table).unwrap();
        assert_eq!(detection.profile.value_column, "log2fc");
        assert_eq!(detection.profile.value_kind, ValueKind::Log2Fold);
    }

    #[test]
    fn heuristic_flags_low_confidence() {
        let table =
            RawTable::parse_str("gene_symbol,score\nA,-1.2\nB,0.4\nC,0.1\n").unwrap();
        let detection = detect(&table).unwrap();
        assert_eq!(detection.profile.value_column, "score");
        assert_eq!(detection.profile.value_kind, ValueKind::Log2Fold);
        assert_eq!(detection.confidence, DetectionConfidence::Heuristic);

        let table = RawTable::parse_str("gene_symbol,ratio\nA,1.1\nB,0.9\nC,3.0\n").unwrap();
        assert_eq!(
            detect(&table).unwrap().profile.value_kind,
            ValueKind::LinearFold
        );
    }

    #[test]
    fn missing_identifier_is_an_error() {
        let table = RawTable::parse_str("foo,fc\nA,2\n").unwrap();
        assert!(matches!(detect(&table), Err(KiraError::Detection(_))));
    }

    #[test]
    fn deseq2_row_names() {
        let content = "baseMean\tlog2FoldChange\nENST00000269305.9\t10\t1.5\n";
        let table = RawTable::parse_str(content).unwrap();
        let detection = detect(&table).unwrap();
        assert_eq!(detection.profile.id_column, ROW_NAMES_COLUMN);
        assert_eq!(detection.profile.id_kind, IdKind::TranscriptId);

        let content = "baseMean\tlog2FoldChange\nTP53\t10\t1.5\n";
        let table = RawTable::parse_str(content).unwrap();
        assert_eq!(detect(&table).unwrap().profile.id_kind, IdKind::GeneSymbol);
    }

    #[test]
    fn override_must_name_existing_columns() {
        let table = RawTable::parse_str("a,b\nx,1\n").unwrap();
        let profile = FormatProfile {
            id_column: "a".to_string(),
            id_kind: IdKind::GeneSymbol,
            value_column: "missing".to_string(),
            value_kind: ValueKind::LinearFold,
        };
        assert!(check_override(&table, profile).is_err());
    }
}
