use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const PATIENT_ID_MAX_LEN: usize = 48;

/// Tenant key. Lower-cased on parse since SQLite identifiers ignore case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatientId(String);

impl PatientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> String {
        format!("patient_{}", self.0)
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PatientId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let is_valid = !normalized.is_empty()
            && normalized.len() <= PATIENT_ID_MAX_LEN
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !is_valid {
            return Err(KiraError::InvalidPatientId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TranscriptId(String);

impl TranscriptId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TranscriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    TranscriptId,
    GeneSymbol,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::TranscriptId => write!(f, "transcript_id"),
            IdKind::GeneSymbol => write!(f, "gene_symbol"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    LinearFold,
    Log2Fold,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::LinearFold => write!(f, "linear_fold"),
            ValueKind::Log2Fold => write!(f, "log2_fold"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatProfile {
    pub id_column: String,
    pub id_kind: IdKind,
    pub value_column: String,
    pub value_kind: ValueKind,
}

/// Ordered from most to least trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    Exact,
    VersionTrimmed,
    SymbolCaseInsensitive,
    Fuzzy,
}

impl MatchConfidence {
    pub const ALL: [MatchConfidence; 4] = [
        MatchConfidence::Exact,
        MatchConfidence::VersionTrimmed,
        MatchConfidence::SymbolCaseInsensitive,
        MatchConfidence::Fuzzy,
    ];
}

impl fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchConfidence::Exact => write!(f, "exact"),
            MatchConfidence::VersionTrimmed => write!(f, "version_trimmed"),
            MatchConfidence::SymbolCaseInsensitive => write!(f, "symbol_case_insensitive"),
            MatchConfidence::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// How a gene symbol that maps to several transcripts is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SymbolPolicy {
    #[default]
    ExpandAll,
    RequireUnique,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    /// 1-based data row index, header excluded.
    pub row_index: usize,
    pub identifier: String,
    pub raw_value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRow {
    transcript_id: TranscriptId,
    fold_change: f64,
    match_confidence: MatchConfidence,
    source_row_index: usize,
}

impl ResolvedRow {
    /// Returns `None` for baseline or non-positive fold changes; those never reach storage.
    pub fn new(
        transcript_id: TranscriptId,
        fold_change: f64,
        match_confidence: MatchConfidence,
        source_row_index: usize,
    ) -> Option<Self> {
        if !fold_change.is_finite() || fold_change <= 0.0 || fold_change == 1.0 {
            return None;
        }
        Some(Self {
            transcript_id,
            fold_change,
            match_confidence,
            source_row_index,
        })
    }

    pub fn transcript_id(&self) -> &TranscriptId {
        &self.transcript_id
    }

    pub fn fold_change(&self) -> f64 {
        self.fold_change
    }

    pub fn match_confidence(&self) -> MatchConfidence {
        self.match_confidence
    }

    pub fn source_row_index(&self) -> usize {
        self.source_row_index
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_patient_id_valid() {
        let id: PatientId = " Patient_042 ".parse().unwrap();
        assert_eq!(id.as_str(), "patient_042");
        assert_eq!(id.namespace(), "patient_patient_042");
    }

    #[test]
    fn parse_patient_id_invalid() {
        assert_matches!(
            "p-1".parse::<PatientId>(),
            Err(KiraError::InvalidPatientId(_))
        );
        assert_matches!("".parse::<PatientId>(), Err(KiraError::InvalidPatientId(_)));
        let long = "a".repeat(PATIENT_ID_MAX_LEN + 1);
        assert_matches!(
            long.parse::<PatientId>(),
            Err(KiraError::InvalidPatientId(_))
        );
        assert_matches!(
            "x; DROP TABLE gene".parse::<PatientId>(),
            Err(KiraError::InvalidPatientId(_))
        );
    }

    #[test]
    fn resolved_row_rejects_baseline_and_non_positive() {
        let id = TranscriptId::new("ENST1");
        assert!(ResolvedRow::new(id.clone(), 1.0, MatchConfidence::Exact, 1).is_none());
        assert!(ResolvedRow::new(id.clone(), 0.0, MatchConfidence::Exact, 1).is_none());
        assert!(ResolvedRow::new(id.clone(), f64::NAN, MatchConfidence::Exact, 1).is_none());
        let row = ResolvedRow::new(id, 2.5, MatchConfidence::Fuzzy, 7).unwrap();
        assert_eq!(row.fold_change(), 2.5);
        assert_eq!(row.source_row_index(), 7);
    }

    #[test]
    fn confidence_tiers_are_ordered() {
        assert!(MatchConfidence::Exact < MatchConfidence::VersionTrimmed);
        assert!(MatchConfidence::SymbolCaseInsensitive < MatchConfidence::Fuzzy);
    }
}
