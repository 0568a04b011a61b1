use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::{ResolvedRow, ValueKind};
use crate::error::KiraError;
use crate::resolve::RowMatch;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalized {
    Changed(f64),
    /// Within epsilon of 1.0; dropped under sparse storage.
    Baseline,
}

const MISSING_MARKERS: &[&str] = &["", "NA", "NaN", "nan", "null", "NULL"];

pub fn to_linear(raw_value: f64, kind: ValueKind) -> f64 {
    match kind {
        ValueKind::Log2Fold => raw_value.exp2(),
        ValueKind::LinearFold => raw_value,
    }
}

pub fn to_log2(linear: f64) -> f64 {
    linear.log2()
}

/// Converts a raw cell into a linear fold change. Never clamps.
pub fn normalize(
    raw: &str,
    kind: ValueKind,
    row: usize,
    baseline_epsilon: f64,
) -> Result<Normalized, KiraError> {
    let invalid = || KiraError::InvalidValue {
        row,
        value: raw.to_string(),
    };
    let trimmed = raw.trim();
    if MISSING_MARKERS.contains(&trimmed) {
        return Err(invalid());
    }
    let parsed = trimmed.parse::<f64>().map_err(|_| invalid())?;
    if !parsed.is_finite() {
        return Err(invalid());
    }
    let linear = to_linear(parsed, kind);
    if !linear.is_finite() || linear <= 0.0 {
        return Err(invalid());
    }
    if (linear - 1.0).abs() <= baseline_epsilon {
        return Ok(Normalized::Baseline);
    }
    Ok(Normalized::Changed(linear))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueStats {
    pub baseline_rows: usize,
    pub invalid_value_rows: usize,
    /// Transcripts already claimed by an earlier row.
    pub duplicate_transcripts: usize,
    pub records: usize,
    pub invalid_sample: Vec<String>,
}

/// Turns matched rows into storable records. Per-row failures are counted;
/// the first row to claim a transcript wins.
pub fn normalize_matches(
    matches: Vec<RowMatch>,
    kind: ValueKind,
    baseline_epsilon: f64,
    sample_limit: usize,
) -> (Vec<ResolvedRow>, ValueStats) {
    let mut stats = ValueStats::default();
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(matches.len());

    for matched in matches {
        let linear = match normalize(
            &matched.row.raw_value,
            kind,
            matched.row.row_index,
            baseline_epsilon,
        ) {
            Ok(Normalized::Changed(linear)) => linear,
            Ok(Normalized::Baseline) => {
                stats.baseline_rows += 1;
                continue;
            }
            Err(err) => {
                stats.invalid_value_rows += 1;
                if stats.invalid_sample.len() < sample_limit {
                    stats.invalid_sample.push(err.to_string());
                }
                continue;
            }
        };

        for transcript in matched.transcripts {
            if !seen.insert(transcript.clone()) {
                stats.duplicate_transcripts += 1;
                continue;
            }
            if let Some(record) =
                ResolvedRow::new(transcript, linear, matched.confidence, matched.row.row_index)
            {
                records.push(record);
            }
        }
    }

    stats.records = records.len();
    (records, stats)
}
