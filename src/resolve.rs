use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogIndex;
use crate::config::{FuzzySettings, ResolverSettings};
use crate::domain::{IdKind, InputRow, MatchConfidence, SymbolPolicy, TranscriptId};
use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched {
        confidence: MatchConfidence,
        transcripts: Vec<TranscriptId>,
    },
    /// More than one equally good target and policy forbids guessing.
    Ambiguous { candidates: usize },
    Unresolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowMatch {
    pub row: InputRow,
    pub confidence: MatchConfidence,
    pub transcripts: Vec<TranscriptId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub total_rows: usize,
    pub matched_rows: usize,
    pub unresolved_rows: usize,
    pub ambiguous_rows: usize,
    pub by_confidence: BTreeMap<MatchConfidence, usize>,
    pub match_rate: f64,
    /// First few failed rows with their row index; answers "why is gene X missing".
    pub unresolved_sample: Vec<String>,
}

impl MatchStats {
    pub fn count(&self, confidence: MatchConfidence) -> usize {
        self.by_confidence.get(&confidence).copied().unwrap_or(0)
    }

    /// Run-level guard against ingesting a file from the wrong ID namespace.
    pub fn enforce_min_rate(&self, threshold: f64) -> Result<(), KiraError> {
        if self.match_rate < threshold {
            return Err(KiraError::LowMatchRate {
                rate: self.match_rate,
                threshold,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub matches: Vec<RowMatch>,
    pub stats: MatchStats,
}

pub struct Resolver<'a> {
    index: &'a CatalogIndex,
    settings: &'a ResolverSettings,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a CatalogIndex, settings: &'a ResolverSettings) -> Self {
        Self { index, settings }
    }

    /// Resolves every row; failures are counted, never raised.
    pub fn resolve_rows(&self, rows: Vec<InputRow>, id_kind: IdKind) -> ResolveOutcome {
        let mut stats = MatchStats {
            total_rows: rows.len(),
            ..MatchStats::default()
        };
        let mut matches = Vec::with_capacity(rows.len());

        for row in rows {
            match self.resolve(&row.identifier, id_kind) {
                Resolution::Matched {
                    confidence,
                    transcripts,
                } => {
                    stats.matched_rows += 1;
                    *stats.by_confidence.entry(confidence).or_insert(0) += 1;
                    matches.push(RowMatch {
                        row,
                        confidence,
                        transcripts,
                    });
                }
                Resolution::Ambiguous { candidates } => {
                    tracing::debug!(
                        row = row.row_index,
                        identifier = row.identifier.as_str(),
                        candidates,
                        "ambiguous identifier"
                    );
                    stats.ambiguous_rows += 1;
                    stats.unresolved_rows += 1;
                    self.sample_unresolved(&mut stats, &row);
                }
                Resolution::Unresolved => {
                    stats.unresolved_rows += 1;
                    self.sample_unresolved(&mut stats, &row);
                }
            }
        }

        stats.match_rate = if stats.total_rows == 0 {
            0.0
        } else {
            stats.matched_rows as f64 / stats.total_rows as f64
        };
        ResolveOutcome { matches, stats }
    }

    pub fn resolve(&self, identifier: &str, id_kind: IdKind) -> Resolution {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Resolution::Unresolved;
        }

        if self.index.contains(identifier) {
            return Resolution::Matched {
                confidence: MatchConfidence::Exact,
                transcripts: vec![TranscriptId::new(identifier)],
            };
        }

        match self.index.by_unversioned(identifier) {
            [] => {}
            [single] => {
                return Resolution::Matched {
                    confidence: MatchConfidence::VersionTrimmed,
                    transcripts: vec![single.clone()],
                };
            }
            several => {
                return Resolution::Ambiguous {
                    candidates: several.len(),
                };
            }
        }

        if id_kind != IdKind::GeneSymbol {
            return Resolution::Unresolved;
        }

        let symbol = identifier.to_ascii_uppercase();
        let transcripts = self.index.by_symbol(&symbol);
        if !transcripts.is_empty() {
            return self.apply_policy(MatchConfidence::SymbolCaseInsensitive, transcripts);
        }

        match fuzzy_symbol(self.index, &symbol, &self.settings.fuzzy) {
            FuzzyMatch::Unique(found) => {
                tracing::debug!(input = identifier, matched = found, "fuzzy symbol match");
                self.apply_policy(MatchConfidence::Fuzzy, self.index.by_symbol(found))
            }
            FuzzyMatch::Tied(candidates) => Resolution::Ambiguous { candidates },
            FuzzyMatch::None => Resolution::Unresolved,
        }
    }

    fn apply_policy(&self, confidence: MatchConfidence, transcripts: &[TranscriptId]) -> Resolution {
        if transcripts.len() > 1 && self.settings.symbol_policy == SymbolPolicy::RequireUnique {
            return Resolution::Ambiguous {
                candidates: transcripts.len(),
            };
        }
        Resolution::Matched {
            confidence,
            transcripts: transcripts.to_vec(),
        }
    }

    fn sample_unresolved(&self, stats: &mut MatchStats, row: &InputRow) {
        if stats.unresolved_sample.len() < self.settings.unresolved_sample {
            let err = KiraError::UnresolvedIdentifier {
                row: row.row_index,
                identifier: row.identifier.clone(),
            };
            stats.unresolved_sample.push(err.to_string());
        }
    }
}

#[derive(Debug, PartialEq)]
enum FuzzyMatch<'i> {
    Unique(&'i str),
    Tied(usize),
    None,
}

/// Nearest symbol by edit distance, looking only at symbols of similar length.
fn fuzzy_symbol<'i>(index: &'i CatalogIndex, query: &str, settings: &FuzzySettings) -> FuzzyMatch<'i> {
    let len = query.chars().count();
    if len < settings.min_length || settings.max_distance == 0 {
        return FuzzyMatch::None;
    }
    let query_chars = query.chars().collect::<Vec<_>>();

    let mut best: Option<(usize, &str)> = None;
    let mut tied = 0usize;
    for candidate_len in len.saturating_sub(settings.length_tolerance)..=len + settings.length_tolerance
    {
        for candidate in index.symbols_with_len(candidate_len) {
            let limit = best.map(|(d, _)| d).unwrap_or(settings.max_distance);
            let Some(distance) = bounded_levenshtein(candidate, &query_chars, limit) else {
                continue;
            };
            match best {
                Some((current, _)) if distance == current => tied += 1,
                Some((current, _)) if distance > current => {}
                _ => {
                    best = Some((distance, candidate.as_str()));
                    tied = 0;
                }
            }
        }
    }

    match best {
        Some((_, found)) if tied == 0 => FuzzyMatch::Unique(found),
        Some(_) => FuzzyMatch::Tied(tied + 1),
        None => FuzzyMatch::None,
    }
}

/// Levenshtein distance, or `None` once it provably exceeds `max`.
pub fn bounded_levenshtein(value: &str, target: &[char], max: usize) -> Option<usize> {
    let n = target.len();
    let value_len = value.chars().count();
    if value_len.abs_diff(n) > max {
        return None;
    }

    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];
    for (i, c) in value.chars().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for j in 1..=n {
            let cost = usize::from(c != target[j - 1]);
            let d = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
            curr[j] = d;
            row_min = row_min.min(d);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let distance = prev[n];
    (distance <= max).then_some(distance)
}
