use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DropResult, IngestionReport, ListResult, ProgressEvent, ProgressSink,
};
use crate::domain::MatchConfidence;
use crate::registry::{NamespaceInfo, ValidationReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_ingest(result: &IngestionReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_validation(result: &ValidationReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &NamespaceInfo) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_drop(result: &DropResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber (stderr in the CLI).
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::info!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_ingest(report: &IngestionReport) {
        let mode = if report.dry_run { " (dry run)" } else { "" };
        println!("patient {}{mode}", report.patient_id);
        println!("  source: {} ({} bytes)", report.source.path, report.source.bytes);
        println!(
            "  columns: {} [{}] -> {} [{}] ({:?})",
            display_column(&report.detection.profile.id_column),
            report.detection.profile.id_kind,
            report.detection.profile.value_column,
            report.detection.profile.value_kind,
            report.detection.confidence,
        );
        println!(
            "  rows: {} total, {} matched, {} unresolved (match rate {:.1}%)",
            report.matching.total_rows,
            report.matching.matched_rows,
            report.matching.unresolved_rows,
            report.matching.match_rate * 100.0
        );
        for tier in MatchConfidence::ALL {
            println!("    {tier}: {}", report.matching.count(tier));
        }
        println!(
            "  values: {} baseline dropped, {} invalid, {} duplicate transcripts",
            report.values.baseline_rows,
            report.values.invalid_value_rows,
            report.values.duplicate_transcripts
        );
        println!(
            "  stored: {} records in {} batches (replaced {})",
            report.write.inserted, report.write.batches, report.write.replaced
        );
        if report.below_min_match_rate {
            println!("  warning: match rate below the configured minimum; a real run would fail");
        }
        if !report.matching.unresolved_sample.is_empty() {
            println!("  unresolved sample:");
            for line in &report.matching.unresolved_sample {
                println!("    {line}");
            }
        }
    }

    pub fn print_list(result: &ListResult) {
        if result.patients.is_empty() {
            println!("no patient namespaces");
        }
        for patient in &result.patients {
            println!("{patient}");
        }
    }

    pub fn print_validation(report: &ValidationReport) {
        let status = if report.is_valid() { "ok" } else { "INVALID" };
        println!("patient {}: {status}", report.patient_id);
        println!("  records: {}", report.records);
        println!("  orphaned transcripts: {}", report.orphaned_records);
        for id in &report.orphaned_sample {
            println!("    {id}");
        }
        println!("  baseline rows: {}", report.baseline_violations);
        println!("  non-positive rows: {}", report.non_positive_violations);
        println!("  metadata present: {}", report.metadata_present);
    }

    pub fn print_info(info: &NamespaceInfo) {
        println!("patient {}: {} records", info.patient_id, info.records);
        match &info.metadata {
            Some(meta) => {
                println!("  source: {}", meta.source.path);
                println!("  ingested: {}", meta.completed_at);
                println!("  match rate: {:.1}%", meta.matching.match_rate * 100.0);
            }
            None => println!("  no provenance recorded"),
        }
    }

    pub fn print_drop(result: &DropResult) {
        println!(
            "dropped patient {} ({} records)",
            result.patient_id, result.removed_records
        );
    }
}

fn display_column(name: &str) -> &str {
    if name.is_empty() { "<row names>" } else { name }
}
