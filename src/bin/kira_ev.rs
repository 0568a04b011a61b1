use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_expression_vault::app::{App, IngestSource, IngestionRequest};
use kira_expression_vault::catalog::SqliteCatalog;
use kira_expression_vault::config::{ConfigLoader, ResolvedConfig};
use kira_expression_vault::domain::{FormatProfile, IdKind, MatchConfidence, ValueKind};
use kira_expression_vault::error::{IngestionFailure, KiraError};
use kira_expression_vault::output::{JsonOutput, LogSink, OutputMode, TextOutput};
use kira_expression_vault::store::Database;
use kira_expression_vault::writer::CancelFlag;

#[derive(Parser)]
#[command(name = "kira-ev")]
#[command(about = "Per-patient transcriptome expression vault")]
#[command(version, author)]
struct Cli {
    /// Path to kira-ev.json (defaults to ./kira-ev.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Database file, overriding the configured one
    #[arg(long, global = true)]
    db: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ingest a differential expression table for one patient")]
    Ingest(IngestArgs),
    #[command(about = "List patient namespaces")]
    List,
    #[command(about = "Check a namespace against the reference catalog")]
    Validate(PatientArgs),
    #[command(about = "Show record count and provenance of a namespace")]
    Info(PatientArgs),
    #[command(about = "Drop a patient namespace")]
    Drop(DropArgs),
}

#[derive(Args)]
struct IngestArgs {
    file: Utf8PathBuf,

    #[arg(long)]
    patient: String,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    id_column: Option<String>,

    #[arg(long)]
    id_kind: Option<IdKind>,

    #[arg(long)]
    value_column: Option<String>,

    #[arg(long)]
    value_kind: Option<ValueKind>,
}

#[derive(Args)]
struct PatientArgs {
    patient: String,
}

#[derive(Args)]
struct DropArgs {
    patient: String,

    /// Confirm the irreversible removal
    #[arg(long)]
    yes: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(failure) = report.downcast_ref::<IngestionFailure>() {
            return ExitCode::from(map_exit_code(&failure.error));
        }
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::NamespaceNotFound(_)
        | KiraError::InvalidPatientId(_)
        | KiraError::Detection(_)
        | KiraError::TableRead(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_) => 2,
        KiraError::Transient(_) | KiraError::Cancelled => 3,
        KiraError::LowMatchRate { .. } | KiraError::SchemaConflict { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let mut resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        resolved.database = db;
    }

    match cli.command {
        Commands::Ingest(args) => run_ingest(args, open_app(&resolved)?, output_mode),
        Commands::List => {
            let result = open_app(&resolved)?.list()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic(),
                OutputMode::Text => {
                    TextOutput::print_list(&result);
                    Ok(())
                }
            }
        }
        Commands::Validate(args) => {
            let report = open_app(&resolved)?.validate(&args.patient)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_validation(&report).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_validation(&report),
            }
            if report.is_valid() {
                Ok(())
            } else {
                Err(miette::Report::msg(format!(
                    "namespace for patient {} has {} violation(s)",
                    report.patient_id,
                    report.violations()
                )))
            }
        }
        Commands::Info(args) => {
            let info = open_app(&resolved)?.info(&args.patient)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_info(&info).into_diagnostic(),
                OutputMode::Text => {
                    TextOutput::print_info(&info);
                    Ok(())
                }
            }
        }
        Commands::Drop(args) => {
            if !args.yes {
                return Err(miette::Report::msg(format!(
                    "refusing to drop patient {} without --yes",
                    args.patient
                )));
            }
            let result = open_app(&resolved)?.drop_patient(&args.patient)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_drop(&result).into_diagnostic(),
                OutputMode::Text => {
                    TextOutput::print_drop(&result);
                    Ok(())
                }
            }
        }
    }
}

fn open_app(resolved: &ResolvedConfig) -> Result<App<SqliteCatalog>, KiraError> {
    let db = Database::open(&resolved.database, &resolved.store)?;
    SqliteCatalog::install_schema(db.connection())?;
    let catalog = SqliteCatalog::open(&resolved.database, resolved.store.busy_timeout)?;
    Ok(App::new(
        db,
        catalog,
        resolved.resolver.clone(),
        resolved.store.clone(),
    ))
}

fn run_ingest(
    args: IngestArgs,
    mut app: App<SqliteCatalog>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let profile_override = match (args.id_column, args.id_kind, args.value_column, args.value_kind) {
        (Some(id_column), Some(id_kind), Some(value_column), Some(value_kind)) => {
            Some(FormatProfile {
                id_column,
                id_kind,
                value_column,
                value_kind,
            })
        }
        (None, None, None, None) => None,
        _ => {
            return Err(miette::Report::msg(
                "--id-column, --id-kind, --value-column and --value-kind must be given together",
            ));
        }
    };

    let request = IngestionRequest {
        patient_id: args.patient,
        source: IngestSource::Path(args.file),
        dry_run: args.dry_run,
        profile_override,
    };
    let cancel = CancelFlag::new();
    let outcome = match output_mode {
        OutputMode::Json => app.ingest(request, &cancel, &JsonOutput),
        OutputMode::Text => app.ingest(request, &cancel, &LogSink),
    };
    let report = match outcome {
        Ok(report) => report,
        Err(failure) => {
            if let Some(matching) = &failure.stats.matching {
                let tiers: Vec<String> = MatchConfidence::ALL
                    .iter()
                    .map(|tier| format!("{tier}={}", matching.count(*tier)))
                    .collect();
                tracing::warn!(
                    matched = matching.matched_rows,
                    unresolved = matching.unresolved_rows,
                    match_rate = matching.match_rate,
                    tiers = tiers.join(",").as_str(),
                    "statistics before failure"
                );
            }
            return Err(failure.into());
        }
    };

    match output_mode {
        OutputMode::Json => JsonOutput::print_ingest(&report).into_diagnostic(),
        OutputMode::Text => {
            TextOutput::print_ingest(&report);
            Ok(())
        }
    }
}
