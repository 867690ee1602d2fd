// crates/rando-cli/src/main.rs
// ============================================================================
// Module: Rando CLI Entry Point
// Description: Command dispatcher for randomization list administration.
// Purpose: Expose import, verify, export, and allocation over a configured store.
// ============================================================================

//! ## Overview
//! The CLI is a thin adapter over the core engine: it loads the TOML
//! configuration, materializes the scheme registry and the configured store
//! backend, and dispatches one operation per invocation. No allocation logic
//! lives here. Diagnostics go to `tracing` on stderr; command output goes to
//! stdout through the line writers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use rando_config::RandoConfig;
use rando_config::StoreBackendConfig;
use rando_core::AllocationGate;
use rando_core::AllocationStore;
use rando_core::ListImporter;
use rando_core::ListVerifier;
use rando_core::MaintenanceOp;
use rando_core::MemoryStore;
use rando_core::RandomizeRequest;
use rando_core::Randomizer;
use rando_core::Registration;
use rando_core::RegistrationLookup;
use rando_core::Scheme;
use rando_core::SchemeName;
use rando_core::SiteName;
use rando_core::SubjectIdentifier;
use rando_core::export_allocated;
use rando_store_sqlite::SqliteAllocationStore;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "rando", version, about = "Randomization list administration")]
struct Cli {
    /// Optional config file path (defaults to rando.toml or env override).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Log filter directive for diagnostics on stderr.
    #[arg(long, value_name = "FILTER", default_value = "info", global = true)]
    log: String,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a scheme's manifest into the slot table.
    Import(ImportCommand),
    /// Verify the slot table against the manifest.
    Verify(SchemeCommand),
    /// Export the allocated slots as a pipe-delimited snapshot.
    Export(ExportCommand),
    /// Register an enrolling subject.
    Register(SubjectCommand),
    /// Randomize a registered subject.
    Randomize(RandomizeCommand),
    /// Show a subject's registration and allocation state.
    Status(SubjectCommand),
    /// Validate the configuration file.
    ConfigValidate,
}

/// Arguments selecting one scheme.
#[derive(Args, Debug)]
struct SchemeCommand {
    /// Scheme name as declared in the configuration.
    #[arg(long, value_name = "NAME")]
    scheme: String,
}

/// Arguments selecting one scheme and one subject.
#[derive(Args, Debug)]
struct SubjectCommand {
    /// Scheme name as declared in the configuration.
    #[arg(long, value_name = "NAME")]
    scheme: String,
    /// Subject identifier.
    #[arg(long, value_name = "SUBJECT")]
    subject: String,
}

/// Configuration for the `import` command.
#[derive(Args, Debug)]
struct ImportCommand {
    /// Scheme name as declared in the configuration.
    #[arg(long, value_name = "NAME")]
    scheme: String,
    /// Clear the existing slot table first (only safe before any allocation).
    #[arg(long)]
    overwrite: bool,
}

/// Configuration for the `export` command.
#[derive(Args, Debug)]
struct ExportCommand {
    /// Scheme name as declared in the configuration.
    #[arg(long, value_name = "NAME")]
    scheme: String,
    /// Output file path (stdout when omitted).
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

/// Configuration for the `randomize` command.
#[derive(Args, Debug)]
struct RandomizeCommand {
    /// Scheme name as declared in the configuration.
    #[arg(long, value_name = "NAME")]
    scheme: String,
    /// Subject identifier to randomize.
    #[arg(long, value_name = "SUBJECT")]
    subject: String,
    /// Site the subject enrolls at.
    #[arg(long, value_name = "SITE")]
    site: String,
    /// User performing the allocation.
    #[arg(long, value_name = "USER")]
    user: String,
    /// Report datetime in RFC 3339 (current time when omitted).
    #[arg(long, value_name = "DATETIME")]
    datetime: Option<String>,
    /// Extra attributes as key=value pairs (repeatable).
    #[arg(long = "extra", value_name = "KEY=VALUE")]
    extra: Vec<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying an operator-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// Wraps any displayable failure as a CLI error.
fn cli_err<E: Display>(error: E) -> CliError {
    CliError::new(error.to_string())
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log.clone()))
        .with_writer(std::io::stderr)
        .init();

    let config = RandoConfig::load(cli.config.as_deref()).map_err(cli_err)?;
    match cli.command {
        Commands::Import(command) => command_import(&config, &command),
        Commands::Verify(command) => command_verify(&config, &command.scheme),
        Commands::Export(command) => command_export(&config, &command),
        Commands::Register(command) => command_register(&config, &command),
        Commands::Randomize(command) => command_randomize(&config, &command),
        Commands::Status(command) => command_status(&config, &command),
        Commands::ConfigValidate => command_config_validate(&config),
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Resolves the named scheme and opens the configured store backend.
fn load_context(
    config: &RandoConfig,
    scheme_name: &str,
) -> CliResult<(Scheme, Arc<dyn AllocationStore + Send + Sync>)> {
    let registry = config.into_registry().map_err(cli_err)?;
    let scheme = registry
        .get(&SchemeName::new(scheme_name))
        .cloned()
        .ok_or_else(|| CliError::new(format!("unknown scheme `{scheme_name}`")))?;
    let store: Arc<dyn AllocationStore + Send + Sync> = match &config.store {
        StoreBackendConfig::Memory => Arc::new(MemoryStore::new()),
        StoreBackendConfig::Sqlite(sqlite) => {
            Arc::new(SqliteAllocationStore::new(sqlite).map_err(cli_err)?)
        }
    };
    Ok((scheme, store))
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Imports a scheme's manifest into the slot table.
fn command_import(config: &RandoConfig, command: &ImportCommand) -> CliResult<ExitCode> {
    let (scheme, store) = load_context(config, &command.scheme)?;
    let importer = ListImporter::new(scheme.assignment_map(), scheme.extra_csv_columns());
    let report = importer
        .import(scheme.manifest_path(), store.as_ref(), command.overwrite)
        .map_err(cli_err)?;
    write_stdout_line(&format!("imported {} slots", report.imported)).map_err(cli_err)?;
    Ok(ExitCode::SUCCESS)
}

/// Verifies the slot table against the manifest and reports discrepancies.
fn command_verify(config: &RandoConfig, scheme_name: &str) -> CliResult<ExitCode> {
    let (scheme, store) = load_context(config, scheme_name)?;
    let verifier = ListVerifier::new(scheme.extra_csv_columns());
    let discrepancies =
        verifier.verify(scheme.manifest_path(), store.as_ref()).map_err(cli_err)?;
    if discrepancies.is_empty() {
        write_stdout_line("verification ok").map_err(cli_err)?;
        return Ok(ExitCode::SUCCESS);
    }
    for discrepancy in &discrepancies {
        write_stdout_line(&discrepancy.to_string()).map_err(cli_err)?;
    }
    Ok(ExitCode::FAILURE)
}

/// Exports the allocated slots as a pipe-delimited snapshot.
fn command_export(config: &RandoConfig, command: &ExportCommand) -> CliResult<ExitCode> {
    let (scheme, store) = load_context(config, &command.scheme)?;
    let rows = if let Some(path) = &command.out {
        let mut file = File::create(path).map_err(cli_err)?;
        export_allocated(store.as_ref(), scheme.assignment_map(), &mut file).map_err(cli_err)?
    } else {
        let mut buffer: Vec<u8> = Vec::new();
        let rows = export_allocated(store.as_ref(), scheme.assignment_map(), &mut buffer)
            .map_err(cli_err)?;
        write_stdout_bytes(&buffer).map_err(cli_err)?;
        rows
    };
    tracing::info!(scheme = %scheme.name(), rows, "export written");
    Ok(ExitCode::SUCCESS)
}

/// Registers an enrolling subject.
fn command_register(config: &RandoConfig, command: &SubjectCommand) -> CliResult<ExitCode> {
    let subject = SubjectIdentifier::new(command.subject.as_str());
    let (_, store) = load_context(config, &command.scheme)?;
    if !matches!(store.lookup(&subject).map_err(cli_err)?, RegistrationLookup::NotFound) {
        return Err(CliError::new(format!("subject already registered: {subject}")));
    }
    store.save(&Registration::new(subject.clone())).map_err(cli_err)?;
    write_stdout_line(&format!("registered {subject}")).map_err(cli_err)?;
    Ok(ExitCode::SUCCESS)
}

/// Randomizes a registered subject.
fn command_randomize(config: &RandoConfig, command: &RandomizeCommand) -> CliResult<ExitCode> {
    let (scheme, store) = load_context(config, &command.scheme)?;
    let datetime = match &command.datetime {
        Some(text) => OffsetDateTime::parse(text, &Rfc3339)
            .map_err(|err| CliError::new(format!("invalid --datetime: {err}")))?,
        None => OffsetDateTime::now_utc(),
    };
    let mut extra: BTreeMap<String, String> = BTreeMap::new();
    for pair in &command.extra {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::new(format!("invalid --extra `{pair}`; expected key=value")));
        };
        extra.insert(key.to_string(), value.to_string());
    }

    // Import is operator-initiated here; allocation still requires the clean
    // verification recorded at activation.
    let gate = Arc::new(AllocationGate::new([MaintenanceOp::Import]));
    let blinded = scheme.trial_blinded();
    let randomizer = Randomizer::activate(scheme, store, gate).map_err(cli_err)?;
    let subject_identifier = SubjectIdentifier::new(command.subject.as_str());
    let request = RandomizeRequest {
        subject_identifier: subject_identifier.clone(),
        report_datetime: Some(datetime),
        site: Some(SiteName::new(command.site.as_str())),
        user: Some(command.user.clone()),
        extra,
    };
    randomizer.randomize(&request).map_err(cli_err)?;

    if blinded {
        write_stdout_line(&format!("{subject_identifier} allocated")).map_err(cli_err)?;
    } else {
        match randomizer.get_assignment(&subject_identifier).map_err(cli_err)? {
            Some(assignment) => {
                write_stdout_line(&format!("{subject_identifier} allocated ({assignment})"))
                    .map_err(cli_err)?;
            }
            None => write_stdout_line(&format!("{subject_identifier} allocated"))
                .map_err(cli_err)?,
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Shows a subject's registration and allocation state.
fn command_status(config: &RandoConfig, command: &SubjectCommand) -> CliResult<ExitCode> {
    let subject = SubjectIdentifier::new(command.subject.as_str());
    let (scheme, store) = load_context(config, &command.scheme)?;
    match store.lookup(&subject).map_err(cli_err)? {
        RegistrationLookup::NotFound => {
            write_stdout_line(&format!("{subject}: not registered")).map_err(cli_err)?;
            Ok(ExitCode::FAILURE)
        }
        RegistrationLookup::Unallocated(_) => {
            write_stdout_line(&format!("{subject}: registered, not randomized"))
                .map_err(cli_err)?;
            Ok(ExitCode::SUCCESS)
        }
        RegistrationLookup::Allocated(registration) => {
            let sid = registration.sid.map_or_else(String::new, |sid| sid.to_string());
            let datetime = registration
                .randomization_datetime
                .and_then(|value| value.format(&Rfc3339).ok())
                .unwrap_or_default();
            write_stdout_line(&format!("{subject}: randomized sid={sid} at {datetime}"))
                .map_err(cli_err)?;
            if !scheme.trial_blinded() {
                if let Some(slot) = store.find_by_subject(&subject).map_err(cli_err)? {
                    write_stdout_line(&format!("assignment: {}", slot.assignment))
                        .map_err(cli_err)?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Validates the configuration file and the registry it declares.
fn command_config_validate(config: &RandoConfig) -> CliResult<ExitCode> {
    let registry = config.into_registry().map_err(cli_err)?;
    write_stdout_line(&format!("config ok ({} schemes)", registry.len())).map_err(cli_err)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes raw bytes to stdout without adding a newline.
fn write_stdout_bytes(bytes: &[u8]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(bytes)
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use clap::CommandFactory;
    use rando_config::SchemeConfig;

    use super::*;

    fn memory_config() -> RandoConfig {
        RandoConfig {
            store: StoreBackendConfig::Memory,
            schemes: vec![SchemeConfig {
                name: "default".to_string(),
                manifest_path: PathBuf::from("./lists/default.csv"),
                assignments: BTreeMap::from([
                    ("active".to_string(), 1),
                    ("placebo".to_string(), 2),
                ]),
                descriptions: BTreeMap::from([
                    ("active".to_string(), "Active: study drug".to_string()),
                    ("placebo".to_string(), "Placebo: control".to_string()),
                ]),
                extra_csv_columns: Vec::new(),
                required_extra_attrs: Vec::new(),
                blinded: true,
            }],
        }
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn randomize_arguments_parse() {
        let cli = Cli::try_parse_from([
            "rando",
            "randomize",
            "--scheme",
            "default",
            "--subject",
            "S-0001",
            "--site",
            "north",
            "--user",
            "coordinator",
            "--extra",
            "gender=M",
            "--extra",
            "cohort=b",
        ])
        .expect("parse");
        match cli.command {
            Commands::Randomize(command) => {
                assert_eq!(command.subject, "S-0001");
                assert_eq!(command.extra, vec!["gender=M".to_string(), "cohort=b".to_string()]);
                assert!(command.datetime.is_none());
            }
            _ => panic!("expected randomize command"),
        }
    }

    #[test]
    fn load_context_resolves_a_configured_scheme() {
        let (scheme, _) = load_context(&memory_config(), "default").expect("context");
        assert_eq!(scheme.name().as_str(), "default");
        assert!(scheme.trial_blinded());
    }

    #[test]
    fn load_context_rejects_an_unknown_scheme() {
        let error = load_context(&memory_config(), "absent").expect_err("unknown scheme");
        assert!(error.to_string().contains("absent"));
    }
}
