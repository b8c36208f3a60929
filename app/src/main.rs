use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use msgrestore_core::importer::{self, journal, ImportReport};
use msgrestore_core::models::ImportSummary;
use msgrestore_core::{diagnostics, open_store, CoreError, ImportConfig};

#[derive(Debug, Parser)]
#[command(name = "msgrestore", about = "Restore an SMS/MMS backup into a message store")]
struct Cli {
    /// Message store database
    #[arg(long, default_value = "messages.sqlite")]
    store: PathBuf,
    /// Where MMS part payloads are written (defaults to `parts/` next to the store)
    #[arg(long)]
    parts_dir: Option<PathBuf>,
    /// Directory for the redacted diagnostics log
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import an XML or JSON backup
    Import {
        backup: PathBuf,
        /// TOML file with `import_sms` / `import_mms`
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        no_sms: bool,
        #[arg(long)]
        no_mms: bool,
    },
    /// Show recent import runs
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let parts_dir = cli.parts_dir.clone().unwrap_or_else(|| default_parts_dir(&cli.store));
    match cli.command {
        Command::Import {
            backup,
            config,
            no_sms,
            no_mms,
        } => {
            let mut import_config = match config {
                Some(path) => ImportConfig::load(&path)?,
                None => ImportConfig::default(),
            };
            if no_sms {
                import_config.import_sms = false;
            }
            if no_mms {
                import_config.import_mms = false;
            }
            let log_dir = cli.log_dir.clone();
            if let Some(dir) = &log_dir {
                let _ = diagnostics::log_event(dir, "import_start", "import requested");
            }
            let result = spawn_import(cli.store, parts_dir, backup, import_config)?;
            Ok(report_result(result, log_dir.as_deref()))
        }
        Command::History { limit } => {
            let store = open_store(&cli.store, &parts_dir)
                .with_context(|| format!("opening store {}", cli.store.display()))?;
            for record in journal::list_imports(&store.conn, limit)? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn default_parts_dir(store: &Path) -> PathBuf {
    store
        .parent()
        .map(|dir| dir.join("parts"))
        .unwrap_or_else(|| PathBuf::from("parts"))
}

/// Runs the whole import on one dedicated worker and waits for it.
fn spawn_import(
    store_path: PathBuf,
    parts_dir: PathBuf,
    backup: PathBuf,
    config: ImportConfig,
) -> Result<Result<ImportReport, CoreError>> {
    let handle = thread::Builder::new()
        .name("import-worker".to_string())
        .spawn(move || -> Result<ImportReport, CoreError> {
            let progress = |msg: &str| info!("{}", msg);
            let plan = importer::plan_import_with_progress(&backup, progress)?;
            let mut store = open_store(&store_path, &parts_dir)?;
            importer::import_backup_file(&mut store, &plan, &config, progress)
        })
        .context("spawning import worker")?;
    handle.join().map_err(|_| anyhow!("import worker panicked"))
}

fn report_result(result: Result<ImportReport, CoreError>, log_dir: Option<&Path>) -> ExitCode {
    match result {
        Ok(report) => {
            if let Some(dir) = log_dir {
                let _ = diagnostics::log_report(dir, &report);
            }
            let s = &report.stats;
            println!("{}", report.outcome.summary().message());
            println!(
                "imported {} (new rows {}, duplicates {}), failed {}, skipped {}",
                s.imported, s.rows_inserted, s.duplicates, s.failed, s.skipped_no_identity
            );
            if s.payload_failures > 0 {
                println!("{} attachment payloads could not be written", s.payload_failures);
            }
            match report.outcome.summary() {
                ImportSummary::Failed => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            }
        }
        Err(err) => {
            if let Some(dir) = log_dir {
                let _ = diagnostics::log_event(dir, "import_error", &err.to_string());
            }
            match err {
                CoreError::InvalidFormat(_) => println!("{}", ImportSummary::InvalidFormat.message()),
                other => println!("{}", other),
            }
            ExitCode::FAILURE
        }
    }
}
