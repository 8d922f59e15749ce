use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ejecta::{
    diagnose_volumes, BlockingProcess, BlockingProcessInspector, DiskSession, EjectError,
    EjectOptions, LsofInspector, SystemVolumeEnumerator, Volume, VolumeEnumerator,
};

#[derive(Parser)]
#[command(name = "ejecta")]
#[command(about = "Eject every external storage volume in one pass")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true, env = "EJECTA_DEBUG")]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the external volumes currently mounted, as JSON
    List,

    /// Print the number of external volumes
    Count,

    /// Unmount every external volume and eject its device
    Eject {
        /// Force the unmount past open files
        #[arg(short, long)]
        force: bool,

        /// Attach blocking-process details to failed volumes
        #[arg(short, long)]
        verbose: bool,

        /// Emit single-line JSON
        #[arg(long)]
        compact: bool,
    },

    /// Show the processes holding files open on each external volume
    Diagnose,
}

// Stdout carries exactly one JSON payload (or one integer for `count`);
// logs go to stderr. The exit status is 0 whenever a command ran, even
// with per-volume failures; only argument errors exit non-zero.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::List => list_volumes(),
        Commands::Count => count_volumes(),
        Commands::Eject {
            force,
            verbose,
            compact,
        } => eject_volumes(force, verbose, compact).await,
        Commands::Diagnose => diagnose_blockers().await,
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListPayload {
    count: usize,
    volumes: Vec<ListedVolume>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListedVolume {
    name: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bsd_name: Option<String>,
    is_ejectable: bool,
    is_removable: bool,
}

impl From<&Volume> for ListedVolume {
    fn from(volume: &Volume) -> Self {
        ListedVolume {
            name: volume.name.clone(),
            path: volume.mount_path_display(),
            bsd_name: volume.bsd_name.clone(),
            is_ejectable: volume.is_ejectable,
            is_removable: volume.is_removable,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EjectPayload {
    total_count: usize,
    success_count: usize,
    failed_count: usize,
    results: Vec<EjectedVolume>,
    total_duration: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EjectedVolume {
    volume: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocking_processes: Option<Vec<BlockingProcess>>,
}

#[derive(Serialize)]
struct ErrorPayload {
    error: ErrorDetail,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    kind: &'static str,
    message: String,
}

fn error_kind_name(err: &EjectError) -> &'static str {
    match err {
        EjectError::SessionCreate(_) => "sessionCreate",
        EjectError::Unsupported(_) => "unsupported",
        EjectError::Enumeration { .. } => "enumeration",
        EjectError::Inspection(_) => "inspection",
    }
}

fn external_volumes() -> Result<Vec<Volume>, EjectError> {
    let enumerator = SystemVolumeEnumerator::new();
    let volumes = enumerator.enumerate()?;
    Ok(volumes.into_iter().filter(|v| v.is_external()).collect())
}

fn list_volumes() -> Result<()> {
    match external_volumes() {
        Ok(volumes) => {
            let payload = ListPayload {
                count: volumes.len(),
                volumes: volumes.iter().map(ListedVolume::from).collect(),
            };
            print_json(&payload, false)
        }
        Err(err) => print_error(&err),
    }
}

fn count_volumes() -> Result<()> {
    match external_volumes() {
        Ok(volumes) => {
            println!("{}", volumes.len());
            Ok(())
        }
        Err(err) => print_error(&err),
    }
}

async fn eject_volumes(force: bool, verbose: bool, compact: bool) -> Result<()> {
    let volumes = match external_volumes() {
        Ok(volumes) => volumes,
        Err(err) => return print_error(&err),
    };
    let options = if force {
        EjectOptions::force_eject()
    } else {
        EjectOptions::default_eject()
    };

    let session = match DiskSession::native() {
        Ok(session) => session,
        Err(err) => return print_error(&err),
    };
    let batch = session.eject_all(&volumes, options).await;
    session.invalidate();

    let inspector = LsofInspector::new();
    let mut results = Vec::with_capacity(batch.results.len());
    for (volume, result) in volumes.iter().zip(&batch.results) {
        // On failure the volume is still mounted, so the inspection can
        // name who is holding it.
        let blocking_processes = if verbose && !result.success {
            match inspector.blocking_processes(&volume.mount_path).await {
                Ok(processes) if !processes.is_empty() => Some(processes),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(volume = %volume.name, error = %err, "inspection failed");
                    None
                }
            }
        } else {
            None
        };
        results.push(EjectedVolume {
            volume: result.volume_name.clone(),
            success: result.success,
            error: result.error_message.clone(),
            duration: result.duration_seconds,
            blocking_processes,
        });
    }

    let payload = EjectPayload {
        total_count: batch.total_count,
        success_count: batch.success_count,
        failed_count: batch.failed_count,
        results,
        total_duration: batch.total_duration_seconds,
    };
    print_json(&payload, compact)
}

async fn diagnose_blockers() -> Result<()> {
    let volumes = match external_volumes() {
        Ok(volumes) => volumes,
        Err(err) => return print_error(&err),
    };
    let inspector = LsofInspector::new();
    let reports = diagnose_volumes(&inspector, &volumes).await;
    print_json(&reports, false)
}

fn print_error(err: &EjectError) -> Result<()> {
    tracing::error!(error = %err, "command did not run");
    let payload = ErrorPayload {
        error: ErrorDetail {
            kind: error_kind_name(err),
            message: err.to_string(),
        },
    };
    print_json(&payload, false)
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{rendered}");
    Ok(())
}
