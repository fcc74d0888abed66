mod catalog;
mod distro;
mod engine;
mod paths;
mod pm;
mod ui;

use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde_json::json;

use crate::catalog::{Catalog, LoadError, loader};
use crate::distro::{DistroInfo, OperatingSystem};
use crate::engine::executor::USER_DECLINED_CODE;
use crate::engine::{
    BatchOutcome, BatchStatus, CancelKind, InteractiveExecutor, Orchestrator, Report,
    RunClassification, orchestrator,
};
use crate::pm::Backend;
use crate::ui::prelude::*;

/// Postup main parser
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Catalog directory (defaults to ~/.config/postup, then /usr/share/postup)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Override the detected package backend (apt, dnf, pacman, zypper, flatpak)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Emit machine-readable JSON events
    #[arg(long, global = true)]
    json: bool,

    /// Activate debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Timeout in seconds for idempotency check commands
    #[arg(long, global = true, default_value_t = 10)]
    check_timeout: u64,

    /// Worker limit for concurrent idempotency checks
    #[arg(long, global = true, default_value_t = 8)]
    check_workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available applications and tweaks for this system
    List,

    /// Install the selected applications
    Install {
        /// Application ids from the catalog
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Apply the selected system tweaks
    Tweak {
        /// Tweak ids from the catalog
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Refresh the package manager's metadata cache
    Refresh,

    /// Upgrade all installed packages
    Upgrade,
}

fn main() {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    ui::init(format, !cli.json);
    ui::set_debug_mode(cli.debug);

    match run(cli) {
        Ok(code) => exit(code),
        Err(e) => {
            emit(Level::Error, "main.error", &format!("Error: {e:#}"), None);
            exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let info = OperatingSystem::detect();
    let backend = match &cli.backend {
        Some(name) => Backend::from_name(name)?,
        None => Backend::select(&info.os)?,
    };
    emit(
        Level::Debug,
        "main.detected",
        &format!(
            "Detected {} ({}), backend {}",
            info.pretty_name, info.version, backend
        ),
        None,
    );

    let root = paths::catalog_dir(cli.config_dir.clone())?;

    match &cli.command {
        Commands::List => {
            let apps = load_catalog(&root, CatalogKind::Apps, &info, backend);
            let tweaks = load_catalog(&root, CatalogKind::Tweaks, &info, backend);
            list_catalogs(apps, tweaks, backend)
        }
        Commands::Install { ids } => {
            let catalog = load_catalog(&root, CatalogKind::Apps, &info, backend)
                .context("failed to load the application catalog")?;
            apply(&cli, &catalog, backend, ids)
        }
        Commands::Tweak { ids } => {
            let catalog = load_catalog(&root, CatalogKind::Tweaks, &info, backend)
                .context("failed to load the tweak catalog")?;
            apply(&cli, &catalog, backend, ids)
        }
        Commands::Refresh => {
            let outcome = orchestrator::refresh_cache(backend, &InteractiveExecutor::new())?;
            Ok(render_maintenance_outcome("refresh", &outcome))
        }
        Commands::Upgrade => {
            let outcome = orchestrator::upgrade_all(backend, &InteractiveExecutor::new())?;
            Ok(render_maintenance_outcome("upgrade", &outcome))
        }
    }
}

#[derive(Clone, Copy)]
enum CatalogKind {
    Apps,
    Tweaks,
}

impl CatalogKind {
    fn dir(self, root: &Path) -> PathBuf {
        match self {
            CatalogKind::Apps => paths::apps_dir(root),
            CatalogKind::Tweaks => paths::tweaks_dir(root),
        }
    }

    fn label(self) -> &'static str {
        match self {
            CatalogKind::Apps => "Applications",
            CatalogKind::Tweaks => "Tweaks",
        }
    }
}

/// Load one catalog pair. The distro-specific overlay is looked up by
/// the distro's own file stem first, then by its family stem.
fn load_catalog(
    root: &Path,
    kind: CatalogKind,
    info: &DistroInfo,
    backend: Backend,
) -> Result<Catalog, LoadError> {
    let dir = kind.dir(root);
    let common = dir.join("common.yaml");

    let mut target = dir.join(format!("{}.yaml", info.os.catalog_stem()));
    if !target.exists() {
        if let Some(family) = info.os.family_stem() {
            let family_file = dir.join(format!("{family}.yaml"));
            if family_file.exists() {
                target = family_file;
            }
        }
    }

    let catalog = catalog::load(&common, &target, backend)?;
    if !loader::compatible_with(&catalog, &info.version) {
        emit(
            Level::Warn,
            "catalog.version_mismatch",
            &format!(
                "{} catalog targets versions [{}], detected {} {} - tasks may not work as expected",
                catalog.distro.as_deref().unwrap_or("The"),
                catalog.compatible_versions.join(", "),
                info.os,
                info.version
            ),
            None,
        );
    }
    Ok(catalog)
}

fn apply(cli: &Cli, catalog: &Catalog, backend: Backend, ids: &[String]) -> Result<i32> {
    let orchestrator = Orchestrator::new(catalog, backend, InteractiveExecutor::new())
        .with_check_limits(cli.check_workers, Duration::from_secs(cli.check_timeout));
    let report = orchestrator.apply_selection(ids)?;
    render_report(&report);
    Ok(report_exit_code(&report))
}

fn report_exit_code(report: &Report) -> i32 {
    match report.classification {
        RunClassification::Success => 0,
        RunClassification::Cancelled => USER_DECLINED_CODE,
        RunClassification::Partial | RunClassification::Failed => 1,
    }
}

fn render_report(report: &Report) {
    if get_output_format() == OutputFormat::Json {
        for entry in &report.entries {
            emit(
                Level::Info,
                "report.task",
                &format!("{}: {}", entry.name, entry.outcome.message()),
                Some(json!({
                    "id": entry.id,
                    "status": entry.outcome.label(),
                    "message": entry.outcome.message(),
                    "requires_restart": entry.requires_restart,
                })),
            );
        }
        let (applied, skipped, failed, cancelled) = report.counts();
        emit(
            Level::Info,
            "report.summary",
            &format!("{applied} applied, {skipped} skipped, {failed} failed, {cancelled} cancelled"),
            Some(json!({
                "classification": report.classification,
                "restart_required": report.restart_required,
            })),
        );
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Task", "Status", "Details"]);
    for entry in &report.entries {
        table.add_row(vec![
            entry.name.clone(),
            entry.outcome.label().to_string(),
            entry.outcome.message(),
        ]);
    }
    println!("{table}");

    let (applied, skipped, failed, cancelled) = report.counts();
    let summary = format!(
        "{applied} applied, {skipped} skipped, {failed} failed, {cancelled} cancelled"
    );
    match report.classification {
        RunClassification::Success => println!("{}", summary.green().bold()),
        RunClassification::Partial => println!("{}", summary.yellow().bold()),
        RunClassification::Cancelled | RunClassification::Failed => {
            println!("{}", summary.red().bold())
        }
    }

    if report.restart_required {
        emit(
            Level::Warn,
            "report.restart_required",
            "A system restart is required for some changes to take effect",
            None,
        );
    }
}

fn render_maintenance_outcome(operation: &str, outcome: &BatchOutcome) -> i32 {
    if outcome.is_success() {
        emit(
            Level::Success,
            "maintenance.done",
            &format!("System {operation} completed"),
            None,
        );
        return 0;
    }
    match outcome.status {
        BatchStatus::Completed => 0,
        BatchStatus::Cancelled(CancelKind::User) => {
            emit(
                Level::Warn,
                "maintenance.cancelled",
                &format!("System {operation} cancelled"),
                None,
            );
            USER_DECLINED_CODE
        }
        BatchStatus::Cancelled(CancelKind::Signal) => {
            emit(
                Level::Warn,
                "maintenance.interrupted",
                &format!("System {operation} interrupted"),
                None,
            );
            outcome.exit_code
        }
        BatchStatus::Failed => {
            emit(
                Level::Error,
                "maintenance.failed",
                &format!(
                    "System {operation} failed with exit code {}",
                    outcome.exit_code
                ),
                None,
            );
            1
        }
    }
}

fn list_catalogs(
    apps: Result<Catalog, LoadError>,
    tweaks: Result<Catalog, LoadError>,
    backend: Backend,
) -> Result<i32> {
    // One catalog failing to load is non-fatal as long as the other is
    // usable; both failing leaves nothing to list.
    let both_failed = apps.is_err() && tweaks.is_err();

    match apps {
        Ok(catalog) => list_one(CatalogKind::Apps, &catalog, backend),
        Err(e) => {
            if both_failed {
                return Err(e.into());
            }
            emit(
                Level::Warn,
                "list.apps_unavailable",
                &format!("Application catalog unavailable: {e}"),
                None,
            )
        }
    }
    match tweaks {
        Ok(catalog) => list_one(CatalogKind::Tweaks, &catalog, backend),
        Err(e) => emit(
            Level::Warn,
            "list.tweaks_unavailable",
            &format!("Tweak catalog unavailable: {e}"),
            None,
        ),
    }
    Ok(0)
}

fn list_one(kind: CatalogKind, catalog: &Catalog, backend: Backend) {
    if get_output_format() == OutputFormat::Json {
        for task in catalog.iter_tasks() {
            emit(
                Level::Info,
                "list.task",
                &format!("{}: {}", task.id, task.name),
                Some(json!({
                    "id": task.id,
                    "name": task.name,
                    "category": task.category,
                    "tags": task.tags,
                    "description": task.description,
                    "requires_restart": task.requires_restart,
                    "dependencies": task.dependencies,
                })),
            );
        }
        return;
    }

    println!("{}", kind.label().bold());
    if catalog.is_empty() {
        println!("  (none available for {})\n", backend.display_name());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Name", "Category", "Tags", "Description"]);
    for task in catalog.iter_tasks() {
        table.add_row(vec![
            task.id.clone(),
            task.name.clone(),
            task.category.clone(),
            task.tags.join(", "),
            task.description.clone(),
        ]);
    }
    println!("{table}\n");
}
