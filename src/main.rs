//! CLI entry point for the DAQ host.
//!
//! - `daq-host run`: discover, initialize and start modules, then watch the module
//!   registry until Ctrl-C.
//! - `daq-host modules`: list discovered modules and whether they are enabled.
//! - `daq-host check`: validate the typed system documents.
//!
//! # Usage
//! ```bash
//! daq-host --settings config/host.toml run
//! DAQ_HOST_STORE__ROOT_DIR=/srv/daq daq-host modules
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_host::config::{
    ConfigDocument, ConfigStore, DatabaseConfig, HistoryConfig, PlcConfig, SystemConfig, Validate,
    ValidationResult,
};
use daq_host::modules::builtin::builtin_catalog;
use daq_host::modules::{ModuleLoader, ModuleManager, SchemaProvisioner, SqliteConnector};
use daq_host::settings::HostSettings;
use daq_host::{logging, HostError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "daq-host")]
#[command(about = "Configuration store and module host for the DAQ application", long_about = None)]
struct Cli {
    /// Host settings file
    #[arg(long, global = true, default_value = "config/host.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and run every enabled module until Ctrl-C
    Run,

    /// List discovered modules
    Modules,

    /// Validate the system configuration documents
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = HostSettings::load_from(&cli.settings)
        .with_context(|| format!("loading {}", cli.settings.display()))?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run => run(settings).await,
        Commands::Modules => list_modules(settings).await,
        Commands::Check => check(settings),
    }
}

fn loader_for(settings: &HostSettings, store: &ConfigStore) -> ModuleLoader {
    ModuleLoader::from_settings(Arc::new(builtin_catalog()), store.clone(), settings)
}

async fn run(settings: HostSettings) -> Result<()> {
    let store = ConfigStore::new(settings.store.clone());
    tracing::info!(
        app = %settings.application.name,
        root = %store.root().display(),
        "Starting DAQ host"
    );

    let modules = loader_for(&settings, &store).load_enabled_modules().await?;
    let provisioner = SchemaProvisioner::from_settings(
        store.clone(),
        Arc::new(SqliteConnector),
        &settings.modules,
    );
    let manager = ModuleManager::new(store.clone(), provisioner, &settings.modules);

    manager.register_many(modules).await;
    let report = manager.initialize_all().await;
    tracing::info!(%report, "Initialization complete");
    let report = manager.startup_all().await;
    tracing::info!(%report, "Startup complete");

    store.enable_watch(&settings.modules.registry_path, true)?;
    let mut changes = store.subscribe();
    let mut statuses = manager.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            change = changes.recv() => match change {
                Ok(event) => tracing::info!(
                    path = %event.path.display(),
                    kind = ?event.kind,
                    changed = ?event.changed_properties,
                    "Module registry changed; restart the host to apply"
                ),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Dropped configuration events"),
                Err(RecvError::Closed) => break,
            },
            status = statuses.recv() => if let Ok(status) = status {
                tracing::debug!(
                    module_id = %status.module_id,
                    from = %status.old_state,
                    to = %status.new_state,
                    "Module status"
                );
            },
        }
    }

    tracing::info!("Shutting down");
    let result = manager.shutdown().await;
    store.shutdown();
    match result {
        Err(HostError::ShutdownFailed(errors)) => {
            for e in &errors {
                tracing::error!(error = %e, "Module failed to stop");
            }
            anyhow::bail!("{} module(s) failed to stop", errors.len())
        }
        other => Ok(other?),
    }
}

async fn list_modules(settings: HostSettings) -> Result<()> {
    let store = ConfigStore::new(settings.store.clone());
    let loader = loader_for(&settings, &store);
    let registry = loader.registry()?;
    let descriptors = loader.discover(loader.plugin_dir()).await;

    println!("{:<24} {:<10} {:<8} {:<8} NAME", "ID", "VERSION", "ORIGIN", "ENABLED");
    for d in &descriptors {
        let enabled = registry
            .find(d.id())
            .map_or(d.info.enabled_by_default, |e| e.is_enabled);
        println!(
            "{:<24} {:<10} {:<8} {:<8} {}",
            d.id(),
            d.info.version,
            format!("{:?}", d.origin),
            enabled,
            d.info.name
        );
    }
    Ok(())
}

fn check(settings: HostSettings) -> Result<()> {
    let store = ConfigStore::new(settings.store);
    let results = [
        (SystemConfig::PATH, check_document::<SystemConfig>(&store, SystemConfig::PATH)?),
        (DatabaseConfig::PATH, check_document::<DatabaseConfig>(&store, DatabaseConfig::PATH)?),
        (PlcConfig::PATH, check_document::<PlcConfig>(&store, PlcConfig::PATH)?),
        (HistoryConfig::PATH, check_document::<HistoryConfig>(&store, HistoryConfig::PATH)?),
    ];

    let mut invalid = 0;
    for (path, result) in &results {
        match result {
            None => println!("{path}: missing (defaults apply)"),
            Some(result) if result.errors.is_empty() && result.warnings.is_empty() => {
                println!("{path}: ok");
            }
            Some(result) => {
                println!("{path}:");
                print!("{result}");
                if !result.is_valid() {
                    invalid += 1;
                }
            }
        }
    }
    if invalid > 0 {
        anyhow::bail!("{invalid} document(s) failed validation");
    }
    Ok(())
}

fn check_document<T>(store: &ConfigStore, path: &str) -> Result<Option<ValidationResult>>
where
    T: Validate + ConfigDocument,
{
    Ok(store.load::<T>(path, false)?.map(|doc| store.validate(&doc)))
}
