//! `sds` - Stream Deck sync daemon.
//!
//! Wires settings, the persisted instance id, the shared store and bus, the
//! device manager and the lifecycle watcher together.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use sds::actions::ActionPublisher;
use sds::bus::Bus;
use sds::cli::{Cli, Commands, ListArgs};
use sds::config::{Settings, default_config_dir, load_or_create_instance_id};
use sds::device::{DeviceBus, DeviceModel, HidDeviceBus};
use sds::engine::EngineConfig;
use sds::error::SdError;
use sds::lifecycle::LifecycleWatcher;
use sds::logging::init_logging;
use sds::manager::DeviceManager;
use sds::model::Hierarchy;
use sds::store::Store;

/// Build information embedded at compile time.
mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    pub fn git_sha() -> &'static str {
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    }

    pub fn git_dirty() -> bool {
        option_env!("VERGEN_GIT_DIRTY") == Some("true")
    }

    pub fn build_timestamp() -> &'static str {
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    }

    pub fn rustc_semver() -> &'static str {
        option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown")
    }

    pub fn target() -> &'static str {
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown")
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json, cli.verbose, cli.quiet);

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
        .and_then(|runtime| runtime.block_on(run(&cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        None | Some(Commands::Run) => cmd_run(cli).await,
        Some(Commands::InstanceId) => cmd_instance_id(cli),
        Some(Commands::List(args)) => cmd_list(cli, args).await,
        Some(Commands::Version) => {
            cmd_version(cli);
            Ok(())
        }
    }
}

fn config_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(default_config_dir()?),
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let dir = config_dir(cli)?;
    let mut settings = Settings::load(cli.config.as_deref(), &dir)?;
    settings.apply_overrides(&cli.store.overrides())?;
    Ok(settings)
}

// === Commands ===

async fn cmd_run(cli: &Cli) -> anyhow::Result<()> {
    let settings = load_settings(cli)?;
    let instance_id = load_or_create_instance_id(&config_dir(cli)?)?;
    info!(
        %instance_id,
        nats_url = %settings.nats_url,
        bucket = %settings.bucket,
        version = build_info::VERSION,
        "Starting"
    );

    let (store, bus) = connect(&settings).await?;
    let devices: Arc<dyn DeviceBus> = Arc::new(HidDeviceBus::new()?);

    let manager = Arc::new(DeviceManager::new(
        Arc::clone(&devices),
        Hierarchy::new(store),
        ActionPublisher::new(bus),
        EngineConfig::from_settings(&settings),
    ));
    let watcher = LifecycleWatcher::new(
        instance_id,
        devices,
        manager.clone(),
        settings.poll_interval(),
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down");

    shutdown.send_replace(true);
    if let Err(e) = watcher_task.await {
        warn!(error = %e, "Lifecycle watcher ended abnormally");
    }
    manager.stop_all().await;
    Ok(())
}

#[cfg(feature = "nats")]
async fn connect(settings: &Settings) -> anyhow::Result<(Arc<dyn Store>, Arc<dyn Bus>)> {
    use sds::bus::NatsBus;
    use sds::store::{NatsStore, nats};

    let client = nats::connect(&settings.nats_url)
        .await
        .with_context(|| format!("connecting to {}", settings.nats_url))?;
    let store = NatsStore::open(client.clone(), &settings.bucket)
        .await
        .with_context(|| format!("opening bucket {}", settings.bucket))?;
    Ok((Arc::new(store), Arc::new(NatsBus::new(client))))
}

#[cfg(not(feature = "nats"))]
async fn connect(_settings: &Settings) -> anyhow::Result<(Arc<dyn Store>, Arc<dyn Bus>)> {
    use sds::bus::MemoryBus;
    use sds::store::MemoryStore;

    warn!("Built without NATS support, state is kept in memory only");
    // Nothing reads published actions back, so keep no history
    Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryBus::with_history(0))))
}

fn cmd_instance_id(cli: &Cli) -> anyhow::Result<()> {
    let id = load_or_create_instance_id(&config_dir(cli)?)?;
    if cli.json {
        println!("{}", serde_json::json!({ "instance_id": id }));
    } else {
        println!("{id}");
    }
    Ok(())
}

#[derive(Serialize)]
struct ListedDevice {
    serial: String,
    vendor_id: String,
    product_id: String,
    model: DeviceModel,
    name: &'static str,
    keys: usize,
}

async fn cmd_list(cli: &Cli, args: &ListArgs) -> anyhow::Result<()> {
    let devices = tokio::task::spawn_blocking(|| HidDeviceBus::new()?.enumerate())
        .await
        .context("enumeration task failed")??;

    let listed: Vec<ListedDevice> = devices
        .into_iter()
        .filter(|d| args.all || d.model().is_supported())
        .map(|d| {
            let model = d.model();
            ListedDevice {
                vendor_id: format!("{:#06x}", d.vendor_id),
                product_id: format!("{:#06x}", d.product_id),
                serial: d.serial,
                model,
                name: model.display_name(),
                keys: model.capabilities().slot_count,
            }
        })
        .collect();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
    } else if listed.is_empty() {
        println!("No Stream Deck devices found");
    } else {
        for d in &listed {
            println!("{}: {} ({} keys, {}:{})", d.serial, d.name, d.keys, d.vendor_id, d.product_id);
        }
    }
    Ok(())
}

fn cmd_version(cli: &Cli) {
    if cli.json {
        let info = serde_json::json!({
            "version": build_info::VERSION,
            "git_sha": build_info::git_sha(),
            "git_dirty": build_info::git_dirty(),
            "build_timestamp": build_info::build_timestamp(),
            "rustc_version": build_info::rustc_semver(),
            "target": build_info::target(),
        });
        println!("{info}");
    } else {
        println!("sds {}", build_info::VERSION);
        println!(
            "git: {}{}",
            build_info::git_sha(),
            if build_info::git_dirty() { " (dirty)" } else { "" }
        );
        println!("built: {}", build_info::build_timestamp());
        println!("rustc: {}", build_info::rustc_semver());
        println!("target: {}", build_info::target());
    }
}

fn report_error(e: &anyhow::Error) {
    eprintln!("Error: {e:#}");
    if let Some(hint) = e.downcast_ref::<SdError>().and_then(SdError::suggestion) {
        eprintln!("Hint: {hint}");
    }
}
