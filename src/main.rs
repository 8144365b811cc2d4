#![cfg(feature = "cli")]
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;

use rsoemcrypto::engine::Engine;
use rsoemcrypto::implementation::{Implementation, ImplementationKind};
use rsoemcrypto::metrics::AdapterMetrics;
use rsoemcrypto::native::NativeEngine;
use rsoemcrypto::types::{HdcpCapability, ProvisioningMethod};
use rsoemcrypto::watchdog::Watchdog;
use rsoemcrypto::{Adapter, AdapterConfig, SecurityLevel};

use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "rsoemcrypto", version, disable_version_flag = true, about = "rsoemcrypto CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Resolve a Level 1 module and list what it offers.
    ///
    /// The module is initialized to learn its API version and terminated
    /// again before exiting.
    Inspect {
        library: PathBuf,
    },
    /// Run a full adapter Initialize and print metrics and device queries.
    Status {
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Read and clear the Level 3 watchdog flag.
    CheckFailure {
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("rsoemcrypto version {}", version);

    if cli.version {
        return Ok(());
    }

    match cli.command {
        Some(Commands::Inspect { library }) => run_inspect(&library),
        Some(Commands::Status { config }) => run_status(config.as_deref()),
        Some(Commands::CheckFailure { config }) => run_check_failure(config.as_deref()),
        None => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AdapterConfig> {
    match path {
        Some(path) => AdapterConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(AdapterConfig::default()),
    }
}

#[derive(Serialize)]
struct InspectReport {
    library: String,
    api_version: u32,
    shim: &'static str,
    operations: Vec<String>,
}

fn run_inspect(library: &Path) -> anyhow::Result<()> {
    let engine = match NativeEngine::load(library).context("Failed to open library")? {
        Ok(engine) => engine,
        Err(failure) => {
            warn!("[-] {} rejected: {} ({})", library.display(), failure, failure.mode());
            anyhow::bail!("module rejected: {failure}");
        }
    };
    let name = engine.name().to_string();
    let engine = Arc::new(engine);
    let implementation = Implementation::new(ImplementationKind::Hardware, engine.clone());
    info!("[+] Resolved {} at API v{}", name, implementation.version());

    let report = InspectReport {
        library: name,
        api_version: implementation.version(),
        shim: implementation.shim().generation(),
        operations: implementation
            .operations()
            .iter()
            .map(ToString::to_string)
            .collect(),
    };
    print!("{}", serde_yaml::to_string(&report)?);

    let status = engine.terminate();
    if !status.is_success() {
        warn!("[-] Terminate returned {}", status);
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport<'a> {
    metrics: &'a AdapterMetrics,
    default_level: ImplementationKind,
    api_version: u32,
    security_level: String,
    security_patch_level: u8,
    provisioning_method: ProvisioningMethod,
    supported_certificates: u32,
    hdcp: Option<(HdcpCapability, HdcpCapability)>,
    supports_usage_table: bool,
    anti_rollback_hw: bool,
    srm_update_supported: bool,
}

fn run_status(config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let adapter = Adapter::initialize(config).context("Failed to initialize adapter")?;
    let level = SecurityLevel::Default;

    let report = StatusReport {
        metrics: adapter.metrics(),
        default_level: adapter.default_kind(),
        api_version: adapter.api_version(level),
        security_level: adapter.security_level(level),
        security_patch_level: adapter.security_patch_level(level),
        provisioning_method: adapter.get_provisioning_method(level),
        supported_certificates: adapter.supported_certificates(level),
        hdcp: adapter.get_hdcp_capability(level).ok(),
        supports_usage_table: adapter.supports_usage_table(level),
        anti_rollback_hw: adapter.is_anti_rollback_hw_present(level),
        srm_update_supported: adapter.is_srm_update_supported(),
    };
    print!("{}", serde_yaml::to_string(&report)?);

    adapter.terminate().context("Failed to terminate adapter")?;
    Ok(())
}

fn run_check_failure(config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let watchdog = Watchdog::new(
        config.watchdog_timeout(),
        config.failure_file_path(),
        config.abort_policy,
    );
    if watchdog.check_for_previous_failure() {
        warn!("[-] Level 3 initialization failed during the previous run");
    } else {
        info!("[+] No Level 3 failure recorded at {}", watchdog.failure_file().display());
    }
    Ok(())
}
