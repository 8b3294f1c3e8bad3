//! Warden - Main entry point
//!
//! Password gate with self-maintaining TLS for LAN services.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use warden_common::logging::{self, LogFormat};
use warden_common::MemoryAttemptStore;
use warden_config::{Config, DEFAULT_CONFIG_PATH};
use warden_gate::tls::{inspect, CertificateManager};
use warden_gate::{routes, server, shutdown, AccessPolicy, Gate, ListenerPlan, LockoutSweeper};

/// Warden - password gate and self-maintaining TLS for LAN services
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "WARDEN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format (text or json)
    #[arg(long = "log-format", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gate (default)
    Run,
    /// Validate configuration file and exit
    Test,
    /// Provision the certificate once and print what it covers
    Cert,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match cli.command {
        Some(Commands::Test) => test_config(&config_path),
        Some(Commands::Cert) => {
            logging::init(cli.verbose, cli.log_format);
            runtime()?.block_on(provision_certificate(&config_path))
        }
        Some(Commands::Run) | None => {
            logging::init(cli.verbose, cli.log_format);
            runtime()?.block_on(run_server(&config_path))
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")
}

/// Test configuration file and exit
///
/// Unlike a normal start, an unreadable or unparseable file is an error here.
fn test_config(path: &Path) -> Result<()> {
    logging::init(false, LogFormat::Text);

    info!("Testing configuration file: {}", path.display());
    let loaded = Config::from_file(path).context("Failed to load configuration file")?;

    for warning in &loaded.warnings {
        warn!("  - {}", warning);
    }

    let config = &loaded.config;
    info!("Configuration test successful:");
    info!("  - port {}", config.port);
    info!(
        "  - https {} (port {})",
        if config.enable_https { "enabled" } else { "disabled" },
        config.https_port
    );
    info!("  - {} allow-list fragment(s)", config.allowed_hosts.len());
    info!(
        "  - domain {}",
        config.domain_name.as_deref().unwrap_or("<gateway address>")
    );
    info!("  - certificate backend {}", config.cert_backend);

    if config.uses_default_password() {
        warn!("  - password is the built-in default");
    }
    if !loaded.warnings.is_empty() {
        warn!("{} setting(s) fell back to defaults", loaded.warnings.len());
    }

    Ok(())
}

async fn run_server(path: &Path) -> Result<()> {
    let config = Config::load(path);

    if config.uses_default_password() {
        warn!("Shared password is the built-in default; set 'password' in the configuration");
    }

    let store = Arc::new(MemoryAttemptStore::with_capacity(config.max_tracked_origins));
    let policy = Arc::new(AccessPolicy::new(&config.access_policy(), store.clone()));
    LockoutSweeper::new(store).spawn();

    let app = routes::router(Gate::new(policy, config.trust_proxy));
    let plan = ListenerPlan::resolve(&config).await;

    let (trigger, shutdown) = shutdown::channel();
    shutdown::spawn_signal_listener(trigger);

    server::serve(plan, app, shutdown)
        .await
        .context("Server failed")?;

    info!("Warden stopped");
    Ok(())
}

async fn provision_certificate(path: &Path) -> Result<()> {
    let config = Config::load(path);
    let manager =
        CertificateManager::from_config(&config).context("Failed to open certificate storage")?;

    let cert = manager
        .ensure_certificate(&config.domain_policy())
        .await
        .context("Certificate provisioning failed")?;
    let summary = inspect(&cert.material.cert_pem).context("Provisioned certificate is unreadable")?;

    info!(
        "Certificate {}: {}",
        if cert.regenerated { "generated" } else { "reused" },
        manager.storage().cert_path().display()
    );
    info!("  - common name {}", summary.common_name.as_deref().unwrap_or("<none>"));
    for name in &summary.alt_names {
        info!("  - alternate name {}", name);
    }
    info!("  - expires {}", summary.not_after);

    Ok(())
}
