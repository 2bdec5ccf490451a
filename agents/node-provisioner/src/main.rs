//! Node Provisioner CLI Entry Point
//!
//! Operator tooling around connection strategies: probe node readiness,
//! preview launcher descriptors and migrate legacy configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use node_provisioner::cli::config::{Config, LoggingConfig};
use node_provisioner::connection::launcher::SSH_PORT;
use node_provisioner::{CloudNode, LaunchStrategy, NodeInventory, StrategyKind, TcpProbe};

#[derive(Parser)]
#[command(name = "node-provisioner")]
#[command(author, version, about = "Node Provisioner - connection strategies for cloud build nodes")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "NODE_PROVISIONER_CONFIG", default_value = "config/provisioner.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a node accepts SSH connections
    Probe {
        /// Public address of the node
        address: String,

        #[arg(short, long, default_value_t = SSH_PORT)]
        port: u16,

        /// Keep probing until the port opens or the timeout expires
        #[arg(short, long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,

        /// Seconds between probes while waiting
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
    /// Print the launcher descriptor a template would produce for a node
    Launcher {
        /// Template name from the configuration
        #[arg(short, long)]
        template: String,

        /// Public address of the node
        #[arg(short, long)]
        address: Option<String>,

        /// Node name
        #[arg(short, long, default_value = "preview-node")]
        name: String,
    },
    /// Rewrite the configuration in the current layout
    Migrate {
        /// Write here instead of overwriting the configuration file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the selectable connection strategies
    Kinds,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_logging(&config.logging, cli.verbose)?;
    debug!(config = %cli.config.display(), controller_id = %config.controller_id, "Configuration loaded");

    match cli.command {
        Commands::Probe {
            address,
            port,
            wait,
            timeout_secs,
            interval_secs,
        } => {
            let probe = TcpProbe::new(config.probe.policy());
            if wait {
                let ready = wait_until_ready(
                    probe,
                    address.clone(),
                    port,
                    Duration::from_secs(interval_secs),
                    Duration::from_secs(timeout_secs),
                )
                .await?;
                report_probe(&address, port, ready);
                if !ready {
                    anyhow::bail!("{address}:{port} did not open within {timeout_secs}s");
                }
            } else {
                let ready = probe_once(probe, address.clone(), port).await?;
                report_probe(&address, port, ready);
            }
        }
        Commands::Launcher {
            template,
            address,
            name,
        } => {
            show_launcher(&config, &template, address, &name)?;
        }
        Commands::Migrate { output } => {
            let target = migrate_config(&cli.config, output.as_deref())?;
            info!(path = %target.display(), "Configuration written in current layout");
        }
        Commands::Kinds => {
            for kind in StrategyKind::ALL {
                println!("{:<12} {}", kind.tag(), kind.display_name());
            }
        }
        Commands::Version => {
            println!("node-provisioner {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path)
    } else {
        Ok(Config::default_config())
    }
}

/// Re-save an existing configuration file in the current layout
fn migrate_config(source: &Path, output: Option<&Path>) -> Result<PathBuf> {
    if !source.exists() {
        anyhow::bail!("No configuration to migrate at {}", source.display());
    }
    let config = Config::load(source)?;
    let target = output.unwrap_or(source).to_path_buf();
    config.save(&target)?;
    Ok(target)
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {level}"))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if logging.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}

/// Run one probe off the async runtime; it blocks for up to the connect timeout
async fn probe_once(probe: TcpProbe, address: String, port: u16) -> Result<bool> {
    tokio::task::spawn_blocking(move || probe.is_ready(Some(&address), port))
        .await
        .context("Probe task panicked")
}

/// Probe every `interval` until the port opens or `deadline` passes
async fn wait_until_ready(
    probe: TcpProbe,
    address: String,
    port: u16,
    interval: Duration,
    deadline: Duration,
) -> Result<bool> {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    let mut attempts: u32 = 0;

    loop {
        ticker.tick().await;
        attempts += 1;

        if probe_once(probe, address.clone(), port).await? {
            info!(address = %address, port, attempts, "Node is ready");
            return Ok(true);
        }

        if started.elapsed() >= deadline {
            warn!(address = %address, port, attempts, "Gave up waiting for node");
            return Ok(false);
        }
        debug!(address = %address, port, attempts, "Node not ready yet");
    }
}

fn report_probe(address: &str, port: u16, ready: bool) {
    if ready {
        println!("{address}:{port} ready");
    } else {
        println!("{address}:{port} not ready");
    }
}

fn show_launcher(config: &Config, template: &str, address: Option<String>, name: &str) -> Result<()> {
    let options = config.resolve_template(template)?;
    let strategy = options.require_strategy(template)?.clone();

    let inventory = NodeInventory::new();
    let node = CloudNode::new(name, "preview", options, &inventory);
    node.set_public_address(address);

    let launcher = strategy
        .build_launcher(&node)
        .with_context(|| format!("Failed to build launcher for template '{template}'"))?;
    println!("{}", launcher.to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_provisioner::ProbePolicy;
    use std::net::TcpListener;

    #[tokio::test]
    async fn test_wait_until_ready_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let ready = wait_until_ready(
            TcpProbe::default(),
            "127.0.0.1".to_string(),
            port,
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(ready);
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let probe = TcpProbe::new(ProbePolicy {
            connect_timeout: Duration::from_millis(100),
            fail_open: false,
        });

        let ready = wait_until_ready(
            probe,
            "127.0.0.1".to_string(),
            port,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert!(!ready);
    }

    #[test]
    fn test_show_launcher_unknown_template() {
        let config = Config::default_config();
        assert!(show_launcher(&config, "missing", None, "node").is_err());
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.probe.connect_timeout_ms, 500);
    }

    #[test]
    fn test_migrate_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("absent.toml");
        let output = dir.path().join("migrated.toml");

        let err = migrate_config(&source, Some(&output)).unwrap_err();
        assert!(err.to_string().contains("No configuration to migrate"));
        assert!(!source.exists());
        assert!(!output.exists());
    }

    #[test]
    fn test_migrate_rewrites_legacy_config() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("provisioner.toml");
        std::fs::write(
            &source,
            r#"
[templates.legacy]
slave_type = "SSH"
credentials_id = "build-key"
"#,
        )
        .unwrap();

        let target = migrate_config(&source, None).unwrap();
        assert_eq!(target, source);

        let written = std::fs::read_to_string(&source).unwrap();
        assert!(!written.contains("slave_type"));
        let config = Config::load(&source).unwrap();
        assert_eq!(
            config.resolve_template("legacy").unwrap().connection,
            Some(node_provisioner::ConnectionStrategy::ssh("build-key"))
        );
    }
}
