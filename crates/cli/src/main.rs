//! consolesync command-line tool.
//!
//! Provides subcommands for listing, downloading, uploading, restoring,
//! creating and deleting saved configurations on console management
//! servers, listing CCS inventory, and merging one server's configuration
//! into another's. Also generates and validates the configuration file.

mod merge_cmd;
mod remote;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use consolesync_core::config::{AppConfig, LoggingConfig};

use remote::RemoteContext;

const DEFAULT_CONFIG_PATH: &str = "~/.config/consolesync/config.toml";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// consolesync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "consolesync",
    version,
    about = "Back up, restore and merge console management server configurations"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Logon user id (default: credentials.username from the config file).
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Environment variable holding the logon password.
    #[arg(long, global = true)]
    password_env: Option<String>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the servers listed in the configuration file.
    Servers,

    /// Generate a default configuration file.
    Init {
        /// Output path (default: the --config path).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file.
    Validate,

    #[command(flatten)]
    Remote(RemoteCommand),
}

/// Subcommands that log on to a server.
#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// List saved configurations on a server.
    List {
        /// Host name or environment label from the server list.
        #[arg(long)]
        host: String,
    },

    /// Download a saved configuration as a zip file.
    Download {
        #[arg(long)]
        host: String,
        /// Saved configuration name.
        name: String,
        /// Destination file (default: ./<name>.zip).
        dest: Option<PathBuf>,
    },

    /// Import a configuration archive into a server.
    Upload {
        #[arg(long)]
        host: String,
        /// Zip file to upload.
        file: PathBuf,
    },

    /// Restore a server to a saved configuration.
    Restore {
        #[arg(long)]
        host: String,
        name: String,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Snapshot the server's current state as a new saved configuration.
    Create {
        #[arg(long)]
        host: String,
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a saved configuration.
    Delete {
        #[arg(long)]
        host: String,
        name: String,
    },

    /// Merge the source server's configuration into the target server.
    Merge {
        /// Server whose configuration is carried over.
        #[arg(long)]
        source: String,
        /// Server that receives the merged configuration.
        #[arg(long)]
        target: String,
        /// Keep a copy of the merged archive in this directory.
        #[arg(long)]
        keep_archive: Option<PathBuf>,
        /// Delete the staging configurations after the upload.
        #[arg(long)]
        delete_staging: bool,
        /// Date stamped into the archive name (YYYY-MM-DD, default today).
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List CCS servers, or the sessions of one CCS server.
    Ccs {
        #[arg(long)]
        host: String,
        /// CCS server whose sessions to list.
        #[arg(long)]
        server: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = PathBuf::from(expand_tilde(&cli.config));

    match cli.command {
        Commands::Init { output } => {
            let _log = init_logging(&LoggingConfig::default(), cli.verbose);
            cmd_init(output.as_deref().unwrap_or(&config_path))
        }
        Commands::Validate => {
            let _log = init_logging(&LoggingConfig::default(), cli.verbose);
            cmd_validate(&config_path)
        }
        Commands::Servers => {
            let config = load_config(&config_path)?;
            let _log = init_logging(&config.logging, cli.verbose);
            cmd_servers(&config, &config_path)
        }
        Commands::Remote(command) => {
            let config = load_config(&config_path)?;
            let _log = init_logging(&config.logging, cli.verbose);
            let ctx = RemoteContext::new(config, cli.user, cli.password_env)?;
            remote::dispatch(&ctx, command).await
        }
    }
}

// ---------------------------------------------------------------------------
// Config & logging helpers
// ---------------------------------------------------------------------------

/// Load the configuration file, falling back to defaults when it does not
/// exist so the tool works without one.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        AppConfig::load_from_file(path).context("failed to load configuration file")?
    } else {
        AppConfig::default()
    };
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Install the tracing subscriber. `RUST_LOG` wins over `--verbose`, which
/// wins over `logging.level`. The returned guard flushes the log file.
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &logging.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "consolesync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}

// ---------------------------------------------------------------------------
// Local subcommands
// ---------------------------------------------------------------------------

fn cmd_servers(config: &AppConfig, config_path: &Path) -> Result<()> {
    if config.servers.is_empty() {
        println!(
            "{}",
            style::warn(&format!(
                "No servers configured. Add [[servers]] entries to {}",
                config_path.display()
            ))
        );
        return Ok(());
    }

    let mut table = style::table(&["Environment", "Hostname"]);
    for server in &config.servers {
        table.add_row(vec![server.environment.as_str(), server.hostname.as_str()]);
    }
    println!("{table}");
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# consolesync configuration

[client]
use_tls = true
api_prefix = "/mvcm-api"
accept_invalid_certs = true
# request_timeout_secs = 120

[credentials]
# username = "operator"
password_env = "CONSOLESYNC_PASSWORD"

[merge]
version = "4.1.05"
protected_dirs = ["licensemanager", "tomcat", "security"]
# work_dir = "/var/tmp"
# keep_archive_dir = "~/consolesync/merged"
delete_staging_after = false

[logging]
level = "warn"
# file_dir = "~/.local/state/consolesync"

[[servers]]
environment = "Production"
hostname = "console-prod.example.com"

[[servers]]
environment = "DR"
hostname = "console-dr.example.com"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(output, default_config).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!(
            "Default configuration written to {}",
            output.display()
        ))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the [[servers]] list with your console hosts");
    println!("  2. Export the password variable (CONSOLESYNC_PASSWORD)");
    println!(
        "  3. Validate with: consolesync validate --config {}",
        output.display()
    );
    println!("  4. Try it: consolesync list --host <hostname>");

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!(
        "  Transport     : {}{}",
        if config.client.use_tls { "https" } else { "http" },
        if config.client.accept_invalid_certs {
            " (self-signed certificates accepted)"
        } else {
            ""
        }
    );
    println!("  API prefix    : {}", config.client.api_prefix);
    println!(
        "  User          : {}",
        config.credentials.username.as_deref().unwrap_or("(prompt)")
    );
    println!(
        "  Password      : {}",
        if config.credentials.password.is_some() {
            "set"
        } else {
            "NOT SET (will prompt)"
        }
    );
    println!("  Tool version  : {}", config.merge.version);
    println!(
        "  Protected dirs: {}",
        config.merge.protected_dirs.join(", ")
    );
    println!("  Servers       : {}", config.servers.len());

    Ok(())
}
