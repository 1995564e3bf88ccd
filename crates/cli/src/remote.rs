//! Subcommands that talk to a console management server.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::Cell;
use dialoguer::{Confirm, Input, Password};

use consolesync_core::config::AppConfig;
use consolesync_core::{ApiClient, ConfigRegistry, Session};

use crate::style;
use crate::{merge_cmd, RemoteCommand};

/// Configuration plus resolved logon credentials.
pub struct RemoteContext {
    pub config: AppConfig,
    client: ApiClient,
    user: String,
    password: String,
}

impl RemoteContext {
    /// Resolve the user id and password, prompting for whatever the
    /// command line, config file and environment do not provide.
    pub fn new(
        config: AppConfig,
        user: Option<String>,
        password_env: Option<String>,
    ) -> Result<Self> {
        let user = match user.or_else(|| config.credentials.username.clone()) {
            Some(user) => user,
            None => Input::<String>::new()
                .with_prompt("User id")
                .interact_text()
                .context("failed to read user id")?,
        };

        let password = match password_env {
            Some(var) => std::env::var(&var).ok().filter(|v| !v.is_empty()),
            None => config.credentials.password.clone(),
        };
        let password = match password {
            Some(password) => password,
            None => Password::new()
                .with_prompt(format!("Password for {}", user))
                .interact()
                .context("failed to read password")?,
        };

        Ok(Self {
            client: ApiClient::new(&config.client),
            config,
            user,
            password,
        })
    }

    /// Map an environment label to its host name; anything else is taken
    /// as a host name verbatim.
    pub fn resolve_host(&self, key: &str) -> String {
        self.config
            .find_server(key)
            .map(|s| s.hostname.clone())
            .unwrap_or_else(|| key.to_string())
    }

    /// Log on to `host`.
    pub async fn connect(&self, host: &str) -> Result<Session> {
        self.client
            .connect(host, &self.user, &self.password)
            .await
            .with_context(|| format!("failed to log on to {}", host))
    }
}

/// Run `fut` behind a spinner showing `msg`.
pub async fn with_spinner<T>(msg: String, fut: impl Future<Output = T>) -> T {
    let spinner = style::spinner(msg);
    let out = fut.await;
    spinner.finish_and_clear();
    out
}

pub async fn dispatch(ctx: &RemoteContext, command: RemoteCommand) -> Result<()> {
    match command {
        RemoteCommand::List { host } => cmd_list(ctx, &host).await,
        RemoteCommand::Download { host, name, dest } => {
            cmd_download(ctx, &host, &name, dest).await
        }
        RemoteCommand::Upload { host, file } => cmd_upload(ctx, &host, file).await,
        RemoteCommand::Restore { host, name, yes } => cmd_restore(ctx, &host, &name, yes).await,
        RemoteCommand::Create {
            host,
            name,
            description,
        } => cmd_create(ctx, &host, &name, description.as_deref()).await,
        RemoteCommand::Delete { host, name } => cmd_delete(ctx, &host, &name).await,
        RemoteCommand::Merge {
            source,
            target,
            keep_archive,
            delete_staging,
            date,
            yes,
        } => {
            let args = merge_cmd::MergeArgs {
                source,
                target,
                keep_archive,
                delete_staging,
                date,
                yes,
            };
            merge_cmd::cmd_merge(ctx, args).await
        }
        RemoteCommand::Ccs { host, server } => cmd_ccs(ctx, &host, server.as_deref()).await,
    }
}

async fn logon(ctx: &RemoteContext, key: &str) -> Result<Session> {
    let host = ctx.resolve_host(key);
    with_spinner(format!("Logging on to {}...", host), ctx.connect(&host)).await
}

// ---------------------------------------------------------------------------
// Saved configurations
// ---------------------------------------------------------------------------

async fn cmd_list(ctx: &RemoteContext, host: &str) -> Result<()> {
    let session = logon(ctx, host).await?;
    let configs = with_spinner(
        "Fetching saved configurations...".to_string(),
        session.list_configurations(),
    )
    .await;

    println!(
        "{}",
        style::header(&format!(
            "Saved configurations on {} ({})",
            style::host(session.host()),
            configs.len()
        ))
    );
    if configs.is_empty() {
        println!("{}", style::dim("  (none)"));
        return Ok(());
    }

    let mut table = style::table(&["Name", "Description", "Date", "User"]);
    for config in &configs {
        table.add_row(vec![
            Cell::new(&config.name),
            Cell::new(&config.description),
            Cell::new(&config.date),
            Cell::new(&config.user),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn cmd_download(
    ctx: &RemoteContext,
    host: &str,
    name: &str,
    dest: Option<PathBuf>,
) -> Result<()> {
    let session = logon(ctx, host).await?;
    let dest = dest.unwrap_or_else(|| PathBuf::from(format!("{}.zip", name)));

    let bytes = with_spinner(
        format!("Downloading {}...", name),
        session.download_configuration_to(name, &dest),
    )
    .await
    .with_context(|| format!("failed to download '{}'", name))?;

    println!(
        "{}",
        style::success(&format!(
            "Saved {} to {} ({} bytes)",
            name,
            dest.display(),
            bytes
        ))
    );
    Ok(())
}

async fn cmd_upload(ctx: &RemoteContext, host: &str, file: PathBuf) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("not a file: {}", file.display());
    }
    let session = logon(ctx, host).await?;

    with_spinner(
        format!("Uploading {}...", file.display()),
        session.upload_configuration(&file),
    )
    .await
    .with_context(|| format!("failed to upload {}", file.display()))?;

    println!(
        "{}",
        style::success(&format!(
            "Uploaded {} to {}",
            file.display(),
            session.host()
        ))
    );
    Ok(())
}

async fn cmd_restore(ctx: &RemoteContext, host: &str, name: &str, yes: bool) -> Result<()> {
    let host = ctx.resolve_host(host);
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Restore {} to saved configuration '{}'?", host, name))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::warn("Restore cancelled."));
            return Ok(());
        }
    }

    let session = logon(ctx, &host).await?;
    with_spinner(
        format!("Restoring {}...", name),
        session.restore_configuration(name),
    )
    .await
    .with_context(|| format!("failed to restore '{}'", name))?;

    println!(
        "{}",
        style::success(&format!("{} restored to '{}'", session.host(), name))
    );
    Ok(())
}

async fn cmd_create(
    ctx: &RemoteContext,
    host: &str,
    name: &str,
    description: Option<&str>,
) -> Result<()> {
    let session = logon(ctx, host).await?;
    with_spinner(
        format!("Creating {}...", name),
        session.create_configuration(name, description),
    )
    .await
    .with_context(|| format!("failed to create '{}'", name))?;

    println!(
        "{}",
        style::success(&format!(
            "Saved configuration '{}' created on {}",
            name,
            session.host()
        ))
    );
    Ok(())
}

async fn cmd_delete(ctx: &RemoteContext, host: &str, name: &str) -> Result<()> {
    let session = logon(ctx, host).await?;
    match session.delete_configuration(name).await {
        Ok(()) => {
            println!(
                "{}",
                style::success(&format!(
                    "Saved configuration '{}' deleted from {}",
                    name,
                    session.host()
                ))
            );
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            println!(
                "{}",
                style::warn(&format!("'{}' does not exist on {}", name, session.host()))
            );
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("failed to delete '{}'", name)),
    }
}

// ---------------------------------------------------------------------------
// CCS inventory
// ---------------------------------------------------------------------------

async fn cmd_ccs(ctx: &RemoteContext, host: &str, server: Option<&str>) -> Result<()> {
    let session = logon(ctx, host).await?;

    match server {
        None => {
            let servers = session.list_ccs_servers().await;
            println!(
                "{}",
                style::header(&format!("CCS servers on {} ({})", session.host(), servers.len()))
            );
            if servers.is_empty() {
                println!("{}", style::dim("  (none)"));
                return Ok(());
            }
            let mut table = style::table(&["Name", "Upstream host"]);
            for s in &servers {
                table.add_row(vec![Cell::new(&s.name), Cell::new(&s.upstream_host)]);
            }
            println!("{table}");
        }
        Some(server) => {
            let sessions = session.list_ccs_sessions(server).await;
            println!(
                "{}",
                style::header(&format!("Sessions of {} ({})", server, sessions.len()))
            );
            if sessions.is_empty() {
                println!("{}", style::dim("  (none)"));
                return Ok(());
            }
            let mut table = style::table(&["Name", "LU name", "Upstream port"]);
            for s in &sessions {
                table.add_row(vec![
                    Cell::new(&s.name),
                    Cell::new(&s.lu_name),
                    Cell::new(
                        s.upstream_port
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
