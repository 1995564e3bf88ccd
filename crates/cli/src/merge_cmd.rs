//! `consolesync merge`: carry one server's configuration over to another.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dialoguer::Confirm;
use tracing::debug;

use consolesync_core::merge::{MergeOutcome, SOURCE_STAGING, TARGET_STAGING};
use consolesync_core::{spawn_merge, MergeSettings};

use crate::remote::{with_spinner, RemoteContext};
use crate::style;

#[derive(Debug)]
pub struct MergeArgs {
    pub source: String,
    pub target: String,
    pub keep_archive: Option<PathBuf>,
    pub delete_staging: bool,
    pub date: Option<NaiveDate>,
    pub yes: bool,
}

/// Command-line overrides applied on top of the `[merge]` section.
fn settings_for(ctx: &RemoteContext, args: &MergeArgs) -> MergeSettings {
    let mut settings = MergeSettings::from(&ctx.config.merge);
    if let Some(dir) = &args.keep_archive {
        settings.keep_archive_dir = Some(dir.clone());
    }
    if args.delete_staging {
        settings.delete_staging_after = true;
    }
    settings.date = args.date;
    settings
}

pub async fn cmd_merge(ctx: &RemoteContext, args: MergeArgs) -> Result<()> {
    let source_host = ctx.resolve_host(&args.source);
    let target_host = ctx.resolve_host(&args.target);
    if source_host.eq_ignore_ascii_case(&target_host) {
        anyhow::bail!("source and target are the same server: {}", source_host);
    }

    if !args.yes {
        println!(
            "{} {} {} {}",
            style::header("Merge"),
            style::host(&source_host),
            style::dim("->"),
            style::host(&target_host)
        );
        println!(
            "  Protected directories taken from the target: {}",
            ctx.config.merge.protected_dirs.join(", ")
        );
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Upload the merged configuration to {}?",
                target_host
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::warn("Merge cancelled."));
            return Ok(());
        }
    }

    let (source, target) = with_spinner(
        format!("Logging on to {} and {}...", source_host, target_host),
        async { tokio::try_join!(ctx.connect(&source_host), ctx.connect(&target_host)) },
    )
    .await?;

    let settings = settings_for(ctx, &args);
    let mut job = spawn_merge(source, target, settings);

    let spinner = style::spinner("Starting merge...");
    while let Some(stage) = job.next_stage().await {
        debug!(stage = stage.to_string().as_str(), "merge stage");
        spinner.set_message(stage.describe());
    }
    let completion = job.wait().await;
    spinner.finish_and_clear();

    if !completion.success {
        println!("{}", style::error(&completion.message));
        println!(
            "{}",
            style::dim(&format!(
                "Staging configurations {} and {} may remain on the servers.",
                SOURCE_STAGING, TARGET_STAGING
            ))
        );
        anyhow::bail!("merge of {} into {} failed", source_host, target_host);
    }

    println!("{}", style::success(&completion.message));
    if let Some(outcome) = &completion.outcome {
        print_outcome(outcome, &target_host);
    }
    Ok(())
}

fn print_outcome(outcome: &MergeOutcome, target_host: &str) {
    println!();
    println!(
        "  Archive       : {}.zip ({} bytes)",
        outcome.archive_name, outcome.archive_size
    );
    println!("  Uploaded to   : {}", style::host(target_host));
    println!(
        "  From source   : {} files",
        outcome.reconcile.files_from_source
    );
    for protected in &outcome.reconcile.protected {
        println!(
            "  {:<14}: {}",
            protected.name,
            style::protected_action(&protected.action)
        );
    }
    if !outcome.descriptor_updated {
        println!("{}", style::warn("Bundle had no descriptor; name and description unchanged"));
    }
    if let Some(kept) = &outcome.kept_archive {
        println!("  Kept copy     : {}", kept.display());
    }
    for failure in &outcome.cleanup_failures {
        println!(
            "{}",
            style::warn(&format!("Could not remove temporary file {}", failure))
        );
    }
}
