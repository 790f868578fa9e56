use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use bugferry_core::lock::ElevationLocks;
use bugferry_core::store::{DestinationStore, SourceTracker};
use bugferry_core::{MigrationReport, Migrator};
use clap::Args;
use serde::Serialize;
use tracing::info;

use super::{connect_bugzilla, connect_gitlab, fetch_and_save};
use crate::client::bugzilla::load_bug_list;
use crate::client::dry_run::DryRunStore;
use crate::client::json_dir::JsonBugDirectory;
use crate::output::{OutputMode, kv, render, section};
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Bug ids to migrate, in order.
    #[arg(value_name = "BUG_ID")]
    pub bug_ids: Vec<u64>,

    /// Read further bug ids from a file, one per line.
    #[arg(long, value_name = "FILE")]
    pub bug_list: Option<PathBuf>,

    /// Run the configured source query, save the list and migrate it.
    #[arg(long, conflicts_with_all = ["bug_ids", "bug_list"])]
    pub fetch: bool,

    /// Read bugs from exported `<id>.json` records instead of the source tracker.
    #[arg(long, value_name = "DIR")]
    pub from_dir: Option<PathBuf>,

    /// Log destination writes instead of sending them.
    #[arg(long)]
    pub dry_run: bool,

    /// Output report in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl MigrateArgs {
    fn fetch_requested(&self, settings: &Settings) -> bool {
        self.fetch
            || (settings.connection.fetch_bugs && self.bug_ids.is_empty() && self.bug_list.is_none())
    }

    fn explicit_ids(&self) -> Result<Vec<u64>> {
        let mut ids = self.bug_ids.clone();
        if let Some(path) = &self.bug_list {
            ids.extend(load_bug_list(path)?);
        }
        Ok(ids)
    }
}

#[derive(Debug, Serialize)]
struct MigrateSummary {
    container: u64,
    dry_run: bool,
    #[serde(flatten)]
    report: MigrationReport,
    suppressed_writes: usize,
    api_requests: usize,
}

fn print_summary(summary: &MigrateSummary, w: &mut dyn Write) -> io::Result<()> {
    let suffix = if summary.dry_run { " (dry run)" } else { "" };
    section(
        w,
        &format!(
            "Migrated {} bugs into project {}{suffix}",
            summary.report.bugs.len(),
            summary.container
        ),
    )?;
    for bug in &summary.report.bugs {
        let mut notes = vec![format!("{} comments", bug.comments)];
        if bug.skipped_comments > 0 {
            notes.push(format!("{} empty skipped", bug.skipped_comments));
        }
        if bug.closed {
            notes.push("closed".to_string());
        }
        if bug.source_closed {
            notes.push("source closed".to_string());
        }
        writeln!(
            w,
            "bug {} -> #{} {} ({})",
            bug.bug_id,
            bug.issue_iid,
            bug.web_url,
            notes.join(", ")
        )?;
    }
    if !summary.report.fallback_identities.is_empty() {
        kv(
            w,
            "fallback identities",
            summary.report.fallback_identities.join(", "),
        )?;
    }
    if summary.dry_run {
        kv(w, "suppressed writes", summary.suppressed_writes.to_string())?;
    }
    kv(w, "api requests", summary.api_requests.to_string())
}

pub fn run_migrate(args: &MigrateArgs, config_dir: &Path) -> Result<()> {
    let settings = Settings::load(config_dir)?;
    let dry_run = args.dry_run || settings.connection.dry_run;
    let fetch = args.fetch_requested(&settings);

    let mut config = settings.migration.clone();
    if dry_run && config.close_bugzilla_bugs {
        info!("dry run: source bugs will not be closed");
        config.close_bugzilla_bugs = false;
    }

    let (gitlab, container) = connect_gitlab(&settings)?;
    let bugzilla = if args.from_dir.is_none() || fetch {
        Some(connect_bugzilla(&settings)?)
    } else {
        None
    };

    let bug_ids = match bugzilla.as_ref().filter(|_| fetch) {
        Some(client) => fetch_and_save(&settings, client)?,
        None => args.explicit_ids()?,
    };

    let offline;
    let source: &dyn SourceTracker = match (&args.from_dir, &bugzilla) {
        (Some(dir), _) => {
            offline = JsonBugDirectory::new(dir);
            &offline
        }
        (None, Some(client)) => client,
        (None, None) => anyhow::bail!("no source tracker configured"),
    };

    let rehearsal = DryRunStore::new(&gitlab);
    let destination: &dyn DestinationStore = if dry_run { &rehearsal } else { &gitlab };
    let mappings = settings.mapping_store();
    let locks = ElevationLocks::new(config.lock_dir(), config.lock_timeout());

    let mut migrator = Migrator::new(
        &config,
        container,
        source,
        destination,
        &gitlab,
        &mappings,
        locks,
    )
    .context("failed to prepare migration")?;
    let report = migrator.migrate(&bug_ids).context("migration aborted")?;

    let summary = MigrateSummary {
        container,
        dry_run,
        report,
        suppressed_writes: rehearsal.writes().len(),
        api_requests: gitlab.request_count(),
    };
    render(OutputMode::from_json_flag(args.json), &summary, print_summary)
}
