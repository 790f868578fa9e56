use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use bugferry_core::store::MappingStore;
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, kv, render, section};
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Output report in JSON format.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ConfigSummary {
    config_dir: String,
    source: String,
    destination: String,
    project: String,
    token: &'static str,
    bugzilla_auth: String,
    fetch_query: Option<String>,
    buglist_file: String,
    component_mappings: usize,
    user_mappings: usize,
    unassign_users: usize,
    default_labels: Vec<String>,
    elevation: String,
    lock_dir: String,
    fallback_account: Option<String>,
    dry_run: bool,
}

impl ConfigSummary {
    fn from_settings(settings: &Settings) -> Result<Self> {
        let connection = &settings.connection;
        let migration = &settings.migration;

        let project = connection.gitlab_project_id.map_or_else(
            || {
                format!(
                    "{} (looked up at start)",
                    connection.gitlab_project_name.as_deref().unwrap_or_default()
                )
            },
            |id| id.to_string(),
        );
        let bugzilla_auth = match (&connection.bugzilla_api_token, &connection.bugzilla_user) {
            (Some(_), _) => "api key".to_string(),
            (None, Some(user)) => format!("login as {user}"),
            (None, None) => "anonymous".to_string(),
        };
        let fetch_query = connection.bugzilla_product.as_ref().map(|product| {
            let mut query = format!("product={product}");
            for component in &connection.bugzilla_components {
                query.push_str(&format!(" component={component}"));
            }
            for status in &connection.bugzilla_bug_status {
                query.push_str(&format!(" status={status}"));
            }
            query
        });

        // Loading would create the file; a fresh directory simply has none.
        let store = settings.mapping_store();
        let user_mappings = if store.path().exists() {
            store.load()?.len()
        } else {
            0
        };

        Ok(Self {
            config_dir: settings.dir.display().to_string(),
            source: migration.source_base().to_string(),
            destination: connection.gitlab_base_url.clone(),
            project,
            token: if connection.token().is_ok() {
                "set"
            } else {
                "missing"
            },
            bugzilla_auth,
            fetch_query,
            buglist_file: settings.buglist_path().display().to_string(),
            component_mappings: migration.component_mappings.len(),
            user_mappings,
            unassign_users: migration.unassign_list.len(),
            default_labels: migration.default_gitlab_labels.clone(),
            elevation: if migration.elevate_permissions {
                migration.elevation_role.to_string()
            } else {
                "disabled".to_string()
            },
            lock_dir: migration.lock_dir().display().to_string(),
            fallback_account: migration.gitlab_misc_user.clone(),
            dry_run: connection.dry_run,
        })
    }
}

fn print_summary(summary: &ConfigSummary, w: &mut dyn Write) -> io::Result<()> {
    section(w, &format!("Config {}", summary.config_dir))?;
    kv(w, "source", &summary.source)?;
    kv(w, "destination", &summary.destination)?;
    kv(w, "project", &summary.project)?;
    kv(w, "token", summary.token)?;
    kv(w, "bugzilla auth", &summary.bugzilla_auth)?;
    if let Some(query) = &summary.fetch_query {
        kv(w, "fetch query", query)?;
    }
    kv(w, "bug list", &summary.buglist_file)?;
    kv(w, "components", summary.component_mappings.to_string())?;
    kv(w, "user mappings", summary.user_mappings.to_string())?;
    kv(w, "unassign users", summary.unassign_users.to_string())?;
    if !summary.default_labels.is_empty() {
        kv(w, "default labels", summary.default_labels.join(", "))?;
    }
    kv(w, "elevation", &summary.elevation)?;
    kv(w, "lock dir", &summary.lock_dir)?;
    kv(
        w,
        "fallback account",
        summary.fallback_account.as_deref().unwrap_or("none"),
    )?;
    if summary.dry_run {
        kv(w, "dry run", "yes")?;
    }
    Ok(())
}

/// Load the config directory and summarise it without touching the network.
pub fn run_check_config(args: &CheckConfigArgs, config_dir: &Path) -> Result<()> {
    let settings = Settings::load(config_dir)?;
    let summary = ConfigSummary::from_settings(&settings)?;
    render(OutputMode::from_json_flag(args.json), &summary, print_summary)
}
