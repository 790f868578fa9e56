pub mod check_config;
pub mod completions;
pub mod fetch_bugs;
pub mod migrate;

use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::info;

use crate::client::bugzilla::{BugQuery, BugzillaClient, save_bug_list};
use crate::client::gitlab::GitLabClient;
use crate::settings::{BUGZILLA_PASSWORD_ENV, Settings};

const fn timeout(settings: &Settings) -> Duration {
    Duration::from_secs(settings.connection.http_timeout_secs)
}

/// GitLab client plus the numeric project id, looked up by name if needed.
pub fn connect_gitlab(settings: &Settings) -> Result<(GitLabClient, u64)> {
    let connection = &settings.connection;
    let client = GitLabClient::new(
        &connection.gitlab_base_url,
        connection.token()?,
        timeout(settings),
    );

    let container = match (connection.gitlab_project_id, &connection.gitlab_project_name) {
        (Some(id), _) => id,
        (None, Some(name)) => client
            .project_id(name)
            .with_context(|| format!("failed to look up GitLab project {name}"))?,
        (None, None) => anyhow::bail!("either gitlab_project_id or gitlab_project_name must be set"),
    };
    info!(container, "using GitLab project");
    Ok((client, container))
}

/// Bugzilla client authenticated with the API key, or a login when only a
/// user is configured.
pub fn connect_bugzilla(settings: &Settings) -> Result<BugzillaClient> {
    let connection = &settings.connection;
    let client = BugzillaClient::anonymous(settings.migration.source_base(), timeout(settings));

    if let Some(key) = &connection.bugzilla_api_token {
        return Ok(client.with_api_key(key));
    }
    if let Some(user) = &connection.bugzilla_user {
        let password = connection.bugzilla_password.as_deref().with_context(|| {
            format!("bugzilla_user is set but no password; set bugzilla_password or {BUGZILLA_PASSWORD_ENV}")
        })?;
        return Ok(client.login(user, password)?);
    }
    Ok(client)
}

pub fn bug_query(settings: &Settings) -> Result<BugQuery> {
    let connection = &settings.connection;
    let product = connection
        .bugzilla_product
        .clone()
        .filter(|product| !product.trim().is_empty())
        .context("bugzilla_product must be set to fetch bugs")?;
    Ok(BugQuery {
        product,
        components: connection.bugzilla_components.clone(),
        statuses: connection.bugzilla_bug_status.clone(),
        max: connection.max_no_of_bugs,
    })
}

/// Run the configured query and save the result to `buglist_file`.
pub fn fetch_and_save(settings: &Settings, client: &BugzillaClient) -> Result<Vec<u64>> {
    let bug_ids = client.fetch_bug_list(&bug_query(settings)?)?;
    let path = settings.buglist_path();
    save_bug_list(&path, &bug_ids)?;
    info!(count = bug_ids.len(), path = %path.display(), "saved bug list");
    Ok(bug_ids)
}
