//! Engine configuration, loaded once per run from a config directory.
//!
//! Layout of the directory:
//!
//! ```text
//! defaults.yml             engine + connection settings (flat YAML map)
//! component_mappings.yml   component -> label
//! user_mappings.yml        append-only source login -> destination username
//! unassign_users           optional; one source login per line, `#` comments
//! ```
//!
//! Key names follow the bugzilla2gitlab conventions so existing config
//! directories keep working.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::store::AccessLevel;

pub const DEFAULTS_FILE: &str = "defaults.yml";
pub const COMPONENT_MAPPINGS_FILE: &str = "component_mappings.yml";
pub const USER_MAPPINGS_FILE: &str = "user_mappings.yml";
pub const UNASSIGN_FILE: &str = "unassign_users";

/// Immutable engine settings passed by reference into every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub bugzilla_base_url: String,

    #[serde(default)]
    pub use_bugzilla_id_in_title: bool,
    /// Request the bug id as the destination issue iid.
    #[serde(default)]
    pub use_bugzilla_id: bool,
    #[serde(default = "default_true")]
    pub include_bugzilla_link: bool,
    #[serde(default)]
    pub include_version: bool,
    #[serde(default)]
    pub include_version_only_when_specified: bool,
    #[serde(default)]
    pub include_os: bool,
    #[serde(default)]
    pub include_arch: bool,
    #[serde(default = "default_datetime_format")]
    pub datetime_format_string: String,
    /// Label appended to formatted timestamps.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub confidential_group: Option<String>,
    #[serde(default = "default_closed_states")]
    pub bugzilla_closed_states: Vec<String>,
    #[serde(default)]
    pub close_bugzilla_bugs: bool,
    #[serde(default = "default_close_status")]
    pub bugzilla_close_status: String,
    #[serde(default = "default_close_resolution")]
    pub bugzilla_close_resolution: String,

    #[serde(default)]
    pub component_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub component_mapping_auto: bool,
    #[serde(default)]
    pub default_gitlab_labels: Vec<String>,
    #[serde(default)]
    pub severity_critical_label: Option<String>,
    #[serde(default)]
    pub severity_blocker_label: Option<String>,
    #[serde(default)]
    pub map_operating_system: bool,
    #[serde(default)]
    pub map_keywords: bool,
    #[serde(default)]
    pub keywords_to_skip: Vec<String>,
    #[serde(default)]
    pub map_milestones: bool,
    #[serde(default = "default_milestones_to_skip")]
    pub milestones_to_skip: Vec<String>,

    /// Fallback destination account for source users without a match.
    #[serde(default)]
    pub gitlab_misc_user: Option<String>,
    /// Marker left by intermediary tooling in front of the real reporter.
    #[serde(default = "default_submitter_marker")]
    pub submitter_marker: String,
    #[serde(default = "default_true")]
    pub show_email: bool,
    #[serde(default)]
    pub show_datetime_in_comments: bool,
    #[serde(default)]
    pub unassign_list: Vec<String>,

    #[serde(default)]
    pub see_also_gerrit_link_base_url: Option<String>,
    #[serde(default)]
    pub see_also_git_link_base_url: Option<String>,

    #[serde(default = "default_true")]
    pub elevate_permissions: bool,
    #[serde(default = "default_elevation_role")]
    pub elevation_role: AccessLevel,
    /// Account the service token belongs to; its writes are never elevated.
    #[serde(default)]
    pub gitlab_service_user: Option<String>,
    #[serde(default)]
    pub elevation_lock_dir: Option<PathBuf>,
    #[serde(default = "default_lock_timeout_ms")]
    pub elevation_lock_timeout_ms: u64,
}

impl MigrationConfig {
    /// Minimal config for a source tracker; every other key takes its default.
    pub fn new(bugzilla_base_url: impl Into<String>) -> Self {
        Self {
            bugzilla_base_url: bugzilla_base_url.into(),
            use_bugzilla_id_in_title: false,
            use_bugzilla_id: false,
            include_bugzilla_link: default_true(),
            include_version: false,
            include_version_only_when_specified: false,
            include_os: false,
            include_arch: false,
            datetime_format_string: default_datetime_format(),
            timezone: default_timezone(),
            confidential_group: None,
            bugzilla_closed_states: default_closed_states(),
            close_bugzilla_bugs: false,
            bugzilla_close_status: default_close_status(),
            bugzilla_close_resolution: default_close_resolution(),
            component_mappings: BTreeMap::new(),
            component_mapping_auto: false,
            default_gitlab_labels: Vec::new(),
            severity_critical_label: None,
            severity_blocker_label: None,
            map_operating_system: false,
            map_keywords: false,
            keywords_to_skip: Vec::new(),
            map_milestones: false,
            milestones_to_skip: default_milestones_to_skip(),
            gitlab_misc_user: None,
            submitter_marker: default_submitter_marker(),
            show_email: default_true(),
            show_datetime_in_comments: false,
            unassign_list: Vec::new(),
            see_also_gerrit_link_base_url: None,
            see_also_git_link_base_url: None,
            elevate_permissions: default_true(),
            elevation_role: default_elevation_role(),
            gitlab_service_user: None,
            elevation_lock_dir: None,
            elevation_lock_timeout_ms: default_lock_timeout_ms(),
        }
    }

    /// Source tracker URL without a trailing slash.
    #[must_use]
    pub fn source_base(&self) -> &str {
        self.bugzilla_base_url.trim_end_matches('/')
    }

    /// Link to a bug on the source tracker.
    #[must_use]
    pub fn bug_url(&self, bug_id: u64) -> String {
        format!("{}/show_bug.cgi?id={bug_id}", self.source_base())
    }

    #[must_use]
    pub fn is_closed_state(&self, status: &str) -> bool {
        self.bugzilla_closed_states
            .iter()
            .any(|state| state.eq_ignore_ascii_case(status))
    }

    #[must_use]
    pub fn lock_dir(&self) -> PathBuf {
        self.elevation_lock_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("bugferry-locks"))
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.elevation_lock_timeout_ms)
    }

    fn check(&self) -> Result<()> {
        if self.bugzilla_base_url.trim().is_empty() {
            return Err(MigrationError::Config(
                "bugzilla_base_url must not be empty".to_string(),
            ));
        }
        if self.datetime_format_string.trim().is_empty() {
            return Err(MigrationError::Config(
                "datetime_format_string must not be empty".to_string(),
            ));
        }
        let mut rendered = String::new();
        if write!(rendered, "{}", chrono::Utc::now().format(&self.datetime_format_string)).is_err() {
            return Err(MigrationError::Config(format!(
                "datetime_format_string '{}' is not a valid strftime pattern",
                self.datetime_format_string
            )));
        }
        Ok(())
    }
}

/// Load `defaults.yml`, `component_mappings.yml` and `unassign_users` from
/// `dir`. Missing optional files yield empty values.
pub fn load_migration_config(dir: &Path) -> Result<MigrationConfig> {
    let defaults_path = dir.join(DEFAULTS_FILE);
    let content = read_file(&defaults_path)?;
    let mut config: MigrationConfig = serde_yaml::from_str(&content).map_err(|err| {
        MigrationError::Config(format!("failed to parse {}: {err}", defaults_path.display()))
    })?;

    config.component_mappings = load_component_mappings(dir)?;
    config.unassign_list = load_unassign_list(dir)?;
    config.check()?;

    Ok(config)
}

/// Component → label table. A missing or empty file is an empty table.
pub fn load_component_mappings(dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = dir.join(COMPONENT_MAPPINGS_FILE);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = read_file(&path)?;
    let parsed: Option<BTreeMap<String, Option<String>>> = serde_yaml::from_str(&content)
        .map_err(|err| {
            MigrationError::Config(format!("failed to parse {}: {err}", path.display()))
        })?;

    Ok(parsed
        .unwrap_or_default()
        .into_iter()
        .map(|(component, label)| (component, label.unwrap_or_default()))
        .collect())
}

pub fn load_unassign_list(dir: &Path) -> Result<Vec<String>> {
    let path = dir.join(UNASSIGN_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = read_file(&path)?;
    Ok(parse_unassign_list(&content))
}

fn parse_unassign_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect()
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|err| MigrationError::Config(format!("failed to read {}: {err}", path.display())))
}

const fn default_true() -> bool {
    true
}

fn default_datetime_format() -> String {
    "%b %d, %Y %H:%M".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_closed_states() -> Vec<String> {
    ["RESOLVED", "VERIFIED", "CLOSED"]
        .into_iter()
        .map(ToOwned::to_owned)
        .collect()
}

fn default_close_status() -> String {
    "RESOLVED".to_string()
}

fn default_close_resolution() -> String {
    "MOVED".to_string()
}

fn default_milestones_to_skip() -> Vec<String> {
    vec!["---".to_string()]
}

fn default_submitter_marker() -> String {
    "Submitter was ".to_string()
}

const fn default_elevation_role() -> AccessLevel {
    AccessLevel::Maintainer
}

const fn default_lock_timeout_ms() -> u64 {
    30_000
}
