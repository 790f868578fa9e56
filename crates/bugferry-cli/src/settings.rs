//! Connection settings and config-directory resolution.
//!
//! `defaults.yml` carries both the engine settings (parsed by
//! [`bugferry_core::config`]) and the connection keys below. Unknown keys
//! are ignored by each side, so one flat file serves both.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use bugferry_core::config::{DEFAULTS_FILE, MigrationConfig, USER_MAPPINGS_FILE, load_migration_config};
use bugferry_core::identity::YamlMappingStore;
use serde::Deserialize;

pub const GITLAB_TOKEN_ENV: &str = "GITLAB_TOKEN";
pub const BUGZILLA_PASSWORD_ENV: &str = "BUGZILLA_PASSWORD";
pub const BUGZILLA_API_KEY_ENV: &str = "BUGZILLA_API_KEY";

/// How to reach the source tracker and the destination.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// GitLab API root, e.g. `https://gitlab.example.org/api/v4`.
    pub gitlab_base_url: String,
    #[serde(default)]
    pub gitlab_private_token: Option<String>,
    #[serde(default)]
    pub gitlab_project_id: Option<u64>,
    /// `namespace/name`, looked up when no id is given.
    #[serde(default)]
    pub gitlab_project_name: Option<String>,

    #[serde(default)]
    pub bugzilla_user: Option<String>,
    #[serde(default)]
    pub bugzilla_password: Option<String>,
    #[serde(default)]
    pub bugzilla_api_token: Option<String>,

    #[serde(default)]
    pub fetch_bugs: bool,
    #[serde(default)]
    pub bugzilla_product: Option<String>,
    #[serde(default)]
    pub bugzilla_components: Vec<String>,
    #[serde(default)]
    pub bugzilla_bug_status: Vec<String>,
    #[serde(default = "default_max_bugs")]
    pub max_no_of_bugs: usize,
    /// Relative paths resolve against the config directory.
    #[serde(default = "default_buglist_file")]
    pub buglist_file: PathBuf,

    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Fill secrets from the environment. Environment values win over the
    /// file so tokens can stay out of `defaults.yml`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(token) = non_empty(GITLAB_TOKEN_ENV) {
            self.gitlab_private_token = Some(token);
        }
        if let Some(password) = non_empty(BUGZILLA_PASSWORD_ENV) {
            self.bugzilla_password = Some(password);
        }
        if let Some(key) = non_empty(BUGZILLA_API_KEY_ENV) {
            self.bugzilla_api_token = Some(key);
        }
    }

    fn check(&self) -> Result<()> {
        if self.gitlab_base_url.trim().is_empty() {
            anyhow::bail!("gitlab_base_url must not be empty");
        }
        if self.gitlab_project_id.is_none()
            && self
                .gitlab_project_name
                .as_deref()
                .is_none_or(|name| name.trim().is_empty())
        {
            anyhow::bail!("either gitlab_project_id or gitlab_project_name must be set");
        }
        if self.max_no_of_bugs == 0 {
            anyhow::bail!("max_no_of_bugs must be at least 1");
        }
        Ok(())
    }

    /// The private token, or an error naming where to put it.
    pub fn token(&self) -> Result<&str> {
        self.gitlab_private_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .with_context(|| {
                format!("no GitLab token: set gitlab_private_token in {DEFAULTS_FILE} or {GITLAB_TOKEN_ENV}")
            })
    }
}

/// Everything loaded from one config directory.
#[derive(Debug, Clone)]
pub struct Settings {
    pub dir: PathBuf,
    pub migration: MigrationConfig,
    pub connection: ConnectionConfig,
}

impl Settings {
    /// Load and check the config directory, taking secrets from the process
    /// environment.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_with_env(dir, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(dir: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let migration = load_migration_config(dir)
            .with_context(|| format!("failed to load config from {}", dir.display()))?;

        let path = dir.join(DEFAULTS_FILE);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut connection: ConnectionConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse connection settings in {}", path.display()))?;
        connection.apply_env(lookup);
        connection
            .check()
            .with_context(|| format!("invalid connection settings in {}", path.display()))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            migration,
            connection,
        })
    }

    #[must_use]
    pub fn buglist_path(&self) -> PathBuf {
        if self.connection.buglist_file.is_absolute() {
            self.connection.buglist_file.clone()
        } else {
            self.dir.join(&self.connection.buglist_file)
        }
    }

    #[must_use]
    pub fn mapping_store(&self) -> YamlMappingStore {
        YamlMappingStore::new(self.dir.join(USER_MAPPINGS_FILE))
    }
}

/// `--config-dir`, or the platform config directory plus `bugferry`.
pub fn resolve_config_dir(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    dirs::config_dir()
        .map(|base| base.join("bugferry"))
        .context("no platform config directory; pass --config-dir")
}

const fn default_max_bugs() -> usize {
    1000
}

fn default_buglist_file() -> PathBuf {
    PathBuf::from("bugs")
}

const fn default_http_timeout_secs() -> u64 {
    60
}
