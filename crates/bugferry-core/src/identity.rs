//! Source user → destination account resolution.
//!
//! Discovered mappings are written through to a [`MappingStore`] before they
//! are returned, so a crash right after a lookup never forces the same
//! directory search on the next run.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::store::{
    DestinationAccount, IdentityDirectory, MappingStore, StoreError, StoreResult,
};

/// Outcome of resolving one source user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub account: DestinationAccount,
    /// The account is the configured fallback, not the real person.
    pub is_fallback: bool,
}

/// Cached, write-through identity resolver.
#[derive(Debug)]
pub struct IdentityResolver {
    fallback: Option<String>,
    /// source login -> destination username
    usernames: HashMap<String, String>,
    /// destination username -> destination id
    ids: HashMap<String, u64>,
    fallback_hits: Vec<String>,
}

impl IdentityResolver {
    /// Seed the cache from previously persisted mappings.
    pub fn new(config: &MigrationConfig, known: BTreeMap<String, String>) -> Self {
        Self {
            fallback: config.gitlab_misc_user.clone(),
            usernames: known.into_iter().collect(),
            ids: HashMap::new(),
            fallback_hits: Vec::new(),
        }
    }

    /// Resolve `source_login`, consulting the directory only on a cache miss.
    pub fn resolve<D, M>(
        &mut self,
        directory: &D,
        mappings: &M,
        source_login: &str,
    ) -> Result<Resolution>
    where
        D: IdentityDirectory + ?Sized,
        M: MappingStore + ?Sized,
    {
        let source_login = source_login.trim();
        if let Some(username) = self.usernames.get(source_login).cloned() {
            debug!(source = source_login, username = %username, "identity cache hit");
            let id = self.user_id(directory, &username)?;
            return Ok(self.resolution(id, username));
        }

        let candidates = directory.search(source_login)?;
        let account = match candidates.as_slice() {
            [single] => single.clone(),
            [] => {
                let Some(fallback) = self.fallback.clone() else {
                    return Err(MigrationError::UnresolvedIdentity {
                        identity: source_login.to_string(),
                    });
                };
                warn!(
                    source = source_login,
                    fallback = %fallback,
                    "no destination account found, using fallback account"
                );
                self.fallback_hits.push(source_login.to_string());
                let id = self.user_id(directory, &fallback)?;
                DestinationAccount {
                    id,
                    username: fallback,
                }
            }
            many => {
                return Err(MigrationError::AmbiguousIdentity {
                    identity: source_login.to_string(),
                    candidates: many.iter().map(|account| account.username.clone()).collect(),
                });
            }
        };

        mappings.append(source_login, &account.username)?;
        info!(
            source = source_login,
            username = %account.username,
            "recorded user mapping"
        );

        self.usernames
            .insert(source_login.to_string(), account.username.clone());
        self.ids.insert(account.username.clone(), account.id);
        Ok(self.resolution(account.id, account.username))
    }

    /// Destination id for a username, looked up once per run.
    pub fn user_id<D>(&mut self, directory: &D, username: &str) -> Result<u64>
    where
        D: IdentityDirectory + ?Sized,
    {
        if let Some(id) = self.ids.get(username) {
            return Ok(*id);
        }
        let id = directory.user_id(username)?;
        self.ids.insert(username.to_string(), id);
        Ok(id)
    }

    /// Source logins that fell back to the fallback account this run.
    #[must_use]
    pub fn fallback_hits(&self) -> &[String] {
        &self.fallback_hits
    }

    fn resolution(&self, id: u64, username: String) -> Resolution {
        let is_fallback = self.fallback.as_deref() == Some(username.as_str());
        Resolution {
            account: DestinationAccount { id, username },
            is_fallback,
        }
    }
}

/// `user_mappings.yml`: one `source: username` line per mapping, append-only.
#[derive(Debug, Clone)]
pub struct YamlMappingStore {
    path: PathBuf,
}

impl YamlMappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, action: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            context: format!("failed to {action} {}", self.path.display()),
            source,
        }
    }
}

impl MappingStore for YamlMappingStore {
    fn load(&self) -> StoreResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            std::fs::write(&self.path, "---\n").map_err(|err| self.io_error("create", err))?;
            return Ok(BTreeMap::new());
        }

        let content =
            std::fs::read_to_string(&self.path).map_err(|err| self.io_error("read", err))?;
        let parsed: Option<BTreeMap<String, String>> =
            serde_yaml::from_str(&content).map_err(|err| StoreError::Decode {
                url: self.path.display().to_string(),
                reason: err.to_string(),
            })?;
        Ok(parsed.unwrap_or_default())
    }

    fn append(&self, source: &str, username: &str) -> StoreResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.io_error("open", err))?;
        writeln!(file, "{}: {}", yaml_scalar(source), yaml_scalar(username))
            .and_then(|()| file.sync_data())
            .map_err(|err| self.io_error("append to", err))
    }
}

/// Quote a scalar when plain YAML would misread it.
fn yaml_scalar(raw: &str) -> String {
    let plain = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-' | '+'))
        && !raw.starts_with(['-', '+', '.']);
    if plain {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', "''"))
    }
}
