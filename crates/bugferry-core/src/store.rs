//! Collaborator seams of the migration engine.
//!
//! The engine never talks HTTP or touches configuration files directly. It
//! reads bugs through [`SourceTracker`], writes through [`DestinationStore`],
//! looks people up through [`IdentityDirectory`] and persists discovered user
//! mappings through [`MappingStore`]. All methods take `&self`; the run is
//! sequential, so implementations that record state use interior mutability.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{BugRecord, Comment, Issue};

/// Failure reported by a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The remote answered with a non-success status.
    #[error("{method} {url} failed with status {status}: {body}")]
    Http {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response.
    #[error("{method} {url} failed: {reason}")]
    Transport {
        method: &'static str,
        url: String,
        reason: String,
    },

    /// The response could not be decoded into the expected shape.
    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// The requested object does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Local file I/O for persisted lookups failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Destination role on a container, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Guest,
    Reporter,
    Developer,
    Maintainer,
    Owner,
}

impl AccessLevel {
    /// Numeric level used by the GitLab members API.
    #[must_use]
    pub const fn as_level(self) -> u32 {
        match self {
            Self::Guest => 10,
            Self::Reporter => 20,
            Self::Developer => 30,
            Self::Maintainer => 40,
            Self::Owner => 50,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Reporter => "reporter",
            Self::Developer => "developer",
            Self::Maintainer => "maintainer",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(Self::Guest),
            "reporter" => Ok(Self::Reporter),
            "developer" => Ok(Self::Developer),
            "maintainer" => Ok(Self::Maintainer),
            "owner" => Ok(Self::Owner),
            other => Err(format!("unknown access level '{other}'")),
        }
    }
}

/// Direct membership of an account on a container.
///
/// `access_level` is the destination's raw numeric level. Custom roles sit
/// between the named levels, so it is kept as reported and restored as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: u64,
    pub access_level: u32,
}

impl Membership {
    /// `true` when the membership already allows writes at `role`.
    #[must_use]
    pub const fn satisfies(&self, role: AccessLevel) -> bool {
        self.access_level >= role.as_level()
    }
}

/// A destination account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationAccount {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: u64,
    pub title: String,
}

/// What the destination hands back after an issue is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub iid: u64,
    pub web_url: String,
}

/// Reference token for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Container-relative URL, e.g. `/uploads/<secret>/trace.txt`.
    pub url: String,
    /// Markdown snippet suggested by the destination.
    pub markdown: String,
}

/// Read access to the source tracker, plus the close-with-comment write used
/// after a successful migration.
pub trait SourceTracker {
    /// Fetch one bug with comments and attachments in stored order.
    fn read_bug(&self, bug_id: u64) -> StoreResult<BugRecord>;

    /// Move the bug to `status`/`resolution`, adding `comment`.
    fn close_bug(
        &self,
        bug_id: u64,
        status: &str,
        resolution: &str,
        comment: &str,
    ) -> StoreResult<()>;
}

/// Write access to the destination project-management tool.
pub trait DestinationStore {
    fn create_issue(&self, container: u64, issue: &Issue) -> StoreResult<CreatedIssue>;

    /// Post a comment on `issue_iid` and return the new note id.
    fn create_comment(&self, container: u64, issue_iid: u64, comment: &Comment)
    -> StoreResult<u64>;

    /// Close the issue, writing as `sudo`.
    fn close_issue(&self, container: u64, issue_iid: u64, sudo: &str) -> StoreResult<()>;

    fn upload(&self, container: u64, filename: &str, bytes: &[u8]) -> StoreResult<UploadedFile>;

    fn list_milestones(&self, container: u64) -> StoreResult<Vec<Milestone>>;

    fn create_milestone(&self, container: u64, title: &str) -> StoreResult<Milestone>;

    /// Direct membership, or `None` when the account is not a member.
    fn get_membership(&self, container: u64, account_id: u64) -> StoreResult<Option<Membership>>;

    fn grant_membership(
        &self,
        container: u64,
        account_id: u64,
        level: AccessLevel,
    ) -> StoreResult<()>;

    /// Set an existing membership to the raw numeric `level`.
    fn set_membership_role(
        &self,
        container: u64,
        account_id: u64,
        level: u32,
    ) -> StoreResult<()>;

    fn remove_membership(&self, container: u64, account_id: u64) -> StoreResult<()>;
}

/// Account lookup on the destination.
pub trait IdentityDirectory {
    /// Best-effort search by contact address. May return zero, one or many.
    fn search(&self, contact: &str) -> StoreResult<Vec<DestinationAccount>>;

    /// Exact lookup by username.
    fn user_id(&self, username: &str) -> StoreResult<u64>;
}

/// Persistent source-login → destination-username record.
pub trait MappingStore {
    fn load(&self) -> StoreResult<BTreeMap<String, String>>;

    /// Persist one mapping. Must be durable before returning.
    fn append(&self, source: &str, username: &str) -> StoreResult<()>;
}
