//! Source records read from the bug tracker and the destination payloads
//! built from them.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// A person on the source tracker. `login` is the contact address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAccount {
    pub login: String,
    #[serde(default)]
    pub name: String,
}

impl SourceAccount {
    pub fn new(login: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            name: name.into(),
        }
    }

    /// Name when known, login otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.login
        } else {
            &self.name
        }
    }
}

/// One bug as read from the source tracker. Immutable input to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugRecord {
    pub bug_id: u64,
    pub title: String,
    pub reporter: SourceAccount,
    pub assignee: SourceAccount,
    pub status: String,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub duplicate_of: Option<u64>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub op_sys: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Access groups restricting visibility of the bug.
    #[serde(default)]
    pub groups: Vec<String>,
    pub created_at: DateTime<FixedOffset>,
    pub modified_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub target_milestone: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<u64>,
    #[serde(default)]
    pub blocks: Vec<u64>,
    #[serde(default)]
    pub see_also: Vec<String>,
    #[serde(default)]
    pub comments: Vec<CommentRecord>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
}

/// One entry of a bug's comment thread. Index 0 is the original report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub index: usize,
    pub author: SourceAccount,
    pub created_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachment_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: u64,
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_obsolete: bool,
    /// Raw payload; absent for obsolete attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

impl BugRecord {
    /// Check the record at the reader boundary, before any destination write.
    pub fn validate(&self) -> Result<()> {
        if self.bug_id == 0 {
            return Err(MigrationError::Validation {
                entity: "bug",
                field: "bug_id",
            });
        }
        if self.title.trim().is_empty() {
            return Err(MigrationError::Validation {
                entity: "bug",
                field: "title",
            });
        }
        if self.reporter.login.trim().is_empty() {
            return Err(MigrationError::Validation {
                entity: "bug",
                field: "reporter",
            });
        }

        let mut seen = HashSet::new();
        for attachment in &self.attachments {
            if !seen.insert(attachment.id) {
                return Err(MigrationError::Validation {
                    entity: "attachment",
                    field: "id",
                });
            }
        }

        // An attachment is created by exactly one comment.
        let mut claimed = HashSet::new();
        for id in self.comments.iter().filter_map(|comment| comment.attachment_id) {
            if !claimed.insert(id) {
                return Err(MigrationError::Validation {
                    entity: "comment",
                    field: "attachment_id",
                });
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn attachment(&self, id: u64) -> Option<&AttachmentRecord> {
        self.attachments.iter().find(|attachment| attachment.id == id)
    }

    /// Comment 0, when it exists.
    #[must_use]
    pub fn opening_comment(&self) -> Option<&CommentRecord> {
        self.comments.first()
    }
}

/// Destination issue, derived 1:1 from a [`BugRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub milestone_id: Option<u64>,
    pub assignee_ids: Vec<u64>,
    pub confidential: bool,
    /// Destination username the issue is written as.
    pub sudo: String,
    /// Destination id of `sudo`, used for elevation.
    pub author_id: u64,
    pub created_at: DateTime<Utc>,
    /// Requested project-local id, when source ids are kept.
    pub source_iid: Option<u64>,
    /// Destination id, set once the issue is persisted.
    pub iid: Option<u64>,
    pub web_url: Option<String>,
}

impl Issue {
    pub fn validate(&self) -> Result<()> {
        require("issue", "sudo", &self.sudo)?;
        require("issue", "title", &self.title)?;
        require("issue", "description", &self.description)
    }
}

/// Destination comment, bound to an issue only after the issue is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub sudo: String,
    pub author_id: u64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub issue_iid: Option<u64>,
    /// Source comment index, kept for logging.
    pub source_index: usize,
}

impl Comment {
    pub fn validate(&self) -> Result<()> {
        require("comment", "sudo", &self.sudo)?;
        require("comment", "body", &self.body)?;
        if self.issue_iid.is_none() {
            return Err(MigrationError::Validation {
                entity: "comment",
                field: "issue_id",
            });
        }
        Ok(())
    }
}

fn require(entity: &'static str, field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(MigrationError::Validation { entity, field })
    } else {
        Ok(())
    }
}
