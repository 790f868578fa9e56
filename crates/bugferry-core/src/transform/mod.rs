//! Field transformation: one [`BugRecord`](crate::model::BugRecord) into an
//! [`Issue`](crate::model::Issue) plus its [`Comment`](crate::model::Comment)s.

pub mod comment;
pub mod description;
pub mod issue;

use std::fmt::Write as _;

use chrono::{DateTime, TimeZone};

use crate::attachment::AttachmentRelocator;
use crate::config::MigrationConfig;
use crate::identity::IdentityResolver;
use crate::model::SourceAccount;
use crate::rewrite::RewritePipeline;
use crate::store::{DestinationStore, IdentityDirectory, MappingStore};
use crate::taxonomy::MilestoneCache;

pub use comment::{CommentDraft, build_comment};
pub use issue::{IssueDraft, build_issue};

/// Collaborators and run state a builder reads and extends while
/// transforming one bug.
pub struct BuildContext<'a> {
    pub config: &'a MigrationConfig,
    pub container: u64,
    pub destination: &'a dyn DestinationStore,
    pub directory: &'a dyn IdentityDirectory,
    pub mappings: &'a dyn MappingStore,
    pub identities: &'a mut IdentityResolver,
    pub milestones: &'a mut MilestoneCache,
    pub attachments: &'a mut AttachmentRelocator,
    pub pipeline: &'a RewritePipeline,
}

/// Format a timestamp with the configured pattern and timezone label.
///
/// An invalid pattern degrades to RFC 3339 instead of panicking.
pub fn format_timestamp<Tz>(config: &MigrationConfig, ts: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    if write!(out, "{}", ts.format(&config.datetime_format_string)).is_err() {
        out = ts.to_rfc3339();
    }
    if !config.timezone.trim().is_empty() {
        out.push(' ');
        out.push_str(config.timezone.trim());
    }
    out
}

/// How a person who could not be mapped is credited in text.
///
/// With `show_email` the login is included; without it only the name is
/// shown, falling back to the part of the login before `@`.
#[must_use]
pub fn attribution(account: &SourceAccount, show_email: bool) -> String {
    let name = account.name.trim();
    match (name.is_empty(), show_email) {
        (false, true) => format!("{name} ({})", account.login),
        (true, true) => account.login.clone(),
        (false, false) => name.to_string(),
        (true, false) => account
            .login
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}
