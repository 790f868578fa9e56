//! Issue builder.

use chrono::Utc;
use tracing::{debug, info};

use super::BuildContext;
use super::description::describe;
use crate::error::Result;
use crate::identity::Resolution;
use crate::model::{BugRecord, Issue};
use crate::taxonomy::LabelMapper;

/// An issue ready to persist, plus what the orchestrator does after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDraft {
    pub issue: Issue,
    /// Identity the issue is written as.
    pub reporter: Resolution,
    /// Positions in [`BugRecord::comments`] still to migrate as comments.
    pub remaining: Vec<usize>,
    /// The source status is a closed state.
    pub close_after: bool,
}

/// Build the destination issue for `bug`.
///
/// Resolves reporter and assignee, creates missing milestones and uploads the
/// reporter's attachments that are folded into the description. Nothing is
/// written to the issue tracker itself.
pub fn build_issue(ctx: &mut BuildContext<'_>, bug: &BugRecord) -> Result<IssueDraft> {
    let config = ctx.config;

    let title = if config.use_bugzilla_id_in_title {
        format!("[Bug {}] {}", bug.bug_id, bug.title.trim())
    } else {
        bug.title.trim().to_string()
    };

    let reporter = ctx
        .identities
        .resolve(ctx.directory, ctx.mappings, &bug.reporter.login)?;

    let assignee_login = bug.assignee.login.trim();
    let assignee_ids = if assignee_login.is_empty()
        || config
            .unassign_list
            .iter()
            .any(|login| login.eq_ignore_ascii_case(assignee_login))
    {
        debug!(bug_id = bug.bug_id, assignee = assignee_login, "leaving issue unassigned");
        Vec::new()
    } else {
        let assignee = ctx
            .identities
            .resolve(ctx.directory, ctx.mappings, assignee_login)?;
        vec![assignee.account.id]
    };

    let labels = LabelMapper::new(config).labels_for(bug)?;

    let milestone_id = match bug.target_milestone.as_deref() {
        Some(title) => ctx
            .milestones
            .resolve(ctx.destination, ctx.container, title)?,
        None => None,
    };

    let confidential = config
        .confidential_group
        .as_deref()
        .is_some_and(|marker| bug.groups.iter().any(|group| group == marker));
    if confidential {
        info!(bug_id = bug.bug_id, "bug is in the confidential group, issue will be confidential");
    }

    let description = describe(ctx, bug, &reporter)?;
    let remaining = (0..bug.comments.len())
        .filter(|position| !description.folded.contains(position))
        .collect();

    let issue = Issue {
        title,
        description: description.body,
        labels,
        milestone_id,
        assignee_ids,
        confidential,
        sudo: reporter.account.username.clone(),
        author_id: reporter.account.id,
        created_at: bug.created_at.with_timezone(&Utc),
        source_iid: config.use_bugzilla_id.then_some(bug.bug_id),
        iid: None,
        web_url: None,
    };
    issue.validate()?;

    Ok(IssueDraft {
        issue,
        reporter,
        remaining,
        close_after: config.is_closed_state(&bug.status),
    })
}
