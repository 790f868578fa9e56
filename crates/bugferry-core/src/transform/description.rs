//! Issue description synthesis: a metadata table followed by the reporter's
//! opening comment.
//!
//! ```text
//! | | |
//! |---|---|
//! | Bugzilla Link | [42](https://bugs.example.org/show_bug.cgi?id=42) |
//! | Status | RESOLVED FIXED |
//! ...
//! | Attachments | [attachment 9](/uploads/...) |
//!
//! ## Description
//!
//! <comment 0, rewritten>
//! ```

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{BuildContext, attribution, format_timestamp};
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::identity::Resolution;
use crate::model::BugRecord;

const DUPLICATE: &str = "DUPLICATE";
const UNSPECIFIED: &str = "unspecified";

static GERRIT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/*(?:#/)?(?:c/(?:.+?/\+/)?)?").expect("gerrit prefix pattern is valid")
});

static COMMIT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{8,40}\b").expect("commit id pattern is valid"));

/// The synthesized description and the comments folded into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub body: String,
    /// Positions in [`BugRecord::comments`] that must not become comments.
    pub folded: Vec<usize>,
}

/// Build the description for `bug` authored by `reporter`.
///
/// Uploads the opening comment's attachment, if it carries one, and every
/// attachment the reporter added in a later comment. Those later comments are
/// folded into an `Attachments` row.
pub fn describe(
    ctx: &mut BuildContext<'_>,
    bug: &BugRecord,
    reporter: &Resolution,
) -> Result<Description> {
    let config = ctx.config;

    let opening = bug.opening_comment().filter(|comment| {
        comment.author.login == bug.reporter.login
            && (!comment.text.trim().is_empty() || comment.attachment_id.is_some())
    });

    let mut folded = Vec::new();
    let mut narrative = None;
    if let Some(comment) = opening {
        let mut text = ctx.pipeline.apply(&comment.text);
        if let Some(relocated) =
            ctx.attachments
                .relocate_for_comment(ctx.destination, bug, comment)?
        {
            text = relocated.render(&text);
        }
        narrative = Some(text);
        folded.push(0);
    }

    let mut attachments = Vec::new();
    for (position, comment) in bug.comments.iter().enumerate() {
        if folded.contains(&position)
            || comment.attachment_id.is_none()
            || comment.author.login != bug.reporter.login
        {
            continue;
        }
        if let Some(relocated) =
            ctx.attachments
                .relocate_for_comment(ctx.destination, bug, comment)?
        {
            debug!(
                bug_id = bug.bug_id,
                comment = comment.index,
                attachment_id = relocated.attachment_id(),
                "folding reporter attachment into description"
            );
            attachments.push(relocated.reference());
            folded.push(position);
        }
    }

    let mut table = Table::default();
    if config.include_bugzilla_link {
        table.row(
            "Bugzilla Link",
            &format!("[{}]({})", bug.bug_id, config.bug_url(bug.bug_id)),
        );
    }
    table.row("Status", &status_cell(config, bug));
    if let Some(priority) = non_empty(bug.priority.as_deref()) {
        table.row("Priority", priority);
    }
    if let Some(severity) = non_empty(Some(bug.severity.as_str())) {
        table.row("Severity", severity);
    }
    table.row("Reported", &format_timestamp(config, &bug.created_at));
    table.row("Modified", &format_timestamp(config, &bug.modified_at));
    if non_empty(bug.resolution.as_deref()).is_some() {
        table.row("Resolved", &format_timestamp(config, &bug.modified_at));
    }
    if config.include_version
        && let Some(version) = non_empty(bug.version.as_deref())
        && !(config.include_version_only_when_specified
            && version.eq_ignore_ascii_case(UNSPECIFIED))
    {
        table.row("Version", version);
    }
    if config.include_os
        && let Some(os) = non_empty(bug.op_sys.as_deref())
    {
        table.row("OS", os);
    }
    if config.include_arch
        && let Some(arch) = non_empty(bug.platform.as_deref())
    {
        table.row("Architecture", arch);
    }
    if !bug.depends_on.is_empty() {
        table.row("Depends on", &bug_links(config, &bug.depends_on));
    }
    if !bug.blocks.is_empty() {
        table.row("Blocks", &bug_links(config, &bug.blocks));
    }
    if !bug.see_also.is_empty() {
        let see_also: Vec<String> = bug
            .see_also
            .iter()
            .map(|reference| see_also_link(config, reference))
            .collect();
        table.row("See also", &see_also.join(", "));
    }
    if !attachments.is_empty() {
        table.row("Attachments", &attachments.join(", "));
    }
    if reporter.is_fallback {
        let credited = credited_reporter(config, bug, opening.map(|c| c.text.as_str()));
        debug!(bug_id = bug.bug_id, reporter = %credited, "crediting reporter in description");
        table.row("Reporter", &credited);
    }

    let mut body = table.into_markdown();
    if let Some(narrative) = narrative {
        body.push_str("\n## Description\n\n");
        body.push_str(&narrative);
    }

    Ok(Description { body, folded })
}

/// Two-column markdown table with an empty header row.
#[derive(Debug, Default)]
struct Table {
    rows: Vec<(String, String)>,
}

impl Table {
    fn row(&mut self, key: &str, value: &str) {
        self.rows.push((escape_cell(key), escape_cell(value)));
    }

    fn into_markdown(self) -> String {
        let mut out = String::from("| | |\n|---|---|\n");
        for (key, value) in self.rows {
            out.push_str("| ");
            out.push_str(&key);
            out.push_str(" | ");
            out.push_str(&value);
            out.push_str(" |\n");
        }
        out
    }
}

fn escape_cell(raw: &str) -> String {
    raw.replace('|', r"\|").replace(['\r', '\n'], " ")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn status_cell(config: &MigrationConfig, bug: &BugRecord) -> String {
    let mut status = bug.status.trim().to_string();
    if let Some(resolution) = non_empty(bug.resolution.as_deref()) {
        status.push(' ');
        status.push_str(resolution);
        if resolution.eq_ignore_ascii_case(DUPLICATE)
            && let Some(target) = bug.duplicate_of
        {
            status.push_str(&format!(" of [bug {target}]({})", config.bug_url(target)));
        }
    }
    status
}

fn bug_links(config: &MigrationConfig, ids: &[u64]) -> String {
    ids.iter()
        .map(|id| format!("[{id}]({})", config.bug_url(*id)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render one see-also reference, recognising code review, commit browser
/// and same-tracker URLs.
#[must_use]
pub fn see_also_link(config: &MigrationConfig, reference: &str) -> String {
    let reference = reference.trim();

    if let Some(rest) = strip_base(reference, config.see_also_gerrit_link_base_url.as_deref()) {
        let change = GERRIT_PREFIX.replace(rest, "");
        let change = change.trim_end_matches('/');
        if !change.is_empty() {
            return format!("[Gerrit change `{change}`]({reference})");
        }
    }

    if let Some(rest) = strip_base(reference, config.see_also_git_link_base_url.as_deref())
        && let Some(commit) = COMMIT_ID.find(rest)
    {
        let short: String = commit.as_str().chars().take(8).collect();
        return format!("[Git commit `{short}`]({reference})");
    }

    let bug_prefix = format!("{}/show_bug.cgi?id=", config.source_base());
    if let Some(id) = reference
        .strip_prefix(&bug_prefix)
        .and_then(|rest| rest.split(['&', '#']).next())
        .and_then(|id| id.parse::<u64>().ok())
    {
        return format!("[bug {id}]({})", config.bug_url(id));
    }

    reference.to_string()
}

fn strip_base<'r>(reference: &'r str, base: Option<&str>) -> Option<&'r str> {
    let base = base.map(|base| base.trim().trim_end_matches('/'))?;
    if base.is_empty() {
        return None;
    }
    reference.strip_prefix(base)
}

/// Who to credit when the reporter fell back to the shared account.
fn credited_reporter(
    config: &MigrationConfig,
    bug: &BugRecord,
    opening_text: Option<&str>,
) -> String {
    let marker = config.submitter_marker.as_str();
    if !marker.is_empty()
        && let Some(text) = opening_text
        && let Some((_, after)) = text.rsplit_once(marker)
    {
        let contact = after.split_whitespace().next().unwrap_or_default();
        if !contact.is_empty() {
            return contact.to_string();
        }
    }
    attribution(&bug.reporter, config.show_email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MigrationConfig {
        let mut config = MigrationConfig::new("https://bugs.example.org/");
        config.see_also_gerrit_link_base_url = Some("https://review.example.org".to_string());
        config.see_also_git_link_base_url = Some("https://git.example.org/".to_string());
        config
    }

    #[test]
    fn gerrit_changes_are_named_by_id() {
        let config = config();
        assert_eq!(
            see_also_link(&config, "https://review.example.org/#/c/12345/"),
            "[Gerrit change `12345`](https://review.example.org/#/c/12345/)"
        );
        assert_eq!(
            see_also_link(&config, "https://review.example.org/c/platform/core/+/678"),
            "[Gerrit change `678`](https://review.example.org/c/platform/core/+/678)"
        );
    }

    #[test]
    fn gerrit_hash_urls_with_a_project_are_named_by_id() {
        let config = config();
        assert_eq!(
            see_also_link(&config, "https://review.example.org/#/c/platform/core/+/678/"),
            "[Gerrit change `678`](https://review.example.org/#/c/platform/core/+/678/)"
        );
        assert_eq!(
            see_also_link(&config, "https://review.example.org/#/c/tools/+/91011"),
            "[Gerrit change `91011`](https://review.example.org/#/c/tools/+/91011)"
        );
    }

    #[test]
    fn git_commits_are_shortened() {
        let config = config();
        assert_eq!(
            see_also_link(
                &config,
                "https://git.example.org/?p=core.git;a=commit;h=0123456789abcdef0123"
            ),
            "[Git commit `01234567`](https://git.example.org/?p=core.git;a=commit;h=0123456789abcdef0123)"
        );
    }

    #[test]
    fn same_tracker_references_become_bug_links() {
        let config = config();
        assert_eq!(
            see_also_link(&config, "https://bugs.example.org/show_bug.cgi?id=77"),
            "[bug 77](https://bugs.example.org/show_bug.cgi?id=77)"
        );
    }

    #[test]
    fn unknown_references_pass_through() {
        let config = config();
        assert_eq!(
            see_also_link(&config, "https://elsewhere.example.com/issue/3"),
            "https://elsewhere.example.com/issue/3"
        );
        let mut bare = MigrationConfig::new("https://bugs.example.org");
        bare.see_also_gerrit_link_base_url = Some(String::new());
        assert_eq!(
            see_also_link(&bare, "https://review.example.org/#/c/1/"),
            "https://review.example.org/#/c/1/"
        );
    }

    #[test]
    fn table_cells_escape_pipes() {
        let mut table = Table::default();
        table.row("Version", "1.0 | beta\nrc");
        assert_eq!(
            table.into_markdown(),
            "| | |\n|---|---|\n| Version | 1.0 \\| beta rc |\n"
        );
    }
}
