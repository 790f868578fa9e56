//! Comment builder.

use chrono::Utc;
use tracing::debug;

use super::{BuildContext, attribution, format_timestamp};
use crate::error::Result;
use crate::identity::Resolution;
use crate::model::{BugRecord, Comment, CommentRecord};

/// A comment ready to persist once its issue exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub comment: Comment,
    pub author: Resolution,
}

/// Build the destination comment for `record`, or `None` when the record
/// has neither text nor an attachment.
///
/// Uploads the attachment the record carries, if any.
pub fn build_comment(
    ctx: &mut BuildContext<'_>,
    bug: &BugRecord,
    record: &CommentRecord,
) -> Result<Option<CommentDraft>> {
    if record.text.trim().is_empty() && record.attachment_id.is_none() {
        debug!(bug_id = bug.bug_id, index = record.index, "skipping empty comment");
        return Ok(None);
    }

    let config = ctx.config;
    let author = ctx
        .identities
        .resolve(ctx.directory, ctx.mappings, &record.author.login)?;

    let mut body = String::new();
    if author.is_fallback {
        body.push_str("By ");
        body.push_str(&attribution(&record.author, config.show_email));
        body.push_str(if config.show_datetime_in_comments {
            " on "
        } else {
            "\n\n"
        });
    }
    if config.show_datetime_in_comments {
        body.push_str(&format_timestamp(config, &record.created_at));
        body.push_str("\n\n");
    }

    let text = ctx.pipeline.apply(&record.text);
    match ctx
        .attachments
        .relocate_for_comment(ctx.destination, bug, record)?
    {
        Some(relocated) => body.push_str(&relocated.render(&text)),
        None => body.push_str(&text),
    }

    Ok(Some(CommentDraft {
        comment: Comment {
            sudo: author.account.username.clone(),
            author_id: author.account.id,
            body,
            created_at: record.created_at.with_timezone(&Utc),
            issue_iid: None,
            source_index: record.index,
        },
        author,
    }))
}
