//! Moving attachment payloads from the source tracker into the destination's
//! upload store, and rendering references to them.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::error::{MigrationError, Result};
use crate::model::{AttachmentRecord, BugRecord, CommentRecord};
use crate::store::DestinationStore;

/// Width of inline image previews.
pub const PREVIEW_WIDTH: &str = "400px";

const ARCHIVE_GLYPH: &str = "📦";
const TEXT_GLYPH: &str = "📄";

static ATTACHMENT_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\battachment\s+(\d+)\b").expect("attachment reference pattern is valid")
});

/// An attachment after relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocatedAttachment {
    Uploaded {
        attachment_id: u64,
        filename: String,
        mime_type: String,
        url: String,
    },
    /// Obsolete on the source; nothing was uploaded.
    Obsolete { attachment_id: u64 },
}

impl RelocatedAttachment {
    #[must_use]
    pub const fn attachment_id(&self) -> u64 {
        match self {
            Self::Uploaded { attachment_id, .. } | Self::Obsolete { attachment_id } => {
                *attachment_id
            }
        }
    }

    /// Substitute every `attachment <id>` in `text` with a reference to the
    /// relocated file. When the text never mentions the attachment the
    /// reference is appended on its own line.
    #[must_use]
    pub fn render(&self, text: &str) -> String {
        let id = self.attachment_id();
        let replacement = self.reference();

        let mut replaced = false;
        let mut out = String::with_capacity(text.len() + replacement.len());
        let mut last = 0;
        for caps in ATTACHMENT_REFERENCE.captures_iter(text) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if number.as_str().parse::<u64>().ok() != Some(id) {
                continue;
            }
            out.push_str(&text[last..whole.start()]);
            out.push_str(&replacement);
            last = whole.end();
            replaced = true;
        }
        out.push_str(&text[last..]);

        if !replaced {
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&replacement);
        }

        if let Some(preview) = self.preview() {
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            out.push_str("\n\n");
            out.push_str(&preview);
        }

        out
    }

    /// Link to the relocated file, or the struck-through placeholder.
    #[must_use]
    pub fn reference(&self) -> String {
        match self {
            Self::Uploaded {
                attachment_id,
                filename,
                mime_type,
                url,
            } => {
                let link = format!("[attachment {attachment_id}]({url})");
                match kind_of(mime_type, filename) {
                    AttachmentKind::Archive => format!("{ARCHIVE_GLYPH} {link}"),
                    AttachmentKind::Text => format!("{TEXT_GLYPH} {link}"),
                    AttachmentKind::Image | AttachmentKind::Other => link,
                }
            }
            Self::Obsolete { attachment_id } => {
                format!("~~attachment {attachment_id}~~ (attachment deleted)")
            }
        }
    }

    fn preview(&self) -> Option<String> {
        match self {
            Self::Uploaded {
                filename,
                mime_type,
                url,
                ..
            } if kind_of(mime_type, filename) == AttachmentKind::Image => Some(format!(
                "![{filename}]({url}){{width={PREVIEW_WIDTH}}}"
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachmentKind {
    Image,
    Archive,
    Text,
    Other,
}

fn kind_of(mime_type: &str, filename: &str) -> AttachmentKind {
    let mime = mime_type.trim().to_ascii_lowercase();
    let name = filename.to_ascii_lowercase();

    if mime.starts_with("image/") {
        return AttachmentKind::Image;
    }

    let archive_mime = [
        "application/zip",
        "application/x-zip-compressed",
        "application/x-7z-compressed",
        "application/x-rar-compressed",
        "application/vnd.rar",
        "application/x-tar",
        "application/gzip",
        "application/x-gzip",
        "application/x-compressed-tar",
    ];
    if archive_mime.contains(&mime.as_str())
        || (mime == "application/octet-stream" && name.ends_with(".zip"))
    {
        return AttachmentKind::Archive;
    }

    if mime.starts_with("text/") {
        return AttachmentKind::Text;
    }

    AttachmentKind::Other
}

/// Uploads attachments for one bug, at most once per attachment id.
#[derive(Debug)]
pub struct AttachmentRelocator {
    container: u64,
    relocated: HashMap<u64, RelocatedAttachment>,
}

impl AttachmentRelocator {
    #[must_use]
    pub fn new(container: u64) -> Self {
        Self {
            container,
            relocated: HashMap::new(),
        }
    }

    /// Relocate one attachment. Obsolete records never reach the store.
    pub fn relocate<S>(&mut self, store: &S, record: &AttachmentRecord) -> Result<RelocatedAttachment>
    where
        S: DestinationStore + ?Sized,
    {
        if let Some(done) = self.relocated.get(&record.id) {
            debug!(attachment_id = record.id, "attachment already relocated");
            return Ok(done.clone());
        }

        let relocated = if record.is_obsolete {
            debug!(attachment_id = record.id, "attachment is obsolete, skipping upload");
            RelocatedAttachment::Obsolete {
                attachment_id: record.id,
            }
        } else {
            let data = record
                .data
                .as_deref()
                .filter(|data| !data.is_empty())
                .ok_or_else(|| MigrationError::Upload {
                    attachment_id: record.id,
                    filename: record.filename.clone(),
                    reason: "attachment payload is empty".to_string(),
                })?;

            let uploaded = store
                .upload(self.container, &record.filename, data)
                .map_err(|err| MigrationError::Upload {
                    attachment_id: record.id,
                    filename: record.filename.clone(),
                    reason: err.to_string(),
                })?;
            info!(
                attachment_id = record.id,
                filename = %record.filename,
                url = %uploaded.url,
                "uploaded attachment"
            );

            RelocatedAttachment::Uploaded {
                attachment_id: record.id,
                filename: record.filename.clone(),
                mime_type: record.mime_type.clone(),
                url: uploaded.url,
            }
        };

        self.relocated.insert(record.id, relocated.clone());
        Ok(relocated)
    }

    /// Relocate the attachment a comment claims to carry, if any.
    pub fn relocate_for_comment<S>(
        &mut self,
        store: &S,
        bug: &BugRecord,
        comment: &CommentRecord,
    ) -> Result<Option<RelocatedAttachment>>
    where
        S: DestinationStore + ?Sized,
    {
        let Some(attachment_id) = comment.attachment_id else {
            return Ok(None);
        };
        let record =
            bug.attachment(attachment_id)
                .ok_or(MigrationError::AttachmentInconsistency {
                    comment_index: comment.index,
                    attachment_id,
                })?;
        self.relocate(store, record).map(Some)
    }
}
