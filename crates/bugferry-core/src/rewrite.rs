//! Text rewrite pipeline for comment and description bodies.
//!
//! Bugzilla comments are plain text; GitLab renders markdown. The pipeline
//! is four pure `&str -> String` stages, always applied in this order:
//!
//! 1. [`escape_stray_references`]: `#123` would link to a local GitLab
//!    issue, so it is escaped. `bug #123` / `comment #4` lose the hash instead
//!    because stage 2 turns them into links.
//! 2. [`link_bug_references`]: `bug 123` and `bug 123 comment 4` become
//!    links back to the source tracker.
//! 3. [`repair_quote_blocks`]: a quote block is closed with a blank line
//!    before following text; trailing whitespace is trimmed.
//! 4. [`insert_hard_breaks`]: single newlines inside paragraphs become hard
//!    breaks, except around block elements.
//!
//! Stage 1 must run before stage 2: the links produced by stage 2 carry
//! `#cN` anchors that stage 1 would otherwise escape.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::MigrationConfig;

/// Markdown hard break appended to a line.
pub const HARD_BREAK: &str = "  ";

static CROSS_LINK_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(bug|comment)(\s*)#(\d+)").expect("cross-link hash pattern is valid")
});

// Any non-word character may precede a GitLab issue link. URL fragments and
// query strings (`/#12`, `?#12`, `=#12`, `&#12`) and already escaped hashes
// are left alone.
static STRAY_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(^|[^\w/=&?#\\])#(\d+)\b").expect("stray reference pattern is valid")
});

static BUG_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbug\s+(\d{1,7})\b(?:,?\s+comment\s+(\d{1,5})\b)?")
        .expect("bug reference pattern is valid")
});

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,9}[.)](\s|$)").expect("numbered item pattern is valid"));

/// Ordered rewrite pipeline bound to one source tracker.
#[derive(Debug, Clone)]
pub struct RewritePipeline {
    source_base: String,
}

impl RewritePipeline {
    /// Stage names in application order.
    pub const STAGES: [&'static str; 4] = [
        "escape_stray_references",
        "link_bug_references",
        "repair_quote_blocks",
        "insert_hard_breaks",
    ];

    pub fn new(source_base: impl Into<String>) -> Self {
        let source_base: String = source_base.into();
        Self {
            source_base: source_base.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(config.source_base())
    }

    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        let text = escape_stray_references(text);
        let text = link_bug_references(&text, &self.source_base);
        let text = repair_quote_blocks(&text);
        insert_hard_breaks(&text)
    }
}

/// Stage 1: neutralise `#<digits>` so GitLab does not link local issues.
#[must_use]
pub fn escape_stray_references(text: &str) -> String {
    let text = CROSS_LINK_HASH.replace_all(text, |caps: &Captures<'_>| {
        let separator = if caps[2].is_empty() { " " } else { &caps[2] };
        format!("{}{separator}{}", &caps[1], &caps[3])
    });
    STRAY_REFERENCE
        .replace_all(&text, r"${1}\#${2}")
        .into_owned()
}

/// Stage 2: `bug N` (optionally `comment M`) becomes a link to the source bug.
#[must_use]
pub fn link_bug_references(text: &str, source_base: &str) -> String {
    let source_base = source_base.trim_end_matches('/');
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in BUG_REFERENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        // already a link label
        if text[..whole.start()].ends_with('[') {
            continue;
        }

        let bug_id = &caps[1];
        let target = match caps.get(2) {
            Some(comment) => format!(
                "{source_base}/show_bug.cgi?id={bug_id}#c{}",
                comment.as_str()
            ),
            None => format!("{source_base}/show_bug.cgi?id={bug_id}"),
        };

        out.push_str(&text[last..whole.start()]);
        out.push('[');
        out.push_str(whole.as_str());
        out.push_str("](");
        out.push_str(&target);
        out.push(')');
        last = whole.end();
    }

    out.push_str(&text[last..]);
    out
}

/// Stage 3: force a blank line after the last line of a quote block.
#[must_use]
pub fn repair_quote_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut previous_quoted = false;

    for line in text.lines() {
        let line = line.trim_end();
        let quoted = is_quote(line);
        if previous_quoted && !quoted && !line.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
        previous_quoted = quoted;
    }

    if !text.ends_with('\n') {
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
    }
    out
}

/// Stage 4: append a hard break to paragraph lines followed by another
/// paragraph line.
#[must_use]
pub fn insert_hard_breaks(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = String::with_capacity(text.len() + lines.len() * HARD_BREAK.len());
    let mut in_fence = false;

    for (index, line) in lines.iter().enumerate() {
        out.push_str(line);

        let fence = is_fence(line);
        if !in_fence
            && !fence
            && let Some(next) = lines.get(index + 1)
            && needs_hard_break(line, next)
        {
            out.push_str(HARD_BREAK);
        }
        if fence {
            in_fence = !in_fence;
        }

        if index + 1 < lines.len() {
            out.push('\n');
        }
    }

    out
}

fn needs_hard_break(line: &str, next: &str) -> bool {
    !line.trim().is_empty()
        && !next.trim().is_empty()
        && !line.ends_with(HARD_BREAK)
        && !is_block_element(line)
        && !is_block_element(next)
        && !is_fence(next)
}

/// Lines that keep their native paragraph break.
#[must_use]
pub fn is_block_element(line: &str) -> bool {
    let trimmed = line.trim_start();
    is_quote(trimmed) || is_heading(trimmed) || is_bullet(trimmed) || NUMBERED_ITEM.is_match(trimmed)
}

fn is_quote(line: &str) -> bool {
    line.trim_start().starts_with('>')
}

fn is_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|byte| *byte == b'#').count();
    (1..=6).contains(&hashes)
        && line[hashes..]
            .chars()
            .next()
            .is_none_or(char::is_whitespace)
}

fn is_bullet(line: &str) -> bool {
    matches!(line.as_bytes(), [b'-' | b'*' | b'+', b' ' | b'\t', ..])
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}
