//! Bugzilla REST client: the engine's source tracker, plus the bug-list
//! query used to pick what to migrate.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bugferry_core::MigrationError;
use bugferry_core::model::{AttachmentRecord, BugRecord, CommentRecord, SourceAccount};
use bugferry_core::store::{SourceTracker, StoreError, StoreResult};
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{build_agent, decode, get_with_retry, http_error};

/// Login attempts before giving up.
pub const LOGIN_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Credential {
    Anonymous,
    ApiKey(String),
    Token(String),
}

impl Credential {
    fn param(&self) -> Option<(&'static str, &str)> {
        match self {
            Self::Anonymous => None,
            Self::ApiKey(key) => Some(("api_key", key.as_str())),
            Self::Token(token) => Some(("token", token.as_str())),
        }
    }
}

/// Which bugs `fetch_bug_list` asks for.
#[derive(Debug, Clone, Default)]
pub struct BugQuery {
    pub product: String,
    pub components: Vec<String>,
    pub statuses: Vec<String>,
    /// Refuse result sets larger than this.
    pub max: usize,
}

#[derive(Debug, Deserialize)]
struct UserDetail {
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    real_name: String,
}

impl UserDetail {
    fn login(&self) -> &str {
        if self.email.is_empty() {
            &self.name
        } else {
            &self.email
        }
    }
}

#[derive(Debug, Deserialize)]
struct RestBug {
    id: u64,
    summary: String,
    creator: String,
    #[serde(default)]
    creator_detail: Option<UserDetail>,
    #[serde(default)]
    assigned_to: String,
    #[serde(default)]
    assigned_to_detail: Option<UserDetail>,
    #[serde(default)]
    cc_detail: Vec<UserDetail>,
    status: String,
    #[serde(default)]
    resolution: String,
    #[serde(default)]
    dupe_of: Option<u64>,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    component: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    op_sys: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
    creation_time: DateTime<FixedOffset>,
    last_change_time: DateTime<FixedOffset>,
    #[serde(default)]
    target_milestone: String,
    #[serde(default)]
    depends_on: Vec<u64>,
    #[serde(default)]
    blocks: Vec<u64>,
    #[serde(default)]
    see_also: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BugsEnvelope {
    bugs: Vec<RestBug>,
}

#[derive(Debug, Deserialize)]
struct RestComment {
    #[serde(default)]
    count: Option<usize>,
    creator: String,
    creation_time: DateTime<FixedOffset>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachment_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CommentThread {
    comments: Vec<RestComment>,
}

#[derive(Debug, Deserialize)]
struct CommentsEnvelope {
    bugs: HashMap<String, CommentThread>,
}

#[derive(Debug, Deserialize)]
struct RestAttachment {
    id: u64,
    file_name: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    is_obsolete: bool,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentsEnvelope {
    bugs: HashMap<String, Vec<RestAttachment>>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct BugId {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct BugIdsEnvelope {
    bugs: Vec<BugId>,
}

pub struct BugzillaClient {
    agent: ureq::Agent,
    base_url: String,
    credential: Credential,
    retry_delay: Duration,
}

impl BugzillaClient {
    pub fn anonymous(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: Credential::Anonymous,
            retry_delay: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.credential = Credential::ApiKey(key.to_string());
        self
    }

    #[cfg(test)]
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Exchange a login and password for a session token, trying at most
    /// [`LOGIN_ATTEMPTS`] times.
    pub fn login(mut self, user: &str, password: &str) -> Result<Self, MigrationError> {
        let url = self.url("/rest/login");
        for attempt in 1..=LOGIN_ATTEMPTS {
            let outcome = self
                .agent
                .get(&url)
                .query("login", user)
                .query("password", password)
                .call()
                .map_err(|err| http_error("GET", &url, err))
                .and_then(|response| decode::<LoginResponse>(&url, response));
            match outcome {
                Ok(login) => {
                    info!(user, attempt, "logged in to Bugzilla");
                    self.credential = Credential::Token(login.token);
                    return Ok(self);
                }
                Err(err) => warn!(user, attempt, error = %err, "Bugzilla login failed"),
            }
        }
        Err(MigrationError::Authentication {
            user: user.to_string(),
            attempts: LOGIN_ATTEMPTS,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        match self.credential.param() {
            Some((key, value)) => request.query(key, value),
            None => request,
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> StoreResult<T> {
        let url = self.url(path);
        let response = get_with_retry(&url, self.retry_delay, || {
            query.iter().fold(
                self.authorized(self.agent.get(&url)).set("Accept", "application/json"),
                |request, (key, value)| request.query(key, value),
            )
        })?;
        decode(&url, response)
    }

    /// Ids of bugs matching `query`, in the order Bugzilla returns them.
    pub fn fetch_bug_list(&self, query: &BugQuery) -> Result<Vec<u64>> {
        let mut params: Vec<(&str, &str)> = vec![("product", query.product.as_str())];
        params.extend(query.components.iter().map(|c| ("component", c.as_str())));
        params.extend(query.statuses.iter().map(|s| ("status", s.as_str())));
        params.push(("include_fields", "id"));

        let found: BugIdsEnvelope = self
            .get_json("/rest/bug", &params)
            .context("bug list query failed")?;
        info!(
            count = found.bugs.len(),
            product = %query.product,
            components = ?query.components,
            statuses = ?query.statuses,
            "fetched bug list"
        );

        if found.bugs.len() > query.max {
            anyhow::bail!(
                "query matched {} bugs, more than max_no_of_bugs ({}); narrow it by status or component",
                found.bugs.len(),
                query.max
            );
        }
        Ok(found.bugs.into_iter().map(|bug| bug.id).collect())
    }

    fn comments(&self, bug_id: u64) -> StoreResult<Vec<RestComment>> {
        let mut envelope: CommentsEnvelope =
            self.get_json(&format!("/rest/bug/{bug_id}/comment"), &[])?;
        Ok(envelope
            .bugs
            .remove(&bug_id.to_string())
            .map(|thread| thread.comments)
            .unwrap_or_default())
    }

    fn attachments(&self, bug_id: u64) -> StoreResult<Vec<RestAttachment>> {
        let mut envelope: AttachmentsEnvelope =
            self.get_json(&format!("/rest/bug/{bug_id}/attachment"), &[])?;
        Ok(envelope.bugs.remove(&bug_id.to_string()).unwrap_or_default())
    }
}

fn optional(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "---" {
        None
    } else {
        Some(raw)
    }
}

fn account(login: &str, detail: Option<&UserDetail>, names: &HashMap<String, String>) -> SourceAccount {
    let name = detail
        .map(|detail| detail.real_name.clone())
        .filter(|name| !name.is_empty())
        .or_else(|| names.get(login).cloned())
        .unwrap_or_default();
    SourceAccount::new(login, name)
}

fn convert_attachment(url: &str, raw: RestAttachment) -> StoreResult<AttachmentRecord> {
    let data = if raw.is_obsolete {
        None
    } else {
        raw.data
            .map(|encoded| {
                BASE64.decode(encoded.trim()).map_err(|err| StoreError::Decode {
                    url: url.to_string(),
                    reason: format!("attachment {} is not valid base64: {err}", raw.id),
                })
            })
            .transpose()?
    };
    Ok(AttachmentRecord {
        id: raw.id,
        filename: raw.file_name,
        mime_type: raw.content_type,
        description: raw.summary,
        is_obsolete: raw.is_obsolete,
        data,
    })
}

fn assemble(
    bug: RestBug,
    comments: Vec<RestComment>,
    attachments: Vec<AttachmentRecord>,
) -> BugRecord {
    let names: HashMap<String, String> = bug
        .creator_detail
        .iter()
        .chain(bug.assigned_to_detail.iter())
        .chain(bug.cc_detail.iter())
        .filter(|detail| !detail.real_name.is_empty())
        .map(|detail| (detail.login().to_string(), detail.real_name.clone()))
        .collect();

    let comments = comments
        .into_iter()
        .enumerate()
        .map(|(position, comment)| CommentRecord {
            index: comment.count.unwrap_or(position),
            author: account(&comment.creator, None, &names),
            created_at: comment.creation_time,
            text: comment.text,
            attachment_id: comment.attachment_id,
        })
        .collect();

    let resolution = optional(bug.resolution);
    BugRecord {
        bug_id: bug.id,
        title: bug.summary,
        reporter: account(&bug.creator, bug.creator_detail.as_ref(), &names),
        assignee: account(&bug.assigned_to, bug.assigned_to_detail.as_ref(), &names),
        status: bug.status,
        duplicate_of: bug.dupe_of.filter(|_| resolution.as_deref() == Some("DUPLICATE")),
        resolution,
        severity: bug.severity,
        priority: optional(bug.priority),
        component: bug.component,
        version: optional(bug.version),
        op_sys: optional(bug.op_sys),
        platform: optional(bug.platform),
        keywords: bug.keywords,
        groups: bug.groups,
        created_at: bug.creation_time,
        modified_at: bug.last_change_time,
        target_milestone: Some(bug.target_milestone).filter(|m| !m.trim().is_empty()),
        depends_on: bug.depends_on,
        blocks: bug.blocks,
        see_also: bug.see_also,
        comments,
        attachments,
    }
}

impl SourceTracker for BugzillaClient {
    fn read_bug(&self, bug_id: u64) -> StoreResult<BugRecord> {
        let path = format!("/rest/bug/{bug_id}");
        let envelope: BugsEnvelope = self.get_json(&path, &[])?;
        let bug = envelope
            .bugs
            .into_iter()
            .find(|bug| bug.id == bug_id)
            .ok_or_else(|| StoreError::NotFound {
                what: format!("bug {bug_id}"),
            })?;

        let comments = self.comments(bug_id)?;
        let url = self.url(&format!("{path}/attachment"));
        let attachments = self
            .attachments(bug_id)?
            .into_iter()
            .map(|raw| convert_attachment(&url, raw))
            .collect::<StoreResult<Vec<_>>>()?;
        debug!(bug_id, comments = comments.len(), attachments = attachments.len(), "read bug");

        Ok(assemble(bug, comments, attachments))
    }

    fn close_bug(
        &self,
        bug_id: u64,
        status: &str,
        resolution: &str,
        comment: &str,
    ) -> StoreResult<()> {
        let url = self.url(&format!("/rest/bug/{bug_id}"));
        self.authorized(self.agent.put(&url))
            .send_json(json!({
                "status": status,
                "resolution": resolution,
                "comment": { "body": comment },
            }))
            .map_err(|err| http_error("PUT", &url, err))?;
        info!(bug_id, status, resolution, "closed source bug");
        Ok(())
    }
}

/// Write one bug id per line.
pub fn save_bug_list(path: &Path, bug_ids: &[u64]) -> Result<()> {
    let mut content = String::with_capacity(bug_ids.len() * 8);
    for bug_id in bug_ids {
        content.push_str(&bug_id.to_string());
        content.push('\n');
    }
    std::fs::write(path, content)
        .with_context(|| format!("failed to write bug list {}", path.display()))
}

/// Read a bug list; blank lines and `#` comments are skipped.
pub fn load_bug_list(path: &Path) -> Result<Vec<u64>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bug list {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .map(|(number, line)| (number + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            line.parse::<u64>().with_context(|| {
                format!("{}:{number}: '{line}' is not a bug id", path.display())
            })
        })
        .collect()
}
