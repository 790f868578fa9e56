//! In-memory collaborators for engine tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bugferry_core::config::MigrationConfig;
use bugferry_core::lock::ElevationLocks;
use bugferry_core::model::{
    AttachmentRecord, BugRecord, Comment, CommentRecord, Issue, SourceAccount,
};
use bugferry_core::store::{
    AccessLevel, CreatedIssue, DestinationAccount, DestinationStore, IdentityDirectory,
    MappingStore, Membership, Milestone, SourceTracker, StoreError, StoreResult, UploadedFile,
};
use chrono::{DateTime, FixedOffset};

pub const CONTAINER: u64 = 77;
pub const SOURCE: &str = "https://bugs.example.org";

pub fn ts(raw: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(raw).expect("timestamp")
}

pub fn config() -> MigrationConfig {
    let mut config = MigrationConfig::new(SOURCE);
    config
        .component_mappings
        .insert("UI".to_string(), "ui".to_string());
    config.gitlab_service_user = Some("migrator".to_string());
    config
}

pub fn locks(dir: &tempfile::TempDir) -> ElevationLocks {
    ElevationLocks::new(dir.path().join("locks"), Duration::from_millis(500))
}

pub fn comment(index: usize, login: &str, text: &str) -> CommentRecord {
    CommentRecord {
        index,
        author: SourceAccount::new(login, ""),
        created_at: ts("2019-05-02T09:30:00+00:00"),
        text: text.to_string(),
        attachment_id: None,
    }
}

pub fn attachment(id: u64, filename: &str, mime_type: &str) -> AttachmentRecord {
    AttachmentRecord {
        id,
        filename: filename.to_string(),
        mime_type: mime_type.to_string(),
        description: filename.to_string(),
        is_obsolete: false,
        data: Some(b"payload".to_vec()),
    }
}

/// Bug 42 from alice, resolved, component UI, one descriptive comment.
pub fn bug_42() -> BugRecord {
    BugRecord {
        bug_id: 42,
        title: "Toolbar icons are blurry".to_string(),
        reporter: SourceAccount::new("alice@x", "Alice"),
        assignee: SourceAccount::new("bob@x", "Bob"),
        status: "RESOLVED".to_string(),
        resolution: Some("FIXED".to_string()),
        duplicate_of: None,
        severity: "normal".to_string(),
        priority: Some("P2".to_string()),
        component: "UI".to_string(),
        version: None,
        op_sys: None,
        platform: None,
        keywords: Vec::new(),
        groups: Vec::new(),
        created_at: ts("2019-05-01T08:00:00+00:00"),
        modified_at: ts("2019-05-03T17:45:00+00:00"),
        target_milestone: None,
        depends_on: Vec::new(),
        blocks: Vec::new(),
        see_also: Vec::new(),
        comments: vec![comment(0, "alice@x", "desc text")],
        attachments: Vec::new(),
    }
}

#[derive(Default)]
pub struct FakeTracker {
    pub bugs: HashMap<u64, BugRecord>,
    pub closed: RefCell<Vec<(u64, String, String, String)>>,
}

impl FakeTracker {
    pub fn with(bugs: impl IntoIterator<Item = BugRecord>) -> Self {
        Self {
            bugs: bugs.into_iter().map(|bug| (bug.bug_id, bug)).collect(),
            closed: RefCell::default(),
        }
    }
}

impl SourceTracker for FakeTracker {
    fn read_bug(&self, bug_id: u64) -> StoreResult<BugRecord> {
        self.bugs.get(&bug_id).cloned().ok_or_else(|| StoreError::NotFound {
            what: format!("bug {bug_id}"),
        })
    }

    fn close_bug(
        &self,
        bug_id: u64,
        status: &str,
        resolution: &str,
        comment: &str,
    ) -> StoreResult<()> {
        self.closed.borrow_mut().push((
            bug_id,
            status.to_string(),
            resolution.to_string(),
            comment.to_string(),
        ));
        Ok(())
    }
}

/// Directory keyed by contact address.
#[derive(Default)]
pub struct FakeDirectory {
    pub by_contact: HashMap<String, Vec<DestinationAccount>>,
    pub by_username: HashMap<String, u64>,
    pub searches: Cell<usize>,
}

impl FakeDirectory {
    pub fn standard() -> Self {
        let mut directory = Self::default();
        directory.add("alice@x", 11, "alice");
        directory.add("bob@x", 12, "bob");
        directory.add("carol@x", 13, "carol");
        directory.by_username.insert("ghost".to_string(), 99);
        directory.by_username.insert("migrator".to_string(), 1);
        directory
    }

    pub fn add(&mut self, contact: &str, id: u64, username: &str) {
        self.by_contact
            .entry(contact.to_string())
            .or_default()
            .push(DestinationAccount {
                id,
                username: username.to_string(),
            });
        self.by_username.insert(username.to_string(), id);
    }
}

impl IdentityDirectory for FakeDirectory {
    fn search(&self, contact: &str) -> StoreResult<Vec<DestinationAccount>> {
        self.searches.set(self.searches.get() + 1);
        Ok(self.by_contact.get(contact).cloned().unwrap_or_default())
    }

    fn user_id(&self, username: &str) -> StoreResult<u64> {
        self.by_username
            .get(username)
            .copied()
            .ok_or_else(|| StoreError::NotFound {
                what: format!("user {username}"),
            })
    }
}

#[derive(Default)]
pub struct MemoryMappings {
    pub known: BTreeMap<String, String>,
    pub appended: RefCell<Vec<(String, String)>>,
}

impl MappingStore for MemoryMappings {
    fn load(&self) -> StoreResult<BTreeMap<String, String>> {
        Ok(self.known.clone())
    }

    fn append(&self, source: &str, username: &str) -> StoreResult<()> {
        self.appended
            .borrow_mut()
            .push((source.to_string(), username.to_string()));
        Ok(())
    }
}

/// Destination that enforces membership on attributed writes, the way
/// GitLab rejects impersonated writes by non-members.
pub struct FakeGitLab {
    /// username -> id, to check the `sudo` account's membership
    pub accounts: HashMap<String, u64>,
    pub members: RefCell<HashMap<u64, u32>>,
    pub issues: RefCell<Vec<Issue>>,
    pub comments: RefCell<Vec<(u64, Comment)>>,
    pub closed: RefCell<Vec<(u64, String)>>,
    pub uploads: RefCell<Vec<String>>,
    pub milestones: RefCell<Vec<Milestone>>,
    pub events: RefCell<Vec<String>>,
    pub fail_comments: Cell<bool>,
    pub fail_uploads: Cell<bool>,
}

impl FakeGitLab {
    pub fn new() -> Self {
        let directory = FakeDirectory::standard();
        let mut members = HashMap::new();
        members.insert(1, AccessLevel::Owner.as_level());
        Self {
            accounts: directory.by_username,
            members: RefCell::new(members),
            issues: RefCell::default(),
            comments: RefCell::default(),
            closed: RefCell::default(),
            uploads: RefCell::default(),
            milestones: RefCell::default(),
            events: RefCell::default(),
            fail_comments: Cell::new(false),
            fail_uploads: Cell::new(false),
        }
    }

    pub fn member_level(&self, account_id: u64) -> Option<u32> {
        self.members.borrow().get(&account_id).copied()
    }

    pub fn issue(&self, index: usize) -> Issue {
        self.issues.borrow()[index].clone()
    }

    fn event(&self, event: String) {
        self.events.borrow_mut().push(event);
    }

    fn authorize(&self, sudo: &str, action: &'static str) -> StoreResult<()> {
        let allowed = self
            .accounts
            .get(sudo)
            .and_then(|id| self.member_level(*id))
            .is_some_and(|level| level >= AccessLevel::Developer.as_level());
        if allowed {
            Ok(())
        } else {
            Err(StoreError::Http {
                method: "POST",
                url: format!("/projects/{CONTAINER}/{action}"),
                status: 403,
                body: format!("{sudo} may not write"),
            })
        }
    }
}

impl DestinationStore for FakeGitLab {
    fn create_issue(&self, container: u64, issue: &Issue) -> StoreResult<CreatedIssue> {
        assert_eq!(container, CONTAINER);
        self.authorize(&issue.sudo, "issues")?;
        let mut issues = self.issues.borrow_mut();
        let iid = issue.source_iid.unwrap_or(issues.len() as u64 + 1);
        let mut stored = issue.clone();
        stored.iid = Some(iid);
        issues.push(stored);
        self.event(format!("create_issue {}", issue.sudo));
        Ok(CreatedIssue {
            iid,
            web_url: format!("https://gitlab.example.org/group/app/-/issues/{iid}"),
        })
    }

    fn create_comment(&self, _: u64, issue_iid: u64, comment: &Comment) -> StoreResult<u64> {
        if self.fail_comments.get() {
            return Err(StoreError::Http {
                method: "POST",
                url: format!("/projects/{CONTAINER}/issues/{issue_iid}/notes"),
                status: 500,
                body: "internal error".to_string(),
            });
        }
        self.authorize(&comment.sudo, "notes")?;
        let mut comments = self.comments.borrow_mut();
        comments.push((issue_iid, comment.clone()));
        self.event(format!("create_comment {}", comment.sudo));
        Ok(comments.len() as u64 + 1000)
    }

    fn close_issue(&self, _: u64, issue_iid: u64, sudo: &str) -> StoreResult<()> {
        self.authorize(sudo, "issues")?;
        self.closed.borrow_mut().push((issue_iid, sudo.to_string()));
        self.event(format!("close_issue {sudo}"));
        Ok(())
    }

    fn upload(&self, container: u64, filename: &str, bytes: &[u8]) -> StoreResult<UploadedFile> {
        if self.fail_uploads.get() {
            return Err(StoreError::Http {
                method: "POST",
                url: format!("/projects/{container}/uploads"),
                status: 413,
                body: "too large".to_string(),
            });
        }
        assert!(!bytes.is_empty());
        let mut uploads = self.uploads.borrow_mut();
        uploads.push(filename.to_string());
        let url = format!("/uploads/{:04}/{filename}", uploads.len());
        Ok(UploadedFile {
            markdown: format!("[{filename}]({url})"),
            url,
        })
    }

    fn list_milestones(&self, _: u64) -> StoreResult<Vec<Milestone>> {
        Ok(self.milestones.borrow().clone())
    }

    fn create_milestone(&self, _: u64, title: &str) -> StoreResult<Milestone> {
        let mut milestones = self.milestones.borrow_mut();
        let milestone = Milestone {
            id: 500 + milestones.len() as u64,
            title: title.to_string(),
        };
        milestones.push(milestone.clone());
        self.event(format!("create_milestone {title}"));
        Ok(milestone)
    }

    fn get_membership(&self, _: u64, account_id: u64) -> StoreResult<Option<Membership>> {
        Ok(self.member_level(account_id).map(|access_level| Membership {
            user_id: account_id,
            access_level,
        }))
    }

    fn grant_membership(&self, _: u64, account_id: u64, level: AccessLevel) -> StoreResult<()> {
        self.members.borrow_mut().insert(account_id, level.as_level());
        self.event(format!("grant {account_id} {level}"));
        Ok(())
    }

    fn set_membership_role(&self, _: u64, account_id: u64, level: u32) -> StoreResult<()> {
        self.members.borrow_mut().insert(account_id, level);
        self.event(format!("set {account_id} {level}"));
        Ok(())
    }

    fn remove_membership(&self, _: u64, account_id: u64) -> StoreResult<()> {
        self.members.borrow_mut().remove(&account_id);
        self.event(format!("remove {account_id}"));
        Ok(())
    }
}
