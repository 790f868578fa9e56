//! Destination wrapper for rehearsal runs: reads go to the real store,
//! writes are logged and answered with placeholders.

use std::cell::{Cell, RefCell};

use bugferry_core::model::{Comment, Issue};
use bugferry_core::store::{
    AccessLevel, CreatedIssue, DestinationStore, Membership, Milestone, StoreResult, UploadedFile,
};
use tracing::info;

pub struct DryRunStore<'a> {
    inner: &'a dyn DestinationStore,
    next_id: Cell<u64>,
    writes: RefCell<Vec<String>>,
}

impl<'a> DryRunStore<'a> {
    pub fn new(inner: &'a dyn DestinationStore) -> Self {
        Self {
            inner,
            next_id: Cell::new(1),
            writes: RefCell::default(),
        }
    }

    /// Writes that were suppressed, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.borrow().clone()
    }

    fn suppress(&self, write: String) -> u64 {
        info!(write = %write, "dry run: skipped write");
        self.writes.borrow_mut().push(write);
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

impl DestinationStore for DryRunStore<'_> {
    fn create_issue(&self, container: u64, issue: &Issue) -> StoreResult<CreatedIssue> {
        let placeholder = self.suppress(format!(
            "create issue '{}' in {container} as {}",
            issue.title, issue.sudo
        ));
        let iid = issue.source_iid.unwrap_or(placeholder);
        Ok(CreatedIssue {
            iid,
            web_url: format!("dry-run://projects/{container}/issues/{iid}"),
        })
    }

    fn create_comment(
        &self,
        container: u64,
        issue_iid: u64,
        comment: &Comment,
    ) -> StoreResult<u64> {
        Ok(self.suppress(format!(
            "comment on {container}#{issue_iid} as {}",
            comment.sudo
        )))
    }

    fn close_issue(&self, container: u64, issue_iid: u64, sudo: &str) -> StoreResult<()> {
        self.suppress(format!("close {container}#{issue_iid} as {sudo}"));
        Ok(())
    }

    fn upload(&self, container: u64, filename: &str, bytes: &[u8]) -> StoreResult<UploadedFile> {
        let id = self.suppress(format!(
            "upload '{filename}' ({} bytes) to {container}",
            bytes.len()
        ));
        let url = format!("/uploads/dry-run-{id}/{filename}");
        Ok(UploadedFile {
            markdown: format!("[{filename}]({url})"),
            url,
        })
    }

    fn list_milestones(&self, container: u64) -> StoreResult<Vec<Milestone>> {
        self.inner.list_milestones(container)
    }

    fn create_milestone(&self, container: u64, title: &str) -> StoreResult<Milestone> {
        let id = self.suppress(format!("create milestone '{title}' in {container}"));
        Ok(Milestone {
            id,
            title: title.to_string(),
        })
    }

    fn get_membership(&self, container: u64, account_id: u64) -> StoreResult<Option<Membership>> {
        self.inner.get_membership(container, account_id)
    }

    fn grant_membership(
        &self,
        container: u64,
        account_id: u64,
        level: AccessLevel,
    ) -> StoreResult<()> {
        self.suppress(format!("grant {level} on {container} to {account_id}"));
        Ok(())
    }

    fn set_membership_role(
        &self,
        container: u64,
        account_id: u64,
        level: u32,
    ) -> StoreResult<()> {
        self.suppress(format!("set {account_id} to level {level} on {container}"));
        Ok(())
    }

    fn remove_membership(&self, container: u64, account_id: u64) -> StoreResult<()> {
        self.suppress(format!("remove {account_id} from {container}"));
        Ok(())
    }
}
