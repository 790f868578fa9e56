//! Sequential batch migration.
//!
//! For each bug: read and validate, build the issue, persist it as the
//! reporter, persist the remaining comments as their authors, close the
//! issue when the source state is closed, then optionally close the source
//! bug with a back-reference. The first failing bug aborts the batch.

use serde::Serialize;
use tracing::{info, instrument};

use crate::attachment::AttachmentRelocator;
use crate::config::MigrationConfig;
use crate::elevation::Elevator;
use crate::error::{MigrationError, Result};
use crate::identity::IdentityResolver;
use crate::lock::ElevationLocks;
use crate::rewrite::RewritePipeline;
use crate::store::{DestinationStore, IdentityDirectory, MappingStore, SourceTracker};
use crate::taxonomy::MilestoneCache;
use crate::transform::{BuildContext, build_comment, build_issue};

/// What happened to one migrated bug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BugOutcome {
    pub bug_id: u64,
    pub issue_iid: u64,
    pub web_url: String,
    pub comments: usize,
    /// Source comments with neither text nor attachment.
    pub skipped_comments: usize,
    pub closed: bool,
    pub source_closed: bool,
}

/// Result of a successful batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub bugs: Vec<BugOutcome>,
    /// Source logins credited to the fallback account, for operator review.
    pub fallback_identities: Vec<String>,
}

/// Migrates bugs from one source tracker into one destination container.
pub struct Migrator<'a> {
    config: &'a MigrationConfig,
    container: u64,
    source: &'a dyn SourceTracker,
    destination: &'a dyn DestinationStore,
    directory: &'a dyn IdentityDirectory,
    mappings: &'a dyn MappingStore,
    elevator: Elevator,
    pipeline: RewritePipeline,
    identities: IdentityResolver,
    milestones: MilestoneCache,
}

impl<'a> Migrator<'a> {
    /// Load persisted user mappings and seed the milestone cache.
    pub fn new(
        config: &'a MigrationConfig,
        container: u64,
        source: &'a dyn SourceTracker,
        destination: &'a dyn DestinationStore,
        directory: &'a dyn IdentityDirectory,
        mappings: &'a dyn MappingStore,
        locks: ElevationLocks,
    ) -> Result<Self> {
        let known = mappings.load()?;
        info!(count = known.len(), "loaded user mappings");

        let mut milestones = MilestoneCache::new(config);
        milestones.seed(destination, container)?;

        Ok(Self {
            config,
            container,
            source,
            destination,
            directory,
            mappings,
            elevator: Elevator::new(config, locks),
            pipeline: RewritePipeline::from_config(config),
            identities: IdentityResolver::new(config, known),
            milestones,
        })
    }

    /// Migrate `bug_ids` in order, stopping at the first failure.
    pub fn migrate(&mut self, bug_ids: &[u64]) -> Result<MigrationReport> {
        if bug_ids.is_empty() {
            return Err(MigrationError::Validation {
                entity: "batch",
                field: "bug_ids",
            });
        }

        let mut report = MigrationReport::default();
        for (position, bug_id) in bug_ids.iter().copied().enumerate() {
            info!(bug_id, position = position + 1, total = bug_ids.len(), "migrating bug");
            let outcome = self.migrate_one(bug_id).map_err(|err| err.for_bug(bug_id))?;
            report.bugs.push(outcome);
        }

        report.fallback_identities = self.identities.fallback_hits().to_vec();
        info!(
            migrated = report.bugs.len(),
            fallback = report.fallback_identities.len(),
            "batch complete"
        );
        Ok(report)
    }

    /// Migrate a single bug.
    #[instrument(skip(self), fields(container = self.container))]
    pub fn migrate_one(&mut self, bug_id: u64) -> Result<BugOutcome> {
        let bug = self.source.read_bug(bug_id)?;
        bug.validate()?;

        let mut attachments = AttachmentRelocator::new(self.container);

        let draft = build_issue(
            &mut BuildContext {
                config: self.config,
                container: self.container,
                destination: self.destination,
                directory: self.directory,
                mappings: self.mappings,
                identities: &mut self.identities,
                milestones: &mut self.milestones,
                attachments: &mut attachments,
                pipeline: &self.pipeline,
            },
            &bug,
        )?;

        let created = self.elevator.with_elevation(
            self.destination,
            self.container,
            &draft.reporter.account,
            || Ok(self.destination.create_issue(self.container, &draft.issue)?),
        )?;
        info!(iid = created.iid, url = %created.web_url, "created issue");

        let mut comments = 0;
        let mut skipped_comments = 0;
        for record in draft
            .remaining
            .iter()
            .filter_map(|position| bug.comments.get(*position))
        {
            let built = build_comment(
                &mut BuildContext {
                    config: self.config,
                    container: self.container,
                    destination: self.destination,
                    directory: self.directory,
                    mappings: self.mappings,
                    identities: &mut self.identities,
                    milestones: &mut self.milestones,
                    attachments: &mut attachments,
                    pipeline: &self.pipeline,
                },
                &bug,
                record,
            )?;
            let Some(mut built) = built else {
                skipped_comments += 1;
                continue;
            };

            built.comment.issue_iid = Some(created.iid);
            built.comment.validate()?;
            let note = self.elevator.with_elevation(
                self.destination,
                self.container,
                &built.author.account,
                || {
                    Ok(self
                        .destination
                        .create_comment(self.container, created.iid, &built.comment)?)
                },
            )?;
            info!(index = record.index, note, author = %built.author.account.username, "created comment");
            comments += 1;
        }

        if draft.close_after {
            self.elevator.with_elevation(
                self.destination,
                self.container,
                &draft.reporter.account,
                || {
                    Ok(self.destination.close_issue(
                        self.container,
                        created.iid,
                        &draft.issue.sudo,
                    )?)
                },
            )?;
            info!(iid = created.iid, status = %bug.status, "closed issue");
        }

        let source_closed = self.config.close_bugzilla_bugs;
        if source_closed {
            let note = format!("This bug has been migrated to {}", created.web_url);
            self.source.close_bug(
                bug_id,
                &self.config.bugzilla_close_status,
                &self.config.bugzilla_close_resolution,
                &note,
            )?;
            info!(
                status = %self.config.bugzilla_close_status,
                resolution = %self.config.bugzilla_close_resolution,
                "closed source bug"
            );
        }

        Ok(BugOutcome {
            bug_id,
            issue_iid: created.iid,
            web_url: created.web_url,
            comments,
            skipped_comments,
            closed: draft.close_after,
            source_closed,
        })
    }

    /// Source logins credited to the fallback account so far.
    #[must_use]
    pub fn fallback_identities(&self) -> &[String] {
        self.identities.fallback_hits()
    }
}
