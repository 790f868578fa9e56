//! Labels and milestones derived from bug metadata.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::model::BugRecord;
use crate::store::DestinationStore;

/// Operating system value that carries no information.
const OS_OTHER: &str = "Other";

/// Builds the ordered, de-duplicated label list for a bug.
#[derive(Debug, Clone, Copy)]
pub struct LabelMapper<'a> {
    config: &'a MigrationConfig,
}

impl<'a> LabelMapper<'a> {
    #[must_use]
    pub const fn new(config: &'a MigrationConfig) -> Self {
        Self { config }
    }

    /// Default labels, then component, operating system, keywords and
    /// severity, in that order.
    pub fn labels_for(&self, bug: &BugRecord) -> Result<Vec<String>> {
        let config = self.config;
        let mut labels = Vec::new();

        for label in &config.default_gitlab_labels {
            push_unique(&mut labels, label);
        }

        let component = bug.component.trim();
        if !component.is_empty() {
            match config.component_mappings.get(component) {
                Some(mapped) => push_unique(&mut labels, mapped),
                None if config.component_mapping_auto => push_unique(&mut labels, component),
                None => {
                    return Err(MigrationError::UnmappedComponent {
                        component: component.to_string(),
                    });
                }
            }
        }

        if config.map_operating_system
            && let Some(os) = bug.op_sys.as_deref().map(str::trim)
            && os != OS_OTHER
        {
            push_unique(&mut labels, os);
        }

        if config.map_keywords {
            let keywords = bug
                .keywords
                .iter()
                .flat_map(|entry| entry.split(','))
                .map(str::trim)
                .filter(|keyword| !config.keywords_to_skip.iter().any(|skip| skip == keyword));
            for keyword in keywords {
                push_unique(&mut labels, keyword);
            }
        }

        if let Some(label) = self.severity_label(&bug.severity) {
            debug!(severity = %bug.severity, label, "mapped severity to label");
            push_unique(&mut labels, label);
        }

        Ok(labels)
    }

    fn severity_label<'s>(&'s self, severity: &'s str) -> Option<&'s str> {
        let severity = severity.trim();
        let configured = match severity {
            "critical" => self.config.severity_critical_label.as_deref(),
            "blocker" => self.config.severity_blocker_label.as_deref(),
            _ => return None,
        };
        Some(configured.filter(|label| !label.trim().is_empty()).unwrap_or(severity))
    }
}

fn push_unique(labels: &mut Vec<String>, label: &str) {
    let label = label.trim();
    if !label.is_empty() && !labels.iter().any(|existing| existing == label) {
        labels.push(label.to_string());
    }
}

/// Milestone title → destination id, seeded from the destination and
/// extended as new milestones are created.
#[derive(Debug, Default)]
pub struct MilestoneCache {
    enabled: bool,
    skip: Vec<String>,
    ids: HashMap<String, u64>,
}

impl MilestoneCache {
    #[must_use]
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            enabled: config.map_milestones,
            skip: config.milestones_to_skip.clone(),
            ids: HashMap::new(),
        }
    }

    /// Load the container's existing milestones. A no-op when milestone
    /// mapping is disabled.
    pub fn seed<S>(&mut self, store: &S, container: u64) -> Result<()>
    where
        S: DestinationStore + ?Sized,
    {
        if !self.enabled {
            return Ok(());
        }
        let milestones = store.list_milestones(container)?;
        info!(container, count = milestones.len(), "loaded milestone cache");
        self.ids
            .extend(milestones.into_iter().map(|milestone| (milestone.title, milestone.id)));
        Ok(())
    }

    /// Id for `title`, creating the milestone on first use.
    pub fn resolve<S>(&mut self, store: &S, container: u64, title: &str) -> Result<Option<u64>>
    where
        S: DestinationStore + ?Sized,
    {
        let title = title.trim();
        if !self.enabled || title.is_empty() || self.skip.iter().any(|skip| skip == title) {
            return Ok(None);
        }
        if let Some(id) = self.ids.get(title) {
            return Ok(Some(*id));
        }

        let created = store.create_milestone(container, title)?;
        info!(container, title, id = created.id, "created milestone");
        self.ids.insert(title.to_string(), created.id);
        Ok(Some(created.id))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ids.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
