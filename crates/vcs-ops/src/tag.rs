//! Tags, tag change notification and tag enumeration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VcsError};
use crate::resource::ResourcePath;
use crate::workspace::Workspace;

/// Kind of a tag. Variant order is the presentation order of a tag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Branch,
    Version,
    Date,
    Head,
}

/// A symbolic name for a set of revisions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    kind: TagKind,
    name: String,
}

impl Tag {
    pub const HEAD: &'static str = "HEAD";
    const DATE_FORMAT: &'static str = "%d %b %Y %H:%M:%S -0000";

    pub fn head() -> Self {
        Self {
            kind: TagKind::Head,
            name: Self::HEAD.to_string(),
        }
    }

    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            kind: TagKind::Branch,
            name: name.into(),
        }
    }

    pub fn version(name: impl Into<String>) -> Self {
        Self {
            kind: TagKind::Version,
            name: name.into(),
        }
    }

    /// Date tag from its textual protocol form
    pub fn date(text: impl Into<String>) -> Self {
        Self {
            kind: TagKind::Date,
            name: text.into(),
        }
    }

    /// Date tag for a point in time, formatted the way the server expects
    pub fn from_datetime(when: DateTime<Utc>) -> Self {
        Self::date(when.format(Self::DATE_FORMAT).to_string())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    /// Check that a branch or version name can be sent to the server.
    ///
    /// Names start with a letter and contain only letters, digits, `-` and `_`.
    pub fn validate_name(name: &str) -> Result<()> {
        let mut chars = name.chars();
        match chars.next() {
            None => return Err(VcsError::Validation("Tag name must not be empty".into())),
            Some(first) if !first.is_ascii_alphabetic() => {
                return Err(VcsError::Validation(format!(
                    "Tag name '{}' must start with a letter",
                    name
                )));
            }
            Some(_) => {}
        }
        if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
            return Err(VcsError::Validation(format!(
                "Tag name '{}' contains invalid character '{}'",
                name, bad
            )));
        }
        if name == Self::HEAD || name == "BASE" {
            return Err(VcsError::Validation(format!("'{}' is a reserved tag name", name)));
        }
        Ok(())
    }

    /// Validate this tag for use as a tag command argument
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            TagKind::Branch | TagKind::Version => Self::validate_name(&self.name),
            TagKind::Date => {
                if self.name.trim().is_empty() {
                    Err(VcsError::Validation("Date tag must not be empty".into()))
                } else {
                    Ok(())
                }
            }
            TagKind::Head => Ok(()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Receives notification of tags created or removed by tag operations
pub trait TagListener: Send + Sync {
    fn tags_changed(&self, project: &ResourcePath, added: &[Tag], removed: &[Tag]);
}

/// Registry of [`TagListener`]s, cheap to clone
#[derive(Clone, Default)]
pub struct TagNotifier {
    listeners: Arc<RwLock<Vec<Arc<dyn TagListener>>>>,
}

impl TagNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn TagListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn notify(&self, project: &ResourcePath, added: &[Tag], removed: &[Tag]) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        tracing::debug!(
            "Notifying {} tag listener(s) for {}: +{} -{}",
            listeners.len(),
            project,
            added.len(),
            removed.len()
        );
        for listener in listeners {
            listener.tags_changed(project, added, removed);
        }
    }
}

impl fmt::Debug for TagNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.listeners.read().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("TagNotifier").field("listeners", &count).finish()
    }
}

/// Known tags per project, kept current from tag notifications
#[derive(Debug, Default)]
pub struct TagCache {
    tags: RwLock<BTreeMap<ResourcePath, BTreeSet<Tag>>>,
}

impl TagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, project: &ResourcePath, tags: impl IntoIterator<Item = Tag>) {
        if let Ok(mut cache) = self.tags.write() {
            cache.entry(project.clone()).or_default().extend(tags);
        }
    }

    pub fn known_tags(&self, project: &ResourcePath) -> Vec<Tag> {
        self.tags
            .read()
            .ok()
            .and_then(|cache| cache.get(project).map(|tags| tags.iter().cloned().collect()))
            .unwrap_or_default()
    }
}

impl TagListener for TagCache {
    fn tags_changed(&self, project: &ResourcePath, added: &[Tag], removed: &[Tag]) {
        if let Ok(mut cache) = self.tags.write() {
            let known = cache.entry(project.clone()).or_default();
            for tag in removed {
                known.remove(tag);
            }
            known.extend(added.iter().cloned());
        }
    }
}

/// Enumerates the tags relevant to a set of resources
pub struct TagSource {
    workspace: Arc<dyn Workspace>,
    cache: Arc<TagCache>,
}

impl TagSource {
    pub fn new(workspace: Arc<dyn Workspace>, cache: Arc<TagCache>) -> Self {
        Self { workspace, cache }
    }

    /// Sticky tags of the resources plus the cached tags of their projects,
    /// deduplicated and ordered branches, versions, dates.
    pub fn tags(&self, resources: &[ResourcePath]) -> Vec<Tag> {
        let mut tags = BTreeSet::new();
        let mut projects = BTreeSet::new();
        for path in resources {
            if let Some(tag) = self.workspace.sticky_tag(path) {
                tags.insert(tag);
            }
            if let Some(project) = path.project() {
                projects.insert(project);
            }
        }
        for project in &projects {
            tags.extend(self.cache.known_tags(project));
        }
        tags.into_iter().filter(|t| t.kind() != TagKind::Head).collect()
    }

    /// Tags of one kind only
    pub fn tags_of_kind(&self, resources: &[ResourcePath], kind: TagKind) -> Vec<Tag> {
        self.tags(resources)
            .into_iter()
            .filter(|t| t.kind() == kind)
            .collect()
    }
}
