//! Trigger definitions

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A `(category, name)` tag attached to a trigger
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub category: String,
    pub name: String,
}

impl Tag {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }
}

/// Alerting rule owning one or more conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Owning tenant
    pub tenant_id: String,
    /// Trigger ID, unique within the tenant
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Disabled triggers never have their conditions evaluated
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
}

fn default_enabled() -> bool {
    true
}

impl Trigger {
    /// Create an enabled, untagged trigger
    pub fn new(tenant_id: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            tenant_id: tenant_id.into(),
            name: id.clone(),
            id,
            enabled: true,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_tag(mut self, category: impl Into<String>, name: impl Into<String>) -> Self {
        self.tags.insert(Tag::new(category, name));
        self
    }

    /// Whether the trigger carries the given tag
    pub fn has_tag(&self, category: &str, name: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.category == category && t.name == name)
    }
}
