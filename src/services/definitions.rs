//! Trigger and condition definitions
//!
//! The definitions store is owned by the alerting engine. This crate only
//! reads it and listens for change notifications.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{Condition, Trigger};

/// Kinds of definitions change a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TriggerCreate,
    TriggerUpdate,
    TriggerRemove,
}

/// A definitions change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionsEvent {
    pub event_type: EventType,
    pub tenant_id: String,
    pub trigger_id: String,
}

/// Read access to trigger definitions plus change notifications
///
/// Notifications are delivered asynchronously and at least once, with no
/// ordering guarantee across triggers.
#[async_trait]
pub trait DefinitionsService: Send + Sync + 'static {
    /// All triggers carrying the `(category, name)` tag, enabled or not
    async fn triggers_by_tag(
        &self,
        category: &str,
        name: &str,
    ) -> Result<Vec<Trigger>, DefinitionsError>;

    /// The condition set of one trigger
    async fn conditions_for(
        &self,
        tenant_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Condition>, DefinitionsError>;

    /// Register for change events of the given types.
    ///
    /// At most `buffer` events are queued; when the queue is full further
    /// events are dropped, since a queued event already guarantees the
    /// listener will look at the current definitions again.
    fn subscribe(&self, event_types: &[EventType], buffer: usize)
        -> mpsc::Receiver<DefinitionsEvent>;
}

/// Definitions store errors
#[derive(Debug, thiserror::Error)]
pub enum DefinitionsError {
    #[error("Definitions unavailable: {0}")]
    Unavailable(String),

    #[error("Trigger not found: {tenant_id}/{trigger_id}")]
    TriggerNotFound {
        tenant_id: String,
        trigger_id: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid definitions: {0}")]
    Json(#[from] serde_json::Error),
}

/// One trigger and its condition set, as stored and as loaded from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

struct Listener {
    event_types: Vec<EventType>,
    tx: mpsc::Sender<DefinitionsEvent>,
}

/// In-memory definitions store
pub struct InMemoryDefinitions {
    /// Definitions keyed by (tenant, trigger id)
    definitions: RwLock<HashMap<(String, String), TriggerDefinition>>,
    listeners: Mutex<Vec<Listener>>,
}

impl InMemoryDefinitions {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Build a store from a JSON array of trigger definitions
    pub fn from_json(json: &str) -> Result<Self, DefinitionsError> {
        let loaded: Vec<TriggerDefinition> = serde_json::from_str(json)?;
        let store = Self::new();
        {
            let mut definitions = store.definitions.write();
            for def in loaded {
                let key = (def.trigger.tenant_id.clone(), def.trigger.id.clone());
                definitions.insert(key, def);
            }
        }
        Ok(store)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionsError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Insert or replace a trigger together with its conditions
    pub fn put_trigger(&self, trigger: Trigger, conditions: Vec<Condition>) {
        let key = (trigger.tenant_id.clone(), trigger.id.clone());
        let existed = {
            let mut definitions = self.definitions.write();
            definitions
                .insert(key.clone(), TriggerDefinition { trigger, conditions })
                .is_some()
        };
        let event_type = if existed {
            EventType::TriggerUpdate
        } else {
            EventType::TriggerCreate
        };
        self.notify(event_type, key.0, key.1);
    }

    /// Replace a trigger's condition set
    pub fn set_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        conditions: Vec<Condition>,
    ) -> Result<(), DefinitionsError> {
        {
            let mut definitions = self.definitions.write();
            let def = definitions
                .get_mut(&(tenant_id.to_string(), trigger_id.to_string()))
                .ok_or_else(|| not_found(tenant_id, trigger_id))?;
            def.conditions = conditions;
        }
        self.notify(
            EventType::TriggerUpdate,
            tenant_id.to_string(),
            trigger_id.to_string(),
        );
        Ok(())
    }

    /// Enable or disable a trigger
    pub fn set_enabled(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        enabled: bool,
    ) -> Result<(), DefinitionsError> {
        {
            let mut definitions = self.definitions.write();
            let def = definitions
                .get_mut(&(tenant_id.to_string(), trigger_id.to_string()))
                .ok_or_else(|| not_found(tenant_id, trigger_id))?;
            def.trigger.enabled = enabled;
        }
        self.notify(
            EventType::TriggerUpdate,
            tenant_id.to_string(),
            trigger_id.to_string(),
        );
        Ok(())
    }

    /// Remove a trigger and its conditions
    pub fn remove_trigger(&self, tenant_id: &str, trigger_id: &str) -> Option<TriggerDefinition> {
        let removed = {
            let mut definitions = self.definitions.write();
            definitions.remove(&(tenant_id.to_string(), trigger_id.to_string()))
        };
        if removed.is_some() {
            self.notify(
                EventType::TriggerRemove,
                tenant_id.to_string(),
                trigger_id.to_string(),
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }

    fn notify(&self, event_type: EventType, tenant_id: String, trigger_id: String) {
        let event = DefinitionsEvent {
            event_type,
            tenant_id,
            trigger_id,
        };
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| {
            if !listener.event_types.contains(&event.event_type) {
                return !listener.tx.is_closed();
            }
            match listener.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(
                        trigger_id = %event.trigger_id,
                        "Listener queue full, change already pending"
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

fn not_found(tenant_id: &str, trigger_id: &str) -> DefinitionsError {
    DefinitionsError::TriggerNotFound {
        tenant_id: tenant_id.to_string(),
        trigger_id: trigger_id.to_string(),
    }
}

impl Default for InMemoryDefinitions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DefinitionsService for InMemoryDefinitions {
    async fn triggers_by_tag(
        &self,
        category: &str,
        name: &str,
    ) -> Result<Vec<Trigger>, DefinitionsError> {
        let definitions = self.definitions.read();
        Ok(definitions
            .values()
            .filter(|def| def.trigger.has_tag(category, name))
            .map(|def| def.trigger.clone())
            .collect())
    }

    async fn conditions_for(
        &self,
        tenant_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Condition>, DefinitionsError> {
        let definitions = self.definitions.read();
        definitions
            .get(&(tenant_id.to_string(), trigger_id.to_string()))
            .map(|def| def.conditions.clone())
            .ok_or_else(|| not_found(tenant_id, trigger_id))
    }

    fn subscribe(
        &self,
        event_types: &[EventType],
        buffer: usize,
    ) -> mpsc::Receiver<DefinitionsEvent> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.listeners.lock().push(Listener {
            event_types: event_types.to_vec(),
            tx,
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExternalCondition;
    use std::io::Write;

    fn tagged(id: &str) -> Trigger {
        Trigger::new("tenant-a", id).with_tag("HawkularMetrics", "MetricsCondition")
    }

    #[tokio::test]
    async fn test_triggers_by_tag_filters() {
        let defs = InMemoryDefinitions::new();
        defs.put_trigger(tagged("t1"), vec![]);
        defs.put_trigger(Trigger::new("tenant-a", "t2"), vec![]);
        defs.put_trigger(tagged("t3").with_enabled(false), vec![]);

        let mut ids: Vec<String> = defs
            .triggers_by_tag("HawkularMetrics", "MetricsCondition")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["t1", "t3"]);
    }

    #[tokio::test]
    async fn test_conditions_for_unknown_trigger() {
        let defs = InMemoryDefinitions::new();
        let err = defs.conditions_for("tenant-a", "missing").await.unwrap_err();
        assert!(matches!(err, DefinitionsError::TriggerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_subscribe_receives_selected_events() {
        let defs = InMemoryDefinitions::new();
        let mut rx = defs.subscribe(&[EventType::TriggerUpdate, EventType::TriggerRemove], 8);

        defs.put_trigger(tagged("t1"), vec![]);
        defs.set_enabled("tenant-a", "t1", false).unwrap();
        defs.remove_trigger("tenant-a", "t1");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::TriggerUpdate);
        assert_eq!(first.trigger_id, "t1");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type, EventType::TriggerRemove);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_listener_queue_drops_events() {
        let defs = InMemoryDefinitions::new();
        let mut rx = defs.subscribe(&[EventType::TriggerCreate], 1);

        defs.put_trigger(tagged("t1"), vec![]);
        defs.put_trigger(tagged("t2"), vec![]);

        assert_eq!(rx.recv().await.unwrap().trigger_id, "t1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_listener_is_dropped() {
        let defs = InMemoryDefinitions::new();
        let rx = defs.subscribe(&[EventType::TriggerCreate], 4);
        drop(rx);

        defs.put_trigger(tagged("t1"), vec![]);
        assert!(defs.listeners.lock().is_empty());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let cond = ExternalCondition::new(
            "tenant-a",
            "t1",
            "MetricsCondition",
            "d1",
            "avg(m1) over 60s > 10.0 every 1m",
        );
        let json = serde_json::to_string(&vec![TriggerDefinition {
            trigger: tagged("t1"),
            conditions: vec![cond.clone().into()],
        }])
        .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let defs = InMemoryDefinitions::from_file(file.path()).unwrap();
        assert_eq!(defs.len(), 1);
        let conditions = defs.conditions_for("tenant-a", "t1").await.unwrap();
        assert_eq!(conditions, vec![Condition::External(cond)]);
    }
}
