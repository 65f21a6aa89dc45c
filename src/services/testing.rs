//! Test doubles for the collaborator traits

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::alerts::{AlertsError, AlertsService};
use super::definitions::{
    DefinitionsError, DefinitionsEvent, DefinitionsService, EventType, InMemoryDefinitions,
};
use super::metrics::{Aggregate, MetricsError, MetricsService};
use crate::expression::Func;
use crate::model::{Condition, Data, Trigger};

/// Alert sink recording everything it is sent
#[derive(Default)]
pub struct RecordingAlerts {
    sent: Mutex<Vec<Data>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    pub fn sent(&self) -> Vec<Data> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertsService for RecordingAlerts {
    async fn send_data(&self, data: Data) -> Result<(), AlertsError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AlertsError::Unavailable("ingestion down".to_string()));
        }
        self.sent.lock().push(data);
        Ok(())
    }
}

/// Metrics backend answering every query with the same result
pub struct StaticMetrics {
    result: Result<Aggregate, MetricsError>,
    delay: Duration,
    calls: Mutex<Vec<(Func, String, String, i64, i64)>>,
}

impl StaticMetrics {
    pub fn value(value: f64, timestamp: i64) -> Self {
        Self {
            result: Ok(Aggregate { value, timestamp }),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn error(error: MetricsError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<(Func, String, String, i64, i64)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl MetricsService for StaticMetrics {
    async fn aggregate(
        &self,
        func: Func,
        metric_id: &str,
        tenant_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Aggregate, MetricsError> {
        self.calls.lock().push((
            func,
            metric_id.to_string(),
            tenant_id.to_string(),
            start,
            end,
        ));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

/// Definitions store with switchable failures
#[derive(Default)]
pub struct FlakyDefinitions {
    pub inner: InMemoryDefinitions,
    fail_triggers: AtomicBool,
    failing_conditions: Mutex<HashSet<String>>,
}

impl FlakyDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `triggers_by_tag` fail until reset
    pub fn fail_trigger_fetch(&self, fail: bool) {
        self.fail_triggers.store(fail, Ordering::SeqCst);
    }

    /// Make `conditions_for` fail for one trigger until reset
    pub fn fail_conditions_for(&self, trigger_id: &str, fail: bool) {
        let mut failing = self.failing_conditions.lock();
        if fail {
            failing.insert(trigger_id.to_string());
        } else {
            failing.remove(trigger_id);
        }
    }
}

#[async_trait]
impl DefinitionsService for FlakyDefinitions {
    async fn triggers_by_tag(
        &self,
        category: &str,
        name: &str,
    ) -> Result<Vec<Trigger>, DefinitionsError> {
        if self.fail_triggers.load(Ordering::SeqCst) {
            return Err(DefinitionsError::Unavailable("store offline".to_string()));
        }
        self.inner.triggers_by_tag(category, name).await
    }

    async fn conditions_for(
        &self,
        tenant_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Condition>, DefinitionsError> {
        if self.failing_conditions.lock().contains(trigger_id) {
            return Err(DefinitionsError::Unavailable(format!(
                "conditions of {} unavailable",
                trigger_id
            )));
        }
        self.inner.conditions_for(tenant_id, trigger_id).await
    }

    fn subscribe(
        &self,
        event_types: &[EventType],
        buffer: usize,
    ) -> mpsc::Receiver<DefinitionsEvent> {
        self.inner.subscribe(event_types, buffer)
    }
}
