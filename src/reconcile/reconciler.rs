//! Aligns running evaluation jobs with the current definitions

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::SentinelConfig;
use crate::evaluator::ExpressionRunner;
use crate::expression::{Expression, ParseError};
use crate::model::{Condition, ConditionKey, ExternalCondition, Trigger};
use crate::scheduler::{JobHandle, JobScheduler, ScheduleError};
use crate::services::{AlertsService, DefinitionsError, DefinitionsService, MetricsService};

/// A running job and the condition definition it was built from
struct ActiveJob {
    condition: ExternalCondition,
    handle: JobHandle,
}

/// What one reconciliation changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Newly scheduled conditions
    pub scheduled: Vec<ConditionKey>,
    /// Cancelled conditions, including those replaced by a changed definition
    pub cancelled: Vec<ConditionKey>,
    /// Desired conditions left running untouched
    pub unchanged: usize,
    /// Desired conditions that could not be started, with the reason
    pub skipped: Vec<(ConditionKey, String)>,
}

/// Owner of the condition → job table.
///
/// Reconciliations are serialized by the table lock, so overlapping
/// requests never interleave their mutations.
pub struct Reconciler {
    tag_category: String,
    tag_name: String,
    query_timeout: Duration,
    definitions: Arc<dyn DefinitionsService>,
    metrics: Arc<dyn MetricsService>,
    alerts: Arc<dyn AlertsService>,
    scheduler: Arc<JobScheduler>,
    active: Mutex<HashMap<ConditionKey, ActiveJob>>,
}

impl Reconciler {
    pub fn new(
        config: &SentinelConfig,
        definitions: Arc<dyn DefinitionsService>,
        metrics: Arc<dyn MetricsService>,
        alerts: Arc<dyn AlertsService>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            tag_category: config.tag_category.clone(),
            tag_name: config.tag_name.clone(),
            query_timeout: config.query_timeout,
            definitions,
            metrics,
            alerts,
            scheduler,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Recompute the desired condition set and start/cancel jobs to match it
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut active = self.active.lock().await;
        tracing::info!("Refreshing external metrics conditions");

        let triggers = self
            .definitions
            .triggers_by_tag(&self.tag_category, &self.tag_name)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    "Failed to fetch triggers for external metrics conditions"
                );
                ReconcileError::Fetch(e)
            })?;

        let mut desired: HashMap<ConditionKey, (Arc<Trigger>, ExternalCondition)> =
            HashMap::new();

        for trigger in triggers {
            if !trigger.enabled {
                continue;
            }
            let conditions = match self
                .definitions
                .conditions_for(&trigger.tenant_id, &trigger.id)
                .await
            {
                Ok(conditions) => conditions,
                Err(e) => {
                    tracing::error!(
                        tenant_id = %trigger.tenant_id,
                        trigger_id = %trigger.id,
                        error = %e,
                        "Failed to fetch conditions, skipping trigger"
                    );
                    continue;
                }
            };

            let trigger = Arc::new(trigger);
            for condition in conditions {
                let Condition::External(external) = condition else {
                    continue;
                };
                if external.system_id != self.tag_name {
                    continue;
                }
                desired.insert(external.key(), (Arc::clone(&trigger), external));
            }
        }

        let mut report = ReconcileReport::default();

        // Obsolete or redefined jobs go first so a key never has two live handles
        let obsolete: Vec<ConditionKey> = active
            .iter()
            .filter(|(key, job)| match desired.get(*key) {
                Some((_, condition)) => *condition != job.condition,
                None => true,
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in obsolete {
            if let Some(job) = active.remove(&key) {
                self.scheduler.cancel(&job.handle, true);
                tracing::info!(condition = %key, "Cancelled external metrics condition");
                report.cancelled.push(key);
            }
        }

        for (key, (trigger, condition)) in desired {
            if active.contains_key(&key) {
                report.unchanged += 1;
                continue;
            }
            match self.start_job(trigger, condition.clone()) {
                Ok(handle) => {
                    tracing::info!(
                        condition = %key,
                        expression = %condition.expression,
                        "Scheduled external metrics condition"
                    );
                    active.insert(key.clone(), ActiveJob { condition, handle });
                    report.scheduled.push(key);
                }
                Err(e) => {
                    tracing::error!(
                        condition = %key,
                        expression = %condition.expression,
                        error = %e,
                        "Failed to schedule external metrics condition"
                    );
                    report.skipped.push((key, e.to_string()));
                }
            }
        }

        report.scheduled.sort();
        report.cancelled.sort();
        report.skipped.sort_by(|a, b| a.0.cmp(&b.0));

        tracing::info!(
            active = active.len(),
            scheduled = report.scheduled.len(),
            cancelled = report.cancelled.len(),
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            "External metrics conditions refreshed"
        );
        Ok(report)
    }

    fn start_job(
        &self,
        trigger: Arc<Trigger>,
        condition: ExternalCondition,
    ) -> Result<JobHandle, StartError> {
        let expression: Expression = condition.expression.parse()?;
        let period = expression.interval();
        let runner = ExpressionRunner::new(
            Arc::clone(&self.metrics),
            Arc::clone(&self.alerts),
            trigger,
            condition,
            expression,
        )
        .with_query_timeout(self.query_timeout);

        Ok(self.scheduler.schedule(Arc::new(runner), period)?)
    }

    /// Keys of the conditions currently scheduled, sorted
    pub async fn active_keys(&self) -> Vec<ConditionKey> {
        let active = self.active.lock().await;
        let mut keys: Vec<ConditionKey> = active.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Cancel every job and stop the scheduler
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        for (_, job) in active.drain() {
            self.scheduler.cancel(&job.handle, true);
        }
        drop(active);
        self.scheduler.shutdown().await;
    }
}

/// Reconciliation errors; only a failed trigger fetch aborts a cycle
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Failed to fetch triggers: {0}")]
    Fetch(#[from] DefinitionsError),
}

/// Why a desired condition could not be started
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Invalid expression: {0}")]
    Parse(#[from] ParseError),

    #[error("Schedule rejected: {0}")]
    Schedule(#[from] ScheduleError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{FlakyDefinitions, RecordingAlerts, StaticMetrics};
    use crate::services::MetricsError;

    const TAG_CATEGORY: &str = "HawkularMetrics";
    const TAG_NAME: &str = "MetricsCondition";
    const EXPR: &str = "avg(m1) over 60s > 10.0 every 1m";

    struct Fixture {
        defs: Arc<FlakyDefinitions>,
        metrics: Arc<StaticMetrics>,
        alerts: Arc<RecordingAlerts>,
        reconciler: Reconciler,
    }

    fn fixture_with(metrics: StaticMetrics) -> Fixture {
        let defs = Arc::new(FlakyDefinitions::new());
        let metrics = Arc::new(metrics);
        let alerts = Arc::new(RecordingAlerts::new());
        let reconciler = Reconciler::new(
            &SentinelConfig::default(),
            defs.clone(),
            metrics.clone(),
            alerts.clone(),
            Arc::new(JobScheduler::new(4)),
        );
        Fixture {
            defs,
            metrics,
            alerts,
            reconciler,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(StaticMetrics::value(1.0, 0))
    }

    fn trigger(id: &str) -> Trigger {
        Trigger::new("tenant-a", id).with_tag(TAG_CATEGORY, TAG_NAME)
    }

    fn external(trigger_id: &str, index: u32, expression: &str) -> Condition {
        let data_id = format!("{}-data", trigger_id);
        ExternalCondition::new("tenant-a", trigger_id, TAG_NAME, data_id, expression)
            .with_position(2, index)
            .into()
    }

    fn key(condition_id: &str) -> ConditionKey {
        ConditionKey {
            tenant_id: "tenant-a".to_string(),
            condition_id: condition_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_enable_then_disable_trigger() {
        let f = fixture();
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR)]);

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.scheduled, vec![key("T1-2-1")]);
        assert_eq!(f.reconciler.active_keys().await, vec![key("T1-2-1")]);
        assert_eq!(f.reconciler.scheduler().active_count(), 1);

        f.defs.inner.set_enabled("tenant-a", "T1", false).unwrap();
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.cancelled, vec![key("T1-2-1")]);
        assert_eq!(f.reconciler.active_count().await, 0);
        assert_eq!(f.reconciler.scheduler().active_count(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_input_causes_no_churn() {
        let f = fixture();
        f.defs.inner.put_trigger(
            trigger("T1"),
            vec![external("T1", 1, EXPR), external("T1", 2, EXPR)],
        );

        let first = f.reconciler.reconcile().await.unwrap();
        assert_eq!(first.scheduled.len(), 2);

        let second = f.reconciler.reconcile().await.unwrap();
        assert!(second.scheduled.is_empty());
        assert!(second.cancelled.is_empty());
        assert_eq!(second.unchanged, 2);
        assert_eq!(f.reconciler.scheduler().active_count(), 2);
    }

    #[tokio::test]
    async fn test_removed_condition_cancelled_exactly_once() {
        let f = fixture();
        f.defs.inner.put_trigger(
            trigger("T1"),
            vec![external("T1", 1, EXPR), external("T1", 2, EXPR)],
        );
        f.reconciler.reconcile().await.unwrap();

        f.defs
            .inner
            .set_conditions("tenant-a", "T1", vec![external("T1", 1, EXPR)])
            .unwrap();
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.cancelled, vec![key("T1-2-2")]);
        assert_eq!(report.unchanged, 1);

        let report = f.reconciler.reconcile().await.unwrap();
        assert!(report.cancelled.is_empty());
        assert_eq!(f.reconciler.active_keys().await, vec![key("T1-2-1")]);
    }

    #[tokio::test]
    async fn test_removed_trigger_cancels_its_jobs() {
        let f = fixture();
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR)]);
        f.defs.inner.put_trigger(trigger("T2"), vec![external("T2", 1, EXPR)]);
        f.reconciler.reconcile().await.unwrap();

        f.defs.inner.remove_trigger("tenant-a", "T1");
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.cancelled, vec![key("T1-2-1")]);
        assert_eq!(f.reconciler.active_keys().await, vec![key("T2-2-1")]);
    }

    #[tokio::test]
    async fn test_only_tagged_external_conditions_are_scheduled() {
        let f = fixture();
        let foreign: Condition =
            ExternalCondition::new("tenant-a", "T1", "OtherSystem", "d", EXPR)
                .with_position(2, 2)
                .into();
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR), foreign]);
        f.defs.inner.put_trigger(
            Trigger::new("tenant-a", "T2"),
            vec![external("T2", 1, EXPR)],
        );

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.scheduled, vec![key("T1-2-1")]);
    }

    #[tokio::test]
    async fn test_parse_failure_skipped_and_retried_next_cycle() {
        let f = fixture();
        f.defs.inner.put_trigger(
            trigger("T1"),
            vec![
                external("T1", 1, "median(m1) over 60s > 1 every 1m"),
                external("T1", 2, EXPR),
            ],
        );

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.scheduled, vec![key("T1-2-2")]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, key("T1-2-1"));
        assert!(report.skipped[0].1.contains("Unknown function"));

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(f.reconciler.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_changed_expression_replaces_job() {
        let f = fixture();
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR)]);
        f.reconciler.reconcile().await.unwrap();

        f.defs
            .inner
            .set_conditions(
                "tenant-a",
                "T1",
                vec![external("T1", 1, "avg(m1) over 60s > 20.0 every 5m")],
            )
            .unwrap();
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.cancelled, vec![key("T1-2-1")]);
        assert_eq!(report.scheduled, vec![key("T1-2-1")]);
        assert_eq!(f.reconciler.scheduler().active_count(), 1);
    }

    #[tokio::test]
    async fn test_trigger_fetch_failure_leaves_state_untouched() {
        let f = fixture();
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR)]);
        f.reconciler.reconcile().await.unwrap();

        f.defs.fail_trigger_fetch(true);
        f.defs.inner.remove_trigger("tenant-a", "T1");
        let err = f.reconciler.reconcile().await.unwrap_err();
        assert!(matches!(err, ReconcileError::Fetch(_)));
        assert_eq!(f.reconciler.active_keys().await, vec![key("T1-2-1")]);

        f.defs.fail_trigger_fetch(false);
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.cancelled, vec![key("T1-2-1")]);
    }

    #[tokio::test]
    async fn test_condition_fetch_failure_skips_only_that_trigger() {
        let f = fixture();
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR)]);
        f.defs.inner.put_trigger(trigger("T2"), vec![external("T2", 1, EXPR)]);
        f.reconciler.reconcile().await.unwrap();

        f.defs.fail_conditions_for("T1", true);
        f.defs.inner.put_trigger(trigger("T3"), vec![external("T3", 1, EXPR)]);
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.scheduled, vec![key("T3-2-1")]);
        assert_eq!(report.cancelled, vec![key("T1-2-1")]);
        assert_eq!(report.unchanged, 1);
        assert_eq!(f.reconciler.active_keys().await, vec![key("T2-2-1"), key("T3-2-1")]);

        // Rescheduled once its conditions can be read again
        f.defs.fail_conditions_for("T1", false);
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.scheduled, vec![key("T1-2-1")]);
        assert_eq!(f.reconciler.active_count().await, 3);
    }

    #[tokio::test]
    async fn test_identical_expressions_get_independent_jobs() {
        let f = fixture_with(StaticMetrics::value(50.0, 1_000));
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR)]);
        f.defs.inner.put_trigger(trigger("T2"), vec![external("T2", 1, EXPR)]);

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.scheduled, vec![key("T1-2-1"), key("T2-2-1")]);
        assert_eq!(f.reconciler.scheduler().active_count(), 2);

        // Both run their first tick immediately
        for _ in 0..100 {
            if f.alerts.sent().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut data_ids: Vec<String> = f.alerts.sent().into_iter().map(|d| d.id).collect();
        data_ids.sort();
        assert_eq!(data_ids, vec!["T1-data", "T2-data"]);
        assert_eq!(f.metrics.call_count(), 2);

        f.defs.inner.remove_trigger("tenant-a", "T1");
        f.reconciler.reconcile().await.unwrap();
        assert_eq!(f.reconciler.active_keys().await, vec![key("T2-2-1")]);
    }

    #[tokio::test]
    async fn test_query_failure_during_tick_emits_nothing() {
        let f = fixture_with(StaticMetrics::error(MetricsError::Backend("down".to_string())));
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR)]);
        f.reconciler.reconcile().await.unwrap();

        for _ in 0..100 {
            if f.metrics.call_count() >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.metrics.call_count(), 1);
        assert_eq!(f.alerts.attempts(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all_and_rejects_new_jobs() {
        let f = fixture();
        f.defs.inner.put_trigger(trigger("T1"), vec![external("T1", 1, EXPR)]);
        f.reconciler.reconcile().await.unwrap();

        f.reconciler.shutdown().await;
        assert_eq!(f.reconciler.active_count().await, 0);
        assert_eq!(f.reconciler.scheduler().active_count(), 0);

        let report = f.reconciler.reconcile().await.unwrap();
        assert!(report.scheduled.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].1.contains("shut down"));
    }
}
