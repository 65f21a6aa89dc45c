//! One evaluation cycle of an external metrics condition

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::expression::Expression;
use crate::model::{ConditionEval, ExternalCondition, Trigger};
use crate::scheduler::Runnable;
use crate::services::{Aggregate, AlertsError, AlertsService, MetricsError, MetricsService};

/// Default bound on a single metrics query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one tick
#[derive(Debug)]
pub enum TickOutcome {
    /// The aggregate did not satisfy the expression
    NoMatch { value: f64 },
    /// The expression held and the value was sent to alert ingestion
    Emitted(ConditionEval),
    /// The cycle was abandoned
    Failed(EvalError),
}

/// Evaluates one external condition against the metrics backend.
///
/// The runner is bound to an immutable snapshot of its trigger, condition
/// and parsed expression; a definitions change produces a new runner.
pub struct ExpressionRunner {
    name: String,
    metrics: Arc<dyn MetricsService>,
    alerts: Arc<dyn AlertsService>,
    trigger: Arc<Trigger>,
    condition: ExternalCondition,
    expression: Expression,
    query_timeout: Duration,
}

impl ExpressionRunner {
    pub fn new(
        metrics: Arc<dyn MetricsService>,
        alerts: Arc<dyn AlertsService>,
        trigger: Arc<Trigger>,
        condition: ExternalCondition,
        expression: Expression,
    ) -> Self {
        Self {
            name: condition.key().to_string(),
            metrics,
            alerts,
            trigger,
            condition,
            expression,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn condition(&self) -> &ExternalCondition {
        &self.condition
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Query, evaluate and, on a match, emit
    pub async fn tick(&self) -> TickOutcome {
        let aggregate = match self.query().await {
            Ok(aggregate) => aggregate,
            Err(e) => return TickOutcome::Failed(e),
        };

        tracing::debug!(
            condition_id = %self.condition.condition_id,
            expression = %self.expression,
            value = aggregate.value,
            "External metrics evaluation"
        );
        if !self.expression.is_true(aggregate.value) {
            return TickOutcome::NoMatch {
                value: aggregate.value,
            };
        }

        let eval = ConditionEval::new(
            true,
            chrono::Utc::now().timestamp_millis(),
            aggregate.timestamp,
            self.condition.clone(),
            aggregate.value.to_string(),
        );
        match self.alerts.send_data(eval.to_data()).await {
            Ok(()) => TickOutcome::Emitted(eval),
            Err(e) => TickOutcome::Failed(EvalError::Emit(e)),
        }
    }

    /// Windowed aggregate over `[now - period, now]`
    async fn query(&self) -> Result<Aggregate, EvalError> {
        let end = chrono::Utc::now().timestamp_millis();
        let period = i64::try_from(self.expression.period().as_millis()).unwrap_or(i64::MAX);
        let start = end.saturating_sub(period);

        let query = self.metrics.aggregate(
            self.expression.func(),
            self.expression.metric(),
            &self.trigger.tenant_id,
            start,
            end,
        );
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EvalError::Query(MetricsError::Timeout(self.query_timeout))),
        }
    }
}

#[async_trait]
impl Runnable for ExpressionRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        match self.tick().await {
            TickOutcome::NoMatch { value } => {
                tracing::debug!(
                    condition_id = %self.condition.condition_id,
                    value = value,
                    "Expression not satisfied"
                );
            }
            TickOutcome::Emitted(eval) => {
                tracing::info!(
                    trigger_id = %self.trigger.id,
                    data_id = %self.condition.data_id,
                    "Sent external condition data: {}",
                    eval.log()
                );
            }
            TickOutcome::Failed(e) => {
                tracing::error!(
                    condition_id = %self.condition.condition_id,
                    expression = %self.expression,
                    error = %e,
                    "External metrics evaluation failed"
                );
            }
        }
    }
}

/// Errors abandoning a single evaluation cycle
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Metrics query failed: {0}")]
    Query(#[from] MetricsError),

    #[error("Failed to send external data: {0}")]
    Emit(#[from] AlertsError),
}
