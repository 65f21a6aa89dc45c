//! Metric Sentinel: external metrics conditions for an alerting engine
//!
//! Alert triggers tagged for external metrics carry conditions whose
//! expression describes a periodic aggregate query and a threshold test.
//! Metric Sentinel keeps one periodic evaluation job per such condition,
//! in sync with the trigger definitions, and sends a datum to alert
//! ingestion whenever an expression holds.
//!
//! # Components
//!
//! - **Expression parser**: `avg(cpu) over 5m > 80 every 1m`
//! - **Evaluator**: one query, test and emit cycle per tick
//! - **Job scheduler**: periodic jobs on a bounded worker pool
//! - **Reconciler**: desired condition set vs. running jobs
//! - **Manager**: bootstrap and change-driven reconciliation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use metric_sentinel::model::{ExternalCondition, Trigger};
//! use metric_sentinel::services::{InMemoryDefinitions, InMemoryMetrics, LogAlerts};
//! use metric_sentinel::{MetricsManager, SentinelConfig};
//!
//! # async fn run() {
//! let config = SentinelConfig::default();
//! let definitions = Arc::new(InMemoryDefinitions::new());
//! definitions.put_trigger(
//!     Trigger::new("acme", "high-cpu").with_tag(&config.tag_category, &config.tag_name),
//!     vec![ExternalCondition::new(
//!         "acme",
//!         "high-cpu",
//!         &config.tag_name,
//!         "cpu-data",
//!         "avg(cpu) over 5m > 80 every 1m",
//!     )
//!     .into()],
//! );
//!
//! let manager = MetricsManager::start(
//!     &config,
//!     definitions,
//!     Arc::new(InMemoryMetrics::new()),
//!     Arc::new(LogAlerts),
//! )
//! .await;
//! manager.shutdown().await;
//! # }
//! ```

pub mod config;
pub mod evaluator;
pub mod expression;
pub mod model;
pub mod reconcile;
pub mod scheduler;
pub mod services;

// Re-export commonly used types
pub use config::{ConfigError, SentinelConfig};
pub use expression::{parse_expression, Expression, ParseError};
pub use reconcile::{MetricsManager, ReconcileReport, Reconciler};
pub use scheduler::{JobScheduler, Runnable};
