//! Collaborator interfaces and their adapters
//!
//! The scheduler depends on three external services: the definitions store,
//! the metrics backend and alert ingestion. Each is a trait here, with
//! in-process and HTTP implementations.

pub mod alerts;
pub mod definitions;
pub mod metrics;
pub mod sql_metrics;

#[cfg(test)]
pub(crate) mod testing;

pub use alerts::{AlertsError, AlertsService, HttpAlerts, LogAlerts};
pub use definitions::{
    DefinitionsError, DefinitionsEvent, DefinitionsService, EventType, InMemoryDefinitions,
    TriggerDefinition,
};
pub use metrics::{Aggregate, InMemoryMetrics, MetricsError, MetricsService};
pub use sql_metrics::SqlMetrics;
