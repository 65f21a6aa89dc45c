//! Metrics time-series backend

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::expression::Func;

/// Result of a windowed aggregate query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub value: f64,
    /// Timestamp of the newest sample in the window (unix millis)
    pub timestamp: i64,
}

/// Windowed aggregate queries over gauge metrics
#[async_trait]
pub trait MetricsService: Send + Sync + 'static {
    /// Aggregate `metric_id` of `tenant_id` over `[start, end]` (unix millis, inclusive)
    async fn aggregate(
        &self,
        func: Func,
        metric_id: &str,
        tenant_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Aggregate, MetricsError>;
}

/// Metrics query errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MetricsError {
    #[error("Metric not found: {tenant_id}/{metric_id}")]
    MetricNotFound {
        tenant_id: String,
        metric_id: String,
    },

    #[error("No data for {metric_id} in [{start}, {end}]")]
    NoData {
        metric_id: String,
        start: i64,
        end: i64,
    },

    #[error("Unsupported function: {0}")]
    UnsupportedFunction(Func),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Running statistics over the samples of one window
#[derive(Debug, Clone, Default)]
struct WindowStats {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
    last_timestamp: Option<i64>,
}

impl WindowStats {
    fn accumulate(&mut self, timestamp: i64, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));
    }

    fn result(&self, func: Func) -> Option<f64> {
        match func {
            Func::Count => Some(self.count as f64),
            _ if self.count == 0 => None,
            Func::Avg => Some(self.sum / self.count as f64),
            Func::Sum => Some(self.sum),
            Func::Min => self.min,
            Func::Max => self.max,
        }
    }
}

/// In-memory gauge store
///
/// Samples are kept per `(tenant, metric)` sorted by timestamp.
pub struct InMemoryMetrics {
    series: DashMap<(String, String), Vec<(i64, f64)>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
        }
    }

    /// Record one gauge sample
    pub fn record(&self, tenant_id: &str, metric_id: &str, timestamp: i64, value: f64) {
        let mut points = self
            .series
            .entry((tenant_id.to_string(), metric_id.to_string()))
            .or_default();
        let pos = points.partition_point(|(ts, _)| *ts <= timestamp);
        points.insert(pos, (timestamp, value));
    }

    /// Drop samples older than `cutoff`, returning how many were removed
    pub fn expire_before(&self, cutoff: i64) -> usize {
        let mut removed = 0;
        for mut entry in self.series.iter_mut() {
            let keep_from = entry.partition_point(|(ts, _)| *ts < cutoff);
            entry.drain(..keep_from);
            removed += keep_from;
        }
        self.series.retain(|_, points| !points.is_empty());
        removed
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsService for InMemoryMetrics {
    async fn aggregate(
        &self,
        func: Func,
        metric_id: &str,
        tenant_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Aggregate, MetricsError> {
        let points = self
            .series
            .get(&(tenant_id.to_string(), metric_id.to_string()))
            .ok_or_else(|| MetricsError::MetricNotFound {
                tenant_id: tenant_id.to_string(),
                metric_id: metric_id.to_string(),
            })?;

        let from = points.partition_point(|(ts, _)| *ts < start);
        let mut stats = WindowStats::default();
        for (ts, value) in points[from..].iter().take_while(|(ts, _)| *ts <= end) {
            stats.accumulate(*ts, *value);
        }

        let value = stats.result(func).ok_or_else(|| MetricsError::NoData {
            metric_id: metric_id.to_string(),
            start,
            end,
        })?;

        Ok(Aggregate {
            value,
            timestamp: stats.last_timestamp.unwrap_or(end),
        })
    }
}
