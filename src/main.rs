//! Metric Sentinel Server
//!
//! Run with: cargo run
//!
//! Configuration is read from the JSON file named by SENTINEL_CONFIG when
//! set, otherwise from environment variables:
//! - SENTINEL_POOL_SIZE: Concurrent evaluations (default: 20)
//! - SENTINEL_TAG_CATEGORY: Trigger tag category (default: HawkularMetrics)
//! - SENTINEL_TAG_NAME: Trigger tag name and condition system ID (default: MetricsCondition)
//! - SENTINEL_QUERY_TIMEOUT_SECS: Metrics query bound (default: 30)
//! - SENTINEL_NOTIFICATION_BUFFER: Queued change notifications (default: 64)
//! - SENTINEL_ALERTS_URL: Alert ingestion endpoint (default: log only)
//! - SENTINEL_METRICS_URL / SENTINEL_METRICS_TABLE: SQL metrics endpoint and gauge table
//! - SENTINEL_DEFINITIONS: JSON file of trigger definitions
//! - RUST_LOG: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use metric_sentinel::services::{
    AlertsService, HttpAlerts, InMemoryDefinitions, InMemoryMetrics, LogAlerts, MetricsService,
    SqlMetrics,
};
use metric_sentinel::{MetricsManager, SentinelConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Retention of samples recorded into the in-process metrics store
const LOCAL_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metric_sentinel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("SENTINEL_CONFIG") {
        Ok(path) => SentinelConfig::from_file(&path)?,
        Err(_) => SentinelConfig::from_env()?,
    };

    tracing::info!("Metric Sentinel configuration:");
    tracing::info!("  Pool size: {}", config.pool_size);
    tracing::info!("  Tag: {}/{}", config.tag_category, config.tag_name);
    tracing::info!("  Query timeout: {:?}", config.query_timeout);

    let definitions = match &config.definitions_path {
        Some(path) => {
            let definitions = InMemoryDefinitions::from_file(path)?;
            tracing::info!(
                "  Definitions: {} triggers from {}",
                definitions.len(),
                path.display()
            );
            definitions
        }
        None => {
            tracing::info!("  Definitions: empty in-memory store");
            InMemoryDefinitions::new()
        }
    };

    let metrics: Arc<dyn MetricsService> = match &config.metrics_url {
        Some(url) => {
            tracing::info!("  Metrics: {} (table {})", url, config.metrics_table);
            Arc::new(SqlMetrics::new(
                url.as_str(),
                config.metrics_table.as_str(),
                config.query_timeout,
            )?)
        }
        None => {
            tracing::info!("  Metrics: in-memory store");
            let local = Arc::new(InMemoryMetrics::new());
            spawn_expiry(Arc::clone(&local));
            local
        }
    };

    let alerts: Arc<dyn AlertsService> = match &config.alerts_url {
        Some(url) => {
            tracing::info!("  Alerts: {}", url);
            Arc::new(HttpAlerts::new(url.as_str(), config.query_timeout)?)
        }
        None => {
            tracing::info!("  Alerts: log only");
            Arc::new(LogAlerts)
        }
    };

    println!(
        r#"
 Metric Sentinel
 External metrics conditions for alert triggers
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    let manager = MetricsManager::start(&config, Arc::new(definitions), metrics, alerts).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    manager.shutdown().await;

    Ok(())
}

/// Drop local samples older than the retention window once a minute
fn spawn_expiry(metrics: Arc<InMemoryMetrics>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let cutoff =
                chrono::Utc::now().timestamp_millis() - LOCAL_RETENTION.as_millis() as i64;
            let removed = metrics.expire_before(cutoff);
            if removed > 0 {
                tracing::debug!(removed = removed, "Expired local metric samples");
            }
        }
    });
}
