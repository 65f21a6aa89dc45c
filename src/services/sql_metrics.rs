//! Metrics backend reached over a SQL query HTTP endpoint
//!
//! Sends `POST {base_url}/query` with `{"sql": "..."}` and reads a
//! `{"columns": [...], "rows": [[...]]}` response. Gauges are expected in a
//! table with `tenant`, `metric`, `value` and `timestamp` (unix millis)
//! columns.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::metrics::{Aggregate, MetricsError, MetricsService};
use crate::expression::Func;

/// HTTP client for a SQL-speaking time-series store
#[derive(Debug, Clone)]
pub struct SqlMetrics {
    http_client: reqwest::Client,
    base_url: String,
    table: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    columns: Vec<String>,
    rows: Vec<Vec<serde_json::Value>>,
}

impl SqlMetrics {
    pub fn new(
        base_url: impl Into<String>,
        table: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MetricsError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetricsError::Backend(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            table: table.into(),
        })
    }

    /// SQL for one windowed aggregate
    fn build_sql(
        &self,
        func: Func,
        metric_id: &str,
        tenant_id: &str,
        start: i64,
        end: i64,
    ) -> String {
        let aggregate = match func {
            Func::Avg => "AVG(value)",
            Func::Min => "MIN(value)",
            Func::Max => "MAX(value)",
            Func::Sum => "SUM(value)",
            Func::Count => "COUNT(*)",
        };
        format!(
            "SELECT {} AS value, MAX(timestamp) AS ts FROM {} \
             WHERE tenant = '{}' AND metric = '{}' AND timestamp >= {} AND timestamp <= {}",
            aggregate,
            self.table,
            escape_literal(tenant_id),
            escape_literal(metric_id),
            start,
            end
        )
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Extract the aggregate from the single-row response
fn parse_response(
    response: QueryResponse,
    func: Func,
    metric_id: &str,
    start: i64,
    end: i64,
) -> Result<Aggregate, MetricsError> {
    let column = |name: &str| {
        response
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| MetricsError::Backend(format!("Column not found: {}", name)))
    };
    let value_idx = column("value")?;
    let ts_idx = column("ts")?;

    let no_data = || MetricsError::NoData {
        metric_id: metric_id.to_string(),
        start,
        end,
    };

    let row = response.rows.first().ok_or_else(no_data)?;
    let timestamp = row.get(ts_idx).and_then(|v| v.as_i64());
    let value = match row.get(value_idx).and_then(|v| v.as_f64()) {
        Some(v) => v,
        None if func == Func::Count => 0.0,
        None => return Err(no_data()),
    };

    Ok(Aggregate {
        value,
        timestamp: timestamp.unwrap_or(end),
    })
}

#[async_trait]
impl MetricsService for SqlMetrics {
    async fn aggregate(
        &self,
        func: Func,
        metric_id: &str,
        tenant_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Aggregate, MetricsError> {
        let url = format!("{}/query", self.base_url);
        let sql = self.build_sql(func, metric_id, tenant_id, start, end);
        let request = serde_json::json!({ "sql": sql });

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MetricsError::Backend(format!("Failed to query metrics: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(MetricsError::Backend(format!(
                "Metrics query returned status {}: {}",
                status, error_text
            )));
        }

        let result: QueryResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::Backend(format!("Invalid metrics response: {}", e)))?;

        parse_response(result, func, metric_id, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SqlMetrics {
        SqlMetrics::new("http://localhost:8080/", "gauges", Duration::from_secs(5)).unwrap()
    }

    fn response(json: serde_json::Value) -> QueryResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_build_sql() {
        let sql = client().build_sql(Func::Avg, "heap", "tenant-a", 1_000, 61_000);
        assert_eq!(
            sql,
            "SELECT AVG(value) AS value, MAX(timestamp) AS ts FROM gauges \
             WHERE tenant = 'tenant-a' AND metric = 'heap' \
             AND timestamp >= 1000 AND timestamp <= 61000"
        );
        assert_eq!(client().base_url, "http://localhost:8080");
    }

    #[test]
    fn test_build_sql_escapes_literals() {
        let sql = client().build_sql(Func::Count, "it's", "t'1", 0, 1);
        assert!(sql.starts_with("SELECT COUNT(*) AS value"));
        assert!(sql.contains("tenant = 't''1'"));
        assert!(sql.contains("metric = 'it''s'"));
    }

    #[test]
    fn test_parse_response() {
        let resp = response(serde_json::json!({
            "columns": ["value", "ts"],
            "rows": [[12.5, 60_500]]
        }));
        let agg = parse_response(resp, Func::Avg, "heap", 0, 61_000).unwrap();
        assert_eq!(agg, Aggregate { value: 12.5, timestamp: 60_500 });
    }

    #[test]
    fn test_parse_response_null_aggregate() {
        let resp = response(serde_json::json!({
            "columns": ["value", "ts"],
            "rows": [[null, null]]
        }));
        let err = parse_response(resp, Func::Avg, "heap", 0, 61_000).unwrap_err();
        assert!(matches!(err, MetricsError::NoData { .. }));

        let resp = response(serde_json::json!({
            "columns": ["value", "ts"],
            "rows": [[null, null]]
        }));
        let agg = parse_response(resp, Func::Count, "heap", 0, 61_000).unwrap();
        assert_eq!(agg, Aggregate { value: 0.0, timestamp: 61_000 });
    }

    #[test]
    fn test_parse_response_missing_column() {
        let resp = response(serde_json::json!({ "columns": ["avg"], "rows": [[1.0]] }));
        let err = parse_response(resp, Func::Avg, "heap", 0, 1).unwrap_err();
        assert!(matches!(err, MetricsError::Backend(_)));
    }
}
