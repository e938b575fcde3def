//! TSDB gateway — HTTP adapter for the telemetry and command stores
//!
//! Three operations: SQL query, line-protocol write, and command
//! formatting. Every call is retryable with bounded exponential backoff
//! (default 3 tries, 1 s initial delay) and carries a per-call timeout.
//! 4xx responses are permanent and never retried; timeouts and 5xx are
//! transient and retried until the configured attempts run out.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use super::line_protocol::{format_line, FieldValue};
use crate::config::EngineConfig;
use crate::types::{
    CommandRecord, CommandType, CommandValue, MetricSnapshot, MetricValue, SettingsLayer,
};

/// Gateway errors, split along the retry taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum TsdbError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP transport error: {0}")]
    Transport(reqwest::Error),
    #[error("Client error {status}: {body}")]
    Client { status: u16, body: String },
    #[error("Server error {status} after {attempts} attempts")]
    Server { status: u16, attempts: u32 },
    #[error("Response parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl TsdbError {
    /// Transient errors are worth another attempt; permanent ones are not.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            TsdbError::Timeout(_) | TsdbError::Transport(_) | TsdbError::Server { .. }
        )
    }
}

/// Result envelope for SQL queries.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub success: bool,
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
    pub error: Option<String>,
    pub status: u16,
}

/// Result envelope for line-protocol writes.
#[derive(Debug, Clone)]
pub struct WriteResult {
    pub success: bool,
    pub error: Option<String>,
    pub status: u16,
}

/// HTTP gateway to the time-series store.
#[derive(Clone)]
pub struct TsdbGateway {
    http: reqwest::Client,
    base_url: String,
    metrics_db: String,
    ui_commands_db: String,
    audit_db: String,
    timeout: Duration,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl TsdbGateway {
    pub fn new(config: &EngineConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.tsdb_timeout)
            .pool_max_idle_per_host(4)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            base_url: config.tsdb_url.trim_end_matches('/').to_string(),
            metrics_db: config.metrics_db.clone(),
            ui_commands_db: config.ui_commands_db.clone(),
            audit_db: config.audit_db.clone(),
            timeout: config.tsdb_timeout,
            max_attempts: config.tsdb_retries.max(1),
            initial_backoff: config.tsdb_retry_delay,
        }
    }

    /// Run a SQL query against a database, with retries.
    pub async fn query_sql(&self, db: &str, sql: &str) -> Result<QueryResult, TsdbError> {
        let url = format!("{}/api/v3/query_sql", self.base_url);
        let body = json!({ "db": db, "q": sql });

        let mut backoff = self.initial_backoff;
        let mut last_err: Option<TsdbError> = None;
        for attempt in 1..=self.max_attempts {
            let outcome = self
                .http
                .post(&url)
                .json(&body)
                .timeout(self.timeout)
                .send()
                .await;
            match self.classify(outcome, attempt).await {
                Ok((status, text)) => {
                    let rows: Vec<serde_json::Map<String, serde_json::Value>> =
                        serde_json::from_str(&text)?;
                    return Ok(QueryResult {
                        success: true,
                        data: rows,
                        error: None,
                        status,
                    });
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "TSDB query attempt {}/{} failed ({}); retrying in {:?}",
                        attempt, self.max_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(TsdbError::Server {
            status: 0,
            attempts: self.max_attempts,
        }))
    }

    /// Write one line-protocol record, with retries.
    pub async fn write_line(&self, db: &str, line: &str) -> Result<WriteResult, TsdbError> {
        let url = format!(
            "{}/api/v3/write_lp?db={}&precision=nanosecond",
            self.base_url, db
        );

        let mut backoff = self.initial_backoff;
        let mut last_err: Option<TsdbError> = None;
        for attempt in 1..=self.max_attempts {
            let outcome = self
                .http
                .post(&url)
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(line.to_string())
                .timeout(self.timeout)
                .send()
                .await;
            match self.classify(outcome, attempt).await {
                Ok((status, _)) => {
                    return Ok(WriteResult {
                        success: true,
                        error: None,
                        status,
                    })
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "TSDB write attempt {}/{} failed ({}); retrying in {:?}",
                        attempt, self.max_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(TsdbError::Server {
            status: 0,
            attempts: self.max_attempts,
        }))
    }

    /// Map a reqwest outcome into the retry taxonomy.
    async fn classify(
        &self,
        outcome: Result<reqwest::Response, reqwest::Error>,
        attempt: u32,
    ) -> Result<(u16, String), TsdbError> {
        match outcome {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    Ok((status.as_u16(), text))
                } else if status.is_client_error() {
                    let body = resp.text().await.unwrap_or_default();
                    Err(TsdbError::Client {
                        status: status.as_u16(),
                        body,
                    })
                } else {
                    Err(TsdbError::Server {
                        status: status.as_u16(),
                        attempts: attempt,
                    })
                }
            }
            Err(e) if e.is_timeout() => Err(TsdbError::Timeout(self.timeout)),
            Err(e) => Err(TsdbError::Transport(e)),
        }
    }

    /// Latest-within-window telemetry snapshot for one equipment.
    ///
    /// Rows come back newest-first; fields coalesce so each takes its most
    /// recent non-null value.
    pub async fn query_latest_metrics(
        &self,
        equipment_id: &str,
    ) -> Result<MetricSnapshot, TsdbError> {
        let sql = format!(
            "SELECT * FROM \"metrics\" WHERE \"equipmentId\"='{}' \
             AND time > now() - INTERVAL '5 minutes' ORDER BY time DESC LIMIT 10",
            sql_escape(equipment_id)
        );
        let result = self.query_sql(&self.metrics_db, &sql).await?;
        Ok(coalesce_rows(&result.data))
    }

    /// UI commands for all equipment of one type at one location over the
    /// trailing window. Returns equipment id → settings layer (raw UI
    /// field names, newest value per field).
    pub async fn query_ui_commands(
        &self,
        location_id: &str,
        equipment_type: &str,
        window_minutes: u32,
    ) -> Result<std::collections::HashMap<String, SettingsLayer>, TsdbError> {
        let sql = format!(
            "SELECT * FROM \"ui_commands\" WHERE \"locationId\"='{}' \
             AND \"equipmentType\"='{}' AND time > now() - INTERVAL '{} minutes' \
             ORDER BY time DESC",
            sql_escape(location_id),
            sql_escape(equipment_type),
            window_minutes
        );
        let result = self.query_sql(&self.ui_commands_db, &sql).await?;

        let mut layers: std::collections::HashMap<String, SettingsLayer> =
            std::collections::HashMap::new();
        // Rows are newest-first; only the first occurrence of each
        // (equipment, field) pair wins.
        for row in &result.data {
            let Some(equipment_id) = row.get("equipmentId").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(command) = row.get("commandType").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(value) = row.get("value") else {
                continue;
            };
            let Some(value) = json_to_command_value(value) else {
                continue;
            };
            layers
                .entry(equipment_id.to_string())
                .or_default()
                .entry(command.to_string())
                .or_insert(value);
        }
        Ok(layers)
    }

    /// Last persisted commands for one equipment (the medium-priority
    /// settings layer), keyed by camelCase command type.
    pub async fn query_last_commands(
        &self,
        equipment_id: &str,
    ) -> Result<SettingsLayer, TsdbError> {
        let sql = format!(
            "SELECT * FROM \"commands\" WHERE \"equipment_id\"='{}' \
             AND time > now() - INTERVAL '24 hours' ORDER BY time DESC LIMIT 200",
            sql_escape(equipment_id)
        );
        let result = self.query_sql(&self.metrics_db, &sql).await?;

        let mut layer = SettingsLayer::new();
        for row in &result.data {
            let Some(command) = row.get("command_type").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(value) = row.get("value") else {
                continue;
            };
            let Some(value) = json_to_command_value(value) else {
                continue;
            };
            layer.entry(command.to_string()).or_insert(value);
        }
        Ok(layer)
    }

    /// Write one command to the command store, and best-effort to the
    /// audit store when `audit` is set.
    pub async fn write_command(
        &self,
        record: &CommandRecord,
        audit: bool,
    ) -> Result<WriteResult, TsdbError> {
        let line = command_line(record);
        let result = self.write_line(&self.metrics_db, &line).await?;

        if audit {
            let audit_line = audit_line(record);
            if let Err(e) = self.write_line(&self.audit_db, &audit_line).await {
                warn!(
                    equipment_id = %record.equipment_id,
                    command = %record.command_type,
                    "Audit write failed: {}", e
                );
            }
        }
        debug!(
            equipment_id = %record.equipment_id,
            command = %record.command_type,
            "Command written"
        );
        Ok(result)
    }

    /// Write an arbitrary audit event record (safety trips, lead-lag
    /// transitions). Best-effort semantics are the caller's choice.
    pub async fn write_audit_event(
        &self,
        measurement: &str,
        tags: &BTreeMap<String, String>,
        fields: &BTreeMap<String, FieldValue>,
        timestamp_ns: i64,
    ) -> Result<WriteResult, TsdbError> {
        let line = format_line(measurement, tags, fields, timestamp_ns);
        self.write_line(&self.audit_db, &line).await
    }
}

/// Escape single quotes for SQL string literals.
fn sql_escape(s: &str) -> String {
    s.replace('\'', "''")
}

/// JSON row value → command value. Nulls and structured values drop out.
fn json_to_command_value(value: &serde_json::Value) -> Option<CommandValue> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(CommandValue::Float),
        serde_json::Value::Bool(b) => Some(CommandValue::Bool(*b)),
        serde_json::Value::String(s) => Some(CommandValue::Text(s.clone())),
        _ => None,
    }
}

/// Coalesce newest-first rows into one snapshot: each field takes its most
/// recent non-null value.
pub fn coalesce_rows(rows: &[serde_json::Map<String, serde_json::Value>]) -> MetricSnapshot {
    let mut snapshot = MetricSnapshot::new();
    for row in rows {
        for (key, value) in row {
            if key == "time" {
                if snapshot.observed_at_ns.is_none() {
                    snapshot.observed_at_ns = value.as_i64();
                }
                continue;
            }
            if key == "equipmentId" || snapshot.fields.contains_key(key) {
                continue;
            }
            let metric = match value {
                serde_json::Value::Number(n) => n.as_f64().map(MetricValue::Float),
                serde_json::Value::Bool(b) => Some(MetricValue::Bool(*b)),
                serde_json::Value::String(s) => Some(MetricValue::Text(s.clone())),
                _ => None,
            };
            if let Some(metric) = metric {
                snapshot.fields.insert(key.clone(), metric);
            }
        }
    }
    snapshot
}

/// Wire encoding for one command value, per the command-write contract:
/// `firing` is `1.0/0.0`, boolean commands are the literal `true`/`false`,
/// numerics are floats, enumerated strings are double-quoted.
fn command_field_value(command_type: CommandType, value: &CommandValue) -> FieldValue {
    if command_type == CommandType::Firing {
        let v = value.as_f64().unwrap_or(0.0);
        return FieldValue::Float(if v != 0.0 { 1.0 } else { 0.0 });
    }
    if command_type.is_boolean() {
        let b = value.as_bool().unwrap_or(false);
        return FieldValue::Literal(if b { "true" } else { "false" }.to_string());
    }
    match value {
        CommandValue::Float(v) => FieldValue::Float(*v),
        CommandValue::Bool(b) => FieldValue::Literal(if *b { "true" } else { "false" }.to_string()),
        CommandValue::Text(s) => FieldValue::Text(s.clone()),
    }
}

fn command_tags(record: &CommandRecord) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("equipment_id".to_string(), record.equipment_id.clone());
    tags.insert("location_id".to_string(), record.location_id.clone());
    tags.insert(
        "command_type".to_string(),
        record.command_type.as_str().to_string(),
    );
    tags.insert(
        "equipment_type".to_string(),
        record.equipment_type.as_str().to_string(),
    );
    tags.insert("source".to_string(), "server_logic".to_string());
    tags.insert("status".to_string(), "completed".to_string());
    tags
}

/// Line-protocol record for one command write.
pub fn command_line(record: &CommandRecord) -> String {
    let mut fields = BTreeMap::new();
    fields.insert(
        "value".to_string(),
        command_field_value(record.command_type, &record.value),
    );
    format_line(
        &format!("update_{}", record.command_type.as_str()),
        &command_tags(record),
        &fields,
        record.timestamp_ns,
    )
}

/// Audit-journal record for one command write.
fn audit_line(record: &CommandRecord) -> String {
    let mut fields = BTreeMap::new();
    fields.insert(
        "value".to_string(),
        command_field_value(record.command_type, &record.value),
    );
    format_line(
        "command_audit",
        &command_tags(record),
        &fields,
        record.timestamp_ns,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EquipmentType;

    fn record(command_type: CommandType, value: CommandValue) -> CommandRecord {
        CommandRecord {
            equipment_id: "boiler-1".to_string(),
            location_id: "heritage".to_string(),
            equipment_type: EquipmentType::Boiler,
            command_type,
            value,
            timestamp_ns: 1_700_000_000_000_000_000,
        }
    }

    #[test]
    fn command_line_matches_contract_shape() {
        let line = command_line(&record(
            CommandType::WaterTempSetpoint,
            CommandValue::Float(117.5),
        ));
        assert!(line.starts_with("update_waterTempSetpoint,"));
        assert!(line.contains("command_type=waterTempSetpoint"));
        assert!(line.contains("equipment_id=boiler-1"));
        assert!(line.contains("equipment_type=boiler"));
        assert!(line.contains("source=server_logic"));
        assert!(line.contains("status=completed"));
        assert!(line.contains(" value=117.5 "));
    }

    #[test]
    fn firing_encodes_as_float_one_or_zero() {
        let line = command_line(&record(CommandType::Firing, CommandValue::Bool(true)));
        assert!(line.contains("value=1.0"));
        let line = command_line(&record(CommandType::Firing, CommandValue::Float(0.0)));
        assert!(line.contains("value=0.0"));
    }

    #[test]
    fn unit_enable_encodes_as_literal_true_false() {
        let line = command_line(&record(CommandType::UnitEnable, CommandValue::Bool(true)));
        assert!(line.contains("value=true"));
        let line = command_line(&record(CommandType::UnitEnable, CommandValue::Bool(false)));
        assert!(line.contains("value=false"));
    }

    #[test]
    fn enumerated_strings_are_quoted() {
        let mut rec = record(CommandType::FanSpeed, CommandValue::Text("high".to_string()));
        rec.equipment_type = EquipmentType::FanCoil;
        let line = command_line(&rec);
        assert!(line.contains("value=\"high\""));
    }

    #[test]
    fn coalesce_prefers_newest_non_null() {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = vec![
            serde_json::from_str(r#"{"time": 200, "SupplyTemp": null, "OutdoorAirTemp": 54.0}"#)
                .expect("row"),
            serde_json::from_str(r#"{"time": 100, "SupplyTemp": 141.5, "OutdoorAirTemp": 53.0}"#)
                .expect("row"),
        ];
        let snap = coalesce_rows(&rows);
        // SupplyTemp was null in the newest row; the older value wins.
        assert_eq!(snap.get_f64("SupplyTemp"), Some(141.5));
        // OutdoorAirTemp present in the newest row; older row ignored.
        assert_eq!(snap.get_f64("OutdoorAirTemp"), Some(54.0));
        assert_eq!(snap.observed_at_ns, Some(200));
    }
}
