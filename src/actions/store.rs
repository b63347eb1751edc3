//! Time-series store collaborator and its InfluxDB implementation.

use crate::config::{ButtonSpec, InfluxDbConfig};
use crate::error::{PiMoodError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One timestamped record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasurementPoint {
    pub measurement: String,
    pub fields: BTreeMap<String, i64>,
    pub time: DateTime<Utc>,
}

impl MeasurementPoint {
    /// The point recorded for a press of `button`: one field, keyed by the
    /// button's label.
    pub fn for_button(measurement: &str, button: &ButtonSpec, time: DateTime<Utc>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(button.label.clone(), button.value);
        Self {
            measurement: measurement.to_string(),
            fields,
            time,
        }
    }

    /// Render as an InfluxDB line-protocol record with a nanosecond timestamp.
    pub fn to_line_protocol(&self) -> String {
        let fields = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}i", escape_key(key), value))
            .collect::<Vec<_>>()
            .join(",");

        let mut line = format!("{} {}", escape_measurement(&self.measurement), fields);
        // Out-of-range timestamps fall back to server time.
        if let Some(nanos) = self.time.timestamp_nanos_opt() {
            line.push(' ');
            line.push_str(&nanos.to_string());
        }
        line
    }
}

fn escape_measurement(name: &str) -> String {
    escape(name, &[',', ' '])
}

fn escape_key(key: &str) -> String {
    escape(key, &[',', '=', ' '])
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Operations the core needs from a time-series database.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Create the database if it does not exist yet.
    async fn ensure_database(&self, name: &str) -> Result<()>;

    /// Submit a single point.
    async fn write_point(&self, point: &MeasurementPoint) -> Result<()>;
}

/// Client for the InfluxDB 1.x HTTP API.
pub struct InfluxClient {
    http: reqwest::Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
}

impl InfluxClient {
    pub fn new(config: &InfluxDbConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build().map_err(|e| {
            PiMoodError::config_error(format!("Failed to build InfluxDB client: {}", e))
        })?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            database: config.database_name.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Build a client and make sure its database exists.
    pub async fn connect(config: &InfluxDbConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.ensure_database(&config.database_name).await?;
        info!(
            "Connected to InfluxDB at {} (database {:?})",
            client.base_url, client.database
        );
        Ok(client)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            debug!("Influxdb response to {}: {}", action, status);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(PiMoodError::upload_error(format!(
            "{} returned {}: {}",
            action,
            status,
            body.trim()
        )))
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxClient {
    async fn ensure_database(&self, name: &str) -> Result<()> {
        let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\\\""));
        let response = self
            .http
            .post(format!("{}/query", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .form(&[("q", statement)])
            .send()
            .await
            .map_err(|e| PiMoodError::upload_error(format!("create database failed: {}", e)))?;
        Self::check(response, "create database").await
    }

    async fn write_point(&self, point: &MeasurementPoint) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/write", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(point.to_line_protocol())
            .send()
            .await
            .map_err(|e| PiMoodError::upload_error(format!("write failed: {}", e)))?;
        Self::check(response, "write").await
    }
}
