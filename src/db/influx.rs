//! InfluxDB 1.x time-series backend.
//!
//! Writes go through the line-protocol `/write` endpoint, one point per
//! request. Reads enumerate the tag values present for a measurement, then
//! issue one grouped aggregate query per metric and zip the results back
//! together by tag value.

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::aggregate::{json_number, loss_fraction, StatusPolicy};
use super::models::*;
use super::StorageError;

pub const SERVICE_MEASUREMENT: &str = "service_probes";
pub const CONNECTIVITY_MEASUREMENT: &str = "connectivity_probes";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Time-series store speaking the InfluxDB 1.x HTTP API.
#[derive(Clone)]
pub struct InfluxStore {
    client: Client,
    base_url: String,
    database: String,
    policy: StatusPolicy,
}

impl InfluxStore {
    pub fn new(base_url: &str, database: &str, policy: StatusPolicy) -> Result<Self, StorageError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            database: database.to_string(),
            policy,
        })
    }

    pub async fn write_service_probe(&self, r: &ServiceProbeResult) -> Result<(), StorageError> {
        self.write(service_line(r)).await
    }

    pub async fn write_connectivity_probe(&self, r: &ConnectivityProbeResult) -> Result<(), StorageError> {
        self.write(connectivity_line(r)).await
    }

    async fn write(&self, line: String) -> Result<(), StorageError> {
        let response = self
            .client
            .post(format!("{}/write", self.base_url))
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(line)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status { status: status.as_u16(), body });
        }
        Ok(())
    }

    pub async fn service_aggregates(&self) -> Result<Vec<ServiceAggregate>, StorageError> {
        let key = "service_name";
        let names = self.tag_values(SERVICE_MEASUREMENT, key).await?;
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let totals = self
            .grouped(&select("count", "elapsed_us", SERVICE_MEASUREMENT, None, key), key, "count")
            .await?;
        let failures = self
            .grouped(
                &select(
                    "count",
                    "elapsed_us",
                    SERVICE_MEASUREMENT,
                    Some(self.policy.failure_predicate()),
                    key,
                ),
                key,
                "count",
            )
            .await?;

        Ok(zip_service(names, &totals, &failures))
    }

    pub async fn connectivity_aggregates(&self) -> Result<Vec<ConnectivityAggregate>, StorageError> {
        let key = "address";
        let addresses = self.tag_values(CONNECTIVITY_MEASUREMENT, key).await?;
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let totals = self
            .grouped(&select("count", "packet_loss", CONNECTIVITY_MEASUREMENT, None, key), key, "count")
            .await?;
        let failed = self
            .grouped(
                &select("count", "packet_loss", CONNECTIVITY_MEASUREMENT, Some("exit_code <> 0"), key),
                key,
                "count",
            )
            .await?;
        let partial = self
            .grouped(
                &select("sum", "packet_loss", CONNECTIVITY_MEASUREMENT, Some("exit_code = 0"), key),
                key,
                "sum",
            )
            .await?;

        Ok(zip_connectivity(addresses, &totals, &failed, &partial))
    }

    async fn tag_values(&self, measurement: &str, key: &str) -> Result<Vec<String>, StorageError> {
        let q = format!("SHOW TAG VALUES FROM \"{}\" WITH KEY = \"{}\"", measurement, key);
        let series = self.query(&q).await?;

        let mut values = Vec::new();
        for s in series {
            let Some(idx) = s.columns.iter().position(|c| c == "value") else {
                continue;
            };
            for row in &s.values {
                if let Some(Value::String(v)) = row.get(idx) {
                    values.push(v.clone());
                }
            }
        }
        values.sort();
        values.dedup();
        Ok(values)
    }

    async fn grouped(&self, q: &str, key: &str, column: &str) -> Result<HashMap<String, f64>, StorageError> {
        let series = self.query(q).await?;
        Ok(group_by_tag(&series, key, column))
    }

    async fn query(&self, q: &str) -> Result<Vec<Series>, StorageError> {
        let response = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[("db", self.database.as_str()), ("q", q)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status { status: status.as_u16(), body });
        }

        let parsed: QueryResponse = response.json().await?;
        parsed.into_series()
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl QueryResponse {
    fn into_series(self) -> Result<Vec<Series>, StorageError> {
        if let Some(e) = self.error {
            return Err(StorageError::Response(e));
        }
        let mut out = Vec::new();
        for result in self.results {
            if let Some(e) = result.error {
                return Err(StorageError::Response(e));
            }
            out.extend(result.series);
        }
        Ok(out)
    }
}

/// Map each series' tag value to the first row's `column` cell.
fn group_by_tag(series: &[Series], key: &str, column: &str) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    for s in series {
        let Some(tag) = s.tags.get(key) else { continue };
        let Some(idx) = s.columns.iter().position(|c| c == column) else { continue };
        let value = s.values.first().and_then(|row| row.get(idx)).and_then(json_number);
        if let Some(v) = value {
            out.insert(tag.clone(), v);
        }
    }
    out
}

fn select(func: &str, field: &str, measurement: &str, predicate: Option<&str>, key: &str) -> String {
    match predicate {
        Some(p) => format!(
            "SELECT {}(\"{}\") FROM \"{}\" WHERE {} GROUP BY \"{}\"",
            func, field, measurement, p, key
        ),
        None => format!("SELECT {}(\"{}\") FROM \"{}\" GROUP BY \"{}\"", func, field, measurement, key),
    }
}

/// Tags with no total are kept with zero samples; missing failure counts are zero.
fn zip_service(
    names: Vec<String>,
    totals: &HashMap<String, f64>,
    failures: &HashMap<String, f64>,
) -> Vec<ServiceAggregate> {
    let mut out = BTreeMap::new();
    for name in names {
        let total = totals.get(&name).copied().unwrap_or(0.0) as u64;
        let failed = failures.get(&name).copied().unwrap_or(0.0) as u64;
        out.insert(
            name.clone(),
            ServiceAggregate {
                service_name: name,
                total_samples: total,
                failed_samples: failed.min(total),
            },
        );
    }
    out.into_values().collect()
}

fn zip_connectivity(
    addresses: Vec<String>,
    totals: &HashMap<String, f64>,
    failed: &HashMap<String, f64>,
    partial: &HashMap<String, f64>,
) -> Vec<ConnectivityAggregate> {
    let mut out = BTreeMap::new();
    for address in addresses {
        let total = totals.get(&address).copied().unwrap_or(0.0) as u64;
        let failed = failed.get(&address).copied().unwrap_or(0.0);
        let partial = partial.get(&address).copied().unwrap_or(0.0);
        out.insert(
            address.clone(),
            ConnectivityAggregate {
                address,
                total_samples: total,
                weighted_loss: failed + loss_fraction(partial),
            },
        );
    }
    out.into_values().collect()
}

fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn with_timestamp(mut line: String, time: chrono::DateTime<chrono::Utc>) -> String {
    if let Some(ns) = time.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&ns.to_string());
    }
    line
}

fn service_line(r: &ServiceProbeResult) -> String {
    let line = format!(
        "{},service_name={},address={} status_code={}i,timeout={}i,elapsed_us={}",
        SERVICE_MEASUREMENT,
        escape_tag(&r.service_name),
        escape_tag(&r.address),
        r.status_code,
        u8::from(r.timeout),
        r.elapsed_us,
    );
    with_timestamp(line, r.time)
}

fn connectivity_line(r: &ConnectivityProbeResult) -> String {
    let line = format!(
        "{},address={} total_time_ms={},exit_code={}i,packet_loss={}",
        CONNECTIVITY_MEASUREMENT,
        escape_tag(&r.address),
        r.total_time_ms,
        r.exit_code.as_i64(),
        r.packet_loss,
    );
    with_timestamp(line, r.time)
}
