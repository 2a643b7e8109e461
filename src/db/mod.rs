//! Storage for probe samples.
//!
//! `MetricsStore` is the one seam the probe loops and the report see; it
//! dispatches to either the relational (SQLite) or the time-series
//! (InfluxDB) backend, chosen once from configuration.

mod aggregate;
mod influx;
mod models;
mod sql;

#[cfg(test)]
pub(crate) mod fake_influx;

pub use aggregate::*;
pub use influx::*;
pub use models::*;
pub use sql::*;

use crate::config::{BackendConfig, MonitorConfig};
use thiserror::Error;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("query failed: {0}")]
    Response(String),
    #[error("storage task failed: {0}")]
    Task(String),
}

/// The configured sample store. Cheap to clone; clones share the backend.
#[derive(Clone)]
pub enum MetricsStore {
    Relational(SqlStore),
    TimeSeries(InfluxStore),
}

impl MetricsStore {
    /// Build the backend named by the configuration.
    pub fn from_config(config: &MonitorConfig) -> Result<Self, StorageError> {
        let store = match &config.backend {
            BackendConfig::Relational { path } => {
                MetricsStore::Relational(SqlStore::new(path, config.status_policy)?)
            }
            BackendConfig::TimeSeries { url, database } => {
                MetricsStore::TimeSeries(InfluxStore::new(url, database, config.status_policy)?)
            }
        };
        Ok(store)
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            MetricsStore::Relational(_) => "relational",
            MetricsStore::TimeSeries(_) => "time-series",
        }
    }

    pub async fn record_service_probe(&self, result: ServiceProbeResult) -> Result<(), StorageError> {
        match self {
            MetricsStore::Relational(store) => {
                let store = store.clone();
                blocking(move || store.insert_service_probe(&result)).await
            }
            MetricsStore::TimeSeries(store) => store.write_service_probe(&result).await,
        }
    }

    pub async fn record_connectivity_probe(&self, result: ConnectivityProbeResult) -> Result<(), StorageError> {
        match self {
            MetricsStore::Relational(store) => {
                let store = store.clone();
                blocking(move || store.insert_connectivity_probe(&result)).await
            }
            MetricsStore::TimeSeries(store) => store.write_connectivity_probe(&result).await,
        }
    }

    /// Per-service aggregates ordered by name; empty when nothing is stored.
    pub async fn service_aggregates(&self) -> Result<Vec<ServiceAggregate>, StorageError> {
        match self {
            MetricsStore::Relational(store) => {
                let store = store.clone();
                blocking(move || store.service_aggregates()).await
            }
            MetricsStore::TimeSeries(store) => store.service_aggregates().await,
        }
    }

    /// Per-address aggregates ordered by address; empty when nothing is stored.
    pub async fn connectivity_aggregates(&self) -> Result<Vec<ConnectivityAggregate>, StorageError> {
        match self {
            MetricsStore::Relational(store) => {
                let store = store.clone();
                blocking(move || store.connectivity_aggregates()).await
            }
            MetricsStore::TimeSeries(store) => store.connectivity_aggregates().await,
        }
    }
}

/// Run a SQLite call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(format!("spawn_blocking failed: {}", e)))?
}
