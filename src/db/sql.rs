//! SQLite relational backend.

use rusqlite::{params, Connection, Result as SqlResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::aggregate::StatusPolicy;
use super::models::*;
use super::StorageError;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Thread-safe relational store: one row per probe.
#[derive(Clone)]
pub struct SqlStore {
    conn: Arc<Mutex<Connection>>,
    policy: StatusPolicy,
}

impl SqlStore {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(path: P, policy: StatusPolicy) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?, policy)
    }

    #[cfg(test)]
    pub fn in_memory(policy: StatusPolicy) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?, policy)
    }

    fn from_connection(conn: Connection, policy: StatusPolicy) -> Result<Self, StorageError> {
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            policy,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Task("sqlite connection mutex poisoned".to_string()))
    }

    pub fn insert_service_probe(&self, r: &ServiceProbeResult) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO service_probes (id, time, service_name, address, status_code, timeout, elapsed_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                r.time.format(TIME_FORMAT).to_string(),
                r.service_name,
                r.address,
                r.status_code,
                r.timeout,
                r.elapsed_us,
            ],
        )?;
        Ok(())
    }

    pub fn insert_connectivity_probe(&self, r: &ConnectivityProbeResult) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO connectivity_probes (id, time, address, total_time_ms, exit_code, packet_loss)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                r.time.format(TIME_FORMAT).to_string(),
                r.address,
                r.total_time_ms,
                r.exit_code.as_i64(),
                r.packet_loss,
            ],
        )?;
        Ok(())
    }

    /// Fold every stored service row into per-service aggregates, ordered by name.
    pub fn service_aggregates(&self) -> Result<Vec<ServiceAggregate>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT service_name, status_code FROM service_probes")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u16>(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut groups: BTreeMap<String, ServiceAggregate> = BTreeMap::new();
        for (name, status_code) in rows {
            groups
                .entry(name.clone())
                .or_insert_with(|| ServiceAggregate::new(name))
                .absorb(status_code, self.policy);
        }
        Ok(groups.into_values().collect())
    }

    /// Fold every stored ping row into per-address aggregates, ordered by address.
    pub fn connectivity_aggregates(&self) -> Result<Vec<ConnectivityAggregate>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT address, exit_code, packet_loss FROM connectivity_probes")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut groups: BTreeMap<String, ConnectivityAggregate> = BTreeMap::new();
        for (address, exit_code, packet_loss) in rows {
            groups
                .entry(address.clone())
                .or_insert_with(|| ConnectivityAggregate::new(address))
                .absorb(ExitCode::from_i64(exit_code), packet_loss);
        }
        Ok(groups.into_values().collect())
    }
}
