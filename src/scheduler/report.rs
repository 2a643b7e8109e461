//! Human-readable downtime report.

use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::db::{ConnectivityAggregate, MetricsStore, ServiceAggregate, StorageError};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to compute aggregates: {0}")]
    Query(#[from] StorageError),
    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),
}

/// A rendered report and the aggregates it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub services: Vec<ServiceAggregate>,
    pub hosts: Vec<ConnectivityAggregate>,
    pub text: String,
}

impl Report {
    /// Query both aggregate sets and render them. Fails as a whole.
    pub async fn generate(store: &MetricsStore) -> Result<Self, StorageError> {
        let services = store.service_aggregates().await?;
        let hosts = store.connectivity_aggregates().await?;
        let text = render(&services, &hosts);
        Ok(Self { services, hosts, text })
    }
}

pub fn render(services: &[ServiceAggregate], hosts: &[ConnectivityAggregate]) -> String {
    let mut out = String::new();

    for s in services {
        match s.downtime_percent() {
            Some(pct) => out.push_str(&format!(
                "Service {} was down approximately {} seconds out of {} seconds which amounting {:.1}% of total uptime\n",
                s.service_name, s.failed_samples, s.total_samples, pct
            )),
            None => out.push_str(&format!("There's no records for service {}\n", s.service_name)),
        }
    }

    for h in hosts {
        match h.unreachable_percent() {
            Some(pct) => out.push_str(&format!(
                "Address {} was unreachable approximately {:.1} second of {} seconds which amounting {:.1}% of total uptime\n",
                h.address, h.weighted_loss, h.total_samples, pct
            )),
            None => out.push_str(&format!("There's no records about address {}\n", h.address)),
        }
    }

    out
}

/// Generate a report and replace `path` with it.
///
/// Nothing is written unless both aggregate queries succeed.
pub async fn write_report(store: &MetricsStore, path: &Path) -> Result<Report, ReportError> {
    let report = Report::generate(store).await?;

    let path: PathBuf = path.to_path_buf();
    let text = report.text.clone();
    tokio::task::spawn_blocking(move || replace_file(&path, &text))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))??;

    tracing::info!(
        "Report written: {} services, {} hosts",
        report.services.len(),
        report.hosts.len()
    );
    Ok(report)
}

/// Write to a sibling temp file, then rename over `path`.
fn replace_file(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    if let Some(permissions) = report_permissions(path) {
        tmp.as_file().set_permissions(permissions)?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Keep the mode of an existing report; a new one is world-readable.
fn report_permissions(path: &Path) -> Option<fs::Permissions> {
    if let Ok(meta) = fs::metadata(path) {
        return Some(meta.permissions());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(fs::Permissions::from_mode(0o644))
    }
    #[cfg(not(unix))]
    {
        None
    }
}
