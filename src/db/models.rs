//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::aggregate::{loss_fraction, StatusPolicy};

/// An HTTP service to probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTarget {
    pub name: String,
    pub base_url: String,
}

/// A host reachable only by ICMP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostTarget {
    pub address: String,
}

/// The full set of targets for one supervisor run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Targets {
    pub services: Vec<ServiceTarget>,
    pub hosts: Vec<HostTarget>,
}

impl Targets {
    pub fn len(&self) -> usize {
        self.services.len() + self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one HTTP probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceProbeResult {
    pub time: DateTime<Utc>,
    pub service_name: String,
    /// Effective address; the healthcheck URL when the fallback answered.
    pub address: String,
    pub status_code: u16,
    pub timeout: bool,
    pub elapsed_us: f64,
}

/// Status code recorded for a probe that never got a response.
pub const TIMEOUT_STATUS: u16 = 408;

/// Outcome of one ICMP echo burst.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityProbeResult {
    pub time: DateTime<Utc>,
    pub address: String,
    pub total_time_ms: f64,
    pub exit_code: ExitCode,
    /// 0-100
    pub packet_loss: f64,
}

/// Outcome class of a ping burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Failure,
}

impl ExitCode {
    pub fn as_i64(self) -> i64 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Failure => 1,
        }
    }

    pub fn from_i64(code: i64) -> Self {
        if code == 0 {
            ExitCode::Success
        } else {
            ExitCode::Failure
        }
    }
}

/// Per-service downtime summary, derived at report time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceAggregate {
    pub service_name: String,
    pub total_samples: u64,
    pub failed_samples: u64,
}

impl ServiceAggregate {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            total_samples: 0,
            failed_samples: 0,
        }
    }

    /// Fold one stored sample into the running totals.
    pub fn absorb(&mut self, status_code: u16, policy: StatusPolicy) {
        self.total_samples += 1;
        if !policy.is_healthy(status_code) {
            self.failed_samples += 1;
        }
    }

    /// Share of healthy samples; `None` when there are no samples.
    pub fn uptime_percent(&self) -> Option<f64> {
        self.downtime_percent().map(|down| 100.0 - down)
    }

    /// `None` when there are no samples.
    pub fn downtime_percent(&self) -> Option<f64> {
        if self.total_samples == 0 {
            return None;
        }
        Some(100.0 * self.failed_samples as f64 / self.total_samples as f64)
    }
}

/// Per-address packet loss summary, derived at report time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityAggregate {
    pub address: String,
    pub total_samples: u64,
    pub weighted_loss: f64,
}

impl ConnectivityAggregate {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            total_samples: 0,
            weighted_loss: 0.0,
        }
    }

    /// A failed burst counts as fully lost, a successful one by its loss fraction.
    pub fn absorb(&mut self, exit_code: ExitCode, packet_loss: f64) {
        self.total_samples += 1;
        self.weighted_loss += match exit_code {
            ExitCode::Success => loss_fraction(packet_loss),
            ExitCode::Failure => 1.0,
        };
    }

    pub fn unreachable_percent(&self) -> Option<f64> {
        if self.total_samples == 0 {
            return None;
        }
        Some(100.0 * self.weighted_loss / self.total_samples as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_aggregate_counts_failures() {
        let mut agg = ServiceAggregate::new("svc-a");
        for code in [200, 200, 404, 200] {
            agg.absorb(code, StatusPolicy::Exact);
        }
        assert_eq!(agg.total_samples, 4);
        assert_eq!(agg.failed_samples, 1);
        assert_eq!(agg.uptime_percent(), Some(75.0));
        assert_eq!(agg.downtime_percent(), Some(25.0));
    }

    #[test]
    fn test_connectivity_aggregate_weights_partial_loss() {
        let mut agg = ConnectivityAggregate::new("10.0.0.1");
        agg.absorb(ExitCode::Success, 0.0);
        agg.absorb(ExitCode::Failure, 100.0);
        agg.absorb(ExitCode::Success, 40.0);
        assert_eq!(agg.total_samples, 3);
        assert!((agg.weighted_loss - 1.4).abs() < 1e-9);
        let pct = agg.unreachable_percent().unwrap();
        assert_eq!(format!("{:.1}", pct), "46.7");
    }

    #[test]
    fn test_empty_aggregates_have_no_percentage() {
        assert_eq!(ServiceAggregate::new("svc").downtime_percent(), None);
        assert_eq!(ServiceAggregate::new("svc").uptime_percent(), None);
        assert_eq!(ConnectivityAggregate::new("10.0.0.1").unreachable_percent(), None);
    }

    #[test]
    fn test_exit_code_conversion() {
        assert_eq!(ExitCode::from_i64(0), ExitCode::Success);
        assert_eq!(ExitCode::from_i64(1), ExitCode::Failure);
        assert_eq!(ExitCode::from_i64(2), ExitCode::Failure);
        assert_eq!(ExitCode::Failure.as_i64(), 1);
    }
}
