//! Connectivity probe: a burst of ICMP echoes through the system `ping` utility.

use chrono::Utc;
use regex::Regex;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;

use super::ProbeError;
use crate::config::PingSettings;
use crate::db::{ConnectivityProbeResult, ExitCode};

/// Numbers read from a ping summary.
#[derive(Debug, Clone, PartialEq)]
pub struct PingSummary {
    pub packet_loss: f64,
    pub total_time_ms: f64,
}

/// Probe a host once. Never fails: a failed burst yields the failure sentinel.
pub async fn run_connectivity_probe(address: &str, settings: &PingSettings) -> ConnectivityProbeResult {
    let time = Utc::now();

    match run_ping_burst(address, settings).await {
        Ok(summary) => ConnectivityProbeResult {
            time,
            address: address.to_string(),
            total_time_ms: summary.total_time_ms,
            exit_code: ExitCode::Success,
            packet_loss: summary.packet_loss,
        },
        Err(e) => {
            tracing::debug!("Ping burst to {} failed: {}", address, e);
            failure_result(time, address, settings)
        }
    }
}

fn failure_result(
    time: chrono::DateTime<Utc>,
    address: &str,
    settings: &PingSettings,
) -> ConnectivityProbeResult {
    ConnectivityProbeResult {
        time,
        address: address.to_string(),
        total_time_ms: settings.failure_total_time_ms,
        exit_code: ExitCode::Failure,
        packet_loss: 100.0,
    }
}

fn ping_args(address: &str, settings: &PingSettings) -> Vec<String> {
    // iputils only takes whole seconds for -W on older releases.
    let echo_timeout = settings.echo_timeout.as_secs_f64().ceil().max(1.0) as u64;
    vec![
        "-c".to_string(),
        settings.count.to_string(),
        "-i".to_string(),
        settings.interval.as_secs_f64().to_string(),
        "-W".to_string(),
        echo_timeout.to_string(),
        address.to_string(),
    ]
}

async fn run_ping_burst(address: &str, settings: &PingSettings) -> Result<PingSummary, ProbeError> {
    let deadline = settings.deadline();

    let output = tokio::time::timeout(
        deadline,
        Command::new(&settings.program)
            .args(ping_args(address, settings))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ProbeError::Transport(format!("ping did not finish within {:?}", deadline)))?
    .map_err(|e| ProbeError::Transport(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        return Err(ProbeError::Transport(format!(
            "ping exited with {}: {}",
            output.status,
            stdout.trim()
        )));
    }

    parse_ping_summary(&stdout)
}

/// Parse the iputils summary line:
/// `5 packets transmitted, 4 received, 20% packet loss, time 4005ms`.
pub fn parse_ping_summary(output: &str) -> Result<PingSummary, ProbeError> {
    static LOSS: OnceLock<Regex> = OnceLock::new();
    let loss = LOSS.get_or_init(|| Regex::new(r"(?P<val>[0-9]+(?:\.[0-9]+)?)% packet loss").unwrap());

    static TIME: OnceLock<Regex> = OnceLock::new();
    let time = TIME.get_or_init(|| Regex::new(r"packet loss.*?time (?P<val>[0-9]+(?:\.[0-9]+)?)\s*ms").unwrap());

    let packet_loss = loss
        .captures(output)
        .and_then(|c| c.name("val"))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    let total_time_ms = time
        .captures(output)
        .and_then(|c| c.name("val"))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    match (packet_loss, total_time_ms) {
        (Some(packet_loss), Some(total_time_ms)) => Ok(PingSummary { packet_loss, total_time_ms }),
        _ => Err(ProbeError::Transport(format!(
            "failed to parse ping output: {}",
            output
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_clean_burst() {
        let output = r#"PING 172.24.4.10 (172.24.4.10) 56(84) bytes of data.
64 bytes from 172.24.4.10: icmp_seq=1 ttl=64 time=0.512 ms
64 bytes from 172.24.4.10: icmp_seq=5 ttl=64 time=0.433 ms

--- 172.24.4.10 ping statistics ---
5 packets transmitted, 5 received, 0% packet loss, time 804ms
rtt min/avg/max/mdev = 0.433/0.470/0.512/0.028 ms"#;
        let summary = parse_ping_summary(output).unwrap();
        assert_eq!(summary, PingSummary { packet_loss: 0.0, total_time_ms: 804.0 });
    }

    #[test]
    fn test_parse_partial_loss() {
        let output = "5 packets transmitted, 3 received, 40% packet loss, time 812ms";
        let summary = parse_ping_summary(output).unwrap();
        assert_eq!(summary.packet_loss, 40.0);
        assert_eq!(summary.total_time_ms, 812.0);
    }

    #[test]
    fn test_parse_with_errors_field() {
        let output = "5 packets transmitted, 0 received, +5 errors, 100% packet loss, time 4006ms";
        let summary = parse_ping_summary(output).unwrap();
        assert_eq!(summary.packet_loss, 100.0);
        assert_eq!(summary.total_time_ms, 4006.0);
    }

    #[test]
    fn test_parse_without_total_time_fails() {
        let output = "5 packets transmitted, 5 packets received, 0.0% packet loss";
        assert!(parse_ping_summary(output).is_err());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_ping_summary("ping: unknown host nowhere").is_err());
    }

    #[test]
    fn test_ping_args() {
        let args = ping_args("10.0.0.1", &PingSettings::default());
        assert_eq!(args, ["-c", "5", "-i", "0.2", "-W", "1", "10.0.0.1"]);

        let settings = PingSettings {
            echo_timeout: Duration::from_millis(1500),
            ..PingSettings::default()
        };
        assert_eq!(ping_args("h", &settings)[5], "2");
    }

    #[tokio::test]
    async fn test_missing_utility_yields_failure_sentinel() {
        let settings = PingSettings {
            program: "/nonexistent/ping".to_string(),
            failure_total_time_ms: 2000.0,
            ..PingSettings::default()
        };
        let r = run_connectivity_probe("10.0.0.1", &settings).await;
        assert_eq!(r.exit_code, ExitCode::Failure);
        assert_eq!(r.packet_loss, 100.0);
        assert_eq!(r.total_time_ms, 2000.0);
        assert_eq!(r.address, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_failing_utility_yields_failure_sentinel() {
        let settings = PingSettings {
            program: "false".to_string(),
            ..PingSettings::default()
        };
        let r = run_connectivity_probe("10.0.0.1", &settings).await;
        assert_eq!(r.exit_code, ExitCode::Failure);
        assert_eq!(r.total_time_ms, 1000.0);
    }
}
