//! Aggregation arithmetic shared by both backends.

use serde_json::Value;

/// Divisor turning a stored packet-loss percentage into a lost-sample fraction.
pub const PERCENT_SCALE: f64 = 100.0;

/// Fraction of a sample lost, given its packet-loss percentage.
pub fn loss_fraction(packet_loss_percent: f64) -> f64 {
    packet_loss_percent / PERCENT_SCALE
}

/// Which HTTP status codes count as a healthy sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Only 200 and 300.
    #[default]
    Exact,
    /// Anything below 400.
    Below400,
}

impl StatusPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Some(StatusPolicy::Exact),
            "below-400" | "below400" | "lt400" => Some(StatusPolicy::Below400),
            _ => None,
        }
    }

    pub fn is_healthy(self, status_code: u16) -> bool {
        match self {
            StatusPolicy::Exact => status_code == 200 || status_code == 300,
            StatusPolicy::Below400 => status_code < 400,
        }
    }

    /// InfluxQL predicate selecting failed samples.
    pub fn failure_predicate(self) -> &'static str {
        match self {
            StatusPolicy::Exact => "status_code <> 200 AND status_code <> 300",
            StatusPolicy::Below400 => "status_code >= 400",
        }
    }
}

/// Read a numeric cell that may arrive as a JSON number or a string.
///
/// String parsing goes through `str::parse`, which never consults the locale.
pub fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loss_fraction() {
        assert_eq!(loss_fraction(0.0), 0.0);
        assert_eq!(loss_fraction(100.0), 1.0);
        assert!((loss_fraction(40.0) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_exact_policy() {
        let p = StatusPolicy::Exact;
        assert!(p.is_healthy(200));
        assert!(p.is_healthy(300));
        assert!(!p.is_healthy(201));
        assert!(!p.is_healthy(204));
        assert!(!p.is_healthy(301));
        assert!(!p.is_healthy(408));
    }

    #[test]
    fn test_below_400_policy() {
        let p = StatusPolicy::Below400;
        assert!(p.is_healthy(204));
        assert!(p.is_healthy(302));
        assert!(!p.is_healthy(400));
        assert!(!p.is_healthy(503));
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!(StatusPolicy::parse("exact"), Some(StatusPolicy::Exact));
        assert_eq!(StatusPolicy::parse(" Below-400 "), Some(StatusPolicy::Below400));
        assert_eq!(StatusPolicy::parse("2xx"), None);
    }

    #[test]
    fn test_json_number() {
        assert_eq!(json_number(&json!(4)), Some(4.0));
        assert_eq!(json_number(&json!(1.5)), Some(1.5));
        assert_eq!(json_number(&json!("12")), Some(12.0));
        assert_eq!(json_number(&json!(" 0.25 ")), Some(0.25));
        assert_eq!(json_number(&json!("1,5")), None);
        assert_eq!(json_number(&json!(null)), None);
    }
}
