//! HTTP service probe implementation.

use chrono::Utc;
use reqwest::{redirect, Client, Method};
use std::time::{Duration, Instant};

use super::ProbeError;
use crate::config::ProbeMethod;
use crate::db::{ServiceProbeResult, ServiceTarget, TIMEOUT_STATUS};

/// Issues one availability probe per call against a service target.
#[derive(Clone)]
pub struct ServiceProber {
    client: Client,
    method: Method,
    timeout: Duration,
}

impl ServiceProber {
    pub fn new(method: ProbeMethod, timeout: Duration) -> Result<Self, ProbeError> {
        // The status the target answers with is what gets recorded, so redirects are not followed.
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| ProbeError::Unexpected(format!("failed to build HTTP client: {}", e)))?;

        let method = match method {
            ProbeMethod::Head => Method::HEAD,
            ProbeMethod::Get => Method::GET,
        };

        Ok(Self { client, method, timeout })
    }

    /// Probe the target once.
    ///
    /// A transport failure still yields a sample (status 408, timeout flag set).
    /// Only unexpected failures return `Err`.
    pub async fn probe(&self, target: &ServiceTarget) -> Result<ServiceProbeResult, ProbeError> {
        let time = Utc::now();

        match self.attempt(&target.base_url).await {
            Ok((address, status_code, elapsed)) => Ok(ServiceProbeResult {
                time,
                service_name: target.name.clone(),
                address,
                status_code,
                timeout: false,
                elapsed_us: elapsed.as_micros() as f64,
            }),
            Err(ProbeError::Transport(e)) => {
                tracing::debug!("Service {} unreachable: {}", target.name, e);
                Ok(ServiceProbeResult {
                    time,
                    service_name: target.name.clone(),
                    address: target.base_url.clone(),
                    status_code: TIMEOUT_STATUS,
                    timeout: true,
                    elapsed_us: self.timeout.as_micros() as f64,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the effective address, the status code and the response time.
    async fn attempt(&self, base_url: &str) -> Result<(String, u16, Duration), ProbeError> {
        let (status, elapsed) = self.send(self.method.clone(), base_url).await?;
        if status < 400 {
            return Ok((base_url.to_string(), status, elapsed));
        }

        // Some endpoints reject the bare URL but expose a healthcheck.
        let healthcheck = healthcheck_url(base_url);
        let (status, elapsed) = self.send(Method::GET, &healthcheck).await?;
        if status < 300 {
            Ok((healthcheck, status, elapsed))
        } else {
            Ok((base_url.to_string(), status, elapsed))
        }
    }

    async fn send(&self, method: Method, url: &str) -> Result<(u16, Duration), ProbeError> {
        let start = Instant::now();
        let response = self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify)?;
        Ok((response.status().as_u16(), start.elapsed()))
    }
}

/// `<base>/healthcheck`, without doubling the slash.
pub fn healthcheck_url(base_url: &str) -> String {
    if base_url.ends_with('/') {
        format!("{}healthcheck", base_url)
    } else {
        format!("{}/healthcheck", base_url)
    }
}

fn classify(e: reqwest::Error) -> ProbeError {
    if e.is_builder() {
        ProbeError::Unexpected(e.to_string())
    } else {
        ProbeError::Transport(e.to_string())
    }
}
