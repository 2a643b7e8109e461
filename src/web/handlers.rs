//! HTTP request handlers.

use super::AppState;
use crate::db::{ConnectivityAggregate, ServiceAggregate};
use crate::scheduler::Report;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "backend": state.supervisor.store().backend_name(),
        "workers": state.supervisor.running_workers().await,
    }))
}

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.targets().await)
}

#[derive(Debug, Serialize)]
pub struct ServiceSummary {
    #[serde(flatten)]
    pub aggregate: ServiceAggregate,
    pub uptime_percent: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HostSummary {
    #[serde(flatten)]
    pub aggregate: ConnectivityAggregate,
    pub unreachable_percent: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AggregatesResponse {
    pub services: Vec<ServiceSummary>,
    pub hosts: Vec<HostSummary>,
}

pub async fn handle_get_aggregates(State(state): State<AppState>) -> impl IntoResponse {
    match Report::generate(state.supervisor.store()).await {
        Ok(report) => Json(AggregatesResponse {
            services: report
                .services
                .into_iter()
                .map(|aggregate| ServiceSummary {
                    uptime_percent: aggregate.uptime_percent(),
                    aggregate,
                })
                .collect(),
            hosts: report
                .hosts
                .into_iter()
                .map(|aggregate| HostSummary {
                    unreachable_percent: aggregate.unreachable_percent(),
                    aggregate,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}

pub async fn handle_report(State(state): State<AppState>) -> impl IntoResponse {
    match state.supervisor.report().await {
        Ok(report) => report.text.into_response(),
        Err(e) => {
            tracing::error!("On-demand report failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
