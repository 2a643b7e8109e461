//! In-process stand-in for the InfluxDB 1.x HTTP API, for tests.
//!
//! Understands exactly the statement shapes the time-series store issues:
//! `SHOW TAG VALUES ... WITH KEY` and `SELECT count|sum(field) ... [WHERE
//! clauses joined by AND] GROUP BY tag`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
}

#[derive(Default)]
struct FakeState {
    points: Mutex<Vec<Point>>,
    fail_writes: AtomicBool,
    write_attempts: AtomicUsize,
}

pub struct FakeInflux {
    addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeInflux {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/write", post(handle_write))
            .route("/query", get(handle_query))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> usize {
        self.state.write_attempts.load(Ordering::SeqCst)
    }

    pub fn points(&self) -> Vec<Point> {
        self.state.points.lock().unwrap().clone()
    }
}

async fn handle_write(State(state): State<Arc<FakeState>>, body: String) -> StatusCode {
    state.write_attempts.fetch_add(1, Ordering::SeqCst);
    if state.fail_writes.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let mut points = state.points.lock().unwrap();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        match parse_line(line) {
            Some(p) => points.push(p),
            None => return StatusCode::BAD_REQUEST,
        }
    }
    StatusCode::NO_CONTENT
}

fn parse_line(line: &str) -> Option<Point> {
    let (key, rest) = line.split_once(' ')?;
    let fields = rest.split(' ').next()?;

    let mut key_parts = key.split(',');
    let measurement = key_parts.next()?.to_string();
    let mut tags = BTreeMap::new();
    for kv in key_parts {
        let (k, v) = kv.split_once('=')?;
        tags.insert(k.to_string(), v.to_string());
    }

    let mut parsed = BTreeMap::new();
    for kv in fields.split(',') {
        let (k, v) = kv.split_once('=')?;
        parsed.insert(k.to_string(), v.trim_end_matches('i').parse().ok()?);
    }

    Some(Point { measurement, tags, fields: parsed })
}

async fn handle_query(
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let q = params.get("q").cloned().unwrap_or_default();
    let points = state.points.lock().unwrap().clone();

    match evaluate(&q, &points) {
        Some(series) => Json(json!({"results": [{"statement_id": 0, "series": series}]})).into_response(),
        None => (StatusCode::BAD_REQUEST, Json(json!({"error": format!("unsupported query: {}", q)})))
            .into_response(),
    }
}

fn evaluate(q: &str, points: &[Point]) -> Option<Vec<Value>> {
    let show = Regex::new(r#"^SHOW TAG VALUES FROM "(\w+)" WITH KEY = "(\w+)"$"#).unwrap();
    if let Some(caps) = show.captures(q) {
        let (measurement, key) = (&caps[1], &caps[2]);
        let values: BTreeSet<&String> = points
            .iter()
            .filter(|p| p.measurement == measurement)
            .filter_map(|p| p.tags.get(key))
            .collect();
        if values.is_empty() {
            return Some(Vec::new());
        }
        let rows: Vec<Value> = values.into_iter().map(|v| json!([key, v])).collect();
        return Some(vec![json!({"name": measurement, "columns": ["key", "value"], "values": rows})]);
    }

    let select = Regex::new(
        r#"^SELECT (count|sum)\("(\w+)"\) FROM "(\w+)"(?: WHERE (.+?))? GROUP BY "(\w+)"$"#,
    )
    .unwrap();
    let caps = select.captures(q)?;
    let func = caps[1].to_string();
    let field = caps[2].to_string();
    let measurement = caps[3].to_string();
    let clauses = match caps.get(4) {
        Some(w) => parse_clauses(w.as_str())?,
        None => Vec::new(),
    };
    let key = caps[5].to_string();

    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for p in points.iter().filter(|p| p.measurement == measurement) {
        if !clauses.iter().all(|c| c.matches(p)) {
            continue;
        }
        let (Some(tag), Some(v)) = (p.tags.get(&key), p.fields.get(&field)) else {
            continue;
        };
        groups.entry(tag.clone()).or_default().push(*v);
    }

    Some(
        groups
            .into_iter()
            .map(|(tag, values)| {
                let result = if func == "count" {
                    json!(values.len())
                } else {
                    json!(values.iter().sum::<f64>())
                };
                let mut tags = serde_json::Map::new();
                tags.insert(key.clone(), Value::String(tag));
                json!({
                    "name": measurement,
                    "tags": tags,
                    "columns": ["time", func],
                    "values": [["1970-01-01T00:00:00Z", result]],
                })
            })
            .collect(),
    )
}

struct Clause {
    field: String,
    op: String,
    value: f64,
}

impl Clause {
    fn matches(&self, p: &Point) -> bool {
        let Some(v) = p.fields.get(&self.field) else { return false };
        match self.op.as_str() {
            "=" => *v == self.value,
            "<>" => *v != self.value,
            ">=" => *v >= self.value,
            "<=" => *v <= self.value,
            ">" => *v > self.value,
            "<" => *v < self.value,
            _ => false,
        }
    }
}

fn parse_clauses(predicate: &str) -> Option<Vec<Clause>> {
    let re = Regex::new(r#"^"?(\w+)"?\s*(<>|>=|<=|=|<|>)\s*(-?[0-9.]+)$"#).unwrap();
    predicate
        .split(" AND ")
        .map(|part| {
            let caps = re.captures(part.trim())?;
            Some(Clause {
                field: caps[1].to_string(),
                op: caps[2].to_string(),
                value: caps[3].parse().ok()?,
            })
        })
        .collect()
}
