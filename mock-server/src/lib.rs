//! Mock HTTP server for dispatch tests.
//!
//! # Design
//! A single axum router whose state is the arrival log:
//! - `/echo` and `/echo/{*rest}` answer any method with the method, path,
//!   headers and body they received, as JSON.
//! - `/slow/{ms}` sleeps before answering, for timeout tests.
//! - `/status/{code}` answers with the given status.
//! - `/cookies` returns the `Cookie` header; `/cookies/set/{name}/{value}`
//!   sets one.
//! - `/log` lists `METHOD /path` for every other request in arrival order,
//!   so tests can check what order requests reached the server in.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// What the server saw of a request, returned by `/echo`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Arrival order of every request except reads of the log itself.
pub type Arrivals = Arc<Mutex<Vec<String>>>;

pub fn app() -> Router {
    let arrivals: Arrivals = Arc::new(Mutex::new(Vec::new()));
    Router::new()
        .route("/echo", any(echo))
        .route("/echo/{*rest}", any(echo))
        .route("/slow/{ms}", get(slow))
        .route("/status/{code}", any(status))
        .route("/cookies", get(cookies))
        .route("/cookies/set/{name}/{value}", get(set_cookie))
        .route("/log", get(log))
        .with_state(arrivals)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn record(arrivals: &Arrivals, method: &Method, path: &str) {
    tracing::debug!(%method, path, "request received");
    arrivals
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(format!("{method} {path}"));
}

async fn echo(
    State(arrivals): State<Arrivals>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    record(&arrivals, &method, uri.path());
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        headers: collected,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn slow(State(arrivals): State<Arrivals>, Path(ms): Path<u64>) -> &'static str {
    record(&arrivals, &Method::GET, &format!("/slow/{ms}"));
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn status(
    State(arrivals): State<Arrivals>,
    method: Method,
    Path(code): Path<u16>,
) -> Result<(StatusCode, String), StatusCode> {
    record(&arrivals, &method, &format!("/status/{code}"));
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, status.to_string()))
}

async fn cookies(State(arrivals): State<Arrivals>, headers: HeaderMap) -> String {
    record(&arrivals, &Method::GET, "/cookies");
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn set_cookie(
    State(arrivals): State<Arrivals>,
    Path((name, value)): Path<(String, String)>,
) -> impl IntoResponse {
    record(&arrivals, &Method::GET, &format!("/cookies/set/{name}/{value}"));
    (
        [(header::SET_COOKIE, format!("{name}={value}; Path=/"))],
        "ok",
    )
}

async fn log(State(arrivals): State<Arrivals>) -> Json<Vec<String>> {
    Json(arrivals.lock().unwrap_or_else(PoisonError::into_inner).clone())
}
