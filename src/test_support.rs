//! Fake DSM and ingestion servers bound to loopback for tests.

use crate::appliance::dsm::{API_AUTH, API_DSM_INFO, API_STORAGE, API_UTILIZATION};
use crate::config::ApplianceConfig;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    addr
}

pub fn appliance_config(addr: SocketAddr, password: &str) -> ApplianceConfig {
    ApplianceConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: "monitor".to_string(),
        password: Some(password.to_string()),
        ..ApplianceConfig::default()
    }
}

#[derive(Clone, Default)]
pub struct FakeDsm {
    /// Answer this api with `success: false` and the given code.
    pub failing_api: Option<(&'static str, u16)>,
    /// Sleep well past any test timeout before answering this api.
    pub stalled_api: Option<&'static str>,
    /// Answer this api with an HTML error page.
    pub garbled_api: Option<&'static str>,
    /// Advertise this api at a different path or absolute URL.
    pub relocated_api: Option<(&'static str, &'static str)>,
    pub logouts: Arc<AtomicUsize>,
}

impl FakeDsm {
    pub const PASSWORD: &'static str = "correct-horse";
    pub const SID: &'static str = "fake-sid-0001";

    pub fn router(&self) -> Router {
        Router::new()
            .route("/webapi/query.cgi", get(api_info))
            .route("/webapi/entry.cgi", get(entry))
            .with_state(self.clone())
    }
}

async fn api_info(State(fake): State<FakeDsm>) -> Json<Value> {
    let path = |api: &str| match fake.relocated_api {
        Some((relocated, target)) if relocated == api => target,
        _ => "entry.cgi",
    };
    Json(json!({
        "success": true,
        "data": {
            API_AUTH: { "path": path(API_AUTH), "minVersion": 1, "maxVersion": 7 },
            API_DSM_INFO: { "path": path(API_DSM_INFO), "minVersion": 1, "maxVersion": 2 },
            API_UTILIZATION: { "path": path(API_UTILIZATION), "minVersion": 1, "maxVersion": 1 },
            API_STORAGE: { "path": path(API_STORAGE), "minVersion": 1, "maxVersion": 1 },
        }
    }))
}

async fn entry(
    State(fake): State<FakeDsm>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let api = params.get("api").map(String::as_str).unwrap_or_default();
    let method = params.get("method").map(String::as_str).unwrap_or_default();

    if fake.stalled_api == Some(api) {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    if fake.garbled_api == Some(api) {
        return (StatusCode::OK, "<html>502 Bad Gateway</html>").into_response();
    }
    if let Some((failing, code)) = fake.failing_api {
        if failing == api {
            return failure(code);
        }
    }

    if api == API_AUTH && method == "login" {
        if params.get("passwd").map(String::as_str) != Some(FakeDsm::PASSWORD) {
            return failure(400);
        }
        return success(json!({ "sid": FakeDsm::SID }));
    }
    if params.get("_sid").map(String::as_str) != Some(FakeDsm::SID) {
        return failure(119);
    }

    match (api, method) {
        (API_AUTH, "logout") => {
            fake.logouts.fetch_add(1, Ordering::SeqCst);
            Json(json!({ "success": true })).into_response()
        }
        (API_DSM_INFO, "getinfo") => success(json!({
            "model": "DS920+",
            "ram": 4096,
            "serial": "2040QWR123456",
            "temperature": 41,
            "temperature_warn": false,
            "uptime": 1_234_567,
            "version_string": "DSM 7.2.1-69057 Update 5"
        })),
        (API_UTILIZATION, "get") => success(json!({
            "cpu": { "user_load": 5, "system_load": 3, "other_load": 1 },
            "memory": { "real_usage": 37 },
            "network": [
                { "device": "total", "rx": 4096, "tx": 2048 },
                { "device": "eth0", "rx": 4096, "tx": 2048 }
            ]
        })),
        (API_STORAGE, "load_info") => success(json!({
            "volumes": [
                { "id": "volume_1", "status": "normal",
                  "size": { "total": "2199023255552", "used": "1099511627776" } },
                { "id": "volume_2", "status": "normal",
                  "size": { "total": "2199023255552", "used": "2199023255552" } }
            ],
            "disks": [
                { "id": "sata1", "name": "Drive 1", "status": "normal",
                  "smart_status": "normal", "temp": 36 },
                { "id": "sata2", "name": "Drive 2", "status": "normal",
                  "smart_status": "normal", "temp": 38 }
            ]
        })),
        _ => failure(103),
    }
}

fn success(data: Value) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn failure(code: u16) -> Response {
    Json(json!({ "success": false, "error": { "code": code } })).into_response()
}

/// Ingestion endpoint that records every body and answers with a fixed status.
#[derive(Clone)]
pub struct FakeIngest {
    pub status: StatusCode,
    pub received: Arc<Mutex<Vec<Value>>>,
}

impl FakeIngest {
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/synology", post(ingest))
            .with_state(self.clone())
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().expect("ingest log").clone()
    }
}

async fn ingest(State(fake): State<FakeIngest>, Json(body): Json<Value>) -> Response {
    fake.received.lock().expect("ingest log").push(body);
    let text = if fake.status.is_success() {
        r#"{"inserted":1}"#
    } else {
        r#"{"detail":"ingest unavailable"}"#
    };
    (fake.status, text).into_response()
}

pub fn ingest_url(addr: SocketAddr) -> reqwest::Url {
    reqwest::Url::parse(&format!("http://{addr}/api/synology")).expect("ingest url")
}
