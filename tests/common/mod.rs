//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hostdb::{Lifecycle, RouteRegistrar, RunningApp};

pub const MEMORY: &str = "sqlite::memory:";
pub const UNREACHABLE: &str = "sqlite:///nonexistent-hostdb-dir/tenant.db";

/// Config text with two tenants on in-memory sqlite and quiet logging.
///
/// `b_source` is the data source for `b.example.com`; `extra` is appended verbatim.
pub fn config_text(b_source: &str, extra: &str) -> String {
    format!(
        r#"
[application]
host = "127.0.0.1"
port = 0
mode = "test"
request_timeout_secs = 10

[logger]
stdout = false

[database]
driver = "sqlite"
source = "{MEMORY}"

[databases."a.example.com"]
driver = "sqlite"
source = "{MEMORY}"

[databases."b.example.com"]
driver = "sqlite"
source = "{b_source}"

[jobs]
probe_interval_secs = 0
job_timeout_ms = 500

{extra}
"#
    )
}

pub fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("settings.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

pub async fn start(path: &Path, registrars: Vec<RouteRegistrar>) -> RunningApp {
    registrars
        .into_iter()
        .fold(Lifecycle::new(path), |lifecycle, registrar| lifecycle.with_routes(registrar))
        .start()
        .await
        .expect("app should start")
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// `GET /api/v1/db` with the given `Host` header; returns the resolved database name.
pub async fn resolved_database(addr: SocketAddr, host: &str) -> String {
    let body: serde_json::Value = client()
        .get(format!("http://{addr}/api/v1/db"))
        .header(reqwest::header::HOST, host)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["database"].as_str().unwrap().to_string()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
