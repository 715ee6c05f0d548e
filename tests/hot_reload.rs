//! Configuration changes applied to a running server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config_text, eventually, resolved_database, start, write_config, MEMORY, UNREACHABLE};

const TENANT_C: &str = r#"
[databases."c.example.com"]
driver = "sqlite"
source = "sqlite::memory:"
"#;

#[tokio::test]
async fn file_change_adds_tenant() {
    let reload = "[reload]\nwatch = \"poll\"\npoll_interval_ms = 50\ndebounce_ms = 50\nretire_grace_ms = 200";
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_text(MEMORY, reload));
    let app = start(&path, vec![]).await;
    let addr = app.local_addr();

    assert_eq!(resolved_database(addr, "c.example.com").await, "*");
    tokio::time::sleep(Duration::from_millis(200)).await;
    write_config(dir.path(), &format!("{}\n{TENANT_C}", config_text(MEMORY, reload)));

    let switched = eventually(Duration::from_secs(5), move || async move {
        resolved_database(addr, "c.example.com").await == "c.example.com"
    })
    .await;
    assert!(switched, "new tenant was not picked up");
    assert!(app.registry().version() >= 2);
    assert!(app.config().databases.contains_key("c.example.com"));

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_rebuild_keeps_serving_old_handles() {
    let reload = "[reload]\nenabled = false\ndebounce_ms = 10";
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_text(MEMORY, reload));
    let app = start(&path, vec![]).await;
    let addr = app.local_addr();
    let before = app.registry().resolve_host("b.example.com");

    write_config(dir.path(), &config_text(UNREACHABLE, reload));
    app.reload_handle().unwrap().request_reload();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(app.registry().version(), 1);
    assert_eq!(app.config().version, 1);
    let after = app.registry().resolve_host("b.example.com");
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(resolved_database(addr, "b.example.com").await, "b.example.com");

    let ping = common::client()
        .get(format!("http://{addr}/api/v1/db/ping"))
        .header(reqwest::header::HOST, "b.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(ping.status(), 200);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn superseded_handles_close_after_grace() {
    let reload = "[reload]\nenabled = false\ndebounce_ms = 10\nretire_grace_ms = 300";
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_text(MEMORY, reload));
    let app = start(&path, vec![]).await;
    let old = app.registry().resolve_host("a.example.com");

    write_config(dir.path(), &format!("{}\n{TENANT_C}", config_text(MEMORY, reload)));
    app.reload_handle().unwrap().request_reload();

    let registry = Arc::clone(app.registry());
    let published = eventually(Duration::from_secs(5), || {
        let registry = Arc::clone(&registry);
        async move { registry.version() == 2 }
    })
    .await;
    assert!(published);

    // Requests that picked up the old handle can still use it.
    assert!(!old.is_closed());
    old.ping().await.unwrap();
    assert_eq!(app.registry().retiring_versions(), vec![1]);

    let closed = eventually(Duration::from_secs(5), || {
        let old = Arc::clone(&old);
        async move { old.is_closed() }
    })
    .await;
    assert!(closed, "retired handle was not closed");
    assert!(!app.registry().resolve_host("a.example.com").is_closed());

    app.shutdown().await.unwrap();
}
