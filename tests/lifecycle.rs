//! Startup, request routing and shutdown of a full server process.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use hostdb::http::AppState;
use hostdb::lifecycle::LifecyclePhase;
use hostdb::{Lifecycle, LifecycleError, RouteRegistrar};

use common::{
    client, config_text, eventually, resolved_database, start, write_config, MEMORY, UNREACHABLE,
};

fn slow_route(delay: Duration) -> RouteRegistrar {
    Arc::new(move |router: Router<AppState>| {
        router.route(
            "/slow",
            get(move || async move {
                tokio::time::sleep(delay).await;
                "done"
            }),
        )
    })
}

#[tokio::test]
async fn requests_resolve_database_by_host() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_text(MEMORY, "[reload]\nenabled = false"));
    let app = start(&path, vec![]).await;
    let addr = app.local_addr();
    assert_eq!(app.phase(), LifecyclePhase::Serving);

    assert_eq!(resolved_database(addr, "a.example.com").await, "a.example.com");
    assert_eq!(resolved_database(addr, "B.EXAMPLE.COM").await, "b.example.com");
    assert_eq!(resolved_database(addr, "c.example.com").await, "*");
    assert_eq!(resolved_database(addr, "a.example.com:8000").await, "a.example.com");

    let health = client()
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    let ping = client()
        .get(format!("http://{addr}/api/v1/db/ping"))
        .header(reqwest::header::HOST, "a.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(ping.status(), 200);

    let registry = Arc::clone(app.registry());
    let report = app.shutdown().await.unwrap();
    assert!(report.abandoned_jobs.is_empty());
    assert!(registry.snapshot().handles().all(|handle| handle.is_closed()));
}

#[tokio::test]
async fn stop_request_shuts_down_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_text(MEMORY, "[reload]\nenabled = false"));
    let app = start(&path, vec![]).await;
    let stop = app.stop_handle();
    let registry = Arc::clone(app.registry());

    let running = tokio::spawn(app.run_until_signal());
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.trigger();

    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("shutdown should finish within the deadline")
        .unwrap()
        .unwrap();
    assert!(report.elapsed < Duration::from_secs(5));
    assert!(registry.snapshot().handles().all(|handle| handle.is_closed()));
}

#[tokio::test]
async fn in_flight_request_finishes_within_grace() {
    let dir = tempfile::tempdir().unwrap();
    let extra = "[reload]\nenabled = false\n\n[shutdown]\ngrace_ms = 3000";
    let path = write_config(dir.path(), &config_text(MEMORY, extra));
    let app = start(&path, vec![slow_route(Duration::from_millis(300))]).await;
    let addr = app.local_addr();

    let request = tokio::spawn(async move {
        client()
            .get(format!("http://{addr}/slow"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    });
    let running = &app;
    let arrived = eventually(Duration::from_secs(2), move || async move {
        running.in_flight() == 1
    })
    .await;
    assert!(arrived, "request never reached the router");

    app.shutdown().await.unwrap();
    assert_eq!(request.await.unwrap(), "done");
}

#[tokio::test]
async fn drain_deadline_exceeded_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let extra = "[reload]\nenabled = false\n\n[shutdown]\ngrace_ms = 200";
    let path = write_config(dir.path(), &config_text(MEMORY, extra));
    let app = start(&path, vec![slow_route(Duration::from_millis(1200))]).await;
    let addr = app.local_addr();
    let registry = Arc::clone(app.registry());

    let request = tokio::spawn(async move {
        client()
            .get(format!("http://{addr}/slow"))
            .send()
            .await?
            .text()
            .await
    });
    let running = &app;
    let arrived = eventually(Duration::from_secs(2), move || async move {
        running.in_flight() == 1
    })
    .await;
    assert!(arrived, "request never reached the router");

    let err = app.shutdown().await.unwrap_err();
    match err {
        LifecycleError::ShutdownTimeout { grace, in_flight } => {
            assert_eq!(grace, Duration::from_millis(200));
            assert_eq!(in_flight, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Cleanup still ran.
    assert!(registry.snapshot().handles().all(|handle| handle.is_closed()));

    // The connection was closed at the deadline instead of being left to finish.
    let outcome = tokio::time::timeout(Duration::from_millis(500), request)
        .await
        .expect("client should see the closed connection promptly")
        .unwrap();
    assert!(outcome.is_err(), "request completed after forced close: {outcome:?}");
}

#[tokio::test]
async fn invalid_config_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[application]\nhost = \"127.0.0.1\"\n");
    let err = Lifecycle::new(&path).start().await.err().unwrap();
    assert!(matches!(err, LifecycleError::Config(_)));
}

#[tokio::test]
async fn unreachable_required_tenant_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_text(UNREACHABLE, ""));
    let err = Lifecycle::new(&path).start().await.err().unwrap();
    match err {
        LifecycleError::Build(build) => assert_eq!(build.name(), "b.example.com"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn optional_tenant_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let text = config_text(UNREACHABLE, "[reload]\nenabled = false").replace(
        &format!("source = \"{UNREACHABLE}\""),
        &format!("source = \"{UNREACHABLE}\"\nrequired = false"),
    );
    let path = write_config(dir.path(), &text);
    let app = start(&path, vec![]).await;

    assert_eq!(resolved_database(app.local_addr(), "b.example.com").await, "*");
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn port_in_use_fails_startup() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let dir = tempfile::tempdir().unwrap();
    let text = config_text(MEMORY, "").replace("port = 0", &format!("port = {port}"));
    let path = write_config(dir.path(), &text);

    let err = Lifecycle::new(&path).start().await.err().unwrap();
    assert!(matches!(err, LifecycleError::Listen(_)));
}

#[tokio::test]
async fn failed_bind_leaves_metrics_port_free() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let metrics_addr = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap()
    };

    let dir = tempfile::tempdir().unwrap();
    let extra = format!("[metrics]\nenabled = true\naddress = \"{metrics_addr}\"");
    let text = config_text(MEMORY, &extra).replace("port = 0", &format!("port = {port}"));
    let path = write_config(dir.path(), &text);

    let err = Lifecycle::new(&path).start().await.err().unwrap();
    assert!(matches!(err, LifecycleError::Listen(_)));
    std::net::TcpListener::bind(metrics_addr).expect("metrics exporter should not be running");
}
