//! Dashboard regression tests.
//!
//! Drives the full router against an in-memory cache and fake upstreams:
//! cold start, gating, mutations with follow-up refreshes, and the log
//! viewer's paging.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use appdash_api::{ApiState, INGEST_TOKEN_HEADER, USER_HEADER, build_router};
use appdash_refresh::fake::{FakeControlPlane, FakeRoster};
use appdash_refresh::{NodeFact, RefreshController, RefreshScheduler};
use appdash_state::StateStore;

struct Dashboard {
    router: Router,
    store: StateStore,
    controller: Arc<RefreshController>,
    control_plane: Arc<FakeControlPlane>,
    roster: Arc<FakeRoster>,
}

fn dashboard() -> Dashboard {
    let store = StateStore::open_in_memory().unwrap();

    let control_plane = Arc::new(FakeControlPlane::with_apps([
        ("guestbook", true),
        ("blog", false),
    ]));
    control_plane.nodes.lock().unwrap().push(NodeFact {
        ip: "10.0.0.1".into(),
        cpu: 20.0,
        memory: 55.5,
        disk: 12.0,
        roles: vec!["shadow".into(), "appengine".into()],
    });

    let roster = Arc::new(FakeRoster::default());
    roster.add_user("admin@example.com", true, true, &[]);
    roster.add_user("dev@example.com", false, true, &["guestbook"]);
    roster.set_port("guestbook", 8080);

    let controller = Arc::new(RefreshController::new(
        store.clone(),
        control_plane.clone(),
        roster.clone(),
    ));
    let scheduler = RefreshScheduler::new(Arc::clone(&controller))
        .with_mutation_delay(Duration::from_millis(20));
    let state = ApiState::new(store.clone(), scheduler)
        .with_ingest_token(Some("shipper-token".into()))
        .with_page_size(3);

    Dashboard {
        router: build_router(state),
        store,
        controller,
        control_plane,
        roster,
    }
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, user: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn log_upload(host: &str, stamps: &[u64], token: &str) -> Request<Body> {
    let logs: Vec<Value> = stamps
        .iter()
        .map(|ts| json!({ "message": format!("GET / at {ts}"), "level": 3, "timestamp": ts }))
        .collect();
    let body = json!({ "service_name": "guestbook", "host": host, "logs": logs });
    Request::builder()
        .method("POST")
        .uri("/logs/upload")
        .header("content-type", "application/json")
        .header(INGEST_TOKEN_HEADER, token)
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn cold_start_populates_cluster_view() {
    let d = dashboard();
    assert!(d.controller.ensure_warm().await.unwrap());

    let (status, body) = send(&d.router, get("/api/v1/cluster", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["head_node"], "10.0.0.1");
    assert_eq!(body["data"]["table"], "cassandra");
    assert_eq!(body["data"]["monitoring_url"], "http://10.0.0.1:8050");
    assert_eq!(body["data"]["apps"], json!(["blog", "guestbook"]));
    assert_eq!(body["data"]["nodes"][0]["memory"], "55.5");

    // Second start finds the snapshot and does not refresh again.
    assert!(!d.controller.ensure_warm().await.unwrap());
    assert_eq!(d.control_plane.stats_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn anonymous_callers_are_refused() {
    let d = dashboard();
    d.controller.refresh_all().await;

    for uri in ["/api/v1/status", "/api/v1/apps", "/logs", "/logs/guestbook"] {
        let (status, body) = send(&d.router, get(uri, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["success"], false);
    }
    let (status, _) = send(&d.router, post_json("/api/v1/refresh", None, &json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn owner_sees_only_own_apps_with_urls() {
    let d = dashboard();
    d.controller.refresh_all().await;

    let (status, body) = send(&d.router, get("/api/v1/apps", Some("dev@example.com"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({ "guestbook": "http://apps.example.com:8080" })
    );

    let (_, body) = send(&d.router, get("/api/v1/status", Some("admin@example.com"))).await;
    assert_eq!(body["data"]["apps"]["blog"], Value::Null);
    assert_eq!(body["data"]["apis"]["memcache"], "running");
}

#[tokio::test]
async fn delete_refreshes_now_and_after_delay() {
    let d = dashboard();
    d.controller.refresh_all().await;
    let before = d.control_plane.stats_calls.load(Ordering::SeqCst);

    let (status, _) = send(
        &d.router,
        post_json(
            "/api/v1/apps/delete",
            Some("dev@example.com"),
            &json!({ "app_id": "guestbook" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!d.store.app_entries().unwrap().contains_key("guestbook"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(d.control_plane.stats_calls.load(Ordering::SeqCst), before + 2);
    // The control plane no longer reports the app, so refreshes keep it gone.
    assert!(!d.store.app_entries().unwrap().contains_key("guestbook"));
}

#[tokio::test]
async fn failing_upstream_keeps_serving_stale_data() {
    let d = dashboard();
    d.controller.refresh_all().await;
    d.control_plane.fail_everything.store(true, Ordering::SeqCst);

    let (status, body) = send(
        &d.router,
        get("/api/v1/cluster?forcerefresh=1", Some("admin@example.com")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["apps"], json!(["blog", "guestbook"]));
    assert_eq!(body["data"]["head_node"], "10.0.0.1");
}

#[tokio::test]
async fn signup_then_permission_grant() {
    let d = dashboard();
    let (status, _) = send(
        &d.router,
        post_json(
            "/api/v1/users",
            None,
            &json!({
                "email": "new@example.com",
                "password": "secret1",
                "password_confirmation": "secret1"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // The user shows up in the cache once the triggered refresh has run.
    d.controller.refresh_all().await;
    assert!(d.store.user_account("new@example.com").unwrap().is_some());

    let (status, body) = send(
        &d.router,
        post_json(
            "/api/v1/authorize",
            Some("admin@example.com"),
            &json!({ "changes": [
                { "email": "new@example.com", "permission": "upload_app", "enabled": true }
            ] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"], "Enabling upload_app for new@example.com.");
    assert!(d.roster.users.lock().unwrap()["new@example.com"].upload);
}

#[tokio::test]
async fn log_viewer_pages_newest_first() {
    let d = dashboard();
    d.controller.refresh_all().await;

    let (status, _) = send(&d.router, log_upload("h1", &[100, 102, 104], "wrong")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&d.router, log_upload("h1", &[100, 102, 104], "shipper-token")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "lines": 3, "records": 3 }));
    let (status, _) = send(&d.router, log_upload("h2", &[101, 103, 103], "shipper-token")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&d.router, get("/logs/guestbook", Some("dev@example.com"))).await;
    assert_eq!(body["data"]["hosts"], json!(["h1", "h2"]));

    let (_, first) = send(
        &d.router,
        get("/logs/guestbook/all?next_cursor=None", Some("dev@example.com")),
    )
    .await;
    let stamps: Vec<u64> = first["data"]["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["timestamp"].as_u64().unwrap())
        .collect();
    assert_eq!(stamps, vec![104, 103, 102]);
    assert_eq!(first["data"]["records"][1]["lines"].as_array().unwrap().len(), 2);
    assert_eq!(first["data"]["has_more"], true);

    // Newer logs arriving between pages do not shift the next page.
    send(&d.router, log_upload("h1", &[200], "shipper-token")).await;

    let cursor = first["data"]["next_token"].as_str().unwrap();
    let (_, second) = send(
        &d.router,
        get(
            &format!("/logs/guestbook/all?next_cursor={cursor}"),
            Some("dev@example.com"),
        ),
    )
    .await;
    let stamps: Vec<u64> = second["data"]["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["timestamp"].as_u64().unwrap())
        .collect();
    assert_eq!(stamps, vec![101, 100]);
    assert_eq!(second["data"]["has_more"], false);
    assert_eq!(second["data"]["next_token"], Value::Null);

    // A cursor from the single host view cannot resume the combined view.
    let (_, host_page) =
        send(&d.router, get("/logs/guestbook/h1", Some("dev@example.com"))).await;
    assert_eq!(host_page["data"]["has_more"], true);
    let host_cursor = host_page["data"]["next_token"].as_str().unwrap();
    let (status, _) = send(
        &d.router,
        get(
            &format!("/logs/guestbook/all?next_cursor={host_cursor}"),
            Some("dev@example.com"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &d.router,
        get("/logs/guestbook/all?next_cursor=zz-not-hex", Some("dev@example.com")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn instance_reports_and_admin_actions() {
    let d = dashboard();
    d.controller.refresh_all().await;

    let reports = json!([
        { "host": "10.0.0.1", "port": 20000, "language": "python27" },
        { "host": "10.0.0.1", "port": 20001, "language": "python27" },
    ]);
    let (status, _) = send(
        &d.router,
        post_json("/api/v1/apps/guestbook/instances", None, &reports),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let gone = Request::builder()
        .method("DELETE")
        .uri("/api/v1/apps/guestbook/instances")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!([{ "host": "10.0.0.1", "port": 20001 }])).unwrap(),
        ))
        .unwrap();
    let (_, body) = send(&d.router, gone).await;
    assert_eq!(body["data"]["removed"], 1);

    let (_, body) = send(
        &d.router,
        get("/api/v1/apps/guestbook/instances", Some("dev@example.com")),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["port"], 20000);

    let gather = |user: &str| post_json("/api/v1/logs/gather", Some(user), &json!({}));
    let (status, _) = send(&d.router, gather("dev@example.com")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, body) = send(&d.router, gather("admin@example.com")).await;
    assert_eq!(body["data"]["uuid"], "3f2a9c1e-logs");
    let (_, body) = send(
        &d.router,
        post_json("/api/v1/groomer", Some("admin@example.com"), &json!({})),
    )
    .await;
    assert_eq!(body["data"]["result"], "groomer started");
    assert_eq!(d.control_plane.recorded_calls(), vec!["gather logs", "run groomer"]);
}

#[tokio::test]
async fn cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appdash.redb");
    {
        let store = StateStore::open(&path).unwrap();
        let controller = RefreshController::new(
            store,
            Arc::new(FakeControlPlane::with_apps([("wiki", false)])),
            Arc::new(FakeRoster::default()),
        );
        assert!(controller.ensure_warm().await.unwrap());
    }
    let store = StateStore::open(&path).unwrap();
    assert!(store.app_entries().unwrap().contains_key("wiki"));
    assert!(!store.ensure_cluster_snapshot().unwrap());
}
