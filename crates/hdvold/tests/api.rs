//! Plugin API tests against an in-process router.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use tower::ServiceExt;

use hdvol::testing::{FakeEngine, RecordingRunner};
use hdvol::{DriverConfig, Scope, VolumeDriver, VolumeOptions};
use hdvold::api::{PLUGIN_CONTENT_TYPE, app};

struct Harness {
    home: TempDir,
    engine: FakeEngine,
    app: Router,
}

fn harness() -> Harness {
    let home = tempdir().unwrap();
    let engine = FakeEngine::new();
    let config = DriverConfig::new(home.path()).with_defaults(VolumeOptions {
        scope: Scope::Local,
        ..VolumeOptions::default()
    });
    let driver = VolumeDriver::new(
        &config,
        Arc::new(engine.clone()),
        Arc::new(RecordingRunner::default()),
    )
    .unwrap();
    Harness {
        home,
        engine,
        app: app(Arc::new(driver)),
    }
}

async fn call(app: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    let status = response.status();
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        PLUGIN_CONTENT_TYPE
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn activate() {
    let h = harness();
    let (status, body) = call(&h.app, "/Plugin.Activate", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "Implements": ["VolumeDriver"] }));
}

#[tokio::test]
async fn capabilities() {
    let h = harness();
    let (status, body) = call(&h.app, "/VolumeDriver.Capabilities", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "Capabilities": { "Scope": "local" } }));
}

#[tokio::test]
async fn volume_lifecycle() {
    let h = harness();
    let mountpoint = h.home.path().join("mnt/vol1").display().to_string();

    let (status, body) = call(
        &h.app,
        "/VolumeDriver.Create",
        r#"{"Name":"vol1","Opts":{"size":"1GB","mode":"expanded"}}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!({}));

    let (status, body) = call(
        &h.app,
        "/VolumeDriver.Mount",
        r#"{"Name":"vol1","ID":"abc"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Mountpoint"], mountpoint.as_str());

    let (_, body) = call(&h.app, "/VolumeDriver.Mount", r#"{"Name":"vol1","ID":"def"}"#).await;
    assert_eq!(body["Mountpoint"], mountpoint.as_str());
    assert_eq!(h.engine.attach_calls(), 1);

    let (status, body) = call(&h.app, "/VolumeDriver.Get", r#"{"Name":"vol1"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Volume"]["Name"], "vol1");
    assert_eq!(body["Volume"]["Status"]["mounts"], 2);

    let (_, body) = call(&h.app, "/VolumeDriver.Path", r#"{"Name":"vol1"}"#).await;
    assert_eq!(body["Mountpoint"], mountpoint.as_str());

    let (status, body) = call(&h.app, "/VolumeDriver.Remove", r#"{"Name":"vol1"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Err"].as_str().unwrap().contains("vol1"));

    for id in ["abc", "def"] {
        let (status, _) = call(
            &h.app,
            "/VolumeDriver.Unmount",
            &format!(r#"{{"Name":"vol1","ID":"{id}"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(h.engine.detach_calls(), 1);

    let (status, _) = call(&h.app, "/VolumeDriver.Remove", r#"{"Name":"vol1"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&h.app, "/VolumeDriver.List", "").await;
    assert_eq!(body, json!({ "Volumes": [] }));
}

#[tokio::test]
async fn list_reports_volumes() {
    let h = harness();
    call(&h.app, "/VolumeDriver.Create", r#"{"Name":"a","Opts":null}"#).await;
    call(&h.app, "/VolumeDriver.Create", r#"{"Name":"b"}"#).await;

    let (status, body) = call(&h.app, "/VolumeDriver.List", "{}").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["Volumes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["Name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert!(body["Volumes"][0].get("Status").is_none());
}

#[tokio::test]
async fn errors_carry_message() {
    let h = harness();

    let (status, body) = call(&h.app, "/VolumeDriver.Get", r#"{"Name":"missing"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "Err": "Can't find volume missing" }));

    let (status, body) = call(
        &h.app,
        "/VolumeDriver.Create",
        r#"{"Name":"vol1","Opts":{"clog":"abc"}}"#,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Err"].as_str().unwrap().starts_with("Can't parse clog abc"));
    assert!(h.engine.created().is_empty());

    let (status, _) = call(&h.app, "/VolumeDriver.Create", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, body) = call(&h.app, "/VolumeDriver.Mount", "{not json").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Err"].as_str().unwrap().starts_with("Can't decode request"));
}

#[tokio::test]
async fn unmount_of_unknown_volume_succeeds() {
    let h = harness();
    let (status, body) = call(&h.app, "/VolumeDriver.Unmount", r#"{"Name":"ghost"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}
