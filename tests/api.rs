//! API endpoint integration tests

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::json;

mod common;
use common::{ADMIN_KEY, MockFilePlugin, TestApp, mockfile_request};

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::spawn(Some(ADMIN_KEY), false).await;

    // Health is never guarded
    let (status, json) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());

    let (status, json) = app.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["checks"]["database"]["status"], "ok");
    assert_eq!(json["checks"]["plugins"]["status"], "ok");
    assert_eq!(json["checks"]["export_dir"]["status"], "ok");
    assert_eq!(json["plugins"], 1);
}

#[tokio::test]
async fn test_export_retrieve_and_download() {
    let app = TestApp::spawn(None, false).await;
    let destination = app.dir.path().join("x.txt");

    let (status, created) = app.post("/export", mockfile_request(&destination)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["success"], true);
    let id = created["export_id"].as_str().unwrap().to_string();

    let (status, fetched) = app.get(&format!("/export/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let response = app
        .send(
            Request::builder()
                .uri(format!("/export/{id}/download"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello world");
}

#[tokio::test]
async fn test_unknown_export_is_not_found() {
    let app = TestApp::spawn(None, false).await;
    let (status, json) = app.get("/export/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_export_validation_errors() {
    let app = TestApp::spawn(None, false).await;

    let (status, json) = app
        .post("/export", json!({ "plugin_name": "", "format": "txt" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");

    let (status, _) = app
        .post("/export", json!({ "plugin_name": "nope", "format": "txt" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, report) = app
        .post(
            "/export/validate",
            json!({ "plugin_name": "mockfile", "format": "txt", "config": { "colour": "red" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["valid"], false);
    assert!(!report["errors"].as_array().unwrap().is_empty());

    let (_, report) = app
        .post(
            "/export/validate",
            json!({ "plugin_name": "mockfile", "format": "txt" }),
        )
        .await;
    assert_eq!(report["valid"], true);
}

#[tokio::test]
async fn test_plugin_failure_returns_failed_result() {
    let app = TestApp::spawn(None, false).await;
    let mut body = mockfile_request(&app.dir.path().join("never.txt"));
    body["config"] = json!({ "fail": true });

    let (status, result) = app.post("/export", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("asked to fail"));

    // Failure is still audited
    let (_, stats) = app.get("/export/statistics").await;
    assert_eq!(stats["failure"], 1);
}

#[tokio::test]
async fn test_preview_is_idempotent_and_side_effect_free() {
    let app = TestApp::spawn(None, false).await;
    let destination = app.dir.path().join("preview.txt");

    let (status, first) = app
        .post("/export/preview", mockfile_request(&destination))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = app
        .post("/export/preview", mockfile_request(&destination))
        .await;

    assert_eq!(first["record_count"], second["record_count"]);
    assert_eq!(first["estimated_size"], second["estimated_size"]);
    assert!(!destination.exists());

    let (_, history) = app.get("/export/history").await;
    assert_eq!(history["total"], 0);
}

#[tokio::test]
async fn test_dry_run_export_writes_nothing() {
    let app = TestApp::spawn(None, false).await;
    let destination = app.dir.path().join("dry.txt");
    let mut body = mockfile_request(&destination);
    body["options"] = json!({ "dry_run": true });

    let (status, result) = app.post("/export", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["dry_run"], true);
    assert!(!destination.exists());

    // Nothing to download
    let id = result["export_id"].as_str().unwrap();
    let (status, json) = app.get(&format!("/export/{id}/download")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["code"], "unprocessable_entity");
}

#[tokio::test]
async fn test_download_outside_base_dir_forbidden() {
    let app = TestApp::spawn(None, true).await;

    // Inside <tmp>/exports: served
    let inside = app.dir.path().join("exports").join("ok.txt");
    let (_, result) = app.post("/export", mockfile_request(&inside)).await;
    let id = result["export_id"].as_str().unwrap();
    let (status, _) = app.get(&format!("/export/{id}/download")).await;
    assert_eq!(status, StatusCode::OK);

    // Escapes via ..
    let escape = app.dir.path().join("exports").join("..").join("escape.txt");
    let (_, result) = app.post("/export", mockfile_request(&escape)).await;
    assert_eq!(result["success"], true);
    let id = result["export_id"].as_str().unwrap();
    let (status, json) = app.get(&format!("/export/{id}/download")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["code"], "forbidden");
}

#[tokio::test]
async fn test_default_destination_under_export_dir() {
    let app = TestApp::spawn(None, true).await;
    let (_, result) = app
        .post("/export", json!({ "plugin_name": "mockfile", "format": "txt" }))
        .await;
    let id = result["export_id"].as_str().unwrap();
    let expected = app
        .dir
        .path()
        .join("exports")
        .join(format!("mockfile-{id}.txt"));
    assert_eq!(result["output_path"], expected.display().to_string());

    let (status, _) = app.get(&format!("/export/{id}/download")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_schedule_run_now() {
    let app = TestApp::spawn(None, false).await;
    let destination = app.dir.path().join("scheduled.txt");

    let (status, schedule) = app
        .post(
            "/export/schedules",
            json!({
                "name": "every five",
                "request": mockfile_request(&destination),
                "interval_secs": 5
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = schedule["id"].as_str().unwrap();

    let (status, result) = app
        .json(
            Method::POST,
            &format!("/export/schedules/{id}/run"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success"], true);
    assert!(destination.exists());

    let (_, after) = app.get(&format!("/export/schedules/{id}")).await;
    assert_eq!(after["run_count"], 1);
    assert_eq!(after["last_result_id"], result["export_id"]);

    let (_, history) = app.get("/export/history").await;
    assert_eq!(history["total"], 1);
}

#[tokio::test]
async fn test_schedule_crud() {
    let app = TestApp::spawn(None, false).await;
    let destination = app.dir.path().join("crud.txt");

    let (status, json) = app
        .post(
            "/export/schedules",
            json!({ "request": mockfile_request(&destination), "interval_secs": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");

    let (_, schedule) = app
        .post(
            "/export/schedules",
            json!({ "request": mockfile_request(&destination), "interval_secs": 60 }),
        )
        .await;
    let id = schedule["id"].as_str().unwrap().to_string();

    let (status, updated) = app
        .json(
            Method::PUT,
            &format!("/export/schedules/{id}"),
            Some(json!({ "enabled": false })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["enabled"], false);

    let (_, list) = app.get("/export/schedules").await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = app
        .json(Method::DELETE, &format!("/export/schedules/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/export/schedules/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_key_required() {
    let app = TestApp::spawn(Some(ADMIN_KEY), false).await;
    let body = mockfile_request(&app.dir.path().join("guarded.txt"));

    let (status, json) = app
        .json(Method::POST, "/export", Some(body.clone()), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "unauthorized");

    let (status, _) = app
        .json(Method::POST, "/export", Some(body.clone()), Some("wrong"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, result) = app
        .json(Method::POST, "/export", Some(body), Some(ADMIN_KEY))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success"], true);
}

#[tokio::test]
async fn test_requester_recorded_in_history() {
    let app = TestApp::spawn(None, false).await;
    let body = mockfile_request(&app.dir.path().join("who.txt"));

    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/export")
                .header("content-type", "application/json")
                .header("x-user-id", "operator-7")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (_, history) = app.get("/export/history").await;
    assert_eq!(history["items"][0]["requester"], "operator-7");
}

#[tokio::test]
async fn test_import_and_preview() {
    let app = TestApp::spawn(None, false).await;
    let body = json!({
        "plugin_name": "mockfile",
        "format": "txt",
        "source": { "type": "inline", "data": "hi" }
    });

    let (status, missing_source) = app
        .post(
            "/import",
            json!({ "plugin_name": "mockfile", "format": "txt" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(missing_source["error"]["code"], "validation_error");

    let (status, first) = app.post("/import/preview", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = app.post("/import/preview", body.clone()).await;
    assert_eq!(first["applied"], false);
    assert_eq!(first["changes"], second["changes"]);

    let (status, result) = app.post("/import", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["applied"], true);
    assert_eq!(result["created"], 1);

    let id = result["import_id"].as_str().unwrap();
    let (status, fetched) = app.get(&format!("/import/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, result);

    let (_, stats) = app.get("/import/statistics").await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["by_plugin"]["mockfile"], 1);
}

#[tokio::test]
async fn test_plugin_endpoints() {
    let app = TestApp::spawn(None, false).await;

    let (status, list) = app.get("/plugins").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["name"], "mockfile");

    let (status, plugin) = app.get("/plugins/mockfile").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plugin["capabilities"]["export"], true);
    assert_eq!(plugin["config_schema"]["fields"][0]["name"], "fail");

    let (status, _) = app.get("/plugins/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let app = TestApp::spawn(None, false).await;

    let err = app
        .registry
        .register(Box::new(MockFilePlugin))
        .await
        .unwrap_err();
    assert!(matches!(err, fleet_sync::Error::DuplicateName(_)));
    assert_eq!(app.registry.len().await, 1);

    let (_, list) = app.get("/plugins").await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_export_survives_history_store_failure() {
    let app = TestApp::spawn(None, false).await;
    app.db
        .get()
        .unwrap()
        .execute_batch("DROP TABLE sync_history")
        .unwrap();

    let destination = app.dir.path().join("unaudited.txt");
    let (status, result) = app.post("/export", mockfile_request(&destination)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success"], true);
    assert!(destination.exists());

    let id = result["export_id"].as_str().unwrap();
    let (status, cached) = app.get(&format!("/export/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cached, result);
}
