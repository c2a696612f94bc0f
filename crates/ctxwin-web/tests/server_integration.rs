//! Integration tests for the ctxwin-web server.
//!
//! These tests start a real axum server on a random port with the heuristic
//! backend and exercise the REST and tool-call endpoints.

use std::sync::Arc;
use std::time::Duration;

use ctxwin::ContextEngine;
use ctxwin::model::HeuristicBackend;
use ctxwin_web::{WebBroadcastHandler, WebConfig, WsMessage, spawn_web};
use serde_json::{Value, json};
use tokio::sync::broadcast;

/// Helper: spawn a test server on port 0 (random available port).
async fn spawn_test_server() -> (String, broadcast::Receiver<WsMessage>) {
    spawn_server_with(WebConfig::default()).await
}

async fn spawn_server_with(config: WebConfig) -> (String, broadcast::Receiver<WsMessage>) {
    let (tx, rx) = broadcast::channel::<WsMessage>(64);
    let engine = ContextEngine::builder(Arc::new(HeuristicBackend::new()))
        .with_event_handler(WebBroadcastHandler::new(tx.clone()))
        .build();

    let config = WebConfig {
        bind_addr: ([127, 0, 0, 1], 0).into(),
        ..config
    };

    let addr = spawn_web(engine, tx, config).await.unwrap();
    (format!("http://{addr}"), rx)
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> reqwest::Response {
    client.post(url).json(&body).send().await.unwrap()
}

/// Create a session and a 100/20 window; returns the window id.
async fn create_window(client: &reqwest::Client, base: &str) -> String {
    let resp = post(client, format!("{base}/api/sessions"), json!({"name": "test"})).await;
    assert_eq!(resp.status(), 201);
    let session: Value = resp.json().await.unwrap();
    let session_id = session["id"].as_str().unwrap();

    let resp = post(
        client,
        format!("{base}/api/sessions/{session_id}/windows"),
        json!({"max_tokens": 100, "reserved_tokens": 20}),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let window: Value = resp.json().await.unwrap();
    window["id"].as_str().unwrap().to_string()
}

// ── REST Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_backend() {
    let (base, _rx) = spawn_test_server().await;
    let json: Value = reqwest::get(format!("{base}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "heuristic");
}

#[tokio::test]
async fn capacity_is_enforced_over_http() {
    let (base, _rx) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let window_id = create_window(&client, &base).await;

    let resp = post(
        &client,
        format!("{base}/api/contexts/{window_id}/elements"),
        json!({"content": "a".repeat(280), "type": "system"}),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let added: Value = resp.json().await.unwrap();
    assert_eq!(added["current_tokens"], 70);
    assert_eq!(added["utilization_ratio"], 0.875);

    let resp = post(
        &client,
        format!("{base}/api/contexts/{window_id}/elements"),
        json!({"content": "b".repeat(60)}),
    )
    .await;
    assert_eq!(resp.status(), 409);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "capacity_exceeded");

    let detail: Value = reqwest::get(format!("{base}/api/contexts/{window_id}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["current_tokens"], 70);
    assert_eq!(detail["elements"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_ids_are_404() {
    let (base, _rx) = spawn_test_server().await;
    let resp = reqwest::get(format!("{base}/api/contexts/missing")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");

    let resp = reqwest::get(format!("{base}/api/optimization/missing"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn invalid_body_is_400() {
    let (base, _rx) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/sessions"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "invalid_argument");
}

#[tokio::test]
async fn analyze_with_empty_body() {
    let (base, _rx) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let window_id = create_window(&client, &base).await;

    let resp = client
        .post(format!("{base}/api/contexts/{window_id}/analyze"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let analysis: Value = resp.json().await.unwrap();
    assert_eq!(analysis["context_id"], window_id.as_str());
    assert_eq!(analysis["analysis_type"], "comprehensive");
    assert!(analysis["quality_score"].as_f64().is_some());
}

#[tokio::test]
async fn optimization_task_completes() {
    let (base, _rx) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let window_id = create_window(&client, &base).await;

    for _ in 0..2 {
        let resp = post(
            &client,
            format!("{base}/api/contexts/{window_id}/elements"),
            json!({"content": "repeat me please"}),
        )
        .await;
        assert_eq!(resp.status(), 201);
    }

    let resp = post(
        &client,
        format!("{base}/api/contexts/{window_id}/optimize"),
        json!({"goals": ["remove_redundancy"]}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let task: Value = resp.json().await.unwrap();
    let task_id = task["id"].as_str().unwrap().to_string();

    let mut status = String::new();
    for _ in 0..100 {
        let task: Value = reqwest::get(format!("{base}/api/optimization/{task_id}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status = task["status"].as_str().unwrap().to_string();
        if status == "completed" || status == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "completed");

    let elements: Value = reqwest::get(format!("{base}/api/contexts/{window_id}/elements"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(elements.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_goal_is_rejected() {
    let (base, _rx) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let window_id = create_window(&client, &base).await;
    let resp = post(
        &client,
        format!("{base}/api/contexts/{window_id}/optimize"),
        json!({"goals": ["make_it_shiny"]}),
    )
    .await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn template_render_and_missing_variable() {
    let (base, _rx) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = post(
        &client,
        format!("{base}/api/templates"),
        json!({"name": "greet", "template": "Hello {name}, welcome to {place}"}),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let template: Value = resp.json().await.unwrap();
    let id = template["id"].as_str().unwrap();
    assert_eq!(template["variables"], json!(["name", "place"]));

    let resp = post(
        &client,
        format!("{base}/api/templates/{id}/render"),
        json!({"variables": {"name": "Ada"}}),
    )
    .await;
    assert_eq!(resp.status(), 422);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "missing_variable");

    let resp = post(
        &client,
        format!("{base}/api/templates/{id}/render"),
        json!({"variables": {"name": "Ada", "place": "Rust"}}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let rendered: Value = resp.json().await.unwrap();
    assert_eq!(rendered["rendered_content"], "Hello Ada, welcome to Rust");

    let template: Value = reqwest::get(format!("{base}/api/templates/{id}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(template["usage_count"], 1);
}

// ── Tool Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn tool_catalog_is_listed() {
    let (base, _rx) = spawn_test_server().await;
    let defs: Value = reqwest::get(format!("{base}/api/tools"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = defs
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["function"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 21);
    assert!(names.contains(&"auto_optimize_context"));
    assert!(names.contains(&"list_context_elements"));
    assert!(names.contains(&"delete_template"));
}

#[tokio::test]
async fn tool_call_runs_operation() {
    let (base, _rx) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let resp = post(
        &client,
        format!("{base}/api/tools/create_session"),
        json!({"name": "via tool"}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let reply: Value = resp.json().await.unwrap();
    assert_eq!(reply["is_error"], false);
    let session: Value = serde_json::from_str(reply["result"].as_str().unwrap()).unwrap();
    assert_eq!(session["name"], "via tool");

    let sessions: Value = reqwest::get(format!("{base}/api/sessions"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 1);

    let resp = post(&client, format!("{base}/api/tools/nope"), json!({})).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn tool_results_respect_configured_cap() {
    let (base, _rx) = spawn_server_with(WebConfig {
        max_tool_result_bytes: 32,
        ..Default::default()
    })
    .await;
    let client = reqwest::Client::new();
    let resp = post(
        &client,
        format!("{base}/api/tools/create_session"),
        json!({"name": "a session name long enough to be cut"}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let reply: Value = resp.json().await.unwrap();
    let result = reply["result"].as_str().unwrap();
    assert!(result.contains("[truncated:"), "{result}");
}

// ── Broadcast Tests ──────────────────────────────────────────────────

#[tokio::test]
async fn mutations_are_broadcast() {
    let (base, mut rx) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = post(&client, format!("{base}/api/sessions"), json!({"name": "watched"})).await;
    assert_eq!(resp.status(), 201);

    let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match msg {
        WsMessage::SessionCreated { session } => assert_eq!(session.name, "watched"),
        other => panic!("unexpected message: {other:?}"),
    }
}
