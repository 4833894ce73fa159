use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use futures::{SinkExt, StreamExt};
use graphway::{config::Config, create_app};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tower::ServiceExt;

fn app() -> Router {
    create_app(Config::default()).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()));
    (status, value)
}

fn counter_graph() -> Value {
    json!({
        "name": "counter",
        "nodes": [{"name": "bump", "function": "bump"}],
        "start": "bump",
        "edges": {
            "bump": {
                "type": "looping",
                "condition": "n < 3",
                "continue_to": "bump",
                "exit_to": "__end__",
                "max_iterations": 10
            }
        }
    })
}

#[tokio::test]
async fn test_health_check() {
    let (status, body) = send(&app(), "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn test_graph_submission_and_listing() {
    let app = app();

    let (status, body) = send(&app, "POST", "/api/graphs", Some(counter_graph())).await;
    assert_eq!(status, StatusCode::CREATED);
    let graph_id = body["graph_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", "/api/graphs", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body.as_array().unwrap().iter().filter_map(|g| g["name"].as_str()).collect();
    assert!(names.contains(&"counter"));
    assert!(names.contains(&"Code Review Mini-Agent"));

    let (status, body) = send(&app, "GET", &format!("/api/graphs/{}", graph_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_cycles"], json!(true));
    assert_eq!(body["definition"]["start"], json!("bump"));

    let (status, _) = send(&app, "GET", "/api/graphs/graph_999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_graph_rejected() {
    let app = app();
    let definition = json!({
        "name": "broken",
        "nodes": ["a"],
        "start": "a",
        "edges": {"a": {"type": "direct", "target": "nowhere"}}
    });
    let (status, body) = send(&app, "POST", "/api/graphs", Some(definition)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("nowhere"));

    let bad_predicate = json!({
        "name": "broken",
        "nodes": ["a"],
        "start": "a",
        "edges": {"a": {"type": "conditional", "branches": [{"when": "score >=", "target": "a"}], "default": "__end__"}}
    });
    let (status, _) = send(&app, "POST", "/api/graphs", Some(bad_predicate)).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_lua_tool_drives_inline_graph_run() {
    let app = app();

    let tool = json!({"name": "bump", "script": "return { n = (state.n or 0) + 1 }"});
    let (status, _) = send(&app, "POST", "/api/tools", Some(tool)).await;
    assert_eq!(status, StatusCode::CREATED);

    let request = json!({"graph": counter_graph(), "initial_state": {"n": 0}, "wait": true});
    let (status, body) = send(&app, "POST", "/api/runs", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("completed"));
    assert_eq!(body["state"]["data"]["n"], json!(3));

    let events = body["events"].as_array().unwrap();
    assert_eq!(events.first().unwrap()["kind"], json!("run_started"));
    assert_eq!(events.last().unwrap()["kind"], json!("run_completed"));
}

#[tokio::test]
async fn test_run_lifecycle_endpoints() {
    let app = app();
    send(&app, "POST", "/api/tools", Some(json!({"name": "bump", "script": "return { n = 5 }"}))).await;
    let (_, body) = send(&app, "POST", "/api/graphs", Some(counter_graph())).await;
    let graph_id = body["graph_id"].as_str().unwrap().to_string();

    let request = json!({"graph_id": graph_id, "run_id": "lifecycle", "start": false});
    let (status, body) = send(&app, "POST", "/api/runs", Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], json!("pending"));

    let (status, _) = send(&app, "POST", "/api/runs", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, "GET", "/api/runs/lifecycle/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("pending"));

    let (status, body) = send(&app, "POST", "/api/runs/lifecycle/start?wait=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("completed"));
    assert_eq!(body["steps"], json!(1));

    let (status, _) = send(&app, "POST", "/api/runs/lifecycle/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, "GET", "/api/runs/lifecycle/events", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap()[0]["sequence"], json!(0));

    let (status, _) = send(&app, "GET", "/api/runs/missing/state", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_pending_run_over_http() {
    let app = app();
    let request = json!({"graph_id": "graph_1", "run_id": "doomed", "start": false});
    send(&app, "POST", "/api/runs", Some(request)).await;

    let (status, body) = send(&app, "POST", "/api/runs/doomed/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("failed"));

    let (_, body) = send(&app, "GET", "/api/runs/doomed/state", None).await;
    assert_eq!(body["failure"]["kind"], json!("cancelled"));
}

#[tokio::test]
async fn test_tool_registration_rules() {
    let app = app();

    let (status, _) = send(&app, "POST", "/api/tools", Some(json!({"name": "broken", "script": "return {"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let builtin = json!({"name": "detect_issues", "script": "return {}"});
    let (status, _) = send(&app, "POST", "/api/tools", Some(builtin)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = send(&app, "GET", "/api/tools", None).await;
    assert_eq!(status, StatusCode::OK);
    let detect = body
        .as_array()
        .unwrap()
        .iter()
        .find(|tool| tool["name"] == json!("detect_issues"))
        .unwrap();
    assert_eq!(detect["origin"], json!("builtin"));
}

#[tokio::test]
async fn test_code_review_demo() {
    let app = app();

    let (status, body) = send(&app, "POST", "/api/demo/code-review", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("completed"));
    assert_eq!(body["state"]["data"]["function_count"], json!(3));
    assert!(body["state"]["data"]["review_summary"]["verdict"].is_string());

    let code = "def tidy():\n    \"\"\"Documented.\"\"\"\n    return 1\n";
    let (status, body) = send(&app, "POST", "/api/demo/code-review", Some(json!({"code": code}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["data"]["review_summary"]["verdict"], json!("approved"));

    let (status, body) = send(&app, "GET", "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completed_runs"], json!(2));
    assert_eq!(body["graphs"], json!(1));
}

async fn submit_counter(app: &Router) -> String {
    send(app, "POST", "/api/tools", Some(json!({"name": "bump", "script": "return { n = 5 }"}))).await;
    let (_, body) = send(app, "POST", "/api/graphs", Some(counter_graph())).await;
    body["graph_id"].as_str().unwrap().to_string()
}

async fn serve(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Read text frames as JSON until the server closes the socket
async fn read_until_close<S>(socket: &mut S) -> Vec<Value>
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut frames = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), socket.next()).await.unwrap();
        match next {
            Some(Ok(WsMessage::Text(text))) => frames.push(serde_json::from_str(text.as_str()).unwrap()),
            Some(Ok(WsMessage::Close(_))) | None => return frames,
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("websocket error: {}", e),
        }
    }
}

#[tokio::test]
async fn test_websocket_streams_run_events() {
    let app = app();
    let addr = serve(app.clone()).await;
    let graph_id = submit_counter(&app).await;
    let request = json!({"graph_id": graph_id, "run_id": "streamed", "start": false});
    send(&app, "POST", "/api/runs", Some(request)).await;

    let (mut socket, _) = connect_async(format!("ws://{}/api/runs/streamed/ws?from=0", addr))
        .await
        .unwrap();

    let connected = socket.next().await.unwrap().unwrap();
    let connected: Value = serde_json::from_str(connected.to_text().unwrap()).unwrap();
    assert_eq!(connected["type"], json!("connected"));
    assert_eq!(connected["run_id"], json!("streamed"));

    // nothing is emitted before start, so the pong is the next frame
    socket.send(WsMessage::text(json!({"type": "ping"}).to_string())).await.unwrap();
    let pong = socket.next().await.unwrap().unwrap();
    assert_eq!(serde_json::from_str::<Value>(pong.to_text().unwrap()).unwrap(), json!({"type": "pong"}));

    let (status, _) = send(&app, "POST", "/api/runs/streamed/start", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let events = read_until_close(&mut socket).await;
    assert_eq!(events.first().unwrap()["kind"], json!("run_started"));
    assert_eq!(events.last().unwrap()["kind"], json!("run_completed"));
    for (expected, event) in events.iter().enumerate() {
        assert_eq!(event["sequence"], json!(expected));
    }

    let (_, history) = send(&app, "GET", "/api/runs/streamed/events", None).await;
    assert_eq!(history.as_array().unwrap().len(), events.len());
}

#[tokio::test]
async fn test_websocket_replay_from_sequence_after_finish() {
    let app = app();
    let addr = serve(app.clone()).await;
    let graph_id = submit_counter(&app).await;
    let request = json!({"graph_id": graph_id, "run_id": "finished", "wait": true});
    let (_, body) = send(&app, "POST", "/api/runs", Some(request)).await;
    let total = body["events"].as_array().unwrap().len();

    let url = format!("ws://{}/api/runs/finished/ws?from={}", addr, total - 2);
    let (mut socket, _) = connect_async(url).await.unwrap();
    let frames = read_until_close(&mut socket).await;
    assert_eq!(frames[0]["type"], json!("connected"));
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1]["sequence"], json!(total - 2));
    assert_eq!(frames[2]["kind"], json!("run_completed"));

    // a live-only subscriber on a finished run gets the handshake and a close
    let url = format!("ws://{}/api/runs/finished/ws", addr);
    let (mut socket, _) = connect_async(url).await.unwrap();
    let frames = read_until_close(&mut socket).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], json!("connected"));
}

#[tokio::test]
async fn test_websocket_unknown_run_is_not_found() {
    let addr = serve(app()).await;
    let result = connect_async(format!("ws://{}/api/runs/missing/ws", addr)).await;
    assert!(result.is_err());
}
