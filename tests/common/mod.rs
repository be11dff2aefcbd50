//! Shared test utilities and fixtures
//!
//! Mock assistant backend built on wiremock, plus helpers for driving the engine.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hearth_engine::{ChatEngine, EngineSettings, FileStore, SessionId};
use hearth_providers::HttpTransport;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CHAT_PATH: &str = "/api/chat/stream";
pub const FEEDBACK_PATH: &str = "/api/feedback";

/// A content frame in the nested `choices` shape.
pub fn delta(text: &str) -> Value {
    json!({"choices": [{"delta": {"content": text}}]})
}

/// Render frames as a streamed body, terminated with `[DONE]`.
pub fn sse_body(frames: &[Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

pub async fn mount_chat_stream(server: &MockServer, frames: &[Value]) {
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body(frames))
                .insert_header("content-type", "text/event-stream"),
        )
        .mount(server)
        .await;
}

pub async fn mount_chat_error(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

pub async fn mount_feedback(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(FEEDBACK_PATH))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

pub fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(&server.uri(), Some("test-token".to_string())).unwrap()
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        default_model: "home-assistant".to_string(),
        idle_timeout: Duration::from_secs(5),
    }
}

pub fn engine(server: &MockServer, dir: &std::path::Path) -> ChatEngine {
    ChatEngine::new(
        Arc::new(transport(server)),
        Box::new(FileStore::new(dir).without_sync()),
        settings(),
    )
}

/// Pump frames until the session stops streaming.
pub async fn run_to_completion(engine: &mut ChatEngine, id: &SessionId) {
    for _ in 0..400 {
        engine.pump();
        engine.on_frame();
        if !engine.is_streaming(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stream for {id} did not finish");
}

/// Wait until the mock server has seen a request on `route`.
pub async fn wait_for_request(server: &MockServer, route: &str) -> wiremock::Request {
    for _ in 0..400 {
        if let Some(requests) = server.received_requests().await
            && let Some(request) = requests.into_iter().find(|r| r.url.path() == route)
        {
            return request;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no request to {route}");
}
