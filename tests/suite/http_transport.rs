//! HTTP transport against a mock backend.

use futures_util::StreamExt;
use hearth_providers::{
    ChatRequest, ChatTransport, HttpTransport, StreamError, WireMessage, stream_chat,
};
use hearth_types::{Feedback, Message, SessionId, StreamEvent, TraceId};
use serde_json::json;
use std::time::UNIX_EPOCH;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    CHAT_PATH, FEEDBACK_PATH, delta, mount_chat_error, mount_chat_stream, mount_feedback,
    transport, wait_for_request,
};

fn request(text: &str) -> ChatRequest {
    ChatRequest {
        model: "home-assistant".to_string(),
        messages: vec![WireMessage::from_message(&Message::user(text, UNIX_EPOCH))],
        session_id: SessionId::new("conv-1"),
    }
}

async fn collect(transport: &HttpTransport, text: &str) -> Vec<Result<StreamEvent, StreamError>> {
    match stream_chat(transport, request(text)).await {
        Ok(events) => events.collect().await,
        Err(e) => vec![Err(e)],
    }
}

#[tokio::test]
async fn streams_and_decodes_frames() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[
            json!({"type": "metadata", "trace_id": "t1"}),
            delta("Sure, "),
            json!({"content": "turning them on."}),
        ],
    )
    .await;

    let events = collect(&transport(&server), "Turn on the lights").await;
    assert_eq!(events.len(), 4);
    assert!(matches!(
        &events[0],
        Ok(StreamEvent::Metadata { trace_id: Some(t), .. }) if t.as_str() == "t1"
    ));
    assert_eq!(events[1], Ok(StreamEvent::ContentDelta("Sure, ".into())));
    assert_eq!(events[2], Ok(StreamEvent::ContentDelta("turning them on.".into())));
    assert_eq!(events[3], Ok(StreamEvent::Terminator));
}

#[tokio::test]
async fn request_carries_history_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer test-token"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({
            "model": "home-assistant",
            "conversation_id": "conv-1",
            "stream": true,
            "messages": [{"role": "user", "content": "Lock up"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("data: [DONE]\n"))
        .expect(1)
        .mount(&server)
        .await;

    let events = collect(&transport(&server), "Lock up").await;
    assert_eq!(events, vec![Ok(StreamEvent::Terminator)]);
}

#[tokio::test]
async fn non_success_status_is_an_http_error() {
    let server = MockServer::start().await;
    mount_chat_error(&server, 503, "backend warming up").await;

    let events = collect(&transport(&server), "Hello").await;
    assert_eq!(
        events,
        vec![Err(StreamError::Http {
            status: 503,
            body: "backend warming up".into(),
        })]
    );
}

#[tokio::test]
async fn oversized_error_body_is_truncated() {
    let server = MockServer::start().await;
    mount_chat_error(&server, 500, &"x".repeat(64 * 1024)).await;

    let events = collect(&transport(&server), "Hello").await;
    match &events[..] {
        [Err(StreamError::Http { status: 500, body })] => {
            assert!(body.ends_with("...(truncated)"));
            assert!(body.len() < 40 * 1024);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn in_band_error_marker_ends_stream() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[delta("Arming"), json!({"error": {"message": "quota exceeded"}}), delta("late")],
    )
    .await;

    let events = collect(&transport(&server), "Arm the alarm").await;
    assert_eq!(
        events,
        vec![
            Ok(StreamEvent::ContentDelta("Arming".into())),
            Err(StreamError::Protocol("quota exceeded".into())),
        ]
    );
}

#[tokio::test]
async fn feedback_is_posted_with_trace_id() {
    let server = MockServer::start().await;
    mount_feedback(&server).await;

    transport(&server)
        .submit_feedback(TraceId::from("t42"), Feedback::Negative)
        .await
        .unwrap();

    let request = wait_for_request(&server, FEEDBACK_PATH).await;
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body, json!({"trace_id": "t42", "sentiment": "negative"}));
}

#[tokio::test]
async fn feedback_rejection_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FEEDBACK_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("unknown trace"))
        .mount(&server)
        .await;

    let result = transport(&server)
        .submit_feedback(TraceId::from("missing"), Feedback::Positive)
        .await;
    assert_eq!(
        result,
        Err(StreamError::Http {
            status: 404,
            body: "unknown trace".into(),
        })
    );
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    // Port 9 (discard) is closed on test machines.
    let transport = HttpTransport::new("http://127.0.0.1:9", None).unwrap();
    let events = collect(&transport, "Hello").await;
    assert!(matches!(&events[..], [Err(StreamError::Transport(_))]));
}
