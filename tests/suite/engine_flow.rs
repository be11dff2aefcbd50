//! End-to-end turns: engine, HTTP transport, and file persistence together.

use hearth_engine::{EMPTY_RESPONSE_NOTICE, Feedback, FileStore, SessionStore};
use serde_json::json;
use wiremock::MockServer;

use crate::common::{
    CHAT_PATH, FEEDBACK_PATH, delta, engine, mount_chat_error, mount_chat_stream, mount_feedback,
    run_to_completion, wait_for_request,
};

#[tokio::test]
async fn answer_streams_into_session_and_is_saved() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[
            json!({"type": "metadata", "trace_id": "t1"}),
            json!({"type": "status", "content": "Calling lights.turn_on"}),
            delta("Sure, "),
            delta("turning them on."),
        ],
    )
    .await;
    let dir = tempfile::tempdir().unwrap();

    let id = {
        let mut engine = engine(&server, dir.path());
        let id = engine.send("Turn on the lights").unwrap();
        run_to_completion(&mut engine, &id).await;

        let session = engine.session(&id).unwrap();
        assert_eq!(session.messages[1].content(), "Sure, turning them on.");
        assert_eq!(engine.last_trace_id().map(|t| t.as_str()), Some("t1"));
        assert_eq!(engine.status(), None);
        id
    };

    let request = wait_for_request(&server, CHAT_PATH).await;
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["conversation_id"], json!(id.as_str()));
    assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));

    let store = SessionStore::load(Box::new(FileStore::new(dir.path())), "home-assistant");
    let session = store.get(&id).unwrap();
    assert_eq!(session.title, "Turn on the lights");
    assert!(!session.messages[1].is_streaming());
    assert_eq!(session.messages[1].content(), "Sure, turning them on.");
    assert_eq!(
        session.messages[1].trace_id().map(|t| t.as_str()),
        Some("t1")
    );
}

#[tokio::test]
async fn backend_error_becomes_inline_message() {
    let server = MockServer::start().await;
    mount_chat_error(&server, 503, "backend down").await;
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(&server, dir.path());

    let id = engine.send("Anyone home?").unwrap();
    run_to_completion(&mut engine, &id).await;

    let message = &engine.session(&id).unwrap().messages[1];
    assert_eq!(message.content(), "**Error:** API error 503: backend down");
    assert!(!message.is_streaming());
}

#[tokio::test]
async fn empty_answer_gets_notice() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, &[]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(&server, dir.path());

    let id = engine.send("Hello?").unwrap();
    run_to_completion(&mut engine, &id).await;

    assert_eq!(
        engine.session(&id).unwrap().messages[1].content(),
        EMPTY_RESPONSE_NOTICE
    );
}

#[tokio::test]
async fn follow_up_sends_full_history() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, &[delta("Done.")]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(&server, dir.path());

    let id = engine.send("Dim the hall").unwrap();
    run_to_completion(&mut engine, &id).await;
    engine.send("And the kitchen").unwrap();
    run_to_completion(&mut engine, &id).await;

    let requests = server.received_requests().await.unwrap();
    let last: serde_json::Value = serde_json::from_slice(&requests.last().unwrap().body).unwrap();
    assert_eq!(
        last["messages"],
        json!([
            {"role": "user", "content": "Dim the hall"},
            {"role": "assistant", "content": "Done."},
            {"role": "user", "content": "And the kitchen"},
        ])
    );
    assert_eq!(engine.session(&id).unwrap().messages.len(), 4);
}

#[tokio::test]
async fn feedback_reaches_backend() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[json!({"type": "metadata", "trace_id": "t7"}), delta("Heating on.")],
    )
    .await;
    mount_feedback(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(&server, dir.path());

    let id = engine.send("Warm up the house").unwrap();
    run_to_completion(&mut engine, &id).await;
    engine.submit_feedback(&id, 1, Feedback::Positive).unwrap();

    let request = wait_for_request(&server, FEEDBACK_PATH).await;
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body, json!({"trace_id": "t7", "sentiment": "positive"}));
    assert_eq!(
        engine.session(&id).unwrap().messages[1].feedback(),
        Some(Feedback::Positive)
    );
}
