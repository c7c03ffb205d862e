//! Error path integration tests
//!
//! Transport and stream failures end the loop with a single error and never
//! leave a partial assistant message behind. Tool failures do not end it.

mod common;

use common::{
    RecordingExecutor, ScriptedTransport, TurnScript, assert_paired, options, options_builder,
};
use modelwar_agent::retry::RetryConfig;
use modelwar_agent::{AgentEvent, AgentSession, Error, LoopOutcome, Message};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter_factor(0.0)
}

/// Test: A non-success status fails with the status and body
#[tokio::test]
async fn test_api_error_carries_status_and_body() {
    common::init_logging();

    let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
    let transport = Arc::new(ScriptedTransport::new().status(401, body));
    let mut session = AgentSession::start(options(), transport, Vec::new(), None);
    let mut events = session.events().unwrap();

    let err = assert_err!(session.send_message("hello").await);
    match &err {
        Error::Api { status, body: text } => {
            assert_eq!(*status, 401);
            assert_eq!(text, body);
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("401"));

    assert_eq!(session.history(), &[Message::user("hello")]);
    assert!(common::drain(&mut events)
        .iter()
        .any(|e| matches!(e, AgentEvent::Error { message } if message.contains("authentication_error"))));
}

/// Test: A connection reset mid-stream discards the partial turn
#[tokio::test]
async fn test_read_error_discards_partial_turn() {
    let transport = Arc::new(
        ScriptedTransport::new().turn_then_reset(TurnScript::new().text("Half an answer")),
    );
    let mut session = AgentSession::start(options(), transport, Vec::new(), None);

    let err = session.send_message("explain dwarves").await.unwrap_err();
    assert!(matches!(err, Error::Stream(_)));
    assert_eq!(session.history().len(), 1);
}

/// Test: An in-stream error event ends the turn
#[tokio::test]
async fn test_error_event_ends_turn() {
    let transport = Arc::new(
        ScriptedTransport::new().turn(
            TurnScript::new()
                .text("Partial")
                .raw(json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})),
        ),
    );
    let mut session = AgentSession::start(options(), transport.clone(), Vec::new(), None);

    let err = session.send_message("hi").await.unwrap_err();
    match err {
        Error::Stream(message) => assert!(message.contains("overloaded_error")),
        other => panic!("Expected stream error, got {:?}", other),
    }
    assert_eq!(session.history().len(), 1);
    // Not retried: the stream had already started.
    assert_eq!(transport.request_count(), 1);
}

/// Test: A stream error in a later turn stops the loop there
#[tokio::test]
async fn test_error_after_tool_round_stops_loop() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .turn(TurnScript::new().tool_use("t1", "leaderboard", &[]).stop("tool_use"))
            .status(500, "internal error"),
    );
    let executor = Arc::new(RecordingExecutor::new());
    let mut session =
        AgentSession::start(options(), transport.clone(), Vec::new(), Some(executor.clone()));

    let err = session.send_message("standings").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(executor.calls().len(), 1);
    assert_eq!(transport.request_count(), 2);

    // The completed tool round stays; history is still consistent.
    assert_eq!(session.history().len(), 3);
    assert_paired(session.history());
}

/// Test: Opening a request is retried on overload when configured
#[tokio::test]
async fn test_retry_on_overload() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .status(529, r#"{"type":"error","error":{"type":"overloaded_error"}}"#)
            .refuse()
            .turn(TurnScript::new().text("Third time lucky").stop("end_turn")),
    );
    let options = options_builder().retry(fast_retry()).build().unwrap();
    let mut session = AgentSession::start(options, transport.clone(), Vec::new(), None);

    let outcome = assert_ok!(session.send_message("hello").await);
    assert_eq!(outcome, LoopOutcome::Completed);
    assert_eq!(transport.request_count(), 3);
    assert_eq!(session.history().len(), 2);
}

/// Test: Client errors are not retried
#[tokio::test]
async fn test_no_retry_on_client_error() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .status(400, "messages: roles must alternate")
            .turn(TurnScript::new().text("unused").stop("end_turn")),
    );
    let options = options_builder().retry(fast_retry()).build().unwrap();
    let mut session = AgentSession::start(options, transport.clone(), Vec::new(), None);

    let err = assert_err!(session.send_message("hello").await);
    assert_eq!(err.status(), Some(400));
    assert_eq!(transport.request_count(), 1);
}

/// Test: Without retry configuration, failures surface immediately
#[tokio::test]
async fn test_no_retry_by_default() {
    let transport = Arc::new(ScriptedTransport::new().status(529, "overloaded"));
    let mut session = AgentSession::start(options(), transport.clone(), Vec::new(), None);

    let err = assert_err!(session.send_message("hello").await);
    assert_eq!(err.status(), Some(529));
    assert_eq!(transport.request_count(), 1);
}

/// Test: A client tool use without an executor is a hard failure
///
/// Expected: MissingExecutor error, with the tool use answered so the
/// history stays valid
#[tokio::test]
async fn test_missing_executor_fails_turn() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .turn(TurnScript::new().tool_use("t1", "upload", &[]).stop("tool_use"))
            .turn(TurnScript::new().text("Recovered").stop("end_turn")),
    );
    let mut session = AgentSession::start(options(), transport.clone(), Vec::new(), None);

    let err = session.send_message("upload").await.unwrap_err();
    match &err {
        Error::MissingExecutor { tool } => assert_eq!(tool, "upload"),
        other => panic!("Expected MissingExecutor, got {:?}", other),
    }
    assert_eq!(transport.request_count(), 1);

    let history = session.history();
    assert_eq!(history.len(), 3);
    assert_paired(history);
    let result = history[2].tool_results().next().unwrap();
    assert!(result.is_error);
    assert!(result.content.contains("No tool executor"));

    // The next message goes out over a valid history.
    let outcome = assert_ok!(session.send_message("never mind").await);
    assert_eq!(outcome, LoopOutcome::Completed);
}

/// Test: Transport failures surface as-is
#[tokio::test]
async fn test_transport_timeout() {
    let transport = Arc::new(ScriptedTransport::new().refuse());
    let mut session = AgentSession::start(options(), transport, Vec::new(), None);

    let err = assert_err!(session.send_message("hello").await);
    assert!(matches!(err, Error::Timeout));
}
