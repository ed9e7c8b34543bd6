//! Session behavior against a scripted adapter: handshake ordering,
//! state gating, resume races and inspection.

mod common;

use aidb_config::AdapterCommandConfig;
use aidb_core::{BreakpointSpec, Error, ErrorCategory, ErrorCode, Language};
use aidb_dap::constants::{events, requests, stop_reasons};
use aidb_dap::{AdapterSpec, Capabilities};
use aidb_session::{
    InspectTarget, Session, SessionContext, SessionEventKind, SessionOptions, SessionStatus,
    StepKind,
};
use aidb_testing::{fixtures, MockAdapter, MockLauncher, Reply, MAIN_THREAD_ID, TOP_FRAME_ID};
use common::{python_request, Harness, WAIT};
use serde_json::json;
use std::sync::Arc;

fn lines_of(request: &aidb_dap::Request) -> Vec<i64> {
    let args = request.arguments.clone().unwrap_or_default();
    let mut lines: Vec<i64> = args["breakpoints"]
        .as_array()
        .map(|bps| bps.iter().filter_map(|bp| bp["line"].as_i64()).collect())
        .unwrap_or_default();
    lines.sort_unstable();
    lines
}

fn source_of(request: &aidb_dap::Request) -> String {
    let args = request.arguments.clone().unwrap_or_default();
    args["source"]["path"].as_str().unwrap_or_default().to_string()
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_order_and_buffered_breakpoints() {
    let harness = Harness::new(MockAdapter::new());
    let request = python_request()
        .breakpoints("/app/b.py", vec![BreakpointSpec::at_line(10)])
        .breakpoints("/app/a.py", vec![BreakpointSpec::at_line(5)])
        .breakpoints(
            "/app/b.py",
            vec![BreakpointSpec::at_line(20).with_condition("x > 1")],
        );
    let id = harness.service.start_session(request).await.unwrap();
    assert_eq!(harness.service.session(&id).await.unwrap().status(), SessionStatus::Running);

    let adapter = harness.adapter();
    let commands = adapter.commands();
    assert_eq!(commands[0], requests::INITIALIZE);
    assert_eq!(commands[1], requests::LAUNCH);

    // One request per file, in first-touched order, before configurationDone
    let sets = adapter.requests_for(requests::SET_BREAKPOINTS);
    assert_eq!(sets.len(), 2);
    assert_eq!(source_of(&sets[0]), "/app/b.py");
    assert_eq!(lines_of(&sets[0]), vec![10, 20]);
    assert_eq!(source_of(&sets[1]), "/app/a.py");
    assert_eq!(lines_of(&sets[1]), vec![5]);

    let done = commands
        .iter()
        .position(|c| c == requests::CONFIGURATION_DONE)
        .unwrap();
    let last_set = commands
        .iter()
        .rposition(|c| c == requests::SET_BREAKPOINTS)
        .unwrap();
    assert!(last_set < done, "breakpoints sent after configurationDone: {:?}", commands);

    let listed = harness.service.list_breakpoints(&id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().flat_map(|(_, bps)| bps).all(|bp| bp.verified));
}

#[tokio::test]
async fn test_adapter_answering_launch_immediately() {
    let harness = Harness::new(MockAdapter::new().immediate_launch().stop_on_entry());
    let id = harness.start_paused().await;

    let report = harness.service.status(&id).await.unwrap();
    let stop = report.stop.unwrap();
    assert_eq!(stop.reason, stop_reasons::ENTRY);
    assert_eq!(stop.thread_id, MAIN_THREAD_ID);
}

#[tokio::test]
async fn test_failed_launch_fails_start_and_unregisters() {
    let harness = Harness::new(MockAdapter::new().on(
        requests::LAUNCH,
        Reply::fail("No such file").then_event(events::INITIALIZED, None),
    ));
    let err = harness.service.start_session(python_request()).await.unwrap_err();
    assert!(err.to_string().contains("No such file"), "{}", err);
    assert!(harness.service.list_sessions().await.is_empty());
    assert!(harness.launcher.processes()[0].was_stopped());
}

// ============================================================================
// State gating
// ============================================================================

#[tokio::test]
async fn test_operations_rejected_before_start() {
    aidb_logging::init_test();
    let launcher = Arc::new(MockLauncher::new(MockAdapter::new()));
    let config = fixtures::test_config();
    let adapter = AdapterSpec::launch(AdapterCommandConfig::new("debugpy", "python"));
    let session = Session::new(
        SessionOptions::new(Language::Python, adapter, fixtures::launch_program("/app/main.py")),
        SessionContext::new(config.session, launcher.clone()),
    );
    assert_eq!(session.status(), SessionStatus::Created);

    let err = session
        .set_breakpoints("/app/main.py", &[BreakpointSpec::at_line(3)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "{:?}", err);
    assert!(matches!(session.continue_(None).await, Err(Error::InvalidState { .. })));
    assert!(matches!(session.evaluate("x", None).await, Err(Error::InvalidState { .. })));
    assert!(matches!(session.pause(None).await, Err(Error::InvalidState { .. })));
    assert_eq!(launcher.launch_count(), 0);

    // Stopping a never-started session is allowed and final
    session.stop().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Terminated);
}

#[tokio::test]
async fn test_operations_rejected_while_starting() {
    aidb_logging::init_test();
    let launcher = Arc::new(MockLauncher::new(
        MockAdapter::new().once(requests::INITIALIZE, Reply::Silent),
    ));
    let mut config = fixtures::test_config();
    config.session = config.session.with_request_timeout_ms(500);
    let adapter = AdapterSpec::launch(AdapterCommandConfig::new("debugpy", "python"));
    let session = Arc::new(Session::new(
        SessionOptions::new(Language::Python, adapter, fixtures::launch_program("/app/main.py")),
        SessionContext::new(config.session, launcher.clone()),
    ));

    let starting = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    let record = launcher.wait_for_launch(0, WAIT).await.unwrap();
    record
        .handle
        .wait_for_request(requests::INITIALIZE, WAIT)
        .await
        .unwrap();
    assert_eq!(session.status(), SessionStatus::Starting);

    assert!(matches!(
        session.set_breakpoints("/app/main.py", &[BreakpointSpec::at_line(3)]).await,
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(session.continue_(None).await, Err(Error::InvalidState { .. })));
    assert!(matches!(
        session.step(StepKind::Over, None).await,
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
        session.inspect(InspectTarget::Locals).await,
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(record.handle.commands(), vec![requests::INITIALIZE.to_string()]);

    // The unanswered initialize times out and the session fails
    let result = starting.await.unwrap();
    assert!(matches!(result, Err(Error::Timeout(_))), "{:?}", result);
    assert_eq!(session.status(), SessionStatus::Failed);
}

// ============================================================================
// Execution control
// ============================================================================

#[tokio::test]
async fn test_stopped_before_continue_response_ends_paused() {
    let script = MockAdapter::new().stop_on_entry().once(
        requests::CONTINUE,
        Reply::body(json!({"allThreadsContinued": true})).after_stop(stop_reasons::BREAKPOINT),
    );
    let harness = Harness::new(script);
    let id = harness.start_paused().await;

    harness.service.continue_(&id, None).await.unwrap();

    let report = harness.service.status(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(report.stop.unwrap().reason, stop_reasons::BREAKPOINT);
}

#[tokio::test]
async fn test_continue_then_breakpoint_hit() {
    let harness = Harness::new(MockAdapter::new().stop_on_entry());
    let id = harness.start_paused().await;

    harness.service.continue_(&id, None).await.unwrap();
    assert_eq!(
        harness.service.status(&id).await.unwrap().status,
        SessionStatus::Running
    );
    let sent = harness.adapter().requests_for(requests::CONTINUE);
    assert_eq!(sent[0].arguments.as_ref().unwrap()["threadId"], MAIN_THREAD_ID);

    harness.adapter().emit_stopped(stop_reasons::BREAKPOINT);
    let status = harness
        .service
        .wait_for_status(&id, &[SessionStatus::Paused], WAIT)
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::Paused);
}

#[tokio::test]
async fn test_refused_continue_rolls_back_to_paused() {
    let script = MockAdapter::new()
        .stop_on_entry()
        .once(requests::CONTINUE, Reply::fail("thread is not suspended"));
    let harness = Harness::new(script);
    let id = harness.start_paused().await;

    let err = harness.service.continue_(&id, None).await.unwrap_err();
    assert!(matches!(err, Error::RequestRejected { .. }), "{:?}", err);
    assert!(!err.is_session_broken());

    let report = harness.service.status(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(report.stop.unwrap().reason, stop_reasons::ENTRY);
}

#[tokio::test]
async fn test_second_resume_while_first_in_flight_is_busy() {
    let script = MockAdapter::new()
        .stop_on_entry()
        .once(requests::CONTINUE, Reply::Silent);
    let harness = Harness::new(script);
    let id = harness.start_paused().await;
    let session = harness.service.session(&id).await.unwrap();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.continue_(None).await }
    });
    harness
        .adapter()
        .wait_for_request(requests::CONTINUE, WAIT)
        .await
        .unwrap();

    let err = session.step(StepKind::Over, None).await.unwrap_err();
    assert!(matches!(err, Error::Busy(_)), "{:?}", err);
    assert_eq!(harness.adapter().count(requests::NEXT), 0);

    // The silent continue times out and is rolled back
    let result = first.await.unwrap();
    assert!(matches!(result, Err(Error::Timeout(_))), "{:?}", result);
    assert_eq!(session.status(), SessionStatus::Paused);
}

#[tokio::test]
async fn test_step_kinds_send_their_requests() {
    let harness = Harness::new(MockAdapter::new().stop_on_entry());
    let id = harness.start_paused().await;

    for kind in [StepKind::Over, StepKind::Into, StepKind::Out] {
        harness.service.step(&id, kind, None).await.unwrap();
        let status = harness
            .service
            .wait_for_status(&id, &[SessionStatus::Paused], WAIT)
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Paused);
        assert_eq!(harness.adapter().count(kind.command()), 1);
    }
    let report = harness.service.status(&id).await.unwrap();
    assert_eq!(report.stop.unwrap().reason, stop_reasons::STEP);
}

#[tokio::test]
async fn test_pause_requires_running() {
    let harness = Harness::new(MockAdapter::new().stop_on_entry());
    let id = harness.start_paused().await;

    let err = harness.service.pause(&id, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    harness.service.continue_(&id, None).await.unwrap();
    harness.service.pause(&id, None).await.unwrap();
    let status = harness
        .service
        .wait_for_status(&id, &[SessionStatus::Paused], WAIT)
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::Paused);
}

#[tokio::test]
async fn test_restart_without_capability() {
    let capabilities = Capabilities {
        supports_configuration_done_request: Some(true),
        ..Capabilities::default()
    };
    let harness = Harness::new(MockAdapter::new().with_capabilities(capabilities).stop_on_entry());
    let id = harness.start_paused().await;

    let err = harness.service.restart(&id).await.unwrap_err();
    assert!(matches!(err, Error::CapabilityUnsupported { .. }), "{:?}", err);
    assert_eq!(harness.adapter().count(requests::RESTART), 0);
}

#[tokio::test]
async fn test_restart_resends_launch_arguments() {
    let harness = Harness::new(MockAdapter::new().stop_on_entry());
    let id = harness.start_paused().await;

    harness.service.restart(&id).await.unwrap();
    let restart = harness
        .adapter()
        .wait_for_request(requests::RESTART, WAIT)
        .await
        .unwrap();
    assert_eq!(restart.arguments.unwrap()["arguments"]["program"], "/app/main.py");
    assert_eq!(
        harness.service.status(&id).await.unwrap().status,
        SessionStatus::Running
    );
}

// ============================================================================
// Breakpoints after the handshake
// ============================================================================

#[tokio::test]
async fn test_breakpoints_sent_immediately_once_configured() {
    let harness = Harness::new(MockAdapter::new());
    let id = harness.start().await;

    let verified = harness
        .service
        .set_breakpoints(
            &id,
            "/app/main.py",
            &[BreakpointSpec::at_line(7), BreakpointSpec::at_line(9).with_log_message("x={x}")],
        )
        .await
        .unwrap();
    assert_eq!(verified.len(), 2);
    assert!(verified.iter().all(|bp| bp.verified && bp.id.is_some()));

    let remaining = harness
        .service
        .remove_breakpoints(&id, "/app/main.py", &[7])
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].spec.line, 9);

    harness.service.clear_breakpoints(&id, "/app/main.py").await.unwrap();
    let sets = harness.adapter().requests_for(requests::SET_BREAKPOINTS);
    assert_eq!(sets.len(), 3);
    assert!(lines_of(&sets[2]).is_empty());
}

#[tokio::test]
async fn test_events_ahead_of_set_breakpoints_response_are_applied() {
    let mut config = fixtures::test_config();
    config.session.event_channel_capacity = 2;

    let mut ahead = vec![(
        events::BREAKPOINT.to_string(),
        Some(json!({"reason": "changed", "breakpoint": {"id": 1, "verified": true, "line": 10}})),
    )];
    for n in 0..6 {
        ahead.push((
            events::OUTPUT.to_string(),
            Some(json!({"category": "stdout", "output": format!("line {}\n", n)})),
        ));
    }
    let reply = Reply::EventsBefore(
        ahead,
        Box::new(Reply::body(json!({"breakpoints": [{"id": 1, "verified": true, "line": 10}]}))),
    );
    let script = MockAdapter::new().once(requests::SET_BREAKPOINTS, reply);
    let harness = Harness::with_config(MockLauncher::new(script), config);
    let id = harness.start().await;

    let verified = tokio::time::timeout(
        WAIT,
        harness
            .service
            .set_breakpoints(&id, "/app/main.py", &[BreakpointSpec::at_line(10)]),
    )
    .await
    .expect("set_breakpoints returns while events are queued")
    .unwrap();
    assert_eq!(verified.len(), 1);
    assert!(verified[0].verified);
    assert_eq!(verified[0].id, Some(1));

    // Everything sent before the response was applied by the time it returned
    let session = harness.service.session(&id).await.unwrap();
    let output = session.recent_output(20);
    assert!(output.iter().any(|line| line.text == "line 5\n"), "{:?}", output);
    assert_eq!(session.status(), SessionStatus::Running);
}

#[tokio::test]
async fn test_breakpoint_calls_queue_behind_each_other() {
    let harness = Harness::new(MockAdapter::new());
    let id = harness.start().await;

    let bps_a = [BreakpointSpec::at_line(1)];
    let bps_b = [BreakpointSpec::at_line(2)];
    let (a, b) = tokio::join!(
        harness.service.set_breakpoints(&id, "/app/a.py", &bps_a),
        harness.service.set_breakpoints(&id, "/app/b.py", &bps_b),
    );
    a.unwrap();
    b.unwrap();

    let listed = harness.service.list_breakpoints(&id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|(_, bps)| bps.len() == 1 && bps[0].verified));
}

#[tokio::test]
async fn test_logpoint_rejected_without_capability() {
    let capabilities = Capabilities {
        supports_configuration_done_request: Some(true),
        ..Capabilities::default()
    };
    let harness = Harness::new(MockAdapter::new().with_capabilities(capabilities));
    let id = harness.start().await;

    let err = harness
        .service
        .set_breakpoints(&id, "/app/main.py", &[BreakpointSpec::at_line(4).with_log_message("hi")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CapabilityUnsupported { .. }), "{:?}", err);
    assert_eq!(harness.adapter().count(requests::SET_BREAKPOINTS), 0);
}

#[tokio::test]
async fn test_failed_set_breakpoints_keeps_previous_set() {
    let harness = Harness::new(
        MockAdapter::new()
            .once(
                requests::SET_BREAKPOINTS,
                Reply::body(json!({"breakpoints": [{"id": 1, "verified": true, "line": 1}]})),
            )
            .once(requests::SET_BREAKPOINTS, Reply::fail("source not loaded")),
    );
    let id = harness.start().await;

    harness
        .service
        .set_breakpoints(&id, "/app/main.py", &[BreakpointSpec::at_line(1)])
        .await
        .unwrap();
    let err = harness
        .service
        .set_breakpoints(&id, "/app/main.py", &[BreakpointSpec::at_line(2)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("source not loaded"), "{}", err);

    let listed = harness.service.list_breakpoints(&id).await.unwrap();
    let lines: Vec<u32> = listed
        .iter()
        .flat_map(|(_, bps)| bps.iter().map(|bp| bp.spec.line))
        .collect();
    assert_eq!(lines, vec![1]);
}

#[tokio::test]
async fn test_function_breakpoints() {
    let harness = Harness::new(MockAdapter::new());
    let id = harness.start().await;

    let names = vec!["compute".to_string(), "main".to_string()];
    let reported = harness.service.set_function_breakpoints(&id, &names).await.unwrap();
    assert_eq!(reported.len(), 2);
    let sent = harness.adapter().requests_for(requests::SET_FUNCTION_BREAKPOINTS);
    assert_eq!(sent[0].arguments.as_ref().unwrap()["breakpoints"][1]["name"], "main");
}

// ============================================================================
// Inspection and evaluation
// ============================================================================

#[tokio::test]
async fn test_inspect_all_while_paused() {
    let harness = Harness::new(MockAdapter::new().stop_on_entry());
    let id = harness.start_paused().await;

    let report = harness.service.inspect(&id, InspectTarget::All).await.unwrap();
    assert!(report.is_complete(), "{:?}", report.failures);
    assert_eq!(report.threads.unwrap()[0].name, "MainThread");
    assert_eq!(report.stack.as_ref().unwrap()[0].id, TOP_FRAME_ID);
    let locals = report.locals.unwrap();
    assert_eq!(locals.len(), 2);
    assert!(locals.iter().any(|v| v.name == "items" && v.has_children()));
    assert_eq!(report.globals.unwrap()[0].name, "__name__");
}

#[tokio::test]
async fn test_inspect_partial_failure_is_reported() {
    let harness = Harness::new(
        MockAdapter::new()
            .stop_on_entry()
            .on(requests::THREADS, Reply::fail("threads unavailable")),
    );
    let id = harness.start_paused().await;

    let report = harness.service.inspect(&id, InspectTarget::All).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].target, InspectTarget::Threads);
    assert!(report.locals.is_some());
}

#[tokio::test]
async fn test_rejected_variables_request_leaves_session_usable() {
    let harness = Harness::new(
        MockAdapter::new()
            .stop_on_entry()
            .once(requests::VARIABLES, Reply::fail("Invalid variable reference")),
    );
    let id = harness.start_paused().await;
    let session = harness.service.session(&id).await.unwrap();

    let err = session.variables(999).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RequestRejected);
    assert_eq!(err.category(), ErrorCategory::InvalidRequest);
    assert!(err.to_string().contains("Invalid variable reference"));

    assert_eq!(session.status(), SessionStatus::Paused);
    assert!(session.variables(aidb_testing::LOCALS_REF).await.is_ok());
}

#[tokio::test]
async fn test_inspect_while_running() {
    let harness = Harness::new(MockAdapter::new());
    let id = harness.start().await;

    let threads = harness.service.inspect(&id, InspectTarget::Threads).await.unwrap();
    assert_eq!(threads.threads.unwrap().len(), 1);

    let err = harness.service.inspect(&id, InspectTarget::Locals).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "{:?}", err);
    assert_eq!(harness.adapter().count(requests::SCOPES), 0);
}

#[tokio::test]
async fn test_evaluate_in_top_frame() {
    let harness = Harness::new(MockAdapter::new().stop_on_entry());
    let id = harness.start_paused().await;

    let result = harness.service.evaluate(&id, "len(items)", None).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(result.value, "len(items)");

    let sent = harness.adapter().requests_for(requests::EVALUATE);
    let args = sent[0].arguments.clone().unwrap();
    assert_eq!(args["frameId"], TOP_FRAME_ID);
    assert_eq!(args["context"], "repl");
}

#[tokio::test]
async fn test_evaluate_error_is_a_result() {
    let harness = Harness::new(
        MockAdapter::new()
            .stop_on_entry()
            .once(requests::EVALUATE, Reply::fail("name 'y' is not defined")),
    );
    let id = harness.start_paused().await;

    let result = harness.service.evaluate(&id, "y", Some(TOP_FRAME_ID)).await.unwrap();
    assert!(!result.is_ok());
    assert!(result.error.unwrap().contains("name 'y' is not defined"));

    // The session is unaffected
    assert_eq!(
        harness.service.status(&id).await.unwrap().status,
        SessionStatus::Paused
    );
}

#[tokio::test]
async fn test_disconnect_during_evaluate_is_a_connection_error() {
    let harness = Harness::new(
        MockAdapter::new()
            .stop_on_entry()
            .once(requests::EVALUATE, Reply::Disconnect),
    );
    let id = harness.start_paused().await;
    let session = harness.service.session(&id).await.unwrap();

    let err = session.evaluate("x", Some(TOP_FRAME_ID)).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "{:?}", err);

    let status = session
        .wait_for_status(&[SessionStatus::Failed, SessionStatus::Terminated], WAIT)
        .await
        .unwrap();
    assert!(status.is_terminal());
}

#[tokio::test]
async fn test_output_events_kept_for_status() {
    let harness = Harness::new(MockAdapter::new());
    let id = harness.start().await;
    let mut events = harness.service.subscribe();

    harness.adapter().emit_event(
        events::OUTPUT,
        Some(json!({"category": "stdout", "output": "hello\n"})),
    );
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches!(event.kind, SessionEventKind::Output { .. }) => break,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await
    .unwrap();

    let report = harness.service.status(&id).await.unwrap();
    assert!(report.recent_output.iter().any(|line| line.text.contains("hello")));
}
