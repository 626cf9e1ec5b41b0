//! Integration tests against a mock klippy API server.
//!
//! Exercises real UNIX socket traffic: connect retry, correlation,
//! printer queries, and `G10` interception.

mod common;

use common::{frame_of, printer_handler, Handler, MockDaemon, Reply, TOOLS_CFG};
use klippy_uds::{
    read_offsets, CallOptions, CancelToken, Error, GcodeOutcome, Position, Printer, Session,
    SessionConfig, ToolOffset,
};
use serde_json::json;
use std::thread;
use std::time::{Duration, Instant};

fn config_for(daemon: &MockDaemon) -> SessionConfig {
    SessionConfig::new(&daemon.socket_path)
        .with_retry_interval(Duration::from_millis(20))
        .with_connect_timeout(Some(Duration::from_secs(10)))
        .with_poll_interval(Duration::from_millis(50))
        .with_call_timeout(Some(Duration::from_secs(5)))
}

fn connect(daemon: &MockDaemon) -> Printer {
    Printer::connect(config_for(daemon)).unwrap()
}

// ============================================================================
// Connection
// ============================================================================

#[test]
fn test_connect_waits_for_daemon_to_appear() {
    let daemon = MockDaemon::start_after(Duration::from_millis(300), |dir| {
        Box::new(printer_handler(dir)) as Handler
    });

    let start = Instant::now();
    let mut printer = connect(&daemon);
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert_eq!(printer.status().unwrap(), "ready");
}

#[test]
fn test_peer_close_is_fatal() {
    let daemon = MockDaemon::start_with(|_| Box::new(|_: &klippy_uds::Request| Reply::Close));
    let mut session = Session::connect(config_for(&daemon)).unwrap();

    let err = session.call("info", Some(json!({}))).unwrap_err();
    assert!(err.is_fatal(), "expected fatal error, got {:?}", err);
}

// ============================================================================
// Correlation
// ============================================================================

#[test]
fn test_ids_on_the_wire_increase() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    printer.status().unwrap();
    printer.position().unwrap();
    printer.extruder_count().unwrap();

    let ids: Vec<u64> = daemon.requests().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_wrong_id_is_never_returned_as_match() {
    let daemon = MockDaemon::start_with(|_| {
        Box::new(|request: &klippy_uds::Request| {
            if request.id == 1 {
                Reply::Raw(frame_of(json!({"id": 99, "result": {"state": "bogus"}})))
            } else {
                Reply::Result(json!({"state": "ready"}))
            }
        })
    });
    let mut session = Session::connect(config_for(&daemon)).unwrap();

    let err = session.call("info", Some(json!({}))).unwrap_err();
    assert!(matches!(err, Error::Protocol { expected: 1, received: 99 }));

    let result = session.call("info", Some(json!({}))).unwrap();
    assert_eq!(result["state"], "ready");
}

#[test]
fn test_two_frames_in_one_write_are_both_delivered() {
    let daemon = MockDaemon::start_with(|_| {
        Box::new(|request: &klippy_uds::Request| {
            if request.id == 2 {
                let mut bytes = frame_of(json!({"id": 2, "result": {"n": 2}}));
                bytes.extend(frame_of(json!({"id": 1, "result": {"n": 1}})));
                Reply::Raw(bytes)
            } else {
                Reply::Silent
            }
        })
    });
    let mut session = Session::connect(config_for(&daemon)).unwrap();

    let first = session.send_request("info", None).unwrap();
    let second = session.send_request("info", None).unwrap();
    let opts = CallOptions::default();
    assert_eq!(session.wait_response(first, &opts).unwrap()["n"], 1);
    assert_eq!(session.wait_response(second, &opts).unwrap()["n"], 2);
}

#[test]
fn test_silent_daemon_times_out() {
    let daemon = MockDaemon::start_with(|_| Box::new(|_: &klippy_uds::Request| Reply::Silent));
    let mut session = Session::connect(config_for(&daemon)).unwrap();

    let opts = CallOptions::default().with_timeout(Duration::from_millis(200));
    let start = Instant::now();
    let err = session.call_with("info", None, &opts).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_cancel_from_another_thread() {
    let daemon = MockDaemon::start_with(|_| Box::new(|_: &klippy_uds::Request| Reply::Silent));
    let mut session = Session::connect(config_for(&daemon).with_call_timeout(None)).unwrap();

    let token = CancelToken::new();
    let remote = token.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        remote.cancel();
    });

    let opts = CallOptions::default().with_cancel(token);
    let err = session.call_with("info", None, &opts).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    canceller.join().unwrap();
}

// ============================================================================
// Printer queries
// ============================================================================

#[test]
fn test_status_and_config_file() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    assert_eq!(printer.status().unwrap(), "ready");
    assert!(printer.is_idle().unwrap());
    assert_eq!(printer.config_file().unwrap(), daemon.dir.path().join("printer.cfg"));
    assert_eq!(printer.offsets_file().unwrap(), daemon.tools_path());
}

#[test]
fn test_positions() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    assert_eq!(
        printer.position().unwrap(),
        Position { x: 10.0, y: 20.0, z: 5.0, e: 1.5 }
    );
    assert_eq!(
        printer.absolute_position().unwrap(),
        Position { x: 30.0, y: 40.0, z: 5.0, e: 1.5 }
    );

    let query = &daemon.requests()[0];
    assert_eq!(query.method, "objects/query");
    assert_eq!(
        query.params,
        Some(json!({"objects": {"gcode_move": ["gcode_position"]}}))
    );
}

#[test]
fn test_tools() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    assert_eq!(printer.current_tool().unwrap(), Some(1));
    assert_eq!(printer.extruder_count().unwrap(), 2);
    assert_eq!(
        printer.tool_offset(None).unwrap(),
        ToolOffset::new(-20.5, 0.75, 0.12)
    );
}

#[test]
fn test_gcode_forwarded_and_remote_error() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    assert_eq!(printer.gcode("G28").unwrap(), GcodeOutcome::Sent);

    let err = printer.gcode("G1 X10").unwrap_err();
    assert!(matches!(err, Error::Remote(ref m) if m.starts_with("Must home axis first")));

    let scripts: Vec<String> = daemon
        .requests()
        .iter()
        .filter(|r| r.method == "gcode/script")
        .map(|r| r.params.as_ref().unwrap()["script"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(scripts, vec!["G28", "G1 X10"]);
}

#[test]
fn test_gcode_batch_stops_at_first_failure() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    let err = printer.gcode_batch(["G28", "G1 X5", "M400"]).unwrap_err();
    assert!(matches!(err, Error::Remote(_)));
    assert_eq!(daemon.methods(), vec!["gcode/script", "gcode/script"]);
}

// ============================================================================
// G10 interception
// ============================================================================

#[test]
fn test_g10_updates_offsets_without_forwarding() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    let outcome = printer.gcode("G10 P0 X1.0 Y2.0 Z-0.5").unwrap();
    assert_eq!(
        outcome,
        GcodeOutcome::OffsetsStored {
            tool: 0,
            offset: ToolOffset::new(1.0, 2.0, -0.5)
        }
    );

    assert!(daemon.methods().iter().all(|m| m != "gcode/script"));
    assert_eq!(
        read_offsets(&daemon.tools_path(), 0).unwrap(),
        ToolOffset::new(1.0, 2.0, -0.5)
    );

    // Tool 1's block is untouched.
    let after = std::fs::read_to_string(daemon.tools_path()).unwrap();
    assert_eq!(
        after.lines().skip(3).collect::<Vec<_>>(),
        TOOLS_CFG.lines().skip(3).collect::<Vec<_>>()
    );
}

#[test]
fn test_g10_partial_keeps_other_axes() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    printer.gcode("g10 p1 z0.2").unwrap();
    assert_eq!(
        printer.tool_offset(Some(1)).unwrap(),
        ToolOffset::new(-20.5, 0.75, 0.2)
    );
}

#[test]
fn test_malformed_g10_is_parse_error() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    let err = printer.gcode("G10 X1 Y2").unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
    assert!(daemon.requests().is_empty());
}

#[test]
fn test_g10_for_unknown_tool_is_not_found() {
    let daemon = MockDaemon::start();
    let mut printer = connect(&daemon);

    let err = printer.gcode("G10 P7 X1").unwrap_err();
    assert!(matches!(err, Error::ConfigNotFound { tool: 7, .. }));
    assert_eq!(std::fs::read_to_string(daemon.tools_path()).unwrap(), TOOLS_CFG);
}
