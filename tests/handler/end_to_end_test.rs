//! Error callback flow: classify, gate, notify, render.

use std::any::Any;
use std::sync::Arc;

use faultline::notifier::Notifier;
use faultline::{FaultHandler, RawFault, RequestSnapshot, RuntimeFault, Severity};

use crate::common::{
    broken_renderer, client_error_policy, echo_renderer, AppError, RecordingTransport,
};

fn handler_with(transport: &Arc<RecordingTransport>) -> FaultHandler {
    let notifier = Notifier::new(Box::new(Arc::clone(transport)), client_error_policy());
    FaultHandler::new(false, Some(notifier), echo_renderer())
}

fn checkout() -> RequestSnapshot {
    RequestSnapshot::new("/checkout", "203.0.113.7")
}

#[test]
fn client_errors_render_without_email() {
    let transport = RecordingTransport::new();
    let handler = handler_with(&transport);
    let err = AppError("no route for /missing".to_owned());

    let response = handler
        .handle(&err, 404, Some(&checkout()))
        .expect("production mode renders");

    assert_eq!(response.status, 404);
    assert_eq!(response.body, "rendered 404.html");
    assert_eq!(transport.send_count(), 0);
    assert_eq!(transport.flush_count(), 0);
}

#[test]
fn server_errors_email_once_and_flush_once() {
    let transport = RecordingTransport::new();
    let handler = handler_with(&transport);
    let err = AppError("payment gateway timed out".to_owned());

    let response = handler
        .handle(&err, 500, Some(&checkout()))
        .expect("production mode renders");

    assert_eq!(response.status, 500);
    assert_eq!(response.body, "rendered generic.html");
    assert_eq!(transport.send_count(), 1);
    assert_eq!(transport.flush_count(), 1);

    let sent = transport.sent();
    assert_eq!(sent[0].subject, "Error at Shop");
    assert!(sent[0].body.contains("Message: payment gateway timed out"));
    assert!(sent[0].body.contains("Status: 500"));
    assert!(sent[0].body.contains("Happened at: /checkout for 203.0.113.7"));
}

#[test]
fn debug_mode_leaves_the_response_to_the_host() {
    let transport = RecordingTransport::new();
    let notifier = Notifier::new(Box::new(Arc::clone(&transport)), client_error_policy());
    let handler = FaultHandler::new(true, Some(notifier), echo_renderer());
    let err = AppError("boom".to_owned());

    assert!(handler.is_debug());
    assert!(handler.handle(&err, 500, Some(&checkout())).is_none());
    assert_eq!(transport.send_count(), 0);
}

#[test]
fn delivery_failure_still_renders() {
    let transport = RecordingTransport::failing_sends(1);
    let handler = handler_with(&transport);
    let err = AppError("disk full".to_owned());

    let response = handler
        .handle(&err, 503, Some(&checkout()))
        .expect("production mode renders");

    assert_eq!(response.status, 503);
    assert_eq!(response.body, "rendered generic.html");
    assert_eq!(transport.send_count(), 1);
    assert_eq!(transport.flush_count(), 1);
    assert!(transport.sent().is_empty());
}

#[test]
fn render_failure_still_emails_and_falls_back() {
    let transport = RecordingTransport::new();
    let notifier = Notifier::new(Box::new(Arc::clone(&transport)), client_error_policy());
    let handler = FaultHandler::new(false, Some(notifier), broken_renderer());
    let err = AppError("template cache corrupted".to_owned());

    let response = handler
        .handle(&err, 500, Some(&checkout()))
        .expect("production mode renders");

    assert_eq!(response.status, 500);
    assert_eq!(response.body, "Internal error while handling your request");
    assert_eq!(transport.send_count(), 1);
}

#[test]
fn promoted_runtime_faults_are_reported_as_runtime_errors() {
    let transport = RecordingTransport::new();
    let handler = handler_with(&transport);
    let fault = RuntimeFault::new(Severity::Warning, "division by zero in cart total");

    handler.handle(&fault, 500, None);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("Exception: RuntimeFault (runtime_error)"));
    assert!(sent[0].body.contains("Happened outside of a request scope."));
    assert!(sent[0].body.contains("end_to_end_test.rs"));
}

#[test]
fn raw_faults_without_status_render_generic_page() {
    let transport = RecordingTransport::new();
    let handler = handler_with(&transport);
    let err = AppError("unexpected state".to_owned());

    let response = handler
        .handle_raw(RawFault::error(&err).with_code(42), Some(&checkout()))
        .expect("production mode renders");

    assert_eq!(response.status, 500);
    assert!(transport.sent()[0].body.contains("Error Code: 42"));
}

#[test]
fn no_notifier_still_renders() {
    let handler = FaultHandler::new(false, None, echo_renderer());
    let err = AppError("boom".to_owned());

    assert!(handler.notifier().is_none());
    let response = handler.handle(&err, 405, None).expect("renders");
    assert_eq!(response.body, "rendered 405.html");
}

#[test]
fn capture_adapter_shares_the_notifier_and_ignores_the_gate() {
    let transport = RecordingTransport::new();
    let handler = handler_with(&transport);
    let adapter = handler.capture_adapter();
    let payload: Box<dyn Any + Send> = Box::new("queue worker crashed");

    let response = adapter.handle_unhandled(RawFault::panic(&*payload, None), None);

    assert!(response.is_none());
    assert_eq!(transport.send_count(), 1);
    let sent = transport.sent();
    assert!(sent[0].body.contains("Exception: panic (fatal_error)"));
    assert!(sent[0].body.contains("Message: queue worker crashed"));

    // Suppressed statuses only gate the in-pipeline path.
    let err = AppError("forbidden".to_owned());
    adapter.handle_unhandled(RawFault::error(&err).with_status(403), None);
    assert_eq!(transport.send_count(), 2);
}
