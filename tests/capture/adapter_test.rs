//! Unhandled fault routing without a process-wide hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::sync::{Arc, Mutex};

use faultline::capture::FaultCallback;
use faultline::fault::SourceLocation;
use faultline::{ErrorCaptureAdapter, FaultKind, FaultRecord, RawFault, RequestSnapshot, Severity};

use crate::common::{broken_renderer, echo_renderer, AppError};

type Seen = Arc<Mutex<Vec<(FaultRecord, Option<RequestSnapshot>)>>>;

fn recording_adapter(debug: bool) -> (ErrorCaptureAdapter, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let on_fault: FaultCallback = Box::new(
        move |record: &FaultRecord, request: Option<&RequestSnapshot>| {
            sink.lock()
                .expect("lock")
                .push((record.clone(), request.cloned()));
        },
    );
    let adapter = ErrorCaptureAdapter::new(debug, on_fault, Arc::new(echo_renderer()));
    (adapter, seen)
}

fn panic_payload() -> Box<dyn Any + Send> {
    Box::new("worker crashed")
}

#[test]
fn fault_outside_request_is_reported_without_response() {
    let (adapter, seen) = recording_adapter(false);
    let payload = panic_payload();

    let response = adapter.handle_unhandled(
        RawFault::panic(&*payload, Some(SourceLocation::new("src/worker.rs", 5)))
            .with_backtrace(Backtrace::disabled()),
        None,
    );

    assert!(response.is_none());
    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.kind(), FaultKind::FatalError);
    assert_eq!(seen[0].0.message(), "worker crashed");
    assert!(seen[0].1.is_none());
}

#[test]
fn fault_inside_request_renders_error_page() {
    let (adapter, seen) = recording_adapter(false);
    let payload = panic_payload();
    let request = RequestSnapshot::new("/admin/export", "198.51.100.4");

    let response = adapter
        .handle_unhandled(RawFault::panic(&*payload, None), Some(&request))
        .expect("request faults get a response");

    assert_eq!(response.status, 500);
    assert_eq!(response.body, "rendered generic.html");
    assert_eq!(seen.lock().expect("lock")[0].1.as_ref(), Some(&request));
}

#[test]
fn status_carried_by_the_fault_selects_the_page() {
    let (adapter, _seen) = recording_adapter(false);
    let err = AppError("no such page".to_owned());
    let request = RequestSnapshot::new("/nope", "127.0.0.1");

    let response = adapter
        .handle_unhandled(RawFault::error(&err).with_status(404), Some(&request))
        .expect("response");

    assert_eq!(response.status, 404);
    assert_eq!(response.body, "rendered 404.html");
}

#[test]
fn rendering_failure_still_produces_fallback() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let on_fault: FaultCallback = Box::new(
        move |record: &FaultRecord, request: Option<&RequestSnapshot>| {
            sink.lock()
                .expect("lock")
                .push((record.clone(), request.cloned()));
        },
    );
    let adapter = ErrorCaptureAdapter::new(false, on_fault, Arc::new(broken_renderer()));
    let payload = panic_payload();
    let request = RequestSnapshot::new("/", "127.0.0.1");

    let response = adapter
        .handle_unhandled(RawFault::panic(&*payload, None), Some(&request))
        .expect("response");

    assert_eq!(response.status, 500);
    assert_eq!(response.body, "Internal error while handling your request");
    assert_eq!(seen.lock().expect("lock").len(), 1);
}

#[test]
fn debug_mode_reports_nothing() {
    let (adapter, seen) = recording_adapter(true);
    let payload = panic_payload();
    let request = RequestSnapshot::new("/", "127.0.0.1");

    assert!(adapter
        .handle_unhandled(RawFault::panic(&*payload, None), Some(&request))
        .is_none());
    assert!(seen.lock().expect("lock").is_empty());
}

#[test]
fn handling_releases_the_reserve() {
    let (adapter, _seen) = recording_adapter(false);
    assert!(adapter.reserve_held());

    let payload = panic_payload();
    adapter.handle_unhandled(RawFault::panic(&*payload, None), None);
    assert!(!adapter.reserve_held());

    adapter.handle_unhandled(RawFault::panic(&*payload, None), None);
    assert!(!adapter.reserve_held());
}

#[test]
fn errors_escaping_main_are_reported_as_exceptions() {
    let (adapter, seen) = recording_adapter(false);
    let err = AppError("database migration failed".to_owned());

    adapter.report_unhandled(&err);

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.kind(), FaultKind::Exception);
    assert!(seen[0].0.status_code().is_none());
    assert!(seen[0].1.is_none());
}

#[test]
fn raise_before_install_only_logs() {
    let (adapter, seen) = recording_adapter(false);
    assert!(!adapter.is_installed());
    assert!(adapter.raise(Severity::Warning, "cache miss storm").is_ok());
    assert!(seen.lock().expect("lock").is_empty());
}
