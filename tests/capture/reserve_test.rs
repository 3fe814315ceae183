//! Emergency memory reserve.

use std::sync::Arc;

use faultline::capture::{EmergencyReserve, EMERGENCY_RESERVE_BYTES};
use faultline::{ErrorCaptureAdapter, FaultRecord, RequestSnapshot};

use crate::common::echo_renderer;

#[test]
fn reserve_is_ten_kibibytes() {
    assert_eq!(EMERGENCY_RESERVE_BYTES, 10_240);
}

#[test]
fn release_happens_once() {
    let reserve = EmergencyReserve::default();
    assert!(reserve.is_held());

    assert!(reserve.release());
    assert!(!reserve.is_held());

    assert!(!reserve.release());
    assert!(!reserve.is_held());
}

#[test]
fn adapter_holds_reserve_until_released() {
    let adapter = ErrorCaptureAdapter::new(
        false,
        Box::new(|_: &FaultRecord, _: Option<&RequestSnapshot>| {}),
        Arc::new(echo_renderer()),
    );
    assert!(adapter.reserve_held());
    assert!(adapter.release_reserve());
    assert!(!adapter.release_reserve());
    assert!(!adapter.reserve_held());
}
