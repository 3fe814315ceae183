//! Process-wide fault capture.
//!
//! [`ErrorCaptureAdapter`] is the entry point for faults that escape the host
//! request pipeline: panics (through a panic hook installed once per
//! process) and errors returned from `main` or background work. It also
//! promotes runtime warnings to catchable [`RuntimeFault`] errors via
//! [`ErrorCaptureAdapter::raise`].
//!
//! In debug mode the hook defers to the previously installed one so the
//! usual diagnostic output is shown, and nothing is reported.

use std::error::Error as StdError;
use std::io::Write;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, warn};

use crate::fault::{classify, FaultRecord, RawFault, RuntimeFault, Severity, SourceLocation};
use crate::render::{Response, ResponseRenderer};
use crate::request::{self, RequestSnapshot};

/// Size of the memory reserved for the fault path.
pub const EMERGENCY_RESERVE_BYTES: usize = 10 * 1024;

/// Status used for the error page of a panic inside a request.
const PANIC_STATUS: u16 = 500;

/// Callback receiving every fault the adapter captures.
pub type FaultCallback = Box<dyn Fn(&FaultRecord, Option<&RequestSnapshot>) + Send + Sync>;

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Errors produced when installing the capture hook.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A capture hook was already installed in this process.
    #[error("a fault capture hook is already installed in this process")]
    AlreadyInstalled,
}

/// Memory set aside at startup and freed the moment a fault is handled, so
/// an out-of-memory fault still leaves room to report itself.
#[derive(Debug)]
pub struct EmergencyReserve {
    buffer: Mutex<Option<Vec<u8>>>,
}

impl EmergencyReserve {
    /// Reserve `bytes` bytes.
    pub fn new(bytes: usize) -> Self {
        Self {
            buffer: Mutex::new(Some(vec![b'x'; bytes])),
        }
    }

    /// Free the reserve. Returns `true` on the first call only.
    pub fn release(&self) -> bool {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.take().is_some()
    }

    /// Whether the reserve is still held.
    pub fn is_held(&self) -> bool {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Default for EmergencyReserve {
    fn default() -> Self {
        Self::new(EMERGENCY_RESERVE_BYTES)
    }
}

/// Captures faults outside the request pipeline and routes them to a
/// callback and, inside a request, to an error page.
pub struct ErrorCaptureAdapter {
    debug: bool,
    promote_from: Severity,
    on_fault: FaultCallback,
    renderer: Arc<ResponseRenderer>,
    reserve: EmergencyReserve,
    installed: AtomicBool,
}

impl ErrorCaptureAdapter {
    /// Create an adapter. Nothing is hooked until [`install`](Self::install).
    pub fn new(debug: bool, on_fault: FaultCallback, renderer: Arc<ResponseRenderer>) -> Self {
        Self {
            debug,
            promote_from: Severity::Deprecated,
            on_fault,
            renderer,
            reserve: EmergencyReserve::default(),
            installed: AtomicBool::new(false),
        }
    }

    /// Only promote runtime faults at or above `severity`.
    pub fn promote_from(mut self, severity: Severity) -> Self {
        self.promote_from = severity;
        self
    }

    /// Whether this adapter's hook is installed.
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Whether the emergency reserve is still held.
    pub fn reserve_held(&self) -> bool {
        self.reserve.is_held()
    }

    /// Release the emergency reserve. Idempotent.
    pub fn release_reserve(&self) -> bool {
        self.reserve.release()
    }

    /// Install the panic hook. At most one adapter per process.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AlreadyInstalled`] if an adapter was already
    /// installed.
    pub fn install(self) -> Result<Arc<Self>, CaptureError> {
        if HOOK_INSTALLED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CaptureError::AlreadyInstalled);
        }

        let adapter = Arc::new(self);
        adapter.installed.store(true, Ordering::Release);

        let previous: PanicHook = panic::take_hook();
        let hooked = Arc::clone(&adapter);
        panic::set_hook(Box::new(move |info| hooked.on_panic(info, &previous)));

        Ok(adapter)
    }

    /// Report a runtime fault located at the caller.
    ///
    /// Once installed, faults at or above the promotion threshold come back
    /// as `Err` so they travel through the normal error channel. Otherwise
    /// they are logged and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// Returns the promoted [`RuntimeFault`].
    #[track_caller]
    pub fn raise(&self, severity: Severity, message: impl Into<String>) -> Result<(), RuntimeFault> {
        let fault = RuntimeFault::new(severity, message);
        if self.is_installed() && severity >= self.promote_from {
            return Err(fault);
        }
        warn!(
            severity = %fault.severity(),
            location = %fault.location(),
            "{}",
            fault.message()
        );
        Ok(())
    }

    /// Handle a fault that reached the top of the stack unhandled.
    ///
    /// Returns the error page when `request` is present. Debug mode and
    /// faults outside a request produce no response.
    pub fn handle_unhandled(
        &self,
        raw: RawFault<'_>,
        request: Option<&RequestSnapshot>,
    ) -> Option<Response> {
        self.reserve.release();
        let record = classify(raw);
        self.dispatch(&record, request)
    }

    /// Report an error that escaped `main` or a background task.
    pub fn report_unhandled(&self, error: &(dyn StdError + 'static)) {
        self.handle_unhandled(RawFault::error(error), None);
    }

    fn dispatch(&self, record: &FaultRecord, request: Option<&RequestSnapshot>) -> Option<Response> {
        error!(
            kind = %record.kind(),
            type_name = record.type_name(),
            location = ?record.location(),
            "unhandled fault: {}",
            record.message()
        );
        if self.debug {
            return None;
        }

        (self.on_fault)(record, request);

        request.map(|_| {
            self.renderer
                .render(record.status_code().unwrap_or(PANIC_STATUS))
        })
    }

    fn on_panic(&self, info: &PanicHookInfo<'_>, previous: &PanicHook) {
        if self.debug {
            previous(info);
            return;
        }

        self.reserve.release();
        let location = info.location().map(SourceLocation::from);
        let record = classify(RawFault::panic(info.payload(), location));

        // Written before any callback runs so a failure further down still
        // leaves a trace.
        let _ = writeln!(
            std::io::stderr(),
            "faultline: unhandled {}: {}{}",
            record.kind(),
            record.message(),
            record
                .location()
                .map(|l| format!(" at {l}"))
                .unwrap_or_default()
        );

        let request = request::current_request();
        if let Some(response) = self.dispatch(&record, request.as_ref()) {
            if !request::store_response(response) {
                let _ = writeln!(std::io::stderr(), "faultline: {}", crate::render::FALLBACK_BODY);
            }
        }
    }
}
