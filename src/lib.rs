//! Faultline: last-resort error reporting.
//!
//! Intercepts errors and panics, emails a report to the people who need to
//! know, and renders a fallback error page. The host owns the request
//! pipeline; faultline plugs into its error callback ([`handler::FaultHandler`])
//! and catches what escapes it ([`capture::ErrorCaptureAdapter`]).
//!
//! See `DESIGN.md` for how the pieces fit together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Panic hook, runtime fault promotion and the emergency memory reserve.
pub mod capture;
/// Configuration loading and validation.
pub mod config;
/// Fault classification into normalised records.
pub mod fault;
/// Which faults trigger a notification.
pub mod gate;
/// In-pipeline fault handling, assembled from configuration.
pub mod handler;
/// Structured logging setup.
pub mod logging;
/// Email reports and mail transports.
pub mod notifier;
/// Error page rendering.
pub mod render;
/// Active-request context for the capture path.
pub mod request;

pub use capture::ErrorCaptureAdapter;
pub use fault::{classify, FaultKind, FaultRecord, RawFault, RuntimeFault, Severity};
pub use handler::FaultHandler;
pub use request::{RequestScope, RequestSnapshot};
