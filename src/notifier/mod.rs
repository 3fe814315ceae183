//! Email notifications for faults.
//!
//! The [`Notifier`] formats a plain-text report and hands it to a
//! [`MailTransport`]. Delivery is forced synchronously: after the send the
//! transport's pending queue is flushed, because fatal and out-of-request
//! faults happen after any end-of-request flush would have run.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::fault::FaultRecord;
use crate::gate::NotificationPolicy;
use crate::request::RequestSnapshot;

pub mod http;
pub mod pickup;
pub mod spool;

pub use http::HttpMailTransport;
pub use pickup::PickupDirTransport;
pub use spool::SpoolTransport;

/// Display name used for the sender of every report.
pub const REPORTER_NAME: &str = "Error reporter";

/// Report line used when the fault happened outside any request.
pub const OUTSIDE_REQUEST_MARKER: &str = "Happened outside of a request scope.";

/// An address with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    /// Email address.
    pub address: String,
    /// Display name.
    pub name: String,
}

/// A plain-text email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    /// Sender.
    pub from: Mailbox,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Errors produced while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The HTTP request to the mail API failed.
    #[error("mail API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The mail API answered with a non-success status.
    #[error("mail API rejected message with status {status}: {body}")]
    Rejected {
        /// HTTP status returned by the API.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Writing a message file failed.
    #[error("failed to write message to {path}: {source}")]
    Io {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Mail delivery collaborator.
pub trait MailTransport: Send + Sync {
    /// Hand a message to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport refused or failed to accept it.
    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError>;

    /// Deliver anything the transport has queued. No-op by default.
    ///
    /// # Errors
    ///
    /// Returns an error if a queued message could not be delivered.
    fn flush_pending_queue(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

impl<T: MailTransport + ?Sized> MailTransport for Arc<T> {
    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        (**self).send(message)
    }

    fn flush_pending_queue(&self) -> Result<(), DeliveryError> {
        (**self).flush_pending_queue()
    }
}

impl<T: MailTransport + ?Sized> MailTransport for Box<T> {
    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        (**self).send(message)
    }

    fn flush_pending_queue(&self) -> Result<(), DeliveryError> {
        (**self).flush_pending_queue()
    }
}

/// Subject line for reports about `project_label`.
pub fn subject_for(project_label: &str) -> String {
    format!("Error at {project_label}")
}

/// Build the plain-text report for a fault.
pub fn build_report(fault: &FaultRecord, request: Option<&RequestSnapshot>) -> String {
    let mut body = format!(
        "Exception: {} ({})\n\n",
        fault.type_name(),
        fault.kind()
    );
    body.push_str(&format!("Error Code: {}\n\n", fault.code().unwrap_or(0)));
    body.push_str(&format!("Message: {}\n\n", fault.message()));

    if let Some(status) = fault.status_code() {
        body.push_str(&format!("Status: {status}\n\n"));
    }

    match request {
        Some(request) => body.push_str(&format!(
            "Happened at: {} for {}\n\n",
            request.uri(),
            request.client_address()
        )),
        None => {
            body.push_str(OUTSIDE_REQUEST_MARKER);
            body.push_str("\n\n");
        }
    }

    match fault.location() {
        Some(location) => body.push_str(&format!(
            "File: {}\nLine: {}\n\n",
            location.file, location.line
        )),
        None => body.push_str("File: unknown\nLine: unknown\n\n"),
    }

    body.push_str(&format!(
        "Occurred at: {}\n\n",
        fault.occurred_at().to_rfc3339()
    ));
    body.push_str(&format!("Trace:\n{}\n\n", fault.trace_as_string()));
    body
}

/// Sends fault reports through a mail transport.
pub struct Notifier {
    transport: Box<dyn MailTransport>,
    policy: NotificationPolicy,
}

impl Notifier {
    /// Create a notifier delivering through `transport` according to `policy`.
    pub fn new(transport: Box<dyn MailTransport>, policy: NotificationPolicy) -> Self {
        Self { transport, policy }
    }

    /// The policy this notifier was built with.
    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    /// Compose the message for a fault without sending it.
    pub fn compose(&self, fault: &FaultRecord, request: Option<&RequestSnapshot>) -> MailMessage {
        MailMessage {
            from: Mailbox {
                address: self.policy.sender.clone(),
                name: REPORTER_NAME.to_owned(),
            },
            to: self.policy.recipients.clone(),
            subject: subject_for(&self.policy.project_label),
            body: build_report(fault, request),
        }
    }

    /// Send a report and force delivery.
    ///
    /// Sends exactly once and flushes exactly once, even when the send
    /// failed. The first error is returned; callers log it and carry on.
    ///
    /// # Errors
    ///
    /// Returns the send error, or the flush error if the send succeeded.
    #[instrument(skip_all, fields(kind = %fault.kind()))]
    pub fn notify(
        &self,
        fault: &FaultRecord,
        request: Option<&RequestSnapshot>,
    ) -> Result<(), DeliveryError> {
        let message = self.compose(fault, request);
        let sent = self.transport.send(&message);
        let flushed = self.transport.flush_pending_queue();
        sent?;
        flushed?;
        debug!(recipients = message.to.len(), "fault notification delivered");
        Ok(())
    }
}
