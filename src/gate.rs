//! Notification gating.
//!
//! Decides whether a fault is worth an email. Client errors are usually
//! noise, so by default every 4xx status is suppressed. Faults without a
//! status (raised outside a request) are always reported.

use std::collections::BTreeSet;

/// Who gets notified, from whom, and which statuses stay quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// HTTP statuses for which no notification is sent.
    pub suppressed_status_codes: BTreeSet<u16>,
    /// Envelope sender address.
    pub sender: String,
    /// Recipient addresses, in order.
    pub recipients: Vec<String>,
    /// Project name used in the subject line.
    pub project_label: String,
}

impl NotificationPolicy {
    /// The 400–499 range, suppressed by default.
    pub fn client_error_range() -> BTreeSet<u16> {
        (400..=499).collect()
    }
}

/// `false` iff `status` is present and suppressed by `policy`.
pub fn should_notify(status: Option<u16>, policy: &NotificationPolicy) -> bool {
    match status {
        Some(code) => !policy.suppressed_status_codes.contains(&code),
        None => true,
    }
}
