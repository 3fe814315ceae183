//! Test doubles shared across integration test binaries.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use faultline::gate::NotificationPolicy;
use faultline::notifier::{DeliveryError, MailMessage, MailTransport};
use faultline::render::{RenderError, ResponseRenderer, ViewMapping, ViewRenderer};

/// Records every message and flush; can be told to fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<MailMessage>>,
    sends: AtomicUsize,
    flushes: AtomicUsize,
    failing_sends: AtomicUsize,
    fail_flush: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `count` sends fail.
    pub fn failing_sends(count: usize) -> Arc<Self> {
        let transport = Self::default();
        transport.failing_sends.store(count, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Every flush fails.
    pub fn failing_flush() -> Arc<Self> {
        let transport = Self::default();
        transport.fail_flush.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl MailTransport for RecordingTransport {
    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DeliveryError::Rejected {
                status: 503,
                body: "mail relay down".to_owned(),
            });
        }
        self.sent.lock().expect("lock").push(message.clone());
        Ok(())
    }

    fn flush_pending_queue(&self) -> Result<(), DeliveryError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected {
                status: 500,
                body: "flush failed".to_owned(),
            });
        }
        Ok(())
    }
}

/// Renders any template as `rendered <id>`.
pub struct EchoViews;

impl ViewRenderer for EchoViews {
    fn render(&self, template_id: &str) -> Result<String, RenderError> {
        Ok(format!("rendered {template_id}"))
    }
}

/// Fails to render anything.
pub struct BrokenViews;

impl ViewRenderer for BrokenViews {
    fn render(&self, _template_id: &str) -> Result<String, RenderError> {
        Err(RenderError::Engine("template engine exploded".to_owned()))
    }
}

pub fn policy(suppressed: BTreeSet<u16>) -> NotificationPolicy {
    NotificationPolicy {
        suppressed_status_codes: suppressed,
        sender: "errors@shop.example".to_owned(),
        recipients: vec![
            "ops@shop.example".to_owned(),
            "dev@shop.example".to_owned(),
        ],
        project_label: "Shop".to_owned(),
    }
}

pub fn client_error_policy() -> NotificationPolicy {
    policy(NotificationPolicy::client_error_range())
}

pub fn echo_renderer() -> ResponseRenderer {
    ResponseRenderer::new(ViewMapping::default(), Box::new(EchoViews))
}

pub fn broken_renderer() -> ResponseRenderer {
    ResponseRenderer::new(ViewMapping::default(), Box::new(BrokenViews))
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct AppError(pub String);

#[derive(Debug, thiserror::Error)]
#[error("order lookup failed")]
pub struct OrderError {
    #[source]
    pub source: std::io::Error,
}
