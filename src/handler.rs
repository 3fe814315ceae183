//! In-pipeline fault handling.
//!
//! [`FaultHandler`] is what the host calls from its error callback with the
//! error and the status it chose. It is assembled once at startup, from
//! [`FaultlineConfig`] or by hand, and also hands out the
//! [`ErrorCaptureAdapter`] for faults outside the pipeline so both paths
//! share one notifier and one renderer.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::capture::{ErrorCaptureAdapter, FaultCallback};
use crate::config::{FaultlineConfig, MailerConfig};
use crate::fault::{classify, FaultRecord, RawFault, Severity};
use crate::gate::should_notify;
use crate::notifier::{
    HttpMailTransport, MailTransport, Notifier, PickupDirTransport, SpoolTransport,
};
use crate::render::{BuiltinViews, DirectoryViews, Response, ResponseRenderer, ViewRenderer};
use crate::request::RequestSnapshot;

/// Classifies, reports and renders faults raised while handling requests.
pub struct FaultHandler {
    debug: bool,
    promote_from: Severity,
    notifier: Option<Arc<Notifier>>,
    renderer: Arc<ResponseRenderer>,
}

impl FaultHandler {
    /// Assemble a handler from its parts. Without a notifier no emails are
    /// sent.
    pub fn new(debug: bool, notifier: Option<Notifier>, renderer: ResponseRenderer) -> Self {
        Self {
            debug,
            promote_from: Severity::Deprecated,
            notifier: notifier.map(Arc::new),
            renderer: Arc::new(renderer),
        }
    }

    /// Assemble a handler from configuration.
    ///
    /// Debug mode never builds a notifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured mail transport cannot be built.
    pub fn from_config(config: &FaultlineConfig) -> anyhow::Result<Self> {
        let view_renderer: Box<dyn ViewRenderer> = match &config.views_dir {
            Some(dir) => Box::new(DirectoryViews::new(dir)),
            None => Box::new(BuiltinViews::new(&config.project_name)),
        };
        let renderer = ResponseRenderer::new(config.view_mapping(), view_renderer);

        let notifier = match (&config.email_notifications, config.notification_policy()) {
            (Some(email), Some(policy)) if !config.debug => {
                let spool = email.spool.then_some(email.spool_max_pending);
                let transport = build_transport(&email.mailer, spool)
                    .context("failed to build mail transport")?;
                info!(
                    recipients = policy.recipients.len(),
                    spool = email.spool,
                    "email notifications enabled"
                );
                Some(Notifier::new(transport, policy))
            }
            _ => None,
        };

        Ok(Self::new(config.debug, notifier, renderer)
            .promote_from(config.promote_runtime_faults))
    }

    /// Lowest runtime fault severity the capture adapter promotes.
    pub fn promote_from(mut self, severity: Severity) -> Self {
        self.promote_from = severity;
        self
    }

    /// Whether the handler defers to the host's diagnostics.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// The notifier, when email notifications are enabled.
    pub fn notifier(&self) -> Option<&Notifier> {
        self.notifier.as_deref()
    }

    /// The error page renderer.
    pub fn renderer(&self) -> &ResponseRenderer {
        &self.renderer
    }

    /// Handle an error raised while serving a request.
    ///
    /// Returns `None` in debug mode, leaving the response to the host.
    pub fn handle(
        &self,
        error: &(dyn StdError + 'static),
        status: u16,
        request: Option<&RequestSnapshot>,
    ) -> Option<Response> {
        self.handle_raw(RawFault::error(error).with_status(status), request)
    }

    /// Handle an already-built raw fault. The status for the page comes from
    /// the fault, defaulting to 500.
    pub fn handle_raw(
        &self,
        raw: RawFault<'_>,
        request: Option<&RequestSnapshot>,
    ) -> Option<Response> {
        if self.debug {
            return None;
        }
        let record = classify(raw);
        self.notify_if_allowed(&record, request);
        Some(self.renderer.render(record.status_code().unwrap_or(500)))
    }

    /// Build the capture adapter for faults outside the pipeline.
    ///
    /// Its callback notifies for every captured fault: anything that
    /// escapes the pipeline is always reported.
    pub fn capture_adapter(&self) -> ErrorCaptureAdapter {
        let notifier = self.notifier.clone();
        let on_fault: FaultCallback = Box::new(
            move |record: &FaultRecord, request: Option<&RequestSnapshot>| {
                if let Some(notifier) = &notifier {
                    if let Err(e) = notifier.notify(record, request) {
                        warn!(error = %e, "failed to send fault notification");
                    }
                }
            },
        );
        ErrorCaptureAdapter::new(self.debug, on_fault, Arc::clone(&self.renderer))
            .promote_from(self.promote_from)
    }

    fn notify_if_allowed(&self, record: &FaultRecord, request: Option<&RequestSnapshot>) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if !should_notify(record.status_code(), notifier.policy()) {
            debug!(status = ?record.status_code(), "notification suppressed for status");
            return;
        }
        if let Err(e) = notifier.notify(record, request) {
            warn!(error = %e, "failed to send fault notification");
        }
    }
}

fn build_transport(
    mailer: &MailerConfig,
    spool_max_pending: Option<usize>,
) -> anyhow::Result<Box<dyn MailTransport>> {
    let transport: Box<dyn MailTransport> = match mailer {
        MailerConfig::Http {
            endpoint,
            token_env,
            timeout_secs,
        } => {
            let token = token_env.as_deref().and_then(|name| {
                let token = std::env::var(name).ok();
                if token.is_none() {
                    warn!(env = name, "mail API token variable is not set");
                }
                token
            });
            Box::new(HttpMailTransport::new(
                endpoint.as_str(),
                token,
                Duration::from_secs(*timeout_secs),
            )?)
        }
        MailerConfig::PickupDir { dir } => Box::new(PickupDirTransport::new(dir)),
    };

    if let Some(max_pending) = spool_max_pending {
        Ok(Box::new(
            SpoolTransport::new(transport).with_max_pending(max_pending),
        ))
    } else {
        Ok(transport)
    }
}
