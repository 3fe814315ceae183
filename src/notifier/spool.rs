//! Deferred delivery spool.
//!
//! Queues messages in memory and hands them to the inner transport only when
//! [`MailTransport::flush_pending_queue`] is called. Hosts normally flush at
//! the end of each request; the notifier flushes immediately after sending.
//!
//! The queue is bounded: once it holds `max_pending` messages the oldest are
//! dropped, so a relay that stays down cannot grow it without limit.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{DeliveryError, MailMessage, MailTransport};

/// Default bound on queued messages.
pub const DEFAULT_MAX_PENDING: usize = 100;

/// In-memory queue in front of another transport.
pub struct SpoolTransport<T> {
    inner: T,
    max_pending: usize,
    queue: Mutex<VecDeque<MailMessage>>,
}

impl<T: MailTransport> SpoolTransport<T> {
    /// Spool messages destined for `inner`, keeping at most
    /// [`DEFAULT_MAX_PENDING`] of them.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_pending: DEFAULT_MAX_PENDING,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Keep at most `max_pending` queued messages (at least one).
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Bound on queued messages.
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Number of messages waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// The transport messages are flushed into.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    // A panic while holding the lock must not stop fault reports.
    fn lock(&self) -> MutexGuard<'_, VecDeque<MailMessage>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn trim(&self, queue: &mut VecDeque<MailMessage>) {
        let excess = queue.len().saturating_sub(self.max_pending);
        if excess > 0 {
            queue.drain(..excess);
            warn!(
                dropped = excess,
                max_pending = self.max_pending,
                "spool full, dropped oldest messages"
            );
        }
    }
}

impl<T: MailTransport> MailTransport for SpoolTransport<T> {
    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        let mut queue = self.lock();
        queue.push_back(message.clone());
        self.trim(&mut queue);
        Ok(())
    }

    fn flush_pending_queue(&self) -> Result<(), DeliveryError> {
        let batch = std::mem::take(&mut *self.lock());
        let total = batch.len();

        let mut unsent = VecDeque::new();
        let mut first_error = None;
        for message in batch {
            if let Err(e) = self.inner.send(&message) {
                warn!(error = %e, subject = %message.subject, "spool delivery failed, requeueing");
                unsent.push_back(message);
                first_error.get_or_insert(e);
            }
        }

        if !unsent.is_empty() {
            let mut queue = self.lock();
            // Unsent messages stay ahead of anything queued meanwhile.
            unsent.append(&mut queue);
            self.trim(&mut unsent);
            *queue = unsent;
        }

        if total > 0 {
            debug!(count = total, failed = self.pending(), "spool flushed");
        }
        let flushed = self.inner.flush_pending_queue();
        match first_error {
            Some(e) => Err(e),
            None => flushed,
        }
    }
}
