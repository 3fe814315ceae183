//! Request context for fault handling.
//!
//! The host enters a [`RequestScope`] for every request it handles. While the
//! scope is alive, the panic hook knows which request a panic belongs to and
//! leaves the rendered error page in the scope for the host to send once it
//! has caught the unwind.

use std::cell::RefCell;
use std::marker::PhantomData;

use serde::Serialize;

use crate::render::Response;

/// Read-only view of the request that was active when a fault occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSnapshot {
    uri: String,
    client_address: String,
}

impl RequestSnapshot {
    /// Snapshot a request URI and the client address it came from.
    pub fn new(uri: impl Into<String>, client_address: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            client_address: client_address.into(),
        }
    }

    /// Request URI, including the query string.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Client IP address.
    pub fn client_address(&self) -> &str {
        &self.client_address
    }
}

struct ScopeState {
    snapshot: RequestSnapshot,
    response: Option<Response>,
}

thread_local! {
    static ACTIVE: RefCell<Option<ScopeState>> = const { RefCell::new(None) };
}

/// Marks the current thread as handling a request.
///
/// Scopes nest: dropping an inner scope restores the outer one. The guard is
/// tied to the thread that created it.
#[must_use = "the request scope ends when the guard is dropped"]
pub struct RequestScope {
    previous: Option<ScopeState>,
    _thread_bound: PhantomData<*const ()>,
}

impl RequestScope {
    /// Enter a request scope on the current thread.
    pub fn enter(snapshot: RequestSnapshot) -> Self {
        let state = ScopeState {
            snapshot,
            response: None,
        };
        let previous = ACTIVE.with(|active| active.borrow_mut().replace(state));
        Self {
            previous,
            _thread_bound: PhantomData,
        }
    }

    /// Take the error page left behind by the panic hook, if any.
    pub fn take_response(&self) -> Option<Response> {
        ACTIVE.with(|active| {
            active
                .try_borrow_mut()
                .ok()
                .and_then(|mut state| state.as_mut().and_then(|s| s.response.take()))
        })
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|active| {
            if let Ok(mut state) = active.try_borrow_mut() {
                *state = previous;
            }
        });
    }
}

/// The request active on the current thread, if any.
pub fn current_request() -> Option<RequestSnapshot> {
    ACTIVE.with(|active| {
        active
            .try_borrow()
            .ok()
            .and_then(|state| state.as_ref().map(|s| s.snapshot.clone()))
    })
}

/// Leave a response in the current scope. Returns `false` when no scope is
/// active on this thread.
pub(crate) fn store_response(response: Response) -> bool {
    ACTIVE.with(|active| match active.try_borrow_mut() {
        Ok(mut state) => match state.as_mut() {
            Some(scope) => {
                scope.response = Some(response);
                true
            }
            None => false,
        },
        Err(_) => false,
    })
}
