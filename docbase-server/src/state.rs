//! Shared state for the HTTP handlers

use std::time::Duration;

use crate::service::{CallContext, Service};

/// The shared app state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The archive and document operations
    pub service: Service,
    /// Deadline applied to every request, if set
    pub request_timeout: Option<Duration>,
}

impl AppState {
    /// The context for a call made on behalf of one request.
    pub fn call_context(&self) -> CallContext {
        match self.request_timeout {
            Some(timeout) => CallContext::with_timeout(timeout),
            None => CallContext::new(),
        }
    }
}
