//! Routing of interface binding requests
//!
//! A binding request is first offered to the parent's own interface table.
//! Only names the parent does not handle cross the channel, so the parent can
//! intercept or override any interface before the child sees it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::delegate::HostDelegate;
use crate::ipc::protocol::{EndpointHandle, ReceiverBindingRequest};

/// Local handler that takes ownership of an endpoint
pub type Binder = Arc<dyn Fn(EndpointHandle) + Send + Sync>;

/// Where a binding request ended up
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// Bound by the parent
    Local,
    /// No local match; the request must be forwarded to the child
    Forward(ReceiverBindingRequest),
}

/// Routes binding requests local-first
pub struct ReceiverRouter;

impl ReceiverRouter {
    pub fn route<D: HostDelegate + ?Sized>(delegate: &D, request: ReceiverBindingRequest) -> Route {
        match delegate.resolve_local_interface(request.interface()) {
            Some(binder) => {
                tracing::debug!(interface = request.interface(), "binding interface locally");
                binder(request.endpoint());
                Route::Local
            }
            None => Route::Forward(request),
        }
    }
}

/// Name-indexed table of local binders
///
/// Delegates can keep one of these and answer
/// [`HostDelegate::resolve_local_interface`] from it.
///
/// ```rust,ignore
/// let registry = InterfaceRegistry::new()
///     .register("metrics", |endpoint| start_metrics(endpoint));
/// ```
#[derive(Default)]
pub struct InterfaceRegistry {
    binders: HashMap<String, Binder>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binder for `interface`, replacing any previous one
    pub fn register<F>(mut self, interface: impl Into<String>, binder: F) -> Self
    where
        F: Fn(EndpointHandle) + Send + Sync + 'static,
    {
        self.binders.insert(interface.into(), Arc::new(binder));
        self
    }

    pub fn resolve(&self, interface: &str) -> Option<Binder> {
        self.binders.get(interface).cloned()
    }

    /// Names of all registered interfaces
    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.binders.keys().map(String::as_str)
    }
}
