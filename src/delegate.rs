//! Policy callbacks supplied by the embedder

use crate::error::HostError;
use crate::ipc::{Binder, EndpointHandle, Message, ReceiverBindingRequest};

/// Outbound work that was waiting for the channel to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    BindReceiver(ReceiverBindingRequest),
    RunService {
        service: String,
        receiver: EndpointHandle,
    },
    Message(Message),
}

/// Process-type specific policy for a [`ChildProcessHost`](crate::ChildProcessHost)
///
/// The host supplies the mechanism; the delegate decides what the child is
/// allowed to bind and hears about every lifecycle change. The delegate must
/// outlive the host. Callbacks run on the host's dispatch context.
pub trait HostDelegate: Send + Sync {
    /// The child completed its handshake
    fn on_channel_opened(&self, _pid: u32) {}

    /// The channel reached its terminal state
    fn on_channel_closed(&self) {}

    /// A transport or handshake failure is about to close the channel
    fn on_channel_error(&self, _error: &HostError) {}

    /// Default dispatch for messages no filter consumed
    ///
    /// Returns whether the message was handled.
    fn on_message_received(&self, _message: &Message) -> bool {
        false
    }

    /// Local interface table consulted before forwarding to the child
    fn resolve_local_interface(&self, _name: &str) -> Option<Binder> {
        None
    }

    /// The child asked the parent to bind one of its interfaces
    fn bind_host_receiver(&self, request: ReceiverBindingRequest) {
        tracing::debug!(interface = request.interface(), "dropping unhandled host receiver");
    }

    /// Requests queued before the channel opened were dropped by a close
    fn on_requests_dropped(&self, _dropped: Vec<PendingRequest>) {}
}
