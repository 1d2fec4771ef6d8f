//! Host delegate that reports child activity on the terminal

use std::sync::atomic::{AtomicU32, Ordering};

use tether::{
    Binder, EndpointHandle, HostDelegate, HostError, InterfaceRegistry, Message, PendingRequest,
    ReceiverBindingRequest,
};

/// Interface the CLI binds locally instead of forwarding to the child
pub const LOG_INTERFACE: &str = "tether.Log";

pub struct CliDelegate {
    interfaces: InterfaceRegistry,
    pid: AtomicU32,
}

impl CliDelegate {
    pub fn new() -> Self {
        let interfaces = InterfaceRegistry::new().register(LOG_INTERFACE, |endpoint: EndpointHandle| {
            tracing::info!(endpoint = endpoint.as_raw(), "bound {LOG_INTERFACE} in parent");
        });
        Self {
            interfaces,
            pid: AtomicU32::new(0),
        }
    }

    /// Pid reported by the child's handshake, if it connected
    pub fn connected_pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }
}

impl Default for CliDelegate {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDelegate for CliDelegate {
    fn on_channel_opened(&self, pid: u32) {
        self.pid.store(pid, Ordering::Release);
        tracing::info!(pid, "child connected");
    }

    fn on_channel_closed(&self) {
        tracing::info!("channel closed");
    }

    fn on_channel_error(&self, error: &HostError) {
        tracing::error!(error = %error, "channel error");
    }

    fn on_message_received(&self, message: &Message) -> bool {
        println!("{}: {}", message.name(), render_payload(message));
        true
    }

    fn resolve_local_interface(&self, name: &str) -> Option<Binder> {
        self.interfaces.resolve(name)
    }

    fn bind_host_receiver(&self, request: ReceiverBindingRequest) {
        match self.interfaces.resolve(request.interface()) {
            Some(binder) => binder(request.endpoint()),
            None => tracing::warn!(interface = request.interface(), "child asked for unknown interface"),
        }
    }

    fn on_requests_dropped(&self, dropped: Vec<PendingRequest>) {
        tracing::warn!(count = dropped.len(), "requests dropped before the child connected");
    }
}

/// Render a MessagePack payload as JSON, falling back to a byte count
fn render_payload(message: &Message) -> String {
    match rmp_serde::from_slice::<serde_json::Value>(message.payload()) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| value.to_string()),
        Err(_) => format!("<{} bytes>", message.payload().len()),
    }
}
