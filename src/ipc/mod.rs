//! The primordial channel between a host and its child
//!
//! Frames travel over a Unix socket pair created by the host. Inside the
//! parent, a per-host IO thread moves them onto a [`Link`] that the host
//! drains on its own dispatch context.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::ipc::{FilterVerdict, Message, MessageFilter};
//!
//! struct DropPings;
//!
//! impl MessageFilter for DropPings {
//!     fn on_message_received(&self, message: &Message) -> FilterVerdict {
//!         if message.name() == "ping" {
//!             FilterVerdict::Consumed
//!         } else {
//!             FilterVerdict::PassThrough
//!         }
//!     }
//! }
//! ```

mod filter;
mod link;
mod protocol;
mod router;
pub(crate) mod transport;

pub use filter::{FilterChain, FilterVerdict, MessageFilter};
pub use link::{Disconnected, Link};
pub use protocol::{
    DEFAULT_MAX_FRAME_LEN, EndpointHandle, Frame, Message, ReceiverBindingRequest, read_frame,
    write_frame,
};
pub use router::{Binder, InterfaceRegistry, ReceiverRouter, Route};

#[cfg(test)]
pub(crate) use filter::tests::RecordingFilter;
