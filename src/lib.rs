//! Tether - parent-side host for spawned child processes
//!
//! A [`ChildProcessHost`] represents one child process from the parent's
//! side and owns the single primordial channel used to bootstrap everything
//! else with it:
//!
//! - The host creates the channel at construction and hands the child's end
//!   out exactly once, as a [`TransportInvitation`] given to a [`Launcher`].
//! - Inbound messages pass through an ordered chain of [`MessageFilter`]s
//!   before default dispatch to the [`HostDelegate`].
//! - Interface binding requests are resolved locally first and forwarded to
//!   the child otherwise; service requests made before the child connects
//!   are queued and delivered in order.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether::{ChannelMode, ChildProcessHost, EndpointHandle, HostDelegate};
//! use tether::{LaunchParams, Launcher, ProcessLauncher};
//!
//! struct Worker;
//!
//! impl HostDelegate for Worker {
//!     fn on_channel_opened(&self, pid: u32) {
//!         println!("worker {pid} connected");
//!     }
//! }
//!
//! async fn run() -> tether::Result<()> {
//!     let mut host = ChildProcessHost::new(Arc::new(Worker), ChannelMode::Structured)?;
//!     let invitation = host.take_invitation().expect("fresh host");
//!     let mut child = ProcessLauncher::new()
//!         .launch(invitation, LaunchParams::new("tether-child"))?;
//!
//!     host.create_channel()?;
//!     host.run_service("echo", EndpointHandle::new())?;
//!     while host.pump().await {}
//!
//!     child.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod child;
mod child_path;
mod config;
mod delegate;
mod error;
mod host;
mod id;
mod invitation;
pub mod ipc;
mod launcher;

// Re-export public types
pub use child::ChildChannel;
pub use child_path::{ChildPathFlags, ChildPathResolver, DefaultChildPathResolver};
pub use config::{HostConfig, HostConfigBuilder};
pub use delegate::{HostDelegate, PendingRequest};
pub use error::{HostError, Result};
pub use host::{ChannelMode, ChannelState, ChildProcessHost};
pub use id::{HostId, INVALID_HOST_ID, UniqueIdAllocator};
pub use invitation::{
    CHANNEL_FD_ENV, CHANNEL_TOKEN_ENV, ChildEndpoint, InheritedEndpoint, TransportInvitation,
};
pub use ipc::{
    Binder, EndpointHandle, FilterVerdict, InterfaceRegistry, Message, MessageFilter,
    ReceiverBindingRequest,
};
pub use launcher::{ChildProcess, LaunchParams, Launcher, ProcessLauncher};
/// Re-export rmp_serde for typed message payloads.
pub use rmp_serde;
