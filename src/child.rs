//! Child-process side of the primordial channel
//!
//! A launched child reclaims its endpoint with [`ChildChannel::from_env`],
//! which performs the handshake that moves the parent's host to `Open`.
//! All I/O here is blocking; children typically dedicate a thread to it.

use std::os::unix::net::UnixStream;

use crate::error::Result;
use crate::invitation::{CHANNEL_TOKEN_ENV, ChildEndpoint};
use crate::ipc::{DEFAULT_MAX_FRAME_LEN, Frame, Message, ReceiverBindingRequest, read_frame, write_frame};

/// Connected child end of a host's channel
#[derive(Debug)]
pub struct ChildChannel {
    stream: UnixStream,
    max_frame_len: usize,
}

impl ChildChannel {
    /// Connect using the endpoint and token exported by the launcher
    pub fn from_env() -> Result<Self> {
        let endpoint = ChildEndpoint::from_env()?;
        // Legacy hosts hand out no token
        let token = std::env::var(CHANNEL_TOKEN_ENV).unwrap_or_default();
        Self::connect(endpoint, &token)
    }

    /// Perform the handshake over `endpoint`
    pub fn connect(endpoint: ChildEndpoint, token: &str) -> Result<Self> {
        let mut channel = Self {
            stream: endpoint.into_stream(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        };
        channel.send(&Frame::Hello {
            pid: std::process::id(),
            token: token.to_string(),
        })?;
        tracing::debug!("handshake sent to parent");
        Ok(channel)
    }

    /// Limit for frames read from the parent
    ///
    /// Must match the host's `max_frame_len`. The host refuses to send
    /// anything larger, and rejects anything larger from the child.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Wait for the next frame from the parent
    ///
    /// Returns `Ok(None)` once the parent hangs up.
    pub fn recv(&mut self) -> Result<Option<Frame>> {
        read_frame(&mut self.stream, self.max_frame_len)
    }

    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.stream, frame)
    }

    pub fn send_message(&mut self, message: Message) -> Result<()> {
        self.send(&Frame::Message(message))
    }

    /// Ask the parent to bind one of its interfaces for us
    pub fn bind_host_receiver(&mut self, request: ReceiverBindingRequest) -> Result<()> {
        self.send(&Frame::BindReceiver(request))
    }

    /// Tell the parent we are exiting
    pub fn shutdown(mut self) -> Result<()> {
        self.send(&Frame::Shutdown)
    }
}
