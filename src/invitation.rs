//! Transferable description of the child's end of the channel
//!
//! A host creates a socket pair when it is constructed. It keeps one end and
//! wraps the other in a [`TransportInvitation`]. Handing the invitation to a
//! launcher is a move: the host can never observe or close that end again.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::Command;

use crate::error::{HostError, Result};
use crate::id::HostId;

/// Environment variable carrying the inherited channel descriptor
pub const CHANNEL_FD_ENV: &str = "TETHER_CHANNEL_FD";

/// Environment variable carrying the handshake token
pub const CHANNEL_TOKEN_ENV: &str = "TETHER_CHANNEL_TOKEN";

/// The child's end of a primordial channel
#[derive(Debug)]
pub struct ChildEndpoint {
    stream: UnixStream,
}

impl ChildEndpoint {
    pub(crate) fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Reclaim an endpoint inherited through [`CHANNEL_FD_ENV`]
    ///
    /// Meant to be called once, early, in the child process.
    pub fn from_env() -> Result<Self> {
        let fd: RawFd = std::env::var(CHANNEL_FD_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .filter(|fd| *fd >= 0)
            .ok_or(HostError::MissingEnv(CHANNEL_FD_ENV))?;

        // SAFETY: the parent exported this descriptor for us alone and nothing
        // else in this process has wrapped it.
        let stream = unsafe { UnixStream::from_raw_fd(fd) };
        Ok(Self { stream })
    }

    pub fn into_stream(self) -> UnixStream {
        self.stream
    }

    /// Make the endpoint available to the program `command` will run
    ///
    /// The returned guard keeps the parent's copy open; drop it once the
    /// child has been spawned.
    pub fn prepare_command(self, command: &mut Command) -> InheritedEndpoint {
        let fd = self.stream.as_raw_fd();
        command.env(CHANNEL_FD_ENV, fd.to_string());
        // SAFETY: the hook only calls fcntl, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || clear_cloexec(fd));
        }
        InheritedEndpoint {
            _stream: self.stream,
        }
    }
}

/// Parent-side copy of an endpoint handed to a child being spawned
#[derive(Debug)]
pub struct InheritedEndpoint {
    _stream: UnixStream,
}

fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl calls on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Everything a launcher needs to splice a new process into a host's channel
///
/// Not `Clone`: there is exactly one invitation per host and whoever holds it
/// is the only party allowed to act on it. Dropping an unused invitation
/// closes the endpoint it describes.
#[derive(Debug)]
pub struct TransportInvitation {
    host_id: HostId,
    token: String,
    endpoint: ChildEndpoint,
}

impl TransportInvitation {
    pub(crate) fn new(host_id: HostId, token: String, endpoint: ChildEndpoint) -> Self {
        Self {
            host_id,
            token,
            endpoint,
        }
    }

    /// Id of the host that issued this invitation
    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    /// Token the child must present in its handshake
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn endpoint(&self) -> &ChildEndpoint {
        &self.endpoint
    }

    /// Split into the raw endpoint and the handshake token
    pub fn into_parts(self) -> (ChildEndpoint, String) {
        (self.endpoint, self.token)
    }

    /// Export the endpoint and token to the program `command` will run
    pub fn prepare_command(self, command: &mut Command) -> InheritedEndpoint {
        command.env(CHANNEL_TOKEN_ENV, &self.token);
        tracing::debug!(host_id = %self.host_id, "invitation handed to launcher");
        self.endpoint.prepare_command(command)
    }
}
