use std::path::{Path, PathBuf};

use crate::host::ChannelMode;
use crate::ipc::DEFAULT_MAX_FRAME_LEN;

/// Configuration for a [`ChildProcessHost`](crate::ChildProcessHost)
#[derive(Debug, Clone)]
pub struct HostConfig {
    mode: ChannelMode,
    max_frame_len: usize,
    child_path: Option<PathBuf>,
    io_thread_prefix: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new(ChannelMode::Structured)
    }
}

impl HostConfig {
    /// Default configuration for the given channel mode
    pub fn new(mode: ChannelMode) -> Self {
        Self {
            mode,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            child_path: None,
            io_thread_prefix: "tether-io".to_string(),
        }
    }

    /// Create a new builder for HostConfig
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Executable override used by the default child path resolver
    pub fn child_path(&self) -> Option<&Path> {
        self.child_path.as_deref()
    }

    pub fn io_thread_prefix(&self) -> &str {
        &self.io_thread_prefix
    }
}

/// Builder for HostConfig
#[derive(Debug, Default)]
pub struct HostConfigBuilder {
    inner: HostConfig,
}

impl HostConfigBuilder {
    pub fn mode(mut self, mode: ChannelMode) -> Self {
        self.inner.mode = mode;
        self
    }

    /// Largest frame body in either direction
    ///
    /// Inbound frames above it close the channel; outbound ones are refused
    /// with [`HostError::FrameTooLarge`](crate::HostError::FrameTooLarge).
    /// Children must read with the same limit.
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.inner.max_frame_len = len;
        self
    }

    /// Launch this executable instead of the current one
    ///
    /// Bare names are looked up on `PATH`.
    pub fn child_path(mut self, path: impl AsRef<Path>) -> Self {
        self.inner.child_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Name prefix for the per-host IO thread
    pub fn io_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inner.io_thread_prefix = prefix.into();
        self
    }

    pub fn build(self) -> HostConfig {
        self.inner
    }
}
