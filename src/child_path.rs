//! Locating the executable to launch as a child

use std::path::{Path, PathBuf};

use crate::config::HostConfig;
use crate::error::{HostError, Result};

/// Variants of child executable a launcher may ask for
///
/// Only `AllowSelf` changes the resolved path. The others select
/// platform-specific launch entitlements and are passed through to the
/// launcher unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildPathFlags {
    #[default]
    Normal,
    /// Exec through `/proc/self/exe` so an in-place update of the binary
    /// cannot swap the child out from under us (Linux)
    AllowSelf,
    /// Child needs writable-and-executable memory
    Renderer,
    /// Child needs unsigned executable memory
    Gpu,
    /// Child loads third-party plugins
    Plugin,
    /// Run the child under x86_64 translation
    LaunchX86_64,
}

/// Resolves the executable to launch for a given flag set
pub trait ChildPathResolver {
    /// `None` when no usable executable exists
    fn resolve(&self, flags: ChildPathFlags) -> Option<PathBuf>;

    /// Like [`resolve`](Self::resolve), but a missing executable is an error
    fn require(&self, flags: ChildPathFlags) -> Result<PathBuf> {
        self.resolve(flags).ok_or(HostError::ChildPathNotFound)
    }
}

/// Resolver using an optional override, falling back to the current executable
#[derive(Debug, Clone, Default)]
pub struct DefaultChildPathResolver {
    override_path: Option<PathBuf>,
}

impl DefaultChildPathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always launch `path` instead of the current executable
    ///
    /// A bare program name is looked up on `PATH`.
    pub fn with_override(path: impl AsRef<Path>) -> Self {
        Self {
            override_path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Honour the child path configured for a host, if any
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            override_path: config.child_path().map(Path::to_path_buf),
        }
    }
}

impl ChildPathResolver for DefaultChildPathResolver {
    fn resolve(&self, flags: ChildPathFlags) -> Option<PathBuf> {
        if let Some(path) = &self.override_path {
            return resolve_override(path);
        }

        if flags == ChildPathFlags::AllowSelf && cfg!(target_os = "linux") {
            return Some(PathBuf::from("/proc/self/exe"));
        }

        match std::env::current_exe() {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "unable to determine current executable");
                None
            }
        }
    }
}

fn resolve_override(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }

    match which::which(path) {
        Ok(found) => Some(found),
        Err(e) => {
            tracing::debug!(program = %path.display(), error = %e, "child executable not on PATH");
            None
        }
    }
}
