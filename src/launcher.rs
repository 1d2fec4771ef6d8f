//! Launching a child into a host's channel
//!
//! The host only produces a [`TransportInvitation`]; a [`Launcher`] turns it
//! into a running process. [`ProcessLauncher`] is a plain `std::process`
//! implementation without sandboxing.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use blocking::unblock;

use crate::child_path::ChildPathFlags;
use crate::error::{HostError, Result};
use crate::invitation::TransportInvitation;

/// Parameters for launching a child process
#[derive(Debug, Clone)]
pub struct LaunchParams {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    flags: ChildPathFlags,
}

impl LaunchParams {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            flags: ChildPathFlags::Normal,
        }
    }

    /// Add a single argument
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl AsRef<str>, val: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), val.as_ref().to_string()));
        self
    }

    /// Set the working directory
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Flags the program path was resolved with
    pub fn flags(mut self, flags: ChildPathFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_flags(&self) -> ChildPathFlags {
        self.flags
    }
}

/// Spawns a process wired into the channel described by an invitation
pub trait Launcher {
    fn launch(&self, invitation: TransportInvitation, params: LaunchParams) -> Result<ChildProcess>;
}

/// Launcher backed by `std::process::Command`
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    capture_output: bool,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipe the child's stdout and stderr instead of inheriting them
    pub fn capture_output(mut self, enabled: bool) -> Self {
        self.capture_output = enabled;
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, invitation: TransportInvitation, params: LaunchParams) -> Result<ChildProcess> {
        let host_id = invitation.host_id();
        let mut command = std::process::Command::new(&params.program);
        command
            .args(&params.args)
            .envs(params.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());
        if let Some(dir) = &params.current_dir {
            command.current_dir(dir);
        }
        if self.capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let inherited = invitation.prepare_command(&mut command);
        let child = command.spawn().map_err(|e| {
            HostError::LaunchFailed(format!("{}: {e}", params.program.display()))
        })?;
        // The child holds its own copy now
        drop(inherited);

        tracing::info!(
            host_id = %host_id,
            pid = child.id(),
            program = %params.program.display(),
            flags = ?params.flags,
            "launched child process"
        );
        Ok(ChildProcess::new(child))
    }
}

/// A launched child process
pub struct ChildProcess {
    inner: Option<std::process::Child>,
    pid: u32,
}

impl ChildProcess {
    pub(crate) fn new(inner: std::process::Child) -> Self {
        let pid = inner.id();
        Self {
            inner: Some(inner),
            pid,
        }
    }

    /// Get the process ID
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Take ownership of the child's stdout, if it was captured
    pub fn take_stdout(&mut self) -> Option<std::process::ChildStdout> {
        self.inner.as_mut().and_then(|child| child.stdout.take())
    }

    /// Take ownership of the child's stderr, if it was captured
    pub fn take_stderr(&mut self) -> Option<std::process::ChildStderr> {
        self.inner.as_mut().and_then(|child| child.stderr.take())
    }

    /// Wait for the child to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let mut inner = self.take_inner()?;
        let (inner, status) = unblock(move || {
            let status = inner.wait();
            (inner, status)
        })
        .await;
        self.inner = Some(inner);
        Ok(status?)
    }

    /// Attempt to kill the child process
    pub fn kill(&mut self) -> Result<()> {
        let inner = self.inner_mut()?;
        Ok(inner.kill()?)
    }

    /// Check if the child has exited without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let inner = self.inner_mut()?;
        Ok(inner.try_wait()?)
    }

    fn take_inner(&mut self) -> Result<std::process::Child> {
        self.inner
            .take()
            .ok_or_else(|| HostError::LaunchFailed("child process no longer available".to_string()))
    }

    fn inner_mut(&mut self) -> Result<&mut std::process::Child> {
        self.inner
            .as_mut()
            .ok_or_else(|| HostError::LaunchFailed("child process no longer available".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ChannelMode, ChannelState, ChildProcessHost};
    use crate::delegate::HostDelegate;
    use crate::ipc::{DEFAULT_MAX_FRAME_LEN, Frame, read_frame};
    use std::io::Read;
    use std::sync::Arc;

    struct Quiet;

    impl HostDelegate for Quiet {}

    #[test]
    fn test_params_builder() {
        let params = LaunchParams::new("/bin/worker")
            .arg("--type=gpu")
            .args(["-v", "-q"])
            .env("A", "1")
            .flags(ChildPathFlags::Gpu);

        assert_eq!(params.program(), Path::new("/bin/worker"));
        assert_eq!(params.get_args(), ["--type=gpu", "-v", "-q"]);
        assert_eq!(params.get_flags(), ChildPathFlags::Gpu);
    }

    #[tokio::test]
    async fn test_launched_child_receives_endpoint_and_token() {
        let mut host = ChildProcessHost::new(Arc::new(Quiet), ChannelMode::Structured).unwrap();
        let invitation = host.take_invitation().unwrap();
        let token = invitation.token().to_string();

        let params = LaunchParams::new("sh")
            .arg("-c")
            .arg("printf %s \"$TETHER_CHANNEL_TOKEN\"");
        let mut child = ProcessLauncher::new()
            .capture_output(true)
            .launch(invitation, params)
            .unwrap();

        let status = child.wait().await.unwrap();
        assert!(status.success());
        let mut out = String::new();
        child.take_stdout().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, token);

        // Exited without a handshake
        host.create_channel().unwrap();
        host.handle_process_exit();
        assert_eq!(host.state(), ChannelState::Closed);
    }

    #[test]
    fn test_missing_program_fails_launch() {
        let mut host = ChildProcessHost::new(Arc::new(Quiet), ChannelMode::Structured).unwrap();
        let invitation = host.take_invitation().unwrap();
        let result = ProcessLauncher::new().launch(
            invitation,
            LaunchParams::new("/nonexistent/tether-worker"),
        );
        assert!(matches!(result, Err(HostError::LaunchFailed(_))));
    }

    #[test]
    fn test_failed_launch_releases_endpoint() {
        use std::os::unix::net::UnixStream;

        let (mut parent, child_end) = UnixStream::pair().unwrap();
        let invitation = TransportInvitation::new(
            crate::id::HostId::allocate(),
            String::new(),
            crate::invitation::ChildEndpoint::new(child_end),
        );
        let _ = ProcessLauncher::new().launch(invitation, LaunchParams::new("/nonexistent/x"));

        assert_eq!(read_frame(&mut parent, DEFAULT_MAX_FRAME_LEN).unwrap(), None::<Frame>);
    }
}
