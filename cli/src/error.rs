use std::process::{ExitCode, ExitStatus};

use tether::HostError;

pub type CliResult<T> = anyhow::Result<T>;

/// The child could not be found or started
const EXIT_LAUNCH_FAILED: u8 = 127;
/// The child never completed its handshake
const EXIT_HANDSHAKE_FAILED: u8 = 3;
/// Channel or protocol failure
const EXIT_CHANNEL_FAILED: u8 = 2;

/// Failures of a launched child that are not host errors
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("child {pid} never completed the handshake")]
    NoHandshake { pid: u32 },

    #[error("child exited with {0}")]
    ChildFailed(ExitStatus),
}

/// Convert a CliResult to an ExitCode, printing errors to stderr
pub fn to_exit_code(result: CliResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Pick the exit code from the first recognised error in the chain
fn exit_code_for(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<LaunchError>() {
            return match e {
                LaunchError::NoHandshake { .. } => EXIT_HANDSHAKE_FAILED,
                // Mirror the child's own code; signals map to 1
                LaunchError::ChildFailed(status) => status
                    .code()
                    .and_then(|code| u8::try_from(code).ok())
                    .filter(|code| *code != 0)
                    .unwrap_or(1),
            };
        }
        if let Some(e) = cause.downcast_ref::<HostError>() {
            return match e {
                HostError::ChildPathNotFound | HostError::LaunchFailed(_) => EXIT_LAUNCH_FAILED,
                HostError::HandshakeRejected => EXIT_HANDSHAKE_FAILED,
                _ => EXIT_CHANNEL_FAILED,
            };
        }
    }
    1
}
