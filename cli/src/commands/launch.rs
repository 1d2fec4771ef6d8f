use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_lite::future;
use smol::Timer;

use tether::{
    ChannelMode, ChannelState, ChildPathResolver, ChildProcess, ChildProcessHost,
    DefaultChildPathResolver, EndpointHandle, HostConfig, HostDelegate, LaunchParams, Launcher,
    ProcessLauncher, ReceiverBindingRequest,
};

use crate::cli::LaunchArgs;
use crate::config::MergedConfig;
use crate::delegate::CliDelegate;
use crate::error::{CliResult, LaunchError};

pub async fn execute(args: LaunchArgs, config: MergedConfig) -> CliResult<()> {
    let mut builder = HostConfig::builder()
        .mode(ChannelMode::Structured)
        .max_frame_len(config.max_frame_len);
    if let Some(path) = &config.child_path {
        builder = builder.child_path(path);
    }

    let delegate = Arc::new(CliDelegate::new());
    let mut host = ChildProcessHost::with_config(Arc::clone(&delegate), builder.build())
        .context("failed to create host")?;

    let program = match &args.program {
        Some(program) => program.clone(),
        None => DefaultChildPathResolver::from_config(host.config())
            .require(config.flags)
            .context("no program given")?,
    };

    let invitation = host
        .take_invitation()
        .context("host invitation already taken")?;
    let mut params = LaunchParams::new(&program)
        .args(&args.args)
        .flags(config.flags);
    for (key, value) in &config.env_set {
        params = params.env(key, value);
    }
    let mut child = ProcessLauncher::new()
        .launch(invitation, params)
        .with_context(|| format!("failed to launch {}", program.display()))?;

    if let Err(e) = open_channel(&mut host, &config, &args) {
        abandon(&mut child).await;
        return Err(e).context("failed to open channel to child");
    }

    let connected = wait_for_handshake(&mut host, config.handshake_timeout).await;
    if !connected {
        tracing::error!(
            timeout_secs = config.handshake_timeout.as_secs(),
            pid = child.id(),
            "child did not connect in time"
        );
        host.force_shutdown();
        abandon(&mut child).await;
        return Err(LaunchError::NoHandshake { pid: child.id() }.into());
    }

    match args.run_for {
        Some(secs) => {
            future::or(
                async {
                    while host.pump().await {}
                },
                async {
                    Timer::after(Duration::from_secs(secs)).await;
                },
            )
            .await;
            host.force_shutdown();
        }
        None => while host.pump().await {},
    }

    let status = child.wait().await?;
    host.handle_process_exit();
    tracing::info!(pid = ?delegate.connected_pid(), status = %status, "child exited");

    if !status.success() {
        return Err(LaunchError::ChildFailed(status).into());
    }
    Ok(())
}

/// Arm the channel and queue the configured services and interfaces
fn open_channel<D: HostDelegate>(
    host: &mut ChildProcessHost<D>,
    config: &MergedConfig,
    args: &LaunchArgs,
) -> tether::Result<()> {
    host.create_channel()?;
    // Queued until the handshake completes
    for service in config.services.iter().chain(&args.services) {
        host.run_service(service, EndpointHandle::new())?;
    }
    for interface in config.interfaces.iter().chain(&args.interfaces) {
        host.bind_receiver(ReceiverBindingRequest::new(interface, EndpointHandle::new()))?;
    }
    Ok(())
}

/// Kill a child we are giving up on and reap it
async fn abandon(child: &mut ChildProcess) {
    // It may already be gone
    if let Err(e) = child.kill() {
        tracing::debug!(pid = child.id(), error = %e, "failed to kill child");
    }
    match child.wait().await {
        Ok(status) => tracing::debug!(pid = child.id(), status = %status, "reaped abandoned child"),
        Err(e) => tracing::warn!(pid = child.id(), error = %e, "failed to reap child"),
    }
}

/// Pump until the child connects, the channel closes, or `timeout` elapses
///
/// Returns whether the channel reached `Open`.
async fn wait_for_handshake<D: HostDelegate>(
    host: &mut ChildProcessHost<D>,
    timeout: Duration,
) -> bool {
    future::or(
        async {
            while host.is_channel_opening() {
                if !host.pump().await {
                    break;
                }
            }
        },
        async {
            Timer::after(timeout).await;
        },
    )
    .await;
    host.state() == ChannelState::Open
}
