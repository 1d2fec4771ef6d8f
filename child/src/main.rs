//! Reference child for a tether host
//!
//! Connects through the endpoint exported by the launcher, then serves
//! requests until the parent shuts it down:
//!
//!   tether launch tether-child --service echo
//!   tether launch tether-child --bind echo.Echo -- --name worker-1

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;

use tether::ipc::{DEFAULT_MAX_FRAME_LEN, Frame};
use tether::{ChildChannel, EndpointHandle, Message, ReceiverBindingRequest};

/// Services this child knows how to run
const SERVICES: &[&str] = &["echo", "clock"];

/// Reference child process for a tether host
#[derive(Parser)]
#[command(name = "tether-child")]
#[command(about = "Connect to a tether host and serve its requests")]
struct Cli {
    /// Name reported in the ready message
    #[arg(long, default_value = "tether-child")]
    name: String,

    /// Parent interface to request after connecting
    #[arg(long = "request")]
    requests: Vec<String>,

    /// Largest frame accepted from the parent; must match the host's limit
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    max_frame_len: usize,
}

#[derive(Serialize)]
struct Ready<'a> {
    name: &'a str,
    pid: u32,
}

#[derive(Serialize)]
struct ServiceStatus<'a> {
    service: &'a str,
    receiver: u64,
    running: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so they interleave with the parent's
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tether_child=info")),
        )
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> tether::Result<()> {
    let mut channel = ChildChannel::from_env()?.with_max_frame_len(cli.max_frame_len);
    channel.send_message(Message::encode(
        "ready",
        &Ready {
            name: &cli.name,
            pid: std::process::id(),
        },
    )?)?;

    for interface in &cli.requests {
        channel.bind_host_receiver(ReceiverBindingRequest::new(interface, EndpointHandle::new()))?;
    }

    while let Some(frame) = channel.recv()? {
        match frame {
            Frame::RunService { service, receiver } => {
                let running = SERVICES.contains(&service.as_str());
                if !running {
                    tracing::warn!(service = %service, "unknown service");
                }
                channel.send_message(Message::encode(
                    "service",
                    &ServiceStatus {
                        service: &service,
                        receiver: receiver.as_raw(),
                        running,
                    },
                )?)?;
                if running && service == "clock" {
                    channel.send_message(Message::encode("clock.tick", &unix_time())?)?;
                }
            }
            Frame::BindReceiver(request) => {
                tracing::info!(interface = request.interface(), "binding interface");
                channel.send_message(Message::encode("bound", &request.interface())?)?;
            }
            Frame::Message(message) => {
                if message.name() == "echo" {
                    channel.send_message(Message::new("echo.reply", message.payload().to_vec()))?;
                } else {
                    tracing::debug!(name = message.name(), "ignoring message");
                }
            }
            Frame::Shutdown => {
                tracing::info!("parent requested shutdown");
                return Ok(());
            }
            Frame::Hello { .. } => {
                tracing::warn!("unexpected handshake from parent");
            }
        }
    }

    tracing::info!("parent hung up");
    Ok(())
}

fn unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
