use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Launch and host child processes over a primordial channel")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a child process and host its channel
    Launch(LaunchArgs),

    /// Print the executable that would be launched as a child
    ChildPath(ChildPathArgs),
}

#[derive(Args)]
pub struct LaunchArgs {
    /// Program to launch (defaults to the configured child path)
    pub program: Option<PathBuf>,

    /// Arguments to pass to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Service to run in the child (can be repeated)
    #[arg(long = "service", short = 's')]
    pub services: Vec<String>,

    /// Interface to bind in the child (can be repeated)
    #[arg(long = "bind", short = 'b')]
    pub interfaces: Vec<String>,

    /// Keep the child running this many seconds after it connects, then shut it down
    #[arg(long)]
    pub run_for: Option<u64>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct ChildPathArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Common arguments shared across subcommands
#[derive(Args)]
pub struct CommonArgs {
    /// Executable to use as the child (bare names are looked up on PATH)
    #[arg(long, env = "TETHER_CHILD_PATH")]
    pub child_path: Option<PathBuf>,

    /// Launch through /proc/self/exe instead of the real path (Linux)
    #[arg(long)]
    pub allow_self: bool,

    /// Seconds to wait for the child's handshake
    #[arg(long)]
    pub handshake_timeout: Option<u64>,

    /// Largest frame accepted from the child, in bytes
    #[arg(long)]
    pub max_frame_len: Option<usize>,

    /// Environment variable to set for the child (KEY=VALUE, can be repeated)
    #[arg(long = "env", short = 'e')]
    pub envs: Vec<String>,
}
