use anyhow::Context;

use tether::{ChildPathResolver, DefaultChildPathResolver};

use crate::cli::ChildPathArgs;
use crate::config::MergedConfig;
use crate::error::CliResult;

pub fn execute(_args: ChildPathArgs, config: MergedConfig) -> CliResult<()> {
    let resolver = match &config.child_path {
        Some(path) => DefaultChildPathResolver::with_override(path),
        None => DefaultChildPathResolver::new(),
    };
    let path = resolver
        .require(config.flags)
        .context("cannot resolve the child executable")?;
    println!("{}", path.display());
    Ok(())
}
