use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use tether::ChildPathFlags;
use tether::ipc::DEFAULT_MAX_FRAME_LEN;

use crate::cli::CommonArgs;

const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// TOML config file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Host settings
    pub host: HostSection,

    /// What to ask of the child once launched
    pub launch: LaunchSection,

    /// Environment settings
    pub env: EnvSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub child_path: Option<PathBuf>,
    pub allow_self: Option<bool>,
    pub max_frame_len: Option<usize>,
    pub handshake_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LaunchSection {
    pub services: Option<Vec<String>>,
    pub interfaces: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnvSection {
    pub set: Option<HashMap<String, String>>,
}

/// Merged configuration from file + CLI
#[derive(Debug)]
pub struct MergedConfig {
    pub child_path: Option<PathBuf>,
    pub flags: ChildPathFlags,
    pub max_frame_len: usize,
    pub handshake_timeout: Duration,
    pub services: Vec<String>,
    pub interfaces: Vec<String>,
    pub env_set: HashMap<String, String>,
}

/// Load config from file
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let config: FileConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FileConfig::default()),
    }
}

/// Merge file config with CLI args (CLI takes precedence)
pub fn merge_config(file: FileConfig, cli: &CommonArgs) -> Result<MergedConfig> {
    let allow_self = cli.allow_self || file.host.allow_self.unwrap_or(false);
    let flags = if allow_self {
        ChildPathFlags::AllowSelf
    } else {
        ChildPathFlags::Normal
    };

    let max_frame_len = cli
        .max_frame_len
        .or(file.host.max_frame_len)
        .unwrap_or(DEFAULT_MAX_FRAME_LEN);
    if max_frame_len == 0 {
        bail!("max_frame_len must be greater than zero");
    }

    let handshake_timeout = Duration::from_secs(
        cli.handshake_timeout
            .or(file.host.handshake_timeout_secs)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
    );

    let mut env_set = file.env.set.unwrap_or_default();
    for entry in &cli.envs {
        let (key, value) = parse_env(entry)?;
        env_set.insert(key, value);
    }

    Ok(MergedConfig {
        child_path: cli.child_path.clone().or(file.host.child_path),
        flags,
        max_frame_len,
        handshake_timeout,
        services: file.launch.services.unwrap_or_default(),
        interfaces: file.launch.interfaces.unwrap_or_default(),
        env_set,
    })
}

fn parse_env(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("invalid --env value '{entry}', expected KEY=VALUE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common() -> CommonArgs {
        CommonArgs {
            child_path: None,
            allow_self: false,
            handshake_timeout: None,
            max_frame_len: None,
            envs: Vec::new(),
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let merged = merge_config(FileConfig::default(), &common()).unwrap();
        assert_eq!(merged.flags, ChildPathFlags::Normal);
        assert_eq!(merged.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(merged.handshake_timeout, Duration::from_secs(10));
        assert!(merged.services.is_empty());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [host]
            child_path = "/opt/worker"
            max_frame_len = 4096
            handshake_timeout_secs = 3

            [launch]
            services = ["echo"]

            [env.set]
            MODE = "file"
            "#,
        )
        .unwrap();

        let mut args = common();
        args.child_path = Some(PathBuf::from("/usr/bin/other"));
        args.max_frame_len = Some(1024);
        args.envs = vec!["MODE=cli".to_string(), "EXTRA=1".to_string()];

        let merged = merge_config(file, &args).unwrap();
        assert_eq!(merged.child_path, Some(PathBuf::from("/usr/bin/other")));
        assert_eq!(merged.max_frame_len, 1024);
        assert_eq!(merged.handshake_timeout, Duration::from_secs(3));
        assert_eq!(merged.services, ["echo"]);
        assert_eq!(merged.env_set["MODE"], "cli");
        assert_eq!(merged.env_set["EXTRA"], "1");
    }

    #[test]
    fn test_rejects_malformed_env() {
        let mut args = common();
        args.envs = vec!["NOEQUALS".to_string()];
        assert!(merge_config(FileConfig::default(), &args).is_err());
    }

    #[test]
    fn test_rejects_zero_frame_len() {
        let mut args = common();
        args.max_frame_len = Some(0);
        assert!(merge_config(FileConfig::default(), &args).is_err());
    }
}
