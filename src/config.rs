//! Command line and environment configuration
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::constants::{CPUINFO_ENV, CPUINFO_PATH, PROC_STAT_ENV, PROC_STAT_PATH};
use crate::error::{HostInfoError, Result};

pub const USAGE: &str = "usage: hinfosvc <port>\n\nServes GET /hostname, /cpu-name and /load as text/plain.\n\nENVIRONMENT:\n  HINFOSVC_PROC_STAT  counter source (default: /proc/stat)\n  HINFOSVC_CPUINFO    CPU descriptor (default: /proc/cpuinfo)\n  RUST_LOG            log filter (default: hinfosvc=info)\n";

/// Kernel interfaces the request handlers read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sources {
    pub stat: PathBuf,
    pub cpuinfo: PathBuf,
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            stat: PathBuf::from(PROC_STAT_PATH),
            cpuinfo: PathBuf::from(CPUINFO_PATH),
        }
    }
}

impl Sources {
    /// Defaults, overridden by HINFOSVC_PROC_STAT / HINFOSVC_CPUINFO when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var_os(key))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let mut sources = Self::default();
        if let Some(path) = lookup(PROC_STAT_ENV).filter(|p| !p.is_empty()) {
            sources.stat = PathBuf::from(path);
        }
        if let Some(path) = lookup(CPUINFO_ENV).filter(|p| !p.is_empty()) {
            sources.cpuinfo = PathBuf::from(path);
        }
        sources
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub sources: Sources,
}

/// What the process was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Serve(Config),
    Help,
}

/// Parse arguments (program name excluded): exactly one decimal port.
pub fn parse_args<I>(args: I, sources: Sources) -> Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let port = match args.as_slice() {
        [flag] if flag == "-h" || flag == "--help" => return Ok(Invocation::Help),
        [port] => port,
        [] => return Err(HostInfoError::Argument("missing port".into())),
        _ => {
            return Err(HostInfoError::Argument(format!(
                "expected one argument, got {}",
                args.len()
            )))
        }
    };

    let port = port
        .parse::<u16>()
        .map_err(|_| HostInfoError::Argument(format!("invalid port {port:?}")))?;

    Ok(Invocation::Serve(Config { port, sources }))
}
