//! Broker process discovery
//!
//! Finds the broker by scanning `/proc/<pid>/cmdline` for a name fragment
//! and derives the metric endpoint from its Jolokia agent options.

use crate::error::{ScalerError, ScalerResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// A located broker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerProcess {
    pub pid: u32,
    /// Metric endpoint URL for this process
    pub endpoint: String,
    /// Command line, space separated
    pub command_line: String,
}

/// Locates a process by command-line substring
pub struct ProcessLocator {
    proc_path: PathBuf,
    default_endpoint: String,
    own_pid: u32,
}

impl ProcessLocator {
    /// Create a locator over `/proc`
    pub fn new(default_endpoint: impl Into<String>) -> Self {
        Self::with_proc_path("/proc", default_endpoint)
    }

    pub fn with_proc_path(proc_path: impl Into<PathBuf>, default_endpoint: impl Into<String>) -> Self {
        Self {
            proc_path: proc_path.into(),
            default_endpoint: default_endpoint.into(),
            own_pid: std::process::id(),
        }
    }

    /// Find the lowest-pid process whose command line contains `fragment`,
    /// excluding this process.
    pub async fn locate(&self, fragment: &str) -> ScalerResult<BrokerProcess> {
        for pid in self.list_pids().await? {
            if pid == self.own_pid {
                continue;
            }

            let command_line = match self.read_cmdline(pid).await {
                Some(line) => line,
                None => continue,
            };

            if command_line.contains(fragment) {
                let endpoint =
                    jolokia_endpoint(&command_line).unwrap_or_else(|| self.default_endpoint.clone());
                info!(pid = pid, endpoint = %endpoint, "Found broker process");
                return Ok(BrokerProcess {
                    pid,
                    endpoint,
                    command_line,
                });
            }
        }

        Err(ScalerError::SourceUnavailable(format!(
            "no process matching \"{}\"",
            fragment
        )))
    }

    /// Numeric entries of the proc directory, ascending
    async fn list_pids(&self) -> ScalerResult<Vec<u32>> {
        let mut entries = fs::read_dir(&self.proc_path).await.map_err(|e| {
            ScalerError::SourceUnavailable(format!("cannot list {}: {}", self.proc_path.display(), e))
        })?;

        let mut pids = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                pids.push(pid);
            }
        }

        pids.sort_unstable();
        Ok(pids)
    }

    /// Read a NUL-separated command line; processes that vanish are skipped
    async fn read_cmdline(&self, pid: u32) -> Option<String> {
        let path = cmdline_path(&self.proc_path, pid);
        match fs::read(&path).await {
            Ok(raw) => {
                let args: Vec<String> = raw
                    .split(|b| *b == 0)
                    .filter(|arg| !arg.is_empty())
                    .map(|arg| String::from_utf8_lossy(arg).into_owned())
                    .collect();
                Some(args.join(" "))
            }
            Err(e) => {
                debug!(pid = pid, error = %e, "Skipping unreadable process");
                None
            }
        }
    }
}

fn cmdline_path(proc_path: &Path, pid: u32) -> PathBuf {
    proc_path.join(pid.to_string()).join("cmdline")
}

/// Endpoint of a Jolokia JVM agent declared on the command line, if any.
///
/// Recognizes `-javaagent:<path>jolokia<...>.jar=port=<n>[,host=<h>]`.
fn jolokia_endpoint(command_line: &str) -> Option<String> {
    let agent = command_line
        .split_whitespace()
        .find(|arg| arg.starts_with("-javaagent:") && arg.contains("jolokia"))?;
    let (_, options) = agent.split_once('=')?;

    let mut port = None;
    let mut host = "127.0.0.1";
    for option in options.split(',') {
        match option.split_once('=') {
            Some(("port", value)) => port = value.parse::<u16>().ok(),
            Some(("host", value)) if value != "*" && value != "0.0.0.0" => host = value,
            _ => {}
        }
    }

    port.map(|port| format!("http://{}:{}/jolokia", host, port))
}
