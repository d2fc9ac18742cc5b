//! Runtime platform identity and external tool plumbing shared by the ping sampler
//! and the path tracer.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;

/// Operating system family; decides command flags and output parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    /// BSDs and other Unix-likes: BSD-style ping flags.
    OtherUnix,
}

impl Platform {
    pub fn current() -> Self {
        Self::from_os_name(env::consts::OS)
    }

    pub fn from_os_name(os: &str) -> Self {
        match os {
            "linux" | "android" => Platform::Linux,
            "macos" | "ios" => Platform::MacOs,
            "windows" => Platform::Windows,
            _ => Platform::OtherUnix,
        }
    }
}

/// Locate `name` on the current `PATH`, the way a shell would.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .flat_map(|dir| candidate_names(name).into_iter().map(move |n| dir.join(n)))
        .find(|p| is_executable(p))
}

fn candidate_names(name: &str) -> Vec<OsString> {
    let mut names = vec![OsString::from(name)];
    if cfg!(windows) && Path::new(name).extension().is_none() {
        let exts = env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.COM;.BAT;.CMD".into());
        names.extend(
            exts.split(';')
                .filter(|e| !e.is_empty())
                .map(|e| OsString::from(format!("{name}{}", e.to_ascii_lowercase()))),
        );
    }
    names
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Package hint for a missing diagnostic tool.
pub fn install_hint(tool: &str) -> &'static str {
    match tool {
        "ping" => "install iputils-ping (Debian/Ubuntu) or iputils (Fedora/Arch)",
        "mtr" => "install the mtr package (apt/dnf/pacman install mtr, brew install mtr)",
        "traceroute" => "install the traceroute package (apt/dnf/pacman install traceroute)",
        "tracert" => "tracert ships with Windows; check that System32 is on PATH",
        _ => "install it and make sure it is on PATH",
    }
}

/// Captured output of a finished tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Run `tool` from `PATH` with `args`, killing it if it outlives `limit`.
///
/// Availability is checked first so a missing tool yields `ToolError::NotFound`
/// with an install hint instead of a raw launch failure.
pub async fn run_tool(tool: &str, args: &[String], limit: Duration) -> Result<ToolOutput, ToolError> {
    let program = find_executable(tool).ok_or_else(|| ToolError::NotFound {
        tool: tool.to_string(),
        hint: install_hint(tool),
    })?;
    debug!(tool, ?args, limit_ms = limit.as_millis() as u64, "running external tool");

    let child = Command::new(&program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(limit, child).await {
        Ok(Ok(out)) => Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: out.status.code(),
        }),
        Ok(Err(source)) => Err(ToolError::Launch {
            tool: tool.to_string(),
            source,
        }),
        Err(_) => Err(ToolError::TimedOut {
            tool: tool.to_string(),
            limit,
        }),
    }
}

/// Whole seconds for tools that only take integral second flags, never below 1.
pub(crate) fn ceil_secs(d: Duration) -> u64 {
    let ms = d.as_millis() as u64;
    ms.div_ceil(1000).max(1)
}
