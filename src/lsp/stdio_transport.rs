// Server process launch: the child's stdin/stdout become the transport.
use anyhow::{anyhow, Context};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

use crate::lsp::transport::Transport;

/// Spawn `exe` with piped stdin/stdout. stderr is inherited so server logs
/// reach the terminal. The child is killed if its handle is dropped.
pub fn start_server(exe: &Path, args: &[String]) -> anyhow::Result<(Child, Transport)> {
    let mut cmd = Command::new(exe);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {}", exe.display()))?;

    let writer = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to take child stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("failed to take child stdout"))?;

    tracing::debug!("Started {} (pid {:?})", exe.display(), child.id());
    Ok((child, Transport::from_streams(stdout, writer)))
}
