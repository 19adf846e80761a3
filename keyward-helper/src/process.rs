//! Owned helper subprocess with a channel over its stdio.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::channel::{HelperChannel, HelperError};

/// A spawned helper and the channel to it.
///
/// The child is killed when this is dropped, so an errored call can simply
/// let the value fall out of scope — no helper is ever left behind as a
/// zombie.  One-shot helpers go through [`HelperProcess::finish`] instead,
/// which closes the channel and checks the exit status as an independent
/// success signal.
pub struct HelperProcess {
    program: PathBuf,
    child: Child,
    channel: Option<HelperChannel<ChildStdout, ChildStdin>>,
}

impl HelperProcess {
    pub fn spawn(program: &Path, args: &[&str]) -> Result<Self, HelperError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        // Both pipes exist because we just asked for them.
        let stdin = child.stdin.take().ok_or(HelperError::Closed)?;
        let stdout = child.stdout.take().ok_or(HelperError::Closed)?;
        debug!(program = %program.display(), pid = child.id(), "helper spawned");

        Ok(Self {
            program: program.to_path_buf(),
            child,
            channel: Some(HelperChannel::new(stdout, stdin)),
        })
    }

    pub async fn call(&mut self, operation: u32, body: &[u8]) -> Result<(u32, Vec<u8>), HelperError> {
        match self.channel.as_mut() {
            Some(chan) => chan.call(operation, body).await,
            None => Err(HelperError::Closed),
        }
    }

    /// Close the channel, wait for the child to exit, and require a zero
    /// exit status.
    pub async fn finish(mut self) -> Result<(), HelperError> {
        // Dropping the channel closes the child's stdin; a well-behaved
        // one-shot helper exits on EOF.
        self.channel = None;
        let status = self.child.wait().await?;
        debug!(program = %self.program.display(), %status, "helper exited");
        if status.success() {
            Ok(())
        } else {
            Err(HelperError::Exit(status))
        }
    }
}

/// Spawn a helper, issue exactly one call, and reap the child.
///
/// The response is only returned if the expected operation code comes back
/// and the helper also exits cleanly.
pub async fn one_shot(
    program: &Path,
    operation: u32,
    body: &[u8],
) -> Result<Vec<u8>, HelperError> {
    let mut helper = HelperProcess::spawn(program, &[])?;
    let (resp_op, payload) = helper.call(operation, body).await?;
    if resp_op != operation {
        return Err(HelperError::Malformed);
    }
    helper.finish().await?;
    Ok(payload)
}
