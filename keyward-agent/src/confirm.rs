//! User interaction for confirm-gated keys and authenticator PINs.
//!
//! The daemon has no terminal of its own, so interaction is delegated to
//! an askpass-style helper program, the same contract SSH_ASKPASS uses:
//! the prompt is passed as the single argument, exit status 0 means
//! approved, and anything written to stdout is the collected secret.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};
use zeroize::Zeroizing;

#[async_trait]
pub trait Interaction: Send + Sync {
    /// Ask the user to approve an action. False on refusal or when no
    /// prompter is available.
    async fn confirm(&self, prompt: &str) -> bool;

    /// Collect a secret such as an authenticator PIN. None on cancel or
    /// when no prompter is available.
    async fn ask_secret(&self, prompt: &str) -> Option<Zeroizing<Vec<u8>>>;
}

/// Runs the configured askpass program, falling back to the
/// `KEYWARD_ASKPASS` environment variable.
pub struct AskpassInteraction {
    program: Option<PathBuf>,
}

impl AskpassInteraction {
    pub fn new(program: Option<PathBuf>) -> Self {
        Self { program }
    }

    fn resolve(&self) -> Option<PathBuf> {
        self.program
            .clone()
            .or_else(|| std::env::var_os("KEYWARD_ASKPASS").map(PathBuf::from))
    }
}

#[async_trait]
impl Interaction for AskpassInteraction {
    async fn confirm(&self, prompt: &str) -> bool {
        let Some(program) = self.resolve() else {
            warn!("confirmation required but no askpass program configured");
            return false;
        };
        let status = Command::new(&program)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(error) => {
                warn!(program = %program.display(), %error, "askpass failed to run");
                false
            }
        }
    }

    async fn ask_secret(&self, prompt: &str) -> Option<Zeroizing<Vec<u8>>> {
        let Some(program) = self.resolve() else {
            warn!("secret prompt required but no askpass program configured");
            return None;
        };
        let mut child = Command::new(&program)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|error| {
                warn!(program = %program.display(), %error, "askpass failed to run");
            })
            .ok()?;

        let mut output = Zeroizing::new(Vec::new());
        if let Some(stdout) = child.stdout.as_mut() {
            let _ = stdout.read_to_end(&mut output).await;
        }
        let status = child.wait().await.ok()?;
        if !status.success() {
            debug!("askpass cancelled by user");
            return None;
        }
        // Askpass programs terminate the secret with a newline.
        while output.last() == Some(&b'\n') || output.last() == Some(&b'\r') {
            output.pop();
        }
        Some(output)
    }
}
