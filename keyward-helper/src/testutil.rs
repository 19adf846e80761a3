//! Script-backed fake helpers.
//!
//! Tests that go through [`crate::process`] need a real child process on
//! the other end of the pipes.  A tiny shell script plays that side: it
//! emits its canned response frames up front, swallows its stdin until the
//! channel closes, and exits with a chosen status.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Escape bytes as octal sequences for a POSIX `printf` format string.
pub(crate) fn printf_escaped(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for b in bytes {
        let _ = write!(out, "\\{b:03o}");
    }
    out
}

/// An executable script in the temp directory, removed on drop.
pub(crate) struct ScriptFile {
    path: PathBuf,
}

impl ScriptFile {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Write a fake helper script that writes `responses`, consumes its stdin
/// until EOF, and exits with `code`.
pub(crate) fn fake_helper(name: &str, responses: &[Vec<u8>], code: i32) -> ScriptFile {
    use std::os::unix::fs::PermissionsExt;

    let mut body = String::from("#!/bin/sh\n");
    for resp in responses {
        let _ = writeln!(body, "printf '{}'", printf_escaped(resp));
    }
    body.push_str("cat >/dev/null\n");
    let _ = writeln!(body, "exit {code}");

    let path = std::env::temp_dir().join(format!(
        "keyward-helper-fake-{}-{name}.sh",
        std::process::id()
    ));
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    ScriptFile { path }
}
