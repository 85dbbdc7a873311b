//! `sudo` privilege escalation support for the SSH adapter.
//!
//! Remote `sudo` prompts for a password on a terminal the engine doesn't
//! have, so the usual trick (and the one used here) is `SUDO_ASKPASS`: a
//! tiny throwaway script that echoes a password back to `sudo` over stdout.
//! Grounded on `adolago-rustible`'s privilege-escalation handling, with the
//! tempfile-and-cleanup shape used throughout this codebase's own
//! test-fixture helpers (`tempfile` is already a dev-dependency; this is the
//! first non-test use).

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use crate::error::{ExecError, ExecResult};

/// A one-shot `SUDO_ASKPASS` script backed by a private temp file, removed
/// when dropped.
pub struct Askpass {
    path: PathBuf,
}

impl Askpass {
    /// Write a 0700 script that prints `password` to stdout and exits 0.
    pub async fn write(password: &str) -> ExecResult<Self> {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rexec-askpass-{}", uuid_like()));

        let escaped = password.replace('\'', "'\\''");
        let script = format!("#!/bin/sh\nprintf '%s\\n' '{escaped}'\n");

        let mut file = tokio::fs::File::create(&path).await.map_err(ExecError::from)?;
        file.write_all(script.as_bytes()).await.map_err(ExecError::from)?;
        file.flush().await.map_err(ExecError::from)?;
        drop(file);

        set_executable(&path).await?;

        Ok(Self { path })
    }

    /// Path to the script, for setting `SUDO_ASKPASS`.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Prefix a command so it runs under `sudo -A` with this askpass
    /// script wired in, e.g. `sudo -A -- <command>`.
    pub fn wrap_command(&self, command: &str) -> String {
        format!("sudo -A -- {command}")
    }
}

impl Drop for Askpass {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
async fn set_executable(path: &std::path::Path) -> ExecResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    tokio::fs::set_permissions(path, perms).await.map_err(ExecError::from)
}

#[cfg(not(unix))]
async fn set_executable(_path: &std::path::Path) -> ExecResult<()> {
    Ok(())
}

/// A small random suffix without pulling in a UUID dependency for a single
/// filename; collision probability is irrelevant since the file lives for
/// the duration of one command.
fn uuid_like() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            std::char::from_digit(u32::from(n), 16).unwrap()
        })
        .collect()
}
