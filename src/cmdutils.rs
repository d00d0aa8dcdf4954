//! Helpers for [`std::process::Command`].

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::io::{Read, Seek};
use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::Result;

// Trailing bytes of stderr kept for error messages; enough for the tail
// of a mount/umount failure without pathological message sizes.
const MAX_STDERR_BYTES: u64 = 1024;

/// Helpers for synchronous child processes.
pub trait CommandRunExt {
    /// Log (at debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// Ensure the child does not outlive the parent.
    fn lifecycle_bind(&mut self) -> &mut Self;

    /// Execute the child process, returning an error (including a tail of
    /// its stderr) if it exited unsuccessfully.
    fn run(&mut self) -> Result<()>;
}

/// Helpers for [`std::process::ExitStatus`].
pub trait ExitStatusExt {
    /// If the exit status signals failure, return an error carrying the
    /// trailing stderr content.
    fn check_status(&mut self, stderr: std::fs::File) -> Result<()>;
}

/// Read up to the final [`MAX_STDERR_BYTES`] of the file as lossy UTF-8.
/// Infallible; an unreadable file yields a placeholder.
fn stderr_tail(mut f: std::fs::File) -> String {
    let len = match f.metadata() {
        Ok(m) => m.len(),
        Err(e) => {
            tracing::warn!("failed to fstat stderr capture: {e}");
            0
        }
    };
    let tail = len.min(MAX_STDERR_BYTES);
    let mut buf = Vec::with_capacity(tail as usize);
    let r = f
        .seek(std::io::SeekFrom::Start(len - tail))
        .and_then(|_| f.read_to_end(&mut buf));
    match r {
        Ok(_) => String::from_utf8_lossy(&buf).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read back stderr capture: {e}");
            "<failed to read stderr>".to_string()
        }
    }
}

impl ExitStatusExt for std::process::ExitStatus {
    fn check_status(&mut self, stderr: std::fs::File) -> Result<()> {
        if self.success() {
            return Ok(());
        }
        anyhow::bail!("Subprocess failed: {self:?}\n{}", stderr_tail(stderr))
    }
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {self:?}");
        self
    }

    #[allow(unsafe_code)]
    fn lifecycle_bind(&mut self) -> &mut Self {
        // SAFETY: This API is safe to call in a forked child.
        unsafe {
            self.pre_exec(|| {
                rustix::process::set_parent_process_death_signal(Some(
                    rustix::process::Signal::TERM,
                ))
                .map_err(Into::into)
            })
        }
    }

    fn run(&mut self) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stderr(stderr.try_clone()?);
        tracing::trace!("exec: {self:?}");
        self.status()?.check_status(stderr)
    }
}
