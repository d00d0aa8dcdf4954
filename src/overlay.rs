//! Copy-on-write overlay roots for the lightweight transaction stages.
//!
//! `check` and `download` must see the real system layout without ever
//! mutating it, so the source root is layered under a scratch upper
//! directory with overlayfs.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use crate::cmdutils::CommandRunExt;
use crate::config::DriverConfig;
use crate::errors::TransactionError;

/// Arguments for mounting an overlay of `lower` at `target`.
pub(crate) fn mount_args(
    lower: &Utf8Path,
    upper: &Utf8Path,
    work: &Utf8Path,
    target: &Utf8Path,
) -> Vec<String> {
    vec![
        "-t".to_string(),
        "overlay".to_string(),
        "overlay".to_string(),
        "-o".to_string(),
        format!("lowerdir={lower},upperdir={upper},workdir={work}"),
        target.to_string(),
    ]
}

/// A mounted overlay root. Unmounted on drop; if the unmount fails the
/// mount is left in place and a warning is logged, since tearing down
/// the scratch directory under a live mount would be worse.
pub struct OverlayRoot {
    target: Utf8PathBuf,
    umount_tool: Utf8PathBuf,
    mounted: bool,
}

impl OverlayRoot {
    /// Mount an overlay of `lower` at `target`, with upper/work
    /// directories created under `scratch`.
    pub fn new(
        cfg: &DriverConfig,
        scratch: &Utf8Path,
        lower: &Utf8Path,
        target: &Utf8Path,
    ) -> Result<Self, TransactionError> {
        let upper = scratch.join("upper");
        let work = scratch.join("work");
        for dir in [upper.as_path(), work.as_path(), target] {
            std::fs::create_dir_all(dir)
                .map_err(|e| TransactionError::isolation(format!("creating {dir}"), e))?;
        }
        Command::new(&cfg.mount_tool)
            .args(mount_args(lower, &upper, &work, target))
            .run()
            .map_err(|e| TransactionError::Isolation {
                reason: format!("mounting overlay at {target}: {e:#}"),
                source: None,
            })?;
        Ok(Self {
            target: target.to_owned(),
            umount_tool: cfg.umount_tool.clone(),
            mounted: true,
        })
    }

    pub fn target(&self) -> &Utf8Path {
        &self.target
    }
}

impl Drop for OverlayRoot {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        if let Err(e) = Command::new(&self.umount_tool).arg(&self.target).run() {
            tracing::warn!("failed to unmount overlay at {}: {e:#}", self.target);
        }
    }
}
