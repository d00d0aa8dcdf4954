//! Shared plumbing for unit tests: scratch directories and recording
//! stand-ins for the external tools.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::DriverConfig;
use crate::driver::TargetUserspace;

/// Tempdir wrapper with a UTF-8 path.
pub(crate) struct TempDir {
    _inner: tempfile::TempDir,
    path: Utf8PathBuf,
}

impl TempDir {
    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }
}

pub(crate) fn tempdir() -> TempDir {
    let inner = tempfile::tempdir().expect("tempdir");
    let path = Utf8PathBuf::try_from(inner.path().to_path_buf()).expect("utf8 tempdir");
    TempDir {
        _inner: inner,
        path,
    }
}

/// Write an executable shell script into `dir` and return its path.
pub(crate) fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

/// A containment tool stand-in that skips its own options and executes
/// the payload command directly on the host.
pub(crate) fn fake_nspawn(dir: &Utf8Path) -> Utf8PathBuf {
    write_script(
        dir,
        "fake-nspawn",
        r#"while [ "$1" != "--" ]; do shift; done
shift
exec "$@""#,
    )
}

/// A dnf stand-in that records its argv, emits fixed output and exits
/// with the given code.
pub(crate) fn fake_dnf(dir: &Utf8Path, exit_code: i32) -> Utf8PathBuf {
    let record = dir.join("dnf-record");
    write_script(
        dir,
        "fake-dnf",
        &format!(
            r#"echo "$@" >> {record}
echo "resolving upgrade transaction"
if [ {exit_code} -ne 0 ]; then
    echo "transaction did not resolve" >&2
fi
exit {exit_code}"#
        ),
    )
}

/// Mount/umount stand-ins appending to a shared record file.
fn fake_mount_tools(dir: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    let record = dir.join("mount-record");
    let mount = write_script(dir, "fake-mount", &format!(r#"echo "mount $@" >> {record}"#));
    let umount = write_script(
        dir,
        "fake-umount",
        &format!(r#"echo "umount $@" >> {record}"#),
    );
    (mount, umount)
}

/// A config whose external tools are all recording fakes rooted in `dir`.
pub(crate) fn test_config(dir: &Utf8Path) -> DriverConfig {
    let (mount, umount) = fake_mount_tools(dir);
    let mut cfg = DriverConfig::new("8.4");
    cfg.log_dir = dir.join("log");
    cfg.dnf_tool = fake_dnf(dir, 0);
    cfg.nspawn_tool = fake_nspawn(dir);
    cfg.mount_tool = mount;
    cfg.umount_tool = umount;
    cfg.min_free_bytes = 1;
    cfg.guard_urls = Vec::new();
    cfg
}

/// A target userspace rooted under `dir`.
pub(crate) fn test_userspace(dir: &Utf8Path) -> TargetUserspace {
    let userspace = TargetUserspace {
        path: dir.join("userspace"),
        scratch: dir.join("scratch"),
    };
    std::fs::create_dir_all(&userspace.path).expect("userspace dir");
    std::fs::create_dir_all(&userspace.scratch).expect("scratch dir");
    userspace
}
