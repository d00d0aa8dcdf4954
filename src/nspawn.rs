//! Isolated execution roots driven through `systemd-nspawn`.
//!
//! A context is rooted at a base directory with a set of bind mounts
//! declared up front; the mounts are fixed for the lifetime of the
//! context. Containment is per-call: nspawn sets up and tears down the
//! namespace around each command, so dropping the context releases
//! everything it holds.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::io::{BufRead, BufReader, Read, Seek};
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::Dir;

use crate::cmdutils::CommandRunExt;
use crate::errors::TransactionError;
use crate::fsutil;

const NSPAWN_BASE_ARGS: &[&str] = &["--register=no", "--quiet"];

/// A host directory bound into the context at a context-absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: Utf8PathBuf,
    pub target: Utf8PathBuf,
}

impl BindMount {
    pub fn new(source: impl Into<Utf8PathBuf>, target: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    fn to_arg(&self) -> String {
        format!("--bind={}:{}", self.source, self.target)
    }
}

/// Output of a successful in-context command.
#[derive(Debug)]
pub struct CallOutput {
    pub stdout: String,
    pub stderr: String,
}

/// An execution environment rooted at a base directory.
pub struct IsolatedContext {
    base_dir: Utf8PathBuf,
    binds: Vec<BindMount>,
    root: Dir,
    nspawn_tool: Utf8PathBuf,
}

impl IsolatedContext {
    /// Establish a context at `base_dir` with the given bind mounts.
    /// No mounts can be added after this point.
    pub fn enter(
        nspawn_tool: impl Into<Utf8PathBuf>,
        base_dir: impl Into<Utf8PathBuf>,
        binds: Vec<BindMount>,
    ) -> Result<Self, TransactionError> {
        let base_dir = base_dir.into();
        let root = Dir::open_ambient_dir(&base_dir, cap_std::ambient_authority())
            .map_err(|e| TransactionError::isolation(format!("opening root {base_dir}"), e))?;
        Ok(Self {
            base_dir,
            binds,
            root,
            nspawn_tool: nspawn_tool.into(),
        })
    }

    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Host-side path of a context-absolute path.
    pub fn host_path(&self, ctx_path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.base_dir.join(rel(ctx_path.as_ref()))
    }

    fn command(&self, argv: &[&str]) -> Command {
        let mut c = Command::new(&self.nspawn_tool);
        c.arg(format!("--directory={}", self.base_dir));
        c.args(NSPAWN_BASE_ARGS);
        for bind in &self.binds {
            c.arg(bind.to_arg());
        }
        c.arg("--");
        c.args(argv);
        c.lifecycle_bind().log_debug();
        c
    }

    /// Run a command inside the context, blocking until it exits.
    ///
    /// Stdout is streamed line-by-line into `sink` as it is produced (and
    /// retained for the caller); stderr is captured to a tempfile. A
    /// nonzero exit surfaces as [`TransactionError::Execution`] carrying
    /// both streams; failure to launch the containment tool at all is
    /// [`TransactionError::Launch`].
    pub fn call(
        &self,
        argv: &[&str],
        sink: &mut dyn FnMut(&str),
    ) -> Result<CallOutput, TransactionError> {
        let mut cmd = self.command(argv);
        let stderr_file = tempfile::tempfile()
            .map_err(|e| TransactionError::isolation("creating stderr capture", e))?;
        let stderr_clone = stderr_file
            .try_clone()
            .map_err(|e| TransactionError::isolation("cloning stderr capture", e))?;
        cmd.stderr(stderr_clone);
        cmd.stdout(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| TransactionError::Launch {
            tool: self.nspawn_tool.clone(),
            source,
        })?;

        let mut stdout = String::new();
        // Safety: stdout was set to piped above.
        let pipe = child.stdout.take().expect("piped stdout");
        for line in BufReader::new(pipe).lines() {
            let line =
                line.map_err(|e| TransactionError::isolation("reading child stdout", e))?;
            sink(&line);
            stdout.push_str(&line);
            stdout.push('\n');
        }

        let status = child
            .wait()
            .map_err(|e| TransactionError::isolation("waiting for child", e))?;
        let stderr = read_back(stderr_file)
            .map_err(|e| TransactionError::isolation("reading stderr capture", e))?;

        if status.success() {
            Ok(CallOutput { stdout, stderr })
        } else {
            Err(TransactionError::Execution {
                status: status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        }
    }

    /// Create a directory (and parents) inside the context.
    pub fn make_dirs(&self, ctx_path: impl AsRef<Utf8Path>) -> std::io::Result<()> {
        self.root.create_dir_all(rel(ctx_path.as_ref()))
    }

    /// Write a file inside the context.
    pub fn write(&self, ctx_path: impl AsRef<Utf8Path>, contents: &[u8]) -> std::io::Result<()> {
        self.root.write(rel(ctx_path.as_ref()), contents)
    }

    /// Read a file inside the context.
    pub fn read_to_string(&self, ctx_path: impl AsRef<Utf8Path>) -> std::io::Result<String> {
        self.root.read_to_string(rel(ctx_path.as_ref()))
    }

    /// Copy a file out of the context to a host path.
    pub fn copy_from(
        &self,
        ctx_path: impl AsRef<Utf8Path>,
        host_path: impl AsRef<Utf8Path>,
    ) -> std::io::Result<()> {
        let mut src = self.root.open(rel(ctx_path.as_ref()))?;
        let mut dst = std::fs::File::create(host_path.as_ref())?;
        std::io::copy(&mut src, &mut dst)?;
        Ok(())
    }

    /// Copy a directory tree out of the context to a host path.
    pub fn copy_tree_from(
        &self,
        ctx_path: impl AsRef<Utf8Path>,
        host_path: impl AsRef<Utf8Path>,
    ) -> std::io::Result<()> {
        fsutil::copy_dir_all(&self.host_path(ctx_path), host_path.as_ref())
    }
}

fn rel(path: &Utf8Path) -> &Utf8Path {
    Utf8Path::new(path.as_str().trim_start_matches('/'))
}

fn read_back(mut f: std::fs::File) -> std::io::Result<String> {
    f.seek(std::io::SeekFrom::Start(0))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;

    fn test_context(dir: &Utf8Path) -> IsolatedContext {
        let nspawn = testutils::fake_nspawn(dir);
        let base = dir.join("base");
        std::fs::create_dir_all(&base).unwrap();
        IsolatedContext::enter(nspawn, base, Vec::new()).unwrap()
    }

    #[test]
    fn call_streams_and_collects_stdout() {
        let tmp = testutils::tempdir();
        let ctx = test_context(tmp.path());
        let mut seen = Vec::new();
        let out = ctx
            .call(&["/bin/sh", "-c", "echo one; echo two"], &mut |l| {
                seen.push(l.to_string())
            })
            .unwrap();
        assert_eq!(seen, vec!["one", "two"]);
        similar_asserts::assert_eq!(out.stdout, "one\ntwo\n");
    }

    #[test]
    fn call_nonzero_exit_carries_output() {
        let tmp = testutils::tempdir();
        let ctx = test_context(tmp.path());
        let err = ctx
            .call(
                &["/bin/sh", "-c", "echo partial; echo failed >&2; exit 7"],
                &mut |_| {},
            )
            .unwrap_err();
        match err {
            TransactionError::Execution {
                status,
                stdout,
                stderr,
            } => {
                assert_eq!(status, 7);
                similar_asserts::assert_eq!(stdout, "partial\n");
                similar_asserts::assert_eq!(stderr, "failed\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_tool_is_a_launch_error() {
        let tmp = testutils::tempdir();
        let base = tmp.path().join("base");
        std::fs::create_dir_all(&base).unwrap();
        let ctx =
            IsolatedContext::enter(tmp.path().join("no-such-nspawn"), base, Vec::new()).unwrap();
        let err = ctx.call(&["true"], &mut |_| {}).unwrap_err();
        assert!(matches!(err, TransactionError::Launch { .. }), "{err:?}");
    }

    #[test]
    fn bind_mount_arg_format() {
        let b = BindMount::new("/boot", "/installroot/boot");
        assert_eq!(b.to_arg(), "--bind=/boot:/installroot/boot");
    }

    #[test]
    fn file_operations_are_rooted_in_base() {
        let tmp = testutils::tempdir();
        let ctx = test_context(tmp.path());
        ctx.make_dirs("/var/lib/thing").unwrap();
        ctx.write("/var/lib/thing/data.txt", b"payload").unwrap();
        assert_eq!(
            ctx.read_to_string("/var/lib/thing/data.txt").unwrap(),
            "payload"
        );
        // The file must live under base_dir on the host.
        let host = ctx.host_path("/var/lib/thing/data.txt");
        assert_eq!(std::fs::read_to_string(host).unwrap(), "payload");

        let out = tmp.path().join("out.txt");
        ctx.copy_from("/var/lib/thing/data.txt", &out).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "payload");

        let tree_out = tmp.path().join("tree");
        ctx.copy_tree_from("/var/lib/thing", &tree_out).unwrap();
        assert_eq!(
            std::fs::read_to_string(tree_out.join("data.txt")).unwrap(),
            "payload"
        );
    }
}
