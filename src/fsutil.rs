//! Small filesystem helpers.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::io;

use camino::Utf8Path;

/// Recursively copy a directory tree. Symlinks are recreated as copies of
/// their targets; this is only used to extract debug artifacts, where
/// content matters and link structure does not.
pub(crate) fn copy_dir_all(src: &Utf8Path, dst: &Utf8Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in src.read_dir_utf8()? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn copies_nested_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let src = base.join("src");
        std::fs::create_dir_all(src.join("inner")).unwrap();
        std::fs::write(src.join("a.txt"), "alpha").unwrap();
        std::fs::write(src.join("inner/b.txt"), "beta").unwrap();

        let dst = base.join("dst");
        copy_dir_all(&src, &dst).unwrap();

        assert_eq!(std::fs::read_to_string(dst.join("a.txt")).unwrap(), "alpha");
        assert_eq!(
            std::fs::read_to_string(dst.join("inner/b.txt")).unwrap(),
            "beta"
        );
    }

    #[test]
    fn missing_source_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        assert!(copy_dir_all(&base.join("nope"), &base.join("dst")).is_err());
    }
}
