//! Cross-backend rename as recursive copy-then-delete.
//!
//! Not atomic: a failure mid-tree leaves both sides partially populated and
//! surfaces the first error. A partially written destination *file* is
//! removed before returning; directory trees are not rolled back.

use std::io;

use pfs_backend::{FileMode, SharedBackend};
use pfs_error::Result;

pub(crate) fn cross_rename(
    src_fs: &SharedBackend,
    src: &str,
    dst_fs: &SharedBackend,
    dst: &str,
) -> Result<()> {
    tracing::debug!(src, dst, "cross-backend rename via copy");
    let meta = {
        let file = src_fs.open(src)?;
        file.stat()?
    };
    if meta.is_dir() {
        cross_rename_dir(src_fs, src, dst_fs, dst)
    } else {
        copy_file(src_fs, src, dst_fs, dst)?;
        src_fs.remove(src)
    }
}

fn cross_rename_dir(
    src_fs: &SharedBackend,
    src: &str,
    dst_fs: &SharedBackend,
    dst: &str,
) -> Result<()> {
    dst_fs.mkdir_all(dst, FileMode::dir(0o755))?;
    let entries = {
        let mut dir = src_fs.open(src)?;
        dir.read_dir(-1)?
    };
    for entry in entries {
        let src_path = join(src, &entry.name);
        let dst_path = join(dst, &entry.name);
        if entry.is_dir() {
            cross_rename_dir(src_fs, &src_path, dst_fs, &dst_path)?;
        } else {
            copy_file(src_fs, &src_path, dst_fs, &dst_path)?;
        }
    }
    src_fs.remove_all(src)
}

fn copy_file(src_fs: &SharedBackend, src: &str, dst_fs: &SharedBackend, dst: &str) -> Result<()> {
    let mut src_file = src_fs.open(src)?;
    let mut dst_file = dst_fs.create(dst)?;
    if let Err(err) = io::copy(&mut src_file, &mut dst_file) {
        drop(dst_file);
        let _ = dst_fs.remove(dst);
        return Err(err.into());
    }
    drop(dst_file);
    let meta = match src_fs.stat(src) {
        Ok(meta) => meta,
        Err(err) => {
            let _ = dst_fs.remove(dst);
            return Err(err);
        }
    };
    if let Err(err) = dst_fs.chmod(dst, meta.mode) {
        let _ = dst_fs.remove(dst);
        return Err(err);
    }
    Ok(())
}

fn join(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}
