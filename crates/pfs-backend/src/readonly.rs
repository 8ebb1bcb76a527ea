//! Read-only backend wrapper.
//!
//! Every mutating operation and write-like open fails `PermissionDenied`;
//! reads, stats and readlink/lstat pass through. The per-user composer wraps
//! pools a user may read but not write.

use std::time::SystemTime;

use pfs_error::{Result, VfsError};

use crate::{
    Backend, BoxFile, FileMode, LstatBackend, Metadata, OpenFlags, ReadlinkBackend, SharedBackend,
};

#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: SharedBackend,
}

impl ReadOnlyBackend {
    pub fn new(inner: SharedBackend) -> Self {
        Self { inner }
    }

    fn denied<T>(path: &str) -> Result<T> {
        Err(VfsError::PermissionDenied(path.to_owned()))
    }
}

impl Backend for ReadOnlyBackend {
    fn name(&self) -> &str {
        "readonly"
    }

    fn create(&self, path: &str) -> Result<BoxFile> {
        Self::denied(path)
    }

    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<BoxFile> {
        if flags.is_write_like() {
            return Self::denied(path);
        }
        self.inner.open_file(path, flags, mode)
    }

    fn mkdir(&self, path: &str, _mode: FileMode) -> Result<()> {
        Self::denied(path)
    }

    fn mkdir_all(&self, path: &str, _mode: FileMode) -> Result<()> {
        Self::denied(path)
    }

    fn remove(&self, path: &str) -> Result<()> {
        Self::denied(path)
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        Self::denied(path)
    }

    fn rename(&self, old: &str, _new: &str) -> Result<()> {
        Self::denied(old)
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        self.inner.stat(path)
    }

    fn chmod(&self, path: &str, _mode: FileMode) -> Result<()> {
        Self::denied(path)
    }

    fn chown(&self, path: &str, _uid: u32, _gid: u32) -> Result<()> {
        Self::denied(path)
    }

    fn chtimes(&self, path: &str, _atime: SystemTime, _mtime: SystemTime) -> Result<()> {
        Self::denied(path)
    }

    fn readlinks(&self) -> Option<&dyn ReadlinkBackend> {
        self.inner
            .readlinks()
            .map(|_| self as &dyn ReadlinkBackend)
    }

    fn lstater(&self) -> Option<&dyn LstatBackend> {
        self.inner.lstater().map(|_| self as &dyn LstatBackend)
    }
}

impl ReadlinkBackend for ReadOnlyBackend {
    fn readlink(&self, path: &str) -> Result<String> {
        match self.inner.readlinks() {
            Some(capability) => capability.readlink(path),
            None => Err(VfsError::NotSupported("readlink")),
        }
    }
}

impl LstatBackend for ReadOnlyBackend {
    fn lstat(&self, path: &str) -> Result<Metadata> {
        match self.inner.lstater() {
            Some(capability) => capability.lstat(path),
            None => Err(VfsError::NotSupported("lstat")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemBackend;
    use std::io::Read as _;
    use std::sync::Arc;

    #[test]
    fn denies_writes_allows_reads() {
        let mem = Arc::new(MemBackend::new());
        mem.write_file("/readme.txt", b"hello").unwrap();
        let fs = ReadOnlyBackend::new(mem);

        let mut file = fs.open("/readme.txt").unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");

        assert!(matches!(
            fs.create("/new.txt"),
            Err(VfsError::PermissionDenied(_))
        ));
        assert!(matches!(
            fs.open_file("/readme.txt", OpenFlags::write_truncate(), FileMode::file(0o644)),
            Err(VfsError::PermissionDenied(_))
        ));
        assert!(matches!(
            fs.remove("/readme.txt"),
            Err(VfsError::PermissionDenied(_))
        ));
        assert!(matches!(
            fs.mkdir("/dir", FileMode::dir(0o755)),
            Err(VfsError::PermissionDenied(_))
        ));
        assert!(matches!(
            fs.rename("/readme.txt", "/other.txt"),
            Err(VfsError::PermissionDenied(_))
        ));
        // stat still works
        assert_eq!(fs.stat("/readme.txt").unwrap().size, 5);
    }
}
