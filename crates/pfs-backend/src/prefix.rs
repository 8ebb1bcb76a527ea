//! Host-path prefixing backend.
//!
//! Joins a base path onto every backend-relative path before delegating, so a
//! storage pool rooted at `/srv/media` serves `/x` as `/srv/media/x`.

use std::sync::Arc;
use std::time::SystemTime;

use pfs_error::Result;

use crate::{
    Backend, BoxFile, FileMode, LstatBackend, Metadata, OpenFlags, ReadlinkBackend, SharedBackend,
    SymlinkBackend,
};

#[derive(Clone)]
pub struct BasePathBackend {
    base: String,
    inner: SharedBackend,
}

impl BasePathBackend {
    /// A backend serving `base` (a path on `inner`) as its root.
    pub fn new(base: impl Into<String>, inner: SharedBackend) -> Self {
        let mut base = base.into();
        while base.len() > 1 && base.ends_with('/') {
            base.pop();
        }
        Self { base, inner }
    }

    /// Shorthand for the common pool shape: a host directory.
    #[must_use]
    pub fn host(base: impl Into<String>) -> Self {
        Self::new(base, Arc::new(crate::OsBackend::new()))
    }

    fn full(&self, path: &str) -> String {
        let rel = path.trim_start_matches('/');
        if rel.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{}", self.base, rel)
        }
    }
}

impl Backend for BasePathBackend {
    fn name(&self) -> &str {
        "basepath"
    }

    fn create(&self, path: &str) -> Result<BoxFile> {
        self.inner.create(&self.full(path))
    }

    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<BoxFile> {
        self.inner.open_file(&self.full(path), flags, mode)
    }

    fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        self.inner.mkdir(&self.full(path), mode)
    }

    fn mkdir_all(&self, path: &str, mode: FileMode) -> Result<()> {
        self.inner.mkdir_all(&self.full(path), mode)
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.inner.remove(&self.full(path))
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        self.inner.remove_all(&self.full(path))
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.inner.rename(&self.full(old), &self.full(new))
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        self.inner.stat(&self.full(path))
    }

    fn chmod(&self, path: &str, mode: FileMode) -> Result<()> {
        self.inner.chmod(&self.full(path), mode)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.inner.chown(&self.full(path), uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.inner.chtimes(&self.full(path), atime, mtime)
    }

    fn symlinks(&self) -> Option<&dyn SymlinkBackend> {
        self.inner.symlinks().map(|_| self as &dyn SymlinkBackend)
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

impl SymlinkBackend for BasePathBackend {
    fn symlink(&self, target: &str, link: &str) -> Result<()> {
        match self.inner.symlinks() {
            Some(capability) => capability.symlink(&self.full(target), &self.full(link)),
            None => Err(pfs_error::VfsError::NotSupported("symlink")),
        }
    }
}

impl ReadlinkBackend for BasePathBackend {
    fn readlink(&self, path: &str) -> Result<String> {
        match self.inner.readlinks() {
            Some(capability) => capability.readlink(&self.full(path)),
            None => Err(pfs_error::VfsError::NotSupported("readlink")),
        }
    }
}

impl LstatBackend for BasePathBackend {
    fn lstat(&self, path: &str) -> Result<Metadata> {
        match self.inner.lstater() {
            Some(capability) => capability.lstat(&self.full(path)),
            None => Err(pfs_error::VfsError::NotSupported("lstat")),
        }
    }
}
