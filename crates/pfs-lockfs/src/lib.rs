#![forbid(unsafe_code)]
//! Reader-writer-locking backend wrapper.
//!
//! [`LockedBackend`] serializes operations on a wrapped backend with one
//! `RwLock`: read-like calls (plain opens, stat) share the lock, everything
//! mutating takes it exclusively. The lock covers the backend call only,
//! never the lifetime of a returned handle; callers needing a critical
//! section over an open file use the scoped helpers.
//!
//! Per-handle locking is already guaranteed by `&mut` exclusivity on
//! [`pfs_backend::File`], so handles pass through unwrapped.

use std::time::SystemTime;

use parking_lot::RwLock;
use pfs_backend::{
    Backend, BoxFile, File, FileMode, LstatBackend, Metadata, OpenFlags, ReadlinkBackend,
    SharedBackend, SymlinkBackend,
};
use pfs_error::Result;

pub struct LockedBackend {
    inner: SharedBackend,
    lock: RwLock<()>,
}

impl LockedBackend {
    pub fn new(inner: SharedBackend) -> Self {
        Self {
            inner,
            lock: RwLock::new(()),
        }
    }

    /// Run `body` with the whole filesystem locked for reading.
    pub fn with_read<T>(&self, body: impl FnOnce(&dyn Backend) -> Result<T>) -> Result<T> {
        let _guard = self.lock.read();
        body(self.inner.as_ref())
    }

    /// Run `body` with the whole filesystem locked exclusively.
    pub fn with_write<T>(&self, body: impl FnOnce(&dyn Backend) -> Result<T>) -> Result<T> {
        let _guard = self.lock.write();
        body(self.inner.as_ref())
    }

    /// Open (creating if absent) and hand `body` the file under the
    /// exclusive lock for the whole critical section.
    pub fn lock_file<T>(&self, path: &str, body: impl FnOnce(&mut dyn File) -> Result<T>) -> Result<T> {
        let _guard = self.lock.write();
        let mut file = self.inner.open_file(
            path,
            OpenFlags {
                read: true,
                write: true,
                create: true,
                ..OpenFlags::default()
            },
            FileMode::file(0o644),
        )?;
        body(file.as_mut())
    }

    /// Open read-only and hand `body` the file under the shared lock.
    pub fn read_lock_file<T>(
        &self,
        path: &str,
        body: impl FnOnce(&mut dyn File) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.lock.read();
        let mut file = self.inner.open(path)?;
        body(file.as_mut())
    }

    fn parent_dir(path: &str) -> Option<&str> {
        let trimmed = path.trim_end_matches('/');
        let cut = trimmed.rfind('/')?;
        if cut == 0 {
            None
        } else {
            Some(&trimmed[..cut])
        }
    }
}

impl Backend for LockedBackend {
    fn name(&self) -> &str {
        "lockedfs"
    }

    fn create(&self, path: &str) -> Result<BoxFile> {
        let _guard = self.lock.write();
        if let Some(parent) = Self::parent_dir(path) {
            self.inner.mkdir_all(parent, FileMode::dir(0o755))?;
        }
        self.inner.create(path)
    }

    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<BoxFile> {
        if flags.is_write_like() {
            let _guard = self.lock.write();
            self.inner.open_file(path, flags, mode)
        } else {
            let _guard = self.lock.read();
            self.inner.open_file(path, flags, mode)
        }
    }

    fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        let _guard = self.lock.write();
        self.inner.mkdir(path, mode)
    }

    fn mkdir_all(&self, path: &str, mode: FileMode) -> Result<()> {
        let _guard = self.lock.write();
        self.inner.mkdir_all(path, mode)
    }

    fn remove(&self, path: &str) -> Result<()> {
        let _guard = self.lock.write();
        self.inner.remove(path)
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        let _guard = self.lock.write();
        self.inner.remove_all(path)
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let _guard = self.lock.write();
        self.inner.rename(old, new)
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        let _guard = self.lock.read();
        self.inner.stat(path)
    }

    fn chmod(&self, path: &str, mode: FileMode) -> Result<()> {
        let _guard = self.lock.write();
        self.inner.chmod(path, mode)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let _guard = self.lock.write();
        self.inner.chown(path, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let _guard = self.lock.write();
        self.inner.chtimes(path, atime, mtime)
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

impl SymlinkBackend for LockedBackend {
    fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let _guard = self.lock.write();
        match self.inner.symlinks() {
            Some(capability) => capability.symlink(target, link),
            None => Err(pfs_error::VfsError::NotSupported("symlink")),
        }
    }
}

impl ReadlinkBackend for LockedBackend {
    fn readlink(&self, path: &str) -> Result<String> {
        let _guard = self.lock.read();
        match self.inner.readlinks() {
            Some(capability) => capability.readlink(path),
            None => Err(pfs_error::VfsError::NotSupported("readlink")),
        }
    }
}

impl LstatBackend for LockedBackend {
    fn lstat(&self, path: &str) -> Result<Metadata> {
        let _guard = self.lock.read();
        match self.inner.lstater() {
            Some(capability) => capability.lstat(path),
            None => Err(pfs_error::VfsError::NotSupported("lstat")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfs_backend::MemBackend;
    use std::io::{Read, Write};
    use std::sync::Arc;

    fn locked() -> (Arc<MemBackend>, LockedBackend) {
        let mem = Arc::new(MemBackend::new());
        (mem.clone(), LockedBackend::new(mem))
    }

    #[test]
    fn create_makes_parent_directories() {
        let (mem, fs) = locked();
        let mut file = fs.create("/deep/nested/file.txt").unwrap();
        file.write_all(b"payload").unwrap();
        drop(file);
        assert!(mem.stat("/deep/nested").unwrap().is_dir());
        assert_eq!(mem.stat("/deep/nested/file.txt").unwrap().size, 7);
    }

    #[test]
    fn scoped_file_sections() {
        let (_, fs) = locked();
        fs.lock_file("/counter.txt", |file| {
            file.write_all(b"1")?;
            Ok(())
        })
        .unwrap();
        let contents = fs
            .read_lock_file("/counter.txt", |file| {
                let mut out = String::new();
                file.read_to_string(&mut out)?;
                Ok(out)
            })
            .unwrap();
        assert_eq!(contents, "1");
    }

    #[test]
    fn concurrent_writers_do_not_corrupt() {
        let (_, fs) = locked();
        let fs = Arc::new(fs);
        let mut handles = Vec::new();
        for worker in 0..8 {
            let fs = fs.clone();
            handles.push(std::thread::spawn(move || {
                for round in 0..20 {
                    let path = format!("/w{worker}/f{round}.txt");
                    let mut file = fs.create(&path).unwrap();
                    file.write_all(b"data").unwrap();
                    drop(file);
                    assert_eq!(fs.stat(&path).unwrap().size, 4);
                    fs.remove(&path).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
