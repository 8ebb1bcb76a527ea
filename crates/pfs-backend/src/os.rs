//! Host filesystem backend.
//!
//! Paths pass through to `std::fs` unchanged; compose under
//! [`crate::BasePathBackend`] to confine a backend to a host directory.
//! Symlink, readlink and lstat capabilities are available on Unix.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

use pfs_error::{Result, VfsError};

use crate::{
    base_name, page_entries, Backend, BoxFile, File, FileMode, LstatBackend, Metadata, OpenFlags,
    ReadlinkBackend, SymlinkBackend,
};

/// Host passthrough backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsBackend;

impl OsBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn convert(path: &str, meta: &fs::Metadata) -> Metadata {
        Metadata {
            name: base_name(path).to_owned(),
            size: meta.len(),
            mode: host_mode(meta),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

#[cfg(unix)]
fn host_mode(meta: &fs::Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;
    let perm = meta.permissions().mode() & 0o7777;
    if meta.is_dir() {
        FileMode::dir(perm)
    } else {
        FileMode::file(perm)
    }
}

#[cfg(not(unix))]
fn host_mode(meta: &fs::Metadata) -> FileMode {
    let perm = if meta.permissions().readonly() {
        0o555
    } else {
        0o755
    };
    if meta.is_dir() {
        FileMode::dir(perm)
    } else {
        FileMode::file(perm)
    }
}

impl Backend for OsBackend {
    fn name(&self) -> &str {
        "os"
    }

    fn create(&self, path: &str) -> Result<BoxFile> {
        let file = fs::File::create(path)?;
        Ok(Box::new(OsFile {
            path: path.to_owned(),
            file,
            readable: false,
            writable: true,
        }))
    }

    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<BoxFile> {
        let meta = fs::metadata(path);
        if let Ok(meta) = &meta {
            if meta.is_dir() {
                if flags.is_write_like() {
                    return Err(VfsError::IsDirectory(path.to_owned()));
                }
                return OsDirHandle::open(path);
            }
        }
        let mut options = fs::OpenOptions::new();
        options
            .read(flags.read)
            .write(flags.write)
            .append(flags.append)
            .truncate(flags.truncate)
            .create(flags.create)
            .create_new(flags.create_new);
        #[cfg(unix)]
        if flags.create || flags.create_new {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode.perm());
        }
        #[cfg(not(unix))]
        let _ = mode;
        let file = options.open(path)?;
        Ok(Box::new(OsFile {
            path: path.to_owned(),
            file,
            readable: flags.read,
            writable: flags.is_write_like(),
        }))
    }

    fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        fs::create_dir(path)?;
        self.chmod(path, mode)
    }

    fn mkdir_all(&self, path: &str, _mode: FileMode) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        match fs::symlink_metadata(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
            Ok(meta) if meta.is_dir() => Ok(fs::remove_dir_all(path)?),
            Ok(_) => Ok(fs::remove_file(path)?),
        }
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        fs::rename(old, new)?;
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        let meta = fs::metadata(path)?;
        Ok(Self::convert(path, &meta))
    }

    #[cfg(unix)]
    fn chmod(&self, path: &str, mode: FileMode) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode.perm()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn chmod(&self, _path: &str, _mode: FileMode) -> Result<()> {
        Err(VfsError::NotSupported("chmod"))
    }

    #[cfg(unix)]
    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> Result<()> {
        Err(VfsError::NotSupported("chown"))
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let file = fs::File::open(path)?;
        let times = fs::FileTimes::new().set_accessed(atime).set_modified(mtime);
        file.set_times(times)?;
        Ok(())
    }

    #[cfg(unix)]
    fn symlinks(&self) -> Option<&dyn SymlinkBackend> {
        Some(self)
    }

    #[cfg(unix)]
    fn readlinks(&self) -> Option<&dyn ReadlinkBackend> {
        Some(self)
    }

    fn lstater(&self) -> Option<&dyn LstatBackend> {
        Some(self)
    }
}

#[cfg(unix)]
impl SymlinkBackend for OsBackend {
    fn symlink(&self, target: &str, link: &str) -> Result<()> {
        std::os::unix::fs::symlink(target, link)?;
        Ok(())
    }
}

#[cfg(not(unix))]
impl SymlinkBackend for OsBackend {
    fn symlink(&self, _target: &str, _link: &str) -> Result<()> {
        Err(VfsError::NotSupported("symlink"))
    }
}

impl ReadlinkBackend for OsBackend {
    fn readlink(&self, path: &str) -> Result<String> {
        let target = fs::read_link(path)?;
        target
            .into_os_string()
            .into_string()
            .map_err(|_| VfsError::InvalidArgument(format!("{path}: non-UTF-8 link target")))
    }
}

impl LstatBackend for OsBackend {
    fn lstat(&self, path: &str) -> Result<Metadata> {
        let meta = fs::symlink_metadata(path)?;
        Ok(Self::convert(path, &meta))
    }
}

// ── Handles ─────────────────────────────────────────────────────────────────

struct OsFile {
    path: String,
    file: fs::File,
    readable: bool,
    writable: bool,
}

impl Read for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.readable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for reading",
            ));
        }
        self.file.read(buf)
    }
}

impl Write for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for OsFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl File for OsFile {
    fn name(&self) -> &str {
        &self.path
    }

    fn stat(&self) -> Result<Metadata> {
        let meta = self.file.metadata()?;
        Ok(OsBackend::convert(&self.path, &meta))
    }

    fn read_dir(&mut self, _count: isize) -> Result<Vec<Metadata>> {
        Err(VfsError::NotDirectory(self.path.clone()))
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.writable {
            return Err(VfsError::PermissionDenied(self.path.clone()));
        }
        self.file.set_len(size)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

struct OsDirHandle {
    path: String,
    meta: Metadata,
    entries: Vec<Metadata>,
    offset: usize,
}

impl OsDirHandle {
    fn open(path: &str) -> Result<BoxFile> {
        let meta = fs::metadata(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| VfsError::InvalidArgument(format!("{path}: non-UTF-8 entry")))?;
            let entry_meta = entry.metadata()?;
            entries.push(Metadata {
                name,
                size: entry_meta.len(),
                mode: host_mode(&entry_meta),
                modified: entry_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Box::new(Self {
            path: path.to_owned(),
            meta: OsBackend::convert(path, &meta),
            entries,
            offset: 0,
        }))
    }
}

impl Read for OsDirHandle {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other(format!("{}: is a directory", self.path)))
    }
}

impl Write for OsDirHandle {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other(format!("{}: is a directory", self.path)))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for OsDirHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if pos == SeekFrom::Start(0) {
            self.offset = 0;
        }
        Ok(0)
    }
}

impl File for OsDirHandle {
    fn name(&self) -> &str {
        &self.path
    }

    fn stat(&self) -> Result<Metadata> {
        Ok(self.meta.clone())
    }

    fn read_dir(&mut self, count: isize) -> Result<Vec<Metadata>> {
        page_entries(&self.entries, &mut self.offset, count)
    }

    fn truncate(&mut self, _size: u64) -> Result<()> {
        Err(VfsError::IsDirectory(self.path.clone()))
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
