#![forbid(unsafe_code)]
//! Backend filesystem abstraction.
//!
//! A backend is a root-relative filesystem (all paths start with `/`)
//! satisfying the capability set the virtual mount filesystem dispatches to.
//! Optional capabilities (symlink, readlink, lstat) are discovered at runtime
//! through the probing accessors on [`Backend`].
//!
//! The crate also ships the utility backends the daemon composes from:
//! host passthrough ([`OsBackend`]), in-memory ([`MemBackend`]), read-only
//! ([`ReadOnlyBackend`]) and host-path prefixing ([`BasePathBackend`]).

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use pfs_error::{Result, VfsError};

mod mem;
mod os;
mod prefix;
mod readonly;

pub use mem::MemBackend;
pub use os::OsBackend;
pub use prefix::BasePathBackend;
pub use readonly::ReadOnlyBackend;

// ── File metadata ───────────────────────────────────────────────────────────

/// File mode: a directory bit plus Unix permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    const DIR_BIT: u32 = 0o040_000;

    /// Mode of a regular file with the given permission bits.
    #[must_use]
    pub const fn file(perm: u32) -> Self {
        Self(perm & 0o7777)
    }

    /// Mode of a directory with the given permission bits.
    #[must_use]
    pub const fn dir(perm: u32) -> Self {
        Self(Self::DIR_BIT | (perm & 0o7777))
    }

    #[must_use]
    pub const fn is_dir(self) -> bool {
        self.0 & Self::DIR_BIT != 0
    }

    #[must_use]
    pub const fn perm(self) -> u32 {
        self.0 & 0o7777
    }

    /// `ls -l` style rendering, e.g. `drwxr-xr-x`.
    #[must_use]
    pub fn render(self) -> String {
        let mut out = String::with_capacity(10);
        out.push(if self.is_dir() { 'd' } else { '-' });
        for shift in [6u32, 3, 0] {
            let bits = (self.perm() >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }
}

/// Metadata for a file, directory or listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub size: u64,
    pub mode: FileMode,
    pub modified: SystemTime,
}

impl Metadata {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

// ── Open flags ──────────────────────────────────────────────────────────────

/// Open disposition for [`Backend::open_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
}

impl OpenFlags {
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn write_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// True when the flags demand anything beyond reading. The read-only and
    /// locking wrappers branch on this.
    #[must_use]
    pub fn is_write_like(self) -> bool {
        self.write || self.append || self.create || self.create_new || self.truncate
    }
}

// ── File handle ─────────────────────────────────────────────────────────────

/// An open file or directory handle.
///
/// Directory handles answer `read_dir`/`read_dir_names`; regular files answer
/// the `io` traits. The paged read contract: `count <= 0` drains the rest
/// (empty vector at the end, never an error); `count > 0` returns up to
/// `count` entries and `VfsError::EndOfDirectory` once exhausted.
pub trait File: io::Read + io::Write + io::Seek + Send {
    fn name(&self) -> &str;

    fn stat(&self) -> Result<Metadata>;

    fn read_dir(&mut self, count: isize) -> Result<Vec<Metadata>>;

    fn read_dir_names(&mut self, count: isize) -> Result<Vec<String>> {
        Ok(self
            .read_dir(count)?
            .into_iter()
            .map(|meta| meta.name)
            .collect())
    }

    fn truncate(&mut self, size: u64) -> Result<()>;

    fn sync(&mut self) -> Result<()>;
}

impl fmt::Debug for dyn File + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File").field("name", &self.name()).finish()
    }
}

pub type BoxFile = Box<dyn File>;

/// Shared state machine for paged directory reads over a materialized list.
pub fn page_entries<T: Clone>(entries: &[T], offset: &mut usize, count: isize) -> Result<Vec<T>> {
    if *offset >= entries.len() {
        if count <= 0 {
            return Ok(Vec::new());
        }
        return Err(VfsError::EndOfDirectory);
    }
    let start = *offset;
    let end = if count > 0 {
        entries.len().min(start.saturating_add(count as usize))
    } else {
        entries.len()
    };
    *offset = end;
    Ok(entries[start..end].to_vec())
}

// ── Backend capability set ──────────────────────────────────────────────────

/// The capability set a backing filesystem must satisfy.
pub trait Backend: Send + Sync {
    /// Short identifier for diagnostics (`os`, `mem`, ...).
    fn name(&self) -> &str;

    /// Create (or truncate) a regular file and open it read-write.
    fn create(&self, path: &str) -> Result<BoxFile>;

    /// Open for reading.
    fn open(&self, path: &str) -> Result<BoxFile> {
        self.open_file(path, OpenFlags::read_only(), FileMode::file(0))
    }

    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<BoxFile>;

    fn mkdir(&self, path: &str, mode: FileMode) -> Result<()>;

    fn mkdir_all(&self, path: &str, mode: FileMode) -> Result<()>;

    /// Remove a file or empty directory.
    fn remove(&self, path: &str) -> Result<()>;

    /// Remove a subtree; absent paths are not an error.
    fn remove_all(&self, path: &str) -> Result<()>;

    fn rename(&self, old: &str, new: &str) -> Result<()>;

    fn stat(&self, path: &str) -> Result<Metadata>;

    fn chmod(&self, path: &str, mode: FileMode) -> Result<()>;

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()>;

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    /// Capability probe: symlink creation.
    fn symlinks(&self) -> Option<&dyn SymlinkBackend> {
        None
    }

    /// Capability probe: symlink target resolution.
    fn readlinks(&self) -> Option<&dyn ReadlinkBackend> {
        None
    }

    /// Capability probe: stat without following the final symlink.
    fn lstater(&self) -> Option<&dyn LstatBackend> {
        None
    }
}

/// Optional capability: create symbolic links.
pub trait SymlinkBackend {
    fn symlink(&self, target: &str, link: &str) -> Result<()>;
}

/// Optional capability: read symbolic link targets.
pub trait ReadlinkBackend {
    fn readlink(&self, path: &str) -> Result<String>;
}

/// Optional capability: stat without following the final symlink.
pub trait LstatBackend {
    fn lstat(&self, path: &str) -> Result<Metadata>;
}

/// Shared handle to a backend; mount tables and composers clone these.
pub type SharedBackend = Arc<dyn Backend>;

/// Final path segment, `/` for the root itself.
#[must_use]
pub fn base_name(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit('/').next() {
        Some("") | None => "/",
        Some(name) => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_render() {
        assert_eq!(FileMode::dir(0o755).render(), "drwxr-xr-x");
        assert_eq!(FileMode::file(0o644).render(), "-rw-r--r--");
        assert!(FileMode::dir(0o755).is_dir());
        assert!(!FileMode::file(0o644).is_dir());
        assert_eq!(FileMode::dir(0o755).perm(), 0o755);
    }

    #[test]
    fn base_name_segments() {
        assert_eq!(base_name("/"), "/");
        assert_eq!(base_name("/a"), "a");
        assert_eq!(base_name("/a/b.txt"), "b.txt");
        assert_eq!(base_name("/a/b/"), "b");
    }

    #[test]
    fn paging_contract() {
        let entries = vec![1, 2, 3];
        let mut offset = 0;
        assert_eq!(page_entries(&entries, &mut offset, 2).unwrap(), vec![1, 2]);
        assert_eq!(page_entries(&entries, &mut offset, 2).unwrap(), vec![3]);
        assert!(matches!(
            page_entries(&entries, &mut offset, 1),
            Err(VfsError::EndOfDirectory)
        ));
        // count <= 0 at the end is an empty slice, not end-of-stream.
        assert_eq!(page_entries(&entries, &mut offset, 0).unwrap(), Vec::<i32>::new());
        assert_eq!(page_entries(&entries, &mut offset, -1).unwrap(), Vec::<i32>::new());

        let mut offset = 0;
        assert_eq!(page_entries(&entries, &mut offset, -1).unwrap(), vec![1, 2, 3]);
    }
}
