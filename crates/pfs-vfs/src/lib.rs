#![forbid(unsafe_code)]
//! Virtual mount filesystem.
//!
//! [`MountFs`] presents one hierarchical namespace assembled by grafting
//! independent backends onto path prefixes, with a default backend catching
//! unmatched paths. Directory listings merge real backend entries with
//! mount-point and synthesized virtual-directory entries; destructive
//! operations that would take mount structure with them are refused; renames
//! crossing backends degrade to recursive copy-then-delete.
//!
//! `MountFs` itself implements [`Backend`], so a composed namespace can be
//! wrapped (read-only, locked) or mounted again like any other backend.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use pfs_backend::{
    base_name, Backend, BoxFile, FileMode, LstatBackend, Metadata, OpenFlags, OsBackend,
    ReadlinkBackend, SharedBackend, SymlinkBackend,
};
use pfs_error::{Result, VfsError};

mod file;
pub mod path;
mod rename;
mod table;

pub use path::normalize;
pub use table::Mount;

use file::{mount_point_metadata, virtual_dir_metadata, MountDirFile};
use table::MountTable;

/// How a path statted: a mount point, a real backend object, or a virtual
/// directory synthesized from deeper mount prefixes. The distinction drives
/// `open`, which must hand out a synthetic handle for the virtual case.
enum StatKind {
    MountPoint(Metadata),
    Backend(Metadata),
    Virtual(Metadata),
}

impl StatKind {
    fn into_metadata(self) -> Metadata {
        match self {
            Self::MountPoint(meta) | Self::Backend(meta) | Self::Virtual(meta) => meta,
        }
    }
}

struct MountFsInner {
    table: RwLock<MountTable>,
    default: SharedBackend,
}

/// The virtual mount filesystem. Cheap to clone; clones share one mount
/// table and default backend.
#[derive(Clone)]
pub struct MountFs {
    inner: Arc<MountFsInner>,
}

impl MountFs {
    /// Build a VMFS over `default`. Passing `None` falls back to the host
    /// filesystem, so the default backend is always present.
    #[must_use]
    pub fn new(default: Option<SharedBackend>) -> Self {
        let default = default.unwrap_or_else(|| Arc::new(OsBackend::new()));
        Self {
            inner: Arc::new(MountFsInner {
                table: RwLock::new(MountTable::default()),
                default,
            }),
        }
    }

    // ── Mount table surface ─────────────────────────────────────────────

    /// Attach `backend` at `prefix`. The prefix is normalized first and must
    /// not be `/` (that slot belongs to the default backend) or collide with
    /// an existing mount.
    pub fn mount(&self, prefix: &str, backend: SharedBackend) -> Result<()> {
        let prefix = normalize(prefix);
        if prefix == "/" {
            return Err(VfsError::InvalidArgument(
                "mount prefix must not be /".to_owned(),
            ));
        }
        self.inner.table.write().insert(prefix, backend)
    }

    /// Detach the mount at `prefix`; reports whether one was removed.
    pub fn unmount(&self, prefix: &str) -> bool {
        self.inner.table.write().remove(&normalize(prefix))
    }

    /// Longest-prefix resolution of `path` to a backend and the path to pass
    /// it. The relative path always starts with `/`; the mount root itself
    /// resolves to `/`. Unmatched paths land on the default backend.
    #[must_use]
    pub fn resolve(&self, path: &str) -> (SharedBackend, String) {
        let path = normalize(path);
        if path == "/" {
            return (self.inner.default.clone(), path);
        }
        if let Some(found) = self.inner.table.read().resolve(&path) {
            return found;
        }
        (self.inner.default.clone(), path)
    }

    /// Snapshot of the mount table in longest-prefix-first order.
    #[must_use]
    pub fn list_mounts(&self) -> Vec<Mount> {
        self.inner.table.read().snapshot()
    }

    /// Resolution plus the matched prefix (`/` for the default backend).
    #[must_use]
    pub fn mount_info(&self, path: &str) -> (String, SharedBackend, String) {
        let path = normalize(path);
        for mount in self.inner.table.read().snapshot() {
            if path == mount.prefix {
                return (mount.prefix, mount.backend, "/".to_owned());
            }
            if path.starts_with(&mount.prefix)
                && path.as_bytes().get(mount.prefix.len()) == Some(&b'/')
            {
                let rel = path[mount.prefix.len()..].to_owned();
                return (mount.prefix, mount.backend, rel);
            }
        }
        ("/".to_owned(), self.inner.default.clone(), path)
    }

    /// True when a mount is bound at exactly `dir`.
    #[must_use]
    pub fn is_direct_mount(&self, dir: &str) -> bool {
        self.inner.table.read().direct(&normalize(dir)).is_some()
    }

    /// True when some mount prefix lies strictly below `dir`.
    #[must_use]
    pub fn has_child_mount(&self, dir: &str) -> bool {
        self.inner.table.read().has_child(&normalize(dir))
    }

    pub(crate) fn mounts_under(&self, dir: &str) -> Vec<Mount> {
        self.inner.table.read().mounts_under(dir)
    }

    fn direct_mount(&self, dir: &str) -> Option<Mount> {
        self.inner.table.read().direct(dir)
    }

    // ── Stat ────────────────────────────────────────────────────────────

    /// Three-stage stat: a direct mount wins over backend content, backend
    /// content wins over virtual-directory synthesis, and only a not-found
    /// backend answer falls through to the virtual check.
    fn stat_kind(&self, name: &str) -> Result<StatKind> {
        let name = normalize(name);

        if let Some(mount) = self.direct_mount(&name) {
            return Ok(StatKind::MountPoint(mount_point_metadata(
                base_name(&name),
                &mount.backend,
            )));
        }

        let (backend, rel) = self.resolve(&name);
        let err = match backend.stat(&rel) {
            Ok(meta) => return Ok(StatKind::Backend(meta)),
            Err(err) if !err.is_not_found() => return Err(err),
            Err(err) => err,
        };

        let is_ancestor = self.inner.table.read().snapshot().into_iter().any(|mount| {
            mount.prefix != name
                && (name == "/"
                    || (mount.prefix.starts_with(&name)
                        && mount.prefix.as_bytes().get(name.len()) == Some(&b'/')))
        });
        if is_ancestor {
            return Ok(StatKind::Virtual(virtual_dir_metadata(base_name(&name))));
        }
        Err(err)
    }

    pub fn stat(&self, name: &str) -> Result<Metadata> {
        self.stat_kind(name).map(StatKind::into_metadata)
    }

    /// Lstat where the resolved backend supports it; otherwise fall back to
    /// `stat` and report `false` for the second element.
    pub fn lstat(&self, name: &str) -> Result<(Metadata, bool)> {
        let (backend, rel) = self.resolve(name);
        match backend.lstater() {
            Some(capability) => Ok((capability.lstat(&rel)?, true)),
            None => Ok((backend.stat(&rel)?, false)),
        }
    }

    // ── Open / create ───────────────────────────────────────────────────

    pub fn create(&self, name: &str) -> Result<BoxFile> {
        let (backend, rel) = self.resolve(name);
        backend.create(&rel)
    }

    pub fn open(&self, name: &str) -> Result<BoxFile> {
        self.open_file(name, OpenFlags::read_only(), FileMode::file(0))
    }

    /// Open through the mount table. Directories come back wrapped in the
    /// merged handle; a purely virtual directory yields a synthetic handle
    /// with no backend beneath it.
    pub fn open_file(&self, name: &str, flags: OpenFlags, mode: FileMode) -> Result<BoxFile> {
        let name = normalize(name);
        if !flags.is_write_like() {
            if let Ok(StatKind::Virtual(_)) = self.stat_kind(&name) {
                return Ok(Box::new(MountDirFile::new(None, self, &name)?));
            }
        }
        let (backend, rel) = self.resolve(&name);
        let file = backend.open_file(&rel, flags, mode)?;
        let meta = file.stat()?;
        if meta.is_dir() {
            return Ok(Box::new(MountDirFile::new(Some(file), self, &name)?));
        }
        Ok(file)
    }

    // ── Directory creation ──────────────────────────────────────────────

    pub fn mkdir(&self, name: &str, mode: FileMode) -> Result<()> {
        let name = normalize(name);
        if self.is_direct_mount(&name) {
            return Err(VfsError::AlreadyExists(name));
        }
        let (backend, rel) = self.resolve(&name);
        backend.mkdir(&rel, mode)
    }

    pub fn mkdir_all(&self, name: &str, mode: FileMode) -> Result<()> {
        let name = normalize(name);
        if self.is_direct_mount(&name) {
            return Err(VfsError::AlreadyExists(name));
        }
        let (backend, rel) = self.resolve(&name);
        backend.mkdir_all(&rel, mode)
    }

    // ── Removal ─────────────────────────────────────────────────────────

    pub fn remove(&self, name: &str) -> Result<()> {
        let name = normalize(name);
        if self.is_direct_mount(&name) {
            return Err(VfsError::PermissionDenied(name));
        }
        if self.has_child_mount(&name) {
            return Err(VfsError::MountConflict { path: name });
        }
        let (backend, rel) = self.resolve(&name);
        backend.remove(&rel)
    }

    pub fn remove_all(&self, name: &str) -> Result<()> {
        let name = normalize(name);
        if self.has_child_mount(&name) {
            return Err(VfsError::MountConflict { path: name });
        }
        if self.is_direct_mount(&name) {
            return Err(VfsError::PermissionDenied(name));
        }
        let (backend, rel) = self.resolve(&name);
        backend.remove_all(&rel)
    }

    // ── Rename ──────────────────────────────────────────────────────────

    /// Same-backend renames forward; crossing backends degrades to a
    /// recursive, non-atomic copy-then-delete.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old = normalize(old);
        let new = normalize(new);
        if self.has_child_mount(&old) {
            return Err(VfsError::MountConflict { path: old });
        }
        let (old_backend, old_rel) = self.resolve(&old);
        let (new_backend, new_rel) = self.resolve(&new);
        if Arc::ptr_eq(&old_backend, &new_backend) {
            return old_backend.rename(&old_rel, &new_rel);
        }
        rename::cross_rename(&old_backend, &old_rel, &new_backend, &new_rel)
    }

    // ── Attribute forwarding ────────────────────────────────────────────

    pub fn chmod(&self, name: &str, mode: FileMode) -> Result<()> {
        let (backend, rel) = self.resolve(name);
        backend.chmod(&rel, mode)
    }

    pub fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let (backend, rel) = self.resolve(name);
        backend.chown(&rel, uid, gid)
    }

    pub fn chtimes(&self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let (backend, rel) = self.resolve(name);
        backend.chtimes(&rel, atime, mtime)
    }

    // ── Links ───────────────────────────────────────────────────────────

    /// Symlinks are delegated and only permitted when both paths land on the
    /// same backend.
    pub fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let (target_backend, target_rel) = self.resolve(target);
        let (link_backend, link_rel) = self.resolve(link);
        if !Arc::ptr_eq(&target_backend, &link_backend) {
            return Err(VfsError::InvalidArgument(format!(
                "symlink {target} -> {link} crosses backends"
            )));
        }
        match link_backend.symlinks() {
            Some(capability) => capability.symlink(&target_rel, &link_rel),
            None => Err(VfsError::NotSupported("symlink")),
        }
    }

    pub fn readlink(&self, name: &str) -> Result<String> {
        let (backend, rel) = self.resolve(name);
        match backend.readlinks() {
            Some(capability) => capability.readlink(&rel),
            None => Err(VfsError::NotSupported("readlink")),
        }
    }
}

// The VMFS is itself a backend, so composed namespaces can be wrapped or
// remounted like any other filesystem.
impl Backend for MountFs {
    fn name(&self) -> &str {
        "mountfs"
    }

    fn create(&self, path: &str) -> Result<BoxFile> {
        MountFs::create(self, path)
    }

    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<BoxFile> {
        MountFs::open_file(self, path, flags, mode)
    }

    fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        MountFs::mkdir(self, path, mode)
    }

    fn mkdir_all(&self, path: &str, mode: FileMode) -> Result<()> {
        MountFs::mkdir_all(self, path, mode)
    }

    fn remove(&self, path: &str) -> Result<()> {
        MountFs::remove(self, path)
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        MountFs::remove_all(self, path)
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        MountFs::rename(self, old, new)
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        MountFs::stat(self, path)
    }

    fn chmod(&self, path: &str, mode: FileMode) -> Result<()> {
        MountFs::chmod(self, path, mode)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        MountFs::chown(self, path, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        MountFs::chtimes(self, path, atime, mtime)
    }

    fn symlinks(&self) -> Option<&dyn SymlinkBackend> {
        Some(self)
    }

    fn readlinks(&self) -> Option<&dyn ReadlinkBackend> {
        Some(self)
    }

    fn lstater(&self) -> Option<&dyn LstatBackend> {
        Some(self)
    }
}

impl SymlinkBackend for MountFs {
    fn symlink(&self, target: &str, link: &str) -> Result<()> {
        MountFs::symlink(self, target, link)
    }
}

impl ReadlinkBackend for MountFs {
    fn readlink(&self, path: &str) -> Result<String> {
        MountFs::readlink(self, path)
    }
}

impl LstatBackend for MountFs {
    fn lstat(&self, path: &str) -> Result<Metadata> {
        MountFs::lstat(self, path).map(|(meta, _)| meta)
    }
}
