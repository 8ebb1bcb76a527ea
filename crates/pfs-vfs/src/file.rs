//! Merged directory handles.
//!
//! Opening a directory through [`crate::MountFs`] yields a handle whose
//! listing fuses three entry kinds: entries read from the backing filesystem,
//! mount-point entries for prefixes attaching directly under the directory,
//! and synthesized virtual directories for interior segments of deeper
//! prefixes. The merge happens once at open time; reads page over the
//! materialized, name-sorted list.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

use pfs_backend::{base_name, page_entries, BoxFile, File, FileMode, Metadata, SharedBackend};
use pfs_error::{Result, VfsError};

use crate::MountFs;

/// Listing entry for a mount attached directly under a directory. Mode and
/// mtime reflect the mounted backend's root when it stats cleanly, else the
/// synthetic directory shape.
pub(crate) fn mount_point_metadata(name: &str, backend: &SharedBackend) -> Metadata {
    match backend.stat("/") {
        Ok(root) => Metadata {
            name: name.to_owned(),
            size: 0,
            mode: root.mode,
            modified: root.modified,
        },
        Err(_) => virtual_dir_metadata(name),
    }
}

/// Listing entry for an interior segment of a deeper mount prefix.
pub(crate) fn virtual_dir_metadata(name: &str) -> Metadata {
    Metadata {
        name: name.to_owned(),
        size: 0,
        mode: FileMode::dir(0o755),
        modified: SystemTime::UNIX_EPOCH,
    }
}

/// Directory handle that splices mount-derived entries into the backend
/// listing. `inner` is absent for purely virtual directories.
pub(crate) struct MountDirFile {
    inner: Option<BoxFile>,
    path: String,
    entries: Vec<Metadata>,
    offset: usize,
}

impl MountDirFile {
    pub(crate) fn new(inner: Option<BoxFile>, fs: &MountFs, path: &str) -> Result<Self> {
        let mut inner = inner;
        let mut merged: BTreeMap<String, Metadata> = BTreeMap::new();

        if let Some(file) = inner.as_mut() {
            for entry in file.read_dir(-1)? {
                merged.insert(entry.name.clone(), entry);
            }
        }

        for mount in fs.mounts_under(path) {
            let below = mount
                .prefix
                .strip_prefix(path)
                .unwrap_or(mount.prefix.as_str())
                .trim_start_matches('/');
            let mut segments = below.splitn(2, '/');
            let first = segments.next().unwrap_or("");
            if first.is_empty() {
                continue;
            }
            if segments.next().is_none() {
                // Direct mount: always wins over a same-named backend entry.
                merged.insert(
                    first.to_owned(),
                    mount_point_metadata(first, &mount.backend),
                );
            } else if !merged.contains_key(first) {
                merged.insert(first.to_owned(), virtual_dir_metadata(first));
            }
        }

        Ok(Self {
            inner,
            path: path.to_owned(),
            entries: merged.into_values().collect(),
            offset: 0,
        })
    }
}

impl Read for MountDirFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(file) => file.read(buf),
            None => Err(io::Error::other(format!("{}: is a directory", self.path))),
        }
    }
}

impl Write for MountDirFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other(format!("{}: is a directory", self.path))),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Seek for MountDirFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if pos == SeekFrom::Start(0) {
            self.offset = 0;
        }
        match self.inner.as_mut() {
            Some(file) => file.seek(pos),
            None => Ok(0),
        }
    }
}

impl File for MountDirFile {
    fn name(&self) -> &str {
        &self.path
    }

    fn stat(&self) -> Result<Metadata> {
        match self.inner.as_ref() {
            Some(file) => file.stat(),
            None => Ok(virtual_dir_metadata(base_name(&self.path))),
        }
    }

    fn read_dir(&mut self, count: isize) -> Result<Vec<Metadata>> {
        page_entries(&self.entries, &mut self.offset, count)
    }

    fn truncate(&mut self, _size: u64) -> Result<()> {
        Err(VfsError::IsDirectory(self.path.clone()))
    }

    fn sync(&mut self) -> Result<()> {
        match self.inner.as_mut() {
            Some(file) => file.sync(),
            None => Ok(()),
        }
    }
}
