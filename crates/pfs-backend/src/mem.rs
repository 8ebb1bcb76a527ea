//! In-memory backend.
//!
//! A tree of directories (sorted child maps) and files (byte vectors), each
//! node carrying its own mode and mtime. Creating a file materializes any
//! missing parent directories, which the per-user composer relies on when
//! seeding welcome files.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use pfs_error::{Result, VfsError};

use crate::{base_name, page_entries, Backend, BoxFile, File, FileMode, Metadata, OpenFlags};

const DEFAULT_DIR_PERM: u32 = 0o755;
const DEFAULT_FILE_PERM: u32 = 0o644;

struct NodeMeta {
    mode: FileMode,
    modified: SystemTime,
    uid: u32,
    gid: u32,
}

impl NodeMeta {
    fn new(mode: FileMode) -> Self {
        Self {
            mode,
            modified: SystemTime::now(),
            uid: 0,
            gid: 0,
        }
    }
}

struct FileNode {
    meta: RwLock<NodeMeta>,
    data: RwLock<Vec<u8>>,
}

struct DirNode {
    meta: RwLock<NodeMeta>,
    children: RwLock<BTreeMap<String, Node>>,
}

impl DirNode {
    fn new(mode: FileMode) -> Arc<Self> {
        Arc::new(Self {
            meta: RwLock::new(NodeMeta::new(mode)),
            children: RwLock::new(BTreeMap::new()),
        })
    }
}

#[derive(Clone)]
enum Node {
    File(Arc<FileNode>),
    Dir(Arc<DirNode>),
}

impl Node {
    fn metadata(&self, name: &str) -> Metadata {
        match self {
            Self::File(file) => {
                let meta = file.meta.read();
                Metadata {
                    name: name.to_owned(),
                    size: file.data.read().len() as u64,
                    mode: meta.mode,
                    modified: meta.modified,
                }
            }
            Self::Dir(dir) => {
                let meta = dir.meta.read();
                Metadata {
                    name: name.to_owned(),
                    size: 0,
                    mode: meta.mode,
                    modified: meta.modified,
                }
            }
        }
    }

    fn meta_lock(&self) -> &RwLock<NodeMeta> {
        match self {
            Self::File(file) => &file.meta,
            Self::Dir(dir) => &dir.meta,
        }
    }
}

/// In-memory filesystem rooted at `/`. Clones share the same tree.
#[derive(Clone)]
pub struct MemBackend {
    root: Arc<DirNode>,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: DirNode::new(FileMode::dir(DEFAULT_DIR_PERM)),
        }
    }

    /// Convenience for seeding fixture content.
    pub fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let mut file = self.create(path)?;
        file.write_all(contents)?;
        file.sync()
    }

    fn segments(path: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    out.pop();
                }
                other => out.push(other),
            }
        }
        out
    }

    fn lookup(&self, path: &str) -> Result<Node> {
        let segments = Self::segments(path);
        let mut current = Node::Dir(self.root.clone());
        for segment in segments {
            let dir = match &current {
                Node::Dir(dir) => dir.clone(),
                Node::File(_) => return Err(VfsError::NotDirectory(path.to_owned())),
            };
            let next = dir
                .children
                .read()
                .get(segment)
                .cloned()
                .ok_or_else(|| VfsError::NotFound(path.to_owned()))?;
            current = next;
        }
        Ok(current)
    }

    /// Walk to the parent of `path`, optionally creating missing directories.
    fn parent_of(&self, path: &str, create: bool) -> Result<(Arc<DirNode>, String)> {
        let mut segments = Self::segments(path);
        let name = segments
            .pop()
            .ok_or_else(|| VfsError::InvalidArgument(format!("{path}: no file name")))?;
        let mut current = self.root.clone();
        for segment in segments {
            let existing = current.children.read().get(segment).cloned();
            current = match existing {
                Some(Node::Dir(dir)) => dir,
                Some(Node::File(_)) => return Err(VfsError::NotDirectory(path.to_owned())),
                None if create => {
                    let dir = DirNode::new(FileMode::dir(DEFAULT_DIR_PERM));
                    current
                        .children
                        .write()
                        .insert(segment.to_owned(), Node::Dir(dir.clone()));
                    dir
                }
                None => return Err(VfsError::NotFound(path.to_owned())),
            };
        }
        Ok((current, name.to_owned()))
    }

    fn dir_handle(path: &str, dir: &Arc<DirNode>) -> BoxFile {
        let entries = dir
            .children
            .read()
            .iter()
            .map(|(name, node)| node.metadata(name))
            .collect();
        Box::new(MemDirHandle {
            path: path.to_owned(),
            meta: Node::Dir(dir.clone()).metadata(base_name(path)),
            entries,
            offset: 0,
        })
    }
}

impl Backend for MemBackend {
    fn name(&self) -> &str {
        "mem"
    }

    fn create(&self, path: &str) -> Result<BoxFile> {
        let (parent, name) = self.parent_of(path, true)?;
        let node = {
            let mut children = parent.children.write();
            let existing = children.get(&name).cloned();
            match existing {
                Some(Node::Dir(_)) => return Err(VfsError::IsDirectory(path.to_owned())),
                Some(Node::File(file)) => {
                    file.data.write().clear();
                    file.meta.write().modified = SystemTime::now();
                    file
                }
                None => {
                    let file = Arc::new(FileNode {
                        meta: RwLock::new(NodeMeta::new(FileMode::file(DEFAULT_FILE_PERM))),
                        data: RwLock::new(Vec::new()),
                    });
                    children.insert(name.clone(), Node::File(file.clone()));
                    file
                }
            }
        };
        Ok(Box::new(MemFile {
            name: path.to_owned(),
            node,
            pos: 0,
            flags: OpenFlags::write_truncate(),
        }))
    }

    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<BoxFile> {
        if Self::segments(path).is_empty() {
            if flags.is_write_like() {
                return Err(VfsError::IsDirectory(path.to_owned()));
            }
            return Ok(Self::dir_handle(path, &self.root));
        }
        match self.lookup(path) {
            Ok(Node::Dir(dir)) => {
                if flags.is_write_like() {
                    Err(VfsError::IsDirectory(path.to_owned()))
                } else {
                    Ok(Self::dir_handle(path, &dir))
                }
            }
            Ok(Node::File(file)) => {
                if flags.create_new {
                    return Err(VfsError::AlreadyExists(path.to_owned()));
                }
                if flags.truncate {
                    file.data.write().clear();
                    file.meta.write().modified = SystemTime::now();
                }
                Ok(Box::new(MemFile {
                    name: path.to_owned(),
                    node: file,
                    pos: 0,
                    flags,
                }))
            }
            Err(err) if err.is_not_found() && (flags.create || flags.create_new) => {
                let (parent, name) = self.parent_of(path, true)?;
                let perm = if mode.perm() == 0 {
                    DEFAULT_FILE_PERM
                } else {
                    mode.perm()
                };
                let file = Arc::new(FileNode {
                    meta: RwLock::new(NodeMeta::new(FileMode::file(perm))),
                    data: RwLock::new(Vec::new()),
                });
                parent
                    .children
                    .write()
                    .insert(name, Node::File(file.clone()));
                Ok(Box::new(MemFile {
                    name: path.to_owned(),
                    node: file,
                    pos: 0,
                    flags,
                }))
            }
            Err(err) => Err(err),
        }
    }

    fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        if Self::segments(path).is_empty() {
            return Err(VfsError::AlreadyExists(path.to_owned()));
        }
        let (parent, name) = self.parent_of(path, false)?;
        let mut children = parent.children.write();
        if children.contains_key(&name) {
            return Err(VfsError::AlreadyExists(path.to_owned()));
        }
        children.insert(name, Node::Dir(DirNode::new(FileMode::dir(mode.perm()))));
        Ok(())
    }

    fn mkdir_all(&self, path: &str, mode: FileMode) -> Result<()> {
        let mut current = self.root.clone();
        for segment in Self::segments(path) {
            let existing = current.children.read().get(segment).cloned();
            current = match existing {
                Some(Node::Dir(dir)) => dir,
                Some(Node::File(_)) => return Err(VfsError::NotDirectory(path.to_owned())),
                None => {
                    let dir = DirNode::new(FileMode::dir(mode.perm()));
                    current
                        .children
                        .write()
                        .insert(segment.to_owned(), Node::Dir(dir.clone()));
                    dir
                }
            };
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        if Self::segments(path).is_empty() {
            return Err(VfsError::InvalidArgument("cannot remove /".to_owned()));
        }
        let (parent, name) = self.parent_of(path, false)?;
        let mut children = parent.children.write();
        match children.get(&name) {
            None => return Err(VfsError::NotFound(path.to_owned())),
            Some(Node::Dir(dir)) if !dir.children.read().is_empty() => {
                return Err(VfsError::NotEmpty(path.to_owned()));
            }
            Some(_) => {}
        }
        children.remove(&name);
        Ok(())
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        if Self::segments(path).is_empty() {
            self.root.children.write().clear();
            return Ok(());
        }
        match self.parent_of(path, false) {
            Ok((parent, name)) => {
                parent.children.write().remove(&name);
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let (old_parent, old_name) = self.parent_of(old, false)?;
        let (new_parent, new_name) = self.parent_of(new, false)?;
        if let Some(Node::Dir(_)) = new_parent.children.read().get(&new_name) {
            return Err(VfsError::AlreadyExists(new.to_owned()));
        }
        let node = old_parent
            .children
            .write()
            .remove(&old_name)
            .ok_or_else(|| VfsError::NotFound(old.to_owned()))?;
        new_parent.children.write().insert(new_name, node);
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        if Self::segments(path).is_empty() {
            return Ok(Node::Dir(self.root.clone()).metadata("/"));
        }
        let node = self.lookup(path)?;
        Ok(node.metadata(base_name(path)))
    }

    fn chmod(&self, path: &str, mode: FileMode) -> Result<()> {
        let node = self.lookup(path)?;
        let mut meta = node.meta_lock().write();
        meta.mode = if meta.mode.is_dir() {
            FileMode::dir(mode.perm())
        } else {
            FileMode::file(mode.perm())
        };
        Ok(())
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let node = self.lookup(path)?;
        let mut meta = node.meta_lock().write();
        meta.uid = uid;
        meta.gid = gid;
        Ok(())
    }

    fn chtimes(&self, path: &str, _atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let node = self.lookup(path)?;
        node.meta_lock().write().modified = mtime;
        Ok(())
    }
}

// ── Handles ─────────────────────────────────────────────────────────────────

struct MemFile {
    name: String,
    node: Arc<FileNode>,
    pos: u64,
    flags: OpenFlags,
}

impl MemFile {
    fn touch(&self) {
        self.node.meta.write().modified = SystemTime::now();
    }
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.flags.read {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for reading",
            ));
        }
        let data = self.node.data.read();
        let pos = usize::try_from(self.pos).unwrap_or(usize::MAX);
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.flags.is_write_like() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for writing",
            ));
        }
        let mut data = self.node.data.write();
        if self.flags.append {
            self.pos = data.len() as u64;
        }
        let pos = usize::try_from(self.pos).unwrap_or(usize::MAX);
        if pos > data.len() {
            data.resize(pos, 0);
        }
        let end = pos + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(buf);
        self.pos = end as u64;
        drop(data);
        self.touch();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.node.data.read().len() as i64;
        let next = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek overflow"))?,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}

impl File for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> Result<Metadata> {
        Ok(Node::File(self.node.clone()).metadata(base_name(&self.name)))
    }

    fn read_dir(&mut self, _count: isize) -> Result<Vec<Metadata>> {
        Err(VfsError::NotDirectory(self.name.clone()))
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.flags.is_write_like() {
            return Err(VfsError::PermissionDenied(self.name.clone()));
        }
        let mut data = self.node.data.write();
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if data.len() > size {
            data.truncate(size);
        } else {
            data.resize(size, 0);
        }
        drop(data);
        self.touch();
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MemDirHandle {
    path: String,
    meta: Metadata,
    entries: Vec<Metadata>,
    offset: usize,
}

impl Read for MemDirHandle {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other(format!("{}: is a directory", self.path)))
    }
}

impl Write for MemDirHandle {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other(format!("{}: is a directory", self.path)))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemDirHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if pos == SeekFrom::Start(0) {
            self.offset = 0;
        }
        Ok(0)
    }
}

impl File for MemDirHandle {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn write_then_read_round_trip() {
        let fs = MemBackend::new();
        fs.write_file("/docs/readme.txt", b"hello").unwrap();

        let mut file = fs.open("/docs/readme.txt").unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");

        let meta = fs.stat("/docs/readme.txt").unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.name, "readme.txt");
        assert!(!meta.is_dir());
        // parents were materialized
        assert!(fs.stat("/docs").unwrap().is_dir());
    }

    #[test]
    fn create_truncates_existing() {
        let fs = MemBackend::new();
        fs.write_file("/a.txt", b"longer contents").unwrap();
        fs.write_file("/a.txt", b"x").unwrap();
        assert_eq!(fs.stat("/a.txt").unwrap().size, 1);
    }

    #[test]
    fn mkdir_requires_parent_mkdir_all_does_not() {
        let fs = MemBackend::new();
        assert!(matches!(
            fs.mkdir("/a/b", FileMode::dir(0o755)),
            Err(VfsError::NotFound(_))
        ));
        fs.mkdir_all("/a/b/c", FileMode::dir(0o755)).unwrap();
        assert!(fs.stat("/a/b/c").unwrap().is_dir());
        assert!(matches!(
            fs.mkdir("/a/b", FileMode::dir(0o755)),
            Err(VfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn remove_refuses_non_empty_dirs() {
        let fs = MemBackend::new();
        fs.write_file("/dir/file", b"data").unwrap();
        assert!(matches!(fs.remove("/dir"), Err(VfsError::NotEmpty(_))));
        fs.remove("/dir/file").unwrap();
        fs.remove("/dir").unwrap();
        assert!(fs.stat("/dir").unwrap_err().is_not_found());
        // RemoveAll of a missing path is not an error.
        fs.remove_all("/missing").unwrap();
    }

    #[test]
    fn rename_moves_subtrees() {
        let fs = MemBackend::new();
        fs.write_file("/src/inner/file.txt", b"payload").unwrap();
        fs.mkdir_all("/dst", FileMode::dir(0o755)).unwrap();
        fs.rename("/src", "/dst/moved").unwrap();
        assert!(fs.stat("/src").unwrap_err().is_not_found());
        assert_eq!(fs.stat("/dst/moved/inner/file.txt").unwrap().size, 7);
    }

    #[test]
    fn dir_handle_lists_sorted_entries() {
        let fs = MemBackend::new();
        fs.write_file("/b.txt", b"b").unwrap();
        fs.write_file("/a.txt", b"a").unwrap();
        fs.mkdir("/c", FileMode::dir(0o755)).unwrap();

        let mut dir = fs.open("/").unwrap();
        let names = dir.read_dir_names(-1).unwrap();
        assert_eq!(names, ["a.txt", "b.txt", "c"]);
        assert!(matches!(
            dir.read_dir(1),
            Err(VfsError::EndOfDirectory)
        ));
    }

    #[test]
    fn open_file_honors_flags() {
        let fs = MemBackend::new();
        fs.write_file("/f", b"abc").unwrap();

        assert!(matches!(
            fs.open_file(
                "/f",
                OpenFlags {
                    read: true,
                    write: true,
                    create_new: true,
                    ..OpenFlags::default()
                },
                FileMode::file(0o644)
            ),
            Err(VfsError::AlreadyExists(_))
        ));

        let mut file = fs
            .open_file(
                "/f",
                OpenFlags {
                    write: true,
                    append: true,
                    ..OpenFlags::default()
                },
                FileMode::file(0o644),
            )
            .unwrap();
        file.write_all(b"def").unwrap();
        assert_eq!(fs.stat("/f").unwrap().size, 6);

        let mut read_only = fs.open("/f").unwrap();
        assert!(read_only.write_all(b"nope").is_err());
    }

    #[test]
    fn chmod_and_chtimes_update_metadata() {
        let fs = MemBackend::new();
        fs.write_file("/f", b"x").unwrap();
        fs.chmod("/f", FileMode::file(0o600)).unwrap();
        assert_eq!(fs.stat("/f").unwrap().mode, FileMode::file(0o600));

        let epoch = SystemTime::UNIX_EPOCH;
        fs.chtimes("/f", epoch, epoch).unwrap();
        assert_eq!(fs.stat("/f").unwrap().modified, epoch);
    }
}
