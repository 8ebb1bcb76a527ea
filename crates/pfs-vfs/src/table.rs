//! The mount table: an ordered set of (prefix, backend) bindings.
//!
//! Ordering invariant: mounts are kept in descending lexicographic order of
//! their prefix, which guarantees a longer prefix sharing an ancestor is
//! visited first, so a linear scan implements longest-prefix matching.
//! Callers pass canonical paths (see [`crate::path::normalize`]); the table
//! itself never normalizes.

use pfs_backend::SharedBackend;
use pfs_error::{Result, VfsError};

/// One (prefix, backend) binding. The prefix is canonical and never `/`.
#[derive(Clone)]
pub struct Mount {
    pub prefix: String,
    pub backend: SharedBackend,
}

#[derive(Default)]
pub(crate) struct MountTable {
    mounts: Vec<Mount>,
}

impl MountTable {
    pub(crate) fn insert(&mut self, prefix: String, backend: SharedBackend) -> Result<()> {
        if self.mounts.iter().any(|mount| mount.prefix == prefix) {
            return Err(VfsError::AlreadyExists(format!(
                "mount point {prefix} already exists"
            )));
        }
        self.mounts.push(Mount { prefix, backend });
        self.mounts.sort_by(|a, b| b.prefix.cmp(&a.prefix));
        Ok(())
    }

    pub(crate) fn remove(&mut self, prefix: &str) -> bool {
        let before = self.mounts.len();
        self.mounts.retain(|mount| mount.prefix != prefix);
        self.mounts.len() != before
    }

    /// Longest-prefix lookup. The returned relative path always begins with
    /// `/`; resolving exactly a mount prefix yields `/`.
    pub(crate) fn resolve(&self, path: &str) -> Option<(SharedBackend, String)> {
        for mount in &self.mounts {
            if path == mount.prefix {
                return Some((mount.backend.clone(), "/".to_owned()));
            }
            if path.starts_with(&mount.prefix)
                && path.as_bytes().get(mount.prefix.len()) == Some(&b'/')
            {
                return Some((mount.backend.clone(), path[mount.prefix.len()..].to_owned()));
            }
        }
        None
    }

    /// The mount bound at exactly `dir`, if any.
    pub(crate) fn direct(&self, dir: &str) -> Option<Mount> {
        self.mounts.iter().find(|mount| mount.prefix == dir).cloned()
    }

    /// Every mount whose prefix lies strictly below `dir`.
    pub(crate) fn mounts_under(&self, dir: &str) -> Vec<Mount> {
        self.mounts
            .iter()
            .filter(|mount| Self::is_strictly_under(&mount.prefix, dir))
            .cloned()
            .collect()
    }

    pub(crate) fn has_child(&self, dir: &str) -> bool {
        self.mounts
            .iter()
            .any(|mount| Self::is_strictly_under(&mount.prefix, dir))
    }

    fn is_strictly_under(prefix: &str, dir: &str) -> bool {
        if prefix == dir {
            return false;
        }
        if dir == "/" {
            // Every prefix is absolute, so anything but the root itself counts.
            return prefix.starts_with('/');
        }
        prefix.starts_with(dir) && prefix.as_bytes().get(dir.len()) == Some(&b'/')
    }

    pub(crate) fn snapshot(&self) -> Vec<Mount> {
        self.mounts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfs_backend::MemBackend;
    use std::sync::Arc;

    fn backend() -> SharedBackend {
        Arc::new(MemBackend::new())
    }

    #[test]
    fn keeps_longest_prefix_first() {
        let mut table = MountTable::default();
        table.insert("/a".to_owned(), backend()).unwrap();
        table.insert("/abc/def".to_owned(), backend()).unwrap();
        table.insert("/ab".to_owned(), backend()).unwrap();
        table.insert("/abc".to_owned(), backend()).unwrap();
        table.insert("/abc/def/ghi".to_owned(), backend()).unwrap();

        let prefixes: Vec<String> = table
            .snapshot()
            .into_iter()
            .map(|mount| mount.prefix)
            .collect();
        assert_eq!(prefixes, ["/abc/def/ghi", "/abc/def", "/abc", "/ab", "/a"]);
    }

    #[test]
    fn duplicate_prefix_rejected() {
        let mut table = MountTable::default();
        table.insert("/users".to_owned(), backend()).unwrap();
        assert!(matches!(
            table.insert("/users".to_owned(), backend()),
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(table.remove("/users"));
        assert!(!table.remove("/users"));
    }

    #[test]
    fn sibling_prefixes_do_not_capture() {
        let mut table = MountTable::default();
        table.insert("/a".to_owned(), backend()).unwrap();
        // /ab is not under /a
        assert!(table.resolve("/ab").is_none());
        assert!(table.resolve("/a/b").is_some());
        assert!(!MountTable::is_strictly_under("/ab", "/a"));
        assert!(MountTable::is_strictly_under("/a/b", "/a"));
        assert!(MountTable::is_strictly_under("/a/b", "/"));
    }

    #[test]
    fn mount_root_resolves_to_slash() {
        let mut table = MountTable::default();
        table.insert("/pool".to_owned(), backend()).unwrap();
        let (_, rel) = table.resolve("/pool").unwrap();
        assert_eq!(rel, "/");
        let (_, rel) = table.resolve("/pool/a/b").unwrap();
        assert_eq!(rel, "/a/b");
    }
}
