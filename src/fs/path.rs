//! Absolute-path resolution against the directory tree.

use crate::block::Ino;
use crate::fs::{Error, Filesystem, Result, ROOT_INO};
use crate::image::Image;

/// Longest accepted path, including the terminator byte of the original ABI.
pub const PATH_MAX: usize = 4096;

/// Returns an iterator over the non-empty components of a path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// Splits a path into its parent path and the final component.
/// The parent of a top-level entry (and of `/` itself) is `/`.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(at) => (&path[..at], &path[at + 1..]),
        None => ("/", path),
    }
}

impl<I: Image> Filesystem<I> {
    /// Resolves an absolute path to an inode number.
    ///
    /// # Errors
    /// Returns `Err` if:
    /// - the path does not start with `/`, or a component does not exist
    /// - a non-final component is not a directory
    pub fn lookup(&self, path: &str) -> Result<Ino> {
        if !path.starts_with('/') {
            return Err(Error::NotFound);
        }
        let mut cur = ROOT_INO;
        for component in components(path) {
            let inode = self.inode(cur);
            if !inode.is_dir() {
                return Err(Error::NotADirectory);
            }
            cur = self
                .find_entry(&inode, component)
                .ok_or(Error::NotFound)?;
        }
        Ok(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_skip_empty_parts() {
        assert_eq!(components("/").count(), 0);
        assert_eq!(components("/a/b").collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(components("/a//b/").collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn split_parent_at_last_slash() {
        assert_eq!(split_parent("/file"), ("/", "file"));
        assert_eq!(split_parent("/a/b/c"), ("/a/b", "c"));
        assert_eq!(split_parent("/"), ("/", ""));
    }
}
