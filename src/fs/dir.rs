//! Directory entries and the directory manager.

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::block::{BlockIdx, Ino, BLOCK_SIZE};
use crate::fs::{
    inode::{mode_is_dir, Inode},
    path, Error, Filesystem, Result,
};
use crate::image::Image;

/// Longest accepted directory entry name.
pub const NAME_MAX: usize = 251;

/// [Dentry] size.
pub const DENTRY_SIZE: usize = size_of::<Dentry>();

/// How many directory entries fit in a block.
pub const DENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DENTRY_SIZE;

/// A directory entry: a NUL-terminated name plus an inode number.
/// A leading NUL byte marks the slot free.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable)]
pub struct Dentry {
    name: [u8; NAME_MAX + 1],
    pub ino: Ino,
}

impl Dentry {
    /// Constructs an entry with a given name and inode number.
    /// The name must not exceed [NAME_MAX] bytes.
    pub fn new(name: &str, ino: Ino) -> Self {
        debug_assert!(name.len() <= NAME_MAX);
        let mut bytes = [0u8; NAME_MAX + 1];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self { name: bytes, ino }
    }

    /// Checks if the slot is free.
    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    /// Returns the name bytes up to the terminating NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        &self.name[..len]
    }

    /// Compares the entry name with `name` byte for byte.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }
}

/// Reads the directory entry at `slot` of a directory block.
pub(crate) fn dentry_at(block: &[u8], slot: usize) -> Dentry {
    let offset = slot * DENTRY_SIZE;
    Dentry::read_from_bytes(&block[offset..offset + DENTRY_SIZE])
        .expect("dentry record must fit its slice")
}

impl<I: Image> Filesystem<I> {
    /// Scans a directory inode for an entry named `name`.
    pub(crate) fn find_entry(&self, dir: &Inode, name: &str) -> Option<Ino> {
        for blk in self.blocks(dir) {
            let block = self.data_block(blk);
            for slot in 0..DENTRIES_PER_BLOCK {
                let entry = dentry_at(block, slot);
                if !entry.is_free() && entry.name_matches(name) {
                    return Some(entry.ino);
                }
            }
        }
        None
    }

    /// Checks that a directory holds no live entries.
    pub(crate) fn dir_is_empty(&self, dir: &Inode) -> bool {
        for blk in self.blocks(dir) {
            let block = self.data_block(blk);
            if (0..DENTRIES_PER_BLOCK).any(|slot| block[slot * DENTRY_SIZE] != 0) {
                return false;
            }
        }
        true
    }

    /// Returns the lowest-indexed free inode slot.
    fn find_free_inode(&self) -> Option<Ino> {
        (0..self.layout().num_inodes).find(|&ino| self.inode(ino).links == 0)
    }

    /// Initializes the inode slot at `ino` as a fresh file or directory and
    /// charges it to the free-inode counter.
    pub(crate) fn init_inode(&mut self, ino: Ino, mode: u32, links: u32) -> Result<()> {
        let mtime = self.now()?;
        self.write_inode(ino, &Inode::init(mode, links, mtime));
        self.superblock_mut().num_free_inodes -= 1;
        Ok(())
    }

    /// Creates a named entry for a new file or directory at `path`, growing
    /// the parent directory by one block when every slot is taken.
    ///
    /// Returns the inode number of the new entry.
    pub(crate) fn add_dir_entry(&mut self, path: &str, mode: u32, links: u32) -> Result<Ino> {
        if self.superblock().num_free_inodes == 0 {
            return Err(Error::NoSpace);
        }
        let (parent_path, name) = path::split_parent(path);
        if name.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }
        let parent_ino = self.lookup(parent_path)?;
        let mut parent = self.inode(parent_ino);

        let slot = self.find_free_slot(&parent);
        let (blk, slot) = match slot {
            Some(found) => found,
            None => {
                // Every allocated block is full; grow the directory by one
                // zeroed block and use its first slot.
                if let Err(e) = self.allocate_data_blocks(&mut parent, BLOCK_SIZE as u64) {
                    self.write_inode(parent_ino, &parent);
                    self.write_superblock();
                    return Err(e);
                }
                parent.size += BLOCK_SIZE as u64;
                let last = self.extent_at(&parent, parent.num_extents - 1);
                let blk = last.start + last.count - 1;
                self.data_block_mut(blk).fill(0);
                (blk, 0)
            }
        };

        let result = self
            .find_free_inode()
            .ok_or(Error::NoSpace)
            .and_then(|ino| self.init_inode(ino, mode, links).map(|()| ino));
        let ino = match result {
            Ok(ino) => ino,
            // The parent may already have grown by a block; keep that
            // allocation charged to it.
            Err(e) => {
                self.write_inode(parent_ino, &parent);
                self.write_superblock();
                return Err(e);
            }
        };
        let entry = Dentry::new(name, ino);
        let offset = slot * DENTRY_SIZE;
        self.data_block_mut(blk)[offset..offset + DENTRY_SIZE].copy_from_slice(entry.as_bytes());

        // A new subdirectory's `..` adds a link to the parent.
        if mode_is_dir(mode) {
            parent.links += 1;
        }
        self.write_inode(parent_ino, &parent);
        self.write_superblock();
        Ok(ino)
    }

    /// Removes the entry at `path` from its parent directory and reclaims the
    /// target inode once its link count drops to zero.
    pub(crate) fn remove_dir_entry(&mut self, path: &str) -> Result<()> {
        let (parent_path, name) = path::split_parent(path);
        let parent_ino = self.lookup(parent_path)?;
        let target_ino = self.lookup(path)?;
        let mut parent = self.inode(parent_ino);
        let mut target = self.inode(target_ino);

        if target.is_dir() {
            // The target loses its self link, the parent its `..` back-link.
            target.links -= 1;
            parent.links -= 1;
        }
        target.links -= 1;

        let mut hit = None;
        'scan: for blk in self.blocks(&parent) {
            let block = self.data_block(blk);
            for slot in 0..DENTRIES_PER_BLOCK {
                let entry = dentry_at(block, slot);
                if !entry.is_free() && entry.name_matches(name) {
                    hit = Some((blk, slot));
                    break 'scan;
                }
            }
        }
        if let Some((blk, slot)) = hit {
            self.data_block_mut(blk)[slot * DENTRY_SIZE] = 0;
        }

        if target.links == 0 {
            self.free_extents(&mut target);
            self.superblock_mut().num_free_inodes += 1;
        }
        self.write_inode(target_ino, &target);
        self.write_inode(parent_ino, &parent);
        self.write_superblock();
        Ok(())
    }

    fn find_free_slot(&self, dir: &Inode) -> Option<(BlockIdx, usize)> {
        for blk in self.blocks(dir) {
            let block = self.data_block(blk);
            for slot in 0..DENTRIES_PER_BLOCK {
                if block[slot * DENTRY_SIZE] == 0 {
                    return Some((blk, slot));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_size() {
        assert_eq!(DENTRY_SIZE, 256);
        assert_eq!(DENTRIES_PER_BLOCK, 16);
    }

    #[test]
    fn name_round_trip() {
        let entry = Dentry::new("notes.txt", 7);
        assert!(!entry.is_free());
        assert_eq!(entry.name_bytes(), b"notes.txt");
        assert!(entry.name_matches("notes.txt"));
        assert!(!entry.name_matches("notes.tx"));
        assert!(!entry.name_matches("notes.txt0"));
        assert_eq!(entry.ino, 7);
    }

    #[test]
    fn longest_name_has_no_terminator_to_spare() {
        let name = "n".repeat(NAME_MAX);
        let entry = Dentry::new(&name, 1);
        assert_eq!(entry.name_bytes().len(), NAME_MAX);
        assert!(entry.name_matches(&name));
    }
}
