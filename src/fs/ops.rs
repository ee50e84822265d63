//! The operation entry points served to the file-system bridge.
//!
//! Each operation takes an absolute path within the mounted file system and
//! surfaces failures as one of the classes in [Error]; the bridge maps those
//! to negative errnos.

use log::debug;

use crate::block::{Ino, BLOCK_SIZE};
use crate::fs::{
    dir::{dentry_at, DENTRIES_PER_BLOCK, NAME_MAX},
    inode::Timespec,
    path::{self, PATH_MAX},
    Error, Filesystem, Result,
};
use crate::image::Image;

/// File-system statistics, as reported by `statfs`.
#[derive(Clone, Copy, Debug)]
pub struct Statfs {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub name_max: u32,
}

/// File or directory attributes, as reported by `getattr`.
#[derive(Clone, Copy, Debug)]
pub struct Attr {
    pub ino: Ino,
    pub mode: u32,
    pub links: u32,
    pub size: u64,
    /// Size in 512-byte units.
    pub blocks512: u64,
    pub mtime: Timespec,
}

/// How `utimens` sets the modification time, per the POSIX
/// `UTIME_NOW` / `UTIME_OMIT` conventions.
#[derive(Clone, Copy, Debug)]
pub enum SetTime {
    Now,
    Omit,
    Set(Timespec),
}

impl<I: Image> Filesystem<I> {
    /// Reports file-system statistics.
    pub fn statfs(&self) -> Statfs {
        let sb = self.superblock();
        Statfs {
            block_size: BLOCK_SIZE as u32,
            total_blocks: u64::from(self.layout().total_blocks),
            free_blocks: u64::from(sb.num_free_dblocks),
            total_inodes: u64::from(sb.num_inodes),
            free_inodes: u64::from(sb.num_free_inodes),
            name_max: NAME_MAX as u32,
        }
    }

    /// Reports the attributes of the file or directory at `path`.
    pub fn getattr(&self, path: &str) -> Result<Attr> {
        if path.len() >= PATH_MAX {
            return Err(Error::NameTooLong);
        }
        let ino = self.lookup(path)?;
        let inode = self.inode(ino);
        debug!("getattr({path}) -> ino {ino}");
        Ok(Attr {
            ino,
            mode: inode.mode,
            links: inode.links,
            size: inode.size,
            blocks512: inode.size / 512,
            mtime: inode.mtime,
        })
    }

    /// Enumerates the directory at `path`: `.` and `..` first, then every
    /// live entry in block order. The sink receives each name with its inode
    /// number and returns `false` to stop (surfaced as [Error::OutOfMemory]).
    pub fn readdir(&self, path: &str, mut sink: impl FnMut(&[u8], Ino) -> bool) -> Result<()> {
        debug!("readdir({path})");
        let ino = self.lookup(path)?;
        let inode = self.inode(ino);
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        let (parent_path, _) = path::split_parent(path);
        let parent = self.lookup(parent_path)?;
        if !sink(b".", ino) || !sink(b"..", parent) {
            return Err(Error::OutOfMemory);
        }
        for blk in self.blocks(&inode) {
            let block = self.data_block(blk);
            for slot in 0..DENTRIES_PER_BLOCK {
                let entry = dentry_at(block, slot);
                if !entry.is_free() && !sink(entry.name_bytes(), entry.ino) {
                    return Err(Error::OutOfMemory);
                }
            }
        }
        Ok(())
    }

    /// Creates the directory at `path`.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        debug!("mkdir({path})");
        self.add_dir_entry(path, mode | libc::S_IFDIR as u32, 2)
            .map(drop)
    }

    /// Removes the empty directory at `path`.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        debug!("rmdir({path})");
        let ino = self.lookup(path)?;
        let inode = self.inode(ino);
        if !self.dir_is_empty(&inode) {
            return Err(Error::NotEmpty);
        }
        self.remove_dir_entry(path)
    }

    /// Creates the regular file at `path`.
    pub fn create(&mut self, path: &str, mode: u32) -> Result<()> {
        debug!("create({path})");
        debug_assert!(mode & libc::S_IFMT as u32 == libc::S_IFREG as u32);
        self.add_dir_entry(path, mode, 1).map(drop)
    }

    /// Removes the file at `path`.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        debug!("unlink({path})");
        self.remove_dir_entry(path)
    }

    /// Sets the modification time of the entry at `path`. Access times are
    /// not stored.
    pub fn utimens(&mut self, path: &str, mtime: SetTime) -> Result<()> {
        debug!("utimens({path})");
        let ino = self.lookup(path)?;
        let mut inode = self.inode(ino);
        match mtime {
            SetTime::Now => inode.mtime = self.now()?,
            SetTime::Set(time) => inode.mtime = time,
            SetTime::Omit => return Ok(()),
        }
        self.write_inode(ino, &inode);
        Ok(())
    }

    /// Sets the size of the file at `path`, zero-filling when extending and
    /// releasing blocks when shrinking.
    pub fn truncate(&mut self, path: &str, new_size: u64) -> Result<()> {
        debug!("truncate({path}, {new_size})");
        let ino = self.lookup(path)?;
        let mut inode = self.inode(ino);
        inode.mtime = self.now()?;
        if new_size > inode.size {
            let grow = new_size - inode.size;
            if let Err(e) = self.allocate_data_blocks(&mut inode, grow) {
                self.write_inode(ino, &inode);
                self.write_superblock();
                return Err(e);
            }
            self.zero_range(&inode, inode.size, grow);
        } else if new_size < inode.size {
            self.shrink_extents(&mut inode, new_size);
        }
        inode.size = new_size;
        self.write_inode(ino, &inode);
        self.write_superblock();
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at byte `offset` of the file at `path`.
    /// Returns the number of bytes read; holes and never-written ranges read
    /// as zeros.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        debug!("read({path}, {} bytes at {offset})", buf.len());
        let ino = self.lookup(path)?;
        let inode = self.inode(ino);
        Ok(self.read_range(&inode, buf, offset))
    }

    /// Writes `buf` at byte `offset` of the file at `path`, extending the
    /// file and zero-filling any hole past the old end. Returns the number of
    /// bytes written.
    pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize> {
        debug!("write({path}, {} bytes at {offset})", buf.len());
        let ino = self.lookup(path)?;
        let mut inode = self.inode(ino);
        inode.mtime = self.now()?;

        if offset > inode.size {
            let hole = offset - inode.size;
            if let Err(e) = self.allocate_data_blocks(&mut inode, hole) {
                self.write_inode(ino, &inode);
                self.write_superblock();
                return Err(e);
            }
            self.zero_range(&inode, inode.size, hole);
            inode.size += hole;
        }

        let end = offset + buf.len() as u64;
        if end > inode.size {
            let needed = end - inode.size;
            if let Err(e) = self.allocate_data_blocks(&mut inode, needed) {
                self.write_inode(ino, &inode);
                self.write_superblock();
                return Err(e);
            }
        }
        let written = self.write_range(&inode, buf, offset);
        if end > inode.size {
            inode.size = end;
        }
        self.write_inode(ino, &inode);
        self.write_superblock();
        Ok(written)
    }
}
