use libc::c_int;
use zerocopy::{FromBytes, IntoBytes};

use crate::{
    block::{BlockIdx, Ino, BLOCK_SIZE},
    fs::{
        inode::{Blocks, Extent, Inode, Timespec, EXTENT_SIZE, INODE_SIZE, NUM_DIRECT_EXTENTS},
        superblock::{Layout, Superblock, A1FS_MAGIC, SUPERBLOCK_BLK, SUPERBLOCK_SIZE},
    },
    image::Image,
};

pub mod alloc;
pub mod bitmap;
pub mod dir;
pub mod inode;
pub mod io;
pub mod ops;
pub mod path;
pub mod superblock;

/// Inode number of the root directory.
pub const ROOT_INO: Ino = 0;

/// Source of modification timestamps; `None` surfaces as [Error::BadAddress].
pub type Clock = fn() -> Option<Timespec>;

/// A mounted a1fs image: the image buffer plus a typed view over its regions.
///
/// The superblock is cached in memory and written back after every mutating
/// operation; everything else is read from and written to the image directly.
pub struct Filesystem<I: Image> {
    image: I,
    superblock: Superblock,
    layout: Layout,
    clock: Clock,
}

pub type Result<T> = std::result::Result<T, Error>;

/// The failure classes of the file system, each mapped to an errno at the
/// operation boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A path component does not exist, or the path is not absolute.
    NotFound,
    /// A non-final path component is not a directory.
    NotADirectory,
    /// The path or one of its components is too long.
    NameTooLong,
    /// Out of free data blocks, free inodes, or extent slots.
    NoSpace,
    /// The readdir sink refused an entry.
    OutOfMemory,
    /// The directory to remove still has live entries.
    NotEmpty,
    /// The wall-clock read failed.
    BadAddress,
}

impl From<Error> for c_int {
    fn from(value: Error) -> Self {
        match value {
            Error::NotFound => libc::ENOENT,
            Error::NotADirectory => libc::ENOTDIR,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::NoSpace => libc::ENOSPC,
            Error::OutOfMemory => libc::ENOMEM,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::BadAddress => libc::EFAULT,
        }
    }
}

/// Checks whether a byte buffer already contains an a1fs file system: the
/// magic must match and every recorded region offset must agree with the
/// layout re-derived from the recorded size and inode count.
pub fn is_formatted(bytes: &[u8]) -> bool {
    read_superblock(bytes).is_some()
}

fn read_superblock(bytes: &[u8]) -> Option<(Superblock, Layout)> {
    if bytes.len() < (SUPERBLOCK_BLK + 1) * BLOCK_SIZE {
        return None;
    }
    let offset = SUPERBLOCK_BLK * BLOCK_SIZE;
    let sb = Superblock::read_from_bytes(&bytes[offset..offset + SUPERBLOCK_SIZE])
        .expect("superblock record must fit its slice");
    if sb.magic != A1FS_MAGIC || sb.size != bytes.len() as u64 {
        return None;
    }
    let layout = Layout::compute(sb.size, sb.num_inodes)?;
    layout.matches(&sb).then_some((sb, layout))
}

impl<I: Image> Filesystem<I> {
    /// Formats `image` with an empty file system holding `num_inodes` inodes
    /// and mounts it.
    ///
    /// # Errors
    /// Returns `Err` if:
    /// - the image is too small for the metadata regions (`ENOSPC`)
    /// - the inode count is zero or the size is not block-aligned (`EINVAL`)
    /// - the wall clock failed while stamping the root directory (`EFAULT`)
    pub fn format(image: I, num_inodes: u32) -> std::result::Result<Self, c_int> {
        let size = image.size() as u64;
        if num_inodes == 0 || size % BLOCK_SIZE as u64 != 0 {
            return Err(libc::EINVAL);
        }
        let layout = Layout::compute(size, num_inodes).ok_or(libc::ENOSPC)?;

        let mut fs = Self {
            image,
            superblock: Superblock::new(&layout),
            layout,
            clock: Timespec::now,
        };

        // Every inode slot starts with zero links (free) and the bitmap
        // starts all-free.
        let inodes = layout.inode_offset(0);
        fs.image.bytes_mut()[inodes..inodes + layout.inode_table_len()].fill(0);
        let bm = layout.bitmap_offset();
        fs.image.bytes_mut()[bm..bm + layout.bitmap_len()].fill(0);

        fs.init_inode(ROOT_INO, libc::S_IFDIR as u32 | 0o777, 2)
            .map_err(c_int::from)?;
        fs.write_superblock();
        Ok(fs)
    }

    /// Mounts an already formatted image.
    ///
    /// # Errors
    /// Returns `Err(EINVAL)` if the image does not contain a valid a1fs
    /// superblock.
    pub fn mount(image: I) -> std::result::Result<Self, c_int> {
        let (superblock, layout) = read_superblock(image.bytes()).ok_or(libc::EINVAL)?;
        Ok(Self {
            image,
            superblock,
            layout,
            clock: Timespec::now,
        })
    }

    /// Replaces the wall-clock source (used by tests).
    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Flushes the image to its backing store.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.image.flush()
    }

    /// Unmounts the file system, flushing and returning the image.
    pub fn unmount(mut self) -> std::io::Result<I> {
        self.image.flush()?;
        Ok(self.image)
    }

    pub(crate) fn now(&self) -> Result<Timespec> {
        (self.clock)().ok_or(Error::BadAddress)
    }

    pub(crate) fn write_superblock(&mut self) {
        let offset = SUPERBLOCK_BLK * BLOCK_SIZE;
        self.image.bytes_mut()[offset..offset + SUPERBLOCK_SIZE]
            .copy_from_slice(self.superblock.as_bytes());
    }

    pub(crate) fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.superblock
    }

    pub(crate) fn bitmap(&self) -> &[u8] {
        let offset = self.layout.bitmap_offset();
        &self.image.bytes()[offset..offset + self.layout.bitmap_len()]
    }

    pub(crate) fn bitmap_mut(&mut self) -> &mut [u8] {
        let offset = self.layout.bitmap_offset();
        &mut self.image.bytes_mut()[offset..offset + self.layout.bitmap_len()]
    }

    /// Reads the inode record at `ino`.
    pub fn inode(&self, ino: Ino) -> Inode {
        assert!(ino < self.layout.num_inodes, "inode index out of bounds");
        let offset = self.layout.inode_offset(ino);
        Inode::read_from_bytes(&self.image.bytes()[offset..offset + INODE_SIZE])
            .expect("inode record must fit its slice")
    }

    /// Writes the inode record at `ino`.
    pub(crate) fn write_inode(&mut self, ino: Ino, inode: &Inode) {
        assert!(ino < self.layout.num_inodes, "inode index out of bounds");
        let offset = self.layout.inode_offset(ino);
        self.image.bytes_mut()[offset..offset + INODE_SIZE].copy_from_slice(inode.as_bytes());
    }

    pub(crate) fn data_block(&self, blk: BlockIdx) -> &[u8] {
        assert!(blk < self.layout.data_blocks, "data block index out of bounds");
        let offset = self.layout.data_block_offset(blk);
        &self.image.bytes()[offset..offset + BLOCK_SIZE]
    }

    pub(crate) fn data_block_mut(&mut self, blk: BlockIdx) -> &mut [u8] {
        assert!(blk < self.layout.data_blocks, "data block index out of bounds");
        let offset = self.layout.data_block_offset(blk);
        &mut self.image.bytes_mut()[offset..offset + BLOCK_SIZE]
    }

    /// Returns the `index`-th extent of an inode, reading from the direct
    /// array or the indirect block.
    pub(crate) fn extent_at(&self, inode: &Inode, index: u32) -> Extent {
        debug_assert!(index < inode.num_extents);
        if (index as usize) < NUM_DIRECT_EXTENTS {
            return inode.direct_extents[index as usize];
        }
        let offset = (index as usize - NUM_DIRECT_EXTENTS) * EXTENT_SIZE;
        let block = self.data_block(inode.indirect_extent_blk);
        Extent::read_from_bytes(&block[offset..offset + EXTENT_SIZE])
            .expect("extent record must fit its slice")
    }

    /// Stores the `index`-th extent of an inode. Direct extents land in the
    /// in-memory record (the caller writes it back); indirect extents go
    /// straight to the indirect block.
    pub(crate) fn set_extent_at(&mut self, inode: &mut Inode, index: u32, extent: Extent) {
        if (index as usize) < NUM_DIRECT_EXTENTS {
            inode.direct_extents[index as usize] = extent;
            return;
        }
        let offset = (index as usize - NUM_DIRECT_EXTENTS) * EXTENT_SIZE;
        let block = self.data_block_mut(inode.indirect_extent_blk);
        block[offset..offset + EXTENT_SIZE].copy_from_slice(extent.as_bytes());
    }

    /// Collects an inode's extents in order.
    pub(crate) fn extents(&self, inode: &Inode) -> Vec<Extent> {
        (0..inode.num_extents)
            .map(|i| self.extent_at(inode, i))
            .collect()
    }

    /// Returns a walker over an inode's logical data blocks.
    pub(crate) fn blocks(&self, inode: &Inode) -> Blocks {
        Blocks::new(self.extents(inode))
    }
}
