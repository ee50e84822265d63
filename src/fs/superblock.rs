use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::block::{BlockIdx, BLOCK_SIZE};
use crate::fs::inode::INODE_SIZE;

/// Magic number identifying an a1fs superblock.
pub const A1FS_MAGIC: u32 = 0xC5C3_69A1;

/// Block index of the superblock within the image (block 0 stays reserved).
pub const SUPERBLOCK_BLK: usize = 1;

/// Size of the superblock record.
pub const SUPERBLOCK_SIZE: usize = size_of::<Superblock>();

/// Describes the region layout and resource counters of the file system.
///
/// Stored in block 1 of the image; the remainder of that block is reserved.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[derive(FromBytes, IntoBytes, Immutable)]
pub struct Superblock {
    pub magic: u32,
    _pad: [u8; 4],
    /// Image size in bytes.
    pub size: u64,
    pub num_inodes: u32,
    pub num_free_inodes: u32,
    /// Total data-region blocks (excludes all metadata blocks).
    pub num_dblocks: u32,
    pub num_free_dblocks: u32,
    /// First block of the data bitmap.
    pub data_bitmap: u32,
    /// First block of the inode table.
    pub inode_table: u32,
    /// First block of the data region.
    pub data_start: u32,
    _pad2: [u8; 4],
}

impl Superblock {
    /// Constructs the superblock of a freshly formatted file system.
    pub fn new(layout: &Layout) -> Self {
        Self {
            magic: A1FS_MAGIC,
            _pad: [0u8; 4],
            size: layout.total_blocks as u64 * BLOCK_SIZE as u64,
            num_inodes: layout.num_inodes,
            num_free_inodes: layout.num_inodes,
            num_dblocks: layout.data_blocks,
            num_free_dblocks: layout.data_blocks,
            data_bitmap: layout.bitmap_start,
            inode_table: layout.inode_table_start,
            data_start: layout.data_start,
            _pad2: [0u8; 4],
        }
    }
}

/// Region offsets of an image, derived from its size and inode count.
///
/// All offset math of the file system lives here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub total_blocks: u32,
    pub num_inodes: u32,
    /// First block of the data bitmap (always 2).
    pub bitmap_start: u32,
    pub bitmap_blocks: u32,
    pub inode_table_start: u32,
    pub inode_blocks: u32,
    pub data_start: u32,
    pub data_blocks: u32,
}

impl Layout {
    /// Derives the region layout for an image of `size` bytes holding
    /// `num_inodes` inodes. Returns `None` if the image is too small to hold
    /// the metadata regions.
    pub fn compute(size: u64, num_inodes: u32) -> Option<Self> {
        if num_inodes == 0 || size % BLOCK_SIZE as u64 != 0 {
            return None;
        }
        let total_blocks = u32::try_from(size / BLOCK_SIZE as u64).ok()?;
        let inode_bytes = num_inodes as u64 * INODE_SIZE as u64;
        let inode_blocks = u32::try_from(inode_bytes.div_ceil(BLOCK_SIZE as u64)).ok()?;

        // Bitmap and data region share what is left after the reserved block,
        // the superblock, and the inode table.
        let shared = total_blocks.checked_sub(inode_blocks + 2)?;
        let bitmap_blocks = shared.div_ceil(8 * BLOCK_SIZE as u32);
        if total_blocks < inode_blocks + bitmap_blocks + 2 {
            return None;
        }
        let data_blocks = shared - bitmap_blocks;

        Some(Self {
            total_blocks,
            num_inodes,
            bitmap_start: 2,
            bitmap_blocks,
            inode_table_start: 2 + bitmap_blocks,
            inode_blocks,
            data_start: 2 + bitmap_blocks + inode_blocks,
            data_blocks,
        })
    }

    /// Checks that a candidate superblock agrees with the layout re-derived
    /// from its recorded size and inode count.
    pub fn matches(&self, sb: &Superblock) -> bool {
        sb.size == self.total_blocks as u64 * BLOCK_SIZE as u64
            && sb.num_inodes == self.num_inodes
            && sb.num_dblocks == self.data_blocks
            && sb.data_bitmap == self.bitmap_start
            && sb.inode_table == self.inode_table_start
            && sb.data_start == self.data_start
    }

    /// Byte offset of the data bitmap within the image.
    pub fn bitmap_offset(&self) -> usize {
        self.bitmap_start as usize * BLOCK_SIZE
    }

    /// Byte length of the data bitmap region.
    pub fn bitmap_len(&self) -> usize {
        self.bitmap_blocks as usize * BLOCK_SIZE
    }

    /// Byte offset of an inode record within the image.
    pub fn inode_offset(&self, ino: u32) -> usize {
        self.inode_table_start as usize * BLOCK_SIZE + ino as usize * INODE_SIZE
    }

    /// Byte length of the inode table region.
    pub fn inode_table_len(&self) -> usize {
        self.inode_blocks as usize * BLOCK_SIZE
    }

    /// Byte offset of a data-region block within the image.
    pub fn data_block_offset(&self, blk: BlockIdx) -> usize {
        (self.data_start as usize + blk as usize) * BLOCK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fits_one_block() {
        assert!(SUPERBLOCK_SIZE <= BLOCK_SIZE);
        assert_eq!(SUPERBLOCK_SIZE, 48);
    }

    #[test]
    fn layout_256kib_256_inodes() {
        let layout = Layout::compute(256 * 1024, 256).unwrap();
        assert_eq!(layout.total_blocks, 64);
        assert_eq!(layout.inode_blocks, 8);
        assert_eq!(layout.bitmap_start, 2);
        assert_eq!(layout.bitmap_blocks, 1);
        assert_eq!(layout.inode_table_start, 3);
        assert_eq!(layout.data_start, 11);
        assert_eq!(layout.data_blocks, 53);

        let sb = Superblock::new(&layout);
        assert!(layout.matches(&sb));
    }

    #[test]
    fn layout_rejects_undersized_image() {
        // Two blocks cannot hold the reserved block, the superblock, the
        // bitmap, and an inode table.
        assert!(Layout::compute(2 * BLOCK_SIZE as u64, 16).is_none());
        assert!(Layout::compute(256 * 1024, 0).is_none());
        assert!(Layout::compute(BLOCK_SIZE as u64 + 1, 16).is_none());
    }

    #[test]
    fn matches_rejects_shifted_regions() {
        let layout = Layout::compute(256 * 1024, 256).unwrap();
        let mut sb = Superblock::new(&layout);
        sb.inode_table += 1;
        assert!(!layout.matches(&sb));
    }
}
