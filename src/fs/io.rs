//! Byte-range I/O over an inode's data blocks, and truncation.

use crate::block::BLOCK_SIZE;
use crate::fs::{
    bitmap,
    inode::{Inode, NUM_DIRECT_EXTENTS},
    Filesystem,
};
use crate::image::Image;

impl<I: Image> Filesystem<I> {
    /// Reads from `inode` into `buf` starting at byte `offset`. The buffer is
    /// pre-zeroed, so ranges never written read as zeros. Returns the number
    /// of bytes read: 0 past EOF, short when the range crosses EOF.
    pub(crate) fn read_range(&self, inode: &Inode, buf: &mut [u8], offset: u64) -> usize {
        buf.fill(0);
        if offset >= inode.size {
            return 0;
        }
        let len = buf.len().min((inode.size - offset) as usize);
        let mut pos = 0u64;
        for blk in self.blocks(inode) {
            if pos >= offset + len as u64 {
                break;
            }
            let lo = pos.max(offset);
            let hi = (pos + BLOCK_SIZE as u64).min(offset + len as u64);
            if lo < hi {
                let block = self.data_block(blk);
                buf[(lo - offset) as usize..(hi - offset) as usize]
                    .copy_from_slice(&block[(lo - pos) as usize..(hi - pos) as usize]);
            }
            pos += BLOCK_SIZE as u64;
        }
        len
    }

    /// Writes `buf` into `inode`'s data blocks starting at byte `offset`.
    /// Every block in the range must already be allocated. Returns the number
    /// of bytes written.
    pub(crate) fn write_range(&mut self, inode: &Inode, buf: &[u8], offset: u64) -> usize {
        let len = buf.len();
        let mut pos = 0u64;
        let mut written = 0usize;
        for blk in self.blocks(inode) {
            if pos >= offset + len as u64 {
                break;
            }
            let lo = pos.max(offset);
            let hi = (pos + BLOCK_SIZE as u64).min(offset + len as u64);
            if lo < hi {
                let block = self.data_block_mut(blk);
                block[(lo - pos) as usize..(hi - pos) as usize]
                    .copy_from_slice(&buf[(lo - offset) as usize..(hi - offset) as usize]);
                written += (hi - lo) as usize;
            }
            pos += BLOCK_SIZE as u64;
        }
        written
    }

    /// Zeroes the byte range `[offset, offset + len)` of `inode`'s data
    /// blocks. Used to materialize holes.
    pub(crate) fn zero_range(&mut self, inode: &Inode, offset: u64, len: u64) {
        let mut pos = 0u64;
        for blk in self.blocks(inode) {
            if pos >= offset + len {
                break;
            }
            let lo = pos.max(offset);
            let hi = (pos + BLOCK_SIZE as u64).min(offset + len);
            if lo < hi {
                let block = self.data_block_mut(blk);
                block[(lo - pos) as usize..(hi - pos) as usize].fill(0);
            }
            pos += BLOCK_SIZE as u64;
        }
    }

    /// Releases every data block past `new_size`, shrinking extents from the
    /// tail. A block is freed iff its start offset is at or past `new_size`,
    /// so truncating to an exact block multiple keeps nothing extra. Dropping
    /// back into the direct range releases the indirect block.
    pub(crate) fn shrink_extents(&mut self, inode: &mut Inode, new_size: u64) {
        let keep = new_size.div_ceil(BLOCK_SIZE as u64);
        let old_extents = inode.num_extents;
        let mut index = 0u64;
        let mut live = 0u32;
        for i in 0..inode.num_extents {
            let mut extent = self.extent_at(inode, i);
            let kept = keep.saturating_sub(index).min(extent.count as u64) as u32;
            for blk in extent.start + kept..extent.start + extent.count {
                bitmap::clear(self.bitmap_mut(), blk);
                self.superblock_mut().num_free_dblocks += 1;
            }
            index += extent.count as u64;
            if kept > 0 {
                extent.count = kept;
                self.set_extent_at(inode, i, extent);
                live = i + 1;
            }
        }
        inode.num_extents = live;
        if old_extents as usize > NUM_DIRECT_EXTENTS && live as usize <= NUM_DIRECT_EXTENTS {
            bitmap::clear(self.bitmap_mut(), inode.indirect_extent_blk);
            self.superblock_mut().num_free_dblocks += 1;
            inode.indirect_extent_blk = 0;
        }
    }
}
