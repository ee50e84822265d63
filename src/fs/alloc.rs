//! Extent-based data-block allocation.

use log::trace;

use crate::block::BLOCK_SIZE;
use crate::fs::{
    bitmap,
    inode::{Extent, Inode, MAX_EXTENTS, NUM_DIRECT_EXTENTS},
    Error, Filesystem, Result,
};
use crate::image::Image;

impl<I: Image> Filesystem<I> {
    /// Extends `inode` by enough data blocks to hold `additional` more bytes,
    /// after accounting for the slack in a partially filled last block.
    ///
    /// The last extent is grown in place when the blocks after it are free;
    /// the rest is taken from the first free run of the needed length, or
    /// split across shorter runs when no single run is long enough. The 11th
    /// extent also allocates the indirect block.
    ///
    /// On a no-space failure, blocks already taken remain charged to the
    /// inode; they are released by truncate or deletion. The caller must
    /// write the inode record back even when this returns `Err`.
    pub(crate) fn allocate_data_blocks(&mut self, inode: &mut Inode, additional: u64) -> Result<()> {
        let slack = match inode.size % BLOCK_SIZE as u64 {
            0 => 0,
            partial => BLOCK_SIZE as u64 - partial,
        };
        let mut need = additional.saturating_sub(slack).div_ceil(BLOCK_SIZE as u64) as u32;
        if need == 0 {
            return Ok(());
        }
        if self.superblock().num_free_dblocks < need {
            return Err(Error::NoSpace);
        }
        let dblocks = self.layout().data_blocks;

        // Grow the last extent in place first.
        if inode.num_extents > 0 {
            let last = self.extent_at(inode, inode.num_extents - 1);
            let tail = bitmap::tail_length(self.bitmap(), dblocks, last.start + last.count);
            let grow = need.min(tail);
            if grow > 0 {
                for blk in last.start + last.count..last.start + last.count + grow {
                    bitmap::set(self.bitmap_mut(), blk);
                }
                self.set_extent_at(
                    inode,
                    inode.num_extents - 1,
                    Extent {
                        start: last.start,
                        count: last.count + grow,
                    },
                );
                self.superblock_mut().num_free_dblocks -= grow;
                need -= grow;
                trace!("grew last extent at {} by {grow} blocks", last.start);
            }
        }

        while need > 0 {
            if inode.num_extents == MAX_EXTENTS {
                return Err(Error::NoSpace);
            }
            let run = bitmap::find_run(self.bitmap(), dblocks, need);
            if run.len == 0 {
                return Err(Error::NoSpace);
            }
            for blk in run.start..run.start + run.len {
                bitmap::set(self.bitmap_mut(), blk);
            }
            self.superblock_mut().num_free_dblocks -= run.len;
            need -= run.len;

            // The transition past the direct array allocates the indirect
            // block; the run above is already marked, so the two cannot
            // collide.
            if inode.num_extents as usize == NUM_DIRECT_EXTENTS {
                let indirect = bitmap::find_run(self.bitmap(), dblocks, 1);
                if indirect.len == 0 {
                    return Err(Error::NoSpace);
                }
                bitmap::set(self.bitmap_mut(), indirect.start);
                self.superblock_mut().num_free_dblocks -= 1;
                inode.indirect_extent_blk = indirect.start;
                self.data_block_mut(indirect.start).fill(0);
                trace!("allocated indirect block {}", indirect.start);
            }

            let index = inode.num_extents;
            inode.num_extents += 1;
            self.set_extent_at(
                inode,
                index,
                Extent {
                    start: run.start,
                    count: run.len,
                },
            );
            trace!("extent {index}: {} blocks at {}", run.len, run.start);
        }
        Ok(())
    }

    /// Releases every data block of `inode`, including the indirect block.
    pub(crate) fn free_extents(&mut self, inode: &mut Inode) {
        for index in 0..inode.num_extents {
            let extent = self.extent_at(inode, index);
            for blk in extent.start..extent.start + extent.count {
                bitmap::clear(self.bitmap_mut(), blk);
            }
            self.superblock_mut().num_free_dblocks += extent.count;
        }
        if inode.num_extents as usize > NUM_DIRECT_EXTENTS {
            bitmap::clear(self.bitmap_mut(), inode.indirect_extent_blk);
            self.superblock_mut().num_free_dblocks += 1;
        }
        inode.num_extents = 0;
        inode.indirect_extent_blk = 0;
        inode.direct_extents = [Extent::default(); NUM_DIRECT_EXTENTS];
    }
}
