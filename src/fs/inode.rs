use std::time::{Duration, SystemTime, UNIX_EPOCH};

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::block::{BlockIdx, BLOCK_SIZE};

/// [Inode] size.
pub const INODE_SIZE: usize = size_of::<Inode>();

/// How many extents fit in the inode record itself.
pub const NUM_DIRECT_EXTENTS: usize = 10;

/// Hard cap on extents per inode (direct plus indirect).
pub const MAX_EXTENTS: u32 = 512;

/// [Extent] size.
pub const EXTENT_SIZE: usize = size_of::<Extent>();

/// How many extents fit in an indirect block.
pub const EXTENTS_PER_BLOCK: usize = BLOCK_SIZE / EXTENT_SIZE;

/// A wall-clock timestamp with nanosecond precision.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    /// Reads the current wall clock. Returns `None` if the clock is not
    /// available (e.g. the system time predates the epoch).
    pub fn now() -> Option<Self> {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
        Some(Self {
            sec: i64::try_from(elapsed.as_secs()).ok()?,
            nsec: i64::from(elapsed.subsec_nanos()),
        })
    }
}

impl From<Timespec> for SystemTime {
    fn from(value: Timespec) -> Self {
        if value.sec < 0 {
            return UNIX_EPOCH;
        }
        UNIX_EPOCH + Duration::new(value.sec as u64, value.nsec as u32)
    }
}

impl From<SystemTime> for Timespec {
    fn from(value: SystemTime) -> Self {
        match value.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Self {
                sec: elapsed.as_secs() as i64,
                nsec: i64::from(elapsed.subsec_nanos()),
            },
            Err(_) => Self::default(),
        }
    }
}

/// A contiguous run of data-region blocks belonging to one inode.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable)]
pub struct Extent {
    /// First data-block index of the run.
    pub start: BlockIdx,
    /// Number of blocks in the run (at least 1 while live).
    pub count: u32,
}

/// Describes one file or directory.
///
/// `links == 0` marks the slot free; this is the sole liveness predicate.
/// Extents beyond the first [NUM_DIRECT_EXTENTS] live in the indirect block.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[derive(FromBytes, IntoBytes, Immutable)]
pub struct Inode {
    /// File type and permission bits.
    pub mode: u32,
    pub links: u32,
    /// File size in bytes.
    pub size: u64,
    pub mtime: Timespec,
    pub num_extents: u32,
    /// Data-block index of the extent overflow block; meaningful only when
    /// `num_extents > NUM_DIRECT_EXTENTS`.
    pub indirect_extent_blk: BlockIdx,
    pub direct_extents: [Extent; NUM_DIRECT_EXTENTS],
}

impl Inode {
    /// Constructs a freshly allocated inode.
    pub fn init(mode: u32, links: u32, mtime: Timespec) -> Self {
        Self {
            mode,
            links,
            size: 0,
            mtime,
            num_extents: 0,
            indirect_extent_blk: 0,
            direct_extents: [Extent::default(); NUM_DIRECT_EXTENTS],
        }
    }

    /// Checks whether the inode describes a directory.
    pub fn is_dir(&self) -> bool {
        mode_is_dir(self.mode)
    }
}

/// Checks whether a mode word has the directory type bit set.
pub fn mode_is_dir(mode: u32) -> bool {
    mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
}

/// Walks an inode's logical data blocks in order: block order within each
/// extent, extents in stored order. Single-pass; construct a new walker to
/// restart.
pub struct Blocks {
    extents: Vec<Extent>,
    ext: usize,
    off: u32,
}

impl Blocks {
    pub fn new(extents: Vec<Extent>) -> Self {
        Self {
            extents,
            ext: 0,
            off: 0,
        }
    }
}

impl Iterator for Blocks {
    type Item = BlockIdx;

    fn next(&mut self) -> Option<BlockIdx> {
        while let Some(extent) = self.extents.get(self.ext) {
            if self.off < extent.count {
                let blk = extent.start + self.off;
                self.off += 1;
                return Some(blk);
            }
            self.ext += 1;
            self.off = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes() {
        assert_eq!(INODE_SIZE, 120);
        assert_eq!(EXTENT_SIZE, 8);
        assert_eq!(EXTENTS_PER_BLOCK, 512);
    }

    #[test]
    fn blocks_walk_extents_in_order() {
        let blocks = Blocks::new(vec![
            Extent { start: 7, count: 2 },
            Extent { start: 3, count: 1 },
            Extent { start: 20, count: 3 },
        ]);
        assert_eq!(blocks.collect::<Vec<_>>(), [7, 8, 3, 20, 21, 22]);
    }

    #[test]
    fn blocks_of_empty_inode_yield_nothing() {
        assert_eq!(Blocks::new(Vec::new()).next(), None);
    }

    #[test]
    fn dir_mode_detection() {
        assert!(mode_is_dir(libc::S_IFDIR as u32 | 0o777));
        assert!(!mode_is_dir(libc::S_IFREG as u32 | 0o644));
    }
}
