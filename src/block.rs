/// Block size in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Index of a block within the data region (zero-based).
pub type BlockIdx = u32;

/// Index of an inode within the inode table.
pub type Ino = u32;
