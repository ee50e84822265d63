use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::MmapMut;

use crate::block::BLOCK_SIZE;

/// Represents a file system image: a writable byte buffer of a known size
/// plus a flush hook. The core never touches the backing file directly.
pub trait Image {
    /// Returns the image contents.
    fn bytes(&self) -> &[u8];

    /// Returns the image contents for mutation.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Flushes pending changes to the backing store.
    fn flush(&mut self) -> io::Result<()>;

    /// Returns the image size in bytes.
    fn size(&self) -> usize {
        self.bytes().len()
    }
}

/// An image file mapped into memory.
pub struct FileImage {
    map: MmapMut,
}

impl FileImage {
    /// Maps an existing image file into memory.
    ///
    /// # Errors
    /// Returns `Err` if:
    /// - the file cannot be opened for reading and writing
    /// - the file size is zero or not a multiple of the block size
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image size must be a non-zero multiple of {BLOCK_SIZE} bytes"),
            ));
        }
        // SAFETY: the mapping is private to this process; the image file must
        // not be modified externally while mounted.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { map })
    }
}

impl Image for FileImage {
    fn bytes(&self) -> &[u8] {
        &self.map
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    fn flush(&mut self) -> io::Result<()> {
        self.map.flush()
    }
}

/// An in-memory image, used by tests.
pub struct MemImage {
    buf: Vec<u8>,
}

impl MemImage {
    /// Constructs a zero-filled image of `size` bytes.
    ///
    /// # Panics
    /// Panics if `size` is not a non-zero multiple of the block size.
    pub fn new(size: usize) -> Self {
        assert!(size != 0 && size % BLOCK_SIZE == 0);
        Self {
            buf: vec![0u8; size],
        }
    }

    /// Constructs an image from existing contents.
    ///
    /// # Panics
    /// Panics if the length is not a non-zero multiple of the block size.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        assert!(!buf.is_empty() && buf.len() % BLOCK_SIZE == 0);
        Self { buf }
    }

    /// Returns the image contents, consuming the image.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Image for MemImage {
    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
