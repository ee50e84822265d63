//! Formatting, detection, and remount round-trips against real image files.

use std::io::{Seek, SeekFrom, Write};

use a1fs::block::BLOCK_SIZE;
use a1fs::fs::{self, Filesystem};
use a1fs::image::{FileImage, Image, MemImage};

fn image_file(blocks: usize) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file()
        .set_len((blocks * BLOCK_SIZE) as u64)
        .unwrap();
    file
}

#[test]
fn format_writes_a_detectable_superblock() {
    let file = image_file(64);
    let image = FileImage::open(file.path()).unwrap();
    assert!(!fs::is_formatted(image.bytes()));

    let fs = Filesystem::format(image, 256).unwrap();
    let image = fs.unmount().unwrap();
    assert!(fs::is_formatted(image.bytes()));
}

#[test]
fn detection_rejects_a_corrupted_superblock() {
    let file = image_file(64);
    let fs = Filesystem::format(FileImage::open(file.path()).unwrap(), 256).unwrap();
    drop(fs.unmount().unwrap());

    // Flip one byte of the magic number.
    let mut handle = file.reopen().unwrap();
    handle.seek(SeekFrom::Start(BLOCK_SIZE as u64)).unwrap();
    handle.write_all(&[0x00]).unwrap();

    let image = FileImage::open(file.path()).unwrap();
    assert!(!fs::is_formatted(image.bytes()));
    assert_eq!(Filesystem::mount(image).err(), Some(libc::EINVAL));
}

#[test]
fn detection_rejects_an_inconsistent_layout() {
    let file = image_file(64);
    let fs = Filesystem::format(FileImage::open(file.path()).unwrap(), 256).unwrap();
    drop(fs.unmount().unwrap());

    // Corrupt the recorded inode count; the re-derived region offsets no
    // longer agree with the stored ones.
    let mut image = FileImage::open(file.path()).unwrap();
    let offset = BLOCK_SIZE + 16;
    image.bytes_mut()[offset..offset + 4].copy_from_slice(&1u32.to_ne_bytes());
    image.flush().unwrap();

    let image = FileImage::open(file.path()).unwrap();
    assert!(!fs::is_formatted(image.bytes()));
}

#[test]
fn format_rejects_an_undersized_image() {
    let file = image_file(2);
    let image = FileImage::open(file.path()).unwrap();
    assert_eq!(Filesystem::format(image, 16).err(), Some(libc::ENOSPC));
}

#[test]
fn open_rejects_a_misaligned_image() {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(1000).unwrap();
    assert!(FileImage::open(file.path()).is_err());
}

#[test]
fn reformat_resets_the_tree() {
    let file = image_file(64);
    let mut fs = Filesystem::format(FileImage::open(file.path()).unwrap(), 256).unwrap();
    fs.mkdir("/old", 0o755).unwrap();
    drop(fs.unmount().unwrap());

    let fs = Filesystem::format(FileImage::open(file.path()).unwrap(), 128).unwrap();
    let st = fs.statfs();
    assert_eq!(st.free_inodes, 127);
    let mut names = Vec::new();
    fs.readdir("/", |name, _| {
        names.push(name.to_vec());
        true
    })
    .unwrap();
    assert_eq!(names, [b".".to_vec(), b"..".to_vec()]);
}

#[test]
fn remount_from_disk_preserves_contents() {
    let file = image_file(64);
    let mut fs = Filesystem::format(FileImage::open(file.path()).unwrap(), 256).unwrap();
    fs.mkdir("/sub", 0o755).unwrap();
    fs.create("/sub/data", libc::S_IFREG as u32 | 0o644).unwrap();
    fs.write("/sub/data", b"survives a remount", 0).unwrap();
    drop(fs.unmount().unwrap());

    let fs = Filesystem::mount(FileImage::open(file.path()).unwrap()).unwrap();
    let mut buf = [0u8; 18];
    assert_eq!(fs.read("/sub/data", &mut buf, 0).unwrap(), 18);
    assert_eq!(&buf, b"survives a remount");
}

#[test]
fn memory_and_file_images_format_identically() {
    let file = image_file(64);
    let from_file = Filesystem::format(FileImage::open(file.path()).unwrap(), 256).unwrap();
    let from_mem = Filesystem::format(MemImage::new(64 * BLOCK_SIZE), 256).unwrap();
    assert_eq!(
        from_file.superblock().num_free_dblocks,
        from_mem.superblock().num_free_dblocks
    );
    assert_eq!(from_file.layout(), from_mem.layout());
}
