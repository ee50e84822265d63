//! FUSE bridge: translates kernel requests arriving through `fuser` into the
//! path-based core operations and maps failures back to errnos.
//!
//! The kernel speaks inode numbers while the core speaks absolute paths, so
//! the adapter keeps a registry of the paths it has handed out. It also
//! chunks read and write requests to single-block ranges, which is the
//! guarantee the core I/O assumes.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime};

use fuser::{FileAttr, FileType, Filesystem, TimeOrNow};
use log::{debug, warn};

use crate::{
    block::{Ino, BLOCK_SIZE},
    fs::{
        self,
        ops::{Attr, SetTime},
    },
    image::Image,
};

const TTL: Duration = Duration::from_secs(1);
const PERMS: u32 = 0o7777;

/// Kernel inode number of a core inode (the kernel reserves 0; its root is 1).
fn fuse_ino(ino: Ino) -> u64 {
    u64::from(ino) + 1
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn file_attr(attr: &Attr) -> FileAttr {
    let kind = if fs::inode::mode_is_dir(attr.mode) {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    FileAttr {
        ino: fuse_ino(attr.ino),
        size: attr.size,
        blocks: attr.blocks512,
        atime: SystemTime::from(attr.mtime),
        mtime: SystemTime::from(attr.mtime),
        ctime: SystemTime::from(attr.mtime),
        crtime: SystemTime::from(attr.mtime),
        kind,
        perm: (attr.mode & PERMS) as u16,
        nlink: attr.links,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}

pub struct A1Fuse<I: Image> {
    fs: fs::Filesystem<I>,
    /// Paths handed out to the kernel, by kernel inode number.
    paths: HashMap<u64, String>,
}

impl<I: Image> A1Fuse<I> {
    pub fn new(fs: fs::Filesystem<I>) -> Self {
        let mut paths = HashMap::new();
        paths.insert(fuse_ino(fs::ROOT_INO), String::from("/"));
        Self { fs, paths }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    fn register(&mut self, attr: &Attr, path: String) {
        self.paths.insert(fuse_ino(attr.ino), path);
    }

    fn forget_path(&mut self, path: &str) {
        self.paths.retain(|_, p| p != path);
    }

    /// Resolves the kernel's parent inode and entry name to a core path.
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, libc::c_int> {
        let parent_path = self.path_of(parent).ok_or(libc::ENOENT)?;
        let name = name.to_str().ok_or(libc::EILSEQ)?;
        Ok(join(&parent_path, name))
    }
}

impl<I: Image> Filesystem for A1Fuse<I> {
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.fs.flush() {
            warn!("failed to flush the image on unmount: {e}");
        }
    }

    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match self.fs.getattr(&path) {
            Ok(attr) => {
                self.register(&attr, path);
                reply.entry(&TTL, &file_attr(&attr), 0);
            }
            Err(e) => reply.error(e.into()),
        }
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr)),
            Err(e) => reply.error(e.into()),
        }
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        if let Some(size) = size {
            if let Err(e) = self.fs.truncate(&path, size) {
                return reply.error(e.into());
            }
        }
        let set_time = match mtime {
            Some(TimeOrNow::Now) => SetTime::Now,
            Some(TimeOrNow::SpecificTime(st)) => SetTime::Set(st.into()),
            None => SetTime::Omit,
        };
        if let Err(e) = self.fs.utimens(&path, set_time) {
            return reply.error(e.into());
        }
        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr)),
            Err(e) => reply.error(e.into()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        if let Err(e) = self.fs.mkdir(&path, mode & PERMS & !umask) {
            return reply.error(e.into());
        }
        match self.fs.getattr(&path) {
            Ok(attr) => {
                self.register(&attr, path);
                reply.entry(&TTL, &file_attr(&attr), 0);
            }
            Err(e) => reply.error(e.into()),
        }
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.into()),
        }
    }

    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let mode = libc::S_IFREG as u32 | (mode & PERMS & !umask);
        if let Err(e) = self.fs.create(&path, mode) {
            return reply.error(e.into());
        }
        match self.fs.getattr(&path) {
            Ok(attr) => {
                self.register(&attr, path);
                reply.created(&TTL, &file_attr(&attr), 0, 0, 0);
            }
            Err(e) => reply.error(e.into()),
        }
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.into()),
        }
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let mut buf = vec![0u8; size as usize];
        let mut pos = offset as u64;
        let mut filled = 0usize;
        // The core reads one block-contained range at a time.
        while filled < buf.len() {
            let in_block = BLOCK_SIZE - pos as usize % BLOCK_SIZE;
            let want = in_block.min(buf.len() - filled);
            match self.fs.read(&path, &mut buf[filled..filled + want], pos) {
                Ok(read) => {
                    filled += read;
                    pos += read as u64;
                    if read < want {
                        break;
                    }
                }
                Err(e) => return reply.error(e.into()),
            }
        }
        reply.data(&buf[..filled]);
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let mut pos = offset as u64;
        let mut written = 0usize;
        while written < data.len() {
            let in_block = BLOCK_SIZE - pos as usize % BLOCK_SIZE;
            let chunk = in_block.min(data.len() - written);
            match self.fs.write(&path, &data[written..written + chunk], pos) {
                Ok(n) => {
                    written += n;
                    pos += n as u64;
                }
                Err(e) => return reply.error(e.into()),
            }
        }
        reply.written(written as u32);
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let mut entries: Vec<(Vec<u8>, Ino)> = Vec::new();
        let res = self.fs.readdir(&path, |name, ino| {
            entries.push((name.to_vec(), ino));
            true
        });
        if let Err(e) = res {
            return reply.error(e.into());
        }
        for (i, (name, ino)) in entries.iter().enumerate().skip(offset as usize) {
            let kind = if self.fs.inode(*ino).is_dir() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            let full = reply.add(
                fuse_ino(*ino),
                (i + 1) as i64,
                kind,
                OsStr::from_bytes(name),
            );
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let st = self.fs.statfs();
        debug!("statfs: {st:?}");
        reply.statfs(
            st.total_blocks,
            st.free_blocks,
            st.free_blocks,
            st.total_inodes,
            st.free_inodes,
            st.block_size,
            st.name_max,
            st.block_size,
        );
    }
}
