//! FUSE adapter.
//!
//! Bridges the kernel's inode-based callbacks onto the path-based async
//! [`Engine`]: a bidirectional inode/path table translates inodes back to
//! mount-relative paths, and every callback drives the engine to completion
//! on the tokio runtime via `block_on`. Errors cross the boundary here, as
//! errnos, and nowhere else.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::{EIO, ENOENT, EPERM, EROFS};

use crate::error::Error;

use super::engine::{Attr, Engine, FileKind};
use super::handle::{ReadHandle, WriteHandle};

/// How long the kernel may cache attributes and entries.
const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;
const GENERATION: u64 = 0;

fn errno(err: &Error) -> i32 {
    match err {
        Error::NotFound(_) => ENOENT,
        Error::Permission(_) => EPERM,
        Error::ReadOnly => EROFS,
        Error::Backend(_) | Error::InvalidPath(_) => EIO,
    }
}

enum OpenFile {
    Read { ino: u64, handle: ReadHandle },
    Write(Arc<WriteHandle>),
}

pub struct SisuFs {
    engine: Arc<Engine>,
    runtime: tokio::runtime::Handle,
    /// ino -> mount-relative path
    paths: HashMap<u64, String>,
    /// mount-relative path -> ino
    inodes: HashMap<String, u64>,
    next_ino: u64,
    handles: HashMap<u64, OpenFile>,
    next_fh: u64,
    uid: u32,
    gid: u32,
}

impl SisuFs {
    pub fn new(engine: Arc<Engine>, runtime: tokio::runtime::Handle) -> Self {
        let mut paths = HashMap::new();
        let mut inodes = HashMap::new();
        paths.insert(ROOT_INO, String::new());
        inodes.insert(String::new(), ROOT_INO);
        Self {
            engine,
            runtime,
            paths,
            inodes,
            next_ino: ROOT_INO + 1,
            handles: HashMap::new(),
            next_fh: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn path_for(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    fn ino_for(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.inodes.get(path) {
            return *ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.paths.insert(ino, path.to_string());
        self.inodes.insert(path.to_string(), ino);
        ino
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let parent_path = self.path_for(parent)?;
        let name = name.to_str()?;
        if parent_path.is_empty() {
            Some(name.to_string())
        } else {
            Some(format!("{parent_path}/{name}"))
        }
    }

    fn file_attr(&self, ino: u64, attr: &Attr) -> FileAttr {
        let mtime = attr.mtime.unwrap_or(SystemTime::UNIX_EPOCH);
        let kind = match attr.kind {
            FileKind::Directory => FileType::Directory,
            FileKind::File => FileType::RegularFile,
        };
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm: attr.perm,
            nlink: if attr.is_dir() { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn alloc_fh(&mut self, file: OpenFile) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, file);
        fh
    }

    /// Content length of an open read handle for `ino`, if any.
    ///
    /// Synthesized files stat with a placeholder size until their bytes are
    /// computed; once the file is open the handle knows the true length and
    /// must win, or the kernel clamps reads at the placeholder.
    fn open_size(&self, ino: u64) -> Option<u64> {
        self.handles.values().find_map(|file| match file {
            OpenFile::Read {
                ino: open_ino,
                handle,
            } if *open_ino == ino => Some(handle.len()),
            _ => None,
        })
    }

    fn resolved_attr(&self, ino: u64, mut attr: Attr) -> FileAttr {
        if !attr.is_dir() {
            if let Some(size) = self.open_size(ino) {
                attr.size = size;
            }
        }
        self.file_attr(ino, &attr)
    }
}

impl Filesystem for SisuFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        tracing::debug!(%path, "lookup");

        let engine = Arc::clone(&self.engine);
        match self.runtime.block_on(async { engine.getattr(&path).await }) {
            Ok(attr) => {
                let ino = self.ino_for(&path);
                reply.entry(&TTL, &self.resolved_attr(ino, attr), GENERATION);
            }
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        tracing::debug!(%path, "getattr");

        let engine = Arc::clone(&self.engine);
        match self.runtime.block_on(async { engine.getattr(&path).await }) {
            Ok(attr) => reply.attr(&TTL, &self.resolved_attr(ino, attr)),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        tracing::debug!(%path, offset, "readdir");

        let engine = Arc::clone(&self.engine);
        let listing = self
            .runtime
            .block_on(async { engine.read_dir(&path).await });
        let children = match listing {
            Ok(children) => children,
            Err(err) => {
                reply.error(errno(&err));
                return;
            }
        };

        let parent_ino = if path.is_empty() {
            ROOT_INO
        } else {
            let parent = match path.rfind('/') {
                Some(idx) => path[..idx].to_string(),
                None => String::new(),
            };
            self.ino_for(&parent)
        };

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        entries.push((parent_ino, FileType::Directory, "..".to_string()));
        for child in children {
            let child_path = if path.is_empty() {
                child.name.clone()
            } else {
                format!("{path}/{}", child.name)
            };
            let kind = if child.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((self.ino_for(&child_path), kind, child.name));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        tracing::debug!(%path, "open");

        let engine = Arc::clone(&self.engine);
        match self.runtime.block_on(async { engine.open(&path).await }) {
            Ok(handle) => {
                let fh = self.alloc_fh(OpenFile::Read { ino, handle });
                reply.opened(fh, 0);
            }
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        tracing::debug!(%path, "create");

        let engine = Arc::clone(&self.engine);
        match self.runtime.block_on(async { engine.create(&path).await }) {
            Ok(handle) => {
                let ino = self.ino_for(&path);
                let attr = Attr {
                    kind: FileKind::File,
                    perm: 0o666,
                    size: 0,
                    mtime: Some(SystemTime::now()),
                };
                let fuse_attr = self.file_attr(ino, &attr);
                let fh = self.alloc_fh(OpenFile::Write(handle));
                reply.created(&TTL, &fuse_attr, GENERATION, fh, 0);
            }
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.handles.get(&fh) {
            Some(OpenFile::Read { handle, .. }) => reply.data(handle.read_at(offset, size)),
            Some(OpenFile::Write(handle)) => reply.data(&handle.read_at(offset, size)),
            None => reply.error(EIO),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.handles.get(&fh) {
            Some(OpenFile::Write(handle)) => {
                let written = handle.write(data, offset);
                reply.written(written as u32);
            }
            Some(OpenFile::Read { .. }) => reply.error(errno(&Error::ReadOnly)),
            None => reply.error(EIO),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.handles.get(&fh) {
            Some(OpenFile::Write(handle)) => {
                let handle = Arc::clone(handle);
                match self.runtime.block_on(async { handle.flush().await }) {
                    Ok(()) => reply.ok(),
                    Err(err) => {
                        tracing::warn!(error = %err, "flush failed");
                        reply.error(errno(&err));
                    }
                }
            }
            _ => reply.ok(),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(OpenFile::Write(handle)) = self.handles.remove(&fh) {
            handle.release();
        }
        reply.ok();
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_for(ino) else {
            reply.error(ENOENT);
            return;
        };

        // Only in-flight writes can be truncated; everything else is a
        // read-only view of the backend.
        if let Some(requested) = size {
            if !self.engine.truncate_pending(&path, requested) {
                reply.error(errno(&Error::ReadOnly));
                return;
            }
        }

        let engine = Arc::clone(&self.engine);
        match self.runtime.block_on(async { engine.getattr(&path).await }) {
            Ok(attr) => reply.attr(&TTL, &self.resolved_attr(ino, attr)),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        tracing::debug!(%path, "unlink");

        let engine = Arc::clone(&self.engine);
        match self.runtime.block_on(async { engine.unlink(&path).await }) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        tracing::debug!(%path, "mkdir");

        self.engine.mkdir(&path);
        let ino = self.ino_for(&path);
        let attr = Attr {
            kind: FileKind::Directory,
            perm: 0o777,
            size: 0,
            mtime: Some(SystemTime::now()),
        };
        reply.entry(&TTL, &self.file_attr(ino, &attr), GENERATION);
    }

    fn access(&mut self, _req: &Request<'_>, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }
}

/// A live mount; unmounts when consumed.
pub struct MountHandle {
    session: fuser::BackgroundSession,
}

impl MountHandle {
    /// Unmount and wait for the session to end.
    pub fn unmount(self) {
        self.session.join();
    }
}

/// Mount the engine at `mountpoint` and serve in the background.
pub fn mount(
    engine: Arc<Engine>,
    runtime: tokio::runtime::Handle,
    mountpoint: &Path,
) -> std::io::Result<MountHandle> {
    let fs = SisuFs::new(engine, runtime);
    let options = vec![MountOption::FSName("sisu".to_string())];
    let session = fuser::spawn_mount2(fs, mountpoint, &options)?;
    Ok(MountHandle { session })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_the_taxonomy() {
        assert_eq!(errno(&Error::not_found("x")), ENOENT);
        assert_eq!(errno(&Error::Permission("x".into())), EPERM);
        assert_eq!(errno(&Error::ReadOnly), EROFS);
        assert_eq!(errno(&Error::Backend("x".into())), EIO);
        assert_eq!(errno(&Error::InvalidPath("x".into())), EIO);
    }

    #[tokio::test]
    async fn inode_allocation_is_stable_per_path() {
        let engine = Arc::new(Engine::new(vec!["default".into()], vec![]));
        let mut fs = SisuFs::new(engine, tokio::runtime::Handle::current());

        let a = fs.ino_for("default/global/s3");
        let b = fs.ino_for("default/global/s3");
        let c = fs.ino_for("default/global/iam");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(fs.path_for(a).as_deref(), Some("default/global/s3"));
        assert_eq!(fs.path_for(ROOT_INO).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn child_paths_join_under_the_parent() {
        let engine = Arc::new(Engine::new(vec!["default".into()], vec![]));
        let mut fs = SisuFs::new(engine, tokio::runtime::Handle::current());

        let child = fs.child_path(ROOT_INO, OsStr::new("default")).unwrap();
        assert_eq!(child, "default");

        let ino = fs.ino_for("default");
        let child = fs.child_path(ino, OsStr::new("global")).unwrap();
        assert_eq!(child, "default/global");
    }
}
