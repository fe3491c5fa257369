//! FUSE binding for [`NostrFs`].
//!
//! The kernel speaks in inodes while the handlers speak in paths, so this
//! module keeps an inode table and translates each callback.

use std::path::Path;

use anyhow::Result;

use crate::nostrfs::NostrFs;

/// Mount `fs` read-only at `at` and serve requests until it is unmounted.
pub fn mount(fs: NostrFs, at: &Path, allow_other: bool) -> Result<()> {
    #[cfg(feature = "fuse")]
    {
        use anyhow::Context;

        let mut options = vec![
            fuser::MountOption::RO,
            fuser::MountOption::FSName("nostrfs".to_owned()),
            fuser::MountOption::AutoUnmount,
        ];
        if allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        tracing::info!(mountpoint = %at.display(), "mounting");
        fuser::mount2(adapter::EventFuse::new(fs), at, &options)
            .with_context(|| format!("mount {}", at.display()))?;
        Ok(())
    }
    #[cfg(not(feature = "fuse"))]
    {
        let _ = fs;
        let _ = at;
        let _ = allow_other;
        Err(anyhow::anyhow!(
            "fuse support disabled; rebuild nostrfs with --features fuse"
        ))
    }
}

#[cfg(feature = "fuse")]
mod adapter {
    use std::{
        collections::HashMap,
        ffi::OsStr,
        sync::{Mutex, MutexGuard},
        time::Duration,
    };

    use crate::{
        error::FsError,
        nostrfs::{AccessMode, Attr, NodeKind, NostrFs},
        path,
    };

    const ROOT_INODE: u64 = 1;
    const TTL: Duration = Duration::from_secs(1);
    const BLOCK_SIZE: u32 = 512;

    pub(super) struct EventFuse {
        fs: NostrFs,
        inodes: Mutex<InodeTable>,
    }

    impl EventFuse {
        pub(super) fn new(fs: NostrFs) -> Self {
            Self {
                fs,
                inodes: Mutex::new(InodeTable::new()),
            }
        }

        fn inodes(&self) -> MutexGuard<'_, InodeTable> {
            self.inodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        fn path_for(&self, inode: u64) -> Option<String> {
            self.inodes().path_for(inode).map(str::to_owned)
        }

        fn inode_for(&self, path: &str) -> u64 {
            self.inodes().insert(path)
        }

        fn looked_up(&self, path: &str) -> u64 {
            self.inodes().lookup(path)
        }
    }

    fn file_type(kind: NodeKind) -> fuser::FileType {
        match kind {
            NodeKind::Directory => fuser::FileType::Directory,
            NodeKind::File => fuser::FileType::RegularFile,
        }
    }

    fn to_fuse_attr(inode: u64, attr: &Attr, req: &fuser::Request<'_>) -> fuser::FileAttr {
        fuser::FileAttr {
            ino: inode,
            size: attr.size,
            blocks: attr.size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.ctime,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: req.uid(),
            gid: req.gid(),
            rdev: 0,
            flags: 0,
            blksize: BLOCK_SIZE,
        }
    }

    impl fuser::Filesystem for EventFuse {
        fn lookup(
            &mut self,
            req: &fuser::Request<'_>,
            parent: u64,
            name: &OsStr,
            reply: fuser::ReplyEntry,
        ) {
            let Some(parent_path) = self.path_for(parent) else {
                reply.error(libc::ENOENT);
                return;
            };
            let child = path::join(&parent_path, &name.to_string_lossy());
            match self.fs.getattr(&child) {
                Ok(attr) => {
                    let inode = self.looked_up(&child);
                    reply.entry(&TTL, &to_fuse_attr(inode, &attr, req), 0);
                }
                Err(e) => reply.error(e.errno()),
            }
        }

        fn forget(&mut self, _req: &fuser::Request<'_>, inode: u64, nlookup: u64) {
            self.inodes().forget(inode, nlookup);
        }

        fn getattr(
            &mut self,
            req: &fuser::Request<'_>,
            inode: u64,
            _fh: Option<u64>,
            reply: fuser::ReplyAttr,
        ) {
            let Some(path) = self.path_for(inode) else {
                reply.error(libc::ENOENT);
                return;
            };
            match self.fs.getattr(&path) {
                Ok(attr) => reply.attr(&TTL, &to_fuse_attr(inode, &attr, req)),
                Err(e) => reply.error(e.errno()),
            }
        }

        fn readdir(
            &mut self,
            _req: &fuser::Request<'_>,
            inode: u64,
            _fh: u64,
            offset: i64,
            mut reply: fuser::ReplyDirectory,
        ) {
            let Some(path) = self.path_for(inode) else {
                reply.error(libc::ENOENT);
                return;
            };
            let entries = match self.fs.readdir(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            };
            let child_type = match path::resolve(&path) {
                path::Node::EventDir(_) => fuser::FileType::RegularFile,
                _ => fuser::FileType::Directory,
            };
            let mut listing = Vec::with_capacity(entries.len().saturating_add(2));
            listing.push((inode, fuser::FileType::Directory, ".".to_owned()));
            let parent = self.inode_for(&path::parent(&path));
            listing.push((parent, fuser::FileType::Directory, "..".to_owned()));
            for name in entries {
                let child = self.inode_for(&path::join(&path, &name));
                listing.push((child, child_type, name));
            }
            let start = offset.max(0) as usize;
            for (idx, (ino, kind, name)) in listing.into_iter().enumerate().skip(start) {
                if reply.add(ino, (idx + 1) as i64, kind, name) {
                    break;
                }
            }
            reply.ok();
        }

        fn open(
            &mut self,
            _req: &fuser::Request<'_>,
            inode: u64,
            flags: i32,
            reply: fuser::ReplyOpen,
        ) {
            let Some(path) = self.path_for(inode) else {
                reply.error(libc::ENOENT);
                return;
            };
            match self.fs.open(&path, AccessMode::from_flags(flags)) {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => reply.error(e.errno()),
            }
        }

        fn read(
            &mut self,
            _req: &fuser::Request<'_>,
            _inode: u64,
            fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: fuser::ReplyData,
        ) {
            let Ok(offset) = u64::try_from(offset) else {
                reply.error(libc::EINVAL);
                return;
            };
            let mut buf = vec![0u8; size as usize];
            match self.fs.read(fh, &mut buf, size as usize, offset) {
                Ok(n) => reply.data(&buf[..n]),
                Err(e) => reply.error(e.errno()),
            }
        }

        fn release(
            &mut self,
            _req: &fuser::Request<'_>,
            _inode: u64,
            fh: u64,
            _flags: i32,
            _lock_owner: Option<u64>,
            _flush: bool,
            reply: fuser::ReplyEmpty,
        ) {
            match self.fs.release(fh) {
                Ok(()) => reply.ok(),
                Err(e @ FsError::InvalidHandle(_)) => {
                    tracing::warn!(fh, "release of unknown handle");
                    reply.error(e.errno());
                }
                Err(e) => reply.error(e.errno()),
            }
        }
    }

    /// Stable inode numbers for paths seen by the kernel.
    ///
    /// Entries handed out by `lookup` carry the kernel's reference count and
    /// are dropped once it forgets them. Inode numbers are never reused.
    struct InodeTable {
        by_inode: HashMap<u64, String>,
        by_path: HashMap<String, u64>,
        lookups: HashMap<u64, u64>,
        next_inode: u64,
    }

    impl InodeTable {
        fn new() -> Self {
            let mut table = Self {
                by_inode: HashMap::new(),
                by_path: HashMap::new(),
                lookups: HashMap::new(),
                next_inode: ROOT_INODE + 1,
            };
            table.by_inode.insert(ROOT_INODE, "/".to_owned());
            table.by_path.insert("/".to_owned(), ROOT_INODE);
            table
        }

        fn insert(&mut self, path: &str) -> u64 {
            if let Some(existing) = self.by_path.get(path) {
                return *existing;
            }
            let inode = self.next_inode;
            self.next_inode = self.next_inode.saturating_add(1);
            self.by_inode.insert(inode, path.to_owned());
            self.by_path.insert(path.to_owned(), inode);
            inode
        }

        /// Like `insert`, but counts one kernel reference to the inode.
        fn lookup(&mut self, path: &str) -> u64 {
            let inode = self.insert(path);
            *self.lookups.entry(inode).or_insert(0) += 1;
            inode
        }

        fn forget(&mut self, inode: u64, nlookup: u64) {
            if inode == ROOT_INODE {
                return;
            }
            let Some(count) = self.lookups.get_mut(&inode) else {
                return;
            };
            *count = count.saturating_sub(nlookup);
            if *count > 0 {
                return;
            }
            self.lookups.remove(&inode);
            if let Some(path) = self.by_inode.remove(&inode) {
                self.by_path.remove(&path);
            }
        }

        fn path_for(&self, inode: u64) -> Option<&str> {
            self.by_inode.get(&inode).map(String::as_str)
        }
    }

}
