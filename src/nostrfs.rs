//! Path-based filesystem operations over the event store.
//!
//! Layout:
//!
//! ```text
//! /
//! └── e/
//!     └── <event id>/
//!         ├── id
//!         ├── pubkey
//!         ├── kind
//!         ├── tags
//!         ├── content
//!         └── sig
//! ```
//!
//! Every handler takes `&self` and may be called from several threads at once.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error};

use crate::{
    error::{FsError, StoreError},
    event::{Event, EventField},
    handles::HandleTable,
    path::{self, Node, EVENTS_DIR},
    storage::Store,
};

type Result<T> = std::result::Result<T, FsError>;

/// Size reported for every directory.
pub const DIR_SIZE: u64 = 4096;

const FILE_PERM: u16 = 0o444;
const DIR_PERM: u16 = 0o555;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// Attributes of a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub kind: NodeKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Attr {
    fn dir(time: SystemTime) -> Self {
        Self {
            kind: NodeKind::Directory,
            size: DIR_SIZE,
            perm: DIR_PERM,
            nlink: 2,
            atime: SystemTime::now(),
            mtime: time,
            ctime: time,
        }
    }

    fn file(size: u64, time: SystemTime) -> Self {
        Self {
            kind: NodeKind::File,
            size,
            perm: FILE_PERM,
            nlink: 1,
            atime: SystemTime::now(),
            mtime: time,
            ctime: time,
        }
    }
}

/// Access mode requested by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Decode the access bits of POSIX open flags.
    #[cfg_attr(not(feature = "fuse"), allow(dead_code))]
    pub fn from_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => AccessMode::ReadOnly,
            libc::O_WRONLY => AccessMode::WriteOnly,
            _ => AccessMode::ReadWrite,
        }
    }
}

/// What an open handle reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFile {
    pub id: String,
    pub field: EventField,
}

/// The read-only event filesystem.
pub struct NostrFs {
    store: Store,
    handles: HandleTable<OpenFile>,
}

impl NostrFs {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            handles: HandleTable::new(),
        }
    }

    /// Number of handles currently open.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Entry names of the directory at `path`, without `.` and `..`.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        debug!(path, "readdir");
        match path::resolve(path) {
            Node::Root => Ok(vec![EVENTS_DIR.to_string()]),
            Node::EventCollection => Ok(self.store.list_event_ids().map_err(store_failure)?),
            Node::EventDir(id) => {
                self.created_at(&id)?;
                Ok(EventField::ALL
                    .iter()
                    .map(|f| f.name().to_string())
                    .collect())
            }
            Node::EventField(..) => Err(FsError::NotADirectory),
            Node::Unresolved => Err(FsError::NotFound),
        }
    }

    /// Attributes of the file or directory at `path`.
    pub fn getattr(&self, path: &str) -> Result<Attr> {
        match path::resolve(path) {
            Node::Root | Node::EventCollection => Ok(Attr::dir(SystemTime::now())),
            Node::EventDir(id) => Ok(Attr::dir(self.created_at(&id)?)),
            Node::EventField(id, field) => {
                let ev = self.event(&id)?;
                let size = ev.field_bytes(field).len() as u64;
                Ok(Attr::file(size, unix_time(ev.created_at)))
            }
            Node::Unresolved => Err(FsError::NotFound),
        }
    }

    /// Open the field file at `path` and return its handle.
    ///
    /// Any write intent is refused before the path is even looked at.
    pub fn open(&self, path: &str, mode: AccessMode) -> Result<u64> {
        if mode != AccessMode::ReadOnly {
            debug!(path, ?mode, "refusing write access");
            return Err(FsError::PermissionDenied);
        }
        let node = path::resolve(path);
        if node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        match node {
            Node::EventField(id, field) => {
                self.created_at(&id)?;
                let fh = self.handles.allocate(OpenFile { id, field });
                debug!(path, fh, "open");
                Ok(fh)
            }
            _ => Err(FsError::NotFound),
        }
    }

    /// Copy up to `length` bytes of the file behind `fh`, starting at
    /// `offset`, into `buf`. Returns the number of bytes copied; zero at or
    /// past the end of the file.
    pub fn read(&self, fh: u64, buf: &mut [u8], length: usize, offset: u64) -> Result<usize> {
        let target = self.handles.resolve(fh).ok_or(FsError::InvalidHandle(fh))?;
        let ev = self.event(&target.id)?;
        let data = ev.field_bytes(target.field);
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let count = length.min(buf.len()).min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok(count)
    }

    /// Close `fh`, making its number available again.
    pub fn release(&self, fh: u64) -> Result<()> {
        if self.handles.release(fh) {
            debug!(fh, "release");
            Ok(())
        } else {
            Err(FsError::InvalidHandle(fh))
        }
    }

    fn created_at(&self, id: &str) -> Result<SystemTime> {
        match self.store.event_created_at(id).map_err(store_failure)? {
            Some(ts) => Ok(unix_time(ts)),
            None => Err(FsError::NotFound),
        }
    }

    fn event(&self, id: &str) -> Result<Event> {
        self.store
            .get_event_by_id(id)
            .map_err(store_failure)?
            .ok_or(FsError::NotFound)
    }
}

fn store_failure(e: StoreError) -> FsError {
    error!("event store failure: {e}");
    FsError::StoreUnavailable(e)
}

fn unix_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}
