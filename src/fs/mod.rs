//! Mounted filesystem: mount/unmount reference counting, a bounded
//! file-descriptor table, path validation, and the file/directory
//! operations built on top of a `RawFilesystem` backend.

pub mod backend;
pub mod handle;
pub mod path;

use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, StoreError};
use backend::RawFilesystem;
pub use handle::{DirEntry, OpenMode, Whence};
use handle::{FdAllocator, INVALID_FD};
use path::{PathKind, PathValidator};

pub const FS_MAX_NUM_OPEN_FDS: usize = 6;
pub const FS_MAX_DIR_DEPTH: usize = 3;
pub const FS_MAX_FILE_DEPTH: usize = FS_MAX_DIR_DEPTH + 1;
pub const NAME_MAX: usize = 40;

enum Slot<B: RawFilesystem> {
    Empty,
    File { mode: OpenMode, backend: B::FileHandle },
    Dir { backend: B::DirHandle, last_entry: Option<DirEntry> },
}

impl<B: RawFilesystem> Slot<B> {
    fn is_empty(&self) -> bool
    {
        matches!(self, Slot::Empty)
    }
}

struct State<B: RawFilesystem> {
    backend: B,
    mount_count: u32,
    allocator: FdAllocator,
    entries: Vec<(u16, Slot<B>)>,
}

impl<B: RawFilesystem> State<B> {
    fn mount_internal(&mut self) -> Result<()>
    {
        if self.mount_count == 0 {
            if self.backend.mount().is_err() {
                self.backend.format()?;
                self.backend.mount()?;
            }
        }
        self.mount_count += 1;
        Ok(())
    }

    fn unmount_internal(&mut self) -> Result<()>
    {
        if self.mount_count == 0 {
            return Err(StoreError::Invalid("unmount without matching mount"));
        }
        self.mount_count -= 1;
        if self.mount_count == 0 {
            self.backend.unmount()?;
        }
        Ok(())
    }

    fn allocate_fd(&mut self) -> Option<u16>
    {
        let in_use: Vec<u16> = self.entries.iter().filter(|(_, s)| !s.is_empty()).map(|(f, _)| *f).collect();
        self.allocator.allocate(|candidate| in_use.contains(&candidate))
    }

    fn empty_slot_index(&self) -> Option<usize>
    {
        self.entries.iter().position(|(_, s)| s.is_empty())
    }
}

fn find_entry_mut<B: RawFilesystem>(entries: &mut [(u16, Slot<B>)], fd: u16) -> Option<&mut Slot<B>>
{
    entries.iter_mut().find(|(f, s)| *f == fd && !s.is_empty()).map(|(_, s)| s)
}

/// Thread-safe mounted filesystem over a `RawFilesystem` backend. A single
/// mutex serializes every public operation; it is released on every exit
/// path, including early returns and errors, by virtue of normal Rust scope
/// rules around the guard.
pub struct Filesystem<B: RawFilesystem> {
    state: Mutex<State<B>>,
    validator: PathValidator,
}

impl<B: RawFilesystem> Filesystem<B> {
    pub fn new(backend: B) -> Self
    {
        Self {
            state: Mutex::new(State {
                backend,
                mount_count: 0,
                allocator: FdAllocator::new(),
                entries: (0..FS_MAX_NUM_OPEN_FDS).map(|_| (INVALID_FD, Slot::Empty)).collect(),
            }),
            validator: PathValidator::new(NAME_MAX, FS_MAX_DIR_DEPTH),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State<B>>>
    {
        self.state.lock().map_err(|_| StoreError::Io("filesystem mutex poisoned"))
    }

    fn with_mount<T>(&self, f: impl FnOnce(&mut State<B>) -> Result<T>) -> Result<T>
    {
        let mut st = self.lock()?;
        st.mount_internal()?;
        let result = f(&mut st);
        let _ = st.unmount_internal();
        result
    }

    /// Unconditionally wipes the backend. Does not affect the mount counter.
    pub fn format(&self) -> Result<()>
    {
        let mut st = self.lock()?;
        st.backend.format()
    }

    /// Boot-time entry point: mounts, formatting first if the backend
    /// refuses an unformatted mount.
    pub fn init(&self) -> Result<()>
    {
        self.mount()
    }

    pub fn mount(&self) -> Result<()>
    {
        let mut st = self.lock()?;
        st.mount_internal()
    }

    pub fn unmount(&self) -> Result<()>
    {
        let mut st = self.lock()?;
        st.unmount_internal()
    }

    pub fn is_mounted(&self) -> Result<bool>
    {
        let st = self.lock()?;
        Ok(st.mount_count > 0)
    }

    /// Unwraps the backend, discarding the mount counter and handle table.
    /// Used by tools that snapshot the backend to disk between invocations
    /// instead of keeping a `Filesystem` alive across a process boundary.
    pub fn into_backend(self) -> B
    {
        self.state.into_inner().unwrap_or_else(|p| p.into_inner()).backend
    }

    pub fn mkdir(&self, path: &str) -> Result<()>
    {
        self.validator.validate(path, PathKind::Dir)?;
        self.with_mount(|st| st.backend.mkdir(path))
    }

    pub fn exists(&self, path: &str) -> Result<bool>
    {
        self.validator.validate(path, PathKind::File)?;
        self.with_mount(|st| Ok(st.backend.exists(path)))
    }

    pub fn delete(&self, path: &str) -> Result<()>
    {
        self.validator.validate(path, PathKind::File)?;
        self.with_mount(|st| st.backend.remove(path))
    }

    pub fn rmdir(&self, path: &str, recursive: bool) -> Result<()>
    {
        self.validator.validate(path, PathKind::Dir)?;
        self.with_mount(|st| {
            if recursive {
                rmdir_recursive(st, path, 0)
            } else {
                st.backend.remove(path)
            }
        })
    }

    pub fn open(&self, path: &str, mode_bits: u8) -> Result<u16>
    {
        self.validator.validate(path, PathKind::File)?;
        let mode = OpenMode::from_bits(mode_bits);

        let mut st = self.lock()?;
        st.mount_internal()?;

        let backend_handle = match st.backend.open_file(path, mode) {
            Ok(h) => h,
            Err(e) => {
                let _ = st.unmount_internal();
                return Err(e);
            }
        };

        let fd = match st.allocate_fd() {
            Some(fd) => fd,
            None => {
                let _ = st.backend.close_file(backend_handle);
                let _ = st.unmount_internal();
                return Err(StoreError::Full("no free file descriptor"));
            }
        };

        let slot_index = st.empty_slot_index().expect("fd allocated implies a free slot");
        st.entries[slot_index] = (fd, Slot::File { mode, backend: backend_handle });
        Ok(fd)
    }

    pub fn opendir(&self, path: &str) -> Result<u16>
    {
        self.validator.validate(path, PathKind::Dir)?;

        let mut st = self.lock()?;
        st.mount_internal()?;

        let backend_handle = match st.backend.open_dir(path) {
            Ok(h) => h,
            Err(e) => {
                let _ = st.unmount_internal();
                return Err(e);
            }
        };

        let fd = match st.allocate_fd() {
            Some(fd) => fd,
            None => {
                let _ = st.backend.close_dir(backend_handle);
                let _ = st.unmount_internal();
                return Err(StoreError::Full("no free file descriptor"));
            }
        };

        let slot_index = st.empty_slot_index().expect("fd allocated implies a free slot");
        st.entries[slot_index] = (fd, Slot::Dir { backend: backend_handle, last_entry: None });
        Ok(fd)
    }

    pub fn readdir(&self, fd: u16) -> Result<Option<DirEntry>>
    {
        let mut st = self.lock()?;
        let State { backend, entries, .. } = &mut *st;
        let slot = find_entry_mut(entries, fd).ok_or(StoreError::Invalid("invalid fd"))?;
        let Slot::Dir { backend: handle, last_entry } = slot else {
            return Err(StoreError::Invalid("fd is not a directory"));
        };
        let entry = backend.read_dir(handle)?;
        *last_entry = entry.clone();
        Ok(entry)
    }

    pub fn closedir(&self, fd: u16) -> Result<()>
    {
        let mut st = self.lock()?;
        let index = st.entries.iter().position(|(f, s)| *f == fd && !s.is_empty())
            .ok_or(StoreError::Invalid("invalid fd"))?;
        if !matches!(st.entries[index].1, Slot::Dir { .. }) {
            return Err(StoreError::Invalid("fd is not a directory"));
        }
        let (_, slot) = std::mem::replace(&mut st.entries[index], (INVALID_FD, Slot::Empty));
        if let Slot::Dir { backend: handle, .. } = slot {
            st.backend.close_dir(handle)?;
        }
        st.unmount_internal()
    }

    /// Returns the byte count read, or `-1` on underlying failure.
    pub fn read(&self, fd: u16, buf: &mut [u8]) -> Result<i64>
    {
        let mut st = self.lock()?;
        let State { backend, entries, .. } = &mut *st;
        let slot = find_entry_mut(entries, fd).ok_or(StoreError::Invalid("invalid fd"))?;
        let Slot::File { mode, backend: handle } = slot else {
            return Err(StoreError::Invalid("fd is not a file"));
        };
        if !mode.can_read() {
            return Err(StoreError::Invalid("fd not opened for reading"));
        }
        Ok(backend.read_file(handle, buf).map(|n| n as i64).unwrap_or(-1))
    }

    /// Returns the byte count written, or `-1` on underlying failure.
    pub fn write(&self, fd: u16, buf: &[u8]) -> Result<i64>
    {
        let mut st = self.lock()?;
        let State { backend, entries, .. } = &mut *st;
        let slot = find_entry_mut(entries, fd).ok_or(StoreError::Invalid("invalid fd"))?;
        let Slot::File { mode, backend: handle } = slot else {
            return Err(StoreError::Invalid("fd is not a file"));
        };
        if !mode.can_write() {
            return Err(StoreError::Invalid("fd not opened for writing"));
        }
        Ok(backend.write_file(handle, buf).map(|n| n as i64).unwrap_or(-1))
    }

    pub fn seek(&self, fd: u16, offset: i64, whence: Whence) -> Result<i64>
    {
        let mut st = self.lock()?;
        let State { backend, entries, .. } = &mut *st;
        let slot = find_entry_mut(entries, fd).ok_or(StoreError::Invalid("invalid fd"))?;
        let Slot::File { backend: handle, .. } = slot else {
            return Err(StoreError::Invalid("fd is not a file"));
        };
        Ok(backend.seek_file(handle, offset, whence).map(|p| p as i64).unwrap_or(-1))
    }

    pub fn tell(&self, fd: u16) -> Result<i64>
    {
        self.seek(fd, 0, Whence::Cur)
    }

    /// Reports EOF whenever the position can't be compared against the end
    /// of file, per the underlying-failure-reports-EOF policy.
    pub fn is_eof(&self, fd: u16) -> Result<bool>
    {
        let current = self.tell(fd)?;
        if current < 0 {
            return Ok(true);
        }
        let end = self.seek(fd, 0, Whence::End)?;
        if end < 0 {
            return Ok(true);
        }
        let _ = self.seek(fd, current, Whence::Set);
        Ok(current == end)
    }

    pub fn close(&self, fd: u16) -> Result<()>
    {
        let mut st = self.lock()?;
        let index = st.entries.iter().position(|(f, s)| *f == fd && !s.is_empty())
            .ok_or(StoreError::Invalid("invalid fd"))?;
        if !matches!(st.entries[index].1, Slot::File { .. }) {
            return Err(StoreError::Invalid("fd is not a file"));
        }
        let (_, slot) = std::mem::replace(&mut st.entries[index], (INVALID_FD, Slot::Empty));
        if let Slot::File { backend: handle, .. } = slot {
            st.backend.close_file(handle)?;
        }
        st.unmount_internal()
    }
}

/// Depth-limited recursive directory removal: lists children, recurses into
/// subdirectories, deletes files, then deletes the now-empty directory.
fn rmdir_recursive<B: RawFilesystem>(st: &mut State<B>, path: &str, depth: usize) -> Result<()>
{
    if depth > FS_MAX_FILE_DEPTH {
        return Err(StoreError::Invalid("rmdir recursion exceeds max depth"));
    }

    let mut dir = st.backend.open_dir(path)?;
    let mut children = Vec::new();
    while let Some(entry) = st.backend.read_dir(&mut dir)? {
        children.push(entry);
    }
    st.backend.close_dir(dir)?;

    let trimmed = path.trim_end_matches('/');
    for entry in children {
        if entry.name == "." || entry.name == ".." {
            continue;
        }
        let child_path = format!("{}/{}", trimmed, entry.name);
        if entry.is_dir {
            rmdir_recursive(st, &child_path, depth + 1)?;
        } else {
            st.backend.remove(&child_path)?;
        }
    }

    st.backend.remove(path)
}
