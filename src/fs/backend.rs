//! The contract this crate needs from an underlying log-structured,
//! wear-leveled block filesystem. We specify only this surface, not the
//! backing implementation's internals (journaling, block allocation, wear
//! leveling are entirely its concern).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::fs::handle::{DirEntry, OpenMode, Whence};

pub trait RawFilesystem {
    type FileHandle;
    type DirHandle;

    fn format(&mut self) -> Result<()>;
    fn mount(&mut self) -> Result<()>;
    fn unmount(&mut self) -> Result<()>;

    fn mkdir(&mut self, path: &str) -> Result<()>;
    fn remove(&mut self, path: &str) -> Result<()>;
    fn exists(&mut self, path: &str) -> bool;

    fn open_file(&mut self, path: &str, mode: OpenMode) -> Result<Self::FileHandle>;
    fn read_file(&mut self, handle: &mut Self::FileHandle, buf: &mut [u8]) -> Result<usize>;
    fn write_file(&mut self, handle: &mut Self::FileHandle, buf: &[u8]) -> Result<usize>;
    fn seek_file(&mut self, handle: &mut Self::FileHandle, offset: i64, whence: Whence) -> Result<u64>;
    fn close_file(&mut self, handle: Self::FileHandle) -> Result<()>;

    fn open_dir(&mut self, path: &str) -> Result<Self::DirHandle>;
    fn read_dir(&mut self, handle: &mut Self::DirHandle) -> Result<Option<DirEntry>>;
    fn close_dir(&mut self, handle: Self::DirHandle) -> Result<()>;
}

/// An in-memory stand-in for the backing filesystem, used by tests and by
/// `keystore-tool` when no physical part is attached. Not wear-leveled, not
/// journaled: a RAM disk, not a product. `Serialize`/`Deserialize` let the
/// tool snapshot one to and from a flash-image file between invocations.
#[derive(Default, Serialize, Deserialize)]
pub struct RamFs {
    mounted: bool,
    dirs: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
}

pub struct RamFileHandle {
    path: String,
    position: u64,
}

pub struct RamDirHandle {
    entries: Vec<DirEntry>,
    cursor: usize,
}

fn normalize(path: &str) -> String
{
    path.trim_start_matches('/').to_string()
}

fn parent_of(path: &str) -> String
{
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

impl RamFs {
    pub fn new() -> Self
    {
        Self { mounted: false, dirs: HashSet::new(), files: HashMap::new() }
    }

    fn require_mounted(&self) -> Result<()>
    {
        if !self.mounted {
            return Err(StoreError::Io("backend not mounted"));
        }
        Ok(())
    }
}

impl RawFilesystem for RamFs {
    type FileHandle = RamFileHandle;
    type DirHandle = RamDirHandle;

    fn format(&mut self) -> Result<()>
    {
        self.dirs.clear();
        self.files.clear();
        Ok(())
    }

    fn mount(&mut self) -> Result<()>
    {
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) -> Result<()>
    {
        self.mounted = false;
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<()>
    {
        self.require_mounted()?;
        let key = normalize(path);
        if self.dirs.contains(&key) || self.files.contains_key(&key) {
            return Err(StoreError::Invalid("path already exists"));
        }
        self.dirs.insert(key);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()>
    {
        self.require_mounted()?;
        let key = normalize(path);
        if self.files.remove(&key).is_some() {
            return Ok(());
        }
        if self.dirs.remove(&key) {
            let has_children = self.dirs.iter().any(|d| parent_of(d) == key)
                || self.files.keys().any(|f| parent_of(f) == key);
            if has_children {
                self.dirs.insert(key);
                return Err(StoreError::Invalid("directory not empty"));
            }
            return Ok(());
        }
        Err(StoreError::NotFound("path does not exist"))
    }

    fn exists(&mut self, path: &str) -> bool
    {
        let key = normalize(path);
        self.dirs.contains(&key) || self.files.contains_key(&key)
    }

    fn open_file(&mut self, path: &str, mode: OpenMode) -> Result<Self::FileHandle>
    {
        self.require_mounted()?;
        let key = normalize(path);
        if !self.files.contains_key(&key) {
            if mode.can_write() {
                self.files.insert(key.clone(), Vec::new());
            } else {
                return Err(StoreError::NotFound("file does not exist"));
            }
        } else if mode.truncate() {
            if let Some(existing) = self.files.get_mut(&key) {
                existing.clear();
            }
        }
        Ok(RamFileHandle { path: key, position: 0 })
    }

    fn read_file(&mut self, handle: &mut Self::FileHandle, buf: &mut [u8]) -> Result<usize>
    {
        let data = self.files.get(&handle.path).ok_or(StoreError::NotFound("file vanished"))?;
        let pos = handle.position as usize;
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        handle.position += n as u64;
        Ok(n)
    }

    fn write_file(&mut self, handle: &mut Self::FileHandle, buf: &[u8]) -> Result<usize>
    {
        let data = self.files.get_mut(&handle.path).ok_or(StoreError::NotFound("file vanished"))?;
        let pos = handle.position as usize;
        if pos + buf.len() > data.len() {
            data.resize(pos + buf.len(), 0);
        }
        data[pos..pos + buf.len()].copy_from_slice(buf);
        handle.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek_file(&mut self, handle: &mut Self::FileHandle, offset: i64, whence: Whence) -> Result<u64>
    {
        let len = self.files.get(&handle.path).ok_or(StoreError::NotFound("file vanished"))?.len() as i64;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => handle.position as i64,
            Whence::End => len,
        };
        let target = base + offset;
        if target < 0 {
            return Err(StoreError::Invalid("seek before start of file"));
        }
        handle.position = target as u64;
        Ok(handle.position)
    }

    fn close_file(&mut self, _handle: Self::FileHandle) -> Result<()>
    {
        Ok(())
    }

    fn open_dir(&mut self, path: &str) -> Result<Self::DirHandle>
    {
        self.require_mounted()?;
        let key = normalize(path);
        if !key.is_empty() && !self.dirs.contains(&key) {
            return Err(StoreError::NotFound("directory does not exist"));
        }

        let mut entries = Vec::new();
        for dir in &self.dirs {
            if parent_of(dir) == key && dir != &key {
                entries.push(DirEntry { name: base_name(dir), size: 0, is_dir: true });
            }
        }
        for (file, data) in &self.files {
            if parent_of(file) == key {
                entries.push(DirEntry { name: base_name(file), size: data.len() as u64, is_dir: false });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(RamDirHandle { entries, cursor: 0 })
    }

    fn read_dir(&mut self, handle: &mut Self::DirHandle) -> Result<Option<DirEntry>>
    {
        if handle.cursor >= handle.entries.len() {
            return Ok(None);
        }
        let entry = handle.entries[handle.cursor].clone();
        handle.cursor += 1;
        Ok(Some(entry))
    }

    fn close_dir(&mut self, _handle: Self::DirHandle) -> Result<()>
    {
        Ok(())
    }
}

fn base_name(path: &str) -> String
{
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None => path.to_string(),
    }
}
