//! Typed accessor over small named files under `ee/`: idempotent writes
//! (skip the write entirely when the read-back matches), optional post-write
//! verification, and version-tagged opaque "data blocks".

use crate::diagnostics::Diagnostics;
use crate::error::{Result, StoreError};
use crate::fs::backend::RawFilesystem;
use crate::fs::{Filesystem, OpenMode, Whence};

pub const EECONFIG_MAGIC_NUMBER: u16 = 0xEFC2;
pub const EECONFIG_MAGIC_NUMBER_OFF: u16 = 0xFFFF;

const READ_BACK_CHUNK: usize = 32;

fn ee_path(name: &str) -> String
{
    format!("ee/{name}")
}

fn read_back_matches<B: RawFilesystem>(fs: &Filesystem<B>, path: &str, data: &[u8]) -> Result<bool>
{
    if !fs.exists(path)? {
        return Ok(false);
    }

    let fd = fs.open(path, OpenMode::READ)?;
    let outcome = (|| -> Result<bool> {
        let mut offset = 0usize;
        while offset < data.len() {
            let take = (data.len() - offset).min(READ_BACK_CHUNK);
            let mut chunk = [0u8; READ_BACK_CHUNK];
            let n = fs.read(fd, &mut chunk[..take])?;
            if n != take as i64 || chunk[..take] != data[offset..offset + take] {
                return Ok(false);
            }
            offset += take;
        }
        // Confirm the file isn't longer than `data`.
        let mut extra = [0u8; 1];
        let n = fs.read(fd, &mut extra)?;
        Ok(n == 0)
    })();
    fs.close(fd)?;
    outcome
}

/// Typed accessor over `ee/*`. Stateless beyond the build-flag-equivalent
/// `verify_writes` toggle; every method takes the filesystem it operates on
/// as a parameter, the same shape as the other NVM stores.
pub struct EeConfig {
    verify_writes: bool,
}

impl Default for EeConfig {
    fn default() -> Self
    {
        Self::new(false)
    }
}

impl EeConfig {
    pub fn new(verify_writes: bool) -> Self
    {
        Self { verify_writes }
    }

    pub fn read_bytes<B: RawFilesystem>(&self, fs: &Filesystem<B>, name: &str, out: &mut [u8]) -> Result<bool>
    {
        let path = ee_path(name);
        if !fs.exists(&path)? {
            return Ok(false);
        }
        let fd = fs.open(&path, OpenMode::READ)?;
        let result = fs.read(fd, out);
        fs.close(fd)?;
        Ok(result? as usize == out.len())
    }

    /// Skips the write entirely if the file already holds `data`
    /// (wear-saving idempotency). Optionally re-reads and compares after
    /// writing; a mismatch is logged but never retried.
    pub fn write_bytes<B: RawFilesystem>(
        &self,
        fs: &Filesystem<B>,
        name: &str,
        data: &[u8],
        diagnostics: Option<&mut Diagnostics>,
    ) -> Result<()>
    {
        let path = ee_path(name);
        if read_back_matches(fs, &path, data)? {
            return Ok(());
        }

        let fd = fs.open(&path, OpenMode::WRITE | OpenMode::TRUNCATE)?;
        let result = fs.write(fd, data);
        fs.close(fd)?;
        result?;

        if self.verify_writes {
            if !read_back_matches(fs, &path, data)? {
                if let Some(diag) = diagnostics {
                    diag.log(1, &format!("ee write verification mismatch: {name}"));
                }
            }
        }

        Ok(())
    }

    pub fn read_u8<B: RawFilesystem>(&self, fs: &Filesystem<B>, name: &str) -> Result<Option<u8>>
    {
        let mut buf = [0u8; 1];
        Ok(self.read_bytes(fs, name, &mut buf)?.then_some(buf[0]))
    }

    pub fn write_u8<B: RawFilesystem>(&self, fs: &Filesystem<B>, name: &str, value: u8) -> Result<()>
    {
        self.write_bytes(fs, name, &[value], None)
    }

    pub fn read_u16<B: RawFilesystem>(&self, fs: &Filesystem<B>, name: &str) -> Result<Option<u16>>
    {
        let mut buf = [0u8; 2];
        Ok(self.read_bytes(fs, name, &mut buf)?.then_some(u16::from_le_bytes(buf)))
    }

    pub fn write_u16<B: RawFilesystem>(&self, fs: &Filesystem<B>, name: &str, value: u16) -> Result<()>
    {
        self.write_bytes(fs, name, &value.to_le_bytes(), None)
    }

    pub fn read_u32<B: RawFilesystem>(&self, fs: &Filesystem<B>, name: &str) -> Result<Option<u32>>
    {
        let mut buf = [0u8; 4];
        Ok(self.read_bytes(fs, name, &mut buf)?.then_some(u32::from_le_bytes(buf)))
    }

    pub fn write_u32<B: RawFilesystem>(&self, fs: &Filesystem<B>, name: &str, value: u32) -> Result<()>
    {
        self.write_bytes(fs, name, &value.to_le_bytes(), None)
    }

    /// Validates the parallel version file before reading the block;
    /// returns all-zero bytes (without touching the block file) on a
    /// version mismatch or a missing version file.
    pub fn read_datablock<B: RawFilesystem>(
        &self,
        fs: &Filesystem<B>,
        version_file: &str,
        block_file: &str,
        expected_version: u32,
        out: &mut [u8],
    ) -> Result<()>
    {
        let version = self.read_u32(fs, version_file)?;
        if version != Some(expected_version) {
            out.fill(0);
            return Ok(());
        }
        if !self.read_bytes(fs, block_file, out)? {
            out.fill(0);
        }
        Ok(())
    }

    /// Writes the version tag, truncates the block file, and extends it to
    /// `size` bytes by writing a single zero byte at `size - 1`.
    pub fn init_datablock<B: RawFilesystem>(
        &self,
        fs: &Filesystem<B>,
        version_file: &str,
        block_file: &str,
        version: u32,
        size: usize,
    ) -> Result<()>
    {
        self.write_bytes(fs, version_file, &version.to_le_bytes(), None)?;

        let path = ee_path(block_file);
        let fd = fs.open(&path, OpenMode::WRITE | OpenMode::TRUNCATE)?;
        let result = (|| -> Result<()> {
            if size > 0 {
                fs.seek(fd, (size - 1) as i64, Whence::Set)?;
                fs.write(fd, &[0u8])?;
            }
            Ok(())
        })();
        fs.close(fd)?;
        result
    }

    /// Recursively removes `ee/` and recreates it empty.
    pub fn erase<B: RawFilesystem>(&self, fs: &Filesystem<B>) -> Result<()>
    {
        match fs.rmdir("ee", true) {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        fs.mkdir("ee")
    }

    pub fn disable<B: RawFilesystem>(&self, fs: &Filesystem<B>) -> Result<()>
    {
        self.write_u16(fs, "magic", EECONFIG_MAGIC_NUMBER_OFF)
    }

    pub fn enable<B: RawFilesystem>(&self, fs: &Filesystem<B>) -> Result<()>
    {
        self.write_u16(fs, "magic", EECONFIG_MAGIC_NUMBER)
    }
}
