//! VIA protocol persistence: magic, layout options, and the custom-config
//! block under `via/*`. Same idempotent-write shape as `eeconfig` (read back
//! before writing, skip identical payloads), scoped to its own directory
//! since VIA's small set of fields is a distinct external protocol surface
//! from the general EE-config key/value store.

use crate::error::Result;
use crate::fs::backend::RawFilesystem;
use crate::fs::{Filesystem, OpenMode};

/// VIA's fixed 3-byte magic, written once at `init()` and checked by the
/// host-side VIA application to confirm dynamic-keymap support.
pub const VIA_EEPROM_MAGIC: [u8; 3] = [0xC1, 0xE3, 0x31];

fn via_path(name: &str) -> String
{
    format!("via/{name}")
}

fn read_back_matches<B: RawFilesystem>(fs: &Filesystem<B>, path: &str, data: &[u8]) -> Result<bool>
{
    if !fs.exists(path)? {
        return Ok(false);
    }
    let fd = fs.open(path, OpenMode::READ)?;
    let outcome = (|| -> Result<bool> {
        let mut buf = vec![0u8; data.len() + 1];
        let n = fs.read(fd, &mut buf)?;
        Ok(n == data.len() as i64 && buf[..data.len()] == *data)
    })();
    fs.close(fd)?;
    outcome
}

fn write_if_changed<B: RawFilesystem>(fs: &Filesystem<B>, name: &str, data: &[u8]) -> Result<()>
{
    let path = via_path(name);
    if read_back_matches(fs, &path, data)? {
        return Ok(());
    }
    let fd = fs.open(&path, OpenMode::WRITE | OpenMode::TRUNCATE)?;
    let result = fs.write(fd, data);
    fs.close(fd)?;
    result?;
    Ok(())
}

fn read_exact<B: RawFilesystem>(fs: &Filesystem<B>, name: &str, out: &mut [u8]) -> Result<bool>
{
    let path = via_path(name);
    if !fs.exists(&path)? {
        return Ok(false);
    }
    let fd = fs.open(&path, OpenMode::READ)?;
    let result = fs.read(fd, out);
    fs.close(fd)?;
    Ok(result? as usize == out.len())
}

/// Typed accessor over `via/magic`, `via/layout_options`, and
/// `via/custom_config`. Stateless beyond the configured custom-config size.
pub struct ViaStore {
    custom_config_size: usize,
}

impl ViaStore {
    pub fn new(custom_config_size: usize) -> Self
    {
        Self { custom_config_size }
    }

    /// Writes the fixed VIA magic. Idempotent like every other `via/*` write.
    pub fn init<B: RawFilesystem>(&self, fs: &Filesystem<B>) -> Result<()>
    {
        write_if_changed(fs, "magic", &VIA_EEPROM_MAGIC)
    }

    pub fn magic_valid<B: RawFilesystem>(&self, fs: &Filesystem<B>) -> Result<bool>
    {
        let mut buf = [0u8; 3];
        Ok(read_exact(fs, "magic", &mut buf)? && buf == VIA_EEPROM_MAGIC)
    }

    pub fn read_layout_options<B: RawFilesystem>(&self, fs: &Filesystem<B>) -> Result<Option<u32>>
    {
        let mut buf = [0u8; 4];
        Ok(read_exact(fs, "layout_options", &mut buf)?.then(|| u32::from_le_bytes(buf)))
    }

    pub fn write_layout_options<B: RawFilesystem>(&self, fs: &Filesystem<B>, value: u32) -> Result<()>
    {
        write_if_changed(fs, "layout_options", &value.to_le_bytes())
    }

    /// Reads the custom-config block. Returns `false` (leaving `out`
    /// untouched) if the file is absent or a different size than configured,
    /// the same "degrade to caller's own defaults" policy `eeconfig` uses.
    pub fn read_custom_config<B: RawFilesystem>(&self, fs: &Filesystem<B>, out: &mut [u8]) -> Result<bool>
    {
        if out.len() != self.custom_config_size {
            return Ok(false);
        }
        read_exact(fs, "custom_config", out)
    }

    pub fn write_custom_config<B: RawFilesystem>(&self, fs: &Filesystem<B>, data: &[u8]) -> Result<()>
    {
        if data.len() != self.custom_config_size {
            return Err(crate::error::StoreError::Invalid("custom_config size mismatch"));
        }
        write_if_changed(fs, "custom_config", data)
    }

    /// Recursively removes `via/` and recreates it empty, mirroring
    /// `EeConfig::erase`.
    pub fn erase<B: RawFilesystem>(&self, fs: &Filesystem<B>) -> Result<()>
    {
        match fs.rmdir("via", true) {
            Ok(()) | Err(crate::error::StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        fs.mkdir("via")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::backend::RamFs;

    fn fixture() -> Filesystem<RamFs>
    {
        let fs = Filesystem::new(RamFs::new());
        fs.init().unwrap();
        fs.mkdir("via").unwrap();
        fs
    }

    #[test]
    fn init_writes_magic()
    {
        let fs = fixture();
        let via = ViaStore::new(8);
        via.init(&fs).unwrap();
        assert!(via.magic_valid(&fs).unwrap());
    }

    #[test]
    fn missing_magic_is_invalid()
    {
        let fs = fixture();
        let via = ViaStore::new(8);
        assert!(!via.magic_valid(&fs).unwrap());
    }

    #[test]
    fn layout_options_round_trip()
    {
        let fs = fixture();
        let via = ViaStore::new(8);
        via.write_layout_options(&fs, 0x0003_0201).unwrap();
        assert_eq!(via.read_layout_options(&fs).unwrap(), Some(0x0003_0201));
    }

    #[test]
    fn custom_config_round_trips_exact_size()
    {
        let fs = fixture();
        let via = ViaStore::new(4);
        via.write_custom_config(&fs, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        assert!(via.read_custom_config(&fs, &mut out).unwrap());
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn custom_config_wrong_size_is_rejected()
    {
        let fs = fixture();
        let via = ViaStore::new(4);
        assert!(via.write_custom_config(&fs, &[1, 2, 3]).is_err());
    }

    #[test]
    fn erase_clears_all_via_files()
    {
        let fs = fixture();
        let via = ViaStore::new(4);
        via.init(&fs).unwrap();
        via.write_layout_options(&fs, 7).unwrap();
        via.erase(&fs).unwrap();
        assert!(!via.magic_valid(&fs).unwrap());
        assert_eq!(via.read_layout_options(&fs).unwrap(), None);
    }
}
