//! Flat NUL-delimited macro buffer: bulk RAM read/update, plus a save/load
//! pair that splits the buffer into one file per macro on disk.

use crate::error::Result;
use crate::fs::backend::RawFilesystem;
use crate::fs::{Filesystem, OpenMode};

pub const MACRO_BUFFER_SIZE: usize = 1024;

pub struct MacroStore {
    buffer: [u8; MACRO_BUFFER_SIZE],
    dirty: bool,
}

impl Default for MacroStore {
    fn default() -> Self
    {
        Self::new()
    }
}

impl MacroStore {
    pub fn new() -> Self
    {
        Self { buffer: [0u8; MACRO_BUFFER_SIZE], dirty: false }
    }

    pub fn is_dirty(&self) -> bool
    {
        self.dirty
    }

    /// Non-blocking fast path: no filesystem interaction, reads straight
    /// from the RAM buffer.
    pub fn read_buffer(&self, offset: usize, out: &mut [u8])
    {
        if offset >= self.buffer.len() {
            return;
        }
        let end = (offset + out.len()).min(self.buffer.len());
        let n = end - offset;
        out[..n].copy_from_slice(&self.buffer[offset..end]);
    }

    /// Sets the dirty flag only if the write actually changes a byte.
    pub fn update_buffer(&mut self, offset: usize, data: &[u8])
    {
        if offset >= self.buffer.len() {
            return;
        }
        let end = (offset + data.len()).min(self.buffer.len());
        let n = end - offset;
        if self.buffer[offset..end] != data[..n] {
            self.buffer[offset..end].copy_from_slice(&data[..n]);
            self.dirty = true;
        }
    }

    fn file_name(index: usize) -> String
    {
        format!("macros/{:02}", index)
    }

    /// Walks the buffer; each NUL-terminated (or buffer-end-terminated) run
    /// becomes `macros/NN` holding just those bytes, no terminator on disk.
    /// Empty runs are skipped but still consume an index.
    pub fn save<B: RawFilesystem>(&mut self, fs: &Filesystem<B>) -> Result<()>
    {
        if !self.dirty {
            return Ok(());
        }

        let mut index = 0usize;
        let mut macro_n = 0usize;
        while index < self.buffer.len() {
            let end = self.buffer[index..].iter().position(|&b| b == 0).map(|rel| index + rel).unwrap_or(self.buffer.len());

            if end > index {
                let name = Self::file_name(macro_n);
                let fd = fs.open(&name, OpenMode::WRITE | OpenMode::TRUNCATE)?;
                let result = fs.write(fd, &self.buffer[index..end]);
                fs.close(fd)?;
                result?;
            }

            macro_n += 1;
            index = end + 1;
        }

        self.dirty = false;
        Ok(())
    }

    /// Zeroes the buffer, then replays `macros/00`, `macros/01`, ... until
    /// the first missing file, reassembling the NUL-delimited layout.
    pub fn load<B: RawFilesystem>(&mut self, fs: &Filesystem<B>) -> Result<()>
    {
        self.buffer = [0u8; MACRO_BUFFER_SIZE];
        let mut pointer = 0usize;
        let mut macro_n = 0usize;

        loop {
            let name = Self::file_name(macro_n);
            if !fs.exists(&name)? {
                break;
            }

            let remaining = self.buffer.len().saturating_sub(pointer);
            if remaining == 0 {
                break;
            }

            let fd = fs.open(&name, OpenMode::READ)?;
            let mut tmp = vec![0u8; remaining];
            let read_result = fs.read(fd, &mut tmp);
            fs.close(fd)?;
            let read_n = read_result?;
            let n = if read_n < 0 { 0 } else { read_n as usize };

            self.buffer[pointer..pointer + n].copy_from_slice(&tmp[..n]);
            pointer += n;
            if pointer < self.buffer.len() {
                self.buffer[pointer] = 0;
                pointer += 1;
            }

            macro_n += 1;
        }

        self.dirty = false;
        Ok(())
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
        fs.mkdir("macros").unwrap();
        fs
    }

    #[test]
    fn save_splits_on_nul_and_skips_empty_macro()
    {
        let fs = fixture();
        let mut store = MacroStore::new();
        store.update_buffer(0, b"hi\0bye\0\0");
        store.save(&fs).unwrap();

        assert!(fs.exists("macros/00").unwrap());
        assert!(fs.exists("macros/01").unwrap());
        assert!(!fs.exists("macros/02").unwrap());

        let fd = fs.open("macros/00", OpenMode::READ).unwrap();
        let mut buf = [0u8; 2];
        fs.read(fd, &mut buf).unwrap();
        fs.close(fd).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn load_reconstructs_nul_delimited_buffer()
    {
        let fs = fixture();
        let mut store = MacroStore::new();
        store.update_buffer(0, b"hi\0bye\0\0");
        store.save(&fs).unwrap();

        let mut reloaded = MacroStore::new();
        reloaded.load(&fs).unwrap();

        let mut out = [0u8; 7];
        reloaded.read_buffer(0, &mut out);
        assert_eq!(&out, b"hi\0bye\0");
    }

    #[test]
    fn unwritten_update_clears_dirty_semantics()
    {
        let mut store = MacroStore::new();
        store.update_buffer(0, &[0, 0, 0]);
        assert!(!store.is_dirty());
    }

    #[test]
    fn save_without_dirty_is_noop()
    {
        let fs = fixture();
        let mut store = MacroStore::new();
        store.save(&fs).unwrap();
        assert!(!fs.exists("macros/00").unwrap());
    }
}
