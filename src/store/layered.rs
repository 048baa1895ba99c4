//! Shared save/load engine behind `KeymapStore` and `EncoderMapStore`: both
//! are a RAM-cached `layer × position` grid of 16-bit keycodes with a
//! per-position "altered" bitmap, a dirty-layer flag, and a save policy that
//! picks whichever of full-grid or override-list encoding is smaller.

use crate::bitmap::Bitmap;
use crate::error::{Result, StoreError};
use crate::fs::backend::RawFilesystem;
use crate::fs::{Filesystem, OpenMode};

struct LayerGrid {
    cache: Vec<u16>,
    altered: Bitmap,
    dirty: bool,
}

pub struct LayeredStore {
    layers: Vec<LayerGrid>,
    rows: usize,
    cols: usize,
    file_prefix: &'static str,
}

impl LayeredStore {
    pub fn new(layer_count: usize, rows: usize, cols: usize, file_prefix: &'static str) -> Self
    {
        let layers = (0..layer_count)
            .map(|_| LayerGrid { cache: vec![0u16; rows * cols], altered: Bitmap::new(rows * cols), dirty: false })
            .collect();
        Self { layers, rows, cols, file_prefix }
    }

    pub fn layer_count(&self) -> usize
    {
        self.layers.len()
    }

    pub fn rows(&self) -> usize
    {
        self.rows
    }

    pub fn cols(&self) -> usize
    {
        self.cols
    }

    pub fn altered_count(&self, layer: usize) -> usize
    {
        self.layers.get(layer).map(|g| g.altered.count()).unwrap_or(0)
    }

    /// Returns `KC_NO` (0) for any out-of-range index, tolerating
    /// configuration drift between firmware builds with differing matrix
    /// sizes.
    pub fn read(&self, layer: usize, row: usize, col: usize) -> u16
    {
        const KC_NO: u16 = 0;
        if layer >= self.layers.len() || row >= self.rows || col >= self.cols {
            return KC_NO;
        }
        self.layers[layer].cache[row * self.cols + col]
    }

    /// Writes the RAM cache unconditionally, toggles the altered bit iff the
    /// new value differs from `raw_default`, and marks the layer dirty.
    /// Out-of-range indices are a silent no-op.
    pub fn update(&mut self, layer: usize, row: usize, col: usize, keycode: u16, raw_default: impl Fn(usize, usize, usize) -> u16)
    {
        if layer >= self.layers.len() || row >= self.rows || col >= self.cols {
            return;
        }

        let default = raw_default(layer, row, col);
        let index = row * self.cols + col;
        let grid = &mut self.layers[layer];
        grid.cache[index] = keycode;
        grid.altered.assign(index, keycode != default);
        grid.dirty = true;
    }

    fn file_name(&self, layer: usize) -> String
    {
        format!("{}{:02}", self.file_prefix, layer)
    }

    pub fn save<B: RawFilesystem>(&mut self, fs: &Filesystem<B>) -> Result<()>
    {
        for layer in 0..self.layers.len() {
            if !self.layers[layer].dirty {
                continue;
            }
            self.save_layer(fs, layer)?;
            self.layers[layer].dirty = false;
        }
        Ok(())
    }

    fn save_layer<B: RawFilesystem>(&self, fs: &Filesystem<B>, layer: usize) -> Result<()>
    {
        let grid = &self.layers[layer];
        let name = self.file_name(layer);
        let altered_count = grid.altered.count();

        if altered_count == 0 {
            return match fs.delete(&name) {
                Ok(()) => Ok(()),
                Err(StoreError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            };
        }

        let full_size = self.rows * self.cols * 2;
        let override_size = altered_count * 4;

        let fd = fs.open(&name, OpenMode::WRITE | OpenMode::TRUNCATE)?;
        let result = (|| -> Result<()> {
            if full_size <= override_size {
                fs.write(fd, &[0x00])?;
                for &keycode in &grid.cache {
                    fs.write(fd, &keycode.to_le_bytes())?;
                }
            } else {
                fs.write(fd, &[0x01])?;
                for index in 0..grid.cache.len() {
                    if grid.altered.get(index) {
                        let row = (index / self.cols) as u8;
                        let col = (index % self.cols) as u8;
                        let bytes = grid.cache[index].to_le_bytes();
                        fs.write(fd, &[row, col, bytes[0], bytes[1]])?;
                    }
                }
            }
            Ok(())
        })();

        fs.close(fd)?;
        result
    }

    /// Resets every layer to its raw default, then restores from disk where
    /// a layer file exists. Idempotent: running it twice yields identical
    /// state since each override is replayed through `update`.
    pub fn load<B: RawFilesystem>(&mut self, fs: &Filesystem<B>, raw_default: impl Fn(usize, usize, usize) -> u16) -> Result<()>
    {
        for layer in 0..self.layers.len() {
            self.reset_layer(layer, &raw_default);
            self.load_layer(fs, layer, &raw_default)?;
        }
        Ok(())
    }

    fn reset_layer(&mut self, layer: usize, raw_default: &impl Fn(usize, usize, usize) -> u16)
    {
        let cols = self.cols;
        let grid = &mut self.layers[layer];
        for index in 0..grid.cache.len() {
            grid.cache[index] = raw_default(layer, index / cols, index % cols);
        }
        grid.altered.clear_all();
        grid.dirty = false;
    }

    fn load_layer<B: RawFilesystem>(&mut self, fs: &Filesystem<B>, layer: usize, raw_default: &impl Fn(usize, usize, usize) -> u16) -> Result<()>
    {
        let name = self.file_name(layer);
        if !fs.exists(&name)? {
            return Ok(());
        }

        let fd = fs.open(&name, OpenMode::READ)?;
        let result = self.load_layer_body(fs, fd, layer, raw_default);
        fs.close(fd)?;
        result
    }

    fn load_layer_body<B: RawFilesystem>(
        &mut self,
        fs: &Filesystem<B>,
        fd: u16,
        layer: usize,
        raw_default: &impl Fn(usize, usize, usize) -> u16,
    ) -> Result<()>
    {
        let mut mode = [0u8; 1];
        if fs.read(fd, &mut mode)? != 1 {
            return Ok(());
        }

        match mode[0] {
            0x00 => {
                for index in 0..self.rows * self.cols {
                    let mut bytes = [0u8; 2];
                    if fs.read(fd, &mut bytes)? != 2 {
                        break;
                    }
                    let row = index / self.cols;
                    let col = index % self.cols;
                    let keycode = u16::from_le_bytes(bytes);
                    self.update(layer, row, col, keycode, raw_default);
                }
                Ok(())
            }
            0x01 => {
                loop {
                    let mut entry = [0u8; 4];
                    if fs.read(fd, &mut entry)? != 4 {
                        break;
                    }
                    let row = entry[0] as usize;
                    let col = entry[1] as usize;
                    let keycode = u16::from_le_bytes([entry[2], entry[3]]);
                    self.update(layer, row, col, keycode, raw_default);
                }
                Ok(())
            }
            _ => Err(StoreError::Corrupt("unexpected layer file mode byte")),
        }
    }

    pub fn erase<B: RawFilesystem>(&mut self, fs: &Filesystem<B>, raw_default: impl Fn(usize, usize, usize) -> u16) -> Result<()>
    {
        for layer in 0..self.layers.len() {
            let name = self.file_name(layer);
            match fs.delete(&name) {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            self.reset_layer(layer, &raw_default);
        }
        Ok(())
    }

    /// Packs a layer's cache as little-endian bytes, for VIA-style bulk reads.
    pub fn read_raw(&self, layer: usize, out: &mut [u8])
    {
        let Some(grid) = self.layers.get(layer) else { return };
        for (index, &keycode) in grid.cache.iter().enumerate() {
            let offset = index * 2;
            if offset + 1 >= out.len() {
                break;
            }
            let bytes = keycode.to_le_bytes();
            out[offset] = bytes[0];
            out[offset + 1] = bytes[1];
        }
    }

    /// Unpacks little-endian bytes into a layer's cache, one `update` call
    /// per position so bitmap/count/dirty all stay consistent.
    pub fn update_raw(&mut self, layer: usize, data: &[u8], raw_default: impl Fn(usize, usize, usize) -> u16)
    {
        if layer >= self.layers.len() {
            return;
        }
        for index in 0..self.rows * self.cols {
            let offset = index * 2;
            if offset + 1 >= data.len() {
                break;
            }
            let keycode = u16::from_le_bytes([data[offset], data[offset + 1]]);
            let row = index / self.cols;
            let col = index % self.cols;
            self.update(layer, row, col, keycode, &raw_default);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::backend::RamFs;

    fn fixture() -> (LayeredStore, Filesystem<RamFs>)
    {
        let store = LayeredStore::new(2, 4, 4, "layers/key");
        let fs = Filesystem::new(RamFs::new());
        fs.init().unwrap();
        fs.mkdir("layers").unwrap();
        (store, fs)
    }

    fn default_zero(_layer: usize, _row: usize, _col: usize) -> u16
    {
        0
    }

    #[test]
    fn altered_matches_cache_difference()
    {
        let (mut store, _fs) = fixture();
        store.update(0, 1, 2, 0xABCD, default_zero);
        let index = 1 * 4 + 2;
        assert!(store.layers[0].altered.get(index));
        assert_eq!(store.altered_count(0), 1);
    }

    #[test]
    fn save_empty_layer_deletes_file()
    {
        let (mut store, fs) = fixture();
        store.update(0, 0, 0, 5, default_zero);
        store.update(0, 0, 0, 0, default_zero); // reverts to default, altered_count back to 0
        store.save(&fs).unwrap();
        assert!(!fs.exists("layers/key00").unwrap());
    }

    #[test]
    fn single_change_saves_override_list()
    {
        let (mut store, fs) = fixture();
        store.update(0, 1, 2, 0xABCD, default_zero);
        store.save(&fs).unwrap();

        let fd = fs.open("layers/key00", OpenMode::READ).unwrap();
        let mut header = [0u8; 5];
        fs.read(fd, &mut header).unwrap();
        fs.close(fd).unwrap();

        assert_eq!(header[0], 0x01);
        assert_eq!(header[1], 1);
        assert_eq!(header[2], 2);
        assert_eq!(u16::from_le_bytes([header[3], header[4]]), 0xABCD);
    }

    #[test]
    fn mass_change_prefers_full_grid()
    {
        let (mut store, fs) = fixture();
        for row in 0..4 {
            for col in 0..4 {
                store.update(0, row, col, 0x1234, default_zero);
            }
        }
        store.save(&fs).unwrap();

        let fd = fs.open("layers/key00", OpenMode::READ).unwrap();
        let mut buf = vec![0u8; 1 + 16 * 2];
        fs.read(fd, &mut buf).unwrap();
        fs.close(fd).unwrap();

        assert_eq!(buf[0], 0x00);
        assert_eq!(u16::from_le_bytes([buf[1], buf[2]]), 0x1234);
    }

    #[test]
    fn save_then_load_round_trips_cache()
    {
        let (mut store, fs) = fixture();
        store.update(1, 0, 0, 0x1111, default_zero);
        store.update(1, 3, 3, 0x2222, default_zero);
        store.save(&fs).unwrap();

        let mut reloaded = LayeredStore::new(2, 4, 4, "layers/key");
        reloaded.load(&fs, default_zero).unwrap();

        assert_eq!(reloaded.read(1, 0, 0), 0x1111);
        assert_eq!(reloaded.read(1, 3, 3), 0x2222);
        assert_eq!(reloaded.read(1, 1, 1), 0);
    }

    #[test]
    fn load_is_idempotent()
    {
        let (mut store, fs) = fixture();
        store.update(0, 2, 2, 0x9999, default_zero);
        store.save(&fs).unwrap();

        let mut reloaded = LayeredStore::new(2, 4, 4, "layers/key");
        reloaded.load(&fs, default_zero).unwrap();
        let first_count = reloaded.altered_count(0);
        reloaded.load(&fs, default_zero).unwrap();
        assert_eq!(reloaded.altered_count(0), first_count);
        assert_eq!(reloaded.read(0, 2, 2), 0x9999);
    }

    #[test]
    fn out_of_range_update_is_noop()
    {
        let (mut store, _fs) = fixture();
        store.update(0, 99, 99, 1, default_zero);
        assert_eq!(store.altered_count(0), 0);
        assert_eq!(store.read(0, 99, 99), 0);
    }
}
