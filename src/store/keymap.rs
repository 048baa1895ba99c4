//! Per-layer RAM cache of keycodes, with the altered-bitmap/dirty-mask save
//! policy implemented generically in `layered`.

use crate::error::Result;
use crate::fs::backend::RawFilesystem;
use crate::fs::Filesystem;
use crate::store::layered::LayeredStore;

/// `F` supplies `keycode_at_keymap_location_raw(layer, row, col)`: the
/// compile-time default from the keymap build artifact. An external
/// collaborator, injected rather than looked up through global state.
pub struct KeymapStore<F: Fn(usize, usize, usize) -> u16> {
    inner: LayeredStore,
    raw_default: F,
}

impl<F: Fn(usize, usize, usize) -> u16> KeymapStore<F> {
    pub fn new(layer_count: usize, rows: usize, cols: usize, raw_default: F) -> Self
    {
        Self { inner: LayeredStore::new(layer_count, rows, cols, "layers/key"), raw_default }
    }

    pub fn layer_count(&self) -> usize
    {
        self.inner.layer_count()
    }

    pub fn altered_count(&self, layer: usize) -> usize
    {
        self.inner.altered_count(layer)
    }

    pub fn read(&self, layer: usize, row: usize, col: usize) -> u16
    {
        self.inner.read(layer, row, col)
    }

    pub fn update(&mut self, layer: usize, row: usize, col: usize, keycode: u16)
    {
        self.inner.update(layer, row, col, keycode, &self.raw_default)
    }

    pub fn save<B: RawFilesystem>(&mut self, fs: &Filesystem<B>) -> Result<()>
    {
        self.inner.save(fs)
    }

    pub fn load<B: RawFilesystem>(&mut self, fs: &Filesystem<B>) -> Result<()>
    {
        self.inner.load(fs, &self.raw_default)
    }

    pub fn erase<B: RawFilesystem>(&mut self, fs: &Filesystem<B>) -> Result<()>
    {
        self.inner.erase(fs, &self.raw_default)
    }

    /// Packs a layer's full keycode grid as little-endian bytes, for a
    /// VIA-style bulk read.
    pub fn read_raw(&self, layer: usize, out: &mut [u8])
    {
        self.inner.read_raw(layer, out)
    }

    /// Unpacks a VIA-style bulk write back through `update`, one position at
    /// a time, so the altered bitmap and dirty mask stay consistent.
    pub fn update_raw(&mut self, layer: usize, data: &[u8])
    {
        self.inner.update_raw(layer, data, &self.raw_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::backend::RamFs;

    fn raw_default(_layer: usize, _row: usize, _col: usize) -> u16
    {
        0x0000
    }

    fn fixture() -> (KeymapStore<fn(usize, usize, usize) -> u16>, Filesystem<RamFs>)
    {
        let store = KeymapStore::new(4, 5, 6, raw_default as fn(usize, usize, usize) -> u16);
        let fs = Filesystem::new(RamFs::new());
        fs.init().unwrap();
        fs.mkdir("layers").unwrap();
        (store, fs)
    }

    #[test]
    fn fresh_store_reads_raw_default()
    {
        let (store, _fs) = fixture();
        assert_eq!(store.read(0, 0, 0), 0x0000);
    }

    #[test]
    fn round_trip_law_full_assignment()
    {
        let (mut store, fs) = fixture();
        for layer in 0..store.layer_count() {
            for row in 0..5 {
                for col in 0..6 {
                    store.update(layer, row, col, 0x0010 + (row * 6 + col) as u16);
                }
            }
        }
        store.save(&fs).unwrap();

        let mut reloaded = KeymapStore::new(4, 5, 6, raw_default as fn(usize, usize, usize) -> u16);
        reloaded.load(&fs).unwrap();

        for layer in 0..4 {
            for row in 0..5 {
                for col in 0..6 {
                    assert_eq!(reloaded.read(layer, row, col), store.read(layer, row, col));
                }
            }
        }
    }

    #[test]
    fn erase_restores_raw_defaults()
    {
        let (mut store, fs) = fixture();
        store.update(0, 1, 1, 0xBEEF);
        store.save(&fs).unwrap();
        store.erase(&fs).unwrap();
        assert_eq!(store.read(0, 1, 1), 0x0000);
        assert_eq!(store.altered_count(0), 0);
        assert!(!fs.exists("layers/key00").unwrap());
    }
}
