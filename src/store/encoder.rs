//! Per-layer RAM cache of encoder keycodes, keyed by `(encoder, direction)`.
//! Same save/load policy as `KeymapStore`, built on the same generic engine.

use crate::error::Result;
use crate::fs::backend::RawFilesystem;
use crate::fs::Filesystem;
use crate::store::layered::LayeredStore;

pub struct EncoderMapStore<F: Fn(usize, usize, usize) -> u16> {
    inner: LayeredStore,
    raw_default: F,
}

impl<F: Fn(usize, usize, usize) -> u16> EncoderMapStore<F> {
    pub fn new(layer_count: usize, num_encoders: usize, num_directions: usize, raw_default: F) -> Self
    {
        Self { inner: LayeredStore::new(layer_count, num_encoders, num_directions, "layers/enc"), raw_default }
    }

    pub fn layer_count(&self) -> usize
    {
        self.inner.layer_count()
    }

    pub fn altered_count(&self, layer: usize) -> usize
    {
        self.inner.altered_count(layer)
    }

    pub fn read(&self, layer: usize, encoder: usize, direction: usize) -> u16
    {
        self.inner.read(layer, encoder, direction)
    }

    pub fn update(&mut self, layer: usize, encoder: usize, direction: usize, keycode: u16)
    {
        self.inner.update(layer, encoder, direction, keycode, &self.raw_default)
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::backend::RamFs;

    fn raw_default(_layer: usize, _encoder: usize, _direction: usize) -> u16
    {
        0x0000
    }

    fn fixture() -> (EncoderMapStore<fn(usize, usize, usize) -> u16>, Filesystem<RamFs>)
    {
        let store = EncoderMapStore::new(3, 2, 2, raw_default as fn(usize, usize, usize) -> u16);
        let fs = Filesystem::new(RamFs::new());
        fs.init().unwrap();
        fs.mkdir("layers").unwrap();
        (store, fs)
    }

    #[test]
    fn save_then_load_round_trips()
    {
        let (mut store, fs) = fixture();
        store.update(0, 1, 0, 0x00AB);
        store.save(&fs).unwrap();

        let mut reloaded = EncoderMapStore::new(3, 2, 2, raw_default as fn(usize, usize, usize) -> u16);
        reloaded.load(&fs).unwrap();
        assert_eq!(reloaded.read(0, 1, 0), 0x00AB);
        assert_eq!(reloaded.read(0, 0, 0), 0x0000);
    }

    #[test]
    fn file_named_after_layer()
    {
        let (mut store, fs) = fixture();
        store.update(2, 0, 1, 0x1234);
        store.save(&fs).unwrap();
        assert!(fs.exists("layers/enc02").unwrap());
    }
}
