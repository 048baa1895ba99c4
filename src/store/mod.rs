//! The NVM overlay: RAM-cached, dirty-tracked keymap/encoder layers plus the
//! macro buffer and small EE-config files, all saved from one housekeeping
//! tick.

pub mod eeconfig;
pub mod encoder;
pub mod keymap;
pub mod layered;
pub mod macros;
pub mod via;

use std::time::{Duration, Instant};

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::fs::backend::RawFilesystem;
use crate::fs::Filesystem;
use eeconfig::EeConfig;
use encoder::EncoderMapStore;
use keymap::KeymapStore;
use macros::MacroStore;
use via::ViaStore;

const HOUSEKEEPING_THROTTLE: Duration = Duration::from_millis(250);

/// The single owning value carrying every buffer the old global-mutable-state
/// design scattered across the firmware image: the mounted filesystem and
/// every NVM store. Each operation takes `&mut Store`; callers serialize
/// access with their own mutex around that reference.
pub struct Store<B, KF, EF>
where
    B: RawFilesystem,
    KF: Fn(usize, usize, usize) -> u16,
    EF: Fn(usize, usize, usize) -> u16,
{
    pub fs: Filesystem<B>,
    pub keymap: KeymapStore<KF>,
    pub encoder: EncoderMapStore<EF>,
    pub macros: MacroStore,
    pub ee: EeConfig,
    pub via: ViaStore,
    pub diagnostics: Diagnostics,
    last_save: Option<Instant>,
}

impl<B, KF, EF> Store<B, KF, EF>
where
    B: RawFilesystem,
    KF: Fn(usize, usize, usize) -> u16,
    EF: Fn(usize, usize, usize) -> u16,
{
    pub fn new(
        fs: Filesystem<B>,
        keymap: KeymapStore<KF>,
        encoder: EncoderMapStore<EF>,
        verify_ee_writes: bool,
        via_custom_config_size: usize,
    ) -> Self
    {
        Self {
            fs,
            keymap,
            encoder,
            macros: MacroStore::new(),
            ee: EeConfig::new(verify_ee_writes),
            via: ViaStore::new(via_custom_config_size),
            diagnostics: Diagnostics::default(),
            last_save: None,
        }
    }

    /// Formats on first mount if needed, then populates every store's RAM
    /// cache from disk. Call once from the post-init boot hook.
    pub fn post_init(&mut self) -> Result<()>
    {
        self.fs.init()?;
        self.fs.mkdir("layers").or_else(ignore_exists)?;
        self.fs.mkdir("macros").or_else(ignore_exists)?;
        self.fs.mkdir("ee").or_else(ignore_exists)?;
        self.fs.mkdir("via").or_else(ignore_exists)?;

        self.keymap.load(&self.fs)?;
        self.encoder.load(&self.fs)?;
        self.macros.load(&self.fs)?;
        self.via.init(&self.fs)?;
        Ok(())
    }

    /// Housekeeping entry point, throttled to one save sweep per 250 ms.
    /// Not atomic across stores; a crash mid-sweep leaves each file in
    /// either its previous or its new state, never torn, because the
    /// backing filesystem journals per-file writes.
    pub fn tick(&mut self, now: Instant)
    {
        if let Some(last) = self.last_save {
            if now.duration_since(last) < HOUSEKEEPING_THROTTLE {
                return;
            }
        }
        self.last_save = Some(now);
        self.save_all();
    }

    fn save_all(&mut self)
    {
        self.diagnostics.note_save_attempt();

        if let Err(e) = self.keymap.save(&self.fs) {
            self.diagnostics.note_save_failure(&e.to_string());
        }
        if let Err(e) = self.encoder.save(&self.fs) {
            self.diagnostics.note_save_failure(&e.to_string());
        }
        if let Err(e) = self.macros.save(&self.fs) {
            self.diagnostics.note_save_failure(&e.to_string());
        }
    }
}

fn ignore_exists(err: crate::error::StoreError) -> Result<()>
{
    match err {
        crate::error::StoreError::Invalid(_) => Ok(()),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::backend::RamFs;
    use std::time::Duration;

    fn zero(_layer: usize, _a: usize, _b: usize) -> u16
    {
        0
    }

    fn store() -> Store<RamFs, fn(usize, usize, usize) -> u16, fn(usize, usize, usize) -> u16>
    {
        let fs = Filesystem::new(RamFs::new());
        let keymap = KeymapStore::new(2, 3, 3, zero as fn(usize, usize, usize) -> u16);
        let encoder = EncoderMapStore::new(2, 1, 2, zero as fn(usize, usize, usize) -> u16);
        Store::new(fs, keymap, encoder, false, 4)
    }

    #[test]
    fn post_init_on_fresh_flash_leaves_defaults()
    {
        let mut store = store();
        store.post_init().unwrap();
        assert_eq!(store.keymap.read(0, 0, 0), 0);
    }

    #[test]
    fn tick_is_throttled()
    {
        let mut store = store();
        store.post_init().unwrap();
        store.keymap.update(0, 0, 0, 0xAAAA);

        let t0 = Instant::now();
        store.tick(t0);
        assert_eq!(store.diagnostics.save_attempts(), 1);

        store.keymap.update(0, 0, 1, 0xBBBB);
        store.tick(t0 + Duration::from_millis(10));
        assert_eq!(store.diagnostics.save_attempts(), 1, "second tick within throttle window must be a no-op");

        store.tick(t0 + Duration::from_millis(300));
        assert_eq!(store.diagnostics.save_attempts(), 2);
    }

    #[test]
    fn save_then_reboot_simulated_load_round_trips()
    {
        let mut store = store();
        store.post_init().unwrap();
        store.keymap.update(1, 2, 2, 0x1234);
        store.macros.update_buffer(0, b"go\0");
        store.tick(Instant::now());

        // Simulate a reboot: reload every store's cache from the same
        // backend instead of trusting the RAM state already in `store`.
        store.keymap.load(&store.fs).unwrap();
        store.encoder.load(&store.fs).unwrap();
        store.macros.load(&store.fs).unwrap();

        assert_eq!(store.keymap.read(1, 2, 2), 0x1234);
        let mut out = [0u8; 3];
        store.macros.read_buffer(0, &mut out);
        assert_eq!(&out, b"go\0");
    }
}
