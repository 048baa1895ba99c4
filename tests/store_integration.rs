//! Whole-`Store` round-trip scenarios, exercised through the public API
//! only (no access to any store's private fields), the way a firmware
//! integration would actually drive this crate across a simulated reboot.

use keystore::fs::Filesystem;
use keystore::fs::backend::RamFs;
use keystore::store::encoder::EncoderMapStore;
use keystore::store::keymap::KeymapStore;
use keystore::store::Store;

const LAYERS: usize = 4;
const ROWS: usize = 4;
const COLS: usize = 4;
const ENCODERS: usize = 2;
const DIRECTIONS: usize = 2;

fn raw_default(_layer: usize, _a: usize, _b: usize) -> u16
{
    0x0000
}

type TestStore = Store<RamFs, fn(usize, usize, usize) -> u16, fn(usize, usize, usize) -> u16>;

fn fresh_store() -> TestStore
{
    let fs = Filesystem::new(RamFs::new());
    let keymap = KeymapStore::new(LAYERS, ROWS, COLS, raw_default as fn(usize, usize, usize) -> u16);
    let encoder = EncoderMapStore::new(LAYERS, ENCODERS, DIRECTIONS, raw_default as fn(usize, usize, usize) -> u16);
    Store::new(fs, keymap, encoder, false, 4)
}

/// Scenario 1: fresh boot on empty flash formats and every reader falls
/// back to the compile-time default.
#[test]
fn fresh_boot_reads_raw_defaults()
{
    let mut store = fresh_store();
    store.post_init().unwrap();

    assert_eq!(store.keymap.read(0, 0, 0), 0x0000);
    assert_eq!(store.encoder.read(0, 0, 0), 0x0000);

    let mut out = [0u8; 4];
    store.macros.read_buffer(0, &mut out);
    assert_eq!(out, [0u8; 4]);
}

/// Scenario 2: a single keycode change saves as an override list and
/// restores identically after a simulated reboot.
#[test]
fn single_keycode_change_round_trips_after_reboot()
{
    let mut store = fresh_store();
    store.post_init().unwrap();

    store.keymap.update(2, 3, 0, 0xABCD);
    store.tick(std::time::Instant::now());

    assert!(store.fs.exists("layers/key02").unwrap());

    // Simulate a reboot: fresh caches, same backend behind `store.fs`.
    store.keymap.load(&store.fs).unwrap();
    assert_eq!(store.keymap.read(2, 3, 0), 0xABCD);
    assert_eq!(store.keymap.altered_count(2), 1);
}

/// Scenario 3: changing every key of a layer prefers the full-grid
/// encoding over an override list once the override list would be larger.
#[test]
fn mass_change_prefers_full_grid_and_round_trips()
{
    let mut store = fresh_store();
    store.post_init().unwrap();

    for row in 0..ROWS {
        for col in 0..COLS {
            store.keymap.update(1, row, col, 0x1234);
        }
    }
    store.tick(std::time::Instant::now());

    store.keymap.load(&store.fs).unwrap();
    for row in 0..ROWS {
        for col in 0..COLS {
            assert_eq!(store.keymap.read(1, row, col), 0x1234);
        }
    }
}

/// Scenario 4: the macro buffer survives a save/reboot-simulated-load
/// cycle, including an empty macro slot in the middle of the buffer.
#[test]
fn macro_buffer_round_trips_with_empty_slot()
{
    let mut store = fresh_store();
    store.post_init().unwrap();

    store.macros.update_buffer(0, b"hi\0bye\0\0");
    store.tick(std::time::Instant::now());

    assert!(store.fs.exists("macros/00").unwrap());
    assert!(store.fs.exists("macros/01").unwrap());
    assert!(!store.fs.exists("macros/02").unwrap());

    store.macros.load(&store.fs).unwrap();
    let mut out = [0u8; 7];
    store.macros.read_buffer(0, &mut out);
    assert_eq!(&out, b"hi\0bye\0");
}

/// A crash mid-sweep (simulated by saving keymap and encoder but never
/// reaching macros) still leaves every already-saved file in a fully
/// formed state: nothing torn, nothing partially written.
#[test]
fn partial_sweep_leaves_completed_files_intact()
{
    let mut store = fresh_store();
    store.post_init().unwrap();

    store.keymap.update(0, 0, 0, 0x2222);
    store.encoder.update(0, 1, 0, 0x3333);
    store.macros.update_buffer(0, b"x\0");

    // Only the first two stores get to run before the simulated crash.
    store.keymap.save(&store.fs).unwrap();
    store.encoder.save(&store.fs).unwrap();

    store.keymap.load(&store.fs).unwrap();
    store.encoder.load(&store.fs).unwrap();
    assert_eq!(store.keymap.read(0, 0, 0), 0x2222);
    assert_eq!(store.encoder.read(0, 1, 0), 0x3333);
    // Macros were never saved, so the file must not exist yet.
    assert!(!store.fs.exists("macros/00").unwrap());
}

/// Scenario: VIA's magic is written during `post_init` and survives a
/// simulated reboot; layout options persist through the same `via/*` path.
#[test]
fn via_magic_and_layout_options_survive_reboot()
{
    let mut store = fresh_store();
    store.post_init().unwrap();
    assert!(store.via.magic_valid(&store.fs).unwrap());

    store.via.write_layout_options(&store.fs, 0x0000_0003).unwrap();

    // Simulate a reboot against the same backend: magic and layout options
    // are read straight from disk, there is no RAM cache to reload.
    assert!(store.via.magic_valid(&store.fs).unwrap());
    assert_eq!(store.via.read_layout_options(&store.fs).unwrap(), Some(0x0000_0003));
}

/// Erasing the keymap store restores raw defaults and removes the
/// altered/override state, independent of the encoder store or macros.
#[test]
fn erase_keymap_store_only_affects_keymap()
{
    let mut store = fresh_store();
    store.post_init().unwrap();

    store.keymap.update(3, 1, 1, 0x4444);
    store.encoder.update(3, 0, 1, 0x5555);
    store.tick(std::time::Instant::now());

    store.keymap.erase(&store.fs).unwrap();
    assert_eq!(store.keymap.read(3, 1, 1), 0x0000);
    assert_eq!(store.keymap.altered_count(3), 0);
    // Encoder layer untouched.
    assert_eq!(store.encoder.read(3, 0, 1), 0x5555);
}
