//! Safe address arithmetic and the five-callback contract the filesystem
//! layer consumes from a physical SPI NOR part.

pub mod sfdp;

use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, StoreError};

/// Build-time flash geometry. `block_size` in bytes, `cache_size` must be a
/// multiple of 8 and divide `block_size`, `block_cycles` bounds erase wear
/// before the backing filesystem relocates a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDeviceGeometry {
    pub block_size: u32,
    pub block_count: u32,
    pub cache_size: u32,
    pub block_cycles: u32,
}

impl BlockDeviceGeometry {
    pub fn validate(&self) -> Result<()>
    {
        if self.block_size < 128 {
            return Err(StoreError::Invalid("block_size must be >= 128"));
        }
        if self.block_count == 0 {
            return Err(StoreError::Invalid("block_count must be > 0"));
        }
        if self.cache_size == 0 || self.cache_size % 8 != 0 {
            return Err(StoreError::Invalid("cache_size must be a nonzero multiple of 8"));
        }
        if self.block_size % self.cache_size != 0 {
            return Err(StoreError::Invalid("cache_size must divide block_size"));
        }
        if self.block_cycles == 0 {
            return Err(StoreError::Invalid("block_cycles must be > 0"));
        }
        Ok(())
    }
}

/// Status a physical flash transfer can report. Maps onto `StoreError` per
/// the fixed table `{Success->Ok, BadAddress->Invalid, Timeout|Busy|Error->Io}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStatus {
    Success,
    BadAddress,
    Timeout,
    Busy,
    Error,
}

impl FlashStatus {
    fn into_result(self) -> Result<()>
    {
        match self {
            FlashStatus::Success => Ok(()),
            FlashStatus::BadAddress => Err(StoreError::Invalid("flash reported bad address")),
            FlashStatus::Timeout => Err(StoreError::Io("flash transfer timed out")),
            FlashStatus::Busy => Err(StoreError::Io("flash bus busy")),
            FlashStatus::Error => Err(StoreError::Io("flash transfer error")),
        }
    }
}

/// The contract a physical (or simulated) SPI NOR part must provide. No
/// address arithmetic here: the device trusts the byte address it is given.
pub trait RawFlash {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> FlashStatus;
    fn program(&mut self, addr: u64, buf: &[u8]) -> FlashStatus;
    fn erase(&mut self, addr: u64, size: u32) -> FlashStatus;
    fn sync(&mut self) -> FlashStatus;
}

/// An RAII guard representing exclusive ownership of the block device's
/// underlying mutex, released automatically on drop regardless of how the
/// scope is exited. Replaces a cleanup-attribute-style lock/unlock pair.
pub struct BlockGuard<'a, D> {
    inner: MutexGuard<'a, D>,
}

impl<'a, D: RawFlash> BlockGuard<'a, D> {
    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()>
    {
        self.inner.read(addr, buf).into_result()
    }

    pub fn program(&mut self, addr: u64, buf: &[u8]) -> Result<()>
    {
        self.inner.program(addr, buf).into_result()
    }

    pub fn erase(&mut self, addr: u64, size: u32) -> Result<()>
    {
        self.inner.erase(addr, size).into_result()
    }

    pub fn sync(&mut self) -> Result<()>
    {
        self.inner.sync().into_result()
    }
}

/// Translates `(block, offset, size)` tuples into byte addresses with
/// overflow-safe arithmetic and exposes the `read/program/erase/sync/lock`
/// callbacks the filesystem layer consumes. `unlock` is implicit: dropping
/// the `BlockGuard` returned by `lock` releases the mutex.
pub struct FlashBlockDevice<D> {
    geometry: BlockDeviceGeometry,
    device: Mutex<D>,
}

impl<D: RawFlash> FlashBlockDevice<D> {
    pub fn new(geometry: BlockDeviceGeometry, device: D) -> Result<Self>
    {
        geometry.validate()?;
        Ok(Self { geometry, device: Mutex::new(device) })
    }

    pub fn geometry(&self) -> BlockDeviceGeometry
    {
        self.geometry
    }

    /// Acquires the device mutex for the duration of one transfer.
    pub fn lock(&self) -> Result<BlockGuard<'_, D>>
    {
        let inner = self.device.lock().map_err(|_| StoreError::Io("block device mutex poisoned"))?;
        Ok(BlockGuard { inner })
    }

    /// `sync` is a no-op for SPI NOR: writes are synchronous at the chip
    /// interface. Kept for contract completeness.
    pub fn sync(&self) -> Result<()>
    {
        self.lock()?.sync()
    }

    fn address(&self, block: u32, offset: u32, size: u32) -> Result<u64>
    {
        if block >= self.geometry.block_count {
            return Err(StoreError::Invalid("block index out of range"));
        }

        let end_offset = offset.checked_add(size).ok_or(StoreError::Invalid("offset+size overflow"))?;
        if end_offset > self.geometry.block_size {
            return Err(StoreError::Invalid("offset+size exceeds block_size"));
        }

        let base = (block as u64).checked_mul(self.geometry.block_size as u64)
            .ok_or(StoreError::Invalid("block*block_size overflow"))?;
        base.checked_add(offset as u64).ok_or(StoreError::Invalid("address overflow"))
    }

    pub fn read(&self, block: u32, offset: u32, buf: &mut [u8]) -> Result<()>
    {
        let addr = self.address(block, offset, buf.len() as u32)?;
        self.lock()?.read(addr, buf)
    }

    pub fn program(&self, block: u32, offset: u32, buf: &[u8]) -> Result<()>
    {
        let addr = self.address(block, offset, buf.len() as u32)?;
        self.lock()?.program(addr, buf)
    }

    /// Erases one full block.
    pub fn erase(&self, block: u32) -> Result<()>
    {
        let addr = self.address(block, 0, self.geometry.block_size)?;
        self.lock()?.erase(addr, self.geometry.block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemFlash {
        bytes: Vec<u8>,
    }

    impl RawFlash for MemFlash {
        fn read(&mut self, addr: u64, buf: &mut [u8]) -> FlashStatus
        {
            let addr = addr as usize;
            if addr + buf.len() > self.bytes.len() {
                return FlashStatus::BadAddress;
            }
            buf.copy_from_slice(&self.bytes[addr..addr + buf.len()]);
            FlashStatus::Success
        }

        fn program(&mut self, addr: u64, buf: &[u8]) -> FlashStatus
        {
            let addr = addr as usize;
            if addr + buf.len() > self.bytes.len() {
                return FlashStatus::BadAddress;
            }
            self.bytes[addr..addr + buf.len()].copy_from_slice(buf);
            FlashStatus::Success
        }

        fn erase(&mut self, addr: u64, size: u32) -> FlashStatus
        {
            let addr = addr as usize;
            let size = size as usize;
            if addr + size > self.bytes.len() {
                return FlashStatus::BadAddress;
            }
            for b in &mut self.bytes[addr..addr + size] {
                *b = 0xFF;
            }
            FlashStatus::Success
        }

        fn sync(&mut self) -> FlashStatus
        {
            FlashStatus::Success
        }
    }

    fn device() -> FlashBlockDevice<MemFlash>
    {
        let geometry = BlockDeviceGeometry { block_size: 256, block_count: 4, cache_size: 8, block_cycles: 1000 };
        FlashBlockDevice::new(geometry, MemFlash { bytes: vec![0xFFu8; 256 * 4] }).unwrap()
    }

    #[test]
    fn rejects_invalid_geometry()
    {
        let geometry = BlockDeviceGeometry { block_size: 100, block_count: 4, cache_size: 8, block_cycles: 1000 };
        assert!(FlashBlockDevice::new(geometry, MemFlash { bytes: vec![] }).is_err());
    }

    #[test]
    fn read_program_round_trip()
    {
        let dev = device();
        dev.program(1, 4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        dev.read(1, 4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_block_is_invalid()
    {
        let dev = device();
        assert_eq!(dev.read(4, 0, &mut [0u8; 1]), Err(StoreError::Invalid("block index out of range")));
    }

    #[test]
    fn offset_plus_size_overflow_is_invalid()
    {
        let dev = device();
        assert!(dev.read(0, 250, &mut [0u8; 10]).is_err());
    }

    #[test]
    fn erase_fills_with_0xff()
    {
        let dev = device();
        dev.program(2, 0, &[0, 0, 0]).unwrap();
        dev.erase(2).unwrap();
        let mut out = [0u8; 3];
        dev.read(2, 0, &mut out).unwrap();
        assert_eq!(out, [0xFF, 0xFF, 0xFF]);
    }
}
