//! JEDEC SFDP (Serial Flash Discoverable Parameters) probing.
//!
//! The SPI bus transport itself (`spi_start/write/receive/stop`) is an
//! excluded external collaborator; this module only needs something that can
//! run a half-duplex SPI transaction, modeled as `SpiTransport`. Decoding
//! follows JESD216.

use crate::error::{Result, StoreError};

pub const SFDP_SIGNATURE: u32 = 0x5044_4653;
const OPCODE_READ_JEDEC_ID: u8 = 0x9F;
const OPCODE_READ_SFDP: u8 = 0x5A;
/// Parameter ID `0xFF84`'s low byte; the high byte is the `0xFF` every
/// JEDEC-standard parameter header carries, already checked separately.
const PARAM_ID_4BYTE_ADDR_LSB: u8 = 0x84;

/// The SPI transaction primitive SFDP probing needs: send `out`, then clock
/// in `in_len` bytes. Implemented by the physical SPI bus driver; never by
/// this crate.
pub trait SpiTransport {
    fn transact(&mut self, out: &[u8], in_len: usize) -> core::result::Result<Vec<u8>, StoreError>;
}

/// One of the six fast-read modes SFDP describes: `a-b-c` meaning `a` I/O
/// lines for the opcode, `b` for the address, `c` for the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FastReadMode {
    pub opcode: u8,
    pub mode_clocks: u8,
    pub dummy_clocks: u8,
}

impl FastReadMode {
    pub fn is_supported(&self) -> bool
    {
        self.opcode != 0x00
    }

    /// Instruction in bits [31:24], mode clocks in [23:21], dummy in [20:16].
    fn from_high_half(dword: u32) -> Self
    {
        let opcode = ((dword >> 24) & 0xFF) as u8;
        if opcode == 0 {
            return Self::default();
        }
        Self {
            opcode,
            mode_clocks: ((dword >> 21) & 0x07) as u8,
            dummy_clocks: ((dword >> 16) & 0x1F) as u8,
        }
    }

    /// Instruction in bits [15:8], mode clocks in [7:5], dummy in [4:0].
    fn from_low_half(dword: u32) -> Self
    {
        let opcode = ((dword >> 8) & 0xFF) as u8;
        if opcode == 0 {
            return Self::default();
        }
        Self {
            opcode,
            mode_clocks: ((dword >> 5) & 0x07) as u8,
            dummy_clocks: (dword & 0x1F) as u8,
        }
    }
}

/// One erase granularity SFDP advertises: an opcode and the sector size it erases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EraseType {
    pub opcode: u8,
    pub size: u32,
}

impl EraseType {
    pub fn is_valid(&self) -> bool
    {
        self.size > 0 && self.opcode != 0xFF
    }

    fn from_raw(size_exponent: u8, opcode: u8) -> Self
    {
        if size_exponent == 0 || opcode == 0xFF {
            return Self::default();
        }
        Self { opcode, size: 1u32 << size_exponent }
    }
}

/// Number of address bytes the part expects for a read/program command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    Three,
    ThreeOrFour,
    Four,
}

impl AddressWidth {
    fn from_bits(bits: u32) -> Self
    {
        match bits & 0x3 {
            0b01 => Self::ThreeOrFour,
            0b10 => Self::Four,
            _ => Self::Three,
        }
    }
}

/// Every fast-read family SFDP dwords 1, 3, 4, 6 and 7 describe.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastReadModes {
    pub supports_1_1_2: bool,
    pub supports_1_2_2: bool,
    pub supports_1_1_4: bool,
    pub supports_1_4_4: bool,
    pub supports_2_2_2: bool,
    pub supports_4_4_4: bool,

    pub mode_1_1_4: FastReadMode,
    pub mode_1_4_4: FastReadMode,
    pub mode_1_2_2: FastReadMode,
    pub mode_1_1_2: FastReadMode,
    pub mode_2_2_2: FastReadMode,
    pub mode_4_4_4: FastReadMode,
}

/// 4-byte address instruction table (parameter ID 0xFF84), decoded from its
/// DWORD 1 support-flags bitfield when the parameter header is present, but
/// not yet consumed by the active read/program path: discovered up front the
/// same way erase-opcode selection is, for a future caller to act on.
#[derive(Debug, Clone, Copy, Default)]
pub struct FourByteAddrTable {
    pub supports_4ba_read: bool,
    pub supports_4ba_fast_read: bool,
    pub supports_4ba_page_program: bool,
}

/// The decoded result of an SFDP probe: everything the block device and
/// filesystem layers need to know about the physical part.
#[derive(Debug, Clone)]
pub struct FlashProfile {
    pub jedec_id: [u8; 3],
    pub density_bytes: u64,
    pub address_width: AddressWidth,
    pub erase_types: [EraseType; 4],
    pub fast_read: FastReadModes,
    pub four_byte_addr: Option<FourByteAddrTable>,
}

impl FlashProfile {
    pub fn min_erase_size(&self) -> Option<u32>
    {
        self.erase_types.iter().filter(|e| e.is_valid()).map(|e| e.size).min()
    }
}

/// Conservative defaults used when SFDP probing fails: the part may still be
/// read with plain 1-1-1 reads (§7).
pub fn conservative_defaults() -> FlashProfile
{
    FlashProfile {
        jedec_id: [0, 0, 0],
        density_bytes: 0,
        address_width: AddressWidth::Three,
        erase_types: [EraseType::default(); 4],
        fast_read: FastReadModes::default(),
        four_byte_addr: None,
    }
}

pub struct SfdpProbe;

impl SfdpProbe {
    /// Runs the full probe sequence over `transport`: JEDEC ID, SFDP header,
    /// parameter headers, then the basic flash parameter table.
    pub fn probe(transport: &mut impl SpiTransport) -> Result<FlashProfile>
    {
        let id = transport.transact(&[OPCODE_READ_JEDEC_ID], 3)?;
        let jedec_id = [id[0], id[1], id[2]];

        let header_cmd = [OPCODE_READ_SFDP, 0x00, 0x00, 0x00, 0x00 /* dummy */];
        let header = transport.transact(&header_cmd, 8)?;

        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != SFDP_SIGNATURE {
            return Err(StoreError::NotFound("SFDP signature not present"));
        }
        if header[7] != 0xFF {
            return Err(StoreError::Corrupt("SFDP header reserved byte mismatch"));
        }

        let header_count = header[6] as usize + 1;

        let mut basic_table: Option<Vec<u8>> = None;
        let mut four_byte_addr = None;
        for n in 0..header_count {
            let addr = 8 + n * 8;
            let phdr_cmd = sfdp_read_command(addr as u32);
            let phdr = transport.transact(&phdr_cmd, 8)?;

            if phdr[7] != 0xFF {
                return Err(StoreError::Corrupt("SFDP parameter header reserved byte mismatch"));
            }

            let length_dwords = phdr[3] as usize;
            let table_pointer = u32::from_le_bytes([phdr[4], phdr[5], phdr[6], 0]);

            if n == 0 {
                let table_cmd = sfdp_read_command(table_pointer);
                let table = transport.transact(&table_cmd, length_dwords * 4)?;
                basic_table = Some(table);
            } else if phdr[0] == PARAM_ID_4BYTE_ADDR_LSB && length_dwords >= 1 {
                let table_cmd = sfdp_read_command(table_pointer);
                let table = transport.transact(&table_cmd, 4)?;
                let dword1 = u32::from_le_bytes([table[0], table[1], table[2], table[3]]);
                four_byte_addr = Some(FourByteAddrTable {
                    supports_4ba_read: dword1 & 0x1 != 0,
                    supports_4ba_fast_read: dword1 & 0x2 != 0,
                    supports_4ba_page_program: dword1 & 0x40 != 0,
                });
            }
        }

        let table = basic_table.ok_or(StoreError::Corrupt("SFDP basic parameter table missing"))?;
        let mut profile = decode_basic_table(jedec_id, &table)?;
        profile.four_byte_addr = four_byte_addr;
        Ok(profile)
    }
}

fn sfdp_read_command(addr: u32) -> [u8; 5]
{
    [
        OPCODE_READ_SFDP,
        ((addr >> 16) & 0xFF) as u8,
        ((addr >> 8) & 0xFF) as u8,
        (addr & 0xFF) as u8,
        0x00, // dummy byte
    ]
}

fn dword_at(table: &[u8], index: usize) -> Option<u32>
{
    let start = index * 4;
    if start + 4 > table.len() {
        return None;
    }
    Some(u32::from_le_bytes([table[start], table[start + 1], table[start + 2], table[start + 3]]))
}

/// Decodes dwords 1-9 (0-indexed: 0-8) of the Basic Flash Parameter Table.
fn decode_basic_table(jedec_id: [u8; 3], table: &[u8]) -> Result<FlashProfile>
{
    let dword = |i: usize| -> Result<u32> {
        dword_at(table, i).ok_or(StoreError::Corrupt("SFDP basic table truncated"))
    };

    let d1 = dword(0)?;
    let address_width = AddressWidth::from_bits(d1 >> 17);

    let d2 = dword(1)?;
    let is_high_density = (d2 >> 31) & 1 != 0;
    let density_bits: u64 = if is_high_density {
        1u64 << (d2 & 0x7FFF_FFFF)
    } else {
        (d2 as u64 & 0x7FFF_FFFF) + 1
    };
    let density_bytes = density_bits / 8;

    let d3 = dword(2)?;
    let mode_1_1_4 = FastReadMode::from_low_half(d3);
    let mode_1_4_4 = FastReadMode::from_high_half(d3);

    let d4 = dword(3)?;
    let mode_1_2_2 = FastReadMode::from_high_half(d4);
    let mode_1_1_2 = FastReadMode::from_low_half(d4);

    let d5 = dword(4)?;
    let supports_2_2_2 = (d5 >> 20) & 1 != 0;
    let supports_4_4_4 = (d5 >> 4) & 1 != 0;

    let d7 = dword(6)?;
    let mode_2_2_2 = FastReadMode::from_high_half(d7);

    let d8 = dword(7)?;
    let mode_4_4_4 = FastReadMode::from_high_half(d8);

    let d9 = dword(8)?;
    let erase_types = [
        EraseType::from_raw(((d8 >> 8) & 0xFF) as u8, (d8 & 0xFF) as u8),
        EraseType::from_raw(((d8 >> 24) & 0xFF) as u8, ((d8 >> 16) & 0xFF) as u8),
        EraseType::from_raw(((d9 >> 8) & 0xFF) as u8, (d9 & 0xFF) as u8),
        EraseType::from_raw(((d9 >> 24) & 0xFF) as u8, ((d9 >> 16) & 0xFF) as u8),
    ];

    let fast_read = FastReadModes {
        supports_1_1_2: mode_1_1_2.is_supported(),
        supports_1_2_2: mode_1_2_2.is_supported(),
        supports_1_1_4: mode_1_1_4.is_supported(),
        supports_1_4_4: mode_1_4_4.is_supported(),
        supports_2_2_2,
        supports_4_4_4,
        mode_1_1_4,
        mode_1_4_4,
        mode_1_2_2,
        mode_1_1_2,
        mode_2_2_2,
        mode_4_4_4,
    };

    Ok(FlashProfile {
        jedec_id,
        density_bytes,
        address_width,
        erase_types,
        fast_read,
        four_byte_addr: None,
    })
}

/// An `SpiTransport` backed by a captured SFDP image instead of a physical
/// bus: `jedec_id` answers opcode `0x9F`, `sfdp_image` answers opcode `0x5A`
/// reads at the addresses they were captured from. Used by `keystore-tool`
/// to decode a dump without any hardware attached.
pub struct BufferTransport {
    pub jedec_id: [u8; 3],
    pub sfdp_image: Vec<u8>,
}

impl SpiTransport for BufferTransport {
    fn transact(&mut self, out: &[u8], in_len: usize) -> core::result::Result<Vec<u8>, StoreError>
    {
        if out[0] == OPCODE_READ_JEDEC_ID {
            return Ok(self.jedec_id.to_vec());
        }

        let addr = ((out[1] as usize) << 16) | ((out[2] as usize) << 8) | out[3] as usize;
        if addr + in_len > self.sfdp_image.len() {
            return Err(StoreError::Io("SFDP image too short for requested read"));
        }
        Ok(self.sfdp_image[addr..addr + in_len].to_vec())
    }
}
