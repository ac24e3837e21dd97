//! The address-space decoder.
//!
//! Every memory access in the engine funnels through [`MemoryMap`], which
//! decides what a logical address actually hits, in priority order:
//!
//! 1. the fixed 4 KiB simulator-I/O window ([`SimIo`]),
//! 2. the 64 KiB peripheral window above the CPU's MBAR register,
//! 3. one of up to [`MAX_BANKS`] configured memory banks.
//!
//! An access that matches none of these, or that starts inside a region but
//! would run past its end, is rejected; nothing is ever split across a
//! boundary. Multi-byte values are always big-endian, regardless of host
//! endianness.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::device::{DeviceHandler, SimIo, MBAR_WINDOW, SIM_IO_WINDOW};
use crate::ast::Size;

/// Maximum number of configurable memory banks.
pub const MAX_BANKS: usize = 8;

/// Error from an access the address-space decoder rejected.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MemErr {
    /// No region claims this address.
    Unmapped {
        /// The accessed address.
        addr: u32,
    },
    /// The access starts inside a region but runs past its end.
    Boundary {
        /// The accessed address.
        addr: u32,
        /// The access width in bytes.
        size: u32,
    },
    /// A write hit a read-only bank.
    ReadOnly {
        /// The accessed address.
        addr: u32,
    },
    /// A peripheral or simulator port rejected the access.
    DeviceFault {
        /// The accessed address.
        addr: u32,
    },
}
impl MemErr {
    /// The address the failing access targeted.
    pub fn addr(self) -> u32 {
        match self {
            MemErr::Unmapped { addr }
            | MemErr::Boundary { addr, .. }
            | MemErr::ReadOnly { addr }
            | MemErr::DeviceFault { addr } => addr,
        }
    }
}
impl std::fmt::Display for MemErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemErr::Unmapped { addr } => write!(f, "access to unmapped address 0x{addr:08X}"),
            MemErr::Boundary { addr, size } => {
                write!(f, "{size}-byte access at 0x{addr:08X} runs past a region boundary")
            }
            MemErr::ReadOnly { addr } => write!(f, "write to read-only address 0x{addr:08X}"),
            MemErr::DeviceFault { addr } => write!(f, "device rejected access at 0x{addr:08X}"),
        }
    }
}
impl std::error::Error for MemErr {}

/// How a bank behaves.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BankKind {
    /// Readable and writable.
    Normal,
    /// Readable; writes fault.
    ReadOnly,
    /// Writes are accepted and discarded; reads return the fill byte
    /// replicated across the access width.
    Null {
        /// The byte every read returns.
        fill: u8,
    },
}

/// How a bank's storage is filled at creation and on reset.
///
/// Filling with garbage rather than zero shakes out programs that rely on
/// uninitialized memory; a seeded fill keeps such runs reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillStrategy {
    /// Every byte is zero.
    #[default]
    Zeroed,
    /// Every byte is drawn from an unseeded RNG.
    Random,
    /// Every byte is drawn from an RNG with the given seed.
    Seeded(u64),
}
impl FillStrategy {
    fn fill(self, buf: &mut [u8]) {
        match self {
            FillStrategy::Zeroed => buf.fill(0),
            FillStrategy::Random => StdRng::from_entropy().fill(buf),
            FillStrategy::Seeded(seed) => StdRng::seed_from_u64(seed).fill(buf),
        }
    }
}

/// One contiguous memory region.
#[derive(Debug)]
pub struct Bank {
    /// Name for diagnostics ("flash", "sram", ...).
    pub name: String,
    /// First address of the bank.
    pub base: u32,
    /// Length in bytes.
    pub size: u32,
    /// The bank's behavior.
    pub kind: BankKind,
    data: Box<[u8]>,
}
impl Bank {
    fn contains(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) < self.size
    }
}

/// What an address resolves to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Target {
    /// Offset into the simulator-I/O window.
    SimIo(u32),
    /// Offset into the peripheral window.
    Device(u16),
    /// Index of the bank holding the address.
    Bank(usize),
}

/// Coarse classification of an address for inspection paths.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Region {
    /// Simulator-I/O window.
    SimIo,
    /// Peripheral window.
    Device,
    /// A normal bank.
    Ram,
    /// A read-only bank.
    Rom,
    /// A null bank.
    Null,
}

/// The full address space: banks, the peripheral window, and the simulator
/// window, plus the devices and ports behind the windows.
pub struct MemoryMap {
    banks: Vec<Bank>,
    /// Base address of the simulator-I/O window.
    pub io_base: u32,
    /// Ports inside the simulator-I/O window.
    pub io: SimIo,
    /// Devices inside the peripheral window.
    pub devices: DeviceHandler,
    fill: FillStrategy,
}

impl MemoryMap {
    /// Creates an empty map with the simulator window at `io_base` and no
    /// console attached.
    pub fn new(io_base: u32) -> Self {
        Self {
            banks: Vec::new(),
            io_base,
            io: SimIo::detached(),
            devices: DeviceHandler::new(),
            fill: FillStrategy::default(),
        }
    }

    /// Sets the fill strategy applied to banks added afterwards and on reset.
    pub fn set_fill(&mut self, fill: FillStrategy) {
        self.fill = fill;
    }

    /// Adds a bank. Fails if the range overlaps an existing bank, wraps the
    /// address space, or the bank limit is reached.
    pub fn add_bank(
        &mut self,
        name: impl Into<String>,
        base: u32,
        size: u32,
        kind: BankKind,
    ) -> Result<(), BankConfigError> {
        let name = name.into();
        if self.banks.len() >= MAX_BANKS {
            return Err(BankConfigError::TooMany);
        }
        let end = match base.checked_add(size) {
            Some(e) if size > 0 => e,
            _ => return Err(BankConfigError::BadRange { name }),
        };
        if let Some(other) = self.banks.iter().find(|b| base < b.base + b.size && b.base < end) {
            return Err(BankConfigError::Overlap { name, other: other.name.clone() });
        }
        let data = match kind {
            // null banks carry no storage
            BankKind::Null { .. } => Box::default(),
            _ => {
                let mut buf = vec![0u8; size as usize].into_boxed_slice();
                self.fill.fill(&mut buf);
                buf
            }
        };
        self.banks.push(Bank { name, base, size, kind, data });
        Ok(())
    }

    /// The configured banks.
    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    /// Refills every bank's storage per the fill strategy. Interrupt lines
    /// and devices are reset alongside.
    pub fn reset(&mut self) {
        for bank in &mut self.banks {
            self.fill.fill(&mut bank.data);
        }
        self.devices.reset_all();
    }

    /// Resolves an address to the region that claims it.
    ///
    /// `width` 0 skips the spill check (classification only); otherwise the
    /// whole `width`-byte range must lie inside the claiming region.
    pub fn classify(&self, addr: u32, width: u32, mbar: u32) -> Result<Target, MemErr> {
        let spill = |offset: u32, len: u32| {
            // the start is in range, so overflow past the boundary means spill
            if width != 0 && u64::from(offset) + u64::from(width) > u64::from(len) {
                Err(MemErr::Boundary { addr, size: width })
            } else {
                Ok(())
            }
        };
        // windows near the top of the address space must not wrap around and
        // claim low memory, so the offset test is checked, not modular
        let window = |base: u32, len: u32| addr.checked_sub(base).filter(|&off| off < len);
        if let Some(offset) = window(self.io_base, SIM_IO_WINDOW) {
            spill(offset, SIM_IO_WINDOW)?;
            return Ok(Target::SimIo(offset));
        }
        if let Some(offset) = window(mbar, MBAR_WINDOW) {
            spill(offset, MBAR_WINDOW)?;
            return Ok(Target::Device(offset as u16));
        }
        for (i, bank) in self.banks.iter().enumerate() {
            if bank.contains(addr) {
                spill(addr - bank.base, bank.size)?;
                return Ok(Target::Bank(i));
            }
        }
        Err(MemErr::Unmapped { addr })
    }

    /// Classification that never fails, for disassembly and other
    /// inspection paths. A boundary-spilling access still classifies by its
    /// start address.
    pub fn region_of(&self, addr: u32, mbar: u32) -> Option<Region> {
        match self.classify(addr, 0, mbar).ok()? {
            Target::SimIo(_) => Some(Region::SimIo),
            Target::Device(_) => Some(Region::Device),
            Target::Bank(i) => Some(match self.banks[i].kind {
                BankKind::Normal => Region::Ram,
                BankKind::ReadOnly => Region::Rom,
                BankKind::Null { .. } => Region::Null,
            }),
        }
    }

    /// Reads a big-endian value of the given size.
    pub fn read(&mut self, addr: u32, size: Size, mbar: u32) -> Result<u32, MemErr> {
        let width = size.bytes();
        match self.classify(addr, width, mbar)? {
            Target::SimIo(offset) => {
                self.io.read(offset).ok_or(MemErr::DeviceFault { addr })
            }
            Target::Device(offset) => {
                self.devices.read(offset, size).ok_or(MemErr::DeviceFault { addr })
            }
            Target::Bank(i) => {
                let bank = &self.banks[i];
                match bank.kind {
                    BankKind::Null { fill } => {
                        let mut v = 0u32;
                        for _ in 0..width {
                            v = v << 8 | u32::from(fill);
                        }
                        Ok(v)
                    }
                    _ => {
                        let off = (addr - bank.base) as usize;
                        let mut v = 0u32;
                        for b in &bank.data[off..off + width as usize] {
                            v = v << 8 | u32::from(*b);
                        }
                        Ok(v)
                    }
                }
            }
        }
    }

    /// Writes a big-endian value of the given size.
    pub fn write(&mut self, addr: u32, size: Size, value: u32, mbar: u32) -> Result<(), MemErr> {
        let width = size.bytes();
        match self.classify(addr, width, mbar)? {
            Target::SimIo(offset) => {
                if self.io.write(offset, value & size.mask()) {
                    Ok(())
                } else {
                    Err(MemErr::DeviceFault { addr })
                }
            }
            Target::Device(offset) => {
                if self.devices.write(offset, size, value & size.mask()) {
                    Ok(())
                } else {
                    Err(MemErr::DeviceFault { addr })
                }
            }
            Target::Bank(i) => {
                let bank = &mut self.banks[i];
                match bank.kind {
                    BankKind::ReadOnly => Err(MemErr::ReadOnly { addr }),
                    BankKind::Null { .. } => Ok(()),
                    BankKind::Normal => {
                        let off = (addr - bank.base) as usize;
                        for (j, slot) in
                            bank.data[off..off + width as usize].iter_mut().enumerate()
                        {
                            *slot = (value >> (8 * (width as usize - 1 - j))) as u8;
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    /// Reads one instruction word. Convenience for the fetch path.
    pub fn read_word(&mut self, addr: u32, mbar: u32) -> Result<u16, MemErr> {
        self.read(addr, Size::Word, mbar).map(|v| v as u16)
    }

    /// Seeds memory with raw bytes, bypassing bank write protection. Used for
    /// loading a program image before execution; null banks and windows
    /// cannot be seeded.
    pub fn load(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MemErr> {
        let len = u32::try_from(bytes.len()).map_err(|_| MemErr::Unmapped { addr })?;
        if len == 0 {
            return Ok(());
        }
        let bank = self
            .banks
            .iter_mut()
            .find(|b| b.contains(addr))
            .ok_or(MemErr::Unmapped { addr })?;
        if matches!(bank.kind, BankKind::Null { .. }) {
            return Err(MemErr::ReadOnly { addr });
        }
        if addr - bank.base + len > bank.size {
            return Err(MemErr::Boundary { addr, size: len });
        }
        let off = (addr - bank.base) as usize;
        bank.data[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Error from configuring a bank.
#[derive(Debug, PartialEq, Eq)]
pub enum BankConfigError {
    /// The bank limit ([`MAX_BANKS`]) is already reached.
    TooMany,
    /// The bank is empty or wraps past the top of the address space.
    BadRange {
        /// The bank's name.
        name: String,
    },
    /// The bank overlaps an existing bank.
    Overlap {
        /// The bank's name.
        name: String,
        /// The existing bank it overlaps.
        other: String,
    },
}
impl std::fmt::Display for BankConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BankConfigError::TooMany => write!(f, "no more than {MAX_BANKS} banks may be configured"),
            BankConfigError::BadRange { name } => write!(f, "bank {name} has an invalid range"),
            BankConfigError::Overlap { name, other } => {
                write!(f, "bank {name} overlaps bank {other}")
            }
        }
    }
}
impl std::error::Error for BankConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_MBAR: u32 = 0xF000_0000;

    fn map() -> MemoryMap {
        let mut m = MemoryMap::new(0xE000_0000);
        m.add_bank("ram", 0x1000, 0x1000, BankKind::Normal).unwrap();
        m.add_bank("rom", 0x8000, 0x1000, BankKind::ReadOnly).unwrap();
        m.add_bank("null", 0xA000, 0x1000, BankKind::Null { fill: 0xA5 }).unwrap();
        m
    }

    #[test]
    fn big_endian_layout() {
        let mut m = map();
        m.write(0x1000, Size::Long, 0x1122_3344, NO_MBAR).unwrap();
        assert_eq!(m.read(0x1000, Size::Byte, NO_MBAR), Ok(0x11));
        assert_eq!(m.read(0x1003, Size::Byte, NO_MBAR), Ok(0x44));
        assert_eq!(m.read(0x1002, Size::Word, NO_MBAR), Ok(0x3344));
    }

    #[test]
    fn access_inside_bank_ok_spill_rejected() {
        let mut m = map();
        assert!(m.read(0x1FFC, Size::Long, NO_MBAR).is_ok());
        assert_eq!(
            m.read(0x1FFE, Size::Long, NO_MBAR),
            Err(MemErr::Boundary { addr: 0x1FFE, size: 4 })
        );
        assert_eq!(m.read(0x0FFF, Size::Byte, NO_MBAR), Err(MemErr::Unmapped { addr: 0x0FFF }));
        // classification alone still works on a spilling start address
        assert_eq!(m.region_of(0x1FFE, NO_MBAR), Some(Region::Ram));
    }

    #[test]
    fn read_only_and_null_banks() {
        let mut m = map();
        assert_eq!(m.write(0x8000, Size::Word, 1, NO_MBAR), Err(MemErr::ReadOnly { addr: 0x8000 }));
        // null: writes discarded, reads return the fill replicated
        m.write(0xA010, Size::Long, 0xDEAD_BEEF, NO_MBAR).unwrap();
        assert_eq!(m.read(0xA010, Size::Long, NO_MBAR), Ok(0xA5A5_A5A5));
        assert_eq!(m.read(0xA010, Size::Byte, NO_MBAR), Ok(0xA5));
    }

    #[test]
    fn window_priority_over_banks() {
        let mut m = MemoryMap::new(0x2000);
        m.add_bank("ram", 0x0000, 0x10000, BankKind::Normal).unwrap();
        // 0x2000 lands in the simulator window even though the bank spans it
        assert_eq!(m.classify(0x2000, 4, NO_MBAR), Ok(Target::SimIo(0)));
        assert_eq!(m.classify(0x4000, 4, 0x4000), Ok(Target::Device(0)));
        assert_eq!(m.classify(0x1000, 4, 0x4000), Ok(Target::Bank(0)));
        // spilling past the window end is a size error, not a fallthrough
        assert_eq!(
            m.classify(0x2FFE, 4, NO_MBAR),
            Err(MemErr::Boundary { addr: 0x2FFE, size: 4 })
        );
    }

    #[test]
    fn top_of_memory_window_leaves_low_addresses_alone() {
        let mut m = map();
        // the reset-default MBAR sits 4 KiB below the top of the address
        // space; low memory must still resolve to its banks
        let mbar = 0xFFFF_F000;
        m.write(0x1000, Size::Long, 0x1234_5678, mbar).unwrap();
        assert_eq!(m.read(0x1000, Size::Long, mbar), Ok(0x1234_5678));
        assert_eq!(m.region_of(0x1000, mbar), Some(Region::Ram));
        assert_eq!(m.read(0x0010, Size::Word, mbar), Err(MemErr::Unmapped { addr: 0x0010 }));
        // the window itself still claims the top pages
        assert_eq!(m.classify(0xFFFF_F800, 0, mbar), Ok(Target::Device(0x0800)));
    }

    #[test]
    fn load_seeds_rom() {
        let mut m = map();
        m.load(0x8000, &[0xDE, 0xAD]).unwrap();
        assert_eq!(m.read(0x8000, Size::Word, NO_MBAR), Ok(0xDEAD));
        assert!(m.load(0x8FFF, &[0, 0]).is_err());
        assert!(m.load(0xA000, &[0]).is_err());
    }

    #[test]
    fn seeded_fill_reproducible() {
        let mut a = MemoryMap::new(0xE000_0000);
        a.set_fill(FillStrategy::Seeded(7));
        a.add_bank("ram", 0, 0x100, BankKind::Normal).unwrap();
        let mut b = MemoryMap::new(0xE000_0000);
        b.set_fill(FillStrategy::Seeded(7));
        b.add_bank("ram", 0, 0x100, BankKind::Normal).unwrap();
        for addr in (0..0x100).step_by(4) {
            assert_eq!(
                a.read(addr, Size::Long, 0xF000_0000).unwrap(),
                b.read(addr, Size::Long, 0xF000_0000).unwrap()
            );
        }
    }
}
