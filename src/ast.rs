//! Components representing instruction operands.
//!
//! These components together describe one operand of a ColdFire instruction:
//! - [`DataReg`] and [`AddrReg`]: the two register files,
//! - [`Size`] and [`SizeSet`]: operand sizes,
//! - [`Index`] and [`Scale`]: scaled-index components,
//! - [`EffectiveAddress`]: the full addressing-mode descriptor shared by the
//!   assembler and the simulator,
//! - [`ModeSet`]: bit-flag sets of addressing-mode kinds, used by instruction
//!   definitions to declare their legal operands.

use std::num::TryFromIntError;

/// A data register. Must be between 0 and 7.
///
/// This can either be constructed by selecting a register from [`reg_consts`],
/// or by using [`DataReg::try_from`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct DataReg(pub(crate) u8);

/// An address register. Must be between 0 and 7.
///
/// Register 7 is the active stack pointer. Which physical stack pointer that
/// is (user or supervisor) depends on the current privilege level; see
/// [`crate::sim::cpu::Cpu`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct AddrReg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::{AddrReg, DataReg};

    /// Data register 0.
    pub const D0: DataReg = DataReg(0);
    /// Data register 1.
    pub const D1: DataReg = DataReg(1);
    /// Data register 2.
    pub const D2: DataReg = DataReg(2);
    /// Data register 3.
    pub const D3: DataReg = DataReg(3);
    /// Data register 4.
    pub const D4: DataReg = DataReg(4);
    /// Data register 5.
    pub const D5: DataReg = DataReg(5);
    /// Data register 6.
    pub const D6: DataReg = DataReg(6);
    /// Data register 7.
    pub const D7: DataReg = DataReg(7);

    /// Address register 0.
    pub const A0: AddrReg = AddrReg(0);
    /// Address register 1.
    pub const A1: AddrReg = AddrReg(1);
    /// Address register 2.
    pub const A2: AddrReg = AddrReg(2);
    /// Address register 3.
    pub const A3: AddrReg = AddrReg(3);
    /// Address register 4.
    pub const A4: AddrReg = AddrReg(4);
    /// Address register 5.
    pub const A5: AddrReg = AddrReg(5);
    /// Address register 6 (conventionally the frame pointer).
    pub const A6: AddrReg = AddrReg(6);
    /// Address register 7, the active stack pointer.
    pub const SP: AddrReg = AddrReg(7);
}

impl DataReg {
    /// Gets the register number. Always between 0 and 7.
    pub fn reg_no(self) -> u8 {
        self.0
    }
}
impl AddrReg {
    /// Gets the register number. Always between 0 and 7.
    pub fn reg_no(self) -> u8 {
        self.0
    }
}
impl std::fmt::Display for DataReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "D{}", self.0)
    }
}
impl std::fmt::Display for AddrReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}
impl From<DataReg> for usize {
    fn from(value: DataReg) -> Self {
        usize::from(value.0)
    }
}
impl From<AddrReg> for usize {
    fn from(value: AddrReg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for DataReg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(DataReg(value)),
            // TryFromIntError has no public constructor, so manufacture one
            // from a conversion that always overflows
            _ => u8::try_from(256).map(|_| unreachable!("conversion of 256 to u8 cannot succeed")),
        }
    }
}
impl TryFrom<u8> for AddrReg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(AddrReg(value)),
            _ => u8::try_from(256).map(|_| unreachable!("conversion of 256 to u8 cannot succeed")),
        }
    }
}

/// An operand size.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Size {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Word,
    /// 32-bit access.
    Long,
}
impl Size {
    /// Number of bytes covered by this size.
    pub fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Long => 4,
        }
    }
    /// Number of bits covered by this size.
    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }
    /// A mask selecting the low bits covered by this size.
    pub fn mask(self) -> u32 {
        match self {
            Size::Byte => 0x0000_00FF,
            Size::Word => 0x0000_FFFF,
            Size::Long => 0xFFFF_FFFF,
        }
    }
    /// The sign bit for this size.
    pub fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }
    /// Sign-extends the low bits of `value` covered by this size to 32 bits.
    pub fn sign_extend(self, value: u32) -> u32 {
        match self {
            Size::Byte => value as u8 as i8 as i32 as u32,
            Size::Word => value as u16 as i16 as i32 as u32,
            Size::Long => value,
        }
    }
    /// Merges the low bits of `new` into `old`, preserving `old`'s upper bits.
    ///
    /// Byte and word writes to a data register only touch the low lane;
    /// this implements that merge.
    pub fn merge(self, old: u32, new: u32) -> u32 {
        (old & !self.mask()) | (new & self.mask())
    }
}
impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::Byte => f.write_str(".B"),
            Size::Word => f.write_str(".W"),
            Size::Long => f.write_str(".L"),
        }
    }
}

/// A set of operand sizes, used by instruction definitions to declare which
/// sizes they accept.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SizeSet(u8);
impl SizeSet {
    /// The empty set (for unsized instructions).
    pub const NONE: Self = Self(0);
    /// Byte only.
    pub const B: Self = Self(1 << 0);
    /// Word only.
    pub const W: Self = Self(1 << 1);
    /// Long only.
    pub const L: Self = Self(1 << 2);
    /// Byte or word or long.
    pub const BWL: Self = Self(0b111);
    /// Word or long.
    pub const WL: Self = Self(0b110);

    /// Const-friendly union, for building size sets in static tables.
    pub const fn union(self, other: SizeSet) -> SizeSet {
        SizeSet(self.0 | other.0)
    }
    /// Whether this set contains the given size.
    pub fn contains(self, size: Size) -> bool {
        let bit = match size {
            Size::Byte => Self::B,
            Size::Word => Self::W,
            Size::Long => Self::L,
        };
        self.0 & bit.0 != 0
    }
    /// Whether this set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
impl std::ops::BitOr for SizeSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Scale factor for a scaled-index register.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Scale {
    /// ×1
    One,
    /// ×2
    Two,
    /// ×4
    Four,
    /// ×8
    Eight,
}
impl Scale {
    /// The multiplication factor.
    pub fn factor(self) -> u32 {
        1 << self.log2()
    }
    /// log2 of the factor, which is also the 2-bit encoding in extension words.
    pub fn log2(self) -> u32 {
        match self {
            Scale::One => 0,
            Scale::Two => 1,
            Scale::Four => 2,
            Scale::Eight => 3,
        }
    }
    /// Decodes from the 2-bit extension-word field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Scale::One,
            1 => Scale::Two,
            2 => Scale::Four,
            _ => Scale::Eight,
        }
    }
}

/// An index register: either register file, always read as a 32-bit value.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum IndexReg {
    /// A data register.
    Data(DataReg),
    /// An address register.
    Addr(AddrReg),
}
impl std::fmt::Display for IndexReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexReg::Data(r) => r.fmt(f),
            IndexReg::Addr(r) => r.fmt(f),
        }
    }
}

/// A scaled index: an index register plus a scale factor.
///
/// ```text
/// MOVE.L 4(A0,D1.L*4), D2
///          ~~~~~~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Index {
    /// The index register.
    pub reg: IndexReg,
    /// The scale factor applied to the index register.
    pub scale: Scale,
}
impl std::fmt::Display for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.L*{}", self.reg, self.scale.factor())
    }
}

/// A control or status register accessed by name rather than through the
/// general addressing modes.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SpecialReg {
    /// The condition-code register (low byte of SR).
    Ccr,
    /// The full status register (supervisor only).
    Sr,
    /// The user stack pointer (supervisor only).
    Usp,
    /// The vector base register.
    Vbr,
    /// The peripheral (module) base register.
    Mbar,
    /// RAM base register. Declared but passive in this engine.
    Rambar,
    /// ROM base register. Declared but passive in this engine.
    Rombar,
    /// The MAC accumulator.
    Acc,
    /// The MAC status register.
    Macsr,
    /// The MAC mask register.
    Mask,
}
impl std::fmt::Display for SpecialReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpecialReg::Ccr => "CCR",
            SpecialReg::Sr => "SR",
            SpecialReg::Usp => "USP",
            SpecialReg::Vbr => "VBR",
            SpecialReg::Mbar => "MBAR",
            SpecialReg::Rambar => "RAMBAR",
            SpecialReg::Rombar => "ROMBAR",
            SpecialReg::Acc => "ACC",
            SpecialReg::Macsr => "MACSR",
            SpecialReg::Mask => "MASK",
        };
        f.write_str(name)
    }
}

/// Which 16-bit half of a register a multiply-accumulate operand reads.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MacHalf {
    /// Bits 15..0.
    Lower,
    /// Bits 31..16.
    Upper,
}

/// One multiply-accumulate source: a register (0–7 data, 8–15 address)
/// and the half of it to read.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct MacReg {
    /// Register number across both files: 0–7 are D0–D7, 8–15 are A0–A7.
    pub reg: u8,
    /// Which half of the register the multiplier reads.
    pub half: MacHalf,
}
impl std::fmt::Display for MacReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reg {
            0..=7 => write!(f, "D{}", self.reg)?,
            _ => write!(f, "A{}", self.reg - 8)?,
        }
        match self.half {
            MacHalf::Lower => f.write_str(".L"),
            MacHalf::Upper => f.write_str(".U"),
        }
    }
}

/// One operand's addressing mode, registers, and any displacement, scale, or
/// immediate value.
///
/// This descriptor is shared by the encoder, the decoder, and the executor:
/// the assembler builds one per operand from parsed text, the disassembler
/// rebuilds the same value from machine words, and the simulator resolves it
/// to a register or memory location. A value is constructed once per operand
/// and never mutated.
///
/// ## Examples (Motorola syntax)
///
/// ```text
/// MOVE.L  D0, (A1)          ; DataDirect, Indirect
/// MOVE.W  (A0)+, -(A1)      ; PostIncr, PreDecr
/// MOVE.B  16(A2), 4(A3,D1.L*2)  ; Displacement, Indexed
/// LEA     (0x8000).W, A0    ; AbsShort (sign-extends to 0xFFFF8000)
/// MOVE.L  #-1, D0           ; Immediate
/// MOVEC   D0, VBR           ; Special
/// MOVEM.L D0-D3/A5, (A7)    ; RegList
/// MAC.W   D1.U, D2.L        ; MacPair
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum EffectiveAddress {
    /// `Dn` — data register direct.
    DataDirect(DataReg),
    /// `An` — address register direct.
    AddrDirect(AddrReg),
    /// `(An)` — address register indirect.
    Indirect(AddrReg),
    /// `(An)+` — indirect with post-increment.
    PostIncr(AddrReg),
    /// `-(An)` — indirect with pre-decrement.
    PreDecr(AddrReg),
    /// `d16(An)` — indirect with signed 16-bit displacement.
    Displacement(AddrReg, i16),
    /// `d8(An,Xi*SF)` — indirect with signed 8-bit displacement and a
    /// scaled index register.
    Indexed(AddrReg, Index, i8),
    /// `(xxx).W` — absolute short. The stored address is already
    /// sign-extended to 32 bits.
    AbsShort(u32),
    /// `(xxx).L` — absolute long.
    AbsLong(u32),
    /// `d16(PC)` — PC-relative with signed 16-bit displacement.
    ///
    /// The displacement is measured from the address of the extension word,
    /// not from the opcode word.
    PcDisplacement(i16),
    /// `d8(PC,Xi*SF)` — PC-relative with a scaled index register.
    PcIndexed(Index, i8),
    /// `#imm` — immediate data. Its width comes from the instruction's
    /// requested size, not from this descriptor.
    Immediate(u32),
    /// A control register named directly in the mnemonic's operands.
    Special(SpecialReg),
    /// A register list mask for MOVEM. Bit 0 = D0 … bit 7 = D7,
    /// bit 8 = A0 … bit 15 = A7.
    RegList(u16),
    /// A multiply-accumulate source pair (`Ry.h`, `Rx.h`).
    MacPair(MacReg, MacReg),
    /// No encoded operand (the mnemonic implies everything).
    Implied,
}

impl EffectiveAddress {
    /// The single-kind [`ModeSet`] this operand belongs to.
    pub fn kind(&self) -> ModeSet {
        match self {
            EffectiveAddress::DataDirect(_) => ModeSet::DATA,
            EffectiveAddress::AddrDirect(_) => ModeSet::ADDR,
            EffectiveAddress::Indirect(_) => ModeSet::INDIRECT,
            EffectiveAddress::PostIncr(_) => ModeSet::POST_INCR,
            EffectiveAddress::PreDecr(_) => ModeSet::PRE_DECR,
            EffectiveAddress::Displacement(..) => ModeSet::DISP,
            EffectiveAddress::Indexed(..) => ModeSet::INDEXED,
            EffectiveAddress::AbsShort(_) => ModeSet::ABS_SHORT,
            EffectiveAddress::AbsLong(_) => ModeSet::ABS_LONG,
            EffectiveAddress::PcDisplacement(_) => ModeSet::PC_DISP,
            EffectiveAddress::PcIndexed(..) => ModeSet::PC_INDEXED,
            EffectiveAddress::Immediate(_) => ModeSet::IMMEDIATE,
            EffectiveAddress::Special(_) => ModeSet::SPECIAL,
            EffectiveAddress::RegList(_) => ModeSet::REG_LIST,
            EffectiveAddress::MacPair(..) => ModeSet::MAC_PAIR,
            EffectiveAddress::Implied => ModeSet::IMPLIED,
        }
    }

    /// Whether this operand designates a memory location (as opposed to a
    /// register, an immediate, or nothing).
    pub fn is_memory(&self) -> bool {
        ModeSet::MEMORY.contains_all(self.kind())
    }
}

impl std::fmt::Display for EffectiveAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EffectiveAddress::DataDirect(r) => r.fmt(f),
            EffectiveAddress::AddrDirect(r) => r.fmt(f),
            EffectiveAddress::Indirect(r) => write!(f, "({r})"),
            EffectiveAddress::PostIncr(r) => write!(f, "({r})+"),
            EffectiveAddress::PreDecr(r) => write!(f, "-({r})"),
            EffectiveAddress::Displacement(r, d) => write!(f, "{d}({r})"),
            EffectiveAddress::Indexed(r, x, d) => write!(f, "{d}({r},{x})"),
            EffectiveAddress::AbsShort(a) => write!(f, "(0x{:04X}).W", *a as u16),
            EffectiveAddress::AbsLong(a) => write!(f, "(0x{a:08X}).L"),
            EffectiveAddress::PcDisplacement(d) => write!(f, "{d}(PC)"),
            EffectiveAddress::PcIndexed(x, d) => write!(f, "{d}(PC,{x})"),
            EffectiveAddress::Immediate(v) => write!(f, "#{}", *v as i32),
            EffectiveAddress::Special(s) => s.fmt(f),
            EffectiveAddress::RegList(mask) => fmt_reg_list(f, *mask),
            EffectiveAddress::MacPair(y, x) => write!(f, "{y}, {x}"),
            EffectiveAddress::Implied => Ok(()),
        }
    }
}

fn fmt_reg_list(f: &mut std::fmt::Formatter<'_>, mask: u16) -> std::fmt::Result {
    let mut first = true;
    for (file, base) in [("D", 0u16), ("A", 8)] {
        let mut i = 0u16;
        while i < 8 {
            if mask & (1 << (base + i)) != 0 {
                let start = i;
                while i < 8 && mask & (1 << (base + i)) != 0 {
                    i += 1;
                }
                if !first {
                    f.write_str("/")?;
                }
                first = false;
                match i - start {
                    1 => write!(f, "{file}{start}")?,
                    _ => write!(f, "{file}{start}-{file}{}", i - 1)?,
                }
            } else {
                i += 1;
            }
        }
    }
    if first {
        f.write_str("#0")?;
    }
    Ok(())
}

/// A set of addressing-mode kinds.
///
/// Instruction definitions use two of these to declare which addressing modes
/// their source and destination operands accept.
#[derive(Default, PartialEq, Eq, Clone, Copy)]
pub struct ModeSet(u32);
impl ModeSet {
    /// The empty set (an operand slot that must be absent).
    pub const NONE: Self = Self(0);
    /// Data register direct.
    pub const DATA: Self = Self(1 << 0);
    /// Address register direct.
    pub const ADDR: Self = Self(1 << 1);
    /// Address register indirect.
    pub const INDIRECT: Self = Self(1 << 2);
    /// Post-increment indirect.
    pub const POST_INCR: Self = Self(1 << 3);
    /// Pre-decrement indirect.
    pub const PRE_DECR: Self = Self(1 << 4);
    /// 16-bit displacement indirect.
    pub const DISP: Self = Self(1 << 5);
    /// 8-bit displacement + scaled index.
    pub const INDEXED: Self = Self(1 << 6);
    /// Absolute short.
    pub const ABS_SHORT: Self = Self(1 << 7);
    /// Absolute long.
    pub const ABS_LONG: Self = Self(1 << 8);
    /// PC-relative displacement.
    pub const PC_DISP: Self = Self(1 << 9);
    /// PC-relative + scaled index.
    pub const PC_INDEXED: Self = Self(1 << 10);
    /// Immediate.
    pub const IMMEDIATE: Self = Self(1 << 11);
    /// Named control register.
    pub const SPECIAL: Self = Self(1 << 12);
    /// MOVEM register list.
    pub const REG_LIST: Self = Self(1 << 13);
    /// Multiply-accumulate register pair.
    pub const MAC_PAIR: Self = Self(1 << 14);
    /// Implied operand.
    pub const IMPLIED: Self = Self(1 << 15);

    /// Every mode that resolves to a memory location.
    pub const MEMORY: Self = Self(
        Self::INDIRECT.0
            | Self::POST_INCR.0
            | Self::PRE_DECR.0
            | Self::DISP.0
            | Self::INDEXED.0
            | Self::ABS_SHORT.0
            | Self::ABS_LONG.0
            | Self::PC_DISP.0
            | Self::PC_INDEXED.0,
    );
    /// Memory modes that are writable (excludes the PC-relative modes).
    pub const ALTERABLE_MEM: Self = Self(
        Self::INDIRECT.0
            | Self::POST_INCR.0
            | Self::PRE_DECR.0
            | Self::DISP.0
            | Self::INDEXED.0
            | Self::ABS_SHORT.0
            | Self::ABS_LONG.0,
    );
    /// Every general addressing mode usable as a data source.
    pub const ALL_SRC: Self = Self(
        Self::DATA.0 | Self::ADDR.0 | Self::MEMORY.0 | Self::IMMEDIATE.0,
    );
    /// Every general addressing mode usable as a writable destination.
    pub const DATA_ALTERABLE: Self = Self(Self::DATA.0 | Self::ALTERABLE_MEM.0);
    /// Every alterable mode including address registers.
    pub const ALTERABLE: Self = Self(Self::DATA.0 | Self::ADDR.0 | Self::ALTERABLE_MEM.0);
    /// Control addressing modes (those naming a single memory address with no
    /// side effect), used by LEA/PEA/JMP/JSR.
    pub const CONTROL: Self = Self(
        Self::INDIRECT.0
            | Self::DISP.0
            | Self::INDEXED.0
            | Self::ABS_SHORT.0
            | Self::ABS_LONG.0
            | Self::PC_DISP.0
            | Self::PC_INDEXED.0,
    );

    /// Const-friendly union, for building mode sets in static tables.
    pub const fn union(self, other: ModeSet) -> ModeSet {
        ModeSet(self.0 | other.0)
    }
    /// Whether every kind in `other` is also in `self`.
    pub fn contains_all(self, other: ModeSet) -> bool {
        self.0 & other.0 == other.0
    }
    /// Whether this set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
impl std::ops::BitOr for ModeSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
impl std::fmt::Debug for ModeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModeSet({:#018b})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::reg_consts::*;
    use super::*;

    #[test]
    fn reg_bounds() {
        assert!(DataReg::try_from(7).is_ok());
        assert!(DataReg::try_from(8).is_err());
        assert!(AddrReg::try_from(7).is_ok());
        assert!(AddrReg::try_from(8).is_err());
    }

    #[test]
    fn size_merge_preserves_upper_lanes() {
        assert_eq!(Size::Byte.merge(0xAABB_CCDD, 0x11), 0xAABB_CC11);
        assert_eq!(Size::Word.merge(0xAABB_CCDD, 0x1122), 0xAABB_1122);
        assert_eq!(Size::Long.merge(0xAABB_CCDD, 0x1122_3344), 0x1122_3344);
    }

    #[test]
    fn size_sign_extend() {
        assert_eq!(Size::Byte.sign_extend(0x80), 0xFFFF_FF80);
        assert_eq!(Size::Word.sign_extend(0x7FFF), 0x0000_7FFF);
        assert_eq!(Size::Word.sign_extend(0x8000), 0xFFFF_8000);
    }

    #[test]
    fn mode_set_groups() {
        assert!(ModeSet::MEMORY.contains_all(EffectiveAddress::PostIncr(A0).kind()));
        assert!(!ModeSet::ALTERABLE_MEM.contains_all(EffectiveAddress::PcDisplacement(0).kind()));
        assert!(ModeSet::DATA_ALTERABLE.contains_all(EffectiveAddress::DataDirect(D0).kind()));
        assert!(!ModeSet::DATA_ALTERABLE.contains_all(EffectiveAddress::AddrDirect(A1).kind()));
        assert!(!ModeSet::CONTROL.contains_all(EffectiveAddress::PostIncr(A2).kind()));
    }

    #[test]
    fn reg_list_display() {
        let ea = EffectiveAddress::RegList(0b0000_0001_0000_1111);
        assert_eq!(ea.to_string(), "D0-D3/A0");
        assert_eq!(EffectiveAddress::RegList(0).to_string(), "#0");
    }
}
