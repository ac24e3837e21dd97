//! The uniform instruction abstraction.
//!
//! Every mnemonic/encoding family is one [`Variant`]: a process-lifetime
//! descriptor carrying the family's opcode stencil, its variable bit mask and
//! exclusion list, the ISA tier and extension that gate it, its legal operand
//! modes and sizes, and an [`Exec`] discriminant naming its semantics.
//!
//! The four operations of the contract:
//! - **decode** ([`Variant::decode`]): opcode word + extension words → a
//!   [`Decoded`] instruction,
//! - **encode** ([`Variant::encode`]): operands → machine words,
//! - **calc_size** ([`Variant::calc_size`]): how many bytes an encoding
//!   would occupy, used to disambiguate overlapping mnemonic candidates,
//! - **execute**: in [`crate::inst::exec`], dispatched on [`Exec`].
//!
//! The variant table itself lives in [`table`].

pub mod ea;
pub mod exec;
pub mod table;

use crate::ast::{
    AddrReg, DataReg, EffectiveAddress, MacHalf, MacReg, ModeSet, Size, SizeSet, SpecialReg,
};
use crate::isa::{Extension, Profile, Tier};
use crate::sim::cpu::StatusReg;
use ea::{EaError, WordStream};

/// Index of a variant in the registry's master table.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct VariantId(pub(crate) u16);

/// A branch/step classification, consumed by step-over logic.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Flow {
    /// Ordinary instruction.
    None,
    /// Transfers control without creating a frame (BRA, Bcc, JMP).
    Branch,
    /// Calls a subroutine (BSR, JSR); step-over runs to the return.
    Call,
    /// Stops the processor (STOP, HALT).
    Stop,
    /// Returns from a subroutine or exception (RTS, RTE).
    Ret,
}

/// One of the sixteen condition codes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Cond {
    /// Always true.
    True,
    /// Always false.
    False,
    /// Higher (unsigned).
    Hi,
    /// Lower or same (unsigned).
    Ls,
    /// Carry clear.
    Cc,
    /// Carry set.
    Cs,
    /// Not equal.
    Ne,
    /// Equal.
    Eq,
    /// Overflow clear.
    Vc,
    /// Overflow set.
    Vs,
    /// Plus.
    Pl,
    /// Minus.
    Mi,
    /// Greater or equal (signed).
    Ge,
    /// Less than (signed).
    Lt,
    /// Greater than (signed).
    Gt,
    /// Less or equal (signed).
    Le,
}

impl Cond {
    /// Decodes the 4-bit condition field.
    pub fn from_bits(bits: u8) -> Cond {
        use Cond::*;
        [True, False, Hi, Ls, Cc, Cs, Ne, Eq, Vc, Vs, Pl, Mi, Ge, Lt, Gt, Le]
            [usize::from(bits & 0xF)]
    }
    /// The 4-bit condition field.
    pub fn bits(self) -> u8 {
        self as u8
    }
    /// The mnemonic suffix ("EQ", "NE", ...).
    pub fn suffix(self) -> &'static str {
        [
            "T", "F", "HI", "LS", "CC", "CS", "NE", "EQ", "VC", "VS", "PL", "MI", "GE", "LT",
            "GT", "LE",
        ][usize::from(self.bits())]
    }
    /// Evaluates the condition against the given flags.
    pub fn holds(self, sr: StatusReg) -> bool {
        let (c, v, z, n) = (sr.c(), sr.v(), sr.z(), sr.n());
        match self {
            Cond::True => true,
            Cond::False => false,
            Cond::Hi => !c && !z,
            Cond::Ls => c || z,
            Cond::Cc => !c,
            Cond::Cs => c,
            Cond::Ne => !z,
            Cond::Eq => z,
            Cond::Vc => !v,
            Cond::Vs => v,
            Cond::Pl => !n,
            Cond::Mi => n,
            Cond::Ge => n == v,
            Cond::Lt => n != v,
            Cond::Gt => !z && n == v,
            Cond::Le => z || n != v,
        }
    }
    /// Parses a condition suffix.
    pub fn from_suffix(s: &str) -> Option<Cond> {
        (0..16u8)
            .map(Cond::from_bits)
            .find(|c| c.suffix().eq_ignore_ascii_case(s))
    }
}

/// A logical operation shared by the register and immediate forms.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LogicOp {
    /// AND / ANDI
    And,
    /// OR / ORI
    Or,
    /// EOR / EORI
    Eor,
}

/// A bit-manipulation operation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BitOp {
    /// BTST
    Tst,
    /// BCHG
    Chg,
    /// BCLR
    Clr,
    /// BSET
    Set,
}

/// Which kind of branch a branch-family variant is.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BranchKind {
    /// BRA
    Always,
    /// BSR
    Sub,
    /// Bcc (condition in opword bits 11-8)
    Cond,
}

/// Semantic family of a variant; the single dispatch key for decode, encode,
/// and execute.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Exec {
    /// MOVE ea,ea
    Move,
    /// MOVEA ea,An
    Movea,
    /// MOVEQ #d8,Dn
    Moveq,
    /// MOV3Q #d3,ea
    Mov3q,
    /// MVS.B/W ea,Dn (sign-extending move)
    Mvs,
    /// MVZ.B/W ea,Dn (zero-extending move)
    Mvz,
    /// LEA ea,An
    Lea,
    /// PEA ea
    Pea,
    /// MOVEM.L list,ea / ea,list (direction in opword bit 10)
    Movem,
    /// MOVE CCR,Dn
    MoveFromCcr,
    /// MOVE ea,CCR
    MoveToCcr,
    /// MOVE SR,Dn
    MoveFromSr,
    /// MOVE ea,SR
    MoveToSr,
    /// MOVEC Rn,Rc
    Movec,
    /// STLDSR #imm16
    Stldsr,
    /// LINK An,#d16
    Link,
    /// UNLK An
    Unlk,
    /// CLR ea
    Clr,
    /// TST ea
    Tst,
    /// TAS ea
    Tas,
    /// Scc Dn (condition in opword bits 11-8)
    Scc,
    /// SWAP Dn
    Swap,
    /// EXT.W / EXT.L / EXTB.L (opmode in opword bits 8-6)
    Ext,
    /// ADD / SUB (direction in opword bit 8)
    Add {
        /// SUB rather than ADD.
        sub: bool,
    },
    /// ADDA / SUBA
    AddA {
        /// SUBA rather than ADDA.
        sub: bool,
    },
    /// ADDI / SUBI
    AddI {
        /// SUBI rather than ADDI.
        sub: bool,
    },
    /// ADDQ / SUBQ
    AddQ {
        /// SUBQ rather than ADDQ.
        sub: bool,
    },
    /// ADDX / SUBX
    AddX {
        /// SUBX rather than ADDX.
        sub: bool,
    },
    /// CMP (size in opmode bits 8-6)
    Cmp,
    /// CMPA.L
    CmpA,
    /// CMPI (size in opword bits 7-6)
    CmpI,
    /// NEG / NEGX
    Neg {
        /// NEGX rather than NEG.
        extend: bool,
    },
    /// NOT
    Not,
    /// AND / OR / EOR register form
    Logic(LogicOp),
    /// ANDI / ORI / EORI
    LogicI(LogicOp),
    /// MULU.W / MULS.W
    MulW {
        /// Signed multiply.
        signed: bool,
    },
    /// MULU.L / MULS.L (sign in the extension word)
    MulL,
    /// DIVU.W / DIVS.W
    DivW {
        /// Signed divide.
        signed: bool,
    },
    /// DIVU.L / DIVS.L / REMU.L / REMS.L (selected by the extension word)
    DivL,
    /// ASd / LSd (direction in opword bit 8, count kind in bit 5)
    Shift {
        /// Arithmetic rather than logical shift.
        arith: bool,
    },
    /// BTST/BCHG/BCLR/BSET
    BitOp {
        /// The operation.
        op: BitOp,
        /// Bit number from a register (true) or an extension word (false).
        dynamic: bool,
    },
    /// BRA / BSR / Bcc
    Branch {
        /// Which branch.
        kind: BranchKind,
        /// 32-bit displacement form.
        long: bool,
    },
    /// JMP ea
    Jmp,
    /// JSR ea
    Jsr,
    /// RTS
    Rts,
    /// RTE
    Rte,
    /// NOP
    Nop,
    /// TRAP #n
    Trap,
    /// TPF (trap false: skips its own extension words)
    Tpf,
    /// STOP #imm16
    Stop,
    /// HALT
    Halt,
    /// PULSE
    Pulse,
    /// The dedicated illegal-instruction opcode.
    IllegalOp,
    /// BITREV Dn
    Bitrev,
    /// BYTEREV Dn
    Byterev,
    /// FF1 Dn
    Ff1,
    /// SATS Dn
    Sats,
    /// INTOUCH (An)
    Intouch,
    /// WDDATA ea
    Wddata,
    /// WDEBUG ea
    Wdebug,
    /// MAC / MSAC Ry,Rx
    Mac,
    /// MOVE to/from ACC, MACSR, MASK
    MoveMacReg,
    /// MOVCLR ACC,Dn
    Movclr,
    /// The whole-opcode-space filler; executing it raises the unimplemented
    /// or illegal-instruction vector for its own opcode.
    Filler,
}

/// One mnemonic/encoding family. Entries live for the whole process in the
/// registry's master table and are immutable.
#[derive(Debug)]
pub struct Variant {
    /// Primary mnemonic.
    pub mnemonic: &'static str,
    /// Alternate mnemonic sharing the encoding (MSAC for MAC, ASL for ASR).
    pub alt_mnemonic: Option<&'static str>,
    /// Fixed opcode bits. Never overlaps `variable`.
    pub stencil: u16,
    /// Bits that range over the encoding's register/mode space.
    pub variable: u16,
    /// `(mask, value)` pairs carving out opcodes claimed by a more specific
    /// variant or having no defined meaning.
    pub exclusions: &'static [(u16, u16)],
    /// The ISA tier that introduced this family.
    pub tier: Tier,
    /// The coprocessor extension required, if any.
    pub extension: Option<Extension>,
    /// Pins the variant to its introduction tier instead of propagating
    /// forward, for encodings a later revision reassigns.
    pub no_propagate: bool,
    /// Legal addressing modes of the source operand.
    pub src_modes: ModeSet,
    /// Legal addressing modes of the destination operand.
    pub dst_modes: ModeSet,
    /// Legal operand sizes.
    pub sizes: SizeSet,
    /// The size assumed when the caller specifies none.
    pub default_size: Size,
    /// Legal immediate range (inclusive), when the source is an immediate.
    pub imm_range: Option<(i32, i32)>,
    /// Whether executing from user mode raises a privilege violation.
    pub supervisor: bool,
    /// Step-over classification.
    pub flow: Flow,
    /// Approximate cycle cost added per executed instruction.
    pub cycles: u32,
    /// Semantics discriminant.
    pub exec: Exec,
}

/// A fetched and decoded instruction.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Decoded {
    /// The variant that claimed the opcode.
    pub variant: VariantId,
    /// Address of the opcode word.
    pub addr: u32,
    /// The opcode word itself.
    pub opword: u16,
    /// Raw first extension word, for the families that interpret one
    /// (long multiply/divide, MAC); 0 otherwise.
    pub ext: u16,
    /// Operand size.
    pub size: Size,
    /// Source operand.
    pub src: EffectiveAddress,
    /// Destination operand.
    pub dst: EffectiveAddress,
    /// Total length in 16-bit words, opcode included.
    pub words: u8,
}

impl Decoded {
    /// Address of the following instruction.
    pub fn next_addr(&self) -> u32 {
        self.addr + 2 * u32::from(self.words)
    }
}

/// The machine words of one encoded instruction, in stream order.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct EncodedInst {
    buf: [u16; 6],
    len: u8,
}
impl EncodedInst {
    fn of(opword: u16) -> Self {
        let mut e = Self::default();
        e.push(opword);
        e
    }
    fn push(&mut self, w: u16) {
        self.buf[usize::from(self.len)] = w;
        self.len += 1;
    }
    fn extend(&mut self, words: &[u16]) {
        for &w in words {
            self.push(w);
        }
    }
    /// ORs bits into an already-encoded word. The assembler uses this for
    /// the bits selected by the mnemonic rather than the operands (shift
    /// direction, long multiply/divide sign and remainder flags).
    pub(crate) fn patch(&mut self, idx: usize, bits: u16) {
        self.buf[idx] |= bits;
    }
    /// The words as a slice.
    pub fn as_slice(&self) -> &[u16] {
        &self.buf[..usize::from(self.len)]
    }
    /// Length in bytes.
    pub fn byte_len(&self) -> u32 {
        2 * u32::from(self.len)
    }
    /// Appends the big-endian byte image to `out`.
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        for w in self.as_slice() {
            out.extend_from_slice(&w.to_be_bytes());
        }
    }
}

/// Error from asking a variant to encode an operand/size combination it
/// cannot represent.
///
/// The text front end validates its own input against the variant's declared
/// mode and size sets, so reaching one of these indicates a logic error in
/// the caller rather than bad user input.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EncodeError {
    /// The variant does not come in the requested size.
    BadSize {
        /// The variant's mnemonic.
        mnemonic: &'static str,
        /// The requested size.
        size: Size,
    },
    /// The source operand's addressing mode is not legal here.
    BadSrcMode {
        /// The variant's mnemonic.
        mnemonic: &'static str,
    },
    /// The destination operand's addressing mode is not legal here.
    BadDstMode {
        /// The variant's mnemonic.
        mnemonic: &'static str,
    },
    /// An immediate value outside the variant's legal range.
    BadImmediate {
        /// The variant's mnemonic.
        mnemonic: &'static str,
        /// The offending value.
        value: i32,
    },
    /// A branch target out of displacement range.
    BranchTooFar {
        /// The requested target address.
        target: u32,
    },
}
impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::BadSize { mnemonic, size } => {
                write!(f, "{mnemonic} does not take size {size}")
            }
            EncodeError::BadSrcMode { mnemonic } => {
                write!(f, "illegal source addressing mode for {mnemonic}")
            }
            EncodeError::BadDstMode { mnemonic } => {
                write!(f, "illegal destination addressing mode for {mnemonic}")
            }
            EncodeError::BadImmediate { mnemonic, value } => {
                write!(f, "immediate {value} out of range for {mnemonic}")
            }
            EncodeError::BranchTooFar { target } => {
                write!(f, "branch target 0x{target:08X} out of displacement range")
            }
        }
    }
}
impl std::error::Error for EncodeError {}

// opword field accessors

#[inline]
fn reg9(word: u16) -> u8 {
    (word >> 9 & 0b111) as u8
}
#[inline]
fn ea_lo(word: u16) -> (u8, u8) {
    ((word >> 3 & 0b111) as u8, (word & 0b111) as u8)
}
/// MOVE destination field: register in bits 11-9, mode in bits 8-6.
#[inline]
fn ea_hi(word: u16) -> (u8, u8) {
    ((word >> 6 & 0b111) as u8, (word >> 9 & 0b111) as u8)
}
#[inline]
fn pack_lo(mode: u8, reg: u8) -> u16 {
    u16::from(mode) << 3 | u16::from(reg)
}
#[inline]
fn pack_hi(mode: u8, reg: u8) -> u16 {
    u16::from(mode) << 6 | u16::from(reg) << 9
}

fn size_bits_76(word: u16) -> Size {
    match word >> 6 & 0b11 {
        0 => Size::Byte,
        1 => Size::Word,
        _ => Size::Long,
    }
}
fn size_to_bits_76(size: Size) -> u16 {
    (match size {
        Size::Byte => 0,
        Size::Word => 1,
        Size::Long => 2,
    }) << 6
}
fn move_size(word: u16) -> Size {
    match word >> 12 & 0b11 {
        0b01 => Size::Byte,
        0b11 => Size::Word,
        _ => Size::Long,
    }
}
fn move_size_bits(size: Size) -> u16 {
    (match size {
        Size::Byte => 0b01,
        Size::Word => 0b11,
        Size::Long => 0b10,
    }) << 12
}

fn mac_reg(bits: u8, upper: bool, size: Size) -> MacReg {
    let half = if size == Size::Word && upper { MacHalf::Upper } else { MacHalf::Lower };
    MacReg { reg: bits & 0xF, half }
}

/// The MOVEC control-register codes.
fn movec_code_to_reg(code: u16) -> Option<SpecialReg> {
    match code {
        0x800 => Some(SpecialReg::Usp),
        0x801 => Some(SpecialReg::Vbr),
        0xC00 => Some(SpecialReg::Rombar),
        0xC04 => Some(SpecialReg::Rambar),
        0xC0F => Some(SpecialReg::Mbar),
        _ => None,
    }
}
fn movec_reg_to_code(reg: SpecialReg) -> Option<u16> {
    match reg {
        SpecialReg::Usp => Some(0x800),
        SpecialReg::Vbr => Some(0x801),
        SpecialReg::Rombar => Some(0xC00),
        SpecialReg::Rambar => Some(0xC04),
        SpecialReg::Mbar => Some(0xC0F),
        _ => None,
    }
}

impl Variant {
    /// Whether this is the deliberate whole-opcode-space filler.
    pub fn is_filler(&self) -> bool {
        self.stencil == 0 && self.variable == 0xFFFF
    }

    /// Whether the given core profile executes this variant: the tier must
    /// reach it (exactly, for a pinned variant) and the required extension
    /// must be fitted.
    pub fn available_on(&self, profile: Profile) -> bool {
        if self.no_propagate && profile.tier != self.tier {
            return false;
        }
        profile.supports(self.tier, self.extension)
    }

    /// Whether `opword` matches this variant's stencil, variable mask, and
    /// exclusion list.
    pub fn matches(&self, opword: u16) -> bool {
        opword & !self.variable == self.stencil
            && !self.exclusions.iter().any(|&(mask, value)| opword & mask == value)
    }

    /// Decodes an instruction of this variant. `addr` is the address of the
    /// opcode word; `stream` stands just past it and supplies extension
    /// words.
    pub fn decode(
        &self,
        id: VariantId,
        opword: u16,
        addr: u32,
        stream: &mut impl WordStream,
    ) -> Result<Decoded, EaError> {
        use EffectiveAddress as Ea;

        let mut out = Decoded {
            variant: id,
            addr,
            opword,
            ext: 0,
            size: self.default_size,
            src: Ea::Implied,
            dst: Ea::Implied,
            words: 1,
        };
        let lo = ea_lo(opword);
        match self.exec {
            Exec::Move => {
                out.size = move_size(opword);
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                let hi = ea_hi(opword);
                out.dst = ea::decode(hi.0, hi.1, out.size, stream)?;
            }
            Exec::Movea => {
                out.size = match opword >> 12 & 0b11 {
                    0b11 => Size::Word,
                    _ => Size::Long,
                };
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                out.dst = Ea::AddrDirect(AddrReg(reg9(opword)));
            }
            Exec::Moveq => {
                out.src = Ea::Immediate(Size::Byte.sign_extend(u32::from(opword & 0xFF)));
                out.dst = Ea::DataDirect(DataReg(reg9(opword)));
            }
            Exec::Mov3q => {
                let data = reg9(opword);
                out.src = Ea::Immediate(if data == 0 { u32::MAX } else { u32::from(data) });
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::Mvs | Exec::Mvz => {
                out.size = if opword & 1 << 6 != 0 { Size::Word } else { Size::Byte };
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                out.dst = Ea::DataDirect(DataReg(reg9(opword)));
            }
            Exec::Lea => {
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                out.dst = Ea::AddrDirect(AddrReg(reg9(opword)));
            }
            Exec::Pea | Exec::Jmp | Exec::Jsr | Exec::Tst | Exec::Wddata => {
                if matches!(self.exec, Exec::Tst | Exec::Wddata) {
                    out.size = size_bits_76(opword);
                }
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::Movem => {
                // the list word precedes any EA extension words
                let list = stream.take()?;
                let mem_side = ea::decode(lo.0, lo.1, out.size, stream)?;
                if opword & 1 << 10 != 0 {
                    out.src = mem_side;
                    out.dst = Ea::RegList(list);
                } else {
                    out.src = Ea::RegList(list);
                    out.dst = mem_side;
                }
            }
            Exec::MoveFromCcr => {
                out.src = Ea::Special(SpecialReg::Ccr);
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::MoveToCcr => {
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                out.dst = Ea::Special(SpecialReg::Ccr);
            }
            Exec::MoveFromSr => {
                out.src = Ea::Special(SpecialReg::Sr);
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::MoveToSr => {
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                out.dst = Ea::Special(SpecialReg::Sr);
            }
            Exec::Movec => {
                let ext = stream.take()?;
                out.ext = ext;
                let n = (ext >> 12) as u8;
                out.src = if n < 8 {
                    Ea::DataDirect(DataReg(n))
                } else {
                    Ea::AddrDirect(AddrReg(n - 8))
                };
                let code = ext & 0xFFF;
                out.dst = Ea::Special(
                    movec_code_to_reg(code).ok_or(EaError::IllegalMode { mode: 7, reg: 7 })?,
                );
            }
            Exec::Stldsr => {
                let w2 = stream.take()?;
                if w2 != 0x46FC {
                    return Err(EaError::IllegalMode { mode: 7, reg: 7 });
                }
                out.src = Ea::Immediate(u32::from(stream.take()?));
                out.dst = Ea::Special(SpecialReg::Sr);
            }
            Exec::Link => {
                out.src = Ea::AddrDirect(AddrReg(lo.1));
                out.dst = Ea::Immediate(Size::Word.sign_extend(u32::from(stream.take()?)));
            }
            Exec::Unlk => {
                out.src = Ea::AddrDirect(AddrReg(lo.1));
            }
            Exec::Clr => {
                out.size = size_bits_76(opword);
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::Tas => {
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::Scc => {
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::Swap
            | Exec::Ext
            | Exec::Bitrev
            | Exec::Byterev
            | Exec::Ff1
            | Exec::Sats => {
                if self.exec == Exec::Ext {
                    out.size = if opword >> 6 & 0b111 == 0b010 { Size::Word } else { Size::Long };
                }
                out.dst = Ea::DataDirect(DataReg(lo.1));
            }
            Exec::Add { .. } | Exec::Logic(_) => {
                let ea_side = ea::decode(lo.0, lo.1, out.size, stream)?;
                if opword & 1 << 8 != 0 {
                    out.src = Ea::DataDirect(DataReg(reg9(opword)));
                    out.dst = ea_side;
                } else {
                    out.src = ea_side;
                    out.dst = Ea::DataDirect(DataReg(reg9(opword)));
                }
            }
            Exec::AddA { .. } | Exec::CmpA => {
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                out.dst = Ea::AddrDirect(AddrReg(reg9(opword)));
            }
            Exec::AddI { .. } | Exec::LogicI(_) => {
                out.src = ea::decode(7, 4, out.size, stream)?;
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::AddQ { .. } => {
                let data = reg9(opword);
                out.src = Ea::Immediate(if data == 0 { 8 } else { u32::from(data) });
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::AddX { .. } => {
                out.src = Ea::DataDirect(DataReg(lo.1));
                out.dst = Ea::DataDirect(DataReg(reg9(opword)));
            }
            Exec::Cmp => {
                out.size = match opword >> 6 & 0b111 {
                    0b000 => Size::Byte,
                    0b001 => Size::Word,
                    _ => Size::Long,
                };
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                out.dst = Ea::DataDirect(DataReg(reg9(opword)));
            }
            Exec::CmpI => {
                out.size = size_bits_76(opword);
                out.src = ea::decode(7, 4, out.size, stream)?;
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::Neg { .. } | Exec::Not => {
                out.dst = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::MulW { .. } | Exec::DivW { .. } => {
                out.src = ea::decode(lo.0, lo.1, Size::Word, stream)?;
                out.dst = Ea::DataDirect(DataReg(reg9(opword)));
            }
            Exec::MulL | Exec::DivL => {
                let ext = stream.take()?;
                out.ext = ext;
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
                out.dst = Ea::DataDirect(DataReg((ext >> 12 & 0b111) as u8));
            }
            Exec::Shift { .. } => {
                let count = reg9(opword);
                out.src = if opword & 1 << 5 != 0 {
                    Ea::DataDirect(DataReg(count))
                } else {
                    Ea::Immediate(if count == 0 { 8 } else { u32::from(count) })
                };
                out.dst = Ea::DataDirect(DataReg(lo.1));
            }
            Exec::BitOp { dynamic, .. } => {
                out.src = if dynamic {
                    Ea::DataDirect(DataReg(reg9(opword)))
                } else {
                    Ea::Immediate(u32::from(stream.take()? & 0xFF))
                };
                out.dst = ea::decode(lo.0, lo.1, Size::Byte, stream)?;
                out.size = if matches!(out.dst, Ea::DataDirect(_)) { Size::Long } else { Size::Byte };
            }
            Exec::Branch { long, .. } => {
                let disp8 = opword as u8 as i8;
                let base = stream.here();
                let disp = if long {
                    let hi = stream.take()?;
                    let slo = stream.take()?;
                    (u32::from(hi) << 16 | u32::from(slo)) as i32
                } else if disp8 == 0 {
                    i32::from(stream.take()? as i16)
                } else {
                    i32::from(disp8)
                };
                out.size = if long {
                    Size::Long
                } else if disp8 == 0 {
                    Size::Word
                } else {
                    Size::Byte
                };
                out.dst = Ea::Immediate(base.wrapping_add(disp as u32));
            }
            Exec::Trap => {
                out.src = Ea::Immediate(u32::from(opword & 0xF));
            }
            Exec::Tpf => {
                // the operand words exist only to be skipped
                match opword & 0b111 {
                    0b010 => {
                        stream.take()?;
                    }
                    0b011 => {
                        stream.take()?;
                        stream.take()?;
                    }
                    _ => {}
                }
            }
            Exec::Stop => {
                out.src = Ea::Immediate(u32::from(stream.take()?));
            }
            Exec::Intouch => {
                out.src = Ea::Indirect(AddrReg(lo.1));
            }
            Exec::Wdebug => {
                let w2 = stream.take()?;
                if w2 != 0x0003 {
                    return Err(EaError::IllegalMode { mode: 7, reg: 7 });
                }
                out.src = ea::decode(lo.0, lo.1, out.size, stream)?;
            }
            Exec::Mac => {
                let ext = stream.take()?;
                out.ext = ext;
                out.size = if ext & 1 << 11 != 0 { Size::Long } else { Size::Word };
                let ry = mac_reg(opword as u8, ext & 1 << 6 != 0, out.size);
                let rx = mac_reg((opword >> 8) as u8, ext & 1 << 7 != 0, out.size);
                out.src = Ea::MacPair(ry, rx);
            }
            Exec::MoveMacReg => {
                let which = match opword >> 10 & 0b11 {
                    0b00 => SpecialReg::Acc,
                    0b01 => SpecialReg::Macsr,
                    _ => SpecialReg::Mask,
                };
                let ea_side = ea::decode(lo.0, lo.1, out.size, stream)?;
                if opword & 1 << 9 != 0 {
                    out.src = Ea::Special(which);
                    out.dst = ea_side;
                } else {
                    out.src = ea_side;
                    out.dst = Ea::Special(which);
                }
            }
            Exec::Movclr => {
                out.src = Ea::Special(SpecialReg::Acc);
                out.dst = Ea::DataDirect(DataReg(reg9(opword)));
            }
            Exec::Rts
            | Exec::Rte
            | Exec::Nop
            | Exec::Halt
            | Exec::Pulse
            | Exec::IllegalOp
            | Exec::Filler => {}
        }
        out.words = ((stream.here() - addr) / 2) as u8;
        Ok(out)
    }

    fn check_imm(&self, ea: &EffectiveAddress) -> Result<(), EncodeError> {
        if let (EffectiveAddress::Immediate(v), Some((min, max))) = (ea, self.imm_range) {
            let sv = *v as i32;
            if sv < min || sv > max {
                return Err(EncodeError::BadImmediate { mnemonic: self.mnemonic, value: sv });
            }
        }
        Ok(())
    }

    /// Checks `size`, `src`, and `dst` against this variant's declared
    /// legality sets. Shared by encode and candidate disambiguation.
    pub fn accepts(
        &self,
        size: Size,
        src: &EffectiveAddress,
        dst: &EffectiveAddress,
    ) -> Result<(), EncodeError> {
        if !self.sizes.contains(size) {
            return Err(EncodeError::BadSize { mnemonic: self.mnemonic, size });
        }
        if !self.src_modes.contains_all(src.kind()) {
            return Err(EncodeError::BadSrcMode { mnemonic: self.mnemonic });
        }
        if !self.dst_modes.contains_all(dst.kind()) {
            return Err(EncodeError::BadDstMode { mnemonic: self.mnemonic });
        }
        self.check_imm(src)?;
        Ok(())
    }

    /// Encodes an instruction of this variant. `at` is the address the
    /// opcode word will occupy (branches measure their displacement from
    /// it); `cond` carries the condition for the Bcc/Scc families and is
    /// ignored elsewhere.
    pub fn encode(
        &self,
        at: u32,
        size: Size,
        src: &EffectiveAddress,
        dst: &EffectiveAddress,
        cond: Cond,
    ) -> Result<EncodedInst, EncodeError> {
        use EffectiveAddress as Ea;

        self.accepts(size, src, dst)?;
        let bad_src = EncodeError::BadSrcMode { mnemonic: self.mnemonic };
        let bad_dst = EncodeError::BadDstMode { mnemonic: self.mnemonic };
        let enc_lo = |ea: &Ea, size: Size| {
            let (m, r, ext) = ea::encode(ea, size).map_err(|_| bad_src)?;
            Ok((pack_lo(m, r), ext))
        };

        let mut out;
        match self.exec {
            Exec::Move => {
                let (sbits, sext) = enc_lo(src, size)?;
                let (dm, dr, dext) = ea::encode(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | move_size_bits(size) | pack_hi(dm, dr) | sbits);
                out.extend(sext.as_slice());
                out.extend(dext.as_slice());
            }
            Exec::Movea => {
                let Ea::AddrDirect(an) = dst else { return Err(bad_dst) };
                let sz = if size == Size::Word { 0b11 << 12 } else { 0b10 << 12 };
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | sz | u16::from(an.reg_no()) << 9 | sbits);
                out.extend(sext.as_slice());
            }
            Exec::Moveq => {
                let (Ea::Immediate(v), Ea::DataDirect(dn)) = (src, dst) else {
                    return Err(bad_dst);
                };
                out = EncodedInst::of(
                    self.stencil | u16::from(dn.reg_no()) << 9 | u16::from(*v as u8),
                );
            }
            Exec::Mov3q => {
                let Ea::Immediate(v) = src else { return Err(bad_src) };
                if *v == 0 {
                    return Err(EncodeError::BadImmediate { mnemonic: self.mnemonic, value: 0 });
                }
                let data = if *v == u32::MAX { 0 } else { *v as u16 & 0b111 };
                let (dbits, dext) = enc_lo(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | data << 9 | dbits);
                out.extend(dext.as_slice());
            }
            Exec::Mvs | Exec::Mvz => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                let szbit = if size == Size::Word { 1 << 6 } else { 0 };
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | u16::from(dn.reg_no()) << 9 | szbit | sbits);
                out.extend(sext.as_slice());
            }
            Exec::Lea => {
                let Ea::AddrDirect(an) = dst else { return Err(bad_dst) };
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | u16::from(an.reg_no()) << 9 | sbits);
                out.extend(sext.as_slice());
            }
            Exec::Pea | Exec::Jmp | Exec::Jsr | Exec::Wdebug => {
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | sbits);
                if self.exec == Exec::Wdebug {
                    out.push(0x0003);
                }
                out.extend(sext.as_slice());
            }
            Exec::Tst | Exec::Wddata => {
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | size_to_bits_76(size) | sbits);
                out.extend(sext.as_slice());
            }
            Exec::Movem => {
                let (list, mem_side, dir) = match (src, dst) {
                    (Ea::RegList(l), m) => (*l, m, 0),
                    (m, Ea::RegList(l)) => (*l, m, 1 << 10),
                    _ => return Err(bad_src),
                };
                let (mbits, mext) = enc_lo(mem_side, size)?;
                out = EncodedInst::of(self.stencil | dir | mbits);
                out.push(list);
                out.extend(mext.as_slice());
            }
            Exec::MoveFromCcr | Exec::MoveFromSr => {
                let (dbits, dext) = enc_lo(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | dbits);
                out.extend(dext.as_slice());
            }
            Exec::MoveToCcr | Exec::MoveToSr => {
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | sbits);
                out.extend(sext.as_slice());
            }
            Exec::Movec => {
                let n = match src {
                    Ea::DataDirect(r) => u16::from(r.reg_no()),
                    Ea::AddrDirect(r) => 8 + u16::from(r.reg_no()),
                    _ => return Err(bad_src),
                };
                let Ea::Special(creg) = dst else { return Err(bad_dst) };
                let code = movec_reg_to_code(*creg).ok_or(bad_dst)?;
                out = EncodedInst::of(self.stencil);
                out.push(n << 12 | code);
            }
            Exec::Stldsr => {
                let Ea::Immediate(v) = src else { return Err(bad_src) };
                out = EncodedInst::of(self.stencil);
                out.push(0x46FC);
                out.push(*v as u16);
            }
            Exec::Link => {
                let (Ea::AddrDirect(an), Ea::Immediate(d)) = (src, dst) else {
                    return Err(bad_src);
                };
                out = EncodedInst::of(self.stencil | u16::from(an.reg_no()));
                out.push(*d as u16);
            }
            Exec::Unlk | Exec::Intouch => {
                let n = match src {
                    Ea::AddrDirect(r) => r.reg_no(),
                    Ea::Indirect(r) => r.reg_no(),
                    _ => return Err(bad_src),
                };
                out = EncodedInst::of(self.stencil | u16::from(n));
            }
            Exec::Clr => {
                let (dbits, dext) = enc_lo(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | size_to_bits_76(size) | dbits);
                out.extend(dext.as_slice());
            }
            Exec::Tas => {
                let (dbits, dext) = enc_lo(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | dbits);
                out.extend(dext.as_slice());
            }
            Exec::Scc => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                out = EncodedInst::of(self.stencil | u16::from(cond.bits()) << 8 | u16::from(dn.reg_no()));
            }
            Exec::Swap | Exec::Bitrev | Exec::Byterev | Exec::Ff1 | Exec::Sats => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                out = EncodedInst::of(self.stencil | u16::from(dn.reg_no()));
            }
            Exec::Ext => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                // EXT.W encodes opmode 010; EXT.L opmode 011. EXTB.L is a
                // separate table entry whose stencil carries opmode 111.
                let opmode = if self.stencil & 1 << 8 != 0 {
                    0
                } else if size == Size::Word {
                    0
                } else {
                    1 << 6
                };
                out = EncodedInst::of(self.stencil | opmode | u16::from(dn.reg_no()));
            }
            Exec::Add { .. } | Exec::Logic(_) => {
                let (dir, reg, ea_side, ea_err) = match (src, dst) {
                    (s, Ea::DataDirect(dn)) => (0, dn, s, bad_src),
                    (Ea::DataDirect(dn), d) => (1 << 8, dn, d, bad_dst),
                    _ => return Err(bad_src),
                };
                if dir != 0 && !ModeSet::ALTERABLE_MEM.contains_all(ea_side.kind()) {
                    return Err(bad_dst);
                }
                let (m, r, ext) = ea::encode(ea_side, size).map_err(|_| ea_err)?;
                out = EncodedInst::of(
                    self.stencil | u16::from(reg.reg_no()) << 9 | dir | pack_lo(m, r),
                );
                out.extend(ext.as_slice());
            }
            Exec::AddA { .. } | Exec::CmpA => {
                let Ea::AddrDirect(an) = dst else { return Err(bad_dst) };
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | u16::from(an.reg_no()) << 9 | sbits);
                out.extend(sext.as_slice());
            }
            Exec::AddI { .. } | Exec::LogicI(_) => {
                let (_, _, iext) = ea::encode(src, size).map_err(|_| bad_src)?;
                let (dbits, dext) = enc_lo(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | dbits);
                out.extend(iext.as_slice());
                out.extend(dext.as_slice());
            }
            Exec::AddQ { .. } => {
                let Ea::Immediate(v) = src else { return Err(bad_src) };
                let data = if *v == 8 { 0 } else { *v as u16 & 0b111 };
                let (dbits, dext) = enc_lo(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | data << 9 | dbits);
                out.extend(dext.as_slice());
            }
            Exec::AddX { .. } => {
                let (Ea::DataDirect(dy), Ea::DataDirect(dx)) = (src, dst) else {
                    return Err(bad_src);
                };
                out = EncodedInst::of(
                    self.stencil | u16::from(dx.reg_no()) << 9 | u16::from(dy.reg_no()),
                );
            }
            Exec::Cmp => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                let opmode = match size {
                    Size::Byte => 0b000,
                    Size::Word => 0b001,
                    Size::Long => 0b010,
                } << 6;
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | u16::from(dn.reg_no()) << 9 | opmode | sbits);
                out.extend(sext.as_slice());
            }
            Exec::CmpI => {
                let (_, _, iext) = ea::encode(src, size).map_err(|_| bad_src)?;
                let (dbits, dext) = enc_lo(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | size_to_bits_76(size) | dbits);
                out.extend(iext.as_slice());
                out.extend(dext.as_slice());
            }
            Exec::Neg { .. } | Exec::Not => {
                let (dbits, dext) = enc_lo(dst, size).map_err(|_| bad_dst)?;
                out = EncodedInst::of(self.stencil | dbits);
                out.extend(dext.as_slice());
            }
            Exec::MulW { .. } | Exec::DivW { .. } => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                let (sbits, sext) = enc_lo(src, Size::Word)?;
                out = EncodedInst::of(self.stencil | u16::from(dn.reg_no()) << 9 | sbits);
                out.extend(sext.as_slice());
            }
            Exec::MulL | Exec::DivL => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                // the extension word's sign/remainder bits depend on which
                // mnemonic was used; the assembler front door patches them in
                // after encoding (see asm::assemble)
                let (sbits, sext) = enc_lo(src, size)?;
                out = EncodedInst::of(self.stencil | sbits);
                out.push(u16::from(dn.reg_no()) << 12);
                out.extend(sext.as_slice());
            }
            Exec::Shift { .. } => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                let (count, ir) = match src {
                    Ea::Immediate(v) => {
                        let data = if *v == 8 { 0 } else { *v as u16 & 0b111 };
                        (data, 0)
                    }
                    Ea::DataDirect(dc) => (u16::from(dc.reg_no()), 1 << 5),
                    _ => return Err(bad_src),
                };
                out = EncodedInst::of(self.stencil | count << 9 | ir | u16::from(dn.reg_no()));
            }
            Exec::BitOp { dynamic, .. } => {
                let (dbits, dext) = enc_lo(dst, Size::Byte).map_err(|_| bad_dst)?;
                if dynamic {
                    let Ea::DataDirect(dn) = src else { return Err(bad_src) };
                    out = EncodedInst::of(self.stencil | u16::from(dn.reg_no()) << 9 | dbits);
                } else {
                    let Ea::Immediate(bit) = src else { return Err(bad_src) };
                    out = EncodedInst::of(self.stencil | dbits);
                    out.push(*bit as u16 & 0xFF);
                }
                out.extend(dext.as_slice());
            }
            Exec::Branch { kind, long } => {
                let Ea::Immediate(target) = dst else { return Err(bad_dst) };
                let cond_bits = match kind {
                    BranchKind::Always => 0,
                    BranchKind::Sub => 1 << 8,
                    BranchKind::Cond => u16::from(cond.bits()) << 8,
                };
                let disp = target.wrapping_sub(at + 2) as i32;
                if long {
                    out = EncodedInst::of(self.stencil | cond_bits);
                    out.push((disp as u32 >> 16) as u16);
                    out.push(disp as u16);
                } else if let Ok(d8) = i8::try_from(disp) {
                    if d8 == 0 || d8 == -1 {
                        // the escape displacements force the 16-bit form
                        out = EncodedInst::of(self.stencil | cond_bits);
                        out.push(disp as u16);
                    } else {
                        out = EncodedInst::of(self.stencil | cond_bits | u16::from(d8 as u8));
                    }
                } else if let Ok(d16) = i16::try_from(disp) {
                    out = EncodedInst::of(self.stencil | cond_bits);
                    out.push(d16 as u16);
                } else {
                    return Err(EncodeError::BranchTooFar { target: *target });
                }
            }
            Exec::Trap => {
                let Ea::Immediate(v) = src else { return Err(bad_src) };
                out = EncodedInst::of(self.stencil | *v as u16 & 0xF);
            }
            Exec::Tpf => {
                out = EncodedInst::of(self.stencil | 0b100);
            }
            Exec::Stop => {
                let Ea::Immediate(v) = src else { return Err(bad_src) };
                out = EncodedInst::of(self.stencil);
                out.push(*v as u16);
            }
            Exec::Mac => {
                let Ea::MacPair(ry, rx) = src else { return Err(bad_src) };
                let mut ext = 0u16;
                if size == Size::Long {
                    ext |= 1 << 11;
                }
                if ry.half == MacHalf::Upper {
                    ext |= 1 << 6;
                }
                if rx.half == MacHalf::Upper {
                    ext |= 1 << 7;
                }
                out = EncodedInst::of(
                    self.stencil | u16::from(rx.reg & 0xF) << 8 | u16::from(ry.reg & 0xF),
                );
                out.push(ext);
            }
            Exec::MoveMacReg => {
                let (which, dir, ea_side, ea_err) = match (src, dst) {
                    (s, Ea::Special(w)) => (w, 0, s, bad_src),
                    (Ea::Special(w), d) => (w, 1 << 9, d, bad_dst),
                    _ => return Err(bad_src),
                };
                let wbits = match which {
                    SpecialReg::Acc => 0b00,
                    SpecialReg::Macsr => 0b01,
                    SpecialReg::Mask => 0b10,
                    _ => return Err(bad_dst),
                } << 10;
                let (m, r, ext) = ea::encode(ea_side, size).map_err(|_| ea_err)?;
                out = EncodedInst::of(self.stencil | wbits | dir | pack_lo(m, r));
                out.extend(ext.as_slice());
            }
            Exec::Movclr => {
                let Ea::DataDirect(dn) = dst else { return Err(bad_dst) };
                out = EncodedInst::of(self.stencil | u16::from(dn.reg_no()) << 9);
            }
            Exec::Rts
            | Exec::Rte
            | Exec::Nop
            | Exec::Halt
            | Exec::Pulse
            | Exec::IllegalOp
            | Exec::Filler => {
                out = EncodedInst::of(self.stencil);
            }
        }
        debug_assert!(
            self.matches(out.as_slice()[0]) || self.is_filler(),
            "{}: encoded opword {:#06X} escapes its own stencil",
            self.mnemonic,
            out.as_slice()[0],
        );
        Ok(out)
    }

    /// How many bytes encoding with these operands would occupy. Used by the
    /// assembler front end to pick between overlapping mnemonic candidates.
    pub fn calc_size(
        &self,
        at: u32,
        size: Size,
        src: &EffectiveAddress,
        dst: &EffectiveAddress,
        cond: Cond,
    ) -> Result<u32, EncodeError> {
        self.encode(at, size, src, dst, cond).map(|e| e.byte_len())
    }
}
