//! The master variant table, the mnemonic registry, and the per-ISA opcode
//! map builder.
//!
//! Every mnemonic/encoding family in all four ISA tiers and the coprocessor
//! extension buckets is one entry in [`VARIANTS`]. The table is static and
//! order-independent; [`registry`] validates its invariants once on first
//! use. [`OpcodeMap::build`] expands the visible entries into a 65,536-slot
//! table for one core profile, failing loudly on any overlap between two
//! non-filler variants.

use std::sync::OnceLock;

use super::{BitOp, BranchKind, Exec, Flow, LogicOp, Variant, VariantId};
use crate::ast::{ModeSet, Size, SizeSet};
use crate::isa::{Extension, Profile, Tier};

/// Upper bound on variants sharing one mnemonic. Real overlaps top out well
/// below this; exceeding it means the table has gone wrong, not that the
/// bound should grow.
pub const MAX_MNEMONIC_OVERLAP: usize = 12;

// mode-set shorthands for the table

const ALL: ModeSet = ModeSet::ALL_SRC;
const DN: ModeSet = ModeSet::DATA;
const AN: ModeSet = ModeSet::ADDR;
const IMM: ModeSet = ModeSet::IMMEDIATE;
const IMP: ModeSet = ModeSet::IMPLIED;
const SPEC: ModeSet = ModeSet::SPECIAL;
const CTRL: ModeSet = ModeSet::CONTROL;
const MEM_ALT: ModeSet = ModeSet::ALTERABLE_MEM;
const DATA_ALT: ModeSet = ModeSet::DATA_ALTERABLE;
const ALT: ModeSet = ModeSet::ALTERABLE;
const DATA_SRC: ModeSet = DN.union(ModeSet::MEMORY).union(IMM);
const DN_IMM: ModeSet = DN.union(IMM);
const MOVEM_EA: ModeSet = ModeSet::INDIRECT.union(ModeSet::DISP);
const LIST_OR_MEM: ModeSet = ModeSet::REG_LIST.union(MOVEM_EA);
const MULL_EA: ModeSet = DN
    .union(ModeSet::INDIRECT)
    .union(ModeSet::POST_INCR)
    .union(ModeSet::PRE_DECR)
    .union(ModeSet::DISP);

// shared exclusion lists for the low EA field

/// Any general source: only 7/5-7/7 are undefined.
const X_SRC_ANY: &[(u16, u16)] = &[(0x003F, 0x003D), (0x003F, 0x003E), (0x003F, 0x003F)];
/// Any data source: as above, plus no address register direct.
const X_SRC_DATA: &[(u16, u16)] = &[
    (0x0038, 0x0008),
    (0x003F, 0x003D),
    (0x003F, 0x003E),
    (0x003F, 0x003F),
];
/// Data-alterable destination: no An, no PC-relative, no immediate.
const X_DST_DATA_ALT: &[(u16, u16)] = &[
    (0x0038, 0x0008),
    (0x003F, 0x003A),
    (0x003F, 0x003B),
    (0x003F, 0x003C),
    (0x003F, 0x003D),
    (0x003F, 0x003E),
    (0x003F, 0x003F),
];
/// Alterable destination including An.
const X_DST_ALT: &[(u16, u16)] = &[
    (0x003F, 0x003A),
    (0x003F, 0x003B),
    (0x003F, 0x003C),
    (0x003F, 0x003D),
    (0x003F, 0x003E),
    (0x003F, 0x003F),
];
/// Control modes: a single memory address, no side effect.
const X_CONTROL: &[(u16, u16)] = &[
    (0x0038, 0x0000),
    (0x0038, 0x0008),
    (0x0038, 0x0018),
    (0x0038, 0x0020),
    (0x003F, 0x003C),
    (0x003F, 0x003D),
    (0x003F, 0x003E),
    (0x003F, 0x003F),
];
/// (An) and d16(An) only.
const X_AN_DISP: &[(u16, u16)] = &[
    (0x0038, 0x0000),
    (0x0038, 0x0008),
    (0x0038, 0x0018),
    (0x0038, 0x0020),
    (0x0038, 0x0030),
    (0x0038, 0x0038),
];
/// Dn or immediate only.
const X_DN_OR_IMM: &[(u16, u16)] = &[
    (0x0038, 0x0008),
    (0x0038, 0x0010),
    (0x0038, 0x0018),
    (0x0038, 0x0020),
    (0x0038, 0x0028),
    (0x0038, 0x0030),
    (0x003F, 0x0038),
    (0x003F, 0x0039),
    (0x003F, 0x003A),
    (0x003F, 0x003B),
    (0x003F, 0x003D),
    (0x003F, 0x003E),
    (0x003F, 0x003F),
];

/// Template for a table entry: ISA_A, no extension, implied operands,
/// long-only. Entries override what differs.
const fn v(mnemonic: &'static str, stencil: u16, variable: u16, exec: Exec) -> Variant {
    Variant {
        mnemonic,
        alt_mnemonic: None,
        stencil,
        variable,
        exclusions: &[],
        tier: Tier::A,
        extension: None,
        no_propagate: false,
        src_modes: IMP,
        dst_modes: IMP,
        sizes: SizeSet::L,
        default_size: Size::Long,
        imm_range: None,
        supervisor: false,
        flow: Flow::None,
        cycles: 1,
        exec,
    }
}

/// The master table. One entry per mnemonic/encoding family, grouped by
/// opcode line.
static VARIANTS: &[Variant] = &[
    // the deliberate whole-space filler: anything nothing else claims
    // disassembles as a raw data word and raises the appropriate
    // unimplemented/illegal vector when executed
    v("DC.W", 0x0000, 0xFFFF, Exec::Filler),
    //
    // line 0-3: move family and immediate operations
    Variant {
        src_modes: ALL,
        dst_modes: DATA_ALT,
        sizes: SizeSet::BWL,
        default_size: Size::Word,
        exclusions: &[
            (0x3000, 0x0000), // size 00 is the line-0 immediate group
            (0x01C0, 0x0040), // destination An belongs to MOVEA
            (0x0FC0, 0x05C0), // writable destinations stop at 7/1
            (0x0FC0, 0x07C0),
            (0x0FC0, 0x09C0),
            (0x0FC0, 0x0BC0),
            (0x0FC0, 0x0DC0),
            (0x0FC0, 0x0FC0),
            (0x003F, 0x003D),
            (0x003F, 0x003E),
            (0x003F, 0x003F),
        ],
        ..v("MOVE", 0x0000, 0x3FFF, Exec::Move)
    },
    Variant {
        src_modes: ALL,
        dst_modes: AN,
        sizes: SizeSet::WL,
        exclusions: &[(0x3000, 0x0000), (0x3000, 0x1000), (0x003F, 0x003D), (0x003F, 0x003E), (0x003F, 0x003F)],
        ..v("MOVEA", 0x0040, 0x3E3F, Exec::Movea)
    },
    Variant {
        src_modes: IMM,
        dst_modes: DN,
        ..v("ORI", 0x0080, 0x0007, Exec::LogicI(LogicOp::Or))
    },
    Variant {
        src_modes: IMM,
        dst_modes: DN,
        ..v("ANDI", 0x0280, 0x0007, Exec::LogicI(LogicOp::And))
    },
    Variant {
        src_modes: IMM,
        dst_modes: DN,
        ..v("SUBI", 0x0480, 0x0007, Exec::AddI { sub: true })
    },
    Variant {
        src_modes: IMM,
        dst_modes: DN,
        ..v("ADDI", 0x0680, 0x0007, Exec::AddI { sub: false })
    },
    Variant {
        src_modes: IMM,
        dst_modes: DN,
        ..v("EORI", 0x0A80, 0x0007, Exec::LogicI(LogicOp::Eor))
    },
    Variant {
        src_modes: IMM,
        dst_modes: DN,
        ..v("CMPI", 0x0C80, 0x0007, Exec::CmpI)
    },
    Variant {
        tier: Tier::B,
        src_modes: IMM,
        dst_modes: DN,
        sizes: SizeSet::B.union(SizeSet::W),
        default_size: Size::Word,
        ..v("CMPI", 0x0C00, 0x0047, Exec::CmpI)
    },
    Variant {
        src_modes: DN,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B.union(SizeSet::L),
        exclusions: X_DST_DATA_ALT,
        ..v("BTST", 0x0100, 0x0E3F, Exec::BitOp { op: BitOp::Tst, dynamic: true })
    },
    Variant {
        src_modes: DN,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B.union(SizeSet::L),
        exclusions: X_DST_DATA_ALT,
        ..v("BCHG", 0x0140, 0x0E3F, Exec::BitOp { op: BitOp::Chg, dynamic: true })
    },
    Variant {
        src_modes: DN,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B.union(SizeSet::L),
        exclusions: X_DST_DATA_ALT,
        ..v("BCLR", 0x0180, 0x0E3F, Exec::BitOp { op: BitOp::Clr, dynamic: true })
    },
    Variant {
        src_modes: DN,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B.union(SizeSet::L),
        exclusions: X_DST_DATA_ALT,
        ..v("BSET", 0x01C0, 0x0E3F, Exec::BitOp { op: BitOp::Set, dynamic: true })
    },
    Variant {
        src_modes: IMM,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B.union(SizeSet::L),
        imm_range: Some((0, 31)),
        exclusions: X_DST_DATA_ALT,
        ..v("BTST", 0x0800, 0x003F, Exec::BitOp { op: BitOp::Tst, dynamic: false })
    },
    Variant {
        src_modes: IMM,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B.union(SizeSet::L),
        imm_range: Some((0, 31)),
        exclusions: X_DST_DATA_ALT,
        ..v("BCHG", 0x0840, 0x003F, Exec::BitOp { op: BitOp::Chg, dynamic: false })
    },
    Variant {
        src_modes: IMM,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B.union(SizeSet::L),
        imm_range: Some((0, 31)),
        exclusions: X_DST_DATA_ALT,
        ..v("BCLR", 0x0880, 0x003F, Exec::BitOp { op: BitOp::Clr, dynamic: false })
    },
    Variant {
        src_modes: IMM,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B.union(SizeSet::L),
        imm_range: Some((0, 31)),
        exclusions: X_DST_DATA_ALT,
        ..v("BSET", 0x08C0, 0x003F, Exec::BitOp { op: BitOp::Set, dynamic: false })
    },
    Variant { tier: Tier::APlus, dst_modes: DN, ..v("BITREV", 0x00C0, 0x0007, Exec::Bitrev) },
    Variant { tier: Tier::APlus, dst_modes: DN, ..v("BYTEREV", 0x02C0, 0x0007, Exec::Byterev) },
    Variant { tier: Tier::APlus, dst_modes: DN, ..v("FF1", 0x04C0, 0x0007, Exec::Ff1) },
    //
    // line 4: miscellaneous
    Variant { dst_modes: DN, ..v("NEGX", 0x4080, 0x0007, Exec::Neg { extend: true }) },
    Variant {
        supervisor: true,
        src_modes: SPEC,
        dst_modes: DN,
        sizes: SizeSet::W,
        default_size: Size::Word,
        ..v("MOVE", 0x40C0, 0x0007, Exec::MoveFromSr)
    },
    Variant {
        tier: Tier::C,
        supervisor: true,
        src_modes: IMM,
        dst_modes: SPEC,
        sizes: SizeSet::W,
        default_size: Size::Word,
        ..v("STLDSR", 0x40E7, 0x0000, Exec::Stldsr)
    },
    Variant {
        dst_modes: DATA_ALT,
        sizes: SizeSet::BWL,
        default_size: Size::Word,
        exclusions: &[
            (0x00C0, 0x00C0),
            (0x0038, 0x0008),
            (0x003F, 0x003A),
            (0x003F, 0x003B),
            (0x003F, 0x003C),
            (0x003F, 0x003D),
            (0x003F, 0x003E),
            (0x003F, 0x003F),
        ],
        ..v("CLR", 0x4200, 0x00FF, Exec::Clr)
    },
    Variant {
        src_modes: SPEC,
        dst_modes: DN,
        sizes: SizeSet::W,
        default_size: Size::Word,
        ..v("MOVE", 0x42C0, 0x0007, Exec::MoveFromCcr)
    },
    Variant { dst_modes: DN, ..v("NEG", 0x4480, 0x0007, Exec::Neg { extend: false }) },
    Variant {
        src_modes: DN_IMM,
        dst_modes: SPEC,
        sizes: SizeSet::W,
        default_size: Size::Word,
        exclusions: X_DN_OR_IMM,
        ..v("MOVE", 0x44C0, 0x003F, Exec::MoveToCcr)
    },
    Variant { dst_modes: DN, ..v("NOT", 0x4680, 0x0007, Exec::Not) },
    Variant {
        supervisor: true,
        src_modes: DN_IMM,
        dst_modes: SPEC,
        sizes: SizeSet::W,
        default_size: Size::Word,
        exclusions: X_DN_OR_IMM,
        ..v("MOVE", 0x46C0, 0x003F, Exec::MoveToSr)
    },
    Variant {
        src_modes: CTRL,
        exclusions: X_CONTROL,
        ..v("PEA", 0x4840, 0x003F, Exec::Pea)
    },
    Variant {
        dst_modes: DN,
        sizes: SizeSet::W,
        default_size: Size::Word,
        ..v("SWAP", 0x4840, 0x0007, Exec::Swap)
    },
    Variant {
        dst_modes: DN,
        sizes: SizeSet::WL,
        default_size: Size::Word,
        ..v("EXT", 0x4880, 0x0047, Exec::Ext)
    },
    Variant { dst_modes: DN, ..v("EXTB", 0x49C0, 0x0007, Exec::Ext) },
    Variant {
        src_modes: LIST_OR_MEM,
        dst_modes: LIST_OR_MEM,
        exclusions: X_AN_DISP,
        cycles: 4,
        ..v("MOVEM", 0x48C0, 0x043F, Exec::Movem)
    },
    Variant {
        src_modes: DATA_SRC,
        sizes: SizeSet::BWL,
        default_size: Size::Word,
        exclusions: &[(0x00C0, 0x00C0), (0x003F, 0x003D), (0x003F, 0x003E), (0x003F, 0x003F)],
        ..v("TST", 0x4A00, 0x00FF, Exec::Tst)
    },
    Variant {
        tier: Tier::B,
        dst_modes: DATA_ALT,
        sizes: SizeSet::B,
        default_size: Size::Byte,
        exclusions: X_DST_DATA_ALT,
        ..v("TAS", 0x4AC0, 0x003F, Exec::Tas)
    },
    Variant {
        supervisor: true,
        extension: Some(Extension::Debug),
        flow: Flow::Stop,
        ..v("HALT", 0x4AC8, 0x0000, Exec::Halt)
    },
    Variant { ..v("PULSE", 0x4ACC, 0x0000, Exec::Pulse) },
    Variant { ..v("ILLEGAL", 0x4AFC, 0x0000, Exec::IllegalOp) },
    Variant {
        alt_mnemonic: Some("MULS"),
        src_modes: MULL_EA,
        dst_modes: DN,
        exclusions: &[(0x0038, 0x0008), (0x0038, 0x0030), (0x0038, 0x0038)],
        cycles: 5,
        ..v("MULU", 0x4C00, 0x003F, Exec::MulL)
    },
    Variant {
        alt_mnemonic: Some("DIVS"),
        extension: Some(Extension::Div),
        src_modes: MULL_EA,
        dst_modes: DN,
        exclusions: &[(0x0038, 0x0008), (0x0038, 0x0030), (0x0038, 0x0038)],
        cycles: 18,
        ..v("DIVU", 0x4C40, 0x003F, Exec::DivL)
    },
    Variant { tier: Tier::B, dst_modes: DN, ..v("SATS", 0x4C80, 0x0007, Exec::Sats) },
    Variant {
        src_modes: IMM,
        imm_range: Some((0, 15)),
        flow: Flow::Call,
        ..v("TRAP", 0x4E40, 0x000F, Exec::Trap)
    },
    Variant {
        src_modes: AN,
        dst_modes: IMM,
        sizes: SizeSet::W,
        default_size: Size::Word,
        ..v("LINK", 0x4E50, 0x0007, Exec::Link)
    },
    Variant { src_modes: AN, ..v("UNLK", 0x4E58, 0x0007, Exec::Unlk) },
    Variant { ..v("NOP", 0x4E71, 0x0000, Exec::Nop) },
    Variant {
        supervisor: true,
        src_modes: IMM,
        sizes: SizeSet::W,
        default_size: Size::Word,
        flow: Flow::Stop,
        ..v("STOP", 0x4E72, 0x0000, Exec::Stop)
    },
    Variant { supervisor: true, flow: Flow::Ret, cycles: 10, ..v("RTE", 0x4E73, 0x0000, Exec::Rte) },
    Variant { flow: Flow::Ret, cycles: 5, ..v("RTS", 0x4E75, 0x0000, Exec::Rts) },
    Variant {
        supervisor: true,
        src_modes: DN.union(AN),
        dst_modes: SPEC,
        ..v("MOVEC", 0x4E7B, 0x0000, Exec::Movec)
    },
    Variant {
        src_modes: CTRL,
        exclusions: X_CONTROL,
        flow: Flow::Call,
        cycles: 3,
        ..v("JSR", 0x4E80, 0x003F, Exec::Jsr)
    },
    Variant {
        src_modes: CTRL,
        exclusions: X_CONTROL,
        flow: Flow::Branch,
        cycles: 3,
        ..v("JMP", 0x4EC0, 0x003F, Exec::Jmp)
    },
    Variant {
        src_modes: CTRL,
        dst_modes: AN,
        exclusions: X_CONTROL,
        ..v("LEA", 0x41C0, 0x0E3F, Exec::Lea)
    },
    //
    // line 5: quick arithmetic, Scc, TPF
    Variant {
        src_modes: IMM,
        dst_modes: ALT,
        imm_range: Some((1, 8)),
        exclusions: X_DST_ALT,
        ..v("ADDQ", 0x5080, 0x0E3F, Exec::AddQ { sub: false })
    },
    Variant {
        src_modes: IMM,
        dst_modes: ALT,
        imm_range: Some((1, 8)),
        exclusions: X_DST_ALT,
        ..v("SUBQ", 0x5180, 0x0E3F, Exec::AddQ { sub: true })
    },
    Variant {
        dst_modes: DN,
        sizes: SizeSet::B,
        default_size: Size::Byte,
        ..v("Scc", 0x50C0, 0x0F07, Exec::Scc)
    },
    Variant {
        exclusions: &[
            (0x0007, 0x0000),
            (0x0007, 0x0001),
            (0x0007, 0x0005),
            (0x0007, 0x0006),
            (0x0007, 0x0007),
        ],
        ..v("TPF", 0x51F8, 0x0007, Exec::Tpf)
    },
    //
    // line 6: branches
    Variant {
        dst_modes: IMM,
        sizes: SizeSet::B.union(SizeSet::W),
        default_size: Size::Byte,
        exclusions: &[(0x00FF, 0x00FF)],
        flow: Flow::Branch,
        cycles: 2,
        ..v("BRA", 0x6000, 0x00FF, Exec::Branch { kind: BranchKind::Always, long: false })
    },
    Variant {
        dst_modes: IMM,
        sizes: SizeSet::B.union(SizeSet::W),
        default_size: Size::Byte,
        exclusions: &[(0x00FF, 0x00FF)],
        flow: Flow::Call,
        cycles: 3,
        ..v("BSR", 0x6100, 0x00FF, Exec::Branch { kind: BranchKind::Sub, long: false })
    },
    Variant {
        dst_modes: IMM,
        sizes: SizeSet::B.union(SizeSet::W),
        default_size: Size::Byte,
        exclusions: &[(0x0F00, 0x0000), (0x0F00, 0x0100), (0x00FF, 0x00FF)],
        flow: Flow::Branch,
        cycles: 2,
        ..v("Bcc", 0x6000, 0x0FFF, Exec::Branch { kind: BranchKind::Cond, long: false })
    },
    Variant {
        tier: Tier::B,
        dst_modes: IMM,
        flow: Flow::Branch,
        cycles: 2,
        ..v("BRA", 0x60FF, 0x0000, Exec::Branch { kind: BranchKind::Always, long: true })
    },
    Variant {
        tier: Tier::B,
        dst_modes: IMM,
        flow: Flow::Call,
        cycles: 3,
        ..v("BSR", 0x61FF, 0x0000, Exec::Branch { kind: BranchKind::Sub, long: true })
    },
    Variant {
        tier: Tier::B,
        dst_modes: IMM,
        exclusions: &[(0x0F00, 0x0000), (0x0F00, 0x0100)],
        flow: Flow::Branch,
        cycles: 2,
        ..v("Bcc", 0x60FF, 0x0F00, Exec::Branch { kind: BranchKind::Cond, long: true })
    },
    //
    // line 7: quick moves
    Variant {
        src_modes: IMM,
        dst_modes: DN,
        imm_range: Some((-128, 127)),
        ..v("MOVEQ", 0x7000, 0x0EFF, Exec::Moveq)
    },
    Variant {
        tier: Tier::B,
        src_modes: ALL,
        dst_modes: DN,
        sizes: SizeSet::B.union(SizeSet::W),
        default_size: Size::Word,
        exclusions: X_SRC_ANY,
        ..v("MVS", 0x7100, 0x0E7F, Exec::Mvs)
    },
    Variant {
        tier: Tier::B,
        src_modes: ALL,
        dst_modes: DN,
        sizes: SizeSet::B.union(SizeSet::W),
        default_size: Size::Word,
        exclusions: X_SRC_ANY,
        ..v("MVZ", 0x7180, 0x0E7F, Exec::Mvz)
    },
    //
    // line 8: OR, word divides
    Variant {
        src_modes: DATA_SRC,
        dst_modes: DATA_ALT,
        exclusions: &[
            (0x0138, 0x0008),
            (0x0138, 0x0100),
            (0x0138, 0x0108),
            (0x013F, 0x013A),
            (0x013F, 0x013B),
            (0x013F, 0x013C),
            (0x013F, 0x013D),
            (0x013F, 0x013E),
            (0x013F, 0x013F),
            (0x013F, 0x003D),
            (0x013F, 0x003E),
            (0x013F, 0x003F),
        ],
        ..v("OR", 0x8080, 0x0F3F, Exec::Logic(LogicOp::Or))
    },
    Variant {
        extension: Some(Extension::Div),
        src_modes: DATA_SRC,
        dst_modes: DN,
        sizes: SizeSet::W,
        default_size: Size::Word,
        exclusions: X_SRC_DATA,
        cycles: 14,
        ..v("DIVU", 0x80C0, 0x0E3F, Exec::DivW { signed: false })
    },
    Variant {
        extension: Some(Extension::Div),
        src_modes: DATA_SRC,
        dst_modes: DN,
        sizes: SizeSet::W,
        default_size: Size::Word,
        exclusions: X_SRC_DATA,
        cycles: 14,
        ..v("DIVS", 0x81C0, 0x0E3F, Exec::DivW { signed: true })
    },
    //
    // line 9: SUB family
    Variant {
        src_modes: ALL,
        dst_modes: DATA_ALT,
        exclusions: &[
            (0x0138, 0x0100),
            (0x0138, 0x0108),
            (0x013F, 0x013A),
            (0x013F, 0x013B),
            (0x013F, 0x013C),
            (0x013F, 0x013D),
            (0x013F, 0x013E),
            (0x013F, 0x013F),
            (0x013F, 0x003D),
            (0x013F, 0x003E),
            (0x013F, 0x003F),
        ],
        ..v("SUB", 0x9080, 0x0F3F, Exec::Add { sub: true })
    },
    Variant {
        src_modes: DN,
        dst_modes: DN,
        ..v("SUBX", 0x9180, 0x0E07, Exec::AddX { sub: true })
    },
    Variant {
        src_modes: ALL,
        dst_modes: AN,
        exclusions: X_SRC_ANY,
        ..v("SUBA", 0x91C0, 0x0E3F, Exec::AddA { sub: true })
    },
    //
    // line A: multiply-accumulate bucket, MOV3Q
    Variant {
        alt_mnemonic: Some("MSAC"),
        extension: Some(Extension::Mac),
        src_modes: ModeSet::MAC_PAIR,
        sizes: SizeSet::WL,
        default_size: Size::Word,
        cycles: 3,
        ..v("MAC", 0xA000, 0x0F0F, Exec::Mac)
    },
    Variant {
        tier: Tier::B,
        src_modes: IMM,
        dst_modes: ALT,
        imm_range: Some((-1, 7)),
        exclusions: X_DST_ALT,
        ..v("MOV3Q", 0xA140, 0x0E3F, Exec::Mov3q)
    },
    Variant {
        extension: Some(Extension::Mac),
        src_modes: DN_IMM.union(SPEC),
        dst_modes: DN.union(SPEC),
        exclusions: &[
            (0x0C00, 0x0C00), // only ACC, MACSR, MASK exist
            (0x023F, 0x023C), // a MAC register cannot store to an immediate
            (0x0038, 0x0008),
            (0x0038, 0x0010),
            (0x0038, 0x0018),
            (0x0038, 0x0020),
            (0x0038, 0x0028),
            (0x0038, 0x0030),
            (0x003F, 0x0038),
            (0x003F, 0x0039),
            (0x003F, 0x003A),
            (0x003F, 0x003B),
            (0x003F, 0x003D),
            (0x003F, 0x003E),
            (0x003F, 0x003F),
        ],
        ..v("MOVE", 0xA180, 0x0E3F, Exec::MoveMacReg)
    },
    Variant {
        extension: Some(Extension::Emac),
        src_modes: SPEC,
        dst_modes: DN,
        ..v("MOVCLR", 0xA1C0, 0x0E00, Exec::Movclr)
    },
    //
    // line B: compares, EOR
    Variant {
        src_modes: ALL,
        dst_modes: DN,
        exclusions: X_SRC_ANY,
        ..v("CMP", 0xB080, 0x0E3F, Exec::Cmp)
    },
    Variant {
        tier: Tier::B,
        src_modes: ALL,
        dst_modes: DN,
        sizes: SizeSet::B.union(SizeSet::W),
        default_size: Size::Word,
        exclusions: X_SRC_ANY,
        ..v("CMP", 0xB000, 0x0E7F, Exec::Cmp)
    },
    Variant {
        src_modes: ALL,
        dst_modes: AN,
        exclusions: X_SRC_ANY,
        ..v("CMPA", 0xB1C0, 0x0E3F, Exec::CmpA)
    },
    Variant {
        tier: Tier::B,
        src_modes: ALL,
        dst_modes: AN,
        sizes: SizeSet::W,
        default_size: Size::Word,
        exclusions: X_SRC_ANY,
        ..v("CMPA", 0xB0C0, 0x0E3F, Exec::CmpA)
    },
    Variant {
        src_modes: DN,
        dst_modes: DATA_ALT,
        exclusions: X_DST_DATA_ALT,
        ..v("EOR", 0xB180, 0x0E3F, Exec::Logic(LogicOp::Eor))
    },
    //
    // line C: AND, word multiplies
    Variant {
        src_modes: DATA_SRC,
        dst_modes: DATA_ALT,
        exclusions: &[
            (0x0138, 0x0008),
            (0x0138, 0x0100),
            (0x0138, 0x0108),
            (0x013F, 0x013A),
            (0x013F, 0x013B),
            (0x013F, 0x013C),
            (0x013F, 0x013D),
            (0x013F, 0x013E),
            (0x013F, 0x013F),
            (0x013F, 0x003D),
            (0x013F, 0x003E),
            (0x013F, 0x003F),
        ],
        ..v("AND", 0xC080, 0x0F3F, Exec::Logic(LogicOp::And))
    },
    Variant {
        src_modes: DATA_SRC,
        dst_modes: DN,
        sizes: SizeSet::W,
        default_size: Size::Word,
        exclusions: X_SRC_DATA,
        cycles: 4,
        ..v("MULU", 0xC0C0, 0x0E3F, Exec::MulW { signed: false })
    },
    Variant {
        src_modes: DATA_SRC,
        dst_modes: DN,
        sizes: SizeSet::W,
        default_size: Size::Word,
        exclusions: X_SRC_DATA,
        cycles: 4,
        ..v("MULS", 0xC1C0, 0x0E3F, Exec::MulW { signed: true })
    },
    //
    // line D: ADD family
    Variant {
        src_modes: ALL,
        dst_modes: DATA_ALT,
        exclusions: &[
            (0x0138, 0x0100),
            (0x0138, 0x0108),
            (0x013F, 0x013A),
            (0x013F, 0x013B),
            (0x013F, 0x013C),
            (0x013F, 0x013D),
            (0x013F, 0x013E),
            (0x013F, 0x013F),
            (0x013F, 0x003D),
            (0x013F, 0x003E),
            (0x013F, 0x003F),
        ],
        ..v("ADD", 0xD080, 0x0F3F, Exec::Add { sub: false })
    },
    Variant {
        src_modes: DN,
        dst_modes: DN,
        ..v("ADDX", 0xD180, 0x0E07, Exec::AddX { sub: false })
    },
    Variant {
        src_modes: ALL,
        dst_modes: AN,
        exclusions: X_SRC_ANY,
        ..v("ADDA", 0xD1C0, 0x0E3F, Exec::AddA { sub: false })
    },
    //
    // line E: shifts
    Variant {
        alt_mnemonic: Some("ASL"),
        src_modes: DN_IMM,
        dst_modes: DN,
        imm_range: Some((1, 8)),
        ..v("ASR", 0xE080, 0x0F27, Exec::Shift { arith: true })
    },
    Variant {
        alt_mnemonic: Some("LSL"),
        src_modes: DN_IMM,
        dst_modes: DN,
        imm_range: Some((1, 8)),
        ..v("LSR", 0xE088, 0x0F27, Exec::Shift { arith: false })
    },
    //
    // line F: cache touch, debug module
    Variant {
        tier: Tier::C,
        supervisor: true,
        src_modes: ModeSet::INDIRECT,
        ..v("INTOUCH", 0xF428, 0x0007, Exec::Intouch)
    },
    Variant {
        extension: Some(Extension::Debug),
        src_modes: MEM_ALT,
        sizes: SizeSet::BWL,
        default_size: Size::Word,
        exclusions: &[
            (0x00C0, 0x00C0),
            (0x0038, 0x0000),
            (0x0038, 0x0008),
            (0x003F, 0x003A),
            (0x003F, 0x003B),
            (0x003F, 0x003C),
            (0x003F, 0x003D),
            (0x003F, 0x003E),
            (0x003F, 0x003F),
        ],
        ..v("WDDATA", 0xFB00, 0x00FF, Exec::Wddata)
    },
    Variant {
        supervisor: true,
        extension: Some(Extension::Debug),
        src_modes: MOVEM_EA,
        exclusions: X_AN_DISP,
        ..v("WDEBUG", 0xFBC0, 0x003F, Exec::Wdebug)
    },
];

/// The bounded set of variants sharing one mnemonic.
#[derive(Debug, Clone, Copy)]
pub struct Candidates {
    buf: [Option<VariantId>; MAX_MNEMONIC_OVERLAP],
    len: usize,
}
impl Candidates {
    fn new() -> Self {
        Candidates { buf: [None; MAX_MNEMONIC_OVERLAP], len: 0 }
    }
    fn push(&mut self, id: VariantId) {
        assert!(
            self.len < MAX_MNEMONIC_OVERLAP,
            "mnemonic overlap exceeds the modeled bound of {MAX_MNEMONIC_OVERLAP}"
        );
        self.buf[self.len] = Some(id);
        self.len += 1;
    }
    /// Whether no variant matched.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    /// Number of matching variants.
    pub fn len(&self) -> usize {
        self.len
    }
    /// Iterates the matching variant ids.
    pub fn iter(&self) -> impl Iterator<Item = VariantId> + '_ {
        self.buf[..self.len].iter().map(|v| v.expect("filled up to len"))
    }
}

/// The process-wide variant catalogue.
pub struct Registry {
    variants: &'static [Variant],
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The registry, built and validated on first use.
///
/// Panics if the static table violates a modeling invariant; that is a bug
/// in the table, not a runtime condition.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        for var in VARIANTS {
            assert_eq!(
                var.stencil & var.variable,
                0,
                "{}: stencil bits covered by the variable mask",
                var.mnemonic
            );
        }
        assert_eq!(
            VARIANTS.iter().filter(|v| v.is_filler()).count(),
            1,
            "exactly one filler entry"
        );
        Registry { variants: VARIANTS }
    })
}

impl Registry {
    /// Looks a variant up by id.
    pub fn get(&self, id: VariantId) -> &'static Variant {
        &self.variants[usize::from(id.0)]
    }

    /// The filler entry's id.
    pub fn filler(&self) -> VariantId {
        let idx = self.variants.iter().position(|v| v.is_filler()).expect("validated");
        VariantId(idx as u16)
    }

    /// All variants visible to the given core profile, filler included.
    pub fn visible(&self, profile: Profile) -> impl Iterator<Item = (VariantId, &'static Variant)> {
        self.variants.iter().enumerate().filter_map(move |(i, var)| {
            (var.is_filler() || var.available_on(profile))
                .then_some((VariantId(i as u16), var))
        })
    }

    /// Every variant whose primary or alternate mnemonic matches, across all
    /// tiers; the caller narrows by profile, size, and operand shape.
    pub fn lookup(&self, mnemonic: &str) -> Candidates {
        let mut out = Candidates::new();
        for (i, var) in self.variants.iter().enumerate() {
            let hit = var.mnemonic.eq_ignore_ascii_case(mnemonic)
                || var.alt_mnemonic.is_some_and(|alt| alt.eq_ignore_ascii_case(mnemonic));
            if hit && !var.is_filler() {
                out.push(VariantId(i as u16));
            }
        }
        out
    }
}

/// Two non-filler variants claimed the same opcode: the table is wrong.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MapConflict {
    /// The contested opcode.
    pub opcode: u16,
    /// Mnemonic of the variant already holding the slot.
    pub holder: &'static str,
    /// Mnemonic of the variant that tried to claim it.
    pub claimant: &'static str,
}
impl std::fmt::Display for MapConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "opcode {:#06X} claimed by both {} and {}",
            self.opcode, self.holder, self.claimant
        )
    }
}
impl std::error::Error for MapConflict {}

/// The 65,536-slot opcode table for one core profile. Total: every slot
/// holds a variant, with the filler standing in for unassigned encodings.
pub struct OpcodeMap {
    slots: Box<[VariantId]>,
    /// The profile this map was built for.
    pub profile: Profile,
}

impl std::fmt::Debug for OpcodeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OpcodeMap({:?})", self.profile)
    }
}

impl OpcodeMap {
    /// Builds the map for a core profile. Cheap enough to rerun on every
    /// tier switch.
    pub fn build(profile: Profile) -> Result<OpcodeMap, MapConflict> {
        let reg = registry();
        Self::build_from(profile, reg.visible(profile), reg.filler(), |id| {
            reg.get(id).mnemonic
        })
    }

    fn build_from<'v>(
        profile: Profile,
        variants: impl Iterator<Item = (VariantId, &'v Variant)>,
        filler: VariantId,
        name_of: impl Fn(VariantId) -> &'static str,
    ) -> Result<OpcodeMap, MapConflict> {
        let mut slots: Vec<Option<VariantId>> = vec![None; 1 << 16];
        for (id, var) in variants {
            if var.is_filler() {
                continue;
            }
            // walk [stencil, stencil | variable], keeping the values whose
            // fixed bits still equal the stencil; this reconstructs the
            // claimed subset even when the variable mask is non-contiguous
            for opcode in var.stencil..=var.stencil | var.variable {
                if opcode & !var.variable != var.stencil {
                    continue;
                }
                if var.exclusions.iter().any(|&(mask, value)| opcode & mask == value) {
                    continue;
                }
                match slots[usize::from(opcode)] {
                    Some(holder) => {
                        return Err(MapConflict {
                            opcode,
                            holder: name_of(holder),
                            claimant: var.mnemonic,
                        })
                    }
                    None => slots[usize::from(opcode)] = Some(id),
                }
            }
        }
        let slots = slots.into_iter().map(|s| s.unwrap_or(filler)).collect();
        Ok(OpcodeMap { slots, profile })
    }

    /// The variant claiming an opcode. Total; unassigned opcodes land on the
    /// filler, whose execution raises the appropriate exception.
    pub fn lookup(&self, opword: u16) -> VariantId {
        self.slots[usize::from(opword)]
    }

    /// The non-filler variant claiming an opcode, if any.
    pub fn assigned(&self, opword: u16) -> Option<VariantId> {
        let id = self.slots[usize::from(opword)];
        (!registry().get(id).is_filler()).then_some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SizeSet;
    use crate::isa::ExtensionSet;

    fn all_profiles() -> Vec<Profile> {
        let exts = ExtensionSet::EMAC | ExtensionSet::DIV | ExtensionSet::DEBUG;
        [Tier::A, Tier::APlus, Tier::B, Tier::C]
            .into_iter()
            .flat_map(|tier| {
                [
                    Profile { tier, extensions: ExtensionSet::NONE },
                    Profile { tier, extensions: exts },
                ]
            })
            .collect()
    }

    #[test]
    fn maps_build_for_every_profile() {
        for profile in all_profiles() {
            OpcodeMap::build(profile).unwrap_or_else(|e| panic!("{profile:?}: {e}"));
        }
    }

    #[test]
    fn every_claimed_opcode_is_present() {
        let reg = registry();
        for profile in all_profiles() {
            let map = OpcodeMap::build(profile).unwrap();
            for (id, var) in reg.visible(profile) {
                if var.is_filler() {
                    continue;
                }
                for opcode in var.stencil..=var.stencil | var.variable {
                    if var.matches(opcode) {
                        assert_eq!(
                            map.lookup(opcode),
                            id,
                            "{}: opcode {opcode:#06X} under {profile:?}",
                            var.mnemonic
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn map_is_total() {
        let map = OpcodeMap::build(Profile::FULL_C).unwrap();
        let reg = registry();
        // spot-check some famous slots plus full totality via the filler
        assert_eq!(reg.get(map.lookup(0x4E71)).mnemonic, "NOP");
        assert_eq!(reg.get(map.lookup(0x4E75)).mnemonic, "RTS");
        assert_eq!(reg.get(map.lookup(0x70FF)).mnemonic, "MOVEQ");
        assert!(map.assigned(0x4AFB).is_none(), "gap opcodes fall to the filler");
        assert_eq!(reg.get(map.lookup(0x4AFB)).mnemonic, "DC.W");
    }

    #[test]
    fn tier_gating() {
        let a = OpcodeMap::build(Profile::BASE_A).unwrap();
        let aplus = OpcodeMap::build(Profile {
            tier: Tier::APlus,
            extensions: ExtensionSet::NONE,
        })
        .unwrap();
        let c = OpcodeMap::build(Profile { tier: Tier::C, extensions: ExtensionSet::NONE }).unwrap();
        let reg = registry();
        // BITREV D0 exists only on the A+ branch
        assert_eq!(reg.get(aplus.lookup(0x00C0)).mnemonic, "BITREV");
        assert!(a.assigned(0x00C0).is_none());
        assert!(c.assigned(0x00C0).is_none());
        // the long branch arrives with ISA_B
        assert!(a.assigned(0x60FF).is_none());
        assert_eq!(reg.get(c.lookup(0x60FF)).mnemonic, "BRA");
        // MAC needs its extension
        assert!(c.assigned(0xA000).is_none());
        let c_mac = OpcodeMap::build(Profile { tier: Tier::C, extensions: ExtensionSet::MAC })
            .unwrap();
        assert_eq!(reg.get(c_mac.lookup(0xA000)).mnemonic, "MAC");
        // MOVCLR needs EMAC, not plain MAC
        assert!(c_mac.assigned(0xA1C0).is_none());
    }

    #[test]
    fn pinned_variants_do_not_propagate() {
        let none = ExtensionSet::NONE;
        let pinned = Variant { tier: Tier::B, no_propagate: true, ..v("OLD", 0x1000, 0, Exec::Nop) };
        assert!(pinned.available_on(Profile { tier: Tier::B, extensions: none }));
        assert!(!pinned.available_on(Profile { tier: Tier::C, extensions: none }));
        assert!(!pinned.available_on(Profile { tier: Tier::A, extensions: none }));
        // without the pin the same entry carries forward as usual
        let free = Variant { tier: Tier::B, ..v("OLD", 0x1000, 0, Exec::Nop) };
        assert!(free.available_on(Profile { tier: Tier::C, extensions: none }));
    }

    #[test]
    fn conflicting_variants_fail_loudly() {
        let clash = [
            v("FIRST", 0x1000, 0x00FF, Exec::Nop),
            v("SECOND", 0x1080, 0x007F, Exec::Nop),
        ];
        let err = OpcodeMap::build_from(
            Profile::FULL_C,
            clash.iter().enumerate().map(|(i, v)| (VariantId(i as u16), v)),
            VariantId(0),
            |id| if id.0 == 0 { "FIRST" } else { "SECOND" },
        )
        .unwrap_err();
        assert_eq!(err.opcode, 0x1080);
        assert_eq!((err.holder, err.claimant), ("FIRST", "SECOND"));
    }

    #[test]
    fn mnemonic_lookup_is_bounded_and_complete() {
        let reg = registry();
        let moves = reg.lookup("MOVE");
        assert!(moves.len() >= 5, "MOVE has register, CCR/SR, and MAC forms");
        assert!(moves.len() <= MAX_MNEMONIC_OVERLAP);
        assert!(reg.lookup("move").len() == moves.len(), "case-insensitive");
        // alternate mnemonics resolve to the shared entry
        assert!(!reg.lookup("ASL").is_empty());
        assert!(!reg.lookup("MSAC").is_empty());
        assert!(reg.lookup("XYZZY").is_empty());
    }

    #[test]
    fn default_sizes_are_members_of_the_size_sets() {
        for var in registry().visible(Profile::FULL_C) {
            let (_, var) = var;
            if var.sizes != SizeSet::NONE {
                assert!(
                    var.sizes.contains(var.default_size),
                    "{}: default size outside its size set",
                    var.mnemonic
                );
            }
        }
    }
}
