//! The CPU register file, status register, and condition-code arithmetic.

use crate::ast::{AddrReg, DataReg, Size};
use crate::isa;

/// The 16-bit status register.
///
/// ```text
/// 15 14 13 12 | 10  9  8 |  4  3  2  1  0
///  T  .  S  M | I2 I1 I0 |  X  N  Z  V  C
/// ```
///
/// The low byte is the condition-code register (CCR); the system byte holds
/// the trace, supervisor, and master bits plus the interrupt mask level.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct StatusReg(pub(crate) u16);

/// Which X-flag treatment an arithmetic flag update applies.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExtendRule {
    /// X mirrors carry (ADD/SUB/NEG and their -X forms).
    MirrorCarry,
    /// X is untouched (CMP).
    Keep,
}

const FL_C: u16 = 1 << 0;
const FL_V: u16 = 1 << 1;
const FL_Z: u16 = 1 << 2;
const FL_N: u16 = 1 << 3;
const FL_X: u16 = 1 << 4;
const FL_M: u16 = 1 << 12;
const FL_S: u16 = 1 << 13;
const FL_T: u16 = 1 << 15;

const IPL_SHIFT: u16 = 8;
const IPL_MASK: u16 = 0b111 << IPL_SHIFT;

// writable bits; the rest read as zero
const SR_MASK: u16 = FL_T | FL_S | FL_M | IPL_MASK | 0x1F;
const CCR_MASK: u16 = 0x1F;

impl StatusReg {
    /// A status register fresh out of reset: supervisor mode, interrupts
    /// masked, no flags.
    pub fn reset() -> Self {
        StatusReg(FL_S | IPL_MASK)
    }

    /// The full 16-bit value.
    pub fn bits(self) -> u16 {
        self.0
    }
    /// The condition-code byte.
    pub fn ccr(self) -> u8 {
        (self.0 & CCR_MASK) as u8
    }
    /// Replaces the condition-code byte, leaving the system byte alone.
    pub fn set_ccr(&mut self, value: u8) {
        self.0 = (self.0 & !CCR_MASK) | (u16::from(value) & CCR_MASK);
    }

    /// Carry flag.
    pub fn c(self) -> bool {
        self.0 & FL_C != 0
    }
    /// Overflow flag.
    pub fn v(self) -> bool {
        self.0 & FL_V != 0
    }
    /// Zero flag.
    pub fn z(self) -> bool {
        self.0 & FL_Z != 0
    }
    /// Negative flag.
    pub fn n(self) -> bool {
        self.0 & FL_N != 0
    }
    /// Extend flag.
    pub fn x(self) -> bool {
        self.0 & FL_X != 0
    }
    /// Supervisor bit.
    pub fn supervisor(self) -> bool {
        self.0 & FL_S != 0
    }
    /// Trace bit.
    pub fn trace(self) -> bool {
        self.0 & FL_T != 0
    }
    /// Master bit.
    pub fn master(self) -> bool {
        self.0 & FL_M != 0
    }
    /// Interrupt mask level, 0-7.
    pub fn ipl(self) -> u8 {
        ((self.0 & IPL_MASK) >> IPL_SHIFT) as u8
    }
    /// Sets the interrupt mask level.
    pub fn set_ipl(&mut self, level: u8) {
        self.0 = (self.0 & !IPL_MASK) | (u16::from(level) & 0b111) << IPL_SHIFT;
    }

    fn put(&mut self, flag: u16, value: bool) {
        if value {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }
    /// Sets the carry flag.
    pub fn set_c(&mut self, v: bool) {
        self.put(FL_C, v);
    }
    /// Sets the overflow flag.
    pub fn set_v(&mut self, v: bool) {
        self.put(FL_V, v);
    }
    /// Sets the zero flag.
    pub fn set_z(&mut self, v: bool) {
        self.put(FL_Z, v);
    }
    /// Sets the negative flag.
    pub fn set_n(&mut self, v: bool) {
        self.put(FL_N, v);
    }
    /// Sets the extend flag.
    pub fn set_x(&mut self, v: bool) {
        self.put(FL_X, v);
    }
    pub(crate) fn set_supervisor_bit(&mut self, v: bool) {
        self.put(FL_S, v);
    }
    /// Sets the trace bit.
    pub fn set_trace(&mut self, v: bool) {
        self.put(FL_T, v);
    }
    pub(crate) fn clear_trace_master(&mut self) {
        self.0 &= !(FL_T | FL_M);
    }

    /// N and Z from a result; V and C cleared. The flag update of MOVE, the
    /// logical operations, and the plain shifts-by-register path.
    pub fn set_logic(&mut self, result: u32, size: Size) {
        self.put(FL_N, result & size.sign_bit() != 0);
        self.put(FL_Z, result & size.mask() == 0);
        self.0 &= !(FL_V | FL_C);
    }

    /// Full flag update for an addition `result = dst + src` (plus X for the
    /// -X forms, which is transparent here: the inputs already include it).
    ///
    /// Overflow: both operands share a sign and the result's sign differs.
    /// Carry: the unsigned sum does not fit in the operand size.
    pub fn set_add(&mut self, src: u32, dst: u32, result: u32, size: Size, zero_conditional: bool) {
        let sign = size.sign_bit();
        let v = !(src ^ dst) & (src ^ result) & sign != 0;
        let c = (src & dst | !result & (src | dst)) & sign != 0;
        self.put(FL_N, result & sign != 0);
        self.set_z_for(result, size, zero_conditional);
        self.put(FL_V, v);
        self.put(FL_C, c);
        self.put(FL_X, c);
    }

    /// Full flag update for a subtraction `result = dst - src`.
    ///
    /// The overflow/carry tests are the addition tests with the roles of
    /// subtrahend and minuend swapped. CMP passes [`ExtendRule::Keep`].
    pub fn set_sub(
        &mut self,
        src: u32,
        dst: u32,
        result: u32,
        size: Size,
        extend: ExtendRule,
        zero_conditional: bool,
    ) {
        let sign = size.sign_bit();
        let v = (src ^ dst) & (result ^ dst) & sign != 0;
        let c = (src & !dst | result & (src | !dst)) & sign != 0;
        self.put(FL_N, result & sign != 0);
        self.set_z_for(result, size, zero_conditional);
        self.put(FL_V, v);
        self.put(FL_C, c);
        if extend == ExtendRule::MirrorCarry {
            self.put(FL_X, c);
        }
    }

    /// Flag update for a negation `result = 0 - operand`.
    ///
    /// Overflow is set when the result's sign equals the operand's, which
    /// only happens negating the minimum negative value; carry is set when
    /// the result is nonzero.
    pub fn set_neg(&mut self, operand: u32, result: u32, size: Size, zero_conditional: bool) {
        let sign = size.sign_bit();
        let c = result & size.mask() != 0;
        self.put(FL_N, result & sign != 0);
        self.set_z_for(result, size, zero_conditional);
        self.put(FL_V, operand & result & sign != 0);
        self.put(FL_C, c);
        self.put(FL_X, c);
    }

    /// Accumulate-style zero update: a nonzero result clears Z, a zero
    /// result leaves it alone. A multiply-accumulate sequence thus reports
    /// whether any partial result was nonzero.
    pub fn set_z_accumulate(&mut self, result: u32, size: Size) {
        self.set_z_for(result, size, true);
    }

    /// Zero-flag update; in zero-conditional mode the flag can only be
    /// cleared, so it stays meaningful across an accumulating sequence.
    fn set_z_for(&mut self, result: u32, size: Size, conditional: bool) {
        let zero = result & size.mask() == 0;
        if !conditional || !zero {
            self.put(FL_Z, zero);
        }
    }
}

impl std::fmt::Debug for StatusReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StatusReg({:#06X})", self.0)
    }
}
impl std::fmt::Display for StatusReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (bit, ch) in [
            (FL_T, 'T'),
            (FL_S, 'S'),
            (FL_M, 'M'),
            (FL_X, 'X'),
            (FL_N, 'N'),
            (FL_Z, 'Z'),
            (FL_V, 'V'),
            (FL_C, 'C'),
        ] {
            f.write_str(if self.0 & bit != 0 { "" } else { "-" })?;
            if self.0 & bit != 0 {
                write!(f, "{ch}")?;
            }
        }
        write!(f, " IPL={}", self.ipl())
    }
}

/// The register file and control registers of one core.
#[derive(Debug, Clone)]
pub struct Cpu {
    /// Data registers D0-D7.
    pub d: [u32; 8],
    /// Address registers A0-A7. A7 is the stack pointer of the *current*
    /// privilege level.
    pub a: [u32; 8],
    /// The stack pointer of the inactive privilege level. Meaningless on
    /// single-stack-pointer cores.
    pub other_sp: u32,
    /// Program counter.
    pub pc: u32,
    /// Status register. Mutate through [`Cpu::write_sr`] so the stack
    /// pointers bank correctly.
    pub sr: StatusReg,
    /// Vector base register.
    pub vbr: u32,
    /// Peripheral window base register.
    pub mbar: u32,
    /// RAM base register. Held but not consulted by the address decoder.
    pub rambar: u32,
    /// ROM base register. Held but not consulted by the address decoder.
    pub rombar: u32,
    /// MAC accumulator.
    pub acc: u32,
    /// MAC status register.
    pub macsr: u32,
    /// MAC address mask register.
    pub mask: u32,
    /// Whether this core banks separate user/supervisor stack pointers.
    dual_sp: bool,
}

impl Cpu {
    /// A freshly reset core for the given ISA tier: supervisor mode, all
    /// registers zero, PC to be set by the loader.
    pub fn new(tier: isa::Tier) -> Self {
        Cpu {
            d: [0; 8],
            a: [0; 8],
            other_sp: 0,
            pc: 0,
            sr: StatusReg::reset(),
            vbr: 0,
            mbar: 0xFFFF_F000,
            rambar: 0,
            rombar: 0,
            acc: 0,
            macsr: 0,
            mask: 0xFFFF_FFFF,
            dual_sp: isa::has_dual_sp(tier),
        }
    }

    /// Reads a data register at the given width (the value is not extended).
    pub fn data(&self, reg: DataReg, size: Size) -> u32 {
        self.d[usize::from(reg)] & size.mask()
    }
    /// Writes a data register. Byte and word writes leave the upper lanes
    /// of the register untouched.
    pub fn set_data(&mut self, reg: DataReg, size: Size, value: u32) {
        let slot = &mut self.d[usize::from(reg)];
        *slot = size.merge(*slot, value);
    }
    /// Reads an address register (always the full 32 bits).
    pub fn addr(&self, reg: AddrReg) -> u32 {
        self.a[usize::from(reg)]
    }
    /// Writes an address register (always the full 32 bits).
    pub fn set_addr(&mut self, reg: AddrReg, value: u32) {
        self.a[usize::from(reg)] = value;
    }

    /// The user stack pointer, regardless of the current privilege level.
    pub fn usp(&self) -> u32 {
        if self.sr.supervisor() && self.dual_sp {
            self.other_sp
        } else {
            self.a[7]
        }
    }
    /// Sets the user stack pointer, regardless of the current privilege
    /// level.
    pub fn set_usp(&mut self, value: u32) {
        if self.sr.supervisor() && self.dual_sp {
            self.other_sp = value;
        } else {
            self.a[7] = value;
        }
    }

    /// Moves to the given privilege level, banking the stack pointers
    /// exactly once per actual transition. Cores without a second stack
    /// pointer never swap.
    pub fn set_supervisor(&mut self, supervisor: bool) {
        if self.dual_sp && self.sr.supervisor() != supervisor {
            std::mem::swap(&mut self.a[7], &mut self.other_sp);
        }
        self.sr.set_supervisor_bit(supervisor);
    }

    /// Replaces the whole status register, handling any privilege
    /// transition the new value implies.
    pub fn write_sr(&mut self, value: u16) {
        self.set_supervisor(value & FL_S != 0);
        self.sr.0 = value & SR_MASK;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::reg_consts::*;

    #[test]
    fn add_overflow_law() {
        let mut sr = StatusReg::reset();
        // positive + positive -> negative: overflow
        let (a, b) = (0x7FFF_FFFF, 1);
        sr.set_add(a, b, a.wrapping_add(b), Size::Long, false);
        assert!(sr.v());
        assert!(!sr.c());
        // mixed signs can never overflow
        let (a, b) = (0x8000_0000u32, 0x7FFF_FFFF);
        sr.set_add(a, b, a.wrapping_add(b), Size::Long, false);
        assert!(!sr.v());
        assert!(sr.n());
        // unsigned wrap sets carry and extend
        let (a, b) = (0xFFFF_FFFFu32, 1);
        sr.set_add(a, b, a.wrapping_add(b), Size::Long, false);
        assert!(sr.c() && sr.x() && sr.z());
    }

    #[test]
    fn sub_mirrors_add() {
        let mut sr = StatusReg::reset();
        // negative - positive -> positive: overflow
        let (d, s) = (0x8000_0000u32, 1u32);
        sr.set_sub(s, d, d.wrapping_sub(s), Size::Long, ExtendRule::MirrorCarry, false);
        assert!(sr.v());
        // borrow sets carry
        let (d, s) = (0u32, 1u32);
        sr.set_sub(s, d, d.wrapping_sub(s), Size::Long, ExtendRule::MirrorCarry, false);
        assert!(sr.c() && sr.x() && sr.n());
    }

    #[test]
    fn cmp_leaves_extend() {
        let mut sr = StatusReg::reset();
        sr.set_x(true);
        sr.set_sub(5, 3, 3u32.wrapping_sub(5), Size::Long, ExtendRule::Keep, false);
        assert!(sr.c());
        assert!(sr.x(), "CMP must not touch X");
    }

    #[test]
    fn neg_flags() {
        let mut sr = StatusReg::reset();
        sr.set_neg(0x8000_0000, 0x8000_0000u32.wrapping_neg(), Size::Long, false);
        assert!(sr.v(), "negating the minimum negative overflows");
        sr.set_neg(0, 0, Size::Long, false);
        assert!(!sr.v() && !sr.c() && sr.z());
        sr.set_neg(5, 5u32.wrapping_neg(), Size::Long, false);
        assert!(sr.c() && sr.x() && sr.n() && !sr.v());
    }

    #[test]
    fn conditional_zero_only_clears() {
        let mut sr = StatusReg::reset();
        sr.set_z(true);
        // a zero result leaves Z alone in conditional mode
        sr.set_add(0, 0, 0, Size::Long, true);
        assert!(sr.z());
        // a nonzero result still clears it
        sr.set_add(1, 1, 2, Size::Long, true);
        assert!(!sr.z());
        // and once cleared, a zero result does not set it back
        sr.set_add(0, 0, 0, Size::Long, true);
        assert!(!sr.z());
    }

    #[test]
    fn byte_write_preserves_upper_lanes() {
        let mut cpu = Cpu::new(isa::Tier::C);
        cpu.d[0] = 0xAABB_CCDD;
        cpu.set_data(D0, Size::Byte, 0x42);
        assert_eq!(cpu.d[0], 0xAABB_CC42);
        assert_eq!(cpu.data(D0, Size::Word), 0xCC42);
    }

    #[test]
    fn privilege_transition_swaps_once() {
        let mut cpu = Cpu::new(isa::Tier::C);
        cpu.a[7] = 0x2000; // supervisor stack (reset state is supervisor)
        cpu.other_sp = 0x8000;
        cpu.set_supervisor(false);
        assert_eq!(cpu.a[7], 0x8000);
        assert_eq!(cpu.other_sp, 0x2000);
        // repeating the same transition is a no-op
        cpu.set_supervisor(false);
        assert_eq!(cpu.a[7], 0x8000);
        cpu.set_supervisor(true);
        assert_eq!(cpu.a[7], 0x2000);
    }

    #[test]
    fn single_sp_cores_never_swap() {
        let mut cpu = Cpu::new(isa::Tier::A);
        cpu.a[7] = 0x2000;
        cpu.other_sp = 0xDEAD;
        cpu.set_supervisor(false);
        cpu.set_supervisor(true);
        assert_eq!(cpu.a[7], 0x2000);
        assert_eq!(cpu.other_sp, 0xDEAD);
    }

    #[test]
    fn usp_accessor_tracks_privilege() {
        let mut cpu = Cpu::new(isa::Tier::B);
        cpu.a[7] = 0x2000;
        cpu.other_sp = 0x8000;
        assert_eq!(cpu.usp(), 0x8000);
        cpu.set_usp(0x9000);
        cpu.set_supervisor(false);
        assert_eq!(cpu.a[7], 0x9000);
    }
}
