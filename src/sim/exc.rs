//! Exception vectors, stack frames, and the entry sequence.
//!
//! An exception hands control to the handler whose address sits in the
//! vector table at `VBR + 4*vector`. Entry pushes a two-longword frame onto
//! the supervisor stack:
//!
//! ```text
//! SP -> +0  format/status longword
//!       +4  return program counter
//! ```
//!
//! The format/status longword packs the frame format nibble (4 plus the
//! stack misalignment that was squeezed out on entry), the vector number,
//! and the pre-exception status register:
//!
//! ```text
//! 31    28 27  26 25        18 17 16 15         0
//! 0 1 a a | 0  0 | vector[7:0]| 0  0 | status reg
//! ```
//!
//! A second fault while building this frame is unrecoverable: the core
//! halts ([`FaultOnFault`]).

use super::cpu::Cpu;
use super::mem::{MemErr, MemoryMap};
use crate::ast::Size;
use crate::inst::ea::EaError;

/// The architecturally assigned vector numbers.
pub mod vect {
    /// Bus error: access refused by the address-space decoder.
    pub const ACCESS_ERROR: u8 = 2;
    /// Misaligned program counter.
    pub const ADDRESS_ERROR: u8 = 3;
    /// Unrecognized or illegally addressed instruction.
    pub const ILLEGAL: u8 = 4;
    /// Integer division by zero.
    pub const DIV_ZERO: u8 = 5;
    /// Supervisor instruction executed from user mode.
    pub const PRIVILEGE: u8 = 8;
    /// Trace, delivered after each traced instruction.
    pub const TRACE: u8 = 9;
    /// Unimplemented opcode in the 0xA line.
    pub const LINE_A: u8 = 10;
    /// Unimplemented opcode in the 0xF line.
    pub const LINE_F: u8 = 11;
    /// Malformed frame found by RTE.
    pub const FORMAT_ERROR: u8 = 14;
    /// Interrupt with no device claiming the acknowledge.
    pub const SPURIOUS: u8 = 24;
    /// First autovectored interrupt (level 1); levels 1-7 map to 25-31.
    pub const AUTOVECTOR_BASE: u8 = 24;
    /// TRAP #0; #0-#15 map to 32-47.
    pub const TRAP_BASE: u8 = 32;
}

/// Whether entering the given vector pushes the *faulting* instruction's
/// address (so the handler can retry or report it) rather than the next
/// instruction's.
///
/// This is a fixed architectural table, not derived from anything.
pub fn returns_to_faulting(vector: u8) -> bool {
    matches!(
        vector,
        vect::ACCESS_ERROR
            | vect::ADDRESS_ERROR
            | vect::ILLEGAL
            | vect::DIV_ZERO
            | vect::PRIVILEGE
            | vect::LINE_A
            | vect::LINE_F
            | vect::FORMAT_ERROR
    )
}

/// Packs the format/status longword of an exception frame.
pub fn pack_frame_word(misalign: u32, vector: u8, sr: u16) -> u32 {
    (0b0100 | misalign & 0b11) << 28 | u32::from(vector) << 18 | u32::from(sr)
}

/// The fields of an unpacked format/status longword, as RTE sees them.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FrameWord {
    /// Bytes the stack pointer was adjusted down by on entry (0-3).
    pub misalign: u32,
    /// The vector the frame was pushed for.
    pub vector: u8,
    /// The pre-exception status register.
    pub sr: u16,
}

/// Unpacks a format/status longword. `None` if the format nibble is not one
/// this core generates (RTE turns that into a format error).
pub fn unpack_frame_word(word: u32) -> Option<FrameWord> {
    if word >> 30 != 0b01 {
        return None;
    }
    Some(FrameWord {
        misalign: word >> 28 & 0b11,
        vector: (word >> 18) as u8,
        sr: word as u16,
    })
}

/// A condition raised during decode or execute, converted into a CPU
/// exception at the instruction boundary.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Cause {
    /// A memory access the decoder rejected.
    Mem(MemErr),
    /// An addressing-mode error from operand decode.
    Ea(EaError),
    /// An exception requested outright (TRAP, divide by zero, privilege).
    Raise(u8),
}
impl From<MemErr> for Cause {
    fn from(e: MemErr) -> Self {
        Cause::Mem(e)
    }
}
impl From<EaError> for Cause {
    fn from(e: EaError) -> Self {
        match e {
            EaError::Fetch(m) => Cause::Mem(m),
            other => Cause::Ea(other),
        }
    }
}
impl Cause {
    /// The vector this cause dispatches to.
    pub fn vector(self) -> u8 {
        match self {
            Cause::Mem(_) => vect::ACCESS_ERROR,
            Cause::Ea(_) => vect::ILLEGAL,
            Cause::Raise(v) => v,
        }
    }
    /// The faulting address to report, when the cause carries one.
    pub fn fault_addr(self) -> Option<u32> {
        match self {
            Cause::Mem(e) => Some(e.addr()),
            _ => None,
        }
    }
}

/// A fault occurred while already entering an exception. Terminal: the
/// simulated core halts.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FaultOnFault {
    /// The vector whose entry sequence failed.
    pub vector: u8,
    /// The address the failing entry access targeted.
    pub addr: u32,
}
impl std::fmt::Display for FaultOnFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fault while entering exception vector {} (at 0x{:08X}); core halted",
            self.vector, self.addr
        )
    }
}
impl std::error::Error for FaultOnFault {}

/// Runs the full entry sequence for `vector`.
///
/// `instr_addr` is the address of the instruction during which the exception
/// arose and `next_pc` the address after it; which one lands in the frame is
/// decided by [`returns_to_faulting`]. On success the PC points at the
/// handler and its first word is known to be fetchable.
pub fn enter(
    cpu: &mut Cpu,
    mem: &mut MemoryMap,
    vector: u8,
    instr_addr: u32,
    next_pc: u32,
) -> Result<(), FaultOnFault> {
    let fatal = |e: MemErr| FaultOnFault { vector, addr: e.addr() };

    let vec_addr = cpu.vbr.wrapping_add(4 * u32::from(vector));
    let handler = mem.read(vec_addr, Size::Long, cpu.mbar).map_err(fatal)?;

    let old_sr = cpu.sr.bits();
    cpu.set_supervisor(true);

    let sp = cpu.a[7];
    let misalign = sp & 0b11;
    let mut sp = sp & !0b11;

    let return_pc = if returns_to_faulting(vector) { instr_addr } else { next_pc };
    sp = sp.wrapping_sub(4);
    mem.write(sp, Size::Long, return_pc, cpu.mbar).map_err(fatal)?;
    sp = sp.wrapping_sub(4);
    mem.write(sp, Size::Long, pack_frame_word(misalign, vector, old_sr), cpu.mbar)
        .map_err(fatal)?;
    cpu.a[7] = sp;

    cpu.sr.clear_trace_master();
    cpu.pc = handler;

    // surface an unmapped or misaligned handler now, not on the next fetch
    if handler & 1 != 0 {
        return Err(FaultOnFault { vector, addr: handler });
    }
    mem.read_word(handler, cpu.mbar).map_err(fatal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Tier;
    use crate::sim::mem::BankKind;

    fn machine() -> (Cpu, MemoryMap) {
        let mut mem = MemoryMap::new(0xE000_0000);
        mem.add_bank("ram", 0x0000, 0x1_0000, BankKind::Normal).unwrap();
        let mut cpu = Cpu::new(Tier::C);
        cpu.a[7] = 0x8000;
        cpu.mbar = 0xF000_0000;
        // vector 5 -> handler at 0x4000
        mem.write(5 * 4, Size::Long, 0x4000, cpu.mbar).unwrap();
        mem.write(0x4000, Size::Word, 0x4E71, cpu.mbar).unwrap();
        (cpu, mem)
    }

    #[test]
    fn frame_shape() {
        let (mut cpu, mut mem) = machine();
        let old_sr = cpu.sr.bits();
        enter(&mut cpu, &mut mem, vect::DIV_ZERO, 0x1000, 0x1004).unwrap();

        assert_eq!(cpu.pc, 0x4000);
        assert_eq!(cpu.a[7], 0x8000 - 8);
        let frame = mem.read(cpu.a[7], Size::Long, cpu.mbar).unwrap();
        let fw = unpack_frame_word(frame).unwrap();
        assert_eq!(fw, FrameWord { misalign: 0, vector: 5, sr: old_sr });
        // divide-by-zero frames point back at the faulting instruction
        assert_eq!(mem.read(cpu.a[7] + 4, Size::Long, cpu.mbar).unwrap(), 0x1000);
    }

    #[test]
    fn misaligned_sp_recorded_and_squared() {
        let (mut cpu, mut mem) = machine();
        cpu.a[7] = 0x8003;
        enter(&mut cpu, &mut mem, vect::DIV_ZERO, 0x1000, 0x1004).unwrap();
        assert_eq!(cpu.a[7] % 4, 0, "the frame must land 4-byte aligned");
        assert_eq!(cpu.a[7], 0x8000 - 8);
        let fw = unpack_frame_word(mem.read(cpu.a[7], Size::Long, cpu.mbar).unwrap()).unwrap();
        assert_eq!(fw.misalign, 3);
    }

    #[test]
    fn user_mode_entry_swaps_to_supervisor_stack() {
        let (mut cpu, mut mem) = machine();
        cpu.a[7] = 0x9000; // becomes the supervisor SP after the swap below
        cpu.set_supervisor(false);
        cpu.a[7] = 0x6000; // user SP
        enter(&mut cpu, &mut mem, vect::TRAP_BASE, 0x1000, 0x1004).unwrap();
        assert!(cpu.sr.supervisor());
        assert_eq!(cpu.a[7], 0x9000 - 8);
        assert_eq!(cpu.other_sp, 0x6000, "user SP preserved in the shadow slot");
        // traps resume after the trapping instruction
        assert_eq!(mem.read(cpu.a[7] + 4, Size::Long, cpu.mbar).unwrap(), 0x1004);
    }

    #[test]
    fn trace_is_cleared_on_entry() {
        let (mut cpu, mut mem) = machine();
        cpu.sr.set_trace(true);
        enter(&mut cpu, &mut mem, vect::DIV_ZERO, 0x1000, 0x1004).unwrap();
        assert!(!cpu.sr.trace());
        // but the pushed copy still has it
        let fw = unpack_frame_word(mem.read(cpu.a[7], Size::Long, cpu.mbar).unwrap()).unwrap();
        assert_ne!(fw.sr & 0x8000, 0);
    }

    #[test]
    fn unmapped_handler_is_fault_on_fault() {
        let (mut cpu, mut mem) = machine();
        mem.write(5 * 4, Size::Long, 0xDEAD_0000, cpu.mbar).unwrap();
        let err = enter(&mut cpu, &mut mem, vect::DIV_ZERO, 0x1000, 0x1004).unwrap_err();
        assert_eq!(err.vector, vect::DIV_ZERO);
        assert_eq!(err.addr, 0xDEAD_0000);
    }

    #[test]
    fn unwritable_stack_is_fault_on_fault() {
        let (mut cpu, mut mem) = machine();
        cpu.a[7] = 0xCCCC_0000; // nothing mapped there
        assert!(enter(&mut cpu, &mut mem, vect::DIV_ZERO, 0x1000, 0x1004).is_err());
    }

    #[test]
    fn frame_word_round_trip() {
        let w = pack_frame_word(2, vect::TRACE, 0x2711);
        assert_eq!(
            unpack_frame_word(w),
            Some(FrameWord { misalign: 2, vector: 9, sr: 0x2711 })
        );
        assert_eq!(unpack_frame_word(0), None);
    }
}
