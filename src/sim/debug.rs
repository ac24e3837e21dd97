//! Breakpoints.
//!
//! A [`Breakpoint`] is a predicate over machine state, checked by the run
//! loop after every retired instruction. Besides the plain program-counter
//! break, registers and memory words can be watched against a
//! [`Comparator`].

use crate::ast::{AddrReg, DataReg, Size};
use crate::sim::cpu::Cpu;
use crate::sim::mem::MemoryMap;

/// A relational test applied by value breakpoints.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Comparator {
    /// Less than (unsigned).
    Lt,
    /// Less than or equal (unsigned).
    Le,
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than or equal (unsigned).
    Ge,
    /// Greater than (unsigned).
    Gt,
}

impl Comparator {
    /// Applies the test with the watched value on the left.
    pub fn holds(self, lhs: u32, rhs: u32) -> bool {
        match self {
            Comparator::Lt => lhs < rhs,
            Comparator::Le => lhs <= rhs,
            Comparator::Eq => lhs == rhs,
            Comparator::Ne => lhs != rhs,
            Comparator::Ge => lhs >= rhs,
            Comparator::Gt => lhs > rhs,
        }
    }
}

/// A condition that pauses a running simulator.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Breakpoint {
    /// Breaks when the program counter reaches the given address.
    Pc(u32),
    /// Breaks when a data register compares true against the value.
    Data(DataReg, Comparator, u32),
    /// Breaks when an address register compares true against the value.
    Addr(AddrReg, Comparator, u32),
    /// Breaks when the long word at the given address compares true
    /// against the value. An unreadable address never matches.
    Mem(u32, Comparator, u32),
}

impl Breakpoint {
    /// Evaluates the breakpoint against the current machine state.
    pub fn hit(&self, cpu: &Cpu, mem: &mut MemoryMap) -> bool {
        match *self {
            Breakpoint::Pc(addr) => cpu.pc == addr,
            Breakpoint::Data(reg, cmp, value) => cmp.holds(cpu.d[usize::from(reg)], value),
            Breakpoint::Addr(reg, cmp, value) => cmp.holds(cpu.a[usize::from(reg)], value),
            Breakpoint::Mem(addr, cmp, value) => mem
                .read(addr, Size::Long, cpu.mbar)
                .map_or(false, |word| cmp.holds(word, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Tier;
    use crate::sim::mem::BankKind;

    fn machine() -> (Cpu, MemoryMap) {
        let mut mem = MemoryMap::new(0xE000_0000);
        mem.add_bank("ram", 0, 0x1000, BankKind::Normal).unwrap();
        (Cpu::new(Tier::C), mem)
    }

    #[test]
    fn pc_breakpoint() {
        let (mut cpu, mut mem) = machine();
        cpu.pc = 0x200;
        assert!(Breakpoint::Pc(0x200).hit(&cpu, &mut mem));
        assert!(!Breakpoint::Pc(0x202).hit(&cpu, &mut mem));
    }

    #[test]
    fn register_comparators() {
        let (mut cpu, mut mem) = machine();
        cpu.d[3] = 10;
        cpu.a[1] = 0x8000;
        assert!(Breakpoint::Data(DataReg(3), Comparator::Ge, 10).hit(&cpu, &mut mem));
        assert!(!Breakpoint::Data(DataReg(3), Comparator::Gt, 10).hit(&cpu, &mut mem));
        assert!(Breakpoint::Addr(AddrReg(1), Comparator::Lt, 0x9000).hit(&cpu, &mut mem));
    }

    #[test]
    fn memory_watch_never_matches_unmapped() {
        let (cpu, mut mem) = machine();
        mem.write(0x100, Size::Long, 0xDEAD_BEEF, cpu.mbar).unwrap();
        assert!(Breakpoint::Mem(0x100, Comparator::Eq, 0xDEAD_BEEF).hit(&cpu, &mut mem));
        assert!(!Breakpoint::Mem(0x4000_0000, Comparator::Ne, 0).hit(&cpu, &mut mem));
    }
}
