//! The instruction-level simulator engine.
//!
//! [`Simulator`] owns one CPU core, an address space, and the opcode map for
//! its configured [`Profile`]. [`Simulator::step`] retires exactly one
//! instruction (or delivers exactly one exception); [`Simulator::run`] steps
//! until something pauses it: a breakpoint, the external stop flag, or the
//! core halting.
//!
//! Exceptions raised mid-instruction are delivered at the instruction
//! boundary. A fault during exception entry itself is terminal: the core
//! halts and the [`FaultOnFault`] describing it is returned.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod cpu;
pub mod debug;
pub mod device;
pub mod exc;
pub mod mem;

use cpu::Cpu;
use debug::Breakpoint;
use exc::{vect, Cause, FaultOnFault};
use mem::{MemErr, MemoryMap};

use crate::inst::ea::WordStream;
use crate::inst::table::{registry, MapConflict, OpcodeMap};
use crate::inst::{exec, Exec, Flow};
use crate::isa::Profile;

/// Why [`Simulator::run`] returned.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Pause {
    /// The external stop flag was cleared.
    Interrupted,
    /// A breakpoint matched; the payload indexes `breakpoints`.
    Breakpoint(usize),
    /// A step or bounded run finished normally.
    Step,
    /// An exception vector listed in `break_vectors` was entered.
    Exception(u8),
    /// The core halted: a HALT instruction or a fault during exception
    /// entry. Halting is terminal until [`Simulator::reset`].
    Halted,
}

/// Word fetch directly from the memory map, tracking the fetch address.
struct MemWords<'m> {
    mem: &'m mut MemoryMap,
    mbar: u32,
    pc: u32,
}
impl WordStream for MemWords<'_> {
    fn here(&self) -> u32 {
        self.pc
    }
    fn take(&mut self) -> Result<u16, MemErr> {
        let word = self.mem.read_word(self.pc, self.mbar)?;
        self.pc = self.pc.wrapping_add(2);
        Ok(word)
    }
}

/// One simulated core with its address space.
pub struct Simulator {
    /// The register file.
    pub cpu: Cpu,
    /// The address space, including peripherals and the simulator-I/O
    /// window.
    pub mem: MemoryMap,
    /// Active breakpoints, checked after every retired instruction during
    /// [`Simulator::run`].
    pub breakpoints: Vec<Breakpoint>,
    /// Exception vectors that pause a run when entered. Faults like the
    /// access and address errors are typical members; TRAP vectors used as
    /// system calls are typically left out.
    pub break_vectors: HashSet<u8>,
    profile: Profile,
    map: OpcodeMap,
    mcr: Arc<AtomicBool>,
    cycles: u64,
    instr_count: u64,
    /// STOP state: waiting for an interrupt.
    stopped: bool,
    /// Terminal halt (HALT instruction or fault-on-fault).
    halted: bool,
    /// Call depth: exception entries and subroutine calls increment, their
    /// returns decrement. Drives step-over/step-out.
    frame_depth: u64,
    /// The most recent exception entry: (vector, faulting instruction).
    last_exception: Option<(u8, u32)>,
    /// Set when an entry hit `break_vectors`; consumed by the run loops.
    notify_pending: bool,
}

impl Simulator {
    /// Creates a simulator over a configured address space.
    pub fn new(profile: Profile, mem: MemoryMap) -> Result<Simulator, MapConflict> {
        Ok(Simulator {
            cpu: Cpu::new(profile.tier),
            mem,
            breakpoints: Vec::new(),
            break_vectors: HashSet::new(),
            profile,
            map: OpcodeMap::build(profile)?,
            mcr: Arc::new(AtomicBool::new(false)),
            cycles: 0,
            instr_count: 0,
            stopped: false,
            halted: false,
            frame_depth: 0,
            last_exception: None,
            notify_pending: false,
        })
    }

    /// The configured core profile.
    pub fn profile(&self) -> Profile {
        self.profile
    }
    /// The opcode map built for the configured profile.
    pub fn opcode_map(&self) -> &OpcodeMap {
        &self.map
    }
    /// Reconfigures the core profile, rebuilding the opcode map. Registers
    /// and memory are untouched.
    pub fn set_profile(&mut self, profile: Profile) -> Result<(), MapConflict> {
        self.map = OpcodeMap::build(profile)?;
        self.profile = profile;
        Ok(())
    }

    /// Estimated elapsed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
    /// Retired instructions.
    pub fn instr_count(&self) -> u64 {
        self.instr_count
    }
    /// Whether the core is terminally halted.
    pub fn halted(&self) -> bool {
        self.halted
    }
    /// Whether the core is in the STOP state, waiting for an interrupt.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// A handle to the run flag. Clearing it from another thread makes
    /// [`Simulator::run`] return after the current instruction.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.mcr)
    }

    /// Resets the core and the address space to power-on state. The program
    /// counter must be set (or an image loaded) before stepping again.
    pub fn reset(&mut self) {
        self.cpu = Cpu::new(self.profile.tier);
        self.mem.reset();
        self.cycles = 0;
        self.instr_count = 0;
        self.mem.io.instr_count = 0;
        self.stopped = false;
        self.halted = false;
        self.frame_depth = 0;
        self.last_exception = None;
        self.notify_pending = false;
    }

    /// The most recent exception entry, as (vector, faulting instruction
    /// address). Cleared by [`Simulator::reset`].
    pub fn last_exception(&self) -> Option<(u8, u32)> {
        self.last_exception
    }

    fn enter_exception(&mut self, vector: u8, instr_addr: u32) -> Result<(), FaultOnFault> {
        self.last_exception = Some((vector, instr_addr));
        if self.break_vectors.contains(&vector) {
            self.notify_pending = true;
        }
        let next_pc = self.cpu.pc;
        match exc::enter(&mut self.cpu, &mut self.mem, vector, instr_addr, next_pc) {
            Ok(()) => {
                self.frame_depth += 1;
                Ok(())
            }
            Err(fault) => {
                self.halted = true;
                Err(fault)
            }
        }
    }

    /// Retires one instruction, or delivers one exception, or idles one
    /// cycle in the STOP state.
    ///
    /// `Err` means a fault occurred during exception entry; the core is
    /// halted and stays halted (further steps are inert).
    pub fn step(&mut self) -> Result<(), FaultOnFault> {
        if self.halted {
            return Ok(());
        }

        // interrupts are sampled at the instruction boundary and wake STOP
        if let Some((level, vector)) = self.mem.devices.intc.pending(self.cpu.sr.ipl()) {
            self.stopped = false;
            self.enter_exception(vector, self.cpu.pc)?;
            self.cpu.sr.set_ipl(level);
            return Ok(());
        }
        if self.stopped {
            // keep the peripherals alive while waiting
            self.mem.devices.update_all();
            self.cycles += 1;
            return Ok(());
        }

        let instr_addr = self.cpu.pc;
        if instr_addr & 1 != 0 {
            // misaligned PC faults before any fetch is attempted
            return self.enter_exception(vect::ADDRESS_ERROR, instr_addr);
        }
        let opword = match self.mem.read_word(instr_addr, self.cpu.mbar) {
            Ok(w) => w,
            Err(_) => return self.enter_exception(vect::ACCESS_ERROR, instr_addr),
        };

        let id = self.map.lookup(opword);
        let var = registry().get(id);
        if var.supervisor && !self.cpu.sr.supervisor() {
            return self.enter_exception(vect::PRIVILEGE, instr_addr);
        }

        let mut stream = MemWords {
            mem: &mut self.mem,
            mbar: self.cpu.mbar,
            pc: instr_addr.wrapping_add(2),
        };
        let decoded = match var.decode(id, opword, instr_addr, &mut stream) {
            Ok(d) => d,
            Err(e) => {
                let cause = Cause::from(e);
                return self.enter_exception(cause.vector(), instr_addr);
            }
        };

        let trace = self.cpu.sr.trace();
        self.cpu.pc = decoded.next_addr();
        match exec::execute(&decoded, &mut self.cpu, &mut self.mem) {
            Ok(()) => match var.flow {
                Flow::Call => self.frame_depth += 1,
                Flow::Ret => self.frame_depth = self.frame_depth.saturating_sub(1),
                Flow::Stop => {
                    if var.exec == Exec::Halt {
                        self.halted = true;
                    } else {
                        self.stopped = true;
                    }
                }
                Flow::None | Flow::Branch => {}
            },
            Err(cause) => {
                self.enter_exception(cause.vector(), instr_addr)?;
            }
        }

        self.cycles += u64::from(var.cycles);
        self.instr_count += 1;
        self.mem.io.instr_count = self.instr_count as u32;
        self.mem.devices.update_all();

        // trace fires when T was set at the start of the instruction, after
        // the instruction completes and before the next interrupt sample
        if trace && !self.halted {
            self.enter_exception(vect::TRACE, instr_addr)?;
        }
        Ok(())
    }

    fn breakpoint_hit(&mut self) -> Option<usize> {
        for i in 0..self.breakpoints.len() {
            let bp = self.breakpoints[i].clone();
            if bp.hit(&self.cpu, &mut self.mem) {
                return Some(i);
            }
        }
        None
    }

    /// Checked between steps by every run loop.
    fn poll_pause(&mut self) -> Option<Pause> {
        if self.halted {
            return Some(Pause::Halted);
        }
        if std::mem::take(&mut self.notify_pending) {
            let (vector, _) = self.last_exception?;
            return Some(Pause::Exception(vector));
        }
        if let Some(i) = self.breakpoint_hit() {
            return Some(Pause::Breakpoint(i));
        }
        if !self.mcr.load(Ordering::Relaxed) {
            return Some(Pause::Interrupted);
        }
        None
    }

    /// Runs until a breakpoint, a notified exception, the stop flag, or a
    /// halt.
    pub fn run(&mut self) -> Result<Pause, FaultOnFault> {
        self.run_while(|_| true)
    }

    /// Runs while the condition holds, checking it before every step.
    pub fn run_while(
        &mut self,
        mut cond: impl FnMut(&Simulator) -> bool,
    ) -> Result<Pause, FaultOnFault> {
        self.mcr.store(true, Ordering::Relaxed);
        loop {
            if !cond(self) {
                return Ok(Pause::Step);
            }
            self.step()?;
            if let Some(pause) = self.poll_pause() {
                return Ok(pause);
            }
        }
    }

    /// Runs for at most `limit` steps. STOP idle cycles and exception
    /// deliveries count as steps, so this bounds wall-clock work even on a
    /// core that is waiting forever.
    pub fn run_with_limit(&mut self, limit: u64) -> Result<Pause, FaultOnFault> {
        let mut left = limit;
        self.run_while(move |_| {
            let go = left > 0;
            left = left.saturating_sub(1);
            go
        })
    }

    /// Steps one instruction, following calls and exceptions inward.
    pub fn step_in(&mut self) -> Result<(), FaultOnFault> {
        self.step()
    }

    /// Steps one instruction; if it opened a frame (a call, TRAP, or other
    /// exception entry), runs until the frame is closed again.
    pub fn step_over(&mut self) -> Result<Pause, FaultOnFault> {
        self.mcr.store(true, Ordering::Relaxed);
        let depth = self.frame_depth;
        self.step()?;
        while self.frame_depth > depth {
            if let Some(pause) = self.poll_pause() {
                return Ok(pause);
            }
            self.step()?;
        }
        Ok(Pause::Step)
    }

    /// Runs until the current frame returns.
    pub fn step_out(&mut self) -> Result<Pause, FaultOnFault> {
        self.mcr.store(true, Ordering::Relaxed);
        let depth = self.frame_depth;
        while self.frame_depth >= depth && depth > 0 {
            self.step()?;
            if let Some(pause) = self.poll_pause() {
                return Ok(pause);
            }
        }
        Ok(Pause::Step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Size;
    use crate::isa::{ExtensionSet, Tier};
    use crate::sim::device::{InterruptLines, Peripheral};
    use crate::sim::mem::BankKind;

    fn machine() -> Simulator {
        let mut mem = MemoryMap::new(0xE000_0000);
        mem.add_bank("ram", 0, 0x1_0000, BankKind::Normal).unwrap();
        let mut sim = Simulator::new(Profile::FULL_C, mem).unwrap();
        sim.cpu.a[7] = 0x8000;
        sim.cpu.mbar = 0xF000_0000;
        // fill the vector table with handlers that are at least fetchable
        for v in 0..64u32 {
            sim.mem.write(4 * v, Size::Long, 0x7000, sim.cpu.mbar).unwrap();
        }
        sim.mem.write(0x7000, Size::Word, 0x4E71, sim.cpu.mbar).unwrap();
        sim
    }

    fn load_words(sim: &mut Simulator, at: u32, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            sim.mem
                .write(at + 2 * i as u32, Size::Word, u32::from(*w), sim.cpu.mbar)
                .unwrap();
        }
        sim.cpu.pc = at;
    }

    #[test]
    fn odd_pc_faults_before_fetch() {
        let mut sim = machine();
        sim.cpu.pc = 0x1001;
        sim.step().unwrap();
        assert_eq!(sim.cpu.pc, 0x7000, "vector 3 handler entered");
        let frame = sim.mem.read(sim.cpu.a[7], Size::Long, sim.cpu.mbar).unwrap();
        let fw = exc::unpack_frame_word(frame).unwrap();
        assert_eq!(fw.vector, vect::ADDRESS_ERROR);
        let ret = sim.mem.read(sim.cpu.a[7] + 4, Size::Long, sim.cpu.mbar).unwrap();
        assert_eq!(ret, 0x1001, "the faulting PC itself is stacked");
    }

    #[test]
    fn unmapped_fetch_is_an_access_error() {
        let mut sim = machine();
        sim.cpu.pc = 0x4000_0000;
        sim.step().unwrap();
        let frame = sim.mem.read(sim.cpu.a[7], Size::Long, sim.cpu.mbar).unwrap();
        assert_eq!(exc::unpack_frame_word(frame).unwrap().vector, vect::ACCESS_ERROR);
    }

    #[test]
    fn privileged_instruction_in_user_mode() {
        let mut sim = machine();
        load_words(&mut sim, 0x1000, &[0x46C0]); // MOVE D0,SR
        sim.cpu.set_supervisor(false);
        sim.cpu.a[7] = 0x6000;
        sim.step().unwrap();
        assert!(sim.cpu.sr.supervisor());
        let frame = sim.mem.read(sim.cpu.a[7], Size::Long, sim.cpu.mbar).unwrap();
        assert_eq!(exc::unpack_frame_word(frame).unwrap().vector, vect::PRIVILEGE);
    }

    #[test]
    fn trap_and_rte_round_trip() {
        let mut sim = machine();
        // handler at 0x7100: RTE
        sim.mem.write(4 * 32, Size::Long, 0x7100, sim.cpu.mbar).unwrap();
        sim.mem.write(0x7100, Size::Word, 0x4E73, sim.cpu.mbar).unwrap();
        load_words(&mut sim, 0x1000, &[0x4E40, 0x4E71]); // TRAP #0; NOP
        sim.step().unwrap();
        assert_eq!(sim.cpu.pc, 0x7100);
        sim.step().unwrap();
        assert_eq!(sim.cpu.pc, 0x1002, "RTE resumes after the trap");
    }

    #[test]
    fn divide_fault_stacks_the_faulting_instruction() {
        let mut sim = machine();
        sim.cpu.d[0] = 42;
        sim.cpu.d[1] = 0;
        load_words(&mut sim, 0x1000, &[0x80C1]); // DIVU.W D1,D0
        sim.step().unwrap();
        assert_eq!(sim.cpu.d[0], 42, "destination untouched on a zero divisor");
        let frame = sim.mem.read(sim.cpu.a[7], Size::Long, sim.cpu.mbar).unwrap();
        assert_eq!(exc::unpack_frame_word(frame).unwrap().vector, vect::DIV_ZERO);
        let ret = sim.mem.read(sim.cpu.a[7] + 4, Size::Long, sim.cpu.mbar).unwrap();
        assert_eq!(ret, 0x1000, "a divide fault returns to the divide itself");
    }

    #[test]
    fn double_fault_halts() {
        let mut sim = machine();
        // make every vector entry unusable, then fault
        sim.cpu.vbr = 0x4000_0000;
        sim.cpu.pc = 0x1001;
        let err = sim.step().unwrap_err();
        assert_eq!(err.vector, vect::ADDRESS_ERROR);
        assert!(sim.halted());
        // further steps are inert
        sim.step().unwrap();
        assert!(sim.halted());
    }

    #[test]
    fn halt_instruction_pauses_run_terminally() {
        let mut sim = machine();
        load_words(&mut sim, 0x1000, &[0x4E71, 0x4AC8]); // NOP; HALT
        assert_eq!(sim.run().unwrap(), Pause::Halted);
        assert_eq!(sim.instr_count(), 2);
    }

    #[test]
    fn trace_fires_after_each_instruction() {
        let mut sim = machine();
        // trace handler at 0x7200: RTE
        sim.mem.write(4 * u32::from(vect::TRACE), Size::Long, 0x7200, sim.cpu.mbar)
            .unwrap();
        sim.mem.write(0x7200, Size::Word, 0x4E73, sim.cpu.mbar).unwrap();
        load_words(&mut sim, 0x1000, &[0x4E71]); // NOP
        sim.cpu.sr.set_trace(true);
        sim.step().unwrap();
        assert_eq!(sim.cpu.pc, 0x7200, "trace delivered after completion");
        assert!(!sim.cpu.sr.trace(), "entry clears T");
        sim.step().unwrap(); // RTE
        assert_eq!(sim.cpu.pc, 0x1002);
        assert!(sim.cpu.sr.trace(), "RTE restores the traced SR");
    }

    struct Ticker {
        fire_at: u32,
        ticks: u32,
        level: u8,
    }
    impl Peripheral for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }
        fn range(&self) -> (u16, u16) {
            (0x100, 0x104)
        }
        fn read(&mut self, _: u16, _: Size) -> Option<u32> {
            Some(self.ticks)
        }
        fn write(&mut self, _: u16, _: Size, _: u32) -> bool {
            false
        }
        fn update(&mut self, intc: &mut InterruptLines) {
            self.ticks += 1;
            if self.ticks == self.fire_at {
                intc.assert_request(1, self.level, vect::AUTOVECTOR_BASE + self.level);
            }
        }
        fn reset(&mut self) {
            self.ticks = 0;
        }
    }

    #[test]
    fn interrupt_respects_the_mask_and_raises_it() {
        let mut sim = machine();
        let v = vect::AUTOVECTOR_BASE + 3;
        sim.mem.write(4 * u32::from(v), Size::Long, 0x7300, sim.cpu.mbar).unwrap();
        sim.mem.write(0x7300, Size::Word, 0x4E71, sim.cpu.mbar).unwrap();
        sim.mem
            .devices
            .add_device(Box::new(Ticker { fire_at: 1, ticks: 0, level: 3 }))
            .unwrap();
        load_words(&mut sim, 0x1000, &[0x4E71, 0x4E71, 0x4E71]);

        // masked at IPL 7 (reset state): the request is pending but held
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.cpu.pc, 0x1004);

        // lower the mask and the next boundary takes it
        sim.cpu.sr.set_ipl(0);
        sim.step().unwrap();
        assert_eq!(sim.cpu.pc, 0x7300);
        assert_eq!(sim.cpu.sr.ipl(), 3, "mask raised to the taken level");
    }

    #[test]
    fn stop_waits_for_an_interrupt() {
        let mut sim = machine();
        let v = vect::AUTOVECTOR_BASE + 4;
        sim.mem.write(4 * u32::from(v), Size::Long, 0x7400, sim.cpu.mbar).unwrap();
        sim.mem.write(0x7400, Size::Word, 0x4E71, sim.cpu.mbar).unwrap();
        sim.mem
            .devices
            .add_device(Box::new(Ticker { fire_at: 3, ticks: 0, level: 4 }))
            .unwrap();
        // STOP #2000 keeps supervisor set with the mask open
        load_words(&mut sim, 0x1000, &[0x4E72, 0x2000]);
        sim.step().unwrap();
        assert!(sim.stopped());
        let before = sim.instr_count();
        // idles until the ticker fires, then wakes into the handler
        while sim.stopped() {
            sim.step().unwrap();
        }
        assert_eq!(sim.cpu.pc, 0x7400);
        assert_eq!(sim.instr_count(), before, "no instructions retire while stopped");
    }

    #[test]
    fn breakpoint_pauses_run() {
        let mut sim = machine();
        load_words(&mut sim, 0x1000, &[0x4E71, 0x4E71, 0x4AC8]);
        sim.breakpoints.push(Breakpoint::Pc(0x1002));
        assert_eq!(sim.run().unwrap(), Pause::Breakpoint(0));
        assert_eq!(sim.cpu.pc, 0x1002);
        sim.breakpoints.clear();
        assert_eq!(sim.run().unwrap(), Pause::Halted);
    }

    #[test]
    fn run_with_limit_bounds_work() {
        let mut sim = machine();
        // an infinite loop: BRA.B -2 branches to itself
        load_words(&mut sim, 0x1000, &[0x60FE]);
        assert_eq!(sim.run_with_limit(100).unwrap(), Pause::Step);
        assert_eq!(sim.instr_count(), 100);
        assert_eq!(sim.cpu.pc, 0x1000);
    }

    #[test]
    fn notified_vector_pauses_run() {
        let mut sim = machine();
        sim.cpu.d[0] = 7;
        sim.cpu.d[1] = 0;
        load_words(&mut sim, 0x1000, &[0x4E71, 0x80C1]); // NOP; DIVU.W D1,D0
        sim.break_vectors.insert(vect::DIV_ZERO);
        assert_eq!(sim.run().unwrap(), Pause::Exception(vect::DIV_ZERO));
        assert_eq!(sim.last_exception(), Some((vect::DIV_ZERO, 0x1002)));
    }

    #[test]
    fn step_over_a_subroutine() {
        let mut sim = machine();
        // 0x1000: BSR.W +0xFE (target 0x1100); 0x1004: NOP
        load_words(&mut sim, 0x1000, &[0x6100, 0x00FE, 0x4E71]);
        // subroutine: NOP; RTS
        sim.mem.write(0x1100, Size::Word, 0x4E71, sim.cpu.mbar).unwrap();
        sim.mem.write(0x1102, Size::Word, 0x4E75, sim.cpu.mbar).unwrap();
        sim.step_over().unwrap();
        assert_eq!(sim.cpu.pc, 0x1004, "landed after the call");
    }

    #[test]
    fn instruction_counter_port() {
        let mut sim = machine();
        let port = 0xE000_0000 + device::sim_ports::INSTR_COUNT;
        load_words(&mut sim, 0x1000, &[0x4E71, 0x4E71]);
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.mem.read(port, Size::Long, sim.cpu.mbar).unwrap(), 2);
    }

    #[test]
    fn tier_a_profile_rejects_later_opcodes() {
        let mut mem = MemoryMap::new(0xE000_0000);
        mem.add_bank("ram", 0, 0x1_0000, BankKind::Normal).unwrap();
        let mut sim = Simulator::new(
            Profile { tier: Tier::A, extensions: ExtensionSet::NONE },
            mem,
        )
        .unwrap();
        sim.cpu.a[7] = 0x8000;
        sim.cpu.mbar = 0xF000_0000;
        for v in 0..64u32 {
            sim.mem.write(4 * v, Size::Long, 0x7000, sim.cpu.mbar).unwrap();
        }
        sim.mem.write(0x7000, Size::Word, 0x4E71, sim.cpu.mbar).unwrap();
        // MVS.W D1,D0 is an ISA_B addition: under ISA_A it is illegal
        load_words(&mut sim, 0x1000, &[0x7101]);
        sim.step().unwrap();
        let frame = sim.mem.read(sim.cpu.a[7], Size::Long, sim.cpu.mbar).unwrap();
        assert_eq!(exc::unpack_frame_word(frame).unwrap().vector, vect::ILLEGAL);
    }
}
