//! A ColdFire-family assembler core and instruction-set simulator.
//!
//! This crate is the engine behind firmware development tools: it owns
//! everything from mnemonics and operand descriptors down to executed
//! instructions. The textual front end (lexer, macro layer) and any UI live
//! outside it.
//!
//! # Usage
//!
//! Machine code is produced one instruction at a time with [`asm::assemble`]
//! and collected into an [`asm::Program`], which then seeds a
//! [`sim::Simulator`]'s address space:
//!
//! ```
//! use cf_ensemble::asm::{assemble, Program};
//! use cf_ensemble::ast::reg_consts::D0;
//! use cf_ensemble::ast::EffectiveAddress;
//! use cf_ensemble::isa::{Profile, Tier};
//! use cf_ensemble::sim::mem::{BankKind, MemoryMap};
//! use cf_ensemble::sim::{Pause, Simulator};
//!
//! // MOVEQ #-1, D0 followed by HALT
//! let mut prog = Program::new(0x1000, Tier::C);
//! let mut at = 0x1000;
//! for (mnemonic, src, dst) in [
//!     ("MOVEQ", EffectiveAddress::Immediate(-1i32 as u32), EffectiveAddress::DataDirect(D0)),
//!     ("HALT", EffectiveAddress::Implied, EffectiveAddress::Implied),
//! ] {
//!     let enc = assemble(mnemonic, None, &src, &dst, at).unwrap();
//!     prog.push(at, &enc);
//!     at += enc.byte_len();
//! }
//!
//! let mut mem = MemoryMap::new(0xE000_0000);
//! mem.add_bank("ram", 0, 0x1_0000, BankKind::Normal).unwrap();
//! let mut sim = Simulator::new(Profile::FULL_C, mem).unwrap();
//! prog.load_into(&mut sim.mem).unwrap();
//! sim.cpu.pc = prog.entry;
//!
//! assert_eq!(sim.run().unwrap(), Pause::Halted);
//! assert_eq!(sim.cpu.d[0], 0xFFFF_FFFF);
//! ```
//!
//! For persistence, [`asm::encoding`] reads and writes the byte-exact
//! binary-program container. For finer execution control, the [`sim`] module
//! has stepping, breakpoints, and exception notification; see its docs.
#![warn(missing_docs)]

pub mod asm;
pub mod ast;
pub mod inst;
pub mod isa;
pub mod sim;
