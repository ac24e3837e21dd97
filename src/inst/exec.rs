//! Operand resolution and the interpreter for decoded instructions.
//!
//! [`execute`] runs one [`Decoded`] instruction against a CPU and memory
//! map. Anything that goes wrong comes back as a [`Cause`], which the step
//! loop turns into an exception at the instruction boundary; this module
//! never enters exception processing itself.

use super::{BitOp, BranchKind, Cond, Decoded, Exec, LogicOp};
use crate::ast::{
    AddrReg, DataReg, EffectiveAddress as Ea, Index, IndexReg, MacHalf, MacReg, Size, SpecialReg,
};
use crate::sim::cpu::{Cpu, ExtendRule};
use crate::sim::exc::{vect, Cause};
use crate::sim::mem::MemoryMap;

/// A resolved operand: where a value lives.
#[derive(Debug, Clone, Copy)]
enum Loc {
    Data(DataReg),
    Addr(AddrReg),
    Mem(u32),
    Imm(u32),
}

fn index_value(cpu: &Cpu, idx: Index) -> u32 {
    let base = match idx.reg {
        IndexReg::Data(dn) => cpu.data(dn, Size::Long),
        IndexReg::Addr(an) => cpu.addr(an),
    };
    base.wrapping_mul(idx.scale.factor())
}

/// Post-increment/pre-decrement step: the operand size, except that byte
/// accesses through A7 step by two to keep the stack pointer aligned.
fn step(an: AddrReg, size: Size) -> u32 {
    if size == Size::Byte && an.reg_no() == 7 {
        2
    } else {
        size.bytes()
    }
}

/// Resolves an operand to a location, applying any register side effects
/// (post-increment, pre-decrement).
///
/// PC-relative displacements are measured from the address of their
/// extension word. Every variant that admits a PC-relative operand places
/// its extension words directly after the opcode word, so the base is
/// always `d.addr + 2`.
fn resolve(cpu: &mut Cpu, d: &Decoded, ea: &Ea) -> Result<Loc, Cause> {
    let pc_base = d.addr.wrapping_add(2);
    Ok(match *ea {
        Ea::DataDirect(dn) => Loc::Data(dn),
        Ea::AddrDirect(an) => Loc::Addr(an),
        Ea::Indirect(an) => Loc::Mem(cpu.addr(an)),
        Ea::PostIncr(an) => {
            let addr = cpu.addr(an);
            cpu.set_addr(an, addr.wrapping_add(step(an, d.size)));
            Loc::Mem(addr)
        }
        Ea::PreDecr(an) => {
            let addr = cpu.addr(an).wrapping_sub(step(an, d.size));
            cpu.set_addr(an, addr);
            Loc::Mem(addr)
        }
        Ea::Displacement(an, disp) => Loc::Mem(cpu.addr(an).wrapping_add(disp as u32)),
        Ea::Indexed(an, idx, disp) => Loc::Mem(
            cpu.addr(an)
                .wrapping_add(index_value(cpu, idx))
                .wrapping_add(disp as u32),
        ),
        Ea::AbsShort(addr) | Ea::AbsLong(addr) => Loc::Mem(addr),
        Ea::PcDisplacement(disp) => Loc::Mem(pc_base.wrapping_add(disp as u32)),
        Ea::PcIndexed(idx, disp) => Loc::Mem(
            pc_base
                .wrapping_add(index_value(cpu, idx))
                .wrapping_add(disp as u32),
        ),
        Ea::Immediate(v) => Loc::Imm(v),
        // operands handled by their own execute arms
        Ea::Special(_) | Ea::RegList(_) | Ea::MacPair(..) | Ea::Implied => {
            return Err(Cause::Raise(vect::ILLEGAL))
        }
    })
}

fn read(cpu: &Cpu, mem: &mut MemoryMap, loc: Loc, size: Size) -> Result<u32, Cause> {
    Ok(match loc {
        Loc::Data(dn) => cpu.data(dn, size),
        Loc::Addr(an) => cpu.addr(an) & size.mask(),
        Loc::Mem(addr) => mem.read(addr, size, cpu.mbar)?,
        Loc::Imm(v) => v & size.mask(),
    })
}

fn write(cpu: &mut Cpu, mem: &mut MemoryMap, loc: Loc, size: Size, value: u32) -> Result<(), Cause> {
    match loc {
        Loc::Data(dn) => cpu.set_data(dn, size, value),
        Loc::Addr(an) => cpu.set_addr(an, value),
        Loc::Mem(addr) => mem.write(addr, size, value, cpu.mbar)?,
        Loc::Imm(_) => return Err(Cause::Raise(vect::ILLEGAL)),
    }
    Ok(())
}

fn push_long(cpu: &mut Cpu, mem: &mut MemoryMap, value: u32) -> Result<(), Cause> {
    let sp = cpu.a[7].wrapping_sub(4);
    mem.write(sp, Size::Long, value, cpu.mbar)?;
    cpu.a[7] = sp;
    Ok(())
}

fn pop_long(cpu: &mut Cpu, mem: &mut MemoryMap) -> Result<u32, Cause> {
    let value = mem.read(cpu.a[7], Size::Long, cpu.mbar)?;
    cpu.a[7] = cpu.a[7].wrapping_add(4);
    Ok(value)
}

fn cond_of(opword: u16) -> Cond {
    Cond::from_bits((opword >> 8) as u8 & 0xF)
}

/// Left shift; returns the result and the last bit shifted out.
fn shl(val: u32, count: u32) -> (u32, bool) {
    match count {
        33.. => (0, false),
        32 => (0, val & 1 != 0),
        _ => (val << count, val >> (32 - count) & 1 != 0),
    }
}
/// Logical right shift.
fn shr(val: u32, count: u32) -> (u32, bool) {
    match count {
        33.. => (0, false),
        32 => (0, val >> 31 != 0),
        _ => (val >> count, val >> (count - 1) & 1 != 0),
    }
}
/// Arithmetic right shift.
fn sar(val: u32, count: u32) -> (u32, bool) {
    if count >= 32 {
        let fill = ((val as i32) >> 31) as u32;
        (fill, fill & 1 != 0)
    } else {
        (((val as i32) >> count) as u32, val >> (count - 1) & 1 != 0)
    }
}

fn mac_operand(cpu: &Cpu, mr: MacReg, size: Size) -> i64 {
    let full = if mr.reg < 8 {
        cpu.d[usize::from(mr.reg)]
    } else {
        cpu.a[usize::from(mr.reg - 8)]
    };
    match size {
        Size::Word => {
            let half = match mr.half {
                MacHalf::Lower => full & 0xFFFF,
                MacHalf::Upper => full >> 16,
            };
            i64::from(Size::Word.sign_extend(half) as i32)
        }
        _ => i64::from(full as i32),
    }
}

fn mac_reg_read(cpu: &Cpu, reg: SpecialReg) -> u32 {
    match reg {
        SpecialReg::Acc => cpu.acc,
        SpecialReg::Macsr => cpu.macsr,
        _ => cpu.mask,
    }
}
fn mac_reg_write(cpu: &mut Cpu, reg: SpecialReg, value: u32) {
    match reg {
        SpecialReg::Acc => cpu.acc = value,
        SpecialReg::Macsr => cpu.macsr = value,
        _ => cpu.mask = value,
    }
}

/// Executes one decoded instruction.
///
/// On entry `cpu.pc` must already point at the following instruction
/// (`d.next_addr()`); control-flow instructions overwrite it. The privilege
/// check for supervisor instructions is the step loop's job and has already
/// happened.
pub fn execute(d: &Decoded, cpu: &mut Cpu, mem: &mut MemoryMap) -> Result<(), Cause> {
    let var = super::table::registry().get(d.variant);
    let size = d.size;

    match var.exec {
        Exec::Move => {
            let src = resolve(cpu, d, &d.src)?;
            let val = read(cpu, mem, src, size)?;
            let dst = resolve(cpu, d, &d.dst)?;
            cpu.sr.set_logic(val, size);
            write(cpu, mem, dst, size, val)?;
        }
        Exec::Movea => {
            let src = resolve(cpu, d, &d.src)?;
            let mut val = read(cpu, mem, src, size)?;
            if size == Size::Word {
                val = Size::Word.sign_extend(val);
            }
            let Ea::AddrDirect(an) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            cpu.set_addr(an, val);
        }
        Exec::Moveq | Exec::Mov3q => {
            let Ea::Immediate(val) = d.src else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let dst = resolve(cpu, d, &d.dst)?;
            cpu.sr.set_logic(val, Size::Long);
            write(cpu, mem, dst, Size::Long, val)?;
        }
        Exec::Mvs | Exec::Mvz => {
            let src = resolve(cpu, d, &d.src)?;
            let narrow = read(cpu, mem, src, size)?;
            let val = if var.exec == Exec::Mvs { size.sign_extend(narrow) } else { narrow };
            let dst = resolve(cpu, d, &d.dst)?;
            cpu.sr.set_logic(val, Size::Long);
            write(cpu, mem, dst, Size::Long, val)?;
        }
        Exec::Lea => {
            let Loc::Mem(addr) = resolve(cpu, d, &d.src)? else {
                return Err(Cause::Raise(vect::ILLEGAL));
            };
            let Ea::AddrDirect(an) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            cpu.set_addr(an, addr);
        }
        Exec::Pea => {
            let Loc::Mem(addr) = resolve(cpu, d, &d.src)? else {
                return Err(Cause::Raise(vect::ILLEGAL));
            };
            push_long(cpu, mem, addr)?;
        }
        Exec::Movem => {
            // bit i of the list is Di for i < 8, A(i-8) above; the memory
            // side never post-increments, so A-registers are stable here
            match (&d.src, &d.dst) {
                (&Ea::RegList(list), mem_side) => {
                    let Loc::Mem(mut addr) = resolve(cpu, d, mem_side)? else {
                        return Err(Cause::Raise(vect::ILLEGAL));
                    };
                    for i in 0..16u16 {
                        if list & 1 << i == 0 {
                            continue;
                        }
                        let val = if i < 8 { cpu.d[usize::from(i)] } else { cpu.a[usize::from(i - 8)] };
                        mem.write(addr, Size::Long, val, cpu.mbar)?;
                        addr = addr.wrapping_add(4);
                    }
                }
                (mem_side, &Ea::RegList(list)) => {
                    let Loc::Mem(mut addr) = resolve(cpu, d, mem_side)? else {
                        return Err(Cause::Raise(vect::ILLEGAL));
                    };
                    for i in 0..16u16 {
                        if list & 1 << i == 0 {
                            continue;
                        }
                        let val = mem.read(addr, Size::Long, cpu.mbar)?;
                        if i < 8 {
                            cpu.d[usize::from(i)] = val;
                        } else {
                            cpu.a[usize::from(i - 8)] = val;
                        }
                        addr = addr.wrapping_add(4);
                    }
                }
                _ => return Err(Cause::Raise(vect::ILLEGAL)),
            }
        }
        Exec::MoveFromCcr => {
            let dst = resolve(cpu, d, &d.dst)?;
            write(cpu, mem, dst, Size::Word, u32::from(cpu.sr.ccr()))?;
        }
        Exec::MoveToCcr => {
            let src = resolve(cpu, d, &d.src)?;
            let val = read(cpu, mem, src, Size::Word)?;
            cpu.sr.set_ccr(val as u8);
        }
        Exec::MoveFromSr => {
            let dst = resolve(cpu, d, &d.dst)?;
            write(cpu, mem, dst, Size::Word, u32::from(cpu.sr.bits()))?;
        }
        Exec::MoveToSr => {
            let src = resolve(cpu, d, &d.src)?;
            let val = read(cpu, mem, src, Size::Word)?;
            cpu.write_sr(val as u16);
        }
        Exec::Movec => {
            let src = resolve(cpu, d, &d.src)?;
            let val = read(cpu, mem, src, Size::Long)?;
            let Ea::Special(rc) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            match rc {
                SpecialReg::Usp => cpu.set_usp(val),
                SpecialReg::Vbr => cpu.vbr = val,
                SpecialReg::Mbar => cpu.mbar = val,
                SpecialReg::Rambar => cpu.rambar = val,
                SpecialReg::Rombar => cpu.rombar = val,
                _ => return Err(Cause::Raise(vect::ILLEGAL)),
            }
        }
        Exec::Stldsr => {
            let Ea::Immediate(imm) = d.src else { return Err(Cause::Raise(vect::ILLEGAL)) };
            push_long(cpu, mem, u32::from(cpu.sr.bits()))?;
            cpu.write_sr(imm as u16);
        }
        Exec::Link => {
            let Ea::AddrDirect(an) = d.src else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let Ea::Immediate(disp) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            push_long(cpu, mem, cpu.addr(an))?;
            let frame = cpu.a[7];
            cpu.set_addr(an, frame);
            cpu.a[7] = frame.wrapping_add(disp);
        }
        Exec::Unlk => {
            let Ea::AddrDirect(an) = d.src else { return Err(Cause::Raise(vect::ILLEGAL)) };
            cpu.a[7] = cpu.addr(an);
            let val = pop_long(cpu, mem)?;
            cpu.set_addr(an, val);
        }
        Exec::Clr => {
            let dst = resolve(cpu, d, &d.dst)?;
            cpu.sr.set_logic(0, size);
            write(cpu, mem, dst, size, 0)?;
        }
        Exec::Tst => {
            let src = resolve(cpu, d, &d.src)?;
            let val = read(cpu, mem, src, size)?;
            cpu.sr.set_logic(val, size);
        }
        Exec::Tas => {
            let dst = resolve(cpu, d, &d.dst)?;
            let val = read(cpu, mem, dst, Size::Byte)?;
            cpu.sr.set_logic(val, Size::Byte);
            write(cpu, mem, dst, Size::Byte, val | 0x80)?;
        }
        Exec::Scc => {
            let dst = resolve(cpu, d, &d.dst)?;
            let val = if cond_of(d.opword).holds(cpu.sr) { 0xFF } else { 0x00 };
            write(cpu, mem, dst, Size::Byte, val)?;
        }
        Exec::Swap => {
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let val = cpu.data(dn, Size::Long).rotate_left(16);
            cpu.set_data(dn, Size::Long, val);
            cpu.sr.set_logic(val, Size::Long);
        }
        Exec::Ext => {
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            // opmode: 010 byte->word, 011 word->long, 111 byte->long
            let val = match d.opword >> 6 & 0b111 {
                0b010 => Size::Byte.sign_extend(cpu.data(dn, Size::Byte)),
                0b011 => Size::Word.sign_extend(cpu.data(dn, Size::Word)),
                _ => Size::Byte.sign_extend(cpu.data(dn, Size::Byte)),
            };
            cpu.set_data(dn, size, val);
            cpu.sr.set_logic(val, size);
        }
        Exec::Add { sub } | Exec::AddI { sub } => {
            let src = resolve(cpu, d, &d.src)?;
            let s = read(cpu, mem, src, size)?;
            let dst = resolve(cpu, d, &d.dst)?;
            let dv = read(cpu, mem, dst, size)?;
            let res = if sub { dv.wrapping_sub(s) } else { dv.wrapping_add(s) };
            if sub {
                cpu.sr.set_sub(s, dv, res, size, ExtendRule::MirrorCarry, false);
            } else {
                cpu.sr.set_add(s, dv, res, size, false);
            }
            write(cpu, mem, dst, size, res)?;
        }
        Exec::AddQ { sub } => {
            let Ea::Immediate(s) = d.src else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let dst = resolve(cpu, d, &d.dst)?;
            // quick adds to an address register touch no flags
            if let Loc::Addr(an) = dst {
                let dv = cpu.addr(an);
                cpu.set_addr(an, if sub { dv.wrapping_sub(s) } else { dv.wrapping_add(s) });
            } else {
                let dv = read(cpu, mem, dst, size)?;
                let res = if sub { dv.wrapping_sub(s) } else { dv.wrapping_add(s) };
                if sub {
                    cpu.sr.set_sub(s, dv, res, size, ExtendRule::MirrorCarry, false);
                } else {
                    cpu.sr.set_add(s, dv, res, size, false);
                }
                write(cpu, mem, dst, size, res)?;
            }
        }
        Exec::AddA { sub } => {
            let src = resolve(cpu, d, &d.src)?;
            let s = read(cpu, mem, src, Size::Long)?;
            let Ea::AddrDirect(an) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let dv = cpu.addr(an);
            cpu.set_addr(an, if sub { dv.wrapping_sub(s) } else { dv.wrapping_add(s) });
        }
        Exec::AddX { sub } => {
            let (Ea::DataDirect(sy), Ea::DataDirect(dx)) = (d.src, d.dst) else {
                return Err(Cause::Raise(vect::ILLEGAL));
            };
            let s = cpu.data(sy, Size::Long);
            let dv = cpu.data(dx, Size::Long);
            let x = u32::from(cpu.sr.x());
            let res = if sub {
                dv.wrapping_sub(s).wrapping_sub(x)
            } else {
                dv.wrapping_add(s).wrapping_add(x)
            };
            if sub {
                cpu.sr.set_sub(s, dv, res, Size::Long, ExtendRule::MirrorCarry, true);
            } else {
                cpu.sr.set_add(s, dv, res, Size::Long, true);
            }
            cpu.set_data(dx, Size::Long, res);
        }
        Exec::Cmp | Exec::CmpI => {
            let src = resolve(cpu, d, &d.src)?;
            let s = read(cpu, mem, src, size)?;
            let dst = resolve(cpu, d, &d.dst)?;
            let dv = read(cpu, mem, dst, size)?;
            cpu.sr.set_sub(s, dv, dv.wrapping_sub(s), size, ExtendRule::Keep, false);
        }
        Exec::CmpA => {
            let src = resolve(cpu, d, &d.src)?;
            let mut s = read(cpu, mem, src, size)?;
            if size == Size::Word {
                s = Size::Word.sign_extend(s);
            }
            let Ea::AddrDirect(an) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let dv = cpu.addr(an);
            cpu.sr
                .set_sub(s, dv, dv.wrapping_sub(s), Size::Long, ExtendRule::Keep, false);
        }
        Exec::Neg { extend } => {
            let dst = resolve(cpu, d, &d.dst)?;
            let val = read(cpu, mem, dst, size)?;
            if extend {
                let x = u32::from(cpu.sr.x());
                let res = 0u32.wrapping_sub(val).wrapping_sub(x);
                cpu.sr.set_sub(val, 0, res, size, ExtendRule::MirrorCarry, true);
                write(cpu, mem, dst, size, res)?;
            } else {
                let res = 0u32.wrapping_sub(val);
                cpu.sr.set_neg(val, res, size, false);
                write(cpu, mem, dst, size, res)?;
            }
        }
        Exec::Not => {
            let dst = resolve(cpu, d, &d.dst)?;
            let val = !read(cpu, mem, dst, size)?;
            cpu.sr.set_logic(val, size);
            write(cpu, mem, dst, size, val)?;
        }
        Exec::Logic(op) | Exec::LogicI(op) => {
            let src = resolve(cpu, d, &d.src)?;
            let s = read(cpu, mem, src, size)?;
            let dst = resolve(cpu, d, &d.dst)?;
            let dv = read(cpu, mem, dst, size)?;
            let res = match op {
                LogicOp::And => dv & s,
                LogicOp::Or => dv | s,
                LogicOp::Eor => dv ^ s,
            };
            cpu.sr.set_logic(res, size);
            write(cpu, mem, dst, size, res)?;
        }
        Exec::MulW { signed } => {
            let src = resolve(cpu, d, &d.src)?;
            let s = read(cpu, mem, src, Size::Word)?;
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let dv = cpu.data(dn, Size::Word);
            let res = if signed {
                (i32::from(s as u16 as i16) * i32::from(dv as u16 as i16)) as u32
            } else {
                s * dv
            };
            cpu.set_data(dn, Size::Long, res);
            cpu.sr.set_logic(res, Size::Long);
        }
        Exec::MulL => {
            let src = resolve(cpu, d, &d.src)?;
            let s = read(cpu, mem, src, Size::Long)?;
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let res = cpu.data(dn, Size::Long).wrapping_mul(s);
            cpu.set_data(dn, Size::Long, res);
            cpu.sr.set_logic(res, Size::Long);
        }
        Exec::DivW { signed } => {
            let src = resolve(cpu, d, &d.src)?;
            let s = read(cpu, mem, src, Size::Word)?;
            if s == 0 {
                return Err(Cause::Raise(vect::DIV_ZERO));
            }
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let dividend = cpu.data(dn, Size::Long);
            if signed {
                let (nv, dv) = (i32::from(s as u16 as i16), dividend as i32);
                let q = dv.wrapping_div(nv);
                if !(-0x8000..=0x7FFF).contains(&q) {
                    cpu.sr.set_v(true);
                    cpu.sr.set_c(false);
                } else {
                    let r = dv.wrapping_rem(nv) as u32;
                    cpu.set_data(dn, Size::Long, r << 16 | q as u32 & 0xFFFF);
                    cpu.sr.set_logic(q as u32 & 0xFFFF, Size::Word);
                }
            } else {
                let q = dividend / s;
                if q > 0xFFFF {
                    cpu.sr.set_v(true);
                    cpu.sr.set_c(false);
                } else {
                    let r = dividend % s;
                    cpu.set_data(dn, Size::Long, r << 16 | q);
                    cpu.sr.set_logic(q, Size::Word);
                }
            }
        }
        Exec::DivL => {
            let src = resolve(cpu, d, &d.src)?;
            let s = read(cpu, mem, src, Size::Long)?;
            if s == 0 {
                return Err(Cause::Raise(vect::DIV_ZERO));
            }
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let signed = d.ext & 1 << 11 != 0;
            let want_rem = d.ext & 1 << 10 != 0;
            let dividend = cpu.data(dn, Size::Long);
            let res = if signed {
                let (nv, dv) = (s as i32, dividend as i32);
                if dv == i32::MIN && nv == -1 {
                    // quotient unrepresentable: flag and leave the register
                    cpu.sr.set_v(true);
                    cpu.sr.set_c(false);
                    return Ok(());
                }
                (if want_rem { dv.wrapping_rem(nv) } else { dv.wrapping_div(nv) }) as u32
            } else if want_rem {
                dividend % s
            } else {
                dividend / s
            };
            cpu.set_data(dn, Size::Long, res);
            cpu.sr.set_logic(res, Size::Long);
        }
        Exec::Shift { arith } => {
            let src = resolve(cpu, d, &d.src)?;
            let count = match src {
                Loc::Imm(v) => v,
                Loc::Data(dn) => cpu.data(dn, Size::Long) & 0x3F,
                _ => return Err(Cause::Raise(vect::ILLEGAL)),
            };
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let val = cpu.data(dn, Size::Long);
            if count == 0 {
                // count 0 clears C and V but leaves X alone
                cpu.sr.set_logic(val, Size::Long);
            } else {
                let left = d.opword & 1 << 8 != 0;
                let (res, carry) = match (left, arith) {
                    (true, _) => shl(val, count),
                    (false, false) => shr(val, count),
                    (false, true) => sar(val, count),
                };
                cpu.set_data(dn, Size::Long, res);
                cpu.sr.set_logic(res, Size::Long);
                cpu.sr.set_c(carry);
                cpu.sr.set_x(carry);
            }
        }
        Exec::BitOp { op, .. } => {
            let src = resolve(cpu, d, &d.src)?;
            let num = read(cpu, mem, src, Size::Long)?;
            let dst = resolve(cpu, d, &d.dst)?;
            let modulus = if size == Size::Long { 32 } else { 8 };
            let bit = 1u32 << (num % modulus);
            let val = read(cpu, mem, dst, size)?;
            cpu.sr.set_z(val & bit == 0);
            let new = match op {
                BitOp::Tst => return Ok(()),
                BitOp::Chg => val ^ bit,
                BitOp::Clr => val & !bit,
                BitOp::Set => val | bit,
            };
            write(cpu, mem, dst, size, new)?;
        }
        Exec::Branch { kind, .. } => {
            let Ea::Immediate(target) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let taken = match kind {
                BranchKind::Always => true,
                BranchKind::Sub => {
                    push_long(cpu, mem, cpu.pc)?;
                    true
                }
                BranchKind::Cond => cond_of(d.opword).holds(cpu.sr),
            };
            if taken {
                cpu.pc = target;
            }
        }
        Exec::Jmp => {
            let Loc::Mem(addr) = resolve(cpu, d, &d.src)? else {
                return Err(Cause::Raise(vect::ILLEGAL));
            };
            cpu.pc = addr;
        }
        Exec::Jsr => {
            let Loc::Mem(addr) = resolve(cpu, d, &d.src)? else {
                return Err(Cause::Raise(vect::ILLEGAL));
            };
            push_long(cpu, mem, cpu.pc)?;
            cpu.pc = addr;
        }
        Exec::Rts => {
            cpu.pc = pop_long(cpu, mem)?;
        }
        Exec::Rte => {
            let sp = cpu.a[7];
            let frame = mem.read(sp, Size::Long, cpu.mbar)?;
            let Some(fw) = crate::sim::exc::unpack_frame_word(frame) else {
                return Err(Cause::Raise(vect::FORMAT_ERROR));
            };
            let ret = mem.read(sp.wrapping_add(4), Size::Long, cpu.mbar)?;
            cpu.a[7] = sp.wrapping_add(8).wrapping_add(fw.misalign);
            cpu.write_sr(fw.sr);
            cpu.pc = ret;
        }
        Exec::Trap => {
            let Ea::Immediate(n) = d.src else { return Err(Cause::Raise(vect::ILLEGAL)) };
            return Err(Cause::Raise(vect::TRAP_BASE + n as u8));
        }
        Exec::Stop => {
            let Ea::Immediate(imm) = d.src else { return Err(Cause::Raise(vect::ILLEGAL)) };
            cpu.write_sr(imm as u16);
        }
        Exec::IllegalOp => return Err(Cause::Raise(vect::ILLEGAL)),
        Exec::Bitrev => {
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let val = cpu.data(dn, Size::Long).reverse_bits();
            cpu.set_data(dn, Size::Long, val);
        }
        Exec::Byterev => {
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let val = cpu.data(dn, Size::Long).swap_bytes();
            cpu.set_data(dn, Size::Long, val);
        }
        Exec::Ff1 => {
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let val = cpu.data(dn, Size::Long);
            // N and Z reflect the value searched, not the count
            cpu.sr.set_logic(val, Size::Long);
            cpu.set_data(dn, Size::Long, val.leading_zeros());
        }
        Exec::Sats => {
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let mut val = cpu.data(dn, Size::Long);
            if cpu.sr.v() {
                val = if val & 0x8000_0000 != 0 { 0x7FFF_FFFF } else { 0x8000_0000 };
                cpu.set_data(dn, Size::Long, val);
            }
            cpu.sr.set_logic(val, Size::Long);
        }
        Exec::Intouch => {
            let Loc::Mem(addr) = resolve(cpu, d, &d.src)? else {
                return Err(Cause::Raise(vect::ILLEGAL));
            };
            // a touch only has to prove the line is fetchable
            mem.read_word(addr & !1, cpu.mbar)?;
        }
        Exec::Wddata => {
            let src = resolve(cpu, d, &d.src)?;
            // captured by the debug module in hardware; the read's side
            // effects and faults are all that is observable here
            read(cpu, mem, src, size)?;
        }
        Exec::Wdebug => {
            let Loc::Mem(addr) = resolve(cpu, d, &d.src)? else {
                return Err(Cause::Raise(vect::ILLEGAL));
            };
            mem.read(addr, Size::Long, cpu.mbar)?;
            mem.read(addr.wrapping_add(4), Size::Long, cpu.mbar)?;
        }
        Exec::Mac => {
            let Ea::MacPair(ry, rx) = d.src else { return Err(Cause::Raise(vect::ILLEGAL)) };
            let product = mac_operand(cpu, ry, size) * mac_operand(cpu, rx, size);
            let shifted = match d.ext >> 9 & 0b11 {
                0b01 => product << 1,
                0b11 => product >> 1,
                _ => product,
            };
            let p = shifted as u32;
            cpu.acc = if d.ext & 1 << 8 != 0 {
                cpu.acc.wrapping_sub(p)
            } else {
                cpu.acc.wrapping_add(p)
            };
            cpu.sr.set_z_accumulate(cpu.acc, Size::Long);
        }
        Exec::MoveMacReg => match (&d.src, &d.dst) {
            (&Ea::Special(reg), general) => {
                let dst = resolve(cpu, d, general)?;
                write(cpu, mem, dst, Size::Long, mac_reg_read(cpu, reg))?;
            }
            (general, &Ea::Special(reg)) => {
                let src = resolve(cpu, d, general)?;
                let val = read(cpu, mem, src, Size::Long)?;
                mac_reg_write(cpu, reg, val);
            }
            _ => return Err(Cause::Raise(vect::ILLEGAL)),
        },
        Exec::Movclr => {
            let Ea::DataDirect(dn) = d.dst else { return Err(Cause::Raise(vect::ILLEGAL)) };
            cpu.set_data(dn, Size::Long, cpu.acc);
            cpu.acc = 0;
        }
        Exec::Nop | Exec::Tpf | Exec::Halt | Exec::Pulse => {}
        Exec::Filler => {
            return Err(Cause::Raise(match d.opword >> 12 {
                0xA => vect::LINE_A,
                0xF => vect::LINE_F,
                _ => vect::ILLEGAL,
            }))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::ea::SliceWords;
    use crate::inst::table::{registry, OpcodeMap};
    use crate::isa::{Profile, Tier};
    use crate::sim::mem::BankKind;

    fn machine() -> (Cpu, MemoryMap) {
        let mut mem = MemoryMap::new(0xE000_0000);
        mem.add_bank("ram", 0, 0x1_0000, BankKind::Normal).unwrap();
        let mut cpu = Cpu::new(Tier::C);
        cpu.a[7] = 0x8000;
        cpu.mbar = 0xF000_0000;
        (cpu, mem)
    }

    /// Decodes `words` as one instruction at `addr` via the full opcode map.
    fn decode_at(words: &[u16], addr: u32) -> Decoded {
        let map = OpcodeMap::build(Profile::FULL_C).unwrap();
        let id = map.lookup(words[0]);
        let mut stream = SliceWords::new(&words[1..], addr + 2);
        registry()
            .get(id)
            .decode(id, words[0], addr, &mut stream)
            .unwrap()
    }

    fn run(words: &[u16], cpu: &mut Cpu, mem: &mut MemoryMap) -> Result<(), Cause> {
        let d = decode_at(words, cpu.pc);
        cpu.pc = d.next_addr();
        execute(&d, cpu, mem)
    }

    #[test]
    fn moveq_sets_flags() {
        let (mut cpu, mut mem) = machine();
        cpu.pc = 0x1000;
        run(&[0x70FF], &mut cpu, &mut mem).unwrap(); // MOVEQ #-1,D0
        assert_eq!(cpu.d[0], 0xFFFF_FFFF);
        assert!(cpu.sr.n() && !cpu.sr.z());
        assert_eq!(cpu.pc, 0x1002);
    }

    #[test]
    fn add_carry_and_extend() {
        let (mut cpu, mut mem) = machine();
        cpu.d[0] = 0xFFFF_FFFF;
        cpu.d[1] = 1;
        run(&[0xD081], &mut cpu, &mut mem).unwrap(); // ADD.L D1,D0
        assert_eq!(cpu.d[0], 0);
        assert!(cpu.sr.c() && cpu.sr.x() && cpu.sr.z());
    }

    #[test]
    fn divw_by_zero_leaves_destination() {
        let (mut cpu, mut mem) = machine();
        cpu.d[0] = 0x1234_5678;
        cpu.d[1] = 0;
        let err = run(&[0x80C1], &mut cpu, &mut mem).unwrap_err(); // DIVU.W D1,D0
        assert_eq!(err, Cause::Raise(vect::DIV_ZERO));
        assert_eq!(cpu.d[0], 0x1234_5678);
    }

    #[test]
    fn divw_packs_remainder_and_quotient() {
        let (mut cpu, mut mem) = machine();
        cpu.d[0] = 100_007;
        cpu.d[1] = 10;
        run(&[0x80C1], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.d[0], 7 << 16 | 10_000);
        assert!(!cpu.sr.v());
    }

    #[test]
    fn divl_remainder_form() {
        let (mut cpu, mut mem) = machine();
        cpu.d[2] = 100_007;
        cpu.d[1] = 10;
        // REMU.L D1,D3:D2 modeled: ext word selects D2 and the remainder
        let ext = 2 << 12 | 1 << 10 | 0b011;
        run(&[0x4C41, ext], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.d[2], 7);
    }

    #[test]
    fn post_increment_steps_by_size() {
        let (mut cpu, mut mem) = machine();
        mem.write(0x2000, Size::Word, 0xBEEF, cpu.mbar).unwrap();
        cpu.a[0] = 0x2000;
        run(&[0x3018], &mut cpu, &mut mem).unwrap(); // MOVE.W (A0)+,D0
        assert_eq!(cpu.d[0] & 0xFFFF, 0xBEEF);
        assert_eq!(cpu.a[0], 0x2002);
    }

    #[test]
    fn byte_push_through_a7_keeps_alignment() {
        let (mut cpu, mut mem) = machine();
        cpu.d[0] = 0x42;
        run(&[0x1F00], &mut cpu, &mut mem).unwrap(); // MOVE.B D0,-(A7)
        assert_eq!(cpu.a[7], 0x8000 - 2);
    }

    #[test]
    fn conditional_branch() {
        let (mut cpu, mut mem) = machine();
        cpu.pc = 0x1000;
        cpu.sr.set_z(true);
        run(&[0x6704], &mut cpu, &mut mem).unwrap(); // BEQ.B +4
        assert_eq!(cpu.pc, 0x1006);
        cpu.pc = 0x1000;
        cpu.sr.set_z(false);
        run(&[0x6704], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.pc, 0x1002, "untaken branch falls through");
    }

    #[test]
    fn bsr_pushes_return_address() {
        let (mut cpu, mut mem) = machine();
        cpu.pc = 0x1000;
        run(&[0x6100, 0x0100], &mut cpu, &mut mem).unwrap(); // BSR.W +0x100
        assert_eq!(cpu.pc, 0x1102);
        assert_eq!(cpu.a[7], 0x8000 - 4);
        assert_eq!(mem.read(cpu.a[7], Size::Long, cpu.mbar).unwrap(), 0x1004);
    }

    #[test]
    fn rts_returns() {
        let (mut cpu, mut mem) = machine();
        cpu.pc = 0x1000;
        run(&[0x6100, 0x0100], &mut cpu, &mut mem).unwrap();
        run(&[0x4E75], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.pc, 0x1004);
        assert_eq!(cpu.a[7], 0x8000);
    }

    #[test]
    fn link_unlk_round_trip() {
        let (mut cpu, mut mem) = machine();
        cpu.a[6] = 0xAAAA_0001;
        run(&[0x4E56, 0xFFF8], &mut cpu, &mut mem).unwrap(); // LINK A6,#-8
        assert_eq!(cpu.a[6], 0x8000 - 4);
        assert_eq!(cpu.a[7], 0x8000 - 4 - 8);
        run(&[0x4E5E], &mut cpu, &mut mem).unwrap(); // UNLK A6
        assert_eq!(cpu.a[6], 0xAAAA_0001);
        assert_eq!(cpu.a[7], 0x8000);
    }

    #[test]
    fn movem_store_and_load() {
        let (mut cpu, mut mem) = machine();
        cpu.d[0] = 0x1111_1111;
        cpu.d[1] = 0x2222_2222;
        cpu.a[0] = 0x3333_3333;
        cpu.a[1] = 0x4000;
        // MOVEM.L D0-D1/A0,(A1)
        run(&[0x48D1, 0x0103], &mut cpu, &mut mem).unwrap();
        assert_eq!(mem.read(0x4000, Size::Long, cpu.mbar).unwrap(), 0x1111_1111);
        assert_eq!(mem.read(0x4008, Size::Long, cpu.mbar).unwrap(), 0x3333_3333);
        cpu.d[0] = 0;
        cpu.a[0] = 0;
        // MOVEM.L (A1),D0-D1/A0
        run(&[0x4CD1, 0x0103], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.d[0], 0x1111_1111);
        assert_eq!(cpu.a[0], 0x3333_3333);
        assert_eq!(cpu.a[1], 0x4000, "base register is not updated");
    }

    #[test]
    fn shift_carries_last_bit_out() {
        let (mut cpu, mut mem) = machine();
        cpu.d[0] = 0x8000_0001;
        run(&[0xE288], &mut cpu, &mut mem).unwrap(); // LSR.L #1,D0
        assert_eq!(cpu.d[0], 0x4000_0000);
        assert!(cpu.sr.c() && cpu.sr.x());
        cpu.d[1] = 0x8000_0001;
        run(&[0xE281], &mut cpu, &mut mem).unwrap(); // ASR.L #1,D1
        assert_eq!(cpu.d[1], 0xC000_0000);
    }

    #[test]
    fn btst_only_touches_z() {
        let (mut cpu, mut mem) = machine();
        cpu.d[0] = 0b100;
        cpu.d[1] = 2;
        cpu.sr.set_n(true);
        run(&[0x0300], &mut cpu, &mut mem).unwrap(); // BTST D1,D0
        assert!(!cpu.sr.z());
        assert!(cpu.sr.n(), "N survives a bit test");
        cpu.d[1] = 3;
        run(&[0x0300], &mut cpu, &mut mem).unwrap();
        assert!(cpu.sr.z());
    }

    #[test]
    fn rte_rejects_malformed_frame() {
        let (mut cpu, mut mem) = machine();
        mem.write(cpu.a[7], Size::Long, 0xDEAD_BEEF, cpu.mbar).unwrap();
        let err = run(&[0x4E73], &mut cpu, &mut mem).unwrap_err();
        assert_eq!(err, Cause::Raise(vect::FORMAT_ERROR));
    }

    #[test]
    fn rte_unwinds_an_exception_frame() {
        let (mut cpu, mut mem) = machine();
        cpu.vbr = 0;
        mem.write(4 * u32::from(vect::TRAP_BASE), Size::Long, 0x4000, cpu.mbar)
            .unwrap();
        mem.write(0x4000, Size::Word, 0x4E71, cpu.mbar).unwrap();
        cpu.a[7] = 0x8001; // force a misaligned entry adjustment
        let before_sr = cpu.sr.bits();
        crate::sim::exc::enter(&mut cpu, &mut mem, vect::TRAP_BASE, 0x1000, 0x1002).unwrap();
        cpu.pc = 0x4002;
        run(&[0x4E73], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.pc, 0x1002);
        assert_eq!(cpu.a[7], 0x8001);
        assert_eq!(cpu.sr.bits(), before_sr);
    }

    #[test]
    fn pc_relative_source() {
        let (mut cpu, mut mem) = machine();
        cpu.pc = 0x1000;
        mem.write(0x1012, Size::Long, 0xCAFE_F00D, cpu.mbar).unwrap();
        // MOVE.L 0x10(PC),D0 -- displacement measured from the ext word
        run(&[0x203A, 0x0010], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.d[0], 0xCAFE_F00D);
    }

    #[test]
    fn filler_classifies_its_own_line() {
        let (mut cpu, mut mem) = machine();
        assert_eq!(
            run(&[0x4AFB], &mut cpu, &mut mem).unwrap_err(),
            Cause::Raise(vect::ILLEGAL)
        );
        // unassigned A-line and F-line slots have their own vectors
        assert_eq!(
            run(&[0xAFFF], &mut cpu, &mut mem).unwrap_err(),
            Cause::Raise(vect::LINE_A)
        );
        assert_eq!(
            run(&[0xFFFF], &mut cpu, &mut mem).unwrap_err(),
            Cause::Raise(vect::LINE_F)
        );
    }

    #[test]
    fn mac_accumulates() {
        let (mut cpu, mut mem) = machine();
        cpu.d[1] = 3;
        cpu.d[2] = 5;
        // MAC.L D1,D2 (modeled encoding: opword A000|Rx<<8|Ry, ext bit 11)
        run(&[0xA201, 1 << 11], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.acc, 15);
        // MSAC.L subtracts
        run(&[0xA201, 1 << 11 | 1 << 8], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.acc, 0);
    }

    #[test]
    fn mac_zero_flag_only_clears() {
        let (mut cpu, mut mem) = machine();
        cpu.d[1] = 3;
        cpu.d[2] = 4;
        cpu.sr.set_z(true);
        run(&[0xA201, 1 << 11], &mut cpu, &mut mem).unwrap(); // MAC.L D1,D2
        assert_eq!(cpu.acc, 12);
        assert!(!cpu.sr.z(), "a nonzero accumulate clears Z");
        // subtracting back to zero must not set it again
        run(&[0xA201, 1 << 11 | 1 << 8], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.acc, 0);
        assert!(!cpu.sr.z());
    }

    #[test]
    fn movclr_clears_the_accumulator() {
        let (mut cpu, mut mem) = machine();
        cpu.acc = 0x55;
        run(&[0xA7C0], &mut cpu, &mut mem).unwrap(); // MOVCLR ACC,D3 modeled
        assert_eq!(cpu.d[3], 0x55);
        assert_eq!(cpu.acc, 0);
    }

    #[test]
    fn sats_saturates_on_overflow() {
        let (mut cpu, mut mem) = machine();
        cpu.d[0] = 0x8000_0001;
        cpu.sr.set_v(true);
        run(&[0x4C80], &mut cpu, &mut mem).unwrap(); // SATS D0
        assert_eq!(cpu.d[0], 0x7FFF_FFFF);
        cpu.d[0] = 0x8000_0001;
        cpu.sr.set_v(false);
        run(&[0x4C80], &mut cpu, &mut mem).unwrap();
        assert_eq!(cpu.d[0], 0x8000_0001, "no overflow, no change");
    }
}
