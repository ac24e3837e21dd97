//! Assembling and disassembling.
//!
//! [`assemble`] is the front door from a mnemonic and operand descriptors to
//! machine words. It resolves the mnemonic against the variant registry
//! (peeling condition suffixes off the Bcc/Scc families and mapping the
//! remainder forms onto the long-divide encoding), tries every candidate
//! variant, and keeps the shortest successful encoding. Bits selected by the
//! mnemonic rather than the operands (shift direction, multiply/divide
//! signedness, the MSAC subtract flag) are patched in afterward.
//!
//! The output side is [`Program`]: the in-memory model of an assembled
//! binary, a list of code chunks plus an entry point and target tier. Its
//! byte-exact serialized form lives in [`encoding`].
//!
//! Disassembly is the `Display` impl on [`Decoded`], which renders Motorola
//! syntax from the registry's metadata and the decoded operands.

pub mod encoding;

use crate::ast::{EffectiveAddress, Size};
use crate::inst::table::registry;
use crate::inst::{BranchKind, Cond, Decoded, EncodeError, EncodedInst, Exec, Variant};
use crate::isa::Tier;
use crate::sim::mem::{MemErr, MemoryMap};

/// Error from [`assemble`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AsmErr {
    /// No variant answers to the mnemonic.
    UnknownMnemonic(String),
    /// The mnemonic exists, but no variant of it accepts the given size and
    /// operand combination. Carries the last candidate's refusal.
    BadOperands {
        /// The mnemonic as given.
        mnemonic: String,
        /// Why the final candidate refused.
        cause: EncodeError,
    },
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsmErr::UnknownMnemonic(m) => write!(f, "unknown mnemonic {m}"),
            AsmErr::BadOperands { mnemonic, cause } => {
                write!(f, "cannot encode {mnemonic}: {cause}")
            }
        }
    }
}
impl std::error::Error for AsmErr {}

/// A resolved mnemonic: the candidate variants plus everything the mnemonic
/// text itself decided.
struct Request {
    /// The name the registry was searched with (after alias mapping), used
    /// to detect when an alternate mnemonic was selected.
    looked: String,
    cond: Cond,
    /// Extension-word bits implied by the mnemonic (the remainder flag).
    ext_bits: u16,
}

fn resolve(mnemonic: &str) -> Option<Request> {
    let name = mnemonic.to_ascii_uppercase();
    // the remainder forms share the long-divide encoding with bit 10 set
    let (looked, ext_bits) = match name.as_str() {
        "REMU" => ("DIVU".to_string(), 1 << 10),
        "REMS" => ("DIVS".to_string(), 1 << 10),
        _ => (name, 0),
    };
    if !registry().lookup(&looked).is_empty() {
        return Some(Request { looked, cond: Cond::True, ext_bits });
    }
    // Bcc and Scc carry the condition in the mnemonic
    let split = if let Some(tail) = looked.strip_prefix('B') {
        Some(("Bcc", tail))
    } else {
        looked.strip_prefix('S').map(|tail| ("Scc", tail))
    };
    if let Some((family, tail)) = split {
        if let Some(cond) = Cond::from_suffix(tail) {
            return Some(Request { looked: family.to_string(), cond, ext_bits: 0 });
        }
    }
    None
}

/// Encodes one instruction.
///
/// `at` is the address the opcode word will occupy; branches measure their
/// displacement from it. `size` of `None` takes each candidate's default.
/// Operands an instruction does not have are passed as
/// [`EffectiveAddress::Implied`].
///
/// When several variants answer to the mnemonic (word against long
/// multiplies, the 8/16-bit against the 32-bit branch displacements), the
/// shortest successful encoding wins.
pub fn assemble(
    mnemonic: &str,
    size: Option<Size>,
    src: &EffectiveAddress,
    dst: &EffectiveAddress,
    at: u32,
) -> Result<EncodedInst, AsmErr> {
    let Some(req) = resolve(mnemonic) else {
        return Err(AsmErr::UnknownMnemonic(mnemonic.to_string()));
    };

    let reg = registry();
    let mut best: Option<(u32, EncodedInst, &Variant)> = None;
    let mut failure: Option<EncodeError> = None;
    for id in reg.lookup(&req.looked).iter() {
        let var = reg.get(id);
        if req.ext_bits != 0 && !matches!(var.exec, Exec::DivL) {
            // only the long form has a remainder flag
            continue;
        }
        let sz = size.unwrap_or(var.default_size);
        match var.encode(at, sz, src, dst, req.cond) {
            Ok(enc) => {
                let len = enc.byte_len();
                if best.as_ref().map_or(true, |(b, ..)| len < *b) {
                    best = Some((len, enc, var));
                }
            }
            Err(e) => failure = Some(e),
        }
    }

    match (best, failure) {
        (Some((_, mut enc, var)), _) => {
            let alt = var
                .alt_mnemonic
                .map_or(false, |alt| alt.eq_ignore_ascii_case(&req.looked));
            if alt {
                match var.exec {
                    // ASL/LSL: direction bit in the opcode word
                    Exec::Shift { .. } => enc.patch(0, 1 << 8),
                    // MULS.L/DIVS.L/REMS.L: sign bit in the extension word
                    Exec::MulL | Exec::DivL => enc.patch(1, 1 << 11),
                    // MSAC: subtract flag in the extension word
                    Exec::Mac => enc.patch(1, 1 << 8),
                    _ => {}
                }
            }
            if req.ext_bits != 0 {
                enc.patch(1, req.ext_bits);
            }
            Ok(enc)
        }
        (None, Some(cause)) => Err(AsmErr::BadOperands { mnemonic: mnemonic.to_string(), cause }),
        (None, None) => Err(AsmErr::UnknownMnemonic(mnemonic.to_string())),
    }
}

impl std::fmt::Display for Decoded {
    /// Renders Motorola syntax. Unclaimed opcodes render as `DC.W` data.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let var = registry().get(self.variant);
        if matches!(var.exec, Exec::Filler) {
            return write!(f, "DC.W 0x{:04X}", self.opword);
        }

        let cond_name = |head: &str| {
            let cond = Cond::from_bits((self.opword >> 8) as u8);
            format!("{head}{}", cond.suffix())
        };
        let alt = var.alt_mnemonic.unwrap_or(var.mnemonic);
        let name = match var.exec {
            Exec::Branch { kind: BranchKind::Cond, .. } => cond_name("B"),
            Exec::Scc => cond_name("S"),
            Exec::Shift { .. } if self.opword & 1 << 8 != 0 => alt.to_string(),
            Exec::MulL if self.ext & 1 << 11 != 0 => alt.to_string(),
            Exec::DivL => {
                let signed = self.ext & 1 << 11 != 0;
                match (self.ext & 1 << 10 != 0, signed) {
                    (false, false) => "DIVU",
                    (false, true) => "DIVS",
                    (true, false) => "REMU",
                    (true, true) => "REMS",
                }
                .to_string()
            }
            Exec::Mac if self.ext & 1 << 8 != 0 => alt.to_string(),
            _ => var.mnemonic.to_string(),
        };
        f.write_str(&name)?;

        // show the size only when the family actually encodes one
        let encodable = [Size::Byte, Size::Word, Size::Long]
            .iter()
            .filter(|s| var.sizes.contains(**s))
            .count();
        if encodable > 1 {
            write!(f, "{}", self.size)?;
        }

        // branch targets read better as addresses than as immediates
        if let (Exec::Branch { .. }, EffectiveAddress::Immediate(target)) = (&var.exec, &self.dst)
        {
            return write!(f, " 0x{target:08X}");
        }

        let mut sep = " ";
        for ea in [&self.src, &self.dst] {
            if matches!(ea, EffectiveAddress::Implied) {
                continue;
            }
            write!(f, "{sep}{ea}")?;
            sep = ", ";
        }
        Ok(())
    }
}

/// An assembled binary: entry point, target ISA tier, and code chunks.
///
/// This is the in-memory form of the persisted container (see [`encoding`]).
/// Chunks are kept in insertion order; [`Program::push`] merges words that
/// land directly after the previous chunk, so straight-line assembly
/// produces one chunk per contiguous region.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Program {
    /// Initial program counter.
    pub entry: u32,
    /// The ISA revision the program targets.
    pub tier: Tier,
    chunks: Vec<Chunk>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
struct Chunk {
    addr: u32,
    bytes: Vec<u8>,
}
impl Chunk {
    fn end(&self) -> u32 {
        self.addr.wrapping_add(self.bytes.len() as u32)
    }
}

impl Program {
    /// An empty program.
    pub fn new(entry: u32, tier: Tier) -> Program {
        Program { entry, tier, chunks: Vec::new() }
    }

    /// Appends an encoded instruction at `addr`.
    pub fn push(&mut self, addr: u32, inst: &EncodedInst) {
        let mut bytes = Vec::new();
        inst.write_bytes(&mut bytes);
        self.push_bytes(addr, &bytes);
    }

    /// Appends raw bytes at `addr`, merging with the last chunk when
    /// contiguous.
    pub fn push_bytes(&mut self, addr: u32, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        match self.chunks.last_mut() {
            Some(last) if last.end() == addr => last.bytes.extend_from_slice(bytes),
            _ => self.chunks.push(Chunk { addr, bytes: bytes.to_vec() }),
        }
    }

    /// The code chunks, as (start address, bytes) pairs.
    pub fn block_iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.chunks.iter().map(|c| (c.addr, c.bytes.as_slice()))
    }

    /// Seeds a memory map with every chunk.
    pub fn load_into(&self, mem: &mut MemoryMap) -> Result<(), MemErr> {
        for (addr, bytes) in self.block_iter() {
            mem.load(addr, bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AddrReg, DataReg, MacHalf, MacReg};
    use crate::inst::ea::SliceWords;
    use crate::inst::table::OpcodeMap;
    use crate::isa::Profile;
    use EffectiveAddress as Ea;

    fn words_of(enc: &EncodedInst) -> Vec<u16> {
        enc.as_slice().to_vec()
    }

    fn disasm(words: &[u16]) -> String {
        let map = OpcodeMap::build(Profile::FULL_C).unwrap();
        let id = map.lookup(words[0]);
        let var = registry().get(id);
        let mut stream = SliceWords::new(&words[1..], 2);
        let d = var.decode(id, words[0], 0, &mut stream).unwrap();
        d.to_string()
    }

    #[test]
    fn moveq_round_trip() {
        let enc = assemble(
            "MOVEQ",
            None,
            &Ea::Immediate(-1i32 as u32),
            &Ea::DataDirect(DataReg(0)),
            0,
        )
        .unwrap();
        assert_eq!(words_of(&enc), vec![0x70FF]);
        assert_eq!(disasm(&[0x70FF]), "MOVEQ #-1, D0");
    }

    #[test]
    fn move_sizes_and_modes() {
        let enc = assemble(
            "move",
            Some(Size::Word),
            &Ea::PostIncr(AddrReg(0)),
            &Ea::DataDirect(DataReg(0)),
            0,
        )
        .unwrap();
        assert_eq!(words_of(&enc), vec![0x3018]);
        assert_eq!(disasm(&[0x3018]), "MOVE.W (A0)+, D0");
    }

    #[test]
    fn condition_suffixes() {
        // BEQ to the next-next word: 8-bit displacement form
        let enc = assemble("BEQ", None, &Ea::Implied, &Ea::Immediate(0x1004), 0x1000).unwrap();
        assert_eq!(words_of(&enc), vec![0x6702]);
        assert_eq!(disasm(&[0x6702]), "BEQ.B 0x00000004");

        let enc = assemble("SNE", None, &Ea::Implied, &Ea::DataDirect(DataReg(3)), 0).unwrap();
        assert_eq!(words_of(&enc), vec![0x56C3]);
        assert_eq!(disasm(&[0x56C3]), "SNE D3");
    }

    #[test]
    fn branch_width_is_chosen_by_distance() {
        // near: the 8-bit form wins
        let near = assemble("BRA", None, &Ea::Implied, &Ea::Immediate(0x10), 0).unwrap();
        assert_eq!(words_of(&near), vec![0x600E]);
        // far: only the 32-bit form can reach
        let far = assemble("BRA", None, &Ea::Implied, &Ea::Immediate(0x0010_0000), 0).unwrap();
        assert_eq!(words_of(&far), vec![0x60FF, 0x000F, 0xFFFE]);
    }

    #[test]
    fn shift_direction_comes_from_the_mnemonic() {
        let one = Ea::Immediate(1);
        let d0 = Ea::DataDirect(DataReg(0));
        let asr = assemble("ASR", None, &one, &d0, 0).unwrap();
        let asl = assemble("ASL", None, &one, &d0, 0).unwrap();
        assert_eq!(words_of(&asr), vec![0xE280]);
        assert_eq!(words_of(&asl), vec![0xE380]);
        assert_eq!(disasm(&[0xE380]), "ASL #1, D0");
    }

    #[test]
    fn long_divide_family_aliases() {
        let d1 = Ea::DataDirect(DataReg(1));
        let d2 = Ea::DataDirect(DataReg(2));
        let remu = assemble("REMU", Some(Size::Long), &d1, &d2, 0).unwrap();
        assert_eq!(words_of(&remu), vec![0x4C41, 0x2400]);
        assert_eq!(disasm(&[0x4C41, 0x2400]), "REMU D1, D2");

        let divs = assemble("DIVS", Some(Size::Long), &d1, &d2, 0).unwrap();
        assert_eq!(words_of(&divs), vec![0x4C41, 0x2800]);

        // the word form is still reachable under the same mnemonic
        let divs_w = assemble("DIVS", Some(Size::Word), &d1, &d2, 0).unwrap();
        assert_eq!(words_of(&divs_w), vec![0x85C1]);
    }

    #[test]
    fn msac_sets_the_subtract_flag() {
        let pair = Ea::MacPair(
            MacReg { reg: 1, half: MacHalf::Lower },
            MacReg { reg: 2, half: MacHalf::Lower },
        );
        let mac = assemble("MAC", Some(Size::Long), &pair, &Ea::Implied, 0).unwrap();
        let msac = assemble("MSAC", Some(Size::Long), &pair, &Ea::Implied, 0).unwrap();
        assert_eq!(words_of(&mac), vec![0xA201, 0x0800]);
        assert_eq!(words_of(&msac), vec![0xA201, 0x0900]);
        assert_eq!(disasm(&[0xA201, 0x0900]), "MSAC.L D1.L, D2.L");
    }

    #[test]
    fn rejections_name_the_problem() {
        assert_eq!(
            assemble("XYZZY", None, &Ea::Implied, &Ea::Implied, 0),
            Err(AsmErr::UnknownMnemonic("XYZZY".to_string()))
        );
        let err = assemble(
            "CLR",
            Some(Size::Long),
            &Ea::Implied,
            &Ea::AddrDirect(AddrReg(1)),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, AsmErr::BadOperands { .. }));
    }

    #[test]
    fn filler_renders_as_data() {
        assert_eq!(disasm(&[0x4AFB]), "DC.W 0x4AFB");
    }

    #[test]
    fn chunks_merge_when_contiguous() {
        let mut prog = Program::new(0x1000, Tier::C);
        let a = assemble("NOP", None, &Ea::Implied, &Ea::Implied, 0x1000).unwrap();
        let b = assemble("RTS", None, &Ea::Implied, &Ea::Implied, 0x1002).unwrap();
        prog.push(0x1000, &a);
        prog.push(0x1002, &b);
        prog.push_bytes(0x2000, &[0xDE, 0xAD]);
        let blocks: Vec<_> = prog.block_iter().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], (0x1000, &[0x4E, 0x71, 0x4E, 0x75][..]));
        assert_eq!(blocks[1], (0x2000, &[0xDE, 0xAD][..]));
    }
}
