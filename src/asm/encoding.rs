//! The persisted binary-program container.
//!
//! The format is byte-exact for interoperability with existing saved
//! programs. All multi-byte integers are big-endian:
//!
//! ```text
//! "CFX\x1A"            4-byte magic
//! version   u32        format version, currently 1
//! entry     u32        initial program counter
//! tier      u32        target ISA revision (0=A, 1=A+, 2=B, 3=C)
//! chunk*               tagged chunks
//! 0xFF                 end marker
//!
//! chunk: 0x01 | addr u32 | len u32 | len bytes of code
//! ```

use crate::asm::Program;
use crate::isa::Tier;

/// The container magic.
pub const MAGIC: [u8; 4] = *b"CFX\x1A";
/// The current format version.
pub const VERSION: u32 = 1;

const TAG_CODE: u8 = 0x01;
const TAG_END: u8 = 0xFF;

/// Error from [`deserialize`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ContainerErr {
    /// The magic bytes are not the container magic.
    BadMagic,
    /// A version this reader does not understand.
    UnsupportedVersion(u32),
    /// A tier code outside the defined revisions.
    BadTier(u32),
    /// A chunk tag this reader does not understand.
    BadTag(u8),
    /// The byte stream ended inside a field.
    Truncated,
}
impl std::fmt::Display for ContainerErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerErr::BadMagic => f.write_str("not a program container (bad magic)"),
            ContainerErr::UnsupportedVersion(v) => write!(f, "unsupported container version {v}"),
            ContainerErr::BadTier(t) => write!(f, "undefined ISA tier code {t}"),
            ContainerErr::BadTag(t) => write!(f, "undefined chunk tag 0x{t:02X}"),
            ContainerErr::Truncated => f.write_str("container truncated"),
        }
    }
}
impl std::error::Error for ContainerErr {}

fn tier_code(tier: Tier) -> u32 {
    match tier {
        Tier::A => 0,
        Tier::APlus => 1,
        Tier::B => 2,
        Tier::C => 3,
    }
}
fn tier_from(code: u32) -> Option<Tier> {
    match code {
        0 => Some(Tier::A),
        1 => Some(Tier::APlus),
        2 => Some(Tier::B),
        3 => Some(Tier::C),
        _ => None,
    }
}

/// Writes a program into its container byte form.
pub fn serialize(prog: &Program) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&prog.entry.to_be_bytes());
    out.extend_from_slice(&tier_code(prog.tier).to_be_bytes());
    for (addr, bytes) in prog.block_iter() {
        out.push(TAG_CODE);
        out.extend_from_slice(&addr.to_be_bytes());
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(bytes);
    }
    out.push(TAG_END);
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
}
impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ContainerErr> {
        if self.bytes.len() < len {
            return Err(ContainerErr::Truncated);
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }
    fn u8(&mut self) -> Result<u8, ContainerErr> {
        Ok(self.take(1)?[0])
    }
    fn u32(&mut self) -> Result<u32, ContainerErr> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Reads a program back from its container byte form.
pub fn deserialize(bytes: &[u8]) -> Result<Program, ContainerErr> {
    let mut r = Reader { bytes };
    if r.take(4)? != MAGIC {
        return Err(ContainerErr::BadMagic);
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(ContainerErr::UnsupportedVersion(version));
    }
    let entry = r.u32()?;
    let tier_raw = r.u32()?;
    let tier = tier_from(tier_raw).ok_or(ContainerErr::BadTier(tier_raw))?;

    let mut prog = Program::new(entry, tier);
    loop {
        match r.u8()? {
            TAG_END => break,
            TAG_CODE => {
                let addr = r.u32()?;
                let len = r.u32()? as usize;
                prog.push_bytes(addr, r.take(len)?);
            }
            tag => return Err(ContainerErr::BadTag(tag)),
        }
    }
    Ok(prog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        let mut prog = Program::new(0x1000, Tier::B);
        prog.push_bytes(0x1000, &[0x4E, 0x71, 0x4E, 0x75]);
        prog.push_bytes(0x8000, &[0xCA, 0xFE]);
        prog
    }

    #[test]
    fn byte_exact_layout() {
        let bytes = serialize(&sample());
        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            b'C', b'F', b'X', 0x1A,
            0, 0, 0, 1,               // version
            0, 0, 0x10, 0,            // entry
            0, 0, 0, 2,               // tier B
            0x01, 0, 0, 0x10, 0, 0, 0, 0, 4, 0x4E, 0x71, 0x4E, 0x75,
            0x01, 0, 0, 0x80, 0, 0, 0, 0, 2, 0xCA, 0xFE,
            0xFF,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn round_trip() {
        let prog = sample();
        assert_eq!(deserialize(&serialize(&prog)).unwrap(), prog);
    }

    #[test]
    fn rejections() {
        let good = serialize(&sample());
        assert_eq!(deserialize(b"ELF\x1A....."), Err(ContainerErr::BadMagic));
        assert_eq!(deserialize(&good[..good.len() - 3]), Err(ContainerErr::Truncated));

        let mut wrong_version = good.clone();
        wrong_version[7] = 9;
        assert_eq!(deserialize(&wrong_version), Err(ContainerErr::UnsupportedVersion(9)));

        let mut wrong_tier = good.clone();
        wrong_tier[15] = 7;
        assert_eq!(deserialize(&wrong_tier), Err(ContainerErr::BadTier(7)));

        let mut wrong_tag = good;
        wrong_tag[16] = 0x02;
        assert_eq!(deserialize(&wrong_tag), Err(ContainerErr::BadTag(0x02)));
    }
}
