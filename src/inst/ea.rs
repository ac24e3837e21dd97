//! Encoding and decoding of effective addresses.
//!
//! The standard operand field of an instruction word is six bits: a 3-bit
//! mode and a 3-bit register number. Mode 7 overloads the register field to
//! select the absolute, PC-relative, and immediate modes. Some modes pull one
//! or two extension words from the instruction stream.
//!
//! Both directions share [`EffectiveAddress`], so for every representable
//! operand `decode(encode(ea)) == ea`.
//!
//! ```text
//! mode reg   operand              extension words
//!  000  n    Dn                   -
//!  001  n    An                   -
//!  010  n    (An)                 -
//!  011  n    (An)+                -
//!  100  n    -(An)                -
//!  101  n    d16(An)              1
//!  110  n    d8(An,Xi.L*SF)       1
//!  111  0    (xxx).W              1 (sign-extended)
//!  111  1    (xxx).L              2
//!  111  2    d16(PC)              1
//!  111  3    d8(PC,Xi.L*SF)       1
//!  111  4    #imm                 1 or 2, per size
//! ```

use crate::ast::{
    AddrReg, DataReg, EffectiveAddress, Index, IndexReg, Scale, Size,
};
use crate::sim::mem::MemErr;

/// A cursor over the instruction stream, yielding successive 16-bit words.
///
/// The decoder pulls extension words through this; implementations back it
/// with simulated memory (the execute path) or a plain slice (the
/// disassembler and the assembler's own tests).
pub trait WordStream {
    /// The address the next word would be read from.
    fn here(&self) -> u32;
    /// Reads one word and advances.
    fn take(&mut self) -> Result<u16, MemErr>;
}

/// A [`WordStream`] over a slice of already-fetched words.
pub struct SliceWords<'a> {
    words: &'a [u16],
    base: u32,
    pos: usize,
}
impl<'a> SliceWords<'a> {
    /// Creates a stream over `words`, where `words[0]` sits at address `base`.
    pub fn new(words: &'a [u16], base: u32) -> Self {
        Self { words, base, pos: 0 }
    }
    /// How many words have been consumed.
    pub fn consumed(&self) -> usize {
        self.pos
    }
}
impl WordStream for SliceWords<'_> {
    fn here(&self) -> u32 {
        self.base + 2 * self.pos as u32
    }
    fn take(&mut self) -> Result<u16, MemErr> {
        let w = self.words.get(self.pos).copied().ok_or(MemErr::Unmapped { addr: self.here() })?;
        self.pos += 1;
        Ok(w)
    }
}

/// Error from encoding or decoding an effective address.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EaError {
    /// The mode/register bit pattern has no defined meaning.
    IllegalMode {
        /// The 3-bit mode field.
        mode: u8,
        /// The 3-bit register field.
        reg: u8,
    },
    /// Fetching an extension word failed.
    Fetch(MemErr),
    /// The operand cannot be expressed in a standard mode/register field.
    ///
    /// Hitting this means the caller asked a variant to encode an operand
    /// kind its mode set should already have ruled out.
    NotEncodable,
}
impl From<MemErr> for EaError {
    fn from(e: MemErr) -> Self {
        EaError::Fetch(e)
    }
}
impl std::fmt::Display for EaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EaError::IllegalMode { mode, reg } => {
                write!(f, "illegal addressing mode {mode}/{reg}")
            }
            EaError::Fetch(e) => write!(f, "extension word fetch failed: {e}"),
            EaError::NotEncodable => {
                write!(f, "operand has no standard mode/register encoding")
            }
        }
    }
}
impl std::error::Error for EaError {}

/// The extension words one operand contributes, in stream order.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct ExtWords {
    buf: [u16; 2],
    len: u8,
}
impl ExtWords {
    fn push(&mut self, w: u16) {
        self.buf[usize::from(self.len)] = w;
        self.len += 1;
    }
    /// The words as a slice.
    pub fn as_slice(&self) -> &[u16] {
        &self.buf[..usize::from(self.len)]
    }
}

// brief extension word fields
const EXT_IDX_ADDR: u16 = 1 << 15;
const EXT_IDX_LONG: u16 = 1 << 11;
const EXT_FULL_FORMAT: u16 = 1 << 8;

fn decode_index(ext: u16) -> Option<Index> {
    // only the brief format with a long index exists on this family
    if ext & EXT_FULL_FORMAT != 0 || ext & EXT_IDX_LONG == 0 {
        return None;
    }
    let n = (ext >> 12 & 0b111) as u8;
    let reg = if ext & EXT_IDX_ADDR != 0 {
        IndexReg::Addr(AddrReg(n))
    } else {
        IndexReg::Data(DataReg(n))
    };
    Some(Index { reg, scale: Scale::from_bits(u32::from(ext) >> 9) })
}

fn encode_index(index: Index, disp: i8) -> u16 {
    let (da, n) = match index.reg {
        IndexReg::Data(r) => (0, u16::from(r.reg_no())),
        IndexReg::Addr(r) => (EXT_IDX_ADDR, u16::from(r.reg_no())),
    };
    da | n << 12 | EXT_IDX_LONG | (index.scale.log2() as u16) << 9 | u16::from(disp as u8)
}

/// Decodes a mode/register field pair into an [`EffectiveAddress`], pulling
/// extension words from `stream` as the mode requires.
///
/// `size` determines how many words an immediate operand occupies; it plays
/// no other role.
pub fn decode(
    mode: u8,
    reg: u8,
    size: Size,
    stream: &mut impl WordStream,
) -> Result<EffectiveAddress, EaError> {
    let illegal = EaError::IllegalMode { mode, reg };
    let areg = AddrReg(reg);
    match mode {
        0 => Ok(EffectiveAddress::DataDirect(DataReg(reg))),
        1 => Ok(EffectiveAddress::AddrDirect(areg)),
        2 => Ok(EffectiveAddress::Indirect(areg)),
        3 => Ok(EffectiveAddress::PostIncr(areg)),
        4 => Ok(EffectiveAddress::PreDecr(areg)),
        5 => {
            let d = stream.take()? as i16;
            Ok(EffectiveAddress::Displacement(areg, d))
        }
        6 => {
            let ext = stream.take()?;
            let index = decode_index(ext).ok_or(illegal)?;
            Ok(EffectiveAddress::Indexed(areg, index, ext as u8 as i8))
        }
        7 => match reg {
            0 => {
                let w = stream.take()?;
                Ok(EffectiveAddress::AbsShort(Size::Word.sign_extend(u32::from(w))))
            }
            1 => {
                let hi = stream.take()?;
                let lo = stream.take()?;
                Ok(EffectiveAddress::AbsLong(u32::from(hi) << 16 | u32::from(lo)))
            }
            2 => {
                let d = stream.take()? as i16;
                Ok(EffectiveAddress::PcDisplacement(d))
            }
            3 => {
                let ext = stream.take()?;
                let index = decode_index(ext).ok_or(illegal)?;
                Ok(EffectiveAddress::PcIndexed(index, ext as u8 as i8))
            }
            4 => {
                let v = match size {
                    Size::Byte => u32::from(stream.take()? as u8),
                    Size::Word => u32::from(stream.take()?),
                    Size::Long => {
                        let hi = stream.take()?;
                        let lo = stream.take()?;
                        u32::from(hi) << 16 | u32::from(lo)
                    }
                };
                Ok(EffectiveAddress::Immediate(v))
            }
            _ => Err(illegal),
        },
        _ => Err(illegal),
    }
}

/// Encodes an [`EffectiveAddress`] into its mode/register field pair and the
/// extension words it contributes.
///
/// `size` determines how many words an immediate occupies. Operands with no
/// standard encoding (register lists, named control registers, MAC pairs,
/// implied) report [`EaError::NotEncodable`]; variants using those carry them
/// in their own dedicated fields.
pub fn encode(
    ea: &EffectiveAddress,
    size: Size,
) -> Result<(u8, u8, ExtWords), EaError> {
    let mut ext = ExtWords::default();
    let (mode, reg) = match *ea {
        EffectiveAddress::DataDirect(r) => (0, r.reg_no()),
        EffectiveAddress::AddrDirect(r) => (1, r.reg_no()),
        EffectiveAddress::Indirect(r) => (2, r.reg_no()),
        EffectiveAddress::PostIncr(r) => (3, r.reg_no()),
        EffectiveAddress::PreDecr(r) => (4, r.reg_no()),
        EffectiveAddress::Displacement(r, d) => {
            ext.push(d as u16);
            (5, r.reg_no())
        }
        EffectiveAddress::Indexed(r, index, d) => {
            ext.push(encode_index(index, d));
            (6, r.reg_no())
        }
        EffectiveAddress::AbsShort(a) => {
            ext.push(a as u16);
            (7, 0)
        }
        EffectiveAddress::AbsLong(a) => {
            ext.push((a >> 16) as u16);
            ext.push(a as u16);
            (7, 1)
        }
        EffectiveAddress::PcDisplacement(d) => {
            ext.push(d as u16);
            (7, 2)
        }
        EffectiveAddress::PcIndexed(index, d) => {
            ext.push(encode_index(index, d));
            (7, 3)
        }
        EffectiveAddress::Immediate(v) => {
            match size {
                Size::Byte => ext.push(u16::from(v as u8)),
                Size::Word => ext.push(v as u16),
                Size::Long => {
                    ext.push((v >> 16) as u16);
                    ext.push(v as u16);
                }
            }
            (7, 4)
        }
        EffectiveAddress::Special(_)
        | EffectiveAddress::RegList(_)
        | EffectiveAddress::MacPair(..)
        | EffectiveAddress::Implied => return Err(EaError::NotEncodable),
    };
    Ok((mode, reg, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::reg_consts::*;

    fn round_trip(ea: EffectiveAddress, size: Size) {
        let (mode, reg, ext) = encode(&ea, size).unwrap();
        let mut stream = SliceWords::new(ext.as_slice(), 0x1000);
        let back = decode(mode, reg, size, &mut stream).unwrap();
        assert_eq!(back, ea, "mode {mode}/{reg}");
        assert_eq!(stream.consumed(), ext.as_slice().len());
    }

    #[test]
    fn round_trips_all_modes() {
        let idx = Index { reg: IndexReg::Data(D3), scale: Scale::Four };
        let aidx = Index { reg: IndexReg::Addr(A5), scale: Scale::Eight };
        for size in [Size::Byte, Size::Word, Size::Long] {
            round_trip(EffectiveAddress::DataDirect(D5), size);
            round_trip(EffectiveAddress::AddrDirect(A2), size);
            round_trip(EffectiveAddress::Indirect(A0), size);
            round_trip(EffectiveAddress::PostIncr(SP), size);
            round_trip(EffectiveAddress::PreDecr(A6), size);
            round_trip(EffectiveAddress::Displacement(A1, -300), size);
            round_trip(EffectiveAddress::Indexed(A4, idx, -5), size);
            round_trip(EffectiveAddress::Indexed(A4, aidx, 127), size);
            round_trip(EffectiveAddress::AbsLong(0xDEAD_BEEF), size);
            round_trip(EffectiveAddress::PcDisplacement(-2), size);
            round_trip(EffectiveAddress::PcIndexed(idx, -128), size);
        }
        round_trip(EffectiveAddress::Immediate(0x7F), Size::Byte);
        round_trip(EffectiveAddress::Immediate(0xBEEF), Size::Word);
        round_trip(EffectiveAddress::Immediate(u32::MAX), Size::Long);
    }

    #[test]
    fn abs_short_sign_extends() {
        let mut stream = SliceWords::new(&[0x8000], 0);
        let ea = decode(7, 0, Size::Word, &mut stream).unwrap();
        assert_eq!(ea, EffectiveAddress::AbsShort(0xFFFF_8000));
        // and the sign-extended form re-encodes to the same word
        let (_, _, ext) = encode(&ea, Size::Word).unwrap();
        assert_eq!(ext.as_slice(), &[0x8000]);
    }

    #[test]
    fn illegal_mode_bits() {
        let mut stream = SliceWords::new(&[], 0);
        assert_eq!(
            decode(7, 5, Size::Word, &mut stream),
            Err(EaError::IllegalMode { mode: 7, reg: 5 })
        );
        // full-format extension words do not exist on this family
        let mut stream = SliceWords::new(&[EXT_FULL_FORMAT | EXT_IDX_LONG], 0);
        assert!(matches!(
            decode(6, 0, Size::Word, &mut stream),
            Err(EaError::IllegalMode { mode: 6, reg: 0 })
        ));
        // nor are word-sized index registers
        let mut stream = SliceWords::new(&[0x3000], 0);
        assert!(decode(6, 2, Size::Long, &mut stream).is_err());
    }

    #[test]
    fn truncated_stream_reports_fetch() {
        let mut stream = SliceWords::new(&[0x1234], 0x2000);
        assert!(matches!(
            decode(7, 1, Size::Long, &mut stream),
            Err(EaError::Fetch(MemErr::Unmapped { addr: 0x2002 }))
        ));
    }

    #[test]
    fn non_encodable_operands() {
        assert_eq!(
            encode(&EffectiveAddress::RegList(0x00FF), Size::Long),
            Err(EaError::NotEncodable)
        );
        assert_eq!(encode(&EffectiveAddress::Implied, Size::Long), Err(EaError::NotEncodable));
    }
}
