use crate::core::layout::Immediates;

/// Bit pattern Ruby uses for an immediate 0.0, which the flonum rotation can't express
pub const FLONUM_ZERO: u64 = 0x8000_0000_0000_0002;

/// The interpretation of a raw `VALUE` word, before any memory is read
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tagged {
    Nil,
    True,
    False,
    Undef,
    Symbol(u64),
    Fixnum(i64),
    Flonum(f64),
    Heap(usize),
}

/// Classifies a word without touching memory. The arms are tried top to bottom: the sentinels
/// first, then symbols, fixnums and flonums, and only then a heap pointer.
pub fn classify(word: u64, imm: &Immediates) -> Tagged {
    match word {
        w if w == imm.qnil => Tagged::Nil,
        w if w == imm.qtrue => Tagged::True,
        w if w == imm.qfalse => Tagged::False,
        w if w == imm.qundef => Tagged::Undef,
        w if w & 0xff == imm.symbol_flag => Tagged::Symbol(w >> imm.special_shift),
        w if w & imm.fixnum_flag != 0 => Tagged::Fixnum(fixnum_decode(w)),
        w if w & imm.flonum_mask == imm.flonum_flag => Tagged::Flonum(flonum_decode(w)),
        w => Tagged::Heap(w as usize),
    }
}

pub fn fixnum_decode(word: u64) -> i64 {
    (word as i64) >> 1
}

pub fn fixnum_encode(n: i64) -> u64 {
    ((n << 1) | 1) as u64
}

pub fn flonum_decode(word: u64) -> f64 {
    if word == FLONUM_ZERO {
        return 0.0;
    }
    let b63 = word >> 63;
    let t = (2 - b63) | (word & !0b11);
    f64::from_bits(t.rotate_right(3))
}

/// Encodes a double the way Ruby does when it fits in an immediate. Returns `None` for values
/// Ruby allocates as a heap `Float` instead (such as -0.0 and very large or small exponents).
pub fn flonum_encode(value: f64) -> Option<u64> {
    let bits = value.to_bits();
    let exponent_bits = (bits >> 60) & 0x7;
    if bits != 0x3000_0000_0000_0000 && (exponent_bits.wrapping_sub(3) & !0x01) == 0 {
        Some((bits.rotate_left(3) & !0x01) | 0x02)
    } else if bits == 0 {
        Some(FLONUM_ZERO)
    } else {
        None
    }
}
