//! HFS+ catalog name ordering.
//!
//! Case-insensitive volumes order names with Apple's FastUnicodeCompare:
//! each UTF-16 unit is folded through a two-level lower-case table, units
//! that fold to zero are ignored, and NUL folds to 0xFFFF so it sorts last.
//! Case-sensitive (HFSX binary) volumes compare raw code units.

use std::cmp::Ordering;

/// Fold a unit the way the first-level page index and the per-page tables
/// of the lower-case table do. Pages without a table map to themselves.
pub fn fold(c: u16) -> u16 {
    match c >> 8 {
        0x00 => fold_latin1(c),
        0x01 => fold_latin_extended(c),
        0x03 => fold_greek(c),
        0x04 => fold_cyrillic(c),
        0x05 => match c {
            0x0531..=0x0556 => c + 0x30,
            _ => c,
        },
        0x10 => match c {
            0x10A0..=0x10C5 => c + 0x30,
            _ => c,
        },
        0x20 => match c {
            0x200C..=0x200F | 0x202A..=0x202E | 0x206A..=0x206F => 0,
            _ => c,
        },
        0x21 => match c {
            0x2160..=0x216F => c + 0x10,
            _ => c,
        },
        0xFE => match c {
            0xFEFF => 0,
            _ => c,
        },
        0xFF => match c {
            0xFF21..=0xFF3A => c + 0x20,
            _ => c,
        },
        _ => c,
    }
}

fn fold_latin1(c: u16) -> u16 {
    match c {
        0x0000 => 0xFFFF,
        0x0041..=0x005A => c + 0x20,
        0x00C6 | 0x00D0 | 0x00D8 | 0x00DE => c + 0x20,
        _ => c,
    }
}

fn fold_latin_extended(c: u16) -> u16 {
    match c {
        0x0110 | 0x0126 | 0x0132 | 0x013F | 0x0141 | 0x014A | 0x0152 | 0x0166 => c + 1,
        0x0182 | 0x0184 | 0x0187 | 0x018B | 0x0191 | 0x0198 | 0x01A2 | 0x01A4 | 0x01A7
        | 0x01AC | 0x01B3 | 0x01B5 | 0x01B8 | 0x01BC | 0x01E4 => c + 1,
        0x0181 => 0x0253,
        0x0186 => 0x0254,
        0x0189 => 0x0256,
        0x018A => 0x0257,
        0x018E => 0x01DD,
        0x018F => 0x0259,
        0x0190 => 0x025B,
        0x0193 => 0x0260,
        0x0194 => 0x0263,
        0x0196 => 0x0269,
        0x0197 => 0x0268,
        0x019C => 0x026F,
        0x019D => 0x0272,
        0x019F => 0x0275,
        0x01A9 => 0x0283,
        0x01AE => 0x0288,
        0x01B1 => 0x028A,
        0x01B2 => 0x028B,
        0x01B7 => 0x0292,
        0x01C4 | 0x01C5 => 0x01C6,
        0x01C7 | 0x01C8 => 0x01C9,
        0x01CA | 0x01CB => 0x01CC,
        0x01F1 | 0x01F2 => 0x01F3,
        _ => c,
    }
}

fn fold_greek(c: u16) -> u16 {
    match c {
        0x0391..=0x03A1 | 0x03A3..=0x03A9 => c + 0x20,
        0x03E2..=0x03EE if c % 2 == 0 => c + 1,
        _ => c,
    }
}

fn fold_cyrillic(c: u16) -> u16 {
    match c {
        0x0402 => 0x0452,
        0x0404..=0x0406 | 0x0408..=0x040B => c + 0x50,
        0x040F => 0x045F,
        0x0419 => c,
        0x0410..=0x042F => c + 0x20,
        0x0476 | 0x0477 => c,
        0x0460..=0x0480 if c % 2 == 0 => c + 1,
        0x0490..=0x04BE if c % 2 == 0 => c + 1,
        0x04C3 | 0x04C7 | 0x04CB => c + 1,
        _ => c,
    }
}

/// Next folded unit, skipping ones that fold to zero. Returns 0 at the end.
fn next_folded(units: &mut std::slice::Iter<'_, u16>) -> u16 {
    for &u in units.by_ref() {
        let f = fold(u);
        if f != 0 {
            return f;
        }
    }
    0
}

/// Case-insensitive HFS+ name comparison.
pub fn fast_unicode_compare(a: &[u16], b: &[u16]) -> Ordering {
    let mut ia = a.iter();
    let mut ib = b.iter();
    loop {
        let ca = next_folded(&mut ia);
        let cb = next_folded(&mut ib);
        if ca != cb {
            return ca.cmp(&cb);
        }
        if ca == 0 {
            return Ordering::Equal;
        }
    }
}

/// Case-sensitive HFSX name comparison.
pub fn binary_compare(a: &[u16], b: &[u16]) -> Ordering {
    a.cmp(b)
}
