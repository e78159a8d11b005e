//! Field decoders for fixed on-disk layouts.
//!
//! Integer fields are read with `byteorder` directly at their offsets; the
//! helpers here cover the string encodings and the length checks that keep
//! those reads in bounds.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{HfsError, Result};

/// Fail with `InvalidArgument` unless `data` holds at least `needed` bytes.
pub fn ensure_len(data: &[u8], needed: usize, what: &str) -> Result<()> {
    if data.len() < needed {
        return Err(HfsError::InvalidArgument(format!(
            "{what}: need {needed} bytes, have {}",
            data.len()
        )));
    }
    Ok(())
}

/// Copy `N` bytes starting at `offset`.
pub fn fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

/// NUL-terminated (or NUL-padded) ASCII field.
pub fn c_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

/// Pascal string: one length byte then up to `max_len` bytes. The length is
/// clamped to what the field can hold.
pub fn pascal_bytes(data: &[u8], max_len: usize) -> &[u8] {
    if data.is_empty() {
        return &[];
    }
    let len = (data[0] as usize).min(max_len).min(data.len() - 1);
    &data[1..1 + len]
}

/// Big-endian UTF-16 code units.
pub fn utf16be_units(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2).map(BigEndian::read_u16).collect()
}

/// Decode big-endian UTF-16, replacing unpaired surrogates.
pub fn utf16be_string(data: &[u8]) -> String {
    String::from_utf16_lossy(&utf16be_units(data))
}

/// Decode a NUL-padded little-endian UTF-16 field.
pub fn utf16le_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Four-character code (HFS type/creator). Non-printable bytes become '.'.
pub fn fourcc(data: &[u8]) -> String {
    data.iter()
        .take(4)
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}
