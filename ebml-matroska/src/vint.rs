// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! EBML variable size integers (RFC 8794, section 4).

use std::io::Write;

use ebml_core::errors::{limit_error, Error, Result};
use ebml_core::io::ReadBytes;
use ebml_core::util::bits::{mask_lower_u64, significant_bytes_u64};

use crate::Parsed;

/// The maximum width of an element ID.
pub const MAX_ID_OCTETS: u8 = 4;

/// The maximum width of an element data size.
pub const MAX_LENGTH_OCTETS: u8 = 8;

/// The element length denoting an unknown data size.
pub const UNKNOWN_LENGTH: i64 = -1;

/// A decoded variable size integer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VInt {
    /// The width in octets, 1 to 8.
    pub length: u8,
    /// The octets as read, including the VINT_MARKER bit.
    pub raw: u64,
    /// The value with the VINT_MARKER bit cleared.
    pub value: u64,
}

impl VInt {
    /// Returns `true` if every value bit is set. As a data size this means "unknown".
    pub fn is_all_ones(&self) -> bool {
        self.value + 1 == 1 << (7 * u32::from(self.length))
    }

    /// Interprets the value as a signed integer by range shifting, as done by Matroska lacing.
    pub fn as_signed(&self) -> i64 {
        let half_range = (1i64 << (7 * u32::from(self.length) - 1)) - 1;
        self.value as i64 - half_range
    }

    /// Interprets the integer as an element data size.
    pub fn as_length(&self) -> i64 {
        if self.is_all_ones() {
            UNKNOWN_LENGTH
        }
        else {
            self.value as i64
        }
    }

    fn from_octets(octets: &[u8]) -> VInt {
        let raw = octets.iter().fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte));
        let length = octets.len() as u8;
        VInt { length, raw, value: raw & mask_lower_u64(7 * u32::from(length)) }
    }
}

/// Determines the width of a variable size integer from its first octet.
#[inline]
fn octet_count(first: u8, max_octets: u8) -> Result<u8> {
    let leading_zeros = first.leading_zeros();

    if leading_zeros >= u32::from(max_octets) {
        return Err(Error::InvalidVInt { max_octets });
    }

    Ok(leading_zeros as u8 + 1)
}

/// Reads a variable size integer of at most `max_octets` octets.
pub fn read_vint<R: ReadBytes>(mut reader: R, max_octets: u8) -> Result<VInt> {
    let first = reader.read_byte()?;
    read_vint_after(first, reader, max_octets)
}

/// Reads the remainder of a variable size integer whose first octet was already consumed.
pub(crate) fn read_vint_after<R: ReadBytes>(
    first: u8,
    mut reader: R,
    max_octets: u8,
) -> Result<VInt> {
    let length = octet_count(first, max_octets)?;

    let mut octets = [0u8; 8];
    octets[0] = first;
    reader.read_buf_exact(&mut octets[1..usize::from(length)])?;

    Ok(VInt::from_octets(&octets[..usize::from(length)]))
}

/// Decodes a variable size integer at the start of `buf` without consuming anything.
///
/// Returns [`Parsed::NeedMoreData`] if `buf` ends before the integer does. An invalid first octet
/// is reported immediately.
pub fn parse_vint(buf: &[u8], max_octets: u8) -> Result<Parsed<VInt>> {
    let first = match buf.first() {
        Some(&first) => first,
        None => return Ok(Parsed::NeedMoreData),
    };

    let length = usize::from(octet_count(first, max_octets)?);

    if buf.len() < length {
        return Ok(Parsed::NeedMoreData);
    }

    Ok(Parsed::Ready(VInt::from_octets(&buf[..length])))
}

/// Reads an element ID. The ID keeps its VINT_MARKER bit.
pub fn read_element_id<R: ReadBytes>(reader: R) -> Result<u32> {
    Ok(read_vint(reader, MAX_ID_OCTETS)?.raw as u32)
}

/// Reads an element data size. Returns [`UNKNOWN_LENGTH`] for the reserved all-ones value.
pub fn read_element_length<R: ReadBytes>(reader: R) -> Result<i64> {
    Ok(read_vint(reader, MAX_LENGTH_OCTETS)?.as_length())
}

/// Reads a range-shifted signed variable size integer.
pub fn read_signed_vint<R: ReadBytes>(reader: R) -> Result<i64> {
    Ok(read_vint(reader, MAX_LENGTH_OCTETS)?.as_signed())
}

/// Returns the minimal width needed to encode `value`, or `None` if it does not fit in 8 octets.
///
/// The all-ones pattern of a width is reserved, so `value + 1` must fit in the value bits.
pub fn vint_size(value: u64) -> Option<u8> {
    let value = value.checked_add(1)?;
    (1..=MAX_LENGTH_OCTETS).find(|&size| value >> (7 * u32::from(size)) == 0)
}

/// Writes `value` as a minimal-width variable size integer. Returns the number of octets written.
pub fn write_vint<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let size = match vint_size(value) {
        Some(size) => size,
        None => return limit_error("ebml: value too large for a variable size integer"),
    };

    let marked = value | (1 << (7 * u32::from(size)));
    writer.write_all(&marked.to_be_bytes()[usize::from(8 - size)..])?;

    Ok(usize::from(size))
}

/// Writes the unknown data size marker using `num_octets` octets.
pub fn write_unknown_length<W: Write>(writer: &mut W, num_octets: u8) -> Result<usize> {
    if !(1..=MAX_LENGTH_OCTETS).contains(&num_octets) {
        return Err(Error::InvalidVInt { max_octets: MAX_LENGTH_OCTETS });
    }

    let mut octets = [0xffu8; 8];
    octets[0] = (0x1ff_u16 >> num_octets) as u8;
    writer.write_all(&octets[..usize::from(num_octets)])?;

    Ok(usize::from(num_octets))
}

/// Returns the encoded width of an element ID, or an error if the marker bit is inconsistent.
pub fn element_id_len(id: u32) -> Result<usize> {
    let len = significant_bytes_u64(u64::from(id));
    let first = (id >> (8 * (len - 1))) as u8;

    if len > u32::from(MAX_ID_OCTETS) || first.leading_zeros() != len - 1 {
        return Err(Error::InvalidVInt { max_octets: MAX_ID_OCTETS });
    }

    Ok(len as usize)
}

/// Writes an element ID as-is, marker bit included.
pub fn write_element_id<W: Write>(writer: &mut W, id: u32) -> Result<usize> {
    let len = element_id_len(id)?;
    writer.write_all(&id.to_be_bytes()[4 - len..])?;
    Ok(len)
}

/// Writes an element data size. [`UNKNOWN_LENGTH`] is written as a single `0xff` octet.
pub fn write_element_length<W: Write>(writer: &mut W, length: i64) -> Result<usize> {
    match length {
        UNKNOWN_LENGTH => write_unknown_length(writer, 1),
        length if length >= 0 => write_vint(writer, length as u64),
        _ => limit_error("ebml: negative element length"),
    }
}

#[cfg(test)]
mod tests {
    use ebml_core::errors::Error;
    use ebml_core::io::BufReader;

    use super::*;

    const SAMPLE_VALUES: &[u64] = &[
        0,
        1,
        42,
        126,
        127,
        128,
        16_382,
        16_383,
        16_384,
        0x1f_fffe,
        0x1f_ffff,
        0x0fff_fffe,
        0x7_ffff_ffff,
        0x3ff_ffff_ffff,
        0x1_ffff_ffff_ffff,
        0xff_ffff_ffff_fffe,
    ];

    #[test]
    fn verify_element_id_parsing() {
        assert_eq!(read_element_id(BufReader::new(&[0x82])).unwrap(), 0x82);
        assert_eq!(read_element_id(BufReader::new(&[0x42, 0x86])).unwrap(), 0x4286);
        assert_eq!(read_element_id(BufReader::new(&[0x2a, 0xd7, 0xb1])).unwrap(), 0x2ad7b1);
        assert_eq!(
            read_element_id(BufReader::new(&[0x1a, 0x45, 0xdf, 0xa3])).unwrap(),
            0x1a45dfa3
        );

        // IDs are limited to 4 octets.
        assert!(matches!(
            read_element_id(BufReader::new(&[0x08, 0, 0, 0, 1])),
            Err(Error::InvalidVInt { max_octets: 4 })
        ));
    }

    #[test]
    fn verify_vint_fields() {
        let vint = read_vint(BufReader::new(&[0x81]), MAX_ID_OCTETS).unwrap();
        assert_eq!(vint, VInt { length: 1, raw: 0x81, value: 0x01 });

        let vint = read_vint(BufReader::new(&[0x40, 0x02]), MAX_LENGTH_OCTETS).unwrap();
        assert_eq!(vint, VInt { length: 2, raw: 0x4002, value: 2 });

        let vint = read_vint(BufReader::new(&[0x01, 0, 0, 0, 0, 0, 0, 0x02]), 8).unwrap();
        assert_eq!(vint.length, 8);
        assert_eq!(vint.value, 2);
    }

    #[test]
    fn verify_invalid_and_truncated_vint() {
        assert!(matches!(
            read_vint(BufReader::new(&[0x00, 0xff]), MAX_LENGTH_OCTETS),
            Err(Error::InvalidVInt { max_octets: 8 })
        ));
        assert!(matches!(
            read_vint(BufReader::new(&[0x20, 0x00]), MAX_LENGTH_OCTETS),
            Err(Error::UnexpectedEndOfInput)
        ));
    }

    #[test]
    fn verify_unknown_length_sentinel() {
        // A lone 0xff is unknown, not 2^7 - 1.
        assert_eq!(read_element_length(BufReader::new(&[0xff])).unwrap(), UNKNOWN_LENGTH);

        for width in 1..=8u8 {
            let mut buf = Vec::new();
            assert_eq!(write_unknown_length(&mut buf, width).unwrap(), usize::from(width));
            assert_eq!(buf.len(), usize::from(width));

            let vint = read_vint(BufReader::new(&buf), MAX_LENGTH_OCTETS).unwrap();
            assert_eq!(vint.length, width);
            assert_eq!(vint.as_length(), UNKNOWN_LENGTH);
        }

        assert!(write_unknown_length(&mut Vec::new(), 0).is_err());
        assert!(write_unknown_length(&mut Vec::new(), 9).is_err());
    }

    #[test]
    fn verify_vint_round_trip_and_minimal_size() {
        for &value in SAMPLE_VALUES {
            let mut buf = Vec::new();
            let written = write_vint(&mut buf, value).unwrap();

            // Minimal: the smallest size where (v + 1) >> (7 * size) == 0.
            let size = written as u32;
            assert_eq!((value + 1) >> (7 * size), 0, "value {:#x}", value);
            if size > 1 {
                assert_ne!((value + 1) >> (7 * (size - 1)), 0, "value {:#x}", value);
            }

            let vint = read_vint(BufReader::new(&buf), MAX_LENGTH_OCTETS).unwrap();
            assert_eq!(vint.value, value);
            assert_eq!(usize::from(vint.length), written);
            assert_eq!(vint.as_length(), value as i64);
        }

        // 127 is the all-ones pattern of one octet, so it needs two.
        assert_eq!(vint_size(127), Some(2));
        assert_eq!(vint_size(0xff_ffff_ffff_fffe), Some(8));
        assert_eq!(vint_size(0xff_ffff_ffff_ffff), None);
        assert!(write_vint(&mut Vec::new(), u64::MAX).is_err());
    }

    #[test]
    fn verify_parse_vint_partial() {
        assert_eq!(parse_vint(&[], 8).unwrap(), Parsed::NeedMoreData);
        assert_eq!(parse_vint(&[0x10, 0x00, 0x01], 8).unwrap(), Parsed::NeedMoreData);
        assert_eq!(
            parse_vint(&[0x10, 0x00, 0x01, 0x02, 0xaa], 8).unwrap(),
            Parsed::Ready(VInt { length: 4, raw: 0x1000_0102, value: 0x0102 })
        );

        // The first octet is validated even when the rest is missing.
        assert!(parse_vint(&[0x08], MAX_ID_OCTETS).is_err());
    }

    #[test]
    fn verify_signed_vint() {
        assert_eq!(read_signed_vint(BufReader::new(&[0x80])).unwrap(), -63);
        assert_eq!(read_signed_vint(BufReader::new(&[0xbf])).unwrap(), 0);
        assert_eq!(read_signed_vint(BufReader::new(&[0x40, 0x00])).unwrap(), -8191);
    }

    #[test]
    fn verify_write_element_id() {
        let mut buf = Vec::new();
        assert_eq!(write_element_id(&mut buf, 0x1a45dfa3).unwrap(), 4);
        assert_eq!(write_element_id(&mut buf, 0xa3).unwrap(), 1);
        assert_eq!(buf, [0x1a, 0x45, 0xdf, 0xa3, 0xa3]);

        // Marker bit does not match the width.
        assert!(write_element_id(&mut buf, 0x7f).is_err());
        assert!(write_element_id(&mut buf, 0x0142).is_err());
    }

    #[test]
    fn verify_write_element_length() {
        let mut buf = Vec::new();
        write_element_length(&mut buf, 1).unwrap();
        write_element_length(&mut buf, UNKNOWN_LENGTH).unwrap();
        write_element_length(&mut buf, 200).unwrap();
        assert_eq!(buf, [0x81, 0xff, 0x40, 0xc8]);
        assert!(write_element_length(&mut buf, -2).is_err());
    }
}
