// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::{self, Write};

use ebml_core::errors::{Error, Result};
use ebml_core::io::ReadBytes;

use crate::vint::{
    element_id_len, parse_vint, read_vint, read_vint_after, vint_size, write_element_id,
    write_element_length, MAX_ID_OCTETS, MAX_LENGTH_OCTETS,
};
use crate::Parsed;

pub use crate::vint::UNKNOWN_LENGTH;

/// The header of one EBML element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElementHeader {
    /// The element ID, VINT_MARKER bit included.
    pub id: u32,
    /// The data size, or [`UNKNOWN_LENGTH`].
    pub length: i64,
}

impl ElementHeader {
    pub fn new(id: u32, length: i64) -> Self {
        ElementHeader { id, length }
    }

    /// Returns `true` if the data size is unknown.
    pub fn is_unknown_length(&self) -> bool {
        self.length == UNKNOWN_LENGTH
    }

    /// Returns the data size, or `None` if it is unknown.
    pub fn data_len(&self) -> Option<u64> {
        if self.is_unknown_length() {
            None
        }
        else {
            Some(self.length as u64)
        }
    }

    /// Returns the length of this header when written by [`ElementHeader::write`].
    pub fn header_len(&self) -> Result<usize> {
        let length_len = match self.data_len() {
            Some(len) => match vint_size(len) {
                Some(size) => usize::from(size),
                None => return Err(Error::InvalidVInt { max_octets: MAX_LENGTH_OCTETS }),
            },
            None => 1,
        };
        Ok(element_id_len(self.id)? + length_len)
    }

    /// Checks that this header, `header_len` octets long, and its data fit within `remaining`
    /// octets of the parent.
    pub fn check_fits(&self, header_len: u64, remaining: u64) -> Result<()> {
        let required = header_len + self.data_len().unwrap_or(0);

        if required > remaining {
            return Err(Error::ElementExceedsParent { id: self.id, required, remaining });
        }

        Ok(())
    }

    /// Writes the header. The data size is minimal, or a single octet if unknown.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let id_len = write_element_id(writer, self.id)?;
        let length_len = write_element_length(writer, self.length)?;
        Ok(id_len + length_len)
    }
}

/// Reads an element header from a blocking source.
///
/// Returns `Ok(None)` if the source is exhausted before the first octet of the ID, which is a
/// clean end at an element boundary. Running out of data after that is
/// [`Error::UnexpectedEndOfInput`].
pub fn try_read_header<R: ReadBytes>(mut reader: R) -> Result<Option<ElementHeader>> {
    let first = match reader.read_byte() {
        Ok(byte) => byte,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let id = read_vint_after(first, &mut reader, MAX_ID_OCTETS)?.raw as u32;
    let length = read_vint(&mut reader, MAX_LENGTH_OCTETS)?.as_length();

    Ok(Some(ElementHeader { id, length }))
}

/// Decodes an element header at the start of `buf` without consuming anything.
///
/// On success, returns the header and the number of octets it occupies. If `buf` ends inside the
/// header, returns [`Parsed::NeedMoreData`] so the caller can retry from the same position.
pub fn parse_header(buf: &[u8]) -> Result<Parsed<(ElementHeader, usize)>> {
    let id = match parse_vint(buf, MAX_ID_OCTETS)? {
        Parsed::Ready(vint) => vint,
        Parsed::NeedMoreData => return Ok(Parsed::NeedMoreData),
    };

    let id_len = usize::from(id.length);

    let length = match parse_vint(&buf[id_len..], MAX_LENGTH_OCTETS)? {
        Parsed::Ready(vint) => vint,
        Parsed::NeedMoreData => return Ok(Parsed::NeedMoreData),
    };

    let header = ElementHeader { id: id.raw as u32, length: length.as_length() };

    Ok(Parsed::Ready((header, id_len + usize::from(length.length))))
}

#[cfg(test)]
mod tests {
    use ebml_core::errors::Error;
    use ebml_core::io::{BufReader, ReadBytes};

    use super::*;

    #[test]
    fn verify_minimal_document_header() {
        let mut reader = BufReader::new(&[0x81, 0x81, 0x2a]);

        let header = try_read_header(&mut reader).unwrap().unwrap();
        assert_eq!(header, ElementHeader::new(0x81, 1));
        assert_eq!(reader.pos(), 2);
        assert_eq!(reader.read_byte().unwrap(), 0x2a);
    }

    #[test]
    fn verify_size_octet_0x01_opens_eight_octets() {
        // Seven leading zeros: the size continues over the next seven octets.
        let result = try_read_header(BufReader::new(&[0x81, 0x01, 0x2a]));
        assert!(matches!(result, Err(Error::UnexpectedEndOfInput)));

        let mut reader = BufReader::new(&[0x81, 0x01, 0, 0, 0, 0, 0, 0, 0x01, 0x2a]);
        let header = try_read_header(&mut reader).unwrap().unwrap();
        assert_eq!(header, ElementHeader::new(0x81, 1));
        assert_eq!(reader.pos(), 9);
    }

    #[test]
    fn verify_clean_eof_vs_truncation() {
        assert_eq!(try_read_header(BufReader::new(&[])).unwrap(), None);

        // EOF after the ID.
        assert!(matches!(
            try_read_header(BufReader::new(&[0x1a, 0x45, 0xdf, 0xa3])),
            Err(Error::UnexpectedEndOfInput)
        ));

        // EOF inside the ID.
        let result = try_read_header(BufReader::new(&[0x1a, 0x45]));
        assert!(matches!(result, Err(Error::UnexpectedEndOfInput)));
    }

    #[test]
    fn verify_unknown_length_header() {
        let header =
            try_read_header(BufReader::new(&[0x18, 0x53, 0x80, 0x67, 0xff])).unwrap().unwrap();
        assert!(header.is_unknown_length());
        assert_eq!(header.data_len(), None);

        let buf = [0x1f, 0x43, 0xb6, 0x75, 0x01, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let header = try_read_header(BufReader::new(&buf))
            .unwrap()
            .unwrap();
        assert_eq!(header.length, UNKNOWN_LENGTH);
    }

    #[test]
    fn verify_parse_header_partial() {
        let bytes = [0x2a, 0xd7, 0xb1, 0x83, 0x0f, 0x42, 0x40];

        for end in 0..4 {
            assert_eq!(parse_header(&bytes[..end]).unwrap(), Parsed::NeedMoreData);
        }

        assert_eq!(
            parse_header(&bytes).unwrap(),
            Parsed::Ready((ElementHeader::new(0x2ad7b1, 3), 4))
        );

        assert!(matches!(parse_header(&[0x00]), Err(Error::InvalidVInt { max_octets: 4 })));
    }

    #[test]
    fn verify_check_fits() {
        // Parent has 10 bytes left, child declares 11.
        let header = ElementHeader::new(0xa3, 11);
        assert!(matches!(
            header.check_fits(2, 10),
            Err(Error::ElementExceedsParent { id: 0xa3, required: 13, remaining: 10 })
        ));
        assert!(ElementHeader::new(0xa3, 8).check_fits(2, 10).is_ok());

        // Unknown-size children only need room for their header.
        assert!(ElementHeader::new(0x1f43b675, UNKNOWN_LENGTH).check_fits(5, 5).is_ok());
    }

    #[test]
    fn verify_write_header() {
        let mut buf = Vec::new();

        let header = ElementHeader::new(0x1549a966, 300);
        assert_eq!(header.write(&mut buf).unwrap(), 6);
        assert_eq!(header.header_len().unwrap(), 6);

        let header = ElementHeader::new(0x18538067, UNKNOWN_LENGTH);
        assert_eq!(header.write(&mut buf).unwrap(), 5);

        let mut reader = BufReader::new(&buf);
        let header = try_read_header(&mut reader).unwrap();
        assert_eq!(header, Some(ElementHeader::new(0x1549a966, 300)));
        assert_eq!(
            try_read_header(&mut reader).unwrap(),
            Some(ElementHeader::new(0x18538067, UNKNOWN_LENGTH))
        );
        assert_eq!(try_read_header(&mut reader).unwrap(), None);
    }
}
