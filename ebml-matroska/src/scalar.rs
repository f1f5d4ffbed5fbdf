// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoders for the fixed-format payloads of EBML scalar elements.
//!
//! Every decoder takes the exact payload of one element. All multi-octet values are big-endian.

use chrono::{DateTime, TimeDelta, Utc};

use ebml_core::errors::{decode_error, Error, Result};
use ebml_core::util::bits::{sign_extend_leq64_to_i64, significant_bytes_u64};

/// The maximum payload length of an integer element.
pub const MAX_INTEGER_LEN: u64 = 8;

/// Seconds between the Unix epoch and the EBML epoch, 2001-01-01T00:00:00Z.
const EBML_EPOCH_UNIX_SECS: i64 = 978_307_200;

/// How string payloads with invalid encodings are handled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TextPolicy {
    /// Replace invalid UTF-8 sequences with U+FFFD and non-ASCII bytes with `?`.
    #[default]
    Replace,
    /// Fail with [`Error::InvalidUtf8`] or [`Error::InvalidAscii`].
    Strict,
}

/// Decodes an unsigned integer. An empty payload is 0.
pub fn decode_unsigned(buf: &[u8]) -> Result<u64> {
    if buf.len() as u64 > MAX_INTEGER_LEN {
        return Err(Error::InvalidIntegerLength(buf.len() as u64));
    }

    Ok(buf.iter().fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)))
}

/// Decodes a two's complement signed integer. An empty payload is 0.
pub fn decode_signed(buf: &[u8]) -> Result<i64> {
    let value = decode_unsigned(buf)?;
    Ok(sign_extend_leq64_to_i64(value, 8 * buf.len() as u32))
}

/// Decodes an IEEE-754 float. A 4 octet payload is widened to double precision, and an empty
/// payload is 0.0.
pub fn decode_float(buf: &[u8]) -> Result<f64> {
    match buf.len() {
        0 => Ok(0.0),
        4 => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(buf);
            Ok(f64::from(f32::from_be_bytes(bytes)))
        }
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(buf);
            Ok(f64::from_be_bytes(bytes))
        }
        len => Err(Error::InvalidFloatLength(len as u64)),
    }
}

/// Returns the EBML epoch, 2001-01-01T00:00:00Z.
pub fn ebml_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(EBML_EPOCH_UNIX_SECS, 0).unwrap_or_default()
}

/// Converts nanoseconds relative to the EBML epoch to a date. Nanoseconds are truncated to
/// 100 ns ticks toward zero.
pub fn date_from_nanos(nanos: i64) -> Result<DateTime<Utc>> {
    let ticks = nanos / 100;

    match ebml_epoch().checked_add_signed(TimeDelta::nanoseconds(ticks * 100)) {
        Some(date) => Ok(date),
        None => decode_error("ebml: date out of range"),
    }
}

/// Decodes a date: a signed count of nanoseconds relative to the EBML epoch. An empty payload is
/// the epoch itself.
pub fn decode_date(buf: &[u8]) -> Result<DateTime<Utc>> {
    if !buf.is_empty() && buf.len() != 8 {
        return Err(Error::InvalidIntegerLength(buf.len() as u64));
    }
    date_from_nanos(decode_signed(buf)?)
}

/// Decodes an ASCII string, truncated at the first NUL.
pub fn decode_ascii(buf: &[u8], policy: TextPolicy) -> Result<String> {
    let mut decoder = TextDecoder::ascii(policy);
    decoder.feed(buf)?;
    decoder.finish()
}

/// Decodes a UTF-8 string, truncated at the first NUL.
pub fn decode_utf8(buf: &[u8], policy: TextPolicy) -> Result<String> {
    let mut decoder = TextDecoder::utf8(policy);
    decoder.feed(buf)?;
    decoder.finish()
}

/// A string decoder that is fed a payload in arbitrary chunks.
///
/// A multi-byte UTF-8 sequence split across two chunks is carried over to the next call to
/// [`TextDecoder::feed`]. An incomplete sequence left at [`TextDecoder::finish`] is resolved by
/// the [`TextPolicy`]. Everything after the first NUL is zero padding and is ignored.
#[derive(Clone, Debug)]
pub struct TextDecoder {
    policy: TextPolicy,
    ascii: bool,
    out: String,
    /// The leading bytes of an incomplete UTF-8 sequence, at most 3.
    partial: Vec<u8>,
    terminated: bool,
}

impl TextDecoder {
    /// Instantiate a decoder for a UTF-8 payload.
    pub fn utf8(policy: TextPolicy) -> Self {
        TextDecoder {
            policy,
            ascii: false,
            out: String::new(),
            partial: Vec::new(),
            terminated: false,
        }
    }

    /// Instantiate a decoder for an ASCII payload.
    pub fn ascii(policy: TextPolicy) -> Self {
        TextDecoder { policy, ascii: true, ..Self::utf8(policy) }
    }

    /// Decodes the next chunk of the payload.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        if self.terminated {
            return Ok(());
        }

        let chunk = match chunk.iter().position(|&byte| byte == 0) {
            Some(nul) => {
                self.terminated = true;
                &chunk[..nul]
            }
            None => chunk,
        };

        if self.ascii {
            self.feed_ascii(chunk)?;
        }
        else {
            self.feed_utf8(chunk)?;
        }

        // A sequence cut short by the terminator can never be completed.
        if self.terminated {
            self.resolve_partial()?;
        }

        Ok(())
    }

    /// Flushes any incomplete sequence and returns the decoded string.
    pub fn finish(mut self) -> Result<String> {
        self.resolve_partial()?;
        Ok(self.out)
    }

    fn feed_ascii(&mut self, chunk: &[u8]) -> Result<()> {
        for &byte in chunk {
            if byte.is_ascii() {
                self.out.push(char::from(byte));
            }
            else if self.policy == TextPolicy::Strict {
                return Err(Error::InvalidAscii);
            }
            else {
                self.out.push('?');
            }
        }
        Ok(())
    }

    fn feed_utf8(&mut self, chunk: &[u8]) -> Result<()> {
        let mut pending = std::mem::take(&mut self.partial);
        pending.extend_from_slice(chunk);

        let mut rest = &pending[..];

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // The prefix was just validated.
                    self.out.push_str(std::str::from_utf8(valid).unwrap_or_default());

                    match err.error_len() {
                        Some(len) => {
                            if self.policy == TextPolicy::Strict {
                                return Err(Error::InvalidUtf8);
                            }
                            self.out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // The sequence may be completed by the next chunk.
                            self.partial.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn resolve_partial(&mut self) -> Result<()> {
        if !self.partial.is_empty() {
            if self.policy == TextPolicy::Strict {
                return Err(Error::InvalidUtf8);
            }
            self.partial.clear();
            self.out.push(char::REPLACEMENT_CHARACTER);
        }
        Ok(())
    }
}

/// Encodes an unsigned integer with the minimal number of octets, at least one.
pub fn encode_unsigned(value: u64) -> Vec<u8> {
    let len = significant_bytes_u64(value) as usize;
    value.to_be_bytes()[8 - len..].to_vec()
}

/// Encodes a signed integer with the minimal number of octets that preserves its sign.
pub fn encode_signed(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();

    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }

    bytes[start..].to_vec()
}

/// Encodes a float as an 8 octet double.
pub fn encode_float(value: f64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Encodes a date as nanoseconds relative to the EBML epoch.
pub fn encode_date(date: DateTime<Utc>) -> Result<[u8; 8]> {
    match date.signed_duration_since(ebml_epoch()).num_nanoseconds() {
        Some(nanos) => Ok(nanos.to_be_bytes()),
        None => decode_error("ebml: date out of range"),
    }
}
