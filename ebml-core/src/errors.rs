// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `SeekErrorKind` is a list of generic reasons why a seek may fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeekErrorKind {
    /// The position to seek to is out-of-range for the stream or buffer.
    OutOfRange,
}

impl SeekErrorKind {
    fn as_str(&self) -> &'static str {
        match *self {
            SeekErrorKind::OutOfRange => "requested position is out-of-range",
        }
    }
}

/// `Error` enumerates every error reported while reading or writing EBML.
///
/// Apart from `IoError`, `UnexpectedEndOfInput`, `OperationSequence`, and `Disposed`, every
/// variant signals corrupt or adversarial input. None of them are recoverable: a reader that
/// returned an error must not be used to continue the same parse.
#[derive(Debug)]
pub enum Error {
    /// An IO error occured while reading, writing, or seeking the stream.
    IoError(io::Error),
    /// No VINT_MARKER bit was found within the allowed number of octets.
    InvalidVInt {
        /// The octet budget of the field being decoded (4 for IDs, 8 for lengths).
        max_octets: u8,
    },
    /// The source ended in the middle of a VINT, an element header, or a payload.
    UnexpectedEndOfInput,
    /// A child element's header and declared length overrun the remaining bytes of its parent.
    ElementExceedsParent {
        /// The child element ID.
        id: u32,
        /// Bytes the child needs (header plus declared length).
        required: u64,
        /// Bytes left in the parent.
        remaining: u64,
    },
    /// A float payload was neither 0, 4, nor 8 octets long.
    InvalidFloatLength(u64),
    /// An integer payload was longer than 8 octets, or a date was not 0 or 8 octets.
    InvalidIntegerLength(u64),
    /// A UTF-8 payload contained an invalid byte sequence and the strict text policy is active.
    InvalidUtf8,
    /// An ASCII payload contained a non-ASCII byte and the strict text policy is active.
    InvalidAscii,
    /// The stream contained malformed data and could not be decoded.
    DecodeError(&'static str),
    /// A default or user-defined limit was reached. Limits are used to prevent denial-of-service
    /// attacks from malicious streams.
    LimitError(&'static str),
    /// The stream could not be seeked.
    SeekError(SeekErrorKind),
    /// The API was used out of sequence (e.g., entering a container with no current element).
    OperationSequence(&'static str),
    /// An element view was used after it was closed.
    Disposed,
}

impl Error {
    /// Returns `true` if the error was caused by the input ending early rather than by corrupt
    /// data. A caller reading a file that is still being written may retry later.
    pub fn is_truncation(&self) -> bool {
        match *self {
            Error::UnexpectedEndOfInput => true,
            Error::IoError(ref err) => err.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => err.fmt(f),
            Error::InvalidVInt { max_octets } => {
                write!(f, "malformed stream: no vint marker within {} octets", max_octets)
            }
            Error::UnexpectedEndOfInput => write!(f, "unexpected end of input"),
            Error::ElementExceedsParent { id, required, remaining } => {
                write!(
                    f,
                    "malformed stream: element {:#x} needs {} bytes but its parent has {} left",
                    id, required, remaining
                )
            }
            Error::InvalidFloatLength(len) => {
                write!(f, "malformed stream: invalid float length {}", len)
            }
            Error::InvalidIntegerLength(len) => {
                write!(f, "malformed stream: invalid integer length {}", len)
            }
            Error::InvalidUtf8 => write!(f, "malformed stream: invalid utf-8 string"),
            Error::InvalidAscii => write!(f, "malformed stream: invalid ascii string"),
            Error::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::LimitError(constraint) => {
                write!(f, "limit reached: {}", constraint)
            }
            Error::SeekError(ref kind) => {
                write!(f, "seek error: {}", kind.as_str())
            }
            Error::OperationSequence(msg) => {
                write!(f, "invalid operation: {}", msg)
            }
            Error::Disposed => write!(f, "element view used after it was closed"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        // Buffer underruns and out-of-bounds reads are reported by the I/O layer as
        // `UnexpectedEof`. Fold them into the dedicated truncation variant.
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Error::UnexpectedEndOfInput;
        }
        Error::IoError(err)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Convenience function to create a seek error.
pub fn seek_error<T>(kind: SeekErrorKind) -> Result<T> {
    Err(Error::SeekError(kind))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(Error::LimitError(constraint))
}

/// Convenience function to create an operation sequence error.
pub fn sequence_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::OperationSequence(desc))
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::UnexpectedEndOfInput)
}
