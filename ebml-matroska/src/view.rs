// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use ebml_core::errors::{seek_error, sequence_error, Error, Result, SeekErrorKind};

use crate::header::{ElementHeader, UNKNOWN_LENGTH};
use crate::scalar::{self, TextPolicy};

/// A seekable, readable, and writable view over the contents of one element.
///
/// Views share their bytes. [`ElementView::share`] creates a second view over the same region
/// without copying. The first write through a view whose region is shared copies the region
/// privately, so other views keep seeing the bytes as they were.
///
/// After [`ElementView::close`] every operation fails with [`Error::Disposed`].
#[derive(Debug)]
pub struct ElementView {
    data: Arc<Vec<u8>>,
    owns_data: bool,
    /// `None` once closed.
    position: Option<usize>,
}

fn io_error(err: Error) -> io::Error {
    match err {
        Error::IoError(err) => err,
        Error::SeekError(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
        err => io::Error::other(err),
    }
}

impl ElementView {
    /// Instantiate a view that owns `data`.
    pub fn new(data: Vec<u8>) -> Self {
        ElementView { data: Arc::new(data), owns_data: true, position: Some(0) }
    }

    /// Creates a non-owning view over the same bytes, positioned at the start.
    pub fn share(&self) -> Result<ElementView> {
        self.cursor()?;
        Ok(ElementView { data: Arc::clone(&self.data), owns_data: false, position: Some(0) })
    }

    /// Returns `true` if this view has its own copy of the bytes.
    pub fn is_owner(&self) -> Result<bool> {
        self.cursor()?;
        Ok(self.owns_data)
    }

    /// Returns `true` once the view was closed. This is the only query a closed view answers.
    pub fn is_closed(&self) -> bool {
        self.position.is_none()
    }

    /// Returns the length of the view.
    pub fn len(&self) -> Result<usize> {
        self.cursor()?;
        Ok(self.data.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn position(&self) -> Result<u64> {
        Ok(self.cursor()? as u64)
    }

    /// Moves the read/write position. It may be at most the length of the view.
    pub fn set_position(&mut self, pos: u64) -> Result<()> {
        self.cursor()?;

        if pos > self.data.len() as u64 {
            return sequence_error("ebml: position beyond the end of the element");
        }

        self.position = Some(pos as usize);
        Ok(())
    }

    /// Returns the contents of the view.
    pub fn as_slice(&self) -> Result<&[u8]> {
        self.cursor()?;
        Ok(self.data.as_slice())
    }

    /// Closes the view and releases its reference to the bytes.
    pub fn close(&mut self) {
        self.data = Arc::new(Vec::new());
        self.position = None;
    }

    /// Reads the whole view as an unsigned integer.
    pub fn read_unsigned(&mut self) -> Result<u64> {
        scalar::decode_unsigned(self.rewind_and_take()?)
    }

    /// Reads the whole view as a signed integer.
    pub fn read_signed(&mut self) -> Result<i64> {
        scalar::decode_signed(self.rewind_and_take()?)
    }

    /// Reads the whole view as a float.
    pub fn read_float(&mut self) -> Result<f64> {
        scalar::decode_float(self.rewind_and_take()?)
    }

    /// Reads the whole view as a date.
    pub fn read_date(&mut self) -> Result<DateTime<Utc>> {
        scalar::decode_date(self.rewind_and_take()?)
    }

    /// Reads the whole view as an ASCII string.
    pub fn read_ascii(&mut self, policy: TextPolicy) -> Result<String> {
        scalar::decode_ascii(self.rewind_and_take()?, policy)
    }

    /// Reads the whole view as a UTF-8 string.
    pub fn read_utf8(&mut self, policy: TextPolicy) -> Result<String> {
        scalar::decode_utf8(self.rewind_and_take()?, policy)
    }

    /// Writes an element with identifier `id` and the contents of this view as its payload.
    /// Returns the number of bytes written.
    pub fn write_element<W: Write>(
        &self,
        writer: &mut W,
        id: u32,
        unknown_length: bool,
    ) -> Result<usize> {
        let data = self.as_slice()?;

        let length = if unknown_length { UNKNOWN_LENGTH } else { data.len() as i64 };
        let header_len = ElementHeader::new(id, length).write(writer)?;
        writer.write_all(data)?;

        Ok(header_len + data.len())
    }

    fn cursor(&self) -> Result<usize> {
        self.position.ok_or(Error::Disposed)
    }

    /// Returns every byte of the view and leaves the position at the end.
    fn rewind_and_take(&mut self) -> Result<&[u8]> {
        self.cursor()?;
        self.position = Some(self.data.len());
        Ok(self.data.as_slice())
    }
}

impl Read for ElementView {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.cursor().map_err(io_error)?;

        let len = cmp::min(buf.len(), self.data.len() - pos);
        buf[..len].copy_from_slice(&self.data[pos..pos + len]);
        self.position = Some(pos + len);

        Ok(len)
    }
}

impl Write for ElementView {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pos = self.cursor().map_err(io_error)?;

        let len = cmp::min(buf.len(), self.data.len() - pos);

        if len == 0 {
            return Ok(0);
        }

        // Copies the bytes if any other view still refers to them.
        let data = Arc::make_mut(&mut self.data);
        self.owns_data = true;

        data[pos..pos + len].copy_from_slice(&buf[..len]);
        self.position = Some(pos + len);

        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.cursor().map_err(io_error)?;
        Ok(())
    }
}

impl Seek for ElementView {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let current = self.cursor().map_err(io_error)? as i128;

        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(offset) => self.data.len() as i128 + i128::from(offset),
            SeekFrom::Current(offset) => current + i128::from(offset),
        };

        if target < 0 || target > self.data.len() as i128 {
            return seek_error(SeekErrorKind::OutOfRange).map_err(io_error);
        }

        self.position = Some(target as usize);
        Ok(target as u64)
    }
}
