// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;
use std::io::{Read, Seek};

use super::{MediaSource, ReadBytes};

const END_OF_STREAM_ERROR_STR: &str = "end of stream";

/// `MediaSourceStreamOptions` specifies the buffering behaviour of a `MediaSourceStream`.
#[derive(Copy, Clone, Debug)]
pub struct MediaSourceStreamOptions {
    /// The read buffer length in bytes. Must be > 0.
    pub buffer_len: usize,
}

impl Default for MediaSourceStreamOptions {
    fn default() -> Self {
        MediaSourceStreamOptions { buffer_len: 64 * 1024 }
    }
}

/// A `MediaSourceStream` is the common `Read`er type for the EBML readers. By using type erasure
/// and dynamic dispatch, `MediaSourceStream` wraps and hides the inner reader from the consumer,
/// allowing any typical `Read`er to be used in a generic way, selectable at runtime.
///
/// `MediaSourceStream` amortizes system call and dynamic dispatch overhead over many bytes by
/// reading the inner source in blocks of up-to `buffer_len` bytes.
///
/// Large forward skips (such as ignoring an unwanted cluster) are performed with a seek on the
/// inner source if it is seekable, and by reading and discarding otherwise.
pub struct MediaSourceStream {
    /// The source reader.
    inner: Box<dyn MediaSource>,
    /// The read buffer.
    buf: Box<[u8]>,
    /// The read position within the buffer.
    read_pos: usize,
    /// The end of valid data within the buffer.
    end_pos: usize,
    /// Absolute position of the inner stream.
    abs_pos: u64,
    /// Cached seekability of the inner stream.
    is_seekable: bool,
}

impl MediaSourceStream {
    pub fn new(source: Box<dyn MediaSource>, options: MediaSourceStreamOptions) -> Self {
        let buffer_len = cmp::max(options.buffer_len, 1);
        let is_seekable = source.is_seekable();

        MediaSourceStream {
            inner: source,
            buf: vec![0; buffer_len].into_boxed_slice(),
            read_pos: 0,
            end_pos: 0,
            abs_pos: 0,
            is_seekable,
        }
    }

    /// Returns if the inner source is seekable.
    pub fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    /// Returns the length in bytes of the inner source, if available.
    pub fn byte_len(&self) -> Option<u64> {
        self.inner.byte_len()
    }

    /// Get the number of bytes buffered but not yet read.
    #[inline(always)]
    pub fn unread_buffer_len(&self) -> usize {
        self.end_pos - self.read_pos
    }

    /// Unwraps this `MediaSourceStream`, returning the inner source. Buffered bytes are lost.
    pub fn into_inner(self) -> Box<dyn MediaSource> {
        self.inner
    }

    /// If the buffer has been exhausted, fetch a new block of data to replenish the buffer.
    fn fetch(&mut self) -> io::Result<()> {
        if self.read_pos == self.end_pos {
            let count = loop {
                match self.inner.read(&mut self.buf) {
                    Ok(count) => break count,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
                    Err(err) => return Err(err),
                }
            };

            self.read_pos = 0;
            self.end_pos = count;
            self.abs_pos += count as u64;
        }

        Ok(())
    }

    /// If the buffer has been exhausted, fetch a new block of data to replenish the buffer. If
    /// no more data could be fetched, return an end-of-stream error.
    fn fetch_or_eof(&mut self) -> io::Result<()> {
        self.fetch()?;

        if self.read_pos == self.end_pos {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, END_OF_STREAM_ERROR_STR));
        }

        Ok(())
    }

    /// Discards the buffer, and sets the absolute stream position to `pos`.
    fn reset(&mut self, pos: u64) {
        self.read_pos = 0;
        self.end_pos = 0;
        self.abs_pos = pos;
    }
}

impl io::Read for MediaSourceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Bypass the buffer for large reads when nothing is buffered.
        if self.read_pos == self.end_pos && buf.len() >= self.buf.len() {
            let count = self.inner.read(buf)?;
            self.abs_pos += count as u64;
            return Ok(count);
        }

        self.fetch()?;

        let count = cmp::min(buf.len(), self.end_pos - self.read_pos);
        buf[..count].copy_from_slice(&self.buf[self.read_pos..self.read_pos + count]);
        self.read_pos += count;

        Ok(count)
    }
}

impl ReadBytes for MediaSourceStream {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        if self.read_pos == self.end_pos {
            self.fetch_or_eof()?;
        }

        let value = self.buf[self.read_pos];
        self.read_pos += 1;

        Ok(value)
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.read(buf) {
                Ok(count) => return Ok(count),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err),
            }
        }
    }

    fn read_buf_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(count) => {
                    buf = &mut buf[count..];
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err),
            }
        }

        if !buf.is_empty() {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, END_OF_STREAM_ERROR_STR))
        }
        else {
            Ok(())
        }
    }

    fn ignore_bytes(&mut self, mut count: u64) -> io::Result<()> {
        // Consume whatever is already buffered first.
        let buffered = cmp::min(self.unread_buffer_len() as u64, count);
        self.read_pos += buffered as usize;
        count -= buffered;

        // Seek over spans larger than the buffer if possible. A seek past the end of the inner
        // source succeeds, so check against the source length when it is known.
        if count > self.buf.len() as u64 && self.is_seekable {
            let target = self.abs_pos + count;

            if let Some(len) = self.inner.byte_len() {
                if target > len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        END_OF_STREAM_ERROR_STR,
                    ));
                }
            }

            log::debug!("seeking forward {} bytes to {}", count, target);

            let pos = self.inner.seek(io::SeekFrom::Start(target))?;
            self.reset(pos);
            return Ok(());
        }

        while count > 0 {
            self.fetch_or_eof()?;
            let discard = cmp::min(self.unread_buffer_len() as u64, count);
            self.read_pos += discard as usize;
            count -= discard;
        }

        Ok(())
    }

    fn pos(&self) -> u64 {
        self.abs_pos - self.unread_buffer_len() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::{MediaSourceStream, MediaSourceStreamOptions};
    use crate::io::{ReadBytes, ReadOnlySource};

    /// Generate a vector of pseudo-random bytes of the specified length.
    fn generate_random_bytes(len: usize) -> Vec<u8> {
        let mut lcg: u32 = 0xec57c4bf;

        let mut bytes = vec![0; len];

        for quad in bytes.chunks_mut(4) {
            lcg = lcg.wrapping_mul(1664525).wrapping_add(1013904223);
            for (src, dest) in quad.iter_mut().zip(&lcg.to_ne_bytes()) {
                *src = *dest;
            }
        }

        bytes
    }

    fn small_buffer() -> MediaSourceStreamOptions {
        MediaSourceStreamOptions { buffer_len: 1024 }
    }

    #[test]
    fn verify_mss_read() {
        let data = generate_random_bytes(16 * 1024);

        let mut mss = MediaSourceStream::new(Box::new(Cursor::new(data.clone())), small_buffer());

        for byte in &data[..3000] {
            assert_eq!(*byte, mss.read_byte().unwrap());
        }

        let mut buf = vec![0; 5000];
        mss.read_buf_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[3000..8000]);
        assert_eq!(mss.pos(), 8000);
    }

    #[test]
    fn verify_mss_read_to_end() {
        let data = generate_random_bytes(5 * 1024 + 7);

        let mut mss = MediaSourceStream::new(Box::new(Cursor::new(data.clone())), small_buffer());
        let mut output: Vec<u8> = Vec::new();
        assert_eq!(mss.read_to_end(&mut output).unwrap(), data.len());
        assert_eq!(output, data);
    }

    #[test]
    fn verify_mss_ignore_seekable() {
        let data = generate_random_bytes(64 * 1024);

        let mut mss = MediaSourceStream::new(Box::new(Cursor::new(data.clone())), small_buffer());

        assert_eq!(mss.read_byte().unwrap(), data[0]);
        mss.ignore_bytes(40_000).unwrap();
        assert_eq!(mss.pos(), 40_001);
        assert_eq!(mss.read_byte().unwrap(), data[40_001]);

        // Skipping past the end of a source with a known length is an error.
        assert!(mss.ignore_bytes(64 * 1024).is_err());
    }

    #[test]
    fn verify_mss_ignore_unseekable() {
        let data = generate_random_bytes(8 * 1024);

        let source = ReadOnlySource::new(Cursor::new(data.clone()));
        let mut mss = MediaSourceStream::new(Box::new(source), small_buffer());

        assert!(!mss.is_seekable());
        mss.ignore_bytes(5_555).unwrap();
        assert_eq!(mss.read_byte().unwrap(), data[5_555]);

        let err = mss.ignore_bytes(10_000).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
