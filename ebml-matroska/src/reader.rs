// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Write;

use chrono::{DateTime, Utc};

use ebml_core::errors::{end_of_stream_error, sequence_error, Error, Result};
use ebml_core::io::{FiniteStream, ReadBytes, ScopedStream};

use crate::cursor::{Cursor, Step};
use crate::header::{try_read_header, ElementHeader};
use crate::scalar::{self, TextDecoder, TextPolicy, MAX_INTEGER_LEN};
use crate::schema::{Schema, MATROSKA};
use crate::view::ElementView;

/// Size of the scratch buffer used to stream payloads.
const CHUNK_LEN: usize = 4096;

/// `ReaderOptions` is a common set of options that all EBML readers use.
#[derive(Copy, Clone, Debug)]
pub struct ReaderOptions {
    /// The maximum number of containers opened with `enter_container`. `None` removes the limit.
    /// Unknown-size elements walked over while skipping do not count.
    pub max_depth: Option<usize>,
    /// The largest binary or string payload that will be buffered in memory. Skipping a payload
    /// is never limited.
    pub max_payload_len: u64,
    /// How invalid string payloads are handled.
    pub text_policy: TextPolicy,
    /// The element dictionary used to validate lengths and to find the end of unknown-size
    /// elements.
    pub schema: Option<&'static dyn Schema>,
    /// If `true`, element lengths inconsistent with their data type are logged.
    pub validate_lengths: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            max_depth: Some(64),
            max_payload_len: 64 * 1024 * 1024,
            text_policy: TextPolicy::default(),
            schema: Some(&MATROSKA),
            validate_lengths: true,
        }
    }
}

/// A blocking streaming EBML reader.
///
/// The reader is positioned either on an element, whose header has been read, or between
/// elements. [`EbmlReader::advance_to_next`] moves to the next sibling and skips whatever was
/// left of the current element. Master elements are opened with
/// [`EbmlReader::enter_container`] and closed with [`EbmlReader::leave_container`].
pub struct EbmlReader<R: ReadBytes> {
    reader: R,
    cursor: Cursor,
}

impl<R: ReadBytes> EbmlReader<R> {
    /// Instantiate a reader with the default options.
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, Default::default())
    }

    pub fn with_options(reader: R, options: ReaderOptions) -> Self {
        EbmlReader { reader, cursor: Cursor::new(options) }
    }

    pub fn options(&self) -> &ReaderOptions {
        self.cursor.options()
    }

    /// Moves to the next element in the innermost open container.
    ///
    /// Returns `Ok(None)` if the container has no more children, or, at the top level, if the
    /// source ended cleanly at an element boundary.
    pub fn advance_to_next(&mut self) -> Result<Option<ElementHeader>> {
        self.skip_current()?;

        match self.cursor.next_step(self.reader.pos()) {
            Step::Ready(header) => Ok(Some(header)),
            Step::EndOfParent => Ok(None),
            Step::ReadHeader { bounded } => {
                let start = self.reader.pos();

                match try_read_header(&mut self.reader)? {
                    Some(header) => {
                        let header_len = self.reader.pos() - start;
                        self.cursor.accept_header(header, start, header_len)
                    }
                    // A bounded container promised more bytes.
                    None if bounded => end_of_stream_error(),
                    None => {
                        self.cursor.set_end_of_stream();
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Skips the unread payload of the current element, if any.
    pub fn skip_current(&mut self) -> Result<()> {
        let element = match self.cursor.current() {
            Some(element) => *element,
            None => return Ok(()),
        };

        match element.unread() {
            Some(0) => (),
            Some(unread) => {
                log::debug!("skipping {} bytes of element {:#x}", unread, element.header.id);
                self.reader.ignore_bytes(unread)?;
            }
            None => {
                // The end of an unknown-size element can only be found by walking its children.
                let depth = self.cursor.depth();
                self.cursor.enter_for_skip(self.reader.pos())?;
                return self.unwind_to(depth);
            }
        }

        self.cursor.clear_current();
        Ok(())
    }

    /// Opens the current element as a container. Its children are then visited with
    /// [`EbmlReader::advance_to_next`].
    pub fn enter_container(&mut self) -> Result<()> {
        self.cursor.enter(self.reader.pos())
    }

    /// Closes the innermost container, skipping any children that were not read.
    pub fn leave_container(&mut self) -> Result<()> {
        match self.cursor.depth() {
            0 => sequence_error("ebml: no container to leave"),
            depth => self.unwind_to(depth - 1),
        }
    }

    /// Reads the payload of the current element as an unsigned integer.
    pub fn read_unsigned(&mut self) -> Result<u64> {
        let mut scratch = [0u8; 8];
        let len = self.read_scalar(&mut scratch, Error::InvalidIntegerLength)?;
        scalar::decode_unsigned(&scratch[..len])
    }

    /// Reads the payload of the current element as a signed integer.
    pub fn read_signed(&mut self) -> Result<i64> {
        let mut scratch = [0u8; 8];
        let len = self.read_scalar(&mut scratch, Error::InvalidIntegerLength)?;
        scalar::decode_signed(&scratch[..len])
    }

    /// Reads the payload of the current element as a float.
    pub fn read_float(&mut self) -> Result<f64> {
        let mut scratch = [0u8; 8];
        let len = self.read_scalar(&mut scratch, Error::InvalidFloatLength)?;
        scalar::decode_float(&scratch[..len])
    }

    /// Reads the payload of the current element as a date.
    pub fn read_date(&mut self) -> Result<DateTime<Utc>> {
        let mut scratch = [0u8; 8];
        let len = self.read_scalar(&mut scratch, Error::InvalidIntegerLength)?;
        scalar::decode_date(&scratch[..len])
    }

    /// Reads the payload of the current element as an ASCII string.
    pub fn read_ascii(&mut self) -> Result<String> {
        let decoder = TextDecoder::ascii(self.options().text_policy);
        self.read_text(decoder)
    }

    /// Reads the payload of the current element as a UTF-8 string.
    pub fn read_utf8(&mut self) -> Result<String> {
        let decoder = TextDecoder::utf8(self.options().text_policy);
        self.read_text(decoder)
    }

    /// Reads the payload of the current element into memory.
    pub fn read_binary(&mut self) -> Result<Box<[u8]>> {
        let len = self.cursor.buffered_payload_len()?;
        let buf = self.reader.read_boxed_slice_exact(len as usize)?;
        self.cursor.mark_read(len);
        Ok(buf)
    }

    /// Copies the payload of the current element to `writer` in bounded chunks. The payload
    /// length is not limited. Returns the number of bytes copied.
    pub fn read_binary_into<W: Write>(&mut self, writer: &mut W) -> Result<u64> {
        let len = self.cursor.payload_len()?;

        self.stream_payload(len, |chunk| {
            writer.write_all(chunk)?;
            Ok(())
        })?;

        Ok(len)
    }

    /// Reads the payload of the current element into an owning [`ElementView`].
    pub fn read_view(&mut self) -> Result<ElementView> {
        Ok(ElementView::new(self.read_binary()?.into_vec()))
    }

    /// Returns the number of open containers.
    pub fn depth(&self) -> usize {
        self.cursor.depth()
    }

    /// Returns the absolute position in the source.
    pub fn pos(&self) -> u64 {
        self.reader.pos()
    }

    /// Returns the bytes of the innermost container consumed so far, or the position if no
    /// container is open.
    pub fn consumed(&self) -> u64 {
        let pos = self.reader.pos();
        self.cursor.top().map_or(pos, |frame| frame.consumed(pos))
    }

    /// Returns the bytes left in the innermost container, or `None` if its size is unknown or no
    /// container is open.
    pub fn remaining(&self) -> Option<u64> {
        self.cursor.top().and_then(|frame| frame.remaining(self.reader.pos()))
    }

    /// Returns `true` if the innermost container is known to have no children after the current
    /// element.
    pub fn end_of_parent(&self) -> bool {
        let pos = match self.cursor.current() {
            Some(element) => match element.header.data_len() {
                Some(len) => element.data_pos + len,
                None => return false,
            },
            None => self.reader.pos(),
        };

        match self.cursor.top() {
            Some(frame) => match frame.end {
                Some(end) => pos >= end,
                None => {
                    self.cursor.is_end_of_stream()
                        || self.cursor.bound().is_some_and(|bound| pos >= bound)
                }
            },
            None => self.cursor.is_end_of_stream(),
        }
    }

    /// Returns the header of the current element.
    pub fn current(&self) -> Option<ElementHeader> {
        self.cursor.current().map(|element| element.header)
    }

    /// Returns the open containers, outermost first.
    pub fn frames(&self) -> &[crate::cursor::Frame] {
        self.cursor.frames()
    }

    /// Returns a reference to the underlying source.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Unwraps this `EbmlReader`, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads a scalar payload of at most 8 octets into `scratch`. Returns its length.
    fn read_scalar(&mut self, scratch: &mut [u8; 8], too_long: fn(u64) -> Error) -> Result<usize> {
        let len = self.cursor.payload_len()?;

        if len > MAX_INTEGER_LEN {
            return Err(too_long(len));
        }

        let len = len as usize;
        self.reader.read_buf_exact(&mut scratch[..len])?;
        self.cursor.mark_read(len as u64);

        Ok(len)
    }

    fn read_text(&mut self, mut decoder: TextDecoder) -> Result<String> {
        let len = self.cursor.buffered_payload_len()?;
        self.stream_payload(len, |chunk| decoder.feed(chunk))?;
        decoder.finish()
    }

    /// Closes containers until only `target` remain open. Unknown-size children are walked
    /// iteratively so that the stack does not grow with their nesting.
    fn unwind_to(&mut self, target: usize) -> Result<()> {
        while self.cursor.depth() > target {
            let frame = match self.cursor.top() {
                Some(frame) => *frame,
                None => break,
            };

            if let Some(end) = frame.end {
                self.cursor.discard_pending();

                let pos = self.reader.pos();

                if pos < end {
                    log::debug!("skipping {} trailing bytes of element {:#x}", end - pos, frame.id);
                    self.reader.ignore_bytes(end - pos)?;
                }

                self.cursor.pop();
                continue;
            }

            match self.cursor.current().copied() {
                Some(element) if element.header.is_unknown_length() => {
                    self.cursor.enter_for_skip(self.reader.pos())?;
                }
                Some(_) => self.skip_current()?,
                None => {
                    if self.advance_to_next()?.is_none() {
                        self.cursor.pop();
                    }
                }
            }
        }

        Ok(())
    }

    /// Feeds `len` bytes of the current payload to `f` in chunks.
    fn stream_payload<F>(&mut self, len: u64, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut scratch = [0u8; CHUNK_LEN];
        let mut stream = ScopedStream::new(&mut self.reader, len);

        let result = loop {
            let count = match stream.read_buf(&mut scratch) {
                Ok(0) if stream.bytes_available() > 0 => break Err(Error::UnexpectedEndOfInput),
                Ok(0) => break Ok(()),
                Ok(count) => count,
                Err(err) => break Err(err.into()),
            };

            if let Err(err) = f(&scratch[..count]) {
                break Err(err);
            }
        };

        let read = stream.bytes_read();
        self.cursor.mark_read(read);

        result
    }
}

#[cfg(test)]
mod tests {
    use ebml_core::errors::Error;
    use ebml_core::io::{BufReader, MediaSourceStream, ReadOnlySource};

    use super::*;
    use crate::header::UNKNOWN_LENGTH;
    use crate::schema::ids;

    fn element(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        ElementHeader::new(id, payload.len() as i64).write(&mut buf).unwrap();
        buf.extend_from_slice(payload);
        buf
    }

    fn unknown(id: u32, children: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        ElementHeader::new(id, UNKNOWN_LENGTH).write(&mut buf).unwrap();
        buf.extend_from_slice(children);
        buf
    }

    #[test]
    fn verify_minimal_document() {
        let mut reader = EbmlReader::new(BufReader::new(&[0x81, 0x81, 0x2a]));

        assert_eq!(reader.advance_to_next().unwrap(), Some(ElementHeader::new(0x81, 1)));
        assert_eq!(reader.read_unsigned().unwrap(), 42);
        assert_eq!(reader.advance_to_next().unwrap(), None);
        assert_eq!(reader.advance_to_next().unwrap(), None);
    }

    #[test]
    fn verify_nested_overrun() {
        let mut children = Vec::new();
        children.extend(element(ids::VOID, &[0; 6]));
        children.extend(element(ids::VOID, &[0; 6]));
        children.extend(element(ids::VOID, &[0; 4]));

        let mut doc = Vec::new();
        ElementHeader::new(ids::EBML, 20).write(&mut doc).unwrap();
        doc.extend(children);

        let mut reader = EbmlReader::new(BufReader::new(&doc));
        reader.advance_to_next().unwrap();
        reader.enter_container().unwrap();

        assert!(reader.advance_to_next().unwrap().is_some());
        assert!(reader.advance_to_next().unwrap().is_some());
        reader.skip_current().unwrap();
        assert_eq!(reader.consumed(), 16);
        assert_eq!(reader.remaining(), Some(4));

        let err = reader.advance_to_next().unwrap_err();
        assert!(matches!(
            err,
            Error::ElementExceedsParent { id: ids::VOID, required: 6, remaining: 4 }
        ));
    }

    #[test]
    fn verify_traversal_consumes_container() {
        let mut body = Vec::new();
        body.extend(element(ids::EBML_VERSION, &[1]));
        body.extend(element(ids::DOC_TYPE, b"webm"));
        body.extend(element(ids::DOC_TYPE_VERSION, &[4]));

        let mut doc = element(ids::EBML, &body);
        doc.extend(element(ids::VOID, &[]));

        // Read some children, skip others, or skip all of them. The container always ends at
        // the same position.
        for read_count in 0..=3 {
            let mut reader = EbmlReader::new(BufReader::new(&doc));
            reader.advance_to_next().unwrap();
            reader.enter_container().unwrap();

            for _ in 0..read_count {
                let header = reader.advance_to_next().unwrap().unwrap();
                if header.id == ids::DOC_TYPE {
                    assert_eq!(reader.read_ascii().unwrap(), "webm");
                }
            }

            reader.leave_container().unwrap();
            assert_eq!(reader.pos(), body.len() as u64 + 5);
            assert_eq!(reader.depth(), 0);
            assert_eq!(reader.advance_to_next().unwrap(), Some(ElementHeader::new(ids::VOID, 0)));
        }
    }

    #[test]
    fn verify_scalar_reads() {
        let mut doc = Vec::new();
        doc.extend(element(ids::DURATION, &1.5f32.to_be_bytes()));
        doc.extend(element(ids::TITLE, "Tëst\0\0".as_bytes()));
        doc.extend(element(ids::DATE_UTC, &0i64.to_be_bytes()));
        doc.extend(element(0xfb, &[0xff, 0xfe]));
        doc.extend(element(ids::DURATION, &[0; 3]));

        let mut reader = EbmlReader::new(BufReader::new(&doc));

        reader.advance_to_next().unwrap();
        assert_eq!(reader.read_float().unwrap(), 1.5);
        reader.advance_to_next().unwrap();
        assert_eq!(reader.read_utf8().unwrap(), "Tëst");
        reader.advance_to_next().unwrap();
        assert_eq!(reader.read_date().unwrap(), scalar::ebml_epoch());
        reader.advance_to_next().unwrap();
        assert_eq!(reader.read_signed().unwrap(), -2);
        reader.advance_to_next().unwrap();
        assert!(matches!(reader.read_float(), Err(Error::InvalidFloatLength(3))));
    }

    #[test]
    fn verify_payload_read_once() {
        let doc = element(ids::TIMESTAMP, &[0x10]);
        let mut reader = EbmlReader::new(BufReader::new(&doc));

        assert!(matches!(reader.read_unsigned(), Err(Error::OperationSequence(_))));

        reader.advance_to_next().unwrap();
        assert_eq!(reader.read_unsigned().unwrap(), 16);
        assert!(matches!(reader.read_unsigned(), Err(Error::OperationSequence(_))));
        assert!(matches!(reader.leave_container(), Err(Error::OperationSequence(_))));
    }

    #[test]
    fn verify_payload_limit() {
        let doc = element(ids::CODEC_PRIVATE, &[7; 32]);
        let options = ReaderOptions { max_payload_len: 16, ..Default::default() };

        let mut reader = EbmlReader::with_options(BufReader::new(&doc), options);
        reader.advance_to_next().unwrap();
        assert!(matches!(reader.read_binary(), Err(Error::LimitError(_))));

        // Streaming is never limited.
        let mut out = Vec::new();
        assert_eq!(reader.read_binary_into(&mut out).unwrap(), 32);
        assert_eq!(out, vec![7; 32]);
    }

    #[test]
    fn verify_truncated_payload() {
        let mut doc = element(ids::CODEC_PRIVATE, &[1; 8]);
        doc.truncate(6);

        let mut reader = EbmlReader::new(BufReader::new(&doc));
        reader.advance_to_next().unwrap();

        let err = reader.read_binary_into(&mut Vec::new()).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn verify_truncated_container() {
        let mut doc = Vec::new();
        ElementHeader::new(ids::INFO, 10).write(&mut doc).unwrap();
        doc.extend(element(ids::TIMESTAMP_SCALE, &[1]));

        let mut reader = EbmlReader::new(BufReader::new(&doc));
        reader.advance_to_next().unwrap();
        reader.enter_container().unwrap();
        reader.advance_to_next().unwrap();

        assert!(matches!(reader.advance_to_next(), Err(Error::UnexpectedEndOfInput)));
    }

    #[test]
    fn verify_unknown_size_containers() {
        let mut cluster1 = Vec::new();
        cluster1.extend(element(ids::TIMESTAMP, &[0]));
        cluster1.extend(element(ids::SIMPLE_BLOCK, &[0x81, 0, 0, 0x80, 1, 2]));

        let mut segment = Vec::new();
        segment.extend(element(ids::INFO, &element(ids::TIMESTAMP_SCALE, &[0x0f, 0x42, 0x40])));
        segment.extend(unknown(ids::CLUSTER, &cluster1));
        segment.extend(unknown(ids::CLUSTER, &element(ids::TIMESTAMP, &[0x20])));

        let doc = unknown(ids::SEGMENT, &segment);

        let mut reader = EbmlReader::new(BufReader::new(&doc));
        assert!(reader.advance_to_next().unwrap().unwrap().is_unknown_length());
        reader.enter_container().unwrap();

        assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::INFO);

        assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::CLUSTER);
        reader.enter_container().unwrap();
        assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::TIMESTAMP);
        assert_eq!(reader.read_unsigned().unwrap(), 0);
        assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::SIMPLE_BLOCK);

        // The next cluster ends the first one.
        assert_eq!(reader.advance_to_next().unwrap(), None);
        reader.leave_container().unwrap();

        assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::CLUSTER);
        reader.enter_container().unwrap();
        assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::TIMESTAMP);
        assert_eq!(reader.read_unsigned().unwrap(), 0x20);
        assert_eq!(reader.advance_to_next().unwrap(), None);
        assert!(reader.end_of_parent());
        reader.leave_container().unwrap();

        assert_eq!(reader.advance_to_next().unwrap(), None);
        reader.leave_container().unwrap();
        assert_eq!(reader.depth(), 0);
        assert_eq!(reader.advance_to_next().unwrap(), None);
    }

    #[test]
    fn verify_skip_unknown_size_element() {
        let mut segment = Vec::new();
        segment.extend(unknown(ids::CLUSTER, &element(ids::TIMESTAMP, &[1])));
        segment.extend(unknown(ids::CLUSTER, &element(ids::TIMESTAMP, &[2])));

        let doc = element(ids::SEGMENT, &segment);

        let mut reader = EbmlReader::new(BufReader::new(&doc));
        reader.advance_to_next().unwrap();
        reader.enter_container().unwrap();

        // Skipping the first cluster walks it until the second one begins.
        assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::CLUSTER);
        assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::CLUSTER);
        assert_eq!(reader.depth(), 1);

        // The second one ends with the segment.
        assert_eq!(reader.advance_to_next().unwrap(), None);
        assert_eq!(reader.pos(), doc.len() as u64);
    }

    #[test]
    fn verify_seekable_and_unseekable_sources() {
        let mut doc = element(ids::CODEC_PRIVATE, &[0xaa; 100_000]);
        doc.extend(element(ids::TRACK_NUMBER, &[3]));

        let seekable = Box::new(std::io::Cursor::new(doc.clone()));
        let unseekable = Box::new(ReadOnlySource::new(std::io::Cursor::new(doc)));

        let sources = [
            MediaSourceStream::new(seekable, Default::default()),
            MediaSourceStream::new(unseekable, Default::default()),
        ];

        for source in sources {
            let mut reader = EbmlReader::new(source);
            reader.advance_to_next().unwrap();
            assert_eq!(reader.advance_to_next().unwrap().unwrap().id, ids::TRACK_NUMBER);
            assert_eq!(reader.read_unsigned().unwrap(), 3);
            assert_eq!(reader.advance_to_next().unwrap(), None);
        }
    }

    #[test]
    fn verify_read_view() {
        let doc = element(ids::CODEC_PRIVATE, &[1, 2, 3]);
        let mut reader = EbmlReader::new(BufReader::new(&doc));
        reader.advance_to_next().unwrap();

        let view = reader.read_view().unwrap();
        assert!(view.is_owner().unwrap());
        assert_eq!(view.as_slice().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn verify_skip_ignores_depth_limit() {
        let mut segment = unknown(ids::CLUSTER, &element(ids::SIMPLE_BLOCK, &[0x81, 0, 0, 0x80]));
        segment.extend(element(ids::CUES, &[]));
        let doc = element(ids::SEGMENT, &segment);

        let options = ReaderOptions { max_depth: Some(1), ..Default::default() };
        let mut reader = EbmlReader::with_options(BufReader::new(&doc), options);

        reader.advance_to_next().unwrap();
        reader.enter_container().unwrap();
        assert_eq!(reader.advance_to_next().unwrap().map(|h| h.id), Some(ids::CLUSTER));

        // Visiting the children of the cluster is limited, walking over them to skip it is not.
        assert!(matches!(reader.enter_container(), Err(Error::LimitError(_))));
        assert_eq!(reader.advance_to_next().unwrap().map(|h| h.id), Some(ids::CUES));
        assert_eq!(reader.advance_to_next().unwrap(), None);

        reader.leave_container().unwrap();
        assert_eq!(reader.pos(), doc.len() as u64);
    }

    #[test]
    fn verify_skip_deeply_nested_unknown_size() {
        let nested: Vec<u8> = [0xa0, 0xff].repeat(1_000);

        let mut doc = element(ids::TRACKS, &nested);
        doc.extend(element(ids::CUES, &[]));

        let options = ReaderOptions { max_depth: Some(4), schema: None, ..Default::default() };
        let mut reader = EbmlReader::with_options(BufReader::new(&doc), options);

        reader.advance_to_next().unwrap();
        reader.enter_container().unwrap();
        assert_eq!(reader.advance_to_next().unwrap().map(|h| h.id), Some(0xa0));
        assert_eq!(reader.advance_to_next().unwrap(), None);
        assert_eq!(reader.depth(), 1);

        reader.leave_container().unwrap();
        assert_eq!(reader.advance_to_next().unwrap().map(|h| h.id), Some(ids::CUES));
    }
}
