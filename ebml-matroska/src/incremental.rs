// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A non-blocking reader fed with caller-owned partial buffers.
//!
//! Every operation takes the unconsumed input as `&mut &[u8]` and advances the slice past the
//! bytes it consumed. When the input runs out the operation returns [`Parsed::NeedMoreData`].
//! A VINT, header, or scalar payload is only consumed once it is complete, so the caller may
//! append more bytes after the unconsumed ones and retry. Skips and streamed payloads make
//! partial progress.
//!
//! An operation that returned [`Parsed::NeedMoreData`] in the middle of leaving a container must
//! be retried before a different operation is issued.

use chrono::{DateTime, Utc};

use ebml_core::errors::{decode_error, end_of_stream_error, sequence_error, Error, Result};

use crate::cursor::{Cursor, Frame, Step};
use crate::header::{parse_header, ElementHeader};
use crate::reader::ReaderOptions;
use crate::scalar::{self, TextDecoder, MAX_INTEGER_LEN};
use crate::Parsed;

/// The public operation that started an unwind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Op {
    Advance,
    Skip,
    Leave,
}

/// Containers still to be closed, down to `target` open containers.
#[derive(Copy, Clone, Debug)]
struct Unwind {
    target: usize,
    op: Op,
}

/// An EBML reader over partial input buffers.
pub struct IncrementalReader {
    cursor: Cursor,
    pos: u64,
    end_of_input: bool,
    unwind: Option<Unwind>,
    text: Option<TextDecoder>,
}

impl Default for IncrementalReader {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl IncrementalReader {
    pub fn new(options: ReaderOptions) -> Self {
        IncrementalReader {
            cursor: Cursor::new(options),
            pos: 0,
            end_of_input: false,
            unwind: None,
            text: None,
        }
    }

    pub fn options(&self) -> &ReaderOptions {
        self.cursor.options()
    }

    /// Signals that no input will follow the bytes already supplied.
    ///
    /// Afterwards, running out of input ends the stream if it happens at a top-level element
    /// boundary, and is [`Error::UnexpectedEndOfInput`] anywhere else.
    pub fn set_end_of_input(&mut self) {
        self.end_of_input = true;
    }

    pub fn is_end_of_input(&self) -> bool {
        self.end_of_input
    }

    /// Returns the number of bytes consumed so far.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Returns the number of open containers.
    pub fn depth(&self) -> usize {
        self.cursor.depth()
    }

    /// Returns the header of the current element.
    pub fn current(&self) -> Option<ElementHeader> {
        self.cursor.current().map(|element| element.header)
    }

    /// Returns the open containers, outermost first.
    pub fn frames(&self) -> &[Frame] {
        self.cursor.frames()
    }

    /// Returns the bytes of the innermost container consumed so far, or the position if no
    /// container is open.
    pub fn consumed(&self) -> u64 {
        self.cursor.top().map_or(self.pos, |frame| frame.consumed(self.pos))
    }

    /// Returns the bytes left in the innermost container, or `None` if its size is unknown or no
    /// container is open.
    pub fn remaining(&self) -> Option<u64> {
        self.cursor.top().and_then(|frame| frame.remaining(self.pos))
    }

    /// Moves to the next element in the innermost open container, skipping what is left of the
    /// current one. `Ready(None)` means the container has no more children.
    pub fn advance_to_next(&mut self, input: &mut &[u8]) -> Result<Parsed<Option<ElementHeader>>> {
        self.resume(Op::Advance)?;

        if let Parsed::NeedMoreData = self.skip(input, Op::Advance)? {
            return Ok(Parsed::NeedMoreData);
        }

        self.read_header(input)
    }

    /// Skips the unread payload of the current element, if any.
    pub fn skip_current(&mut self, input: &mut &[u8]) -> Result<Parsed<()>> {
        self.resume(Op::Skip)?;
        self.skip(input, Op::Skip)
    }

    /// Opens the current element as a container.
    pub fn enter_container(&mut self) -> Result<()> {
        if self.unwind.is_some() {
            return sequence_error("ebml: an interrupted operation must be retried first");
        }
        self.cursor.enter(self.pos)
    }

    /// Closes the innermost container, skipping any children that were not read.
    pub fn leave_container(&mut self, input: &mut &[u8]) -> Result<Parsed<()>> {
        self.resume(Op::Leave)?;

        if self.unwind.is_none() {
            let depth = self.cursor.depth();

            if depth == 0 {
                return sequence_error("ebml: no container to leave");
            }

            self.text = None;
            self.unwind = Some(Unwind { target: depth - 1, op: Op::Leave });
        }

        self.unwind(input)
    }

    /// Reads the payload of the current element as an unsigned integer.
    pub fn read_unsigned(&mut self, input: &mut &[u8]) -> Result<Parsed<u64>> {
        self.check_scalar_len(Error::InvalidIntegerLength)?;
        self.take_payload(input)?.map(scalar::decode_unsigned).transpose()
    }

    /// Reads the payload of the current element as a signed integer.
    pub fn read_signed(&mut self, input: &mut &[u8]) -> Result<Parsed<i64>> {
        self.check_scalar_len(Error::InvalidIntegerLength)?;
        self.take_payload(input)?.map(scalar::decode_signed).transpose()
    }

    /// Reads the payload of the current element as a float.
    pub fn read_float(&mut self, input: &mut &[u8]) -> Result<Parsed<f64>> {
        self.check_scalar_len(Error::InvalidFloatLength)?;
        self.take_payload(input)?.map(scalar::decode_float).transpose()
    }

    /// Reads the payload of the current element as a date.
    pub fn read_date(&mut self, input: &mut &[u8]) -> Result<Parsed<DateTime<Utc>>> {
        self.check_scalar_len(Error::InvalidIntegerLength)?;
        self.take_payload(input)?.map(scalar::decode_date).transpose()
    }

    /// Reads the payload of the current element as a contiguous buffer. The whole payload must
    /// be present in `input`; use [`IncrementalReader::read_binary_chunk`] otherwise.
    pub fn read_binary(&mut self, input: &mut &[u8]) -> Result<Parsed<Box<[u8]>>> {
        self.cursor.buffered_payload_len()?;
        Ok(self.take_payload(input)?.map(Box::from))
    }

    /// Returns the next piece of the current element's payload, or `Ready(None)` once all of it
    /// has been returned.
    pub fn read_binary_chunk<'a>(
        &mut self,
        input: &mut &'a [u8],
    ) -> Result<Parsed<Option<&'a [u8]>>> {
        let element = match self.cursor.current() {
            Some(element) => *element,
            None => return sequence_error("ebml: no current element"),
        };

        let unread = match element.unread() {
            Some(unread) => unread,
            None => return decode_error("ebml: unknown-size element has no binary payload"),
        };

        if unread == 0 {
            return Ok(Parsed::Ready(None));
        }

        if input.is_empty() {
            return self.starved();
        }

        let len = unread.min(input.len() as u64) as usize;
        let (chunk, rest) = input.split_at(len);
        *input = rest;
        self.pos += len as u64;
        self.cursor.mark_read(len as u64);

        Ok(Parsed::Ready(Some(chunk)))
    }

    /// Reads the payload of the current element as an ASCII string. The payload may arrive over
    /// several calls.
    pub fn read_ascii(&mut self, input: &mut &[u8]) -> Result<Parsed<String>> {
        if self.text.is_none() {
            self.cursor.buffered_payload_len()?;
            self.text = Some(TextDecoder::ascii(self.options().text_policy));
        }
        self.read_text(input)
    }

    /// Reads the payload of the current element as a UTF-8 string. The payload may arrive over
    /// several calls.
    pub fn read_utf8(&mut self, input: &mut &[u8]) -> Result<Parsed<String>> {
        if self.text.is_none() {
            self.cursor.buffered_payload_len()?;
            self.text = Some(TextDecoder::utf8(self.options().text_policy));
        }
        self.read_text(input)
    }

    fn read_text(&mut self, input: &mut &[u8]) -> Result<Parsed<String>> {
        loop {
            let chunk = match self.read_binary_chunk(input) {
                Ok(Parsed::Ready(chunk)) => chunk,
                Ok(Parsed::NeedMoreData) => return Ok(Parsed::NeedMoreData),
                Err(err) => {
                    self.text = None;
                    return Err(err);
                }
            };

            let decoder = match self.text.as_mut() {
                Some(decoder) => decoder,
                None => return sequence_error("ebml: no string payload in progress"),
            };

            match chunk {
                Some(chunk) => {
                    if let Err(err) = decoder.feed(chunk) {
                        self.text = None;
                        return Err(err);
                    }
                }
                None => {
                    let decoder = self.text.take();
                    return match decoder {
                        Some(decoder) => decoder.finish().map(Parsed::Ready),
                        None => sequence_error("ebml: no string payload in progress"),
                    };
                }
            }
        }
    }

    /// Fails if a different operation was interrupted while closing containers.
    fn resume(&self, op: Op) -> Result<()> {
        match self.unwind {
            Some(unwind) if unwind.op != op => {
                sequence_error("ebml: an interrupted operation must be retried first")
            }
            _ => Ok(()),
        }
    }

    fn starved<T>(&self) -> Result<Parsed<T>> {
        if self.end_of_input {
            end_of_stream_error()
        }
        else {
            Ok(Parsed::NeedMoreData)
        }
    }

    /// Consumes up to `count` bytes of input. Returns the number consumed.
    fn consume(&mut self, input: &mut &[u8], count: u64) -> u64 {
        let len = count.min(input.len() as u64);
        *input = &input[len as usize..];
        self.pos += len;
        len
    }

    fn check_scalar_len(&self, too_long: fn(u64) -> Error) -> Result<()> {
        let len = self.cursor.payload_len()?;

        if len > MAX_INTEGER_LEN {
            return Err(too_long(len));
        }

        Ok(())
    }

    /// Takes the whole payload of the current element, or nothing.
    fn take_payload<'a>(&mut self, input: &mut &'a [u8]) -> Result<Parsed<&'a [u8]>> {
        let len = self.cursor.payload_len()?;

        if (input.len() as u64) < len {
            return self.starved();
        }

        let (payload, rest) = input.split_at(len as usize);
        *input = rest;
        self.pos += len;
        self.cursor.mark_read(len);

        Ok(Parsed::Ready(payload))
    }

    fn skip(&mut self, input: &mut &[u8], op: Op) -> Result<Parsed<()>> {
        if self.unwind.is_some() {
            return self.unwind(input);
        }

        self.text = None;

        let element = match self.cursor.current() {
            Some(element) => *element,
            None => return Ok(Parsed::Ready(())),
        };

        match element.unread() {
            Some(unread) => {
                let skipped = self.consume(input, unread);
                self.cursor.mark_read(skipped);

                if skipped < unread {
                    return self.starved();
                }

                self.cursor.clear_current();
                Ok(Parsed::Ready(()))
            }
            None => {
                let depth = self.cursor.depth();
                self.cursor.enter_for_skip(self.pos)?;
                self.unwind = Some(Unwind { target: depth, op });
                self.unwind(input)
            }
        }
    }

    /// Closes containers until the unwind target is reached.
    fn unwind(&mut self, input: &mut &[u8]) -> Result<Parsed<()>> {
        while let Some(unwind) = self.unwind {
            if self.cursor.depth() <= unwind.target {
                self.unwind = None;
                break;
            }

            // Finish with the current child first.
            if let Some(element) = self.cursor.current().copied() {
                match element.unread() {
                    Some(unread) => {
                        let skipped = self.consume(input, unread);
                        self.cursor.mark_read(skipped);

                        if skipped < unread {
                            return self.starved();
                        }

                        self.cursor.clear_current();
                    }
                    None => self.cursor.enter_for_skip(self.pos)?,
                }
                continue;
            }

            let frame = match self.cursor.top() {
                Some(frame) => *frame,
                None => {
                    self.unwind = None;
                    break;
                }
            };

            match frame.end {
                Some(end) => {
                    self.cursor.discard_pending();

                    let left = end.saturating_sub(self.pos);

                    if self.consume(input, left) < left {
                        return self.starved();
                    }

                    self.cursor.pop();
                }
                None => match self.read_header(input)? {
                    Parsed::NeedMoreData => return Ok(Parsed::NeedMoreData),
                    Parsed::Ready(Some(_)) => (),
                    Parsed::Ready(None) => {
                        self.cursor.pop();
                    }
                },
            }
        }

        Ok(Parsed::Ready(()))
    }

    /// Reads the next header in the innermost container. The current element must be done.
    fn read_header(&mut self, input: &mut &[u8]) -> Result<Parsed<Option<ElementHeader>>> {
        let bounded = match self.cursor.next_step(self.pos) {
            Step::Ready(header) => return Ok(Parsed::Ready(Some(header))),
            Step::EndOfParent => return Ok(Parsed::Ready(None)),
            Step::ReadHeader { bounded } => bounded,
        };

        match parse_header(input)? {
            Parsed::Ready((header, len)) => {
                let start = self.pos;
                self.consume(input, len as u64);
                self.cursor.accept_header(header, start, len as u64).map(Parsed::Ready)
            }
            Parsed::NeedMoreData if self.end_of_input && input.is_empty() && !bounded => {
                self.cursor.set_end_of_stream();
                Ok(Parsed::Ready(None))
            }
            Parsed::NeedMoreData => self.starved(),
        }
    }
}

#[cfg(test)]
mod tests {
    use ebml_core::errors::Error;

    use super::IncrementalReader;
    use crate::header::{ElementHeader, UNKNOWN_LENGTH};
    use crate::reader::ReaderOptions;
    use crate::schema::ids;
    use crate::{Parsed, Result};

    fn element(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        ElementHeader::new(id, payload.len() as i64).write(&mut buf).unwrap();
        buf.extend_from_slice(payload);
        buf
    }

    /// Feeds `data` one byte at a time until `op` completes. Bytes are appended after the
    /// unconsumed ones, as a network client would do.
    struct Feeder<'d> {
        data: &'d [u8],
        consumed: usize,
        available: usize,
    }

    impl<'d> Feeder<'d> {
        fn new(data: &'d [u8]) -> Self {
            Feeder { data, consumed: 0, available: 0 }
        }

        fn run<T, F>(&mut self, reader: &mut IncrementalReader, mut op: F) -> Result<T>
        where
            F: FnMut(&mut IncrementalReader, &mut &[u8]) -> Result<Parsed<T>>,
        {
            loop {
                let mut input = &self.data[self.consumed..self.available];
                let before = input.len();
                let result = op(reader, &mut input)?;
                self.consumed += before - input.len();

                match result {
                    Parsed::Ready(value) => return Ok(value),
                    Parsed::NeedMoreData if self.available < self.data.len() => self.available += 1,
                    Parsed::NeedMoreData => reader.set_end_of_input(),
                }
            }
        }
    }

    #[test]
    fn verify_partial_header_not_consumed() {
        let doc = element(ids::TIMESTAMP_SCALE, &[0x0f, 0x42, 0x40]);
        let mut reader = IncrementalReader::default();

        let mut input = &doc[..3];
        assert_eq!(reader.advance_to_next(&mut input).unwrap(), Parsed::NeedMoreData);
        assert_eq!(input.len(), 3);
        assert_eq!(reader.pos(), 0);

        let mut input = &doc[..5];
        let header = reader.advance_to_next(&mut input).unwrap();
        assert_eq!(header, Parsed::Ready(Some(ElementHeader::new(ids::TIMESTAMP_SCALE, 3))));
        assert_eq!(input.len(), 1);

        // A scalar is only consumed when complete.
        assert_eq!(reader.read_unsigned(&mut input).unwrap(), Parsed::NeedMoreData);
        assert_eq!(input.len(), 1);

        let mut input = &doc[4..];
        assert_eq!(reader.read_unsigned(&mut input).unwrap(), Parsed::Ready(1_000_000));
        assert!(input.is_empty());
    }

    #[test]
    fn verify_clean_end_vs_truncation() {
        let doc = element(0x81, &[0x2a]);

        let mut reader = IncrementalReader::default();
        let mut feeder = Feeder::new(&doc);

        let header = feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        assert_eq!(header, Some(ElementHeader::new(0x81, 1)));
        assert_eq!(feeder.run(&mut reader, |r, input| r.read_unsigned(input)).unwrap(), 42);
        assert_eq!(feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap(), None);

        let mut reader = IncrementalReader::default();
        let mut input = &doc[..2];
        reader.set_end_of_input();
        reader.advance_to_next(&mut input).unwrap();
        assert!(matches!(reader.read_unsigned(&mut input), Err(Error::UnexpectedEndOfInput)));
    }

    #[test]
    fn verify_nested_overrun() {
        let mut doc = Vec::new();
        ElementHeader::new(ids::EBML, 20).write(&mut doc).unwrap();
        doc.extend(element(ids::VOID, &[0; 6]));
        doc.extend(element(ids::VOID, &[0; 6]));
        doc.extend(element(ids::VOID, &[0; 4]));

        let mut reader = IncrementalReader::default();
        let mut feeder = Feeder::new(&doc);

        feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        reader.enter_container().unwrap();
        feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        feeder.run(&mut reader, |r, input| r.skip_current(input)).unwrap();
        assert_eq!(reader.remaining(), Some(4));

        let err = feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap_err();
        assert!(matches!(err, Error::ElementExceedsParent { required: 6, remaining: 4, .. }));
    }

    #[test]
    fn verify_leave_unknown_size_container() {
        let mut cluster = Vec::new();
        ElementHeader::new(ids::CLUSTER, UNKNOWN_LENGTH).write(&mut cluster).unwrap();
        cluster.extend(element(ids::TIMESTAMP, &[5]));
        cluster.extend(element(ids::SIMPLE_BLOCK, &[0x81, 0, 0, 0x80]));

        let mut doc = cluster.clone();
        doc.extend(element(ids::CUES, &[]));

        let mut reader = IncrementalReader::default();
        let mut feeder = Feeder::new(&doc);

        feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        reader.enter_container().unwrap();
        feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();

        // Leaving reads ahead until the cues, which cannot be inside a cluster.
        feeder.run(&mut reader, |r, input| r.leave_container(input)).unwrap();
        assert_eq!(reader.depth(), 0);

        let next = feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        assert_eq!(next, Some(ElementHeader::new(ids::CUES, 0)));
        assert_eq!(feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap(), None);
        assert_eq!(reader.pos(), doc.len() as u64);
    }

    #[test]
    fn verify_interrupted_leave_must_resume() {
        let mut doc = Vec::new();
        ElementHeader::new(ids::INFO, 8).write(&mut doc).unwrap();
        doc.extend(element(ids::TITLE, b"abcde"));

        let mut reader = IncrementalReader::default();
        let mut input = &doc[..];
        reader.advance_to_next(&mut input).unwrap();
        reader.enter_container().unwrap();

        let mut input = &doc[5..9];
        assert_eq!(reader.leave_container(&mut input).unwrap(), Parsed::NeedMoreData);
        assert!(input.is_empty());

        assert!(matches!(reader.advance_to_next(&mut input), Err(Error::OperationSequence(_))));
        assert!(matches!(reader.enter_container(), Err(Error::OperationSequence(_))));

        let mut input = &doc[9..];
        assert_eq!(reader.leave_container(&mut input).unwrap(), Parsed::Ready(()));
        assert_eq!(reader.depth(), 0);
        assert_eq!(reader.pos(), doc.len() as u64);
    }

    #[test]
    fn verify_streamed_text() {
        let doc = element(ids::TITLE, "naïve".as_bytes());
        let mut reader = IncrementalReader::default();
        let mut feeder = Feeder::new(&doc);

        feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        let title = feeder.run(&mut reader, |r, input| r.read_utf8(input)).unwrap();
        assert_eq!(title, "naïve");
    }

    #[test]
    fn verify_binary_chunks() {
        let doc = element(ids::CODEC_PRIVATE, &[1, 2, 3, 4, 5]);
        let mut reader = IncrementalReader::default();

        let mut input = &doc[..5];
        reader.advance_to_next(&mut input).unwrap();
        assert_eq!(reader.read_binary_chunk(&mut input).unwrap(), Parsed::Ready(Some(&[1, 2][..])));
        assert_eq!(reader.read_binary_chunk(&mut input).unwrap(), Parsed::NeedMoreData);

        let mut input = &doc[5..];
        let chunk = reader.read_binary_chunk(&mut input).unwrap();
        assert_eq!(chunk, Parsed::Ready(Some(&[3, 4, 5][..])));
        assert_eq!(reader.read_binary_chunk(&mut input).unwrap(), Parsed::Ready(None));
    }

    #[test]
    fn verify_skip_ignores_depth_limit() {
        let mut cluster = Vec::new();
        ElementHeader::new(ids::CLUSTER, UNKNOWN_LENGTH).write(&mut cluster).unwrap();
        cluster.extend(element(ids::SIMPLE_BLOCK, &[0x81, 0, 0, 0x80]));

        let mut segment = cluster;
        segment.extend(element(ids::CUES, &[]));
        let doc = element(ids::SEGMENT, &segment);

        let options = ReaderOptions { max_depth: Some(1), ..Default::default() };
        let mut reader = IncrementalReader::new(options);
        let mut feeder = Feeder::new(&doc);

        feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        reader.enter_container().unwrap();
        let header = feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        assert_eq!(header.map(|h| h.id), Some(ids::CLUSTER));

        assert!(matches!(reader.enter_container(), Err(Error::LimitError(_))));
        let header = feeder.run(&mut reader, |r, input| r.advance_to_next(input)).unwrap();
        assert_eq!(header.map(|h| h.id), Some(ids::CUES));
        assert_eq!(reader.depth(), 1);
    }
}
