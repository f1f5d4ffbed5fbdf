// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The container stack shared by every reader.
//!
//! The cursor holds no bytes and performs no I/O. Readers report positions to it and ask it what
//! to do next. Positions are absolute offsets in the source.

use ebml_core::errors::{decode_error, limit_error, sequence_error, Result};

use crate::header::ElementHeader;
use crate::reader::ReaderOptions;

/// One open master element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// The master element ID.
    pub id: u32,
    /// Position of the first child.
    pub start: u64,
    /// Position just past the last child, or `None` for an unknown-size element.
    pub end: Option<u64>,
    /// Schema level of the master element, if known.
    level: Option<u8>,
}

impl Frame {
    /// Returns `true` if the element was written with an unknown size.
    pub fn is_unknown_size(&self) -> bool {
        self.end.is_none()
    }

    /// Bytes of children left at `pos`, or `None` for an unknown-size element.
    pub fn remaining(&self, pos: u64) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(pos))
    }

    /// Bytes of children consumed at `pos`.
    pub fn consumed(&self, pos: u64) -> u64 {
        pos.saturating_sub(self.start)
    }
}

/// The element whose header was read most recently.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Element {
    pub header: ElementHeader,
    /// Position of the first octet of the payload.
    pub data_pos: u64,
    /// Payload octets consumed so far.
    pub read: u64,
}

impl Element {
    /// Payload octets not consumed yet, or `None` if the size is unknown.
    pub fn unread(&self) -> Option<u64> {
        self.header.data_len().map(|len| len - self.read)
    }
}

/// What a reader must do to find the next element.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Step {
    /// An element read ahead earlier is now current.
    Ready(ElementHeader),
    /// The innermost container has no more children, or the source is exhausted.
    EndOfParent,
    /// Read a header. If `bounded` is false no ancestor limits the read, and a clean end of the
    /// source at this point ends the stream.
    ReadHeader { bounded: bool },
}

pub(crate) struct Cursor {
    options: ReaderOptions,
    stack: Vec<Frame>,
    current: Option<Element>,
    /// A header read inside an unknown-size element that turned out to follow it.
    lookahead: Option<Element>,
    end_of_stream: bool,
}

impl Cursor {
    pub fn new(options: ReaderOptions) -> Self {
        Cursor { options, stack: Vec::new(), current: None, lookahead: None, end_of_stream: false }
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.stack.last()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.stack
    }

    pub fn current(&self) -> Option<&Element> {
        self.current.as_ref()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// The end of the nearest ancestor with a known size.
    pub fn bound(&self) -> Option<u64> {
        self.stack.iter().rev().find_map(|frame| frame.end)
    }

    /// Records that the source ended cleanly at an element boundary.
    pub fn set_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    /// Forgets the current element. Its payload must already be consumed or skipped.
    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Forgets the current element and any read-ahead header. Used when the rest of a container
    /// is skipped wholesale.
    pub fn discard_pending(&mut self) {
        self.current = None;
        self.lookahead = None;
    }

    /// Records `count` payload octets of the current element as consumed.
    pub fn mark_read(&mut self, count: u64) {
        if let Some(element) = self.current.as_mut() {
            element.read += count;
        }
    }

    /// Returns the payload length of the current element for a whole-payload read.
    pub fn payload_len(&self) -> Result<u64> {
        let element = match self.current {
            Some(element) => element,
            None => return sequence_error("ebml: no current element"),
        };

        if element.read != 0 {
            return sequence_error("ebml: element payload was already consumed");
        }

        match element.header.data_len() {
            Some(len) => Ok(len),
            None => decode_error("ebml: unknown-size element has no scalar payload"),
        }
    }

    /// Checks the payload length of the current element against the buffering limit.
    pub fn buffered_payload_len(&self) -> Result<u64> {
        let len = self.payload_len()?;

        if len > self.options.max_payload_len {
            return limit_error("ebml: element payload exceeds the buffering limit");
        }

        Ok(len)
    }

    /// Decides how to find the next element. The current element must have been skipped.
    pub fn next_step(&mut self, pos: u64) -> Step {
        debug_assert!(self.current.is_none());

        if let Some(next) = self.lookahead {
            if let Some(top) = self.stack.last() {
                if top.is_unknown_size() && !self.may_contain(top, next.header.id) {
                    return Step::EndOfParent;
                }
            }

            self.lookahead = None;
            self.current = Some(next);
            return Step::Ready(next.header);
        }

        let top = match self.stack.last() {
            Some(top) => top,
            None if self.end_of_stream => return Step::EndOfParent,
            None => return Step::ReadHeader { bounded: false },
        };

        match top.end {
            Some(end) if pos >= end => Step::EndOfParent,
            Some(_) => Step::ReadHeader { bounded: true },
            None => {
                if self.end_of_stream {
                    return Step::EndOfParent;
                }

                match self.bound() {
                    Some(bound) if pos >= bound => {
                        log::debug!("unknown-size element {:#x} ends with its parent", top.id);
                        Step::EndOfParent
                    }
                    Some(_) => Step::ReadHeader { bounded: true },
                    None => Step::ReadHeader { bounded: false },
                }
            }
        }
    }

    /// Accepts a freshly read header that starts at `start` and is `header_len` octets long.
    ///
    /// Returns `Ok(None)` if the header ends the innermost unknown-size element instead. It is
    /// then held and returned by a later [`Cursor::next_step`] at the proper level.
    pub fn accept_header(
        &mut self,
        header: ElementHeader,
        start: u64,
        header_len: u64,
    ) -> Result<Option<ElementHeader>> {
        if let Some(bound) = self.bound() {
            header.check_fits(header_len, bound.saturating_sub(start))?;
        }

        let element = Element { header, data_pos: start + header_len, read: 0 };

        if let Some(top) = self.stack.last() {
            if top.is_unknown_size() && !self.may_contain(top, header.id) {
                log::debug!(
                    "element {:#x} at {} ends unknown-size element {:#x}",
                    header.id,
                    start,
                    top.id
                );
                self.lookahead = Some(element);
                return Ok(None);
            }
        }

        self.validate(&header);
        self.current = Some(element);

        Ok(Some(header))
    }

    /// Opens the current element as a container. `pos` must be the start of its payload.
    pub fn enter(&mut self, pos: u64) -> Result<()> {
        self.open(pos, true)
    }

    /// Opens the current element in order to skip it. The nesting cap does not apply because the
    /// caller never visits the children.
    pub fn enter_for_skip(&mut self, pos: u64) -> Result<()> {
        self.open(pos, false)
    }

    fn open(&mut self, pos: u64, check_depth: bool) -> Result<()> {
        let element = match self.current {
            Some(element) => element,
            None => return sequence_error("ebml: no current element to enter"),
        };

        if element.read != 0 || pos != element.data_pos {
            return sequence_error("ebml: element payload was already consumed");
        }

        if let Some(max_depth) = self.options.max_depth.filter(|_| check_depth) {
            if self.stack.len() >= max_depth {
                return limit_error("ebml: maximum nesting depth exceeded");
            }
        }

        let level = self
            .options
            .schema
            .and_then(|schema| schema.get(element.header.id))
            .map(|info| info.level);

        self.stack.push(Frame {
            id: element.header.id,
            start: element.data_pos,
            end: element.header.data_len().map(|len| element.data_pos + len),
            level,
        });

        self.current = None;
        Ok(())
    }

    /// Closes the innermost container. Its remaining children must have been skipped.
    pub fn pop(&mut self) -> Option<Frame> {
        self.current = None;
        self.stack.pop()
    }

    /// Returns `false` only if the schema proves that `id` cannot occur inside `frame`.
    fn may_contain(&self, frame: &Frame, id: u32) -> bool {
        let schema = match self.options.schema {
            Some(schema) => schema,
            None => return true,
        };

        match (frame.level, schema.get(id)) {
            (Some(level), Some(info)) => info.may_descend_from(level),
            _ => true,
        }
    }

    fn validate(&self, header: &ElementHeader) {
        if !self.options.validate_lengths {
            return;
        }

        if let Some(info) = self.options.schema.and_then(|schema| schema.get(header.id)) {
            if !info.length_is_valid(header.length) {
                log::warn!(
                    "element {} ({:#x}) has an invalid size {}",
                    info.name,
                    header.id,
                    header.length
                );
            }
        }
    }
}
