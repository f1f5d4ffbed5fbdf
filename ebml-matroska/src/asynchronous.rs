// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An EBML reader over a tokio [`AsyncRead`].
//!
//! Bytes are pulled into a staging buffer and decoded by an [`IncrementalReader`]. A future only
//! suspends while waiting for the source, and every byte it received is either staged or already
//! decoded. Dropping a pending future therefore leaves the reader exactly where the last
//! completed unit (a header, a scalar, or a skipped range) left it, and the operation can simply
//! be issued again.

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

use ebml_core::errors::Result;

use crate::header::ElementHeader;
use crate::incremental::IncrementalReader;
use crate::reader::ReaderOptions;
use crate::view::ElementView;
use crate::Parsed;

/// Bytes requested from the source per read.
const READ_LEN: usize = 4096;

pub struct AsyncEbmlReader<R> {
    reader: R,
    staging: Vec<u8>,
    engine: IncrementalReader,
}

impl<R: AsyncRead + Unpin> AsyncEbmlReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, Default::default())
    }

    pub fn with_options(reader: R, options: ReaderOptions) -> Self {
        AsyncEbmlReader { reader, staging: Vec::new(), engine: IncrementalReader::new(options) }
    }

    /// Moves to the next element in the innermost open container. `None` means the container
    /// has no more children, or the source ended at a top-level element boundary.
    pub async fn advance_to_next(&mut self) -> Result<Option<ElementHeader>> {
        self.drive(|engine, input| engine.advance_to_next(input)).await
    }

    /// Skips the unread payload of the current element.
    pub async fn skip_current(&mut self) -> Result<()> {
        self.drive(|engine, input| engine.skip_current(input)).await
    }

    /// Opens the current element as a container. This never waits on the source.
    pub fn enter_container(&mut self) -> Result<()> {
        self.engine.enter_container()
    }

    /// Closes the innermost container, skipping any children that were not read.
    pub async fn leave_container(&mut self) -> Result<()> {
        self.drive(|engine, input| engine.leave_container(input)).await
    }

    pub async fn read_unsigned(&mut self) -> Result<u64> {
        self.drive(|engine, input| engine.read_unsigned(input)).await
    }

    pub async fn read_signed(&mut self) -> Result<i64> {
        self.drive(|engine, input| engine.read_signed(input)).await
    }

    pub async fn read_float(&mut self) -> Result<f64> {
        self.drive(|engine, input| engine.read_float(input)).await
    }

    pub async fn read_date(&mut self) -> Result<DateTime<Utc>> {
        self.drive(|engine, input| engine.read_date(input)).await
    }

    pub async fn read_ascii(&mut self) -> Result<String> {
        self.drive(|engine, input| engine.read_ascii(input)).await
    }

    pub async fn read_utf8(&mut self) -> Result<String> {
        self.drive(|engine, input| engine.read_utf8(input)).await
    }

    /// Reads the payload of the current element into memory.
    pub async fn read_binary(&mut self) -> Result<Box<[u8]>> {
        self.drive(|engine, input| engine.read_binary(input)).await
    }

    /// Reads the payload of the current element into an owning [`ElementView`].
    pub async fn read_view(&mut self) -> Result<ElementView> {
        Ok(ElementView::new(self.read_binary().await?.into_vec()))
    }

    pub fn depth(&self) -> usize {
        self.engine.depth()
    }

    /// Returns the number of bytes decoded so far.
    pub fn pos(&self) -> u64 {
        self.engine.pos()
    }

    pub fn current(&self) -> Option<ElementHeader> {
        self.engine.current()
    }

    pub fn consumed(&self) -> u64 {
        self.engine.consumed()
    }

    pub fn remaining(&self) -> Option<u64> {
        self.engine.remaining()
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Unwraps this `AsyncEbmlReader`, returning the source. Staged bytes are lost.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Runs `op` over the staged bytes, reading more from the source until it completes.
    async fn drive<T, F>(&mut self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut IncrementalReader, &mut &[u8]) -> Result<Parsed<T>>,
    {
        loop {
            let mut input = &self.staging[..];
            let result = op(&mut self.engine, &mut input);

            let consumed = self.staging.len() - input.len();
            self.staging.drain(..consumed);

            match result? {
                Parsed::Ready(value) => return Ok(value),
                Parsed::NeedMoreData => self.fill().await?,
            }
        }
    }

    /// Appends the next bytes from the source to the staging buffer.
    async fn fill(&mut self) -> Result<()> {
        let mut buf = [0u8; READ_LEN];

        // Cancel safe. Nothing is received if the future is dropped here.
        let count = self.reader.read(&mut buf).await?;

        if count == 0 {
            self.engine.set_end_of_input();
        }
        else {
            self.staging.extend_from_slice(&buf[..count]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, ReadBuf};

    use super::AsyncEbmlReader;
    use crate::header::{ElementHeader, UNKNOWN_LENGTH};
    use crate::schema::ids;

    /// Returns one byte per read, and is not ready on every other poll.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        stall: bool,
    }

    impl Trickle {
        fn new(data: Vec<u8>) -> Self {
            Trickle { data, pos: 0, stall: true }
        }
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.stall {
                self.stall = false;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }

            self.stall = true;

            if self.pos < self.data.len() && buf.remaining() > 0 {
                let pos = self.pos;
                buf.put_slice(&self.data[pos..pos + 1]);
                self.pos += 1;
            }

            Poll::Ready(Ok(()))
        }
    }

    fn element(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        ElementHeader::new(id, payload.len() as i64).write(&mut buf).unwrap();
        buf.extend_from_slice(payload);
        buf
    }

    fn sample() -> Vec<u8> {
        let mut info = Vec::new();
        info.extend(element(ids::TITLE, b"trickle"));
        info.extend(element(ids::DURATION, &2.0f64.to_be_bytes()));

        let mut segment = Vec::new();
        ElementHeader::new(ids::SEGMENT, UNKNOWN_LENGTH).write(&mut segment).unwrap();
        segment.extend(element(ids::INFO, &info));
        segment.extend(element(ids::CUES, &[]));
        segment
    }

    #[tokio::test]
    async fn verify_async_traversal() {
        let mut reader = AsyncEbmlReader::new(Trickle::new(sample()));

        assert_eq!(reader.advance_to_next().await.unwrap().unwrap().id, ids::SEGMENT);
        reader.enter_container().unwrap();
        assert_eq!(reader.advance_to_next().await.unwrap().unwrap().id, ids::INFO);
        reader.enter_container().unwrap();
        assert_eq!(reader.advance_to_next().await.unwrap().unwrap().id, ids::TITLE);
        assert_eq!(reader.read_utf8().await.unwrap(), "trickle");
        reader.leave_container().await.unwrap();

        assert_eq!(reader.advance_to_next().await.unwrap().unwrap().id, ids::CUES);
        assert_eq!(reader.advance_to_next().await.unwrap(), None);
        reader.leave_container().await.unwrap();
        assert_eq!(reader.advance_to_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn verify_cancelled_reads_resume() {
        let mut reader = AsyncEbmlReader::new(Trickle::new(sample()));

        // Each cancelled attempt receives at most one byte of the segment ID.
        for _ in 0..3 {
            tokio::select! {
                biased;
                _ = reader.advance_to_next() => panic!("read should be pending"),
                _ = std::future::ready(()) => (),
            }
            assert_eq!(reader.pos(), 0);
        }

        let header = reader.advance_to_next().await.unwrap();
        assert_eq!(header, Some(ElementHeader::new(ids::SEGMENT, UNKNOWN_LENGTH)));
        reader.enter_container().unwrap();
        reader.advance_to_next().await.unwrap();
        reader.enter_container().unwrap();
        reader.advance_to_next().await.unwrap();

        // Cancel a skip midway. The skipped bytes stay skipped.
        for _ in 0..4 {
            tokio::select! {
                biased;
                _ = reader.skip_current() => panic!("skip should be pending"),
                _ = std::future::ready(()) => (),
            }
        }

        assert_eq!(reader.advance_to_next().await.unwrap().unwrap().id, ids::DURATION);
        assert_eq!(reader.read_float().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn verify_truncated_source() {
        let mut doc = sample();
        doc.truncate(12);

        let mut reader = AsyncEbmlReader::new(&doc[..]);
        reader.advance_to_next().await.unwrap();
        reader.enter_container().unwrap();
        assert_eq!(reader.advance_to_next().await.unwrap().unwrap().id, ids::INFO);

        // The source ends inside the info element.
        let err = reader.advance_to_next().await.unwrap_err();
        assert!(err.is_truncation());
    }
}
