// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A streaming EBML reader with a Matroska/WebM element layer.
//!
//! The core is a stack-based cursor that tracks the remaining byte budget of every open master
//! element while walking a byte source. Three flavours share that cursor:
//!
//!  * [`reader::EbmlReader`] pulls bytes from any blocking [`ebml_core::io::ReadBytes`] source.
//!  * [`incremental::IncrementalReader`] is fed caller-owned partial buffers and reports
//!    [`Parsed::NeedMoreData`] instead of blocking.
//!  * [`asynchronous::AsyncEbmlReader`] drives the incremental reader from a tokio `AsyncRead`.
//!
//! Decoded elements can be bound onto plain structs with the dispatch tables in [`binding`]. The
//! records of a Matroska segment are defined in [`document`].

pub mod asynchronous;
pub mod binding;
pub mod cursor;
pub mod document;
pub mod header;
pub mod incremental;
pub mod reader;
pub mod scalar;
pub mod schema;
pub mod view;
pub mod vint;

pub use ebml_core::errors::{Error, Result};
pub use header::ElementHeader;
pub use reader::{EbmlReader, ReaderOptions};
pub use scalar::TextPolicy;
pub use view::ElementView;

/// The outcome of an operation over a partial input buffer.
///
/// Running out of input is not an error for incremental parsing. The operation did not consume
/// any part of an undecoded unit, and may be retried once more bytes are available.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parsed<T> {
    /// The operation completed.
    Ready(T),
    /// More input is required to complete the operation.
    NeedMoreData,
}

impl<T> Parsed<T> {
    /// Returns `true` if the operation completed.
    pub fn is_ready(&self) -> bool {
        matches!(self, Parsed::Ready(_))
    }

    /// Converts into an `Option`, discarding the need-more-data indication.
    pub fn ready(self) -> Option<T> {
        match self {
            Parsed::Ready(value) => Some(value),
            Parsed::NeedMoreData => None,
        }
    }

    /// Maps a completed value with `f`.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Parsed<U> {
        match self {
            Parsed::Ready(value) => Parsed::Ready(f(value)),
            Parsed::NeedMoreData => Parsed::NeedMoreData,
        }
    }
}

impl<T> Parsed<Result<T>> {
    /// Transposes a `Parsed` of a `Result` into a `Result` of a `Parsed`.
    pub fn transpose(self) -> Result<Parsed<T>> {
        match self {
            Parsed::Ready(Ok(value)) => Ok(Parsed::Ready(value)),
            Parsed::Ready(Err(err)) => Err(err),
            Parsed::NeedMoreData => Ok(Parsed::NeedMoreData),
        }
    }
}
