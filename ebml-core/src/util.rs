// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `util` module provides a repository of commonly used utility functions sorted into distinct
//! categories.

pub mod bits {
    //! Utilities for bit manipulation.

    /// Sign extends an arbitrary, 64-bit or less, signed two's complement integer stored within an
    /// u64 to a full width i64.
    ///
    /// A `width` of 0 yields 0.
    #[inline(always)]
    pub fn sign_extend_leq64_to_i64(value: u64, width: u32) -> i64 {
        debug_assert!(width <= 64);
        if width == 0 {
            return 0;
        }
        // Rust uses an arithmetic shift right for signed integer types. Shift the value to the
        // left-hand side of the integer, then shift it back to extend the sign bit.
        (value.wrapping_shl(64 - width) as i64).wrapping_shr(64 - width)
    }

    /// Returns a mask with the lower `width` bits set.
    #[inline(always)]
    pub fn mask_lower_u64(width: u32) -> u64 {
        debug_assert!(width <= 64);
        if width == 64 {
            u64::MAX
        }
        else {
            (1 << width) - 1
        }
    }

    /// Returns the number of bytes needed to hold the significant bits of `value`, at least 1.
    #[inline(always)]
    pub fn significant_bytes_u64(value: u64) -> u32 {
        ((64 - value.leading_zeros() + 7) / 8).max(1)
    }
}
