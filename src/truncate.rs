// Copyright (C) 2022-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of dlt-user.
//
// dlt-user is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! Fitting string arguments into what's left of the envelope.
//!
//! When a string argument won't fit, as much of it as possible is kept & followed by
//! [`TRUNCATION_MARKER`] (NUL-terminated), so that whoever reads the log can tell. If there isn't
//! even room for the marker, the argument is written with zero length.
//!
//! UTF-8 arguments are never cut inside a code point: if the cut falls one, two or three bytes
//! into a multi-byte sequence, the whole sequence is dropped.

/// Appended to any string argument that had to be shortened
pub const TRUNCATION_MARKER: &str = "... <<Message truncated, too long>>";

/// Bytes the marker occupies on the wire, including its NUL terminator
pub const MARKER_LEN: usize = TRUNCATION_MARKER.len() + 1;

/// How much of a string argument to write
#[derive(Debug, PartialEq, Eq)]
pub enum Fit {
    /// The whole thing, plus terminator
    Whole,
    /// The first `n` bytes, then the marker
    Truncated(usize),
    /// Nothing at all; a zero-length value
    Empty,
}

/// Decide how much of `text` fits into `room` bytes (where `room` must also accommodate the
/// NUL terminator).
pub fn fit(text: &[u8], utf8: bool, room: usize) -> Fit {
    if text.len() < room {
        return Fit::Whole;
    }
    match room.checked_sub(MARKER_LEN) {
        None => Fit::Empty,
        Some(budget) => Fit::Truncated(if utf8 {
            utf8_boundary(text, budget)
        } else {
            budget
        }),
    }
}

/// The largest `n <= at` such that `text[..n]` doesn't end inside a multi-byte UTF-8 sequence.
pub fn utf8_boundary(text: &[u8], at: usize) -> usize {
    if at >= text.len() {
        return text.len();
    }
    let mut n = at;
    // Any continuation byte (0b10xx_xxxx) at the cut belongs to a code point that started
    // before it.
    while n > 0 && (text[n] & 0xc0) == 0x80 {
        n -= 1;
    }
    n
}
