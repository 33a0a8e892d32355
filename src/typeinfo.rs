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

//! Verbose-mode argument type information.
//!
//! Every argument of a verbose message is preceded by a 32-bit "type info" word. Its low nibble
//! gives the value's width, the next bits its family, and bits 15 through 17 the "string coding",
//! which for strings is the character set & for integers a display hint.

use bytes::BufMut;

pub const TYLE_8BIT: u32 = 0x0000_0001;
pub const TYLE_16BIT: u32 = 0x0000_0002;
pub const TYLE_32BIT: u32 = 0x0000_0003;
pub const TYLE_64BIT: u32 = 0x0000_0004;
pub const TYLE_128BIT: u32 = 0x0000_0005;
pub const TYLE_MASK: u32 = 0x0000_000f;

pub const TYPE_BOOL: u32 = 0x0000_0010;
pub const TYPE_SINT: u32 = 0x0000_0020;
pub const TYPE_UINT: u32 = 0x0000_0040;
pub const TYPE_FLOA: u32 = 0x0000_0080;
pub const TYPE_ARAY: u32 = 0x0000_0100;
pub const TYPE_STRG: u32 = 0x0000_0200;
pub const TYPE_RAWD: u32 = 0x0000_0400;
pub const TYPE_VARI: u32 = 0x0000_0800;
pub const TYPE_FIXP: u32 = 0x0000_1000;
pub const TYPE_TRAI: u32 = 0x0000_2000;
pub const TYPE_STRU: u32 = 0x0000_4000;

pub const SCOD_ASCII: u32 = 0x0000_0000;
pub const SCOD_UTF8: u32 = 0x0000_8000;
pub const SCOD_HEX: u32 = 0x0001_0000;
pub const SCOD_BIN: u32 = 0x0001_8000;
pub const SCOD_MASK: u32 = 0x0003_8000;

/// How a decoder should display an integer or raw block.
///
/// This changes only the hint carried in the type info word; the encoded width of the value is
/// whatever its Rust type dictates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FormatHint {
    #[default]
    Default,
    Hex8,
    Hex16,
    Hex32,
    Hex64,
    Bin8,
    Bin16,
}

impl FormatHint {
    pub fn scod(self) -> u32 {
        match self {
            FormatHint::Default => SCOD_ASCII,
            FormatHint::Hex8 | FormatHint::Hex16 | FormatHint::Hex32 | FormatHint::Hex64 => {
                SCOD_HEX
            }
            FormatHint::Bin8 | FormatHint::Bin16 => SCOD_BIN,
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width value that may be written as a single message argument.
///
/// Implemented for `bool`, the signed & unsigned integers of width 8 through 64 and both floating
/// point widths. The platform `int` of other DLT bindings corresponds to `i32` here.
pub trait Scalar: sealed::Sealed + Copy {
    /// Family & width bits
    const TYPE_INFO: u32;
    /// Encoded size in bytes
    const SIZE: usize;
    /// Whether attributed writes carry a unit label as well as a name
    const HAS_UNIT: bool = true;
    fn put(self, buf: &mut Vec<u8>);
}

/// Integers, which alone accept a [`FormatHint`]
pub trait Integer: Scalar {}

macro_rules! scalar {
    ($t:ty, $info:expr, $put:ident) => {
        impl sealed::Sealed for $t {}
        impl Scalar for $t {
            const TYPE_INFO: u32 = $info;
            const SIZE: usize = std::mem::size_of::<$t>();
            fn put(self, buf: &mut Vec<u8>) {
                buf.$put(self)
            }
        }
    };
}

macro_rules! integer {
    ($t:ty, $info:expr, $put:ident) => {
        scalar!($t, $info, $put);
        impl Integer for $t {}
    };
}

integer!(u8, TYPE_UINT | TYLE_8BIT, put_u8);
integer!(u16, TYPE_UINT | TYLE_16BIT, put_u16);
integer!(u32, TYPE_UINT | TYLE_32BIT, put_u32);
integer!(u64, TYPE_UINT | TYLE_64BIT, put_u64);
integer!(i8, TYPE_SINT | TYLE_8BIT, put_i8);
integer!(i16, TYPE_SINT | TYLE_16BIT, put_i16);
integer!(i32, TYPE_SINT | TYLE_32BIT, put_i32);
integer!(i64, TYPE_SINT | TYLE_64BIT, put_i64);
scalar!(f32, TYPE_FLOA | TYLE_32BIT, put_f32);
scalar!(f64, TYPE_FLOA | TYLE_64BIT, put_f64);

impl sealed::Sealed for bool {}
impl Scalar for bool {
    const TYPE_INFO: u32 = TYPE_BOOL | TYLE_8BIT;
    const SIZE: usize = 1;
    const HAS_UNIT: bool = false;
    fn put(self, buf: &mut Vec<u8>) {
        buf.put_u8(self as u8)
    }
}
