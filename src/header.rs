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

//! DLT frame headers.
//!
//! # Introduction
//!
//! The translation from a logging call to bytes on the wire occurs in three parts:
//!
//! 1. assembling the payload, argument by argument (see [`message`](crate::message))
//!
//! 2. wrapping that payload in the DLT standard & extended headers (this module)
//!
//! 3. handing the frame to a [`Transport`], which may prefix it with a preamble of its own (the
//!    `"DUH\x01"` IPC header for a local daemon, the `"DLT\x01"` storage header for a file)
//!
//! [`Transport`]: crate::transport::Transport
//!
//! # Byte order
//!
//! All multi-byte fields in the standard header, the extended header, the payload & the
//! network-trace packets are big-endian, and the `MSBF` flag is always set. The IPC preamble's
//! message kind is in host order (it never leaves the host); the storage header's time stamp is
//! little-endian, as every DLT file reader expects.

use crate::{
    context::Id,
    error::{Error, Result},
    level::LogLevel,
    nwtrace::TraceKind,
};

use bytes::BufMut;
use chrono::prelude::*;

/// Header type flag: an extended header follows the standard header
pub const HTYP_UEH: u8 = 0x01;
/// Header type flag: the payload is big-endian
pub const HTYP_MSBF: u8 = 0x02;
/// Header type flag: the standard header carries an ECU id
pub const HTYP_WEID: u8 = 0x04;
/// Header type flag: the standard header carries a session id
pub const HTYP_WSID: u8 = 0x08;
/// Header type flag: the standard header carries a time stamp
pub const HTYP_WTMS: u8 = 0x10;
/// Protocol version 1, in bits 5 through 7
pub const HTYP_VERSION: u8 = 0x20;

/// Message info flag: verbose payload
pub const MSIN_VERB: u8 = 0x01;

pub const MSTP_LOG: u8 = 0x0;
pub const MSTP_APP_TRACE: u8 = 0x1;
pub const MSTP_NW_TRACE: u8 = 0x2;
pub const MSTP_CONTROL: u8 = 0x3;

pub const STANDARD_HEADER_LEN: usize = 4;
pub const EXTENDED_HEADER_LEN: usize = 10;
/// The standard header with every optional field, plus the extended header
pub const MAX_HEADER_LEN: usize = STANDARD_HEADER_LEN + 12 + EXTENDED_HEADER_LEN;

/// Preamble to every frame written to a local daemon
pub const USER_PATTERN: [u8; 4] = *b"DUH\x01";
pub const USER_MESSAGE_LOG: u32 = 1;
pub const USER_MESSAGE_OVERFLOW: u32 = 8;

/// Preamble to every frame written to a file
pub const STORAGE_PATTERN: [u8; 4] = *b"DLT\x01";
pub const STORAGE_HEADER_LEN: usize = 16;

/// What kind of record a frame carries; becomes the extended header's message type & info.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    Log(LogLevel),
    NwTrace(TraceKind),
}

impl MessageType {
    pub fn mstp(&self) -> u8 {
        match self {
            MessageType::Log(_) => MSTP_LOG,
            MessageType::NwTrace(_) => MSTP_NW_TRACE,
        }
    }
    pub fn mtin(&self) -> u8 {
        match self {
            MessageType::Log(level) => (level.as_i8() as u8) & 0x0f,
            MessageType::NwTrace(kind) => kind.as_u8() & 0x0f,
        }
    }
}

/// Everything needed to write the standard & extended headers for one payload.
#[derive(Clone, Debug)]
pub struct FrameHeader {
    pub counter: u8,
    pub ecu: Id,
    pub session: Option<u32>,
    pub timestamp: Option<u32>,
    pub verbose: bool,
    pub message_type: MessageType,
    pub args: u8,
    pub app: Id,
    pub context: Id,
}

impl FrameHeader {
    /// Length of the headers alone
    pub fn len(&self) -> usize {
        STANDARD_HEADER_LEN
            + 4
            + self.session.map_or(0, |_| 4)
            + self.timestamp.map_or(0, |_| 4)
            + EXTENDED_HEADER_LEN
    }
    /// Append the headers followed by `payload` to `out`.
    pub fn encode(&self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let length = u16::try_from(self.len() + payload.len())
            .map_err(|_| Error::wrong_parameter("frame longer than 65535 bytes"))?;

        let mut htyp = HTYP_UEH | HTYP_MSBF | HTYP_WEID | HTYP_VERSION;
        if self.session.is_some() {
            htyp |= HTYP_WSID;
        }
        if self.timestamp.is_some() {
            htyp |= HTYP_WTMS;
        }
        out.reserve(length as usize);
        out.put_u8(htyp);
        out.put_u8(self.counter);
        out.put_u16(length);
        out.put_slice(self.ecu.as_bytes());
        if let Some(session) = self.session {
            out.put_u32(session);
        }
        if let Some(timestamp) = self.timestamp {
            out.put_u32(timestamp);
        }

        let mut msin = (self.message_type.mstp() << 1) | (self.message_type.mtin() << 4);
        if self.verbose {
            msin |= MSIN_VERB;
        }
        out.put_u8(msin);
        out.put_u8(self.args);
        out.put_slice(self.app.as_bytes());
        out.put_slice(self.context.as_bytes());
        out.put_slice(payload);
        Ok(())
    }
}

/// Append the local IPC preamble for a message of kind `kind`.
pub fn user_header(kind: u32, out: &mut Vec<u8>) {
    out.put_slice(&USER_PATTERN);
    out.put_slice(&kind.to_ne_bytes());
}

/// Append a file storage header stamped with `at`.
pub fn storage_header(ecu: Id, at: DateTime<Utc>, out: &mut Vec<u8>) {
    out.put_slice(&STORAGE_PATTERN);
    out.put_u32_le(at.timestamp() as u32);
    out.put_i32_le(at.timestamp_subsec_micros() as i32);
    out.put_slice(ecu.as_bytes());
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_frame_header() {
        let hdr = FrameHeader {
            counter: 7,
            ecu: Id::new(b"ECU1").unwrap(),
            session: Some(0x0102_0304),
            timestamp: None,
            verbose: true,
            message_type: MessageType::Log(LogLevel::Info),
            args: 2,
            app: Id::new(b"APP").unwrap(),
            context: Id::new(b"CTX").unwrap(),
        };
        assert_eq!(22, hdr.len());
        let mut out = Vec::new();
        hdr.encode(&[0xaa, 0xbb], &mut out).unwrap();
        assert_eq!(
            out,
            vec![
                0x2f, 7, 0, 24, b'E', b'C', b'U', b'1', 1, 2, 3, 4, 0x41, 2, b'A', b'P', b'P', 0,
                b'C', b'T', b'X', 0, 0xaa, 0xbb
            ]
        );

        let hdr = FrameHeader {
            timestamp: Some(1),
            verbose: false,
            message_type: MessageType::NwTrace(TraceKind::Can),
            ..hdr
        };
        assert_eq!(MAX_HEADER_LEN, hdr.len());
        let mut out = Vec::new();
        hdr.encode(&[], &mut out).unwrap();
        assert_eq!(0x3f, out[0]);
        // MSTP 2, MTIN 2, non-verbose
        assert_eq!(0x24, out[16]);

        let too_big = vec![0u8; 65536];
        assert!(hdr.encode(&too_big, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_preambles() {
        let mut out = Vec::new();
        user_header(USER_MESSAGE_LOG, &mut out);
        assert_eq!(&out[..4], b"DUH\x01");
        assert_eq!(8, out.len());

        let mut out = Vec::new();
        storage_header(
            Id::new(b"ECU1").unwrap(),
            Utc.timestamp_opt(1, 5_000).unwrap(),
            &mut out,
        );
        assert_eq!(
            out,
            vec![b'D', b'L', b'T', 1, 1, 0, 0, 0, 5, 0, 0, 0, b'E', b'C', b'U', b'1']
        );
        assert_eq!(STORAGE_HEADER_LEN, out.len());
    }
}
