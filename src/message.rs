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

//! Assembling one log record.
//!
//! # Introduction
//!
//! A [`Message`] is obtained from [`Client::start`], filled in one argument at a time, and handed
//! back with [`Message::finish`]. Its payload can never grow beyond the client's envelope
//! capacity; an argument that doesn't fit is either refused outright (fixed-width values, raw
//! blocks) or shortened (strings, see [`truncate`](crate::truncate)). Either way the write
//! reports [`Error::UserBufferFull`], and so does the eventual [`Message::finish`], which still
//! sends whatever did fit.
//!
//! [`Client::start`]: crate::client::Client::start
//!
//! # Verbose & non-verbose payloads
//!
//! In verbose mode every argument is self-describing:
//!
//! ```text
//! [type info: 4][name/unit info, if attributed][value]              fixed-width values
//! [type info: 4][length: 2][name info, if attributed][bytes]        strings & raw blocks
//! ```
//!
//! In non-verbose mode the payload opens with a 4-byte message id & the arguments carry no type
//! info or attributes; the reader is assumed to hold a table mapping message ids to layouts.
//! Since that table can carry constant text just as well, the `write_const_*` family writes
//! nothing at all in non-verbose mode.
//!
//! ```rust
//! use dlt_user::{client::Client, config::Config, level::LogLevel, transport::MemoryTransport};
//! let client = Client::new(Config::default(), MemoryTransport::new()).unwrap();
//! let ctx = client.register_context("TEST", "test context").unwrap();
//! if let Some(mut msg) = client.start(&ctx, LogLevel::Warn).unwrap() {
//!     msg.write_const_string("temperature").unwrap();
//!     msg.write_attr(87.5_f32, "temp", Some("degC")).unwrap();
//!     msg.finish().unwrap();
//! };
//! ```

use crate::{
    context::Context,
    error::{Error, Result},
    header::MessageType,
    truncate::{self, Fit, TRUNCATION_MARKER},
    typeinfo::*,
};

use bytes::BufMut;

use std::thread::ThreadId;

/// Default message id used by [`Client::start`] in non-verbose mode
///
/// [`Client::start`]: crate::client::Client::start
pub const DEFAULT_MESSAGE_ID: u32 = 0xffff;

/// A fully assembled payload, on its way to the wire
pub(crate) struct Record<'a> {
    pub message_type: MessageType,
    pub verbose: bool,
    pub args: u8,
    pub payload: &'a [u8],
}

/// Whatever turns a finished [`Record`] into a frame & gets it sent or buffered.
pub(crate) trait Dispatch: Send + Sync {
    fn dispatch(&self, context: &Context, record: Record<'_>) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Encoding {
    Ascii,
    Utf8,
}

impl Encoding {
    fn scod(self) -> u32 {
        match self {
            Encoding::Ascii => SCOD_ASCII,
            Encoding::Utf8 => SCOD_UTF8,
        }
    }
}

/// A log record under assembly.
///
/// Dropping a [`Message`] without calling [`Message::finish`] discards it.
pub struct Message<'a> {
    sink: &'a dyn Dispatch,
    context: &'a Context,
    owner: ThreadId,
    message_type: MessageType,
    verbose: bool,
    capacity: usize,
    buf: Vec<u8>,
    args: u8,
    message_id: Option<u32>,
    lost: bool,
}

impl<'a> Message<'a> {
    /// Claim `context` for the calling thread & prepare an empty payload.
    pub(crate) fn new(
        sink: &'a dyn Dispatch,
        context: &'a Context,
        message_type: MessageType,
        verbose: bool,
        capacity: usize,
        message_id: Option<u32>,
    ) -> Result<Message<'a>> {
        let owner = context.claim()?;
        let mut buf = Vec::with_capacity(capacity);
        let message_id = if verbose {
            None
        } else {
            let id = message_id.unwrap_or(DEFAULT_MESSAGE_ID);
            buf.put_u32(id);
            Some(id)
        };
        Ok(Message {
            sink,
            context,
            owner,
            message_type,
            verbose,
            capacity,
            buf,
            args: 0,
            message_id,
            lost: false,
        })
    }

    pub fn context(&self) -> &Context {
        self.context
    }
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
    /// The non-verbose message id, if any
    pub fn message_id(&self) -> Option<u32> {
        self.message_id
    }
    /// Payload bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }
    pub fn args(&self) -> u8 {
        self.args
    }
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }
    /// True once any write has lost content
    pub fn is_lossy(&self) -> bool {
        self.lost
    }

    fn full(&mut self) -> Error {
        self.lost = true;
        Error::UserBufferFull
    }

    fn bump_args(&mut self) {
        self.args = self.args.saturating_add(1);
    }

    /// Refuse an argument that would need more than `need` bytes, or a 256th argument.
    fn reserve(&mut self, need: usize) -> Result<()> {
        if self.args == u8::MAX {
            // The argument count is a single byte on the wire
            Err(Error::wrong_parameter("too many arguments"))
        } else if self.buf.len() + need > self.capacity {
            Err(self.full())
        } else {
            Ok(())
        }
    }

    fn put_scalar<V: Scalar>(&mut self, value: V, scod: u32, attr: Option<(&str, Option<&str>)>) -> Result<()> {
        let mut need = V::SIZE;
        if self.verbose {
            need += 4;
            if let Some((name, unit)) = attr {
                need += 2 + name.len() + 1;
                if V::HAS_UNIT {
                    need += 2 + unit.map_or(0, |u| u.len() + 1);
                }
            }
        }
        self.reserve(need)?;
        if self.verbose {
            let vari = if attr.is_some() { TYPE_VARI } else { 0 };
            self.buf.put_u32(V::TYPE_INFO | scod | vari);
            if let Some((name, unit)) = attr {
                let unit = if V::HAS_UNIT { Some(unit.unwrap_or("")) } else { None };
                self.buf.put_u16((name.len() + 1) as u16);
                if let Some(unit) = unit {
                    self.buf
                        .put_u16(if unit.is_empty() { 0 } else { (unit.len() + 1) as u16 });
                }
                self.buf.put_slice(name.as_bytes());
                self.buf.put_u8(0);
                if let Some(unit) = unit.filter(|u| !u.is_empty()) {
                    self.buf.put_slice(unit.as_bytes());
                    self.buf.put_u8(0);
                }
            }
        }
        value.put(&mut self.buf);
        self.bump_args();
        Ok(())
    }

    /// Type info (verbose only), then the length field, then the name info (verbose &
    /// attributed only). Returns nothing; callers have already checked for room.
    fn put_prefix(&mut self, info: u32, length: u16, name: Option<&str>) {
        if self.verbose {
            let vari = if name.is_some() { TYPE_VARI } else { 0 };
            self.buf.put_u32(info | vari);
        }
        self.buf.put_u16(length);
        if self.verbose {
            if let Some(name) = name {
                self.buf.put_u16((name.len() + 1) as u16);
                self.buf.put_slice(name.as_bytes());
                self.buf.put_u8(0);
            }
        }
    }

    fn prefix_len(&self, name: Option<&str>) -> usize {
        if self.verbose {
            4 + 2 + name.map_or(0, |n| 2 + n.len() + 1)
        } else {
            2
        }
    }

    fn put_text(
        &mut self,
        text: &[u8],
        encoding: Encoding,
        constant: bool,
        name: Option<&str>,
    ) -> Result<()> {
        if constant && !self.verbose {
            return Ok(());
        }
        let overhead = self.prefix_len(name);
        self.reserve(overhead)?;
        let room = self.capacity - self.buf.len() - overhead;
        let info = TYPE_STRG | encoding.scod();
        match truncate::fit(text, encoding == Encoding::Utf8, room) {
            Fit::Whole => {
                self.put_prefix(info, (text.len() + 1) as u16, name);
                self.buf.put_slice(text);
                self.buf.put_u8(0);
                self.bump_args();
                Ok(())
            }
            Fit::Truncated(keep) => {
                self.put_prefix(info, (keep + truncate::MARKER_LEN) as u16, name);
                self.buf.put_slice(&text[..keep]);
                self.buf.put_slice(TRUNCATION_MARKER.as_bytes());
                self.buf.put_u8(0);
                self.bump_args();
                Err(self.full())
            }
            Fit::Empty => {
                self.put_prefix(info, 0, name);
                self.bump_args();
                Err(self.full())
            }
        }
    }

    fn put_raw(&mut self, data: &[u8], scod: u32, name: Option<&str>) -> Result<()> {
        let need = self.prefix_len(name) + data.len();
        if data.len() > u16::MAX as usize {
            return Err(self.full());
        }
        self.reserve(need)?;
        self.put_prefix(TYPE_RAWD | scod, data.len() as u16, name);
        self.buf.put_slice(data);
        self.bump_args();
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                    fixed-width values                                   //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Write a boolean, integer or floating point value.
    pub fn write<V: Scalar>(&mut self, value: V) -> Result<()> {
        self.put_scalar(value, SCOD_ASCII, None)
    }
    /// Write a value labelled with a name &, for numbers, an optional unit.
    ///
    /// Booleans carry no unit; `unit` is ignored for them.
    pub fn write_attr<V: Scalar>(&mut self, value: V, name: &str, unit: Option<&str>) -> Result<()> {
        self.put_scalar(value, SCOD_ASCII, Some((name, unit)))
    }
    /// Write an integer along with a display hint
    pub fn write_formatted<V: Integer>(&mut self, value: V, hint: FormatHint) -> Result<()> {
        self.put_scalar(value, hint.scod(), None)
    }
    /// Write a pointer's address.
    ///
    /// Addresses are always written as 64-bit unsigned integers with a hexadecimal display hint,
    /// so that a reader needn't know the emitting platform's pointer width.
    pub fn write_ptr<P: ?Sized>(&mut self, ptr: *const P) -> Result<()> {
        let addr = ptr as *const () as usize as u64;
        self.put_scalar(addr, SCOD_HEX, None)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                       raw blocks                                        //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Write a block of bytes. Raw blocks are never truncated.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.put_raw(data, SCOD_ASCII, None)
    }
    pub fn write_raw_formatted(&mut self, data: &[u8], hint: FormatHint) -> Result<()> {
        self.put_raw(data, hint.scod(), None)
    }
    pub fn write_raw_attr(&mut self, data: &[u8], name: &str) -> Result<()> {
        self.put_raw(data, SCOD_ASCII, Some(name))
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                        strings                                          //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Write an ASCII string. Bytes are written as given; nothing is checked.
    pub fn write_string(&mut self, text: &str) -> Result<()> {
        self.put_text(text.as_bytes(), Encoding::Ascii, false, None)
    }
    pub fn write_string_attr(&mut self, text: &str, name: &str) -> Result<()> {
        self.put_text(text.as_bytes(), Encoding::Ascii, false, Some(name))
    }
    /// Write constant ASCII text; a no-op in non-verbose mode
    pub fn write_const_string(&mut self, text: &str) -> Result<()> {
        self.put_text(text.as_bytes(), Encoding::Ascii, true, None)
    }
    pub fn write_const_string_attr(&mut self, text: &str, name: &str) -> Result<()> {
        self.put_text(text.as_bytes(), Encoding::Ascii, true, Some(name))
    }
    /// Write a UTF-8 string, which if truncated is cut only at a character boundary
    pub fn write_utf8(&mut self, text: &str) -> Result<()> {
        self.put_text(text.as_bytes(), Encoding::Utf8, false, None)
    }
    pub fn write_utf8_attr(&mut self, text: &str, name: &str) -> Result<()> {
        self.put_text(text.as_bytes(), Encoding::Utf8, false, Some(name))
    }
    /// Write constant UTF-8 text; a no-op in non-verbose mode
    pub fn write_const_utf8(&mut self, text: &str) -> Result<()> {
        self.put_text(text.as_bytes(), Encoding::Utf8, true, None)
    }
    pub fn write_const_utf8_attr(&mut self, text: &str, name: &str) -> Result<()> {
        self.put_text(text.as_bytes(), Encoding::Utf8, true, Some(name))
    }

    /// Hand the assembled record off for transmission.
    ///
    /// Returns [`Error::UserBufferFull`] if any argument was truncated or refused, or if the
    /// record had to be dropped because the offline buffer was exhausted. In the former case the
    /// (shortened) record has still been sent or queued.
    pub fn finish(mut self) -> Result<()> {
        let payload = std::mem::take(&mut self.buf);
        self.sink.dispatch(
            self.context,
            Record {
                message_type: self.message_type,
                verbose: self.verbose,
                args: self.args,
                payload: &payload,
            },
        )?;
        if self.lost {
            Err(Error::UserBufferFull)
        } else {
            Ok(())
        }
    }
}

impl Drop for Message<'_> {
    fn drop(&mut self) {
        self.context.release(self.owner);
    }
}

#[cfg(test)]
pub(crate) mod test {

    use super::*;
    use crate::{
        context::{ContextCells, Id},
        level::{LogLevel, TraceStatus},
    };

    use std::sync::Mutex;

    /// Collects payloads without framing them
    #[derive(Default)]
    pub(crate) struct Collector {
        pub records: Mutex<Vec<(Vec<u8>, u8, bool)>>,
    }

    impl Dispatch for Collector {
        fn dispatch(&self, _context: &Context, record: Record<'_>) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .push((record.payload.to_vec(), record.args, record.verbose));
            Ok(())
        }
    }

    pub(crate) fn context() -> Context {
        Context::new(
            Id::new(b"TEST").unwrap(),
            None,
            ContextCells::new(LogLevel::Verbose, TraceStatus::On),
        )
    }

    fn message<'a>(sink: &'a Collector, ctx: &'a Context, verbose: bool, cap: usize) -> Message<'a> {
        Message::new(sink, ctx, MessageType::Log(LogLevel::Info), verbose, cap, None).unwrap()
    }

    #[test]
    fn test_verbose_layout() {
        let sink = Collector::default();
        let ctx = context();
        let mut msg = message(&sink, &ctx, true, 1390);
        msg.write(12345678_u32).unwrap();
        msg.write_string("hello").unwrap();
        msg.write_formatted(0xab_u8, FormatHint::Hex8).unwrap();
        assert_eq!(3, msg.args());
        assert_eq!(
            msg.payload(),
            &[
                0x00, 0x00, 0x00, 0x43, 0x00, 0xbc, 0x61, 0x4e, // uint32 12345678
                0x00, 0x00, 0x02, 0x00, 0x00, 0x06, b'h', b'e', b'l', b'l', b'o', 0, // "hello"
                0x00, 0x01, 0x00, 0x41, 0xab // hex uint8
            ][..]
        );
        msg.finish().unwrap();
        assert_eq!(1, sink.records.lock().unwrap().len());
    }

    #[test]
    fn test_attributes() {
        let sink = Collector::default();
        let ctx = context();
        let mut msg = message(&sink, &ctx, true, 1390);
        msg.write_attr(7_i16, "n", Some("s")).unwrap();
        msg.write_attr(true, "ok", Some("ignored")).unwrap();
        msg.write_utf8_attr("é", "t").unwrap();
        assert_eq!(
            msg.payload(),
            &[
                0x00, 0x00, 0x08, 0x22, 0x00, 0x02, 0x00, 0x02, b'n', 0, b's', 0, 0x00, 0x07,
                0x00, 0x00, 0x08, 0x11, 0x00, 0x03, b'o', b'k', 0, 0x01,
                0x00, 0x00, 0x8a, 0x00, 0x00, 0x03, 0x00, 0x02, b't', 0, 0xc3, 0xa9, 0
            ][..]
        );
    }

    #[test]
    fn test_non_verbose() {
        let sink = Collector::default();
        let ctx = context();
        let mut msg =
            Message::new(&sink, &ctx, MessageType::Log(LogLevel::Info), false, 1390, Some(42))
                .unwrap();
        assert_eq!(Some(42), msg.message_id());
        assert_eq!(4, msg.len());
        msg.write_const_string("Temperature is").unwrap();
        msg.write_const_utf8_attr("Grüße", "greeting").unwrap();
        assert_eq!(4, msg.len());
        assert_eq!(0, msg.args());
        msg.write(1_u8).unwrap();
        msg.write_attr(2_u8, "ignored", None).unwrap();
        msg.write_string("ab").unwrap();
        assert_eq!(msg.payload(), &[0, 0, 0, 42, 1, 2, 0, 3, b'a', b'b', 0][..]);
        msg.finish().unwrap();
        assert!(!sink.records.lock().unwrap()[0].2);
    }

    #[test]
    fn test_fixed_width_refusal() {
        let sink = Collector::default();
        let ctx = context();
        let mut msg = message(&sink, &ctx, true, 10);
        msg.write(1_u32).unwrap();
        assert!(msg.write(1_u16).unwrap_err().is_buffer_full());
        assert_eq!(8, msg.len());
        assert!(msg.write_raw(&[1, 2, 3, 4, 5]).unwrap_err().is_buffer_full());
        assert_eq!(8, msg.len());
        assert!(msg.finish().unwrap_err().is_buffer_full());
        // the record still went out
        assert_eq!(1, sink.records.lock().unwrap().len());
    }

    #[test]
    fn test_truncation() {
        let sink = Collector::default();
        let ctx = context();
        let long = "x".repeat(2000);
        let mut msg = message(&sink, &ctx, true, 100);
        assert!(msg.write_string(&long).unwrap_err().is_buffer_full());
        // exactly fills the envelope
        assert_eq!(100, msg.len());
        let payload = msg.payload().to_vec();
        assert_eq!(&payload[4..6], &[0, 94]);
        assert_eq!(&payload[6..64], "x".repeat(58).as_bytes());
        assert_eq!(&payload[64..99], TRUNCATION_MARKER.as_bytes());
        assert_eq!(0, payload[99]);
        drop(msg);

        // UTF-8: 59 bytes of budget lands one byte into a two-byte character
        let wide = "é".repeat(1000);
        let mut msg = message(&sink, &ctx, true, 101);
        assert!(msg.write_utf8(&wide).unwrap_err().is_buffer_full());
        assert_eq!(100, msg.len());
        let payload = msg.payload().to_vec();
        assert_eq!(&payload[4..6], &[0, 94]);
        assert!(std::str::from_utf8(&payload[6..99]).is_ok());
        drop(msg);

        // Not even room for the marker
        let mut msg = message(&sink, &ctx, true, 41);
        assert!(msg.write_string(&long).unwrap_err().is_buffer_full());
        assert_eq!(msg.payload(), &[0, 0, 2, 0, 0, 0][..]);
        assert_eq!(1, msg.args());
        drop(msg);

        // Not even room for the type info & length
        let mut msg = message(&sink, &ctx, true, 5);
        assert!(msg.write_string("x").unwrap_err().is_buffer_full());
        assert_eq!(0, msg.len());
    }

    #[test]
    fn test_in_progress() {
        let sink = Collector::default();
        let ctx = context();
        let msg = message(&sink, &ctx, true, 100);
        assert!(matches!(
            Message::new(&sink, &ctx, MessageType::Log(LogLevel::Info), true, 100, None),
            Err(Error::MessageInProgress { .. })
        ));
        drop(msg);
        let msg = message(&sink, &ctx, true, 100);
        msg.finish().unwrap();
        let _again = message(&sink, &ctx, true, 100);
    }

    #[test]
    fn test_finish_elsewhere() {
        let sink = Collector::default();
        let ctx = context();
        let mut msg = message(&sink, &ctx, true, 100);
        msg.write(1_u8).unwrap();
        // Started here, finished on another thread
        std::thread::scope(|s| {
            s.spawn(move || msg.finish().unwrap());
        });
        assert_eq!(1, sink.records.lock().unwrap().len());
        // The claim went with it, so this thread may start again
        let msg = message(&sink, &ctx, true, 100);
        drop(msg);

        // Likewise for a message dropped on another thread
        let msg = message(&sink, &ctx, true, 100);
        std::thread::scope(|s| {
            s.spawn(move || drop(msg));
        });
        message(&sink, &ctx, true, 100).finish().unwrap();
        assert_eq!(2, sink.records.lock().unwrap().len());
    }

    #[test]
    fn test_argument_count() {
        let sink = Collector::default();
        let ctx = context();
        let mut msg = message(&sink, &ctx, true, 4096);
        for _ in 0..255 {
            msg.write(true).unwrap();
        }
        assert_eq!(255, msg.args());
        assert!(matches!(msg.write(true), Err(Error::WrongParameter { .. })));
        assert_eq!(255, msg.args());
        assert!(!msg.is_lossy());
        msg.finish().unwrap();
        assert_eq!(255, sink.records.lock().unwrap()[0].1);
    }

    #[test]
    fn test_pointer() {
        let sink = Collector::default();
        let ctx = context();
        let value = 5_u32;
        let mut msg = message(&sink, &ctx, true, 100);
        msg.write_ptr(&value as *const u32).unwrap();
        assert_eq!(12, msg.len());
        assert_eq!(&msg.payload()[..4], &[0x00, 0x01, 0x00, 0x44]);
    }
}
