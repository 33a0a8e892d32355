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

//! Reading DLT frames back.
//!
//! This is not a full DLT viewer: it understands the frames this crate writes (& those of any
//! other client using the same subset of the protocol), enough to check what went out on the wire
//! or to read back a file written by [`FileTransport`].
//!
//! [`FileTransport`]: crate::transport::FileTransport
//!
//! ```rust
//! use dlt_user::{client::Client, config::Config, decode::{Frame, Value},
//!                level::LogLevel, transport::MemoryTransport};
//! let transport = MemoryTransport::new();
//! let client = Client::new(Config::default(), transport.clone()).unwrap();
//! let ctx = client.register_context("CTX", "").unwrap();
//! client.log_args(&ctx, LogLevel::Info, |msg| {
//!     msg.write(12345678_u32)?;
//!     msg.write_string("hello")
//! }).unwrap();
//! let frames = transport.frames();
//! let frame = Frame::parse(&frames[0]).unwrap();
//! let values: Vec<Value> = frame.arguments().unwrap().into_iter().map(|a| a.value).collect();
//! assert_eq!(vec![Value::UInt(12345678), Value::String("hello".to_string())], values);
//! ```

use crate::{
    context::Id,
    error::{Error, Result},
    header::{
        MessageType, HTYP_MSBF, HTYP_UEH, HTYP_WEID, HTYP_WSID, HTYP_WTMS, MSIN_VERB, MSTP_LOG,
        MSTP_NW_TRACE, STORAGE_HEADER_LEN, STORAGE_PATTERN,
    },
    level::LogLevel,
    nwtrace::TraceKind,
    typeinfo::*,
};

use bytes::Buf;
use chrono::{DateTime, TimeZone, Utc};

/// A cursor over a byte slice that reports where it ran out
struct Reader<'a> {
    buf: &'a [u8],
    len: usize,
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], big_endian: bool) -> Reader<'a> {
        Reader {
            buf,
            len: buf.len(),
            big_endian,
        }
    }
    fn offset(&self) -> usize {
        self.len - self.buf.remaining()
    }
    fn need(&self, n: usize, what: &'static str) -> Result<()> {
        if self.buf.remaining() < n {
            Err(Error::Decode {
                what,
                offset: self.offset(),
            })
        } else {
            Ok(())
        }
    }
    fn u8(&mut self, what: &'static str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }
    fn u16(&mut self, what: &'static str) -> Result<u16> {
        self.need(2, what)?;
        Ok(if self.big_endian {
            self.buf.get_u16()
        } else {
            self.buf.get_u16_le()
        })
    }
    fn u32(&mut self, what: &'static str) -> Result<u32> {
        self.need(4, what)?;
        Ok(if self.big_endian {
            self.buf.get_u32()
        } else {
            self.buf.get_u32_le()
        })
    }
    fn u64(&mut self, what: &'static str) -> Result<u64> {
        self.need(8, what)?;
        Ok(if self.big_endian {
            self.buf.get_u64()
        } else {
            self.buf.get_u64_le()
        })
    }
    fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        self.need(n, what)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
    fn id(&mut self, what: &'static str) -> Result<Id> {
        let bytes = self.bytes(4, what)?;
        let mut id = [0u8; 4];
        id.copy_from_slice(bytes);
        Ok(Id::from_bytes(id))
    }
    /// A NUL-terminated label of `len` bytes (terminator included)
    fn label(&mut self, len: u16, what: &'static str) -> Result<String> {
        Ok(text(self.bytes(len as usize, what)?))
    }
}

fn text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// One decoded argument value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    UInt(u64),
    SInt(i64),
    Float(f64),
    String(String),
    Raw(Vec<u8>),
}

/// One decoded verbose argument
#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    pub type_info: u32,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub value: Value,
}

/// A parsed DLT frame; the payload is borrowed from the input.
#[derive(Clone, Debug)]
pub struct Frame<'a> {
    pub counter: u8,
    pub ecu: Option<Id>,
    pub session: Option<u32>,
    pub timestamp: Option<u32>,
    pub verbose: bool,
    pub big_endian: bool,
    pub message_type: MessageType,
    pub args: u8,
    pub app: Id,
    pub context: Id,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse one frame from the head of `buf`, which may hold more after it.
    pub fn parse(buf: &'a [u8]) -> Result<Frame<'a>> {
        Frame::parse_with_len(buf).map(|(frame, _)| frame)
    }

    /// Parse one frame from the head of `buf`, also returning its total length.
    pub fn parse_with_len(buf: &'a [u8]) -> Result<(Frame<'a>, usize)> {
        let mut rdr = Reader::new(buf, true);
        let htyp = rdr.u8("standard header")?;
        let counter = rdr.u8("standard header")?;
        let length = rdr.u16("standard header")? as usize;
        if length > buf.len() {
            return Err(Error::Decode {
                what: "frame length exceeds the input",
                offset: 2,
            });
        }
        let ecu = if htyp & HTYP_WEID != 0 {
            Some(rdr.id("ECU id")?)
        } else {
            None
        };
        let session = if htyp & HTYP_WSID != 0 {
            Some(rdr.u32("session id")?)
        } else {
            None
        };
        let timestamp = if htyp & HTYP_WTMS != 0 {
            Some(rdr.u32("timestamp")?)
        } else {
            None
        };
        if htyp & HTYP_UEH == 0 {
            return Err(Error::Decode {
                what: "frames without an extended header are unsupported",
                offset: 0,
            });
        }
        let msin = rdr.u8("extended header")?;
        let args = rdr.u8("extended header")?;
        let app = rdr.id("application id")?;
        let context = rdr.id("context id")?;
        let mstp = (msin >> 1) & 0x07;
        let mtin = (msin >> 4) & 0x0f;
        let message_type = match mstp {
            MSTP_LOG => MessageType::Log(LogLevel::try_from(mtin as i32)?),
            MSTP_NW_TRACE => MessageType::NwTrace(TraceKind::try_from(mtin)?),
            _ => {
                return Err(Error::Decode {
                    what: "unsupported message type",
                    offset: rdr.offset() - 10,
                })
            }
        };
        let start = rdr.offset();
        if length < start {
            return Err(Error::Decode {
                what: "frame length shorter than its headers",
                offset: 2,
            });
        }
        Ok((
            Frame {
                counter,
                ecu,
                session,
                timestamp,
                verbose: msin & MSIN_VERB != 0,
                big_endian: htyp & HTYP_MSBF != 0,
                message_type,
                args,
                app,
                context,
                payload: &buf[start..length],
            },
            length,
        ))
    }

    /// The message id of a non-verbose frame
    pub fn message_id(&self) -> Option<u32> {
        if self.verbose {
            None
        } else {
            Reader::new(self.payload, self.big_endian)
                .u32("message id")
                .ok()
        }
    }

    /// Decode a verbose payload into its arguments.
    pub fn arguments(&self) -> Result<Vec<Argument>> {
        if !self.verbose {
            return Err(Error::Decode {
                what: "non-verbose payloads can't be decoded without a message catalog",
                offset: 0,
            });
        }
        let mut rdr = Reader::new(self.payload, self.big_endian);
        (0..self.args).map(|_| argument(&mut rdr)).collect()
    }
}

fn argument(rdr: &mut Reader<'_>) -> Result<Argument> {
    let type_info = rdr.u32("type info")?;
    let vari = type_info & TYPE_VARI != 0;
    let width = match type_info & TYLE_MASK {
        TYLE_8BIT => 1,
        TYLE_16BIT => 2,
        TYLE_32BIT => 4,
        TYLE_64BIT => 8,
        _ => 0,
    };
    let mut name = None;
    let mut unit = None;

    let value = if type_info & (TYPE_STRG | TYPE_RAWD) != 0 {
        let len = rdr.u16("length")?;
        if vari {
            let name_len = rdr.u16("name length")?;
            name = Some(rdr.label(name_len, "name")?);
        }
        let bytes = rdr.bytes(len as usize, "value")?;
        if type_info & TYPE_STRG != 0 {
            Value::String(text(bytes))
        } else {
            Value::Raw(bytes.to_vec())
        }
    } else if type_info & TYPE_BOOL != 0 {
        if vari {
            let name_len = rdr.u16("name length")?;
            name = Some(rdr.label(name_len, "name")?);
        }
        Value::Bool(rdr.u8("value")? != 0)
    } else if type_info & (TYPE_UINT | TYPE_SINT | TYPE_FLOA) != 0 {
        if width == 0 {
            return Err(Error::Decode {
                what: "unsupported numeric width",
                offset: rdr.offset() - 4,
            });
        }
        if vari {
            let name_len = rdr.u16("name length")?;
            let unit_len = rdr.u16("unit length")?;
            name = Some(rdr.label(name_len, "name")?);
            if unit_len > 0 {
                unit = Some(rdr.label(unit_len, "unit")?);
            }
        }
        let raw = match width {
            1 => rdr.u8("value")? as u64,
            2 => rdr.u16("value")? as u64,
            4 => rdr.u32("value")? as u64,
            _ => rdr.u64("value")?,
        };
        if type_info & TYPE_FLOA != 0 {
            match width {
                4 => Value::Float(f32::from_bits(raw as u32) as f64),
                8 => Value::Float(f64::from_bits(raw)),
                _ => {
                    return Err(Error::Decode {
                        what: "unsupported float width",
                        offset: rdr.offset(),
                    })
                }
            }
        } else if type_info & TYPE_SINT != 0 {
            // sign-extend from the encoded width
            let shift = 64 - 8 * width;
            Value::SInt(((raw << shift) as i64) >> shift)
        } else {
            Value::UInt(raw)
        }
    } else {
        return Err(Error::Decode {
            what: "unsupported argument type",
            offset: rdr.offset() - 4,
        });
    };

    Ok(Argument {
        type_info,
        name,
        unit,
        value,
    })
}

/// One frame read back from a DLT file, with its storage time & ECU
#[derive(Clone, Debug)]
pub struct StoredFrame<'a> {
    pub stored_at: DateTime<Utc>,
    pub ecu: Id,
    pub frame: Frame<'a>,
}

/// Iterate over the frames of a DLT file's contents.
pub fn stored_frames(buf: &[u8]) -> StoredFrames<'_> {
    StoredFrames { buf, offset: 0 }
}

pub struct StoredFrames<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> StoredFrames<'a> {
    fn next_frame(&mut self) -> Result<StoredFrame<'a>> {
        let buf = &self.buf[self.offset..];
        if buf.len() < STORAGE_HEADER_LEN || buf[..4] != STORAGE_PATTERN {
            return Err(Error::Decode {
                what: "missing storage header",
                offset: self.offset,
            });
        }
        let mut rdr = Reader::new(&buf[4..], false);
        let secs = rdr.u32("storage time")?;
        let micros = rdr.u32("storage time")?;
        let ecu = rdr.id("storage ECU id")?;
        let stored_at = Utc
            .timestamp_opt(secs as i64, micros.saturating_mul(1000))
            .single()
            .ok_or(Error::Decode {
                what: "bad storage time",
                offset: self.offset + 4,
            })?;
        let (frame, len) =
            Frame::parse_with_len(&buf[STORAGE_HEADER_LEN..]).map_err(|err| match err {
                Error::Decode { what, offset } => Error::Decode {
                    what,
                    offset: self.offset + STORAGE_HEADER_LEN + offset,
                },
                err => err,
            })?;
        self.offset += STORAGE_HEADER_LEN + len;
        Ok(StoredFrame {
            stored_at,
            ecu,
            frame,
        })
    }
}

impl<'a> Iterator for StoredFrames<'a> {
    type Item = Result<StoredFrame<'a>>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buf.len() {
            return None;
        }
        let item = self.next_frame();
        if item.is_err() {
            // no way to resynchronize; stop here
            self.offset = self.buf.len();
        }
        Some(item)
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn arguments() {
        // type info words, big-endian, as the message tests produce them
        let payload = [
            0x00, 0x00, 0x08, 0x22, 0x00, 0x02, 0x00, 0x02, b'n', 0, b's', 0, 0xff, 0xf9, // i16 -7
            0x00, 0x00, 0x00, 0x11, 0x01, // true
            0x00, 0x00, 0x00, 0x83, 0x3f, 0xc0, 0x00, 0x00, // 1.5f32
            0x00, 0x00, 0x04, 0x00, 0x00, 0x02, 0xde, 0xad, // raw
        ];
        let frame = Frame {
            counter: 0,
            ecu: None,
            session: None,
            timestamp: None,
            verbose: true,
            big_endian: true,
            message_type: MessageType::Log(LogLevel::Info),
            args: 4,
            app: Id::from_bytes(*b"APP\0"),
            context: Id::from_bytes(*b"CTX\0"),
            payload: &payload,
        };
        let args = frame.arguments().unwrap();
        assert_eq!(Value::SInt(-7), args[0].value);
        assert_eq!(Some("n".to_string()), args[0].name);
        assert_eq!(Some("s".to_string()), args[0].unit);
        assert_eq!(Value::Bool(true), args[1].value);
        assert_eq!(Value::Float(1.5), args[2].value);
        assert_eq!(Value::Raw(vec![0xde, 0xad]), args[3].value);

        // one argument too many
        let frame = Frame { args: 5, ..frame };
        assert!(matches!(frame.arguments(), Err(Error::Decode { offset: 35, .. })));
    }

    #[test]
    fn bad_frames() {
        assert!(Frame::parse(&[]).is_err());
        // length field beyond the input
        assert!(Frame::parse(&[0x21, 0, 0, 20, 0, 0]).is_err());
        // no extended header
        assert!(Frame::parse(&[0x20, 0, 0, 4]).is_err());
    }
}
