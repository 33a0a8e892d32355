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

//! Offline frame storage.
//!
//! # Introduction
//!
//! While the daemon is unreachable, finished frames are parked in a [`RingBuffer`]: a single
//! contiguous allocation of bytes, used circularly, each frame stored as a four-byte length
//! followed by the frame itself. The allocation starts at a minimum size & grows by a fixed step,
//! up to a hard maximum. Once at the maximum & out of room, the newest frame is refused: it is
//! dropped, the overflow flag is latched & the overflow counter incremented. Frames already
//! buffered are never evicted to make room.
//!
//! The buffer does no locking of its own; the client keeps it behind its mutex.

/// Bytes of bookkeeping stored ahead of each frame
pub const FRAME_HEADER_LEN: usize = 4;

/// A frame was refused because the buffer is at its maximum size & full
#[derive(Debug, PartialEq, Eq)]
pub struct Overflow;

/// A growable circular buffer of variable-length frames.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    max: usize,
    step: usize,
    /// Offset of the oldest frame's header
    read: usize,
    /// Offset at which the next frame's header will go
    write: usize,
    used: usize,
    frames: usize,
    overflow: bool,
    overflow_counter: u64,
}

impl RingBuffer {
    /// Create a ring buffer of `min` bytes that may grow, `step` bytes at a time, to `max`.
    ///
    /// `max` is raised to `min` if need be, and a zero `step` means "never grow".
    pub fn new(min: usize, max: usize, step: usize) -> RingBuffer {
        RingBuffer {
            buf: vec![0; min],
            max: max.max(min),
            step,
            read: 0,
            write: 0,
            used: 0,
            frames: 0,
            overflow: false,
            overflow_counter: 0,
        }
    }
    /// Number of frames buffered
    pub fn len(&self) -> usize {
        self.frames
    }
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
    /// Bytes in use, bookkeeping included
    pub fn size(&self) -> usize {
        self.used
    }
    /// Bytes currently allocated
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
    pub fn max_capacity(&self) -> usize {
        self.max
    }
    /// True if a frame has been refused since the flag was last cleared
    pub fn overflowed(&self) -> bool {
        self.overflow
    }
    /// Total frames refused since creation or the last [`RingBuffer::reset_overflow`]
    pub fn overflow_counter(&self) -> u64 {
        self.overflow_counter
    }
    /// Clear the overflow flag, leaving the counter alone.
    pub fn clear_overflow_flag(&mut self) {
        self.overflow = false;
    }
    /// Clear both the overflow flag & the counter.
    pub fn reset_overflow(&mut self) {
        self.overflow = false;
        self.overflow_counter = 0;
    }

    /// Append `frame`, growing the allocation if necessary & permitted.
    pub fn push(&mut self, frame: &[u8]) -> Result<(), Overflow> {
        let need = FRAME_HEADER_LEN + frame.len();
        if self.buf.len() - self.used < need && !self.grow(need) {
            self.overflow = true;
            self.overflow_counter += 1;
            return Err(Overflow);
        }
        let len = (frame.len() as u32).to_be_bytes();
        self.put(&len);
        self.put(frame);
        self.frames += 1;
        Ok(())
    }

    /// Copy the oldest frame into `out` (replacing its contents) without removing it.
    pub fn peek_into(&self, out: &mut Vec<u8>) -> Option<usize> {
        if self.frames == 0 {
            return None;
        }
        let len = self.frame_len();
        out.clear();
        out.resize(len, 0);
        self.copy_out((self.read + FRAME_HEADER_LEN) % self.buf.len(), out);
        Some(len)
    }

    /// Drop the oldest frame, if any.
    pub fn discard_oldest(&mut self) -> bool {
        if self.frames == 0 {
            return false;
        }
        let total = FRAME_HEADER_LEN + self.frame_len();
        self.read = (self.read + total) % self.buf.len();
        self.used -= total;
        self.frames -= 1;
        if self.frames == 0 {
            self.read = 0;
            self.write = 0;
        }
        true
    }

    /// Remove & return the oldest frame.
    pub fn pop_oldest(&mut self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        self.peek_into(&mut out)?;
        self.discard_oldest();
        Some(out)
    }

    fn frame_len(&self) -> usize {
        let mut len = [0u8; FRAME_HEADER_LEN];
        self.copy_out(self.read, &mut len);
        u32::from_be_bytes(len) as usize
    }

    /// Copy bytes out of the ring starting at `at`, wrapping as needed.
    fn copy_out(&self, at: usize, out: &mut [u8]) {
        let first = out.len().min(self.buf.len() - at);
        out[..first].copy_from_slice(&self.buf[at..at + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.buf[..rest]);
    }

    /// Copy `bytes` in at the write offset, wrapping as needed. The caller has checked for room.
    fn put(&mut self, bytes: &[u8]) {
        let cap = self.buf.len();
        let first = bytes.len().min(cap - self.write);
        self.buf[self.write..self.write + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        self.buf[..rest].copy_from_slice(&bytes[first..]);
        self.write = (self.write + bytes.len()) % cap;
        self.used += bytes.len();
    }

    /// Grow in whole steps until `need` more bytes fit; false if that would exceed the maximum.
    fn grow(&mut self, need: usize) -> bool {
        if self.step == 0 {
            return false;
        }
        let mut cap = self.buf.len();
        while cap - self.used < need {
            if cap >= self.max {
                return false;
            }
            cap = (cap + self.step).min(self.max);
        }
        // Linearize: the oldest frame moves to offset zero.
        let mut grown = vec![0; cap];
        if self.used > 0 {
            self.copy_out(self.read, &mut grown[..self.used]);
        }
        self.buf = grown;
        self.read = 0;
        self.write = self.used % cap;
        tracing::debug!("Grew the offline buffer to {} bytes", cap);
        true
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn fifo_with_wraparound() {
        // no growth; 40 bytes holds two 12-byte frames (16 with their headers) & change
        let mut ring = RingBuffer::new(40, 40, 0);
        ring.push(&[1; 12]).unwrap();
        ring.push(&[2; 12]).unwrap();
        assert_eq!(32, ring.size());
        assert_eq!(Some(vec![1; 12]), ring.pop_oldest());
        // this one wraps around the end
        assert!(ring.push(&[0; 21]).is_err());
        ring.push(&[3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]).unwrap();
        assert_eq!(Some(vec![2; 12]), ring.pop_oldest());
        assert_eq!(
            Some(vec![3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]),
            ring.pop_oldest()
        );
        assert!(ring.is_empty());
        assert_eq!(None, ring.pop_oldest());
        assert!(!ring.discard_oldest());
    }

    #[test]
    fn overflow_then_recovery() {
        // Room for exactly three 6-byte frames
        let mut ring = RingBuffer::new(30, 30, 0);
        for i in 0..3u8 {
            ring.push(&[i; 6]).unwrap();
        }
        assert_eq!(Err(Overflow), ring.push(&[9; 6]));
        assert!(ring.overflowed());
        assert_eq!(1, ring.overflow_counter());
        // the refused frame is gone; the others are intact & in order
        assert_eq!(3, ring.len());
        for i in 0..3u8 {
            assert_eq!(Some(vec![i; 6]), ring.pop_oldest());
        }
        ring.push(&[9; 6]).unwrap();
        // the counter is monotonic
        ring.clear_overflow_flag();
        assert!(!ring.overflowed());
        assert_eq!(1, ring.overflow_counter());
        ring.reset_overflow();
        assert_eq!(0, ring.overflow_counter());
    }

    #[test]
    fn growth() {
        let mut ring = RingBuffer::new(16, 64, 16);
        ring.push(&[1; 10]).unwrap();
        ring.push(&[2; 10]).unwrap();
        assert_eq!(32, ring.capacity());
        // wrap the contents before the next growth
        assert_eq!(Some(vec![1; 10]), ring.pop_oldest());
        ring.push(&[3; 10]).unwrap();
        ring.push(&[4; 20]).unwrap();
        assert_eq!(64, ring.capacity());
        let mut out = Vec::new();
        assert_eq!(Some(10), ring.peek_into(&mut out));
        assert_eq!(vec![2; 10], out);
        assert_eq!(Some(vec![2; 10]), ring.pop_oldest());
        assert_eq!(Some(vec![3; 10]), ring.pop_oldest());
        assert_eq!(Some(vec![4; 20]), ring.pop_oldest());
        // a frame larger than the maximum is refused outright
        assert_eq!(Err(Overflow), ring.push(&[0; 61]));
        assert_eq!(64, ring.capacity());
    }
}
