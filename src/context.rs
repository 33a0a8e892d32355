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

//! Identifiers & logging contexts.
//!
//! A [`Context`] is one logging channel within an application. Its gating threshold lives in a
//! [`ContextCells`] instance shared (via [`Arc`]) with whatever part of the process listens for
//! daemon control messages: the daemon may raise or lower a context's log level at any time, and
//! the logging path reads the cells with nothing stronger than a relaxed atomic load.

use crate::{
    error::{Error, Result},
    level::{LogLevel, TraceStatus},
};

use backtrace::Backtrace;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI8, AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, ThreadId},
};

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A DLT identifier: up to four bytes of ASCII, NUL-padded on the wire.
///
/// Application, context & ECU identifiers all share this representation.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Id([u8; 4]);

impl Id {
    /// Build an [`Id`] from between one & four ASCII bytes
    pub fn new(bytes: &[u8]) -> Result<Id> {
        if bytes.is_empty() || bytes.len() > 4 || !bytes.is_ascii() || bytes.contains(&0) {
            return Err(Error::BadId {
                id: bytes.to_vec(),
                back: Backtrace::new(),
            });
        }
        let mut id = [0u8; 4];
        id[..bytes.len()].copy_from_slice(bytes);
        Ok(Id(id))
    }
    /// Build an [`Id`] from its wire representation
    pub const fn from_bytes(bytes: [u8; 4]) -> Id {
        Id(bytes)
    }
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
    /// The identifier without its NUL padding
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(4);
        // Construction guarantees ASCII; a decoded wire value might not be.
        std::str::from_utf8(&self.0[..end]).unwrap_or("????")
    }
    /// Attempt to derive an application identifier from the name of the running executable.
    ///
    /// This takes the first four ASCII alphanumeric characters of the executable's file name,
    /// upper-cased. It cannot fail; if for any reason no such characters are available, it
    /// returns "APP".
    pub fn from_executable() -> Id {
        std::env::current_exe()
            .ok()
            .and_then(|pbuf| pbuf.file_name().map(|os_str| bytes_from_os_str(os_str.to_os_string())))
            .map(|bytes| {
                bytes
                    .into_iter()
                    .filter(|b| b.is_ascii_alphanumeric())
                    .map(|b| b.to_ascii_uppercase())
                    .take(4)
                    .collect::<Vec<u8>>()
            })
            .and_then(|bytes| Id::new(&bytes).ok())
            .unwrap_or(Id(*b"APP\0"))
    }
}

impl std::convert::TryFrom<&str> for Id {
    type Error = Error;
    fn try_from(x: &str) -> StdResult<Self, Self::Error> {
        Id::new(x.as_bytes())
    }
}

impl std::str::FromStr for Id {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Id::new(s.as_bytes())
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "Id({:?})", self.as_str())
    }
}

/// Produce a [`Vec`] of bytes from an [`OsString`](std::ffi::OsString).
#[cfg(unix)]
fn bytes_from_os_str(s: std::ffi::OsString) -> Vec<u8> {
    use std::os::unix::ffi::OsStringExt;
    s.into_vec()
}

#[cfg(not(unix))]
fn bytes_from_os_str(s: std::ffi::OsString) -> Vec<u8> {
    s.to_string_lossy().as_bytes().to_vec()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         gating cells                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The mutable log level & trace status of one context.
///
/// Single writer (whoever processes daemon control messages), many readers (every logging call on
/// the context).
#[derive(Debug)]
pub struct ContextCells {
    log_level: AtomicI8,
    trace_status: AtomicI8,
}

impl ContextCells {
    pub fn new(log_level: LogLevel, trace_status: TraceStatus) -> ContextCells {
        ContextCells {
            log_level: AtomicI8::new(log_level.as_i8()),
            trace_status: AtomicI8::new(trace_status.as_i8()),
        }
    }
    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_cell(self.log_level.load(Ordering::Relaxed))
    }
    pub fn set_log_level(&self, level: LogLevel) {
        self.log_level.store(level.as_i8(), Ordering::Relaxed);
    }
    pub fn trace_status(&self) -> TraceStatus {
        TraceStatus::from_cell(self.trace_status.load(Ordering::Relaxed))
    }
    pub fn set_trace_status(&self, status: TraceStatus) {
        self.trace_status.store(status.as_i8(), Ordering::Relaxed);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         struct Context                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////


/// One logging channel within a registered application.
///
/// Contexts are created by [`Client::register_context`] and handed out as `Arc<Context>` so that
/// they may be shared between threads and with the background network-trace worker.
///
/// [`Client::register_context`]: crate::client::Client::register_context
#[derive(Debug)]
pub struct Context {
    id: Id,
    description: Option<String>,
    cells: Arc<ContextCells>,
    counter: AtomicU8,
    // Threads that started a message on this context which has not yet been finished or dropped
    in_flight: Mutex<Vec<ThreadId>>,
    registered: AtomicBool,
}

impl Context {
    pub(crate) fn new(id: Id, description: Option<String>, cells: ContextCells) -> Context {
        Context {
            id,
            description,
            cells: Arc::new(cells),
            counter: AtomicU8::new(0),
            in_flight: Mutex::new(Vec::new()),
            registered: AtomicBool::new(true),
        }
    }
    pub fn id(&self) -> Id {
        self.id
    }
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    /// The shared gating cells; clone the [`Arc`] to hand them to a control-message listener.
    pub fn cells(&self) -> &Arc<ContextCells> {
        &self.cells
    }
    pub fn log_level(&self) -> LogLevel {
        self.cells.log_level()
    }
    pub fn trace_status(&self) -> TraceStatus {
        self.cells.trace_status()
    }
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }
    pub(crate) fn unregister(&self) {
        self.registered.store(false, Ordering::Release);
    }
    /// The per-message sequence counter; wraps at 256 as the wire field does
    pub(crate) fn next_counter(&self) -> u8 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
    /// Mark this context as having a message under assembly on the calling thread.
    ///
    /// Returns the claiming thread, which must be handed back to [`Context::release`]; the
    /// message may be finished on another thread than the one that started it.
    pub(crate) fn claim(&self) -> Result<ThreadId> {
        let me = thread::current().id();
        let mut open = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if open.contains(&me) {
            Err(Error::MessageInProgress {
                context: self.id,
                back: Backtrace::new(),
            })
        } else {
            open.push(me);
            Ok(me)
        }
    }
    pub(crate) fn release(&self, owner: ThreadId) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|&id| id != owner);
    }
}
