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

//! [dlt-user](crate) errors

use crate::context::Id;

use backtrace::Backtrace;

/// [dlt-user](crate) error type
///
/// Like its sibling crates, [dlt-user](crate) eschews libraries like [thiserror], [anyhow] &
/// [Snafu] in favor of a straightforward enumeration with a few match arms chosen on the basis of
/// what the caller will need to respond.
///
/// [thiserror]: https://docs.rs/thiserror
/// [anyhow]: https://docs.rs/anyhow
/// [Snafu]: https://docs.rs/snafu/latest/snafu
///
/// Two variants are not failures in the usual sense. [`Error::UserBufferFull`] means the record
/// _was_ emitted (or queued) but lost content along the way: an argument was truncated, or a frame
/// was dropped because the offline buffer was exhausted. [`Error::QueueFull`] means a segmented
/// network trace could not be handed to the background worker. Neither carries a backtrace, since
/// both sit on the logging hot path.
///
/// Note that a suppressed log record is _not_ an error at all; [`Client::start`] returns `Ok(None)`
/// in that case.
///
/// [`Client::start`]: crate::client::Client::start
#[non_exhaustive]
pub enum Error {
    /// A four-character identifier was empty, too long or not ASCII
    BadId { id: Vec<u8>, back: Backtrace },
    /// An environment setting could not be parsed
    BadEnv {
        name: &'static str,
        text: String,
        back: Backtrace,
    },
    /// A caller-supplied parameter was out of range
    WrongParameter { what: &'static str, back: Backtrace },
    /// The record was emitted, but with loss of content
    UserBufferFull,
    /// `start` was called on a context for which this thread already has a message in flight
    MessageInProgress { context: Id, back: Backtrace },
    /// The transport has no connection to the daemon
    NotConnected,
    /// General transport layer error
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        back: Backtrace,
    },
    /// I/O error
    Io {
        source: std::io::Error,
        back: Backtrace,
    },
    /// The client has been shut down
    Shutdown,
    /// The segmentation queue is at capacity
    QueueFull,
    /// A frame or payload could not be decoded
    Decode { what: &'static str, offset: usize },
}

impl Error {
    /// Convenience constructor for [`Error::WrongParameter`]
    pub(crate) fn wrong_parameter(what: &'static str) -> Error {
        Error::WrongParameter {
            what,
            back: Backtrace::new(),
        }
    }
    /// Convenience constructor for [`Error::Transport`]
    pub(crate) fn transport<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
        Error::Transport {
            source: Box::new(err),
            back: Backtrace::new(),
        }
    }
    /// True if this is the "emitted, but lossy" outcome
    pub fn is_buffer_full(&self) -> bool {
        matches!(self, Error::UserBufferFull)
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            source: err,
            back: Backtrace::new(),
        }
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadId { id, .. } => write!(f, "{:?} is not a valid DLT identifier", id),
            Error::BadEnv { name, text, .. } => {
                write!(f, "Couldn't parse environment variable {}: {:?}", name, text)
            }
            Error::WrongParameter { what, .. } => write!(f, "Wrong parameter: {}", what),
            Error::UserBufferFull => write!(f, "User buffer full; content was lost"),
            Error::MessageInProgress { context, .. } => write!(
                f,
                "A message for context {} is still being assembled on this thread",
                context
            ),
            Error::NotConnected => write!(f, "Not connected to the DLT daemon"),
            Error::Transport { source, .. } => write!(f, "Transport error: {}", source),
            Error::Io { source, .. } => write!(f, "I/O error: {}", source),
            Error::Shutdown => write!(f, "The DLT client has been shut down"),
            Error::QueueFull => write!(f, "The network trace queue is full"),
            Error::Decode { what, offset } => {
                write!(f, "Decoding failed at offset {}: {}", offset, what)
            }
            _ => write!(f, "Other dlt-user error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadId { id: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::BadEnv { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::WrongParameter { what: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::MessageInProgress { context: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Transport { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Io { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            err => write!(f, "dlt-user error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
