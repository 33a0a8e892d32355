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

//! DLT log level & trace status definitions.
//!
//! [`LogLevel`] and [`TraceStatus`] replicate the values used on the wire by the [AUTOSAR] Log
//! and Trace protocol: the numeric value of a [`LogLevel`] is what lands in the "message type
//! info" nibble of the extended header, and what a daemon sends back when it changes a context's
//! threshold at runtime.
//!
//! [AUTOSAR]: https://www.autosar.org/fileadmin/standards/R22-11/FO/AUTOSAR_PRS_LogAndTraceProtocol.pdf

use crate::error::{Error, Result};

use backtrace::Backtrace;

type StdResult<T, E> = std::result::Result<T, E>;

/// DLT log levels.
///
/// Lower is more severe. A record at level `l` passes a context whose threshold is `t` when
/// `l <= t` (and `l` is not [`LogLevel::Off`]). [`LogLevel::Default`] is only meaningful as a
/// _threshold_ ("use whatever the application default is"); it is not a valid level at which to
/// emit a record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i8)]
pub enum LogLevel {
    /// defer to the application-wide default
    Default = -1,
    /// nothing passes
    Off = 0,
    /// fatal system error
    Fatal = 1,
    /// error with impact to correct functionality
    Error = 2,
    /// warning, correct behaviour could not be ensured
    Warn = 3,
    /// informational
    Info = 4,
    /// debug
    Debug = 5,
    /// highest grade of information
    Verbose = 6,
}

impl LogLevel {
    /// The level's wire value
    pub fn as_i8(self) -> i8 {
        self as i8
    }
    /// Decode a level previously stored with [`LogLevel::as_i8`]; anything unrecognized is
    /// treated as [`LogLevel::Off`].
    pub(crate) fn from_cell(value: i8) -> LogLevel {
        LogLevel::try_from(value as i32).unwrap_or(LogLevel::Off)
    }
}

impl std::convert::TryFrom<i32> for LogLevel {
    type Error = Error;
    fn try_from(x: i32) -> StdResult<Self, Error> {
        match x {
            -1 => Ok(LogLevel::Default),
            0 => Ok(LogLevel::Off),
            1 => Ok(LogLevel::Fatal),
            2 => Ok(LogLevel::Error),
            3 => Ok(LogLevel::Warn),
            4 => Ok(LogLevel::Info),
            5 => Ok(LogLevel::Debug),
            6 => Ok(LogLevel::Verbose),
            _ => Err(Error::WrongParameter {
                what: "log level out of range",
                back: Backtrace::new(),
            }),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;
    /// Accepts either the signed integer value (-1 through 6) or one of the case-insensitive
    /// symbolic names `default`, `off`, `fatal`, `error`, `warning`, `info`, `debug` & `verbose`.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(LogLevel::Default),
            "off" => Ok(LogLevel::Off),
            "fatal" => Ok(LogLevel::Fatal),
            "error" => Ok(LogLevel::Error),
            "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            other => other
                .parse::<i32>()
                .map_err(|_| Error::wrong_parameter("unrecognized log level"))
                .and_then(LogLevel::try_from),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                LogLevel::Default => "default",
                LogLevel::Off => "off",
                LogLevel::Fatal => "fatal",
                LogLevel::Error => "error",
                LogLevel::Warn => "warning",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Verbose => "verbose",
            }
        )
    }
}

/// Whether network trace messages pass a context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum TraceStatus {
    /// defer to the application-wide default
    Default = -1,
    Off = 0,
    On = 1,
}

impl TraceStatus {
    pub fn as_i8(self) -> i8 {
        self as i8
    }
    pub(crate) fn from_cell(value: i8) -> TraceStatus {
        TraceStatus::try_from(value as i32).unwrap_or(TraceStatus::Off)
    }
}

impl std::convert::TryFrom<i32> for TraceStatus {
    type Error = Error;
    fn try_from(x: i32) -> StdResult<Self, Error> {
        match x {
            -1 => Ok(TraceStatus::Default),
            0 => Ok(TraceStatus::Off),
            1 => Ok(TraceStatus::On),
            _ => Err(Error::wrong_parameter("trace status out of range")),
        }
    }
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                TraceStatus::Default => "default",
                TraceStatus::Off => "off",
                TraceStatus::On => "on",
            }
        )
    }
}
