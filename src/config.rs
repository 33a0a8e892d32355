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

//! Client configuration.
//!
//! A [`Config`] is assembled with a [`ConfigBuilder`], optionally seeded from the environment via
//! [`Config::from_env`]. Environment settings are read once; changing them later has no effect on
//! a client already built.
//!
//! ```rust
//! use dlt_user::config::Config;
//! use std::time::Duration;
//! let config = Config::builder()
//!     .app_id_as_str("NAVI")
//!     .unwrap()
//!     .message_buffer_len(512)
//!     .resend_max_wait(Duration::from_millis(250))
//!     .build();
//! assert_eq!(512, config.message_buffer_len());
//! ```

use crate::{
    context::Id,
    env::{LevelSet, INITIAL_LOG_LEVEL_VAR},
    error::{Error, Result},
    header::MAX_HEADER_LEN,
    level::{LogLevel, TraceStatus},
};

use backtrace::Backtrace;

use std::time::Duration;

/// Default envelope capacity: the largest payload a single record may carry
pub const DEFAULT_MESSAGE_BUFFER_LEN: usize = 1390;
/// The envelope is never allowed to shrink below room for a non-verbose message id
pub const MIN_MESSAGE_BUFFER_LEN: usize = 4;
/// ... nor grow beyond what the standard header's length field can describe
pub const MAX_MESSAGE_BUFFER_LEN: usize = u16::MAX as usize - MAX_HEADER_LEN;

pub const DEFAULT_RING_BUFFER_MIN: usize = 50_000;
pub const DEFAULT_RING_BUFFER_MAX: usize = 500_000;
pub const DEFAULT_RING_BUFFER_STEP: usize = 50_000;

pub const DEFAULT_RESEND_MAX_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_millis(10);

pub const DEFAULT_SEGMENT_SIZE: usize = 1024;
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Environment variable overriding the envelope capacity
pub const MESSAGE_BUFFER_LEN_VAR: &str = "DLT_LOG_MSG_BUF_LEN";
pub const RING_BUFFER_MIN_VAR: &str = "DLT_USER_BUFFER_MIN";
pub const RING_BUFFER_MAX_VAR: &str = "DLT_USER_BUFFER_MAX";
pub const RING_BUFFER_STEP_VAR: &str = "DLT_USER_BUFFER_STEP_SIZE";

/// Everything a [`Client`](crate::client::Client) needs to know at construction.
#[derive(Clone, Debug)]
pub struct Config {
    app_id: Id,
    description: Option<String>,
    ecu_id: Id,
    message_buffer_len: usize,
    verbose: bool,
    ring_buffer_min: usize,
    ring_buffer_max: usize,
    ring_buffer_step: usize,
    resend_max_wait: Duration,
    resend_interval: Duration,
    segment_size: usize,
    queue_depth: usize,
    levels: LevelSet,
    default_log_level: LogLevel,
    default_trace_status: TraceStatus,
    with_session_id: bool,
    with_timestamp: bool,
}

impl std::default::Default for Config {
    fn default() -> Self {
        Config {
            app_id: Id::from_executable(),
            description: None,
            ecu_id: Id::from_bytes(*b"ECU1"),
            message_buffer_len: DEFAULT_MESSAGE_BUFFER_LEN,
            verbose: true,
            ring_buffer_min: DEFAULT_RING_BUFFER_MIN,
            ring_buffer_max: DEFAULT_RING_BUFFER_MAX,
            ring_buffer_step: DEFAULT_RING_BUFFER_STEP,
            resend_max_wait: DEFAULT_RESEND_MAX_WAIT,
            resend_interval: DEFAULT_RESEND_INTERVAL,
            segment_size: DEFAULT_SEGMENT_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            levels: LevelSet::new(),
            default_log_level: LogLevel::Info,
            default_trace_status: TraceStatus::Off,
            with_session_id: true,
            with_timestamp: true,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            imp: Config::default(),
        }
    }
    /// Start from the defaults, overridden by any of the recognized environment variables.
    pub fn from_env() -> Result<ConfigBuilder> {
        Config::builder().apply_env_with(|name| std::env::var(name).ok())
    }

    pub fn app_id(&self) -> Id {
        self.app_id
    }
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    pub fn ecu_id(&self) -> Id {
        self.ecu_id
    }
    /// The envelope capacity, in bytes of payload
    pub fn message_buffer_len(&self) -> usize {
        self.message_buffer_len
    }
    pub fn verbose(&self) -> bool {
        self.verbose
    }
    pub fn ring_buffer_min(&self) -> usize {
        self.ring_buffer_min
    }
    pub fn ring_buffer_max(&self) -> usize {
        self.ring_buffer_max
    }
    pub fn ring_buffer_step(&self) -> usize {
        self.ring_buffer_step
    }
    pub fn resend_max_wait(&self) -> Duration {
        self.resend_max_wait
    }
    pub fn resend_interval(&self) -> Duration {
        self.resend_interval
    }
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }
    pub fn levels(&self) -> &LevelSet {
        &self.levels
    }
    pub fn default_log_level(&self) -> LogLevel {
        self.default_log_level
    }
    pub fn default_trace_status(&self) -> TraceStatus {
        self.default_trace_status
    }
    pub fn with_session_id(&self) -> bool {
        self.with_session_id
    }
    pub fn with_timestamp(&self) -> bool {
        self.with_timestamp
    }
}

pub struct ConfigBuilder {
    imp: Config,
}

fn parse_size(name: &'static str, text: String) -> Result<usize> {
    text.trim().parse::<usize>().map_err(|_| Error::BadEnv {
        name,
        text,
        back: Backtrace::new(),
    })
}

impl ConfigBuilder {
    pub fn app_id(mut self, id: Id) -> Self {
        self.imp.app_id = id;
        self
    }
    pub fn app_id_as_str(mut self, id: &str) -> Result<Self> {
        self.imp.app_id = Id::try_from(id)?;
        Ok(self)
    }
    pub fn description(mut self, description: &str) -> Self {
        self.imp.description = Some(description.to_string());
        self
    }
    pub fn ecu_id(mut self, id: Id) -> Self {
        self.imp.ecu_id = id;
        self
    }
    pub fn ecu_id_as_str(mut self, id: &str) -> Result<Self> {
        self.imp.ecu_id = Id::try_from(id)?;
        Ok(self)
    }
    pub fn message_buffer_len(mut self, len: usize) -> Self {
        self.imp.message_buffer_len = len;
        self
    }
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.imp.verbose = verbose;
        self
    }
    pub fn ring_buffer(mut self, min: usize, max: usize, step: usize) -> Self {
        self.imp.ring_buffer_min = min;
        self.imp.ring_buffer_max = max;
        self.imp.ring_buffer_step = step;
        self
    }
    pub fn resend_max_wait(mut self, wait: Duration) -> Self {
        self.imp.resend_max_wait = wait;
        self
    }
    pub fn resend_interval(mut self, interval: Duration) -> Self {
        self.imp.resend_interval = interval;
        self
    }
    pub fn segment_size(mut self, size: usize) -> Self {
        self.imp.segment_size = size;
        self
    }
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.imp.queue_depth = depth;
        self
    }
    pub fn levels(mut self, levels: LevelSet) -> Self {
        self.imp.levels = levels;
        self
    }
    pub fn levels_as_str(mut self, text: &str) -> Result<Self> {
        self.imp.levels = LevelSet::parse(text)?;
        Ok(self)
    }
    pub fn default_log_level(mut self, level: LogLevel) -> Self {
        self.imp.default_log_level = level;
        self
    }
    pub fn default_trace_status(mut self, status: TraceStatus) -> Self {
        self.imp.default_trace_status = status;
        self
    }
    pub fn with_session_id(mut self, with: bool) -> Self {
        self.imp.with_session_id = with;
        self
    }
    pub fn with_timestamp(mut self, with: bool) -> Self {
        self.imp.with_timestamp = with;
        self
    }
    /// Apply environment overrides, looking each variable up through `lookup`.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(text) = lookup(INITIAL_LOG_LEVEL_VAR) {
            self.imp.levels = LevelSet::parse(&text)?;
        }
        if let Some(text) = lookup(MESSAGE_BUFFER_LEN_VAR) {
            self.imp.message_buffer_len = parse_size(MESSAGE_BUFFER_LEN_VAR, text)?;
        }
        if let Some(text) = lookup(RING_BUFFER_MIN_VAR) {
            self.imp.ring_buffer_min = parse_size(RING_BUFFER_MIN_VAR, text)?;
        }
        if let Some(text) = lookup(RING_BUFFER_MAX_VAR) {
            self.imp.ring_buffer_max = parse_size(RING_BUFFER_MAX_VAR, text)?;
        }
        if let Some(text) = lookup(RING_BUFFER_STEP_VAR) {
            self.imp.ring_buffer_step = parse_size(RING_BUFFER_STEP_VAR, text)?;
        }
        Ok(self)
    }
    /// Produce the [`Config`], clamping sizes into their workable ranges.
    pub fn build(mut self) -> Config {
        let c = &mut self.imp;
        c.message_buffer_len = c
            .message_buffer_len
            .clamp(MIN_MESSAGE_BUFFER_LEN, MAX_MESSAGE_BUFFER_LEN);
        // The offline buffer must hold at least one full frame, with its bookkeeping.
        let frame = c.message_buffer_len + MAX_HEADER_LEN + crate::buffer::FRAME_HEADER_LEN;
        c.ring_buffer_min = c.ring_buffer_min.max(frame);
        c.ring_buffer_max = c.ring_buffer_max.max(c.ring_buffer_min);
        c.queue_depth = c.queue_depth.max(1);
        c.segment_size = c.segment_size.clamp(1, u16::MAX as usize);
        self.imp
    }
}
