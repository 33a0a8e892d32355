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

//! Initial log levels from the environment.
//!
//! # Introduction
//!
//! A process may be started with `DLT_INITIAL_LOG_LEVEL` set to a semicolon-separated list of
//! `appid:ctxid:level` items, e.g.
//!
//! ```text
//! DLT_INITIAL_LOG_LEVEL="::warning;NAVI::info;NAVI:GPS:verbose;:TRC:-1"
//! ```
//!
//! Either identifier may be left empty to match anything. The level is a signed integer between
//! -1 and 6 or one of the case-insensitive names `default`, `off`, `fatal`, `error`, `warning`,
//! `info`, `debug` & `verbose`.
//!
//! When a context is registered, the most specific matching item wins:
//!
//! | application | context | priority |
//! |-------------|---------|----------|
//! | wildcard    | wildcard| 1        |
//! | wildcard    | exact   | 2        |
//! | exact       | wildcard| 3        |
//! | exact       | exact   | 4        |
//!
//! If nothing matches, the level the context would otherwise have had is left alone.
//!
//! ```rust
//! use dlt_user::{env::LevelSet, context::Id, level::LogLevel};
//! let set: LevelSet = "::1;:1234:2;ABCD::3;ABCD:1234:4".parse().unwrap();
//! let app = Id::new(b"ABCD").unwrap();
//! let ctx = Id::new(b"9999").unwrap();
//! assert_eq!(LogLevel::Warn, set.resolve(app, ctx, LogLevel::Info));
//! ```

use crate::{
    context::Id,
    error::{Error, Result},
    level::LogLevel,
};

use backtrace::Backtrace;

/// Name of the environment variable holding initial log levels
pub const INITIAL_LOG_LEVEL_VAR: &str = "DLT_INITIAL_LOG_LEVEL";

/// One `appid:ctxid:level` override; `None` is a wildcard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelItem {
    pub app: Option<Id>,
    pub context: Option<Id>,
    pub level: LogLevel,
}

impl LevelItem {
    /// How specifically this item matches `(app, context)`; zero means "not at all".
    pub fn priority(&self, app: Id, context: Id) -> u8 {
        match (&self.app, &self.context) {
            (None, None) => 1,
            (None, Some(c)) if *c == context => 2,
            (Some(a), None) if *a == app => 3,
            (Some(a), Some(c)) if *a == app && *c == context => 4,
            _ => 0,
        }
    }
}

/// An ordered collection of [`LevelItem`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelSet {
    items: Vec<LevelItem>,
}

impl LevelSet {
    pub fn new() -> LevelSet {
        LevelSet::default()
    }
    /// Parse the `appid:ctxid:level[;...]` grammar.
    ///
    /// Any malformed item fails the whole parse. Empty items (e.g. a trailing `;`) are skipped.
    pub fn parse(text: &str) -> Result<LevelSet> {
        let mut set = LevelSet::new();
        for item in text.split(';').filter(|item| !item.is_empty()) {
            set.push(parse_item(item).map_err(|_| Error::BadEnv {
                name: INITIAL_LOG_LEVEL_VAR,
                text: item.to_string(),
                back: Backtrace::new(),
            })?);
        }
        Ok(set)
    }
    /// Read & parse [`INITIAL_LOG_LEVEL_VAR`]; an unset variable yields an empty set.
    pub fn from_env() -> Result<LevelSet> {
        match std::env::var(INITIAL_LOG_LEVEL_VAR) {
            Ok(text) => LevelSet::parse(&text),
            Err(std::env::VarError::NotPresent) => Ok(LevelSet::new()),
            Err(std::env::VarError::NotUnicode(raw)) => Err(Error::BadEnv {
                name: INITIAL_LOG_LEVEL_VAR,
                text: raw.to_string_lossy().into_owned(),
                back: Backtrace::new(),
            }),
        }
    }
    pub fn push(&mut self, item: LevelItem) {
        self.items.push(item);
    }
    pub fn items(&self) -> &[LevelItem] {
        &self.items
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    /// Resolve the initial log level for `(app, context)`, or return `original` if no item
    /// matches.
    pub fn resolve(&self, app: Id, context: Id, original: LogLevel) -> LogLevel {
        let mut best: Option<(u8, LogLevel)> = None;
        for item in &self.items {
            let prio = item.priority(app, context);
            if prio == 4 {
                // Only one item can match exactly; no need to look further.
                return item.level;
            }
            if prio > best.map_or(0, |(p, _)| p) {
                best = Some((prio, item.level));
            }
        }
        best.map_or(original, |(_, level)| level)
    }
}

impl std::str::FromStr for LevelSet {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        LevelSet::parse(s)
    }
}

fn parse_id(field: &str) -> Result<Option<Id>> {
    if field.is_empty() {
        Ok(None)
    } else {
        Id::new(field.as_bytes()).map(Some)
    }
}

fn parse_item(item: &str) -> Result<LevelItem> {
    let mut fields = item.splitn(3, ':');
    let (app, context, level) = match (fields.next(), fields.next(), fields.next()) {
        (Some(app), Some(context), Some(level)) => (app, context, level),
        _ => return Err(Error::wrong_parameter("missing ':' delimiter")),
    };
    Ok(LevelItem {
        app: parse_id(app)?,
        context: parse_id(context)?,
        level: level.parse::<LogLevel>()?,
    })
}
