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
//! The client side of [DLT]: assembling log & network-trace records for a DLT daemon
//!
//! [DLT]: https://www.autosar.org/fileadmin/standards/R22-11/FO/AUTOSAR_PRS_LogAndTraceProtocol.pdf
//!
//! # Introduction
//!
//! DLT (Diagnostic Log and Trace) is the AUTOSAR logging protocol. Applications register an
//! _application id_ and any number of _contexts_ (each a four-character id of its own) and then
//! emit records to those contexts. Every record carries a log level; each context carries a
//! threshold that a daemon (or the `DLT_INITIAL_LOG_LEVEL` environment variable) may adjust at
//! run time. Records whose level does not pass the threshold are never built.
//!
//! In _verbose_ mode a record's payload is a sequence of self-describing arguments: each is
//! prefixed by a 32-bit type-info word (and optionally a name and unit). In _non-verbose_ mode
//! the payload starts with a 32-bit message id and carries bare values.
//!
//! This crate provides:
//!
//! - [`client::Client`]: registration, level gating, framing and delivery
//! - [`message::Message`]: a bounded record builder that truncates rather than overruns
//! - [`buffer::RingBuffer`]: the offline buffer holding frames the transport could not take
//! - network traces (see [`nwtrace`]), segmented & sent off-thread when large
//! - [`transport`]s to a local daemon, over UDP or TCP, or into a DLT storage file
//! - [`layer::Layer`]: a [`tracing-subscriber`] [`Layer`] forwarding [`tracing`] events
//! - [`decode`]: parsing frames back into their arguments
//!
//! [`tracing-subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
//! [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html
//!
//! # Usage
//!
//! ```rust
//! use dlt_user::{client::Client, config::Config, level::LogLevel, transport::MemoryTransport};
//!
//! let config = Config::builder().app_id_as_str("DEMO").unwrap().build();
//! let client = Client::new(config, MemoryTransport::new()).unwrap();
//! let ctx = client.register_context("MAIN", "main loop").unwrap();
//!
//! // Simple cases:
//! client.log_str(&ctx, LogLevel::Info, "Hello, world!").unwrap();
//!
//! // or build a record argument-by-argument:
//! if let Some(mut msg) = client.start(&ctx, LogLevel::Warn).unwrap() {
//!     msg.write_attr(87u8, "temperature", Some("°C")).unwrap();
//!     msg.write_string("running hot").unwrap();
//!     msg.finish().unwrap();
//! };
//! ```
//!
//! Records that the transport cannot take right now are kept in the offline buffer and sent,
//! in order, once it recovers:
//!
//! ```no_run
//! use dlt_user::{client::Client, config::Config, level::LogLevel, transport::UnixSocketStream};
//!
//! let config = Config::from_env().unwrap().app_id_as_str("DEMO").unwrap().build();
//! let client = Client::new(config, UnixSocketStream::try_default().unwrap()).unwrap();
//! let ctx = client.register_context("MAIN", "").unwrap();
//! client.log_str(&ctx, LogLevel::Info, "queued if the daemon is away").unwrap();
//! client.resend().unwrap();
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod context;
pub mod decode;
pub mod env;
pub mod error;
pub mod header;
pub mod layer;
pub mod level;
pub mod message;
pub mod nwtrace;
pub mod transport;
pub mod truncate;
pub mod typeinfo;
