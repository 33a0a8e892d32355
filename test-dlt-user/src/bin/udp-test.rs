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

//! Test writing to port 3490 on the local host.

use dlt_user::{client::Client, config::Config, level::LogLevel, transport::UdpTransport};

pub fn main() {
    let config = Config::builder().app_id_as_str("UDPT").unwrap().build();
    let client = Client::new(config, UdpTransport::local().unwrap()).unwrap();
    let ctx = client.register_context("MAIN", "").unwrap();

    for level in [
        LogLevel::Fatal,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
    ] {
        client
            .log_args(&ctx, level, |msg| {
                msg.write_utf8("Hello, 世界!")?;
                msg.write_attr(level.as_i8(), "level", None)
            })
            .unwrap();
    }
}
