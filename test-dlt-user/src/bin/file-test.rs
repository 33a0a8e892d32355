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

//! Write a few records & a segmented network trace to a DLT file, then read it back.

use dlt_user::{
    client::Client,
    config::Config,
    decode::stored_frames,
    level::{LogLevel, TraceStatus},
    nwtrace::TraceKind,
    transport::FileTransport,
};
use std::sync::Arc;

pub fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "dlt-user-test.dlt".to_string());
    {
        let config = Config::builder()
            .app_id_as_str("FILE")
            .unwrap()
            .default_trace_status(TraceStatus::On)
            .segment_size(256)
            .build();
        let client = Client::new(config, FileTransport::new(&path).unwrap()).unwrap();
        let ctx: Arc<_> = client.register_context("MAIN", "").unwrap();
        client.log_str(&ctx, LogLevel::Info, "Hello, file.").unwrap();
        let payload: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
        client
            .trace_segmented(&ctx, TraceKind::Ethernet, &[0xde, 0xad], &payload)
            .unwrap();
        client.shutdown().unwrap();
    }

    let bytes = std::fs::read(&path).unwrap();
    for stored in stored_frames(&bytes) {
        let stored = stored.unwrap();
        println!(
            "{} {} {}:{} {:?} {:?}",
            stored.stored_at,
            stored.ecu,
            stored.frame.app,
            stored.frame.context,
            stored.frame.message_type,
            stored.frame.arguments().unwrap()
        );
    }
}
