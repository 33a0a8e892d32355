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

//! Test writing to a DLT daemon listening on its local socket (`/tmp/dlt`).

use dlt_user::{
    client::{Client, Resend},
    config::Config,
    layer::Layer,
    level::LogLevel,
    transport::UnixSocketStream,
};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{
    layer::SubscriberExt, // Needed to get `with()`
    registry::Registry,
};

pub fn main() {
    let config = Config::from_env()
        .unwrap()
        .app_id_as_str("UXTS")
        .unwrap()
        .description("Unix domain socket test")
        .build();
    let client = Arc::new(Client::new(config, UnixSocketStream::try_default().unwrap()).unwrap());
    let ctx = client.register_context("MAIN", "direct records").unwrap();
    client
        .log_str(&ctx, LogLevel::Info, "你好, Unix domain socket.")
        .unwrap();

    let subscriber = Registry::default().with(Layer::new(
        client.clone(),
        client.register_context("TRCG", "tracing events").unwrap(),
    ));
    let _guard = tracing::subscriber::set_default(subscriber);

    trace!("你好, Unix domain socket.");
    debug!("你好, Unix domain socket.");
    info!("你好, Unix domain socket.");
    warn!("你好, Unix domain socket.");
    error!("你好, Unix domain socket.");

    match client.resend().unwrap() {
        Resend::Drained(_) => (),
        other => eprintln!("Records still buffered: {:?}", other),
    }
}
