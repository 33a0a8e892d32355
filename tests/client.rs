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

//! Exercise the client end-to-end through its public interface.

use dlt_user::{
    client::{Client, Resend},
    config::Config,
    context::Id,
    decode::{stored_frames, Frame, Value},
    header::MessageType,
    level::{LogLevel, TraceStatus},
    nwtrace::{TraceKind, TRACE_TRUNCATED},
    transport::{FileTransport, MemoryTransport},
    truncate::TRUNCATION_MARKER,
};

use std::sync::Arc;

fn values(frame: &[u8]) -> Vec<Value> {
    Frame::parse(frame)
        .unwrap()
        .arguments()
        .unwrap()
        .into_iter()
        .map(|arg| arg.value)
        .collect()
}

#[test]
fn round_trip() {
    let transport = MemoryTransport::new();
    let config = Config::builder()
        .app_id_as_str("APP1")
        .unwrap()
        .ecu_id_as_str("ECU1")
        .unwrap()
        .build();
    let client = Client::new(config, transport.clone()).unwrap();
    let ctx = client.register_context("CTX1", "round trip").unwrap();

    let mut msg = client.start(&ctx, LogLevel::Info).unwrap().unwrap();
    msg.write(12345678_u32).unwrap();
    msg.write_string("hello").unwrap();
    msg.finish().unwrap();

    let frames = transport.frames();
    assert_eq!(1, frames.len());
    let frame = Frame::parse(&frames[0]).unwrap();
    assert!(frame.verbose);
    assert_eq!(2, frame.args);
    assert_eq!(Some(Id::new(b"ECU1").unwrap()), frame.ecu);
    assert_eq!("APP1", frame.app.as_str());
    assert_eq!("CTX1", frame.context.as_str());
    assert_eq!(MessageType::Log(LogLevel::Info), frame.message_type);
    assert_eq!(
        vec![Value::UInt(12345678), Value::String("hello".to_string())],
        values(&frames[0])
    );
}

#[test]
fn initial_levels() {
    let transport = MemoryTransport::new();
    let config = Config::builder()
        .app_id_as_str("ABCD")
        .unwrap()
        .levels_as_str("::1;:1234:2;ABCD::3;ABCD:1234:4")
        .unwrap()
        .build();
    let client = Client::new(config, transport.clone()).unwrap();

    let exact = client.register_context("1234", "").unwrap();
    let other = client.register_context("9999", "").unwrap();
    assert_eq!(LogLevel::Info, exact.log_level());
    assert_eq!(LogLevel::Warn, other.log_level());

    client.log_str(&exact, LogLevel::Info, "logged").unwrap();
    client.log_str(&other, LogLevel::Info, "suppressed").unwrap();
    assert_eq!(1, transport.frames().len());

    // The daemon may adjust a context's level at any time
    other.cells().set_log_level(LogLevel::Verbose);
    client.log_str(&other, LogLevel::Debug, "now logged").unwrap();
    assert_eq!(2, transport.frames().len());
}

#[test]
fn truncation() {
    let transport = MemoryTransport::new();
    let config = Config::builder().message_buffer_len(64).build();
    let client = Client::new(config, transport.clone()).unwrap();
    let ctx = client.register_context("TRNC", "").unwrap();

    let text = "y".repeat(200);
    let result = client.log_str(&ctx, LogLevel::Warn, &text);
    assert!(result.unwrap_err().is_buffer_full());

    // Sent anyway, in shortened form
    let frames = transport.frames();
    assert_eq!(1, frames.len());
    match &values(&frames[0])[..] {
        [Value::String(s)] => {
            assert!(s.starts_with('y'));
            assert!(s.ends_with(TRUNCATION_MARKER));
        }
        other => panic!("unexpected arguments {:?}", other),
    }
    assert!(Frame::parse(&frames[0]).unwrap().payload.len() <= 64);
}

#[test]
fn outage() {
    let transport = MemoryTransport::disconnected();
    let client = Client::new(Config::default(), transport.clone()).unwrap();
    let ctx = client.register_context("OUTG", "").unwrap();
    for i in 0..5_u32 {
        client
            .log_args(&ctx, LogLevel::Info, |msg| msg.write(i))
            .unwrap();
    }
    assert_eq!(5, client.buffered());
    assert!(transport.frames().is_empty());

    transport.set_connected(true);
    assert_eq!(Resend::Drained(5), client.resend().unwrap());
    client
        .log_args(&ctx, LogLevel::Info, |msg| msg.write(5_u32))
        .unwrap();

    let sent: Vec<Vec<Value>> = transport.frames().iter().map(|f| values(f)).collect();
    let expected: Vec<Vec<Value>> = (0..6).map(|i| vec![Value::UInt(i)]).collect();
    assert_eq!(expected, sent);
    assert!(!client.overflowed());
}

#[test]
fn threads() {
    let transport = MemoryTransport::new();
    let client = Arc::new(Client::new(Config::default(), transport.clone()).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|n| {
            let client = client.clone();
            std::thread::spawn(move || {
                let ctx = client.register_context(&format!("TH{}", n), "").unwrap();
                for i in 0..25_u32 {
                    client
                        .log_args(&ctx, LogLevel::Info, |msg| msg.write(i))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let frames = transport.frames();
    assert_eq!(100, frames.len());
    // Per context, both the message counter & the order of records are preserved
    for n in 0..4 {
        let name = format!("TH{}", n);
        let mine: Vec<Frame> = frames
            .iter()
            .map(|f| Frame::parse(f).unwrap())
            .filter(|f| f.context.as_str() == name)
            .collect();
        assert_eq!(25, mine.len());
        for (i, frame) in mine.iter().enumerate() {
            assert_eq!(i as u8, frame.counter);
            assert_eq!(vec![Value::UInt(i as u64)], frame.arguments().unwrap().into_iter().map(|a| a.value).collect::<Vec<_>>());
        }
    }
}

#[test]
fn message_changes_threads() {
    let transport = MemoryTransport::new();
    let client = Client::new(Config::default(), transport.clone()).unwrap();
    let ctx = client.register_context("MOVE", "").unwrap();

    let mut msg = client.start(&ctx, LogLevel::Info).unwrap().unwrap();
    msg.write_string("started here").unwrap();
    std::thread::scope(|s| {
        s.spawn(move || {
            msg.write_string("finished there").unwrap();
            msg.finish().unwrap();
        });
    });
    assert_eq!(1, transport.frames().len());

    // The starting thread is free to begin another record
    let msg = client.start(&ctx, LogLevel::Info).unwrap().unwrap();
    msg.finish().unwrap();
    assert_eq!(2, transport.frames().len());
}

#[test]
fn storage_file() {
    let path = std::env::temp_dir().join(format!("dlt-user-it-{}.dlt", std::process::id()));
    let _ = std::fs::remove_file(&path);
    {
        let config = Config::builder()
            .ecu_id_as_str("ECU7")
            .unwrap()
            .default_trace_status(TraceStatus::On)
            .message_buffer_len(128)
            .build();
        let client = Client::new(config, FileTransport::new(&path).unwrap()).unwrap();
        let ctx = client.register_context("FILE", "").unwrap();
        client.log_str(&ctx, LogLevel::Error, "first").unwrap();
        // too big for one packet, so truncated
        client
            .trace_truncated(&ctx, TraceKind::Ethernet, &[1, 2, 3], &[0xee; 400], true)
            .unwrap();
    }

    let bytes = std::fs::read(&path).unwrap();
    let stored: Vec<_> = stored_frames(&bytes).collect::<Result<_, _>>().unwrap();
    assert_eq!(2, stored.len());
    assert!(stored.iter().all(|s| s.ecu.as_str() == "ECU7"));
    assert_eq!(
        MessageType::Log(LogLevel::Error),
        stored[0].frame.message_type
    );
    assert_eq!(
        MessageType::NwTrace(TraceKind::Ethernet),
        stored[1].frame.message_type
    );
    match &stored[1].frame.arguments().unwrap().into_iter().map(|a| a.value).collect::<Vec<_>>()[..] {
        [Value::String(tag), Value::Raw(header), Value::UInt(400), Value::Raw(data)] => {
            assert_eq!(TRACE_TRUNCATED, tag.as_str());
            assert_eq!(&vec![1, 2, 3], header);
            assert!(!data.is_empty() && data.len() < 400);
        }
        other => panic!("unexpected arguments {:?}", other),
    }
    let _ = std::fs::remove_file(&path);
}
