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

//! Network traces.
//!
//! # Introduction
//!
//! A network trace records one message captured off some bus (CAN, FlexRay, Ethernet...): a
//! protocol header & a payload, each written as a raw argument of a verbose record whose message
//! type is "network trace" & whose message info is the bus ([`TraceKind`]). Network traces are
//! gated by a context's trace status rather than its log level; nothing is sent unless the status
//! is [`TraceStatus::On`].
//!
//! A payload too large for the envelope may be handled in one of two ways:
//!
//! - truncated: a single `"NWTR"` packet carries the header, the payload's original size & as much
//!   of the payload as fits ([`Client::trace_truncated`])
//!
//! - segmented: a `"NWST"` packet announces a stream, a `"NWCH"` packet carries each segment in
//!   order & a `"NWEN"` packet closes it ([`Client::trace_segmented`])
//!
//! ```text
//! NWTR: "NWTR" [header: raw] [original size: u32] [payload: raw]
//! NWST: "NWST" [handle: u32] [header: raw] [size: u32] [segments: u16] [segment size: u16]
//! NWCH: "NWCH" [handle: u32] [sequence: u16] [segment: raw]
//! NWEN: "NWEN" [handle: u32]
//! ```
//!
//! Segmented traces are sent from a dedicated worker thread, started on first use, which takes
//! its own copy of the header & payload; the caller's buffers are free as soon as
//! [`Client::trace_segmented`] returns. Streams are sent one at a time, each in sequence order.
//!
//! The manual trio [`Client::segmented_start`], [`Client::segmented_segment`] &
//! [`Client::segmented_end`] sends a stream from the calling thread. Avoid it unless you really
//! need control over each segment; nothing ensures a stream so begun is ever ended.

use crate::{
    client::{Client, Shared},
    config::Config,
    context::Context,
    error::{Error, Result},
    header::MessageType,
    level::TraceStatus,
    message::Message,
    transport::Transport,
};

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc::{sync_channel, SyncSender, TrySendError},
        Arc, PoisonError,
    },
    thread::JoinHandle,
};

pub const TRACE_TRUNCATED: &str = "NWTR";
pub const TRACE_START: &str = "NWST";
pub const TRACE_SEGMENT: &str = "NWCH";
pub const TRACE_END: &str = "NWEN";

/// Verbose overhead of a raw argument: type info & length
const RAW_OVERHEAD: usize = 6;
/// Verbose overhead of a four-character tag: type info, length, text & terminator
const TAG_OVERHEAD: usize = 11;
/// Everything in a `"NWCH"` packet but the segment itself
const SEGMENT_OVERHEAD: usize = TAG_OVERHEAD + 8 + 6 + RAW_OVERHEAD;
/// Everything in a `"NWST"` packet but the header
const START_OVERHEAD: usize = TAG_OVERHEAD + 8 + RAW_OVERHEAD + 8 + 6 + 6;

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

/// The bus a network trace was captured from
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceKind {
    Ipc,
    Can,
    Flexray,
    Most,
    Ethernet,
    SomeIp,
    /// User-defined, 7 through 15
    User(u8),
}

impl TraceKind {
    pub fn as_u8(&self) -> u8 {
        match self {
            TraceKind::Ipc => 1,
            TraceKind::Can => 2,
            TraceKind::Flexray => 3,
            TraceKind::Most => 4,
            TraceKind::Ethernet => 5,
            TraceKind::SomeIp => 6,
            TraceKind::User(n) => *n,
        }
    }
}

impl std::convert::TryFrom<u8> for TraceKind {
    type Error = Error;
    fn try_from(x: u8) -> std::result::Result<Self, Self::Error> {
        match x {
            1 => Ok(TraceKind::Ipc),
            2 => Ok(TraceKind::Can),
            3 => Ok(TraceKind::Flexray),
            4 => Ok(TraceKind::Most),
            5 => Ok(TraceKind::Ethernet),
            6 => Ok(TraceKind::SomeIp),
            7..=15 => Ok(TraceKind::User(x)),
            _ => Err(Error::wrong_parameter("network trace type out of range")),
        }
    }
}

/// One segmented transfer in progress.
#[derive(Debug)]
pub struct TraceStream {
    handle: u32,
    kind: TraceKind,
    total: usize,
    segment_size: usize,
    segments: u16,
    next: u16,
}

impl TraceStream {
    fn new(kind: TraceKind, total: usize, config: &Config) -> Result<TraceStream> {
        let segment_size = config
            .segment_size()
            .min(config.message_buffer_len().saturating_sub(SEGMENT_OVERHEAD));
        if segment_size == 0 {
            return Err(Error::wrong_parameter("envelope too small for a trace segment"));
        }
        if u32::try_from(total).is_err() {
            return Err(Error::wrong_parameter("network trace payload too large"));
        }
        let segments = u16::try_from(total.div_ceil(segment_size))
            .map_err(|_| Error::wrong_parameter("network trace needs too many segments"))?;
        Ok(TraceStream {
            handle: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
            kind,
            total,
            segment_size,
            segments,
            next: 0,
        })
    }
    pub fn handle(&self) -> u32 {
        self.handle
    }
    pub fn kind(&self) -> TraceKind {
        self.kind
    }
    /// Total payload size, in bytes
    pub fn total(&self) -> usize {
        self.total
    }
    /// The largest segment this stream will carry
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }
    pub fn segments(&self) -> u16 {
        self.segments
    }
    /// Sequence number of the next segment
    pub fn next_sequence(&self) -> u16 {
        self.next
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           packets                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Assemble & send one network trace packet; a write that can't be completed discards it.
fn packet<T, F>(shared: &Shared<T>, context: &Context, kind: TraceKind, f: F) -> Result<()>
where
    T: Transport,
    F: FnOnce(&mut Message<'_>) -> Result<()>,
{
    let mut msg = shared.message(context, MessageType::NwTrace(kind), true, None)?;
    f(&mut msg)?;
    msg.finish()
}

fn send_plain<T: Transport>(
    shared: &Shared<T>,
    context: &Context,
    kind: TraceKind,
    header: &[u8],
    payload: &[u8],
) -> Result<()> {
    packet(shared, context, kind, |msg| {
        msg.write_raw(header)?;
        msg.write_raw(payload)
    })
}

fn fits_plain(config: &Config, header: &[u8], payload: &[u8]) -> bool {
    2 * RAW_OVERHEAD + header.len() + payload.len() <= config.message_buffer_len()
}

/// Refuse a header too large for the `"NWST"` packet before anything goes out
fn check_start(config: &Config, header: &[u8]) -> Result<()> {
    if START_OVERHEAD + header.len() > config.message_buffer_len() {
        Err(Error::UserBufferFull)
    } else {
        Ok(())
    }
}

fn send_start<T: Transport>(
    shared: &Shared<T>,
    context: &Context,
    stream: &TraceStream,
    header: &[u8],
) -> Result<()> {
    packet(shared, context, stream.kind, |msg| {
        msg.write_string(TRACE_START)?;
        msg.write(stream.handle)?;
        msg.write_raw(header)?;
        msg.write(stream.total as u32)?;
        msg.write(stream.segments)?;
        msg.write(stream.segment_size as u16)
    })
}

fn send_segment<T: Transport>(
    shared: &Shared<T>,
    context: &Context,
    stream: &mut TraceStream,
    segment: &[u8],
) -> Result<()> {
    if segment.len() > stream.segment_size || stream.next >= stream.segments {
        return Err(Error::wrong_parameter("segment doesn't belong to this stream"));
    }
    packet(shared, context, stream.kind, |msg| {
        msg.write_string(TRACE_SEGMENT)?;
        msg.write(stream.handle)?;
        msg.write(stream.next)?;
        msg.write_raw(segment)
    })?;
    stream.next += 1;
    Ok(())
}

fn send_end<T: Transport>(shared: &Shared<T>, context: &Context, stream: TraceStream) -> Result<()> {
    packet(shared, context, stream.kind, |msg| {
        msg.write_string(TRACE_END)?;
        msg.write(stream.handle)
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the worker                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One segmented transfer, owned by the worker
pub(crate) struct Job {
    context: Arc<Context>,
    header: Vec<u8>,
    payload: Vec<u8>,
    stream: TraceStream,
    cancel: Option<Arc<AtomicBool>>,
}

impl Job {
    fn run<T: Transport>(self, shared: &Shared<T>) -> Result<()> {
        let Job {
            context,
            header,
            payload,
            mut stream,
            cancel,
        } = self;
        send_start(shared, &context, &stream, &header)?;
        for segment in payload.chunks(stream.segment_size) {
            if cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                tracing::debug!("Network trace stream {} cancelled", stream.handle);
                break;
            }
            send_segment(shared, &context, &mut stream, segment)?;
        }
        send_end(shared, &context, stream)
    }
}

/// The segmentation worker thread & its queue
pub(crate) struct Tracer {
    sender: SyncSender<Job>,
    worker: JoinHandle<()>,
}

impl Tracer {
    fn spawn<T: Transport + 'static>(shared: Arc<Shared<T>>) -> Result<Tracer> {
        let (sender, receiver) = sync_channel::<Job>(shared.config().queue_depth());
        let worker = std::thread::Builder::new()
            .name("dlt-nwtrace".to_string())
            .spawn(move || {
                for job in receiver {
                    let handle = job.stream.handle;
                    if let Err(err) = job.run(&*shared) {
                        tracing::warn!("Aborted network trace stream {}: {}", handle, err);
                    }
                }
            })?;
        Ok(Tracer { sender, worker })
    }
    /// Close the queue & wait for the worker to finish what's already on it.
    pub(crate) fn join(self) {
        drop(self.sender);
        if self.worker.join().is_err() {
            tracing::error!("The network trace worker panicked");
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        client API                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

impl<T: Transport + 'static> Client<T> {
    fn tracing_enabled(&self, context: &Context) -> Result<bool> {
        self.check_running()?;
        Ok(context.trace_status() == TraceStatus::On)
    }

    /// Send a network trace in a single packet.
    ///
    /// Fails with [`Error::UserBufferFull`] (sending nothing) if header & payload together won't
    /// fit the envelope.
    pub fn trace(&self, context: &Context, kind: TraceKind, header: &[u8], payload: &[u8]) -> Result<()> {
        self.trace_truncated(context, kind, header, payload, false)
    }

    /// Send a network trace in a single packet, truncating the payload if need be & permitted.
    ///
    /// A payload that fits is sent just as [`Client::trace`] would send it. One that doesn't is,
    /// if `allow_truncate`, sent in an `"NWTR"` packet carrying its original size & as much of it
    /// as will fit.
    pub fn trace_truncated(
        &self,
        context: &Context,
        kind: TraceKind,
        header: &[u8],
        payload: &[u8],
        allow_truncate: bool,
    ) -> Result<()> {
        if !self.tracing_enabled(context)? {
            return Ok(());
        }
        let shared = &*self.shared;
        let config = shared.config();
        if fits_plain(config, header, payload) {
            return send_plain(shared, context, kind, header, payload);
        }
        if !allow_truncate {
            return Err(Error::UserBufferFull);
        }
        let original = u32::try_from(payload.len())
            .map_err(|_| Error::wrong_parameter("network trace payload too large"))?;
        let overhead = TAG_OVERHEAD + RAW_OVERHEAD + header.len() + 8 + RAW_OVERHEAD;
        let room = config
            .message_buffer_len()
            .checked_sub(overhead)
            .ok_or(Error::UserBufferFull)?;
        packet(shared, context, kind, |msg| {
            msg.write_string(TRACE_TRUNCATED)?;
            msg.write_raw(header)?;
            msg.write(original)?;
            msg.write_raw(&payload[..room.min(payload.len())])
        })
    }

    /// Send a network trace of any size, segmenting it in the background if need be.
    ///
    /// A trace that fits a single packet is sent at once, from the calling thread. Otherwise the
    /// header & payload are copied & queued for the worker; if its queue is full, this blocks
    /// until there's room.
    pub fn trace_segmented(
        &self,
        context: &Arc<Context>,
        kind: TraceKind,
        header: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        self.segmented_imp(context, kind, header, payload, None, true)
    }

    /// As [`Client::trace_segmented`], but the stream stops early (with its end packet) once
    /// `cancel` is set. The flag is checked between segments.
    pub fn trace_segmented_with_cancel(
        &self,
        context: &Arc<Context>,
        kind: TraceKind,
        header: &[u8],
        payload: &[u8],
        cancel: Arc<AtomicBool>,
    ) -> Result<()> {
        self.segmented_imp(context, kind, header, payload, Some(cancel), true)
    }

    /// As [`Client::trace_segmented`], but fails with [`Error::QueueFull`] rather than blocking.
    pub fn try_trace_segmented(
        &self,
        context: &Arc<Context>,
        kind: TraceKind,
        header: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        self.segmented_imp(context, kind, header, payload, None, false)
    }

    fn segmented_imp(
        &self,
        context: &Arc<Context>,
        kind: TraceKind,
        header: &[u8],
        payload: &[u8],
        cancel: Option<Arc<AtomicBool>>,
        block: bool,
    ) -> Result<()> {
        if !self.tracing_enabled(context)? {
            return Ok(());
        }
        if fits_plain(self.shared.config(), header, payload) {
            return send_plain(&self.shared, context, kind, header, payload);
        }
        check_start(self.shared.config(), header)?;
        let job = Job {
            context: context.clone(),
            header: header.to_vec(),
            payload: payload.to_vec(),
            stream: TraceStream::new(kind, payload.len(), self.shared.config())?,
            cancel,
        };
        let sender = self.sender()?;
        if block {
            sender.send(job).map_err(|_| Error::Shutdown)
        } else {
            sender.try_send(job).map_err(|err| match err {
                TrySendError::Full(_) => Error::QueueFull,
                TrySendError::Disconnected(_) => Error::Shutdown,
            })
        }
    }

    /// The worker's queue, starting the worker if need be.
    fn sender(&self) -> Result<SyncSender<Job>> {
        let mut tracer = self.tracer.lock().unwrap_or_else(PoisonError::into_inner);
        // re-checked under the lock, so that no worker is started after shutdown has joined it
        self.check_running()?;
        match tracer.as_ref() {
            Some(tracer) => Ok(tracer.sender.clone()),
            None => {
                let spawned = Tracer::spawn(self.shared.clone())?;
                let sender = spawned.sender.clone();
                *tracer = Some(spawned);
                tracing::debug!("Started the network trace worker");
                Ok(sender)
            }
        }
    }

    /// Begin a segmented stream of `total` bytes from the calling thread.
    ///
    /// Returns `Ok(None)` if the context's trace status suppresses it.
    pub fn segmented_start(
        &self,
        context: &Context,
        kind: TraceKind,
        header: &[u8],
        total: usize,
    ) -> Result<Option<TraceStream>> {
        if !self.tracing_enabled(context)? {
            return Ok(None);
        }
        check_start(self.shared.config(), header)?;
        let stream = TraceStream::new(kind, total, self.shared.config())?;
        send_start(&self.shared, context, &stream, header)?;
        Ok(Some(stream))
    }

    /// Send the next segment of `stream`; at most [`TraceStream::segment_size`] bytes.
    pub fn segmented_segment(
        &self,
        context: &Context,
        stream: &mut TraceStream,
        segment: &[u8],
    ) -> Result<()> {
        self.check_running()?;
        send_segment(&self.shared, context, stream, segment)
    }

    /// Close `stream`.
    pub fn segmented_end(&self, context: &Context, stream: TraceStream) -> Result<()> {
        self.check_running()?;
        send_end(&self.shared, context, stream)
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::{
        context::Id,
        decode::{Frame, Value},
        level::LogLevel,
        transport::MemoryTransport,
    };

    fn client(transport: &MemoryTransport, envelope: usize, segment: usize) -> Client<MemoryTransport> {
        let config = Config::builder()
            .message_buffer_len(envelope)
            .segment_size(segment)
            .build();
        Client::new(config, transport.clone()).unwrap()
    }

    fn tracing_context(client: &Client<MemoryTransport>) -> Arc<Context> {
        client
            .register_context_with(Id::new(b"TRC").unwrap(), "", LogLevel::Info, TraceStatus::On)
            .unwrap()
    }

    fn values(frame: &[u8]) -> Vec<Value> {
        let frame = Frame::parse(frame).unwrap();
        assert_eq!(MessageType::NwTrace(TraceKind::Can), frame.message_type);
        assert!(frame.verbose);
        frame
            .arguments()
            .unwrap()
            .into_iter()
            .map(|arg| arg.value)
            .collect()
    }

    #[test]
    fn kinds() {
        assert_eq!(TraceKind::SomeIp, TraceKind::try_from(6).unwrap());
        assert_eq!(TraceKind::User(9), TraceKind::try_from(9).unwrap());
        assert!(TraceKind::try_from(16).is_err());
        assert!(TraceKind::try_from(0).is_err());
    }

    #[test]
    fn gating() {
        let transport = MemoryTransport::new();
        let client = client(&transport, 1390, 1024);
        let ctx = client.register_context("OFF", "").unwrap();
        client.trace(&ctx, TraceKind::Can, &[1], &[2]).unwrap();
        client.trace_segmented(&ctx, TraceKind::Can, &[1], &[0; 5000]).unwrap();
        assert!(client.segmented_start(&ctx, TraceKind::Can, &[1], 5000).unwrap().is_none());
        client.shutdown().unwrap();
        assert!(transport.frames().is_empty());
    }

    #[test]
    fn single_packets() {
        let transport = MemoryTransport::new();
        let client = client(&transport, 100, 1024);
        let ctx = tracing_context(&client);

        client.trace(&ctx, TraceKind::Can, &[1, 2], &[3, 4, 5]).unwrap();
        let frames = transport.take_frames();
        assert_eq!(
            vec![Value::Raw(vec![1, 2]), Value::Raw(vec![3, 4, 5])],
            values(&frames[0])
        );

        // too large, & truncation not permitted
        let payload: Vec<u8> = (0..200).map(|i| i as u8).collect();
        assert!(client
            .trace(&ctx, TraceKind::Can, &[1, 2], &payload)
            .unwrap_err()
            .is_buffer_full());
        assert!(transport.frames().is_empty());

        client
            .trace_truncated(&ctx, TraceKind::Can, &[1, 2], &payload, true)
            .unwrap();
        let frames = transport.take_frames();
        // 100 - (11 + 6 + 2 + 8 + 6) = 67 bytes of payload survive
        assert_eq!(
            vec![
                Value::String(TRACE_TRUNCATED.to_string()),
                Value::Raw(vec![1, 2]),
                Value::UInt(200),
                Value::Raw(payload[..67].to_vec())
            ],
            values(&frames[0])
        );
        assert_eq!(100, Frame::parse(&frames[0]).unwrap().payload.len());
    }

    #[test]
    fn segmentation() {
        let transport = MemoryTransport::new();
        let client = client(&transport, 1390, 100);
        let ctx = tracing_context(&client);
        let payload: Vec<u8> = (0..2050).map(|i| (i % 251) as u8).collect();
        client
            .trace_segmented(&ctx, TraceKind::Can, &[0xaa, 0xbb], &payload)
            .unwrap();
        // joins the worker
        client.shutdown().unwrap();

        let frames = transport.frames();
        // start, ceil(2050 / 100) = 21 chunks, end
        assert_eq!(23, frames.len());
        let start = values(&frames[0]);
        let handle = match &start[..] {
            [Value::String(tag), Value::UInt(handle), Value::Raw(header), Value::UInt(2050), Value::UInt(21), Value::UInt(100)] =>
            {
                assert_eq!(TRACE_START, tag.as_str());
                assert_eq!(&vec![0xaa, 0xbb], header);
                *handle
            }
            other => panic!("unexpected start packet {:?}", other),
        };
        let mut reassembled = Vec::new();
        for (seq, frame) in frames[1..22].iter().enumerate() {
            match &values(frame)[..] {
                [Value::String(tag), Value::UInt(h), Value::UInt(n), Value::Raw(data)] => {
                    assert_eq!(TRACE_SEGMENT, tag.as_str());
                    assert_eq!(handle, *h);
                    assert_eq!(seq as u64, *n);
                    reassembled.extend_from_slice(data);
                }
                other => panic!("unexpected segment packet {:?}", other),
            }
        }
        assert_eq!(payload, reassembled);
        assert_eq!(
            vec![Value::String(TRACE_END.to_string()), Value::UInt(handle)],
            values(&frames[22])
        );
    }

    #[test]
    fn small_segmented_traces_go_out_directly() {
        let transport = MemoryTransport::new();
        let client = client(&transport, 1390, 100);
        let ctx = tracing_context(&client);
        client.trace_segmented(&ctx, TraceKind::Can, &[1], &[2; 500]).unwrap();
        // no worker involved
        assert!(client.tracer.lock().unwrap().is_none());
        assert_eq!(1, transport.frames().len());
    }

    /// Raises `cancel` once `after` frames have gone out
    struct CancelAfter {
        inner: MemoryTransport,
        after: usize,
        cancel: Arc<AtomicBool>,
    }

    impl Transport for CancelAfter {
        fn send(&self, frame: &[u8]) -> Result<usize> {
            let sent = self.inner.send(frame)?;
            if self.inner.frames().len() >= self.after {
                self.cancel.store(true, Ordering::Relaxed);
            }
            Ok(sent)
        }
        fn connection_state(&self) -> crate::transport::ConnectionState {
            self.inner.connection_state()
        }
    }

    fn tag(frame: &[u8]) -> String {
        match &values(frame)[0] {
            Value::String(tag) => tag.clone(),
            other => panic!("unexpected leading argument {:?}", other),
        }
    }

    #[test]
    fn cancellation() {
        let transport = MemoryTransport::new();
        let client = client(&transport, 1390, 100);
        let ctx = tracing_context(&client);
        let cancel = Arc::new(AtomicBool::new(true));
        client
            .trace_segmented_with_cancel(&ctx, TraceKind::Can, &[1], &[0; 5000], cancel)
            .unwrap();
        client.shutdown().unwrap();
        // just the start & end packets
        let frames = transport.frames();
        assert_eq!(2, frames.len());
        assert_eq!(TRACE_START, tag(&frames[0]));
        assert_eq!(TRACE_END, tag(&frames[1]));
    }

    #[test]
    fn cancellation_mid_stream() {
        let memory = MemoryTransport::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let config = Config::builder()
            .message_buffer_len(1390)
            .segment_size(100)
            .build();
        let client = Client::new(
            config,
            CancelAfter {
                inner: memory.clone(),
                after: 4,
                cancel: cancel.clone(),
            },
        )
        .unwrap();
        let ctx = client
            .register_context_with(Id::new(b"TRC").unwrap(), "", LogLevel::Info, TraceStatus::On)
            .unwrap();
        client
            .trace_segmented_with_cancel(&ctx, TraceKind::Can, &[1], &[0; 5000], cancel)
            .unwrap();
        client.shutdown().unwrap();
        // start, three of fifty segments, end
        let tags: Vec<String> = memory.frames().iter().map(|f| tag(f)).collect();
        assert_eq!(
            vec![TRACE_START, TRACE_SEGMENT, TRACE_SEGMENT, TRACE_SEGMENT, TRACE_END],
            tags
        );
    }

    #[test]
    fn oversized_start_header() {
        let transport = MemoryTransport::new();
        let client = client(&transport, 1390, 100);
        let ctx = tracing_context(&client);
        // 1346 + 45 is one byte over the envelope
        let header = [7_u8; 1346];
        assert!(client
            .trace_segmented(&ctx, TraceKind::Can, &header, &[0; 2000])
            .unwrap_err()
            .is_buffer_full());
        assert!(client
            .segmented_start(&ctx, TraceKind::Can, &header, 2000)
            .unwrap_err()
            .is_buffer_full());
        // no worker was started for it
        assert!(client.tracer.lock().unwrap().is_none());
        assert!(transport.frames().is_empty());

        // one byte less does fit
        client
            .segmented_start(&ctx, TraceKind::Can, &header[1..], 2000)
            .unwrap()
            .unwrap();
        let frames = transport.frames();
        assert_eq!(1, frames.len());
        assert_eq!(1390, Frame::parse(&frames[0]).unwrap().payload.len());
    }

    #[test]
    fn manual_streams() {
        let transport = MemoryTransport::new();
        let client = client(&transport, 1390, 100);
        let ctx = tracing_context(&client);
        let mut stream = client
            .segmented_start(&ctx, TraceKind::Can, &[9], 150)
            .unwrap()
            .unwrap();
        assert_eq!(2, stream.segments());
        assert!(client
            .segmented_segment(&ctx, &mut stream, &[0; 101])
            .is_err());
        client.segmented_segment(&ctx, &mut stream, &[0; 100]).unwrap();
        client.segmented_segment(&ctx, &mut stream, &[0; 50]).unwrap();
        // no third segment
        assert!(client.segmented_segment(&ctx, &mut stream, &[0; 1]).is_err());
        let handle = stream.handle();
        client.segmented_end(&ctx, stream).unwrap();
        let frames = transport.frames();
        assert_eq!(4, frames.len());
        assert_eq!(Value::UInt(handle as u64), values(&frames[3])[1]);
    }
}
