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

//! The DLT client.
//!
//! # Introduction
//!
//! A [`Client`] is one application's connection to the DLT daemon. It owns the [`Transport`], the
//! offline [`RingBuffer`], the registry of [`Context`]s & (once it's first needed) the network
//! trace worker thread. Everything it holds is explicitly created in [`Client::new`] & torn down
//! in [`Client::shutdown`] (or on drop).
//!
//! # Sending & buffering
//!
//! A finished [`Message`] is framed & handed to [`Transport::send`] directly if the transport
//! doesn't know itself to be disconnected, no resend pass is underway & nothing is already waiting
//! in the offline buffer. Otherwise (or if that send fails) the frame is appended to the buffer, so
//! that frames always leave in the order they were finished. Each buffered submission is followed
//! by a brief, non-sleeping attempt to drain the buffer; [`Client::resend`] makes a more patient
//! one.
//!
//! All of this happens under one mutex, so that at most one frame is on its way to the transport
//! at any moment. Resend passes are additionally single-flight: a pass that finds another already
//! underway returns [`Resend::Busy`] at once.

use crate::{
    buffer::RingBuffer,
    config::Config,
    context::{Context, ContextCells, Id},
    error::{Error, Result},
    header::{FrameHeader, MessageType, MAX_HEADER_LEN},
    level::{LogLevel, TraceStatus},
    message::{Dispatch, Message, Record},
    nwtrace::Tracer,
    transport::{ConnectionState, Transport},
};

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::{Duration, Instant},
};

/// Extra room in the resend scratch buffer beyond a maximal frame
const SCRATCH_MARGIN: usize = 100;

/// Minimum time between reconnection attempts made on the logging path
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// The outcome of a resend pass
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resend {
    /// The offline buffer is now empty; this many frames were sent to get it there
    Drained(usize),
    /// The pass gave up (transport failure, or its time ran out) with frames still buffered
    Pending { sent: usize, remaining: usize },
    /// Another pass is already underway
    Busy,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     state shared with workers                                  //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Everything guarded by the client's one mutex
struct Offline {
    ring: RingBuffer,
    /// Staging area for one frame at a time during resend; allocated once
    scratch: Vec<u8>,
    /// Value of the overflow counter at the last notice sent to the daemon
    reported: u64,
    last_reconnect: Option<Instant>,
}

/// The parts of a [`Client`] that the network trace worker needs as well.
pub(crate) struct Shared<T: Transport> {
    config: Config,
    transport: T,
    started: Instant,
    session: Option<u32>,
    verbose: AtomicBool,
    resending: AtomicBool,
    offline: Mutex<Offline>,
}

impl<T: Transport> Shared<T> {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Begin a message on `context`; the caller has already dealt with gating.
    pub(crate) fn message<'a>(
        &'a self,
        context: &'a Context,
        message_type: MessageType,
        verbose: bool,
        message_id: Option<u32>,
    ) -> Result<Message<'a>> {
        if !context.is_registered() {
            return Err(Error::wrong_parameter("context is not registered"));
        }
        Message::new(
            self,
            context,
            message_type,
            verbose,
            self.config.message_buffer_len(),
            message_id,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Offline> {
        self.offline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since client start, in the 0.1ms ticks of the standard header
    fn timestamp(&self) -> u32 {
        (self.started.elapsed().as_micros() / 100) as u32
    }

    /// Send `frame`, or failing that, buffer it.
    fn submit(&self, frame: &[u8]) -> Result<()> {
        let state = self.transport.connection_state();
        let mut offline = self.lock();
        let direct = state != ConnectionState::Disconnected
            && !self.resending.load(Ordering::Acquire)
            && offline.ring.is_empty();
        if direct {
            match self.transport.send(frame) {
                Ok(_) => return Ok(()),
                Err(err) => tracing::debug!("Send failed ({}); buffering the frame", err),
            }
        }
        if offline.ring.push(frame).is_err() {
            if offline.ring.overflow_counter() == 1 {
                tracing::warn!(
                    "The DLT offline buffer is full ({} bytes); frames are being dropped",
                    offline.ring.capacity()
                );
            }
            return Err(Error::UserBufferFull);
        }
        if direct {
            // The transport just failed us; no point in trying again straight away.
            return Ok(());
        }
        let reconnect = state == ConnectionState::Disconnected && self.reconnect_due(&mut offline);
        drop(offline);
        if reconnect {
            match self.transport.connect() {
                Ok(_) => tracing::debug!("Reconnected to the DLT daemon"),
                Err(_) => return Ok(()),
            }
        } else if state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.drain(false);
        Ok(())
    }

    fn reconnect_due(&self, offline: &mut Offline) -> bool {
        let now = Instant::now();
        match offline.last_reconnect {
            Some(at) if now.duration_since(at) < RECONNECT_INTERVAL => false,
            _ => {
                offline.last_reconnect = Some(now);
                true
            }
        }
    }

    /// Send buffered frames, oldest first, until the buffer is empty or we give up.
    ///
    /// An impatient pass gives up at the first failure; a patient one sleeps for the configured
    /// interval after each failure & gives up only once the configured maximum wait has elapsed
    /// since the pass began.
    pub(crate) fn drain(&self, patient: bool) -> Resend {
        if self.resending.swap(true, Ordering::AcqRel) {
            return Resend::Busy;
        }
        let deadline = Instant::now() + self.config.resend_max_wait();
        let mut sent = 0;
        let outcome = loop {
            let mut guard = self.lock();
            let offline = &mut *guard;
            if offline.ring.peek_into(&mut offline.scratch).is_none() {
                self.notify_overflow(offline);
                break Resend::Drained(sent);
            }
            match self.transport.send(&offline.scratch) {
                Ok(_) => {
                    offline.ring.discard_oldest();
                    sent += 1;
                }
                Err(err) => {
                    let remaining = offline.ring.len();
                    drop(guard);
                    if !patient || Instant::now() >= deadline {
                        if patient {
                            tracing::warn!(
                                "Gave up resending after {:?} ({}); {} frame(s) still buffered",
                                self.config.resend_max_wait(),
                                err,
                                remaining
                            );
                        }
                        break Resend::Pending { sent, remaining };
                    }
                    std::thread::sleep(self.config.resend_interval());
                }
            }
        };
        self.resending.store(false, Ordering::Release);
        outcome
    }

    /// Tell the daemon about frames dropped since the last notice, if any.
    fn notify_overflow(&self, offline: &mut Offline) {
        let counter = offline.ring.overflow_counter();
        if counter <= offline.reported {
            return;
        }
        let dropped = u32::try_from(counter - offline.reported).unwrap_or(u32::MAX);
        match self.transport.send_overflow(dropped, self.config.app_id()) {
            Ok(_) => {
                offline.reported = counter;
                offline.ring.clear_overflow_flag();
            }
            Err(err) => tracing::debug!("Couldn't send the overflow notice: {}", err),
        }
    }
}

impl<T: Transport> Dispatch for Shared<T> {
    fn dispatch(&self, context: &Context, record: Record<'_>) -> Result<()> {
        let header = FrameHeader {
            counter: context.next_counter(),
            ecu: self.config.ecu_id(),
            session: self.session,
            timestamp: if self.config.with_timestamp() {
                Some(self.timestamp())
            } else {
                None
            },
            verbose: record.verbose,
            message_type: record.message_type,
            args: record.args,
            app: self.config.app_id(),
            context: context.id(),
        };
        let mut frame = Vec::with_capacity(header.len() + record.payload.len());
        header.encode(record.payload, &mut frame)?;
        self.submit(&frame)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          struct Client                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One application's connection to the DLT daemon.
///
/// ```rust
/// use dlt_user::{client::Client, config::Config, level::LogLevel, transport::MemoryTransport};
/// let transport = MemoryTransport::new();
/// let client = Client::new(Config::default(), transport.clone()).unwrap();
/// let ctx = client.register_context("MAIN", "main loop").unwrap();
/// client.log_str(&ctx, LogLevel::Info, "Hello, world!").unwrap();
/// client.log_str(&ctx, LogLevel::Debug, "not at the default level").unwrap();
/// assert_eq!(1, transport.frames().len());
/// ```
pub struct Client<T: Transport + 'static> {
    pub(crate) shared: Arc<Shared<T>>,
    pub(crate) tracer: Mutex<Option<Tracer>>,
    contexts: Mutex<HashMap<Id, Weak<Context>>>,
    running: AtomicBool,
}

impl<T: Transport + 'static> Client<T> {
    pub fn new(config: Config, transport: T) -> Result<Client<T>> {
        let ring = RingBuffer::new(
            config.ring_buffer_min(),
            config.ring_buffer_max(),
            config.ring_buffer_step(),
        );
        let scratch = Vec::with_capacity(config.message_buffer_len() + MAX_HEADER_LEN + SCRATCH_MARGIN);
        let session = if config.with_session_id() {
            Some(std::process::id())
        } else {
            None
        };
        tracing::debug!(
            "Registering application {} with a {}-byte envelope",
            config.app_id(),
            config.message_buffer_len()
        );
        Ok(Client {
            shared: Arc::new(Shared {
                verbose: AtomicBool::new(config.verbose()),
                config,
                transport,
                started: Instant::now(),
                session,
                resending: AtomicBool::new(false),
                offline: Mutex::new(Offline {
                    ring,
                    scratch,
                    reported: 0,
                    last_reconnect: None,
                }),
            }),
            tracer: Mutex::new(None),
            contexts: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
    pub(crate) fn check_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::Shutdown)
        }
    }

    /// Switch between verbose & non-verbose payloads for messages started from now on.
    pub fn set_verbose_mode(&self, verbose: bool) {
        self.shared.verbose.store(verbose, Ordering::Relaxed);
    }
    pub fn verbose_mode(&self) -> bool {
        self.shared.verbose.load(Ordering::Relaxed)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                       contexts                                         //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Register a new logging context.
    ///
    /// Its initial log level comes from the configured overrides (see [`crate::env`]), falling
    /// back to the configured default; its trace status is the configured default.
    pub fn register_context(&self, id: &str, description: &str) -> Result<Arc<Context>> {
        let id = Id::try_from(id)?;
        let config = &self.shared.config;
        let level = match config
            .levels()
            .resolve(config.app_id(), id, config.default_log_level())
        {
            LogLevel::Default => config.default_log_level(),
            level => level,
        };
        self.register_context_with(id, description, level, config.default_trace_status())
    }

    /// Register a new logging context with an explicit initial level & trace status.
    ///
    /// The environment overrides, if any, are not consulted.
    pub fn register_context_with(
        &self,
        id: Id,
        description: &str,
        level: LogLevel,
        status: TraceStatus,
    ) -> Result<Arc<Context>> {
        self.check_running()?;
        if level == LogLevel::Default || status == TraceStatus::Default {
            return Err(Error::wrong_parameter("a context needs a definite level & status"));
        }
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        if contexts
            .get(&id)
            .and_then(Weak::upgrade)
            .map_or(false, |ctx| ctx.is_registered())
        {
            return Err(Error::wrong_parameter("context id already registered"));
        }
        let description = if description.is_empty() {
            None
        } else {
            Some(description.to_string())
        };
        let context = Arc::new(Context::new(
            id,
            description,
            ContextCells::new(level, status),
        ));
        contexts.insert(id, Arc::downgrade(&context));
        tracing::debug!("Registered context {} at level {}", id, level);
        Ok(context)
    }

    /// Unregister `context`; subsequent attempts to log to it fail.
    pub fn unregister_context(&self, context: &Context) {
        context.unregister();
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        if contexts
            .get(&context.id())
            .and_then(Weak::upgrade)
            .map_or(true, |ctx| std::ptr::eq(&*ctx, context))
        {
            contexts.remove(&context.id());
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                       logging                                          //
    ////////////////////////////////////////////////////////////////////////////////////////////

    fn start_imp<'a>(
        &'a self,
        context: &'a Context,
        level: LogLevel,
        message_id: Option<u32>,
    ) -> Result<Option<Message<'a>>> {
        self.check_running()?;
        if level == LogLevel::Default {
            return Err(Error::wrong_parameter("`default` is not a message log level"));
        }
        let threshold = match context.log_level() {
            LogLevel::Default => self.shared.config.default_log_level(),
            threshold => threshold,
        };
        if level == LogLevel::Off || level > threshold {
            return Ok(None);
        }
        self.shared
            .message(context, MessageType::Log(level), self.verbose_mode(), message_id)
            .map(Some)
    }

    /// Begin a log record at `level` on `context`.
    ///
    /// Returns `Ok(None)` if the context's current log level suppresses `level`. In non-verbose
    /// mode, the record is given the default message id; see [`Client::start_with_id`].
    pub fn start<'a>(&'a self, context: &'a Context, level: LogLevel) -> Result<Option<Message<'a>>> {
        self.start_imp(context, level, None)
    }

    /// Begin a log record with the given non-verbose message id (ignored in verbose mode).
    pub fn start_with_id<'a>(
        &'a self,
        context: &'a Context,
        level: LogLevel,
        message_id: u32,
    ) -> Result<Option<Message<'a>>> {
        self.start_imp(context, level, Some(message_id))
    }

    /// Log a single string.
    pub fn log_str(&self, context: &Context, level: LogLevel, text: &str) -> Result<()> {
        self.log_args(context, level, |msg| msg.write_string(text))
    }

    /// Start a record, fill it in with `f` & finish it; a suppressed record is a success.
    ///
    /// Content lost while `f` runs is reported (as [`Error::UserBufferFull`]) only after the
    /// record has been finished. Any other error from `f` discards the record.
    pub fn log_args<F>(&self, context: &Context, level: LogLevel, f: F) -> Result<()>
    where
        F: FnOnce(&mut Message<'_>) -> Result<()>,
    {
        match self.start(context, level)? {
            Some(mut msg) => {
                match f(&mut msg) {
                    Ok(_) => (),
                    Err(err) if err.is_buffer_full() => (),
                    Err(err) => return Err(err),
                }
                msg.finish()
            }
            None => Ok(()),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                 offline buffer                                         //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Reconnect if need be & patiently drain the offline buffer.
    pub fn resend(&self) -> Result<Resend> {
        self.check_running()?;
        self.shared.transport.connect()?;
        Ok(self.shared.drain(true))
    }
    /// Number of frames awaiting resend
    pub fn buffered(&self) -> usize {
        self.shared.lock().ring.len()
    }
    /// True if frames have been dropped since the daemon was last told so
    pub fn overflowed(&self) -> bool {
        self.shared.lock().ring.overflowed()
    }
    /// Frames dropped since creation or the last [`Client::reset_overflow`]
    pub fn overflow_counter(&self) -> u64 {
        self.shared.lock().ring.overflow_counter()
    }
    pub fn reset_overflow(&self) {
        let mut offline = self.shared.lock();
        offline.ring.reset_overflow();
        offline.reported = 0;
    }

    /// Finish outstanding network traces, make a last attempt to drain the offline buffer & stop.
    ///
    /// Subsequent attempts to log fail with [`Error::Shutdown`]. Calling this more than once is
    /// harmless.
    pub fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let tracer = self
            .tracer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tracer) = tracer {
            tracer.join();
        }
        if self.buffered() > 0 {
            if let Resend::Pending { remaining, .. } = self.shared.drain(true) {
                tracing::warn!("Shutting down with {} frame(s) unsent", remaining);
            }
        }
        tracing::debug!("Unregistered application {}", self.shared.config.app_id());
        Ok(())
    }
}

impl<T: Transport + 'static> Drop for Client<T> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!("DLT client shutdown failed: {}", err);
        }
    }
}

impl<T: Transport + 'static> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("app_id", &self.shared.config.app_id())
            .field("running", &self.is_running())
            .finish()
    }
}
