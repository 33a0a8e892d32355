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

//! The DLT transport layer.
//!
//! This module defines the [`Transport`] trait that all implementations must support, along with
//! implementations for a local daemon's Unix socket, UDP, TCP, files & memory.
//!
//! Every implementation is handed complete DLT frames (standard header onward) and is responsible
//! for whatever preamble its medium needs: the daemon's IPC socket expects each frame to be
//! preceded by a `"DUH\x01"` user header, while a DLT file expects a `"DLT\x01"` storage header.
//!
//! # Examples
//!
//! To log to a collector listening for UDP on port 3490 of localhost:
//!
//! ```rust
//! use dlt_user::transport::UdpTransport;
//! let transpo = UdpTransport::new("127.0.0.1:3490").unwrap();
//! ```
//!
//! To capture frames in memory, e.g. for testing:
//!
//! ```rust
//! use dlt_user::transport::{ConnectionState, MemoryTransport, Transport};
//! let transpo = MemoryTransport::new();
//! transpo.send(&[1, 2, 3]).unwrap();
//! assert_eq!(vec![vec![1, 2, 3]], transpo.frames());
//! assert_eq!(ConnectionState::Connected, transpo.connection_state());
//! ```

use crate::{
    context::Id,
    error::{Error, Result},
    header::{storage_header, user_header, USER_MESSAGE_LOG, USER_MESSAGE_OVERFLOW},
};

use chrono::Utc;

use std::{
    fs::File,
    net::TcpStream,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Default path of the DLT daemon's local IPC socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/dlt";

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      transport mechanisms                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What the transport knows of its connection to the daemon.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No attempt has been made yet, or the medium is connectionless
    Unknown,
    Connected,
    Disconnected,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Unknown => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Disconnected => 2,
        }
    }
    fn from_u8(x: u8) -> ConnectionState {
        match x {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnected,
            _ => ConnectionState::Unknown,
        }
    }
}

/// A [`ConnectionState`] that can be shared & updated through `&self`
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectionState) -> StateCell {
        StateCell(AtomicU8::new(state.as_u8()))
    }
    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }
    fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::Release)
    }
}

/// Operations all transport layers must support.
///
/// Implementations are shared between logging threads & the network trace worker, so every
/// operation takes `&self`.
pub trait Transport: Send + Sync {
    /// Send one complete DLT frame.
    ///
    /// A frame must be written whole or not at all; on failure the client will buffer it & try
    /// again later.
    fn send(&self, frame: &[u8]) -> Result<usize>;
    /// Used by the client to decide whether to attempt a send at all, or to go straight to the
    /// offline buffer.
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Unknown
    }
    /// (Re-)establish the connection, if the medium has one.
    fn connect(&self) -> Result<()> {
        Ok(())
    }
    /// Tell the daemon that `dropped` frames from application `app` were lost to buffer overflow.
    ///
    /// Only the daemon's IPC protocol has a way of saying this; other media ignore it.
    fn send_overflow(&self, _dropped: u32, _app: Id) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        (**self).send(frame)
    }
    fn connection_state(&self) -> ConnectionState {
        (**self).connection_state()
    }
    fn connect(&self) -> Result<()> {
        (**self).connect()
    }
    fn send_overflow(&self, dropped: u32, app: Id) -> Result<()> {
        (**self).send_overflow(dropped, app)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Unix socket                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Sending DLT frames to a local daemon via its Unix stream socket.
///
/// The connection is made lazily (on first send or an explicit [`Transport::connect`]) & dropped
/// on any write failure, to be re-made on the next attempt.
#[cfg(unix)]
pub struct UnixSocketStream {
    path: PathBuf,
    connection: Mutex<Connection>,
    state: StateCell,
}

/// The socket, if open, & the buffer each message is staged in before writing
#[cfg(unix)]
#[derive(Default)]
struct Connection {
    socket: Option<UnixStream>,
    scratch: Vec<u8>,
}

#[cfg(unix)]
impl UnixSocketStream {
    /// Construct a [`Transport`] implementation via Unix sockets at `path`; no connection is
    /// attempted until first use.
    pub fn new<P: AsRef<Path>>(path: P) -> UnixSocketStream {
        UnixSocketStream {
            path: path.as_ref().to_path_buf(),
            connection: Mutex::new(Connection::default()),
            state: StateCell::new(ConnectionState::Unknown),
        }
    }
    pub fn try_default() -> Result<UnixSocketStream> {
        let transport = UnixSocketStream::new(DEFAULT_SOCKET_PATH);
        transport.connect()?;
        Ok(transport)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage a message via `fill` & write it in one go, connecting first if need be.
    fn write_with<F: FnOnce(&mut Vec<u8>)>(&self, fill: F) -> Result<()> {
        use std::io::Write;
        let mut guard = self.lock();
        let Connection { socket, scratch } = &mut *guard;
        if socket.is_none() {
            *socket = Some(self.open()?);
        }
        scratch.clear();
        fill(scratch);
        // `Write` is implemented for `&UnixStream`, which is what lets us write through a shared
        // reference here.
        let result = match socket.as_ref() {
            Some(stream) => {
                let mut writer: &UnixStream = stream;
                writer.write_all(scratch).and_then(|_| writer.flush())
            }
            None => return Err(Error::NotConnected),
        };
        result.map_err(|err| {
            *socket = None;
            self.state.set(ConnectionState::Disconnected);
            Error::transport(err)
        })
    }

    #[cfg(test)]
    fn scratch_capacity(&self) -> usize {
        self.lock().scratch.capacity()
    }

    fn open(&self) -> Result<UnixStream> {
        match UnixStream::connect(&self.path) {
            Ok(socket) => {
                self.state.set(ConnectionState::Connected);
                Ok(socket)
            }
            Err(err) => {
                self.state.set(ConnectionState::Disconnected);
                Err(Error::transport(err))
            }
        }
    }
}

#[cfg(unix)]
impl Transport for UnixSocketStream {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        self.write_with(|buf| {
            user_header(USER_MESSAGE_LOG, buf);
            buf.extend_from_slice(frame);
        })?;
        Ok(frame.len())
    }
    fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }
    fn connect(&self) -> Result<()> {
        let mut guard = self.lock();
        if guard.socket.is_none() {
            guard.socket = Some(self.open()?);
            tracing::debug!("Connected to the DLT daemon at {:?}", self.path);
        }
        Ok(())
    }
    fn send_overflow(&self, dropped: u32, app: Id) -> Result<()> {
        self.write_with(|buf| {
            user_header(USER_MESSAGE_OVERFLOW, buf);
            buf.extend_from_slice(&dropped.to_ne_bytes());
            buf.extend_from_slice(app.as_bytes());
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          UDP & TCP                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Sending DLT frames via UDP datagrams, one frame per datagram.
pub struct UdpTransport {
    socket: std::net::UdpSocket,
}

impl UdpTransport {
    /// Construct a [`Transport`] implementation via UDP at `addr`.
    pub fn new<A: std::net::ToSocketAddrs>(addr: A) -> Result<UdpTransport> {
        // Bind to any available port...
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").map_err(Error::transport)?;
        // and "connect" to the collector at `addr`:
        socket.connect(addr).map_err(Error::transport)?;
        Ok(UdpTransport { socket })
    }
    /// Construct a [`Transport`] implementation via UDP at localhost:3490
    pub fn local() -> Result<UdpTransport> {
        UdpTransport::new("localhost:3490")
    }
}

impl Transport for UdpTransport {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        self.socket.send(frame).map_err(Error::transport)
    }
}

/// Sending DLT frames via a TCP stream, as a DLT viewer would receive them from a daemon.
pub struct TcpTransport {
    socket: TcpStream,
    state: StateCell,
}

impl TcpTransport {
    /// Construct a [`Transport`] implementation via TCP at `addr`.
    pub fn new<A: std::net::ToSocketAddrs>(addr: A) -> Result<TcpTransport> {
        Ok(TcpTransport {
            socket: TcpStream::connect(addr).map_err(Error::transport)?,
            state: StateCell::new(ConnectionState::Connected),
        })
    }
    /// Construct a [`Transport`] implementation via TCP at localhost:3490
    pub fn try_default() -> Result<TcpTransport> {
        TcpTransport::new("localhost:3490")
    }
}

impl Transport for TcpTransport {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        use std::io::Write;
        let mut writer: &TcpStream = &self.socket;
        writer
            .write_all(frame)
            .and_then(|_| writer.flush())
            .map_err(|err| {
                self.state.set(ConnectionState::Disconnected);
                Error::transport(err)
            })?;
        Ok(frame.len())
    }
    fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            files                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Appending DLT frames to a file, each preceded by a storage header.
pub struct FileTransport {
    file: Mutex<File>,
}

impl FileTransport {
    /// Open `path` for appending, creating it if need be.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<FileTransport> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(FileTransport {
            file: Mutex::new(file),
        })
    }
}

impl Transport for FileTransport {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        use std::io::Write;
        // The ECU id always follows the first four bytes of the standard header.
        let ecu = frame
            .get(4..8)
            .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
            .map(Id::from_bytes)
            .ok_or_else(|| Error::wrong_parameter("frame too short to carry an ECU id"))?;
        let mut buf = Vec::with_capacity(16 + frame.len());
        storage_header(ecu, Utc::now(), &mut buf);
        buf.extend_from_slice(frame);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&buf)?;
        Ok(frame.len())
    }
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           memory                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct Recorder {
    frames: Vec<Vec<u8>>,
    overflows: Vec<(u32, Id)>,
    connected: bool,
    failures: usize,
    connects: usize,
}

/// An in-process [`Transport`] that simply records what it's sent.
///
/// Clones share the same recording, so one may be handed to a [`Client`] while another is kept to
/// inspect the results. The transport can be marked disconnected, in which case every send fails,
/// or told to fail a given number of sends.
///
/// [`Client`]: crate::client::Client
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Recorder>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        MemoryTransport::new()
    }
}

impl MemoryTransport {
    pub fn new() -> MemoryTransport {
        MemoryTransport {
            inner: Arc::new(Mutex::new(Recorder {
                connected: true,
                ..Default::default()
            })),
        }
    }
    pub fn disconnected() -> MemoryTransport {
        let transport = MemoryTransport::new();
        transport.set_connected(false);
        transport
    }
    fn lock(&self) -> std::sync::MutexGuard<'_, Recorder> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }
    /// Fail the next `n` sends (while otherwise connected).
    pub fn fail_next(&self, n: usize) {
        self.lock().failures = n;
    }
    /// Every frame sent so far, oldest first
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }
    /// Remove & return every frame sent so far
    pub fn take_frames(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.lock().frames)
    }
    /// Every overflow notice sent so far
    pub fn overflow_notices(&self) -> Vec<(u32, Id)> {
        self.lock().overflows.clone()
    }
    /// Number of times [`Transport::connect`] has been called
    pub fn connects(&self) -> usize {
        self.lock().connects
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: &[u8]) -> Result<usize> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(Error::NotConnected);
        }
        if inner.failures > 0 {
            inner.failures -= 1;
            return Err(Error::transport(std::io::Error::from(
                std::io::ErrorKind::WouldBlock,
            )));
        }
        inner.frames.push(frame.to_vec());
        Ok(frame.len())
    }
    fn connection_state(&self) -> ConnectionState {
        if self.lock().connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
    fn connect(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.connects += 1;
        if inner.connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
    fn send_overflow(&self, dropped: u32, app: Id) -> Result<()> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(Error::NotConnected);
        }
        inner.overflows.push((dropped, app));
        Ok(())
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn memory() {
        let transport = MemoryTransport::disconnected();
        let handle = transport.clone();
        assert_eq!(ConnectionState::Disconnected, transport.connection_state());
        assert!(matches!(transport.send(&[1]), Err(Error::NotConnected)));
        assert!(transport.connect().is_err());
        handle.set_connected(true);
        transport.fail_next(1);
        assert!(transport.send(&[1]).is_err());
        assert_eq!(1, transport.send(&[2]).unwrap());
        transport
            .send_overflow(3, Id::new(b"APP").unwrap())
            .unwrap();
        assert_eq!(vec![vec![2]], handle.take_frames());
        assert!(handle.frames().is_empty());
        assert_eq!(vec![(3, Id::new(b"APP").unwrap())], handle.overflow_notices());
        assert_eq!(1, handle.connects());
    }

    #[test]
    fn file() {
        let path = std::env::temp_dir().join(format!("dlt-user-{}.dlt", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let transport = FileTransport::new(&path).unwrap();
            transport
                .send(&[0x25, 0, 0, 8, b'E', b'C', b'U', b'1'])
                .unwrap();
            assert!(transport.send(&[0x25, 0]).is_err());
        }
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(24, bytes.len());
        assert_eq!(b"DLT\x01", &bytes[..4]);
        assert_eq!(b"ECU1", &bytes[12..16]);
        assert_eq!(&[0x25, 0, 0, 8], &bytes[16..20]);
        let _ = std::fs::remove_file(&path);
    }

    #[cfg(unix)]
    #[test]
    fn unix_socket() {
        use std::io::Read;
        use std::os::unix::net::UnixListener;

        let path = std::env::temp_dir().join(format!("dlt-user-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let transport = UnixSocketStream::new(&path);
        assert_eq!(ConnectionState::Unknown, transport.connection_state());
        // nobody listening yet
        assert!(transport.send(&[1, 2, 3]).is_err());
        assert_eq!(ConnectionState::Disconnected, transport.connection_state());

        let listener = UnixListener::bind(&path).unwrap();
        transport.connect().unwrap();
        assert_eq!(ConnectionState::Connected, transport.connection_state());
        let (mut peer, _) = listener.accept().unwrap();
        transport.send(&[9; 200]).unwrap();
        let capacity = transport.scratch_capacity();
        assert!(capacity >= 208);
        transport.send(&[1, 2, 3]).unwrap();
        transport.send_overflow(5, Id::new(b"APP").unwrap()).unwrap();
        // the staging buffer is reused rather than re-allocated
        assert_eq!(capacity, transport.scratch_capacity());
        drop(transport);

        let mut got = Vec::new();
        peer.read_to_end(&mut got).unwrap();
        let mut expected = b"DUH\x01".to_vec();
        expected.extend_from_slice(&1_u32.to_ne_bytes());
        expected.extend_from_slice(&[9; 200]);
        expected.extend_from_slice(b"DUH\x01");
        expected.extend_from_slice(&1_u32.to_ne_bytes());
        expected.extend_from_slice(&[1, 2, 3]);
        expected.extend_from_slice(b"DUH\x01");
        expected.extend_from_slice(&8_u32.to_ne_bytes());
        expected.extend_from_slice(&5_u32.to_ne_bytes());
        expected.extend_from_slice(b"APP\0");
        assert_eq!(expected, got);
        let _ = std::fs::remove_file(&path);
    }
}
