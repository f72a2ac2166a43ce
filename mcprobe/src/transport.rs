//! Blocking socket transports.
//!
//! A transport only knows how to move bytes. Stream transports return exactly
//! the number of bytes asked for; datagram transports return the next datagram
//! and treat the length as an upper bound.

use std::{
    io::{self, Read, Write},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket},
    time::Duration,
};

use crate::{ByteBuffer, Error};

/// Largest datagram any of the UDP protocols can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// A blocking byte sink/source.
pub trait Transport {
    /// Send `data` to the peer.
    ///
    /// # Errors
    /// If the socket fails or the write times out.
    fn write(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Receive up to `len` bytes.
    ///
    /// # Errors
    /// If the socket fails, the read times out or the peer closed the stream.
    fn read(&mut self, len: usize) -> Result<Vec<u8>, Error>;
}

/// Maps socket failures onto the crate's error kinds.
pub(crate) fn io_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        io::ErrorKind::UnexpectedEof => {
            Error::Protocol("server did not respond with any information".to_owned())
        }
        _ => Error::IoError(err),
    }
}

/// Checks that a stream read produced the full amount.
pub(crate) fn exact(data: Vec<u8>, len: usize) -> Result<Vec<u8>, Error> {
    if data.len() == len {
        Ok(data)
    } else {
        Err(Error::Protocol(format!(
            "connection ended early: got {} of {len} bytes",
            data.len()
        )))
    }
}

pub(crate) const fn unspecified_for(addr: &SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(std::net::IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// A TCP connection with read and write timeouts and `TCP_NODELAY` set.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// # Errors
    /// If the connection is refused or not established within `timeout`.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, Error> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(io_error)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.stream.write_all(data).map_err(io_error)
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut data = vec![0; len];
        self.stream.read_exact(&mut data).map_err(io_error)?;
        Ok(data)
    }
}

/// A connected UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds an ephemeral port of the same address family as `addr` and connects it.
    ///
    /// # Errors
    /// If the socket cannot be bound or connected.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, Error> {
        Self::connect_from(addr, &[unspecified_for(&addr)], timeout)
    }

    /// Like [`connect`](Self::connect), trying each of `local` in turn for the bind.
    ///
    /// Local addresses of the wrong family are skipped.
    ///
    /// # Errors
    /// If none of the local addresses can be bound, or connecting fails.
    pub fn connect_from(
        addr: SocketAddr,
        local: &[SocketAddr],
        timeout: Duration,
    ) -> Result<Self, Error> {
        let mut last_err = None;
        for bind in local.iter().filter(|l| l.is_ipv4() == addr.is_ipv4()) {
            match UdpSocket::bind(bind) {
                Ok(socket) => {
                    socket.set_read_timeout(Some(timeout))?;
                    socket.set_write_timeout(Some(timeout))?;
                    socket.connect(addr)?;
                    return Ok(Self { socket });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.map_or(Error::InvalidAddress, Error::IoError))
    }
}

impl Transport for UdpTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.socket.send(data).map_err(io_error)?;
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut data = vec![0; len.min(MAX_DATAGRAM_SIZE)];
        loop {
            let n = self.socket.recv(&mut data).map_err(io_error)?;
            if n > 0 {
                data.truncate(n);
                return Ok(data);
            }
        }
    }
}

/// The in-memory transport: writes go to the outgoing side, reads drain the
/// incoming side.
///
/// Reads asking for more than is buffered return what is left, so a buffer
/// can stand in for a datagram socket as well as a stream.
impl Transport for ByteBuffer {
    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        Self::write(self, data);
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        if len > 0 && self.remaining() == 0 {
            return Err(Error::Protocol(
                "server did not respond with any information".to_owned(),
            ));
        }
        let len = len.min(self.remaining());
        Ok(Self::read(self, len)?.to_vec())
    }
}
