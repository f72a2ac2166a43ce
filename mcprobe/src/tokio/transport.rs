//! Suspending transports on top of `tokio::net`. Every operation is bounded
//! by the transport's timeout.

use std::{future::Future, net::SocketAddr, time::Duration};

use ::tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time::timeout,
};

use crate::{
    ByteBuffer, Error,
    transport::{MAX_DATAGRAM_SIZE, io_error, unspecified_for},
};

/// The async counterpart of [`Transport`](crate::Transport).
pub trait AsyncTransport {
    /// Send `data` to the peer.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Receive up to `len` bytes; exactly `len` on streams.
    fn read(&mut self, len: usize) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
}

async fn bounded<T>(
    limit: Duration,
    op: impl Future<Output = std::io::Result<T>> + Send,
) -> Result<T, Error> {
    timeout(limit, op)
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(io_error)
}

#[derive(Debug)]
pub struct TokioTcpTransport {
    stream: TcpStream,
    timeout: Duration,
}

impl TokioTcpTransport {
    /// # Errors
    /// If the connection is refused or not established within `timeout`.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, Error> {
        let stream = bounded(timeout, TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, timeout })
    }
}

impl AsyncTransport for TokioTcpTransport {
    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        bounded(self.timeout, self.stream.write_all(data)).await
    }

    async fn read(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut data = vec![0; len];
        bounded(self.timeout, self.stream.read_exact(&mut data)).await?;
        Ok(data)
    }
}

#[derive(Debug)]
pub struct TokioUdpTransport {
    socket: UdpSocket,
    timeout: Duration,
}

impl TokioUdpTransport {
    /// Binds an ephemeral port of the same address family as `addr` and connects it.
    ///
    /// # Errors
    /// If the socket cannot be bound or connected.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, Error> {
        Self::connect_from(addr, &[unspecified_for(&addr)], timeout).await
    }

    /// Tries each of `local` in turn for the bind, skipping the wrong address family.
    ///
    /// # Errors
    /// If none of the local addresses can be bound, or connecting fails.
    pub async fn connect_from(
        addr: SocketAddr,
        local: &[SocketAddr],
        timeout: Duration,
    ) -> Result<Self, Error> {
        let mut last_err = None;
        for bind in local.iter().filter(|l| l.is_ipv4() == addr.is_ipv4()) {
            match UdpSocket::bind(bind).await {
                Ok(socket) => {
                    socket.connect(addr).await?;
                    return Ok(Self { socket, timeout });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.map_or(Error::InvalidAddress, Error::IoError))
    }
}

impl AsyncTransport for TokioUdpTransport {
    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        bounded(self.timeout, self.socket.send(data)).await?;
        Ok(())
    }

    async fn read(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut data = vec![0; len.min(MAX_DATAGRAM_SIZE)];
        loop {
            let n = bounded(self.timeout, self.socket.recv(&mut data)).await?;
            if n > 0 {
                data.truncate(n);
                return Ok(data);
            }
        }
    }
}

impl AsyncTransport for ByteBuffer {
    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        crate::Transport::write(self, data)
    }

    async fn read(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        crate::Transport::read(self, len)
    }
}

#[cfg(test)]
mod tests {
    use ::tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn tcp_round_trip_and_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ::tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut data = [0; 3];
            socket.read_exact(&mut data).await.unwrap();
            socket.write_all(&data).await.unwrap();
        });

        let mut transport = TokioTcpTransport::connect(addr, Duration::from_secs(3))
            .await
            .unwrap();
        transport.write(b"abc").await.unwrap();
        assert_eq!(transport.read(3).await.unwrap(), b"abc");
        server.await.unwrap();
        assert!(matches!(transport.read(1).await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn udp_read_times_out() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut transport =
            TokioUdpTransport::connect(peer.local_addr().unwrap(), Duration::from_millis(50))
                .await
                .unwrap();
        transport.write(b"ping").await.unwrap();
        assert!(matches!(transport.read(16).await, Err(Error::Timeout)));
    }
}
