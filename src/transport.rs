//! Datagram transport capability and a UDP implementation.

use std::io;
use std::net::{SocketAddr, UdpSocket};

/// A connectionless socket bound to a single peer.
///
/// None of the methods may block. Readiness (connected, datagram pending) is
/// observed by the caller's event loop and forwarded to the association.
pub trait Transport {
    /// Begin associating the socket with `peer`.
    ///
    /// Implementations that connect asynchronously return before
    /// [`Transport::is_connected`] turns true.
    fn connect(&mut self, peer: SocketAddr) -> io::Result<()>;

    fn is_connected(&self) -> bool;

    /// Send one datagram, returning the bytes written.
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize>;

    /// Size of the next pending datagram, `None` if nothing is queued.
    fn pending_datagram_size(&mut self) -> Option<usize>;

    /// Read one datagram into `buf`.
    ///
    /// A datagram larger than `buf` is consumed whole; the excess is lost.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Stop sending and receiving. Idempotent.
    fn close(&mut self);
}

/// Non-blocking UDP socket connected to one peer.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    closed: bool,
    peek_buf: Vec<u8>,
}

// Fits any UDP payload.
const PEEK_BUF_SIZE: usize = 65_536;

impl UdpTransport {
    /// Bind a local socket. The peer is set by [`Transport::connect`].
    pub fn bind(local: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        debug!("UDP socket bound to {}", socket.local_addr()?);

        Ok(UdpTransport {
            socket,
            peer: None,
            closed: false,
            peek_buf: vec![0; PEEK_BUF_SIZE],
        })
    }

    /// The underlying socket, for registering with a readiness poller.
    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        if self.peer.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket not connected",
            ));
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn connect(&mut self, peer: SocketAddr) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        // UDP connect only sets the default destination and filters inbound
        // datagrams, it completes synchronously.
        self.socket.connect(peer)?;
        self.peer = Some(peer);
        debug!("UDP socket connected to {}", peer);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed && self.peer.is_some()
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.socket.send(datagram)
    }

    fn pending_datagram_size(&mut self) -> Option<usize> {
        if self.ensure_open().is_err() {
            return None;
        }
        match self.socket.peek(&mut self.peek_buf) {
            Ok(n) => Some(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                trace!("peek failed: {}", e);
                None
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.socket.recv(buf)
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("UDP socket closed");
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn wait_pending(t: &mut UdpTransport) -> Option<usize> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if let Some(n) = t.pending_datagram_size() {
                return Some(n);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn send_and_receive_between_connected_sockets() {
        let mut a = UdpTransport::bind(loopback()).unwrap();
        let mut b = UdpTransport::bind(loopback()).unwrap();
        assert!(!a.is_connected());

        a.connect(b.local_addr().unwrap()).unwrap();
        b.connect(a.local_addr().unwrap()).unwrap();
        assert!(a.is_connected());

        assert_eq!(a.send(b"hello").unwrap(), 5);

        let n = wait_pending(&mut b).expect("datagram to arrive");
        assert_eq!(n, 5);

        let mut buf = vec![0; n];
        assert_eq!(b.receive(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(b.pending_datagram_size(), None);
    }

    #[test]
    fn closed_socket_refuses_traffic() {
        let mut a = UdpTransport::bind(loopback()).unwrap();
        let b = UdpTransport::bind(loopback()).unwrap();
        a.connect(b.local_addr().unwrap()).unwrap();

        a.close();
        a.close();
        assert!(!a.is_connected());
        assert!(a.send(b"x").is_err());
        assert!(a.receive(&mut [0; 8]).is_err());
        assert_eq!(a.pending_datagram_size(), None);
    }

    #[test]
    fn unconnected_send_fails() {
        let mut a = UdpTransport::bind(loopback()).unwrap();
        let err = a.send(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
