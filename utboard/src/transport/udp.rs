//! The datagram channel shared by every board, used for roll call and broadcast loading
use super::{
    Datagram,
    TransportResult,
};
use std::{
    io::ErrorKind,
    net::{
        IpAddr,
        Ipv4Addr,
        SocketAddr,
        SocketAddrV4,
        UdpSocket,
    },
    time::Duration,
};
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Internal system IO error")]
    Io(#[from] std::io::Error),
}

/// A UDP socket bound to the local discovery port, sending to the boards' group address
#[derive(Debug)]
pub struct Udp {
    socket: UdpSocket,
    group: SocketAddr,
}

impl Udp {
    /// Bind to `local_port` on every interface and send to `group`
    /// # Errors
    /// Will return an error if the socket can't be bound
    pub fn bind(local_port: u16, group: SocketAddr) -> TransportResult<Self> {
        let socket =
            UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port)).map_err(Error::from)?;
        socket.set_nonblocking(false).map_err(Error::from)?;
        socket.set_broadcast(true).map_err(Error::from)?;
        socket
            .set_read_timeout(Some(DEFAULT_TIMEOUT))
            .map_err(Error::from)?;
        socket
            .set_write_timeout(Some(DEFAULT_TIMEOUT))
            .map_err(Error::from)?;
        if let SocketAddr::V4(v4) = group {
            if v4.ip().is_multicast() {
                socket.set_multicast_loop_v4(false).map_err(Error::from)?;
            }
        }
        Ok(Self { socket, group })
    }
}

impl Datagram for Udp {
    fn broadcast(&mut self, data: &[u8]) -> TransportResult<()> {
        self.socket
            .send_to(data, self.group)
            .map_err(Error::from)?;
        Ok(())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> TransportResult<Option<(usize, IpAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, from.ip()))),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(Error::from(e).into()),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_datagram() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut udp = Udp::bind(0, peer.local_addr().unwrap()).unwrap();
        udp.set_timeout(Duration::from_millis(200)).unwrap();
        udp.broadcast(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        peer.send_to(b"pong", from).unwrap();
        let (n, _) = udp.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert!(udp.recv_from(&mut buf).unwrap().is_none());
    }
}
