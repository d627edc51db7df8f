//! The stream transport to a real board
use super::{
    Transport,
    TransportResult,
};
use std::{
    collections::VecDeque,
    io::{
        ErrorKind,
        Read,
        Write,
    },
    net::{
        Shutdown,
        SocketAddr,
        TcpStream,
    },
    time::Duration,
};
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Internal system IO error")]
    Io(#[from] std::io::Error),
    #[error("The board closed the connection")]
    Closed,
    #[error("Timed out with {got} of {wanted} bytes read")]
    Short { got: usize, wanted: usize },
}

/// A TCP connection to one board (newtype for a [`TcpStream`] plus the bytes already pulled off
/// the socket)
#[derive(Debug)]
pub struct Tcp {
    stream: TcpStream,
    rx: VecDeque<u8>,
    closed: bool,
}

impl Tcp {
    /// Connect to a board
    /// # Errors
    /// Will return an error if the connection isn't established within `timeout`
    pub fn connect(host: SocketAddr, timeout: Duration) -> TransportResult<Self> {
        let stream = TcpStream::connect_timeout(&host, timeout).map_err(Error::from)?;
        stream.set_nodelay(true).map_err(Error::from)?;
        stream
            .set_write_timeout(Some(DEFAULT_TIMEOUT))
            .map_err(Error::from)?;
        stream
            .set_read_timeout(Some(DEFAULT_TIMEOUT))
            .map_err(Error::from)?;
        Ok(Self {
            stream,
            rx: VecDeque::new(),
            closed: false,
        })
    }

    /// Move whatever the socket already holds into the receive buffer without blocking
    fn drain_socket(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.stream.set_nonblocking(true)?;
        let mut chunk = [0u8; 4096];
        let res = loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    break Ok(());
                }
                Ok(n) => self.rx.extend(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => break Err(e.into()),
            }
        };
        self.stream.set_nonblocking(false)?;
        res
    }
}

impl Transport for Tcp {
    fn available(&mut self) -> TransportResult<usize> {
        self.drain_socket()?;
        if self.closed && self.rx.is_empty() {
            return Err(Error::Closed.into());
        }
        Ok(self.rx.len())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        let wanted = buf.len();
        let mut chunk = [0u8; 4096];
        while self.rx.len() < wanted {
            if self.closed {
                return Err(Error::Closed.into());
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => self.closed = true,
                Ok(n) => self.rx.extend(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(Error::Short {
                        got: self.rx.len(),
                        wanted,
                    }
                    .into());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(Error::from(e).into()),
            }
        }
        for (dst, src) in buf.iter_mut().zip(self.rx.drain(..wanted)) {
            *dst = src;
        }
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> TransportResult<()> {
        self.stream.write_all(data).map_err(Error::from)?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(Error::from)?;
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.closed = true;
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(Error::from(e).into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_loopback_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"Hello from UT board\r\n").unwrap();
            let mut cmd = [0u8; 3];
            sock.read_exact(&mut cmd).unwrap();
            sock.write_all(&cmd).unwrap();
        });
        let mut tcp = Tcp::connect(addr, Duration::from_secs(1)).unwrap();
        tcp.set_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(tcp.read_line(256).unwrap(), "Hello from UT board");
        tcp.write_bytes(&[7, 8, 9]).unwrap();
        let mut echo = [0u8; 3];
        tcp.read_bytes(&mut echo).unwrap();
        assert_eq!(echo, [7, 8, 9]);
        tcp.close().unwrap();
        server.join().unwrap();
    }
}
