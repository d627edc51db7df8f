//! The byte-level links to the boards: one ordered stream per board and a shared datagram
//! channel for discovery and broadcast loading

pub mod sim;
pub mod tcp;
pub mod udp;

use std::{
    net::IpAddr,
    time::Duration,
};

pub type TransportResult<T> = anyhow::Result<T>;

/// Types that implement this trait can be serialized into the big-endian byte order the boards
/// use on the wire
pub trait Serialize {
    type Chunk;
    fn serialize(&self) -> Self::Chunk;
}

/// Types that implement this trait can be deserialized from the big-endian byte order the boards
/// use on the wire
pub trait Deserialize: Sized {
    type Chunk;
    fn deserialize(chunk: Self::Chunk) -> anyhow::Result<Self>;
}

macro_rules! ser_num {
    ($num:ty) => {
        impl Serialize for $num {
            type Chunk = [u8; core::mem::size_of::<$num>()];
            fn serialize(&self) -> Self::Chunk {
                self.to_be_bytes()
            }
        }
    };
}

macro_rules! deser_num {
    ($num:ty) => {
        impl Deserialize for $num {
            type Chunk = [u8; core::mem::size_of::<$num>()];
            fn deserialize(chunk: Self::Chunk) -> anyhow::Result<Self> {
                Ok(<$num>::from_be_bytes(chunk))
            }
        }
    };
}

ser_num!(u8);
ser_num!(u16);
ser_num!(u32);
ser_num!(i8);
ser_num!(i16);
ser_num!(i32);

deser_num!(u8);
deser_num!(u16);
deser_num!(u32);
deser_num!(i8);
deser_num!(i16);
deser_num!(i32);

/// The reliable, ordered byte stream to one board.
/// The methods of this trait *assume* that the board is already connected.
pub trait Transport {
    /// Number of received bytes that can be read without waiting
    fn available(&mut self) -> TransportResult<usize>;

    /// Fill `buf` completely, waiting at most the transport timeout for missing bytes
    fn read_bytes(&mut self, buf: &mut [u8]) -> TransportResult<()>;

    /// Write `data` in one piece
    fn write_bytes(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Set how long a read may wait for missing bytes
    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()>;

    /// Close the connection. Nothing may be sent afterwards.
    fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }

    /// Read one byte
    fn read_byte(&mut self) -> TransportResult<u8> {
        let mut byte = [0u8];
        self.read_bytes(&mut byte)?;
        Ok(byte[0])
    }

    /// Generically read a `Deserializable` type `T` off the stream
    fn read<T, const N: usize>(&mut self) -> TransportResult<T>
    where
        T: Deserialize<Chunk = [u8; N]>,
    {
        let mut bytes = [0u8; N];
        self.read_bytes(&mut bytes)?;
        T::deserialize(bytes)
    }

    /// Read one line of text, dropping the line ending. Stops after `max` bytes if no line ending
    /// shows up.
    fn read_line(&mut self, max: usize) -> TransportResult<String> {
        let mut line = vec![];
        while line.len() < max {
            match self.read_byte()? {
                b'\n' => break,
                b'\r' => (),
                c => line.push(c),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

/// The best-effort datagram channel shared by every board
pub trait Datagram {
    /// Send `data` to every listening board
    fn broadcast(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Receive one datagram into `buf`, returning its length and sender, or `None` if nothing
    /// arrived within the timeout
    fn recv_from(&mut self, buf: &mut [u8]) -> TransportResult<Option<(usize, IpAddr)>>;

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use paste::paste;

    macro_rules! test_be_num {
        ($num:ty, $v:literal) => {
            paste! {
                #[test]
                fn [<test_be_ $num>]() {
                    let num: $num = $v;
                    let bytes = num.serialize();
                    assert_eq!(bytes, num.to_be_bytes());
                    assert_eq!(<$num>::deserialize(bytes).unwrap(), num);
                }
            }
        };
    }

    test_be_num!(u16, 0x8123);
    test_be_num!(i16, -2);
    test_be_num!(u32, 0xDEAD_BEEF);
    test_be_num!(i32, -0x0DEA_DBEE);

    #[test]
    fn test_read_line() {
        let mut sim = sim::Simulator::with_greeting("Hello from UT board\r\n");
        assert_eq!(sim.read_line(256).unwrap(), "Hello from UT board");
        assert_eq!(sim.available().unwrap(), 0);
    }
}
