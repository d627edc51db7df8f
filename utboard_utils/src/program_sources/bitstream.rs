//! Reader for the FPGA configuration image. The board's loader expects the plain "Binary
//! Configuration File" emitted by the Xilinx tools, sent MSB first in 1024 byte blocks. Images
//! stored gzipped on disk are inflated on read.
use super::FpgaImage;
use flate2::bufread::GzDecoder;
use std::{
    ffi::OsString,
    io::Read,
    path::Path,
};
use thiserror::Error;

/// Number of bitstream bytes that follow the command byte in one data block
pub const BLOCK_SIZE: usize = 1024;

#[derive(Debug, PartialEq, Eq)]
pub struct File {
    pub bitstream: Vec<u8>,
    pub md5: [u8; 16],
    pub filename: OsString,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("The bitstream file is empty")]
    Empty,
}

impl FpgaImage for File {
    fn bitstream(&self) -> &[u8] {
        &self.bitstream
    }

    fn md5(&self) -> &[u8; 16] {
        &self.md5
    }
}

impl File {
    /// Build an image from bytes already in memory, inflating them if they are gzipped
    /// # Errors
    /// Returns an error if the image is empty or the gzip stream is corrupt
    pub fn from_bytes(contents: Vec<u8>, filename: OsString) -> Result<Self, Error> {
        if contents.is_empty() {
            return Err(Error::Empty);
        }
        let md5 = md5::compute(&contents);
        let bitstream = if contents.len() >= 3 && contents[..3] == [0x1F, 0x8B, 0x08] {
            let mut z = GzDecoder::new(&contents[..]);
            let mut decompressed = vec![];
            z.read_to_end(&mut decompressed)?;
            decompressed
        } else {
            contents
        };
        Ok(Self {
            bitstream,
            md5: md5.into(),
            filename,
        })
    }

    /// The number of data blocks the loader will send for this image
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.bitstream.len().div_ceil(BLOCK_SIZE)
    }
}

/// Reads an FPGA configuration image
/// # Errors
/// Returns an error if the file can't be read or is empty
pub fn read_bitstream_file<T>(filename: T) -> Result<File, Error>
where
    T: AsRef<Path>,
{
    let contents = std::fs::read(filename.as_ref())?;
    let name = filename
        .as_ref()
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_default();
    File::from_bytes(contents, name)
}
