//! Sources of the code images loaded into a UT board

pub mod bitstream;
pub mod dsp;

/// Anything that can provide the FPGA configuration image for a board. Right now this is just
/// the raw (optionally gzipped) Xilinx binary, but a bundled format could implement it too.
pub trait FpgaImage {
    /// Get the uncompressed bitstream as bytes, ready to send
    fn bitstream(&self) -> &[u8];

    /// Hash of the file the bitstream came from
    fn md5(&self) -> &[u8; 16];

    /// Get a string representation of the MD5 hash
    fn md5_string(&self) -> String {
        self.md5().iter().map(|&v| format!("{v:02x}")).collect()
    }
}
