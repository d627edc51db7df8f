//! Point-to-point bitstream loading.
//!
//! After the start command the board drives the transfer. Each raw `[request, status]` reply
//! either asks for the next block or ends the load with a status. Blocks go out raw, the data
//! command byte followed by up to [`FPGA_BLOCK_SIZE`] bytes.
use crate::{
    board::Board,
    command,
    core::{
        LoadStatus,
        PacketId,
        FPGA_BLOCK_SIZE,
        FPGA_LOADED_FLAG,
        FPGA_LOAD_TIMEOUT,
    },
    transport::{
        Transport,
        TransportResult,
    },
};
use anyhow::bail;
use indicatif::ProgressBar;
use num_traits::FromPrimitive;
use tracing::{
    error,
    info,
};
use utboard_utils::program_sources::FpgaImage;

/// A raw data block: the data command byte and the block
#[must_use]
pub fn data_block(block: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len() + 1);
    out.push(PacketId::Data as u8);
    out.extend_from_slice(block);
    out
}

/// What a loader reply means for the transfer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadReply {
    SendData,
    Done,
    Failed(LoadStatus),
    /// Neither a request nor a final status
    Other,
}

#[must_use]
pub fn classify_reply(reply: [u8; 2]) -> LoadReply {
    match LoadStatus::from_u8(reply[1]) {
        Some(LoadStatus::ConfigGood) => LoadReply::Done,
        Some(s @ (LoadStatus::InitBError | LoadStatus::DoneError | LoadStatus::CrcError)) => {
            LoadReply::Failed(s)
        }
        _ if reply[0] == PacketId::SendData as u8 => LoadReply::SendData,
        _ => LoadReply::Other,
    }
}

impl<T> Board<T>
where
    T: Transport,
{
    /// Load the FPGA unless the board reports it already loaded
    /// # Errors
    /// Returns an error if the board reports a load error or stops asking for data
    pub fn load_fpga<I: FpgaImage>(&mut self, image: &I) -> anyhow::Result<()> {
        if self.get_board_status()? & FPGA_LOADED_FLAG != 0 {
            info!(board = %self.identity, "FPGA already loaded");
            self.set_fpga_loaded(true);
            return Ok(());
        }
        info!(
            board = %self.identity,
            "Loading FPGA bitstream {}", image.md5_string()
        );
        match self.transfer_bitstream(image.bitstream()) {
            Ok(blocks) => {
                info!(board = %self.identity, "FPGA loaded, {blocks} blocks");
                self.set_fpga_loaded(true);
                Ok(())
            }
            Err(e) => {
                error!(board = %self.identity, "FPGA load failed: {e:#}");
                Err(e)
            }
        }
    }

    fn read_load_reply(&mut self) -> TransportResult<Option<[u8; 2]>> {
        if self.transport.available()? < 2 {
            return Ok(None);
        }
        let mut reply = [0u8; 2];
        self.transport.read_bytes(&mut reply)?;
        Ok(Some(reply))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn transfer_bitstream(&mut self, bitstream: &[u8]) -> anyhow::Result<usize> {
        let mut blocks = bitstream.chunks(FPGA_BLOCK_SIZE);
        let bar = ProgressBar::new(bitstream.len().div_ceil(FPGA_BLOCK_SIZE) as u64);
        bar.set_message("Writing bitstream");

        self.send(&command::load_fpga())?;
        let mut sent = 0usize;
        let mut idle = 0u32;
        while idle < FPGA_LOAD_TIMEOUT {
            let Some(reply) = self.read_load_reply()? else {
                idle += 1;
                self.tick();
                continue;
            };
            match classify_reply(reply) {
                LoadReply::SendData => {
                    let block = blocks.next().unwrap_or_default();
                    self.transport.write_bytes(&data_block(block))?;
                    sent += 1;
                    bar.inc(1);
                    idle = 0;
                }
                LoadReply::Done => {
                    bar.finish();
                    return Ok(sent);
                }
                LoadReply::Failed(status) => {
                    bar.abandon();
                    bail!("Board reported {status:?} after {sent} packets");
                }
                LoadReply::Other => idle += 1,
            }
        }
        bar.abandon();
        bail!("Contact lost after {sent} packets")
    }
}
