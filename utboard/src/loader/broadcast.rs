//! Loading one bitstream into many boards at once over the datagram group.
//!
//! The transfer runs in rounds. Each round waits for a reply from every board still loading;
//! the next block goes out only when all of them have asked for it.
use super::bitstream::{
    classify_reply,
    data_block,
    LoadReply,
};
use crate::{
    core::{
        PacketId,
        FPGA_BLOCK_SIZE,
    },
    transport::Datagram,
};
use indicatif::ProgressBar;
use std::{
    collections::HashSet,
    net::IpAddr,
};
use tracing::{
    error,
    info,
};
use utboard_utils::program_sources::FpgaImage;

/// Receive timeouts in a row after which the boards not yet heard from are dropped
pub const BROADCAST_RECEIVE_TRIES: usize = 3;

/// How a broadcast load ended for each board
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Boards that reported a good configuration
    pub loaded: Vec<IpAddr>,
    /// Boards that reported a load error or stopped answering
    pub failed: Vec<IpAddr>,
    /// Data blocks sent
    pub blocks: usize,
}

fn list(addrs: &[IpAddr]) -> String {
    addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load `image` into every board in `boards`. Replies from addresses not in `boards` are
/// ignored. A board that reports a load error or goes quiet is dropped from the transfer and
/// the rest carry on.
/// # Errors
/// Returns an error only if the group socket fails
#[allow(clippy::cast_possible_truncation)]
pub fn broadcast_load<D, I>(
    group: &mut D,
    image: &I,
    boards: &[IpAddr],
) -> anyhow::Result<BroadcastOutcome>
where
    D: Datagram,
    I: FpgaImage,
{
    let mut outcome = BroadcastOutcome::default();
    if boards.is_empty() {
        return Ok(outcome);
    }
    info!(
        "Broadcasting FPGA bitstream {} to {} boards",
        image.md5_string(),
        boards.len()
    );
    let bitstream = image.bitstream();
    let mut blocks = bitstream.chunks(FPGA_BLOCK_SIZE);
    let bar = ProgressBar::new(bitstream.len().div_ceil(FPGA_BLOCK_SIZE) as u64);
    bar.set_message("Broadcasting bitstream");

    group.broadcast(&[PacketId::LoadFpga as u8])?;
    let mut loading: Vec<IpAddr> = boards.to_vec();
    let mut buf = [0u8; 64];
    loop {
        let mut requested: HashSet<IpAddr> = HashSet::new();
        let mut misses = 0;
        while loading.iter().any(|b| !requested.contains(b)) {
            let Some((n, addr)) = group.recv_from(&mut buf)? else {
                misses += 1;
                if misses >= BROADCAST_RECEIVE_TRIES {
                    let quiet: Vec<IpAddr> = loading
                        .iter()
                        .filter(|b| !requested.contains(b))
                        .copied()
                        .collect();
                    error!(
                        "Contact lost after {} packets with: {}",
                        outcome.blocks,
                        list(&quiet)
                    );
                    loading.retain(|b| requested.contains(b));
                    outcome.failed.extend(quiet);
                }
                continue;
            };
            if n < 2 || !loading.contains(&addr) {
                continue;
            }
            misses = 0;
            match classify_reply([buf[0], buf[1]]) {
                LoadReply::SendData => {
                    requested.insert(addr);
                }
                LoadReply::Done => {
                    info!(board = %addr, "FPGA loaded");
                    loading.retain(|b| *b != addr);
                    outcome.loaded.push(addr);
                }
                LoadReply::Failed(status) => {
                    error!(
                        board = %addr,
                        "FPGA load failed with {status:?} after {} packets",
                        outcome.blocks
                    );
                    loading.retain(|b| *b != addr);
                    outcome.failed.push(addr);
                }
                LoadReply::Other => (),
            }
        }
        if loading.is_empty() {
            if outcome.failed.is_empty() {
                bar.finish();
            } else {
                bar.abandon();
            }
            info!(
                "Bitstream loaded into {} of {} boards",
                outcome.loaded.len(),
                boards.len()
            );
            return Ok(outcome);
        }
        let block = blocks.next().unwrap_or_default();
        group.broadcast(&data_block(block))?;
        outcome.blocks += 1;
        bar.inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::LoadStatus,
        transport::sim::{
            SimGroup,
            SimRemote,
        },
    };
    use utboard_utils::program_sources::bitstream::File;

    fn addrs() -> Vec<IpAddr> {
        vec!["10.0.1.2".parse().unwrap(), "10.0.1.3".parse().unwrap()]
    }

    fn image() -> File {
        File::from_bytes(vec![0x3C; 2500], "top.bin".into()).unwrap()
    }

    #[test]
    fn test_all_boards_loaded() {
        let mut group = SimGroup::new(addrs().into_iter().map(SimRemote::new).collect());
        group.expect_bitstream(2500);
        let outcome = broadcast_load(&mut group, &image(), &addrs()).unwrap();
        assert_eq!(outcome.blocks, 3);
        assert_eq!(outcome.loaded, addrs());
        assert!(outcome.failed.is_empty());
        assert!(group.remotes.iter().all(|r| r.fpga_loaded));
        assert_eq!(group.sent()[0], vec![PacketId::LoadFpga as u8]);
    }

    #[test]
    fn test_quiet_board_dropped() {
        let mut remotes: Vec<_> = addrs().into_iter().map(SimRemote::new).collect();
        remotes[1].mute = true;
        let mut group = SimGroup::new(remotes);
        group.expect_bitstream(2500);
        let outcome = broadcast_load(&mut group, &image(), &addrs()).unwrap();
        assert_eq!(outcome.failed, vec![addrs()[1]]);
        assert_eq!(outcome.loaded, vec![addrs()[0]]);
        assert_eq!(outcome.blocks, 3);
        assert!(group.remotes[0].fpga_loaded);
    }

    #[test]
    fn test_fault_drops_only_that_board() {
        let mut remotes: Vec<_> = addrs().into_iter().map(SimRemote::new).collect();
        remotes[0].fault = Some(LoadStatus::InitBError);
        let mut group = SimGroup::new(remotes);
        group.expect_bitstream(2500);
        let outcome = broadcast_load(&mut group, &image(), &addrs()).unwrap();
        assert_eq!(outcome.failed, vec![addrs()[0]]);
        assert_eq!(outcome.loaded, vec![addrs()[1]]);
        assert!(!group.remotes[0].fpga_loaded);
        assert!(group.remotes[1].fpga_loaded);
    }

    #[test]
    fn test_every_board_lost() {
        let mut remotes: Vec<_> = addrs().into_iter().map(SimRemote::new).collect();
        for r in &mut remotes {
            r.mute = true;
        }
        let mut group = SimGroup::new(remotes);
        let outcome = broadcast_load(&mut group, &image(), &addrs()).unwrap();
        assert_eq!(outcome.failed, addrs());
        assert!(outcome.loaded.is_empty());
        assert_eq!(outcome.blocks, 0);
    }

    #[test]
    fn test_nothing_to_load() {
        let mut group = SimGroup::default();
        let outcome = broadcast_load(&mut group, &image(), &[]).unwrap();
        assert_eq!(outcome, BroadcastOutcome::default());
        assert!(group.sent().is_empty());
    }
}
