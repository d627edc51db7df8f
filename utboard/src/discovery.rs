//! Finding boards on the network with the datagram roll call
use crate::{
    config::{
        BoardConfig,
        ConfigError,
    },
    core::PacketId,
    transport::Datagram,
};
use std::{
    net::IpAddr,
    time::Duration,
};
use tracing::{
    debug,
    info,
    warn,
};

/// The roll call boards answer
pub const ROLL_CALL: &[u8] = b"UT Board Roll Call";
/// How long each roll call waits for answers
pub const ROLL_CALL_INTERVAL: Duration = Duration::from_secs(1);
const FPGA_LOADED_MARKER: &str = "FPGA loaded";

/// A board that answered the roll call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Responder {
    pub addr: IpAddr,
    /// The board said its bitstream is already resident
    pub fpga_loaded: bool,
    pub reply: String,
}

/// Everyone who answered, in order of first answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollCall {
    pub responders: Vec<Responder>,
}

impl RollCall {
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.responders.iter().filter(|r| r.fpga_loaded).count()
    }

    /// Boards that still need a bitstream
    #[must_use]
    pub fn unloaded(&self) -> Vec<IpAddr> {
        self.responders
            .iter()
            .filter(|r| !r.fpga_loaded)
            .map(|r| r.addr)
            .collect()
    }

    fn note(&mut self, addr: IpAddr, reply: &[u8]) {
        if self.responders.iter().any(|r| r.addr == addr) {
            debug!(board = %addr, "Duplicate roll call reply");
            return;
        }
        let reply = String::from_utf8_lossy(reply).trim_end().to_string();
        info!(board = %addr, "{reply}");
        self.responders.push(Responder {
            addr,
            fpga_loaded: reply.contains(FPGA_LOADED_MARKER),
            reply,
        });
    }
}

/// Broadcast the roll call up to `attempts` times, each waiting `interval` for answers, until
/// `expected` distinct boards have answered. With `expected` zero every attempt is made.
/// # Errors
/// Returns an error on socket failures
pub fn roll_call<D: Datagram>(
    group: &mut D,
    expected: usize,
    attempts: usize,
    interval: Duration,
) -> anyhow::Result<RollCall> {
    group.set_timeout(interval)?;
    let mut call = RollCall::default();
    let mut buf = [0u8; 256];
    for attempt in 1..=attempts {
        debug!("Roll call attempt {attempt}");
        group.broadcast(ROLL_CALL)?;
        while let Some((n, addr)) = group.recv_from(&mut buf)? {
            call.note(addr, &buf[..n]);
        }
        if expected > 0 && call.responders.len() >= expected {
            break;
        }
    }
    info!(
        "{} boards answered the roll call, {} with FPGA loaded",
        call.responders.len(),
        call.loaded_count()
    );
    if call.responders.len() < expected {
        warn!(
            "Expected {expected} boards, only {} answered",
            call.responders.len()
        );
    }
    Ok(call)
}

/// Tell boards waiting after the roll call that no broadcast load is coming
/// # Errors
/// Returns an error on socket failures
pub fn send_run_trigger<D: Datagram>(group: &mut D) -> anyhow::Result<()> {
    group.broadcast(&[PacketId::NoAction as u8])
}

/// Give each board without a configured address the next responder, first come first served.
/// Responders already named in the configuration are skipped.
/// # Errors
/// Returns [`ConfigError::Unaddressed`] for the first board left without an address
pub fn assign_addresses(boards: &mut [BoardConfig], call: &RollCall) -> Result<(), ConfigError> {
    let configured: Vec<IpAddr> = boards.iter().filter_map(|b| b.address).collect();
    let mut free = call
        .responders
        .iter()
        .map(|r| r.addr)
        .filter(|a| !configured.contains(a));
    for (i, board) in boards.iter_mut().enumerate() {
        if board.address.is_some() {
            continue;
        }
        match free.next() {
            Some(addr) => {
                debug!(board = %addr, "Assigned to board {i}");
                board.address = Some(addr);
            }
            None => return Err(ConfigError::Unaddressed(i)),
        }
    }
    for extra in free {
        warn!(board = %extra, "Answered the roll call but isn't configured");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::{
        SimGroup,
        SimRemote,
    };

    fn remote(addr: &str, loaded: bool) -> SimRemote {
        let mut r = SimRemote::new(addr.parse().unwrap());
        r.fpga_loaded = loaded;
        r
    }

    #[test]
    fn test_roll_call_dedupes() {
        let mut group = SimGroup::new(vec![remote("10.0.1.2", true), remote("10.0.1.3", false)]);
        group.echo_roll_call = true;
        let call = roll_call(&mut group, 2, 5, Duration::ZERO).unwrap();
        assert_eq!(call.responders.len(), 2);
        assert_eq!(call.loaded_count(), 1);
        assert_eq!(call.unloaded(), vec!["10.0.1.3".parse::<IpAddr>().unwrap()]);
        // Stopped as soon as both answered
        assert_eq!(group.sent().len(), 1);
    }

    #[test]
    fn test_roll_call_gives_up() {
        let mut quiet = remote("10.0.1.4", false);
        quiet.mute = true;
        let mut group = SimGroup::new(vec![remote("10.0.1.2", false), quiet]);
        let call = roll_call(&mut group, 2, 3, Duration::ZERO).unwrap();
        assert_eq!(call.responders.len(), 1);
        assert_eq!(group.sent().len(), 3);
    }

    #[test]
    fn test_run_trigger() {
        let mut group = SimGroup::default();
        send_run_trigger(&mut group).unwrap();
        assert_eq!(group.sent(), &[vec![0u8]]);
    }

    #[test]
    fn test_assign_first_come() {
        let mut group = SimGroup::new(vec![
            remote("10.0.1.2", false),
            remote("10.0.1.3", false),
            remote("10.0.1.9", false),
        ]);
        let call = roll_call(&mut group, 3, 1, Duration::ZERO).unwrap();
        let mut boards = vec![
            BoardConfig::default(),
            BoardConfig {
                address: Some("10.0.1.2".parse().unwrap()),
                ..Default::default()
            },
            BoardConfig::default(),
        ];
        assign_addresses(&mut boards, &call).unwrap();
        assert_eq!(boards[0].address, Some("10.0.1.3".parse().unwrap()));
        assert_eq!(boards[2].address, Some("10.0.1.9".parse().unwrap()));

        let mut short = vec![BoardConfig::default(); 4];
        assert!(matches!(
            assign_addresses(&mut short, &call),
            Err(ConfigError::Unaddressed(3))
        ));
    }
}
