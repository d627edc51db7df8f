//! The YAML configuration describing the boards, their programs, and per-channel setup
use crate::gate::Gate;
use kstring::KString;
use serde_derive::Deserialize;
use std::{
    collections::HashMap,
    net::{
        IpAddr,
        Ipv4Addr,
        SocketAddr,
    },
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File {0} given to Config does not exist")]
    BadFilePath(PathBuf),
    #[error("Config received an io error")]
    Io(#[from] std::io::Error),
    #[error("Config received a parsing error")]
    Parsing(#[from] serde_yaml::Error),
    #[error("Board {0} has no address and discovery isn't expecting it")]
    Unaddressed(usize),
    #[error("Board {board} channel {channel}: {source}")]
    Gate {
        board: usize,
        channel: usize,
        source: crate::gate::Error,
    },
}

/// Chassis and slot assigned to a board in place of its switch settings
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub struct ChassisSlot {
    pub chassis: u8,
    pub slot: u8,
}

/// Pulser timing for one board
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub rep_rate_hz: u32,
    pub trigger_width: u32,
    pub sync_width: u16,
    pub pulse_delay: u16,
    /// Transducer banks fired in turn, less one
    pub banks: u8,
    /// This board drives the pulser sync for the chassis
    pub sync_source: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            rep_rate_hz: 2000,
            trigger_width: 15,
            sync_width: 200,
            pulse_delay: 2,
            banks: 0,
            sync_source: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub active: bool,
    pub smoothing: usize,
    /// Percent of full A-scan height
    pub reject_level: i32,
    pub is_wall: bool,
    pub hardware_delay: u32,
    pub gates: Vec<Gate>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            active: true,
            smoothing: 1,
            reject_level: 0,
            is_wall: false,
            hardware_delay: 0,
            gates: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Filled by discovery when absent
    pub address: Option<IpAddr>,
    /// Falls back to the global timing
    pub timing: Option<Timing>,
    pub control_flags: u16,
    /// Channel the board maps wall data from
    pub mapping_channel: i16,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub local_port: u16,
    pub remote_port: u16,
    pub group: Ipv4Addr,
    pub attempts: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            local_port: 4445,
            remote_port: 4446,
            group: Ipv4Addr::new(230, 0, 0, 1),
            attempts: 5,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.group), self.remote_port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fpga_bitstream: PathBuf,
    pub dsp_program: PathBuf,
    #[serde(default)]
    pub boards: Vec<BoardConfig>,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Keyed by the last two bytes of the board address, `"b2.b3"`
    #[serde(default)]
    pub overrides: HashMap<KString, ChassisSlot>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Load bitstreams to every board at once over the datagram channel
    #[serde(default)]
    pub broadcast_load: bool,
}

fn default_port() -> u16 {
    23
}

fn default_timeout_ms() -> u64 {
    250
}

impl Config {
    /// # Errors
    /// Returns an error if the file is missing, unreadable, malformed, or describes gates that
    /// aren't allowed
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(config_path)?;
        Self::from_yaml(&yaml_str)
    }

    /// # Errors
    /// Returns an error if the text is malformed or describes gates that aren't allowed
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config = serde_yaml::from_str::<Self>(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (b, board) in self.boards.iter().enumerate() {
            for (c, channel) in board.channels.iter().enumerate() {
                for gate in &channel.gates {
                    gate.validate().map_err(|source| ConfigError::Gate {
                        board: b,
                        channel: c,
                        source,
                    })?;
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    /// Timing for board `index`
    #[must_use]
    pub fn timing_for(&self, index: usize) -> Timing {
        self.boards
            .get(index)
            .and_then(|b| b.timing)
            .unwrap_or(self.timing)
    }

    /// The chassis/slot override for a board, keyed by the last two bytes of its address
    #[must_use]
    pub fn override_for(&self, addr: IpAddr) -> Option<ChassisSlot> {
        self.overrides.get(override_key(addr).as_str()).copied()
    }
}

/// `"b2.b3"`, the last two bytes of an IPv4 address
#[must_use]
pub fn override_key(addr: IpAddr) -> KString {
    match addr {
        IpAddr::V4(v4) => {
            let [_, _, b2, b3] = v4.octets();
            KString::from(format!("{b2}.{b3}"))
        }
        IpAddr::V6(v6) => {
            let o = v6.octets();
            KString::from(format!("{}.{}", o[14], o[15]))
        }
    }
}
