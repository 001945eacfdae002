use std::net::SocketAddr;
use std::time::Duration;

use crate::client::connection::ReconnectPolicy;
use crate::core::protocol::{Money, PlayerId};
use crate::core::session::{RoomCode, STARTING_LIVES};

/// Every delay the client works with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub reconnect_delay: Duration,
    /// `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    pub prize_display: Duration,
    pub input_fallback: Duration,
    pub dice_dwell: Duration,
    pub round_dwell: Duration,
    pub tie_dwell: Duration,
    pub frame: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: Some(20),
            prize_display: Duration::from_secs(7),
            input_fallback: Duration::from_secs(10),
            dice_dwell: Duration::from_millis(1500),
            round_dwell: Duration::from_secs(2),
            tie_dwell: Duration::from_secs(3),
            frame: Duration::from_millis(250),
        }
    }
}

impl Timings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy { delay: self.reconnect_delay, max_attempts: self.max_reconnect_attempts }
    }
}

/// Identity the server sees for this client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPlayer {
    pub id: PlayerId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Site origin such as `https://dice.example.com`
    pub origin: String,
    pub room: RoomCode,
    pub local: LocalPlayer,
    pub timings: Timings,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub addr: SocketAddr,
    /// Entry price per seat
    pub stake: Money,
    pub lives: u8,
    pub spin_duration: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            stake: Money::from_units(100),
            lives: STARTING_LIVES,
            spin_duration: Duration::from_secs(7),
        }
    }
}
