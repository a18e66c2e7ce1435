pub mod mcp2515;
pub mod onchip;

use std::fmt;
use std::str::FromStr;

use can_format::{BusName, Frame};
use serde::Deserialize;

use crate::error::{ControlError, DriverError};
use crate::stats::BusStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusMode {
    /// Receive only, never acknowledge or transmit.
    Listen,
    Active,
}

impl fmt::Display for BusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusMode::Listen => "listen",
            BusMode::Active => "active",
        })
    }
}

impl FromStr for BusMode {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listen" => Ok(BusMode::Listen),
            "active" => Ok(BusMode::Active),
            other => Err(ControlError::UnsupportedMode(other.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Speed {
    Kbps100,
    Kbps125,
    Kbps250,
    Kbps500,
    Kbps1000,
}

impl Speed {
    pub fn from_bps(bps: u32) -> Option<Speed> {
        match bps {
            100_000 => Some(Speed::Kbps100),
            125_000 => Some(Speed::Kbps125),
            250_000 => Some(Speed::Kbps250),
            500_000 => Some(Speed::Kbps500),
            1_000_000 => Some(Speed::Kbps1000),
            _ => None,
        }
    }

    pub fn bps(self) -> u32 {
        match self {
            Speed::Kbps100 => 100_000,
            Speed::Kbps125 => 125_000,
            Speed::Kbps250 => 250_000,
            Speed::Kbps500 => 500_000,
            Speed::Kbps1000 => 1_000_000,
        }
    }
}

/// Result of handing a frame to the hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxAttempt {
    /// Loaded into a transmit buffer.
    Accepted,
    /// Every transmit buffer is occupied.
    Busy,
}

/// Hardware specific half of a bus. [`crate::bus::CanBus`] owns one of
/// these and wraps it with statistics, power state, the deferred transmit
/// queue and logging.
pub trait Driver: Send {
    /// Program bit timing for `speed`, enter `mode` and enable interrupts.
    fn start(&mut self, mode: BusMode, speed: Speed) -> Result<(), DriverError>;

    /// Disable the controller and power down the transceiver.
    fn stop(&mut self) -> Result<(), DriverError>;

    fn tx_ready(&mut self) -> Result<bool, DriverError>;

    fn transmit(&mut self, frame: &Frame) -> Result<TxAttempt, DriverError>;

    /// Fetch the next pending received frame, if the hardware delivers
    /// frames by polling. Also folds the controller's error state into
    /// `stats`.
    fn rx_poll(&mut self, origin: &BusName, stats: &BusStats) -> Option<Frame>;
}
