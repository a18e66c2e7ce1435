use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::frame::{BusName, Frame};

/// Capture time, seconds and microseconds since the unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub secs: u64,
    pub micros: u32,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            secs: elapsed.as_secs(),
            micros: elapsed.subsec_micros(),
        }
    }

    pub fn from_micros(micros: u64) -> Timestamp {
        Timestamp {
            secs: micros / 1_000_000,
            micros: (micros % 1_000_000) as u32,
        }
    }

    pub fn as_micros(&self) -> u64 {
        self.secs
            .wrapping_mul(1_000_000)
            .wrapping_add(self.micros as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

/// Point-in-time copy of a bus' statistics counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStatus {
    pub interrupts: u32,
    pub packets_rx: u32,
    pub packets_tx: u32,
    pub errors_rx: u32,
    pub errors_tx: u32,
    pub rx_overflow: u32,
    pub tx_overflow: u32,
    pub tx_delay: u32,
    pub error_flags: u32,
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "intr={} rxpkt={} txpkt={} errflags={:#x} rxerr={} txerr={} rxovr={} txovr={} txdelay={}",
            self.interrupts,
            self.packets_rx,
            self.packets_tx,
            self.error_flags,
            self.errors_rx,
            self.errors_tx,
            self.rx_overflow,
            self.tx_overflow,
            self.tx_delay
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Error,
    Statistics,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfoKind {
    Comment,
    Config,
    Event,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntry {
    Rx(Frame),
    Tx(Frame),
    TxQueue(Frame),
    TxFail(Frame),
    Status(StatusKind, BusStatus),
    Info(InfoKind, String),
}

impl LogEntry {
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            LogEntry::Rx(frame)
            | LogEntry::Tx(frame)
            | LogEntry::TxQueue(frame)
            | LogEntry::TxFail(frame) => Some(frame),
            LogEntry::Status(..) | LogEntry::Info(..) => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            LogEntry::Rx(_) => "rx",
            LogEntry::Tx(_) => "tx",
            LogEntry::TxQueue(_) => "txq",
            LogEntry::TxFail(_) => "txfail",
            LogEntry::Status(StatusKind::Error, _) => "error",
            LogEntry::Status(StatusKind::Statistics, _) => "stats",
            LogEntry::Info(InfoKind::Comment, _) => "comment",
            LogEntry::Info(InfoKind::Config, _) => "config",
            LogEntry::Info(InfoKind::Event, _) => "event",
        }
    }
}

/// One event handed to the active logger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMessage {
    pub origin: Option<BusName>,
    pub timestamp: Timestamp,
    pub entry: LogEntry,
}

impl LogMessage {
    pub fn new(origin: Option<BusName>, entry: LogEntry) -> LogMessage {
        LogMessage {
            origin,
            timestamp: Timestamp::now(),
            entry,
        }
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = self.origin.as_ref().map(BusName::as_str).unwrap_or("-");
        write!(f, "{} {} {}", self.timestamp, origin, self.entry.tag())?;
        match &self.entry {
            LogEntry::Rx(frame)
            | LogEntry::Tx(frame)
            | LogEntry::TxQueue(frame)
            | LogEntry::TxFail(frame) => write!(f, " {}", frame),
            LogEntry::Status(_, status) => write!(f, " {}", status),
            LogEntry::Info(_, text) => write!(f, " {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_micros() {
        let ts = Timestamp::from_micros(3_000_042);
        assert_eq!(ts, Timestamp { secs: 3, micros: 42 });
        assert_eq!(ts.as_micros(), 3_000_042);
        assert_eq!(ts.to_string(), "3.000042");
    }

    #[test]
    fn display_frame_message() {
        let frame = Frame::standard(0x100, &[1, 2]).unwrap();
        let message = LogMessage {
            origin: Some(BusName::new("can2")),
            timestamp: Timestamp { secs: 1, micros: 5 },
            entry: LogEntry::Tx(frame),
        };
        assert_eq!(message.to_string(), "1.000005 can2 tx 100 S [2] 01 02");
    }
}
