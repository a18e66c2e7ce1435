use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use can_format::{BusName, BusStatus, Frame, InfoKind, StatusKind};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::driver::{BusMode, Driver, Speed, TxAttempt};
use crate::error::{ControlError, DriverError};
use crate::logger::{Direction, LogDispatch};
use crate::stats::BusStats;

pub const TX_QUEUE_CAPACITY: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    On,
    Sleep,
    DeepSleep,
    Off,
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerMode::On => "on",
            PowerMode::Sleep => "sleep",
            PowerMode::DeepSleep => "deepsleep",
            PowerMode::Off => "off",
        })
    }
}

impl FromStr for PowerMode {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(PowerMode::On),
            "sleep" => Ok(PowerMode::Sleep),
            "deepsleep" => Ok(PowerMode::DeepSleep),
            "off" => Ok(PowerMode::Off),
            other => Err(ControlError::UnsupportedMode(other.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Handed to the hardware.
    Sent,
    /// Parked in the deferred transmit queue.
    Queued,
    /// Hardware and deferred queue were both full. The frame is gone.
    Rejected,
}

struct BusState {
    power: PowerMode,
    /// Last successful `start`, reused when powering back on.
    config: Option<(BusMode, Speed)>,
}

/// One physical interface: a driver plus everything that is the same for
/// every kind of hardware.
pub struct CanBus {
    name: BusName,
    driver: Mutex<Box<dyn Driver>>,
    stats: BusStats,
    state: Mutex<BusState>,
    tx_sender: mpsc::Sender<Frame>,
    tx_queue: Mutex<mpsc::Receiver<Frame>>,
    logging: LogDispatch,
}

impl CanBus {
    pub fn new(name: BusName, driver: Box<dyn Driver>, logging: LogDispatch) -> CanBus {
        let (tx_sender, tx_queue) = mpsc::channel(TX_QUEUE_CAPACITY);
        CanBus {
            name,
            driver: Mutex::new(driver),
            stats: BusStats::new(),
            state: Mutex::new(BusState {
                power: PowerMode::Off,
                config: None,
            }),
            tx_sender,
            tx_queue: Mutex::new(tx_queue),
            logging,
        }
    }

    pub fn name(&self) -> &BusName {
        &self.name
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn power_mode(&self) -> PowerMode {
        self.state.lock().power
    }

    pub fn config(&self) -> Option<(BusMode, Speed)> {
        self.state.lock().config
    }

    pub fn is_running(&self) -> bool {
        self.power_mode() == PowerMode::On
    }

    /// Frames waiting in the deferred transmit queue.
    pub fn deferred(&self) -> usize {
        TX_QUEUE_CAPACITY - self.tx_sender.capacity()
    }

    pub fn start(&self, mode: BusMode, speed: Speed) -> Result<(), DriverError> {
        self.stats.reset();
        self.driver.lock().start(mode, speed)?;
        {
            let mut state = self.state.lock();
            state.config = Some((mode, speed));
            state.power = PowerMode::On;
        }

        log::info!("{}: started in {} mode at {} bps", self.name, mode, speed.bps());
        self.logging.log_info(
            Some(&self.name),
            InfoKind::Event,
            &format!("{} {}", mode, speed.bps()),
        );
        Ok(())
    }

    pub fn stop(&self) -> Result<(), DriverError> {
        self.halt(PowerMode::Off)
    }

    fn halt(&self, mode: PowerMode) -> Result<(), DriverError> {
        self.driver.lock().stop()?;
        self.state.lock().power = mode;

        let mut discarded = 0;
        let mut queue = self.tx_queue.lock();
        while queue.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("{}: discarded {} deferred frames", self.name, discarded);
        }

        log::info!("{}: stopped ({})", self.name, mode);
        self.logging
            .log_info(Some(&self.name), InfoKind::Event, &format!("stopped {}", mode));
        Ok(())
    }

    /// The only way hardware power changes after the initial start.
    pub fn set_power_mode(&self, mode: PowerMode) -> Result<(), DriverError> {
        match mode {
            PowerMode::On => {
                let (power, config) = {
                    let state = self.state.lock();
                    (state.power, state.config)
                };
                match config {
                    Some((bus_mode, speed)) if power != PowerMode::On => {
                        self.start(bus_mode, speed)
                    }
                    _ => Ok(()),
                }
            }
            PowerMode::Sleep | PowerMode::DeepSleep | PowerMode::Off => self.halt(mode),
        }
    }

    /// Send `frame` from this bus. If the hardware is busy the frame waits
    /// up to `timeout` for room in the deferred queue; a zero timeout tries
    /// once.
    pub async fn write(&self, frame: &Frame, timeout: Duration) -> Result<WriteOutcome, DriverError> {
        if !self.is_running() {
            return Err(DriverError::NotRunning(self.name.clone()));
        }
        let frame = frame.clone().with_origin(self.name.clone());

        // Frames already deferred go first.
        if self.deferred() == 0 && self.try_transmit(&frame)? {
            return Ok(WriteOutcome::Sent);
        }

        let queued = if timeout.is_zero() {
            self.tx_sender.try_send(frame.clone()).is_ok()
        } else {
            self.tx_sender.send_timeout(frame.clone(), timeout).await.is_ok()
        };

        if queued {
            self.stats.count_tx_delay();
            self.logging.log_frame(Direction::TxQueue, &frame);
            // The hardware may have drained while we were queueing.
            self.tx_callback();
            Ok(WriteOutcome::Queued)
        } else {
            self.stats.count_tx_overflow();
            self.logging.log_frame(Direction::TxFail, &frame);
            Ok(WriteOutcome::Rejected)
        }
    }

    fn try_transmit(&self, frame: &Frame) -> Result<bool, DriverError> {
        match self.driver.lock().transmit(frame)? {
            TxAttempt::Accepted => {
                self.sent(frame);
                Ok(true)
            }
            TxAttempt::Busy => Ok(false),
        }
    }

    fn sent(&self, frame: &Frame) {
        self.stats.count_tx();
        self.logging.log_frame(Direction::Tx, frame);
    }

    /// Move deferred frames into the hardware while it has room.
    pub fn tx_callback(&self) {
        if !self.is_running() {
            return;
        }
        let mut queue = self.tx_queue.lock();
        let mut driver = self.driver.lock();
        loop {
            match driver.tx_ready() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    log::warn!("{}: cannot query transmit buffers: {}", self.name, e);
                    break;
                }
            }
            let frame = match queue.try_recv() {
                Ok(frame) => frame,
                Err(_) => break,
            };
            match driver.transmit(&frame) {
                Ok(TxAttempt::Accepted) => self.sent(&frame),
                Ok(TxAttempt::Busy) => {
                    self.stats.count_tx_overflow();
                    self.logging.log_frame(Direction::TxFail, &frame);
                    break;
                }
                Err(e) => {
                    log::warn!("{}: deferred transmit failed: {}", self.name, e);
                    self.stats.count_tx_overflow();
                    self.logging.log_frame(Direction::TxFail, &frame);
                }
            }
        }
    }

    pub fn rx_poll(&self) -> Option<Frame> {
        self.driver.lock().rx_poll(&self.name, &self.stats)
    }

    /// Forward a status snapshot to the logger. Error reports are skipped
    /// when nothing changed since the previous one.
    pub fn log_status(&self, kind: StatusKind) {
        if kind == StatusKind::Error && !self.stats.status_changed() {
            return;
        }
        self.logging
            .log_status(&self.name, kind, self.stats.snapshot());
    }

    pub fn status(&self) -> BusReport {
        let state = self.state.lock();
        BusReport {
            name: self.name.clone(),
            power: state.power,
            config: state.config,
            status: self.stats.snapshot(),
            deferred: self.deferred(),
        }
    }
}

/// Operator facing summary of one bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusReport {
    pub name: BusName,
    pub power: PowerMode,
    pub config: Option<(BusMode, Speed)>,
    pub status: BusStatus,
    pub deferred: usize,
}

impl fmt::Display for BusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.status;
        writeln!(f, "CAN:       {}", self.name)?;
        writeln!(f, "Power:     {}", self.power)?;
        match self.config {
            Some((mode, speed)) => {
                writeln!(f, "Mode:      {}", mode)?;
                writeln!(f, "Speed:     {}", speed.bps())?;
            }
            None => writeln!(f, "Mode:      unconfigured")?,
        }
        writeln!(f)?;
        writeln!(f, "Interrupts:{:>20}", s.interrupts)?;
        writeln!(f, "Rx pkt:    {:>20}", s.packets_rx)?;
        writeln!(f, "Rx err:    {:>20}", s.errors_rx)?;
        writeln!(f, "Rx ovrflw: {:>20}", s.rx_overflow)?;
        writeln!(f, "Tx pkt:    {:>20}", s.packets_tx)?;
        writeln!(f, "Tx delays: {:>20}", s.tx_delay)?;
        writeln!(f, "Tx queued: {:>20}", self.deferred)?;
        writeln!(f, "Tx err:    {:>20}", s.errors_tx)?;
        writeln!(f, "Tx ovrflw: {:>20}", s.tx_overflow)?;
        write!(f, "Err flags: {:#010x}", s.error_flags)
    }
}
