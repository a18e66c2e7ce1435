//! Operations an operator shell issues against the core.

use std::sync::Arc;
use std::time::Duration;

use can_format::{Frame, FrameFormat};
use parking_lot::Mutex;

use crate::bus::{BusReport, CanBus, PowerMode, WriteOutcome};
use crate::driver::{BusMode, Speed};
use crate::error::{ControlError, LoggerError};
use crate::hub::Hub;
use crate::logger::filter::FilterSet;
use crate::logger::{LoggerRegistry, LoggerStats, LOGGER_CLOSE_GRACE};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggerStatus {
    pub info: String,
    pub stats: LoggerStats,
}

enum Reconfigure {
    /// Same logger, new filters.
    Done,
    /// Same logger moved to a different path.
    Reopened,
    /// Reopening failed, the closed logger has to go.
    Failed(LoggerError),
    Create,
}

pub struct Control {
    hub: Arc<Hub>,
    loggers: LoggerRegistry,
}

impl Control {
    pub fn new(hub: Arc<Hub>, loggers: LoggerRegistry) -> Control {
        Control { hub, loggers }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    fn bus(&self, name: &str) -> Result<Arc<CanBus>, ControlError> {
        self.hub
            .find_bus(name)
            .ok_or_else(|| ControlError::NoSuchBus(name.to_owned()))
    }

    fn running_bus(&self, name: &str) -> Result<Arc<CanBus>, ControlError> {
        let bus = self.bus(name)?;
        if !bus.is_running() {
            return Err(ControlError::NotPoweredOn(name.to_owned()));
        }
        Ok(bus)
    }

    pub fn bus_start(&self, bus: &str, mode: &str, bps: u32) -> Result<(), ControlError> {
        let bus = self.bus(bus)?;
        let mode: BusMode = mode.parse()?;
        let speed = Speed::from_bps(bps).ok_or(ControlError::UnsupportedSpeed(bps))?;
        bus.start(mode, speed)?;
        Ok(())
    }

    pub fn bus_stop(&self, bus: &str) -> Result<(), ControlError> {
        self.bus(bus)?.stop()?;
        Ok(())
    }

    pub fn set_power_mode(&self, bus: &str, mode: PowerMode) -> Result<(), ControlError> {
        self.bus(bus)?.set_power_mode(mode)?;
        Ok(())
    }

    /// Send a frame, never waiting for room in the deferred queue.
    pub async fn transmit(
        &self,
        bus: &str,
        id: u32,
        extended: bool,
        data: &[u8],
    ) -> Result<WriteOutcome, ControlError> {
        let bus = self.running_bus(bus)?;
        let frame = Frame::new(None, id, format(extended), data)?;
        match bus.write(&frame, Duration::ZERO).await? {
            WriteOutcome::Rejected => Err(ControlError::Rejected),
            outcome => Ok(outcome),
        }
    }

    /// Pretend `bus` received a frame.
    pub fn inject_receive(
        &self,
        bus: &str,
        id: u32,
        extended: bool,
        data: &[u8],
    ) -> Result<(), ControlError> {
        let bus = self.running_bus(bus)?;
        let frame = Frame::new(Some(bus.name().clone()), id, format(extended), data)?;
        self.hub.incoming_frame(frame);
        Ok(())
    }

    /// Report a bus, also recording the snapshot with the active logger.
    pub fn bus_status(&self, bus: &str) -> Result<BusReport, ControlError> {
        let bus = self.bus(bus)?;
        bus.log_status(can_format::StatusKind::Statistics);
        Ok(bus.status())
    }

    /// Start logging to `type_name`, or reconfigure the running logger of
    /// that type.
    pub async fn logger_configure<S: AsRef<str>>(
        &self,
        type_name: &str,
        path: Option<&str>,
        filters: &[S],
    ) -> Result<(), ControlError> {
        let filter = FilterSet::parse(filters)?;

        let action = match self.hub.logger() {
            None => Reconfigure::Create,
            Some(current) => {
                let mut logger = current.lock();
                if logger.type_name() != type_name {
                    return Err(ControlError::LoggerRunning(logger.type_name().to_owned()));
                }
                if logger.needs_path() && path.is_none() {
                    return Err(ControlError::NoPath);
                }
                logger.set_filter(filter.clone());
                if logger.needs_path() && logger.path() != path {
                    // Statistics carry over to the new path.
                    logger.close();
                    match logger.open(path) {
                        Ok(()) => Reconfigure::Reopened,
                        Err(e) => Reconfigure::Failed(e),
                    }
                } else {
                    Reconfigure::Done
                }
            }
        };
        match action {
            Reconfigure::Done => {
                log::info!("CAN logging filter now {}", filter);
                return Ok(());
            }
            Reconfigure::Reopened => {
                if let Some(logger) = self.hub.logger() {
                    log::info!("CAN logging moved: {}", logger.lock().get_info());
                }
                return Ok(());
            }
            Reconfigure::Failed(e) => {
                self.hub.unset_logger();
                return Err(e.into());
            }
            Reconfigure::Create => {}
        }

        let mut logger = self
            .loggers
            .instantiate(type_name)
            .ok_or_else(|| ControlError::UnknownLoggerType(type_name.to_owned()))?;
        if logger.needs_path() && path.is_none() {
            return Err(ControlError::NoPath);
        }
        logger.set_filter(filter);
        logger.open(path)?;
        log::info!("CAN logging active: {}", logger.get_info());
        self.hub.set_logger(Arc::new(Mutex::new(logger)));
        Ok(())
    }

    /// Unset the active logger, wait out the grace period and close it.
    async fn detach_logger(&self) -> Option<LoggerStats> {
        let logger = self.hub.unset_logger()?;
        tokio::time::sleep(LOGGER_CLOSE_GRACE).await;
        let mut logger = logger.lock();
        logger.close();
        Some(logger.get_stats())
    }

    pub async fn logger_stop(&self) -> Result<LoggerStats, ControlError> {
        let stats = self.detach_logger().await.ok_or(ControlError::NoLogger)?;
        log::info!("CAN logging stopped: {}", stats);
        Ok(stats)
    }

    pub fn logger_status(&self) -> Result<LoggerStatus, ControlError> {
        let logger = self.hub.logger().ok_or(ControlError::NoLogger)?;
        let logger = logger.lock();
        Ok(LoggerStatus {
            info: logger.get_info(),
            stats: logger.get_stats(),
        })
    }

    pub fn logger_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.loggers.type_names()
    }
}

fn format(extended: bool) -> FrameFormat {
    if extended {
        FrameFormat::Extended
    } else {
        FrameFormat::Standard
    }
}
