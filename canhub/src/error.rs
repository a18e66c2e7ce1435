use can_format::{BusName, FrameError};
use thiserror::Error;

/// Failure talking to the hardware behind a driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HwError {
    #[error("SPI transfer failed: {0}")]
    Spi(String),

    #[error("Controller did not respond")]
    NoResponse,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Hardware Error: {0}")]
    Hardware(#[from] HwError),

    #[error("Controller did not acknowledge {requested} mode (status {status:#04x})")]
    NotAcknowledged { requested: &'static str, status: u8 },

    #[error("Bus {0} is not powered on")]
    NotRunning(BusName),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid filter {0:?}")]
    Invalid(String),

    #[error("At most {0} filters are supported")]
    TooMany(usize),
}

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Cannot open log path '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Errors surfaced to the operator-facing control surface.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Cannot find named CAN bus {0}")]
    NoSuchBus(String),

    #[error("Unrecognised speed {0} (100000, 125000, 250000, 500000, 1000000 are accepted)")]
    UnsupportedSpeed(u32),

    #[error("Unrecognised mode {0:?} (listen, active)")]
    UnsupportedMode(String),

    #[error("Can bus {0} is not powered on")]
    NotPoweredOn(String),

    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Driver Error: {0}")]
    Driver(#[from] DriverError),

    #[error("Frame was rejected, TX queue is full")]
    Rejected,

    #[error("Logger of type '{0}' still running, please stop first")]
    LoggerRunning(String),

    #[error("Cannot create logger of type '{0}'")]
    UnknownLoggerType(String),

    #[error("No path specified")]
    NoPath,

    #[error("Logger Error: {0}")]
    Logger(#[from] LoggerError),

    #[error("Filter Error: {0}")]
    Filter(#[from] FilterError),

    #[error("CAN logging inactive")]
    NoLogger,
}
