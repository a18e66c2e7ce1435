//! CAN bus I/O core: drivers for on-chip and SPI attached controllers, a
//! dispatcher fanning received frames out to listeners, and pluggable
//! loggers writing traffic through `can-format` codecs.

pub mod bus;
pub mod config;
pub mod control;
pub mod devices;
pub mod driver;
pub mod error;
pub mod hub;
pub mod hw;
pub mod logger;
pub mod replay;
pub mod stats;
pub mod util;

pub use bus::{BusReport, CanBus, PowerMode, WriteOutcome};
pub use control::Control;
pub use hub::{Hub, HubBuilder, HubQueue, WorkItem};
