//! Hardware access capabilities the drivers are written against.

pub mod virt;

use crate::driver::{BusMode, Speed};
use crate::error::HwError;

/// Interrupt register bits of a PeliCAN style on-chip controller.
pub mod irq {
    pub const RECEIVE: u8 = 0x01;
    pub const TRANSMIT: u8 = 0x02;
    pub const ERROR_WARNING: u8 = 0x04;
    pub const DATA_OVERRUN: u8 = 0x08;
    pub const WAKE_UP: u8 = 0x10;
    pub const ERROR_PASSIVE: u8 = 0x20;
    pub const ARBITRATION_LOST: u8 = 0x40;
    pub const BUS_ERROR: u8 = 0x80;

    pub const ERRORS: u8 =
        ERROR_WARNING | DATA_OVERRUN | ERROR_PASSIVE | ARBITRATION_LOST | BUS_ERROR;
}

/// Frame information byte layout of the on-chip controller's mailboxes.
pub mod fir {
    pub const EXTENDED: u8 = 0x80;
    pub const REMOTE: u8 = 0x40;
    pub const DLC_MASK: u8 = 0x0f;
}

/// Contents of the on-chip receive mailbox.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxMailbox {
    pub info: u8,
    pub id: u32,
    pub data: [u8; 8],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorRegisters {
    pub status: u8,
    /// Error code capture.
    pub ecc: u8,
    pub rx_errors: u8,
    pub tx_errors: u8,
}

/// Register level access to a memory mapped controller.
///
/// Methods take `&self` because the interrupt handler and the driver share
/// the controller; implementations serialise register access themselves.
pub trait OnChipController: Send + Sync {
    /// Program acceptance, bit timing and the listen-only flag. Only valid
    /// in reset mode.
    fn configure(&self, mode: BusMode, speed: Speed) -> Result<(), HwError>;

    fn set_reset_mode(&self, reset: bool);

    fn in_reset_mode(&self) -> bool;

    fn set_transceiver(&self, enabled: bool) -> Result<(), HwError>;

    /// Read and clear the interrupt register.
    fn take_interrupts(&self) -> u8;

    fn tx_buffer_free(&self) -> bool;

    fn load_tx(&self, info: u8, id: u32, data: &[u8]);

    fn request_transmission(&self);

    fn read_rx(&self) -> RxMailbox;

    fn release_rx(&self);

    fn error_registers(&self) -> ErrorRegisters;

    fn clear_data_overrun(&self);
}

/// Full duplex SPI link to an external controller. `rx` receives exactly
/// as many bytes as `tx` sends.
pub trait SpiDevice: Send {
    fn transaction(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), HwError>;
}
