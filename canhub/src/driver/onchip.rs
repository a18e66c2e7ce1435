//! Memory mapped PeliCAN controller with a single transmit buffer.
//!
//! Received frames are captured by the interrupt handler straight out of the
//! receive mailbox and handed to the hub, so [`Driver::rx_poll`] never has
//! anything to return.

use std::sync::Arc;

use can_format::{BusName, Frame, FrameFormat, MAX_DLC};

use crate::bus::CanBus;
use crate::driver::{BusMode, Driver, Speed, TxAttempt};
use crate::error::DriverError;
use crate::hub::{HubQueue, WorkItem};
use crate::hw::{fir, irq, OnChipController, RxMailbox};
use crate::stats::BusStats;

/// Mode register reset bit, reported when a mode change does not stick.
const MODE_RESET: u8 = 0x01;

pub struct OnChipDriver<C: ?Sized> {
    controller: Arc<C>,
}

impl<C: OnChipController + ?Sized> OnChipDriver<C> {
    pub fn new(controller: Arc<C>) -> OnChipDriver<C> {
        OnChipDriver { controller }
    }
}

impl<C: OnChipController + ?Sized> Driver for OnChipDriver<C> {
    fn start(&mut self, mode: BusMode, speed: Speed) -> Result<(), DriverError> {
        self.controller.set_reset_mode(true);
        self.controller.configure(mode, speed)?;
        self.controller.set_transceiver(true)?;
        // Drop anything latched while we were down.
        self.controller.take_interrupts();
        self.controller.set_reset_mode(false);

        if self.controller.in_reset_mode() {
            return Err(DriverError::NotAcknowledged {
                requested: "operating",
                status: MODE_RESET,
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.controller.set_transceiver(false)?;
        self.controller.set_reset_mode(true);

        if !self.controller.in_reset_mode() {
            return Err(DriverError::NotAcknowledged {
                requested: "reset",
                status: 0,
            });
        }
        Ok(())
    }

    fn tx_ready(&mut self) -> Result<bool, DriverError> {
        Ok(self.controller.tx_buffer_free())
    }

    fn transmit(&mut self, frame: &Frame) -> Result<TxAttempt, DriverError> {
        if !self.controller.tx_buffer_free() {
            return Ok(TxAttempt::Busy);
        }
        let info = frame.dlc()
            | match frame.format() {
                FrameFormat::Standard => 0,
                FrameFormat::Extended => fir::EXTENDED,
            };
        self.controller.load_tx(info, frame.id(), frame.data());
        self.controller.request_transmission();
        Ok(TxAttempt::Accepted)
    }

    fn rx_poll(&mut self, _origin: &BusName, _stats: &BusStats) -> Option<Frame> {
        None
    }
}

/// Turn a receive mailbox into a frame. Remote frames and impossible
/// lengths are dropped.
fn capture(mailbox: &RxMailbox, origin: &BusName) -> Option<Frame> {
    if mailbox.info & fir::REMOTE != 0 {
        return None;
    }
    let dlc = usize::from(mailbox.info & fir::DLC_MASK);
    if dlc > MAX_DLC {
        return None;
    }
    let format = if mailbox.info & fir::EXTENDED != 0 {
        FrameFormat::Extended
    } else {
        FrameFormat::Standard
    };
    Frame::new(Some(origin.clone()), mailbox.id, format, &mailbox.data[..dlc]).ok()
}

/// Interrupt handler of the on-chip controller.
///
/// Runs in interrupt context: only reads registers, updates atomics and
/// pushes work items without blocking.
pub struct OnChipInterrupt<C: ?Sized> {
    bus: Arc<CanBus>,
    controller: Arc<C>,
    queue: HubQueue,
}

impl<C: OnChipController + ?Sized> OnChipInterrupt<C> {
    pub fn new(bus: Arc<CanBus>, controller: Arc<C>, queue: HubQueue) -> OnChipInterrupt<C> {
        OnChipInterrupt {
            bus,
            controller,
            queue,
        }
    }

    pub fn handle(&self) {
        let stats = self.bus.stats();
        stats.count_interrupt();
        let interrupts = self.controller.take_interrupts();

        if interrupts & irq::TRANSMIT != 0 {
            self.queue.push(WorkItem::TxCallback(self.bus.clone()));
        }

        if interrupts & irq::RECEIVE != 0 {
            let mailbox = self.controller.read_rx();
            self.controller.release_rx();
            if let Some(frame) = capture(&mailbox, self.bus.name()) {
                self.queue.push(WorkItem::Frame(frame));
            }
        }

        let errors = interrupts & irq::ERRORS;
        if errors != 0 {
            let registers = self.controller.error_registers();
            stats.record_errors(
                u32::from(errors) << 16 | u32::from(registers.status) << 8 | u32::from(registers.ecc),
                registers.rx_errors.into(),
                registers.tx_errors.into(),
            );
            if errors & irq::DATA_OVERRUN != 0 {
                stats.count_rx_overflow();
                self.controller.clear_data_overrun();
            }
            self.queue.push(WorkItem::LogError(self.bus.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::virt::VirtualController;

    #[test]
    fn start_and_stop_drive_reset_mode() {
        let controller = Arc::new(VirtualController::new());
        let mut driver = OnChipDriver::new(controller.clone());

        driver.start(BusMode::Active, Speed::Kbps500).unwrap();
        assert!(!controller.in_reset_mode());
        assert!(controller.transceiver_enabled());
        assert_eq!(
            controller.configuration(),
            Some((BusMode::Active, Speed::Kbps500))
        );

        driver.stop().unwrap();
        assert!(controller.in_reset_mode());
        assert!(!controller.transceiver_enabled());
    }

    #[test]
    fn transceiver_failure_is_reported() {
        let controller = Arc::new(VirtualController::new());
        controller.fail_transceiver(true);
        let mut driver = OnChipDriver::new(controller);
        assert!(matches!(
            driver.start(BusMode::Active, Speed::Kbps125),
            Err(DriverError::Hardware(_))
        ));
    }

    #[test]
    fn single_transmit_buffer() {
        let controller = Arc::new(VirtualController::new());
        controller.hold_transmissions(true);
        let mut driver = OnChipDriver::new(controller.clone());
        driver.start(BusMode::Active, Speed::Kbps500).unwrap();

        let frame = Frame::extended(0x18daf110, &[0x02, 0x01, 0x0c]).unwrap();
        assert_eq!(driver.transmit(&frame).unwrap(), TxAttempt::Accepted);
        assert!(!driver.tx_ready().unwrap());
        assert_eq!(driver.transmit(&frame).unwrap(), TxAttempt::Busy);

        controller.complete_transmission();
        assert!(driver.tx_ready().unwrap());
        assert_eq!(controller.transmitted(), vec![frame]);
    }

    #[test]
    fn capture_drops_malformed_mailboxes() {
        let origin = BusName::new("can1");
        let data = [1, 2, 3, 4, 5, 6, 7, 8];

        let frame = capture(&RxMailbox { info: 0x83, id: 0x18daf110, data }, &origin).unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.origin, Some(origin.clone()));

        assert!(capture(&RxMailbox { info: 0x09, id: 0x100, data }, &origin).is_none());
        assert!(capture(&RxMailbox { info: 0x42, id: 0x100, data }, &origin).is_none());
        assert!(capture(&RxMailbox { info: 0x02, id: 0x800, data }, &origin).is_none());
    }
}
