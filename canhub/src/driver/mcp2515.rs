//! MCP2515 stand-alone controller attached over SPI.
//!
//! The chip latches up to two received frames. Its interrupt line only tells
//! us that something happened, so the handler defers all SPI traffic to the
//! hub worker which then drains the chip through [`Driver::rx_poll`].

use std::sync::Arc;

use can_format::{BusName, Frame, FrameFormat, MAX_DLC};

use crate::bus::CanBus;
use crate::driver::{BusMode, Driver, Speed, TxAttempt};
use crate::error::{DriverError, HwError};
use crate::hub::{HubQueue, WorkItem};
use crate::hw::SpiDevice;
use crate::stats::BusStats;

pub(crate) mod cmd {
    pub const RESET: u8 = 0xc0;
    pub const READ: u8 = 0x03;
    pub const WRITE: u8 = 0x02;
    pub const BIT_MODIFY: u8 = 0x05;
    pub const READ_STATUS: u8 = 0xa0;
    pub const LOAD_TX_BUFFER: u8 = 0x40;
    pub const REQUEST_TO_SEND: u8 = 0x80;
    pub const READ_RX_BUFFER: u8 = 0x90;
}

pub(crate) mod reg {
    pub const BFPCTRL: u8 = 0x0c;
    pub const CANSTAT: u8 = 0x0e;
    pub const CANCTRL: u8 = 0x0f;
    pub const TEC: u8 = 0x1c;
    pub const REC: u8 = 0x1d;
    pub const CNF3: u8 = 0x28;
    pub const CANINTE: u8 = 0x2b;
    pub const CANINTF: u8 = 0x2c;
    pub const EFLG: u8 = 0x2d;
    pub const RXB0CTRL: u8 = 0x60;
}

pub(crate) mod mode {
    pub const NORMAL: u8 = 0x00;
    pub const SLEEP: u8 = 0x20;
    pub const LISTEN: u8 = 0x60;
    pub const CONFIG: u8 = 0x80;
    pub const MASK: u8 = 0xe0;

    /// Abort pending transmissions.
    pub const ABORT: u8 = 0x10;
    pub const ONE_SHOT: u8 = 0x08;
}

/// CANINTF bits.
pub(crate) mod intf {
    pub const RX0: u8 = 0x01;
    pub const RX1: u8 = 0x02;
    pub const TX0: u8 = 0x04;
    pub const ERROR: u8 = 0x20;
    pub const MESSAGE_ERROR: u8 = 0x80;
}

/// EFLG bits.
pub(crate) mod eflg {
    pub const RX0_OVERFLOW: u8 = 0x40;
    pub const RX1_OVERFLOW: u8 = 0x80;
}

/// TXREQ bits of the three transmit buffers as reported by READ STATUS.
const TX_PENDING: [u8; 3] = [0x04, 0x10, 0x40];

const RX_RECORD_LEN: usize = 13;
const EXTENDED_FLAG: u8 = 0x08;

/// CNF3, CNF2, CNF1 for a 16 MHz crystal.
fn bit_timing(speed: Speed) -> [u8; 3] {
    match speed {
        Speed::Kbps100 => [0x87, 0xfa, 0x03],
        Speed::Kbps125 => [0x86, 0xf0, 0x03],
        Speed::Kbps250 => [0x85, 0xf1, 0x41],
        Speed::Kbps500 => [0x86, 0xf0, 0x00],
        Speed::Kbps1000 => [0x82, 0xd0, 0x00],
    }
}

/// SIDH, SIDL, EID8, EID0 register image of an identifier.
pub(crate) fn encode_id(id: u32, format: FrameFormat) -> [u8; 4] {
    match format {
        FrameFormat::Standard => [(id >> 3) as u8, (id << 5) as u8, 0, 0],
        FrameFormat::Extended => [
            (id >> 21) as u8,
            ((id >> 13) & 0xe0) as u8 | ((id >> 16) & 0x03) as u8 | EXTENDED_FLAG,
            (id >> 8) as u8,
            id as u8,
        ],
    }
}

pub(crate) fn decode_id(raw: &[u8]) -> (u32, FrameFormat) {
    let [sidh, sidl, eid8, eid0] = [raw[0], raw[1], raw[2], raw[3]].map(u32::from);
    if raw[1] & EXTENDED_FLAG != 0 {
        let id = (sidh << 21) | ((sidl & 0xe0) << 13) | ((sidl & 0x03) << 16) | (eid8 << 8) | eid0;
        (id, FrameFormat::Extended)
    } else {
        ((sidh << 3) | (sidl >> 5), FrameFormat::Standard)
    }
}

/// Decode an RX buffer image (id, dlc, 8 data bytes). `None` if the DLC is
/// out of range.
pub(crate) fn decode_rx_record(record: &[u8], origin: Option<BusName>) -> Option<Frame> {
    let (id, format) = decode_id(&record[..4]);
    let dlc = usize::from(record[4] & 0x0f);
    if dlc > MAX_DLC {
        return None;
    }
    Frame::new(origin, id, format, &record[5..5 + dlc]).ok()
}

enum Received {
    Nothing,
    Frame(Frame),
    Malformed,
}

pub struct Mcp2515Driver<S> {
    spi: S,
}

impl<S: SpiDevice> Mcp2515Driver<S> {
    pub fn new(spi: S) -> Mcp2515Driver<S> {
        Mcp2515Driver { spi }
    }

    /// Clock out `header`, then read `response.len()` bytes.
    fn read(&mut self, header: &[u8], response: &mut [u8]) -> Result<(), HwError> {
        let len = header.len() + response.len();
        let mut tx = [0u8; 16];
        let mut rx = [0u8; 16];
        tx[..header.len()].copy_from_slice(header);
        self.spi.transaction(&tx[..len], &mut rx[..len])?;
        response.copy_from_slice(&rx[header.len()..len]);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), HwError> {
        let mut rx = [0u8; 16];
        self.spi.transaction(bytes, &mut rx[..bytes.len()])
    }

    fn write_registers(&mut self, address: u8, values: &[u8]) -> Result<(), HwError> {
        let mut tx = [0u8; 16];
        tx[0] = cmd::WRITE;
        tx[1] = address;
        tx[2..2 + values.len()].copy_from_slice(values);
        self.send(&tx[..2 + values.len()])
    }

    fn bit_modify(&mut self, address: u8, mask: u8, value: u8) -> Result<(), HwError> {
        self.send(&[cmd::BIT_MODIFY, address, mask, value])
    }

    fn read_status(&mut self) -> Result<u8, HwError> {
        let mut status = [0u8];
        self.read(&[cmd::READ_STATUS], &mut status)?;
        Ok(status[0])
    }

    fn expect_mode(&mut self, expected: u8, requested: &'static str) -> Result<(), DriverError> {
        let mut status = [0u8];
        self.read(&[cmd::READ, reg::CANSTAT], &mut status)?;
        if status[0] & mode::MASK != expected {
            return Err(DriverError::NotAcknowledged {
                requested,
                status: status[0],
            });
        }
        Ok(())
    }

    fn free_tx_buffer(status: u8) -> Option<usize> {
        TX_PENDING.iter().position(|pending| status & pending == 0)
    }

    /// Handle one round of pending interrupt flags.
    fn poll_once(&mut self, origin: &BusName, stats: &BusStats) -> Result<Received, HwError> {
        let mut flags = [0u8; 2];
        self.read(&[cmd::READ, reg::CANINTF], &mut flags)?;
        let [intstat, errflag] = flags;

        let rx_buffer = if intstat & intf::RX0 != 0 {
            Some(cmd::READ_RX_BUFFER)
        } else if intstat & intf::RX1 != 0 {
            Some(cmd::READ_RX_BUFFER | 0x04)
        } else {
            None
        };

        let mut received = Received::Nothing;
        if let Some(command) = rx_buffer {
            // Reading through READ RX BUFFER clears the buffer's RXnIF.
            let mut record = [0u8; RX_RECORD_LEN];
            self.read(&[command], &mut record)?;
            received = match decode_rx_record(&record, Some(origin.clone())) {
                Some(frame) => Received::Frame(frame),
                None => Received::Malformed,
            };
        }

        let error_bits = intstat & (intf::MESSAGE_ERROR | intf::ERROR);
        if error_bits != 0 {
            if errflag & eflg::RX1_OVERFLOW != 0 {
                stats.count_rx_overflow();
                log::warn!("{}: receive overflow, frame lost", origin);
            }
            if errflag & eflg::RX0_OVERFLOW != 0 {
                // Rolled over into RXB1, nothing lost.
                stats.count_rx_overflow();
            }

            let mut counters = [0u8; 2];
            self.read(&[cmd::READ, reg::TEC], &mut counters)?;
            let [tec, rec] = counters;
            stats.record_errors(
                u32::from(error_bits) << 8 | u32::from(errflag),
                rec.into(),
                tec.into(),
            );
            self.bit_modify(reg::EFLG, eflg::RX0_OVERFLOW | eflg::RX1_OVERFLOW, 0)?;
        }

        let others = intstat & !(intf::RX0 | intf::RX1);
        if others != 0 {
            self.bit_modify(reg::CANINTF, others, 0)?;
        }

        Ok(received)
    }
}

impl<S: SpiDevice> Driver for Mcp2515Driver<S> {
    fn start(&mut self, bus_mode: BusMode, speed: Speed) -> Result<(), DriverError> {
        self.send(&[cmd::RESET])?;

        self.write_registers(reg::CANCTRL, &[mode::CONFIG | mode::ABORT | mode::ONE_SHOT])?;
        self.expect_mode(mode::CONFIG, "configuration")?;

        // Receive everything, roll RXB0 over into RXB1.
        self.write_registers(reg::RXB0CTRL, &[0x64])?;
        self.write_registers(reg::CANINTE, &[0xff])?;
        self.write_registers(reg::BFPCTRL, &[0x0c])?;
        self.write_registers(reg::CNF3, &bit_timing(speed))?;

        let (opmode, requested) = match bus_mode {
            BusMode::Active => (mode::NORMAL, "normal"),
            BusMode::Listen => (mode::LISTEN, "listen-only"),
        };
        self.write_registers(reg::CANCTRL, &[opmode])?;
        self.expect_mode(opmode, requested)
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.send(&[cmd::RESET])?;
        self.write_registers(reg::BFPCTRL, &[0x3c])?;
        self.write_registers(reg::CANCTRL, &[mode::SLEEP | mode::ABORT])?;
        self.expect_mode(mode::SLEEP, "sleep")
    }

    fn tx_ready(&mut self) -> Result<bool, DriverError> {
        let status = self.read_status()?;
        Ok(Self::free_tx_buffer(status).is_some())
    }

    fn transmit(&mut self, frame: &Frame) -> Result<TxAttempt, DriverError> {
        let status = self.read_status()?;
        let buffer = match Self::free_tx_buffer(status) {
            Some(buffer) => buffer as u8,
            None => return Ok(TxAttempt::Busy),
        };

        let mut load = [0u8; 14];
        load[0] = cmd::LOAD_TX_BUFFER | (buffer << 1);
        load[1..5].copy_from_slice(&encode_id(frame.id(), frame.format()));
        load[5] = frame.dlc();
        load[6..6 + frame.data().len()].copy_from_slice(frame.data());
        self.send(&load)?;
        self.send(&[cmd::REQUEST_TO_SEND | (1 << buffer)])?;

        Ok(TxAttempt::Accepted)
    }

    fn rx_poll(&mut self, origin: &BusName, stats: &BusStats) -> Option<Frame> {
        loop {
            match self.poll_once(origin, stats) {
                Ok(Received::Frame(frame)) => return Some(frame),
                Ok(Received::Malformed) => {
                    log::debug!("{}: dropping frame with invalid length", origin);
                }
                Ok(Received::Nothing) => return None,
                Err(e) => {
                    log::warn!("{}: polling controller failed: {}", origin, e);
                    return None;
                }
            }
        }
    }
}

/// Interrupt line handler. Never touches SPI.
pub struct Mcp2515Interrupt {
    bus: Arc<CanBus>,
    queue: HubQueue,
}

impl Mcp2515Interrupt {
    pub fn new(bus: Arc<CanBus>, queue: HubQueue) -> Mcp2515Interrupt {
        Mcp2515Interrupt { bus, queue }
    }

    pub fn handle(&self) {
        self.bus.stats().count_interrupt();
        self.queue.push(WorkItem::RxCallback(self.bus.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::virt::VirtualMcp2515;

    #[test]
    fn id_encoding() {
        assert_eq!(encode_id(0x123, FrameFormat::Standard), [0x24, 0x60, 0, 0]);
        assert_eq!(
            encode_id(0x18daf110, FrameFormat::Extended),
            [0xc6, 0xca, 0xf1, 0x10]
        );
        assert_eq!(decode_id(&[0xc6, 0xca, 0xf1, 0x10]), (0x18daf110, FrameFormat::Extended));
        assert_eq!(decode_id(&[0x24, 0x60, 0, 0]), (0x123, FrameFormat::Standard));
        assert_eq!(
            decode_id(&encode_id(0x1fff_ffff, FrameFormat::Extended)),
            (0x1fff_ffff, FrameFormat::Extended)
        );
        assert_eq!(
            decode_id(&encode_id(0x7ff, FrameFormat::Standard)),
            (0x7ff, FrameFormat::Standard)
        );
    }

    #[test]
    fn start_programs_timing_and_mode() {
        let chip = VirtualMcp2515::new();
        let mut driver = Mcp2515Driver::new(chip.clone());
        driver.start(BusMode::Listen, Speed::Kbps250).unwrap();
        assert_eq!(chip.register(reg::CNF3), 0x85);
        assert_eq!(chip.register(reg::CNF3 + 1), 0xf1);
        assert_eq!(chip.register(reg::CNF3 + 2), 0x41);
        assert_eq!(chip.register(reg::CANSTAT) & mode::MASK, mode::LISTEN);
        assert_eq!(chip.register(reg::CANINTE), 0xff);

        driver.stop().unwrap();
        assert_eq!(chip.register(reg::CANSTAT) & mode::MASK, mode::SLEEP);
    }

    #[test]
    fn unacknowledged_mode_is_reported() {
        let chip = VirtualMcp2515::new();
        chip.refuse_mode_changes(true);
        let mut driver = Mcp2515Driver::new(chip);
        assert!(matches!(
            driver.start(BusMode::Active, Speed::Kbps500),
            Err(DriverError::NotAcknowledged { requested: "normal", status: 0x80 })
        ));
    }

    #[test]
    fn transmit_uses_free_buffers_until_busy() {
        let chip = VirtualMcp2515::new();
        chip.hold_transmissions(true);
        let mut driver = Mcp2515Driver::new(chip.clone());
        driver.start(BusMode::Active, Speed::Kbps500).unwrap();

        let frame = Frame::extended(0x18daf110, &[0x02, 0x10, 0x03]).unwrap();
        for _ in 0..3 {
            assert_eq!(driver.transmit(&frame).unwrap(), TxAttempt::Accepted);
        }
        assert!(!driver.tx_ready().unwrap());
        assert_eq!(driver.transmit(&frame).unwrap(), TxAttempt::Busy);

        chip.release_transmissions();
        assert!(driver.tx_ready().unwrap());
        assert_eq!(chip.transmitted(), vec![frame.clone(), frame.clone(), frame]);
    }

    #[test]
    fn rx_poll_drains_both_buffers() {
        let chip = VirtualMcp2515::new();
        let mut driver = Mcp2515Driver::new(chip.clone());
        driver.start(BusMode::Active, Speed::Kbps500).unwrap();

        let first = Frame::standard(0x7e8, &[0x03, 0x41, 0x0d, 0x32]).unwrap();
        let second = Frame::extended(0x18daf110, &[]).unwrap();
        assert!(chip.inject(&first));
        assert!(chip.inject(&second));
        assert!(chip.interrupt_pending());

        let origin = BusName::new("can2");
        let stats = BusStats::new();
        assert_eq!(
            driver.rx_poll(&origin, &stats),
            Some(first.with_origin(origin.clone()))
        );
        assert_eq!(
            driver.rx_poll(&origin, &stats),
            Some(second.with_origin(origin.clone()))
        );
        assert_eq!(driver.rx_poll(&origin, &stats), None);
        assert!(!chip.interrupt_pending());
        assert!(!stats.take_error_pending());
    }

    #[test]
    fn rx_overflow_is_counted() {
        let chip = VirtualMcp2515::new();
        let mut driver = Mcp2515Driver::new(chip.clone());
        driver.start(BusMode::Active, Speed::Kbps500).unwrap();

        let frame = Frame::standard(0x100, &[1]).unwrap();
        assert!(chip.inject(&frame));
        assert!(chip.inject(&frame));
        assert!(!chip.inject(&frame));

        let origin = BusName::new("can2");
        let stats = BusStats::new();
        let mut received = 0;
        while driver.rx_poll(&origin, &stats).is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
        let status = stats.snapshot();
        assert_eq!(status.rx_overflow, 1);
        assert_eq!(status.error_flags, 0x2080);
        assert!(stats.take_error_pending());
        assert_eq!(chip.register(reg::EFLG), 0);
        assert!(!chip.interrupt_pending());
    }
}
