//! In-memory hardware. Backs buses on hosts without a CAN controller and
//! drives the test suite.

use std::collections::VecDeque;
use std::sync::Arc;

use can_format::{Frame, FrameFormat};
use parking_lot::Mutex;

use crate::driver::mcp2515::{cmd, decode_rx_record, encode_id, intf, mode, reg};
use crate::driver::{BusMode, Speed};
use crate::error::HwError;
use crate::hw::{fir, irq, ErrorRegisters, OnChipController, RxMailbox, SpiDevice};

const RX_FIFO_DEPTH: usize = 64;

#[derive(Default)]
struct ControllerState {
    reset: bool,
    transceiver: bool,
    configured: Option<(BusMode, Speed)>,
    interrupts: u8,
    tx_busy: bool,
    hold_tx: bool,
    pending_tx: Option<RxMailbox>,
    rx_fifo: VecDeque<RxMailbox>,
    transmitted: Vec<Frame>,
    errors: ErrorRegisters,
    fail_transceiver: bool,
}

/// PeliCAN style controller with a receive FIFO and one transmit buffer.
pub struct VirtualController {
    state: Mutex<ControllerState>,
}

impl Default for VirtualController {
    fn default() -> Self {
        VirtualController::new()
    }
}

impl VirtualController {
    pub fn new() -> VirtualController {
        VirtualController {
            state: Mutex::new(ControllerState {
                reset: true,
                ..ControllerState::default()
            }),
        }
    }

    /// A frame arrives from the bus. Ignored while in reset mode.
    pub fn receive(&self, frame: &Frame) {
        let info = frame.dlc()
            | match frame.format() {
                FrameFormat::Standard => 0,
                FrameFormat::Extended => fir::EXTENDED,
            };
        self.receive_raw(info, frame.id(), frame.data());
    }

    /// Put raw mailbox contents into the receive FIFO, including ones no
    /// well behaved controller would produce.
    pub fn receive_raw(&self, info: u8, id: u32, payload: &[u8]) {
        let mut state = self.state.lock();
        if state.reset {
            return;
        }
        if state.rx_fifo.len() >= RX_FIFO_DEPTH {
            state.interrupts |= irq::DATA_OVERRUN;
            return;
        }
        let mut data = [0u8; 8];
        let len = payload.len().min(8);
        data[..len].copy_from_slice(&payload[..len]);
        state.rx_fifo.push_back(RxMailbox { info, id, data });
        state.interrupts |= irq::RECEIVE;
    }

    /// Keep frames in the transmit buffer until [`Self::complete_transmission`].
    pub fn hold_transmissions(&self, hold: bool) {
        self.state.lock().hold_tx = hold;
    }

    pub fn complete_transmission(&self) {
        let mut state = self.state.lock();
        if let Some(mailbox) = state.pending_tx.take() {
            Self::finish_tx(&mut state, mailbox);
        }
    }

    pub fn raise_errors(&self, interrupts: u8, errors: ErrorRegisters) {
        let mut state = self.state.lock();
        state.interrupts |= interrupts & irq::ERRORS;
        state.errors = errors;
    }

    pub fn fail_transceiver(&self, fail: bool) {
        self.state.lock().fail_transceiver = fail;
    }

    pub fn interrupt_pending(&self) -> bool {
        self.state.lock().interrupts != 0
    }

    pub fn transmitted(&self) -> Vec<Frame> {
        self.state.lock().transmitted.clone()
    }

    pub fn configuration(&self) -> Option<(BusMode, Speed)> {
        self.state.lock().configured
    }

    pub fn transceiver_enabled(&self) -> bool {
        self.state.lock().transceiver
    }

    fn finish_tx(state: &mut ControllerState, mailbox: RxMailbox) {
        let format = if mailbox.info & fir::EXTENDED != 0 {
            FrameFormat::Extended
        } else {
            FrameFormat::Standard
        };
        let dlc = usize::from(mailbox.info & fir::DLC_MASK).min(8);
        if let Ok(frame) = Frame::new(None, mailbox.id, format, &mailbox.data[..dlc]) {
            state.transmitted.push(frame);
        }
        state.tx_busy = false;
        state.interrupts |= irq::TRANSMIT;
    }
}

impl OnChipController for VirtualController {
    fn configure(&self, mode: BusMode, speed: Speed) -> Result<(), HwError> {
        let mut state = self.state.lock();
        if !state.reset {
            return Err(HwError::NoResponse);
        }
        state.configured = Some((mode, speed));
        state.errors = ErrorRegisters::default();
        state.interrupts = 0;
        Ok(())
    }

    fn set_reset_mode(&self, reset: bool) {
        let mut state = self.state.lock();
        state.reset = reset;
        if reset {
            state.rx_fifo.clear();
            state.pending_tx = None;
            state.tx_busy = false;
        }
    }

    fn in_reset_mode(&self) -> bool {
        self.state.lock().reset
    }

    fn set_transceiver(&self, enabled: bool) -> Result<(), HwError> {
        let mut state = self.state.lock();
        if state.fail_transceiver {
            return Err(HwError::NoResponse);
        }
        state.transceiver = enabled;
        Ok(())
    }

    fn take_interrupts(&self) -> u8 {
        std::mem::take(&mut self.state.lock().interrupts)
    }

    fn tx_buffer_free(&self) -> bool {
        !self.state.lock().tx_busy
    }

    fn load_tx(&self, info: u8, id: u32, payload: &[u8]) {
        let mut state = self.state.lock();
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        state.pending_tx = Some(RxMailbox { info, id, data });
        state.tx_busy = true;
    }

    fn request_transmission(&self) {
        let mut state = self.state.lock();
        if state.hold_tx {
            return;
        }
        if let Some(mailbox) = state.pending_tx.take() {
            Self::finish_tx(&mut state, mailbox);
        }
    }

    fn read_rx(&self) -> RxMailbox {
        self.state
            .lock()
            .rx_fifo
            .front()
            .copied()
            .unwrap_or_default()
    }

    fn release_rx(&self) {
        let mut state = self.state.lock();
        state.rx_fifo.pop_front();
        if !state.rx_fifo.is_empty() {
            state.interrupts |= irq::RECEIVE;
        }
    }

    fn error_registers(&self) -> ErrorRegisters {
        self.state.lock().errors
    }

    fn clear_data_overrun(&self) {
        self.state.lock().errors.status &= !0x02;
    }
}

struct Mcp2515State {
    registers: [u8; 128],
    hold_tx: bool,
    refuse_mode: bool,
    transmitted: Vec<Frame>,
}

impl Mcp2515State {
    fn power_on() -> Mcp2515State {
        let mut state = Mcp2515State {
            registers: [0; 128],
            hold_tx: false,
            refuse_mode: false,
            transmitted: Vec::new(),
        };
        state.reset();
        state
    }

    fn reset(&mut self) {
        self.registers = [0; 128];
        self.registers[usize::from(reg::CANSTAT)] = mode::CONFIG;
        self.registers[usize::from(reg::CANCTRL)] = mode::CONFIG | 0x07;
    }

    fn reg(&mut self, address: u8) -> &mut u8 {
        &mut self.registers[usize::from(address & 0x7f)]
    }

    fn write(&mut self, address: u8, value: u8) {
        *self.reg(address) = value;
        if address == reg::CANCTRL && !self.refuse_mode {
            let canstat = self.reg(reg::CANSTAT);
            *canstat = (*canstat & !mode::MASK) | (value & mode::MASK);
        }
    }

    /// TXBnCTRL address of transmit buffer `n`.
    fn tx_ctrl(n: u8) -> u8 {
        0x30 + 0x10 * n
    }

    fn transmit(&mut self, n: u8) {
        let base = Self::tx_ctrl(n);
        let record: Vec<u8> = (1..=13).map(|i| *self.reg(base + i)).collect();
        if let Some(frame) = decode_rx_record(&record, None) {
            self.transmitted.push(frame);
        }
        *self.reg(base) &= !0x08;
        *self.reg(reg::CANINTF) |= intf::TX0 << n;
    }

    fn status(&mut self) -> u8 {
        let flags = *self.reg(reg::CANINTF);
        let mut status = flags & (intf::RX0 | intf::RX1);
        for n in 0..3u8 {
            if *self.reg(Self::tx_ctrl(n)) & 0x08 != 0 {
                status |= 0x04 << (2 * n);
            }
            if flags & (intf::TX0 << n) != 0 {
                status |= 0x08 << (2 * n);
            }
        }
        status
    }
}

/// MCP2515 behind an emulated SPI link. Clones share one chip.
#[derive(Clone)]
pub struct VirtualMcp2515 {
    chip: Arc<Mutex<Mcp2515State>>,
}

impl Default for VirtualMcp2515 {
    fn default() -> Self {
        VirtualMcp2515::new()
    }
}

impl VirtualMcp2515 {
    pub fn new() -> VirtualMcp2515 {
        VirtualMcp2515 {
            chip: Arc::new(Mutex::new(Mcp2515State::power_on())),
        }
    }

    pub fn register(&self, address: u8) -> u8 {
        *self.chip.lock().reg(address)
    }

    /// Latch a frame from the bus into the first free receive buffer.
    /// Returns false and flags an overflow if both are occupied.
    pub fn inject(&self, frame: &Frame) -> bool {
        let mut chip = self.chip.lock();
        let flags = *chip.reg(reg::CANINTF);
        let (base, flag) = if flags & intf::RX0 == 0 {
            (0x61, intf::RX0)
        } else if flags & intf::RX1 == 0 {
            (0x71, intf::RX1)
        } else {
            *chip.reg(reg::EFLG) |= 0x80;
            *chip.reg(reg::CANINTF) |= intf::ERROR;
            return false;
        };

        let id = encode_id(frame.id(), frame.format());
        for (i, byte) in id.iter().enumerate() {
            *chip.reg(base + i as u8) = *byte;
        }
        *chip.reg(base + 4) = frame.dlc();
        let mut data = [0u8; 8];
        data[..frame.data().len()].copy_from_slice(frame.data());
        for (i, byte) in data.iter().enumerate() {
            *chip.reg(base + 5 + i as u8) = *byte;
        }
        *chip.reg(reg::CANINTF) |= flag;
        true
    }

    pub fn set_error_counters(&self, tec: u8, rec: u8) {
        let mut chip = self.chip.lock();
        *chip.reg(reg::TEC) = tec;
        *chip.reg(reg::REC) = rec;
    }

    /// Stall transmit requests until [`Self::release_transmissions`].
    pub fn hold_transmissions(&self, hold: bool) {
        self.chip.lock().hold_tx = hold;
    }

    pub fn release_transmissions(&self) {
        let mut chip = self.chip.lock();
        chip.hold_tx = false;
        for n in 0..3 {
            if *chip.reg(Mcp2515State::tx_ctrl(n)) & 0x08 != 0 {
                chip.transmit(n);
            }
        }
    }

    /// Leave CANSTAT untouched by mode requests, like a chip that lost its
    /// clock.
    pub fn refuse_mode_changes(&self, refuse: bool) {
        self.chip.lock().refuse_mode = refuse;
    }

    pub fn interrupt_pending(&self) -> bool {
        let mut chip = self.chip.lock();
        *chip.reg(reg::CANINTF) & *chip.reg(reg::CANINTE) != 0
    }

    pub fn transmitted(&self) -> Vec<Frame> {
        self.chip.lock().transmitted.clone()
    }
}

impl SpiDevice for VirtualMcp2515 {
    fn transaction(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), HwError> {
        if tx.len() != rx.len() {
            return Err(HwError::Spi(format!(
                "length mismatch: {} out, {} in",
                tx.len(),
                rx.len()
            )));
        }
        let (&command, args) = tx
            .split_first()
            .ok_or_else(|| HwError::Spi("empty transaction".to_owned()))?;
        let mut chip = self.chip.lock();

        match command {
            cmd::RESET => {
                if !chip.refuse_mode {
                    chip.reset();
                }
            }
            cmd::READ | cmd::WRITE => {
                let address = *args
                    .first()
                    .ok_or_else(|| HwError::Spi("missing address".to_owned()))?;
                for (i, value) in args[1..].iter().enumerate() {
                    let address = address.wrapping_add(i as u8);
                    if command == cmd::READ {
                        rx[2 + i] = *chip.reg(address);
                    } else {
                        chip.write(address, *value);
                    }
                }
            }
            cmd::BIT_MODIFY => {
                if let [address, mask, value] = *args {
                    let current = *chip.reg(address);
                    chip.write(address, (current & !mask) | (value & mask));
                } else {
                    return Err(HwError::Spi("malformed BIT MODIFY".to_owned()));
                }
            }
            cmd::READ_STATUS => {
                let status = chip.status();
                for byte in rx[1..].iter_mut() {
                    *byte = status;
                }
            }
            c if c & 0xf8 == cmd::LOAD_TX_BUFFER => {
                let abc = c & 0x07;
                let start = Mcp2515State::tx_ctrl(abc / 2) + if abc % 2 == 0 { 1 } else { 6 };
                for (i, value) in args.iter().enumerate() {
                    *chip.reg(start + i as u8) = *value;
                }
            }
            c if c & 0xf0 == cmd::REQUEST_TO_SEND => {
                for n in 0..3u8 {
                    if c & (1 << n) != 0 {
                        *chip.reg(Mcp2515State::tx_ctrl(n)) |= 0x08;
                        if !chip.hold_tx {
                            chip.transmit(n);
                        }
                    }
                }
            }
            c if c & 0xf9 == cmd::READ_RX_BUFFER => {
                let n = (c >> 2) & 0x01;
                let start = 0x61 + 0x10 * n + if c & 0x02 == 0 { 0 } else { 5 };
                for (i, byte) in rx[1..].iter_mut().enumerate() {
                    *byte = *chip.reg(start + i as u8);
                }
                *chip.reg(reg::CANINTF) &= !(intf::RX0 << n);
            }
            other => return Err(HwError::Spi(format!("unknown command {:#04x}", other))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_ignores_frames_in_reset() {
        let controller = VirtualController::new();
        controller.receive(&Frame::standard(0x100, &[]).unwrap());
        assert!(!controller.interrupt_pending());

        controller.set_reset_mode(false);
        controller.receive(&Frame::standard(0x100, &[]).unwrap());
        assert_eq!(controller.take_interrupts(), irq::RECEIVE);
        assert_eq!(controller.read_rx().id, 0x100);
    }

    #[test]
    fn controller_flags_fifo_overrun() {
        let controller = VirtualController::new();
        controller.set_reset_mode(false);
        for _ in 0..=RX_FIFO_DEPTH {
            controller.receive(&Frame::standard(0x100, &[]).unwrap());
        }
        assert_eq!(
            controller.take_interrupts(),
            irq::RECEIVE | irq::DATA_OVERRUN
        );
    }

    #[test]
    fn spi_register_access() {
        let mut chip = VirtualMcp2515::new();
        let mut rx = [0u8; 5];
        chip.transaction(&[cmd::WRITE, reg::CNF3, 1, 2, 3], &mut rx).unwrap();
        chip.transaction(&[cmd::READ, reg::CNF3, 0, 0, 0], &mut rx).unwrap();
        assert_eq!(&rx[2..], &[1, 2, 3]);

        let mut rx = [0u8; 4];
        chip.transaction(&[cmd::BIT_MODIFY, reg::CNF3, 0x03, 0x00], &mut rx).unwrap();
        assert_eq!(chip.register(reg::CNF3), 0);

        assert!(chip.transaction(&[0xff], &mut [0u8; 1]).is_err());
    }

    #[test]
    fn canctrl_write_switches_mode() {
        let mut chip = VirtualMcp2515::new();
        assert_eq!(chip.register(reg::CANSTAT), mode::CONFIG);
        chip.transaction(&[cmd::WRITE, reg::CANCTRL, mode::LISTEN], &mut [0u8; 3])
            .unwrap();
        assert_eq!(chip.register(reg::CANSTAT) & mode::MASK, mode::LISTEN);
    }
}
