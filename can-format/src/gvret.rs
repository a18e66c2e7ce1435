//! GVRET capture formats.
//!
//! ASCII records look like
//! ```text
//! 1000 - 100 S 0 4 01 02 03 04
//! ```
//! (microsecond timestamp, hex id, `S`tandard or e`X`tended, bus, length,
//! data bytes). Bus digits are zero based: `can1` is written as `0`.
//! Messages without an origin are written as bus `0` and so read back as
//! `can1`. ASCII timestamps are written in full.
//!
//! Binary records:
//! ```text
//! +------+------+---------------+---------------+--------+-----------+------+
//! | 0xf1 | 0x00 | u32 LE micros | u32 LE id     | lenbus | data[dlc] | 0x00 |
//! +------+------+---------------+---------------+--------+-----------+------+
//! ```
//! Bit 31 of the id marks extended frames, `lenbus` carries the length in
//! its low nibble and the bus digit in its high nibble. The timestamp wraps
//! at 32 bits and only the low four bits of the bus digit survive, so
//! `can17` reads back as `can1`.

use std::fmt::Write;

use bytes::{BufMut, Bytes, BytesMut};

use crate::format::CanFormat;
use crate::frame::{BusName, Frame, FrameFormat, MAX_DLC};
use crate::message::{LogEntry, LogMessage, Timestamp};

const MAX_LINE_LENGTH: usize = 128;

const START_BYTE: u8 = 0xf1;
const BUILD_CAN_FRAME: u8 = 0x00;
const EXTENDED_FLAG: u32 = 0x8000_0000;
const BINARY_HEADER_LENGTH: usize = 11;

/// Only plain received/transmitted frames are representable.
fn representable(message: &LogMessage) -> Option<&Frame> {
    match &message.entry {
        LogEntry::Rx(frame) | LogEntry::Tx(frame) => Some(frame),
        _ => None,
    }
}

fn bus_digit(origin: Option<&BusName>) -> u32 {
    origin
        .and_then(BusName::number)
        .map(|n| n.saturating_sub(1))
        .unwrap_or(0)
}

fn bus_from_digit(digit: u32) -> Option<BusName> {
    digit.checked_add(1).map(BusName::numbered)
}

fn decoded(bus: BusName, micros: u64, format: FrameFormat, id: u32, data: &[u8]) -> Option<LogMessage> {
    let frame = match Frame::new(Some(bus.clone()), id, format, data) {
        Ok(frame) => frame,
        Err(e) => {
            log::debug!("Discarding GVRET record: {}", e);
            return None;
        }
    };
    Some(LogMessage {
        origin: Some(bus),
        timestamp: Timestamp::from_micros(micros),
        entry: LogEntry::Rx(frame),
    })
}

pub struct GvretAscii {
    line: Vec<u8>,
    discarding: bool,
}

impl GvretAscii {
    pub const NAME: &'static str = "gvret-a";

    pub fn new() -> GvretAscii {
        GvretAscii {
            line: Vec::with_capacity(MAX_LINE_LENGTH),
            discarding: false,
        }
    }

    fn parse_line(line: &[u8]) -> Option<LogMessage> {
        let line = std::str::from_utf8(line).ok()?;
        let mut fields = line.split_ascii_whitespace();

        let micros: u64 = fields.next()?.parse().ok()?;
        if fields.next()? != "-" {
            return None;
        }
        let id = u32::from_str_radix(fields.next()?, 16).ok()?;
        let format = match fields.next()? {
            "S" => FrameFormat::Standard,
            "X" => FrameFormat::Extended,
            other => {
                log::debug!("Discarding GVRET line with frame type {:?}", other);
                return None;
            }
        };
        let bus = bus_from_digit(fields.next()?.parse().ok()?)?;
        let dlc: usize = fields.next()?.parse().ok()?;
        if dlc > MAX_DLC {
            log::debug!("Discarding GVRET line with length {}", dlc);
            return None;
        }
        let mut data = [0u8; 8];
        for byte in data.iter_mut().take(dlc) {
            *byte = u8::from_str_radix(fields.next()?, 16).ok()?;
        }

        decoded(bus, micros, format, id, &data[..dlc])
    }
}

impl Default for GvretAscii {
    fn default() -> Self {
        GvretAscii::new()
    }
}

impl CanFormat for GvretAscii {
    fn name(&self) -> &'static str {
        GvretAscii::NAME
    }

    fn get(&mut self, message: &LogMessage) -> Bytes {
        let frame = match representable(message) {
            Some(frame) => frame,
            None => return Bytes::new(),
        };
        let mut line = String::with_capacity(MAX_LINE_LENGTH);
        // Infallible: writing into a String.
        let _ = write!(
            line,
            "{} - {:x} {} {} {}",
            message.timestamp.as_micros(),
            frame.id(),
            if frame.is_extended() { 'X' } else { 'S' },
            bus_digit(message.origin.as_ref()),
            frame.dlc()
        );
        for byte in frame.data() {
            let _ = write!(line, " {:02x}", byte);
        }
        line.push('\n');
        Bytes::from(line)
    }

    fn put(&mut self, buffer: &[u8]) -> (Option<LogMessage>, usize) {
        for (k, &byte) in buffer.iter().enumerate() {
            if byte == b'\r' || byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                if self.line.is_empty() {
                    continue;
                }
                let message = GvretAscii::parse_line(&self.line);
                self.line.clear();
                return (message, k + 1);
            }
            if self.discarding {
                continue;
            }
            if self.line.len() >= MAX_LINE_LENGTH {
                log::debug!("Discarding overlong GVRET line");
                self.line.clear();
                self.discarding = true;
                continue;
            }
            self.line.push(byte);
        }
        (None, buffer.len())
    }

    fn finish(&mut self) -> Option<LogMessage> {
        let message = if self.discarding || self.line.is_empty() {
            None
        } else {
            GvretAscii::parse_line(&self.line)
        };
        self.line.clear();
        self.discarding = false;
        message
    }
}

pub struct GvretBinary {
    record: Vec<u8>,
}

impl GvretBinary {
    pub const NAME: &'static str = "gvret-b";

    pub fn new() -> GvretBinary {
        GvretBinary {
            record: Vec::with_capacity(BINARY_HEADER_LENGTH + MAX_DLC + 1),
        }
    }

    fn decode_record(record: &[u8]) -> Option<LogMessage> {
        let micros = u32::from_le_bytes([record[2], record[3], record[4], record[5]]);
        let raw_id = u32::from_le_bytes([record[6], record[7], record[8], record[9]]);
        let (format, id) = if raw_id & EXTENDED_FLAG != 0 {
            (FrameFormat::Extended, raw_id & !EXTENDED_FLAG)
        } else {
            (FrameFormat::Standard, raw_id)
        };
        let dlc = (record[10] & 0x0f) as usize;
        let bus = bus_from_digit((record[10] >> 4) as u32)?;
        let data = &record[BINARY_HEADER_LENGTH..BINARY_HEADER_LENGTH + dlc];

        decoded(bus, micros as u64, format, id, data)
    }
}

impl Default for GvretBinary {
    fn default() -> Self {
        GvretBinary::new()
    }
}

impl CanFormat for GvretBinary {
    fn name(&self) -> &'static str {
        GvretBinary::NAME
    }

    fn get(&mut self, message: &LogMessage) -> Bytes {
        let frame = match representable(message) {
            Some(frame) => frame,
            None => return Bytes::new(),
        };
        let mut id = frame.id();
        if frame.is_extended() {
            id |= EXTENDED_FLAG;
        }
        let lenbus = frame.dlc() | ((bus_digit(message.origin.as_ref()) as u8 & 0x0f) << 4);

        let mut dst = BytesMut::with_capacity(BINARY_HEADER_LENGTH + frame.data().len() + 1);
        dst.put_u8(START_BYTE);
        dst.put_u8(BUILD_CAN_FRAME);
        dst.put_u32_le(message.timestamp.as_micros() as u32);
        dst.put_u32_le(id);
        dst.put_u8(lenbus);
        dst.put_slice(frame.data());
        dst.put_u8(0);
        dst.freeze()
    }

    fn put(&mut self, buffer: &[u8]) -> (Option<LogMessage>, usize) {
        for (k, &byte) in buffer.iter().enumerate() {
            match self.record.len() {
                0 if byte != START_BYTE => continue,
                1 if byte != BUILD_CAN_FRAME => {
                    // lost sync; this byte may start the next record
                    self.record.clear();
                    if byte == START_BYTE {
                        self.record.push(byte);
                    }
                    continue;
                }
                _ => self.record.push(byte),
            }

            if self.record.len() < BINARY_HEADER_LENGTH {
                continue;
            }
            let dlc = (self.record[10] & 0x0f) as usize;
            if dlc > MAX_DLC {
                log::debug!("Discarding GVRET record with length {}", dlc);
                self.record.clear();
                continue;
            }
            if self.record.len() == BINARY_HEADER_LENGTH + dlc + 1 {
                let message = GvretBinary::decode_record(&self.record);
                self.record.clear();
                return (message, k + 1);
            }
        }
        (None, buffer.len())
    }
}
