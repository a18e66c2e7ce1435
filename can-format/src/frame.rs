use std::fmt;
use std::sync::Arc;

use crate::error::FrameError;

pub const MAX_DLC: usize = 8;
pub const MAX_STANDARD_ID: u32 = 0x7ff;
pub const MAX_EXTENDED_ID: u32 = 0x1fff_ffff;

/// Name of a physical bus, e.g. `can1`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusName(Arc<str>);

impl BusName {
    pub fn new(name: &str) -> BusName {
        BusName(Arc::from(name))
    }

    /// Bus named `can<number>`.
    pub fn numbered(number: u32) -> BusName {
        BusName::new(&format!("can{}", number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decimal suffix of a `can<N>` style name.
    pub fn number(&self) -> Option<u32> {
        self.0.strip_prefix("can")?.parse().ok()
    }
}

impl From<&str> for BusName {
    fn from(name: &str) -> Self {
        BusName::new(name)
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    Standard,
    Extended,
}

impl FrameFormat {
    pub fn max_id(self) -> u32 {
        match self {
            FrameFormat::Standard => MAX_STANDARD_ID,
            FrameFormat::Extended => MAX_EXTENDED_ID,
        }
    }
}

/// One classic CAN frame.
///
/// Payload bytes past `dlc` are kept zeroed so that two frames carrying the
/// same data always compare equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub origin: Option<BusName>,
    id: u32,
    format: FrameFormat,
    dlc: u8,
    data: [u8; 8],
}

impl Frame {
    pub fn new(
        origin: Option<BusName>,
        id: u32,
        format: FrameFormat,
        data: &[u8],
    ) -> Result<Frame, FrameError> {
        if data.len() > MAX_DLC {
            return Err(FrameError::PayloadTooLong(data.len()));
        }
        if id > format.max_id() {
            return Err(FrameError::IdOutOfRange { id, format });
        }
        let mut payload = [0u8; 8];
        payload[..data.len()].copy_from_slice(data);
        Ok(Frame {
            origin,
            id,
            format,
            dlc: data.len() as u8,
            data: payload,
        })
    }

    pub fn standard(id: u32, data: &[u8]) -> Result<Frame, FrameError> {
        Frame::new(None, id, FrameFormat::Standard, data)
    }

    pub fn extended(id: u32, data: &[u8]) -> Result<Frame, FrameError> {
        Frame::new(None, id, FrameFormat::Extended, data)
    }

    pub fn with_origin(mut self, origin: BusName) -> Frame {
        self.origin = Some(origin);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn is_extended(&self) -> bool {
        self.format == FrameFormat::Extended
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

/// `100 S [3] 01 02 03`
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.format {
            FrameFormat::Standard => 'S',
            FrameFormat::Extended => 'X',
        };
        write!(f, "{:x} {} [{}]", self.id, kind, self.dlc)?;
        for byte in self.data() {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_long_payload() {
        assert!(matches!(
            Frame::standard(0x100, &[0; 9]),
            Err(FrameError::PayloadTooLong(9))
        ));
    }

    #[test]
    fn rejects_ids_outside_format() {
        assert!(Frame::standard(0x800, &[]).is_err());
        assert!(Frame::extended(0x800, &[]).is_ok());
        assert!(Frame::extended(0x2000_0000, &[]).is_err());
    }

    #[test]
    fn payload_is_truncated_to_dlc() {
        let frame = Frame::standard(0x7ff, &[1, 2, 3]).unwrap();
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.to_string(), "7ff S [3] 01 02 03");
    }

    #[test]
    fn bus_numbers() {
        assert_eq!(BusName::new("can3").number(), Some(3));
        assert_eq!(BusName::new("vcan").number(), None);
        assert_eq!(BusName::numbered(2).as_str(), "can2");
    }
}
