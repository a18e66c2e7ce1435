use std::collections::BTreeMap;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FormatError;
use crate::gvret::{GvretAscii, GvretBinary};
use crate::message::{LogMessage, Timestamp};

/// Bidirectional converter between log messages and an external byte format.
pub trait CanFormat: Send {
    fn name(&self) -> &'static str;

    /// Serialize one message. Messages the format cannot represent yield
    /// empty bytes.
    fn get(&mut self, message: &LogMessage) -> Bytes;

    /// Bytes to emit once when a new output stream is opened.
    fn get_header(&mut self, _time: Timestamp) -> Bytes {
        Bytes::new()
    }

    /// Feed raw input. Returns the message completed by this call (if any)
    /// and the number of bytes consumed. Partial records are buffered
    /// internally, so the caller always advances by the consumed count and
    /// calls again with the rest.
    fn put(&mut self, buffer: &[u8]) -> (Option<LogMessage>, usize);

    /// Flush a trailing record left without a terminator at end of input.
    fn finish(&mut self) -> Option<LogMessage> {
        None
    }
}

/// Adapts a [`CanFormat`] to the `tokio_util` codec traits so captures can
/// be read with `FramedRead` and written with `FramedWrite`.
pub struct FormatCodec {
    format: Box<dyn CanFormat>,
}

impl FormatCodec {
    pub fn new(format: Box<dyn CanFormat>) -> FormatCodec {
        FormatCodec { format }
    }

    pub fn format_name(&self) -> &'static str {
        self.format.name()
    }
}

impl Decoder for FormatCodec {
    type Item = LogMessage;
    type Error = FormatError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while !src.is_empty() {
            let (message, consumed) = self.format.put(&src[..]);
            src.advance(consumed);
            if message.is_some() {
                return Ok(message);
            }
            if consumed == 0 {
                break;
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None => Ok(self.format.finish()),
        }
    }
}

impl Encoder<LogMessage> for FormatCodec {
    type Error = FormatError;

    fn encode(&mut self, item: LogMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&self.format.get(&item));
        Ok(())
    }
}

pub type Constructor = fn() -> Box<dyn CanFormat>;

/// Name-keyed set of known formats.
pub struct FormatRegistry {
    formats: BTreeMap<&'static str, Constructor>,
}

impl FormatRegistry {
    pub fn new() -> FormatRegistry {
        FormatRegistry {
            formats: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> FormatRegistry {
        let mut registry = FormatRegistry::new();
        registry.register(GvretAscii::NAME, || Box::new(GvretAscii::new()));
        registry.register(GvretBinary::NAME, || Box::new(GvretBinary::new()));
        registry
    }

    pub fn register(&mut self, name: &'static str, constructor: Constructor) {
        log::debug!("Registering CAN format: {}", name);
        self.formats.insert(name, constructor);
    }

    pub fn instantiate(&self, name: &str) -> Option<Box<dyn CanFormat>> {
        self.formats.get(name).map(|constructor| constructor())
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn CanFormat>, FormatError> {
        self.instantiate(name)
            .ok_or_else(|| FormatError::UnknownFormat(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.formats.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Constructor)> + '_ {
        self.formats
            .iter()
            .map(|(name, constructor)| (*name, *constructor))
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        FormatRegistry::with_defaults()
    }
}
