use thiserror::Error;

use crate::frame::FrameFormat;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("CAN frames carry at most 8 data bytes, got {0}")]
    PayloadTooLong(usize),

    #[error("ID {id:#x} does not fit a {format:?} frame")]
    IdOutOfRange { id: u32, format: FrameFormat },
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),
}
