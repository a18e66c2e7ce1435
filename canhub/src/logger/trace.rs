use can_format::{LogEntry, LogMessage};

use crate::error::LoggerError;
use crate::logger::{Logger, LoggerBase};

/// Pipes everything into the process log. Frames go out at trace level,
/// status and info at debug level.
pub struct TraceLogger {
    base: LoggerBase,
    open: bool,
}

impl TraceLogger {
    pub const TYPE_NAME: &'static str = "trace";

    pub fn new() -> TraceLogger {
        TraceLogger {
            base: LoggerBase::default(),
            open: false,
        }
    }
}

impl Default for TraceLogger {
    fn default() -> Self {
        TraceLogger::new()
    }
}

impl Logger for TraceLogger {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn needs_path(&self) -> bool {
        false
    }

    fn open(&mut self, _path: Option<&str>) -> Result<(), LoggerError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn path(&self) -> Option<&str> {
        None
    }

    fn base(&self) -> &LoggerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LoggerBase {
        &mut self.base
    }

    fn write(&mut self, message: &LogMessage) -> Result<bool, LoggerError> {
        match message.entry {
            LogEntry::Status(..) | LogEntry::Info(..) => log::debug!("{}", message),
            _ => log::trace!("{}", message),
        }
        Ok(true)
    }

    fn get_info(&self) -> String {
        format!("Type:trace Filter:{}", self.base.filter)
    }
}
