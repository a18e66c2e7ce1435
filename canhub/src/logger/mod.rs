//! Pluggable sinks for frames, bus status and info events.
//!
//! At most one logger is active. The hub and the buses only see it through
//! a [`LogDispatch`] slot which the control surface swaps.

pub mod file;
pub mod filter;
pub mod trace;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use can_format::{
    BusName, BusStatus, FormatRegistry, Frame, InfoKind, LogEntry, LogMessage, StatusKind,
};
use parking_lot::{Mutex, RwLock};

use crate::error::LoggerError;
use file::FileLogger;
use filter::FilterSet;
use trace::TraceLogger;

/// How long to wait after detaching a logger before closing it, so a log
/// call already in flight on the worker can finish.
pub const LOGGER_CLOSE_GRACE: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
    TxQueue,
    TxFail,
}

impl Direction {
    pub fn entry(self, frame: Frame) -> LogEntry {
        match self {
            Direction::Rx => LogEntry::Rx(frame),
            Direction::Tx => LogEntry::Tx(frame),
            Direction::TxQueue => LogEntry::TxQueue(frame),
            Direction::TxFail => LogEntry::TxFail(frame),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoggerStats {
    pub messages: u32,
    pub filtered: u32,
    /// Passed the filters but could not be written.
    pub dropped: u32,
}

impl fmt::Display for LoggerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} messages logged, {} filtered, {} dropped",
            self.messages, self.filtered, self.dropped
        )
    }
}

/// State every logger carries regardless of its sink.
#[derive(Debug, Default)]
pub struct LoggerBase {
    filter: FilterSet,
    stats: LoggerStats,
}

pub trait Logger: Send {
    fn type_name(&self) -> &str;

    /// Whether `open` expects a destination path.
    fn needs_path(&self) -> bool {
        true
    }

    fn open(&mut self, path: Option<&str>) -> Result<(), LoggerError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn path(&self) -> Option<&str>;

    fn base(&self) -> &LoggerBase;

    fn base_mut(&mut self) -> &mut LoggerBase;

    /// Hand one message that passed the filters to the sink. Returns false
    /// if the sink has no representation for it.
    fn write(&mut self, message: &LogMessage) -> Result<bool, LoggerError>;

    fn get_info(&self) -> String;

    fn filter(&self) -> &FilterSet {
        &self.base().filter
    }

    fn set_filter(&mut self, filter: FilterSet) {
        self.base_mut().filter = filter;
    }

    fn get_stats(&self) -> LoggerStats {
        self.base().stats
    }

    fn log(&mut self, message: &LogMessage) {
        if !self.is_open() {
            return;
        }
        if !self.base().filter.matches(message) {
            self.base_mut().stats.filtered += 1;
            return;
        }
        match self.write(message) {
            Ok(true) => self.base_mut().stats.messages += 1,
            Ok(false) => {}
            Err(e) => {
                self.base_mut().stats.dropped += 1;
                log::debug!("{} logger: dropping message: {}", self.type_name(), e);
            }
        }
    }

    fn log_frame(&mut self, origin: Option<&BusName>, direction: Direction, frame: &Frame) {
        self.log(&LogMessage::new(
            origin.cloned(),
            direction.entry(frame.clone()),
        ));
    }

    fn log_status(&mut self, origin: Option<&BusName>, kind: StatusKind, status: BusStatus) {
        self.log(&LogMessage::new(
            origin.cloned(),
            LogEntry::Status(kind, status),
        ));
    }

    fn log_info(&mut self, origin: Option<&BusName>, kind: InfoKind, text: &str) {
        self.log(&LogMessage::new(
            origin.cloned(),
            LogEntry::Info(kind, text.to_owned()),
        ));
    }
}

pub type SharedLogger = Arc<Mutex<Box<dyn Logger>>>;

/// Slot holding the active logger. Clones share the slot.
#[derive(Clone, Default)]
pub struct LogDispatch {
    active: Arc<RwLock<Option<SharedLogger>>>,
}

impl LogDispatch {
    pub fn new() -> LogDispatch {
        LogDispatch::default()
    }

    /// Install `logger`, returning the one it replaces.
    pub fn set(&self, logger: SharedLogger) -> Option<SharedLogger> {
        self.active.write().replace(logger)
    }

    pub fn unset(&self) -> Option<SharedLogger> {
        self.active.write().take()
    }

    pub fn current(&self) -> Option<SharedLogger> {
        self.active.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.read().is_some()
    }

    /// Frames are attributed to their own origin.
    pub fn log_frame(&self, direction: Direction, frame: &Frame) {
        if let Some(logger) = self.current() {
            logger
                .lock()
                .log_frame(frame.origin.as_ref(), direction, frame);
        }
    }

    pub fn log_status(&self, origin: &BusName, kind: StatusKind, status: BusStatus) {
        if let Some(logger) = self.current() {
            logger.lock().log_status(Some(origin), kind, status);
        }
    }

    pub fn log_info(&self, origin: Option<&BusName>, kind: InfoKind, text: &str) {
        if let Some(logger) = self.current() {
            logger.lock().log_info(origin, kind, text);
        }
    }
}

type LoggerConstructor = Box<dyn Fn() -> Box<dyn Logger> + Send + Sync>;

/// Name-keyed logger factory.
pub struct LoggerRegistry {
    constructors: BTreeMap<String, LoggerConstructor>,
}

impl LoggerRegistry {
    pub fn new() -> LoggerRegistry {
        LoggerRegistry {
            constructors: BTreeMap::new(),
        }
    }

    /// The trace logger plus a file logger for every format in `formats`.
    pub fn with_defaults(formats: &FormatRegistry) -> LoggerRegistry {
        let mut registry = LoggerRegistry::new();
        registry.register(TraceLogger::TYPE_NAME, || Box::new(TraceLogger::new()));
        for (name, constructor) in formats.iter() {
            registry.register(name, move || Box::new(FileLogger::new(constructor())));
        }
        registry
    }

    pub fn register<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Logger> + Send + Sync + 'static,
    {
        log::debug!("Registering logger type: {}", type_name);
        self.constructors
            .insert(type_name.to_owned(), Box::new(constructor));
    }

    pub fn instantiate(&self, type_name: &str) -> Option<Box<dyn Logger>> {
        self.constructors
            .get(type_name)
            .map(|constructor| constructor())
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors.keys().map(String::as_str)
    }
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        LoggerRegistry::with_defaults(&FormatRegistry::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Logger that keeps everything it is handed.
    struct Capture {
        base: LoggerBase,
        open: bool,
        fail: bool,
        seen: Vec<LogMessage>,
    }

    impl Capture {
        fn new() -> Capture {
            Capture {
                base: LoggerBase::default(),
                open: true,
                fail: false,
                seen: Vec::new(),
            }
        }
    }

    impl Logger for Capture {
        fn type_name(&self) -> &str {
            "capture"
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
            if self.fail {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
            self.seen.push(message.clone());
            Ok(true)
        }

        fn get_info(&self) -> String {
            "capture".to_owned()
        }
    }

    #[test]
    fn counts_written_filtered_and_dropped() {
        let mut logger = Capture::new();
        logger.set_filter(FilterSet::parse(&["1"]).unwrap());

        let frame = Frame::standard(0x100, &[1]).unwrap();
        logger.log_frame(Some(&BusName::new("can1")), Direction::Rx, &frame);
        logger.log_frame(Some(&BusName::new("can2")), Direction::Rx, &frame);
        logger.fail = true;
        logger.log_info(Some(&BusName::new("can1")), InfoKind::Comment, "hello");

        assert_eq!(
            logger.get_stats(),
            LoggerStats { messages: 1, filtered: 1, dropped: 1 }
        );
        assert_eq!(logger.seen[0].entry, LogEntry::Rx(frame));
    }

    #[test]
    fn closed_logger_ignores_messages() {
        let mut logger = Capture::new();
        logger.close();
        logger.log_info(None, InfoKind::Event, "ignored");
        assert!(logger.seen.is_empty());
        assert_eq!(logger.get_stats(), LoggerStats::default());
    }

    #[test]
    fn dispatch_swaps_loggers() {
        let dispatch = LogDispatch::new();
        assert!(!dispatch.is_active());
        dispatch.log_info(None, InfoKind::Event, "nobody listening");

        let logger: SharedLogger = Arc::new(Mutex::new(Box::new(Capture::new())));
        assert!(dispatch.set(logger.clone()).is_none());
        let frame = Frame::standard(0x7df, &[2, 1, 0]).unwrap().with_origin(BusName::new("can3"));
        dispatch.log_frame(Direction::Tx, &frame);
        assert_eq!(logger.lock().get_stats().messages, 1);

        assert!(dispatch.unset().is_some());
        dispatch.log_frame(Direction::Tx, &frame);
        assert_eq!(logger.lock().get_stats().messages, 1);
    }

    #[test]
    fn registry_knows_trace_and_formats() {
        let registry = LoggerRegistry::default();
        let names: Vec<_> = registry.type_names().collect();
        assert_eq!(names, vec!["gvret-a", "gvret-b", "trace"]);

        let logger = registry.instantiate("gvret-b").unwrap();
        assert_eq!(logger.type_name(), "gvret-b");
        assert!(logger.needs_path());
        assert!(!registry.instantiate("trace").unwrap().needs_path());
        assert!(registry.instantiate("crtd").is_none());
    }
}
