use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};

use can_format::{CanFormat, LogMessage, Timestamp};

use crate::error::LoggerError;
use crate::logger::{Logger, LoggerBase};

/// Appends messages to a file, encoded with a [`CanFormat`].
pub struct FileLogger {
    base: LoggerBase,
    format: Box<dyn CanFormat>,
    path: Option<String>,
    file: Option<BufWriter<File>>,
}

impl FileLogger {
    pub fn new(format: Box<dyn CanFormat>) -> FileLogger {
        FileLogger {
            base: LoggerBase::default(),
            format,
            path: None,
            file: None,
        }
    }
}

impl Logger for FileLogger {
    fn type_name(&self) -> &str {
        self.format.name()
    }

    fn open(&mut self, path: Option<&str>) -> Result<(), LoggerError> {
        let path = path.ok_or_else(|| LoggerError::Open {
            path: String::new(),
            source: std::io::ErrorKind::InvalidInput.into(),
        })?;
        self.close();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LoggerError::Open {
                path: path.to_owned(),
                source,
            })?;
        let mut file = BufWriter::new(file);
        file.write_all(&self.format.get_header(Timestamp::now()))?;

        log::info!("Logging CAN traffic to {} ({})", path, self.format.name());
        self.file = Some(file);
        self.path = Some(path.to_owned());
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                log::warn!("Flushing {:?} failed: {}", self.path, e);
            }
            log::info!("Closed CAN log {:?}: {}", self.path, self.base.stats);
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn base(&self) -> &LoggerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LoggerBase {
        &mut self.base
    }

    fn write(&mut self, message: &LogMessage) -> Result<bool, LoggerError> {
        let encoded = self.format.get(message);
        if encoded.is_empty() {
            return Ok(false);
        }
        match &mut self.file {
            Some(file) => {
                file.write_all(&encoded)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_info(&self) -> String {
        format!(
            "Type:{} Path:{} Filter:{}",
            self.format.name(),
            self.path.as_deref().unwrap_or("-"),
            self.base.filter
        )
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        self.close();
    }
}
