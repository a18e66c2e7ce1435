#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use can_format::LogMessage;
use canhub::driver::onchip::{OnChipDriver, OnChipInterrupt};
use canhub::error::LoggerError;
use canhub::hw::virt::VirtualController;
use canhub::logger::{Logger, LoggerBase, SharedLogger};
use canhub::{CanBus, Hub, HubBuilder};
use parking_lot::Mutex;

/// Logger that keeps every message it writes.
pub struct Capture {
    base: LoggerBase,
    seen: Arc<Mutex<Vec<LogMessage>>>,
}

impl Capture {
    /// Install a capture logger on `hub` and return a handle on what it
    /// records.
    pub fn install(hub: &Hub) -> Arc<Mutex<Vec<LogMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let logger: SharedLogger = Arc::new(Mutex::new(Box::new(Capture {
            base: LoggerBase::default(),
            seen: seen.clone(),
        })));
        hub.set_logger(logger);
        seen
    }
}

impl Logger for Capture {
    fn type_name(&self) -> &str {
        "capture"
    }

    fn needs_path(&self) -> bool {
        false
    }

    fn open(&mut self, _path: Option<&str>) -> Result<(), LoggerError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        true
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
        self.seen.lock().push(message.clone());
        Ok(true)
    }

    fn get_info(&self) -> String {
        "capture".to_owned()
    }
}

pub struct OnChipBus {
    pub hub: Arc<Hub>,
    pub bus: Arc<CanBus>,
    pub controller: Arc<VirtualController>,
    pub interrupt: OnChipInterrupt<VirtualController>,
}

/// A hub with one on-chip bus. The worker is not started.
pub fn onchip_hub(name: &str) -> OnChipBus {
    let mut builder = HubBuilder::new();
    let controller = Arc::new(VirtualController::new());
    let bus = builder.add_bus(name, Box::new(OnChipDriver::new(controller.clone())));
    let interrupt = OnChipInterrupt::new(bus.clone(), controller.clone(), builder.queue());
    OnChipBus {
        hub: builder.build(),
        bus,
        controller,
        interrupt,
    }
}

/// Wait until `condition` holds, failing the test after a second.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
