//! Central dispatcher.
//!
//! Interrupt handlers push [`WorkItem`]s into one bounded queue and a single
//! worker task drains it in arrival order: frames are counted, copied to
//! every listener and handed to the active logger.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use can_format::{BusName, Frame, StatusKind};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::bus::CanBus;
use crate::driver::Driver;
use crate::logger::{Direction, LogDispatch, SharedLogger};
use crate::util::AbortOnDrop;

pub const WORK_QUEUE_CAPACITY: usize = 20;

pub enum WorkItem {
    /// A frame captured in interrupt context.
    Frame(Frame),
    /// Poll the bus until it has no more frames.
    RxCallback(Arc<CanBus>),
    /// Transmit buffers freed up.
    TxCallback(Arc<CanBus>),
    /// The bus' error state changed.
    LogError(Arc<CanBus>),
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Frame(frame) => write!(f, "Frame({})", frame),
            WorkItem::RxCallback(bus) => write!(f, "RxCallback({})", bus.name()),
            WorkItem::TxCallback(bus) => write!(f, "TxCallback({})", bus.name()),
            WorkItem::LogError(bus) => write!(f, "LogError({})", bus.name()),
        }
    }
}

/// Producer side of the work queue. Never blocks.
#[derive(Clone)]
pub struct HubQueue {
    sender: mpsc::Sender<WorkItem>,
    dropped: Arc<AtomicU32>,
}

impl HubQueue {
    /// Returns false if the queue was full and `item` was dropped.
    pub fn push(&self, item: WorkItem) -> bool {
        match self.sender.try_send(item) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Work queue unavailable, dropping {:?}", e.into_inner());
                false
            }
        }
    }
}

pub struct HubBuilder {
    queue: HubQueue,
    receiver: mpsc::Receiver<WorkItem>,
    buses: Vec<Arc<CanBus>>,
    logging: LogDispatch,
}

impl HubBuilder {
    pub fn new() -> HubBuilder {
        let (sender, receiver) = mpsc::channel(WORK_QUEUE_CAPACITY);
        HubBuilder {
            queue: HubQueue {
                sender,
                dropped: Arc::new(AtomicU32::new(0)),
            },
            receiver,
            buses: Vec::new(),
            logging: LogDispatch::new(),
        }
    }

    /// Queue handle for interrupt handlers wired up before the hub exists.
    pub fn queue(&self) -> HubQueue {
        self.queue.clone()
    }

    pub fn add_bus(&mut self, name: &str, driver: Box<dyn Driver>) -> Arc<CanBus> {
        let bus = Arc::new(CanBus::new(
            BusName::new(name),
            driver,
            self.logging.clone(),
        ));
        self.buses.push(bus.clone());
        bus
    }

    pub fn build(self) -> Arc<Hub> {
        Arc::new(Hub {
            buses: self.buses,
            queue: self.queue,
            receiver: Mutex::new(Some(self.receiver)),
            listeners: Mutex::new(Vec::new()),
            logging: self.logging,
            worker: Mutex::new(None),
        })
    }
}

impl Default for HubBuilder {
    fn default() -> Self {
        HubBuilder::new()
    }
}

pub struct Hub {
    buses: Vec<Arc<CanBus>>,
    queue: HubQueue,
    receiver: Mutex<Option<mpsc::Receiver<WorkItem>>>,
    listeners: Mutex<Vec<mpsc::Sender<Frame>>>,
    logging: LogDispatch,
    worker: Mutex<Option<AbortOnDrop<()>>>,
}

impl Hub {
    /// Spawn the worker task. Only the first call has any effect.
    pub fn start(self: &Arc<Self>) {
        let receiver = match self.receiver.lock().take() {
            Some(receiver) => receiver,
            None => {
                log::warn!("Hub worker already started");
                return;
            }
        };
        let handle = tokio::spawn(work(Arc::downgrade(self), receiver));
        *self.worker.lock() = Some(AbortOnDrop::new(handle));
        log::debug!("Hub worker started with {} buses", self.buses.len());
    }

    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }

    pub fn queue(&self) -> HubQueue {
        self.queue.clone()
    }

    /// Work items lost to a full queue since startup.
    pub fn dropped_work_items(&self) -> u32 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn find_bus(&self, name: &str) -> Option<Arc<CanBus>> {
        self.buses
            .iter()
            .find(|bus| bus.name().as_str() == name)
            .cloned()
    }

    pub fn buses(&self) -> &[Arc<CanBus>] {
        &self.buses
    }

    pub fn logging(&self) -> &LogDispatch {
        &self.logging
    }

    pub fn set_logger(&self, logger: SharedLogger) -> Option<SharedLogger> {
        self.logging.set(logger)
    }

    pub fn unset_logger(&self) -> Option<SharedLogger> {
        self.logging.unset()
    }

    pub fn logger(&self) -> Option<SharedLogger> {
        self.logging.current()
    }

    /// Every frame should be sent to this channel from now on.
    pub fn register_listener(&self, listener: mpsc::Sender<Frame>) {
        self.listeners.lock().push(listener);
    }

    /// Remove one registration of `listener`. Returns false if it was not
    /// registered.
    pub fn deregister_listener(&self, listener: &mpsc::Sender<Frame>) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|l| l.same_channel(listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn incoming_frame(&self, frame: Frame) {
        if let Some(bus) = frame
            .origin
            .as_ref()
            .and_then(|origin| self.find_bus(origin.as_str()))
        {
            bus.stats().count_rx();
        }

        self.listeners
            .lock()
            .retain(|listener| match listener.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::debug!("Listener full, dropping {}", frame);
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Listener went away, removing it");
                    false
                }
            });

        self.logging.log_frame(Direction::Rx, &frame);
    }

    /// Process one work item. Normally only called by the worker.
    pub fn dispatch(&self, item: WorkItem) {
        match item {
            WorkItem::Frame(frame) => self.incoming_frame(frame),
            WorkItem::RxCallback(bus) => {
                while let Some(frame) = bus.rx_poll() {
                    self.incoming_frame(frame);
                }
                if bus.stats().take_error_pending() {
                    bus.log_status(StatusKind::Error);
                }
                bus.tx_callback();
            }
            WorkItem::TxCallback(bus) => bus.tx_callback(),
            WorkItem::LogError(bus) => {
                bus.stats().take_error_pending();
                bus.log_status(StatusKind::Error);
            }
        }
    }
}

async fn work(hub: Weak<Hub>, mut receiver: mpsc::Receiver<WorkItem>) {
    while let Some(item) = receiver.recv().await {
        match hub.upgrade() {
            Some(hub) => hub.dispatch(item),
            None => break,
        }
    }
    log::debug!("Hub worker exiting");
}
