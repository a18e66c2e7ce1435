use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use can_format::BusStatus;

/// Per-bus counters.
///
/// Every field is an atomic so interrupt handlers can update them without
/// taking the driver lock.
#[derive(Debug, Default)]
pub struct BusStats {
    interrupts: AtomicU32,
    packets_rx: AtomicU32,
    packets_tx: AtomicU32,
    errors_rx: AtomicU32,
    errors_tx: AtomicU32,
    rx_overflow: AtomicU32,
    tx_overflow: AtomicU32,
    tx_delay: AtomicU32,
    error_flags: AtomicU32,

    checksum: AtomicU32,
    /// Set when a driver folded new error state in from the worker task.
    error_pending: AtomicBool,
}

impl BusStats {
    pub fn new() -> BusStats {
        BusStats::default()
    }

    pub fn reset(&self) {
        for counter in [
            &self.interrupts,
            &self.packets_rx,
            &self.packets_tx,
            &self.errors_rx,
            &self.errors_tx,
            &self.rx_overflow,
            &self.tx_overflow,
            &self.tx_delay,
            &self.error_flags,
            &self.checksum,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.error_pending.store(false, Ordering::Relaxed);
    }

    pub fn count_interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_rx(&self) {
        self.packets_rx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_tx(&self) {
        self.packets_tx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_rx_overflow(&self) {
        self.rx_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_tx_overflow(&self) {
        self.tx_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_tx_delay(&self) {
        self.tx_delay.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the controller's error state: its raw flag word and its
    /// receive/transmit error counters.
    pub fn record_errors(&self, flags: u32, errors_rx: u32, errors_tx: u32) {
        self.error_flags.store(flags, Ordering::Relaxed);
        self.errors_rx.store(errors_rx, Ordering::Relaxed);
        self.errors_tx.store(errors_tx, Ordering::Relaxed);
        self.error_pending.store(true, Ordering::Relaxed);
    }

    pub fn take_error_pending(&self) -> bool {
        self.error_pending.swap(false, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BusStatus {
        BusStatus {
            interrupts: self.interrupts.load(Ordering::Relaxed),
            packets_rx: self.packets_rx.load(Ordering::Relaxed),
            packets_tx: self.packets_tx.load(Ordering::Relaxed),
            errors_rx: self.errors_rx.load(Ordering::Relaxed),
            errors_tx: self.errors_tx.load(Ordering::Relaxed),
            rx_overflow: self.rx_overflow.load(Ordering::Relaxed),
            tx_overflow: self.tx_overflow.load(Ordering::Relaxed),
            tx_delay: self.tx_delay.load(Ordering::Relaxed),
            error_flags: self.error_flags.load(Ordering::Relaxed),
        }
    }

    /// True if the counters changed since the last call. Keeps error status
    /// entries from flooding the log.
    pub fn status_changed(&self) -> bool {
        let s = self.snapshot();
        let checksum = s
            .packets_rx
            .wrapping_add(s.packets_tx)
            .wrapping_add(s.errors_rx)
            .wrapping_add(s.errors_tx)
            .wrapping_add(s.rx_overflow)
            .wrapping_add(s.tx_overflow)
            .wrapping_add(s.error_flags)
            .wrapping_add(s.tx_delay);
        self.checksum.swap(checksum, Ordering::Relaxed) != checksum
    }
}
