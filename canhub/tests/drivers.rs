mod common;

use std::sync::Arc;
use std::time::Duration;

use can_format::{BusName, Frame, LogEntry, StatusKind};
use canhub::driver::mcp2515::{Mcp2515Driver, Mcp2515Interrupt};
use canhub::driver::{BusMode, Speed};
use canhub::hw::virt::VirtualMcp2515;
use canhub::hw::{irq, ErrorRegisters};
use canhub::{CanBus, Hub, HubBuilder, WriteOutcome};
use tokio::sync::mpsc;

use common::{eventually, onchip_hub, Capture};

struct Mcp2515Bus {
    hub: Arc<Hub>,
    bus: Arc<CanBus>,
    chip: VirtualMcp2515,
    interrupt: Mcp2515Interrupt,
}

fn mcp2515_hub() -> Mcp2515Bus {
    let mut builder = HubBuilder::new();
    let chip = VirtualMcp2515::new();
    let bus = builder.add_bus("can2", Box::new(Mcp2515Driver::new(chip.clone())));
    let interrupt = Mcp2515Interrupt::new(bus.clone(), builder.queue());
    Mcp2515Bus {
        hub: builder.build(),
        bus,
        chip,
        interrupt,
    }
}

async fn next_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame within a second")
        .expect("listener channel open")
}

#[tokio::test]
async fn mcp2515_interrupt_drains_both_buffers() {
    let setup = mcp2515_hub();
    let (tx, mut rx) = mpsc::channel(8);
    setup.hub.register_listener(tx);
    setup.hub.start();
    setup.bus.start(BusMode::Listen, Speed::Kbps250).unwrap();

    let first = Frame::standard(0x321, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    let second = Frame::extended(0x1234567, &[]).unwrap();
    assert!(setup.chip.inject(&first));
    assert!(setup.chip.inject(&second));
    assert!(setup.chip.interrupt_pending());
    setup.interrupt.handle();

    let can2 = BusName::new("can2");
    assert_eq!(next_frame(&mut rx).await, first.with_origin(can2.clone()));
    assert_eq!(next_frame(&mut rx).await, second.with_origin(can2));

    let status = setup.bus.stats().snapshot();
    assert_eq!(status.interrupts, 1);
    assert_eq!(status.packets_rx, 2);
    eventually(|| !setup.chip.interrupt_pending()).await;
    setup.hub.shutdown();
}

#[tokio::test]
async fn mcp2515_transmits_through_free_buffers() {
    let setup = mcp2515_hub();
    setup.bus.start(BusMode::Active, Speed::Kbps500).unwrap();

    let frame = Frame::standard(0x7df, &[0x02, 0x01, 0x0d]).unwrap();
    assert_eq!(
        setup.bus.write(&frame, Duration::ZERO).await.unwrap(),
        WriteOutcome::Sent
    );
    assert_eq!(setup.chip.transmitted(), vec![frame]);
    assert_eq!(setup.bus.stats().snapshot().packets_tx, 1);
}

#[tokio::test]
async fn mcp2515_overflow_is_reported() {
    let setup = mcp2515_hub();
    let seen = Capture::install(&setup.hub);
    setup.hub.start();
    setup.bus.start(BusMode::Active, Speed::Kbps125).unwrap();

    for id in 0..3 {
        setup.chip.inject(&Frame::standard(id, &[]).unwrap());
    }
    setup.interrupt.handle();

    eventually(|| setup.bus.stats().snapshot().packets_rx == 2).await;
    let status = setup.bus.stats().snapshot();
    assert_eq!(status.rx_overflow, 1);
    eventually(|| {
        seen.lock()
            .iter()
            .any(|message| matches!(message.entry, LogEntry::Status(StatusKind::Error, _)))
    })
    .await;
    setup.hub.shutdown();
}

#[tokio::test]
async fn onchip_errors_are_recorded_and_logged() {
    let setup = onchip_hub("can1");
    let seen = Capture::install(&setup.hub);
    setup.hub.start();
    setup.bus.start(BusMode::Active, Speed::Kbps500).unwrap();

    setup.controller.raise_errors(
        irq::DATA_OVERRUN | irq::BUS_ERROR,
        ErrorRegisters {
            status: 0x02,
            ecc: 0x1b,
            rx_errors: 5,
            tx_errors: 0,
        },
    );
    setup.interrupt.handle();
    assert!(!setup.controller.interrupt_pending());

    let status = setup.bus.stats().snapshot();
    assert_eq!(status.error_flags, 0x0088_021b);
    assert_eq!(status.rx_overflow, 1);
    assert_eq!(status.errors_rx, 5);
    assert_eq!(status.interrupts, 1);

    eventually(|| {
        seen.lock().iter().any(|message| {
            message.origin == Some(BusName::new("can1"))
                && matches!(
                    &message.entry,
                    LogEntry::Status(StatusKind::Error, status) if status.error_flags == 0x0088_021b
                )
        })
    })
    .await;
    setup.hub.shutdown();
}

#[tokio::test]
async fn onchip_transmit_interrupt_drains_deferred_frames() {
    let setup = onchip_hub("can1");
    setup.hub.start();
    setup.bus.start(BusMode::Active, Speed::Kbps1000).unwrap();
    setup.controller.hold_transmissions(true);

    for id in 0..3 {
        let frame = Frame::standard(0x500 + id, &[]).unwrap();
        setup.bus.write(&frame, Duration::ZERO).await.unwrap();
    }
    assert_eq!(setup.bus.deferred(), 2);

    setup.controller.hold_transmissions(false);
    setup.controller.complete_transmission();
    setup.interrupt.handle();

    eventually(|| setup.bus.deferred() == 0).await;
    let ids: Vec<_> = setup
        .controller
        .transmitted()
        .iter()
        .map(Frame::id)
        .collect();
    assert_eq!(ids, vec![0x500, 0x501, 0x502]);
    setup.hub.shutdown();
}
