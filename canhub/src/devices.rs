//! Wiring configured buses to their (virtual) hardware.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;

use crate::config::{BusKind, Config};
use crate::driver::mcp2515::{Mcp2515Driver, Mcp2515Interrupt};
use crate::driver::onchip::{OnChipDriver, OnChipInterrupt};
use crate::driver::Speed;
use crate::hub::{Hub, HubBuilder};
use crate::hw::virt::{VirtualController, VirtualMcp2515};

/// Hardware behind one bus together with its interrupt handler.
pub enum Hardware {
    OnChip {
        controller: Arc<VirtualController>,
        interrupt: OnChipInterrupt<VirtualController>,
    },
    Mcp2515 {
        chip: VirtualMcp2515,
        interrupt: Mcp2515Interrupt,
    },
}

impl Hardware {
    /// Run the interrupt handler for as long as the interrupt line is
    /// asserted. Returns how many times it ran.
    pub fn service_interrupts(&self) -> usize {
        match self {
            Hardware::OnChip {
                controller,
                interrupt,
            } => {
                let mut handled = 0;
                while controller.interrupt_pending() {
                    interrupt.handle();
                    handled += 1;
                }
                handled
            }
            // Level triggered until the worker drains the chip, so one
            // RxCallback per round is enough.
            Hardware::Mcp2515 { chip, interrupt } => {
                if chip.interrupt_pending() {
                    interrupt.handle();
                    1
                } else {
                    0
                }
            }
        }
    }
}

pub struct Devices {
    pub hub: Arc<Hub>,
    pub hardware: Vec<Hardware>,
}

pub fn build(config: &Config) -> anyhow::Result<Devices> {
    let mut builder = HubBuilder::new();
    let mut names = HashSet::new();
    let mut hardware = Vec::new();

    for bus in &config.buses {
        if !names.insert(bus.name.as_str()) {
            bail!("Bus {} configured twice", bus.name);
        }
        match bus.kind {
            BusKind::VirtualOnChip => {
                let controller = Arc::new(VirtualController::new());
                let driver = OnChipDriver::new(controller.clone());
                let can = builder.add_bus(&bus.name, Box::new(driver));
                let interrupt = OnChipInterrupt::new(can, controller.clone(), builder.queue());
                hardware.push(Hardware::OnChip {
                    controller,
                    interrupt,
                });
            }
            BusKind::VirtualMcp2515 => {
                let chip = VirtualMcp2515::new();
                let can = builder.add_bus(&bus.name, Box::new(Mcp2515Driver::new(chip.clone())));
                let interrupt = Mcp2515Interrupt::new(can, builder.queue());
                hardware.push(Hardware::Mcp2515 { chip, interrupt });
            }
        }
        log::debug!("Configured bus {} ({:?})", bus.name, bus.kind);
    }

    Ok(Devices {
        hub: builder.build(),
        hardware,
    })
}

/// Start every bus that has a `start` section.
pub fn start_buses(hub: &Hub, config: &Config) -> anyhow::Result<()> {
    for bus in &config.buses {
        let start = match &bus.start {
            Some(start) => start,
            None => continue,
        };
        let speed = match Speed::from_bps(start.speed) {
            Some(speed) => speed,
            None => bail!("Bus {}: unsupported speed {}", bus.name, start.speed),
        };
        if let Some(can) = hub.find_bus(&bus.name) {
            can.start(start.mode, speed)?;
        }
    }
    Ok(())
}

/// Stand-in for interrupt lines: check every device each `period`.
pub async fn poll_interrupts(hardware: Vec<Hardware>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        for device in &hardware {
            device.service_interrupts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::PowerMode;

    #[test]
    fn builds_and_starts_configured_buses() {
        let config = Config::parse(
            r#"
            [[bus]]
            name = "can1"
            kind = "virtual-onchip"
            start = { mode = "active", speed = 500000 }

            [[bus]]
            name = "can2"
            kind = "virtual-mcp2515"
            start = { mode = "listen", speed = 125000 }

            [[bus]]
            name = "can3"
            kind = "virtual-mcp2515"
            "#,
        )
        .unwrap();
        let devices = build(&config).unwrap();
        start_buses(&devices.hub, &config).unwrap();

        let power: Vec<_> = devices
            .hub
            .buses()
            .iter()
            .map(|bus| bus.power_mode())
            .collect();
        assert_eq!(power, vec![PowerMode::On, PowerMode::On, PowerMode::Off]);
        assert_eq!(devices.hardware.len(), 3);
    }

    #[test]
    fn rejects_duplicates_and_bad_speeds() {
        let duplicate = Config::parse(
            "[[bus]]\nname = \"can1\"\nkind = \"virtual-onchip\"\n\
             [[bus]]\nname = \"can1\"\nkind = \"virtual-mcp2515\"\n",
        )
        .unwrap();
        assert!(build(&duplicate).is_err());

        let slow = Config::parse(
            "[[bus]]\nname = \"can1\"\nkind = \"virtual-onchip\"\n\
             start = { mode = \"active\", speed = 33333 }\n",
        )
        .unwrap();
        let devices = build(&slow).unwrap();
        assert!(start_buses(&devices.hub, &slow).is_err());
    }
}
