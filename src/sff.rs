// SPDX-License-Identifier: GPL-2.0

//! SFF transceiver peripheral.
//!
//! A transceiver node references the I2C adapter its module EEPROM
//! answers on, either a root adapter or one channel of a CPLD-driven mux,
//! plus up to six control and status GPIO lines. Each found line becomes
//! an attribute named after its property, read-only for inputs and
//! read-write for outputs.

use std::sync::Arc;

use crate::composition;
use crate::device::{Attribute, Device};
use crate::driver::System;
use crate::error::{Error, Result};
use crate::gpio::{Line, LineDirection};
use crate::i2c::{Adapter, ClaimedChannel, MuxChannelAdapter};
use crate::property::NArgs;
use crate::{dev_dbg, dev_info};

/// GPIO reference properties a transceiver may carry.
const GPIO_PROPS: [&str; 6] = [
    "present-gpios",
    "tx-fault-gpios",
    "tx-enable-gpios",
    "rx-los-gpios",
    "low-power-gpios",
    "reset-gpios",
];

/// The adapter the module EEPROM is reachable through.
enum SerialInterface {
    Root(Arc<Adapter>),
    Channel(Arc<MuxChannelAdapter>),
}

impl SerialInterface {
    fn name(&self) -> &str {
        match self {
            SerialInterface::Root(adapter) => adapter.name(),
            SerialInterface::Channel(chan) => chan.name(),
        }
    }
}

struct NamedLine {
    attr: String,
    line: Line,
}

pub struct Sff {
    dev: Arc<Device>,
    serial: SerialInterface,
    lines: Vec<NamedLine>,
}

impl std::fmt::Debug for Sff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sff")
            .field("dev", &self.dev.name())
            .field("serial", &self.serial.name())
            .finish_non_exhaustive()
    }
}

impl Sff {
    pub fn probe(dev: Arc<Device>, system: &System) -> Result<Arc<Self>> {
        let serial = Self::serial_interface(&dev, system)?;

        let mut lines = Vec::new();
        for prop in GPIO_PROPS {
            let Some(line) = composition::resolve_gpio_line(&system.devices, &dev, prop)? else {
                continue;
            };
            let stem = prop.strip_suffix("-gpios").unwrap_or(prop);
            lines.push(NamedLine {
                attr: composition::attr_name(stem),
                line,
            });
        }

        let sff = Arc::new(Sff { dev, serial, lines });
        sff.register_attrs()?;
        Ok(sff)
    }

    /// Resolves the `serial-interface` reference to an adapter.
    ///
    /// The target is either a root adapter's node or a channel node under
    /// an I2C mux frontend. A target that is not backed by a live adapter
    /// yet defers the probe.
    fn serial_interface(dev: &Arc<Device>, system: &System) -> Result<SerialInterface> {
        let reference = dev
            .node()
            .property_get_reference_args("serial-interface", NArgs::N(0), 0)?;
        let target = reference.node;

        if let Some(adapter) = system.i2c.find_by_node(&target) {
            return Ok(SerialInterface::Root(adapter));
        }

        // A mux channel is described as a child node of the mux device.
        if let Some(parent) = target.parent() {
            if let Some(mux) = system.devices.lookup(&parent).and_then(|l| l.as_mux().cloned()) {
                let addr = composition::device_address(&target)?;
                let chan = u8::try_from(addr).map_err(|_| Error::ConfigInvalid)?;
                if let Some(adapter) = mux.channel_adapter(chan) {
                    return Ok(SerialInterface::Channel(adapter));
                }
            }
        }

        dev_dbg!(dev, "serial-interface is not ready");
        Err(Error::DeviceUnavailable)
    }

    fn register_attrs(&self) -> Result {
        let mut attrs = Vec::new();

        let name = self.serial.name().to_string();
        attrs.push(Attribute::read_only("serial_interface", move || {
            Ok(format!("{}\n", name))
        }));

        for named in &self.lines {
            let show = {
                let line = named.line.clone();
                move || -> Result<String> { Ok(format!("{}\n", u8::from(line.get()?))) }
            };
            match named.line.direction()? {
                LineDirection::Input => {
                    attrs.push(Attribute::read_only(named.attr.clone(), show));
                }
                LineDirection::Output => {
                    let store = {
                        let line = named.line.clone();
                        move |buf: &str| -> Result { line.set(composition::parse_u64(buf)? != 0) }
                    };
                    attrs.push(Attribute::read_write(named.attr.clone(), show, store));
                }
            }
        }

        dev_info!(self.dev, "added sff with {} line attrs", self.lines.len());
        self.dev.create_attrs(attrs)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    /// Name of the adapter the module EEPROM answers on.
    pub fn serial_interface_name(&self) -> &str {
        self.serial.name()
    }

    /// Routes the serial interface to this transceiver for the lifetime of
    /// the returned guard. A transceiver on a root adapter needs no
    /// routing.
    pub fn claim_serial(&self) -> Result<Option<ClaimedChannel>> {
        match &self.serial {
            SerialInterface::Root(_) => Ok(None),
            SerialInterface::Channel(chan) => Ok(Some(chan.claim()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{FwNode, NodeBuilder};
    use crate::regmap::RamBus;

    fn sff_tree(sff: NodeBuilder) -> Arc<FwNode> {
        NodeBuilder::new("board")
            .child(NodeBuilder::new("smbus"))
            .child(
                NodeBuilder::new("cpld")
                    .property_str("protocol", "register")
                    .property_u64("register-bits", 8)
                    .child(
                        NodeBuilder::new("gpio")
                            .address(0x2)
                            .property_str("compatible", "cpld-gpio")
                            .property_u64("#gpio-cells", 1)
                            .property_u64s("offsets", [0x40])
                            .property_u64s("valid-masks", [0x3f])
                            .property_u64s("direction-masks", [0x30])
                            .property_strs(
                                "names",
                                ["present", "tx-fault", "rx-los", "spare", "tx-enable", "reset"],
                            ),
                    )
                    .child(
                        NodeBuilder::new("mux")
                            .address(0x3)
                            .property_str("compatible", "cpld-i2c-mux")
                            .property_u64("offset", 0x20)
                            .property_str("encoding", "index")
                            .property_u64("deselect-value", 0xff)
                            .flag("deselect-on-exit")
                            .reference("i2c-parent", "/smbus", [])
                            .child(NodeBuilder::new("sfp1").address(0x1)),
                    ),
            )
            .child(sff)
            .build()
    }

    fn probe_board(tree: &Arc<FwNode>, bus: RamBus) -> System {
        let system = System::new();
        system
            .i2c
            .register_adapter("i2c-0", Some(tree.find_node("/smbus").unwrap()))
            .unwrap();
        let cpld = tree.find_node("/cpld").unwrap();
        assert!(system.probe_hub(&cpld, bus).ready().is_some());
        system
    }

    #[test]
    fn transceiver_on_mux_channel() {
        let tree = sff_tree(
            NodeBuilder::new("sff1")
                .property_str("compatible", "sff-transceiver")
                .reference("serial-interface", "/cpld/mux/sfp1", [])
                .reference("present-gpios", "/cpld/gpio", [0])
                .reference("tx-enable-gpios", "/cpld/gpio", [4])
                .reference("reset-gpios", "/cpld/gpio", [5]),
        );
        let bus = RamBus::new();
        let handle = bus.handle();
        let system = probe_board(&tree, bus);

        let node = tree.find_node("/sff1").unwrap();
        let live = system.probe_consumer(&node).ready().unwrap();
        let sff = live.as_sff().unwrap().clone();

        assert_eq!(sff.serial_interface_name(), "i2c-0-mux.1");
        assert_eq!(
            sff.device().attr_names(),
            ["serial_interface", "present", "tx_enable", "reset"]
        );
        assert_eq!(
            sff.device().show_attr("serial_interface").unwrap(),
            "i2c-0-mux.1\n"
        );

        // Routing the EEPROM selects channel 1 and deselects on drop.
        let guard = sff.claim_serial().unwrap();
        assert!(guard.is_some());
        assert_eq!(handle.value(0x20), 0x01);
        drop(guard);
        assert_eq!(handle.value(0x20), 0xff);
    }

    #[test]
    fn line_attrs_follow_direction() {
        let tree = sff_tree(
            NodeBuilder::new("sff1")
                .property_str("compatible", "sff-transceiver")
                .reference("serial-interface", "/smbus", [])
                .reference("present-gpios", "/cpld/gpio", [0])
                .reference("tx-enable-gpios", "/cpld/gpio", [4]),
        );
        let bus = RamBus::new();
        let handle = bus.handle();
        handle.set_value(0x40, 0x01);
        let system = probe_board(&tree, bus);

        let node = tree.find_node("/sff1").unwrap();
        let live = system.probe_consumer(&node).ready().unwrap();
        let sff = live.as_sff().unwrap().clone();

        assert_eq!(sff.device().show_attr("present").unwrap(), "1\n");
        assert_eq!(
            sff.device().store_attr("present", "0").unwrap_err(),
            Error::Unsupported
        );

        sff.device().store_attr("tx_enable", "1").unwrap();
        assert_eq!(handle.value(0x40) & 0x10, 0x10);
        assert_eq!(sff.device().show_attr("tx_enable").unwrap(), "1\n");
        sff.device().store_attr("tx_enable", "0").unwrap();
        assert_eq!(handle.value(0x40) & 0x10, 0x00);
    }

    #[test]
    fn transceiver_on_root_adapter() {
        let tree = sff_tree(
            NodeBuilder::new("sff1")
                .property_str("compatible", "sff-transceiver")
                .reference("serial-interface", "/smbus", []),
        );
        let system = probe_board(&tree, RamBus::new());

        let node = tree.find_node("/sff1").unwrap();
        let live = system.probe_consumer(&node).ready().unwrap();
        let sff = live.as_sff().unwrap().clone();

        assert_eq!(sff.serial_interface_name(), "i2c-0");
        assert!(sff.claim_serial().unwrap().is_none());
        assert_eq!(sff.device().attr_names(), ["serial_interface"]);
    }

    #[test]
    fn transceiver_defers_until_mux_is_live() {
        let tree = sff_tree(
            NodeBuilder::new("sff1")
                .property_str("compatible", "sff-transceiver")
                .reference("serial-interface", "/cpld/mux/sfp1", []),
        );
        let system = System::new();
        system
            .i2c
            .register_adapter("i2c-0", Some(tree.find_node("/smbus").unwrap()))
            .unwrap();

        let node = tree.find_node("/sff1").unwrap();
        assert!(system.probe_consumer(&node).is_deferred());
        assert_eq!(system.deferred_count(), 1);

        let cpld = tree.find_node("/cpld").unwrap();
        assert!(system.probe_hub(&cpld, RamBus::new()).ready().is_some());
        assert_eq!(system.retry_deferred(), 1);
        assert!(system.devices.lookup(&node).unwrap().as_sff().is_some());
    }

    #[test]
    fn gpio_reference_must_name_an_expander() {
        // The reference resolves, but the live device is not a GPIO chip.
        let tree = NodeBuilder::new("board")
            .child(NodeBuilder::new("smbus"))
            .child(
                NodeBuilder::new("cpld")
                    .property_str("protocol", "register")
                    .property_u64("register-bits", 8)
                    .child(
                        NodeBuilder::new("regs")
                            .address(0x1)
                            .property_str("compatible", "cpld-register")
                            .property_u64("#gpio-cells", 1)
                            .property_u64s("offsets", [0x04])
                            .property_u64s("valid-masks", [0xff])
                            .property_strs("names", ["ctrl"]),
                    ),
            )
            .child(
                NodeBuilder::new("sff1")
                    .property_str("compatible", "sff-transceiver")
                    .reference("serial-interface", "/smbus", [])
                    .reference("present-gpios", "/cpld/regs", [0]),
            )
            .build();
        let system = probe_board(&tree, RamBus::new());
        let dev = Device::new(tree.find_node("/sff1").unwrap());
        assert_eq!(Sff::probe(dev, &system).unwrap_err(), Error::ConfigInvalid);
    }
}
