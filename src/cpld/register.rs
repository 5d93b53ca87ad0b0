// SPDX-License-Identifier: GPL-2.0

//! Generic register frontend.
//!
//! Exposes up to [`MAX_OFFSETS`] named registers of the parent hub, each
//! with a valid-bit mask and optional access masks. Every register becomes
//! a device attribute named after its `names` entry; writable registers
//! additionally accept stores. Partially writable registers (a writable
//! mask other than `0xff`) cannot be written through this frontend because
//! read-modify-write under the shared map lock is not expressible per
//! field, so stores to them fail with [`Error::Unsupported`].

use std::sync::Arc;

use crate::composition;
use crate::cpld::{CpldHub, RegisterProps};
use crate::dev_err;
use crate::device::{Attribute, Device};
use crate::error::{Error, Result};

/// Maximum number of registers a single frontend may expose.
pub const MAX_OFFSETS: usize = 8;

/// Per-register description as configured, for consumers that need the raw
/// masks (e.g. the fan driver validating its pwm register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    pub offset: u8,
    pub valid_mask: u8,
    pub readable_mask: u8,
    pub writable_mask: u8,
    pub volatile_mask: u8,
}

pub struct RegisterFrontend {
    dev: Arc<Device>,
    hub: Arc<CpldHub>,
    offsets: Vec<u8>,
    valid_masks: Vec<u8>,
    readable_masks: Vec<u8>,
    writable_masks: Vec<u8>,
    volatile_masks: Vec<u8>,
    names: Vec<String>,
}

impl RegisterFrontend {
    /// Probes a register frontend from its node properties and registers
    /// its offsets with the parent hub.
    ///
    /// Required properties: `offsets` (1 to [`MAX_OFFSETS`] u8 entries),
    /// `valid-masks` and `names` (one entry per offset). Optional:
    /// `readable-masks` (default all bits), `writable-masks` (default
    /// none), `volatile-masks` (default all bits).
    pub fn probe(dev: Arc<Device>, hub: Arc<CpldHub>) -> Result<Arc<Self>> {
        let offsets = CpldHub::read_property(&dev, "offsets")?;
        if offsets.is_empty() || offsets.len() > MAX_OFFSETS {
            dev_err!(dev, "invalid number of offsets: {}", offsets.len());
            return Err(Error::ConfigInvalid);
        }
        let num = offsets.len();

        let valid_masks = CpldHub::read_property_n(&dev, "valid-masks", num)?;
        let readable_masks = Self::mask_property(&dev, "readable-masks", num, 0xff)?;
        let writable_masks = Self::mask_property(&dev, "writable-masks", num, 0x00)?;
        let volatile_masks = Self::mask_property(&dev, "volatile-masks", num, 0xff)?;
        let names = Self::name_property(&dev, num)?;

        let frontend = Arc::new(RegisterFrontend {
            dev,
            hub,
            offsets,
            valid_masks,
            readable_masks,
            writable_masks,
            volatile_masks,
            names,
        });

        for idx in 0..num {
            if let Err(err) = frontend.expose(idx) {
                // Unwind attributes created so far, newest first. The
                // attribute for idx may not exist if creation itself
                // failed, hence the ignored result.
                for name in frontend.names[..=idx].iter().rev() {
                    let _ = frontend.dev.remove_attr(&composition::attr_name(name));
                }
                return Err(err);
            }
        }
        Ok(frontend)
    }

    fn mask_property(dev: &Device, name: &str, num: usize, fill: u8) -> Result<Vec<u8>> {
        if dev.node().property_present(name) {
            CpldHub::read_property_n(dev, name, num)
        } else {
            Ok(vec![fill; num])
        }
    }

    fn name_property(dev: &Device, num: usize) -> Result<Vec<String>> {
        let count = dev.node().property_count_elem::<String>("names")?;
        if count != num {
            dev_err!(dev, "expected {} register names, got {}", num, count);
            return Err(Error::ConfigInvalid);
        }
        dev.node()
            .property_read_array_vec::<String>("names", num)
            .required_by(dev)
    }

    /// Creates the attribute for one register and declares its access
    /// properties to the hub.
    fn expose(self: &Arc<Self>, idx: usize) -> Result {
        let attr_name = composition::attr_name(&self.names[idx]);
        let this = Arc::clone(self);
        let show = move || -> Result<String> { Ok(format!("{:#04x}\n", this.get_by_index(idx)?)) };
        let attr = if self.writable_masks[idx] != 0 {
            let this = Arc::clone(self);
            Attribute::read_write(attr_name, show, move |buf| {
                this.set_by_index(idx, parse_u8(buf)?)
            })
        } else {
            Attribute::read_only(attr_name, show)
        };
        self.dev.create_attr(attr)?;

        let mut props = RegisterProps::NONE;
        if self.valid_masks[idx] != 0 {
            props |= RegisterProps::READABLE;
        }
        if self.writable_masks[idx] != 0 {
            props |= RegisterProps::WRITABLE;
        }
        if self.volatile_masks[idx] != 0 {
            props |= RegisterProps::VOLATILE;
        }
        self.hub.set_register_properties(self.offsets[idx], props)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Looks up the configured description of a named register.
    pub fn describe(&self, name: &str) -> Option<RegisterField> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(RegisterField {
            offset: self.offsets[idx],
            valid_mask: self.valid_masks[idx],
            readable_mask: self.readable_masks[idx],
            writable_mask: self.writable_masks[idx],
            volatile_mask: self.volatile_masks[idx],
        })
    }

    /// Reads a register by name, masked to its valid bits.
    pub fn get(&self, name: &str) -> Result<u8> {
        self.get_by_index(self.index_of(name)?)
    }

    /// Writes a register by name. The value is masked to the valid bits.
    pub fn set(&self, name: &str, value: u8) -> Result {
        self.set_by_index(self.index_of(name)?, value)
    }

    /// Reads a register by its position in the declared offset list.
    ///
    /// This is the consumer entry point for references that carry a
    /// register index as their argument.
    pub fn get_index(&self, index: usize) -> Result<u8> {
        self.check_index(index)?;
        self.get_by_index(index)
    }

    /// Writes a register by its position in the declared offset list.
    pub fn set_index(&self, index: usize, value: u8) -> Result {
        self.check_index(index)?;
        self.set_by_index(index, value)
    }

    /// Validates a register index against the declared offset list.
    pub fn check_index(&self, index: usize) -> Result {
        if index >= self.names.len() {
            dev_err!(self.dev, "register index {} out of range", index);
            return Err(Error::ConfigInvalid);
        }
        Ok(())
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        match self.names.iter().position(|n| n == name) {
            Some(idx) => Ok(idx),
            None => {
                dev_err!(self.dev, "unknown register '{}'", name);
                Err(Error::ConfigInvalid)
            }
        }
    }

    fn get_by_index(&self, idx: usize) -> Result<u8> {
        let mut map = self.hub.acquire_register_map()?;
        let value = map.read(self.offsets[idx]);
        self.hub.release_register_map(map)?;
        Ok(value? & self.valid_masks[idx])
    }

    fn set_by_index(&self, idx: usize, value: u8) -> Result {
        if self.writable_masks[idx] != 0xff {
            dev_err!(
                self.dev,
                "register '{}' is not fully writable",
                self.names[idx]
            );
            return Err(Error::Unsupported);
        }
        let mut map = self.hub.acquire_register_map()?;
        let res = map.write(self.offsets[idx], value & self.valid_masks[idx]);
        self.hub.release_register_map(map)?;
        res
    }
}

fn parse_u8(buf: &str) -> Result<u8> {
    u8::try_from(composition::parse_u64(buf)?).map_err(|_| Error::ConfigInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{FwNode, NodeBuilder};
    use crate::regmap::{BusHandle, MapConfig, RamBus, Regmap};

    fn frontend_node(extra: impl FnOnce(NodeBuilder) -> NodeBuilder) -> Arc<FwNode> {
        let node = NodeBuilder::new("regs")
            .property_u64s("offsets", [0x04, 0x05])
            .property_u64s("valid-masks", [0xff, 0x0f])
            .property_strs("names", ["board-id", "led-ctl"]);
        extra(node).build()
    }

    fn test_hub(bus: RamBus) -> Arc<CpldHub> {
        CpldHub::new(
            Device::new(NodeBuilder::new("cpld").build()),
            Box::new(Regmap::new(bus, MapConfig::permissive())),
        )
    }

    fn probe_pair(node: Arc<FwNode>) -> (Arc<RegisterFrontend>, BusHandle) {
        let bus = RamBus::new();
        let handle = bus.handle();
        let frontend = RegisterFrontend::probe(Device::new(node), test_hub(bus)).unwrap();
        (frontend, handle)
    }

    #[test]
    fn probe_applies_mask_defaults() {
        let (frontend, _) = probe_pair(frontend_node(|n| n));
        let field = frontend.describe("led-ctl").unwrap();
        assert_eq!(field.offset, 0x05);
        assert_eq!(field.valid_mask, 0x0f);
        assert_eq!(field.readable_mask, 0xff);
        assert_eq!(field.writable_mask, 0x00);
        assert_eq!(field.volatile_mask, 0xff);
    }

    #[test]
    fn reads_are_masked_to_valid_bits() {
        let (frontend, handle) = probe_pair(frontend_node(|n| n));
        handle.set_value(0x05, 0xfa);
        assert_eq!(frontend.get("led-ctl"), Ok(0x0a));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let (frontend, _) = probe_pair(frontend_node(|n| n));
        assert_eq!(frontend.get("nope"), Err(Error::ConfigInvalid));
    }

    #[test]
    fn partially_writable_register_rejects_writes() {
        let node = frontend_node(|n| n.property_u64s("writable-masks", [0x00, 0x0f]));
        let (frontend, handle) = probe_pair(node);
        assert_eq!(frontend.set("led-ctl", 0x3), Err(Error::Unsupported));
        assert_eq!(handle.total_writes(), 0);
    }

    #[test]
    fn fully_writable_register_accepts_masked_writes() {
        let node = frontend_node(|n| n.property_u64s("writable-masks", [0x00, 0xff]));
        let (frontend, handle) = probe_pair(node);
        frontend.set("led-ctl", 0xf7).unwrap();
        assert_eq!(handle.value(0x05), 0x07);
        assert_eq!(handle.writes(0x05), 1);
    }

    #[test]
    fn read_only_register_has_no_store() {
        let (frontend, handle) = probe_pair(frontend_node(|n| n));
        handle.set_value(0x04, 0x42);
        let dev = frontend.device();
        assert_eq!(dev.show_attr("board_id").unwrap(), "0x42\n");
        assert_eq!(dev.store_attr("board_id", "0"), Err(Error::Unsupported));
    }

    #[test]
    fn store_parses_hex_and_decimal() {
        let node = frontend_node(|n| n.property_u64s("writable-masks", [0x00, 0xff]));
        let (frontend, handle) = probe_pair(node);
        let dev = frontend.device();
        dev.store_attr("led_ctl", "0x0c\n").unwrap();
        assert_eq!(handle.value(0x05), 0x0c);
        dev.store_attr("led_ctl", "5").unwrap();
        assert_eq!(handle.value(0x05), 0x05);
        assert_eq!(dev.store_attr("led_ctl", "wat"), Err(Error::ConfigInvalid));
    }

    #[test]
    fn too_many_offsets_are_rejected() {
        let node = NodeBuilder::new("regs")
            .property_u64s("offsets", [0, 1, 2, 3, 4, 5, 6, 7, 8])
            .property_u64s("valid-masks", [0xff; 9])
            .property_strs("names", ["a", "b", "c", "d", "e", "f", "g", "h", "i"])
            .build();
        assert_eq!(
            RegisterFrontend::probe(Device::new(node), test_hub(RamBus::new())).err(),
            Some(Error::ConfigInvalid)
        );
    }

    #[test]
    fn name_count_mismatch_is_rejected() {
        let node = NodeBuilder::new("regs")
            .property_u64s("offsets", [0x04, 0x05])
            .property_u64s("valid-masks", [0xff, 0xff])
            .property_strs("names", ["only-one"])
            .build();
        assert_eq!(
            RegisterFrontend::probe(Device::new(node), test_hub(RamBus::new())).err(),
            Some(Error::ConfigInvalid)
        );
    }

    #[test]
    fn failed_probe_unwinds_created_attributes() {
        // Second offset is out of range, so its property registration
        // fails after both attributes were created.
        let node = NodeBuilder::new("regs")
            .property_u64s("offsets", [0x04, 0xff])
            .property_u64s("valid-masks", [0xff, 0xff])
            .property_strs("names", ["good", "bad"])
            .build();
        let dev = Device::new(node);
        assert_eq!(
            RegisterFrontend::probe(Arc::clone(&dev), test_hub(RamBus::new())).err(),
            Some(Error::InvalidOffset(0xff))
        );
        assert!(dev.attr_names().is_empty());
    }
}
