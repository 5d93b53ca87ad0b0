// SPDX-License-Identifier: GPL-2.0

//! Helpers that bind property-described peripherals together: name
//! transliteration between property style and attribute style, unit-address
//! extraction, child-device discovery, and reference resolution to live
//! devices.

use std::sync::Arc;

use crate::device::Device;
use crate::driver::{DeviceRegistry, LiveDevice};
use crate::error::{Error, Result};
use crate::gpio::{Chip, Line};
use crate::property::{FwNode, NArgs};
use crate::{dev_dbg, dev_err};

/// Translates a property-style name (`a-b-c`) to attribute style (`a_b_c`).
pub fn attr_name(property: &str) -> String {
    property
        .chars()
        .map(|c| if c == '-' { '_' } else { c })
        .collect()
}

/// Translates an attribute-style name (`a_b_c`) to property style (`a-b-c`).
pub fn property_name(attr: &str) -> String {
    attr.chars().map(|c| if c == '_' { '-' } else { c }).collect()
}

/// Parses an attribute store payload as an integer, accepting a `0x`
/// prefix for hexadecimal.
pub fn parse_u64(buf: &str) -> Result<u64> {
    let s = buf.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| Error::ConfigInvalid)
}

/// The unit address declared on a node (the `_ADR` equivalent).
pub fn device_address(node: &FwNode) -> Result<u64> {
    match node.address() {
        Some(addr) => Ok(addr),
        None => {
            log::error!("{}: node has no address", node.path());
            Err(Error::ConfigInvalid)
        }
    }
}

/// A typed child device discovered under a parent node.
#[derive(Debug, Clone)]
pub struct ChildDescriptor {
    pub node: Arc<FwNode>,
    pub kind: String,
    pub address: Option<u64>,
}

/// Scans a device's child nodes for spawnable children.
///
/// Children without a `compatible` string are not devices of their own
/// (e.g. mux channel nodes) and are skipped.
pub fn scan_children(dev: &Device) -> Vec<ChildDescriptor> {
    let mut found = Vec::new();
    for child in dev.node().children() {
        let Some(kind) = child.property_read::<String>("compatible").optional() else {
            dev_dbg!(dev, "skipping child '{}' without compatible", child.name());
            continue;
        };
        found.push(ChildDescriptor {
            node: child.clone(),
            kind,
            address: child.address(),
        });
    }
    found
}

/// Resolves a reference property to a live, already probed device.
///
/// A reference whose target node exists but has no live device yet is the
/// deferred-probe case and fails with [`Error::DeviceUnavailable`].
pub fn resolve_reference(
    registry: &DeviceRegistry,
    node: &Arc<FwNode>,
    prop: &str,
    nargs: NArgs<'_>,
    index: usize,
) -> Result<(LiveDevice, Vec<u64>)> {
    let reference = node.property_get_reference_args(prop, nargs, index)?;
    let Some(live) = registry.lookup(&reference.node) else {
        log::debug!(
            "{}: reference '{}' target {} is not ready",
            node.path(),
            prop,
            reference.node.path()
        );
        return Err(Error::DeviceUnavailable);
    };
    Ok((live, reference.args))
}

/// Resolves an optional `*-gpios` reference on `dev` to a GPIO line handle.
///
/// An absent property resolves to `None`. A present property must point at
/// a live GPIO expander and carry the pin number as its sole argument; a
/// target that is not yet probed defers the caller.
pub fn resolve_gpio_line(
    registry: &DeviceRegistry,
    dev: &Device,
    prop: &str,
) -> Result<Option<Line>> {
    if !dev.node().property_present(prop) {
        return Ok(None);
    }
    let (live, args) = resolve_reference(registry, dev.node(), prop, NArgs::Prop("#gpio-cells"), 0)?;
    let Some(chip) = live.as_gpio() else {
        dev_err!(dev, "'{}' does not point at a GPIO expander", prop);
        return Err(Error::ConfigInvalid);
    };
    let Some(&pin) = args.first() else {
        dev_err!(dev, "'{}' carries no pin number", prop);
        return Err(Error::ConfigInvalid);
    };
    let pin = usize::try_from(pin).map_err(|_| Error::ConfigInvalid)?;
    let chip: Arc<dyn Chip> = chip.clone();
    Ok(Some(Line::new(chip, pin)?))
}
