// SPDX-License-Identifier: GPL-2.0

//! GPIO frontend.
//!
//! Presents pins scattered across CPLD byte registers as one GPIO chip.
//! Which bits are pins and which way they point is entirely
//! property-described: a `valid-masks` bit marks a real pin, the matching
//! `direction-masks` bit marks it as an output. Logical pin numbers count
//! only the valid bits, offset-major and bit-minor, so the numbering is
//! stable for a given description. Direction is wiring, not configuration;
//! the direction setters only confirm it.

use std::sync::Arc;

use crate::cpld::register::MAX_OFFSETS;
use crate::cpld::{CpldHub, RegisterProps};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::gpio::{Chip, LineDirection};
use crate::{dev_dbg, dev_err};

pub struct GpioFrontend {
    dev: Arc<Device>,
    hub: Arc<CpldHub>,
    offsets: Vec<u8>,
    valid_masks: Vec<u8>,
    direction_masks: Vec<u8>,
    names: Vec<String>,
}

impl GpioFrontend {
    /// Probes a GPIO frontend from its node properties and registers its
    /// offsets with the parent hub.
    ///
    /// `offsets`, `valid-masks` and `direction-masks` are required, the
    /// mask arrays with one entry per offset. `names` must hold exactly
    /// one string per valid bit.
    pub fn probe(dev: Arc<Device>, hub: Arc<CpldHub>) -> Result<Arc<Self>> {
        let offsets = CpldHub::read_property(&dev, "offsets")?;
        if offsets.is_empty() || offsets.len() > MAX_OFFSETS {
            dev_err!(dev, "invalid number of offsets: {}", offsets.len());
            return Err(Error::ConfigInvalid);
        }
        let num = offsets.len();

        let valid_masks = CpldHub::read_property_n(&dev, "valid-masks", num)?;
        let direction_masks = CpldHub::read_property_n(&dev, "direction-masks", num)?;

        let num_gpios: usize = valid_masks.iter().map(|m| m.count_ones() as usize).sum();
        let name_count = dev.node().property_count_elem::<String>("names")?;
        if name_count != num_gpios {
            dev_err!(dev, "expected {} pin names, got {}", num_gpios, name_count);
            return Err(Error::ConfigInvalid);
        }
        let names = dev
            .node()
            .property_read_array_vec::<String>("names", num_gpios)
            .required_by(&dev)?;

        let frontend = Arc::new(GpioFrontend {
            dev,
            hub,
            offsets,
            valid_masks,
            direction_masks,
            names,
        });

        for idx in 0..num {
            let mut props = RegisterProps::NONE;
            if frontend.valid_masks[idx] != 0 {
                props |= RegisterProps::READABLE;
            }
            if frontend.direction_masks[idx] != 0 {
                props |= RegisterProps::WRITABLE;
            }
            frontend
                .hub
                .set_register_properties(frontend.offsets[idx], props)?;
        }

        for pin in 0..num_gpios {
            dev_dbg!(
                frontend.dev,
                "pin {} ('{}') at {:?}",
                pin,
                frontend.names[pin],
                frontend.pin_to_bit(pin)
            );
        }
        Ok(frontend)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    /// Resolves a logical pin number to (offset index, bit number) by
    /// counting valid bits, offset-major and bit-minor.
    fn pin_to_bit(&self, pin: usize) -> Result<(usize, u8)> {
        let mut remaining = pin;
        for idx in 0..self.offsets.len() * 8 {
            if self.valid_masks[idx / 8] & (1 << (idx % 8)) != 0 {
                if remaining == 0 {
                    return Ok((idx / 8, (idx % 8) as u8));
                }
                remaining -= 1;
            }
        }
        Err(Error::NoSuchPin(pin))
    }
}

impl Chip for GpioFrontend {
    fn line_count(&self) -> usize {
        self.names.len()
    }

    fn line_names(&self) -> &[String] {
        &self.names
    }

    fn get(&self, pin: usize) -> Result<bool> {
        let (idx, bit) = self.pin_to_bit(pin)?;
        let mut map = self.hub.acquire_register_map()?;
        let value = map.read(self.offsets[idx]);
        self.hub.release_register_map(map)?;
        Ok(value? & (1 << bit) != 0)
    }

    fn set(&self, pin: usize, value: bool) -> Result<()> {
        let (idx, bit) = self.pin_to_bit(pin)?;
        let mask = 1 << bit;
        let mut map = self.hub.acquire_register_map()?;
        let res = map.update_bits(self.offsets[idx], mask, if value { mask } else { 0 });
        self.hub.release_register_map(map)?;
        res
    }

    fn direction(&self, pin: usize) -> Result<LineDirection> {
        let (idx, bit) = self.pin_to_bit(pin)?;
        if self.direction_masks[idx] & (1 << bit) != 0 {
            Ok(LineDirection::Output)
        } else {
            Ok(LineDirection::Input)
        }
    }

    fn direction_input(&self, pin: usize) -> Result<()> {
        match self.direction(pin)? {
            LineDirection::Input => Ok(()),
            LineDirection::Output => {
                dev_err!(self.dev, "pin {} is wired as an output", pin);
                Err(Error::Unsupported)
            }
        }
    }

    fn direction_output(&self, pin: usize, value: bool) -> Result<()> {
        match self.direction(pin)? {
            LineDirection::Input => {
                dev_err!(self.dev, "pin {} is wired as an input", pin);
                Err(Error::Unsupported)
            }
            LineDirection::Output => self.set(pin, value),
        }
    }
}
