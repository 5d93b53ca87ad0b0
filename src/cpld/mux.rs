// SPDX-License-Identifier: GPL-2.0

//! I2C mux frontend.
//!
//! The mux routes a parent I2C bus to one of several downstream segments;
//! which segment is a single CPLD register write, serialized against every
//! other CPLD consumer through the hub. Selects are coalesced against a
//! last-selected-channel cache so back-to-back transactions on one segment
//! cost one register write. A failed select leaves the hardware route
//! unknown, so the cache is cleared rather than trusted; the next select
//! always reaches the bus.
//!
//! Each child node with a unit address becomes a virtual adapter on the
//! parent bus. Channel registration failures are logged and skipped,
//! partial success is a valid outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::composition;
use crate::cpld::{CpldHub, RegisterProps};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::i2c::{
    Adapter, AdapterRegistry, ChannelRegistration, ChannelSelector, MuxChannelAdapter,
};
use crate::{dev_dbg, dev_err, dev_info, dev_warn};

pub struct I2cMuxFrontend {
    dev: Arc<Device>,
    hub: Arc<CpldHub>,
    parent: Arc<Adapter>,
    offset: u8,
    deselect_value: Option<u8>,
    deselect_on_exit: bool,
    /// Last channel value written, `None` when the routing state is unknown.
    last_chan: Mutex<Option<u8>>,
    children: Mutex<Vec<ChannelRegistration>>,
}

impl I2cMuxFrontend {
    /// Probes a mux from its node properties, registers its select register
    /// with the hub, routes the mux to its deselect value and spawns one
    /// virtual adapter per addressed child node.
    pub fn probe(
        dev: Arc<Device>,
        hub: Arc<CpldHub>,
        i2c: &AdapterRegistry,
    ) -> Result<Arc<Self>> {
        let offset = CpldHub::read_property_n(&dev, "offset", 1)?[0];
        let encoding = dev
            .node()
            .property_read::<String>("encoding")
            .required_by(&dev)?;
        if encoding != "index" {
            dev_err!(dev, "unsupported channel encoding '{}'", encoding);
            return Err(Error::ConfigInvalid);
        }

        let parent_ref = dev
            .node()
            .property_get_reference_args("i2c-parent", crate::property::NArgs::N(0), 0)?;
        let Some(parent) = i2c.find_by_node(&parent_ref.node) else {
            dev_dbg!(dev, "i2c parent '{}' not yet available", parent_ref.node.path());
            return Err(Error::DeviceUnavailable);
        };
        dev_info!(dev, "i2c parent adapter: {}", parent.name());

        let deselect_value = if dev.node().property_present("deselect-value") {
            Some(CpldHub::read_property_n(&dev, "deselect-value", 1)?[0])
        } else {
            None
        };
        let deselect_on_exit = dev
            .node()
            .property_read::<bool>("deselect-on-exit")
            .or_default();

        let mux = Arc::new(I2cMuxFrontend {
            dev,
            hub,
            parent,
            offset,
            deselect_value,
            deselect_on_exit,
            last_chan: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        });

        // The select register must be declared before the first write goes
        // through the hub's access policy.
        mux.hub
            .set_register_properties(offset, RegisterProps::READABLE | RegisterProps::WRITABLE)?;
        if mux.deselect_value.is_some() {
            mux.deselect()?;
        }

        let dyn_mux: Arc<dyn ChannelSelector> = mux.clone();
        let mut spawned = 0;
        for child in mux.dev.node().children() {
            let chan = match composition::device_address(child).map(u8::try_from) {
                Ok(Ok(chan)) => chan,
                Ok(Err(_)) | Err(_) => {
                    dev_warn!(mux.dev, "skipping channel node '{}': bad address", child.name());
                    continue;
                }
            };
            let name = format!("{}-mux.{}", mux.parent.name(), chan);
            match i2c.register_channel(name, chan, Arc::downgrade(&dyn_mux)) {
                Ok(registration) => {
                    mux.children().push(registration);
                    spawned += 1;
                }
                Err(err) => {
                    dev_warn!(mux.dev, "failed to register channel {}: {}", chan, err);
                }
            }
        }
        dev_info!(mux.dev, "registered {} mux channel(s)", spawned);
        Ok(mux)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    pub fn parent(&self) -> &Arc<Adapter> {
        &self.parent
    }

    /// Number of successfully spawned child adapters.
    pub fn channel_count(&self) -> usize {
        self.children().len()
    }

    /// The spawned adapter for one of this mux's channels, if it exists.
    pub fn channel_adapter(&self, chan: u8) -> Option<Arc<MuxChannelAdapter>> {
        self.children()
            .iter()
            .map(ChannelRegistration::adapter)
            .find(|a| a.channel() == chan)
            .cloned()
    }

    fn children(&self) -> MutexGuard<'_, Vec<ChannelRegistration>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_chan(&self) -> MutexGuard<'_, Option<u8>> {
        self.last_chan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_select(&self, value: u8) -> Result {
        let mut map = self.hub.acquire_register_map()?;
        let res = map.write(self.offset, value);
        self.hub.release_register_map(map)?;
        res
    }
}

impl ChannelSelector for I2cMuxFrontend {
    fn select_channel(&self, chan: u8) -> Result {
        let mut last = self.last_chan();
        if *last == Some(chan) {
            return Ok(());
        }
        let res = self.write_select(chan);
        // A failed write leaves the mux in an unknown state; forget the
        // cached channel so the next select is never skipped.
        *last = match res {
            Ok(()) => Some(chan),
            Err(_) => None,
        };
        res
    }

    fn deselect(&self) -> Result {
        let Some(value) = self.deselect_value else {
            return Ok(());
        };
        let mut last = self.last_chan();
        let res = self.write_select(value);
        *last = match res {
            Ok(()) => Some(value),
            Err(_) => None,
        };
        res
    }

    fn deselect_on_exit(&self) -> bool {
        self.deselect_on_exit
    }
}
