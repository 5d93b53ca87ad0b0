// SPDX-License-Identifier: GPL-2.0

//! CPLD hub: sole owner of the shared register map.
//!
//! The hub serializes every register access and every permission-table
//! mutation behind one exclusion lock. Child frontends declare which offsets
//! they use and how ([`RegisterProps`]); the union of those declarations is
//! monotonic for the hub's lifetime and drives the map's access policy and
//! cache. Re-declaring an offset with unchanged properties below the tracked
//! maximum is a no-op and does not touch the map.
//!
//! Map access is handed out as a [`MapHandle`] that holds the lock; callers
//! pair every acquire with [`CpldHub::release_register_map`]. Dropping the
//! handle also unlocks, so an early error return cannot wedge the hub, but
//! releasing a handle against the wrong hub is reported.

pub mod gpio;
pub mod mux;
pub mod register;

use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dev_err;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::regmap::{AccessFn, CacheMode, MapConfig, Regmap, RegisterBus, RegisterMap};

/// Number of addressable registers per hub; valid offsets are
/// `0..MAX_REGISTERS`.
pub const MAX_REGISTERS: usize = 255;

/// Per-register access properties contributed by frontends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterProps(u8);

impl RegisterProps {
    pub const NONE: Self = Self(0);
    pub const READABLE: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const VOLATILE: Self = Self(1 << 2);

    pub fn readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub fn volatile(self) -> bool {
        self.0 & Self::VOLATILE.0 != 0
    }
}

impl BitOr for RegisterProps {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RegisterProps {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

struct HubInner {
    map: Option<Box<dyn RegisterMap>>,
    props: [RegisterProps; MAX_REGISTERS],
    /// One past the highest offset any frontend has declared.
    max_reg: u16,
}

/// The CPLD device: register map owner and permission-table keeper.
pub struct CpldHub {
    dev: Arc<Device>,
    inner: Mutex<HubInner>,
}

/// Exclusive access to the hub's register map.
///
/// Holding the handle holds the hub lock; no other consumer can touch the
/// map or the permission table until it is released.
pub struct MapHandle<'hub> {
    guard: MutexGuard<'hub, HubInner>,
    hub: &'hub CpldHub,
}

impl MapHandle<'_> {
    pub fn read(&mut self, reg: u8) -> Result<u8> {
        self.map()?.read(reg)
    }

    pub fn write(&mut self, reg: u8, val: u8) -> Result<()> {
        self.map()?.write(reg, val)
    }

    pub fn update_bits(&mut self, reg: u8, mask: u8, val: u8) -> Result<()> {
        self.map()?.update_bits(reg, mask, val)
    }

    fn map(&mut self) -> Result<&mut dyn RegisterMap> {
        match self.guard.map.as_deref_mut() {
            Some(map) => Ok(map),
            None => Err(Error::DeviceUnavailable),
        }
    }
}

impl CpldHub {
    /// Probes a CPLD from its description node: validates the declared
    /// register bus and attaches a register map over `bus`.
    pub fn probe<B: RegisterBus + 'static>(dev: Arc<Device>, bus: B) -> Result<Arc<Self>> {
        let protocol = dev.node().property_read::<String>("protocol").required_by(&dev)?;
        if protocol != "register" {
            dev_err!(dev, "unsupported protocol '{}'", protocol);
            return Err(Error::ConfigInvalid);
        }
        let bits = dev
            .node()
            .property_read::<u32>("register-bits")
            .required_by(&dev)?;
        if bits != 8 {
            dev_err!(dev, "unsupported register width {}", bits);
            return Err(Error::ConfigInvalid);
        }
        Ok(Self::new(
            dev,
            Box::new(Regmap::new(bus, MapConfig::permissive())),
        ))
    }

    /// Creates a hub around an already constructed register map.
    pub fn new(dev: Arc<Device>, map: Box<dyn RegisterMap>) -> Arc<Self> {
        Arc::new(CpldHub {
            dev,
            inner: Mutex::new(HubInner {
                map: Some(map),
                props: [RegisterProps::NONE; MAX_REGISTERS],
                max_reg: 0,
            }),
        })
    }

    /// Creates a hub with no register map attached; map accesses and
    /// property registrations fail with [`Error::DeviceUnavailable`].
    pub fn new_unattached(dev: Arc<Device>) -> Arc<Self> {
        Arc::new(CpldHub {
            dev,
            inner: Mutex::new(HubInner {
                map: None,
                props: [RegisterProps::NONE; MAX_REGISTERS],
                max_reg: 0,
            }),
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declares access properties for one register offset.
    ///
    /// Grows the tracked register range as needed and rebuilds the map's
    /// access/cache policy from the full table. Re-declaring unchanged
    /// properties below the tracked maximum returns without touching the map.
    pub fn set_register_properties(&self, reg: u8, props: RegisterProps) -> Result {
        if usize::from(reg) >= MAX_REGISTERS {
            return Err(Error::InvalidOffset(reg.into()));
        }
        let mut inner = self.lock();
        if inner.map.is_none() {
            dev_err!(self.dev, "no register map attached");
            return Err(Error::DeviceUnavailable);
        }
        if inner.props[usize::from(reg)] == props && u16::from(reg) < inner.max_reg {
            return Ok(());
        }
        inner.props[usize::from(reg)] = props;
        if u16::from(reg) >= inner.max_reg {
            inner.max_reg = u16::from(reg) + 1;
        }

        let table: Arc<[RegisterProps]> = Arc::from(&inner.props[..]);
        let config = MapConfig {
            max_register: (inner.max_reg - 1) as u8,
            readable: predicate(&table, RegisterProps::readable),
            writable: predicate(&table, RegisterProps::writable),
            volatile: predicate(&table, RegisterProps::volatile),
            cache_mode: CacheMode::Flat,
        };
        match inner.map.as_deref_mut() {
            Some(map) => map.reconfigure(config),
            None => Err(Error::DeviceUnavailable),
        }
    }

    /// Takes exclusive access to the register map.
    ///
    /// Every acquire must be paired with [`Self::release_register_map`] on
    /// all paths. Fails if no map is attached.
    pub fn acquire_register_map(&self) -> Result<MapHandle<'_>> {
        let guard = self.lock();
        if guard.map.is_none() {
            return Err(Error::DeviceUnavailable);
        }
        Ok(MapHandle { guard, hub: self })
    }

    /// Releases a handle taken via [`Self::acquire_register_map`].
    ///
    /// The handle's lock is released in all cases; handing in a handle that
    /// belongs to a different hub is reported as an error.
    pub fn release_register_map(&self, handle: MapHandle<'_>) -> Result {
        let owned = std::ptr::eq(handle.hub, self);
        drop(handle);
        if !owned {
            dev_err!(self.dev, "released a register map handle owned by another hub");
            return Err(Error::ConfigInvalid);
        }
        Ok(())
    }

    /// Reads a byte-array property from a device node.
    pub fn read_property(dev: &Device, name: &str) -> Result<Vec<u8>> {
        let count = dev.node().property_count_elem::<u8>(name)?;
        if count == 0 {
            return Err(Error::PropertyMissing(name.into()));
        }
        dev.node()
            .property_read_array_vec::<u8>(name, count)
            .required_by(dev)
    }

    /// Reads a byte-array property that must hold exactly `n` values.
    pub fn read_property_n(dev: &Device, name: &str, n: usize) -> Result<Vec<u8>> {
        let vals = Self::read_property(dev, name)?;
        if vals.len() != n {
            dev_err!(dev, "property '{}' holds {} value(s), expected {}", name, vals.len(), n);
            return Err(Error::ConfigInvalid);
        }
        Ok(vals)
    }
}

fn predicate(table: &Arc<[RegisterProps]>, test: fn(RegisterProps) -> bool) -> AccessFn {
    let table = table.clone();
    Arc::new(move |reg| table.get(usize::from(reg)).copied().is_some_and(test))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::NodeBuilder;
    use crate::regmap::RamBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMap {
        inner: Regmap<RamBus>,
        reconfigures: Arc<AtomicUsize>,
    }

    impl RegisterMap for CountingMap {
        fn read(&mut self, reg: u8) -> Result<u8> {
            self.inner.read(reg)
        }

        fn write(&mut self, reg: u8, val: u8) -> Result<()> {
            self.inner.write(reg, val)
        }

        fn update_bits(&mut self, reg: u8, mask: u8, val: u8) -> Result<()> {
            self.inner.update_bits(reg, mask, val)
        }

        fn reconfigure(&mut self, config: MapConfig) -> Result<()> {
            self.reconfigures.fetch_add(1, Ordering::SeqCst);
            self.inner.reconfigure(config)
        }
    }

    fn counting_hub() -> (Arc<CpldHub>, Arc<AtomicUsize>) {
        let reconfigures = Arc::new(AtomicUsize::new(0));
        let map = CountingMap {
            inner: Regmap::new(RamBus::new(), MapConfig::permissive()),
            reconfigures: reconfigures.clone(),
        };
        let dev = Device::new(NodeBuilder::new("cpld").build());
        (CpldHub::new(dev, Box::new(map)), reconfigures)
    }

    #[test]
    fn re_declaring_identical_properties_is_a_no_op() {
        let (hub, reconfigures) = counting_hub();
        let props = RegisterProps::READABLE | RegisterProps::WRITABLE;

        hub.set_register_properties(0x10, props).unwrap();
        assert_eq!(reconfigures.load(Ordering::SeqCst), 1);
        hub.set_register_properties(0x10, props).unwrap();
        assert_eq!(reconfigures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changed_properties_rebuild_the_policy() {
        let (hub, reconfigures) = counting_hub();

        hub.set_register_properties(0x10, RegisterProps::READABLE)
            .unwrap();
        hub.set_register_properties(0x10, RegisterProps::READABLE | RegisterProps::VOLATILE)
            .unwrap();
        assert_eq!(reconfigures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lower_offsets_declared_later_still_rebuild_once() {
        let (hub, reconfigures) = counting_hub();

        hub.set_register_properties(0x10, RegisterProps::READABLE)
            .unwrap();
        hub.set_register_properties(0x05, RegisterProps::READABLE)
            .unwrap();
        hub.set_register_properties(0x05, RegisterProps::READABLE)
            .unwrap();
        assert_eq!(reconfigures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn offset_255_is_out_of_range() {
        let (hub, _) = counting_hub();
        assert_eq!(
            hub.set_register_properties(0xff, RegisterProps::READABLE),
            Err(Error::InvalidOffset(0xff))
        );
    }

    #[test]
    fn policy_applies_to_map_access() {
        let bus = RamBus::new();
        let handle = bus.handle();
        handle.set_value(0x10, 0x3c);
        let dev = Device::new(NodeBuilder::new("cpld").build());
        let hub = CpldHub::new(
            dev,
            Box::new(Regmap::new(bus, MapConfig::permissive())),
        );
        hub.set_register_properties(0x10, RegisterProps::READABLE)
            .unwrap();

        let mut map = hub.acquire_register_map().unwrap();
        assert_eq!(map.read(0x10), Ok(0x3c));
        assert_eq!(map.write(0x10, 0x00), Err(Error::Unsupported));
        hub.release_register_map(map).unwrap();
    }

    #[test]
    fn acquire_fails_without_a_map() {
        let dev = Device::new(NodeBuilder::new("cpld").build());
        let hub = CpldHub::new_unattached(dev);
        assert!(matches!(
            hub.acquire_register_map(),
            Err(Error::DeviceUnavailable)
        ));
        assert_eq!(
            hub.set_register_properties(0x01, RegisterProps::READABLE),
            Err(Error::DeviceUnavailable)
        );
    }

    #[test]
    fn foreign_handle_release_is_reported_and_unlocks() {
        let (hub_a, _) = counting_hub();
        let (hub_b, _) = counting_hub();

        let handle = hub_a.acquire_register_map().unwrap();
        assert_eq!(
            hub_b.release_register_map(handle),
            Err(Error::ConfigInvalid)
        );
        // The handle's own lock was still released.
        let handle = hub_a.acquire_register_map().unwrap();
        hub_a.release_register_map(handle).unwrap();
    }

    #[test]
    fn probe_validates_the_register_bus() {
        let good = Device::new(
            NodeBuilder::new("cpld")
                .property_str("protocol", "register")
                .property_u64("register-bits", 8)
                .build(),
        );
        assert!(CpldHub::probe(good, RamBus::new()).is_ok());

        let bad_protocol = Device::new(
            NodeBuilder::new("cpld")
                .property_str("protocol", "i2c")
                .property_u64("register-bits", 8)
                .build(),
        );
        assert_eq!(
            CpldHub::probe(bad_protocol, RamBus::new()).err(),
            Some(Error::ConfigInvalid)
        );

        let bad_width = Device::new(
            NodeBuilder::new("cpld")
                .property_str("protocol", "register")
                .property_u64("register-bits", 16)
                .build(),
        );
        assert_eq!(
            CpldHub::probe(bad_width, RamBus::new()).err(),
            Some(Error::ConfigInvalid)
        );
    }

    #[test]
    fn property_helpers_check_exact_counts() {
        let dev = Device::new(
            NodeBuilder::new("frontend")
                .property_u64s("offsets", [0x10, 0x11])
                .build(),
        );
        assert_eq!(CpldHub::read_property(&dev, "offsets"), Ok(vec![0x10, 0x11]));
        assert_eq!(
            CpldHub::read_property_n(&dev, "offsets", 2),
            Ok(vec![0x10, 0x11])
        );
        assert_eq!(
            CpldHub::read_property_n(&dev, "offsets", 3),
            Err(Error::ConfigInvalid)
        );
        assert_eq!(
            CpldHub::read_property(&dev, "valid-masks"),
            Err(Error::PropertyMissing("valid-masks".into()))
        );
    }
}
