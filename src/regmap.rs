// SPDX-License-Identifier: GPL-2.0

//! Byte register map with per-offset access policy and optional caching.
//!
//! [`Regmap`] wraps a raw [`RegisterBus`] transport and enforces the policy
//! installed by [`RegisterMap::reconfigure`]: offsets past `max_register` are
//! rejected, reads and writes are checked against the readable/writable
//! predicates, and with [`CacheMode::Flat`] non-volatile reads are served
//! from a presence-tracked cache. `update_bits` is a cache-aware
//! read-modify-write that elides the bus write when the masked value is
//! unchanged.
//!
//! Reconfiguring replaces the policy and discards all cached state, so a
//! policy change never serves values cached under the old policy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

/// Raw transport performing single-byte register I/O.
pub trait RegisterBus: Send {
    fn read(&mut self, reg: u8) -> Result<u8>;
    fn write(&mut self, reg: u8, val: u8) -> Result<()>;
}

/// Per-offset access predicate.
pub type AccessFn = Arc<dyn Fn(u8) -> bool + Send + Sync>;

/// Cache policy for non-volatile registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Every access goes to the bus.
    Bypass,
    /// Flat per-offset cache; first read seeds it, writes go through.
    Flat,
}

/// Live configuration of a register map.
#[derive(Clone)]
pub struct MapConfig {
    pub max_register: u8,
    pub readable: AccessFn,
    pub writable: AccessFn,
    pub volatile: AccessFn,
    pub cache_mode: CacheMode,
}

impl MapConfig {
    /// The configuration a map starts out with before any consumer has
    /// declared register properties: every offset accessible, no cache.
    pub fn permissive() -> Self {
        MapConfig {
            max_register: u8::MAX,
            readable: Arc::new(|_| true),
            writable: Arc::new(|_| true),
            volatile: Arc::new(|_| true),
            cache_mode: CacheMode::Bypass,
        }
    }
}

/// The register map boundary the hub mediates access to.
pub trait RegisterMap: Send {
    fn read(&mut self, reg: u8) -> Result<u8>;
    fn write(&mut self, reg: u8, val: u8) -> Result<()>;
    fn update_bits(&mut self, reg: u8, mask: u8, val: u8) -> Result<()>;
    fn reconfigure(&mut self, config: MapConfig) -> Result<()>;
}

/// [`RegisterMap`] implementation over a raw transport.
pub struct Regmap<B: RegisterBus> {
    bus: B,
    config: MapConfig,
    cache: [u8; 256],
    present: [bool; 256],
}

impl<B: RegisterBus> Regmap<B> {
    pub fn new(bus: B, config: MapConfig) -> Self {
        Regmap {
            bus,
            config,
            cache: [0; 256],
            present: [false; 256],
        }
    }

    fn check_offset(&self, reg: u8) -> Result {
        if reg > self.config.max_register {
            return Err(Error::InvalidOffset(reg.into()));
        }
        Ok(())
    }

    fn cacheable(&self, reg: u8) -> bool {
        self.config.cache_mode == CacheMode::Flat && !(self.config.volatile)(reg)
    }
}

impl<B: RegisterBus> RegisterMap for Regmap<B> {
    fn read(&mut self, reg: u8) -> Result<u8> {
        self.check_offset(reg)?;
        if !(self.config.readable)(reg) {
            return Err(Error::Unsupported);
        }
        let idx = usize::from(reg);
        if self.cacheable(reg) && self.present[idx] {
            return Ok(self.cache[idx]);
        }
        let val = self.bus.read(reg)?;
        if self.cacheable(reg) {
            self.cache[idx] = val;
            self.present[idx] = true;
        }
        Ok(val)
    }

    fn write(&mut self, reg: u8, val: u8) -> Result<()> {
        self.check_offset(reg)?;
        if !(self.config.writable)(reg) {
            return Err(Error::Unsupported);
        }
        self.bus.write(reg, val)?;
        if self.cacheable(reg) {
            let idx = usize::from(reg);
            self.cache[idx] = val;
            self.present[idx] = true;
        }
        Ok(())
    }

    fn update_bits(&mut self, reg: u8, mask: u8, val: u8) -> Result<()> {
        let orig = self.read(reg)?;
        let new = (orig & !mask) | (val & mask);
        if new != orig {
            self.write(reg, new)
        } else {
            Ok(())
        }
    }

    fn reconfigure(&mut self, config: MapConfig) -> Result<()> {
        self.config = config;
        self.present = [false; 256];
        Ok(())
    }
}

#[derive(Debug)]
struct BusCtl {
    regs: [u8; 256],
    reads: BTreeMap<u8, u32>,
    writes: BTreeMap<u8, u32>,
    fail_reads: BTreeSet<u8>,
    fail_writes: BTreeSet<u8>,
}

/// In-memory register bus with operation counters, for simulation and tests.
///
/// The shared [`BusHandle`] stays usable after the bus itself has been handed
/// to a map, so callers can seed register values, inject transport failures
/// and assert exact bus-operation counts.
pub struct RamBus {
    ctl: Arc<Mutex<BusCtl>>,
}

/// Inspection and fault-injection handle to a [`RamBus`].
#[derive(Clone)]
pub struct BusHandle {
    ctl: Arc<Mutex<BusCtl>>,
}

impl RamBus {
    pub fn new() -> Self {
        RamBus {
            ctl: Arc::new(Mutex::new(BusCtl {
                regs: [0; 256],
                reads: BTreeMap::new(),
                writes: BTreeMap::new(),
                fail_reads: BTreeSet::new(),
                fail_writes: BTreeSet::new(),
            })),
        }
    }

    pub fn handle(&self) -> BusHandle {
        BusHandle {
            ctl: self.ctl.clone(),
        }
    }
}

impl Default for RamBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for RamBus {
    fn read(&mut self, reg: u8) -> Result<u8> {
        let mut ctl = self.ctl.lock().unwrap_or_else(PoisonError::into_inner);
        *ctl.reads.entry(reg).or_insert(0) += 1;
        if ctl.fail_reads.contains(&reg) {
            return Err(Error::TransportFailure);
        }
        Ok(ctl.regs[usize::from(reg)])
    }

    fn write(&mut self, reg: u8, val: u8) -> Result<()> {
        let mut ctl = self.ctl.lock().unwrap_or_else(PoisonError::into_inner);
        *ctl.writes.entry(reg).or_insert(0) += 1;
        if ctl.fail_writes.contains(&reg) {
            return Err(Error::TransportFailure);
        }
        ctl.regs[usize::from(reg)] = val;
        Ok(())
    }
}

impl BusHandle {
    fn ctl(&self) -> std::sync::MutexGuard<'_, BusCtl> {
        self.ctl.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn value(&self, reg: u8) -> u8 {
        self.ctl().regs[usize::from(reg)]
    }

    pub fn set_value(&self, reg: u8, val: u8) {
        self.ctl().regs[usize::from(reg)] = val;
    }

    /// Bus read attempts (including failed ones) for one offset.
    pub fn reads(&self, reg: u8) -> u32 {
        self.ctl().reads.get(&reg).copied().unwrap_or(0)
    }

    /// Bus write attempts (including failed ones) for one offset.
    pub fn writes(&self, reg: u8) -> u32 {
        self.ctl().writes.get(&reg).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> u32 {
        self.ctl().reads.values().sum()
    }

    pub fn total_writes(&self) -> u32 {
        self.ctl().writes.values().sum()
    }

    pub fn fail_writes(&self, reg: u8, fail: bool) {
        let mut ctl = self.ctl();
        if fail {
            ctl.fail_writes.insert(reg);
        } else {
            ctl.fail_writes.remove(&reg);
        }
    }

    pub fn fail_reads(&self, reg: u8, fail: bool) {
        let mut ctl = self.ctl();
        if fail {
            ctl.fail_reads.insert(reg);
        } else {
            ctl.fail_reads.remove(&reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_config(max: u8, volatile: &'static [u8]) -> MapConfig {
        MapConfig {
            max_register: max,
            readable: Arc::new(|_| true),
            writable: Arc::new(|_| true),
            volatile: Arc::new(move |reg| volatile.contains(&reg)),
            cache_mode: CacheMode::Flat,
        }
    }

    #[test]
    fn flat_cache_serves_repeat_reads() {
        let bus = RamBus::new();
        let handle = bus.handle();
        handle.set_value(0x10, 0xa5);
        let mut map = Regmap::new(bus, flat_config(0x20, &[]));

        assert_eq!(map.read(0x10), Ok(0xa5));
        assert_eq!(map.read(0x10), Ok(0xa5));
        assert_eq!(handle.reads(0x10), 1);
    }

    #[test]
    fn volatile_reads_always_hit_the_bus() {
        let bus = RamBus::new();
        let handle = bus.handle();
        let mut map = Regmap::new(bus, flat_config(0x20, &[0x10]));

        map.read(0x10).unwrap();
        map.read(0x10).unwrap();
        assert_eq!(handle.reads(0x10), 2);
    }

    #[test]
    fn writes_go_through_and_seed_the_cache() {
        let bus = RamBus::new();
        let handle = bus.handle();
        let mut map = Regmap::new(bus, flat_config(0x20, &[]));

        map.write(0x04, 0x5a).unwrap();
        assert_eq!(handle.value(0x04), 0x5a);
        assert_eq!(map.read(0x04), Ok(0x5a));
        assert_eq!(handle.reads(0x04), 0);
    }

    #[test]
    fn update_bits_changes_only_masked_bits() {
        let bus = RamBus::new();
        let handle = bus.handle();
        handle.set_value(0x08, 0b1010_0001);
        let mut map = Regmap::new(bus, flat_config(0x20, &[]));

        map.update_bits(0x08, 0b0000_0110, 0b0000_0010).unwrap();
        assert_eq!(handle.value(0x08), 0b1010_0011);
    }

    #[test]
    fn update_bits_elides_unchanged_writes() {
        let bus = RamBus::new();
        let handle = bus.handle();
        handle.set_value(0x08, 0b0000_0100);
        let mut map = Regmap::new(bus, flat_config(0x20, &[]));

        map.update_bits(0x08, 0b0000_0100, 0b0000_0100).unwrap();
        assert_eq!(handle.writes(0x08), 0);
    }

    #[test]
    fn access_policy_is_enforced_without_bus_traffic() {
        let bus = RamBus::new();
        let handle = bus.handle();
        let config = MapConfig {
            max_register: 0x20,
            readable: Arc::new(|reg| reg == 0x01),
            writable: Arc::new(|_| false),
            volatile: Arc::new(|_| true),
            cache_mode: CacheMode::Flat,
        };
        let mut map = Regmap::new(bus, config);

        assert_eq!(map.read(0x02), Err(Error::Unsupported));
        assert_eq!(map.write(0x01, 0xff), Err(Error::Unsupported));
        assert_eq!(handle.total_reads(), 0);
        assert_eq!(handle.total_writes(), 0);
    }

    #[test]
    fn offsets_past_max_register_are_rejected() {
        let bus = RamBus::new();
        let mut map = Regmap::new(bus, flat_config(0x10, &[]));
        assert_eq!(map.read(0x11), Err(Error::InvalidOffset(0x11)));
    }

    #[test]
    fn reconfigure_discards_cached_state() {
        let bus = RamBus::new();
        let handle = bus.handle();
        handle.set_value(0x10, 0x11);
        let mut map = Regmap::new(bus, flat_config(0x20, &[]));

        assert_eq!(map.read(0x10), Ok(0x11));
        handle.set_value(0x10, 0x22);
        map.reconfigure(flat_config(0x20, &[])).unwrap();
        assert_eq!(map.read(0x10), Ok(0x22));
        assert_eq!(handle.reads(0x10), 2);
    }

    #[test]
    fn bypass_mode_never_caches() {
        let bus = RamBus::new();
        let handle = bus.handle();
        let mut map = Regmap::new(bus, MapConfig::permissive());

        map.read(0x10).unwrap();
        map.read(0x10).unwrap();
        assert_eq!(handle.reads(0x10), 2);
    }

    #[test]
    fn transport_failures_propagate() {
        let bus = RamBus::new();
        let handle = bus.handle();
        handle.fail_reads(0x10, true);
        let mut map = Regmap::new(bus, flat_config(0x20, &[]));

        assert_eq!(map.read(0x10), Err(Error::TransportFailure));
        handle.fail_reads(0x10, false);
        assert_eq!(map.read(0x10), Ok(0));
    }
}
