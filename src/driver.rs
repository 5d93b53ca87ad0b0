// SPDX-License-Identifier: GPL-2.0

//! Probe orchestration.
//!
//! A [`System`] holds everything one board composes: the I2C adapter
//! registry, the registry of live devices keyed by description-node path,
//! and the queue of probes waiting on a dependency. Child nodes are turned
//! into typed descriptors and built by a factory over the known frontend
//! kinds; a probe that fails with [`Error::DeviceUnavailable`] is parked
//! and retried by [`System::retry_deferred`], every other error is final
//! for that device and does not disturb its siblings.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::composition::{self, ChildDescriptor};
use crate::cpld::CpldHub;
use crate::cpld::gpio::GpioFrontend;
use crate::cpld::mux::I2cMuxFrontend;
use crate::cpld::register::RegisterFrontend;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::fan::Fan;
use crate::i2c::AdapterRegistry;
use crate::property::FwNode;
use crate::regmap::RegisterBus;
use crate::sff::Sff;
use crate::{dev_dbg, dev_warn};

/// Outcome of probing one device.
#[must_use]
pub enum ProbeOutcome<T> {
    /// The device is up.
    Ready(T),
    /// A dependency is missing; probing again later may succeed.
    NotYetAvailable,
    /// The device cannot work as described.
    PermanentFailure(Error),
}

impl<T> ProbeOutcome<T> {
    /// Classifies a probe result: a missing dependency defers, any other
    /// error is final.
    pub fn from_result(res: Result<T>) -> Self {
        match res {
            Ok(dev) => ProbeOutcome::Ready(dev),
            Err(Error::DeviceUnavailable) => ProbeOutcome::NotYetAvailable,
            Err(err) => ProbeOutcome::PermanentFailure(err),
        }
    }

    pub fn ready(self) -> Option<T> {
        match self {
            ProbeOutcome::Ready(dev) => Some(dev),
            _ => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, ProbeOutcome::NotYetAvailable)
    }
}

/// Frontend kinds the child factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendKind {
    Register,
    Gpio,
    I2cMux,
}

impl FrontendKind {
    pub fn from_compatible(compatible: &str) -> Option<Self> {
        match compatible {
            "cpld-register" => Some(FrontendKind::Register),
            "cpld-gpio" => Some(FrontendKind::Gpio),
            "cpld-i2c-mux" => Some(FrontendKind::I2cMux),
            _ => None,
        }
    }
}

/// A live, probed device of any supported kind.
#[derive(Clone)]
pub enum LiveDevice {
    Hub(Arc<CpldHub>),
    Register(Arc<RegisterFrontend>),
    Gpio(Arc<GpioFrontend>),
    I2cMux(Arc<I2cMuxFrontend>),
    Fan(Arc<Fan>),
    Sff(Arc<Sff>),
}

impl std::fmt::Debug for LiveDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDevice")
            .field("kind", &self.kind())
            .field("device", &self.device().name())
            .finish()
    }
}

impl LiveDevice {
    pub fn kind(&self) -> &'static str {
        match self {
            LiveDevice::Hub(_) => "cpld",
            LiveDevice::Register(_) => "register",
            LiveDevice::Gpio(_) => "gpio",
            LiveDevice::I2cMux(_) => "i2c-mux",
            LiveDevice::Fan(_) => "fan",
            LiveDevice::Sff(_) => "sff",
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        match self {
            LiveDevice::Hub(d) => d.device(),
            LiveDevice::Register(d) => d.device(),
            LiveDevice::Gpio(d) => d.device(),
            LiveDevice::I2cMux(d) => d.device(),
            LiveDevice::Fan(d) => d.device(),
            LiveDevice::Sff(d) => d.device(),
        }
    }

    pub fn as_hub(&self) -> Option<&Arc<CpldHub>> {
        match self {
            LiveDevice::Hub(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_register(&self) -> Option<&Arc<RegisterFrontend>> {
        match self {
            LiveDevice::Register(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_gpio(&self) -> Option<&Arc<GpioFrontend>> {
        match self {
            LiveDevice::Gpio(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_mux(&self) -> Option<&Arc<I2cMuxFrontend>> {
        match self {
            LiveDevice::I2cMux(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_fan(&self) -> Option<&Arc<Fan>> {
        match self {
            LiveDevice::Fan(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_sff(&self) -> Option<&Arc<Sff>> {
        match self {
            LiveDevice::Sff(d) => Some(d),
            _ => None,
        }
    }
}

/// Live devices indexed by description-node path.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Mutex<BTreeMap<String, LiveDevice>>>,
}

impl DeviceRegistry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, LiveDevice>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, node: &FwNode, dev: LiveDevice) {
        self.lock().insert(node.path(), dev);
    }

    pub fn lookup(&self, node: &FwNode) -> Option<LiveDevice> {
        self.lock().get(&node.path()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

enum Pending {
    HubChild {
        hub: Arc<CpldHub>,
        desc: ChildDescriptor,
    },
    Consumer {
        node: Arc<FwNode>,
    },
}

/// One board's probe state.
#[derive(Default)]
pub struct System {
    pub i2c: AdapterRegistry,
    pub devices: DeviceRegistry,
    deferred: Mutex<Vec<Pending>>,
}

impl System {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of probes currently waiting on a dependency.
    pub fn deferred_count(&self) -> usize {
        self.pending().len()
    }

    /// Probes a CPLD hub over `bus`, then each of its declared children.
    /// Children that fail permanently are skipped, children waiting on a
    /// dependency are queued for [`Self::retry_deferred`].
    pub fn probe_hub<B: RegisterBus + 'static>(
        &self,
        node: &Arc<FwNode>,
        bus: B,
    ) -> ProbeOutcome<Arc<CpldHub>> {
        let dev = Device::new(node.clone());
        let hub = match CpldHub::probe(dev, bus) {
            Ok(hub) => hub,
            Err(err) => return ProbeOutcome::from_result(Err(err)),
        };
        self.devices.insert(node, LiveDevice::Hub(hub.clone()));
        for desc in composition::scan_children(hub.device()) {
            self.probe_hub_child(&hub, desc);
        }
        ProbeOutcome::Ready(hub)
    }

    fn probe_hub_child(&self, hub: &Arc<CpldHub>, desc: ChildDescriptor) {
        match self.try_hub_child(hub, &desc) {
            Ok(live) => self.devices.insert(&desc.node, live),
            Err(Error::DeviceUnavailable) => {
                dev_dbg!(hub.device(), "deferring child '{}'", desc.node.name());
                self.pending().push(Pending::HubChild {
                    hub: hub.clone(),
                    desc,
                });
            }
            Err(err) => {
                dev_warn!(
                    hub.device(),
                    "child '{}' failed to probe: {}",
                    desc.node.name(),
                    err
                );
            }
        }
    }

    fn try_hub_child(&self, hub: &Arc<CpldHub>, desc: &ChildDescriptor) -> Result<LiveDevice> {
        let Some(kind) = FrontendKind::from_compatible(&desc.kind) else {
            dev_warn!(hub.device(), "unknown child kind '{}'", desc.kind);
            return Err(Error::ConfigInvalid);
        };
        let dev = Device::new(desc.node.clone());
        Ok(match kind {
            FrontendKind::Register => {
                LiveDevice::Register(RegisterFrontend::probe(dev, hub.clone())?)
            }
            FrontendKind::Gpio => LiveDevice::Gpio(GpioFrontend::probe(dev, hub.clone())?),
            FrontendKind::I2cMux => {
                LiveDevice::I2cMux(I2cMuxFrontend::probe(dev, hub.clone(), &self.i2c)?)
            }
        })
    }

    /// Probes a peripheral that consumes already probed devices.
    pub fn probe_consumer(&self, node: &Arc<FwNode>) -> ProbeOutcome<LiveDevice> {
        match self.try_consumer(node) {
            Ok(live) => {
                self.devices.insert(node, live.clone());
                ProbeOutcome::Ready(live)
            }
            Err(Error::DeviceUnavailable) => {
                log::debug!("{}: deferring probe", node.path());
                self.pending().push(Pending::Consumer { node: node.clone() });
                ProbeOutcome::NotYetAvailable
            }
            Err(err) => {
                log::warn!("{}: probe failed: {}", node.path(), err);
                ProbeOutcome::PermanentFailure(err)
            }
        }
    }

    fn try_consumer(&self, node: &Arc<FwNode>) -> Result<LiveDevice> {
        let Some(compatible) = node.property_read::<String>("compatible").optional() else {
            log::error!("{}: node has no compatible", node.path());
            return Err(Error::ConfigInvalid);
        };
        let dev = Device::new(node.clone());
        match compatible.as_str() {
            "cpld-fan" => Ok(LiveDevice::Fan(Fan::probe(dev, self)?)),
            "sff-transceiver" => Ok(LiveDevice::Sff(Sff::probe(dev, self)?)),
            other => {
                log::error!("{}: no driver for '{}'", node.path(), other);
                Err(Error::ConfigInvalid)
            }
        }
    }

    /// Retries every deferred probe once. Probes that become ready are
    /// registered, probes still waiting are re-queued, permanent failures
    /// are dropped. Returns how many became ready.
    pub fn retry_deferred(&self) -> usize {
        let parked = std::mem::take(&mut *self.pending());
        let mut ready = 0;
        for item in parked {
            match &item {
                Pending::HubChild { hub, desc } => match self.try_hub_child(hub, desc) {
                    Ok(live) => {
                        self.devices.insert(&desc.node, live);
                        ready += 1;
                    }
                    Err(Error::DeviceUnavailable) => self.pending().push(item),
                    Err(err) => {
                        dev_warn!(
                            hub.device(),
                            "child '{}' failed to probe: {}",
                            desc.node.name(),
                            err
                        );
                    }
                },
                Pending::Consumer { node } => match self.try_consumer(node) {
                    Ok(live) => {
                        self.devices.insert(node, live);
                        ready += 1;
                    }
                    Err(Error::DeviceUnavailable) => self.pending().push(item),
                    Err(err) => log::warn!("{}: probe failed: {}", node.path(), err),
                },
            }
        }
        ready
    }
}
