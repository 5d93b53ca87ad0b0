// SPDX-License-Identifier: GPL-2.0

//! Minimal I2C adapter model: named parent adapters, mux-spawned channel
//! adapters, and a registry that reference resolution looks adapters up in.
//!
//! Channel adapters do not move bytes themselves; they route: claiming a
//! channel selects it on the mux, dropping the claim optionally deselects.
//! Registrations are RAII handles, so a mux tearing down unregisters every
//! child adapter exactly once.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::{Error, Result};
use crate::property::FwNode;

/// A parent (root) I2C adapter, registered by the platform integration.
#[derive(Debug)]
pub struct Adapter {
    name: String,
    node: Option<Arc<FwNode>>,
}

impl Adapter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> Option<&Arc<FwNode>> {
        self.node.as_ref()
    }
}

/// Channel-select operations a mux provides to its child adapters.
pub trait ChannelSelector: Send + Sync {
    fn select_channel(&self, chan: u8) -> Result;
    fn deselect(&self) -> Result;
    /// Whether claims on child adapters deselect when released.
    fn deselect_on_exit(&self) -> bool;
}

/// A virtual adapter bound to one mux channel.
pub struct MuxChannelAdapter {
    name: String,
    channel: u8,
    selector: Weak<dyn ChannelSelector>,
}

impl MuxChannelAdapter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Routes the bus to this channel. The claim keeps the route until
    /// dropped; release deselects if the mux was configured to.
    pub fn claim(&self) -> Result<ClaimedChannel> {
        let selector = self
            .selector
            .upgrade()
            .ok_or(Error::DeviceUnavailable)?;
        selector.select_channel(self.channel)?;
        let deselect = selector.deselect_on_exit();
        Ok(ClaimedChannel {
            adapter_name: self.name.clone(),
            selector: deselect.then_some(selector),
        })
    }
}

/// A claimed mux route; dropping it releases the route.
pub struct ClaimedChannel {
    adapter_name: String,
    selector: Option<Arc<dyn ChannelSelector>>,
}

impl std::fmt::Debug for ClaimedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimedChannel")
            .field("adapter_name", &self.adapter_name)
            .finish_non_exhaustive()
    }
}

impl Drop for ClaimedChannel {
    fn drop(&mut self) {
        if let Some(selector) = self.selector.take() {
            if let Err(err) = selector.deselect() {
                log::warn!("{}: deselect on release failed: {}", self.adapter_name, err);
            }
        }
    }
}

enum Registered {
    Root(Arc<Adapter>),
    Channel(Arc<MuxChannelAdapter>),
}

impl Registered {
    fn name(&self) -> &str {
        match self {
            Registered::Root(a) => a.name(),
            Registered::Channel(a) => a.name(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    buses: Vec<Registered>,
}

/// All live adapters, root and mux-spawned alike, by unique name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a root adapter, optionally bound to its description node.
    pub fn register_adapter(
        &self,
        name: impl Into<String>,
        node: Option<Arc<FwNode>>,
    ) -> Result<Arc<Adapter>> {
        let name = name.into();
        let mut inner = self.lock();
        if inner.buses.iter().any(|b| b.name() == name) {
            log::error!("i2c: adapter '{}' already registered", name);
            return Err(Error::ConfigInvalid);
        }
        let adapter = Arc::new(Adapter { name, node });
        inner.buses.push(Registered::Root(adapter.clone()));
        Ok(adapter)
    }

    /// Finds the root adapter bound to the given description node.
    pub fn find_by_node(&self, node: &Arc<FwNode>) -> Option<Arc<Adapter>> {
        let path = node.path();
        self.lock().buses.iter().find_map(|b| match b {
            Registered::Root(a) if a.node().is_some_and(|n| n.path() == path) => {
                Some(a.clone())
            }
            _ => None,
        })
    }

    /// Registers a mux channel adapter; the returned handle unregisters it
    /// when dropped.
    pub fn register_channel(
        &self,
        name: impl Into<String>,
        channel: u8,
        selector: Weak<dyn ChannelSelector>,
    ) -> Result<ChannelRegistration> {
        let name = name.into();
        let mut inner = self.lock();
        if inner.buses.iter().any(|b| b.name() == name) {
            log::error!("i2c: adapter '{}' already registered", name);
            return Err(Error::ConfigInvalid);
        }
        let adapter = Arc::new(MuxChannelAdapter {
            name,
            channel,
            selector,
        });
        inner.buses.push(Registered::Channel(adapter.clone()));
        Ok(ChannelRegistration {
            registry: Arc::downgrade(&self.inner),
            adapter,
        })
    }

    pub fn find_channel(&self, name: &str) -> Option<Arc<MuxChannelAdapter>> {
        self.lock().buses.iter().find_map(|b| match b {
            Registered::Channel(a) if a.name() == name => Some(a.clone()),
            _ => None,
        })
    }

    /// Number of live mux channel adapters.
    pub fn channel_count(&self) -> usize {
        self.lock()
            .buses
            .iter()
            .filter(|b| matches!(b, Registered::Channel(_)))
            .count()
    }
}

/// RAII registration of one mux channel adapter.
pub struct ChannelRegistration {
    registry: Weak<Mutex<RegistryInner>>,
    adapter: Arc<MuxChannelAdapter>,
}

impl ChannelRegistration {
    pub fn adapter(&self) -> &Arc<MuxChannelAdapter> {
        &self.adapter
    }
}

impl Drop for ChannelRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut inner = registry.lock().unwrap_or_else(PoisonError::into_inner);
            inner.buses.retain(|b| b.name() != self.adapter.name());
        }
    }
}
