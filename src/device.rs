// SPDX-License-Identifier: GPL-2.0

//! Device handles and the attribute surface.
//!
//! A [`Device`] ties a firmware node to a name used in diagnostics and owns
//! the named attributes a frontend exposes to its consumers. Handles are
//! shared by reference counting; dropping the last reference releases the
//! device, there is no manual get/put pairing.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::property::FwNode;

/// Logs an error message prefixed with the device name.
#[macro_export]
macro_rules! dev_err {
    ($dev:expr, $($arg:tt)*) => {
        ::log::error!("{}: {}", ($dev).name(), ::core::format_args!($($arg)*))
    };
}

/// Logs a warning prefixed with the device name.
#[macro_export]
macro_rules! dev_warn {
    ($dev:expr, $($arg:tt)*) => {
        ::log::warn!("{}: {}", ($dev).name(), ::core::format_args!($($arg)*))
    };
}

/// Logs an informational message prefixed with the device name.
#[macro_export]
macro_rules! dev_info {
    ($dev:expr, $($arg:tt)*) => {
        ::log::info!("{}: {}", ($dev).name(), ::core::format_args!($($arg)*))
    };
}

/// Logs a debug message prefixed with the device name.
#[macro_export]
macro_rules! dev_dbg {
    ($dev:expr, $($arg:tt)*) => {
        ::log::debug!("{}: {}", ($dev).name(), ::core::format_args!($($arg)*))
    };
}

/// Whether an attribute accepts stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrMode {
    ReadOnly,
    ReadWrite,
}

type ShowFn = Box<dyn Fn() -> Result<String> + Send + Sync>;
type StoreFn = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// A named endpoint exposed by a device, backed by show/store callbacks.
pub struct Attribute {
    name: String,
    mode: AttrMode,
    show: ShowFn,
    store: Option<StoreFn>,
}

impl Attribute {
    pub fn read_only(
        name: impl Into<String>,
        show: impl Fn() -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Attribute {
            name: name.into(),
            mode: AttrMode::ReadOnly,
            show: Box::new(show),
            store: None,
        }
    }

    pub fn read_write(
        name: impl Into<String>,
        show: impl Fn() -> Result<String> + Send + Sync + 'static,
        store: impl Fn(&str) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Attribute {
            name: name.into(),
            mode: AttrMode::ReadWrite,
            show: Box::new(show),
            store: Some(Box::new(store)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AttrMode {
        self.mode
    }
}

/// A probed device: a firmware node plus the attributes exposed on it.
pub struct Device {
    name: String,
    node: Arc<FwNode>,
    attrs: Mutex<Vec<Attribute>>,
}

impl Device {
    pub fn new(node: Arc<FwNode>) -> Arc<Self> {
        Arc::new(Device {
            name: node.path(),
            node,
            attrs: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &Arc<FwNode> {
        &self.node
    }

    fn attrs(&self) -> std::sync::MutexGuard<'_, Vec<Attribute>> {
        self.attrs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exposes an attribute on this device. Fails if the name is taken.
    pub fn create_attr(&self, attr: Attribute) -> Result {
        let mut attrs = self.attrs();
        if attrs.iter().any(|a| a.name == attr.name) {
            dev_err!(self, "attribute '{}' already exists", attr.name);
            return Err(Error::ConfigInvalid);
        }
        attrs.push(attr);
        Ok(())
    }

    /// Exposes a set of attributes as a unit: on any failure the ones
    /// already created are removed again, newest first, and the error is
    /// returned.
    pub fn create_attrs(&self, attrs: Vec<Attribute>) -> Result {
        let mut created: Vec<String> = Vec::new();
        for attr in attrs {
            let name = attr.name().to_string();
            if let Err(err) = self.create_attr(attr) {
                for done in created.iter().rev() {
                    let _ = self.remove_attr(done);
                }
                return Err(err);
            }
            created.push(name);
        }
        Ok(())
    }

    /// Retracts a previously exposed attribute.
    pub fn remove_attr(&self, name: &str) -> Result {
        let mut attrs = self.attrs();
        match attrs.iter().position(|a| a.name == name) {
            Some(idx) => {
                attrs.remove(idx);
                Ok(())
            }
            None => Err(Error::ConfigInvalid),
        }
    }

    /// Reads an attribute through its show callback.
    pub fn show_attr(&self, name: &str) -> Result<String> {
        let attrs = self.attrs();
        let attr = attrs
            .iter()
            .find(|a| a.name == name)
            .ok_or(Error::ConfigInvalid)?;
        (attr.show)()
    }

    /// Writes an attribute through its store callback.
    pub fn store_attr(&self, name: &str, buf: &str) -> Result {
        let attrs = self.attrs();
        let attr = attrs
            .iter()
            .find(|a| a.name == name)
            .ok_or(Error::ConfigInvalid)?;
        match &attr.store {
            Some(store) => store(buf),
            None => Err(Error::Unsupported),
        }
    }

    /// Names of all currently exposed attributes, in creation order.
    pub fn attr_names(&self) -> Vec<String> {
        self.attrs().iter().map(|a| a.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::NodeBuilder;

    fn test_device() -> Arc<Device> {
        Device::new(NodeBuilder::new("dev").build())
    }

    #[test]
    fn duplicate_attr_is_rejected() {
        let dev = test_device();
        dev.create_attr(Attribute::read_only("state", || Ok("0\n".into())))
            .unwrap();
        let err = dev
            .create_attr(Attribute::read_only("state", || Ok("1\n".into())))
            .unwrap_err();
        assert_eq!(err, Error::ConfigInvalid);
        assert_eq!(dev.attr_names(), vec!["state"]);
    }

    #[test]
    fn store_on_read_only_attr_is_unsupported() {
        let dev = test_device();
        dev.create_attr(Attribute::read_only("state", || Ok("0\n".into())))
            .unwrap();
        assert_eq!(dev.store_attr("state", "1"), Err(Error::Unsupported));
    }

    #[test]
    fn remove_makes_attr_unreachable() {
        let dev = test_device();
        dev.create_attr(Attribute::read_only("state", || Ok("0\n".into())))
            .unwrap();
        dev.remove_attr("state").unwrap();
        assert_eq!(dev.show_attr("state"), Err(Error::ConfigInvalid));
        assert!(dev.attr_names().is_empty());
    }

    #[test]
    fn failed_batch_rolls_back_created_attrs() {
        let dev = test_device();
        dev.create_attr(Attribute::read_only("taken", || Ok("0\n".into())))
            .unwrap();
        let batch = vec![
            Attribute::read_only("a", || Ok("0\n".into())),
            Attribute::read_only("taken", || Ok("1\n".into())),
            Attribute::read_only("b", || Ok("0\n".into())),
        ];
        assert_eq!(dev.create_attrs(batch), Err(Error::ConfigInvalid));
        assert_eq!(dev.attr_names(), vec!["taken"]);
    }
}
