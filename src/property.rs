// SPDX-License-Identifier: GPL-2.0

//! Firmware node tree: the device-description boundary.
//!
//! Nodes mirror the shape of ACPI/device-tree data: a named node with an
//! optional unit address, typed properties, child nodes, and references to
//! other nodes carrying per-reference integer arguments. Property reads hand
//! back a [`PropertyGuard`] so the caller states what a missing value means:
//! required (logged against the device and failed), optional, or defaulted.
//!
//! The tree is immutable once built; construction goes through
//! [`NodeBuilder`], either directly or via the board-description loader.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::dev_err;
use crate::device::Device;
use crate::error::{Error, Result};

/// A property value as stored on a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Present with no payload; a boolean flag.
    Empty,
    /// One or more integers, widened to `u64` for storage.
    Integers(Vec<u64>),
    /// One or more strings.
    Strings(Vec<String>),
    /// References to other nodes, each with its own argument list.
    References(Vec<Reference>),
}

/// One entry of a reference property: an absolute target path plus arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub target: String,
    pub args: Vec<u64>,
}

/// How many arguments a reference entry carries.
#[derive(Debug, Clone, Copy)]
pub enum NArgs<'a> {
    /// The argument count is read from the named `u32` property on the
    /// *target* node.
    Prop(&'a str),
    /// Fixed argument count.
    N(u32),
}

/// The resolved target of a reference property plus its arguments.
#[derive(Debug, Clone)]
pub struct ReferenceArgs {
    pub node: Arc<FwNode>,
    pub args: Vec<u64>,
}

/// One node of the description tree.
#[derive(Debug)]
pub struct FwNode {
    name: String,
    address: Option<u64>,
    parent: Weak<FwNode>,
    properties: BTreeMap<String, Value>,
    children: Vec<Arc<FwNode>>,
}

impl FwNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's unit address (the ACPI `_ADR` equivalent), if declared.
    pub fn address(&self) -> Option<u64> {
        self.address
    }

    pub fn parent(&self) -> Option<Arc<FwNode>> {
        self.parent.upgrade()
    }

    /// Absolute path of this node; the root node is `/`.
    pub fn path(&self) -> String {
        match self.parent() {
            None => "/".to_string(),
            Some(parent) => {
                let base = parent.path();
                if base == "/" {
                    format!("/{}", self.name)
                } else {
                    format!("{}/{}", base, self.name)
                }
            }
        }
    }

    pub fn children(&self) -> &[Arc<FwNode>] {
        &self.children
    }

    pub fn get_child_by_name(&self, name: &str) -> Option<&Arc<FwNode>> {
        self.children.iter().find(|c| c.name() == name)
    }

    fn root(self: &Arc<Self>) -> Arc<FwNode> {
        let mut cur = self.clone();
        while let Some(parent) = cur.parent() {
            cur = parent;
        }
        cur
    }

    /// Looks up a node by absolute path anywhere in this node's tree.
    pub fn find_node(self: &Arc<Self>, path: &str) -> Option<Arc<FwNode>> {
        let mut cur = self.root();
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            cur = cur.get_child_by_name(seg)?.clone();
        }
        Some(cur)
    }

    pub fn property_present(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Reads a scalar property; the guard decides how a miss is handled.
    pub fn property_read<'name, T: Property>(
        &self,
        name: &'name str,
    ) -> PropertyGuard<'name, T> {
        PropertyGuard {
            inner: T::read(self, name),
            name,
        }
    }

    /// Number of elements of type `T` stored under `name`.
    pub fn property_count_elem<T: PropertyElem>(&self, name: &str) -> Result<usize> {
        let value = self
            .properties
            .get(name)
            .ok_or_else(|| Error::PropertyMissing(name.into()))?;
        T::count_in(value, name)
    }

    /// Reads the first `len` elements of an array property.
    ///
    /// Fails with [`Error::PropertyTooLarge`] when fewer than `len` elements
    /// are stored; extra stored elements are left unread.
    pub fn property_read_array_vec<'name, T: PropertyElem>(
        &self,
        name: &'name str,
        len: usize,
    ) -> PropertyGuard<'name, Vec<T>> {
        let inner = match self.properties.get(name) {
            None => Err(Error::PropertyMissing(name.into())),
            Some(value) => T::extract(value, name, len),
        };
        PropertyGuard { inner, name }
    }

    /// Resolves entry `index` of the reference property `prop`.
    pub fn property_get_reference_args(
        self: &Arc<Self>,
        prop: &str,
        nargs: NArgs<'_>,
        index: usize,
    ) -> Result<ReferenceArgs> {
        let value = self
            .properties
            .get(prop)
            .ok_or_else(|| Error::PropertyMissing(prop.into()))?;
        let Value::References(refs) = value else {
            return Err(Error::PropertyTypeMismatch(prop.into()));
        };
        let entry = refs
            .get(index)
            .ok_or_else(|| Error::PropertyMissing(prop.into()))?;
        let Some(node) = self.find_node(&entry.target) else {
            log::error!(
                "{}: reference '{}' targets unknown node '{}'",
                self.path(),
                prop,
                entry.target
            );
            return Err(Error::ConfigInvalid);
        };
        let count = match nargs {
            NArgs::N(n) => n as usize,
            NArgs::Prop(cells) => u32::read(&node, cells)? as usize,
        };
        if entry.args.len() < count {
            log::error!(
                "{}: reference '{}' carries {} argument(s), {} required",
                self.path(),
                prop,
                entry.args.len(),
                count
            );
            return Err(Error::ConfigInvalid);
        }
        Ok(ReferenceArgs {
            node,
            args: entry.args[..count].to_vec(),
        })
    }
}

/// A pending property read. The caller decides whether the property was
/// required, optional, or optional with a default.
#[must_use]
pub struct PropertyGuard<'name, T> {
    inner: Result<T>,
    name: &'name str,
}

impl<T> PropertyGuard<'_, T> {
    /// The property is required by `dev`: a miss is logged against the device
    /// and returned as an error.
    pub fn required_by(self, dev: &Device) -> Result<T> {
        match &self.inner {
            Err(Error::PropertyMissing(_)) => {
                dev_err!(dev, "property '{}' is missing", self.name);
            }
            Err(err) => {
                dev_err!(dev, "property '{}' is invalid: {}", self.name, err);
            }
            Ok(_) => {}
        }
        self.inner
    }

    /// The property is optional; any miss becomes `None`.
    pub fn optional(self) -> Option<T> {
        self.inner.ok()
    }

    /// The property is optional with a caller-supplied fallback.
    pub fn or(self, default: T) -> T {
        self.inner.unwrap_or(default)
    }

    /// The property is optional, falling back to the type's default.
    pub fn or_default(self) -> T
    where
        T: Default,
    {
        self.inner.unwrap_or_default()
    }
}

/// Scalar types readable from a property.
pub trait Property: Sized {
    fn read(node: &FwNode, name: &str) -> Result<Self>;
}

impl Property for bool {
    fn read(node: &FwNode, name: &str) -> Result<Self> {
        Ok(node.property_present(name))
    }
}

impl Property for String {
    fn read(node: &FwNode, name: &str) -> Result<Self> {
        match node.properties.get(name) {
            None => Err(Error::PropertyMissing(name.into())),
            Some(Value::Strings(v)) if !v.is_empty() => Ok(v[0].clone()),
            Some(_) => Err(Error::PropertyTypeMismatch(name.into())),
        }
    }
}

/// Element types readable from an array property.
pub trait PropertyElem: Sized {
    fn count_in(value: &Value, name: &str) -> Result<usize>;
    fn extract(value: &Value, name: &str, len: usize) -> Result<Vec<Self>>;
}

macro_rules! impl_property_for_int {
    ($($t:ty),*) => {
        $(
            impl Property for $t {
                fn read(node: &FwNode, name: &str) -> Result<Self> {
                    match node.properties.get(name) {
                        None => Err(Error::PropertyMissing(name.into())),
                        Some(Value::Integers(v)) if !v.is_empty() => <$t>::try_from(v[0])
                            .map_err(|_| Error::PropertyTooLarge(name.into())),
                        Some(_) => Err(Error::PropertyTypeMismatch(name.into())),
                    }
                }
            }

            impl PropertyElem for $t {
                fn count_in(value: &Value, name: &str) -> Result<usize> {
                    match value {
                        Value::Integers(v) => Ok(v.len()),
                        Value::Empty => Ok(0),
                        _ => Err(Error::PropertyTypeMismatch(name.into())),
                    }
                }

                fn extract(value: &Value, name: &str, len: usize) -> Result<Vec<Self>> {
                    let Value::Integers(v) = value else {
                        return Err(Error::PropertyTypeMismatch(name.into()));
                    };
                    if len > v.len() {
                        return Err(Error::PropertyTooLarge(name.into()));
                    }
                    v[..len]
                        .iter()
                        .map(|&x| <$t>::try_from(x).map_err(|_| Error::PropertyTooLarge(name.into())))
                        .collect()
                }
            }
        )*
    };
}

impl_property_for_int!(u8, u16, u32, u64);

impl PropertyElem for String {
    fn count_in(value: &Value, name: &str) -> Result<usize> {
        match value {
            Value::Strings(v) => Ok(v.len()),
            Value::Empty => Ok(0),
            _ => Err(Error::PropertyTypeMismatch(name.into())),
        }
    }

    fn extract(value: &Value, name: &str, len: usize) -> Result<Vec<Self>> {
        let Value::Strings(v) = value else {
            return Err(Error::PropertyTypeMismatch(name.into()));
        };
        if len > v.len() {
            return Err(Error::PropertyTooLarge(name.into()));
        }
        Ok(v[..len].to_vec())
    }
}

/// Builds an immutable [`FwNode`] tree.
#[derive(Debug, Default)]
pub struct NodeBuilder {
    name: String,
    address: Option<u64>,
    properties: BTreeMap<String, Value>,
    children: Vec<NodeBuilder>,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        NodeBuilder {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn property_u64(self, name: impl Into<String>, value: u64) -> Self {
        self.property(name, Value::Integers(vec![value]))
    }

    pub fn property_u64s(
        self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = u64>,
    ) -> Self {
        self.property(name, Value::Integers(values.into_iter().collect()))
    }

    pub fn property_str(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.property(name, Value::Strings(vec![value.into()]))
    }

    pub fn property_strs<S: Into<String>>(
        self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.property(
            name,
            Value::Strings(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Records a presence-only flag property.
    pub fn flag(self, name: impl Into<String>) -> Self {
        self.property(name, Value::Empty)
    }

    /// Appends one reference entry to the named reference property.
    pub fn reference(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        args: impl IntoIterator<Item = u64>,
    ) -> Self {
        let entry = Reference {
            target: target.into(),
            args: args.into_iter().collect(),
        };
        match self
            .properties
            .entry(name.into())
            .or_insert_with(|| Value::References(Vec::new()))
        {
            Value::References(refs) => refs.push(entry),
            other => *other = Value::References(vec![entry]),
        }
        self
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn build(self) -> Arc<FwNode> {
        build_with_parent(self, Weak::new())
    }
}

fn build_with_parent(builder: NodeBuilder, parent: Weak<FwNode>) -> Arc<FwNode> {
    Arc::new_cyclic(|me| FwNode {
        name: builder.name,
        address: builder.address,
        parent,
        properties: builder.properties,
        children: builder
            .children
            .into_iter()
            .map(|c| build_with_parent(c, me.clone()))
            .collect(),
    })
}
