// SPDX-License-Identifier: GPL-2.0

//! Board description loading.
//!
//! A board is one TOML document holding a tree of described nodes, the
//! shape the platform firmware would otherwise hand over: per-node unit
//! address, properties (flags, integers, strings, references), child
//! nodes. The loader builds the [`FwNode`] tree the probe code consumes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::property::{FwNode, NodeBuilder};

/// Top-level document: one `[board]` tree.
#[derive(Debug, Deserialize)]
struct BoardFile {
    board: NodeDesc,
}

/// One described node.
#[derive(Debug, Deserialize)]
struct NodeDesc {
    name: String,
    address: Option<u64>,
    #[serde(default)]
    properties: BTreeMap<String, PropDesc>,
    #[serde(default)]
    children: Vec<NodeDesc>,
}

/// One reference entry: a target node path plus its arguments.
#[derive(Debug, Deserialize)]
struct RefDesc {
    target: String,
    #[serde(default)]
    args: Vec<u64>,
}

/// A property value in any of the shapes a board file may use.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PropDesc {
    Flag(bool),
    Int(i64),
    Str(String),
    Ints(Vec<i64>),
    Strs(Vec<String>),
    Refs(Vec<RefDesc>),
    Ref(RefDesc),
}

/// Parses a board description and builds its node tree.
pub fn load_board(text: &str) -> Result<Arc<FwNode>> {
    let file: BoardFile = toml::from_str(text).map_err(|err| {
        log::error!("board description does not parse: {}", err);
        Error::ConfigInvalid
    })?;
    Ok(build_node(file.board)?.build())
}

fn unsigned(name: &str, v: i64) -> Result<u64> {
    u64::try_from(v).map_err(|_| {
        log::error!("property '{}' holds a negative integer", name);
        Error::ConfigInvalid
    })
}

fn build_node(desc: NodeDesc) -> Result<NodeBuilder> {
    let mut node = NodeBuilder::new(desc.name);
    if let Some(address) = desc.address {
        node = node.address(address);
    }
    for (name, prop) in desc.properties {
        node = match prop {
            PropDesc::Flag(true) => node.flag(name),
            PropDesc::Flag(false) => node,
            PropDesc::Int(v) => {
                let v = unsigned(&name, v)?;
                node.property_u64(name, v)
            }
            PropDesc::Str(s) => node.property_str(name, s),
            PropDesc::Ints(vs) => {
                let mut out = Vec::with_capacity(vs.len());
                for v in vs {
                    out.push(unsigned(&name, v)?);
                }
                node.property_u64s(name, out)
            }
            PropDesc::Strs(vs) => node.property_strs(name, vs),
            PropDesc::Refs(refs) => {
                for r in refs {
                    node = node.reference(&name, r.target, r.args);
                }
                node
            }
            PropDesc::Ref(r) => node.reference(name, r.target, r.args),
        };
    }
    for child in desc.children {
        node = node.child(build_node(child)?);
    }
    Ok(node)
}
