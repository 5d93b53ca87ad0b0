// SPDX-License-Identifier: GPL-2.0

//! The crate prelude.
//!
//! The most common items probe code uses, intended to be imported as
//! `use cpld_mfd::prelude::*;`.

pub use super::error::{Error, Result};

pub use super::{dev_dbg, dev_err, dev_info, dev_warn};

pub use super::device::Device;
pub use super::driver::{ProbeOutcome, System};
pub use super::property::{FwNode, NArgs, NodeBuilder};
