// SPDX-License-Identifier: GPL-2.0

//! Property-composed CPLD multi-function hub.
//!
//! A switch-complex board describes its CPLD as a tree of property nodes:
//! the hub owns one register map over an opaque bus, and independently
//! probed frontends (plain registers, GPIO expanders, an I2C mux) claim
//! registers from it under a per-register access policy. Peripheral
//! drivers (fans, SFF transceivers) sit on top as pure property and
//! reference consumers.
//!
//! [`driver::System`] holds one board's probe state; [`board::load_board`]
//! builds the node tree from a TOML description.

pub mod board;
pub mod composition;
pub mod cpld;
pub mod device;
pub mod driver;
pub mod error;
pub mod fan;
pub mod gpio;
pub mod i2c;
pub mod prelude;
pub mod property;
pub mod regmap;
pub mod sff;

pub use error::{Error, Result};
