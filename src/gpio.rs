// SPDX-License-Identifier: GPL-2.0

//! GPIO chip boundary: the operations a bit-addressable line provider
//! implements, shaped like a gpiochip ops table, plus the consumer-side
//! handle to a single line.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Static direction of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    Input,
    Output,
}

/// A provider of individually addressable GPIO lines.
///
/// Line numbering is chip-local, `0..line_count()`. Direction is a fixed
/// wiring fact for the hardware behind this crate; the direction setters
/// succeed only when they agree with the declared direction.
pub trait Chip: Send + Sync {
    fn line_count(&self) -> usize;

    /// Line names, one per line, in line-number order.
    fn line_names(&self) -> &[String];

    fn get(&self, pin: usize) -> Result<bool>;

    fn set(&self, pin: usize, value: bool) -> Result<()>;

    fn direction(&self, pin: usize) -> Result<LineDirection>;

    fn direction_input(&self, pin: usize) -> Result<()>;

    fn direction_output(&self, pin: usize, value: bool) -> Result<()>;
}

/// A consumer's handle to one line of a chip.
#[derive(Clone)]
pub struct Line {
    chip: Arc<dyn Chip>,
    pin: usize,
}

impl Line {
    pub fn new(chip: Arc<dyn Chip>, pin: usize) -> Result<Self> {
        if pin >= chip.line_count() {
            return Err(Error::NoSuchPin(pin));
        }
        Ok(Line { chip, pin })
    }

    pub fn pin(&self) -> usize {
        self.pin
    }

    pub fn get(&self) -> Result<bool> {
        self.chip.get(self.pin)
    }

    pub fn set(&self, value: bool) -> Result<()> {
        self.chip.set(self.pin, value)
    }

    pub fn direction(&self) -> Result<LineDirection> {
        self.chip.direction(self.pin)
    }
}
