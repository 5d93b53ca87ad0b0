// SPDX-License-Identifier: GPL-2.0

//! Fan peripheral built on a CPLD register frontend.
//!
//! A fan node references a register frontend for its PWM and tach
//! registers and optionally claims alarm and presence GPIO lines from a
//! GPIO frontend. Controls are exposed as hwmon-style attributes; a
//! modular fan whose presence line reads low registers none.

use std::sync::Arc;

use crate::composition;
use crate::cpld::register::RegisterFrontend;
use crate::device::{Attribute, Device};
use crate::driver::System;
use crate::error::{Error, Result};
use crate::gpio::Line;
use crate::property::NArgs;
use crate::{dev_err, dev_info};

/// PWM control register claimed from a register frontend.
#[derive(Clone)]
struct PwmChannel {
    regs: Arc<RegisterFrontend>,
    index: usize,
    /// Raw register bounds from `pwm-range`.
    min: u32,
    max: u32,
}

/// Speed readout register claimed from a register frontend.
#[derive(Clone)]
struct SpeedChannel {
    regs: Arc<RegisterFrontend>,
    index: usize,
    scale: u32,
    range: Option<(u32, u32)>,
}

/// Maps a user pwm value (0..=255) to a raw register state.
fn pwm_to_state(min: u32, max: u32, pwm: u32) -> u32 {
    let state = (pwm * max) / 255;
    state.max(min)
}

/// Maps a raw register state back to the 0..=255 pwm scale.
fn state_to_pwm(max: u32, state: u32) -> u32 {
    (255 * state) / max
}

pub struct Fan {
    dev: Arc<Device>,
    label: Option<String>,
    pwm: Option<PwmChannel>,
    speed: Option<SpeedChannel>,
    alarm: Option<Line>,
    present: Option<Line>,
    is_present: bool,
}

impl std::fmt::Debug for Fan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fan")
            .field("dev", &self.dev.name())
            .field("is_present", &self.is_present)
            .finish_non_exhaustive()
    }
}

impl Fan {
    pub fn probe(dev: Arc<Device>, system: &System) -> Result<Arc<Self>> {
        if dev.node().property_present("disabled") {
            dev_info!(dev, "fan is disabled");
            return Err(Error::Unsupported);
        }

        let pwm = match Self::register_channel(&dev, system, "pwm")? {
            Some((regs, index)) => {
                let range = dev
                    .node()
                    .property_read_array_vec::<u32>("pwm-range", 2)
                    .required_by(&dev)?;
                let (min, max) = (range[0], range[1]);
                if max == 0 || max > 255 || min > max {
                    dev_err!(dev, "bad pwm-range [{}, {}]", min, max);
                    return Err(Error::ConfigInvalid);
                }
                Some(PwmChannel {
                    regs,
                    index,
                    min,
                    max,
                })
            }
            None => None,
        };

        let speed = match Self::register_channel(&dev, system, "speed")? {
            Some((regs, index)) => {
                let range = dev
                    .node()
                    .property_read_array_vec::<u32>("speed-range", 2)
                    .optional()
                    .map(|r| (r[0], r[1]));
                let scale = dev.node().property_read::<u32>("speed-scale").or(1);
                Some(SpeedChannel {
                    regs,
                    index,
                    scale,
                    range,
                })
            }
            None => None,
        };

        let alarm = composition::resolve_gpio_line(&system.devices, &dev, "alarm-gpios")?;
        if alarm.is_some() {
            dev_info!(dev, "using alarm gpio");
        }

        let present = composition::resolve_gpio_line(&system.devices, &dev, "present-gpios")?;
        let is_present = match &present {
            Some(line) => {
                dev_info!(dev, "fan is modular");
                line.get()?
            }
            None => true,
        };

        let label = dev.node().property_read::<String>("label").optional();

        let fan = Arc::new(Fan {
            dev,
            label,
            pwm,
            speed,
            alarm,
            present,
            is_present,
        });
        if fan.is_present {
            fan.register_attrs()?;
        }
        Ok(fan)
    }

    /// Resolves an optional reference naming a register frontend plus the
    /// index of one register in its declared offset list.
    fn register_channel(
        dev: &Arc<Device>,
        system: &System,
        prop: &str,
    ) -> Result<Option<(Arc<RegisterFrontend>, usize)>> {
        if !dev.node().property_present(prop) {
            return Ok(None);
        }
        let (live, args) =
            composition::resolve_reference(&system.devices, dev.node(), prop, NArgs::N(1), 0)?;
        let Some(regs) = live.as_register() else {
            dev_err!(dev, "'{}' does not point at a register frontend", prop);
            return Err(Error::ConfigInvalid);
        };
        let Some(&index) = args.first() else {
            return Err(Error::ConfigInvalid);
        };
        let index = usize::try_from(index).map_err(|_| Error::ConfigInvalid)?;
        regs.check_index(index)?;
        Ok(Some((regs.clone(), index)))
    }

    fn register_attrs(&self) -> Result {
        let mut attrs = Vec::new();

        if let Some(pwm) = &self.pwm {
            let show = {
                let pwm = pwm.clone();
                move || -> Result<String> {
                    let state = pwm.regs.get_index(pwm.index)?;
                    Ok(format!("{}\n", state_to_pwm(pwm.max, u32::from(state))))
                }
            };
            let store = {
                let pwm = pwm.clone();
                move |buf: &str| -> Result {
                    let value = composition::parse_u64(buf)?.min(255) as u32;
                    let state = pwm_to_state(pwm.min, pwm.max, value);
                    // max <= 255 keeps the state within one register.
                    pwm.regs.set_index(pwm.index, state as u8)
                }
            };
            attrs.push(Attribute::read_write("pwm1", show, store));
            if let Some(label) = &self.label {
                let text = format!("{} (PWM)\n", label);
                attrs.push(Attribute::read_only("pwm1_label", move || Ok(text.clone())));
            }
        }

        if let Some(speed) = &self.speed {
            let show = {
                let speed = speed.clone();
                move || -> Result<String> {
                    let value = speed.regs.get_index(speed.index)?;
                    Ok(format!("{}\n", u32::from(value) * speed.scale))
                }
            };
            attrs.push(Attribute::read_only("fan1_input", show));
            if let Some(label) = &self.label {
                let text = format!("{} speed (RPM)\n", label);
                attrs.push(Attribute::read_only("fan1_label", move || Ok(text.clone())));
            }
            if let Some((min, max)) = speed.range {
                attrs.push(Attribute::read_only("fan1_min", move || {
                    Ok(format!("{}\n", min))
                }));
                attrs.push(Attribute::read_only("fan1_max", move || {
                    Ok(format!("{}\n", max))
                }));
            }
        }

        if let Some(alarm) = &self.alarm {
            let alarm = alarm.clone();
            attrs.push(Attribute::read_only("fan1_alarm", move || {
                Ok(format!("{}\n", u8::from(alarm.get()?)))
            }));
        }

        dev_info!(self.dev, "registering {} fan attributes", attrs.len());
        self.dev.create_attrs(attrs)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    /// Whether the fan module was present at probe time.
    pub fn is_present(&self) -> bool {
        self.is_present
    }

    /// Re-reads the presence line; a fixed fan is always present.
    pub fn presence(&self) -> Result<bool> {
        match &self.present {
            Some(line) => line.get(),
            None => Ok(true),
        }
    }
}
