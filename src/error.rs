// SPDX-License-Identifier: GPL-2.0

//! Error taxonomy shared by the hub, the frontends and the composition layer.
//!
//! Configuration errors are fatal to the failing device only; transport
//! failures propagate unmodified to the immediate caller; a missing dependency
//! is reported as [`Error::DeviceUnavailable`] so the probe layer can turn it
//! into a deferred retry instead of a permanent failure.

use thiserror::Error;

/// Errors produced by hub, frontend and property operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A required property is missing or malformed, or an argument does not
    /// match the declared device description.
    #[error("invalid device configuration")]
    ConfigInvalid,

    /// A device this operation depends on is not (yet) present. During probe
    /// this is the deferred-retry signal.
    #[error("device not available")]
    DeviceUnavailable,

    /// The operation cannot be implemented under the current configuration.
    #[error("operation not supported")]
    Unsupported,

    /// A GPIO pin index past the end of the declared valid bits.
    #[error("no such pin: {0}")]
    NoSuchPin(usize),

    /// A register offset outside the supported register range.
    #[error("register offset out of range: {0:#04x}")]
    InvalidOffset(u32),

    /// The underlying register bus transaction failed.
    #[error("register transport failure")]
    TransportFailure,

    /// The named property does not exist on the device node.
    #[error("property '{0}' is missing")]
    PropertyMissing(String),

    /// The named property holds more data than the caller asked for, or a
    /// value does not fit the requested integer width.
    #[error("property '{0}' exceeds the requested size")]
    PropertyTooLarge(String),

    /// The named property exists but holds a different value type.
    #[error("property '{0}' has mismatched type")]
    PropertyTypeMismatch(String),
}

/// Crate-wide result type, defaulting the success case to `()`.
pub type Result<T = ()> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_property() {
        let err = Error::PropertyMissing("valid-masks".into());
        assert_eq!(err.to_string(), "property 'valid-masks' is missing");
    }

    #[test]
    fn display_formats_offset_as_hex() {
        assert_eq!(
            Error::InvalidOffset(0xff).to_string(),
            "register offset out of range: 0xff"
        );
    }
}
