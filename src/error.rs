//! Error type shared by the whole crate.

use core::fmt;
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong while setting up or driving a panel.
///
/// Out-of-range pixel coordinates are not represented here:
/// drawing outside the panel is a silent no-op.
#[derive(Debug)]
pub enum Error {
    /// Opening `/dev/mem` or mapping one of the register blocks failed.
    Map {
        /// Physical address of the block that could not be mapped.
        address: u64,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The peripheral registers are already claimed by another handle.
    PeripheralsTaken,
    /// The requested rows / chain length is not one of the supported geometries.
    InvalidGeometry {
        /// Requested number of rows.
        rows: usize,
        /// Requested number of chained 32-column panels.
        chained: usize,
    },
    /// The maximum bitplane count must be within `8..=11`.
    InvalidBitplanes(u8),
    /// `pwm_bits` must be within `1..=bitplanes`.
    InvalidPwmBits {
        /// Rejected value.
        requested: u8,
        /// Maximum accepted value.
        max: u8,
    },
    /// The pulse timing cannot be programmed into the PWM clock.
    InvalidTiming(&'static str),
    /// The PWM FIFO did not drain within the stall timeout.
    PulseStalled {
        /// Bitplane whose pulse never completed.
        plane: u8,
    },
    /// The refresh thread could not be started.
    Spawn(io::Error),
    /// The refresh thread is no longer running.
    RefreshStopped,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Map { address, .. } => {
                write!(f, "can't map register block at {address:#010x}")
            }
            Error::PeripheralsTaken => f.write_str("peripheral registers already claimed"),
            Error::InvalidGeometry { rows, chained } => write!(
                f,
                "unsupported panel geometry: {rows} rows, {chained} chained displays"
            ),
            Error::InvalidBitplanes(bits) => {
                write!(f, "bitplane count {bits} outside of 8..=11")
            }
            Error::InvalidPwmBits { requested, max } => {
                write!(f, "pwm bits {requested} outside of 1..={max}")
            }
            Error::InvalidTiming(why) => write!(f, "invalid pulse timing: {why}"),
            Error::PulseStalled { plane } => {
                write!(f, "output enable pulse for bitplane {plane} never finished")
            }
            Error::Spawn(_) => f.write_str("can't start refresh thread"),
            Error::RefreshStopped => f.write_str("refresh thread has stopped"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Map { source, .. } | Error::Spawn(source) => Some(source),
            _ => None,
        }
    }
}
