//! Mapping of 8-bit channel values to N-bit output intensities.
//!
//! LEDs driven with a linear duty cycle look far too bright in the low range,
//! so by default every channel goes through the CIE1931 lightness curve
//! before it is split into bitplanes. A cheaper linear mode is available as
//! well; both take the canvas brightness (1..=100 percent) into account.
//!
//! The CIE1931 table has `256 * 100` entries. It is built on first use and
//! then shared read-only by every canvas of a matrix.

use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Smallest supported bitplane count.
pub const MIN_BITPLANES: u8 = 8;
/// Largest supported bitplane count.
pub const MAX_BITPLANES: u8 = 11;

const BRIGHTNESS_LEVELS: usize = 100;

/// Lazily built CIE1931 lookup table for a fixed number of bitplanes.
#[derive(Debug)]
pub struct LuminanceTable {
    bitplanes: u8,
    table: OnceLock<Box<[u16]>>,
}

impl LuminanceTable {
    /// Create a table producing `bitplanes`-bit values.
    ///
    /// Nothing is computed until the first corrected lookup.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBitplanes`] when `bitplanes` is outside `8..=11`.
    pub fn new(bitplanes: u8) -> Result<Self> {
        if !(MIN_BITPLANES..=MAX_BITPLANES).contains(&bitplanes) {
            return Err(Error::InvalidBitplanes(bitplanes));
        }
        Ok(Self {
            bitplanes,
            table: OnceLock::new(),
        })
    }

    /// Number of bits in every value produced by this table.
    #[must_use]
    pub fn bitplanes(&self) -> u8 {
        self.bitplanes
    }

    /// Largest value the table can produce, `2^N - 1`.
    #[must_use]
    pub fn max_value(&self) -> u16 {
        (1u16 << self.bitplanes) - 1
    }

    /// Map `c` at `brightness` percent, either through CIE1931 or linearly.
    ///
    /// `brightness` is clamped to `1..=100`.
    #[must_use]
    pub fn map(&self, c: u8, brightness: u8, correct: bool) -> u16 {
        let brightness = brightness.clamp(1, BRIGHTNESS_LEVELS as u8);
        if correct {
            self.corrected(c, brightness)
        } else {
            self.linear(c, brightness)
        }
    }

    fn corrected(&self, c: u8, brightness: u8) -> u16 {
        let table = self.table.get_or_init(|| self.build());
        table[usize::from(c) * BRIGHTNESS_LEVELS + usize::from(brightness - 1)]
    }

    fn linear(&self, c: u8, brightness: u8) -> u16 {
        let scaled = u16::from(c) * u16::from(brightness) / 100;
        scaled << (self.bitplanes - 8)
    }

    fn build(&self) -> Box<[u16]> {
        let mut table = vec![0u16; 256 * BRIGHTNESS_LEVELS];
        for c in 0..=255u8 {
            for b in 1..=BRIGHTNESS_LEVELS as u8 {
                table[usize::from(c) * BRIGHTNESS_LEVELS + usize::from(b - 1)] =
                    cie1931(c, b, self.bitplanes);
            }
        }
        log::debug!("built CIE1931 table for {} bitplanes", self.bitplanes);
        table.into_boxed_slice()
    }
}

/// CIE1931 lightness for `c` at `brightness` percent, scaled to `bits` bits.
#[must_use]
pub fn cie1931(c: u8, brightness: u8, bits: u8) -> u16 {
    let out_factor = f32::from((1u16 << bits) - 1);
    let v = f32::from(c) * f32::from(brightness) / 255.0;
    let lightness = if v <= 8.0 {
        v / 902.3
    } else {
        ((v + 16.0) / 116.0).powi(3)
    };
    (out_factor * lightness) as u16
}
