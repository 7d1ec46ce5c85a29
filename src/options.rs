//! Construction-time configuration of a matrix.

use crate::error::{Error, Result};
use crate::luminance::{MAX_BITPLANES, MIN_BITPLANES};
use crate::pins::MAX_DOUBLE_ROWS;
use crate::pulser::PWM_FIFO_DEPTH;

/// Columns of a single panel; chained panels extend the row to the right.
pub const PANEL_COLUMNS: usize = 32;
/// Largest number of panels that can be chained.
pub const MAX_CHAINED: usize = 2;

/// Physical peripheral base of the BCM2836/BCM2837 (Raspberry Pi 2 and 3).
pub const BCM2709_PERI_BASE: u64 = 0x3F00_0000;
/// Physical peripheral base of the BCM2835 (Raspberry Pi 1 and Zero).
pub const BCM2708_PERI_BASE: u64 = 0x2000_0000;

/// Panel dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PanelGeometry {
    rows: usize,
    columns: usize,
}

impl PanelGeometry {
    /// Geometry of `chained` panels of `rows` rows each.
    ///
    /// The three row-address lines select at most eight double rows, so
    /// `rows` must be an even number no larger than 16. One or two 32-column
    /// panels may be chained.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidGeometry`] for anything else.
    pub fn new(rows: usize, chained: usize) -> Result<Self> {
        let rows_ok = rows >= 2 && rows % 2 == 0 && rows / 2 <= MAX_DOUBLE_ROWS;
        if !rows_ok || !(1..=MAX_CHAINED).contains(&chained) {
            return Err(Error::InvalidGeometry { rows, chained });
        }
        Ok(Self {
            rows,
            columns: PANEL_COLUMNS * chained,
        })
    }

    /// Total rows (pixel height).
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Total columns (pixel width).
    #[must_use]
    pub const fn columns(&self) -> usize {
        self.columns
    }

    /// Number of row addresses, each lighting two physical rows.
    #[must_use]
    pub const fn double_rows(&self) -> usize {
        crate::compute_rows(self.rows)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PanelGeometry {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "PanelGeometry {}x{}", self.columns, self.rows);
    }
}

/// Hardware timing of the output-enable pulses.
///
/// These values were tuned on real panels; lower base times give a higher
/// refresh rate and a dimmer picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTiming {
    /// On-time of bitplane 0 in nanoseconds. Good values are 100..=200.
    pub base_time_ns: u32,
    /// Pulses whose PWM range reaches `split_threshold` are queued as this
    /// many shorter FIFO entries. A power of two no larger than 8.
    pub fifo_split: u32,
    /// PWM range from which a pulse is split; at least `2 * fifo_split`.
    pub split_threshold: u32,
    /// Time subtracted from the coarse sleep to cover OS wake-up latency.
    pub sleep_overhead_us: u32,
    /// How long past its nominal end a pulse may run before it is
    /// considered stalled.
    pub stall_timeout_us: u32,
}

impl Default for PulseTiming {
    fn default() -> Self {
        Self {
            base_time_ns: 130,
            fifo_split: 8,
            split_threshold: 16,
            sleep_overhead_us: 25,
            stall_timeout_us: 10_000,
        }
    }
}

impl PulseTiming {
    /// Divider of the 500 MHz PWM clock: one tick is `divider * 2` ns and a
    /// base time unit is two ticks.
    #[must_use]
    pub const fn clock_divider(&self) -> u32 {
        self.base_time_ns / 4
    }

    /// Check that every bitplane pulse can be queued at its exact length.
    ///
    /// A split pulse is queued as `fifo_split` equal entries, so the split
    /// must divide every range it applies to. Ranges are powers of two, hence
    /// a power-of-two split and a threshold of at least twice the split.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTiming`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let divider = self.clock_divider();
        if divider == 0 {
            return Err(Error::InvalidTiming("base time below 4 ns"));
        }
        if divider >= 1 << 12 {
            return Err(Error::InvalidTiming("base time exceeds the 12-bit clock divider"));
        }
        if self.fifo_split + 2 > PWM_FIFO_DEPTH {
            return Err(Error::InvalidTiming("fifo split does not fit the PWM fifo"));
        }
        if !self.fifo_split.is_power_of_two() {
            return Err(Error::InvalidTiming("fifo split must be a power of two"));
        }
        if self.split_threshold < 2 * self.fifo_split {
            return Err(Error::InvalidTiming("split threshold below twice the fifo split"));
        }
        Ok(())
    }
}

/// Options for [`crate::RgbMatrix`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixOptions {
    /// Rows of one panel (even, at most 16).
    pub rows: usize,
    /// Number of 32-column panels in the chain (1 or 2).
    pub chained: usize,
    /// Maximum bitplane count N (8..=11). Sets the colour resolution of the
    /// luminance table and the size of every frame.
    pub bitplanes: u8,
    /// Bitplanes actually drawn and scanned by new frames (1..=N).
    pub pwm_bits: u8,
    /// Initial brightness of new frames in percent.
    pub brightness: u8,
    /// Apply CIE1931 correction in new frames.
    pub luminance_correct: bool,
    /// Physical peripheral base address.
    pub peripheral_base: u64,
    /// Output-enable pulse timing.
    pub timing: PulseTiming,
    /// `SCHED_FIFO` priority of the refresh thread; `None` leaves the
    /// default scheduler.
    pub realtime_priority: Option<i32>,
    /// CPU the refresh thread is pinned to.
    pub cpu_affinity: Option<usize>,
    /// Log the refresh rate every this many full scans; 0 disables it.
    pub refresh_log_interval: u32,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            rows: 16,
            chained: 1,
            bitplanes: MAX_BITPLANES,
            pwm_bits: MAX_BITPLANES,
            brightness: 100,
            luminance_correct: true,
            peripheral_base: BCM2709_PERI_BASE,
            timing: PulseTiming::default(),
            realtime_priority: Some(99),
            cpu_affinity: Some(3),
            refresh_log_interval: 1000,
        }
    }
}

impl MatrixOptions {
    /// Check the options and derive the panel geometry.
    ///
    /// # Errors
    ///
    /// The first invalid setting found.
    pub fn validate(&self) -> Result<PanelGeometry> {
        let geometry = PanelGeometry::new(self.rows, self.chained)?;
        if !(MIN_BITPLANES..=MAX_BITPLANES).contains(&self.bitplanes) {
            return Err(Error::InvalidBitplanes(self.bitplanes));
        }
        if !(1..=self.bitplanes).contains(&self.pwm_bits) {
            return Err(Error::InvalidPwmBits {
                requested: self.pwm_bits,
                max: self.bitplanes,
            });
        }
        self.timing.validate()?;
        Ok(geometry)
    }
}
