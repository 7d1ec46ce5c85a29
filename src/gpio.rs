//! Register interface consumed by the scan-out and the pulse generator.
//!
//! The driver never touches raw addresses directly. Scan-out talks to a
//! [`GpioBus`], the pulse generator to a [`PwmTimer`] and a
//! [`MicrosCounter`]. [`crate::mmio`] implements them on top of the mapped
//! BCM283x registers, [`crate::sim`] implements them in memory for tests and
//! benchmarks.

/// PWM control register bits used by the pulse generator.
pub mod pwm {
    /// Channel 1 enable.
    pub const CTL_PWEN1: u32 = 1 << 0;
    /// Channel 1 serialiser mode.
    pub const CTL_MODE1: u32 = 1 << 1;
    /// Channel 1 inverted polarity.
    pub const CTL_POLA1: u32 = 1 << 4;
    /// Channel 1 transmits from the FIFO.
    pub const CTL_USEF1: u32 = 1 << 5;
    /// Clear the FIFO.
    pub const CTL_CLRF1: u32 = 1 << 6;

    /// FIFO full.
    pub const STA_FULL1: u32 = 1 << 0;
    /// FIFO empty.
    pub const STA_EMPT1: u32 = 1 << 1;

    /// Control value while no pulse is being emitted.
    pub const CTL_QUIESCENT: u32 = CTL_USEF1 | CTL_POLA1 | CTL_CLRF1;
    /// Control value that starts emitting the queued FIFO entries.
    pub const CTL_RUN: u32 = CTL_USEF1 | CTL_PWEN1 | CTL_POLA1;
}

/// Set / clear access to the GPIO output registers.
///
/// Bit `n` of every mask is GPIO `n`.
pub trait GpioBus: Send {
    /// Configure every pin in `mask` as an output. Returns the mask of pins
    /// that were actually configured.
    fn init_outputs(&mut self, mask: u32) -> u32;

    /// Drive the pins in `mask` high with a single register write.
    fn set_bits(&mut self, mask: u32);

    /// Drive the pins in `mask` low with a single register write.
    fn clear_bits(&mut self, mask: u32);

    /// Current pin levels.
    fn read_levels(&self) -> u32;

    /// Write `value` to the pins in `mask`, leaving all other pins untouched.
    fn write_masked_bits(&mut self, value: u32, mask: u32) {
        self.clear_bits(!value & mask);
        self.set_bits(value & mask);
    }
}

/// The PWM channel that generates output-enable pulses, together with its
/// clock manager.
pub trait PwmTimer: Send {
    /// Kill the PWM clock, select PLLD (500 MHz) with integer divider
    /// `divider` and start it again.
    fn configure_clock(&mut self, divider: u32);

    /// Write the PWM control register.
    fn write_control(&mut self, value: u32);

    /// Write the channel 1 range register.
    fn write_range(&mut self, value: u32);

    /// Queue one entry in the PWM FIFO.
    fn push_fifo(&mut self, value: u32);

    /// Read the PWM status register.
    fn status(&self) -> u32;

    /// True once every queued FIFO entry has been emitted.
    fn fifo_empty(&self) -> bool {
        self.status() & pwm::STA_EMPT1 != 0
    }
}

/// Free-running 1 MHz counter.
pub trait MicrosCounter: Send {
    /// Current counter value in microseconds. Wraps at `u32::MAX`.
    fn micros(&self) -> u32;
}

impl<T: GpioBus + ?Sized> GpioBus for &mut T {
    fn init_outputs(&mut self, mask: u32) -> u32 {
        (**self).init_outputs(mask)
    }

    fn set_bits(&mut self, mask: u32) {
        (**self).set_bits(mask);
    }

    fn clear_bits(&mut self, mask: u32) {
        (**self).clear_bits(mask);
    }

    fn read_levels(&self) -> u32 {
        (**self).read_levels()
    }
}
