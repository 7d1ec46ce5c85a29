//! In-memory register backend.
//!
//! [`SimBus`] stands in for the mapped peripherals: its [`SimGpio`],
//! [`SimPwm`] and [`SimCounter`] parts implement the register traits and
//! share one state, so a test can inspect pin levels, count pulses or, in
//! recording mode, check the exact order of every register write across
//! GPIO and PWM.
//!
//! ```rust
//! use rpi_hub75::gpio::GpioBus;
//! use rpi_hub75::sim::{Op, SimBus};
//!
//! let bus = SimBus::recording();
//! let mut gpio = bus.gpio();
//! gpio.set_bits(1 << 17);
//! gpio.clear_bits(1 << 17);
//! assert_eq!(bus.take_log(), vec![Op::Set(1 << 17), Op::Clear(1 << 17)]);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::gpio::{pwm, GpioBus, MicrosCounter, PwmTimer};

/// One register write seen by the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Pins configured as outputs.
    InitOutputs(u32),
    /// GPIO set register write.
    Set(u32),
    /// GPIO clear register write.
    Clear(u32),
    /// PWM clock divider programmed.
    Clock(u32),
    /// PWM control register write.
    Control(u32),
    /// PWM range register write.
    Range(u32),
    /// PWM FIFO entry.
    Fifo(u32),
}

#[derive(Debug, Default)]
struct State {
    levels: u32,
    outputs: u32,
    control: u32,
    gpio_writes: u64,
    pulses: u64,
    stalled: bool,
    log: Option<Vec<Op>>,
}

impl State {
    fn record(&mut self, op: Op) {
        if let Some(log) = self.log.as_mut() {
            log.push(op);
        }
    }
}

/// Shared simulated peripheral state.
#[derive(Debug, Clone)]
pub struct SimBus {
    state: Arc<Mutex<State>>,
    epoch: Instant,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    /// A bus that only tracks levels and counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            epoch: Instant::now(),
        }
    }

    /// A bus that additionally logs every register write.
    #[must_use]
    pub fn recording() -> Self {
        let bus = Self::new();
        bus.lock().log = Some(Vec::new());
        bus
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// GPIO part of the bus.
    #[must_use]
    pub fn gpio(&self) -> SimGpio {
        SimGpio { bus: self.clone() }
    }

    /// PWM part of the bus.
    #[must_use]
    pub fn pwm(&self) -> SimPwm {
        SimPwm { bus: self.clone() }
    }

    /// 1 MHz counter running from the creation of the bus.
    #[must_use]
    pub fn counter(&self) -> SimCounter {
        SimCounter { epoch: self.epoch }
    }

    /// Drain the recorded writes. Empty when not recording.
    pub fn take_log(&self) -> Vec<Op> {
        self.lock().log.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Current GPIO levels.
    #[must_use]
    pub fn levels(&self) -> u32 {
        self.lock().levels
    }

    /// Pins configured as outputs so far.
    #[must_use]
    pub fn outputs(&self) -> u32 {
        self.lock().outputs
    }

    /// Number of GPIO set/clear writes so far.
    #[must_use]
    pub fn gpio_writes(&self) -> u64 {
        self.lock().gpio_writes
    }

    /// Number of pulses started so far.
    #[must_use]
    pub fn pulses(&self) -> u64 {
        self.lock().pulses
    }

    /// Make a running PWM channel never report an empty FIFO.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }
}

/// Simulated GPIO registers.
#[derive(Debug, Clone)]
pub struct SimGpio {
    bus: SimBus,
}

impl GpioBus for SimGpio {
    fn init_outputs(&mut self, mask: u32) -> u32 {
        let mut state = self.bus.lock();
        state.outputs |= mask;
        state.record(Op::InitOutputs(mask));
        mask
    }

    fn set_bits(&mut self, mask: u32) {
        let mut state = self.bus.lock();
        state.levels |= mask;
        state.gpio_writes += 1;
        state.record(Op::Set(mask));
    }

    fn clear_bits(&mut self, mask: u32) {
        let mut state = self.bus.lock();
        state.levels &= !mask;
        state.gpio_writes += 1;
        state.record(Op::Clear(mask));
    }

    fn read_levels(&self) -> u32 {
        self.bus.levels()
    }
}

/// Simulated PWM channel. Pulses complete instantly unless stalled.
#[derive(Debug, Clone)]
pub struct SimPwm {
    bus: SimBus,
}

impl PwmTimer for SimPwm {
    fn configure_clock(&mut self, divider: u32) {
        self.bus.lock().record(Op::Clock(divider));
    }

    fn write_control(&mut self, value: u32) {
        let mut state = self.bus.lock();
        if value & pwm::CTL_PWEN1 != 0 {
            state.pulses += 1;
        }
        state.control = value;
        state.record(Op::Control(value));
    }

    fn write_range(&mut self, value: u32) {
        self.bus.lock().record(Op::Range(value));
    }

    fn push_fifo(&mut self, value: u32) {
        self.bus.lock().record(Op::Fifo(value));
    }

    fn status(&self) -> u32 {
        let state = self.bus.lock();
        if state.stalled && state.control & pwm::CTL_PWEN1 != 0 {
            0
        } else {
            pwm::STA_EMPT1
        }
    }
}

/// Microsecond counter backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SimCounter {
    epoch: Instant,
}

impl MicrosCounter for SimCounter {
    fn micros(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_follow_writes() {
        let bus = SimBus::new();
        let mut gpio = bus.gpio();
        gpio.set_bits(0b1010);
        gpio.set_bits(0b0100);
        gpio.clear_bits(0b0010);
        assert_eq!(bus.levels(), 0b1100);
        assert_eq!(gpio.read_levels(), 0b1100);
        assert_eq!(bus.gpio_writes(), 3);
        assert!(bus.take_log().is_empty());
    }

    #[test]
    fn test_recording_interleaves_parts() {
        let bus = SimBus::recording();
        let mut gpio = bus.gpio();
        let mut timer = bus.pwm();
        assert_eq!(gpio.init_outputs(0xff), 0xff);
        timer.write_range(4);
        timer.push_fifo(4);
        gpio.set_bits(1);
        timer.write_control(pwm::CTL_RUN);
        assert_eq!(
            bus.take_log(),
            vec![
                Op::InitOutputs(0xff),
                Op::Range(4),
                Op::Fifo(4),
                Op::Set(1),
                Op::Control(pwm::CTL_RUN),
            ]
        );
        assert!(bus.take_log().is_empty());
        assert_eq!(bus.outputs(), 0xff);
        assert_eq!(bus.pulses(), 1);
    }

    #[test]
    fn test_stalled_fifo() {
        let bus = SimBus::new();
        let mut timer = bus.pwm();
        bus.set_stalled(true);
        assert!(timer.fifo_empty());
        timer.write_control(pwm::CTL_RUN);
        assert!(!timer.fifo_empty());
        timer.write_control(pwm::CTL_QUIESCENT);
        assert!(timer.fifo_empty());
        timer.write_control(pwm::CTL_RUN);
        bus.set_stalled(false);
        assert!(timer.fifo_empty());
    }

    #[test]
    fn test_counter_advances() {
        let bus = SimBus::new();
        let counter = bus.counter();
        let start = counter.micros();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(counter.micros().wrapping_sub(start) >= 2000);
    }
}
