//! Output-enable pulse generation with the PWM peripheral.
//!
//! The on-time of bitplane `n` must be `base_time * 2^n`, with a base time
//! well below a microsecond. Software sleeps cannot hit that, so the output
//! enable pin is handed to PWM channel 1 and every pulse is queued in the PWM
//! FIFO: the channel emits the queued entries and then falls back to the
//! silence level. Completion is detected by polling the FIFO-empty flag.
//!
//! Long pulses are split into several equal FIFO entries so the counted
//! range stays short; the tail of every pulse waits one full range period in
//! the zero phase. Two zero sentinels end each pulse: the first returns the
//! output to its idle level (otherwise the last value repeats forever), the
//! second is needed for the empty flag to rise only after the pulse really
//! ended.

use core::time::Duration;

use crate::error::{Error, Result};
use crate::gpio::{pwm, MicrosCounter, PwmTimer};
use crate::luminance::MAX_BITPLANES;
use crate::options::PulseTiming;

/// Depth of the hardware PWM FIFO in entries.
pub const PWM_FIFO_DEPTH: u32 = 16;

const PLANES: usize = MAX_BITPLANES as usize;

/// Busy-poll `done` until it reports true or more than `budget_us`
/// microseconds have passed since `start` on `counter`.
///
/// Returns whether `done` was satisfied.
pub fn spin_until<C, F>(counter: &C, start: u32, budget_us: u32, mut done: F) -> bool
where
    C: MicrosCounter + ?Sized,
    F: FnMut() -> bool,
{
    loop {
        if done() {
            return true;
        }
        if counter.micros().wrapping_sub(start) > budget_us {
            return done();
        }
        core::hint::spin_loop();
    }
}

#[derive(Debug, Clone, Copy)]
struct Pulse {
    plane: u8,
    start: u32,
    sleep_hint_us: u32,
}

/// Emits one output-enable pulse per bitplane and waits for it to end.
#[derive(Debug)]
pub struct PulseGenerator<P: PwmTimer, C: MicrosCounter> {
    timer: P,
    counter: C,
    timing: PulseTiming,
    pwm_range: [u32; PLANES],
    sleep_hints_us: [u32; PLANES],
    in_flight: Option<Pulse>,
}

impl<P: PwmTimer, C: MicrosCounter> PulseGenerator<P, C> {
    /// Program the PWM clock for `timing` and leave the channel idle.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTiming`] if `timing` fails [`PulseTiming::validate`].
    pub fn new(mut timer: P, counter: C, timing: PulseTiming) -> Result<Self> {
        timing.validate()?;
        let divider = timing.clock_divider();

        let mut pwm_range = [0; PLANES];
        let mut sleep_hints_us = [0; PLANES];
        for plane in 0..PLANES {
            let nanos = u64::from(timing.base_time_ns) << plane;
            sleep_hints_us[plane] = (nanos / 1000) as u32;
            pwm_range[plane] = (2 * nanos / u64::from(timing.base_time_ns)) as u32;
        }

        timer.write_control(pwm::CTL_QUIESCENT);
        timer.configure_clock(divider);
        log::debug!(
            "pulse generator: base {} ns, clock divider {}",
            timing.base_time_ns,
            divider
        );

        Ok(Self {
            timer,
            counter,
            timing,
            pwm_range,
            sleep_hints_us,
            in_flight: None,
        })
    }

    /// Timing this generator was programmed with.
    #[must_use]
    pub fn timing(&self) -> &PulseTiming {
        &self.timing
    }

    /// PWM range (in ticks) of the pulse for `plane`.
    #[must_use]
    pub fn range(&self, plane: u8) -> u32 {
        self.pwm_range[usize::from(plane)]
    }

    /// Coarse duration of the pulse for `plane` in microseconds.
    #[must_use]
    pub fn sleep_hint_us(&self, plane: u8) -> u32 {
        self.sleep_hints_us[usize::from(plane)]
    }

    /// Whether a pulse was started and not yet waited for.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start the output-enable pulse for `plane` and return immediately.
    ///
    /// # Panics
    ///
    /// If `plane` is not below [`MAX_BITPLANES`].
    pub fn send_pulse(&mut self, plane: u8) {
        let index = usize::from(plane);
        let range = self.pwm_range[index];
        if range < self.timing.split_threshold {
            self.timer.write_range(range);
            self.timer.push_fifo(range);
        } else {
            let part = range / self.timing.fifo_split;
            self.timer.write_range(part);
            for _ in 0..self.timing.fifo_split {
                self.timer.push_fifo(part);
            }
        }
        self.timer.push_fifo(0);
        self.timer.push_fifo(0);

        self.in_flight = Some(Pulse {
            plane,
            start: self.counter.micros(),
            sleep_hint_us: self.sleep_hints_us[index],
        });
        self.timer.write_control(pwm::CTL_RUN);
    }

    /// Block until the last pulse has ended, then return the channel to idle.
    ///
    /// Sleeps through most of the pulse and busy-polls the FIFO-empty flag
    /// for the rest. Returns at once if no pulse is in flight.
    ///
    /// # Errors
    ///
    /// [`Error::PulseStalled`] if the FIFO is still not empty after the
    /// stall timeout. The channel is reset anyway.
    pub fn wait_pulse_finished(&mut self) -> Result<()> {
        let Some(pulse) = self.in_flight.take() else {
            return Ok(());
        };

        let elapsed = self.counter.micros().wrapping_sub(pulse.start);
        let to_sleep = i64::from(pulse.sleep_hint_us)
            - i64::from(elapsed)
            - i64::from(self.timing.sleep_overhead_us);
        if to_sleep > 0 {
            std::thread::sleep(Duration::from_micros(to_sleep as u64));
        }

        let budget = pulse.sleep_hint_us.saturating_add(self.timing.stall_timeout_us);
        let timer = &self.timer;
        let finished = spin_until(&self.counter, pulse.start, budget, || timer.fifo_empty());
        self.timer.write_control(pwm::CTL_QUIESCENT);

        if finished {
            Ok(())
        } else {
            Err(Error::PulseStalled { plane: pulse.plane })
        }
    }
}

impl<P: PwmTimer, C: MicrosCounter> Drop for PulseGenerator<P, C> {
    fn drop(&mut self) {
        self.timer.write_control(pwm::CTL_QUIESCENT);
    }
}
