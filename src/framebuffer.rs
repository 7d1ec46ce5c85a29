//! Bitplane framebuffer and scan-out.
//!
//! Every channel value is mapped through the [`LuminanceTable`] to an N-bit
//! intensity, and bit `b` of that intensity is stored in plane `b`. The
//! buffer is laid out as `[double_row][plane][column]` of [`IoBits`] words,
//! so the scan-out can walk one plane of one double row as a contiguous
//! slice. A double row holds two physical rows: row `d` drives the upper
//! colour lines and row `d + rows / 2` the lower ones.
//!
//! Only the colour lines are stored. Row address, clock and strobe are
//! generated by [`Framebuffer::dump_to_matrix`].

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::gpio::{GpioBus, MicrosCounter, PwmTimer};
use crate::luminance::LuminanceTable;
use crate::options::PanelGeometry;
use crate::pins::{IoBits, CLOCK, COLOR_MASK, ROW_ADDRESS_MASK, STROBE};
use crate::pulser::PulseGenerator;

/// Highest brightness in percent.
pub const MAX_BRIGHTNESS: u8 = 100;

/// Packed bitplanes of one full image, plus the drawing state that decides
/// how new pixels are encoded.
#[derive(Clone)]
pub struct Framebuffer {
    geometry: PanelGeometry,
    bitplanes: u8,
    pwm_bits: u8,
    brightness: u8,
    luminance_correct: bool,
    luminance: Arc<LuminanceTable>,
    planes: Box<[IoBits]>,
}

impl Framebuffer {
    /// A cleared framebuffer drawing at full depth and brightness with
    /// luminance correction on.
    #[must_use]
    pub fn new(geometry: PanelGeometry, luminance: Arc<LuminanceTable>) -> Self {
        let bitplanes = luminance.bitplanes();
        let len = geometry.double_rows() * usize::from(bitplanes) * geometry.columns();
        Self {
            geometry,
            bitplanes,
            pwm_bits: bitplanes,
            brightness: MAX_BRIGHTNESS,
            luminance_correct: true,
            luminance,
            planes: vec![IoBits::new(); len].into_boxed_slice(),
        }
    }

    /// Panel geometry.
    #[must_use]
    pub fn geometry(&self) -> PanelGeometry {
        self.geometry
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.geometry.columns()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.geometry.rows()
    }

    /// Total number of bitplanes N.
    #[must_use]
    pub fn bitplanes(&self) -> u8 {
        self.bitplanes
    }

    /// Number of planes drawn and scanned.
    #[must_use]
    pub fn pwm_bits(&self) -> u8 {
        self.pwm_bits
    }

    /// Draw and scan only the `pwm_bits` most significant planes.
    ///
    /// Lower depths trade colour resolution for refresh rate. Pixels already
    /// drawn keep their encoding.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPwmBits`] unless `1 <= pwm_bits <= N`; nothing changes
    /// in that case.
    pub fn set_pwm_bits(&mut self, pwm_bits: u8) -> Result<()> {
        if !(1..=self.bitplanes).contains(&pwm_bits) {
            return Err(Error::InvalidPwmBits {
                requested: pwm_bits,
                max: self.bitplanes,
            });
        }
        self.pwm_bits = pwm_bits;
        Ok(())
    }

    /// Like [`Self::set_pwm_bits`], with `pwm_bits` clamped to `1..=N`.
    pub(crate) fn set_pwm_bits_clamped(&mut self, pwm_bits: u8) {
        self.pwm_bits = pwm_bits.clamp(1, self.bitplanes);
    }

    /// Brightness in percent used for new pixels.
    #[must_use]
    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Set the brightness for new pixels, clamped to `1..=100`.
    pub fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness.clamp(1, MAX_BRIGHTNESS);
    }

    /// Whether new pixels go through CIE1931 correction.
    #[must_use]
    pub fn luminance_correct(&self) -> bool {
        self.luminance_correct
    }

    /// Switch between CIE1931 correction and linear scaling for new pixels.
    pub fn set_luminance_correct(&mut self, correct: bool) {
        self.luminance_correct = correct;
    }

    /// Shared luminance table.
    #[must_use]
    pub fn luminance(&self) -> &Arc<LuminanceTable> {
        &self.luminance
    }

    /// Raw bitplane words.
    #[must_use]
    pub fn words(&self) -> &[IoBits] {
        &self.planes
    }

    fn first_plane(&self) -> u8 {
        self.bitplanes - self.pwm_bits
    }

    fn word_index(&self, double_row: usize, plane: u8, column: usize) -> usize {
        (double_row * usize::from(self.bitplanes) + usize::from(plane)) * self.geometry.columns()
            + column
    }

    fn map(&self, c: u8) -> u16 {
        self.luminance.map(c, self.brightness, self.luminance_correct)
    }

    /// Set the pixel at (`x`, `y`). Coordinates outside the panel are
    /// ignored.
    pub fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8) {
        let (Ok(x), Ok(y)) = (usize::try_from(x), usize::try_from(y)) else {
            return;
        };
        if x >= self.width() || y >= self.height() {
            return;
        }
        let (red, green, blue) = (self.map(r), self.map(g), self.map(b));

        let double_rows = self.geometry.double_rows();
        let upper = y < double_rows;
        let stride = self.geometry.columns();
        let mut index = self.word_index(y % double_rows, self.first_plane(), x);
        for plane in self.first_plane()..self.bitplanes {
            let mask = 1 << plane;
            let (r, g, b) = (red & mask != 0, green & mask != 0, blue & mask != 0);
            let word = &mut self.planes[index];
            if upper {
                word.set_color_upper(r, g, b);
            } else {
                word.set_color_lower(r, g, b);
            }
            index += stride;
        }
    }

    /// Set every pixel to one colour.
    pub fn fill(&mut self, r: u8, g: u8, b: u8) {
        let (red, green, blue) = (self.map(r), self.map(g), self.map(b));
        let columns = self.geometry.columns();
        for double_row in 0..self.geometry.double_rows() {
            for plane in self.first_plane()..self.bitplanes {
                let mask = 1 << plane;
                let (r, g, b) = (red & mask != 0, green & mask != 0, blue & mask != 0);
                let start = self.word_index(double_row, plane, 0);
                for word in &mut self.planes[start..start + columns] {
                    word.set_color_upper(r, g, b);
                    word.set_color_lower(r, g, b);
                }
            }
        }
    }

    /// Turn every pixel off, on every plane.
    pub fn clear(&mut self) {
        self.planes.fill(IoBits::new());
    }

    /// Stored N-bit `(r, g, b)` intensities of a pixel, summed over all
    /// planes. `None` outside the panel.
    #[must_use]
    pub fn encoded_pixel(&self, x: usize, y: usize) -> Option<(u16, u16, u16)> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let double_rows = self.geometry.double_rows();
        let upper = y < double_rows;
        let (mut red, mut green, mut blue) = (0, 0, 0);
        for plane in 0..self.bitplanes {
            let word = self.planes[self.word_index(y % double_rows, plane, x)];
            let (r, g, b) = if upper {
                word.color_upper()
            } else {
                word.color_lower()
            };
            red |= u16::from(r) << plane;
            green |= u16::from(g) << plane;
            blue |= u16::from(b) << plane;
        }
        Some((red, green, blue))
    }

    /// Shift the whole image out to the panel once.
    ///
    /// For every double row the address lines are switched, then each active
    /// plane is clocked in column by column and latched. The output-enable
    /// pulse of a plane runs while the next plane is being shifted, so the
    /// strobe of a plane waits for the previous pulse to end.
    ///
    /// # Errors
    ///
    /// [`Error::PulseStalled`] if the PWM FIFO never drains.
    pub fn dump_to_matrix<G, P, C>(
        &self,
        gpio: &mut G,
        pulser: &mut PulseGenerator<P, C>,
    ) -> Result<()>
    where
        G: GpioBus + ?Sized,
        P: PwmTimer,
        C: MicrosCounter,
    {
        let columns = self.geometry.columns();
        let first_plane = self.first_plane();

        for double_row in 0..self.geometry.double_rows() {
            let address = IoBits::row(double_row).raw();
            gpio.clear_bits(!address & ROW_ADDRESS_MASK);
            gpio.set_bits(address);

            for plane in first_plane..self.bitplanes {
                let start = self.word_index(double_row, plane, 0);
                for word in &self.planes[start..start + columns] {
                    let out = word.color_bits();
                    gpio.clear_bits(CLOCK | (!out & COLOR_MASK));
                    gpio.set_bits(out);
                    gpio.set_bits(CLOCK);
                }
                gpio.clear_bits(CLOCK | COLOR_MASK);

                pulser.wait_pulse_finished()?;
                gpio.set_bits(STROBE);
                gpio.clear_bits(STROBE);
                pulser.send_pulse(plane);
            }
            pulser.wait_pulse_finished()?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("geometry", &self.geometry)
            .field("bitplanes", &self.bitplanes)
            .field("pwm_bits", &self.pwm_bits)
            .field("brightness", &self.brightness)
            .field("luminance_correct", &self.luminance_correct)
            .field("words", &self.planes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::pwm;
    use crate::options::PulseTiming;
    use crate::pins::OUTPUT_MASK;
    use crate::sim::{Op, SimBus};

    fn framebuffer(rows: usize, chained: usize, bitplanes: u8) -> Framebuffer {
        let geometry = PanelGeometry::new(rows, chained).unwrap();
        Framebuffer::new(geometry, Arc::new(LuminanceTable::new(bitplanes).unwrap()))
    }

    fn active_mask(fb: &Framebuffer) -> u16 {
        let all = (1u16 << fb.bitplanes()) - 1;
        all & !((1u16 << (fb.bitplanes() - fb.pwm_bits())) - 1)
    }

    #[test]
    fn test_construction() {
        let fb = framebuffer(16, 2, 11);
        assert_eq!(fb.width(), 64);
        assert_eq!(fb.height(), 16);
        assert_eq!(fb.words().len(), 8 * 11 * 64);
        assert_eq!(fb.pwm_bits(), 11);
        assert_eq!(fb.brightness(), 100);
        assert!(fb.luminance_correct());
        assert!(fb.words().iter().all(|w| w.raw() == 0));
    }

    #[test]
    fn test_set_pixel_readback() {
        let mut fb = framebuffer(16, 1, 11);
        let table = fb.luminance().clone();
        for (x, y, r, g, b) in [
            (0, 0, 255, 0, 0),
            (31, 15, 1, 2, 3),
            (7, 8, 128, 64, 32),
            (12, 7, 200, 200, 200),
        ] {
            fb.set_pixel(x, y, r, g, b);
            let expected = (
                table.map(r, 100, true),
                table.map(g, 100, true),
                table.map(b, 100, true),
            );
            assert_eq!(fb.encoded_pixel(x as usize, y as usize), Some(expected));
        }
    }

    #[test]
    fn test_set_pixel_out_of_range() {
        let mut fb = framebuffer(16, 1, 8);
        for (x, y) in [(-1, 0), (0, -1), (32, 0), (0, 16), (i32::MIN, i32::MAX)] {
            fb.set_pixel(x, y, 255, 255, 255);
        }
        assert!(fb.words().iter().all(|w| w.raw() == 0));
        assert_eq!(fb.encoded_pixel(32, 0), None);
        assert_eq!(fb.encoded_pixel(0, 16), None);
    }

    #[test]
    fn test_halves_share_a_word() {
        let mut fb = framebuffer(16, 1, 8);
        fb.set_pixel(3, 1, 255, 0, 0);
        fb.set_pixel(3, 9, 0, 0, 255);

        let word = fb.words()[fb.word_index(1, 7, 3)];
        assert_eq!(word.color_upper(), (true, false, false));
        assert_eq!(word.color_lower(), (false, false, true));
        assert_eq!(fb.encoded_pixel(3, 1), Some((255, 0, 0)));
        assert_eq!(fb.encoded_pixel(3, 9), Some((0, 0, 255)));

        // Redrawing the upper pixel leaves the lower one alone.
        fb.set_pixel(3, 1, 0, 0, 0);
        assert_eq!(fb.encoded_pixel(3, 1), Some((0, 0, 0)));
        assert_eq!(fb.encoded_pixel(3, 9), Some((0, 0, 255)));
    }

    #[test]
    fn test_fill_matches_set_pixel() {
        for pwm_bits in [11, 5] {
            let mut filled = framebuffer(16, 2, 11);
            let mut drawn = framebuffer(16, 2, 11);
            for fb in [&mut filled, &mut drawn] {
                fb.set_pwm_bits(pwm_bits).unwrap();
                fb.set_brightness(70);
            }

            filled.fill(10, 140, 250);
            for y in 0..16 {
                for x in 0..64 {
                    drawn.set_pixel(x, y, 10, 140, 250);
                }
            }
            assert_eq!(filled.words(), drawn.words());
        }
    }

    #[test]
    fn test_clear() {
        let mut fb = framebuffer(16, 1, 11);
        fb.fill(255, 255, 255);
        fb.set_pwm_bits(3).unwrap();
        fb.clear();
        assert!(fb.words().iter().all(|w| w.raw() == 0));
        for y in 0..16 {
            for x in 0..32 {
                assert_eq!(fb.encoded_pixel(x, y), Some((0, 0, 0)));
            }
        }
    }

    #[test]
    fn test_fill_then_clear() {
        let mut fb = framebuffer(16, 1, 11);
        fb.fill(0, 255, 0);
        assert_eq!(fb.encoded_pixel(5, 12), Some((0, 2047, 0)));
        fb.clear();
        assert!(fb.words().iter().all(|w| w.color_bits() == 0));
    }

    #[test]
    fn test_encoding_is_idempotent() {
        let mut fb = framebuffer(16, 1, 10);
        fb.set_pixel(4, 4, 90, 180, 45);
        let once = fb.words().to_vec();
        fb.set_pixel(4, 4, 90, 180, 45);
        assert_eq!(fb.words(), &once[..]);
    }

    #[test]
    fn test_set_pwm_bits() {
        let mut fb = framebuffer(16, 1, 11);
        assert!(matches!(
            fb.set_pwm_bits(0),
            Err(Error::InvalidPwmBits {
                requested: 0,
                max: 11
            })
        ));
        assert!(fb.set_pwm_bits(12).is_err());
        assert_eq!(fb.pwm_bits(), 11);

        for k in 1..=11 {
            fb.set_pwm_bits(k).unwrap();
            fb.clear();
            fb.set_pixel(0, 0, 255, 255, 255);
            let mask = active_mask(&fb);
            let (r, g, b) = fb.encoded_pixel(0, 0).unwrap();
            assert_eq!(r, 2047 & mask, "pwm bits {k}");
            assert_eq!(g, r);
            assert_eq!(b, r);
            for plane in 0..(11 - k) {
                assert_eq!(fb.words()[fb.word_index(0, plane, 0)].raw(), 0);
            }
        }
    }

    #[test]
    fn test_set_pwm_bits_clamped() {
        let mut fb = framebuffer(16, 1, 8);
        fb.set_pwm_bits_clamped(0);
        assert_eq!(fb.pwm_bits(), 1);
        fb.set_pwm_bits_clamped(9);
        assert_eq!(fb.pwm_bits(), 8);
        fb.set_pwm_bits_clamped(5);
        assert_eq!(fb.pwm_bits(), 5);
    }

    #[test]
    fn test_brightness_and_linear_mode() {
        let mut fb = framebuffer(16, 1, 11);
        fb.set_brightness(0);
        assert_eq!(fb.brightness(), 1);
        fb.set_brightness(150);
        assert_eq!(fb.brightness(), 100);

        fb.set_luminance_correct(false);
        fb.set_brightness(50);
        fb.set_pixel(0, 0, 200, 0, 0);
        assert_eq!(fb.encoded_pixel(0, 0), Some((100 << 3, 0, 0)));

        // Earlier pixels keep their encoding.
        fb.set_luminance_correct(true);
        assert_eq!(fb.encoded_pixel(0, 0), Some((100 << 3, 0, 0)));
    }

    #[test]
    fn test_single_red_pixel_scenario() {
        let mut fb = framebuffer(16, 1, 8);
        fb.set_pwm_bits(8).unwrap();
        fb.set_pixel(0, 0, 255, 0, 0);

        let msb = fb.words()[fb.word_index(0, 7, 0)];
        assert!(msb.r1());
        assert_eq!(msb.color_bits(), 1 << 11);

        for double_row in 0..8 {
            for plane in 0..8 {
                for column in 0..32 {
                    let word = fb.words()[fb.word_index(double_row, plane, column)];
                    let (r, g, b) = word.color_upper();
                    assert!(!g && !b);
                    assert_eq!(word.color_lower(), (false, false, false));
                    assert_eq!(r, double_row == 0 && column == 0);
                }
            }
        }
    }

    fn expected_scan(fb: &Framebuffer, pulser_ops: impl Fn(u8) -> Vec<Op>) -> Vec<Op> {
        let mut ops = Vec::new();
        for double_row in 0..fb.geometry().double_rows() {
            let address = IoBits::row(double_row).raw();
            ops.push(Op::Clear(!address & ROW_ADDRESS_MASK));
            ops.push(Op::Set(address));
            let first = fb.bitplanes() - fb.pwm_bits();
            for plane in first..fb.bitplanes() {
                for column in 0..fb.width() {
                    let out = fb.words()[fb.word_index(double_row, plane, column)].color_bits();
                    ops.push(Op::Clear(CLOCK | (!out & COLOR_MASK)));
                    ops.push(Op::Set(out));
                    ops.push(Op::Set(CLOCK));
                }
                ops.push(Op::Clear(CLOCK | COLOR_MASK));
                if plane != first {
                    ops.push(Op::Control(pwm::CTL_QUIESCENT));
                }
                ops.push(Op::Set(STROBE));
                ops.push(Op::Clear(STROBE));
                ops.extend(pulser_ops(plane));
            }
            ops.push(Op::Control(pwm::CTL_QUIESCENT));
        }
        ops
    }

    #[test]
    fn test_scan_out_order() {
        let bus = SimBus::recording();
        let mut gpio = bus.gpio();
        let mut pulser = PulseGenerator::new(bus.pwm(), bus.counter(), PulseTiming::default())
            .unwrap();

        let mut fb = framebuffer(4, 1, 8);
        fb.set_pwm_bits(2).unwrap();
        fb.set_pixel(1, 0, 255, 0, 0);
        fb.set_pixel(2, 3, 0, 255, 255);
        bus.take_log();

        fb.dump_to_matrix(&mut gpio, &mut pulser).unwrap();
        let log = bus.take_log();

        let expected = expected_scan(&fb, |plane| {
            let range = 2u32 << plane;
            let mut ops = vec![Op::Range(range / 8)];
            ops.extend([Op::Fifo(range / 8); 8]);
            ops.extend([Op::Fifo(0), Op::Fifo(0), Op::Control(pwm::CTL_RUN)]);
            ops
        });
        assert_eq!(log, expected);

        // Column 1 of the first scanned plane carries the red upper bit.
        let data = log
            .windows(3)
            .filter(|ops| ops[2] == Op::Set(CLOCK))
            .nth(1)
            .unwrap();
        assert_eq!(data[0], Op::Clear(CLOCK | (COLOR_MASK & !(1 << 11))));
        assert_eq!(data[1], Op::Set(1 << 11));
        assert!(!pulser.in_flight());
    }

    #[test]
    fn test_scan_out_touches_only_outputs() {
        let bus = SimBus::new();
        let mut gpio = bus.gpio();
        let mut pulser = PulseGenerator::new(bus.pwm(), bus.counter(), PulseTiming::default())
            .unwrap();
        let mut fb = framebuffer(16, 2, 11);
        fb.fill(255, 255, 255);
        fb.set_pwm_bits(6).unwrap();

        fb.dump_to_matrix(&mut gpio, &mut pulser).unwrap();
        assert_eq!(bus.pulses(), 8 * 6);
        assert_eq!(bus.levels() & !OUTPUT_MASK, 0);
        // Last row address stays selected, data lines and clock end low.
        assert_eq!(bus.levels() & (CLOCK | COLOR_MASK | STROBE), 0);
        assert_eq!(bus.levels() & ROW_ADDRESS_MASK, IoBits::row(7).raw());
    }

    #[test]
    fn test_scan_out_stall() {
        let bus = SimBus::new();
        let mut gpio = bus.gpio();
        let timing = PulseTiming {
            stall_timeout_us: 200,
            ..PulseTiming::default()
        };
        let mut pulser = PulseGenerator::new(bus.pwm(), bus.counter(), timing).unwrap();
        let fb = framebuffer(16, 1, 8);
        bus.set_stalled(true);

        assert!(matches!(
            fb.dump_to_matrix(&mut gpio, &mut pulser),
            Err(Error::PulseStalled { plane: 0 })
        ));
    }
}
