//! Fixed GPIO pin layout of the panel connector.
//!
//! Every word stored in the bitplane buffer is an [`IoBits`]: a 32-bit value
//! whose bit positions are the BCM GPIO numbers, so a word can be handed to
//! the set/clear registers without any translation.
//!
//! | Signal | GPIO |
//! |--------|------|
//! | strobe (LAT) | 4 |
//! | clock (CLK) | 17 |
//! | output enable (OE) | 18 |
//! | row address A / B / C | 22 / 23 / 24 |
//! | R1 / G1 / B1 (upper half) | 11 / 27 / 7 |
//! | R2 / G2 / B2 (lower half) | 8 / 9 / 10 |

use bitfield::bitfield;

/// GPIO of the strobe (latch) line.
pub const PIN_STROBE: u32 = 4;
/// GPIO of the shift clock.
pub const PIN_CLOCK: u32 = 17;
/// GPIO of output enable, driven by PWM0 in alternate function 5.
pub const PIN_OUTPUT_ENABLE: u32 = 18;
/// GPIO of the lowest row-address line (A); B and C follow.
pub const PIN_ROW_A: u32 = 22;

/// Strobe line mask.
pub const STROBE: u32 = 1 << PIN_STROBE;
/// Clock line mask.
pub const CLOCK: u32 = 1 << PIN_CLOCK;
/// Output enable mask.
pub const OUTPUT_ENABLE: u32 = 1 << PIN_OUTPUT_ENABLE;
/// All three row-address lines.
pub const ROW_ADDRESS_MASK: u32 = 0b111 << PIN_ROW_A;
/// The six colour lines of both halves.
pub const COLOR_MASK: u32 = (1 << 7) | (1 << 8) | (1 << 9) | (1 << 10) | (1 << 11) | (1 << 27);
/// Every pin the driver configures as an output.
pub const OUTPUT_MASK: u32 = STROBE | CLOCK | OUTPUT_ENABLE | ROW_ADDRESS_MASK | COLOR_MASK;

/// Number of double rows the three address lines can select.
pub const MAX_DOUBLE_ROWS: usize = 1 << 3;

bitfield! {
    /// One packed GPIO word.
    ///
    /// Colour accessors use the panel naming: `r1/g1/b1` feed the upper half
    /// of the panel, `r2/g2/b2` the lower half.
    #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct IoBits(u32);
    impl Debug;
    pub g1, set_g1: 27;
    pub c, set_c: 24;
    pub b, set_b: 23;
    pub a, set_a: 22;
    pub row_address, set_row_address: 24, 22;
    pub output_enable, set_output_enable: 18;
    pub clock, set_clock: 17;
    pub r1, set_r1: 11;
    pub b2, set_b2: 10;
    pub g2, set_g2: 9;
    pub r2, set_r2: 8;
    pub b1, set_b1: 7;
    pub strobe, set_strobe: 4;
}

impl IoBits {
    /// All pins low.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Word with only the row address of `double_row` set.
    #[must_use]
    pub fn row(double_row: usize) -> Self {
        let mut bits = Self::new();
        bits.set_row_address(double_row as u32);
        bits
    }

    /// Raw register value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Only the colour lines of this word.
    #[must_use]
    pub const fn color_bits(self) -> u32 {
        self.0 & COLOR_MASK
    }

    /// Set the upper-half colour lines.
    pub fn set_color_upper(&mut self, r: bool, g: bool, b: bool) {
        self.set_r1(r);
        self.set_g1(g);
        self.set_b1(b);
    }

    /// Set the lower-half colour lines.
    pub fn set_color_lower(&mut self, r: bool, g: bool, b: bool) {
        self.set_r2(r);
        self.set_g2(g);
        self.set_b2(b);
    }

    /// Upper-half colour lines as `(r, g, b)`.
    #[must_use]
    pub fn color_upper(self) -> (bool, bool, bool) {
        (self.r1(), self.g1(), self.b1())
    }

    /// Lower-half colour lines as `(r, g, b)`.
    #[must_use]
    pub fn color_lower(self) -> (bool, bool, bool) {
        (self.r2(), self.g2(), self.b2())
    }
}

impl From<IoBits> for u32 {
    fn from(bits: IoBits) -> Self {
        bits.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_bits_construction() {
        let bits = IoBits::new();
        assert_eq!(bits.raw(), 0);
        assert_eq!(bits, IoBits::default());
        assert!(!bits.strobe());
        assert!(!bits.clock());
        assert!(!bits.output_enable());
    }

    #[test]
    fn test_pin_positions() {
        let cases: [(fn(&mut IoBits, bool), u32); 12] = [
            (IoBits::set_strobe, 4),
            (IoBits::set_clock, 17),
            (IoBits::set_output_enable, 18),
            (IoBits::set_a, 22),
            (IoBits::set_b, 23),
            (IoBits::set_c, 24),
            (IoBits::set_b1, 7),
            (IoBits::set_r2, 8),
            (IoBits::set_g2, 9),
            (IoBits::set_b2, 10),
            (IoBits::set_r1, 11),
            (IoBits::set_g1, 27),
        ];
        for (setter, pin) in cases {
            let mut bits = IoBits::new();
            setter(&mut bits, true);
            assert_eq!(bits.raw(), 1 << pin, "pin {pin}");
        }
    }

    #[test]
    fn test_row_address() {
        for row in 0..MAX_DOUBLE_ROWS {
            let bits = IoBits::row(row);
            assert_eq!(bits.row_address() as usize, row);
            assert_eq!(bits.raw() & !ROW_ADDRESS_MASK, 0);
            assert_eq!(bits.a(), row & 1 != 0);
            assert_eq!(bits.b(), row & 2 != 0);
            assert_eq!(bits.c(), row & 4 != 0);
        }
    }

    #[test]
    fn test_color_halves_are_isolated() {
        let mut bits = IoBits::row(5);
        bits.set_color_upper(true, false, true);
        assert_eq!(bits.color_upper(), (true, false, true));
        assert_eq!(bits.color_lower(), (false, false, false));
        assert_eq!(bits.row_address(), 5);

        bits.set_color_lower(false, true, true);
        assert_eq!(bits.color_upper(), (true, false, true));
        assert_eq!(bits.color_lower(), (false, true, true));

        bits.set_color_upper(false, false, false);
        assert_eq!(bits.color_bits(), (1 << 9) | (1 << 10));
    }

    #[test]
    fn test_masks() {
        let mut all = IoBits::new();
        all.set_color_upper(true, true, true);
        all.set_color_lower(true, true, true);
        assert_eq!(all.raw(), COLOR_MASK);

        assert_eq!(COLOR_MASK & ROW_ADDRESS_MASK, 0);
        assert_eq!(COLOR_MASK & (CLOCK | STROBE | OUTPUT_ENABLE), 0);
        assert_eq!(OUTPUT_MASK.count_ones(), 12);
    }
}
