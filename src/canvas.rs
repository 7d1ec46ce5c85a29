//! Drawable frames handed back and forth between the caller and the refresh
//! thread.

use core::convert::Infallible;

use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::prelude::{OriginDimensions, Point, Size};

use crate::error::Result;
use crate::framebuffer::Framebuffer;
use crate::Color;

/// Identity of a frame within the matrix that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(u32);

impl FrameId {
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Numeric value; frames are numbered from 0 in creation order.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FrameId {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "FrameId({})", self.0);
    }
}

/// A full image that can be drawn on while it is not being displayed.
///
/// Frames come from [`crate::RgbMatrix::create_frame`] and are displayed by
/// passing them to [`crate::RgbMatrix::swap_on_vsync`], which hands back the
/// frame that was shown before.
///
/// # Example
/// ```rust,no_run
/// use embedded_graphics::prelude::*;
/// use embedded_graphics::primitives::{Circle, PrimitiveStyle};
/// use rpi_hub75::{Color, MatrixOptions, RgbMatrix};
///
/// let mut matrix = RgbMatrix::new(MatrixOptions::default()).unwrap();
/// let mut frame = matrix.create_frame();
/// frame.clear();
/// Circle::new(Point::new(4, 2), 10)
///     .into_styled(PrimitiveStyle::with_fill(Color::BLUE))
///     .draw(&mut frame)
///     .unwrap();
/// frame.set_pixel(0, 0, 255, 0, 0);
/// let _previous = matrix.swap_on_vsync(frame).unwrap();
/// ```
///
/// Every frame carries its own [`FrameId`], so frames can't be cloned:
///
/// ```rust,compile_fail
/// use rpi_hub75::{MatrixOptions, RgbMatrix};
///
/// let mut matrix = RgbMatrix::new(MatrixOptions::default()).unwrap();
/// let frame = matrix.create_frame();
/// let copy = frame.clone();
/// ```
#[derive(Debug)]
pub struct FrameCanvas {
    id: FrameId,
    framebuffer: Framebuffer,
}

impl FrameCanvas {
    pub(crate) fn new(id: FrameId, framebuffer: Framebuffer) -> Self {
        Self { id, framebuffer }
    }

    /// Identity of this frame.
    #[must_use]
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.framebuffer.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.framebuffer.height()
    }

    /// Set one pixel; coordinates outside the frame are ignored.
    pub fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8) {
        self.framebuffer.set_pixel(x, y, r, g, b);
    }

    /// Set every pixel to one colour.
    pub fn fill(&mut self, r: u8, g: u8, b: u8) {
        self.framebuffer.fill(r, g, b);
    }

    /// Turn every pixel off.
    pub fn clear(&mut self) {
        self.framebuffer.clear();
    }

    /// Brightness in percent for pixels drawn from now on.
    pub fn set_brightness(&mut self, brightness: u8) {
        self.framebuffer.set_brightness(brightness);
    }

    /// Current brightness in percent.
    #[must_use]
    pub fn brightness(&self) -> u8 {
        self.framebuffer.brightness()
    }

    /// Number of bitplanes drawn and scanned.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidPwmBits`] outside `1..=N`.
    pub fn set_pwm_bits(&mut self, pwm_bits: u8) -> Result<()> {
        self.framebuffer.set_pwm_bits(pwm_bits)
    }

    /// Bitplanes drawn and scanned.
    #[must_use]
    pub fn pwm_bits(&self) -> u8 {
        self.framebuffer.pwm_bits()
    }

    /// CIE1931 correction for pixels drawn from now on.
    pub fn set_luminance_correct(&mut self, correct: bool) {
        self.framebuffer.set_luminance_correct(correct);
    }

    /// Whether CIE1931 correction is on.
    #[must_use]
    pub fn luminance_correct(&self) -> bool {
        self.framebuffer.luminance_correct()
    }

    /// The underlying bitplanes.
    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }
}

impl OriginDimensions for FrameCanvas {
    fn size(&self) -> Size {
        Size::new(self.width() as u32, self.height() as u32)
    }
}

impl embedded_graphics::draw_target::DrawTarget for FrameCanvas {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> core::result::Result<(), Self::Error>
    where
        I: IntoIterator<Item = embedded_graphics::Pixel<Self::Color>>,
    {
        for embedded_graphics::Pixel(Point { x, y }, color) in pixels {
            self.set_pixel(x, y, color.r(), color.g(), color.b());
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> core::result::Result<(), Self::Error> {
        self.fill(color.r(), color.g(), color.b());
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FrameCanvas {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "FrameCanvas {} {}x{} pwm_bits: {} brightness: {}",
            self.id,
            self.width(),
            self.height(),
            self.pwm_bits(),
            self.brightness()
        );
    }
}
