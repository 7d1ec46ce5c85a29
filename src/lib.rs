//! Driver for HUB75 RGB LED matrix panels wired to the Raspberry Pi GPIO
//! header.
//!
//! ## The HUB75 interface
//!
//! A HUB75 panel has no memory of its own. It holds two rows of colour data
//! (one from each half) in a chain of shift registers and lights them for as
//! long as the host keeps output enable asserted, so the host has to redraw
//! the picture double row by double row many times a second.
//!
//! ### Signals
//! - **R1 G1 B1**: colour bits of the pixel being shifted into the top half
//! - **R2 G2 B2**: the same for the bottom half
//! - **CLK**: a rising edge moves the colour bits in by one column
//! - **STB**: strobe; a pulse transfers the shifted row to the LED drivers
//! - **OE**: output enable, active low; the drivers light only while it is asserted
//! - **A B C**: address of the double row that is lit, one row in each half
//!
//! The pin assignment is fixed, see [`pins`].
//!
//! ### Colour depth
//! Colour comes from binary code modulation: every channel value is split
//! into bitplanes, and bitplane `n` is lit for `base_time * 2^n`. Because the base time is far below a microsecond, the
//! output-enable pulses are generated by the PWM peripheral from its FIFO
//! ([`pulser`]) while the CPU shifts in the next bitplane.
//!
//! Channel values first go through the CIE1931 lightness curve
//! ([`luminance`]) so that equal steps in value look like equal steps in
//! brightness.
//!
//! ## Driving a panel
//!
//! [`RgbMatrix`] owns a real-time refresh thread that continuously scans the
//! active [`FrameCanvas`] out to the panel. Draw into a frame of your own and
//! exchange it with [`RgbMatrix::swap_on_vsync`]:
//!
//! ```rust,no_run
//! use rpi_hub75::{MatrixOptions, RgbMatrix};
//!
//! let mut matrix = RgbMatrix::new(MatrixOptions::default()).unwrap();
//! let mut frame = matrix.create_frame();
//! for x in 0..32 {
//!     frame.clear();
//!     frame.set_pixel(x, 4, 0, 255, 0);
//!     frame = matrix.swap_on_vsync(frame).unwrap();
//! }
//! ```
//!
//! Register access goes through the traits in [`gpio`]. [`mmio`] maps the
//! real BCM283x registers; [`sim`] is an in-memory stand-in used by the
//! tests and benchmarks.
//!
//! ## Features
//!
//! - `defmt`: `defmt::Format` impls for the geometry and frame types.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

use embedded_graphics::pixelcolor::Rgb888;

pub mod canvas;
pub mod error;
pub mod framebuffer;
pub mod gpio;
pub mod luminance;
pub mod matrix;
#[cfg(target_os = "linux")]
pub mod mmio;
pub mod options;
pub mod pins;
pub mod pulser;
pub mod sim;
pub mod thread;

pub use canvas::{FrameCanvas, FrameId};
pub use error::{Error, Result};
pub use matrix::RgbMatrix;
pub use options::{MatrixOptions, PanelGeometry, PulseTiming};

/// Color type accepted by the drawing API.
pub type Color = Rgb888;

/// Double rows of a panel with `rows` rows.
///
/// Address `d` lights row `d` and row `d + rows / 2` at once, so a panel
/// is scanned in `rows / 2` steps.
#[must_use]
pub const fn compute_rows(rows: usize) -> usize {
    rows / 2
}
