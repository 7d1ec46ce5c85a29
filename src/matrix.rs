//! The matrix: frame management and the refresh thread.
//!
//! After construction a dedicated thread scans the active frame out to the
//! panel over and over. The caller draws into frames it owns and exchanges
//! them with the active one through [`RgbMatrix::swap_on_vsync`]. Frames
//! move by value over a pair of single-slot channels, so a frame is either
//! owned by the caller or by the refresh thread, never both. The refresh
//! thread only looks at the channel between two full scans, which keeps the
//! updates tear free.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::canvas::{FrameCanvas, FrameId};
use crate::error::{Error, Result};
use crate::framebuffer::{Framebuffer, MAX_BRIGHTNESS};
use crate::gpio::{GpioBus, MicrosCounter, PwmTimer};
use crate::luminance::LuminanceTable;
use crate::options::{MatrixOptions, PanelGeometry};
use crate::pins::OUTPUT_MASK;
use crate::pulser::PulseGenerator;
use crate::thread::{self, ThreadOptions};

enum Request {
    Swap(FrameCanvas),
    Sync,
}

enum Response {
    Swapped(FrameCanvas),
    Synced(FrameId),
}

/// A chain of HUB75 panels driven from the GPIO header.
#[derive(Debug)]
pub struct RgbMatrix {
    geometry: PanelGeometry,
    luminance: Arc<LuminanceTable>,
    next_id: u32,
    brightness: u8,
    pwm_bits: u8,
    luminance_correct: bool,
    requests: Option<SyncSender<Request>>,
    responses: Receiver<Response>,
    stop: Arc<AtomicBool>,
    refresh: Option<JoinHandle<Result<()>>>,
}

impl RgbMatrix {
    /// Map the SoC peripherals and start refreshing a blank frame.
    ///
    /// # Errors
    ///
    /// Invalid `options`, a failure to map the registers or to start the
    /// refresh thread.
    #[cfg(target_os = "linux")]
    pub fn new(options: MatrixOptions) -> Result<Self> {
        options.validate()?;
        let peripherals = crate::mmio::Peripherals::take(options.peripheral_base)?;
        Self::with_backend(
            options,
            peripherals.gpio,
            peripherals.pwm,
            peripherals.counter,
        )
    }

    /// Start refreshing a blank frame through the given register backend.
    ///
    /// # Errors
    ///
    /// Invalid `options` or a failure to start the refresh thread.
    pub fn with_backend<G, P, C>(options: MatrixOptions, mut gpio: G, pwm: P, counter: C) -> Result<Self>
    where
        G: GpioBus + 'static,
        P: PwmTimer + 'static,
        C: MicrosCounter + 'static,
    {
        let geometry = options.validate()?;
        let luminance = Arc::new(LuminanceTable::new(options.bitplanes)?);
        let pulser = PulseGenerator::new(pwm, counter, options.timing)?;
        gpio.init_outputs(OUTPUT_MASK);

        let (request_tx, request_rx) = sync_channel(1);
        let (response_tx, response_rx) = sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));

        let mut matrix = Self {
            geometry,
            luminance,
            next_id: 0,
            brightness: options.brightness.clamp(1, MAX_BRIGHTNESS),
            pwm_bits: options.pwm_bits,
            luminance_correct: options.luminance_correct,
            requests: Some(request_tx),
            responses: response_rx,
            stop: stop.clone(),
            refresh: None,
        };

        let refresh = RefreshLoop {
            gpio,
            pulser,
            active: matrix.create_frame(),
            requests: request_rx,
            responses: response_tx,
            stop,
            log_interval: options.refresh_log_interval,
        };
        let thread_options = ThreadOptions {
            realtime_priority: options.realtime_priority,
            cpu_affinity: options.cpu_affinity,
        };
        matrix.refresh = Some(thread::spawn("hub75-refresh", thread_options, move || {
            refresh.run()
        })?);

        log::info!(
            "matrix {}x{} running with {} bitplanes",
            geometry.columns(),
            geometry.rows(),
            options.bitplanes
        );
        Ok(matrix)
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

    /// Luminance table shared by every frame of this matrix.
    #[must_use]
    pub fn luminance(&self) -> &Arc<LuminanceTable> {
        &self.luminance
    }

    /// Brightness given to new frames.
    #[must_use]
    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Set the brightness given to new frames, clamped to `1..=100`.
    pub fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness.clamp(1, MAX_BRIGHTNESS);
    }

    /// A new, blank frame with the matrix defaults.
    pub fn create_frame(&mut self) -> FrameCanvas {
        let mut framebuffer = Framebuffer::new(self.geometry, self.luminance.clone());
        framebuffer.set_brightness(self.brightness);
        framebuffer.set_luminance_correct(self.luminance_correct);
        framebuffer.set_pwm_bits_clamped(self.pwm_bits);

        let id = FrameId::new(self.next_id);
        self.next_id += 1;
        FrameCanvas::new(id, framebuffer)
    }

    /// Show `next` from the next full refresh on and return the frame shown
    /// until then.
    ///
    /// Blocks for at most one full refresh.
    ///
    /// # Errors
    ///
    /// [`Error::RefreshStopped`] if the refresh thread is gone; `next` is
    /// dropped in that case.
    pub fn swap_on_vsync(&mut self, next: FrameCanvas) -> Result<FrameCanvas> {
        match self.request(Request::Swap(next))? {
            Response::Swapped(previous) => Ok(previous),
            Response::Synced(_) => Err(Error::RefreshStopped),
        }
    }

    /// Wait for the end of the current refresh and report which frame is
    /// displayed, without swapping.
    ///
    /// # Errors
    ///
    /// [`Error::RefreshStopped`] if the refresh thread is gone.
    pub fn sync_to_vsync(&mut self) -> Result<FrameId> {
        match self.request(Request::Sync)? {
            Response::Synced(id) => Ok(id),
            Response::Swapped(_) => Err(Error::RefreshStopped),
        }
    }

    fn request(&mut self, request: Request) -> Result<Response> {
        let requests = self.requests.as_ref().ok_or(Error::RefreshStopped)?;
        requests.send(request).map_err(|_| Error::RefreshStopped)?;
        self.responses.recv().map_err(|_| Error::RefreshStopped)
    }

    /// Whether the refresh thread is still scanning.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.refresh
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop refreshing, blank the panel and wait for the refresh thread.
    ///
    /// Dropping the matrix does the same.
    ///
    /// # Errors
    ///
    /// The error that ended refreshing early, such as
    /// [`Error::PulseStalled`], or [`Error::RefreshStopped`] if the refresh
    /// thread panicked.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_refresh()
    }

    fn stop_refresh(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.requests = None;
        if let Some(handle) = self.refresh.take() {
            let outcome = handle.join().map_err(|_| Error::RefreshStopped)?;
            log::info!("matrix stopped");
            outcome?;
        }
        Ok(())
    }
}

impl Drop for RgbMatrix {
    fn drop(&mut self) {
        if let Err(e) = self.stop_refresh() {
            log::error!("{e}");
        }
    }
}

struct RefreshLoop<G: GpioBus, P: PwmTimer, C: MicrosCounter> {
    gpio: G,
    pulser: PulseGenerator<P, C>,
    active: FrameCanvas,
    requests: Receiver<Request>,
    responses: SyncSender<Response>,
    stop: Arc<AtomicBool>,
    log_interval: u32,
}

impl<G: GpioBus, P: PwmTimer, C: MicrosCounter> RefreshLoop<G, P, C> {
    /// Refresh until stopped or a scan fails, then blank the panel.
    fn run(mut self) -> Result<()> {
        let outcome = self.refresh();
        self.active.clear();
        if let Err(e) = self.scan() {
            log::error!("can't blank panel: {e}");
        }
        outcome
    }

    fn refresh(&mut self) -> Result<()> {
        let mut scans = 0u32;
        let mut since = Instant::now();

        while !self.stop.load(Ordering::Acquire) {
            if let Err(e) = self.scan() {
                log::error!("refresh stopped: {e}");
                return Err(e);
            }

            let response = match self.requests.try_recv() {
                Ok(Request::Swap(next)) => {
                    Some(Response::Swapped(std::mem::replace(&mut self.active, next)))
                }
                Ok(Request::Sync) => Some(Response::Synced(self.active.id())),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            };
            if let Some(response) = response {
                if self.responses.send(response).is_err() {
                    break;
                }
            }

            scans += 1;
            if self.log_interval != 0 && scans == self.log_interval {
                let rate = f64::from(scans) / since.elapsed().as_secs_f64();
                log::debug!("refresh rate {rate:.1} Hz");
                scans = 0;
                since = Instant::now();
            }
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<()> {
        self.active
            .framebuffer()
            .dump_to_matrix(&mut self.gpio, &mut self.pulser)
    }
}
