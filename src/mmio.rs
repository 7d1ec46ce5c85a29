//! Memory-mapped BCM283x peripherals.
//!
//! [`Peripherals::take`] maps the four register blocks the driver needs from
//! `/dev/mem` (which usually means running as root):
//!
//! | Block | Offset from the peripheral base |
//! |-------|---------------------------------|
//! | GPIO | `0x20_0000` |
//! | PWM | `0x20_C000` |
//! | clock manager | `0x10_1000` |
//! | system timer | `0x3000` |
//!
//! Only one set of peripherals can exist in a process. The claim is released
//! once every part has been dropped.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::gpio::{GpioBus, MicrosCounter, PwmTimer};
use crate::pins::PIN_OUTPUT_ENABLE;

const REGISTER_BLOCK_SIZE: usize = 4096;

const GPIO_OFFSET: u64 = 0x20_0000;
const PWM_OFFSET: u64 = 0x20_C000;
const CLOCK_OFFSET: u64 = 0x10_1000;
const TIMER_OFFSET: u64 = 0x3000;

// GPIO word offsets
const GPSET0: usize = 0x1C / 4;
const GPCLR0: usize = 0x28 / 4;
const GPLEV0: usize = 0x34 / 4;
const FSEL_OUTPUT: u32 = 0b001;
const FSEL_ALT5: u32 = 0b010;
const GPIO_PINS: u32 = 28;

// PWM word offsets
const PWM_CTL: usize = 0;
const PWM_STA: usize = 1;
const PWM_RNG1: usize = 0x10 / 4;
const PWM_FIFO: usize = 0x18 / 4;

// Clock manager
const CM_PWMCTL: usize = 40;
const CM_PWMDIV: usize = 41;
const CM_PASSWD: u32 = 0x5A << 24;
const CM_KILL: u32 = 1 << 5;
const CM_ENAB: u32 = 1 << 4;
const CM_SRC_PLLD: u32 = 6;
const fn cm_divi(divider: u32) -> u32 {
    divider << 12
}

// Lower 32 bits of the 1 MHz system timer.
const TIMER_CLO: usize = 1;

static CLAIMED: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
struct Claim;

impl Drop for Claim {
    fn drop(&mut self) {
        CLAIMED.store(false, Ordering::Release);
    }
}

/// One mapped 4 KiB register block.
#[derive(Debug)]
struct RegisterBlock {
    base: NonNull<u32>,
    address: u64,
}

// The mapping is plain device memory and is only accessed through volatile
// reads and writes.
unsafe impl Send for RegisterBlock {}

impl RegisterBlock {
    fn map(mem: &std::fs::File, address: u64) -> Result<Self> {
        let offset = libc::off_t::try_from(address).map_err(|_| Error::Map {
            address,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        })?;
        // SAFETY: a fresh shared mapping of a device range; no Rust object
        // aliases it.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                REGISTER_BLOCK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                mem.as_raw_fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::Map {
                address,
                source: io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(ptr.cast::<u32>()).ok_or(Error::Map {
            address,
            source: io::Error::from(io::ErrorKind::AddrNotAvailable),
        })?;
        Ok(Self { base, address })
    }

    fn read(&self, word: usize) -> u32 {
        debug_assert!(word < REGISTER_BLOCK_SIZE / 4);
        // SAFETY: `word` lies inside the mapped block.
        unsafe { self.base.as_ptr().add(word).read_volatile() }
    }

    fn write(&self, word: usize, value: u32) {
        debug_assert!(word < REGISTER_BLOCK_SIZE / 4);
        // SAFETY: `word` lies inside the mapped block.
        unsafe { self.base.as_ptr().add(word).write_volatile(value) }
    }
}

impl Drop for RegisterBlock {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly the block mapped in `map`.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), REGISTER_BLOCK_SIZE) };
        if rc != 0 {
            log::warn!(
                "munmap of {:#x} failed: {}",
                self.address,
                io::Error::last_os_error()
            );
        }
    }
}

/// The mapped peripherals, split into the parts the driver consumes.
#[derive(Debug)]
pub struct Peripherals {
    /// GPIO function select, set, clear and level registers.
    pub gpio: MmioGpio,
    /// PWM channel 1 and its clock.
    pub pwm: MmioPwm,
    /// Free-running 1 MHz system timer.
    pub counter: MmioCounter,
}

impl Peripherals {
    /// Map the registers of the SoC whose peripherals start at the physical
    /// address `base` (see [`crate::options::BCM2709_PERI_BASE`]).
    ///
    /// # Errors
    ///
    /// [`Error::PeripheralsTaken`] while another instance is alive, and
    /// [`Error::Map`] when `/dev/mem` can't be opened or mapped.
    pub fn take(base: u64) -> Result<Self> {
        if CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(Error::PeripheralsTaken);
        }
        let claim = Arc::new(Claim);

        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
            .map_err(|source| Error::Map {
                address: base,
                source,
            })?;

        let gpio = RegisterBlock::map(&mem, base + GPIO_OFFSET)?;
        let pwm = RegisterBlock::map(&mem, base + PWM_OFFSET)?;
        let clock = RegisterBlock::map(&mem, base + CLOCK_OFFSET)?;
        let timer = RegisterBlock::map(&mem, base + TIMER_OFFSET)?;
        log::info!("mapped peripherals at {base:#x}");

        Ok(Self {
            gpio: MmioGpio {
                regs: gpio,
                _claim: claim.clone(),
            },
            pwm: MmioPwm {
                regs: pwm,
                clock,
                _claim: claim.clone(),
            },
            counter: MmioCounter {
                regs: timer,
                _claim: claim,
            },
        })
    }
}

/// GPIO registers.
#[derive(Debug)]
pub struct MmioGpio {
    regs: RegisterBlock,
    _claim: Arc<Claim>,
}

impl MmioGpio {
    fn set_function(&mut self, pin: u32, function: u32) {
        let register = (pin / 10) as usize;
        let shift = (pin % 10) * 3;
        let value = self.regs.read(register);
        self.regs
            .write(register, (value & !(0b111 << shift)) | (function << shift));
    }
}

impl GpioBus for MmioGpio {
    /// Output enable is handed to PWM0 (alternate function 5) instead of
    /// being a plain output.
    fn init_outputs(&mut self, mask: u32) -> u32 {
        let mask = mask & ((1 << GPIO_PINS) - 1);
        for pin in (0..GPIO_PINS).filter(|pin| mask & (1 << pin) != 0) {
            let function = if pin == PIN_OUTPUT_ENABLE {
                FSEL_ALT5
            } else {
                FSEL_OUTPUT
            };
            self.set_function(pin, function);
        }
        mask
    }

    fn set_bits(&mut self, mask: u32) {
        self.regs.write(GPSET0, mask);
    }

    fn clear_bits(&mut self, mask: u32) {
        self.regs.write(GPCLR0, mask);
    }

    fn read_levels(&self) -> u32 {
        self.regs.read(GPLEV0)
    }
}

/// PWM controller and the PWM clock of the clock manager.
#[derive(Debug)]
pub struct MmioPwm {
    regs: RegisterBlock,
    clock: RegisterBlock,
    _claim: Arc<Claim>,
}

impl PwmTimer for MmioPwm {
    fn configure_clock(&mut self, divider: u32) {
        self.clock.write(CM_PWMCTL, CM_PASSWD | CM_KILL);
        self.clock.write(CM_PWMCTL, CM_PASSWD | CM_SRC_PLLD);
        self.clock.write(CM_PWMDIV, CM_PASSWD | cm_divi(divider));
        self.clock
            .write(CM_PWMCTL, CM_PASSWD | CM_ENAB | CM_SRC_PLLD);
    }

    fn write_control(&mut self, value: u32) {
        self.regs.write(PWM_CTL, value);
    }

    fn write_range(&mut self, value: u32) {
        self.regs.write(PWM_RNG1, value);
    }

    fn push_fifo(&mut self, value: u32) {
        self.regs.write(PWM_FIFO, value);
    }

    fn status(&self) -> u32 {
        self.regs.read(PWM_STA)
    }
}

/// System timer counter.
#[derive(Debug)]
pub struct MmioCounter {
    regs: RegisterBlock,
    _claim: Arc<Claim>,
}

impl MicrosCounter for MmioCounter {
    fn micros(&self) -> u32 {
        self.regs.read(TIMER_CLO)
    }
}
