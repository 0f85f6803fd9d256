//! Memory-mapped BCM283x/BCM2711 GPIO backend
//!
//! Maps the GPIO controller's 4 KiB register block into the process through
//! `/dev/gpiomem` (no root needed, block starts at offset 0) or `/dev/mem`
//! (root, block at peripheral base + 0x200000) and writes the registers
//! directly.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use super::GpioBackend;
use crate::dshot::protocol::Pin;
use crate::error::{InitError, PinError};

/// BCM2835 peripheral base (Pi 1, Zero)
pub const BCM2835_PERIPHERAL_BASE: u64 = 0x2000_0000;

/// BCM2836/7 peripheral base (Pi 2, 3, Zero 2)
pub const BCM2837_PERIPHERAL_BASE: u64 = 0x3F00_0000;

/// BCM2711 peripheral base (Pi 4)
pub const BCM2711_PERIPHERAL_BASE: u64 = 0xFE00_0000;

/// GPIO controller offset from the peripheral base
pub const GPIO_OFFSET: u64 = 0x0020_0000;

/// Size of the mapped register block
pub const GPIO_BLOCK_SIZE: usize = 4 * 1024;

/// Physical memory device (needs root)
pub const DEV_MEM: &str = "/dev/mem";

/// GPIO-only memory device (needs gpio group membership)
pub const DEV_GPIOMEM: &str = "/dev/gpiomem";

/// Highest number of lines on the BCM283x GPIO controller
pub const MAX_PIN_COUNT: u32 = 54;

/// Lines broken out on the 40-pin header (GPIO 0-27)
pub const HEADER_PIN_COUNT: u32 = 28;

// Register word indices within the block
const GPFSEL0: usize = 0; // function select, 10 pins per word
const GPSET0: usize = 7; // output set, 32 pins per word
const GPCLR0: usize = 10; // output clear, 32 pins per word

const FSEL_MASK: u32 = 0b111;
const FSEL_OUTPUT: u32 = 0b001;

/// Memory-mapped backend configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmapGpioConfig {
    /// Device node to map
    pub device_path: String,
    /// SoC peripheral base, only used with `/dev/mem`
    pub peripheral_base: u64,
    /// Number of GPIO lines accepted (pins `0..pin_count`)
    pub pin_count: u32,
}

impl Default for MmapGpioConfig {
    fn default() -> Self {
        Self {
            device_path: DEV_GPIOMEM.to_string(),
            peripheral_base: BCM2837_PERIPHERAL_BASE,
            pin_count: HEADER_PIN_COUNT,
        }
    }
}

impl MmapGpioConfig {
    /// Offset of the GPIO block within `device_path`
    pub fn map_offset(&self) -> u64 {
        if self.device_path == DEV_MEM {
            self.peripheral_base + GPIO_OFFSET
        } else {
            0
        }
    }
}

/// GPIO backend writing the mapped registers directly
pub struct MmapGpio {
    config: MmapGpioConfig,
    mmap: Option<MmapMut>,
    registers: Option<NonNull<u32>>,
    configured: AtomicU64,
    configure_lock: Mutex<()>,
}

// SAFETY: `registers` points into `mmap`, which this struct owns and which
// outlives every access. Set/clear are single volatile word writes to
// registers that apply atomically in hardware; the function-select
// read-modify-write is serialized by `configure_lock`.
unsafe impl Send for MmapGpio {}
unsafe impl Sync for MmapGpio {}

impl std::fmt::Debug for MmapGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapGpio")
            .field("config", &self.config)
            .field("mapped", &self.mmap.is_some())
            .finish_non_exhaustive()
    }
}

impl MmapGpio {
    /// Backend for `config`; nothing is mapped until `initialize`
    pub fn new(config: MmapGpioConfig) -> Self {
        Self {
            config: MmapGpioConfig {
                pin_count: config.pin_count.min(MAX_PIN_COUNT),
                ..config
            },
            mmap: None,
            registers: None,
            configured: AtomicU64::new(0),
            configure_lock: Mutex::new(()),
        }
    }

    /// Backend configuration
    pub fn config(&self) -> &MmapGpioConfig {
        &self.config
    }

    fn check_pin(&self, pin: Pin) -> Result<(), PinError> {
        if pin.number() >= self.config.pin_count {
            return Err(PinError::InvalidPin {
                pin: pin.number(),
                pin_count: self.config.pin_count,
            });
        }
        Ok(())
    }

    fn base(&self) -> Result<NonNull<u32>, PinError> {
        self.registers.ok_or(PinError::NotInitialized)
    }

    #[inline(always)]
    fn write_register(&self, word: usize, value: u32) -> Result<(), PinError> {
        let base = self.base()?;
        debug_assert!(word < GPIO_BLOCK_SIZE / 4);
        // SAFETY: word lies inside the mapped block (pins are range checked)
        unsafe { ptr::write_volatile(base.as_ptr().add(word), value) };
        Ok(())
    }

    #[inline(always)]
    fn read_register(&self, word: usize) -> Result<u32, PinError> {
        let base = self.base()?;
        debug_assert!(word < GPIO_BLOCK_SIZE / 4);
        // SAFETY: as in write_register
        Ok(unsafe { ptr::read_volatile(base.as_ptr().add(word)) })
    }
}

impl GpioBackend for MmapGpio {
    fn initialize(&mut self) -> Result<(), InitError> {
        if self.mmap.is_some() {
            return Ok(());
        }

        let path = self.config.device_path.as_str();
        let sync_flags = if path == DEV_MEM { libc::O_SYNC } else { 0 };

        debug!("Opening {} for GPIO register access", path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flags)
            .open(path)
            .map_err(|e| InitError::from_io(path, e))?;

        let offset = self.config.map_offset();

        // SAFETY: the mapping is device memory we only touch through
        // volatile word accesses, never through references.
        let mut mmap = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(GPIO_BLOCK_SIZE)
                .map_mut(&file)
        }
        .map_err(|e| InitError::from_io(path, e))?;

        self.registers = NonNull::new(mmap.as_mut_ptr().cast::<u32>());
        self.mmap = Some(mmap);
        self.configured.store(0, Ordering::SeqCst);

        info!("Mapped GPIO block from {} at offset {:#x}", path, offset);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.registers = None;
        if self.mmap.take().is_some() {
            debug!("Unmapped GPIO block from {}", self.config.device_path);
        }
        self.configured.store(0, Ordering::SeqCst);
    }

    fn is_initialized(&self) -> bool {
        self.registers.is_some()
    }

    fn pin_count(&self) -> u32 {
        self.config.pin_count
    }

    fn configure_output(&self, pin: Pin) -> Result<(), PinError> {
        self.check_pin(pin)?;
        let mask = 1u64 << pin.number();
        if self.configured.load(Ordering::Acquire) & mask != 0 {
            return Ok(());
        }

        let _guard = self.configure_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.configured.load(Ordering::Acquire) & mask != 0 {
            return Ok(());
        }

        let number = pin.number() as usize;
        let word = GPFSEL0 + number / 10;
        let shift = (number % 10) * 3;

        // Pass through input (000) before selecting output (001)
        let fsel = self.read_register(word)? & !(FSEL_MASK << shift);
        self.write_register(word, fsel)?;
        self.write_register(word, fsel | (FSEL_OUTPUT << shift))?;
        self.clear_pin(pin)?;

        self.configured.fetch_or(mask, Ordering::Release);
        Ok(())
    }

    #[inline]
    fn set_pin(&self, pin: Pin) -> Result<(), PinError> {
        self.check_pin(pin)?;
        let number = pin.number() as usize;
        self.write_register(GPSET0 + number / 32, 1 << (number % 32))
    }

    #[inline]
    fn clear_pin(&self, pin: Pin) -> Result<(), PinError> {
        self.check_pin(pin)?;
        let number = pin.number() as usize;
        self.write_register(GPCLR0 + number / 32, 1 << (number % 32))
    }

    fn configured_pins(&self) -> Vec<Pin> {
        let configured = self.configured.load(Ordering::Acquire);
        (0..self.config.pin_count)
            .filter(|n| configured & (1u64 << n) != 0)
            .map(Pin)
            .collect()
    }
}
