// MIT License - Copyright (c) 2026 Peter Wright
// GPIO port

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{PlcError, Result};

/// A named digital pin with its board-level line number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GpioPin {
    pub name: String,
    pub pin: u32,
}

impl GpioPin {
    pub fn new(name: impl Into<String>, pin: u32) -> Self {
        Self {
            name: name.into(),
            pin,
        }
    }
}

/// Direction a pin is exported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioDirection {
    Input,
    Output,
}

/// Pin-level hardware access.
///
/// Calls are short and may block briefly inside the driver. Implementations
/// serialize access to the hardware themselves.
pub trait Gpio: Send + Sync {
    /// Read the digital level of an input pin.
    fn read(&self, pin: &GpioPin) -> Result<bool>;

    /// Drive an output pin to the given level.
    fn write(&self, pin: &GpioPin, level: bool) -> Result<()>;
}

#[derive(Debug, Default)]
struct PinState {
    level: bool,
    reads: usize,
    writes: usize,
}

#[derive(Debug, Default)]
struct MemoryBank {
    pins: HashMap<String, PinState>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
}

/// In-memory pin bank used for dry runs and tests.
///
/// Unknown pins read low. Reads and writes are counted per pin name.
#[derive(Debug, Default)]
pub struct MemoryGpio {
    bank: Mutex<MemoryBank>,
}

impl MemoryGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the level seen by the next reads (simulates a button or sensor).
    pub fn set_level(&self, name: &str, level: bool) {
        self.bank.lock().pins.entry(name.to_string()).or_default().level = level;
    }

    /// Last level written to or forced on a pin.
    pub fn level(&self, name: &str) -> Option<bool> {
        self.bank.lock().pins.get(name).map(|p| p.level)
    }

    pub fn read_count(&self, name: &str) -> usize {
        self.bank.lock().pins.get(name).map_or(0, |p| p.reads)
    }

    pub fn write_count(&self, name: &str) -> usize {
        self.bank.lock().pins.get(name).map_or(0, |p| p.writes)
    }

    /// Make reads of a pin fail until cleared.
    pub fn fail_reads(&self, name: &str, fail: bool) {
        let mut bank = self.bank.lock();
        if fail {
            bank.failing_reads.insert(name.to_string());
        } else {
            bank.failing_reads.remove(name);
        }
    }

    /// Make writes of a pin fail until cleared.
    pub fn fail_writes(&self, name: &str, fail: bool) {
        let mut bank = self.bank.lock();
        if fail {
            bank.failing_writes.insert(name.to_string());
        } else {
            bank.failing_writes.remove(name);
        }
    }
}

impl Gpio for MemoryGpio {
    fn read(&self, pin: &GpioPin) -> Result<bool> {
        let mut bank = self.bank.lock();
        if bank.failing_reads.contains(&pin.name) {
            return Err(PlcError::hardware(&pin.name, "simulated read failure"));
        }
        let state = bank.pins.entry(pin.name.clone()).or_default();
        state.reads += 1;
        Ok(state.level)
    }

    fn write(&self, pin: &GpioPin, level: bool) -> Result<()> {
        let mut bank = self.bank.lock();
        if bank.failing_writes.contains(&pin.name) {
            return Err(PlcError::hardware(&pin.name, "simulated write failure"));
        }
        let state = bank.pins.entry(pin.name.clone()).or_default();
        state.writes += 1;
        state.level = level;
        Ok(())
    }
}

/// Linux sysfs GPIO (`/sys/class/gpio/gpioN/value`).
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new("/sys/class/gpio")
    }
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn value_path(&self, pin: &GpioPin) -> PathBuf {
        self.root.join(format!("gpio{}", pin.pin)).join("value")
    }

    /// Export a pin and set its direction if it is not exported yet.
    pub fn export(&self, pin: &GpioPin, direction: GpioDirection) -> Result<()> {
        let dir = self.root.join(format!("gpio{}", pin.pin));
        if !dir.exists() {
            debug!("Exporting GPIO {} ({})", pin.pin, pin.name);
            fs::write(self.root.join("export"), pin.pin.to_string())
                .map_err(|e| PlcError::hardware(&pin.name, e))?;
        }
        let direction = match direction {
            GpioDirection::Input => "in",
            GpioDirection::Output => "out",
        };
        fs::write(dir.join("direction"), direction).map_err(|e| PlcError::hardware(&pin.name, e))
    }
}

impl Gpio for SysfsGpio {
    fn read(&self, pin: &GpioPin) -> Result<bool> {
        let raw = fs::read_to_string(self.value_path(pin))
            .map_err(|e| PlcError::hardware(&pin.name, e))?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(PlcError::hardware(
                &pin.name,
                format!("unexpected value {:?}", other),
            )),
        }
    }

    fn write(&self, pin: &GpioPin, level: bool) -> Result<()> {
        fs::write(self.value_path(pin), if level { "1" } else { "0" })
            .map_err(|e| PlcError::hardware(&pin.name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_gpio_levels() {
        let gpio = MemoryGpio::new();
        let button = GpioPin::new("btn1", 17);

        assert!(!gpio.read(&button).unwrap());
        gpio.set_level("btn1", true);
        assert!(gpio.read(&button).unwrap());
        assert_eq!(gpio.read_count("btn1"), 2);

        let relay = GpioPin::new("relay1", 18);
        gpio.write(&relay, true).unwrap();
        assert_eq!(gpio.level("relay1"), Some(true));
        assert_eq!(gpio.write_count("relay1"), 1);
    }

    #[test]
    fn test_memory_gpio_failures() {
        let gpio = MemoryGpio::new();
        let relay = GpioPin::new("relay1", 18);

        gpio.fail_writes("relay1", true);
        assert!(matches!(
            gpio.write(&relay, true),
            Err(PlcError::Hardware { .. })
        ));
        assert_eq!(gpio.level("relay1"), None);

        gpio.fail_writes("relay1", false);
        gpio.write(&relay, true).unwrap();
        assert_eq!(gpio.level("relay1"), Some(true));
    }

    #[test]
    fn test_sysfs_gpio_value_file() {
        let dir = tempfile::tempdir().unwrap();
        let pin = GpioPin::new("relay1", 23);
        fs::create_dir_all(dir.path().join("gpio23")).unwrap();

        let gpio = SysfsGpio::new(dir.path());
        gpio.write(&pin, true).unwrap();
        assert!(gpio.read(&pin).unwrap());
        gpio.write(&pin, false).unwrap();
        assert!(!gpio.read(&pin).unwrap());

        fs::write(dir.path().join("gpio23/value"), "x\n").unwrap();
        assert!(gpio.read(&pin).is_err());
    }

    #[test]
    fn test_sysfs_missing_pin() {
        let dir = tempfile::tempdir().unwrap();
        let gpio = SysfsGpio::new(dir.path());
        let err = gpio.read(&GpioPin::new("btn9", 99)).unwrap_err();
        assert!(matches!(err, PlcError::Hardware { pin, .. } if pin == "btn9"));
    }
}
