// Copyright (c) 2017-2021 Rene van der Meer
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
// THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Output pin backed by the Linux sysfs GPIO interface.
//!
//! [`SysfsOutputPin`] exports a GPIO pin through `/sys/class/gpio`, configures
//! it as an output that starts off low, and implements the `embedded-hal`
//! [`OutputPin`] and [`StatefulOutputPin`] traits, so it can be handed to
//! any of the PWM drivers.
//!
//! The sysfs interface doesn't expose pull resistors or drive strength. The
//! pin is used as a push-pull output with whatever pull and slew settings the
//! kernel applied.
//!
//! ## Permission denied
//!
//! Users that are part of the `gpio` group can usually export pins and
//! change their direction and value without additional permissions. If
//! [`SysfsOutputPin::new`] returns [`Error::PermissionDenied`], either the
//! current user isn't a member of the `gpio` group, or the `udev` rules don't
//! hand exported pins to that group.
//!
//! [`SysfsOutputPin`]: struct.SysfsOutputPin.html
//! [`SysfsOutputPin::new`]: struct.SysfsOutputPin.html#method.new
//! [`Error::PermissionDenied`]: enum.Error.html#variant.PermissionDenied
//! [`OutputPin`]: ../../embedded_hal/digital/trait.OutputPin.html
//! [`StatefulOutputPin`]: ../../embedded_hal/digital/trait.StatefulOutputPin.html

use std::error;
use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::result;

use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin, StatefulOutputPin};
use log::debug;

use crate::pwm;

mod sysfs;

pub(crate) use self::sysfs::SYSFS_GPIO;

/// Errors that can occur when accessing a GPIO pin.
#[derive(Debug)]
pub enum Error {
    /// Permission denied when exporting the pin or opening its attributes.
    ///
    /// More information on possible causes for this error can be found [here].
    ///
    /// [here]: index.html#permission-denied
    PermissionDenied(String),
    /// I/O error.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::PermissionDenied(ref path) => write!(f, "Permission denied: {}", path),
            Error::Io(ref err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl digital::Error for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl From<Error> for pwm::Error {
    fn from(err: Error) -> pwm::Error {
        match err {
            Error::PermissionDenied(path) => pwm::Error::HardwareInit(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path),
            )),
            Error::Io(err) => pwm::Error::HardwareInit(err),
        }
    }
}

/// Result type returned from methods that can have `servoctl::gpio::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// GPIO pin configured as output through sysfs.
///
/// By default, the pin is driven low and unexported when it goes out of
/// scope. Use [`set_reset_on_drop(false)`] to leave it exported.
///
/// [`set_reset_on_drop(false)`]: #method.set_reset_on_drop
#[derive(Debug)]
pub struct SysfsOutputPin {
    pin: u8,
    root: PathBuf,
    value: File,
    high: bool,
    reset_on_drop: bool,
}

impl SysfsOutputPin {
    /// Exports the pin with the specified GPIO number, and configures it as
    /// an output set to low.
    pub fn new(pin: u8) -> Result<SysfsOutputPin> {
        SysfsOutputPin::with_root(Path::new(sysfs::SYSFS_GPIO), pin)
    }

    pub(crate) fn with_root(root: &Path, pin: u8) -> Result<SysfsOutputPin> {
        let map_err = |err: io::Error| {
            if err.kind() == io::ErrorKind::PermissionDenied {
                Error::PermissionDenied(sysfs::pin_path(root, pin).display().to_string())
            } else {
                Error::Io(err)
            }
        };

        let exported = sysfs::export(root, pin).map_err(map_err)?;

        let configured = sysfs::wait_for_group(root, pin)
            .and_then(|_| sysfs::set_output_low(root, pin))
            .and_then(|_| sysfs::open_value(root, pin));

        let value = match configured {
            Ok(value) => value,
            Err(err) => {
                // Leave pins that were exported by someone else alone
                if exported {
                    debug!("Unexporting GPIO {} after failed configuration", pin);
                    let _ = sysfs::revert_export(root, pin);
                }

                return Err(map_err(err));
            }
        };

        debug!("GPIO {} exported as output", pin);

        Ok(SysfsOutputPin {
            pin,
            root: root.to_path_buf(),
            value,
            high: false,
            reset_on_drop: true,
        })
    }

    /// Returns the GPIO pin number.
    #[inline]
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Returns the value of `reset_on_drop`.
    pub fn reset_on_drop(&self) -> bool {
        self.reset_on_drop
    }

    /// When enabled, drives the pin low and unexports it when the pin goes
    /// out of scope. By default, this is set to `true`.
    ///
    /// ## Note
    ///
    /// Drop methods aren't called when a process is abnormally terminated, for
    /// instance when a user presses <kbd>Ctrl</kbd> + <kbd>C</kbd>, and the `SIGINT` signal
    /// isn't caught. You can catch those using crates such as [`simple_signal`].
    ///
    /// [`simple_signal`]: https://crates.io/crates/simple-signal
    pub fn set_reset_on_drop(&mut self, reset_on_drop: bool) {
        self.reset_on_drop = reset_on_drop;
    }

    fn write(&mut self, high: bool) -> Result<()> {
        let b_value: &[u8] = if high { b"1" } else { b"0" };
        self.value.write_at(b_value, 0)?;
        self.high = high;

        Ok(())
    }
}

impl Drop for SysfsOutputPin {
    fn drop(&mut self) {
        let _ = self.write(false);

        if self.reset_on_drop {
            let _ = sysfs::unexport(&self.root, self.pin);
        }
    }
}

impl ErrorType for SysfsOutputPin {
    type Error = Error;
}

impl OutputPin for SysfsOutputPin {
    fn set_low(&mut self) -> Result<()> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<()> {
        self.write(true)
    }
}

impl StatefulOutputPin for SysfsOutputPin {
    fn is_set_high(&mut self) -> Result<bool> {
        Ok(self.high)
    }

    fn is_set_low(&mut self) -> Result<bool> {
        Ok(!self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_pin(root: &Path, pin: u8) {
        let dir = root.join(format!("gpio{}", pin));
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("value"), b"0").unwrap();
    }

    #[test]
    fn configures_pin_as_low_output() {
        let root = tempfile::tempdir().unwrap();
        fake_pin(root.path(), 23);

        let mut pin = SysfsOutputPin::with_root(root.path(), 23).unwrap();
        pin.set_reset_on_drop(false);

        assert_eq!(pin.pin(), 23);
        assert_eq!(
            fs::read(root.path().join("gpio23/direction")).unwrap(),
            b"low"
        );
        assert!(pin.is_set_low().unwrap());

        // Already exported, so nothing is written to export.
        assert!(!root.path().join("export").exists());
    }

    #[test]
    fn writes_levels_to_value() {
        let root = tempfile::tempdir().unwrap();
        fake_pin(root.path(), 18);

        let mut pin = SysfsOutputPin::with_root(root.path(), 18).unwrap();
        let value = root.path().join("gpio18/value");

        pin.set_high().unwrap();
        assert_eq!(fs::read(&value).unwrap(), b"1");
        assert!(pin.is_set_high().unwrap());

        pin.set_low().unwrap();
        assert_eq!(fs::read(&value).unwrap(), b"0");
        assert!(pin.is_set_low().unwrap());
    }

    #[test]
    fn drop_drives_low_and_unexports() {
        let root = tempfile::tempdir().unwrap();
        fake_pin(root.path(), 4);

        let mut pin = SysfsOutputPin::with_root(root.path(), 4).unwrap();
        pin.set_high().unwrap();
        drop(pin);

        assert_eq!(fs::read(root.path().join("gpio4/value")).unwrap(), b"0");
        assert_eq!(fs::read(root.path().join("unexport")).unwrap(), b"4");
    }

    #[test]
    fn missing_pin_is_a_hardware_init_error() {
        let root = tempfile::tempdir().unwrap();

        // export is written, but no gpio5 directory ever shows up
        let err = SysfsOutputPin::with_root(root.path(), 5).unwrap_err();
        match err {
            Error::Io(ref e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            ref other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fs::read(root.path().join("export")).unwrap(), b"5");

        // The export is undone
        assert_eq!(fs::read(root.path().join("unexport")).unwrap(), b"5");

        match pwm::Error::from(err) {
            pwm::Error::HardwareInit(_) => (),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn failed_direction_keeps_foreign_export() {
        let root = tempfile::tempdir().unwrap();
        fake_pin(root.path(), 6);
        // direction can't be written when it's a directory
        fs::create_dir(root.path().join("gpio6/direction")).unwrap();

        match SysfsOutputPin::with_root(root.path(), 6) {
            Err(Error::Io(_)) => (),
            other => panic!("unexpected result: {:?}", other),
        }

        // gpio6 was already exported, so it's not ours to unexport
        assert!(!root.path().join("export").exists());
        assert!(!root.path().join("unexport").exists());
    }
}
