// Copyright (c) 2017-2019 Rene van der Meer
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

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::result;
use std::thread;
use std::time::Duration;

/// Result type returned from methods that can have `io::Error`s.
pub type Result<T> = result::Result<T, io::Error>;

pub const SYSFS_GPIO: &str = "/sys/class/gpio";

// Find group ID for specified group name
fn group_name_to_gid(name: &str) -> Option<u32> {
    if let Ok(name_cstr) = CString::new(name) {
        unsafe {
            let group_ptr = libc::getgrnam(name_cstr.as_ptr());

            if !group_ptr.is_null() {
                return Some((*group_ptr).gr_gid);
            }
        }
    }

    None
}

pub fn pin_path(root: &Path, pin: u8) -> PathBuf {
    root.join(format!("gpio{}", pin))
}

/// Exports the pin. Returns `false` if it was already exported.
pub fn export(root: &Path, pin: u8) -> Result<bool> {
    // Only export if the pin isn't already exported
    if pin_path(root, pin).exists() {
        return Ok(false);
    }

    File::create(root.join("export"))?.write_fmt(format_args!("{}", pin))?;

    Ok(true)
}

pub fn wait_for_group(root: &Path, pin: u8) -> Result<()> {
    // The symlink created by exporting a pin starts off owned by root:root. There's
    // a short delay before the group is changed to gpio. Since servoctl should work for
    // non-root users, we'll wait for max. 1s for the group to change to gpio. If
    // this isn't working, check the udev rules (/etc/udev/rules.d/99-com.rules).
    let gid_gpio = group_name_to_gid("gpio").unwrap_or(0);

    let mut counter = 0;
    while counter < 20 {
        let meta = fs::metadata(pin_path(root, pin))?;
        if meta.gid() == gid_gpio {
            break;
        }

        thread::sleep(Duration::from_millis(50));
        counter += 1;
    }

    Ok(())
}

pub fn unexport(root: &Path, pin: u8) -> Result<()> {
    // Only unexport if the pin is actually exported
    if pin_path(root, pin).exists() {
        File::create(root.join("unexport"))?.write_fmt(format_args!("{}", pin))?;
    }

    Ok(())
}

// Undoes an export, even if the pin never showed up
pub fn revert_export(root: &Path, pin: u8) -> Result<()> {
    File::create(root.join("unexport"))?.write_fmt(format_args!("{}", pin))
}

// Configures the pin as an output that starts off low
pub fn set_output_low(root: &Path, pin: u8) -> Result<()> {
    File::create(pin_path(root, pin).join("direction"))?.write_all(b"low")?;

    Ok(())
}

pub fn open_value(root: &Path, pin: u8) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .open(pin_path(root, pin).join("value"))
}
