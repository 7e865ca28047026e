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

// servo_keys.rs - Moves a servo connected to a GPIO pin between three
// positions using the keyboard.
//
// Type a line and press Enter:
//
//   a       - previous position (1000 µs)
//   d       - next position (2000 µs)
//   <Enter> - start/stop the PWM output
//   q       - quit
//
// Run with --timer to generate the signal from a 1 MHz timer thread instead
// of blocking the control loop.
//
// Don't power the servo directly from the Pi's GPIO header. Current spikes
// during power-up and stalls could otherwise damage your Pi. If you're
// powering the servo using a separate power supply, remember to connect the
// grounds of the Pi and the power supply together.

use std::env;
use std::io::{self, BufRead};
use std::process;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use log::{LevelFilter, Log, Metadata, Record};

// The simple-signal crate is used to handle incoming signals.
use simple_signal::{self, Signal};

use servoctl::servo::{self, ChannelPresenter, DriverKind, InputEvent, Key, ServoConfig};

// Gpio uses BCM pin numbering. BCM GPIO 23 is tied to physical pin 16.
const GPIO_SERVO: u8 = 23;

// Prints log messages to stderr, so they don't mix with the status display.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn key_for(line: &str) -> Option<Key> {
    match line.trim() {
        "a" => Some(Key::Left),
        "d" => Some(Key::Right),
        "w" => Some(Key::Up),
        "s" => Some(Key::Down),
        "" => Some(Key::Ok),
        "q" => Some(Key::Back),
        _ => None,
    }
}

fn main() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }

    let driver = if env::args().any(|arg| arg == "--timer") {
        DriverKind::Timer
    } else {
        DriverKind::BusyWait
    };
    let config = ServoConfig::new(GPIO_SERVO).with_driver(driver);

    let (sender, receiver) = mpsc::channel();

    // When a SIGINT (Ctrl-C) or SIGTERM signal is caught, ask the control loop to quit,
    // so the pin is driven low before the application exits.
    simple_signal::set_handler(&[Signal::Int, Signal::Term], {
        let sender = Mutex::new(sender.clone());
        move |_| {
            if let Ok(sender) = sender.lock() {
                let _ = sender.send(InputEvent::Quit);
            }
        }
    });

    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };

            if let Some(key) = key_for(&line) {
                if sender.send(InputEvent::from(key)).is_err() {
                    break;
                }
            }
        }
    });

    let status = servo::run(&config, ChannelPresenter::new(receiver, io::stdout()));

    process::exit(status);
}
