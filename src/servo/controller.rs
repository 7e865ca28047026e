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

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::display::{render, Presenter};
use super::state::{Flow, ServoState};
use crate::gpio::{SysfsOutputPin, SYSFS_GPIO};
use crate::pwm::{self, BusyWaitDriver, OutputDriver, TimerDriver};

/// PWM output strategies.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DriverKind {
    /// Blocks the control loop for every period. See [`BusyWaitDriver`].
    ///
    /// [`BusyWaitDriver`]: ../pwm/struct.BusyWaitDriver.html
    BusyWait,
    /// Edges are scheduled from a 1 MHz timer. See [`TimerDriver`].
    ///
    /// [`TimerDriver`]: ../pwm/struct.TimerDriver.html
    Timer,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DriverKind::BusyWait => write!(f, "BusyWait"),
            DriverKind::Timer => write!(f, "Timer"),
        }
    }
}

/// Settings for [`run`].
///
/// Defaults to GPIO 23, the busy-wait driver, and a 100 ms input poll timeout.
///
/// [`run`]: fn.run.html
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ServoConfig {
    pin: u8,
    driver: DriverKind,
    poll_timeout: Duration,
}

impl ServoConfig {
    /// Constructs a new `ServoConfig` for the specified GPIO pin.
    pub fn new(pin: u8) -> ServoConfig {
        ServoConfig {
            pin,
            ..ServoConfig::default()
        }
    }

    pub fn with_pin(mut self, pin: u8) -> ServoConfig {
        self.pin = pin;
        self
    }

    pub fn with_driver(mut self, driver: DriverKind) -> ServoConfig {
        self.driver = driver;
        self
    }

    /// Sets how long the control loop waits for an input event per iteration.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> ServoConfig {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

impl Default for ServoConfig {
    fn default() -> ServoConfig {
        ServoConfig {
            pin: 23,
            driver: DriverKind::BusyWait,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

/// Runs the servo control loop.
///
/// Each iteration waits for an input event, applies it to the
/// [`ServoState`], services the [`OutputDriver`], and redraws the display.
///
/// [`ServoState`]: struct.ServoState.html
/// [`OutputDriver`]: ../pwm/trait.OutputDriver.html
#[derive(Debug)]
pub struct Controller<D, Pr> {
    state: Arc<ServoState>,
    driver: D,
    presenter: Pr,
    pin: u8,
    poll_timeout: Duration,
}

impl<D: OutputDriver, Pr: Presenter> Controller<D, Pr> {
    /// Constructs a new `Controller`, centered and stopped.
    pub fn new(config: &ServoConfig, driver: D, presenter: Pr) -> Controller<D, Pr> {
        Controller {
            state: Arc::new(ServoState::new()),
            driver,
            presenter,
            pin: config.pin(),
            poll_timeout: config.poll_timeout(),
        }
    }

    /// Returns the shared servo state.
    pub fn state(&self) -> &Arc<ServoState> {
        &self.state
    }

    /// Consumes the controller and returns its driver and presenter.
    pub fn into_parts(self) -> (D, Pr) {
        (self.driver, self.presenter)
    }

    /// Blocks until a `Quit` event is received.
    ///
    /// If the driver can't be started, returns its error before anything is
    /// shown. On exit, the run flag is cleared first, then the driver is
    /// stopped, which leaves the pin low.
    pub fn run(&mut self) -> pwm::Result<()> {
        self.driver.start(&self.state)?;
        info!("Servo control started on GPIO {}", self.pin);

        let result = self.control_loop();

        self.state.set_running(false);
        let stopped = self.driver.stop();
        info!("Servo control stopped");

        result.and(stopped)
    }

    fn control_loop(&mut self) -> pwm::Result<()> {
        self.redraw();

        loop {
            if let Some(event) = self.presenter.next_input_event(self.poll_timeout) {
                debug!("Input event: {:?}", event);

                if self.state.apply(event) == Flow::Quit {
                    return Ok(());
                }
            }

            self.driver.service(&self.state)?;
            self.redraw();
        }
    }

    fn redraw(&mut self) {
        let frame = render(&self.state.snapshot(), self.pin);

        if let Err(err) = self.presenter.present(&frame) {
            warn!("Unable to update the display: {}", err);
        }
    }
}

/// Configures the output pin and runs the control loop until the user quits.
///
/// Returns the process exit status: 0 after a normal exit, 1 if the pin or
/// timer couldn't be configured, or if the output failed.
pub fn run<Pr: Presenter>(config: &ServoConfig, presenter: Pr) -> i32 {
    run_with_root(Path::new(SYSFS_GPIO), config, presenter)
}

pub(crate) fn run_with_root<Pr: Presenter>(
    root: &Path,
    config: &ServoConfig,
    presenter: Pr,
) -> i32 {
    let pin = match SysfsOutputPin::with_root(root, config.pin()) {
        Ok(pin) => pin,
        Err(err) => {
            error!("{}", pwm::Error::from(err));
            return 1;
        }
    };

    let driver: Box<dyn OutputDriver> = match config.driver() {
        DriverKind::BusyWait => Box::new(BusyWaitDriver::new(pin)),
        DriverKind::Timer => Box::new(TimerDriver::new(pin)),
    };
    info!("Using the {} PWM driver", config.driver());

    let mut controller = Controller::new(config, driver, presenter);
    match controller.run() {
        Ok(()) => 0,
        Err(err) => {
            error!("{}", err);
            1
        }
    }
}
