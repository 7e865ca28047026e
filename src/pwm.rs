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

//! Software-based PWM output.
//!
//! An [`OutputDriver`] keeps a single output pin's logic level in line with a
//! [`ServoState`] over time. Two drivers are available, and exactly one of
//! them is used at a time.
//!
//! ## Busy-wait
//!
//! [`BusyWaitDriver`] emits one full period each time it's serviced by the
//! control loop: pin high, wait for the pulse width, pin low, wait for the
//! remainder of the period. The calling thread is blocked for the whole 20 ms
//! while the output is running, so input is only handled in between periods.
//!
//! ## Timer-driven
//!
//! [`TimerDriver`] hands the pin to an [`EdgeScheduler`], which is ticked
//! once per microsecond by a [`PeriodicTimer`]. The scheduler keeps a
//! [`PeriodCounter`] running from 0 to 19 999, raises the pin at 0 and lowers
//! it once the counter reaches the pulse width latched at the start of that
//! period. Position changes therefore only take effect on the next period.
//!
//! [`ThreadTimer`] emulates a 1 MHz hardware timer on Linux using a
//! dedicated real-time thread, combined with sleep and busy-waiting. As with
//! any software-based PWM, expect occasional jitter due to
//! scheduling/preemption.
//!
//! [`OutputDriver`]: trait.OutputDriver.html
//! [`ServoState`]: ../servo/struct.ServoState.html
//! [`BusyWaitDriver`]: struct.BusyWaitDriver.html
//! [`TimerDriver`]: struct.TimerDriver.html
//! [`EdgeScheduler`]: struct.EdgeScheduler.html
//! [`PeriodicTimer`]: trait.PeriodicTimer.html
//! [`PeriodCounter`]: struct.PeriodCounter.html
//! [`ThreadTimer`]: struct.ThreadTimer.html

use std::error;
use std::fmt;
use std::io;
use std::result;
use std::sync::Arc;

use embedded_hal::digital::{self, ErrorKind};

use crate::servo::ServoState;

mod busy_wait;
mod edge;
mod timer;

pub use self::busy_wait::BusyWaitDriver;
pub use self::edge::{EdgeScheduler, PeriodCounter, TimerDriver};
pub use self::timer::{PeriodicTimer, StepTimer, ThreadTimer, Tick, TICK_HZ};

/// Errors that can occur while generating the PWM signal.
#[derive(Debug)]
pub enum Error {
    /// Pin or timer configuration failed.
    ///
    /// This is fatal. The control loop is never entered.
    HardwareInit(io::Error),
    /// Writing to the output pin failed.
    Pin(ErrorKind),
    /// The periodic timer is already running.
    TimerRunning,
    /// Thread panicked.
    ThreadPanic,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::HardwareInit(ref err) => write!(f, "Hardware initialization failed: {}", err),
            Error::Pin(kind) => write!(f, "Output pin error: {}", kind),
            Error::TimerRunning => write!(f, "Timer is already running"),
            Error::ThreadPanic => write!(f, "Thread panicked"),
        }
    }
}

impl error::Error for Error {}

/// Result type returned from methods that can have `servoctl::pwm::Error`s.
pub type Result<T> = result::Result<T, Error>;

#[inline]
pub(crate) fn pin_error<E: digital::Error>(err: E) -> Error {
    Error::Pin(err.kind())
}

/// Keeps an output pin's logic level in line with a [`ServoState`].
///
/// The control loop calls [`start`] once, [`service`] on every iteration,
/// and [`stop`] before it exits. After `stop` returns, the pin is low and
/// nothing touches it anymore.
///
/// [`ServoState`]: ../servo/struct.ServoState.html
/// [`start`]: #tymethod.start
/// [`service`]: #tymethod.service
/// [`stop`]: #tymethod.stop
pub trait OutputDriver {
    /// Prepares the driver. `state` may be shared with another execution context.
    fn start(&mut self, state: &Arc<ServoState>) -> Result<()>;

    /// Gives the driver a chance to emit output from the control loop.
    fn service(&mut self, state: &ServoState) -> Result<()>;

    /// Stops all output and drives the pin low.
    fn stop(&mut self) -> Result<()>;
}

impl<T: OutputDriver + ?Sized> OutputDriver for Box<T> {
    fn start(&mut self, state: &Arc<ServoState>) -> Result<()> {
        (**self).start(state)
    }

    fn service(&mut self, state: &ServoState) -> Result<()> {
        (**self).service(state)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}
