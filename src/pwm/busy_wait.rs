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

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::{debug, info};

use super::{pin_error, OutputDriver, Result};
use crate::hal::Delay;
use crate::servo::{pulse_width_for, PulseSchedule, ServoPosition, ServoState};

/// Emits PWM periods by blocking the calling thread.
///
/// Every call to [`service`] while the output is running produces exactly
/// one 20 ms period. The position is sampled once, at the start of the
/// period, and held for its full length.
///
/// [`service`]: ../pwm/trait.OutputDriver.html#tymethod.service
#[derive(Debug)]
pub struct BusyWaitDriver<P, D = Delay> {
    pin: P,
    delay: D,
    last_position: Option<ServoPosition>,
}

impl<P: OutputPin> BusyWaitDriver<P, Delay> {
    /// Constructs a new `BusyWaitDriver` using the default [`Delay`].
    ///
    /// [`Delay`]: ../hal/struct.Delay.html
    pub fn new(pin: P) -> BusyWaitDriver<P, Delay> {
        BusyWaitDriver::with_delay(pin, Delay::new())
    }
}

impl<P: OutputPin, D: DelayNs> BusyWaitDriver<P, D> {
    /// Constructs a new `BusyWaitDriver` with a custom delay provider.
    pub fn with_delay(pin: P, delay: D) -> BusyWaitDriver<P, D> {
        BusyWaitDriver {
            pin,
            delay,
            last_position: None,
        }
    }

    /// Consumes the driver and returns its pin.
    pub fn into_inner(self) -> P {
        self.pin
    }

    fn emit_period(&mut self, schedule: PulseSchedule) -> Result<()> {
        self.pin.set_high().map_err(pin_error)?;
        self.delay.delay_us(schedule.high_us());
        self.pin.set_low().map_err(pin_error)?;
        self.delay.delay_us(schedule.low_us());

        Ok(())
    }
}

impl<P: OutputPin, D: DelayNs> OutputDriver for BusyWaitDriver<P, D> {
    fn start(&mut self, _state: &Arc<ServoState>) -> Result<()> {
        self.pin.set_low().map_err(pin_error)?;
        info!("Busy-wait PWM driver started");

        Ok(())
    }

    fn service(&mut self, state: &ServoState) -> Result<()> {
        if !state.is_running() {
            return Ok(());
        }

        let position = state.position();
        if self.last_position != Some(position) {
            debug!(
                "Pulse width set to {} µs ({})",
                pulse_width_for(position),
                position
            );
            self.last_position = Some(position);
        }

        self.emit_period(PulseSchedule::for_position(position))
    }

    fn stop(&mut self) -> Result<()> {
        self.pin.set_low().map_err(pin_error)?;
        self.last_position = None;
        info!("Busy-wait PWM driver stopped");

        Ok(())
    }
}
