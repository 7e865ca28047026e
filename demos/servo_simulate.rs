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

// servo_simulate.rs - Runs the timer-driven PWM output against a simulated
// pin, and prints the resulting waveform. No hardware required.
//
// Ticks are delivered by a StepTimer, so every tick corresponds to exactly
// one microsecond of simulated time.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::error::Error;
use std::rc::Rc;
use std::sync::Arc;

use embedded_hal::digital::{ErrorType, OutputPin};

use servoctl::pwm::{EdgeScheduler, OutputDriver, StepTimer, TimerDriver};
use servoctl::servo::{InputEvent, ServoState, PERIOD_US};

// Records level changes with the simulated time they happened at.
#[derive(Clone, Default)]
struct SimPin {
    now_us: Rc<Cell<u64>>,
    edges: Rc<RefCell<Vec<(u64, bool)>>>,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.record(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.record(true);
        Ok(())
    }
}

impl SimPin {
    fn record(&self, high: bool) {
        let mut edges = self.edges.borrow_mut();
        // The pin starts off low
        if edges.last().map_or(false, |&(_, level)| level) != high {
            edges.push((self.now_us.get(), high));
        }
    }
}

type SimDriver = TimerDriver<SimPin, StepTimer<EdgeScheduler<SimPin>>>;

fn advance(driver: &mut SimDriver, pin: &SimPin, ticks: u32) {
    for _ in 0..ticks {
        driver.timer_mut().step(1);
        pin.now_us.set(pin.now_us.get() + 1);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let pin = SimPin::default();
    let state = Arc::new(ServoState::new());
    let mut driver: SimDriver = TimerDriver::with_timer(pin.clone(), StepTimer::new());

    driver.start(&state)?;
    state.apply(InputEvent::ToggleRun);

    // One period per position, starting at Center
    advance(&mut driver, &pin, PERIOD_US);
    state.apply(InputEvent::PreviousPosition);
    advance(&mut driver, &pin, PERIOD_US);

    // Changing position mid-pulse only affects the next period
    advance(&mut driver, &pin, 600);
    state.apply(InputEvent::NextPosition);
    state.apply(InputEvent::NextPosition);
    advance(&mut driver, &pin, PERIOD_US - 600);
    advance(&mut driver, &pin, PERIOD_US);

    state.apply(InputEvent::ToggleRun);
    driver.stop()?;

    let edges = pin.edges.borrow();
    for pair in edges.chunks(2) {
        if let [(rise, true), (fall, false)] = pair {
            let width = fall - rise;
            println!(
                "{:>6} µs: high for {} µs ({:.1}% duty cycle)",
                rise,
                width,
                width as f64 * 100.0 / f64::from(PERIOD_US)
            );
        }
    }

    Ok(())
}
