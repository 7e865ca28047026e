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
use std::thread;

use embedded_hal::digital::{self, ErrorKind, OutputPin};
use log::{info, warn};

use super::timer::{PeriodicTimer, ThreadTimer, Tick, TICK_HZ};
use super::{pin_error, Error, OutputDriver, Result};
use crate::servo::{pulse_width_for, ServoState, PERIOD_US};

// Longest delay after a skipped period start that still gets a full pulse
const LATE_START_MAX_US: u32 = 100;

/// Microsecond position within the current PWM period.
///
/// Counts from 0 to [`PERIOD_US`] - 1, and wraps back to 0.
///
/// [`PERIOD_US`]: ../servo/constant.PERIOD_US.html
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct PeriodCounter {
    value: u32,
}

impl PeriodCounter {
    /// Constructs a new `PeriodCounter` set to 0.
    pub fn new() -> PeriodCounter {
        PeriodCounter { value: 0 }
    }

    /// Returns the current tick within the period.
    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Moves to the next tick, wrapping at the end of the period.
    #[inline]
    pub fn advance(&mut self) {
        self.value += 1;
        if self.value >= PERIOD_US {
            self.value = 0;
        }
    }

    /// Moves `ticks` ticks ahead. Returns `true` if the counter wrapped.
    pub fn advance_by(&mut self, ticks: u32) -> bool {
        let target = u64::from(self.value) + u64::from(ticks);
        self.value = (target % u64::from(PERIOD_US)) as u32;

        target >= u64::from(PERIOD_US)
    }
}

/// Tick handler that raises and lowers the output pin.
///
/// On every tick while the output is running:
///
/// * at counter 0, the pulse width for the current position is latched and
///   the pin is set high.
/// * once the counter reaches the latched pulse width, the pin is set low.
///
/// While the output is stopped, the pin is kept low. The counter advances on
/// every tick regardless, so periods always start on a counter wrap.
///
/// Skipped ticks move the counter without replaying edges. A pulse whose
/// falling edge was skipped ends as soon as the scheduler catches up. If the
/// start of a period was skipped, the pulse is raised late with its full
/// width when the delay is short, and left out for the rest of the period
/// otherwise. A stall never produces a shortened pulse.
///
/// Pin errors can't be returned from a tick. The first one is kept, and
/// reported through [`release`].
///
/// [`release`]: #method.release
#[derive(Debug)]
pub struct EdgeScheduler<P> {
    pin: P,
    state: Arc<ServoState>,
    counter: PeriodCounter,
    high_us: u32,
    fall_at: u32,
    asserted: bool,
    fault: Option<ErrorKind>,
}

impl<P: OutputPin> EdgeScheduler<P> {
    /// Constructs a new `EdgeScheduler`. The pin is expected to be low.
    pub fn new(pin: P, state: Arc<ServoState>) -> EdgeScheduler<P> {
        let high_us = pulse_width_for(state.position());

        EdgeScheduler {
            pin,
            state,
            counter: PeriodCounter::new(),
            high_us,
            fall_at: high_us,
            asserted: false,
            fault: None,
        }
    }

    /// Returns the tick the next call to `tick` will handle.
    #[inline]
    pub fn counter(&self) -> u32 {
        self.counter.value()
    }

    /// Returns the pulse width latched for the current period.
    #[inline]
    pub fn latched_pulse_width(&self) -> u32 {
        self.high_us
    }

    /// Returns `true` if the pin is currently set high.
    #[inline]
    pub fn is_asserted(&self) -> bool {
        self.asserted
    }

    /// Returns the first pin error that occurred, if any.
    pub fn fault(&self) -> Option<ErrorKind> {
        self.fault
    }

    /// Sets the pin low, and returns the pin together with the first pin
    /// error that occurred during the scheduler's lifetime.
    pub fn release(mut self) -> (P, Option<ErrorKind>) {
        self.write(false);

        (self.pin, self.fault)
    }

    // Latches the pulse width, and raises the pin until `now` + width
    fn begin_pulse(&mut self, now: u32) {
        self.high_us = pulse_width_for(self.state.position());
        self.fall_at = now + self.high_us;
        self.write(true);
    }

    #[inline]
    fn write(&mut self, high: bool) {
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        match result {
            Ok(()) => self.asserted = high,
            Err(err) => {
                if self.fault.is_none() {
                    self.fault = Some(digital::Error::kind(&err));
                }
            }
        }
    }
}

impl<P: OutputPin> Tick for EdgeScheduler<P> {
    fn tick(&mut self) {
        let now = self.counter.value();

        if self.state.is_running() {
            if now == 0 {
                self.begin_pulse(0);
            } else if now >= self.fall_at && self.asserted {
                self.write(false);
            }
        } else if self.asserted {
            self.write(false);
        }

        self.counter.advance();
    }

    fn skip(&mut self, ticks: u32) {
        let wrapped = self.counter.advance_by(ticks);
        let now = self.counter.value();

        if self.asserted && (wrapped || !self.state.is_running() || now > self.fall_at) {
            self.write(false);
        } else if wrapped && now <= LATE_START_MAX_US && self.state.is_running() {
            self.begin_pulse(now);
        }
    }
}

/// Emits PWM periods from a periodic timer's tick context.
///
/// The pin is owned by the driver while it's stopped, and by the
/// [`EdgeScheduler`] running on the timer while it's started. [`stop`]
/// disables the timer first, waits until the scheduler can no longer be
/// ticked, and only then drives the pin low.
///
/// [`EdgeScheduler`]: struct.EdgeScheduler.html
/// [`stop`]: ../pwm/trait.OutputDriver.html#tymethod.stop
#[derive(Debug)]
pub struct TimerDriver<P, T = ThreadTimer<EdgeScheduler<P>>>
where
    P: OutputPin,
    T: PeriodicTimer<EdgeScheduler<P>>,
{
    pin: Option<P>,
    timer: T,
}

impl<P: OutputPin + Send + 'static> TimerDriver<P, ThreadTimer<EdgeScheduler<P>>> {
    /// Constructs a new `TimerDriver` using a [`ThreadTimer`].
    ///
    /// [`ThreadTimer`]: struct.ThreadTimer.html
    pub fn new(pin: P) -> TimerDriver<P, ThreadTimer<EdgeScheduler<P>>> {
        TimerDriver::with_timer(pin, ThreadTimer::new())
    }
}

impl<P: OutputPin, T: PeriodicTimer<EdgeScheduler<P>>> TimerDriver<P, T> {
    /// Constructs a new `TimerDriver` with a custom timer.
    pub fn with_timer(pin: P, timer: T) -> TimerDriver<P, T> {
        TimerDriver {
            pin: Some(pin),
            timer,
        }
    }

    /// Returns a reference to the timer.
    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Returns a mutable reference to the timer.
    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }
}

impl<P: OutputPin, T: PeriodicTimer<EdgeScheduler<P>>> OutputDriver for TimerDriver<P, T> {
    fn start(&mut self, state: &Arc<ServoState>) -> Result<()> {
        let mut pin = self.pin.take().ok_or(Error::TimerRunning)?;

        if let Err(err) = pin.set_low() {
            let err = pin_error(err);
            self.pin = Some(pin);
            return Err(err);
        }

        self.timer.start(TICK_HZ, EdgeScheduler::new(pin, state.clone()))?;
        info!("Timer-driven PWM driver started");

        Ok(())
    }

    fn service(&mut self, _state: &ServoState) -> Result<()> {
        // Edges are produced from the timer's tick context
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let scheduler = match self.timer.stop()? {
            Some(scheduler) => scheduler,
            None => return Ok(()),
        };

        let (pin, fault) = scheduler.release();
        self.pin = Some(pin);
        info!("Timer-driven PWM driver stopped");

        match fault {
            Some(kind) => {
                warn!("Output pin reported an error while running: {}", kind);
                Err(Error::Pin(kind))
            }
            None => Ok(()),
        }
    }
}

impl<P: OutputPin, T: PeriodicTimer<EdgeScheduler<P>>> Drop for TimerDriver<P, T> {
    fn drop(&mut self) {
        if !thread::panicking() && self.timer.is_running() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Clock, MockPin};
    use crate::pwm::StepTimer;
    use crate::servo::{InputEvent, ServoPosition};

    type StepDriver = TimerDriver<MockPin, StepTimer<EdgeScheduler<MockPin>>>;

    fn scheduler(clock: &Clock, state: &Arc<ServoState>) -> (EdgeScheduler<MockPin>, MockPin) {
        let pin = MockPin::new(clock);
        (EdgeScheduler::new(pin.clone(), state.clone()), pin)
    }

    // One tick per virtual microsecond
    fn tick_for(scheduler: &mut EdgeScheduler<MockPin>, clock: &Clock, ticks: u32) {
        for _ in 0..ticks {
            scheduler.tick();
            clock.advance_us(1);
        }
    }

    fn step_driver(driver: &mut StepDriver, clock: &Clock, ticks: u32) {
        for _ in 0..ticks {
            driver.timer_mut().step(1);
            clock.advance_us(1);
        }
    }

    #[test]
    fn counter_visits_every_tick_once_per_period() {
        let mut counter = PeriodCounter::new();
        let mut seen = vec![0u8; PERIOD_US as usize];

        for _ in 0..PERIOD_US {
            seen[counter.value() as usize] += 1;
            counter.advance();
        }

        assert!(seen.iter().all(|&n| n == 1));
        assert_eq!(counter.value(), 0);

        counter.advance();
        assert_eq!(counter.value(), 1);
    }

    #[test]
    fn running_output_is_high_for_latched_width() {
        for position in [ServoPosition::Near, ServoPosition::Center, ServoPosition::Far] {
            let clock = Clock::default();
            let state = Arc::new(ServoState::with(position, true));
            let (mut scheduler, pin) = scheduler(&clock, &state);

            tick_for(&mut scheduler, &clock, 3 * PERIOD_US + 1);

            let high = u64::from(pulse_width_for(position));
            let low = u64::from(PERIOD_US) - high;
            assert_eq!(pin.periods(), vec![(high, low); 3]);
        }
    }

    #[test]
    fn stopped_output_never_goes_high() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::new());
        let (mut scheduler, pin) = scheduler(&clock, &state);

        tick_for(&mut scheduler, &clock, 2 * PERIOD_US + 700);

        assert!(pin.edges().is_empty());
        assert_eq!(scheduler.counter(), 700);
    }

    #[test]
    fn toggle_run_starts_on_next_period() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::new());
        let (mut scheduler, pin) = scheduler(&clock, &state);

        tick_for(&mut scheduler, &clock, 300);
        state.apply(InputEvent::ToggleRun);
        tick_for(&mut scheduler, &clock, PERIOD_US - 300 + 2 * PERIOD_US + 1);

        assert_eq!(pin.edges().first(), Some(&(u64::from(PERIOD_US), true)));
        assert_eq!(pin.periods(), vec![(1500, 18_500); 2]);
    }

    #[test]
    fn position_change_mid_pulse_waits_for_next_period() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::with(ServoPosition::Center, true));
        let (mut scheduler, pin) = scheduler(&clock, &state);

        tick_for(&mut scheduler, &clock, 1200);
        assert!(scheduler.is_asserted());

        state.apply(InputEvent::NextPosition);
        assert_eq!(scheduler.latched_pulse_width(), 1500);

        tick_for(&mut scheduler, &clock, PERIOD_US - 1200 + PERIOD_US + 1);

        assert_eq!(pin.periods(), vec![(1500, 18_500), (2000, 18_000)]);
        assert_eq!(scheduler.latched_pulse_width(), 2000);
    }

    #[test]
    fn stopping_mid_pulse_forces_pin_low() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::with(ServoPosition::Far, true));
        let (mut scheduler, pin) = scheduler(&clock, &state);

        tick_for(&mut scheduler, &clock, 500);
        assert!(pin.is_high());

        state.apply(InputEvent::ToggleRun);
        tick_for(&mut scheduler, &clock, 1);
        assert!(!pin.is_high());
        assert_eq!(pin.edges(), vec![(0, true), (500, false)]);

        tick_for(&mut scheduler, &clock, 2 * PERIOD_US);
        assert_eq!(pin.edges().len(), 2);
    }

    #[test]
    fn counter_advance_by_wraps() {
        let mut counter = PeriodCounter::new();
        assert!(!counter.advance_by(PERIOD_US - 1));
        assert_eq!(counter.value(), PERIOD_US - 1);

        assert!(counter.advance_by(1));
        assert_eq!(counter.value(), 0);

        assert!(counter.advance_by(3 * PERIOD_US + 25));
        assert_eq!(counter.value(), 25);
    }

    #[test]
    fn skip_across_period_start_leaves_no_short_pulse() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::with(ServoPosition::Center, true));
        let (mut scheduler, pin) = scheduler(&clock, &state);

        // Stall 100 µs into the second pulse, for longer than a period
        tick_for(&mut scheduler, &clock, PERIOD_US + 100);
        assert!(pin.is_high());
        clock.advance_us(22_000);
        scheduler.skip(22_000);

        assert!(!pin.is_high());
        assert_eq!(scheduler.counter(), 2100);

        tick_for(&mut scheduler, &clock, 3 * PERIOD_US);

        let widths: Vec<u64> = pin.periods().iter().map(|&(high, _)| high).collect();
        assert_eq!(widths[0], 1500);
        // The stalled pulse is stretched, never cut short
        assert_eq!(widths[1], 22_100);
        assert!(widths[2..].iter().all(|&high| high == 1500));

        // Nothing rises before the next period start
        let resumed = u64::from(PERIOD_US) + 100 + 22_000;
        assert_eq!(clock.now_us(), resumed + 3 * u64::from(PERIOD_US));
        let next_rise = pin
            .edges()
            .into_iter()
            .find(|&(at, high)| high && at > resumed)
            .map(|(at, _)| at);
        assert_eq!(next_rise, Some(3 * u64::from(PERIOD_US)));
    }

    #[test]
    fn skip_within_period_keeps_or_ends_pulse() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::with(ServoPosition::Center, true));
        let (mut scheduler, pin) = scheduler(&clock, &state);

        tick_for(&mut scheduler, &clock, 100);
        clock.advance_us(400);
        scheduler.skip(400);
        assert!(pin.is_high());

        // Skipping past the falling edge ends the pulse right away
        clock.advance_us(1500);
        scheduler.skip(1500);
        assert!(!pin.is_high());
        assert_eq!(pin.edges(), vec![(0, true), (2000, false)]);

        tick_for(&mut scheduler, &clock, PERIOD_US - 2000 + 1);
        assert_eq!(pin.edges().last(), Some(&(u64::from(PERIOD_US), true)));
    }

    #[test]
    fn late_period_start_keeps_full_width() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::with(ServoPosition::Far, true));
        let (mut scheduler, pin) = scheduler(&clock, &state);

        tick_for(&mut scheduler, &clock, PERIOD_US - 5);
        clock.advance_us(10);
        scheduler.skip(10);

        let start = u64::from(PERIOD_US) + 5;
        assert!(pin.is_high());
        assert_eq!(pin.edges().last(), Some(&(start, true)));

        tick_for(&mut scheduler, &clock, PERIOD_US);
        assert_eq!(pin.edges()[3], (start + 2000, false));
        assert_eq!(pin.periods(), vec![(2000, 18_005), (2000, 17_995)]);
    }

    #[test]
    fn failed_low_write_is_retried() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::with(ServoPosition::Center, true));
        let (mut scheduler, pin) = scheduler(&clock, &state);

        tick_for(&mut scheduler, &clock, 500);
        assert!(pin.is_high());

        pin.fail_writes();
        state.apply(InputEvent::ToggleRun);
        tick_for(&mut scheduler, &clock, 1);
        assert!(pin.is_high());
        assert!(scheduler.is_asserted());
        assert_eq!(scheduler.fault(), Some(ErrorKind::Other));

        pin.restore_writes();
        tick_for(&mut scheduler, &clock, 1);
        assert!(!pin.is_high());
        assert!(!scheduler.is_asserted());
    }

    #[test]
    fn driver_emits_and_shuts_down_cleanly() {
        let clock = Clock::default();
        let pin = MockPin::new(&clock);
        let state = Arc::new(ServoState::with(ServoPosition::Near, true));
        let mut driver: StepDriver = TimerDriver::with_timer(pin.clone(), StepTimer::new());

        driver.start(&state).unwrap();
        step_driver(&mut driver, &clock, 2 * PERIOD_US + 400);
        assert!(pin.is_high());

        // Quit: stop signalling, then the timer is disabled, then the pin goes low
        state.apply(InputEvent::ToggleRun);
        driver.stop().unwrap();
        assert!(!driver.timer().is_running());
        assert!(!pin.is_high());

        let edges = pin.edges();
        assert_eq!(driver.timer_mut().step(PERIOD_US), 0);
        assert_eq!(pin.edges(), edges);
        assert_eq!(pin.periods(), vec![(1000, 19_000); 2]);
    }

    #[test]
    fn driver_can_be_restarted_from_counter_zero() {
        let clock = Clock::default();
        let pin = MockPin::new(&clock);
        let state = Arc::new(ServoState::with(ServoPosition::Center, true));
        let mut driver: StepDriver = TimerDriver::with_timer(pin.clone(), StepTimer::new());

        driver.start(&state).unwrap();
        step_driver(&mut driver, &clock, 5000);
        driver.stop().unwrap();

        driver.start(&state).unwrap();
        assert_eq!(driver.timer().handler().map(|s| s.counter()), Some(0));
        step_driver(&mut driver, &clock, 1);
        assert!(pin.is_high());
        driver.stop().unwrap();
    }

    #[test]
    fn second_start_is_rejected() {
        let clock = Clock::default();
        let state = Arc::new(ServoState::new());
        let mut driver: StepDriver =
            TimerDriver::with_timer(MockPin::new(&clock), StepTimer::new());

        driver.start(&state).unwrap();
        match driver.start(&state) {
            Err(Error::TimerRunning) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn tick_faults_are_reported_on_stop() {
        let clock = Clock::default();
        let pin = MockPin::new(&clock);
        let state = Arc::new(ServoState::with(ServoPosition::Center, true));
        let mut driver: StepDriver = TimerDriver::with_timer(pin.clone(), StepTimer::new());

        driver.start(&state).unwrap();
        pin.fail_writes();
        step_driver(&mut driver, &clock, 10);
        assert_eq!(
            driver.timer().handler().and_then(|s| s.fault()),
            Some(ErrorKind::Other)
        );

        match driver.stop() {
            Err(Error::Pin(ErrorKind::Other)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn service_does_not_block_or_write() {
        let clock = Clock::default();
        let pin = MockPin::new(&clock);
        let state = Arc::new(ServoState::with(ServoPosition::Center, true));
        let mut driver: StepDriver = TimerDriver::with_timer(pin.clone(), StepTimer::new());

        driver.start(&state).unwrap();
        driver.service(&state).unwrap();
        assert!(pin.edges().is_empty());
        assert_eq!(clock.now_us(), 0);
    }
}
