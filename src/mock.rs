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

//! Recording pin and virtual-time delay used by the unit tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin};

/// Virtual clock in nanoseconds, shared by a `MockPin` and a `MockDelay`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Clock(Arc<AtomicU64>);

impl Clock {
    pub(crate) fn now_ns(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn now_us(&self) -> u64 {
        self.now_ns() / 1000
    }

    pub(crate) fn advance_ns(&self, ns: u64) {
        self.0.fetch_add(ns, Ordering::SeqCst);
    }

    pub(crate) fn advance_us(&self, us: u64) {
        self.advance_ns(us * 1000);
    }
}

#[derive(Debug, Default)]
struct PinLog {
    high: bool,
    // (timestamp in µs, new level)
    edges: Vec<(u64, bool)>,
    fail: bool,
}

#[derive(Debug)]
pub(crate) struct MockPinError;

impl digital::Error for MockPinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Output pin that records every level change against a `Clock`.
#[derive(Debug, Clone)]
pub(crate) struct MockPin {
    log: Arc<Mutex<PinLog>>,
    clock: Clock,
}

impl MockPin {
    pub(crate) fn new(clock: &Clock) -> MockPin {
        MockPin {
            log: Arc::new(Mutex::new(PinLog::default())),
            clock: clock.clone(),
        }
    }

    pub(crate) fn is_high(&self) -> bool {
        self.log.lock().unwrap().high
    }

    pub(crate) fn edges(&self) -> Vec<(u64, bool)> {
        self.log.lock().unwrap().edges.clone()
    }

    pub(crate) fn rising_edges(&self) -> usize {
        self.edges().iter().filter(|(_, high)| *high).count()
    }

    /// Makes every following write fail.
    pub(crate) fn fail_writes(&self) {
        self.log.lock().unwrap().fail = true;
    }

    /// Makes writes succeed again.
    pub(crate) fn restore_writes(&self) {
        self.log.lock().unwrap().fail = false;
    }

    /// Returns the (high, low) durations in µs of every complete period
    /// that starts with a rising edge.
    pub(crate) fn periods(&self) -> Vec<(u64, u64)> {
        let edges = self.edges();
        let rising: Vec<usize> = edges
            .iter()
            .enumerate()
            .filter(|(_, (_, high))| *high)
            .map(|(i, _)| i)
            .collect();

        rising
            .windows(2)
            .map(|w| {
                let start = edges[w[0]].0;
                let fall = edges[w[0] + 1].0;
                let next = edges[w[1]].0;
                (fall - start, next - fall)
            })
            .collect()
    }

    fn write(&mut self, high: bool) -> Result<(), MockPinError> {
        let mut log = self.log.lock().unwrap();
        if log.fail {
            return Err(MockPinError);
        }

        if log.high != high {
            log.high = high;
            let now = self.clock.now_us();
            log.edges.push((now, high));
        }

        Ok(())
    }
}

impl ErrorType for MockPin {
    type Error = MockPinError;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

/// Delay that advances a `Clock` instead of sleeping.
#[derive(Debug, Clone)]
pub(crate) struct MockDelay {
    clock: Clock,
}

impl MockDelay {
    pub(crate) fn new(clock: &Clock) -> MockDelay {
        MockDelay {
            clock: clock.clone(),
        }
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.clock.advance_ns(u64::from(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.clock.advance_us(u64::from(us));
    }
}
