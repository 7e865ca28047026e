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

// Prevent warning when casting u32 as i64
#![allow(clippy::cast_lossless)]

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use libc::{
    self, c_long, sched_param, time_t, timespec, CLOCK_MONOTONIC, PR_SET_TIMERSLACK, SCHED_RR,
};
use log::{info, warn};

use super::{Error, Result};

/// Tick rate of the periodic timer driving the edge scheduler (1 MHz).
pub const TICK_HZ: u32 = 1_000_000;

// Only call sleep_ns() if we have enough time remaining
const SLEEP_THRESHOLD: i64 = 250_000;
// Reserve some time for busy waiting
const BUSYWAIT_MAX: i64 = 200_000;

/// Callback invoked by a [`PeriodicTimer`] on every tick.
///
/// [`PeriodicTimer`]: trait.PeriodicTimer.html
pub trait Tick {
    fn tick(&mut self);

    /// Called instead of [`tick`] for `ticks` ticks the timer was unable to
    /// deliver on time. The next call to `tick` is on schedule again.
    ///
    /// The default implementation replays every missed tick.
    ///
    /// [`tick`]: #tymethod.tick
    fn skip(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
        }
    }
}

/// A periodic timer that calls a [`Tick`] handler at a fixed rate.
///
/// The timer takes ownership of the handler while it's running, and gives it
/// back from [`stop`] once the handler can no longer be called.
///
/// [`Tick`]: trait.Tick.html
/// [`stop`]: #tymethod.stop
pub trait PeriodicTimer<H: Tick> {
    /// Starts calling `handler` `frequency_hz` times per second.
    ///
    /// Returns `Err(`[`Error::TimerRunning`]`)` if the timer was already started.
    ///
    /// [`Error::TimerRunning`]: enum.Error.html#variant.TimerRunning
    fn start(&mut self, frequency_hz: u32, handler: H) -> Result<()>;

    /// Disables the timer and returns its handler.
    ///
    /// Returns `Ok(None)` if the timer wasn't running.
    fn stop(&mut self) -> Result<Option<H>>;

    /// Returns `true` if the timer is running.
    fn is_running(&self) -> bool;
}

/// Emulates a hardware timer with a dedicated thread.
///
/// The thread is set to real-time round robin scheduling at the highest
/// priority if the process has the required privileges. Ticks are aligned to
/// `CLOCK_MONOTONIC` deadlines. When the thread falls behind, for instance
/// after being preempted, all but the latest due tick are handed to
/// [`Tick::skip`] in a single call, so handlers that count ticks stay in phase
/// with the wall clock without replaying stale edges.
///
/// [`Tick::skip`]: trait.Tick.html#method.skip
#[derive(Debug)]
pub struct ThreadTimer<H> {
    timer_thread: Option<thread::JoinHandle<H>>,
    stop: Arc<AtomicBool>,
}

impl<H> ThreadTimer<H> {
    /// Constructs a new, stopped `ThreadTimer`.
    pub fn new() -> ThreadTimer<H> {
        ThreadTimer {
            timer_thread: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<H> Default for ThreadTimer<H> {
    fn default() -> ThreadTimer<H> {
        ThreadTimer::new()
    }
}

impl<H: Tick + Send + 'static> PeriodicTimer<H> for ThreadTimer<H> {
    fn start(&mut self, frequency_hz: u32, handler: H) -> Result<()> {
        if self.timer_thread.is_some() {
            return Err(Error::TimerRunning);
        }

        if frequency_hz == 0 || frequency_hz > 1_000_000_000 {
            return Err(Error::HardwareInit(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported timer frequency: {} Hz", frequency_hz),
            )));
        }

        let tick_ns = 1_000_000_000 / frequency_hz as i64;

        self.stop.store(false, Ordering::SeqCst);
        let stop = self.stop.clone();

        let timer_thread = thread::Builder::new()
            .name("servo-timer".to_owned())
            .spawn(move || run_timer(handler, tick_ns, &stop))
            .map_err(Error::HardwareInit)?;

        self.timer_thread = Some(timer_thread);
        info!("Timer started at {} Hz", frequency_hz);

        Ok(())
    }

    fn stop(&mut self) -> Result<Option<H>> {
        self.stop.store(true, Ordering::SeqCst);

        match self.timer_thread.take() {
            Some(timer_thread) => match timer_thread.join() {
                Ok(handler) => {
                    info!("Timer stopped");
                    Ok(Some(handler))
                }
                Err(_) => Err(Error::ThreadPanic),
            },
            None => Ok(None),
        }
    }

    fn is_running(&self) -> bool {
        self.timer_thread.is_some()
    }
}

impl<H> Drop for ThreadTimer<H> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);

        // Don't wait for the timer thread to exit if the main thread is panicking,
        // because we could potentially block indefinitely while unwinding.
        if !thread::panicking() {
            if let Some(timer_thread) = self.timer_thread.take() {
                let _ = timer_thread.join();
            }
        }
    }
}

fn run_timer<H: Tick>(mut handler: H, tick_ns: i64, stop: &AtomicBool) -> H {
    set_realtime_priority();

    let start_ns = get_time_ns();
    let mut ticks: i64 = 0;

    while !stop.load(Ordering::SeqCst) {
        let due = (get_time_ns() - start_ns) / tick_ns;
        if ticks <= due {
            // Anything older than the latest due tick was missed while preempted
            let missed = due - ticks;
            if missed > 0 {
                handler.skip(missed.min(i64::from(u32::MAX)) as u32);
                ticks = due;
            }

            handler.tick();
            ticks += 1;
        }

        // Sleep if we have enough time remaining, while reserving some time
        // for busy waiting to compensate for sleep taking longer than needed.
        let remaining_ns = start_ns + ticks * tick_ns - get_time_ns();
        if remaining_ns >= SLEEP_THRESHOLD {
            sleep_ns(remaining_ns - BUSYWAIT_MAX);
        } else {
            std::hint::spin_loop();
        }
    }

    handler
}

fn set_realtime_priority() {
    // Set the scheduling policy to real-time round robin at the highest priority.
    // sched_param has additional fields on musl, which are left zeroed.
    let mut params: sched_param = unsafe { std::mem::zeroed() };
    params.sched_priority = unsafe { libc::sched_get_priority_max(SCHED_RR) };

    if let Err(err) = parse_retval!(unsafe { libc::sched_setscheduler(0, SCHED_RR, &params) }) {
        warn!("Unable to enable real-time scheduling for the timer thread: {}", err);
    }

    // Set timer slack to 1 ns (default = 50 µs). This is only relevant if we're unable
    // to set a real-time scheduling policy.
    unsafe {
        libc::prctl(PR_SET_TIMERSLACK, 1);
    }
}

#[inline(always)]
fn get_time_ns() -> i64 {
    let mut ts = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    unsafe {
        libc::clock_gettime(CLOCK_MONOTONIC, &mut ts);
    }

    (ts.tv_sec as i64 * 1_000_000_000) + ts.tv_nsec as i64
}

#[inline(always)]
fn sleep_ns(ns: i64) {
    let ts = timespec {
        tv_sec: (ns / 1_000_000_000) as time_t,
        tv_nsec: (ns % 1_000_000_000) as c_long,
    };

    unsafe {
        libc::clock_nanosleep(CLOCK_MONOTONIC, 0, &ts, ptr::null_mut());
    }
}

/// Timer that only ticks when told to.
///
/// `StepTimer` delivers ticks synchronously from [`step`]. It's used to
/// simulate the PWM output without hardware, and to test tick handlers
/// deterministically.
///
/// [`step`]: #method.step
#[derive(Debug)]
pub struct StepTimer<H> {
    handler: Option<H>,
    ticks: u64,
}

impl<H: Tick> StepTimer<H> {
    /// Constructs a new, stopped `StepTimer`.
    pub fn new() -> StepTimer<H> {
        StepTimer {
            handler: None,
            ticks: 0,
        }
    }

    /// Delivers `ticks` ticks to the handler. Returns the number of ticks
    /// delivered, which is 0 if the timer isn't running.
    pub fn step(&mut self, ticks: u32) -> u32 {
        match self.handler {
            Some(ref mut handler) => {
                for _ in 0..ticks {
                    handler.tick();
                }
                self.ticks += u64::from(ticks);

                ticks
            }
            None => 0,
        }
    }

    /// Returns the number of ticks delivered since the timer was started.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Returns a reference to the handler while the timer is running.
    pub fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }
}

impl<H: Tick> Default for StepTimer<H> {
    fn default() -> StepTimer<H> {
        StepTimer::new()
    }
}

impl<H: Tick> PeriodicTimer<H> for StepTimer<H> {
    fn start(&mut self, _frequency_hz: u32, handler: H) -> Result<()> {
        if self.handler.is_some() {
            return Err(Error::TimerRunning);
        }

        self.handler = Some(handler);
        self.ticks = 0;

        Ok(())
    }

    fn stop(&mut self) -> Result<Option<H>> {
        Ok(self.handler.take())
    }

    fn is_running(&self) -> bool {
        self.handler.is_some()
    }
}
