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

//! Servo positions, pulse timing and the control loop.
//!
//! A hobby RC servo expects a pulse every 20 ms (50 Hz). The length of the
//! pulse selects the position the servo moves to. `servoctl` supports three
//! fixed positions:
//!
//! | Position | Pulse width | Duty cycle |
//! |----------|-------------|------------|
//! | [`Near`]   | 1000 µs     | 5%         |
//! | [`Center`] | 1500 µs     | 7.5%       |
//! | [`Far`]    | 2000 µs     | 10%        |
//!
//! [`pulse_width_for`] and [`idle_width_for`] split a single period into its
//! active and inactive parts, and [`PulseSchedule`] bundles both.
//!
//! The [`Controller`] ties a [`ServoState`], an [`OutputDriver`] and a
//! [`Presenter`] together. [`run`] is the blocking entry point that owns the
//! pin until the user quits.
//!
//! [`Near`]: enum.ServoPosition.html#variant.Near
//! [`Center`]: enum.ServoPosition.html#variant.Center
//! [`Far`]: enum.ServoPosition.html#variant.Far
//! [`pulse_width_for`]: fn.pulse_width_for.html
//! [`idle_width_for`]: fn.idle_width_for.html
//! [`PulseSchedule`]: struct.PulseSchedule.html
//! [`Controller`]: struct.Controller.html
//! [`ServoState`]: struct.ServoState.html
//! [`OutputDriver`]: ../pwm/trait.OutputDriver.html
//! [`Presenter`]: trait.Presenter.html
//! [`run`]: fn.run.html

use std::fmt;
use std::time::Duration;

mod controller;
mod display;
mod state;

pub use self::controller::{run, Controller, DriverKind, ServoConfig};
pub use self::display::{render, ChannelPresenter, DisplayFrame, Presenter};
pub use self::state::{Flow, InputEvent, Key, ServoState, StateSnapshot};

/// Length of a single PWM period in microseconds (50 Hz).
pub const PERIOD_US: u32 = 20_000;

/// Pulse width for [`ServoPosition::Near`] in microseconds.
///
/// [`ServoPosition::Near`]: enum.ServoPosition.html#variant.Near
pub const PULSE_NEAR_US: u32 = 1000;
/// Pulse width for [`ServoPosition::Center`] in microseconds.
///
/// [`ServoPosition::Center`]: enum.ServoPosition.html#variant.Center
pub const PULSE_CENTER_US: u32 = 1500;
/// Pulse width for [`ServoPosition::Far`] in microseconds.
///
/// [`ServoPosition::Far`]: enum.ServoPosition.html#variant.Far
pub const PULSE_FAR_US: u32 = 2000;

/// Servo positions.
#[derive(Debug, PartialEq, Eq, Copy, Clone, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ServoPosition {
    Near = 0,
    Center = 1,
    Far = 2,
}

impl ServoPosition {
    /// Returns the position's index (`Near` = 0, `Center` = 1, `Far` = 2).
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Returns the position for the specified index.
    ///
    /// Indices outside of `0..=2` fall back to [`Center`].
    ///
    /// [`Center`]: enum.ServoPosition.html#variant.Center
    #[inline]
    pub fn from_index(index: u8) -> ServoPosition {
        match index {
            0 => ServoPosition::Near,
            2 => ServoPosition::Far,
            _ => ServoPosition::Center,
        }
    }

    /// Returns the position one step closer to `Near`. Saturates at `Near`.
    pub fn previous(self) -> ServoPosition {
        match self {
            ServoPosition::Near | ServoPosition::Center => ServoPosition::Near,
            ServoPosition::Far => ServoPosition::Center,
        }
    }

    /// Returns the position one step closer to `Far`. Saturates at `Far`.
    pub fn next(self) -> ServoPosition {
        match self {
            ServoPosition::Near => ServoPosition::Center,
            ServoPosition::Center | ServoPosition::Far => ServoPosition::Far,
        }
    }

    /// Returns the label shown on the status display.
    pub fn label(self) -> &'static str {
        match self {
            ServoPosition::Near => "1000us (Left)",
            ServoPosition::Center => "1500us (Center)",
            ServoPosition::Far => "2000us (Right)",
        }
    }
}

impl Default for ServoPosition {
    fn default() -> ServoPosition {
        ServoPosition::Center
    }
}

impl fmt::Display for ServoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ServoPosition::Near => write!(f, "Near"),
            ServoPosition::Center => write!(f, "Center"),
            ServoPosition::Far => write!(f, "Far"),
        }
    }
}

/// Returns the active (high) part of a period in microseconds.
#[inline]
pub fn pulse_width_for(position: ServoPosition) -> u32 {
    match position {
        ServoPosition::Near => PULSE_NEAR_US,
        ServoPosition::Center => PULSE_CENTER_US,
        ServoPosition::Far => PULSE_FAR_US,
    }
}

/// Returns the inactive (low) part of a period in microseconds.
#[inline]
pub fn idle_width_for(position: ServoPosition) -> u32 {
    PERIOD_US - pulse_width_for(position)
}

/// Active and inactive durations for a single PWM period.
///
/// `high_us + low_us` always equals [`PERIOD_US`].
///
/// [`PERIOD_US`]: constant.PERIOD_US.html
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct PulseSchedule {
    high_us: u32,
    low_us: u32,
}

impl PulseSchedule {
    /// Constructs the `PulseSchedule` for the specified position.
    pub fn for_position(position: ServoPosition) -> PulseSchedule {
        PulseSchedule {
            high_us: pulse_width_for(position),
            low_us: idle_width_for(position),
        }
    }

    /// Returns the active part of the period in microseconds.
    #[inline]
    pub fn high_us(&self) -> u32 {
        self.high_us
    }

    /// Returns the inactive part of the period in microseconds.
    #[inline]
    pub fn low_us(&self) -> u32 {
        self.low_us
    }

    /// Returns the active part of the period.
    pub fn pulse_width(&self) -> Duration {
        Duration::from_micros(u64::from(self.high_us))
    }

    /// Returns the length of the full period.
    pub fn period(&self) -> Duration {
        Duration::from_micros(u64::from(PERIOD_US))
    }

    /// Returns the duty cycle as a value between `0.0` and `1.0`.
    pub fn duty_cycle(&self) -> f64 {
        f64::from(self.high_us) / f64::from(PERIOD_US)
    }
}
