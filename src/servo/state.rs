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
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use super::ServoPosition;

/// Keys that can be pressed on the input device.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    Ok,
    Back,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Key::Left => write!(f, "Left"),
            Key::Right => write!(f, "Right"),
            Key::Up => write!(f, "Up"),
            Key::Down => write!(f, "Down"),
            Key::Ok => write!(f, "Ok"),
            Key::Back => write!(f, "Back"),
        }
    }
}

/// Discrete input events.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum InputEvent {
    /// Move one step toward `Near`.
    PreviousPosition,
    /// Move one step toward `Far`.
    NextPosition,
    /// Start or stop the PWM output.
    ToggleRun,
    /// Leave the control loop.
    Quit,
    /// Any other input. Ignored.
    Other,
}

impl From<Key> for InputEvent {
    fn from(key: Key) -> InputEvent {
        match key {
            Key::Left => InputEvent::PreviousPosition,
            Key::Right => InputEvent::NextPosition,
            Key::Ok => InputEvent::ToggleRun,
            Key::Back => InputEvent::Quit,
            Key::Up | Key::Down => InputEvent::Other,
        }
    }
}

/// Result of applying an [`InputEvent`].
///
/// [`InputEvent`]: enum.InputEvent.html
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Flow {
    Continue,
    Quit,
}

/// Point-in-time copy of a [`ServoState`].
///
/// [`ServoState`]: struct.ServoState.html
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub struct StateSnapshot {
    pub position: ServoPosition,
    pub running: bool,
}

/// Servo position and run flag, shared between the control loop and the
/// PWM output context.
///
/// The control loop is the only writer. Tick handlers only read. Both fields
/// are independent atomics, so no lock is involved on either side.
#[derive(Debug)]
pub struct ServoState {
    position: AtomicU8,
    running: AtomicBool,
}

impl ServoState {
    /// Constructs a new `ServoState` set to `Center`, stopped.
    pub fn new() -> ServoState {
        ServoState::with(ServoPosition::default(), false)
    }

    /// Constructs a new `ServoState` with the specified position and run flag.
    pub fn with(position: ServoPosition, running: bool) -> ServoState {
        ServoState {
            position: AtomicU8::new(position.index()),
            running: AtomicBool::new(running),
        }
    }

    /// Returns the current position.
    #[inline]
    pub fn position(&self) -> ServoPosition {
        ServoPosition::from_index(self.position.load(Ordering::Acquire))
    }

    /// Returns `true` if PWM output is enabled.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_position(&self, position: ServoPosition) {
        self.position.store(position.index(), Ordering::Release);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Returns a copy of both fields.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            position: self.position(),
            running: self.is_running(),
        }
    }

    /// Applies an input event.
    ///
    /// Position changes saturate at `Near` and `Far`. `ToggleRun` flips the
    /// run flag. `Quit` leaves the state untouched and returns [`Flow::Quit`].
    ///
    /// [`Flow::Quit`]: enum.Flow.html#variant.Quit
    pub fn apply(&self, event: InputEvent) -> Flow {
        match event {
            InputEvent::PreviousPosition => self.set_position(self.position().previous()),
            InputEvent::NextPosition => self.set_position(self.position().next()),
            InputEvent::ToggleRun => self.set_running(!self.is_running()),
            InputEvent::Quit => return Flow::Quit,
            InputEvent::Other => (),
        }

        Flow::Continue
    }
}

impl Default for ServoState {
    fn default() -> ServoState {
        ServoState::new()
    }
}
