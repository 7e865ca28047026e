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
use std::io::{self, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use super::state::{InputEvent, StateSnapshot};

/// Text lines making up one screen of the status display.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DisplayFrame {
    lines: Vec<String>,
}

impl DisplayFrame {
    /// Returns the frame's lines, top to bottom.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for DisplayFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }

        Ok(())
    }
}

/// Renders the status display for `state`, driving the specified GPIO pin.
pub fn render(state: &StateSnapshot, pin: u8) -> DisplayFrame {
    let status = if state.running {
        "Status: Running"
    } else {
        "Status: Stopped"
    };

    DisplayFrame {
        lines: vec![
            format!("Servo Control - GPIO {}", pin),
            format!("Position: {}", state.position.label()),
            "LEFT/RIGHT: Change position".to_owned(),
            "OK: Toggle output".to_owned(),
            "BACK: Exit".to_owned(),
            status.to_owned(),
        ],
    }
}

/// Screen and input device used by the control loop.
pub trait Presenter {
    /// Shows `frame`. Called once per control loop iteration.
    fn present(&mut self, frame: &DisplayFrame) -> io::Result<()>;

    /// Waits up to `timeout` for the next input event.
    fn next_input_event(&mut self, timeout: Duration) -> Option<InputEvent>;
}

impl<T: Presenter + ?Sized> Presenter for &mut T {
    fn present(&mut self, frame: &DisplayFrame) -> io::Result<()> {
        (**self).present(frame)
    }

    fn next_input_event(&mut self, timeout: Duration) -> Option<InputEvent> {
        (**self).next_input_event(timeout)
    }
}

impl<T: Presenter + ?Sized> Presenter for Box<T> {
    fn present(&mut self, frame: &DisplayFrame) -> io::Result<()> {
        (**self).present(frame)
    }

    fn next_input_event(&mut self, timeout: Duration) -> Option<InputEvent> {
        (**self).next_input_event(timeout)
    }
}

/// `Presenter` that receives input events through a channel, and writes
/// frames to `W` whenever they change.
///
/// If every sender has been dropped, [`next_input_event`] returns
/// `InputEvent::Quit`.
///
/// [`next_input_event`]: trait.Presenter.html#tymethod.next_input_event
#[derive(Debug)]
pub struct ChannelPresenter<W> {
    events: Receiver<InputEvent>,
    out: W,
    last_frame: Option<DisplayFrame>,
}

impl<W: Write> ChannelPresenter<W> {
    /// Constructs a new `ChannelPresenter`.
    pub fn new(events: Receiver<InputEvent>, out: W) -> ChannelPresenter<W> {
        ChannelPresenter {
            events,
            out,
            last_frame: None,
        }
    }

    /// Consumes the presenter and returns its writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Presenter for ChannelPresenter<W> {
    fn present(&mut self, frame: &DisplayFrame) -> io::Result<()> {
        if self.last_frame.as_ref() == Some(frame) {
            return Ok(());
        }

        writeln!(self.out, "{}", frame)?;
        self.out.flush()?;
        self.last_frame = Some(frame.clone());

        Ok(())
    }

    fn next_input_event(&mut self, timeout: Duration) -> Option<InputEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(InputEvent::Quit),
        }
    }
}
