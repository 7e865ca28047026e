//! `servoctl` drives a hobby RC servo with a 50 Hz PWM signal generated in
//! software on a single GPIO pin.
//!
//! The pulse width is selected from three fixed positions (1000 µs, 1500 µs
//! and 2000 µs), and output can be started and stopped at any time. Pulses
//! are either timed by blocking the control loop ([`BusyWaitDriver`]), or
//! scheduled edge by edge from a 1 MHz periodic timer ([`TimerDriver`]).
//!
//! Output drivers work with any `embedded-hal` v1.0.0 [`OutputPin`]. On
//! Linux, [`SysfsOutputPin`] provides access to GPIO pins through sysfs.
//!
//! [`servo::run`] is the blocking entry point. It owns the pin, reads input
//! events from a [`Presenter`] and redraws a small status display until the
//! user quits.
//!
//! [`BusyWaitDriver`]: pwm/struct.BusyWaitDriver.html
//! [`TimerDriver`]: pwm/struct.TimerDriver.html
//! [`OutputPin`]: ../embedded_hal/digital/trait.OutputPin.html
//! [`SysfsOutputPin`]: gpio/struct.SysfsOutputPin.html
//! [`servo::run`]: servo/fn.run.html
//! [`Presenter`]: servo/trait.Presenter.html

#[macro_use]
mod macros;

pub mod gpio;
pub mod hal;
#[cfg(test)]
mod mock;
pub mod pwm;
pub mod servo;
