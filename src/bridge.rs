//! High-level bridge between keypad and control box.
//!
//! The [`Bridge`] owns both links, the wake-up line and the actuator state.
//! Everything happens inside [`Bridge::poll`], which must be called
//! periodically (every 10 ms works well) with a monotonic timestamp:
//!
//! 1. Advance the wake-up line.
//! 2. Forward all frames from the control box to the keypad.
//! 3. Queue all frames from the keypad.
//! 4. Apply actuator timeouts.
//! 5. Write at most one frame to the control box: the due synthetic command
//!    if the control box is awake, otherwise the oldest keypad frame.

use crate::{
    Error, Result,
    actuator::{Actuator, Command, LiftOperation, Status},
    arbiter::{self, Arbiter, Decision},
    config::{Config, Preset},
    frame::{Buttons, Frame, FrameFormat, Height},
    link::{Event, LinkMonitor, Side, Signal},
    wake::{WakeController, WakeState},
};
use alloc::{string::String, vec::Vec};
use core::time::Duration;
use embedded_hal::digital::{self, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use log::{error, info};

/// Passthrough bridge with command injection.
pub struct Bridge<P, W> {
    format: FrameFormat,
    presets: Vec<Preset>,
    stop_button: Option<String>,
    wake_switch: Option<String>,
    keep_alive: Option<Duration>,
    keypad: LinkMonitor<P>,
    desk: LinkMonitor<P>,
    wake: WakeController<W>,
    actuator: Actuator,
    arbiter: Arbiter,
    last_sent: Option<Duration>,
    faulted: bool,
}

impl<P: Read + ReadReady + Write, W: OutputPin> Bridge<P, W> {
    /// Constructs a new bridge and drives the wake-up line low.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] or [`Error::InvalidPreset`] for an inconsistent configuration.
    /// - [`Error::WakePin`] if the wake-up line cannot be driven.
    pub fn new(config: Config, keypad: P, desk: P, wake_pin: W) -> Result<Self, P::Error> {
        config.validate()?;

        let presets = config.decode_presets()?;
        let timing = config.timing;
        let wake = WakeController::new(wake_pin, timing.wake_hold, timing.idle_timeout)
            .map_err(wake_error)?;

        for preset in &presets {
            info!(
                "Preset {} at memory position {}: {:02x?}",
                preset.name(),
                preset.slot(),
                preset.frame().as_bytes()
            );
        }

        Ok(Self {
            format: config.format,
            actuator: Actuator::new(timing, presets.iter().map(Preset::slot).collect()),
            presets,
            stop_button: config.stop_button,
            wake_switch: config.wake_switch,
            keep_alive: timing.keep_alive,
            keypad: LinkMonitor::new(Side::Keypad, config.format, keypad),
            desk: LinkMonitor::new(Side::Desk, config.format, desk),
            wake,
            arbiter: Arbiter::default(),
            last_sent: None,
            faulted: false,
        })
    }

    /// Runs one tick. Never blocks.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] or [`Error::WakePin`] on a hardware fault, after which
    ///   the bridge stops working.
    /// - [`Error::Unavailable`] on every call after a hardware fault.
    pub fn poll(&mut self, now: Duration) -> Result<(), P::Error> {
        if self.faulted {
            return Err(Error::Unavailable);
        }

        let res = self.tick(now);

        self.check_fault(&res);

        res
    }

    /// Starts or renews raising the desk.
    ///
    /// Must be renewed within the hold watchdog interval, otherwise the desk is stopped.
    pub fn raise(&mut self, now: Duration) {
        self.actuator.raise(now);
    }

    /// Starts or renews lowering the desk.
    ///
    /// Must be renewed within the hold watchdog interval, otherwise the desk is stopped.
    pub fn lower(&mut self, now: Duration) {
        self.actuator.lower(now);
    }

    /// Stops the desk.
    pub fn stop(&mut self, now: Duration) {
        self.actuator.stop(now);
    }

    /// Recalls a preset by name.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownPreset`] if no preset with that name is configured.
    pub fn press_preset(&mut self, name: &str, now: Duration) -> Result<(), P::Error> {
        let index = self
            .presets
            .iter()
            .position(|p| p.name() == name)
            .ok_or(Error::UnknownPreset)?;

        self.actuator.trigger_preset(index, now);

        Ok(())
    }

    /// Presses the "M" button, stopping the desk.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConfigured`] if no stop button is configured.
    pub fn press_stop_button(&mut self, now: Duration) -> Result<(), P::Error> {
        let name = self.stop_button.as_deref().ok_or(Error::NotConfigured)?;

        info!("{name} pressed");
        self.actuator.stop(now);

        Ok(())
    }

    /// Turns the wake-up switch on or off.
    ///
    /// Turning it on asserts the wake-up line and sends a wake-up frame.
    /// The line is released automatically after the hold duration.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConfigured`] if no wake-up switch is configured.
    /// - [`Error::WakePin`] if the wake-up line cannot be driven.
    pub fn set_wake_switch(&mut self, on: bool, now: Duration) -> Result<(), P::Error> {
        let name = self.wake_switch.as_deref().ok_or(Error::NotConfigured)?;

        info!("{name} turned {}", if on { "on" } else { "off" });

        if !on {
            return Ok(());
        }

        let res = self.wake.pulse(now).map_err(wake_error);

        self.check_fault(&res);
        res?;
        self.actuator.wake_up();

        Ok(())
    }

    /// Returns the actuator status.
    pub fn status(&self) -> Status {
        self.actuator.status()
    }

    /// Returns the current motion as a lift operation.
    pub fn operation(&self) -> LiftOperation {
        self.actuator.operation()
    }

    /// Returns the last height reported by the control box.
    pub fn height(&self) -> Option<Height> {
        self.actuator.height()
    }

    /// Returns the presumed state of the control box.
    pub fn wake_state(&self) -> WakeState {
        self.wake.state()
    }

    /// Returns `true` while the wake-up line is asserted.
    pub fn wake_switch_state(&self) -> bool {
        self.wake.is_asserted()
    }

    /// Returns `false` after a hardware fault.
    pub fn is_available(&self) -> bool {
        !self.faulted
    }

    /// Returns the configured presets.
    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    fn tick(&mut self, now: Duration) -> Result<(), P::Error> {
        self.wake.update(now).map_err(wake_error)?;

        for event in self.desk.poll(now)? {
            let frame = match event {
                Event::Recognized {
                    frame,
                    signal: Signal::Height(height),
                } => {
                    self.actuator.observe_height(height, now);
                    frame
                }
                Event::Recognized { frame, .. } | Event::Unrecognized(frame) => frame,
                Event::Malformed(_) => continue,
            };

            self.keypad.send(&frame)?;
        }

        // Any bytes from the control box, even partial frames, mean it is awake
        if self.desk.last_activity() == Some(now) {
            self.wake.note_activity(now);
        }

        for event in self.keypad.poll(now)? {
            if let Event::Recognized { frame, .. } | Event::Unrecognized(frame) = event {
                self.arbiter.enqueue(frame);
            }
        }

        self.actuator.update(now);

        if let Some(interval) = self.keep_alive
            && matches!(self.actuator.status(), Status::Idle | Status::StoppedByUser)
            && self
                .last_sent
                .is_none_or(|t| now.saturating_sub(t) >= interval)
        {
            self.actuator.wake_up();
        }

        let pending = self.actuator.pending(now);
        let ready = match pending {
            Some(_) => self.wake.ensure_awake(now).map_err(wake_error)?,
            None => false,
        };

        match arbiter::decide(pending, ready, self.arbiter.is_queued()) {
            Decision::Inject(cmd) => {
                self.arbiter.discard();

                if let Some(frame) = self.command_frame(cmd) {
                    self.send(&frame, now)?;
                }

                self.actuator.commit(cmd, now);
            }
            Decision::Forward => {
                if let Some(frame) = self
                    .arbiter
                    .next_forward(self.actuator.is_synthetic_hold())
                {
                    self.send(&frame, now)?;

                    if let Some(buttons) = frame.buttons() {
                        self.actuator.observe_buttons(buttons, now);
                    }
                }
            }
            Decision::Idle => {}
        }

        Ok(())
    }

    fn send(&mut self, frame: &Frame, now: Duration) -> Result<(), P::Error> {
        self.desk.send(frame)?;
        self.wake.note_activity(now);
        self.last_sent = Some(now);

        Ok(())
    }

    fn command_frame(&self, cmd: Command) -> Option<Frame> {
        let buttons = match cmd {
            Command::Up => Buttons::Up,
            Command::Down => Buttons::Down,
            Command::Stop => Buttons::Memory,
            Command::WakeUp => Buttons::empty(),
            Command::Preset(index) => return self.presets.get(index).map(|p| p.frame().clone()),
        };

        Some(self.format.command(buttons))
    }

    fn check_fault<T>(&mut self, res: &Result<T, P::Error>) {
        if let Err(err) = res
            && err.is_hardware_fault()
        {
            error!("Hardware fault, bridge unavailable: {err}");
            self.faulted = true;
        }
    }
}

fn wake_error<E, T: digital::Error>(err: T) -> Error<E> {
    Error::WakePin(err.kind())
}
