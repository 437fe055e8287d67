//! Wake-up line control.
//!
//! A sleeping control box ignores injected frames until its wake-up line
//! has been held high for a while. The [`WakeController`] tracks whether the
//! box is presumed awake and drives the line without ever blocking:
//!
//! ```text
//! asleep --ensure_awake--> waking --hold elapsed--> awake --idle timeout--> asleep
//! ```

use core::time::Duration;
use embedded_hal::digital::OutputPin;
use log::debug;
use strum::Display;

/// Presumed state of the control box.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum WakeState {
    /// No recent link activity. Commands would be ignored.
    Asleep,
    /// Wake-up line asserted, waiting for the hold duration to elapse.
    Waking,
    /// Commands are honored.
    Awake,
}

/// Drives the wake-up line of the control box.
#[derive(Debug)]
pub struct WakeController<P> {
    pin: P,
    state: WakeState,
    asserted_at: Option<Duration>,
    last_activity: Option<Duration>,
    hold: Duration,
    idle_timeout: Duration,
}

impl<P: OutputPin> WakeController<P> {
    /// Constructs a new controller and drives the wake-up line low.
    ///
    /// The control box is presumed asleep until link activity is observed.
    pub fn new(mut pin: P, hold: Duration, idle_timeout: Duration) -> Result<Self, P::Error> {
        pin.set_low()?;

        Ok(Self {
            pin,
            state: WakeState::Asleep,
            asserted_at: None,
            last_activity: None,
            hold,
            idle_timeout,
        })
    }

    /// Returns the presumed state of the control box.
    pub fn state(&self) -> WakeState {
        self.state
    }

    /// Returns `true` while the wake-up line is held high.
    pub fn is_asserted(&self) -> bool {
        self.asserted_at.is_some()
    }

    /// Records traffic on either link, which keeps the control box awake.
    pub fn note_activity(&mut self, now: Duration) {
        self.last_activity = Some(now);

        if self.state == WakeState::Asleep {
            debug!("Control box is awake due to link activity");
            self.state = WakeState::Awake;
        }
    }

    /// Advances the state machine, releasing the wake-up line once the hold duration elapsed.
    pub fn update(&mut self, now: Duration) -> Result<(), P::Error> {
        if let Some(since) = self.asserted_at
            && now.saturating_sub(since) >= self.hold
        {
            self.pin.set_low()?;
            self.asserted_at = None;
            self.last_activity = Some(now);
            debug!("Wake-up line released");

            if self.state == WakeState::Waking {
                self.state = WakeState::Awake;
            }
        }

        if self.state == WakeState::Awake
            && self
                .last_activity
                .is_none_or(|t| now.saturating_sub(t) >= self.idle_timeout)
        {
            debug!("Control box presumed asleep");
            self.state = WakeState::Asleep;
        }

        Ok(())
    }

    /// Checks whether commands can be sent now.
    ///
    /// If the control box is asleep, the wake-up line is asserted and `false` is
    /// returned. The caller must retry on a later tick instead of waiting.
    pub fn ensure_awake(&mut self, now: Duration) -> Result<bool, P::Error> {
        match self.state {
            WakeState::Awake => Ok(true),
            WakeState::Waking => Ok(false),
            WakeState::Asleep => {
                self.assert(now)?;
                self.state = WakeState::Waking;

                Ok(false)
            }
        }
    }

    /// Asserts the wake-up line for the hold duration, regardless of the current state.
    pub fn pulse(&mut self, now: Duration) -> Result<(), P::Error> {
        self.assert(now)?;

        if self.state == WakeState::Asleep {
            self.state = WakeState::Waking;
        }

        Ok(())
    }

    /// Releases the wake-up pin.
    pub fn free(self) -> P {
        self.pin
    }

    fn assert(&mut self, now: Duration) -> Result<(), P::Error> {
        if self.asserted_at.is_none() {
            self.pin.set_high()?;
            debug!("Wake-up line asserted");
        }

        self.asserted_at = Some(now);

        Ok(())
    }
}
