//! Actuator state machine.
//!
//! Translates collaborator intents (raise, lower, stop, presets, wake-up) into
//! commands for the desk link and reflects the observed traffic of both links
//! back into a [`Status`]. Physical keypad presses update the status the same
//! way synthetic commands do.
//!
//! The state machine never performs I/O. The owner asks for the command due
//! on the current tick using [`Actuator::pending`] and reports it as sent
//! using [`Actuator::commit`].

use crate::{
    config::Timing,
    frame::{Buttons, Height},
};
use alloc::vec::Vec;
use core::{cmp::Ordering, time::Duration};
use log::{debug, info, warn};
use strum::Display;

/// Observable actuator status.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    /// Desk is not moving.
    Idle,
    /// Desk is moving up.
    MovingUp,
    /// Desk is moving down.
    MovingDown,
    /// Motion was stopped on request.
    StoppedByUser,
    /// Desk is moving towards a memory position (1 to 4).
    PresetActive(u8),
}

/// Lift-style view of the desk motion.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum LiftOperation {
    /// Not moving.
    Idle,
    /// Moving up.
    Raising,
    /// Moving down.
    Lowering,
}

/// Command to be sent to the control box.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    /// Up button frame.
    Up,
    /// Down button frame.
    Down,
    /// "M" button frame, stopping the desk.
    Stop,
    /// Configured preset with the given index.
    Preset(usize),
    /// Empty button frame, waking up the control box.
    WakeUp,
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn status(self) -> Status {
        match self {
            Self::Up => Status::MovingUp,
            Self::Down => Status::MovingDown,
        }
    }

    fn command(self) -> Command {
        match self {
            Self::Up => Command::Up,
            Self::Down => Command::Down,
        }
    }
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum Origin {
    /// Requested by the collaborator, repeated by the bridge.
    Synthetic,
    /// Held on the keypad, repeated by the keypad itself.
    Physical,
}

#[derive(Copy, Clone, Debug)]
struct Hold {
    direction: Direction,
    origin: Origin,
    renewed: Duration,
    last_sent: Option<Duration>,
}

/// Height tracking of a motion in progress.
#[derive(Copy, Clone, Debug)]
struct Motion {
    last_change: Option<Duration>,
    trend: LiftOperation,
}

impl Motion {
    const STARTED: Self = Self {
        last_change: None,
        trend: LiftOperation::Idle,
    };
}

/// Actuator state machine.
#[derive(Debug)]
pub struct Actuator {
    timing: Timing,
    preset_slots: Vec<u8>,
    status: Status,
    hold: Option<Hold>,
    motion: Option<Motion>,
    height: Option<Height>,
    stop_latched: bool,
    stop_pending: bool,
    preset_pending: Option<usize>,
    preset_started: Option<Duration>,
    wake_pending: bool,
}

impl Actuator {
    /// Constructs a new idle actuator.
    ///
    /// `preset_slots` holds the memory slot of each configured preset, by index.
    pub fn new(timing: Timing, preset_slots: Vec<u8>) -> Self {
        Self {
            timing,
            preset_slots,
            status: Status::Idle,
            hold: None,
            motion: None,
            height: None,
            stop_latched: false,
            stop_pending: false,
            preset_pending: None,
            preset_started: None,
            wake_pending: false,
        }
    }

    /// Returns the current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Returns the current motion as a lift operation.
    ///
    /// While a preset is active, the direction is derived from the reported height.
    pub fn operation(&self) -> LiftOperation {
        match self.status {
            Status::MovingUp => LiftOperation::Raising,
            Status::MovingDown => LiftOperation::Lowering,
            Status::PresetActive(_) => self.motion.map_or(LiftOperation::Idle, |m| m.trend),
            Status::Idle | Status::StoppedByUser => LiftOperation::Idle,
        }
    }

    /// Returns the last height reported by the control box.
    pub fn height(&self) -> Option<Height> {
        self.height
    }

    /// Returns `true` while a collaborator-requested raise or lower is in progress.
    pub fn is_synthetic_hold(&self) -> bool {
        self.hold.is_some_and(|h| h.origin == Origin::Synthetic)
    }

    /// Starts or renews raising the desk.
    ///
    /// Must be called repeatedly, at least once per hold watchdog interval.
    pub fn raise(&mut self, now: Duration) {
        self.hold_intent(Direction::Up, now);
    }

    /// Starts or renews lowering the desk.
    ///
    /// Must be called repeatedly, at least once per hold watchdog interval.
    pub fn lower(&mut self, now: Duration) {
        self.hold_intent(Direction::Down, now);
    }

    /// Stops any motion.
    ///
    /// Exactly one stop command is queued. Raise and lower renewals are
    /// ignored until the next [`Actuator::update`].
    pub fn stop(&mut self, now: Duration) {
        info!("Stop requested");

        self.stop_latched = true;
        self.stop_pending = true;
        self.preset_pending = None;
        self.end_motion(Status::StoppedByUser);
    }

    /// Recalls the preset with the given index.
    pub fn trigger_preset(&mut self, index: usize, now: Duration) {
        let slot = self.preset_slots.get(index).copied().unwrap_or(0);

        info!("Preset {index} requested (memory position {slot})");

        self.hold = None;
        self.preset_pending = Some(index);
        self.start_preset(slot, now);
    }

    /// Queues a wake-up frame.
    pub fn wake_up(&mut self) {
        self.wake_pending = true;
    }

    /// Returns the command due on this tick, without consuming it.
    ///
    /// Priority order is stop, preset, hold repeat and finally wake-up.
    pub fn pending(&self, now: Duration) -> Option<Command> {
        if self.stop_pending {
            return Some(Command::Stop);
        }

        if let Some(index) = self.preset_pending {
            return Some(Command::Preset(index));
        }

        if let Some(hold) = self.hold
            && hold.origin == Origin::Synthetic
            && hold
                .last_sent
                .is_none_or(|t| now.saturating_sub(t) >= self.timing.repeat_interval)
        {
            return Some(hold.direction.command());
        }

        self.wake_pending.then_some(Command::WakeUp)
    }

    /// Records that a command returned by [`Actuator::pending`] was sent.
    pub fn commit(&mut self, cmd: Command, now: Duration) {
        debug!("Sent command: {cmd}");

        match cmd {
            Command::Stop => self.stop_pending = false,
            Command::Preset(_) => self.preset_pending = None,
            Command::Up | Command::Down => {
                if let Some(hold) = &mut self.hold {
                    hold.last_sent = Some(now);
                }
            }
            Command::WakeUp => self.wake_pending = false,
        }
    }

    /// Applies the hold watchdog, the preset timeout and motion completion.
    ///
    /// Marks the start of a tick, so renewals after this call may start a new hold.
    pub fn update(&mut self, now: Duration) {
        self.stop_latched = false;

        if let Some(hold) = self.hold
            && now.saturating_sub(hold.renewed) > self.timing.hold_watchdog
        {
            match hold.origin {
                Origin::Synthetic => {
                    warn!("Hold not renewed in time, stopping");
                    self.stop_pending = true;
                }
                Origin::Physical => debug!("Keypad hold ended"),
            }

            self.end_motion(Status::Idle);
        }

        if let Some(started) = self.preset_started
            && now.saturating_sub(started) >= self.timing.preset_timeout
        {
            debug!("Preset timed out");
            self.end_motion(Status::Idle);
        }

        if let Some(Motion {
            last_change: Some(changed),
            ..
        }) = self.motion
            && now.saturating_sub(changed) >= self.timing.settle_interval
        {
            debug!("Height settled, motion finished");
            self.end_motion(Status::Idle);
        }
    }

    /// Reflects a button frame forwarded from the keypad.
    ///
    /// A pending wake-up frame is dropped, since the forwarded frame wakes the control box.
    pub fn observe_buttons(&mut self, buttons: Buttons, now: Duration) {
        self.wake_pending = false;

        if buttons.is_empty() {
            if self.hold.is_some_and(|h| h.origin == Origin::Physical) {
                debug!("Keypad button released");
                self.end_motion(Status::Idle);
            }
        } else if buttons == Buttons::Up {
            self.physical_hold(Direction::Up, now);
        } else if buttons == Buttons::Down {
            self.physical_hold(Direction::Down, now);
        } else if buttons == Buttons::Memory {
            // Also interrupts a preset in progress
            if self.status != Status::Idle {
                debug!("Keypad stop pressed");
                self.end_motion(Status::StoppedByUser);
            }
        } else if let Some(slot) = buttons.preset_slot() {
            if self.status != Status::PresetActive(slot) {
                debug!("Keypad preset {slot} pressed");
                self.hold = None;
                self.start_preset(slot, now);
            }
        } else {
            debug!("Ignoring keypad buttons: {buttons}");
        }
    }

    /// Reflects a height frame received from the control box.
    pub fn observe_height(&mut self, height: Height, now: Duration) {
        if let Some(prev) = self.height
            && prev != height
            && let Some(motion) = &mut self.motion
        {
            motion.last_change = Some(now);
            motion.trend = match height.cmp(&prev) {
                Ordering::Greater => LiftOperation::Raising,
                Ordering::Less => LiftOperation::Lowering,
                Ordering::Equal => motion.trend,
            };
        }

        if self.height != Some(height) {
            debug!("Height: {height}");
        }

        self.height = Some(height);
    }

    fn hold_intent(&mut self, direction: Direction, now: Duration) {
        if self.stop_latched {
            debug!("Ignoring hold renewal issued after stop");
            return;
        }

        match &mut self.hold {
            Some(hold) if hold.origin == Origin::Physical => {
                debug!("Ignoring hold request while keypad is held");
            }
            Some(hold) if hold.direction == direction => hold.renewed = now,
            _ => {
                info!("Hold requested: {}", direction.status());

                self.hold = Some(Hold {
                    direction,
                    origin: Origin::Synthetic,
                    renewed: now,
                    last_sent: None,
                });
                self.start_motion(direction.status());
            }
        }
    }

    fn physical_hold(&mut self, direction: Direction, now: Duration) {
        match &mut self.hold {
            Some(hold) if hold.origin == Origin::Physical && hold.direction == direction => {
                hold.renewed = now;
            }
            _ => {
                debug!("Keypad hold: {}", direction.status());

                self.hold = Some(Hold {
                    direction,
                    origin: Origin::Physical,
                    renewed: now,
                    last_sent: None,
                });
                self.start_motion(direction.status());
            }
        }
    }

    fn start_preset(&mut self, slot: u8, now: Duration) {
        self.start_motion(Status::PresetActive(slot));
        self.preset_started = Some(now);
    }

    fn start_motion(&mut self, status: Status) {
        self.status = status;
        self.motion = Some(Motion::STARTED);
        self.preset_started = None;
    }

    fn end_motion(&mut self, status: Status) {
        self.status = status;
        self.hold = None;
        self.motion = None;
        self.preset_started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::init_logger;
    use alloc::vec;

    const TICK: u64 = 10;

    fn ms(val: u64) -> Duration {
        Duration::from_millis(val)
    }

    fn actuator() -> Actuator {
        Actuator::new(Timing::default(), vec![1, 3])
    }

    /// Sends the pending command, if any, like the bridge does on every tick.
    fn tick(act: &mut Actuator, now: Duration) -> Option<Command> {
        act.update(now);

        let cmd = act.pending(now)?;

        act.commit(cmd, now);

        Some(cmd)
    }

    #[test]
    fn hold_repeats() {
        init_logger();

        let mut act = actuator();
        let mut sent = Vec::new();

        // Renewed on every tick for one second
        for t in (0..1000).step_by(TICK as usize) {
            act.raise(ms(t));
            sent.extend(tick(&mut act, ms(t)));
        }

        assert_eq!(act.status(), Status::MovingUp);
        assert_eq!(act.operation(), LiftOperation::Raising);

        let repeats = sent.iter().filter(|&&cmd| cmd == Command::Up).count();

        assert!(
            (9..=11).contains(&repeats),
            "repeat count should match hold duration, got {repeats}"
        );
        assert_eq!(repeats, sent.len(), "only up commands should be sent");

        act.stop(ms(1000));

        assert_eq!(tick(&mut act, ms(1000)), Some(Command::Stop));
        assert_eq!(tick(&mut act, ms(1010)), None, "stop should be sent once");
        assert_eq!(act.status(), Status::StoppedByUser);
        assert_eq!(act.operation(), LiftOperation::Idle);
    }

    #[test]
    fn watchdog_stops_once() {
        init_logger();

        let mut act = actuator();

        act.lower(ms(0));
        assert_eq!(tick(&mut act, ms(0)), Some(Command::Down));

        // Collaborator stalls
        let sent: Vec<_> = (1..100)
            .filter_map(|i| tick(&mut act, ms(i * TICK)))
            .collect();

        assert_eq!(
            sent,
            [Command::Down, Command::Stop],
            "watchdog should emit exactly one stop"
        );
        assert_eq!(act.status(), Status::Idle);
    }

    #[test]
    fn watchdog_within_two_repeats() {
        init_logger();

        let mut act = actuator();
        let mut sent = Vec::new();

        for t in (0..=500).step_by(TICK as usize) {
            act.raise(ms(t));
            sent.extend(tick(&mut act, ms(t)).map(|cmd| (t, cmd)));
        }

        // Renewals stop after 500 ms
        for t in (510..1500).step_by(TICK as usize) {
            sent.extend(tick(&mut act, ms(t)).map(|cmd| (t, cmd)));
        }

        let stops: Vec<_> = sent
            .iter()
            .filter(|&&(_, cmd)| cmd == Command::Stop)
            .map(|&(t, _)| t)
            .collect();
        let repeat = Timing::default().repeat_interval.as_millis();

        assert_eq!(stops.len(), 1, "exactly one stop should be sent");
        assert!(
            u128::from(stops[0] - 500) > repeat && u128::from(stops[0] - 500) < 2 * repeat,
            "stop should follow within two repeat intervals, got {} ms",
            stops[0] - 500
        );
        assert_eq!(
            sent.last(),
            Some(&(stops[0], Command::Stop)),
            "nothing should follow the stop"
        );
    }

    #[test]
    fn stop_precedence() {
        init_logger();

        let mut act = actuator();

        act.raise(ms(0));
        tick(&mut act, ms(0));

        act.stop(ms(50));
        act.raise(ms(50));
        act.raise(ms(51));

        assert_eq!(act.status(), Status::StoppedByUser);
        assert_eq!(act.pending(ms(52)), Some(Command::Stop));
        assert_eq!(tick(&mut act, ms(52)), Some(Command::Stop));
        assert_eq!(tick(&mut act, ms(150)), None, "stale renewals should be ignored");
        assert_eq!(act.status(), Status::StoppedByUser);

        // A later renewal starts a new hold
        act.raise(ms(160));
        assert_eq!(tick(&mut act, ms(160)), Some(Command::Up));
    }

    #[test]
    fn preset_timeout() {
        init_logger();

        let mut act = actuator();

        act.trigger_preset(1, ms(0));

        assert_eq!(act.status(), Status::PresetActive(3));
        assert_eq!(tick(&mut act, ms(0)), Some(Command::Preset(1)));
        assert_eq!(tick(&mut act, ms(10)), None, "preset should be sent once");

        act.update(ms(29_999));
        assert_eq!(act.status(), Status::PresetActive(3));

        act.update(ms(30_000));
        assert_eq!(act.status(), Status::Idle, "preset should time out");
    }

    #[test]
    fn preset_settles() {
        init_logger();

        let mut act = actuator();

        act.observe_height(Height::from_tenths(720), ms(0));
        act.trigger_preset(0, ms(0));
        tick(&mut act, ms(0));

        act.observe_height(Height::from_tenths(720), ms(100));
        act.update(ms(2000));
        assert_eq!(
            act.status(),
            Status::PresetActive(1),
            "unchanged height before moving should not finish the preset"
        );

        act.observe_height(Height::from_tenths(735), ms(2100));
        assert_eq!(act.operation(), LiftOperation::Raising);

        act.observe_height(Height::from_tenths(750), ms(2200));
        act.update(ms(3699));
        assert_eq!(act.status(), Status::PresetActive(1));

        act.update(ms(3700));
        assert_eq!(act.status(), Status::Idle, "settled height should finish preset");
        assert_eq!(act.height(), Some(Height::from_tenths(750)));
    }

    #[test]
    fn hold_settles_at_limit() {
        init_logger();

        let mut act = actuator();
        let mut sent = Vec::new();

        act.observe_height(Height::from_tenths(720), ms(0));

        // Desk reaches its limit at 200 ms while the raise is still renewed
        for t in (0..1700).step_by(TICK as usize) {
            match t {
                100 => act.observe_height(Height::from_tenths(735), ms(t)),
                200 => act.observe_height(Height::from_tenths(750), ms(t)),
                _ => {}
            }

            act.raise(ms(t));
            sent.extend(tick(&mut act, ms(t)));
        }

        assert_eq!(act.status(), Status::MovingUp);

        act.update(ms(1700));
        assert_eq!(act.status(), Status::Idle, "settled height should end the hold");
        assert_eq!(act.pending(ms(1700)), None, "repeats should stop");
        assert!(
            sent.iter().all(|&cmd| cmd == Command::Up),
            "no stop should be sent at the limit"
        );

        act.raise(ms(1710));
        assert_eq!(tick(&mut act, ms(1710)), Some(Command::Up), "renewal should restart");
        assert_eq!(act.status(), Status::MovingUp);
        assert!(act.is_synthetic_hold());
    }

    #[test]
    fn keypad_frame_replaces_wake_up() {
        init_logger();

        let mut act = actuator();

        act.wake_up();
        act.observe_buttons(Buttons::Up, ms(0));

        assert_eq!(tick(&mut act, ms(0)), None, "keypad frame already woke the box");
        assert_eq!(act.status(), Status::MovingUp);
    }

    #[test]
    fn pending_priority() {
        init_logger();

        let mut act = actuator();

        act.wake_up();
        act.raise(ms(0));
        act.stop(ms(5));
        act.trigger_preset(0, ms(10));

        assert_eq!(tick(&mut act, ms(10)), Some(Command::Stop));
        assert_eq!(tick(&mut act, ms(20)), Some(Command::Preset(0)));
        assert_eq!(tick(&mut act, ms(30)), Some(Command::WakeUp));
        assert_eq!(tick(&mut act, ms(40)), None);
    }

    #[test]
    fn physical_presses() {
        init_logger();

        let mut act = actuator();

        act.observe_buttons(Buttons::Up, ms(0));
        assert_eq!(act.status(), Status::MovingUp);
        assert_eq!(tick(&mut act, ms(0)), None, "keypad repeats its own frames");

        act.observe_buttons(Buttons::Up, ms(100));
        act.observe_buttons(Buttons::empty(), ms(200));
        assert_eq!(act.status(), Status::Idle, "release should end the hold");

        act.observe_buttons(Buttons::Down, ms(300));
        assert_eq!(act.status(), Status::MovingDown);
        assert_eq!(tick(&mut act, ms(700)), None, "no stop for keypad holds");
        assert_eq!(act.status(), Status::Idle);

        act.observe_buttons(Buttons::Preset2, ms(800));
        assert_eq!(act.status(), Status::PresetActive(2));

        act.observe_buttons(Buttons::Memory, ms(900));
        assert_eq!(
            act.status(),
            Status::StoppedByUser,
            "M button should interrupt the preset"
        );
    }

    #[test]
    fn keypad_takes_over() {
        init_logger();

        let mut act = actuator();

        act.raise(ms(0));
        assert!(act.is_synthetic_hold());

        act.observe_buttons(Buttons::Down, ms(10));
        assert!(!act.is_synthetic_hold());
        assert_eq!(act.status(), Status::MovingDown);

        act.raise(ms(20));
        assert_eq!(act.status(), Status::MovingDown, "keypad hold should win");
    }
}
