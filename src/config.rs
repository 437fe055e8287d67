//! Bridge configuration.
//!
//! The configuration is supplied once at startup by whatever integrates the
//! bridge (firmware, home automation glue or the native `bridge` binary)
//! and is immutable afterwards.

use crate::{
    Error, Result,
    frame::{Frame, FrameFormat},
};
use alloc::{string::String, vec::Vec};
use core::time::Duration;

/// Maximum number of presets, matching the memory buttons of the keypad.
pub const MAX_PRESETS: usize = 4;

/// A named preset recalling a stored desk height.
///
/// The command is the exact 8-byte frame sent to the control box,
/// e.g. `9b 06 02 04 00 ac a3 9d` for memory position 1.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct PresetDefinition {
    /// Unique name used to trigger the preset.
    pub name: String,
    /// Wire command including markers and checksum.
    pub command: [u8; 8],
}

impl PresetDefinition {
    /// Constructs a new preset definition.
    pub fn new(name: impl Into<String>, command: [u8; 8]) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }
}

/// A preset whose command has been verified against the frame format.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Preset {
    name: String,
    frame: Frame,
    slot: u8,
}

impl Preset {
    /// Returns the preset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the command frame.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Returns the keypad memory slot (1 to 4) the preset corresponds to.
    ///
    /// Derived from the command's button mask, falling back to the
    /// preset's position in the configuration for custom commands.
    #[must_use]
    pub fn slot(&self) -> u8 {
        self.slot
    }
}

/// Timing parameters.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Timing {
    /// How long the wake-up pin is held high before commands are sent.
    pub wake_hold: Duration,
    /// Link inactivity after which the control box is presumed asleep.
    pub idle_timeout: Duration,
    /// Interval between repeated frames while raising or lowering.
    pub repeat_interval: Duration,
    /// Maximum time without a renewed raise/lower intent before stopping.
    ///
    /// Must be longer than one repeat interval and shorter than two.
    pub hold_watchdog: Duration,
    /// Maximum time a preset is reported as active.
    pub preset_timeout: Duration,
    /// Time the displayed height must stay unchanged for a motion to count as finished.
    pub settle_interval: Duration,
    /// Interval for sending wake-up frames while idle, if enabled.
    ///
    /// Keeps the control box awake so it continuously reports the desk height.
    pub keep_alive: Option<Duration>,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            wake_hold: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(20),
            repeat_interval: Duration::from_millis(100),
            hold_watchdog: Duration::from_millis(150),
            preset_timeout: Duration::from_secs(30),
            settle_interval: Duration::from_millis(1500),
            keep_alive: None,
        }
    }
}

/// Bridge configuration.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Config {
    /// Wire format of both links.
    pub format: FrameFormat,
    /// Up to [`MAX_PRESETS`] presets.
    pub presets: Vec<PresetDefinition>,
    /// Name of the "M" (stop) button, if exposed.
    pub stop_button: Option<String>,
    /// Name of the wake-up switch, if exposed.
    pub wake_switch: Option<String>,
    /// Timing parameters.
    pub timing: Timing,
}

impl Config {
    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if there are too many presets, preset names are
    ///   empty or duplicated, or timing parameters are zero or inconsistent.
    /// - [`Error::InvalidPreset`] if a preset command is not a valid frame.
    pub fn validate<E>(&self) -> Result<(), E> {
        if self.presets.len() > MAX_PRESETS {
            return Err(Error::InvalidArgument);
        }

        for (i, preset) in self.presets.iter().enumerate() {
            if preset.name.is_empty()
                || self.presets[..i].iter().any(|p| p.name == preset.name)
            {
                return Err(Error::InvalidArgument);
            }
        }

        let t = &self.timing;

        if [
            t.wake_hold,
            t.idle_timeout,
            t.repeat_interval,
            t.hold_watchdog,
            t.preset_timeout,
            t.settle_interval,
        ]
        .contains(&Duration::ZERO)
            || t.keep_alive == Some(Duration::ZERO)
            || t.hold_watchdog <= t.repeat_interval
            || t.hold_watchdog >= t.repeat_interval * 2
        {
            return Err(Error::InvalidArgument);
        }

        self.decode_presets().map(|_| ())
    }

    /// Decodes and verifies all preset commands.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPreset`] if a preset command is not a valid frame.
    pub fn decode_presets<E>(&self) -> Result<Vec<Preset>, E> {
        self.presets
            .iter()
            .zip(1..)
            .map(|(def, pos)| {
                let frame = self
                    .format
                    .decode(&def.command)
                    .map_err(Error::InvalidPreset)?;
                let slot = frame
                    .buttons()
                    .and_then(|buttons| buttons.preset_slot())
                    .unwrap_or(pos);

                Ok(Preset {
                    name: def.name.clone(),
                    frame,
                    slot,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::FrameError, tests::init_logger};
    use alloc::vec;
    use core::convert::Infallible;

    const PRESET_1: [u8; 8] = [0x9b, 0x06, 0x02, 0x04, 0x00, 0xac, 0xa3, 0x9d];
    const PRESET_3: [u8; 8] = [0x9b, 0x06, 0x02, 0x10, 0x00, 0xac, 0xac, 0x9d];

    fn config(presets: Vec<PresetDefinition>) -> Config {
        Config {
            presets,
            ..Config::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        init_logger();

        assert_eq!(Config::default().validate::<Infallible>(), Ok(()));
    }

    #[test]
    fn decode_presets() -> core::result::Result<(), Error<Infallible>> {
        init_logger();

        let presets = config(vec![
            PresetDefinition::new("Sitting", PRESET_1),
            PresetDefinition::new("Standing", PRESET_3),
        ])
        .decode_presets()?;

        assert_eq!(presets.len(), 2, "all presets should be decoded");
        assert_eq!(presets[0].name(), "Sitting");
        assert_eq!(presets[0].slot(), 1, "slot should follow the button mask");
        assert_eq!(presets[1].slot(), 3, "slot should follow the button mask");
        assert_eq!(presets[1].frame().as_bytes(), PRESET_3);

        Ok(())
    }

    #[test]
    fn custom_preset_slot() -> core::result::Result<(), Error<Infallible>> {
        init_logger();

        // Wake-up frame carries no preset button
        let wake_up = [0x9b, 0x06, 0x02, 0x00, 0x00, 0x6c, 0xa1, 0x9d];
        let presets = config(vec![
            PresetDefinition::new("A", PRESET_1),
            PresetDefinition::new("B", wake_up),
        ])
        .decode_presets()?;

        assert_eq!(presets[1].slot(), 2, "slot should fall back to position");

        Ok(())
    }

    #[test]
    fn error_invalid_preset() {
        init_logger();

        let mut command = PRESET_1;

        command[6] ^= 0x01;

        assert_eq!(
            config(vec![PresetDefinition::new("P1", command)]).validate::<Infallible>(),
            Err(Error::InvalidPreset(FrameError::IncorrectChecksum)),
            "corrupt preset should be rejected"
        );
    }

    #[test]
    fn error_invalid_names() {
        init_logger();

        assert_eq!(
            config(vec![
                PresetDefinition::new("P1", PRESET_1),
                PresetDefinition::new("P1", PRESET_3),
            ])
            .validate::<Infallible>(),
            Err(Error::InvalidArgument),
            "duplicate names should be rejected"
        );
        assert_eq!(
            config(vec![PresetDefinition::new("", PRESET_1)]).validate::<Infallible>(),
            Err(Error::InvalidArgument),
            "empty name should be rejected"
        );
    }

    #[test]
    fn error_too_many_presets() {
        init_logger();

        let presets = (0..5)
            .map(|i| PresetDefinition::new(alloc::format!("P{i}"), PRESET_1))
            .collect();

        assert_eq!(
            config(presets).validate::<Infallible>(),
            Err(Error::InvalidArgument),
            "more than four presets should be rejected"
        );
    }

    #[test]
    fn error_invalid_timing() {
        init_logger();

        let mut cfg = Config::default();

        cfg.timing.hold_watchdog = cfg.timing.repeat_interval / 2;

        assert_eq!(
            cfg.validate::<Infallible>(),
            Err(Error::InvalidArgument),
            "watchdog shorter than repeat interval should be rejected"
        );

        let mut cfg = Config::default();

        cfg.timing.hold_watchdog = cfg.timing.repeat_interval;

        assert_eq!(
            cfg.validate::<Infallible>(),
            Err(Error::InvalidArgument),
            "watchdog must be longer than one repeat interval"
        );

        let mut cfg = Config::default();

        cfg.timing.hold_watchdog = cfg.timing.repeat_interval * 2;

        assert_eq!(
            cfg.validate::<Infallible>(),
            Err(Error::InvalidArgument),
            "watchdog of two repeat intervals should be rejected"
        );

        let mut cfg = Config::default();

        cfg.timing.repeat_interval = Duration::from_millis(200);
        cfg.timing.hold_watchdog = Duration::from_millis(250);

        assert_eq!(
            cfg.validate::<Infallible>(),
            Ok(()),
            "watchdog between one and two repeat intervals should be accepted"
        );

        let mut cfg = Config::default();

        cfg.timing.keep_alive = Some(Duration::ZERO);

        assert_eq!(
            cfg.validate::<Infallible>(),
            Err(Error::InvalidArgument),
            "zero keep-alive interval should be rejected"
        );
    }
}
