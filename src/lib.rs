//! Man-in-the-middle controller for Loctek motorized desks.
//!
//! # Overview
//!
//! The `loctek_bridge` crate sits between a desk's physical keypad and its
//! control box, which talk to each other over two independent UART links.
//! It relays all regular keypad traffic to the control box, observes both
//! links to track what the desk is doing, and injects its own command frames
//! (presets, up/down/stop, wake-up) without the keypad's involvement.
//!
//! The crate is `no_std` and only requires an allocator. It is driven by a
//! cooperative polling loop and never blocks:
//!
//! - Serial ports must implement the [`embedded_io`] traits
//!   [`Read`](embedded_io::Read), [`ReadReady`](embedded_io::ReadReady) and
//!   [`Write`](embedded_io::Write).
//! - The wake-up line of the control box must implement
//!   [`OutputPin`](embedded_hal::digital::OutputPin).
//! - Time is passed in as a monotonic [`Duration`](core::time::Duration)
//!   since an arbitrary epoch.
//!
//! Depending on your needs, you can:
//!
//! - Use the high-level [`Bridge`] to run the complete passthrough and expose
//!   a lift (raise/lower/stop), preset buttons, an "M" button and a wake switch.
//! - Work directly with the [`frame`] codec, e.g. to decode captured traffic.
//!
//! # Getting started
//!
//! Both links use the following UART configuration:
//!
//! - **Baud rate:** 9600
//! - **Parity:** None
//! - **Data bits:** 8
//! - **Stop bits:** 1
//!
//! The control box ignores injected commands while asleep. It is woken up by
//! pulling its wake-up line (pin 20 on the RJ45 connector of many models) high.
//!
//! ```no_run
//! use core::time::Duration;
//! use embedded_hal::digital::OutputPin;
//! use embedded_io::{Read, ReadReady, Write};
//! use loctek_bridge::{Bridge, Config, PresetDefinition};
//!
//! fn run<P, W>(
//!     keypad: P,
//!     desk: P,
//!     wake_pin: W,
//!     now: impl Fn() -> Duration,
//! ) -> loctek_bridge::Result<(), P::Error>
//! where
//!     P: Read + ReadReady + Write,
//!     W: OutputPin,
//! {
//!     let config = Config {
//!         presets: vec![PresetDefinition::new(
//!             "Standing",
//!             [0x9b, 0x06, 0x02, 0x10, 0x00, 0xac, 0xac, 0x9d],
//!         )],
//!         ..Config::default()
//!     };
//!     let mut bridge = Bridge::new(config, keypad, desk, wake_pin)?;
//!
//!     bridge.press_preset("Standing", now())?;
//!
//!     loop {
//!         bridge.poll(now())?;
//!     }
//! }
//! ```
//!
//! # Protocol details
//!
//! Frames start with `0x9b`, end with `0x9d` and carry a CRC-16/MODBUS
//! checksum. The keypad sends 8-byte button frames, while the control box
//! answers with the contents of the keypad's seven-segment height display.
//! See the [`frame`] module for the exact layout.
//!
//! Holding a button on the keypad makes it repeat the button frame.
//! The control box only keeps moving while it receives these repeats, so
//! [`Bridge::raise`] and [`Bridge::lower`] have to be renewed periodically.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod actuator;
mod arbiter;
pub mod bridge;
pub mod config;
pub mod frame;
pub mod link;
pub mod wake;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

pub use bridge::Bridge;
pub use config::{Config, PresetDefinition};
pub use embedded_hal;
pub use embedded_io;

use core::fmt::{Debug, Display, Formatter};
use embedded_hal::digital;
use frame::FrameError;

/// A specialized [`Result`] type for [`Bridge`] operations.
///
/// Uses [`Error<E>`] as the error variant, which can include port-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for [`Bridge`] operations.
///
/// The generic parameter `E` allows the error type to carry a port-specific error.
/// Framing errors on the links are recovered internally and never show up here.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// The provided configuration or argument is invalid.
    InvalidArgument,
    /// A configured preset command is not a valid frame.
    InvalidPreset(FrameError),
    /// No preset with the requested name is configured.
    UnknownPreset,
    /// The requested control (stop button or wake switch) is not configured.
    NotConfigured,
    /// Writing the wake-up pin failed.
    WakePin(digital::ErrorKind),
    /// A port-specific input/output error.
    Io(E),
    /// The bridge stopped after a hardware fault.
    Unavailable,
}

impl<E: Debug> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidPreset(err) => write!(f, "invalid preset: {err}"),
            Self::UnknownPreset => write!(f, "unknown preset"),
            Self::NotConfigured => write!(f, "control not configured"),
            Self::WakePin(kind) => write!(f, "wake-up pin error: {kind:?}"),
            Self::Io(err) => write!(f, "input/output error: {err:?}"),
            Self::Unavailable => write!(f, "device unavailable"),
        }
    }
}

impl<E: Debug> core::error::Error for Error<E> {}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

impl<E> Error<E> {
    /// Returns `true` for hardware faults, after which the bridge is unavailable.
    #[must_use]
    pub fn is_hardware_fault(&self) -> bool {
        matches!(self, Self::WakePin(_) | Self::Io(_) | Self::Unavailable)
    }
}
