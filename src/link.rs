//! Link monitor for one serial peer.
//!
//! A [`LinkMonitor`] owns the port of either the keypad or the control box.
//! It buffers incoming bytes across ticks, splits them into frames and
//! classifies each frame depending on which side of the bridge it came from.

use crate::frame::{Buttons, Frame, FrameError, FrameFormat, Height, Parse};
use alloc::vec::Vec;
use core::time::Duration;
use embedded_io::{Read, ReadReady, Write};
use log::{debug, trace};
use strum::Display;

/// Size of a single read from the port.
const READ_CHUNK: usize = 16;
/// Maximum number of reads per poll, so a chatty peer cannot stall a tick.
const MAX_READS: usize = 8;

/// Serial peer of a link.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum Side {
    /// The physical keypad, sending button frames.
    Keypad,
    /// The control box, sending height display frames.
    Desk,
}

/// Meaning of a recognized frame.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Signal {
    /// Buttons currently held on the keypad.
    Buttons(Buttons),
    /// Height shown on the display.
    Height(Height),
}

/// Classified link event.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Event {
    /// A valid frame the bridge understands.
    Recognized {
        /// The received frame.
        frame: Frame,
        /// Decoded meaning of the frame.
        signal: Signal,
    },
    /// A valid frame the bridge does not model. It is still forwarded.
    Unrecognized(Frame),
    /// Corrupt data was dropped.
    Malformed(FrameError),
}

impl Event {
    /// Returns the frame if this event may be forwarded to the other peer.
    #[must_use]
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Self::Recognized { frame, .. } | Self::Unrecognized(frame) => Some(frame),
            Self::Malformed(_) => None,
        }
    }
}

/// Monitors one serial peer.
#[derive(Debug)]
pub struct LinkMonitor<P> {
    side: Side,
    format: FrameFormat,
    port: P,
    buf: Vec<u8>,
    last_activity: Option<Duration>,
}

impl<P: Read + ReadReady + Write> LinkMonitor<P> {
    /// Constructs a new monitor for the given side.
    pub fn new(side: Side, format: FrameFormat, port: P) -> Self {
        Self {
            side,
            format,
            port,
            buf: Vec::new(),
            last_activity: None,
        }
    }

    /// Returns the time bytes were last received.
    pub fn last_activity(&self) -> Option<Duration> {
        self.last_activity
    }

    /// Reads the bytes currently available and returns the resulting events.
    ///
    /// Never blocks. A partial frame stays buffered until the next poll.
    pub fn poll(&mut self, now: Duration) -> Result<Vec<Event>, P::Error> {
        let mut chunk = [0; READ_CHUNK];

        for _ in 0..MAX_READS {
            if !self.port.read_ready()? {
                break;
            }

            let count = self.port.read(&mut chunk)?;

            if count == 0 {
                break;
            }

            trace!("Read from {}: {:02x?}", self.side, &chunk[..count]);

            self.buf.extend_from_slice(&chunk[..count]);
            self.last_activity = Some(now);
        }

        let mut events = Vec::new();

        loop {
            match self.format.parse(&self.buf) {
                Parse::Frame(frame) => {
                    self.buf.drain(..frame.as_bytes().len());
                    events.push(self.classify(frame));
                }
                Parse::Incomplete => break,
                Parse::Invalid(err) => {
                    let skip = self.format.resync(&self.buf);

                    debug!("Dropping {skip} bytes from {}: {err}", self.side);

                    self.buf.drain(..skip);
                    events.push(Event::Malformed(err));
                }
            }
        }

        Ok(events)
    }

    /// Writes a frame verbatim to the peer.
    pub fn send(&mut self, frame: &Frame) -> Result<(), P::Error> {
        trace!("Write to {}: {:02x?}", self.side, frame.as_bytes());

        self.port.write_all(frame.as_bytes())?;
        self.port.flush()
    }

    fn classify(&self, frame: Frame) -> Event {
        let signal = match self.side {
            Side::Keypad => frame.buttons().map(Signal::Buttons),
            Side::Desk => frame.height().map(Signal::Height),
        };

        match signal {
            Some(signal) => Event::Recognized { frame, signal },
            None => Event::Unrecognized(frame),
        }
    }
}
