//! Arbitration between synthetic commands and keypad passthrough.
//!
//! Only one frame is written to the control box per tick. Keypad frames are
//! queued until it is their turn, and a synthetic command that is due and
//! allowed to go out replaces every keypad frame queued so far. A wake-up
//! frame replaces nothing and waits for the queue to drain instead.

use crate::{actuator::Command, frame::Frame};
use alloc::collections::vec_deque::VecDeque;
use log::{debug, warn};

/// Maximum number of queued keypad frames.
///
/// Overflow is the only case in which a valid keypad frame is dropped
/// without being replaced by a synthetic command. It needs more than this
/// many keypad frames between two ticks.
pub const QUEUE_CAPACITY: usize = 8;

/// Outcome of a tick.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Decision {
    /// Send the synthetic command and discard queued keypad frames.
    Inject(Command),
    /// Forward the oldest queued keypad frame.
    Forward,
    /// Nothing to send.
    Idle,
}

/// Decides what goes to the control box on this tick.
///
/// `ready` tells whether the control box is awake. A pending command that
/// cannot be sent yet does not hold back keypad traffic, and a pending
/// wake-up frame is deferred while keypad frames are queued.
pub fn decide(pending: Option<Command>, ready: bool, queued: bool) -> Decision {
    match pending {
        Some(Command::WakeUp) if queued => Decision::Forward,
        Some(cmd) if ready => Decision::Inject(cmd),
        _ if queued => Decision::Forward,
        _ => Decision::Idle,
    }
}

/// Queue of keypad frames waiting to be forwarded.
#[derive(Default, Debug)]
pub struct Arbiter {
    queue: VecDeque<Frame>,
}

impl Arbiter {
    /// Queues a keypad frame.
    ///
    /// If [`QUEUE_CAPACITY`] frames are already waiting, the oldest one is
    /// dropped. Apart from corrupt data, this is the only case in which a
    /// keypad frame is lost without a synthetic command taking its place.
    pub fn enqueue(&mut self, frame: Frame) {
        if self.queue.len() == QUEUE_CAPACITY {
            warn!("Keypad queue full, dropping oldest frame");
            self.queue.pop_front();
        }

        self.queue.push_back(frame);
    }

    /// Returns `true` if keypad frames are waiting.
    pub fn is_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Discards all queued keypad frames.
    pub fn discard(&mut self) {
        if !self.queue.is_empty() {
            debug!("Discarding {} keypad frames", self.queue.len());
            self.queue.clear();
        }
    }

    /// Takes the next keypad frame to forward.
    ///
    /// While a synthetic hold is in progress, frames without any button
    /// pressed are dropped so they do not interrupt the motion.
    pub fn next_forward(&mut self, synthetic_hold: bool) -> Option<Frame> {
        while let Some(frame) = self.queue.pop_front() {
            if synthetic_hold && frame.buttons().is_some_and(|b| b.is_empty()) {
                debug!("Dropping idle keypad frame during hold");
                continue;
            }

            return Some(frame);
        }

        None
    }
}
