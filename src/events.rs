//! Outcome events for the application.
//!
//! Events accumulate in a bitmask the application polls after being
//! notified. `SCAN_DONE` is the only non-terminal event; every other event
//! ends the sequence, so raising one is also the single place where the
//! in-progress flag is cleared.

use crate::scan_group::ScanGroupQueue;

/// Events reported to the application.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Event {
    /// The scheduled scan was cancelled before it launched.
    ScanCancelled = 0,
    /// The scan group completed and its results are readable.
    ScanDone = 1,
    /// The sequence fully terminated (all results sent, or nothing to send).
    Terminated = 2,
    /// No valid time reference was available.
    ErrorNoTime = 3,
    /// The receiver almanac needs an update.
    ErrorAlmanacUpdate = 4,
    /// An assisted scan ran without an assistance position.
    ErrorNoAidingPosition = 5,
    /// Any other failure.
    ErrorUnknown = 6,
}

impl Event {
    /// The event's bit in the pending-events mask.
    pub const fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// Whether `event` is set in a pending-events mask.
pub fn has_event(pending: u8, event: Event) -> bool {
    pending & event.mask() != 0
}

/// Notification hook invoked every time the pending-events mask changes.
///
/// Typically bridges to the host stack's event signaling so the application
/// wakes up and polls.
pub trait EventNotifier {
    fn pending_events_changed(&mut self, pending: u8);
}

/// Accumulates outcome events and owns the sequence in-progress flag.
pub struct EventCoordinator {
    pending: u8,
    running: bool,
}

impl EventCoordinator {
    pub const fn new() -> Self {
        Self {
            pending: 0,
            running: false,
        }
    }

    /// Whether a sequence is in progress (first scan launched, not yet
    /// terminated).
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Mark the sequence as started. Set from the launch callback only.
    pub fn mark_running(&mut self) {
        self.running = true;
    }

    /// The accumulated pending-events mask.
    pub fn pending(&self) -> u8 {
        self.pending
    }

    /// Drop all pending events. Destructive: un-consumed events are lost.
    pub fn clear(&mut self) {
        self.pending = 0;
    }

    /// Record `event` and apply its side effects, returning the updated
    /// pending mask for notification.
    ///
    /// Any event other than [`Event::ScanDone`] terminates the sequence. A
    /// `ScanDone` on a valid group advances the report token unless
    /// aggregation keeps consecutive groups under one observation.
    pub fn raise(&mut self, event: Event, queue: &mut ScanGroupQueue, aggregate: bool) -> u8 {
        if event != Event::ScanDone {
            self.running = false;
        } else if !aggregate && queue.is_valid() {
            queue.increment_token();
        }

        self.pending |= event.mask();
        self.pending
    }
}

impl Default for EventCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
