//! Radio scheduler and time-source contracts.
//!
//! The radio is shared with other protocol activity, so the sequencer never
//! owns it: it queues scan slots with the host's cooperative radio scheduler
//! and reacts to the scheduler's callbacks. The integration is expected to
//! route those callbacks to [`GnssScanSequencer::handle_scan_launch`] and
//! [`GnssScanSequencer::handle_scan_done`].
//!
//! [`GnssScanSequencer::handle_scan_launch`]: crate::sequencer::GnssScanSequencer::handle_scan_launch
//! [`GnssScanSequencer::handle_scan_done`]: crate::sequencer::GnssScanSequencer::handle_scan_done

use embassy_time::Duration;

/// Completion status delivered by the scheduler when a scan slot ends.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ScanTaskStatus {
    /// The scan ran to completion and results can be read from the receiver.
    ScanDone,
    /// The slot was aborted: by the scheduler itself (radio contention), by a
    /// user cancel request, or self-aborted from the launch callback.
    Aborted,
    /// Any other radio IRQ status. Scan slots do not produce these; they are
    /// treated as an unknown error.
    Unexpected,
}

/// Errors returned by the radio scheduler.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum SchedulerError {
    /// The scheduler task queue is full.
    QueueFull,
    /// The scheduler rejected the slot parameters.
    InvalidTask,
    /// No scheduled slot to abort.
    TaskNotFound,
}

/// Cooperative radio scheduler contract.
///
/// One scan slot is in flight at a time. The scheduler invokes the launch
/// callback when the radio becomes available for the slot, and the completion
/// callback with a [`ScanTaskStatus`] when the slot ends. Both run in the
/// scheduler's interrupt context.
pub trait RadioScheduler {
    /// Queue a scan slot starting `delay` from now, holding the radio for at
    /// most `max_duration`.
    fn schedule_scan(&mut self, delay: Duration, max_duration: Duration)
        -> Result<(), SchedulerError>;

    /// Abort the scheduled slot. If the slot already launched, the scheduler
    /// still resolves it through the completion callback with
    /// [`ScanTaskStatus::Aborted`].
    fn abort_scan(&mut self) -> Result<(), SchedulerError>;
}

/// GPS time reference with sub-second remainder.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct GpsTimestamp {
    /// Seconds since the GPS epoch.
    pub seconds: u32,
    /// Fractional part of the current second.
    pub fractional_seconds: u32,
}

/// Failure to obtain a time reference.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TimeError {
    /// The time source has no valid synchronization.
    NoValidTime,
    /// The time source failed for another reason.
    Internal,
}

/// Source of the GPS time reference required to start a scan.
pub trait TimeSource {
    /// Current GPS time, or why it is not available.
    fn gps_time(&mut self) -> Result<GpsTimestamp, TimeError>;
}
