//! GNSS scan-and-send sequencing middleware for LR11xx-class receivers
//!
//! This crate sequences multi-scan satellite-positioning campaigns on devices
//! that share a single radio with other protocol activity. It schedules scan
//! slots with the host's cooperative radio scheduler, accumulates scan
//! results into a scan group, drains the group one payload at a time over a
//! duty-cycle-limited uplink, and reports the outcome through a pending
//! events mask the application polls.
//!
//! # Architecture
//!
//! The crate owns only the sequencing logic. Hardware and stack services are
//! reached through four collaborator traits the integration implements:
//!
//! - [`driver::GnssRadio`] — the GNSS receiver driver (scan start, result
//!   readout, aiding positions, power, sleep)
//! - [`scheduler::RadioScheduler`] — the radio arbiter owning scan-slot
//!   timing and abortion
//! - [`uplink::UplinkTransport`] — the over-the-air uplink path
//! - [`scheduler::TimeSource`] — the GPS time reference
//!
//! The scheduler's launch/completion callbacks and the transport's
//! transmit-completion notification must be routed to
//! [`sequencer::GnssScanSequencer::handle_scan_launch`],
//! [`sequencer::GnssScanSequencer::handle_scan_done`] and
//! [`sequencer::GnssScanSequencer::handle_tx_done`]. They run in interrupt
//! context and return within a bounded time.
//!
//! # Example
//!
//! ```ignore
//! use gnss_mw_rs::sequencer::{GnssScanSequencer, ScanMode};
//! use gnss_mw_rs::events::{has_event, Event};
//!
//! let mut sequencer = GnssScanSequencer::new(radio, scheduler, uplink, time, notifier, 0);
//!
//! sequencer.set_user_aiding_position(45.0, 5.0);
//! sequencer.start_scan(ScanMode::Mobile, 30)?;
//!
//! // ... later, after the notifier fired:
//! let pending = sequencer.pending_events();
//! if has_event(pending, Event::ScanDone) {
//!     let data = sequencer.scan_done_data()?;
//!     // feed data.scans to the position solver
//! }
//! ```
//!
//! # Features
//!
//! - `defmt-03`: log through `defmt` 0.3 and derive `defmt::Format` on
//!   public types.
//! - `time-critical-trace`: keep traces enabled inside the scheduler
//!   callbacks (off by default, those paths run with the radio held).

#![no_std]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod driver;
pub mod events;
pub mod scan_group;
pub mod scheduler;
pub mod sequencer;
pub mod uplink;

pub use driver::{AidingPosition, GnssRadio, SatelliteInfo};
pub use events::{has_event, Event, EventNotifier};
pub use scan_group::{ScanGroupQueue, ScanRecord, ValidityPolicy};
pub use scheduler::{RadioScheduler, ScanTaskStatus, TimeSource};
pub use sequencer::{
    Constellations, Error, GnssScanSequencer, ScanDoneData, ScanMode, TerminatedData,
};
pub use uplink::UplinkTransport;

/// Middleware version reported by [`version()`].
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// The middleware version.
pub const fn version() -> Version {
    Version {
        major: 2,
        minor: 0,
        patch: 1,
    }
}
