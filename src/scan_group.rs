//! Scan group queue.
//!
//! A scan group is a batch of one or more scans completed together and
//! reported under a single token. The queue stores each completed scan's raw
//! NAV payload together with its per-satellite details, tracks how many of
//! them satisfied the group's validity policy, and drains the stored payloads
//! one at a time towards the uplink dispatcher.
//!
//! Exactly one queue instance exists; the sequencer owns it for the lifetime
//! of a sequence and re-initializes it (keeping the token counter) when the
//! next sequence starts.

use crate::driver::SatelliteInfo;

/// Maximum number of scans in a scan group.
pub const SCAN_GROUP_SIZE_MAX: usize = 4;

/// Size of the reassembly header prepended to each uplinked payload.
pub const SCAN_METADATA_SIZE: usize = 2;

/// Maximum size of the raw NAV payload produced by one scan.
pub const SCAN_RESULT_SIZE_MAX: usize = 49;

/// Maximum number of detected satellites kept per scan.
pub const SVS_MAX: usize = 10;

/// Minimum satellite count used for the single-scan group of an autonomous
/// sequence (no assistance position known).
pub const SINGLE_SCAN_MIN_SV: u8 = 5;

/// Group tokens are 5-bit; 0x00 and 0x01 are reserved.
const TOKEN_MIN: u8 = 0x02;
const TOKEN_FIELD_MASK: u8 = 0x1F;

/// Marks the last fragment of a group in the reassembly header.
const METADATA_LAST_FRAGMENT: u8 = 0x80;

/// Policy deciding whether a scan contributes to group validity.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ValidityPolicy {
    /// A scan counts when its NAV payload alone is solver-usable.
    NavValid,
    /// A scan counts when it detected at least the configured minimum number
    /// of satellites.
    SvThreshold,
}

/// Group allocation error.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum GroupError {
    /// Requested group size is zero or exceeds [`SCAN_GROUP_SIZE_MAX`].
    InvalidSize,
}

/// A single scan's raw output plus per-satellite metadata.
///
/// The payload buffer reserves [`SCAN_METADATA_SIZE`] leading bytes for the
/// reassembly header, which the queue fills when the record is popped for
/// transmission. A record is populated exactly once, right after its scan
/// completes, and is immutable afterwards.
#[derive(Clone, Copy, Debug)]
pub struct ScanRecord {
    /// GPS time of capture.
    pub timestamp: u32,
    /// Reassembly header followed by the raw NAV payload.
    pub buffer: [u8; SCAN_METADATA_SIZE + SCAN_RESULT_SIZE_MAX],
    /// Number of NAV bytes in `buffer` after the header.
    pub nav_size: u8,
    /// Whether the NAV payload alone is sufficient for a single-scan fix.
    pub nav_valid: bool,
    /// Number of entries used in `sv_info`.
    pub detected_svs: u8,
    /// Detected satellites, strongest information first as reported by the
    /// receiver.
    pub sv_info: [SatelliteInfo; SVS_MAX],
}

impl ScanRecord {
    const EMPTY: ScanRecord = ScanRecord::new();

    /// Create an empty record.
    pub const fn new() -> Self {
        Self {
            timestamp: 0,
            buffer: [0; SCAN_METADATA_SIZE + SCAN_RESULT_SIZE_MAX],
            nav_size: 0,
            nav_valid: false,
            detected_svs: 0,
            sv_info: [SatelliteInfo {
                satellite_id: 0,
                cnr: 0,
            }; SVS_MAX],
        }
    }

    /// The raw NAV payload, header excluded.
    pub fn nav(&self) -> &[u8] {
        let len = (self.nav_size as usize).min(SCAN_RESULT_SIZE_MAX);
        &self.buffer[SCAN_METADATA_SIZE..SCAN_METADATA_SIZE + len]
    }

    /// Writable NAV area of the payload buffer.
    pub fn nav_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[SCAN_METADATA_SIZE..]
    }

    /// The detected satellites.
    pub fn satellites(&self) -> &[SatelliteInfo] {
        &self.sv_info[..(self.detected_svs as usize).min(SVS_MAX)]
    }
}

impl Default for ScanRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded, append-only storage for the scans of one group, with the group's
/// report token and send cursor.
pub struct ScanGroupQueue {
    token: u8,
    capacity: u8,
    policy: ValidityPolicy,
    sv_min: u8,
    nb_scans_completed: u8,
    nb_scans_valid: u8,
    nb_scans_sent: u8,
    power_consumption_uah: u32,
    scans: [ScanRecord; SCAN_GROUP_SIZE_MAX],
}

impl ScanGroupQueue {
    /// Create an empty queue with the token counter at its initial value.
    pub const fn new() -> Self {
        Self {
            token: TOKEN_MIN,
            capacity: 0,
            policy: ValidityPolicy::SvThreshold,
            sv_min: 0,
            nb_scans_completed: 0,
            nb_scans_valid: 0,
            nb_scans_sent: 0,
            power_consumption_uah: 0,
            scans: [ScanRecord::EMPTY; SCAN_GROUP_SIZE_MAX],
        }
    }

    /// Reinitialize the token counter. Called once at subsystem init.
    pub fn reset_token(&mut self) {
        self.token = TOKEN_MIN;
    }

    /// Re-initialize the queue for a new group of `capacity` scans. Keeps the
    /// token counter.
    pub fn start_group(
        &mut self,
        capacity: u8,
        policy: ValidityPolicy,
        sv_min: u8,
    ) -> Result<(), GroupError> {
        if capacity == 0 || capacity as usize > SCAN_GROUP_SIZE_MAX {
            return Err(GroupError::InvalidSize);
        }

        self.capacity = capacity;
        self.policy = policy;
        self.sv_min = sv_min;
        self.nb_scans_completed = 0;
        self.nb_scans_valid = 0;
        self.nb_scans_sent = 0;
        self.power_consumption_uah = 0;

        Ok(())
    }

    /// Append a completed scan. No-op when the group is already full; callers
    /// check [`Self::is_full`] before pushing.
    pub fn push(&mut self, record: &ScanRecord) {
        if self.is_full() {
            return;
        }

        let satisfied = match self.policy {
            ValidityPolicy::NavValid => record.nav_valid,
            ValidityPolicy::SvThreshold => record.detected_svs >= self.sv_min,
        };
        if satisfied {
            self.nb_scans_valid += 1;
        }

        self.scans[self.nb_scans_completed as usize] = *record;
        self.nb_scans_completed += 1;
    }

    /// Whether all scans of the group have completed.
    pub fn is_full(&self) -> bool {
        self.nb_scans_completed == self.capacity
    }

    /// Whether at least one scan satisfied the group's validity policy.
    pub fn is_valid(&self) -> bool {
        self.nb_scans_valid > 0
    }

    /// Next payload to transmit, header included, in capture order.
    ///
    /// Fills in the reassembly header and advances the send cursor. Returns
    /// `None` once every completed scan has been popped; the returned slice
    /// stays untouched until the next call, so the transport may hold it
    /// without a copy until its transmission completes.
    pub fn pop_next(&mut self) -> Option<&[u8]> {
        if self.nb_scans_sent >= self.nb_scans_completed {
            return None;
        }

        let index = self.nb_scans_sent as usize;
        let completed = self.nb_scans_completed;
        let token = self.token;
        let last = index as u8 + 1 == completed;

        let record = &mut self.scans[index];
        record.buffer[0] = (token & TOKEN_FIELD_MASK)
            | if last { METADATA_LAST_FRAGMENT } else { 0 };
        record.buffer[1] = ((index as u8) << 4) | (completed & 0x0F);
        let len = SCAN_METADATA_SIZE + (record.nav_size as usize).min(SCAN_RESULT_SIZE_MAX);

        self.nb_scans_sent += 1;

        Some(&self.scans[index].buffer[..len])
    }

    /// Advance the token, wrapping within its 5-bit range and skipping the
    /// reserved values.
    pub fn increment_token(&mut self) {
        self.token = (self.token + 1) & TOKEN_FIELD_MASK;
        if self.token < TOKEN_MIN {
            self.token = TOKEN_MIN;
        }
    }

    /// Accumulate the power consumed by a scan into the group total.
    pub fn add_power_consumption(&mut self, uah: u32) {
        self.power_consumption_uah = self.power_consumption_uah.saturating_add(uah);
    }

    /// The group's report token.
    pub fn token(&self) -> u8 {
        self.token
    }

    /// Number of scans completed so far.
    pub fn nb_scans_completed(&self) -> u8 {
        self.nb_scans_completed
    }

    /// Number of scans that satisfied the validity policy.
    pub fn nb_scans_valid(&self) -> u8 {
        self.nb_scans_valid
    }

    /// Number of payloads popped for transmission.
    pub fn nb_scans_sent(&self) -> u8 {
        self.nb_scans_sent
    }

    /// Power consumed by the whole group, in micro-amp-hours.
    pub fn power_consumption_uah(&self) -> u32 {
        self.power_consumption_uah
    }

    /// The completed scans, in capture order.
    pub fn records(&self) -> &[ScanRecord] {
        &self.scans[..self.nb_scans_completed as usize]
    }
}

impl Default for ScanGroupQueue {
    fn default() -> Self {
        Self::new()
    }
}
