//! Scan-and-send sequencer.
//!
//! Drives a complete scan sequence: queue a scan slot with the radio
//! scheduler, run the scan when the radio becomes available, append the
//! results to the scan group, repeat until the group is full, then drain the
//! group to the uplink transport and report the outcome through the pending
//! events mask.
//!
//! Two execution contexts touch the sequencer. The application calls
//! [`GnssScanSequencer::start_scan`], [`GnssScanSequencer::cancel_scan`] and
//! the configuration setters from thread context. The scheduler and the
//! transport deliver [`GnssScanSequencer::handle_scan_launch`],
//! [`GnssScanSequencer::handle_scan_done`] and
//! [`GnssScanSequencer::handle_tx_done`] from interrupt context. No locking
//! is involved: the in-progress flag gates every sequence-scoped mutation
//! from thread context, and aiding-position updates are staged in single-slot
//! pending fields that only the launch callback applies.
//!
//! A sequence can only be cancelled before its first scan launches. Once the
//! radio has started scanning, the hardware operation is irrevocable and the
//! sequence always runs to natural completion or fatal error.

use embassy_time::{Duration, Instant};

use crate::driver::{
    nav_message_valid, AidingPosition, GnssConstellationMask, GnssRadio, ResultsError,
    SatelliteInfo, ScanContext, GNSS_BEIDOU_MASK, GNSS_GPS_MASK, SOLVER_AIDING_POSITION_SIZE,
};
use crate::events::{has_event, Event, EventCoordinator, EventNotifier};
use crate::scan_group::{
    ScanGroupQueue, ScanRecord, ValidityPolicy, SCAN_GROUP_SIZE_MAX, SINGLE_SCAN_MIN_SV,
};
use crate::scheduler::{RadioScheduler, ScanTaskStatus, SchedulerError, TimeError, TimeSource};
use crate::uplink::UplinkTransport;

/// Default uplink port for scan result fragments.
pub const DEFAULT_UPLINK_PORT: u8 = 194;

/// Margin added to every requested scan delay to absorb scheduling latency.
const SCHEDULING_MARGIN: Duration = Duration::from_millis(300);

/// Radio time reserved for one scan slot.
const SCAN_TASK_DURATION: Duration = Duration::from_secs(10);

/// Completion callbacks run with the radio held; exceeding this budget is
/// reported as a warning.
const DONE_CALLBACK_BUDGET: Duration = Duration::from_millis(3);

/// Operating profile selected when starting a sequence.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ScanMode {
    /// Stationary device: larger groups, spaced scans, low satellite
    /// threshold.
    Static,
    /// Moving device: small groups, back-to-back scans, higher satellite
    /// threshold.
    Mobile,
}

/// Per-mode sequencing parameters.
#[derive(Clone, Copy, Debug)]
struct ModeSettings {
    /// Delay between the end of a scan and the start of the next one, in
    /// seconds.
    scan_group_delay_s: u32,
    /// Number of scans in the scan group.
    scan_group_size: u8,
    /// Minimum number of detected satellites for a scan to count as valid.
    sv_min: u8,
}

impl ScanMode {
    fn settings(self) -> ModeSettings {
        match self {
            ScanMode::Static => ModeSettings {
                scan_group_delay_s: 15,
                scan_group_size: 4,
                sv_min: 3,
            },
            ScanMode::Mobile => ModeSettings {
                scan_group_delay_s: 0,
                scan_group_size: 2,
                sv_min: 5,
            },
        }
    }
}

/// Constellation selection exposed to the application.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Constellations {
    Gps,
    Beidou,
    GpsAndBeidou,
}

impl Constellations {
    fn mask(self) -> GnssConstellationMask {
        match self {
            Constellations::Gps => GNSS_GPS_MASK,
            Constellations::Beidou => GNSS_BEIDOU_MASK,
            Constellations::GpsAndBeidou => GNSS_GPS_MASK | GNSS_BEIDOU_MASK,
        }
    }
}

/// Errors returned to the application.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// A sequence is running; the request cannot be honored now.
    Busy,
    /// An argument was rejected (solver payload size, group size).
    InvalidParameter,
    /// The radio scheduler refused the scan slot.
    Schedule(SchedulerError),
    /// The requested event data is not available.
    NotReady,
}

/// Internal failure classification for the in-flight sequence. Set from the
/// launch callback, consumed when the aborted slot resolves.
#[derive(Clone, Copy, PartialEq, Debug)]
enum InternalError {
    None,
    ScanFailed,
    NoTime,
    Unknown,
}

/// Context snapshot taken at scan launch, reported with the results.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ReportContext {
    /// Mode of the sequence that produced the group.
    pub mode: ScanMode,
    /// Whether the scans ran assisted.
    pub assisted: bool,
    /// Assistance position configured in the receiver at launch.
    pub aiding_position: AidingPosition,
    /// Receiver almanac CRC at launch.
    pub almanac_crc: u32,
}

/// One scan of a completed group, borrowed from the queue.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ScanReport<'a> {
    /// Raw NAV payload, reassembly header excluded.
    pub nav: &'a [u8],
    /// Whether `nav` alone is sufficient for a single-scan fix.
    pub nav_valid: bool,
    /// GPS time of capture.
    pub timestamp: u32,
    /// Detected satellites.
    pub satellites: &'a [SatelliteInfo],
}

/// Snapshot of a completed scan group, readable while the `SCAN_DONE` event
/// is pending.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ScanDoneData<'a> {
    /// Report token of the group.
    pub token: u8,
    /// Whether at least one scan satisfied the validity policy.
    pub is_valid: bool,
    /// Number of scans that satisfied the validity policy.
    pub nb_scans_valid: u8,
    /// The completed scans, in capture order.
    pub scans: heapless::Vec<ScanReport<'a>, SCAN_GROUP_SIZE_MAX>,
    /// Power consumed by the whole group, in micro-amp-hours.
    pub power_consumption_uah: u32,
    /// Receiver context captured at launch.
    pub context: ReportContext,
}

/// Termination report, readable while the `TERMINATED` event is pending.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TerminatedData {
    /// Number of result fragments handed to the transport.
    pub nb_scans_sent: u8,
}

/// The scan-and-send sequencer.
///
/// Owns the scan group queue, the pending-events state and the collaborator
/// handles for one positioning subsystem instance.
pub struct GnssScanSequencer<D, S, U, T, N> {
    pub(crate) radio: D,
    pub(crate) scheduler: S,
    pub(crate) uplink: U,
    pub(crate) time: T,
    pub(crate) notifier: N,
    pub(crate) stack_id: u8,
    pub(crate) queue: ScanGroupQueue,
    pub(crate) events: EventCoordinator,
    pub(crate) uplink_port: u8,
    pub(crate) send_bypass: bool,
    pub(crate) aggregate: bool,
    mode: ScanMode,
    validity: ValidityPolicy,
    constellations: GnssConstellationMask,
    aiding_position_known: bool,
    user_aiding_update: Option<AidingPosition>,
    solver_aiding_update: Option<[u8; SOLVER_AIDING_POSITION_SIZE]>,
    cancel_requested: bool,
    pending_error: InternalError,
    report_context: ReportContext,
}

impl<D, S, U, T, N> GnssScanSequencer<D, S, U, T, N>
where
    D: GnssRadio,
    S: RadioScheduler,
    U: UplinkTransport,
    T: TimeSource,
    N: EventNotifier,
{
    /// Create a sequencer bound to its collaborators and uplink stack.
    pub fn new(radio: D, scheduler: S, uplink: U, time: T, notifier: N, stack_id: u8) -> Self {
        let mut queue = ScanGroupQueue::new();
        queue.reset_token();

        Self {
            radio,
            scheduler,
            uplink,
            time,
            notifier,
            stack_id,
            queue,
            events: EventCoordinator::new(),
            uplink_port: DEFAULT_UPLINK_PORT,
            send_bypass: false,
            aggregate: false,
            mode: ScanMode::Static,
            validity: ValidityPolicy::SvThreshold,
            constellations: GNSS_GPS_MASK | GNSS_BEIDOU_MASK,
            aiding_position_known: false,
            user_aiding_update: None,
            solver_aiding_update: None,
            cancel_requested: false,
            pending_error: InternalError::None,
            report_context: ReportContext {
                mode: ScanMode::Static,
                assisted: false,
                aiding_position: AidingPosition::default(),
                almanac_crc: 0,
            },
        }
    }

    /// Start a scan sequence after `start_delay_s` seconds.
    ///
    /// Without an assistance position the sequence runs a single autonomous
    /// scan; otherwise the group is sized by `mode`.
    pub fn start_scan(&mut self, mode: ScanMode, start_delay_s: u32) -> Result<(), Error> {
        if self.events.is_running() {
            error!("Scan sequence on-going, cannot start a new one yet");
            return Err(Error::Busy);
        }

        self.mode = mode;
        self.pending_error = InternalError::None;
        self.events.clear();
        // Drop any cancel request whose abort never resolved.
        self.cancel_requested = false;

        info!(
            "New scan group ({} scan) - {} s",
            if self.aiding_position_known {
                "assisted"
            } else {
                "autonomous"
            },
            start_delay_s
        );

        let settings = mode.settings();
        let allocated = if self.aiding_position_known {
            self.queue
                .start_group(settings.scan_group_size, self.validity, settings.sv_min)
        } else {
            self.queue.start_group(1, self.validity, SINGLE_SCAN_MIN_SV)
        };
        if allocated.is_err() {
            error!("Failed to initialize scan group queue");
            return Err(Error::InvalidParameter);
        }

        self.schedule_next_scan(start_delay_s).map_err(Error::Schedule)
    }

    /// Cancel the scheduled scan.
    ///
    /// Only possible before the first scan of the sequence physically
    /// launches; afterwards the sequence always runs to completion. The
    /// cancellation outcome arrives as a [`Event::ScanCancelled`] event once
    /// the aborted slot resolves.
    pub fn cancel_scan(&mut self) -> Result<(), Error> {
        if self.events.is_running() {
            error!("Scan sequence started, too late to cancel");
            return Err(Error::Busy);
        }

        self.cancel_requested = true;

        info!("Requesting cancel of the scheduled scan");
        if self.scheduler.abort_scan().is_err() {
            error!("Failed to abort the scheduled scan slot");
        }

        Ok(())
    }

    /// Stage a user-provided assistance position, applied to the receiver at
    /// the next scan launch.
    pub fn set_user_aiding_position(&mut self, latitude: f32, longitude: f32) {
        self.user_aiding_update = Some(AidingPosition {
            latitude,
            longitude,
        });
        self.aiding_position_known = true;
    }

    /// Stage a solver-provided assistance position message, applied to the
    /// receiver at the next scan launch.
    pub fn set_solver_aiding_position(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() != SOLVER_AIDING_POSITION_SIZE {
            error!(
                "Unexpected solver position size, shall be {}",
                SOLVER_AIDING_POSITION_SIZE
            );
            return Err(Error::InvalidParameter);
        }

        let mut update = [0u8; SOLVER_AIDING_POSITION_SIZE];
        update.copy_from_slice(payload);
        self.solver_aiding_update = Some(update);
        self.aiding_position_known = true;

        Ok(())
    }

    /// Select the constellations used by subsequent scans.
    pub fn set_constellations(&mut self, constellations: Constellations) {
        self.constellations = constellations.mask();
    }

    /// Select the uplink port for result fragments.
    pub fn set_uplink_port(&mut self, port: u8) {
        self.uplink_port = port;
    }

    /// Keep one report token across consecutive groups so they are treated
    /// as a single observation.
    pub fn set_aggregate_mode(&mut self, aggregate: bool) {
        info!("Set aggregate mode to {}", aggregate);
        self.aggregate = aggregate;
    }

    /// Scan without transmitting the results ("scan only" mode).
    pub fn set_send_bypass(&mut self, bypass: bool) {
        info!("Set scan only mode to {}", bypass);
        self.send_bypass = bypass;
    }

    /// Select how scans qualify a group as valid.
    pub fn set_validity_policy(&mut self, policy: ValidityPolicy) {
        self.validity = policy;
    }

    /// The accumulated pending-events mask.
    pub fn pending_events(&self) -> u8 {
        self.events.pending()
    }

    /// Drop all pending events. Destructive: un-consumed events are lost.
    pub fn clear_pending_events(&mut self) {
        self.events.clear();
    }

    /// Completed-group snapshot; available while `SCAN_DONE` is pending.
    pub fn scan_done_data(&self) -> Result<ScanDoneData<'_>, Error> {
        if !has_event(self.events.pending(), Event::ScanDone) {
            error!("Scan group data is not ready");
            return Err(Error::NotReady);
        }

        let mut scans = heapless::Vec::new();
        for record in self.queue.records() {
            // records() never exceeds the group capacity
            let _ = scans.push(ScanReport {
                nav: record.nav(),
                nav_valid: record.nav_valid,
                timestamp: record.timestamp,
                satellites: record.satellites(),
            });
        }

        Ok(ScanDoneData {
            token: self.queue.token(),
            is_valid: self.queue.is_valid(),
            nb_scans_valid: self.queue.nb_scans_valid(),
            scans,
            power_consumption_uah: self.queue.power_consumption_uah(),
            context: self.report_context,
        })
    }

    /// Termination report; available while `TERMINATED` is pending.
    pub fn terminated_data(&self) -> Result<TerminatedData, Error> {
        if !has_event(self.events.pending(), Event::Terminated) {
            error!("Scan sequence is not terminated");
            return Err(Error::NotReady);
        }

        // With bypass configured before the sequence, nothing was sent.
        let nb_scans_sent = if self.send_bypass {
            0
        } else {
            self.queue.nb_scans_sent()
        };

        Ok(TerminatedData { nb_scans_sent })
    }

    /// Scheduler launch callback: the radio is now available for the
    /// scheduled scan slot.
    ///
    /// Runs in interrupt context. From this point the sequence cannot be
    /// cancelled any more.
    pub fn handle_scan_launch(&mut self) {
        self.events.mark_running();

        tc_trace!("---- internal scan start ----");

        match self.time.gps_time() {
            Ok(timestamp) => {
                self.apply_pending_aiding_updates();

                let context = self.radio.scan_context();
                self.report_context = ReportContext {
                    mode: self.mode,
                    assisted: self.aiding_position_known,
                    aiding_position: context.aiding_position,
                    almanac_crc: context.almanac_crc,
                };

                if self
                    .radio
                    .start_scan(
                        timestamp.seconds,
                        self.aiding_position_known,
                        self.constellations,
                    )
                    .is_err()
                {
                    self.pending_error = InternalError::ScanFailed;
                    error!("Failed to start scan, aborting slot");
                    self.abort_current_slot();
                }
            }
            Err(TimeError::NoValidTime) => {
                self.pending_error = InternalError::NoTime;
                error!("Time sync is not valid, aborting slot");
                self.abort_current_slot();
            }
            Err(TimeError::Internal) => {
                self.pending_error = InternalError::Unknown;
                error!("Failed to get time, aborting slot");
                self.abort_current_slot();
            }
        }
    }

    /// Scheduler completion callback: the scan slot ended.
    ///
    /// Runs in interrupt context with the radio still held; must return
    /// within [`DONE_CALLBACK_BUDGET`] and leaves the radio in a low-power
    /// state on every path.
    pub fn handle_scan_done(&mut self, status: ScanTaskStatus) {
        let entry = Instant::now();

        // Completed or aborted, the driver is told first.
        self.radio.scan_ended();

        match status {
            ScanTaskStatus::Aborted => self.on_scan_aborted(),
            ScanTaskStatus::ScanDone => self.on_scan_results(),
            ScanTaskStatus::Unexpected => {
                error!("Unexpected scan slot status");
                self.send_event(Event::ErrorUnknown);
            }
        }

        let elapsed = entry.elapsed();
        if elapsed > DONE_CALLBACK_BUDGET {
            warn!("Scan done callback took {} ms", elapsed.as_millis());
        }

        self.radio.sleep();
    }

    /// Record `event` and notify the application.
    pub(crate) fn send_event(&mut self, event: Event) {
        let pending = self.events.raise(event, &mut self.queue, self.aggregate);
        self.notifier.pending_events_changed(pending);
    }

    /// Queue the next scan slot of the group.
    fn schedule_next_scan(&mut self, delay_s: u32) -> Result<(), SchedulerError> {
        let delay = SCHEDULING_MARGIN + Duration::from_secs(u64::from(delay_s));
        match self.scheduler.schedule_scan(delay, SCAN_TASK_DURATION) {
            Ok(()) => {
                tc_trace!("Scan slot queued ({} s delay)", delay_s);
                Ok(())
            }
            Err(e) => {
                error!("Failed to queue scan slot");
                Err(e)
            }
        }
    }

    /// Ask the scheduler to abort the slot we are currently launching. The
    /// abort resolves through the completion callback with aborted status;
    /// no event is emitted from the launch path.
    fn abort_current_slot(&mut self) {
        if self.scheduler.abort_scan().is_err() {
            error!("Scheduler refused the abort request");
        }
    }

    /// Apply staged assistance-position updates to the receiver. An update
    /// the driver rejects stays staged for the next launch.
    fn apply_pending_aiding_updates(&mut self) {
        if let Some(position) = self.user_aiding_update.take() {
            if self.radio.set_aiding_position(&position).is_ok() {
                tc_trace!("User assistance position applied");
            } else {
                self.user_aiding_update = Some(position);
            }
        }

        if let Some(message) = self.solver_aiding_update.take() {
            if self.radio.push_solver_message(&message).is_ok() {
                tc_trace!("Solver assistance position applied");
            } else {
                self.solver_aiding_update = Some(message);
            }
        }
    }

    /// Aborted slot resolution: recoverable scheduler contention retries the
    /// same slot, everything else terminates the sequence.
    fn on_scan_aborted(&mut self) {
        match self.pending_error {
            InternalError::None => {
                if self.cancel_requested {
                    warn!("Scan slot cancelled by user");
                    self.cancel_requested = false;
                    self.send_event(Event::ScanCancelled);
                } else {
                    warn!("Scan slot aborted by scheduler, retrying");
                    if self
                        .schedule_next_scan(self.mode.settings().scan_group_delay_s)
                        .is_err()
                    {
                        self.send_event(Event::ErrorUnknown);
                    }
                }
            }
            InternalError::NoTime => self.send_event(Event::ErrorNoTime),
            InternalError::ScanFailed | InternalError::Unknown => {
                self.send_event(Event::ErrorUnknown)
            }
        }
    }

    /// Completed-scan resolution: read out the results, grow the group, and
    /// either schedule the next scan or close the group and start draining.
    fn on_scan_results(&mut self) {
        let mut record = ScanRecord::new();
        record.timestamp = self.time.gps_time().map(|t| t.seconds).unwrap_or(0);

        let results = self.radio.scan_results(record.nav_buffer_mut());

        // A failed scan still drew power.
        let power = self.radio.power_consumption_uah();
        tc_trace!("Scan power consumption: {} uAh", power);
        self.queue.add_power_consumption(power);

        match results {
            Ok(size) => {
                record.nav_size = size;
                record.detected_svs = self.radio.satellites(&mut record.sv_info);
                record.nav_valid = nav_message_valid(self.constellations, record.satellites());
                self.queue.push(&record);

                if !self.queue.is_full() {
                    if self
                        .schedule_next_scan(self.mode.settings().scan_group_delay_s)
                        .is_err()
                    {
                        self.send_event(Event::ErrorUnknown);
                    }
                } else {
                    self.send_event(Event::ScanDone);

                    if !self.send_next_result() {
                        // Nothing to send: the sequence is over right away.
                        self.send_event(Event::Terminated);
                    }
                }
            }
            Err(ResultsError::AlmanacUpdateRequired) => {
                error!("Almanac update required");
                self.send_event(Event::ErrorAlmanacUpdate);
            }
            Err(ResultsError::NoAidingPosition) => {
                error!("No assistance position configured");
                self.send_event(Event::ErrorNoAidingPosition);
            }
            Err(ResultsError::NoTime) => {
                error!("No valid time available");
                self.send_event(Event::ErrorNoTime);
            }
            Err(ResultsError::Unknown) => {
                error!("Unknown error on results readout");
                self.send_event(Event::ErrorUnknown);
            }
        }
    }
}

/// Log a completed-group snapshot.
pub fn log_scan_done_data(data: &ScanDoneData<'_>) {
    info!("SCAN_DONE info:");
    info!("-- token: {:x}", data.token);
    info!("-- is valid: {}", data.is_valid);
    info!("-- number of valid scans: {}", data.nb_scans_valid);
    for scan in &data.scans {
        info!(
            "-- scan[{}] ({} SV - {}): {=[u8]:x}",
            scan.timestamp,
            scan.satellites.len(),
            scan.nav_valid,
            scan.nav
        );
        for sv in scan.satellites {
            info!("   SV {}: {} dB", sv.satellite_id, sv.cnr);
        }
    }
    info!("-- power consumption: {} uAh", data.power_consumption_uah);
    info!("-- assisted: {}", data.context.assisted);
    if data.context.assisted {
        info!(
            "-- aiding position: ({}, {})",
            data.context.aiding_position.latitude,
            data.context.aiding_position.longitude
        );
    }
    info!("-- almanac CRC: {:x}", data.context.almanac_crc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_group::{SCAN_METADATA_SIZE, SCAN_RESULT_SIZE_MAX};
    use crate::scheduler::GpsTimestamp;
    use crate::uplink::GNSS_UPLINK_ID;
    use heapless::Vec;

    const FRAME_MAX: usize = SCAN_METADATA_SIZE + SCAN_RESULT_SIZE_MAX;

    struct MockRadio {
        started_scans: Vec<(u32, bool, u8), 8>,
        applied_positions: Vec<AidingPosition, 4>,
        applied_solver_msgs: Vec<[u8; SOLVER_AIDING_POSITION_SIZE], 4>,
        reject_aiding: bool,
        reject_scan_start: bool,
        results: Result<u8, ResultsError>,
        detected_svs: u8,
        power_uah: u32,
        scan_ended_calls: u8,
        sleep_calls: u8,
    }

    impl MockRadio {
        fn new() -> Self {
            Self {
                started_scans: Vec::new(),
                applied_positions: Vec::new(),
                applied_solver_msgs: Vec::new(),
                reject_aiding: false,
                reject_scan_start: false,
                results: Ok(8),
                detected_svs: 5,
                power_uah: 100,
                scan_ended_calls: 0,
                sleep_calls: 0,
            }
        }
    }

    impl GnssRadio for MockRadio {
        type Error = ();

        fn set_aiding_position(&mut self, position: &AidingPosition) -> Result<(), ()> {
            if self.reject_aiding {
                return Err(());
            }
            self.applied_positions.push(*position).unwrap();
            Ok(())
        }

        fn push_solver_message(&mut self, message: &[u8]) -> Result<(), ()> {
            if self.reject_aiding {
                return Err(());
            }
            let mut copy = [0u8; SOLVER_AIDING_POSITION_SIZE];
            copy.copy_from_slice(message);
            self.applied_solver_msgs.push(copy).unwrap();
            Ok(())
        }

        fn scan_context(&mut self) -> ScanContext {
            ScanContext {
                aiding_position: AidingPosition {
                    latitude: 45.5,
                    longitude: 5.5,
                },
                almanac_crc: 0xCAFE_F00D,
            }
        }

        fn start_scan(&mut self, time: u32, assisted: bool, constellations: u8) -> Result<(), ()> {
            if self.reject_scan_start {
                return Err(());
            }
            self.started_scans
                .push((time, assisted, constellations))
                .unwrap();
            Ok(())
        }

        fn scan_results(&mut self, nav: &mut [u8]) -> Result<u8, ResultsError> {
            let size = self.results?;
            let tag = self.started_scans.len() as u8;
            nav[..size as usize].fill(tag);
            Ok(size)
        }

        fn satellites(&mut self, satellites: &mut [SatelliteInfo]) -> u8 {
            let count = (self.detected_svs as usize).min(satellites.len());
            for (i, sv) in satellites.iter_mut().take(count).enumerate() {
                // alternate GPS and BeiDou IDs
                sv.satellite_id = if i % 2 == 0 { i as u8 } else { 64 + i as u8 };
                sv.cnr = 40;
            }
            count as u8
        }

        fn power_consumption_uah(&mut self) -> u32 {
            self.power_uah
        }

        fn scan_ended(&mut self) {
            self.scan_ended_calls += 1;
        }

        fn sleep(&mut self) {
            self.sleep_calls += 1;
        }
    }

    struct MockScheduler {
        scheduled: Vec<Duration, 8>,
        aborts: u8,
        reject: bool,
    }

    impl MockScheduler {
        fn new() -> Self {
            Self {
                scheduled: Vec::new(),
                aborts: 0,
                reject: false,
            }
        }
    }

    impl RadioScheduler for MockScheduler {
        fn schedule_scan(
            &mut self,
            delay: Duration,
            _max_duration: Duration,
        ) -> Result<(), SchedulerError> {
            if self.reject {
                return Err(SchedulerError::QueueFull);
            }
            self.scheduled.push(delay).unwrap();
            Ok(())
        }

        fn abort_scan(&mut self) -> Result<(), SchedulerError> {
            self.aborts += 1;
            Ok(())
        }
    }

    struct MockUplink {
        frames: Vec<Vec<u8, FRAME_MAX>, 8>,
        ports: Vec<u8, 8>,
        tags: Vec<u8, 8>,
        reject: bool,
    }

    impl MockUplink {
        fn new() -> Self {
            Self {
                frames: Vec::new(),
                ports: Vec::new(),
                tags: Vec::new(),
                reject: false,
            }
        }
    }

    impl UplinkTransport for MockUplink {
        type Error = ();

        fn duty_cycle_status_ms(&mut self) -> i32 {
            0
        }

        fn next_max_payload(&mut self, _stack_id: u8) -> u8 {
            FRAME_MAX as u8
        }

        fn request_uplink(
            &mut self,
            _stack_id: u8,
            port: u8,
            uplink_id: u8,
            payload: &[u8],
        ) -> Result<(), ()> {
            if self.reject {
                return Err(());
            }
            let mut frame = Vec::new();
            frame.extend_from_slice(payload).unwrap();
            self.frames.push(frame).unwrap();
            self.ports.push(port).unwrap();
            self.tags.push(uplink_id).unwrap();
            Ok(())
        }
    }

    struct MockTime {
        result: Result<GpsTimestamp, TimeError>,
    }

    impl MockTime {
        fn synced() -> Self {
            Self {
                result: Ok(GpsTimestamp {
                    seconds: 1_358_000_000,
                    fractional_seconds: 0,
                }),
            }
        }
    }

    impl TimeSource for MockTime {
        fn gps_time(&mut self) -> Result<GpsTimestamp, TimeError> {
            self.result
        }
    }

    struct MockNotifier {
        masks: Vec<u8, 16>,
    }

    impl MockNotifier {
        fn new() -> Self {
            Self { masks: Vec::new() }
        }
    }

    impl EventNotifier for MockNotifier {
        fn pending_events_changed(&mut self, pending: u8) {
            self.masks.push(pending).unwrap();
        }
    }

    type TestSequencer =
        GnssScanSequencer<MockRadio, MockScheduler, MockUplink, MockTime, MockNotifier>;

    fn sequencer() -> TestSequencer {
        GnssScanSequencer::new(
            MockRadio::new(),
            MockScheduler::new(),
            MockUplink::new(),
            MockTime::synced(),
            MockNotifier::new(),
            0,
        )
    }

    /// Run one scheduled slot to successful completion.
    fn run_scan(seq: &mut TestSequencer) {
        seq.handle_scan_launch();
        seq.handle_scan_done(ScanTaskStatus::ScanDone);
    }

    #[test]
    fn test_start_rejected_while_running() {
        let mut seq = sequencer();
        seq.set_user_aiding_position(45.0, 5.0);

        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        run_scan(&mut seq);
        assert!(seq.events.is_running());
        assert_eq!(seq.queue.nb_scans_completed(), 1);

        assert_eq!(seq.start_scan(ScanMode::Mobile, 0), Err(Error::Busy));
        // The in-flight group was not touched.
        assert_eq!(seq.queue.nb_scans_completed(), 1);
    }

    #[test]
    fn test_autonomous_sequence_is_single_scan() {
        let mut seq = sequencer();

        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        run_scan(&mut seq);

        // No aiding position: the group completes after one scan.
        assert!(has_event(seq.pending_events(), Event::ScanDone));
        let (_, assisted, _) = seq.radio.started_scans[0];
        assert!(!assisted);
    }

    #[test]
    fn test_no_time_emits_single_error_event() {
        let mut seq = sequencer();
        seq.time.result = Err(TimeError::NoValidTime);

        seq.start_scan(ScanMode::Static, 0).unwrap();
        seq.handle_scan_launch();
        // The launch path aborts the slot instead of emitting events.
        assert_eq!(seq.scheduler.aborts, 1);
        assert_eq!(seq.pending_events(), 0);
        assert!(seq.events.is_running());

        seq.handle_scan_done(ScanTaskStatus::Aborted);
        assert!(has_event(seq.pending_events(), Event::ErrorNoTime));
        assert!(!has_event(seq.pending_events(), Event::ScanDone));
        assert!(!has_event(seq.pending_events(), Event::Terminated));
        assert!(!seq.events.is_running());
        assert_eq!(seq.radio.sleep_calls, 1);
    }

    #[test]
    fn test_two_scan_group_end_to_end() {
        let mut seq = sequencer();
        seq.set_user_aiding_position(45.0, 5.0);

        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        assert_eq!(seq.scheduler.scheduled.len(), 1);

        run_scan(&mut seq);
        // Group not full: next scan queued with the mode's inter-scan delay.
        assert_eq!(seq.scheduler.scheduled.len(), 2);
        assert_eq!(seq.uplink.frames.len(), 0);

        run_scan(&mut seq);
        // Group full: SCAN_DONE raised and the first fragment is in flight.
        assert!(has_event(seq.pending_events(), Event::ScanDone));
        assert!(!has_event(seq.pending_events(), Event::Terminated));
        assert_eq!(seq.uplink.frames.len(), 1);
        assert!(seq.events.is_running());

        let data = seq.scan_done_data().unwrap();
        assert!(data.is_valid);
        assert_eq!(data.nb_scans_valid, 2);
        assert_eq!(data.scans.len(), 2);
        assert_eq!(data.scans[0].nav, &[1; 8]);
        assert_eq!(data.scans[1].nav, &[2; 8]);
        assert_eq!(data.scans[0].timestamp, 1_358_000_000);
        assert_eq!(data.power_consumption_uah, 200);
        assert!(data.context.assisted);
        assert_eq!(data.context.almanac_crc, 0xCAFE_F00D);
        drop(data);

        seq.handle_tx_done();
        assert_eq!(seq.uplink.frames.len(), 2);
        assert!(!has_event(seq.pending_events(), Event::Terminated));

        seq.handle_tx_done();
        assert!(has_event(seq.pending_events(), Event::Terminated));
        assert!(!seq.events.is_running());
        assert_eq!(seq.terminated_data().unwrap().nb_scans_sent, 2);

        // Fragments went out in capture order on the default port.
        assert_eq!(&seq.uplink.frames[0][SCAN_METADATA_SIZE..], &[1; 8]);
        assert_eq!(&seq.uplink.frames[1][SCAN_METADATA_SIZE..], &[2; 8]);
        assert_eq!(seq.uplink.ports[0], DEFAULT_UPLINK_PORT);
        assert_eq!(seq.uplink.tags[0], GNSS_UPLINK_ID);
    }

    #[test]
    fn test_send_bypass_terminates_immediately() {
        let mut seq = sequencer();
        seq.set_user_aiding_position(45.0, 5.0);
        seq.set_send_bypass(true);

        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        run_scan(&mut seq);
        run_scan(&mut seq);

        assert!(has_event(seq.pending_events(), Event::ScanDone));
        assert!(has_event(seq.pending_events(), Event::Terminated));
        assert_eq!(seq.uplink.frames.len(), 0);
        assert_eq!(seq.terminated_data().unwrap().nb_scans_sent, 0);
        assert!(!seq.events.is_running());
    }

    #[test]
    fn test_cancel_before_launch() {
        let mut seq = sequencer();

        seq.start_scan(ScanMode::Static, 10).unwrap();
        seq.cancel_scan().unwrap();
        assert_eq!(seq.scheduler.aborts, 1);

        seq.handle_scan_done(ScanTaskStatus::Aborted);
        assert!(has_event(seq.pending_events(), Event::ScanCancelled));
        assert!(!seq.events.is_running());

        // A new sequence can start right away.
        seq.start_scan(ScanMode::Static, 0).unwrap();
        assert_eq!(seq.pending_events(), 0);
    }

    #[test]
    fn test_cancel_rejected_once_running() {
        let mut seq = sequencer();

        seq.start_scan(ScanMode::Static, 0).unwrap();
        seq.handle_scan_launch();
        assert_eq!(seq.cancel_scan(), Err(Error::Busy));
    }

    #[test]
    fn test_scheduler_abort_retries_same_slot() {
        let mut seq = sequencer();
        seq.set_user_aiding_position(45.0, 5.0);

        seq.start_scan(ScanMode::Static, 0).unwrap();
        seq.handle_scan_launch();
        seq.handle_scan_done(ScanTaskStatus::Aborted);

        // No event raised, the slot is simply re-queued with the mode's
        // inter-scan delay.
        assert_eq!(seq.pending_events(), 0);
        assert!(seq.events.is_running());
        assert_eq!(seq.scheduler.scheduled.len(), 2);
        assert_eq!(
            seq.scheduler.scheduled[1],
            Duration::from_millis(300) + Duration::from_secs(15)
        );
        assert_eq!(seq.queue.nb_scans_completed(), 0);
    }

    #[test]
    fn test_results_errors_are_classified() {
        let cases = [
            (ResultsError::AlmanacUpdateRequired, Event::ErrorAlmanacUpdate),
            (ResultsError::NoAidingPosition, Event::ErrorNoAidingPosition),
            (ResultsError::NoTime, Event::ErrorNoTime),
            (ResultsError::Unknown, Event::ErrorUnknown),
        ];

        for (error, event) in cases {
            let mut seq = sequencer();
            seq.radio.results = Err(error);

            seq.start_scan(ScanMode::Static, 0).unwrap();
            run_scan(&mut seq);

            assert!(has_event(seq.pending_events(), event));
            assert!(!seq.events.is_running());
            // Power is accumulated even when the readout failed.
            assert_eq!(seq.queue.power_consumption_uah(), 100);
        }
    }

    #[test]
    fn test_scan_start_failure_terminates_unknown() {
        let mut seq = sequencer();
        seq.radio.reject_scan_start = true;

        seq.start_scan(ScanMode::Static, 0).unwrap();
        seq.handle_scan_launch();
        assert_eq!(seq.scheduler.aborts, 1);

        seq.handle_scan_done(ScanTaskStatus::Aborted);
        assert!(has_event(seq.pending_events(), Event::ErrorUnknown));
        assert!(!seq.events.is_running());
    }

    #[test]
    fn test_unexpected_status_terminates_unknown() {
        let mut seq = sequencer();

        seq.start_scan(ScanMode::Static, 0).unwrap();
        seq.handle_scan_launch();
        seq.handle_scan_done(ScanTaskStatus::Unexpected);

        assert!(has_event(seq.pending_events(), Event::ErrorUnknown));
        assert!(!seq.events.is_running());
        assert_eq!(seq.radio.sleep_calls, 1);
    }

    #[test]
    fn test_aiding_updates_applied_once_at_launch() {
        let mut seq = sequencer();
        seq.set_user_aiding_position(12.5, -3.25);
        seq.set_solver_aiding_position(&[0x01, 0xAA, 0xBB, 0xCC]).unwrap();

        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        seq.handle_scan_launch();

        assert_eq!(
            seq.radio.applied_positions[0],
            AidingPosition {
                latitude: 12.5,
                longitude: -3.25,
            }
        );
        assert_eq!(seq.radio.applied_solver_msgs[0], [0x01, 0xAA, 0xBB, 0xCC]);

        // Applied updates are consumed; the next launch writes nothing.
        seq.handle_scan_launch();
        assert_eq!(seq.radio.applied_positions.len(), 1);
        assert_eq!(seq.radio.applied_solver_msgs.len(), 1);
    }

    #[test]
    fn test_rejected_aiding_update_stays_staged() {
        let mut seq = sequencer();
        seq.set_user_aiding_position(12.5, -3.25);
        seq.radio.reject_aiding = true;

        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        seq.handle_scan_launch();
        assert!(seq.radio.applied_positions.is_empty());

        // Driver recovers: the staged update goes out on the next launch.
        seq.radio.reject_aiding = false;
        seq.handle_scan_launch();
        assert_eq!(seq.radio.applied_positions.len(), 1);
    }

    #[test]
    fn test_solver_position_size_is_checked() {
        let mut seq = sequencer();
        assert_eq!(
            seq.set_solver_aiding_position(&[1, 2, 3]),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            seq.set_solver_aiding_position(&[1, 2, 3, 4, 5]),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn test_event_data_gated_by_pending_events() {
        let seq = sequencer();
        assert_eq!(seq.scan_done_data().err(), Some(Error::NotReady));
        assert_eq!(seq.terminated_data().err(), Some(Error::NotReady));
    }

    #[test]
    fn test_schedule_rejection_fails_start() {
        let mut seq = sequencer();
        seq.scheduler.reject = true;

        assert_eq!(
            seq.start_scan(ScanMode::Static, 0),
            Err(Error::Schedule(SchedulerError::QueueFull))
        );
        assert!(!seq.events.is_running());
    }

    #[test]
    fn test_token_advances_across_valid_groups_only() {
        let mut seq = sequencer();
        seq.set_user_aiding_position(45.0, 5.0);
        seq.set_send_bypass(true);

        let initial = seq.queue.token();

        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        run_scan(&mut seq);
        run_scan(&mut seq);
        assert_eq!(seq.queue.token(), initial + 1);

        // Aggregated groups keep the token.
        seq.set_aggregate_mode(true);
        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        run_scan(&mut seq);
        run_scan(&mut seq);
        assert_eq!(seq.queue.token(), initial + 1);

        // Invalid groups (no satellites) keep the token too.
        seq.set_aggregate_mode(false);
        seq.radio.detected_svs = 0;
        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        run_scan(&mut seq);
        run_scan(&mut seq);
        assert_eq!(seq.queue.token(), initial + 1);
    }

    #[test]
    fn test_transport_rejection_still_terminates() {
        let mut seq = sequencer();
        seq.set_user_aiding_position(45.0, 5.0);
        seq.uplink.reject = true;

        seq.start_scan(ScanMode::Mobile, 0).unwrap();
        run_scan(&mut seq);
        run_scan(&mut seq);

        assert!(has_event(seq.pending_events(), Event::ScanDone));
        assert!(has_event(seq.pending_events(), Event::Terminated));
        assert!(!seq.events.is_running());
    }
}
