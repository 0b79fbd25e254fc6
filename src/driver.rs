//! Receiver-driver interface consumed by the scan sequencer.
//!
//! The sequencer never touches the radio hardware directly: scans, result
//! readout and aiding-position writes all go through [`GnssRadio`], which the
//! integration implements on top of its LR11xx-class driver. Every method is
//! synchronous because the sequencer calls them from the radio scheduler's
//! launch and completion callbacks, which run in interrupt context.

/// Bit mask of constellation configurations.
pub type GnssConstellationMask = u8;

/// GPS constellation mask.
pub const GNSS_GPS_MASK: GnssConstellationMask = 0x01;
/// BeiDou constellation mask.
pub const GNSS_BEIDOU_MASK: GnssConstellationMask = 0x02;

/// Satellite IDs below this bound belong to the GPS constellation.
const GPS_SV_ID_END: u8 = 64;

/// Size of a solver assistance position message (1 byte tag + 3 bytes
/// position).
pub const SOLVER_AIDING_POSITION_SIZE: usize = 4;

/// Minimum number of detected satellites for a NAV message to be usable by
/// the solver on its own.
const NAV_VALID_MIN_SV: usize = 5;

/// Minimum number of detected satellites per constellation for a NAV message
/// to be usable when both constellations are enabled.
const NAV_VALID_MIN_SV_PER_CONSTELLATION: usize = 2;

/// Assistance position handed to the receiver to speed up weak-signal scans.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct AidingPosition {
    /// Latitude in degrees (-90 to +90).
    pub latitude: f32,
    /// Longitude in degrees (-180 to +180).
    pub longitude: f32,
}

/// One satellite detected during a scan.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SatelliteInfo {
    /// Satellite ID.
    pub satellite_id: u8,
    /// Carrier-to-noise ratio in dB.
    pub cnr: i8,
}

impl SatelliteInfo {
    /// Whether this satellite belongs to the GPS constellation.
    pub fn is_gps(&self) -> bool {
        self.satellite_id < GPS_SV_ID_END
    }
}

/// Receiver configuration snapshot taken right before a scan starts, reported
/// back to the application with the scan results.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ScanContext {
    /// The assistance position currently configured in the receiver.
    pub aiding_position: AidingPosition,
    /// CRC of the almanac currently stored in the receiver.
    pub almanac_crc: u32,
}

/// Receiver-side failure reported when fetching scan results.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ResultsError {
    /// The receiver almanac is too old to produce results.
    AlmanacUpdateRequired,
    /// An assisted scan ran without an assistance position configured.
    NoAidingPosition,
    /// No valid time was available for the scan.
    NoTime,
    /// Any other receiver failure.
    Unknown,
}

/// GNSS receiver driver contract.
///
/// Implementations wrap the actual radio driver. The sequencer guarantees
/// that `start_scan` is only invoked after the scheduler granted the radio,
/// and that `scan_ended`/`sleep` are called from the completion callback on
/// every path, so the radio is always left in a low-power state.
pub trait GnssRadio {
    /// Driver-specific error type. The sequencer only acts on success or
    /// failure; details stay with the integration.
    type Error;

    /// Write an assistance position to the receiver.
    fn set_aiding_position(&mut self, position: &AidingPosition) -> Result<(), Self::Error>;

    /// Push a solver-originated assistance message to the receiver.
    fn push_solver_message(&mut self, message: &[u8]) -> Result<(), Self::Error>;

    /// Read the receiver configuration used for the upcoming scan.
    fn scan_context(&mut self) -> ScanContext;

    /// Launch a scan. `assisted` selects assisted over autonomous mode.
    fn start_scan(
        &mut self,
        time: u32,
        assisted: bool,
        constellations: GnssConstellationMask,
    ) -> Result<(), Self::Error>;

    /// Read the raw NAV payload of the completed scan into `nav` and return
    /// its size.
    fn scan_results(&mut self, nav: &mut [u8]) -> Result<u8, ResultsError>;

    /// Read per-satellite details of the completed scan into `satellites` and
    /// return how many entries were written.
    fn satellites(&mut self, satellites: &mut [SatelliteInfo]) -> u8;

    /// Power consumed by the scan that just completed, in micro-amp-hours.
    fn power_consumption_uah(&mut self) -> u32;

    /// Notify the driver that the scan slot ended (completed or aborted).
    fn scan_ended(&mut self);

    /// Put the radio in its lowest-power state.
    fn sleep(&mut self);
}

/// Whether a single NAV message is sufficient for the solver to compute a
/// position without combining it with other scans.
///
/// The solver needs at least [`NAV_VALID_MIN_SV`] satellites, and when both
/// constellations are scanned, at least two of each.
pub fn nav_message_valid(
    constellations: GnssConstellationMask,
    satellites: &[SatelliteInfo],
) -> bool {
    if satellites.len() < NAV_VALID_MIN_SV {
        return false;
    }

    let both = (constellations & GNSS_GPS_MASK != 0) && (constellations & GNSS_BEIDOU_MASK != 0);
    if both {
        let gps = satellites.iter().filter(|sv| sv.is_gps()).count();
        let beidou = satellites.len() - gps;
        gps >= NAV_VALID_MIN_SV_PER_CONSTELLATION && beidou >= NAV_VALID_MIN_SV_PER_CONSTELLATION
    } else {
        true
    }
}
