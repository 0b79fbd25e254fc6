//! Uplink transport contract and result dispatcher.
//!
//! Once a scan group completes, its stored payloads are drained to the
//! transport strictly in capture order, one in flight at a time: the
//! transport keeps no internal copy, so the borrowed payload must stay
//! untouched until its transmit-completion notification arrives, and only
//! then is the next record popped.

use crate::driver::GnssRadio;
use crate::events::{Event, EventNotifier};
use crate::scheduler::{RadioScheduler, TimeSource};
use crate::sequencer::GnssScanSequencer;

/// Correlation tag passed with every uplink request so the transport's
/// completion notification can be routed back to
/// [`GnssScanSequencer::handle_tx_done`].
pub const GNSS_UPLINK_ID: u8 = 1;

/// Duty-cycle-limited uplink transport contract.
///
/// Payload-size and duty-cycle limits are enforced by the transport itself;
/// the dispatcher only queries them for diagnostics.
pub trait UplinkTransport {
    /// Transport-specific error type.
    type Error;

    /// Duty-cycle status in milliseconds. Negative values mean the next
    /// uplink is gated for that long.
    fn duty_cycle_status_ms(&mut self) -> i32;

    /// Maximum payload size accepted for the next uplink.
    fn next_max_payload(&mut self, stack_id: u8) -> u8;

    /// Request transmission of `payload` on `port`.
    ///
    /// No copy is made: `payload` must remain valid and unmodified until the
    /// completion notification tagged `uplink_id` fires. That notification
    /// must be routed to [`GnssScanSequencer::handle_tx_done`].
    fn request_uplink(
        &mut self,
        stack_id: u8,
        port: u8,
        uplink_id: u8,
        payload: &[u8],
    ) -> Result<(), Self::Error>;
}

impl<D, S, U, T, N> GnssScanSequencer<D, S, U, T, N>
where
    D: GnssRadio,
    S: RadioScheduler,
    U: UplinkTransport,
    T: TimeSource,
    N: EventNotifier,
{
    /// Pop the next stored payload and hand it to the transport.
    ///
    /// Returns whether a transmission was requested: `false` when bypass
    /// mode is active, the queue is drained, or the transport rejected the
    /// request.
    pub(crate) fn send_next_result(&mut self) -> bool {
        if self.send_bypass {
            return false;
        }

        let port = self.uplink_port;
        let stack_id = self.stack_id;
        let Some(payload) = self.queue.pop_next() else {
            return false;
        };

        // Limits are the application's responsibility; report them only.
        let duty_cycle_ms = self.uplink.duty_cycle_status_ms();
        if duty_cycle_ms < 0 {
            error!("Duty cycle: next uplink gated for {} ms", -duty_cycle_ms);
        }

        let max_payload = self.uplink.next_max_payload(stack_id);
        if payload.len() > max_payload as usize {
            error!(
                "Payload size exceeds next uplink maximum ({} > {} bytes)",
                payload.len(),
                max_payload
            );
        }

        match self
            .uplink
            .request_uplink(stack_id, port, GNSS_UPLINK_ID, payload)
        {
            Ok(()) => {
                info!("Requested scan result uplink on port {}", port);
                true
            }
            Err(_) => {
                error!("Failed to request scan result uplink");
                false
            }
        }
    }

    /// Transmit-completion callback: drain the next stored payload, and
    /// raise [`Event::Terminated`] once nothing is left to send.
    pub fn handle_tx_done(&mut self) {
        debug!("---- internal TX done ----");

        if !self.send_next_result() {
            self.send_event(Event::Terminated);
        }
    }
}
