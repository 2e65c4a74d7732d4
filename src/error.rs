//! Library error type (component C7's error-handling half).
//!
//! Only lifecycle-propagating failures live here (spec.md §7's propagation
//! policy): per-frame errors (`CodecError`, malformed/unknown inbound
//! payloads, out-of-range ack indices) are logged at the point they occur and
//! never bubble up as a `ControllerError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// The gateway adapter could not be opened, or a send failed against an
    /// already-open adapter. User-visible; aborts the command in progress.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// At least one targeted device did not acknowledge `OTA_START` within
    /// `ota_max_retries`.
    #[error("{} device(s) missed the OTA_START handshake: {missed:?}", missed.len())]
    StartOtaIncomplete { missed: Vec<crate::address::NodeAddress> },

    /// At least one device has `success == false` after the chunk loop.
    #[error("firmware transfer incomplete for {} of {total} device(s)", failed.len())]
    TransferIncomplete { failed: Vec<crate::address::NodeAddress>, total: usize },

    /// Interactive confirmation was declined, or `monitor` was interrupted.
    #[error("aborted by user")]
    UserAbort,

    /// A `reset` call was given a selection with no matching location, or
    /// vice versa (spec.md §8 scenario 5).
    #[error("reset requires a location for every selected device; missing: {missing:?}")]
    ResetLocationMismatch { missing: Vec<crate::address::NodeAddress> },
}
