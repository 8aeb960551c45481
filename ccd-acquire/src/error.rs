//! Error types for the acquisition engine.
//!
//! Only conditions the caller can act on are surfaced here. Garbled serial
//! bytes and rejected datagrams are handled inside the decoders and never
//! reach this type.

use thiserror::Error;

use crate::receiver::TransportKind;

/// Errors returned by the acquisition engine.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// The serial port could not be opened or the UDP socket could not be bound.
    ///
    /// Reported once to the caller of `start()`; there is no automatic retry.
    #[error("{transport} transport unavailable: {reason}")]
    TransportUnavailable {
        /// Which transport failed to open
        transport: TransportKind,
        /// Underlying OS or driver message
        reason: String,
    },

    /// A receiver session is already running.
    #[error("receiver already running on {transport}")]
    AlreadyRunning {
        /// Transport of the session that is currently active
        transport: TransportKind,
    },

    /// Two-point calibration with both points on the same pixel.
    #[error("calibration points share pixel index {pixel}")]
    CalibrationInvalid {
        /// The duplicated pixel index
        pixel: usize,
    },

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for acquisition operations.
pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_transport() {
        let err = AcquisitionError::TransportUnavailable {
            transport: TransportKind::Serial,
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "serial transport unavailable: No such file or directory"
        );

        let err = AcquisitionError::AlreadyRunning {
            transport: TransportKind::Udp,
        };
        assert_eq!(err.to_string(), "receiver already running on udp");
    }
}
