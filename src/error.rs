//! Error handling for the pi_mood button daemon.

/// A specialized `Result` type for pi_mood operations.
pub type Result<T> = std::result::Result<T, PiMoodError>;

/// The main error type for pi_mood.
///
/// `Configuration`, `HardwareFault` and `Io` abort startup. The remaining
/// kinds are reduced to a log entry at the point where they occur.
#[derive(Debug, thiserror::Error)]
pub enum PiMoodError {
    /// Invalid or incomplete startup configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// GPIO claim, configure or drive failure
    #[error("Hardware fault: {0}")]
    HardwareFault(String),

    /// An edge arrived on a pin with no registered button
    #[error("Edge event on unmapped pin {pin}")]
    UnmappedPinEvent { pin: u8 },

    /// A listener registered for one pin delivered an edge for another
    #[error("Listener for pin {registered} delivered an edge for pin {delivered}")]
    MismatchedPinEvent { registered: u8, delivered: u8 },

    /// Time-series write failed
    #[error("Upload failed: {0}")]
    Upload(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PiMoodError {
    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new hardware fault
    pub fn hardware_fault(msg: impl Into<String>) -> Self {
        Self::HardwareFault(msg.into())
    }

    /// Create a new upload failure
    pub fn upload_error(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    /// Whether this error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::HardwareFault(_) | Self::Io(_)
        )
    }
}
