//! The status enumeration shared across every layer of the controller.
//!
//! Low-level returns pass through the scheduler, the canonical machine and
//! the command dispatcher unchanged, so the reserved codes at the top of the
//! enum are meaningful at every layer.

/// Unified status/return code.
///
/// `Again` and `Noop` are not errors: `Again` signals backpressure (retry on
/// the next scheduler pass), `Noop` signals an idle continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    // --- Reserved codes, aligned across layers ---
    Ok,
    Error,
    Again,
    Noop,
    Complete,
    Quit,
    Eol,
    Eof,
    FileNotOpen,
    FileSizeExceeded,
    NoSuchDevice,
    BufferEmpty,
    BufferFullFatal,
    BufferFullNonFatal,

    // --- Parser errors ---
    UnrecognizedCommand,
    ExpectedCommandLetter,
    UnsupportedStatement,
    BadNumberFormat,
    ModalGroupViolation,
    ParameterNotFound,
    ParameterUnderRange,
    ParameterOverRange,

    // --- Motion and numeric errors ---
    /// The move collapses to nothing; the caller advances normally.
    ZeroLengthMove,
    ArcSpecificationError,
    FloatingPointError,
    FailedToConverge,

    // --- Limit violations ---
    MaxFeedRateExceeded,
    MaxSeekRateExceeded,
    MaxTravelExceeded,
    MaxSpindleSpeedExceeded,
}

impl Status {
    /// True for codes that report a failure (as opposed to flow control or a
    /// skipped move).
    pub fn is_error(self) -> bool {
        !matches!(
            self,
            Status::Ok
                | Status::Again
                | Status::Noop
                | Status::Complete
                | Status::Quit
                | Status::Eol
                | Status::Eof
                | Status::ZeroLengthMove
        )
    }

    /// Human-readable message for reporting rejected lines.
    pub fn message(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Error => "error",
            Status::Again => "again",
            Status::Noop => "noop",
            Status::Complete => "complete",
            Status::Quit => "quit",
            Status::Eol => "end of line",
            Status::Eof => "end of file",
            Status::FileNotOpen => "file not open",
            Status::FileSizeExceeded => "file size exceeded",
            Status::NoSuchDevice => "no such device",
            Status::BufferEmpty => "buffer empty",
            Status::BufferFullFatal => "buffer full - fatal",
            Status::BufferFullNonFatal => "buffer full",
            Status::UnrecognizedCommand => "unrecognized command",
            Status::ExpectedCommandLetter => "expected command letter",
            Status::UnsupportedStatement => "unsupported statement",
            Status::BadNumberFormat => "bad number format",
            Status::ModalGroupViolation => "modal group violation",
            Status::ParameterNotFound => "parameter not found",
            Status::ParameterUnderRange => "parameter under range",
            Status::ParameterOverRange => "parameter over range",
            Status::ZeroLengthMove => "zero length move",
            Status::ArcSpecificationError => "arc specification error",
            Status::FloatingPointError => "floating point error",
            Status::FailedToConverge => "failed to converge",
            Status::MaxFeedRateExceeded => "maximum feed rate exceeded",
            Status::MaxSeekRateExceeded => "maximum seek rate exceeded",
            Status::MaxTravelExceeded => "maximum travel exceeded",
            Status::MaxSpindleSpeedExceeded => "maximum spindle speed exceeded",
        }
    }
}
