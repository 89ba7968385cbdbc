use std::fmt;

/// The error kinds from §7. Plain enum, no `thiserror`/`anyhow` — matches
/// how the rest of this codebase reports recoverable failures: log at the
/// recovery point, return a value the caller can match on.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    InvalidPosition,
    InstrumentMissing(crate::ids::InstrumentId),
    ParamTargetMissing(crate::ids::AutomationTargetId),
    VoiceExhaustion(crate::ids::InstrumentId),
    CallbackFailure(String),
    ClockDiscontinuity,
    TempoChangedWhilePlaying,
    HostGone,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidPosition => write!(f, "seek position was negative or NaN, clamped to 0"),
            CoreError::InstrumentMissing(id) => write!(f, "instrument {id} not loaded"),
            CoreError::ParamTargetMissing(id) => write!(f, "automation target {id} does not exist"),
            CoreError::VoiceExhaustion(id) => {
                write!(f, "instrument {id} has no voices available and none could be stolen")
            }
            CoreError::CallbackFailure(msg) => write!(f, "event callback failed: {msg}"),
            CoreError::ClockDiscontinuity => write!(f, "audio clock moved backwards, treating as seek"),
            CoreError::TempoChangedWhilePlaying => {
                write!(f, "tempo changed while playing, lookahead re-scheduled")
            }
            CoreError::HostGone => write!(f, "audio host is no longer reachable"),
        }
    }
}

impl std::error::Error for CoreError {}
