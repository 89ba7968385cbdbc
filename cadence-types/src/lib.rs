pub mod arrangement;
pub mod automation;
pub mod config;
pub mod error;
pub mod ids;
pub mod instrument;
pub mod note;
pub mod transport;

pub use arrangement::{track_is_audible, ArrangementClip, AudioClipSpec, PatternClipSpec, Track};
pub use automation::{AutomationLane, AutomationPoint, AutomationTarget, CurveType};
pub use config::{Config, EngineConfig};
pub use error::CoreError;
pub use ids::{AutomationTargetId, BufferId, ClipId, InstrumentId, PatternId, TrackId, VoiceId};
pub use instrument::{ExtendedParams, PitchBendPoint};
pub use note::{Note, Pattern};
pub use transport::{LoopRegion, TransportState};

/// Ticks per quarter note. Fixed for the lifetime of a session.
pub const PPQ: u32 = 96;
/// Ticks in one sixteenth-note step.
pub const TICKS_PER_STEP: u32 = 24;

/// Converts a tick duration to seconds at the given bpm.
pub fn ticks_to_seconds(ticks: i64, bpm: f64) -> f64 {
    ticks as f64 * 60.0 / (bpm * PPQ as f64)
}

/// Converts a seconds duration to a tick count at the given bpm.
pub fn seconds_to_ticks(seconds: f64, bpm: f64) -> i64 {
    (seconds * bpm * PPQ as f64 / 60.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ticks_seconds() {
        for bpm in [60.0, 97.5, 120.0, 180.0] {
            for t in [0i64, 1, 24, 96, 1337, 96_000] {
                let s = ticks_to_seconds(t, bpm);
                let back = seconds_to_ticks(s, bpm);
                assert_eq!(back, t, "bpm={bpm} t={t}");
            }
        }
    }
}
