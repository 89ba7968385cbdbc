use serde::{Deserialize, Serialize};

/// A loop region in ticks. `enabled` gates whether the transport wraps at
/// `end_ticks`; `end_ticks` must be strictly greater than `start_ticks`
/// whenever `enabled` is true.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start_ticks: u32,
    pub end_ticks: u32,
    pub enabled: bool,
}

impl Default for LoopRegion {
    fn default() -> Self {
        Self {
            start_ticks: 0,
            end_ticks: 0,
            enabled: false,
        }
    }
}

/// The transport's externally-observable state, per §3. `position_ticks`
/// advances monotonically while playing except at a loop wrap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    pub position_ticks: u32,
    pub bpm: f64,
    pub is_playing: bool,
    pub loop_region: LoopRegion,
    pub audio_time_at_position: f64,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            position_ticks: 0,
            bpm: 120.0,
            is_playing: false,
            loop_region: LoopRegion::default(),
            audio_time_at_position: 0.0,
        }
    }
}
