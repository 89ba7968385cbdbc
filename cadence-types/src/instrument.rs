use serde::{Deserialize, Serialize};

/// A breakpoint in a lazy pitch-bend sequence: offset in seconds from the
/// note's trigger time, and bend amount in semitones. Represented as a plain
/// sorted array rather than a stateful iterator so re-scheduling from any
/// point stays idempotent (§9).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchBendPoint {
    pub time_seconds: f64,
    pub semitones: f32,
}

/// Per-note parameters that ride along with trigger/release but don't affect
/// scheduling decisions themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedParams {
    pub pan: Option<f32>,
    pub mod_wheel: Option<f32>,
    pub aftertouch: Option<f32>,
    #[serde(default)]
    pub pitch_bend: Vec<PitchBendPoint>,
}

impl ExtendedParams {
    /// Linear interpolation between the two breakpoints bracketing `t`, in
    /// semitones. Returns 0.0 if there is no pitch bend data.
    pub fn pitch_bend_at(&self, t_seconds: f64) -> f32 {
        if self.pitch_bend.is_empty() {
            return 0.0;
        }
        if t_seconds <= self.pitch_bend[0].time_seconds {
            return self.pitch_bend[0].semitones;
        }
        let last = self.pitch_bend.len() - 1;
        if t_seconds >= self.pitch_bend[last].time_seconds {
            return self.pitch_bend[last].semitones;
        }
        let idx = self
            .pitch_bend
            .partition_point(|p| p.time_seconds <= t_seconds)
            .saturating_sub(1);
        let a = &self.pitch_bend[idx];
        let b = &self.pitch_bend[idx + 1];
        let span = b.time_seconds - a.time_seconds;
        let frac = if span > 0.0 {
            (t_seconds - a.time_seconds) / span
        } else {
            0.0
        };
        a.semitones + (b.semitones - a.semitones) * frac as f32
    }
}
