use serde::{Deserialize, Serialize};

use crate::ids::{BufferId, ClipId, PatternId, TrackId};

/// A pattern clip: plays a referenced pattern over an arrangement-time
/// span, looping the pattern internally if the clip outlasts it, and
/// optionally starting partway into the pattern (the split-clip case).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternClipSpec {
    pub id: ClipId,
    pub track_id: TrackId,
    pub pattern_id: PatternId,
    pub start_tick: u32,
    pub duration_ticks: u32,
    #[serde(default)]
    pub pattern_offset_ticks: u32,
}

/// An optional linear gain envelope for an audio clip, expressed as
/// (offset_seconds, gain) breakpoints relative to the clip's own start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GainEnvelope {
    pub points: Vec<(f64, f32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClipSpec {
    pub id: ClipId,
    pub track_id: TrackId,
    pub buffer_id: BufferId,
    pub start_tick: u32,
    pub duration_ticks: u32,
    #[serde(default)]
    pub sample_offset_seconds: f64,
    #[serde(default)]
    pub gain_envelope: Option<GainEnvelope>,
    /// Overrides the track's output routing for this clip specifically.
    #[serde(default)]
    pub destination_override: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrangementClip {
    Pattern(PatternClipSpec),
    Audio(AudioClipSpec),
}

impl ArrangementClip {
    pub fn id(&self) -> ClipId {
        match self {
            ArrangementClip::Pattern(p) => p.id,
            ArrangementClip::Audio(a) => a.id,
        }
    }

    pub fn track_id(&self) -> TrackId {
        match self {
            ArrangementClip::Pattern(p) => p.track_id,
            ArrangementClip::Audio(a) => a.track_id,
        }
    }

    pub fn start_tick(&self) -> u32 {
        match self {
            ArrangementClip::Pattern(p) => p.start_tick,
            ArrangementClip::Audio(a) => a.start_tick,
        }
    }

    pub fn duration_ticks(&self) -> u32 {
        match self {
            ArrangementClip::Pattern(p) => p.duration_ticks,
            ArrangementClip::Audio(a) => a.duration_ticks,
        }
    }

    pub fn end_tick(&self) -> u32 {
        self.start_tick() + self.duration_ticks()
    }
}

/// Mute/solo policy: if any track is soloed, only soloed tracks produce
/// events; otherwise muted tracks are silent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub mute: bool,
    pub solo: bool,
    pub output_routing: String,
}

impl Track {
    pub fn new(id: TrackId, output_routing: impl Into<String>) -> Self {
        Self {
            id,
            mute: false,
            solo: false,
            output_routing: output_routing.into(),
        }
    }
}

/// Given the full set of tracks, decides whether `track_id` should currently
/// produce events: if any track is soloing, only soloed tracks pass;
/// otherwise muted tracks are excluded.
pub fn track_is_audible(tracks: &[Track], track_id: TrackId) -> bool {
    let any_solo = tracks.iter().any(|t| t.solo);
    let Some(track) = tracks.iter().find(|t| t.id == track_id) else {
        return true;
    };
    if any_solo {
        track.solo
    } else {
        !track.mute
    }
}
