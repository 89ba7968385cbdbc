use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::InstrumentId;
use crate::instrument::ExtendedParams;

/// A single MIDI-like note event within a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start_tick: u32,
    pub length_ticks: u32,
    #[serde(default)]
    pub extended: ExtendedParams,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start_tick: u32, length_ticks: u32) -> Self {
        Self {
            pitch,
            velocity,
            start_tick,
            length_ticks,
            extended: ExtendedParams::default(),
        }
    }

    pub fn end_tick(&self) -> u32 {
        self.start_tick + self.length_ticks
    }
}

/// An immutable (from the scheduler's perspective) collection of notes per
/// instrument, with an authored or inferred length.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pattern {
    pub id: crate::ids::PatternId,
    pub authored_length_ticks: Option<u32>,
    pub tracks: HashMap<InstrumentId, Vec<Note>>,
}

const MIN_PATTERN_LENGTH_TICKS: u32 = 64 * crate::TICKS_PER_STEP;

impl Pattern {
    pub fn new(id: crate::ids::PatternId) -> Self {
        Self {
            id,
            authored_length_ticks: None,
            tracks: HashMap::new(),
        }
    }

    pub fn add_note(&mut self, instrument_id: InstrumentId, note: Note) {
        self.tracks.entry(instrument_id).or_default().push(note);
    }

    pub fn notes_for(&self, instrument_id: InstrumentId) -> &[Note] {
        self.tracks
            .get(&instrument_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn instrument_ids(&self) -> impl Iterator<Item = InstrumentId> + '_ {
        self.tracks.keys().copied()
    }

    /// Effective pattern length per §4.3 step 2: the authored length if set,
    /// else the smallest multiple of 16 steps covering every note's start
    /// tick, with a floor of 64 steps.
    pub fn effective_length_ticks(&self) -> u32 {
        if let Some(len) = self.authored_length_ticks {
            return len;
        }
        let max_start = self
            .tracks
            .values()
            .flat_map(|notes| notes.iter())
            .map(|n| n.start_tick)
            .max()
            .unwrap_or(0);
        let sixteen_steps = 16 * crate::TICKS_PER_STEP;
        let rounded = ((max_start / sixteen_steps) + 1) * sixteen_steps;
        rounded.max(MIN_PATTERN_LENGTH_TICKS)
    }
}
