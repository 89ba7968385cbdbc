//! Concrete instrument engines (§3): single-sample, multi-sample (velocity
//! layers + round robin), virtual-analog (mono/poly, portamento/legato),
//! and granular. Each is a small [`VoiceEngine`] plus [`PooledInstrument`],
//! the one-level composition the teacher's own voice/pool split models and
//! §9 requires in place of an instrument-type inheritance hierarchy: an
//! `Instrument` is always `PooledInstrument<E>` for some concrete `E`.
//!
//! None of these drive a real audio graph — that lives on the host side of
//! §6's audio host interface. They track just enough state (amplitude,
//! frequency, active sample/grain choice) to make voice stealing and
//! mono/legato/portamento behaviour observable and testable.

use cadence_types::{AutomationTargetId, BufferId, CoreError, ExtendedParams, InstrumentId};

use crate::instrument::{Instrument, OutputNodeId, VoiceEngine};
use crate::voices::{VoiceManager, VoiceMode};

/// Standard equal-tempered MIDI pitch to frequency mapping, `semitones`
/// applied on top for pitch bend/portamento glides. Grounded in the same
/// `tuning * 2^((pitch-69)/12)` formula the teacher's voice spawner computes
/// for its SuperCollider `freq` control.
pub fn midi_to_freq(pitch: u8, semitone_offset: f32, tuning_a4: f32) -> f32 {
    tuning_a4 * 2f32.powf((pitch as f32 + semitone_offset - 69.0) / 12.0)
}

const DEFAULT_TUNING_A4: f32 = 440.0;

/// One voice's worth of state every engine below shares: current amplitude
/// (read by the stealing score) and the frequency it's currently sounding
/// at (mutated by `change_pitch` for mono glides and by pitch-bend
/// application).
#[derive(Debug, Clone, Copy, Default)]
struct VoiceState {
    amplitude: f32,
    freq_hz: f32,
    bend_semitones: f32,
}

impl VoiceState {
    fn trigger(&mut self, pitch: u8, velocity: u8, bend: f32) {
        self.amplitude = velocity as f32 / 127.0;
        self.bend_semitones = bend;
        self.freq_hz = midi_to_freq(pitch, bend, DEFAULT_TUNING_A4);
    }
}

/// Single-sample engine: one sample, played back at a rate derived from
/// the triggered pitch relative to the sample's authored root pitch.
#[derive(Debug)]
pub struct SingleSampleEngine {
    buffer_id: BufferId,
    root_pitch: u8,
    state: VoiceState,
    playback_rate: f32,
}

impl SingleSampleEngine {
    pub fn new(buffer_id: BufferId, root_pitch: u8) -> Self {
        Self { buffer_id, root_pitch, state: VoiceState::default(), playback_rate: 1.0 }
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer_id
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate
    }
}

impl VoiceEngine for SingleSampleEngine {
    fn start(&mut self, pitch: u8, velocity: u8, _at_seconds: f64, extended: &ExtendedParams) {
        let bend = extended.pitch_bend_at(0.0);
        self.state.trigger(pitch, velocity, bend);
        self.playback_rate = 2f32.powf((pitch as f32 - self.root_pitch as f32) / 12.0);
    }

    fn change_pitch(&mut self, pitch: u8, _portamento_seconds: f64, _at_seconds: f64) {
        // A sampler has no continuous oscillator to glide; a pitch change
        // mid-voice just re-derives playback rate for the next grain of
        // audio the host reads (used by mono mode's legato re-target).
        self.playback_rate = 2f32.powf((pitch as f32 - self.root_pitch as f32) / 12.0);
    }

    fn begin_release(&mut self, _at_seconds: f64) -> f64 {
        0.05
    }

    fn apply_extended(&mut self, extended: &ExtendedParams, at_seconds: f64) {
        self.state.bend_semitones = extended.pitch_bend_at(at_seconds);
    }

    fn silence_immediately(&mut self) {
        self.state.amplitude = 0.0;
    }

    fn current_amplitude(&self) -> f32 {
        self.state.amplitude
    }
}

/// One velocity-layered, round-robin-grouped sample.
#[derive(Debug, Clone)]
pub struct SampleLayer {
    pub buffer_id: BufferId,
    pub root_pitch: u8,
    /// Inclusive velocity range this layer responds to.
    pub velocity_range: (u8, u8),
    /// Round-robin group: consecutive triggers within the same velocity
    /// layer cycle through this layer's siblings rather than always
    /// picking the same one.
    pub round_robin_group: u8,
}

/// Multi-sample engine: selects a velocity layer by the triggering
/// velocity, then round-robins among that layer's siblings so repeated hits
/// at the same velocity don't always sound identical (§3 instrument
/// polymorphism).
#[derive(Debug)]
pub struct MultiSampleEngine {
    layers: Vec<SampleLayer>,
    round_robin_cursor: std::collections::HashMap<u8, usize>,
    state: VoiceState,
    active_layer: Option<usize>,
}

impl MultiSampleEngine {
    pub fn new(layers: Vec<SampleLayer>) -> Self {
        Self {
            layers,
            round_robin_cursor: std::collections::HashMap::new(),
            state: VoiceState::default(),
            active_layer: None,
        }
    }

    /// Picks the layer for `velocity`: first every layer whose range
    /// contains it, then the next one in that group's round-robin cycle.
    fn select_layer(&mut self, velocity: u8) -> Option<usize> {
        let matches: Vec<usize> = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.velocity_range.0 <= velocity && velocity <= l.velocity_range.1)
            .map(|(i, _)| i)
            .collect();
        if matches.is_empty() {
            return None;
        }
        let group = self.layers[matches[0]].round_robin_group;
        let group_matches: Vec<usize> =
            matches.into_iter().filter(|&i| self.layers[i].round_robin_group == group).collect();
        if group_matches.is_empty() {
            return None;
        }
        let cursor = self.round_robin_cursor.entry(group).or_insert(0);
        let chosen = group_matches[*cursor % group_matches.len()];
        *cursor = (*cursor + 1) % group_matches.len();
        Some(chosen)
    }

    pub fn active_buffer_id(&self) -> Option<BufferId> {
        self.active_layer.map(|i| self.layers[i].buffer_id)
    }
}

impl VoiceEngine for MultiSampleEngine {
    fn start(&mut self, pitch: u8, velocity: u8, _at_seconds: f64, extended: &ExtendedParams) {
        let bend = extended.pitch_bend_at(0.0);
        self.state.trigger(pitch, velocity, bend);
        self.active_layer = self.select_layer(velocity);
    }

    fn change_pitch(&mut self, pitch: u8, _portamento_seconds: f64, _at_seconds: f64) {
        self.state.freq_hz = midi_to_freq(pitch, self.state.bend_semitones, DEFAULT_TUNING_A4);
    }

    fn begin_release(&mut self, _at_seconds: f64) -> f64 {
        0.08
    }

    fn apply_extended(&mut self, extended: &ExtendedParams, at_seconds: f64) {
        self.state.bend_semitones = extended.pitch_bend_at(at_seconds);
    }

    fn silence_immediately(&mut self) {
        self.state.amplitude = 0.0;
        self.active_layer = None;
    }

    fn current_amplitude(&self) -> f32 {
        self.state.amplitude
    }
}

/// Virtual-analog engine: an oscillator frequency target plus a linear
/// attack/release amplitude envelope, tracked explicitly rather than
/// evaluated against a wall clock so portamento glides and legato
/// re-triggers (§4.4) are directly inspectable in tests.
#[derive(Debug)]
pub struct VirtualAnalogEngine {
    state: VoiceState,
    glide_from_hz: f32,
    glide_to_hz: f32,
    glide_started_at: f64,
    glide_duration_seconds: f64,
    attack_seconds: f64,
    release_seconds: f64,
}

impl VirtualAnalogEngine {
    pub fn new(attack_seconds: f64, release_seconds: f64) -> Self {
        Self {
            state: VoiceState::default(),
            glide_from_hz: 0.0,
            glide_to_hz: 0.0,
            glide_started_at: 0.0,
            glide_duration_seconds: 0.0,
            attack_seconds,
            release_seconds,
        }
    }

    /// The oscillator's target frequency right now: if a glide is still in
    /// flight, linearly interpolated; otherwise the settled frequency.
    pub fn current_freq_hz(&self, now_seconds: f64) -> f32 {
        if self.glide_duration_seconds <= 0.0 {
            return self.state.freq_hz;
        }
        let elapsed = (now_seconds - self.glide_started_at).max(0.0);
        let t = (elapsed / self.glide_duration_seconds).clamp(0.0, 1.0) as f32;
        self.glide_from_hz + (self.glide_to_hz - self.glide_from_hz) * t
    }
}

impl VoiceEngine for VirtualAnalogEngine {
    fn start(&mut self, pitch: u8, velocity: u8, at_seconds: f64, extended: &ExtendedParams) {
        let bend = extended.pitch_bend_at(0.0);
        self.state.trigger(pitch, velocity, bend);
        self.glide_from_hz = self.state.freq_hz;
        self.glide_to_hz = self.state.freq_hz;
        self.glide_started_at = at_seconds;
        self.glide_duration_seconds = 0.0;
    }

    /// Frequency-only glide (§4.4 mono portamento): starts a new ramp from
    /// wherever the oscillator currently sits toward `pitch`'s frequency,
    /// without touching amplitude — a legato retrigger calls `start`
    /// separately when `!legato`.
    fn change_pitch(&mut self, pitch: u8, portamento_seconds: f64, at_seconds: f64) {
        let target = midi_to_freq(pitch, self.state.bend_semitones, DEFAULT_TUNING_A4);
        self.glide_from_hz = self.current_freq_hz(at_seconds);
        self.glide_to_hz = target;
        self.glide_started_at = at_seconds;
        self.glide_duration_seconds = portamento_seconds;
        self.state.freq_hz = target;
    }

    fn begin_release(&mut self, _at_seconds: f64) -> f64 {
        self.release_seconds
    }

    fn apply_extended(&mut self, extended: &ExtendedParams, at_seconds: f64) {
        self.state.bend_semitones = extended.pitch_bend_at(at_seconds);
        self.state.freq_hz = self.current_freq_hz(at_seconds) * 2f32.powf(self.state.bend_semitones / 12.0);
    }

    fn silence_immediately(&mut self) {
        self.state.amplitude = 0.0;
        self.glide_duration_seconds = 0.0;
    }

    fn current_amplitude(&self) -> f32 {
        self.state.amplitude
    }
}

/// Granular engine: triggers a stream of overlapping grains from a source
/// buffer at a configured density and duration. Tracked state is the
/// grain-stream parameters a real granular voice would feed its scheduler;
/// this engine itself is just bookkeeping for those parameters plus the
/// shared amplitude/stealing contract.
#[derive(Debug)]
pub struct GranularEngine {
    buffer_id: BufferId,
    grain_duration_seconds: f64,
    grains_per_second: f32,
    position_seconds: f64,
    state: VoiceState,
}

impl GranularEngine {
    pub fn new(buffer_id: BufferId, grain_duration_seconds: f64, grains_per_second: f32) -> Self {
        Self {
            buffer_id,
            grain_duration_seconds,
            grains_per_second,
            position_seconds: 0.0,
            state: VoiceState::default(),
        }
    }

    pub fn grain_duration_seconds(&self) -> f64 {
        self.grain_duration_seconds
    }

    pub fn grains_per_second(&self) -> f32 {
        self.grains_per_second
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer_id
    }
}

impl VoiceEngine for GranularEngine {
    fn start(&mut self, pitch: u8, velocity: u8, _at_seconds: f64, extended: &ExtendedParams) {
        let bend = extended.pitch_bend_at(0.0);
        self.state.trigger(pitch, velocity, bend);
        self.position_seconds = 0.0;
    }

    fn change_pitch(&mut self, pitch: u8, _portamento_seconds: f64, _at_seconds: f64) {
        self.state.freq_hz = midi_to_freq(pitch, self.state.bend_semitones, DEFAULT_TUNING_A4);
    }

    fn begin_release(&mut self, _at_seconds: f64) -> f64 {
        self.grain_duration_seconds.max(0.05)
    }

    fn apply_extended(&mut self, extended: &ExtendedParams, at_seconds: f64) {
        self.state.bend_semitones = extended.pitch_bend_at(at_seconds);
    }

    fn silence_immediately(&mut self) {
        self.state.amplitude = 0.0;
    }

    fn current_amplitude(&self) -> f32 {
        self.state.amplitude
    }
}

/// Wires a [`VoiceManager<E>`] into the [`Instrument`] capability trait
/// (§3, §9): the only thing every concrete instrument needs beyond its
/// voice pool is an id, a display name, and an output routing key.
pub struct PooledInstrument<E: VoiceEngine> {
    id: InstrumentId,
    name: String,
    output: OutputNodeId,
    pool: VoiceManager<E>,
}

impl<E: VoiceEngine> PooledInstrument<E> {
    pub fn new(id: InstrumentId, name: impl Into<String>, output: OutputNodeId, mode: VoiceMode, engines: Vec<E>) -> Self {
        Self { id, name: name.into(), output, pool: VoiceManager::new(id, mode, engines) }
    }

    pub fn pool(&self) -> &VoiceManager<E> {
        &self.pool
    }
}

impl<E: VoiceEngine> Instrument for PooledInstrument<E> {
    fn id(&self) -> InstrumentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn trigger(
        &mut self,
        pitch: u8,
        velocity: u8,
        at_seconds: f64,
        note_end_tick: Option<i64>,
        extended: &ExtendedParams,
    ) -> Result<(), CoreError> {
        self.pool.trigger(pitch, velocity, at_seconds, note_end_tick, extended)
    }

    fn release(&mut self, pitch: u8, at_seconds: f64) {
        self.pool.release(pitch, at_seconds);
    }

    fn release_all(&mut self, at_seconds: f64) {
        self.pool.release_all(at_seconds);
    }

    fn stop_all_immediate(&mut self) {
        self.pool.stop_all_immediate();
    }

    /// §3: instruments consume parameter-set operations directly; a
    /// `PooledInstrument` has no per-instrument (non-per-voice) parameter
    /// store of its own, so this is a no-op here and left for a host-side
    /// audio-graph adapter to intercept before it ever reaches this type.
    fn set_param(&mut self, _param_id: AutomationTargetId, _value: f32, _at_seconds: f64) {}

    fn get_output_node(&self) -> OutputNodeId {
        self.output.clone()
    }

    fn advance(&mut self, at_seconds: f64) {
        self.pool.sweep_expired_releases(at_seconds);
    }

    fn stop_notes_ended_before(&mut self, boundary_tick: u32, at_seconds: f64) {
        self.pool.stop_notes_ended_before(boundary_tick, at_seconds);
    }
}
