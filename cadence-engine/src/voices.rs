//! Voice Manager (C4, §4.4): a pre-allocated, fixed-size voice pool per
//! instrument. Never allocates audio nodes during playback — every voice
//! exists from construction and only ever moves between `free`,
//! `active_by_pitch`, and `releasing`.
//!
//! Grounded in the same stealing-score shape and lifecycle bookkeeping as
//! a SuperCollider-bus-oriented voice allocator, adapted onto a pool that
//! owns fixed `Voice` slots directly rather than dynamically-issued bus
//! ids.

use std::collections::{HashMap, HashSet};

use cadence_types::{CoreError, ExtendedParams, InstrumentId, VoiceId};

use crate::instrument::VoiceEngine;

/// A voice's position in its lifecycle state machine (§3): IDLE
/// --trigger--> ACTIVE --release--> RELEASING --(envelope end)--> IDLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Active,
    Releasing,
}

struct Voice<E> {
    engine: E,
    state: VoiceState,
    pitch: u8,
    velocity: u8,
    triggered_at: f64,
    release_end_at: f64,
    /// Arrangement tick at which the note currently sounding on this voice
    /// was authored to end (`arr_tick + length_ticks`, §4.3), if the caller
    /// supplied one. Used only by [`VoiceManager::stop_notes_ended_before`]
    /// (§4.3 loop re-schedule step 3) to tell a sustain that legitimately
    /// crosses a loop boundary apart from a voice that should already have
    /// been released before it.
    authored_end_tick: Option<i64>,
}

/// Monophonic behaviour configuration (§4.4). `legato = false` means every
/// new note, even while one is held, retriggers the amplitude envelope;
/// `portamento_seconds = 0.0` means pitch changes are instantaneous.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiceMode {
    Poly,
    Mono { portamento_seconds: f64, legato: bool },
}

/// Safety fallback window added to a voice's computed release duration
/// before the pool force-returns it even if the audio graph's `onended`
/// callback was never observed (§4.4).
const RELEASE_FALLBACK_SLACK_SECONDS: f64 = 1.0;

pub struct VoiceManager<E: VoiceEngine> {
    instrument_id: InstrumentId,
    voices: Vec<Voice<E>>,
    free: Vec<VoiceId>,
    active_by_pitch: HashMap<u8, HashSet<VoiceId>>,
    releasing: HashSet<VoiceId>,
    mode: VoiceMode,
    held_pitches: Vec<u8>,
    mono_voice: Option<VoiceId>,
}

impl<E: VoiceEngine> VoiceManager<E> {
    pub fn new(instrument_id: InstrumentId, mode: VoiceMode, engines: Vec<E>) -> Self {
        let free = (0..engines.len() as u32).map(VoiceId).collect();
        let voices = engines
            .into_iter()
            .map(|engine| Voice {
                engine,
                state: VoiceState::Idle,
                pitch: 0,
                velocity: 0,
                triggered_at: 0.0,
                release_end_at: 0.0,
                authored_end_tick: None,
            })
            .collect();
        Self {
            instrument_id,
            voices,
            free,
            active_by_pitch: HashMap::new(),
            releasing: HashSet::new(),
            mode,
            held_pitches: Vec::new(),
            mono_voice: None,
        }
    }

    pub fn max_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn active_voice_count(&self) -> usize {
        self.active_by_pitch.values().map(HashSet::len).sum()
    }

    pub fn voices_for_pitch(&self, pitch: u8) -> usize {
        self.active_by_pitch.get(&pitch).map(HashSet::len).unwrap_or(0)
    }

    pub fn is_idle(&self, id: VoiceId) -> bool {
        self.voices[id.0 as usize].state == VoiceState::Idle
    }

    pub fn amplitude_of(&self, id: VoiceId) -> f32 {
        self.voices[id.0 as usize].engine.current_amplitude()
    }

    pub fn trigger(
        &mut self,
        pitch: u8,
        velocity: u8,
        at_seconds: f64,
        note_end_tick: Option<i64>,
        extended: &ExtendedParams,
    ) -> Result<(), CoreError> {
        match self.mode {
            VoiceMode::Poly => self.trigger_poly(pitch, velocity, at_seconds, note_end_tick, extended),
            VoiceMode::Mono { .. } => {
                self.trigger_mono(pitch, velocity, at_seconds, note_end_tick, extended);
                Ok(())
            }
        }
    }

    fn trigger_poly(
        &mut self,
        pitch: u8,
        velocity: u8,
        at_seconds: f64,
        note_end_tick: Option<i64>,
        extended: &ExtendedParams,
    ) -> Result<(), CoreError> {
        let id = self.acquire_voice(at_seconds)?;
        let voice = &mut self.voices[id.0 as usize];
        voice.engine.start(pitch, velocity, at_seconds, extended);
        voice.state = VoiceState::Active;
        voice.pitch = pitch;
        voice.velocity = velocity;
        voice.triggered_at = at_seconds;
        voice.authored_end_tick = note_end_tick;
        self.active_by_pitch.entry(pitch).or_default().insert(id);
        Ok(())
    }

    fn trigger_mono(
        &mut self,
        pitch: u8,
        velocity: u8,
        at_seconds: f64,
        note_end_tick: Option<i64>,
        extended: &ExtendedParams,
    ) {
        let VoiceMode::Mono { portamento_seconds, legato } = self.mode else {
            unreachable!()
        };
        self.held_pitches.retain(|&p| p != pitch);
        self.held_pitches.push(pitch);

        if let Some(id) = self.mono_voice {
            let old_pitch = self.voices[id.0 as usize].pitch;
            let voice = &mut self.voices[id.0 as usize];
            voice.engine.change_pitch(pitch, portamento_seconds, at_seconds);
            if !legato {
                voice.engine.start(pitch, velocity, at_seconds, extended);
            }
            voice.pitch = pitch;
            voice.velocity = velocity;
            voice.authored_end_tick = note_end_tick;
            if old_pitch != pitch {
                if let Some(set) = self.active_by_pitch.get_mut(&old_pitch) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.active_by_pitch.remove(&old_pitch);
                    }
                }
                self.active_by_pitch.entry(pitch).or_default().insert(id);
            }
        } else {
            // Mono mode never steals for its own single voice slot: callers
            // size a mono instrument's pool to 1 (or more, for unison), so
            // this follows the poly acquisition path for the first note.
            if let Ok(id) = self.acquire_voice(at_seconds) {
                let voice = &mut self.voices[id.0 as usize];
                voice.engine.start(pitch, velocity, at_seconds, extended);
                voice.state = VoiceState::Active;
                voice.pitch = pitch;
                voice.velocity = velocity;
                voice.triggered_at = at_seconds;
                voice.authored_end_tick = note_end_tick;
                self.mono_voice = Some(id);
                self.active_by_pitch.entry(pitch).or_default().insert(id);
            }
        }
    }

    /// Pops a free voice, or steals one per the priority in §4.4.
    fn acquire_voice(&mut self, now: f64) -> Result<VoiceId, CoreError> {
        if let Some(id) = self.free.pop() {
            return Ok(id);
        }
        match self.steal_candidate(now) {
            Some(id) => {
                self.remove_from_tracking(id);
                self.voices[id.0 as usize].engine.silence_immediately();
                Ok(id)
            }
            None => Err(CoreError::VoiceExhaustion(self.instrument_id)),
        }
    }

    /// Lower score steals first: RELEASING voices are always preferred
    /// (−∞ in the spec); among ACTIVE voices, the quietest and oldest.
    fn steal_candidate(&self, now: f64) -> Option<VoiceId> {
        if let Some(&id) = self.releasing.iter().next() {
            return Some(id);
        }
        self.active_by_pitch
            .values()
            .flatten()
            .copied()
            .min_by(|&a, &b| {
                self.steal_score(a, now)
                    .partial_cmp(&self.steal_score(b, now))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    fn steal_score(&self, id: VoiceId, now: f64) -> f64 {
        let voice = &self.voices[id.0 as usize];
        let amplitude = voice.engine.current_amplitude() as f64;
        let age_seconds = (now - voice.triggered_at).max(0.0);
        amplitude * 50.0 - age_seconds * 10.0 + voice.velocity as f64 * 0.5
    }

    fn remove_from_tracking(&mut self, id: VoiceId) {
        let pitch = self.voices[id.0 as usize].pitch;
        if let Some(set) = self.active_by_pitch.get_mut(&pitch) {
            set.remove(&id);
            if set.is_empty() {
                self.active_by_pitch.remove(&pitch);
            }
        }
        self.releasing.remove(&id);
        if self.mono_voice == Some(id) {
            self.mono_voice = None;
        }
    }

    pub fn release(&mut self, pitch: u8, at_seconds: f64) {
        match self.mode {
            VoiceMode::Poly => self.release_poly(pitch, at_seconds),
            VoiceMode::Mono { portamento_seconds, .. } => {
                self.release_mono(pitch, portamento_seconds, at_seconds)
            }
        }
    }

    fn release_poly(&mut self, pitch: u8, at_seconds: f64) {
        let Some(ids) = self.active_by_pitch.remove(&pitch) else {
            return;
        };
        for id in ids {
            self.begin_release(id, at_seconds);
        }
    }

    fn release_mono(&mut self, pitch: u8, portamento_seconds: f64, at_seconds: f64) {
        self.held_pitches.retain(|&p| p != pitch);
        let Some(id) = self.mono_voice else { return };
        match self.held_pitches.last().copied() {
            Some(still_held) => {
                let voice = &mut self.voices[id.0 as usize];
                voice.engine.change_pitch(still_held, portamento_seconds, at_seconds);
                let old_pitch = voice.pitch;
                voice.pitch = still_held;
                if let Some(set) = self.active_by_pitch.get_mut(&old_pitch) {
                    set.remove(&id);
                }
                self.active_by_pitch.entry(still_held).or_default().insert(id);
            }
            None => {
                if let Some(set) = self.active_by_pitch.get_mut(&pitch) {
                    set.remove(&id);
                }
                self.begin_release(id, at_seconds);
            }
        }
    }

    fn begin_release(&mut self, id: VoiceId, at_seconds: f64) {
        let voice = &mut self.voices[id.0 as usize];
        if voice.state != VoiceState::Active {
            return;
        }
        let release_duration = voice.engine.begin_release(at_seconds);
        voice.state = VoiceState::Releasing;
        voice.release_end_at = at_seconds + release_duration;
        self.releasing.insert(id);
        if self.mono_voice == Some(id) {
            self.mono_voice = None;
        }
    }

    pub fn release_all(&mut self, at_seconds: f64) {
        let pitches: Vec<u8> = self.active_by_pitch.keys().copied().collect();
        for pitch in pitches {
            self.release(pitch, at_seconds);
        }
    }

    /// Called from the audio graph's `onended` callback: the primary path
    /// back to `free`. Idempotent — a voice already returned is a no-op, so
    /// "returns to free exactly once" holds even if both this and the
    /// fallback fire.
    pub fn mark_voice_ended(&mut self, id: VoiceId) {
        self.return_to_free(id);
    }

    /// Called once per tick: force-returns any releasing voice whose
    /// `release_end_at + 1s` has elapsed, in case the primary `onended`
    /// callback was missed (§4.4).
    pub fn sweep_expired_releases(&mut self, now: f64) {
        let expired: Vec<VoiceId> = self
            .releasing
            .iter()
            .copied()
            .filter(|&id| self.voices[id.0 as usize].release_end_at + RELEASE_FALLBACK_SLACK_SECONDS <= now)
            .collect();
        for id in expired {
            log::warn!(
                target: "voices",
                "instrument {} voice {} missed its onended callback, forcing return to free",
                self.instrument_id,
                id.0
            );
            self.return_to_free(id);
        }
    }

    fn return_to_free(&mut self, id: VoiceId) {
        let voice = &mut self.voices[id.0 as usize];
        if voice.state == VoiceState::Idle {
            return;
        }
        voice.state = VoiceState::Idle;
        voice.authored_end_tick = None;
        voice.engine.silence_immediately();
        self.releasing.remove(&id);
        if self.mono_voice == Some(id) {
            self.mono_voice = None;
        }
        self.free.push(id);
    }

    /// §4.3 loop re-schedule step 3: force-stops every voice still sounding
    /// a note authored to end strictly before `boundary_tick` (normally
    /// `loop_start_ticks`), leaving voices with no authored end tick or an
    /// end tick at/after the boundary alone — those are the ones legitimately
    /// crossing the loop point and must keep sustaining. Unlike
    /// `return_to_free`, this targets voices that may still be `Active` (not
    /// yet released), so it goes through `remove_from_tracking` to also
    /// clear `active_by_pitch`.
    pub fn stop_notes_ended_before(&mut self, boundary_tick: u32, _at_seconds: f64) {
        let boundary_tick = boundary_tick as i64;
        let ids: Vec<VoiceId> = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, voice)| {
                voice.state != VoiceState::Idle
                    && voice.authored_end_tick.is_some_and(|end| end < boundary_tick)
            })
            .map(|(idx, _)| VoiceId(idx as u32))
            .collect();
        for id in ids {
            self.remove_from_tracking(id);
            let voice = &mut self.voices[id.0 as usize];
            voice.state = VoiceState::Idle;
            voice.authored_end_tick = None;
            voice.engine.silence_immediately();
            self.free.push(id);
        }
    }

    pub fn stop_all_immediate(&mut self) {
        for (idx, voice) in self.voices.iter_mut().enumerate() {
            voice.engine.silence_immediately();
            voice.state = VoiceState::Idle;
            voice.authored_end_tick = None;
            let _ = idx;
        }
        self.active_by_pitch.clear();
        self.releasing.clear();
        self.mono_voice = None;
        self.held_pitches.clear();
        self.free = (0..self.voices.len() as u32).map(VoiceId).collect();
    }

    pub fn apply_extended(&mut self, pitch: u8, extended: &ExtendedParams, at_seconds: f64) {
        if let Some(ids) = self.active_by_pitch.get(&pitch) {
            for &id in ids {
                self.voices[id.0 as usize].engine.apply_extended(extended, at_seconds);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct FakeEngine {
        amplitude: f32,
        silenced: bool,
        pitch: u8,
    }

    impl VoiceEngine for FakeEngine {
        fn start(&mut self, pitch: u8, _velocity: u8, _at: f64, _ext: &ExtendedParams) {
            self.pitch = pitch;
            self.amplitude = 1.0;
            self.silenced = false;
        }
        fn change_pitch(&mut self, pitch: u8, _portamento: f64, _at: f64) {
            self.pitch = pitch;
        }
        fn begin_release(&mut self, _at: f64) -> f64 {
            0.2
        }
        fn apply_extended(&mut self, _extended: &ExtendedParams, _at: f64) {}
        fn silence_immediately(&mut self) {
            self.amplitude = 0.0;
            self.silenced = true;
        }
        fn current_amplitude(&self) -> f32 {
            self.amplitude
        }
    }

    fn make_pool(max_voices: u32, mode: VoiceMode) -> VoiceManager<FakeEngine> {
        let engines = (0..max_voices).map(|_| FakeEngine::default()).collect();
        VoiceManager::new(InstrumentId::new(1), mode, engines)
    }

    #[test]
    fn poly_basic_allocation_and_release() {
        let mut pool = make_pool(4, VoiceMode::Poly);
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();
        pool.trigger(64, 100, 0.0, None, &ext).unwrap();
        assert_eq!(pool.active_voice_count(), 2);
        pool.release(60, 1.0);
        assert_eq!(pool.voices_for_pitch(60), 0);
        assert_eq!(pool.active_voice_count(), 1);
    }

    #[test]
    fn releasing_voice_returns_to_free_on_ended_callback() {
        let mut pool = make_pool(1, VoiceMode::Poly);
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();
        pool.release(60, 1.0);
        assert_eq!(pool.free.len(), 0);
        let releasing_id = *pool.releasing.iter().next().unwrap();
        pool.mark_voice_ended(releasing_id);
        assert_eq!(pool.free.len(), 1);
    }

    #[test]
    fn fallback_sweep_recovers_a_missed_onended() {
        let mut pool = make_pool(1, VoiceMode::Poly);
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();
        pool.release(60, 1.0); // release_duration = 0.2 -> end_at = 1.2
        pool.sweep_expired_releases(2.0); // well past end_at + 1.0
        assert_eq!(pool.free.len(), 1);
    }

    #[test]
    fn voice_exhaustion_steals_releasing_before_active() {
        let mut pool = make_pool(1, VoiceMode::Poly);
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();
        pool.release(60, 0.0);
        // Only voice is now RELEASING; a new trigger must steal it rather
        // than report exhaustion.
        assert!(pool.trigger(64, 100, 0.1, None, &ext).is_ok());
        assert_eq!(pool.voices_for_pitch(64), 1);
    }

    #[test]
    fn poly_steals_quietest_oldest_active_voice() {
        let mut pool = make_pool(2, VoiceMode::Poly);
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();
        pool.trigger(62, 100, 1.0, None, &ext).unwrap();
        // Both active; pitch 60 is older (lower steal score) so it is stolen.
        pool.trigger(64, 100, 2.0, None, &ext).unwrap();
        assert_eq!(pool.voices_for_pitch(60), 0);
        assert_eq!(pool.voices_for_pitch(62), 1);
        assert_eq!(pool.voices_for_pitch(64), 1);
    }

    #[test]
    fn stop_all_immediate_returns_every_voice_to_idle() {
        let mut pool = make_pool(2, VoiceMode::Poly);
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();
        pool.trigger(62, 100, 0.0, None, &ext).unwrap();
        pool.stop_all_immediate();
        assert_eq!(pool.active_voice_count(), 0);
        assert_eq!(pool.free.len(), 2);
        for v in &pool.voices {
            assert_eq!(v.state, VoiceState::Idle);
        }
    }

    #[test]
    fn mono_legato_portamento_glides_without_retrigger() {
        let mut pool = make_pool(1, VoiceMode::Mono { portamento_seconds: 0.1, legato: true });
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();
        pool.trigger(64, 100, 0.24, None, &ext).unwrap();
        assert_eq!(pool.active_voice_count(), 1);
        assert_eq!(pool.voices[0].engine.pitch, 64);

        pool.release(64, 0.48);
        // 60 still held -> voice stays active, glides back to 60.
        assert_eq!(pool.active_voice_count(), 1);
        assert_eq!(pool.voices[0].engine.pitch, 60);
    }

    #[test]
    fn mono_note_off_with_nothing_held_releases_voice() {
        let mut pool = make_pool(1, VoiceMode::Mono { portamento_seconds: 0.0, legato: false });
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();
        pool.release(60, 1.0);
        assert_eq!(pool.active_voice_count(), 0);
        assert_eq!(pool.releasing.len(), 1);
    }

    #[test]
    fn stop_notes_ended_before_stops_only_notes_authored_to_end_before_boundary() {
        let mut pool = make_pool(4, VoiceMode::Poly);
        let ext = ExtendedParams::default();
        // This note's authored end (960) is strictly before the loop boundary
        // (1920) and nothing re-triggered it before the wrap: it should be
        // force-stopped.
        pool.trigger(60, 100, 0.0, Some(960), &ext).unwrap();
        // This note legitimately crosses the loop boundary (authored end
        // 2400 is past loop_start 1920): it must keep sounding.
        pool.trigger(64, 100, 0.0, Some(2400), &ext).unwrap();

        pool.stop_notes_ended_before(1920, 5.0);

        assert_eq!(pool.active_voice_count(), 1, "only the crossing voice remains active");
        assert_eq!(pool.voices_for_pitch(60), 0);
        assert_eq!(pool.voices_for_pitch(64), 1);
        assert_eq!(pool.free.len(), 3, "the stopped voice returned to free");
    }

    #[test]
    fn stop_notes_ended_before_leaves_voice_with_no_authored_end_tick_alone() {
        let mut pool = make_pool(2, VoiceMode::Poly);
        let ext = ExtendedParams::default();
        pool.trigger(60, 100, 0.0, None, &ext).unwrap();

        pool.stop_notes_ended_before(1920, 5.0);

        assert_eq!(pool.active_voice_count(), 1, "a voice with no authored end tick is never swept");
    }
}
