//! Playback Manager (C3, §4.3): the only component that understands
//! patterns, arrangements, and how they map onto scheduled events. Owns
//! debouncing, dirty re-scheduling, and the pattern→events algorithm
//! itself.

use std::collections::HashMap;

use cadence_types::{
    ArrangementClip, AudioClipSpec, ClipId, InstrumentId, Pattern, PatternClipSpec, PatternId,
    Track, TrackId,
};

use crate::scheduler::{EventKind, EventScheduler, OriginTag, Priority, ScheduledEvent};
use crate::transport::TransportClock;

/// Delay budget, in milliseconds, before a priority lane's pending requests
/// are flushed (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct DebounceBudgets {
    pub idle_ms: u32,
    pub realtime_ms: u32,
    pub burst_ms: u32,
}

impl Default for DebounceBudgets {
    fn default() -> Self {
        Self { idle_ms: 16, realtime_ms: 4, burst_ms: 0 }
    }
}

impl DebounceBudgets {
    fn budget_seconds(&self, priority: Priority) -> f64 {
        let ms = match priority {
            Priority::Idle => self.idle_ms,
            Priority::Realtime => self.realtime_ms,
            Priority::Burst => self.burst_ms,
        };
        ms as f64 / 1000.0
    }
}

/// One pending request awaiting its lane's debounce budget.
struct PendingFlush {
    clip_id: ClipId,
    requested_at: f64,
}

/// Batches re-schedule requests per priority lane and reports when each
/// lane's budget has elapsed (§4.3). A higher-priority request preempts: an
/// incoming `burst` request flushes immediately regardless of what else is
/// pending.
pub struct Debouncer {
    budgets: DebounceBudgets,
    pending: HashMap<Priority, Vec<PendingFlush>>,
}

impl Debouncer {
    pub fn new(budgets: DebounceBudgets) -> Self {
        Self { budgets, pending: HashMap::new() }
    }

    pub fn request(&mut self, priority: Priority, clip_id: ClipId, now_seconds: f64) {
        self.pending
            .entry(priority)
            .or_default()
            .push(PendingFlush { clip_id, requested_at: now_seconds });
    }

    /// Drains and returns the clip ids from every lane whose budget has
    /// elapsed, highest priority first.
    pub fn due(&mut self, now_seconds: f64) -> Vec<ClipId> {
        let mut due = Vec::new();
        for priority in [Priority::Burst, Priority::Realtime, Priority::Idle] {
            let budget = self.budgets.budget_seconds(priority);
            if let Some(list) = self.pending.get_mut(&priority) {
                let (ready, still_pending): (Vec<_>, Vec<_>) = list
                    .drain(..)
                    .partition(|p| now_seconds - p.requested_at >= budget);
                due.extend(ready.into_iter().map(|p| p.clip_id));
                *list = still_pending;
            }
        }
        due
    }
}

/// Notes survivable into scheduled events for one loop iteration of a
/// pattern clip.
struct ClipInstance {
    arr_tick: u32,
    pitch: u8,
    velocity: u8,
    length_ticks: u32,
    extended: cadence_types::ExtendedParams,
}

/// Implements §4.3's pattern→events mapping: for a pattern clip, compute
/// which notes from which loop iterations of the referenced pattern fall
/// inside the clip, and at what arrangement tick they land.
fn pattern_clip_instances(clip: &PatternClipSpec, pattern: &Pattern, instrument_id: InstrumentId) -> Vec<ClipInstance> {
    let length = pattern.effective_length_ticks();
    if length == 0 {
        return Vec::new();
    }
    let effective_start = clip.pattern_offset_ticks % length;
    let effective_end = effective_start + clip.duration_ticks;
    let num_loops = effective_end.div_ceil(length).max(1);

    let mut out = Vec::new();
    for i in 0..num_loops {
        let loop_base = i * length;
        for note in pattern.notes_for(instrument_id) {
            let note_time_in_loop = note.start_tick + loop_base;
            if note_time_in_loop < effective_start || note_time_in_loop >= effective_end {
                continue;
            }
            let arr_tick = clip.start_tick + (note_time_in_loop - effective_start);
            out.push(ClipInstance {
                arr_tick,
                pitch: note.pitch,
                velocity: note.velocity,
                length_ticks: note.length_ticks,
                extended: note.extended.clone(),
            });
        }
    }
    out
}

pub struct PlaybackManager {
    patterns: HashMap<PatternId, Pattern>,
    tracks: Vec<Track>,
    clips: HashMap<ClipId, ArrangementClip>,
    debouncer: Debouncer,
}

impl PlaybackManager {
    pub fn new(budgets: DebounceBudgets) -> Self {
        Self {
            patterns: HashMap::new(),
            tracks: Vec::new(),
            clips: HashMap::new(),
            debouncer: Debouncer::new(budgets),
        }
    }

    pub fn set_pattern(&mut self, pattern: Pattern) {
        self.patterns.insert(pattern.id, pattern);
    }

    pub fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
    }

    pub fn set_clip(&mut self, clip: ArrangementClip) {
        self.clips.insert(clip.id(), clip);
    }

    pub fn remove_clip(&mut self, clip_id: ClipId) {
        self.clips.remove(&clip_id);
    }

    /// Enqueues a generic edit (pattern content change, clip move, param
    /// change) on the `idle` lane (§4.3): flushed by [`Self::flush_due`]
    /// once its debounce budget elapses, coalescing a burst of edits into
    /// one re-schedule.
    pub fn request_reschedule(&mut self, clip_id: ClipId, now_seconds: f64) {
        self.debouncer.request(Priority::Idle, clip_id, now_seconds);
    }

    /// Flushes every lane whose debounce budget has elapsed as of
    /// `now_seconds` (§4.3): for each due clip, clears its previously
    /// scheduled events and re-runs pattern/audio-clip scheduling against
    /// the clip's current definition. Called once per [`Engine::advance`]
    /// tick regardless of whether new requests arrived this tick, so a
    /// lane whose budget elapses between ticks still gets flushed promptly.
    pub fn flush_due(&mut self, now_seconds: f64, scheduler: &mut EventScheduler, transport: &TransportClock) {
        for clip_id in self.debouncer.due(now_seconds) {
            scheduler.clear_by_tag(OriginTag::Clip(clip_id));
            match self.clips.get(&clip_id) {
                Some(ArrangementClip::Pattern(_)) => self.schedule_pattern_clip(clip_id, scheduler, transport),
                Some(ArrangementClip::Audio(_)) => self.schedule_audio_clip(clip_id, scheduler, transport),
                None => {}
            }
        }
    }

    /// Schedules every event for one pattern clip across every instrument it
    /// touches, tagged `OriginTag::Clip(clip_id)`. Callers must
    /// `clear_by_tag` first if re-scheduling an already-scheduled clip.
    pub fn schedule_pattern_clip(
        &self,
        clip_id: ClipId,
        scheduler: &mut EventScheduler,
        transport: &TransportClock,
    ) {
        let Some(ArrangementClip::Pattern(clip)) = self.clips.get(&clip_id) else {
            return;
        };
        if !cadence_types::track_is_audible(&self.tracks, clip.track_id) {
            return;
        }
        let Some(pattern) = self.patterns.get(&clip.pattern_id) else {
            log::warn!(target: "playback", "clip {clip_id} references missing pattern {}", clip.pattern_id);
            return;
        };

        for instrument_id in pattern.instrument_ids() {
            for instance in pattern_clip_instances(clip, pattern, instrument_id) {
                let on_seconds = transport.tick_to_audio_time(instance.arr_tick as i64);
                let off_tick = instance.arr_tick + instance.length_ticks;
                scheduler.schedule(
                    instance.arr_tick as i64,
                    on_seconds,
                    EventKind::NoteOn {
                        instrument_id,
                        pitch: instance.pitch,
                        velocity: instance.velocity,
                        note_end_tick: off_tick as i64,
                        extended: instance.extended,
                    },
                    Priority::Burst,
                    OriginTag::Clip(clip_id),
                );

                let off_seconds = transport.tick_to_audio_time(off_tick as i64);
                scheduler.schedule(
                    off_tick as i64,
                    off_seconds,
                    EventKind::NoteOff { instrument_id, pitch: instance.pitch },
                    Priority::Burst,
                    OriginTag::Clip(clip_id),
                );
            }
        }
    }

    pub fn schedule_audio_clip(
        &self,
        clip_id: ClipId,
        scheduler: &mut EventScheduler,
        transport: &TransportClock,
    ) {
        let Some(ArrangementClip::Audio(clip)) = self.clips.get(&clip_id) else {
            return;
        };
        if !cadence_types::track_is_audible(&self.tracks, clip.track_id) {
            return;
        }
        schedule_audio_clip_spec(clip, scheduler, transport);
    }

    /// §4.3 clip-underfoot replacement: clears every event tagged with the
    /// old clip id, swaps in the new pattern reference, and re-runs
    /// pattern→events. No partial carry-over of the old pattern's notes.
    pub fn replace_clip_pattern(
        &mut self,
        clip_id: ClipId,
        new_pattern_id: PatternId,
        scheduler: &mut EventScheduler,
        transport: &TransportClock,
    ) {
        scheduler.clear_by_tag(OriginTag::Clip(clip_id));
        if let Some(ArrangementClip::Pattern(clip)) = self.clips.get_mut(&clip_id) {
            clip.pattern_id = new_pattern_id;
        }
        self.schedule_pattern_clip(clip_id, scheduler, transport);
    }

    /// §4.3 loop re-schedule, steps 1+2: clears events tagged by every
    /// pattern clip intersecting the loop region with `scheduled_tick >=
    /// loop_end_ticks`, then re-runs pattern→events from `loop_start_ticks`.
    /// Sustains and releases already scheduled before the boundary are left
    /// untouched so they continue across the wrap. Step 3 (force-stopping
    /// voices whose authored note end predates `loop_start_ticks` but are
    /// still sounding from the previous iteration) has no voice-state access
    /// from here — it lives in `Engine::handle_transport_event`'s
    /// `TransportEvent::LoopWrap` arm, via `Instrument::stop_notes_ended_before`.
    pub fn reschedule_on_loop_wrap(
        &self,
        loop_start_ticks: u32,
        loop_end_ticks: u32,
        scheduler: &mut EventScheduler,
        transport: &TransportClock,
    ) {
        let intersecting: Vec<ClipId> = self
            .clips
            .values()
            .filter(|c| matches!(c, ArrangementClip::Pattern(_)))
            .filter(|c| c.start_tick() < loop_end_ticks && c.end_tick() > loop_start_ticks)
            .map(|c| c.id())
            .collect();

        for clip_id in &intersecting {
            clear_events_at_or_after(scheduler, *clip_id, loop_end_ticks);
        }
        for clip_id in intersecting {
            self.schedule_pattern_clip(clip_id, scheduler, transport);
        }
    }

    /// Real-time note insertion (§4.3): enqueues the note on the `realtime`
    /// lane; if its tick already falls inside the transport's lookahead
    /// window it is scheduled immediately rather than waiting on the
    /// debouncer.
    pub fn insert_note_realtime(
        &mut self,
        clip_id: ClipId,
        scheduler: &mut EventScheduler,
        transport: &TransportClock,
        now_seconds: f64,
    ) {
        let (_, deadline) = transport.lookahead_window(now_seconds);
        let on_seconds_of_clip_start = self
            .clips
            .get(&clip_id)
            .map(|c| transport.tick_to_audio_time(c.start_tick() as i64));
        match on_seconds_of_clip_start {
            Some(on_seconds) if on_seconds <= deadline => {
                self.schedule_pattern_clip(clip_id, scheduler, transport);
            }
            _ => {
                self.debouncer.request(Priority::Realtime, clip_id, now_seconds);
            }
        }
    }

    pub fn track_instrument_is_audible(&self, track_id: TrackId) -> bool {
        cadence_types::track_is_audible(&self.tracks, track_id)
    }
}

fn schedule_audio_clip_spec(clip: &AudioClipSpec, scheduler: &mut EventScheduler, transport: &TransportClock) {
    let start_seconds = transport.tick_to_audio_time(clip.start_tick as i64);
    scheduler.schedule(
        clip.start_tick as i64,
        start_seconds,
        EventKind::AudioClipStart {
            track_id: clip.track_id,
            clip_id: clip.id,
            sample_offset_seconds: clip.sample_offset_seconds,
        },
        Priority::Burst,
        OriginTag::Clip(clip.id),
    );
}

/// Clears only the events a loop wrap invalidates: pending `note_on`s (and
/// audio/automation starts) at or past `boundary_tick` that never fired,
/// which pattern->events is about to re-derive from `loop_start_ticks`.
/// `note_off` events are left untouched regardless of tick — a note_off
/// still in the queue always corresponds to a voice that already started,
/// so removing it would cut a sustain short instead of letting it continue
/// naturally across the wrap (§4.3, §8). A note_off that happens to survive
/// for a note_on that *was* cleared alongside it is a harmless no-op
/// release against a pitch the voice manager never triggered.
fn clear_events_at_or_after(scheduler: &mut EventScheduler, clip_id: ClipId, boundary_tick: u32) {
    let boundary_tick = boundary_tick as i64;
    scheduler.clear_where(|event| {
        event.origin == OriginTag::Clip(clip_id)
            && event.scheduled_tick >= boundary_tick
            && !matches!(event.kind, EventKind::NoteOff { .. })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::{seconds_to_ticks, Note, TICKS_PER_STEP};

    fn steps(n: u32) -> u32 {
        n * TICKS_PER_STEP
    }

    fn make_pattern(id: u32, instrument: InstrumentId, notes: Vec<Note>) -> Pattern {
        let mut p = Pattern::new(PatternId::new(id));
        for n in notes {
            p.add_note(instrument, n);
        }
        p
    }

    fn make_clip(id: u32, pattern_id: u32, start: u32, duration: u32, offset: u32) -> ArrangementClip {
        ArrangementClip::Pattern(PatternClipSpec {
            id: ClipId::new(id),
            track_id: TrackId::new(1),
            pattern_id: PatternId::new(pattern_id),
            start_tick: start,
            duration_ticks: duration,
            pattern_offset_ticks: offset,
        })
    }

    fn events_for(scheduler: &mut EventScheduler) -> Vec<(i64, String)> {
        let mut events = scheduler.dispatch_batch(f64::MAX, 0.0);
        events.sort_by_key(|e| e.scheduled_tick);
        events
            .into_iter()
            .map(|e| {
                let label = match e.kind {
                    EventKind::NoteOn { pitch, .. } => format!("on({pitch})"),
                    EventKind::NoteOff { pitch, .. } => format!("off({pitch})"),
                    _ => "other".to_string(),
                };
                (e.scheduled_tick, label)
            })
            .collect()
    }

    fn note_ons(events: &[(i64, String)]) -> Vec<i64> {
        events.iter().filter(|(_, l)| l.starts_with("on(")).map(|(t, _)| *t).collect()
    }

    #[test]
    fn scenario_basic_polyphony() {
        let instrument = InstrumentId::new(1);
        let pattern = make_pattern(
            1,
            instrument,
            vec![
                Note::new(60, 100, 0, steps(1)),
                Note::new(60, 100, steps(1), steps(1)),
                Note::new(60, 100, steps(2), steps(1)),
                Note::new(64, 100, steps(1), steps(3)),
            ],
        );
        let mut manager = PlaybackManager::new(DebounceBudgets::default());
        manager.set_pattern(pattern);
        manager.set_tracks(vec![Track::new(TrackId::new(1), "master")]);
        manager.set_clip(make_clip(1, 1, 0, steps(64), 0));

        let mut scheduler = EventScheduler::new(1.5);
        let transport = TransportClock::new(96);
        manager.schedule_pattern_clip(ClipId::new(1), &mut scheduler, &transport);

        let events = events_for(&mut scheduler);
        let ons = note_ons(&events);
        let mut expected = vec![0, steps(1) as i64, steps(1) as i64, steps(2) as i64];
        expected.sort();
        let mut ons_sorted = ons.clone();
        ons_sorted.sort();
        assert_eq!(ons_sorted, expected);
    }

    #[test]
    fn scenario_pattern_loops_inside_long_clip() {
        let instrument = InstrumentId::new(1);
        let pattern = make_pattern(1, instrument, vec![Note::new(36, 100, 0, steps(1))]);
        let mut manager = PlaybackManager::new(DebounceBudgets::default());
        manager.set_pattern(pattern);
        manager.set_tracks(vec![Track::new(TrackId::new(1), "master")]);
        manager.set_clip(make_clip(1, 1, 0, steps(128), 0));

        let mut scheduler = EventScheduler::new(1.5);
        let transport = TransportClock::new(96);
        manager.schedule_pattern_clip(ClipId::new(1), &mut scheduler, &transport);

        let events = events_for(&mut scheduler);
        let ons = note_ons(&events);
        assert_eq!(ons, vec![0, steps(64) as i64]);
    }

    #[test]
    fn scenario_split_clip() {
        let instrument = InstrumentId::new(1);
        let pattern = make_pattern(
            1,
            instrument,
            vec![
                Note::new(60, 100, 0, steps(1)),
                Note::new(60, 100, steps(16), steps(1)),
                Note::new(60, 100, steps(32), steps(1)),
                Note::new(60, 100, steps(48), steps(1)),
            ],
        );
        let mut manager = PlaybackManager::new(DebounceBudgets::default());
        manager.set_pattern(pattern);
        manager.set_tracks(vec![Track::new(TrackId::new(1), "master")]);
        manager.set_clip(make_clip(1, 1, 0, steps(32), 0));
        manager.set_clip(make_clip(2, 1, steps(32), steps(32), steps(32)));

        let mut scheduler = EventScheduler::new(1.5);
        let transport = TransportClock::new(96);
        manager.schedule_pattern_clip(ClipId::new(1), &mut scheduler, &transport);
        manager.schedule_pattern_clip(ClipId::new(2), &mut scheduler, &transport);

        let events = events_for(&mut scheduler);
        let mut ons = note_ons(&events);
        ons.sort();
        assert_eq!(ons, vec![0, steps(16) as i64, steps(32) as i64, steps(48) as i64]);
    }

    #[test]
    fn muted_track_produces_no_events() {
        let instrument = InstrumentId::new(1);
        let pattern = make_pattern(1, instrument, vec![Note::new(60, 100, 0, steps(1))]);
        let mut manager = PlaybackManager::new(DebounceBudgets::default());
        manager.set_pattern(pattern);
        let mut track = Track::new(TrackId::new(1), "master");
        track.mute = true;
        manager.set_tracks(vec![track]);
        manager.set_clip(make_clip(1, 1, 0, steps(64), 0));

        let mut scheduler = EventScheduler::new(1.5);
        let transport = TransportClock::new(96);
        manager.schedule_pattern_clip(ClipId::new(1), &mut scheduler, &transport);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn clip_underfoot_replacement_has_no_old_pattern_leftovers() {
        let instrument = InstrumentId::new(1);
        let pattern_a = make_pattern(1, instrument, vec![Note::new(60, 100, 0, steps(1))]);
        let pattern_b = make_pattern(2, instrument, vec![Note::new(72, 100, steps(4), steps(1))]);
        let mut manager = PlaybackManager::new(DebounceBudgets::default());
        manager.set_pattern(pattern_a);
        manager.set_pattern(pattern_b);
        manager.set_tracks(vec![Track::new(TrackId::new(1), "master")]);
        manager.set_clip(make_clip(1, 1, 0, steps(64), 0));

        let mut scheduler = EventScheduler::new(1.5);
        let transport = TransportClock::new(96);
        manager.schedule_pattern_clip(ClipId::new(1), &mut scheduler, &transport);
        manager.replace_clip_pattern(ClipId::new(1), PatternId::new(2), &mut scheduler, &transport);

        let events = events_for(&mut scheduler);
        let ons = note_ons(&events);
        assert_eq!(ons, vec![steps(4) as i64]);
    }

    #[test]
    fn scenario_loop_wrap_preserves_sustain_across_boundary() {
        // Loop region ticks 0..64; a note at tick 48 length 48 extends to
        // tick 96, past the loop end (§8 scenario 6).
        let instrument = InstrumentId::new(1);
        let mut pattern = make_pattern(1, instrument, vec![Note::new(50, 100, 48, 48)]);
        pattern.authored_length_ticks = Some(64);
        let mut manager = PlaybackManager::new(DebounceBudgets::default());
        manager.set_pattern(pattern);
        manager.set_tracks(vec![Track::new(TrackId::new(1), "master")]);
        manager.set_clip(make_clip(1, 1, 0, 64, 0));

        let mut scheduler = EventScheduler::new(1.5);
        let transport = TransportClock::new(96);
        manager.schedule_pattern_clip(ClipId::new(1), &mut scheduler, &transport);

        // Simulate the transport having already reached tick 48 before the
        // wrap: its note_on has fired and left the heap, leaving only the
        // crossing note_off pending.
        let just_before_wrap = transport.tick_to_audio_time(48);
        let fired = scheduler.dispatch_batch(just_before_wrap, just_before_wrap);
        assert_eq!(fired.len(), 1);
        assert!(matches!(fired[0].kind, EventKind::NoteOn { pitch: 50, .. }));
        assert_eq!(scheduler.len(), 1);

        manager.reschedule_on_loop_wrap(0, 64, &mut scheduler, &transport);

        let events = events_for(&mut scheduler);
        let offs: Vec<i64> = events.iter().filter(|(_, l)| l.starts_with("off(")).map(|(t, _)| *t).collect();
        let ons = note_ons(&events);
        // pattern->events re-ran from loop_start, producing a fresh
        // note_on/note_off pair for the next iteration (a second,
        // simultaneously-active voice on the same pitch, as the scenario
        // describes for a polyphonic instrument) alongside the original
        // sustain's note_off, which survived the clear untouched.
        assert_eq!(ons.iter().filter(|&&t| t == 48).count(), 1);
        assert_eq!(offs.iter().filter(|&&t| t == 96).count(), 2);
    }

    #[test]
    fn debouncer_flushes_idle_lane_after_its_budget() {
        let mut debouncer = Debouncer::new(DebounceBudgets::default());
        debouncer.request(Priority::Idle, ClipId::new(1), 0.0);
        assert!(debouncer.due(0.005).is_empty());
        assert_eq!(debouncer.due(0.020), vec![ClipId::new(1)]);
    }

    #[test]
    fn debouncer_burst_flushes_immediately() {
        let mut debouncer = Debouncer::new(DebounceBudgets::default());
        debouncer.request(Priority::Burst, ClipId::new(1), 1.0);
        assert_eq!(debouncer.due(1.0), vec![ClipId::new(1)]);
    }

    #[test]
    fn tick_to_seconds_round_trips_through_transport() {
        let transport = TransportClock::new(96);
        let tick = 480i64;
        let seconds = transport.tick_to_audio_time(tick);
        assert_eq!(seconds_to_ticks(seconds, transport.bpm()), tick);
    }
}
