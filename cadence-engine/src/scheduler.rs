//! Event Scheduler (C2, §4.2): a `BinaryHeap`-ordered queue of events keyed
//! by `scheduled_tick`, dispatched in batches up to a deadline. Ties break
//! on insertion order so two events landing on the same tick fire in the
//! order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use cadence_types::{AutomationTargetId, ClipId, ExtendedParams, InstrumentId, TrackId};

/// What kind of thing scheduled this batch of events, for tag-based
/// clearing (§4.3 clip-underfoot replacement, transport seek/stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginTag {
    Clip(ClipId),
    Automation(AutomationTargetId),
    Transport,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    NoteOn {
        instrument_id: InstrumentId,
        pitch: u8,
        velocity: u8,
        /// Arrangement tick this note was authored to end at (§4.3),
        /// carried through so the engine can hand it to the voice manager
        /// for loop re-schedule step 3.
        note_end_tick: i64,
        extended: ExtendedParams,
    },
    NoteOff {
        instrument_id: InstrumentId,
        pitch: u8,
    },
    AudioClipStart {
        track_id: TrackId,
        clip_id: ClipId,
        sample_offset_seconds: f64,
    },
    AutomationPoint {
        target: AutomationTargetId,
        value: f32,
    },
    ParamSet {
        instrument_id: InstrumentId,
        param_id: AutomationTargetId,
        value: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Idle,
    Realtime,
    Burst,
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub scheduled_tick: i64,
    pub scheduled_seconds: f64,
    pub kind: EventKind,
    pub priority: Priority,
    pub origin: OriginTag,
    seq: u64,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_tick == other.scheduled_tick && self.seq == other.seq
    }
}
impl Eq for ScheduledEvent {}

/// Reversed so `BinaryHeap` (a max-heap) pops the earliest tick first;
/// ties at the same tick break on priority (higher priority first, per
/// §3's "ordered primarily by scheduled_seconds, secondarily by
/// priority"), and any remaining tie breaks on insertion order.
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .scheduled_tick
            .cmp(&self.scheduled_tick)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How far behind `dispatch_batch`'s deadline an event can sit before it's
/// swept as stale rather than dispatched late (§4.2).
const DEFAULT_STALE_HORIZON_SECONDS: f64 = 1.5;

pub struct EventScheduler {
    heap: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    stale_horizon_seconds: f64,
}

impl EventScheduler {
    pub fn new(stale_horizon_seconds: f64) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            stale_horizon_seconds,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn schedule(
        &mut self,
        scheduled_tick: i64,
        scheduled_seconds: f64,
        kind: EventKind,
        priority: Priority,
        origin: OriginTag,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledEvent {
            scheduled_tick,
            scheduled_seconds,
            kind,
            priority,
            origin,
            seq,
        });
    }

    /// Pops and returns every event due at or before `deadline_seconds`,
    /// in scheduled order. Events whose `scheduled_seconds` is more than
    /// `stale_horizon_seconds` behind `now_seconds` are dropped rather than
    /// dispatched (§4.2 stale-event sweep), which matters after a seek or a
    /// long host-side stall.
    pub fn dispatch_batch(&mut self, deadline_seconds: f64, now_seconds: f64) -> Vec<ScheduledEvent> {
        let mut due = Vec::new();
        while let Some(event) = self.heap.peek() {
            if event.scheduled_seconds > deadline_seconds {
                break;
            }
            let event = self.heap.pop().expect("peeked Some above");
            if now_seconds - event.scheduled_seconds > self.stale_horizon_seconds {
                log::warn!(
                    target: "scheduler",
                    "dropping stale event at tick {} ({}s behind now)",
                    event.scheduled_tick,
                    now_seconds - event.scheduled_seconds
                );
                continue;
            }
            due.push(event);
        }
        due
    }

    /// Removes every pending event whose origin matches `tag`, used when a
    /// clip is replaced underfoot or the transport seeks/stops.
    pub fn clear_by_tag(&mut self, tag: OriginTag) {
        self.clear_where(|event| event.origin == tag);
    }

    /// Removes every pending event matching `predicate`, rebuilding the
    /// heap by linear scan (§4.2: acceptable because this runs on loop wrap
    /// or user edit, not per-tick).
    pub fn clear_where<F: Fn(&ScheduledEvent) -> bool>(&mut self, predicate: F) {
        let remaining: Vec<ScheduledEvent> = self
            .heap
            .drain()
            .filter(|event| !predicate(event))
            .collect();
        self.heap = remaining.into_iter().collect();
    }

    pub fn clear_all(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_logger() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }

    fn note_on(pitch: u8) -> EventKind {
        EventKind::NoteOn {
            instrument_id: InstrumentId::new(1),
            pitch,
            velocity: 100,
            note_end_tick: 0,
            extended: ExtendedParams::default(),
        }
    }

    #[test]
    fn dispatches_in_tick_order_regardless_of_insertion_order() {
        let mut scheduler = EventScheduler::new(DEFAULT_STALE_HORIZON_SECONDS);
        scheduler.schedule(200, 2.0, note_on(64), Priority::Realtime, OriginTag::Transport);
        scheduler.schedule(50, 0.5, note_on(60), Priority::Realtime, OriginTag::Transport);
        scheduler.schedule(100, 1.0, note_on(62), Priority::Realtime, OriginTag::Transport);

        let due = scheduler.dispatch_batch(10.0, 0.0);
        let ticks: Vec<i64> = due.iter().map(|e| e.scheduled_tick).collect();
        assert_eq!(ticks, vec![50, 100, 200]);
    }

    #[test]
    fn same_tick_ties_break_on_insertion_order() {
        let mut scheduler = EventScheduler::new(DEFAULT_STALE_HORIZON_SECONDS);
        scheduler.schedule(100, 1.0, note_on(60), Priority::Realtime, OriginTag::Transport);
        scheduler.schedule(100, 1.0, note_on(61), Priority::Realtime, OriginTag::Transport);

        let due = scheduler.dispatch_batch(10.0, 0.0);
        let EventKind::NoteOn { pitch: first, .. } = &due[0].kind else { panic!() };
        let EventKind::NoteOn { pitch: second, .. } = &due[1].kind else { panic!() };
        assert_eq!((*first, *second), (60, 61));
    }

    #[test]
    fn same_tick_higher_priority_dispatches_before_lower() {
        let mut scheduler = EventScheduler::new(DEFAULT_STALE_HORIZON_SECONDS);
        scheduler.schedule(100, 1.0, note_on(60), Priority::Idle, OriginTag::Transport);
        scheduler.schedule(100, 1.0, note_on(61), Priority::Burst, OriginTag::Transport);
        scheduler.schedule(100, 1.0, note_on(62), Priority::Realtime, OriginTag::Transport);

        let due = scheduler.dispatch_batch(10.0, 0.0);
        let pitches: Vec<u8> = due
            .iter()
            .map(|e| match &e.kind {
                EventKind::NoteOn { pitch, .. } => *pitch,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(pitches, vec![61, 62, 60]);
    }

    #[test]
    fn dispatch_batch_only_returns_events_at_or_before_deadline() {
        let mut scheduler = EventScheduler::new(DEFAULT_STALE_HORIZON_SECONDS);
        scheduler.schedule(100, 1.0, note_on(60), Priority::Realtime, OriginTag::Transport);
        scheduler.schedule(500, 5.0, note_on(62), Priority::Realtime, OriginTag::Transport);

        let due = scheduler.dispatch_batch(2.0, 0.0);
        assert_eq!(due.len(), 1);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn stale_events_are_dropped_not_dispatched() {
        init_test_logger();
        let mut scheduler = EventScheduler::new(1.5);
        scheduler.schedule(100, 1.0, note_on(60), Priority::Realtime, OriginTag::Transport);

        let due = scheduler.dispatch_batch(10.0, 10.0); // 9s behind, past the 1.5s horizon
        assert!(due.is_empty());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn clear_by_tag_only_removes_matching_origin() {
        let clip_a = ClipId::new(1);
        let clip_b = ClipId::new(2);
        let mut scheduler = EventScheduler::new(DEFAULT_STALE_HORIZON_SECONDS);
        scheduler.schedule(100, 1.0, note_on(60), Priority::Realtime, OriginTag::Clip(clip_a));
        scheduler.schedule(200, 2.0, note_on(62), Priority::Realtime, OriginTag::Clip(clip_b));

        scheduler.clear_by_tag(OriginTag::Clip(clip_a));
        assert_eq!(scheduler.len(), 1);
        let due = scheduler.dispatch_batch(10.0, 0.0);
        assert_eq!(due[0].scheduled_tick, 200);
    }
}
