//! Transport Clock (C1, §4.1): owns the authoritative playback position and
//! bpm, and the mapping between ticks and audio-clock seconds. Never reads
//! a wall clock directly — every position update is driven by an
//! externally-supplied `audio_now_seconds`, so the same clock drives both a
//! realtime audio callback and an offline batch renderer (§9 reentrancy).

use cadence_types::{seconds_to_ticks, ticks_to_seconds, LoopRegion, TransportState};

/// Observable things the transport publishes as it advances. The engine
/// run loop forwards these out through the feedback channel (§10.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    LoopWrap { audio_time_seconds: f64 },
    ClockDiscontinuity,
    TempoChangedWhilePlaying,
}

fn schedule_ahead_for_bpm(bpm: f64) -> f64 {
    if bpm >= 140.0 {
        0.100
    } else if bpm >= 100.0 {
        0.120
    } else {
        0.150
    }
}

/// Anchor-based position tracking: `position_ticks` at `anchor_seconds` is
/// exact; `now_ticks()` extrapolates from the audio clock's distance past
/// the anchor rather than accumulating per-tick drift. Re-anchored on
/// start/resume/seek/loop-wrap.
pub struct TransportClock {
    anchor_tick: i64,
    anchor_seconds: f64,
    bpm: f64,
    is_playing: bool,
    loop_region: LoopRegion,
    schedule_ahead_override_seconds: Option<f64>,
}

impl TransportClock {
    pub fn new(ppq_is_96: u32) -> Self {
        debug_assert_eq!(ppq_is_96, cadence_types::PPQ, "transport assumes PPQ=96");
        Self {
            anchor_tick: 0,
            anchor_seconds: 0.0,
            bpm: 120.0,
            is_playing: false,
            loop_region: LoopRegion::default(),
            schedule_ahead_override_seconds: None,
        }
    }

    pub fn with_schedule_ahead_override(mut self, seconds: Option<f64>) -> Self {
        self.schedule_ahead_override_seconds = seconds;
        self
    }

    pub fn start(&mut self, at_tick: i64, audio_now_seconds: f64) {
        self.anchor_tick = at_tick;
        self.anchor_seconds = audio_now_seconds;
        self.is_playing = true;
    }

    pub fn stop(&mut self, audio_now_seconds: f64) {
        self.anchor_tick = self.now_ticks(audio_now_seconds);
        self.anchor_seconds = audio_now_seconds;
        self.is_playing = false;
    }

    pub fn pause(&mut self, audio_now_seconds: f64) {
        self.stop(audio_now_seconds);
    }

    pub fn resume(&mut self, audio_now_seconds: f64) {
        self.anchor_seconds = audio_now_seconds;
        self.is_playing = true;
    }

    /// Re-anchors position at `tick`, discarding any accumulated drift.
    /// Callers must re-schedule after a seek; the transport itself only
    /// repositions.
    pub fn seek(&mut self, tick: i64, audio_now_seconds: f64) {
        let tick = if tick < 0 {
            log::warn!(target: "transport", "seek to negative tick {tick}, clamping to 0");
            0
        } else {
            tick
        };
        self.anchor_tick = tick;
        self.anchor_seconds = audio_now_seconds;
    }

    /// Recomputes the tick/second mapping at the current audio time.
    /// Pending events already in seconds are not retimed (§4.1 design
    /// decision, §9 Open Question resolved "no").
    pub fn set_bpm(&mut self, bpm: f64, audio_now_seconds: f64) -> Option<TransportEvent> {
        let was_playing = self.is_playing;
        self.anchor_tick = self.now_ticks(audio_now_seconds);
        self.anchor_seconds = audio_now_seconds;
        self.bpm = bpm;
        if was_playing {
            Some(TransportEvent::TempoChangedWhilePlaying)
        } else {
            None
        }
    }

    pub fn set_loop(&mut self, start_ticks: u32, end_ticks: u32, enabled: bool) {
        self.loop_region = LoopRegion { start_ticks, end_ticks, enabled };
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.loop_region
    }

    pub fn now_ticks(&self, audio_now_seconds: f64) -> i64 {
        if !self.is_playing {
            return self.anchor_tick;
        }
        let elapsed = audio_now_seconds - self.anchor_seconds;
        self.anchor_tick + seconds_to_ticks(elapsed.max(0.0), self.bpm)
    }

    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        ticks_to_seconds(ticks, self.bpm)
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> i64 {
        seconds_to_ticks(seconds, self.bpm)
    }

    /// Converts a tick position into an absolute audio-clock deadline,
    /// given the current anchor.
    pub fn tick_to_audio_time(&self, tick: i64) -> f64 {
        self.anchor_seconds + ticks_to_seconds(tick - self.anchor_tick, self.bpm)
    }

    pub fn schedule_ahead_seconds(&self) -> f64 {
        self.schedule_ahead_override_seconds
            .unwrap_or_else(|| schedule_ahead_for_bpm(self.bpm))
    }

    /// `[now, now + schedule_ahead]` in audio-clock seconds (§4.1).
    pub fn lookahead_window(&self, audio_now_seconds: f64) -> (f64, f64) {
        (audio_now_seconds, audio_now_seconds + self.schedule_ahead_seconds())
    }

    /// Advances the simulated position to `audio_now_seconds`. If the
    /// transport is playing, loop-enabled, and position has crossed
    /// `loop_end_ticks`, wraps to `loop_start_ticks` and re-anchors,
    /// returning one `LoopWrap` event per wrap actually crossed (a
    /// multi-wrap-safe loop handles an arbitrarily long stall between
    /// `advance` calls).
    pub fn advance(&mut self, audio_now_seconds: f64) -> Vec<TransportEvent> {
        if audio_now_seconds < self.anchor_seconds {
            log::warn!(target: "transport", "audio clock moved backwards, treating as seek");
            self.anchor_seconds = audio_now_seconds;
            return vec![TransportEvent::ClockDiscontinuity];
        }

        let mut events = Vec::new();
        if !self.is_playing || !self.loop_region.enabled {
            return events;
        }

        let loop_start = self.loop_region.start_ticks as i64;
        let loop_end = self.loop_region.end_ticks as i64;
        if loop_end <= loop_start {
            return events;
        }

        loop {
            let current = self.now_ticks(audio_now_seconds);
            if current < loop_end {
                break;
            }
            let overshoot = current - loop_end;
            let wrap_audio_time = self.tick_to_audio_time(loop_end);
            self.anchor_tick = loop_start + overshoot.min(loop_end - loop_start);
            self.anchor_seconds = wrap_audio_time;
            events.push(TransportEvent::LoopWrap { audio_time_seconds: wrap_audio_time });
        }
        events
    }

    pub fn position(&self, audio_now_seconds: f64) -> TransportState {
        TransportState {
            position_ticks: self.now_ticks(audio_now_seconds).max(0) as u32,
            bpm: self.bpm,
            is_playing: self.is_playing,
            loop_region: self.loop_region,
            audio_time_at_position: audio_now_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_advances_with_audio_time() {
        let mut clock = TransportClock::new(96);
        clock.start(0, 0.0);
        // at 120bpm, one beat (96 ticks) = 0.5s
        let ticks = clock.now_ticks(0.5);
        assert_eq!(ticks, 96);
    }

    #[test]
    fn stop_freezes_position() {
        let mut clock = TransportClock::new(96);
        clock.start(0, 0.0);
        clock.stop(0.5);
        assert_eq!(clock.now_ticks(10.0), 96);
    }

    #[test]
    fn seek_reanchors_without_retiming() {
        let mut clock = TransportClock::new(96);
        clock.start(0, 0.0);
        clock.seek(480, 1.0);
        assert_eq!(clock.now_ticks(1.0), 480);
    }

    #[test]
    fn seek_clamps_negative_to_zero() {
        let mut clock = TransportClock::new(96);
        clock.seek(-10, 0.0);
        assert_eq!(clock.now_ticks(0.0), 0);
    }

    #[test]
    fn schedule_ahead_is_adaptive_by_bpm() {
        let mut clock = TransportClock::new(96);
        clock.set_bpm(150.0, 0.0);
        assert_eq!(clock.schedule_ahead_seconds(), 0.100);
        clock.set_bpm(120.0, 0.0);
        assert_eq!(clock.schedule_ahead_seconds(), 0.120);
        clock.set_bpm(80.0, 0.0);
        assert_eq!(clock.schedule_ahead_seconds(), 0.150);
    }

    #[test]
    fn set_bpm_while_playing_reports_tempo_change() {
        let mut clock = TransportClock::new(96);
        clock.start(0, 0.0);
        let ev = clock.set_bpm(140.0, 1.0);
        assert_eq!(ev, Some(TransportEvent::TempoChangedWhilePlaying));
    }

    #[test]
    fn loop_wrap_reanchors_to_loop_start() {
        let mut clock = TransportClock::new(96);
        clock.set_loop(0, 96, true);
        clock.start(0, 0.0);
        // at 120bpm, 96 ticks = 0.5s, so by t=0.6 we've crossed the loop end.
        let events = clock.advance(0.6);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransportEvent::LoopWrap { .. }));
        assert_eq!(clock.now_ticks(0.6), 0);
    }

    #[test]
    fn multi_wrap_stall_produces_one_event_per_wrap() {
        let mut clock = TransportClock::new(96);
        clock.set_loop(0, 96, true);
        clock.start(0, 0.0);
        // a long stall spanning more than one full loop (each loop = 0.5s)
        let events = clock.advance(1.3);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn clock_discontinuity_when_audio_time_moves_backwards() {
        let mut clock = TransportClock::new(96);
        clock.start(0, 1.0);
        let events = clock.advance(0.5);
        assert_eq!(events, vec![TransportEvent::ClockDiscontinuity]);
    }
}
