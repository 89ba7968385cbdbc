//! Engine root (C0, §2 `[ADDED]`): the top-level owning struct. Holds the
//! transport (which owns the scheduler), the playback manager, the
//! automation scheduler, and every loaded instrument. Application code
//! constructs an [`Engine`] directly and drives it with [`Engine::advance`];
//! everything else is reached through the [`EngineHandle`] it hands out.

use std::collections::HashMap;

use crossbeam_channel::{unbounded, Receiver, Sender};

use cadence_types::{
    AutomationLane, AutomationTargetId, ClipId, Config, InstrumentId, PatternId, TransportState,
};

use crate::automation::AutomationScheduler;
use crate::instrument::Instrument;
use crate::playback::PlaybackManager;
use crate::scheduler::{EventKind, EventScheduler};
use crate::transport::{TransportClock, TransportEvent};
use crate::triple_buffer::{triple_buffer, TripleBufferReader, TripleBufferWriter};

/// Commands handled ahead of everything else on the run loop: transport
/// transitions, tagged clears, immediate stop (§10.2).
#[derive(Debug)]
pub enum PriorityCommand {
    Start { at_tick: i64 },
    Stop,
    Pause,
    Resume,
    Seek { tick: i64 },
    SetBpm { bpm: f64 },
    SetLoop { start_ticks: u32, end_ticks: u32, enabled: bool },
    StopAllImmediate,
}

/// Commands drained after every pending [`PriorityCommand`] (§10.2).
#[derive(Debug)]
pub enum NormalCommand {
    InsertNoteRealtime { clip_id: ClipId },
    ReplaceClipPattern { clip_id: ClipId, new_pattern_id: PatternId },
    RequestReschedule { clip_id: ClipId },
    SetAutomationLane(AutomationLane),
    RemoveAutomationLane(AutomationTargetId),
    SetParam { instrument_id: InstrumentId, param_id: AutomationTargetId, value: f32 },
}

/// Observer events forwarded out to the host (§6 event/observer interface).
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackEvent {
    TransportPosition(TransportState),
    LoopWrap { audio_time_seconds: f64 },
    TempoChangedWhilePlaying,
    ClockDiscontinuity,
    InstrumentMissing(InstrumentId),
}

/// The control-plane side a host holds: sends commands in, drains feedback
/// out. Cheaply `Clone`-able (every field is a channel endpoint, plus a
/// clone of the position triple-buffer's reader handle).
#[derive(Clone)]
pub struct EngineHandle {
    priority_tx: Sender<PriorityCommand>,
    normal_tx: Sender<NormalCommand>,
    feedback_rx: Receiver<FeedbackEvent>,
    position: TripleBufferReader<TransportState>,
}

impl EngineHandle {
    pub fn send_priority(&self, command: PriorityCommand) {
        let _ = self.priority_tx.send(command);
    }

    pub fn send_normal(&self, command: NormalCommand) {
        let _ = self.normal_tx.send(command);
    }

    /// Drains every feedback event currently queued without blocking.
    pub fn poll_feedback(&self) -> Vec<FeedbackEvent> {
        self.feedback_rx.try_iter().collect()
    }

    /// Wait-free read of the current transport position (§5, §10.2): this
    /// is the one value a real audio callback may read directly rather
    /// than going through `poll_feedback`, since a blocking channel read
    /// from the audio thread would violate the no-locks rule.
    pub fn position(&self) -> TransportState {
        self.position.read()
    }
}

pub struct Engine {
    transport: TransportClock,
    scheduler: EventScheduler,
    playback: PlaybackManager,
    automation: AutomationScheduler,
    instruments: HashMap<InstrumentId, Box<dyn Instrument>>,
    priority_rx: Receiver<PriorityCommand>,
    normal_rx: Receiver<NormalCommand>,
    feedback_tx: Sender<FeedbackEvent>,
    position_writer: TripleBufferWriter<TransportState>,
    automation_interval_seconds: f64,
    next_automation_tick_seconds: f64,
}

impl Engine {
    pub fn new(config: &Config) -> (Self, EngineHandle) {
        let (priority_tx, priority_rx) = unbounded();
        let (normal_tx, normal_rx) = unbounded();
        let (feedback_tx, feedback_rx) = unbounded();
        let (position_writer, position_reader) = triple_buffer::<TransportState>();

        let engine_config = config.engine();
        let transport =
            TransportClock::new(engine_config.ppq).with_schedule_ahead_override(
                engine_config.schedule_ahead_ms.map(|ms| ms as f64 / 1000.0),
            );
        let budgets = crate::playback::DebounceBudgets {
            idle_ms: engine_config.debounce_idle_ms,
            realtime_ms: engine_config.debounce_realtime_ms,
            burst_ms: engine_config.debounce_burst_ms,
        };

        let engine = Self {
            transport,
            scheduler: EventScheduler::new(engine_config.stale_horizon_s),
            playback: PlaybackManager::new(budgets),
            automation: AutomationScheduler::new(),
            instruments: HashMap::new(),
            priority_rx,
            normal_rx,
            feedback_tx,
            position_writer,
            automation_interval_seconds: engine_config.automation_interval_ms as f64 / 1000.0,
            next_automation_tick_seconds: 0.0,
        };
        let handle = EngineHandle { priority_tx, normal_tx, feedback_rx, position: position_reader };
        (engine, handle)
    }

    pub fn add_instrument(&mut self, instrument: Box<dyn Instrument>) {
        self.instruments.insert(instrument.id(), instrument);
    }

    pub fn remove_instrument(&mut self, instrument_id: InstrumentId) {
        if let Some(mut instrument) = self.instruments.remove(&instrument_id) {
            instrument.stop_all_immediate();
        }
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackManager {
        &mut self.playback
    }

    pub fn transport(&self) -> &TransportClock {
        &self.transport
    }

    /// Drives the engine forward to `audio_now_seconds`. Drains every
    /// pending priority command, then every pending normal command, then
    /// advances the transport (handling loop wraps), dispatches due
    /// scheduler events to instruments, and ticks automation (§10.2, §4.1,
    /// §4.5). Real audio hosts call this once per hardware callback; an
    /// offline renderer calls it with synthetic, monotonically-increasing
    /// timestamps (§9 reentrancy).
    pub fn advance(&mut self, audio_now_seconds: f64) {
        self.drain_priority_commands(audio_now_seconds);
        self.drain_normal_commands(audio_now_seconds);
        self.playback.flush_due(audio_now_seconds, &mut self.scheduler, &self.transport);

        for event in self.transport.advance(audio_now_seconds) {
            self.handle_transport_event(event, audio_now_seconds);
        }

        let (_, deadline) = self.transport.lookahead_window(audio_now_seconds);
        let due = self.scheduler.dispatch_batch(deadline, audio_now_seconds);
        for event in due {
            self.dispatch_event(event, audio_now_seconds);
        }

        for instrument in self.instruments.values_mut() {
            instrument.advance(audio_now_seconds);
        }

        if audio_now_seconds >= self.next_automation_tick_seconds {
            self.tick_automation(audio_now_seconds);
            self.next_automation_tick_seconds = audio_now_seconds + self.automation_interval_seconds;
        }

        let position = self.transport.position(audio_now_seconds);
        // Wait-free publish for the audio thread (§5, §10.2); the feedback
        // channel carries the same value to anything polling at UI cadence.
        self.position_writer.write(position);
        let _ = self.feedback_tx.send(FeedbackEvent::TransportPosition(position));
    }

    fn drain_priority_commands(&mut self, audio_now_seconds: f64) {
        while let Ok(command) = self.priority_rx.try_recv() {
            match command {
                PriorityCommand::Start { at_tick } => self.transport.start(at_tick, audio_now_seconds),
                PriorityCommand::Stop => {
                    self.transport.stop(audio_now_seconds);
                    self.scheduler.clear_all();
                }
                PriorityCommand::Pause => self.transport.pause(audio_now_seconds),
                PriorityCommand::Resume => self.transport.resume(audio_now_seconds),
                PriorityCommand::Seek { tick } => {
                    self.transport.seek(tick, audio_now_seconds);
                    self.scheduler.clear_all();
                }
                PriorityCommand::SetBpm { bpm } => {
                    if let Some(event) = self.transport.set_bpm(bpm, audio_now_seconds) {
                        self.handle_transport_event(event, audio_now_seconds);
                    }
                }
                PriorityCommand::SetLoop { start_ticks, end_ticks, enabled } => {
                    self.transport.set_loop(start_ticks, end_ticks, enabled);
                }
                PriorityCommand::StopAllImmediate => {
                    self.scheduler.clear_all();
                    for instrument in self.instruments.values_mut() {
                        instrument.stop_all_immediate();
                    }
                }
            }
        }
    }

    fn drain_normal_commands(&mut self, audio_now_seconds: f64) {
        while let Ok(command) = self.normal_rx.try_recv() {
            match command {
                NormalCommand::InsertNoteRealtime { clip_id } => {
                    self.playback.insert_note_realtime(
                        clip_id,
                        &mut self.scheduler,
                        &self.transport,
                        audio_now_seconds,
                    );
                }
                NormalCommand::ReplaceClipPattern { clip_id, new_pattern_id } => {
                    self.playback.replace_clip_pattern(
                        clip_id,
                        new_pattern_id,
                        &mut self.scheduler,
                        &self.transport,
                    );
                }
                NormalCommand::RequestReschedule { clip_id } => {
                    self.playback.request_reschedule(clip_id, audio_now_seconds);
                }
                NormalCommand::SetAutomationLane(lane) => self.automation.set_lane(lane),
                NormalCommand::RemoveAutomationLane(param_id) => self.automation.remove_lane(param_id),
                NormalCommand::SetParam { instrument_id, param_id, value } => {
                    if let Some(instrument) = self.instruments.get_mut(&instrument_id) {
                        instrument.set_param(param_id, value, audio_now_seconds);
                    }
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent, audio_now_seconds: f64) {
        match event {
            TransportEvent::LoopWrap { audio_time_seconds } => {
                let loop_region = self.transport.loop_region();
                self.playback.reschedule_on_loop_wrap(
                    loop_region.start_ticks,
                    loop_region.end_ticks,
                    &mut self.scheduler,
                    &self.transport,
                );
                // §4.3 loop re-schedule step 3: force-stop voices still
                // sounding a note authored to end before the new loop start,
                // leaving legitimately-crossing sustains alone.
                for instrument in self.instruments.values_mut() {
                    instrument.stop_notes_ended_before(loop_region.start_ticks, audio_time_seconds);
                }
                let _ = self.feedback_tx.send(FeedbackEvent::LoopWrap { audio_time_seconds });
            }
            TransportEvent::ClockDiscontinuity => {
                self.scheduler.clear_all();
                let _ = self.feedback_tx.send(FeedbackEvent::ClockDiscontinuity);
            }
            TransportEvent::TempoChangedWhilePlaying => {
                let _ = audio_now_seconds;
                let _ = self.feedback_tx.send(FeedbackEvent::TempoChangedWhilePlaying);
            }
        }
    }

    fn dispatch_event(&mut self, event: crate::scheduler::ScheduledEvent, at_seconds: f64) {
        match event.kind {
            EventKind::NoteOn { instrument_id, pitch, velocity, note_end_tick, extended } => {
                match self.instruments.get_mut(&instrument_id) {
                    Some(instrument) => {
                        if let Err(err) =
                            instrument.trigger(pitch, velocity, event.scheduled_seconds, Some(note_end_tick), &extended)
                        {
                            log::warn!(target: "engine", "trigger failed on instrument {instrument_id}: {err}");
                        }
                    }
                    None => {
                        log::warn!(target: "engine", "instrument {instrument_id} missing for note_on, skipping");
                        let _ = self.feedback_tx.send(FeedbackEvent::InstrumentMissing(instrument_id));
                    }
                }
            }
            EventKind::NoteOff { instrument_id, pitch } => {
                if let Some(instrument) = self.instruments.get_mut(&instrument_id) {
                    instrument.release(pitch, event.scheduled_seconds);
                }
            }
            EventKind::AudioClipStart { .. } => {
                // Audio clip playback is the host audio graph's
                // responsibility; the engine only guarantees the event
                // reaches the dispatch point at the right audio time.
            }
            EventKind::AutomationPoint { .. } => {}
            EventKind::ParamSet { instrument_id, param_id, value } => {
                if let Some(instrument) = self.instruments.get_mut(&instrument_id) {
                    instrument.set_param(param_id, value, event.scheduled_seconds);
                }
            }
        }
        let _ = at_seconds;
    }

    fn tick_automation(&mut self, audio_now_seconds: f64) {
        let now_tick = self.transport.now_ticks(audio_now_seconds).max(0) as u32;
        for update in self.automation.tick(now_tick, audio_now_seconds) {
            let Some(instrument_id) = update.target.instrument_id else {
                continue;
            };
            if let Some(instrument) = self.instruments.get_mut(&instrument_id) {
                instrument.set_param(update.target.param_id, update.value, update.at_seconds);
            } else {
                self.automation.tombstone(update.target.param_id);
            }
        }
    }
}
