//! The capability-set trait every instrument type implements (§3, §9):
//! flat, not a class hierarchy. A concrete instrument composes a
//! [`crate::voices::VoiceManager`] with a type-specific [`VoiceEngine`] —
//! one level of composition, never inheritance.

use cadence_types::{AutomationTargetId, CoreError, ExtendedParams, InstrumentId};

/// Opaque identifier for wherever an instrument's audio actually lands —
/// a mixer insert, bus, or master. The core never interprets this value;
/// it only carries it to the routing layer (§6 Mixer/routing interface).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputNodeId(pub String);

/// One voice's worth of audio-graph wiring. Implementers: single-sample,
/// multi-sample with velocity layers/round-robin, virtual-analog (mono or
/// poly, portamento/legato), granular. The voice pool in
/// [`crate::voices::VoiceManager`] is generic over this trait; it never
/// concerns itself with what kind of sound a voice makes.
pub trait VoiceEngine: Send + std::fmt::Debug {
    /// Full trigger: resets and starts the amplitude envelope at `pitch`.
    fn start(&mut self, pitch: u8, velocity: u8, at_seconds: f64, extended: &ExtendedParams);

    /// Frequency-only change, ramped linearly over `portamento_seconds`
    /// (0.0 = instantaneous). Does not touch the amplitude envelope —
    /// used for mono legato glides (§4.4).
    fn change_pitch(&mut self, pitch: u8, portamento_seconds: f64, at_seconds: f64);

    /// Begins the release envelope at `at_seconds`; returns the release
    /// duration in seconds so the pool knows when the voice will finish.
    fn begin_release(&mut self, at_seconds: f64) -> f64;

    /// Applies an updated extended-parameter snapshot (pan, mod wheel,
    /// aftertouch, pitch bend) without retriggering anything.
    fn apply_extended(&mut self, extended: &ExtendedParams, at_seconds: f64);

    /// Hard, instantaneous silence with no release tail. Used by
    /// `stop_all_immediate` and voice stealing.
    fn silence_immediately(&mut self);

    /// Current output amplitude, 0.0..=1.0, used by the stealing score.
    fn current_amplitude(&self) -> f32;
}

/// The uniform operations every instrument supports (§3). Object-safe so a
/// host can hold a heterogeneous `Vec<Box<dyn Instrument>>`.
pub trait Instrument: Send {
    fn id(&self) -> InstrumentId;
    fn name(&self) -> &str;

    fn trigger(
        &mut self,
        pitch: u8,
        velocity: u8,
        at_seconds: f64,
        note_end_tick: Option<i64>,
        extended: &ExtendedParams,
    ) -> Result<(), CoreError>;

    fn release(&mut self, pitch: u8, at_seconds: f64);
    fn release_all(&mut self, at_seconds: f64);
    fn stop_all_immediate(&mut self);

    fn set_param(&mut self, param_id: AutomationTargetId, value: f32, at_seconds: f64);

    fn get_output_node(&self) -> OutputNodeId;

    /// Per-tick upkeep with no counterpart in the uniform trigger/release
    /// capability set (§3): the release-fallback sweep (§4.4) that
    /// force-returns a voice whose `onended` callback was missed. A flat
    /// default no-op keeps every instrument type usable without
    /// implementing it; [`crate::instruments::PooledInstrument`] is the one
    /// override that matters today.
    fn advance(&mut self, _at_seconds: f64) {}

    /// `[ADDED]` internal plumbing, not part of §3's uniform capability
    /// set: invoked only by the engine on loop wrap (§4.3 loop re-schedule
    /// step 3) to force-stop voices whose authored note end predates the
    /// loop boundary. A flat default no-op for instrument types that don't
    /// track note end ticks; [`crate::instruments::PooledInstrument`]
    /// forwards it to its [`crate::voices::VoiceManager`].
    fn stop_notes_ended_before(&mut self, _boundary_tick: u32, _at_seconds: f64) {}
}
