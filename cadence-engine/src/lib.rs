//! The real-time playback scheduling and instrument voice core: transport
//! clock, event scheduler, playback manager, voice manager, and automation
//! scheduler, wired together by the engine root.

pub mod automation;
pub mod engine;
pub mod instrument;
pub mod instruments;
pub mod playback;
pub mod scheduler;
pub mod transport;
pub mod triple_buffer;
pub mod voices;

pub use engine::{Engine, EngineHandle, FeedbackEvent, NormalCommand, PriorityCommand};
pub use instrument::{Instrument, OutputNodeId, VoiceEngine};
pub use playback::{DebounceBudgets, Debouncer, PlaybackManager};
pub use scheduler::{EventKind, EventScheduler, OriginTag, Priority, ScheduledEvent};
pub use transport::{TransportClock, TransportEvent};
pub use voices::{VoiceManager, VoiceMode, VoiceState};
