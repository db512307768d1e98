//! Núcleo de reproducción por guild: sesión, cola, motor y conexión de voz.

pub mod driver;
pub mod engine;
pub mod queue;
pub mod registry;
pub mod session;
pub mod track;
pub mod voice;

#[cfg(test)]
pub(crate) mod testkit;

pub use driver::SongbirdConnector;
pub use engine::{AudioBackend, EngineState, PlaybackEngine};
pub use registry::{SessionLimits, SessionRegistry};
pub use session::{Enqueued, Session};
pub use track::{Track, TrackCallbacks};
pub use voice::{LinkState, VoiceConnector, VoiceLink};
