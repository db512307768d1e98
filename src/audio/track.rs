use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{fmt, panic::AssertUnwindSafe, time::Duration};
use tracing::warn;

use crate::{
    error::PlayerError,
    sources::{MediaDescriptor, MediaResolver},
};

/// Callbacks de ciclo de vida de un track.
///
/// Son fire-and-forget: un fallo dentro de un callback se registra y se
/// descarta, nunca llega a la máquina de estados de reproducción.
#[derive(Default)]
pub struct TrackCallbacks {
    pub on_start: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_finish: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&PlayerError) + Send + Sync>>,
}

/// Recurso reproducible en dos fases: descriptor pendiente o ya entregado.
/// Tras entregar el descriptor solo queda `Spent`; no hay forma de pedirlo
/// dos veces.
enum Playable {
    Pending(MediaDescriptor),
    Spent,
}

/// Un elemento reproducible de la cola, de un solo uso.
pub struct Track {
    title: String,
    duration: Option<Duration>,
    requested_by: UserId,
    added_at: DateTime<Utc>,
    playable: Playable,
    callbacks: TrackCallbacks,
}

impl Track {
    /// Resuelve una URL de medio y construye el track.
    ///
    /// La fábrica de callbacks recibe el descriptor resuelto, de modo que los
    /// callbacks puedan citar el título real del medio.
    pub async fn from_query<R: MediaResolver>(
        resolver: &R,
        url: &str,
        requested_by: UserId,
        callbacks: impl FnOnce(&MediaDescriptor) -> TrackCallbacks,
    ) -> Result<Self, PlayerError> {
        let descriptor = resolver
            .resolve_url(url)
            .await
            .map_err(|e| PlayerError::TrackResolution(e.to_string()))?;
        let callbacks = callbacks(&descriptor);
        Ok(Self::from_descriptor(descriptor, requested_by, callbacks))
    }

    pub fn from_descriptor(
        descriptor: MediaDescriptor,
        requested_by: UserId,
        callbacks: TrackCallbacks,
    ) -> Self {
        Self {
            title: descriptor.title.clone(),
            duration: descriptor.duration,
            requested_by,
            added_at: Utc::now(),
            playable: Playable::Pending(descriptor),
            callbacks,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    #[allow(dead_code)]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    #[allow(dead_code)]
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    #[allow(dead_code)]
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    /// Entrega el descriptor para crear el stream, exactamente una vez.
    ///
    /// El motor la invoca justo antes de pasar a `Buffering`; un segundo
    /// intento es una violación de invariante y devuelve error.
    pub fn materialize(&mut self) -> Result<MediaDescriptor, PlayerError> {
        match std::mem::replace(&mut self.playable, Playable::Spent) {
            Playable::Pending(descriptor) => Ok(descriptor),
            Playable::Spent => Err(PlayerError::Playback(format!(
                "el track '{}' ya fue materializado",
                self.title
            ))),
        }
    }

    pub(crate) fn notify_start(&self) {
        if let Some(cb) = &self.callbacks.on_start {
            fire(|| cb());
        }
    }

    pub(crate) fn notify_finish(&self) {
        if let Some(cb) = &self.callbacks.on_finish {
            fire(|| cb());
        }
    }

    pub(crate) fn notify_error(&self, error: &PlayerError) {
        if let Some(cb) = &self.callbacks.on_error {
            fire(|| cb(error));
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("title", &self.title)
            .field("requested_by", &self.requested_by)
            .field(
                "materialized",
                &matches!(self.playable, Playable::Spent),
            )
            .finish()
    }
}

fn fire(cb: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(cb)).is_err() {
        warn!("⚠️ Callback de track falló, descartado");
    }
}
