use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{audio::track::Track, error::PlayerError, sources::MediaDescriptor};

/// Señal de fin del recurso en reproducción; se resuelve (o se cierra) cuando
/// el backend da por terminado el track actual, por fin normal o por error.
pub type EndSignal = oneshot::Receiver<()>;

/// Primitiva externa de reproducción sobre la conexión de voz.
#[async_trait]
pub trait AudioBackend: Send + Sync + 'static {
    type Stream: Send + 'static;

    /// Comienza a reproducir un stream, reemplazando el actual si lo hay.
    async fn start(&self, stream: Self::Stream) -> Result<EndSignal>;

    /// Pausa o reanuda el stream actual.
    async fn set_paused(&self, paused: bool) -> Result<()>;

    /// Detiene el stream actual.
    async fn stop(&self) -> Result<()>;
}

/// Estados del motor de reproducción.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Buffering,
    Playing,
    Paused,
    /// Pausa impuesta por el motor, p. ej. al perder la conexión de voz.
    AutoPaused,
}

/// Resultado observable de una operación del motor.
///
/// `EnteredIdle` es la única señal que dispara el avance de cola; el motor
/// garantiza como máximo una por transición hacia `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    EnteredIdle,
}

/// Resultado de entregar un stream materializado al motor.
#[derive(Debug)]
pub enum Committed {
    /// El stream arrancó; la señal avisa cuando termine.
    Started(EndSignal),
    /// La materialización llegó tarde: el motor ya avanzó y el stream se
    /// descarta sin tocar el estado.
    Stale,
    /// El backend no pudo arrancar el stream; el motor volvió a `Idle`.
    Failed,
}

/// Máquina de estados que envuelve la primitiva de reproducción.
///
/// Su único observador es la sesión dueña, que reacciona a los valores
/// `Transition` devueltos; no hay sistema de broadcast.
pub struct PlaybackEngine<B: AudioBackend> {
    backend: B,
    state: EngineState,
    current: Option<Track>,
    // Invalida materializaciones y señales de fin de reproducciones previas
    generation: u64,
}

impl<B: AudioBackend> PlaybackEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: EngineState::Idle,
            current: None,
            generation: 0,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == EngineState::Idle
    }

    pub fn current_title(&self) -> Option<String> {
        self.current.as_ref().map(|track| track.title().to_string())
    }

    /// Toma un track de la cola y entra en `Buffering`.
    ///
    /// Devuelve la generación de esta reproducción y el descriptor a abrir;
    /// el llamador materializa el stream fuera de la sección crítica y lo
    /// entrega con [`commit`](Self::commit).
    pub fn begin(&mut self, mut track: Track) -> Result<(u64, MediaDescriptor), PlayerError> {
        debug_assert_eq!(self.state, EngineState::Idle);

        let descriptor = match track.materialize() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                track.notify_error(&e);
                return Err(e);
            }
        };

        self.generation = self.generation.wrapping_add(1);
        self.state = EngineState::Buffering;
        self.current = Some(track);
        Ok((self.generation, descriptor))
    }

    /// Entrega el stream materializado de la generación `generation`.
    pub async fn commit(&mut self, generation: u64, stream: B::Stream) -> Committed {
        if generation != self.generation || self.state != EngineState::Buffering {
            debug!("🗑️ Stream materializado tarde, descartado");
            return Committed::Stale;
        }

        match self.backend.start(stream).await {
            Ok(end) => {
                self.state = EngineState::Playing;
                if let Some(track) = &self.current {
                    track.notify_start();
                }
                Committed::Started(end)
            }
            Err(e) => {
                let error = PlayerError::Playback(e.to_string());
                warn!("⚠️ El backend no pudo arrancar el stream: {}", error);
                if let Some(track) = self.current.take() {
                    track.notify_error(&error);
                }
                self.enter_idle();
                Committed::Failed
            }
        }
    }

    /// Reporta una materialización fallida de la generación `generation`.
    pub fn fail(&mut self, generation: u64, error: &PlayerError) -> Transition {
        if generation != self.generation || self.state != EngineState::Buffering {
            return Transition::None;
        }
        if let Some(track) = self.current.take() {
            track.notify_error(error);
        }
        self.enter_idle()
    }

    /// Reporta el fin del recurso de la generación `generation`.
    pub fn note_end(&mut self, generation: u64) -> Transition {
        if generation != self.generation {
            return Transition::None;
        }
        match self.state {
            EngineState::Playing | EngineState::Paused | EngineState::AutoPaused => {
                if let Some(track) = self.current.take() {
                    track.notify_finish();
                }
                self.enter_idle()
            }
            _ => Transition::None,
        }
    }

    /// Pausa si está reproduciendo; en cualquier otro estado es un no-op.
    pub async fn pause(&mut self) {
        if self.state != EngineState::Playing {
            return;
        }
        match self.backend.set_paused(true).await {
            Ok(()) => self.state = EngineState::Paused,
            Err(e) => warn!("⚠️ No se pudo pausar: {}", e),
        }
    }

    /// Reanuda una pausa pedida por el usuario; no-op en otros estados.
    pub async fn resume(&mut self) {
        if self.state != EngineState::Paused {
            return;
        }
        match self.backend.set_paused(false).await {
            Ok(()) => self.state = EngineState::Playing,
            Err(e) => warn!("⚠️ No se pudo reanudar: {}", e),
        }
    }

    /// Pausa impuesta por pérdida de conexión.
    pub async fn auto_pause(&mut self) {
        if self.state != EngineState::Playing {
            return;
        }
        if let Err(e) = self.backend.set_paused(true).await {
            debug!("No se pudo auto-pausar: {}", e);
        }
        self.state = EngineState::AutoPaused;
    }

    /// Deshace una pausa impuesta al recuperar la conexión.
    pub async fn auto_resume(&mut self) {
        if self.state != EngineState::AutoPaused {
            return;
        }
        if let Err(e) = self.backend.set_paused(false).await {
            debug!("No se pudo reanudar tras reconexión: {}", e);
        }
        self.state = EngineState::Playing;
    }

    /// Fuerza la vuelta a `Idle`; así se implementa "saltar canción".
    ///
    /// Si llega durante `Buffering`, la materialización en vuelo queda
    /// invalidada y su resultado se descartará en `commit`.
    pub async fn stop(&mut self) -> Transition {
        match self.state {
            EngineState::Idle => Transition::None,
            EngineState::Buffering => {
                self.generation = self.generation.wrapping_add(1);
                self.current = None;
                self.enter_idle()
            }
            EngineState::Playing | EngineState::Paused | EngineState::AutoPaused => {
                self.generation = self.generation.wrapping_add(1);
                if let Err(e) = self.backend.stop().await {
                    warn!("⚠️ Error al detener el backend: {}", e);
                }
                if let Some(track) = self.current.take() {
                    track.notify_finish();
                }
                self.enter_idle()
            }
        }
    }

    /// Apagado silencioso para el desmontaje de la sesión: detiene el backend
    /// y descarta el track actual sin callbacks ni notificación de avance.
    pub async fn shutdown(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if matches!(
            self.state,
            EngineState::Playing | EngineState::Paused | EngineState::AutoPaused
        ) {
            if let Err(e) = self.backend.stop().await {
                debug!("Error al detener el backend durante el apagado: {}", e);
            }
        }
        self.current = None;
        self.state = EngineState::Idle;
    }

    // Único punto de entrada a Idle: garantiza una notificación por transición.
    fn enter_idle(&mut self) -> Transition {
        debug_assert_ne!(self.state, EngineState::Idle);
        self.state = EngineState::Idle;
        Transition::EnteredIdle
    }
}
