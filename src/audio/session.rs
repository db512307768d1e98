use serenity::model::id::{GuildId, UserId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        engine::{AudioBackend, Committed, PlaybackEngine, Transition},
        queue::TrackQueue,
        track::{Track, TrackCallbacks},
        voice::VoiceLink,
    },
    error::PlayerError,
    sources::{MediaDescriptor, MediaResolver},
};

/// Resultado visible de encolar una consulta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    Track(String),
    Playlist {
        title: String,
        added: usize,
        failed: usize,
    },
}

// Estado mutable de la sesión: una sección crítica por guild, nunca global.
struct Inner<B: AudioBackend> {
    engine: PlaybackEngine<B>,
    queue: TrackQueue,
}

/// Sesión de reproducción de un guild.
///
/// Posee exactamente una conexión de voz, un motor y una cola. Los comandos
/// de usuario y los eventos del motor entran por la misma sección crítica,
/// así que nunca se intercalan a mitad de una mutación.
pub struct Session<B, R>
where
    B: AudioBackend,
    R: MediaResolver<Stream = B::Stream>,
{
    guild_id: GuildId,
    resolver: Arc<R>,
    link: VoiceLink,
    inner: Mutex<Inner<B>>,
}

impl<B, R> Session<B, R>
where
    B: AudioBackend,
    R: MediaResolver<Stream = B::Stream>,
{
    pub(crate) fn new(
        guild_id: GuildId,
        link: VoiceLink,
        backend: B,
        resolver: Arc<R>,
        max_queue_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            resolver,
            link,
            inner: Mutex::new(Inner {
                engine: PlaybackEngine::new(backend),
                queue: TrackQueue::new(max_queue_size),
            }),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn link(&self) -> &VoiceLink {
        &self.link
    }

    /// Resuelve una consulta (playlist, URL o término de búsqueda) y la
    /// encola, arrancando la reproducción si el motor estaba inactivo.
    pub async fn enqueue_from_query<F>(
        self: &Arc<Self>,
        query: &str,
        requested_by: UserId,
        make_callbacks: F,
    ) -> Result<Enqueued, PlayerError>
    where
        F: Fn(&MediaDescriptor) -> TrackCallbacks,
    {
        if self.resolver.is_playlist_url(query) {
            self.enqueue_playlist(query, requested_by, make_callbacks)
                .await
        } else if self.resolver.is_media_url(query) {
            let track =
                Track::from_query(self.resolver.as_ref(), query, requested_by, &make_callbacks)
                    .await?;
            let title = track.title().to_string();
            self.enqueue(track).await?;
            Ok(Enqueued::Track(title))
        } else {
            let descriptor = self
                .resolver
                .search(query)
                .await
                .map_err(|e| PlayerError::TrackResolution(e.to_string()))?;
            let callbacks = make_callbacks(&descriptor);
            let track = Track::from_descriptor(descriptor, requested_by, callbacks);
            let title = track.title().to_string();
            self.enqueue(track).await?;
            Ok(Enqueued::Track(title))
        }
    }

    /// Encola cada elemento de la playlist en orden; un elemento que no
    /// resuelve se omite con aviso y no interrumpe a los demás.
    async fn enqueue_playlist<F>(
        self: &Arc<Self>,
        query: &str,
        requested_by: UserId,
        make_callbacks: F,
    ) -> Result<Enqueued, PlayerError>
    where
        F: Fn(&MediaDescriptor) -> TrackCallbacks,
    {
        let playlist = self
            .resolver
            .resolve_playlist(query)
            .await
            .map_err(|e| PlayerError::TrackResolution(e.to_string()))?;

        let total = playlist.entries.len();
        let mut added = 0usize;
        for url in &playlist.entries {
            let track = match Track::from_query(
                self.resolver.as_ref(),
                url,
                requested_by,
                &make_callbacks,
            )
            .await
            {
                Ok(track) => track,
                Err(e) => {
                    warn!("⚠️ Elemento de playlist omitido ({}): {}", url, e);
                    continue;
                }
            };
            if let Err(e) = self.enqueue(track).await {
                warn!("⚠️ Playlist interrumpida: {}", e);
                break;
            }
            added += 1;
        }

        let failed = total - added;
        if failed > 0 {
            warn!(
                "{}",
                PlayerError::PlaylistPartialFailure { failed, total }
            );
        }

        Ok(Enqueued::Playlist {
            title: playlist.title,
            added,
            failed,
        })
    }

    /// Agrega un track al final de la cola.
    pub async fn enqueue(self: &Arc<Self>, track: Track) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().await;
        inner.queue.push(track)?;
        // Un motor inactivo no tiene transición a Idle pendiente que observar:
        // el primer track arranca aquí mismo.
        if inner.engine.is_idle() {
            self.advance(&mut inner);
        }
        Ok(())
    }

    pub async fn pause(&self) {
        self.inner.lock().await.engine.pause().await;
    }

    pub async fn resume(&self) {
        self.inner.lock().await.engine.resume().await;
    }

    /// Salta el track actual deteniendo el motor; el avance de cola llega
    /// por la misma entrada a `Idle` que cualquier otro fin de track.
    pub async fn skip(self: &Arc<Self>) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let skipped = inner.engine.current_title();
        if inner.engine.stop().await == Transition::EnteredIdle {
            self.advance(&mut inner);
        }
        skipped
    }

    /// Desmonta la sesión: vacía la cola sin callbacks, apaga el motor y
    /// destruye la conexión de voz.
    pub async fn leave(&self) {
        {
            let mut inner = self.inner.lock().await;
            let dropped = inner.queue.clear();
            if dropped > 0 {
                debug!("🗑️ {} tracks descartados sin reproducir", dropped);
            }
            inner.engine.shutdown().await;
        }
        self.link.destroy().await;
        info!("👋 Sesión de voz terminada en guild {}", self.guild_id);
    }

    /// Título del track en reproducción, si lo hay.
    pub async fn now_playing(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        if inner.engine.is_idle() {
            None
        } else {
            inner.engine.current_title()
        }
    }

    /// Primeros `n` títulos de la cola, sin mutarla.
    pub async fn preview_queue(&self, n: usize) -> Vec<String> {
        self.inner.lock().await.queue.preview(n)
    }

    #[allow(dead_code)]
    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub(crate) async fn auto_pause(&self) {
        self.inner.lock().await.engine.auto_pause().await;
    }

    pub(crate) async fn auto_resume(&self) {
        self.inner.lock().await.engine.auto_resume().await;
    }

    // Entrada a Idle observada: saca exactamente un track y lo arranca. La
    // materialización corre en su propia tarea para no retener la sección
    // crítica durante la descarga.
    fn advance(self: &Arc<Self>, inner: &mut Inner<B>) {
        while let Some(track) = inner.queue.pop() {
            let title = track.title().to_string();
            match inner.engine.begin(track) {
                Ok((generation, descriptor)) => {
                    info!("🎵 Preparando: {} (guild {})", title, self.guild_id);
                    let session = Arc::clone(self);
                    tokio::spawn(async move {
                        let opened = session.resolver.open(&descriptor).await;
                        session.deliver(generation, opened).await;
                    });
                    return;
                }
                Err(e) => {
                    // Track inservible: se descarta y se intenta el siguiente
                    warn!("⚠️ Track descartado ({}): {}", title, e);
                    continue;
                }
            }
        }
        debug!("📭 Cola vacía en guild {}, motor en reposo", self.guild_id);
    }

    // Recibe el resultado de una materialización, propia o ya obsoleta.
    async fn deliver(self: &Arc<Self>, generation: u64, opened: anyhow::Result<B::Stream>) {
        let mut inner = self.inner.lock().await;
        match opened {
            Ok(stream) => match inner.engine.commit(generation, stream).await {
                Committed::Started(end) => {
                    let session = Arc::downgrade(self);
                    tokio::spawn(async move {
                        // Fin normal o error: ambos avanzan la cola igual
                        let _ = end.await;
                        if let Some(session) = session.upgrade() {
                            session.handle_track_end(generation).await;
                        }
                    });
                }
                Committed::Stale => {}
                Committed::Failed => self.advance(&mut inner),
            },
            Err(e) => {
                let error = PlayerError::TrackResolution(e.to_string());
                warn!(
                    "⚠️ Materialización fallida en guild {}: {}",
                    self.guild_id, error
                );
                if inner.engine.fail(generation, &error) == Transition::EnteredIdle {
                    self.advance(&mut inner);
                }
            }
        }
    }

    async fn handle_track_end(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.engine.note_end(generation) == Transition::EnteredIdle {
            self.advance(&mut inner);
        }
    }
}
