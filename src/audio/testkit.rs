//! Dobles de prueba para los colaboradores externos del núcleo.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};
use tokio::sync::{oneshot, watch};

use crate::{
    audio::{
        engine::{AudioBackend, EndSignal},
        track::{Track, TrackCallbacks},
        voice::{JoinedVoice, LinkControl, LinkState, VoiceConnector, VoiceLink},
    },
    sources::{MediaDescriptor, MediaResolver, Playlist},
};

pub fn descriptor(title: &str) -> MediaDescriptor {
    MediaDescriptor {
        title: title.to_string(),
        url: format!("https://youtu.be/{title}"),
        duration: None,
        thumbnail: None,
    }
}

pub fn track(title: &str) -> Track {
    Track::from_descriptor(descriptor(title), UserId::new(1), TrackCallbacks::default())
}

/// Contadores de callbacks disparados, compartibles entre tracks.
#[derive(Clone, Default)]
pub struct CallbackLog {
    starts: Arc<AtomicUsize>,
    finishes: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl CallbackLog {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

pub fn counted_callbacks(log: &CallbackLog) -> TrackCallbacks {
    let starts = log.starts.clone();
    let finishes = log.finishes.clone();
    let errors = log.errors.clone();
    TrackCallbacks {
        on_start: Some(Box::new(move || {
            starts.fetch_add(1, Ordering::SeqCst);
        })),
        on_finish: Some(Box::new(move || {
            finishes.fetch_add(1, Ordering::SeqCst);
        })),
        on_error: Some(Box::new(move |_| {
            errors.fetch_add(1, Ordering::SeqCst);
        })),
    }
}

/// Backend de reproducción falso: registra llamadas y permite simular el fin
/// del stream actual.
#[derive(Clone, Default)]
pub struct FakeBackend {
    log: Arc<StdMutex<Vec<String>>>,
    end: Arc<StdMutex<Option<oneshot::Sender<()>>>>,
}

impl FakeBackend {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Simula que el recurso actual terminó de reproducirse.
    pub fn end_current(&self) {
        if let Some(tx) = self.end.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl AudioBackend for FakeBackend {
    type Stream = String;

    async fn start(&self, stream: String) -> Result<EndSignal> {
        self.log.lock().unwrap().push(format!("start {stream}"));
        let (tx, rx) = oneshot::channel();
        *self.end.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(if paused { "pause" } else { "resume" }.to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.log.lock().unwrap().push("stop".to_string());
        // Al descartar el sender, la señal de fin se resuelve como cerrada
        self.end.lock().unwrap().take();
        Ok(())
    }
}

/// Control de conexión que no hace nada al desconectar.
pub struct NullControl;

#[async_trait]
impl LinkControl for NullControl {
    async fn disconnect(&self) {}
}

/// Control de conexión que publica `Destroyed` al desconectar.
pub struct WatchControl {
    states: Arc<watch::Sender<LinkState>>,
}

#[async_trait]
impl LinkControl for WatchControl {
    async fn disconnect(&self) {
        self.states.send_replace(LinkState::Destroyed);
    }
}

/// Conexión de voz ya lista, para construir sesiones en pruebas.
pub fn ready_link() -> VoiceLink {
    let (tx, rx) = watch::channel(LinkState::Ready);
    VoiceLink::new(rx, Box::new(WatchControl { states: Arc::new(tx) }))
}

/// Resolver falso con fallos y latencias configurables.
///
/// Convenciones: las URLs tienen la forma `https://youtu.be/{titulo}` y las
/// playlists se consultan como `playlist:{nombre}`.
#[derive(Default)]
pub struct FakeResolver {
    playlists: HashMap<String, Vec<String>>,
    resolve_failures: HashSet<String>,
    open_failures: HashSet<String>,
    open_delay: Option<Duration>,
    opened: StdMutex<Vec<String>>,
}

impl FakeResolver {
    pub fn with_playlist<const N: usize>(mut self, name: &str, titles: [&str; N]) -> Self {
        self.playlists.insert(
            name.to_string(),
            titles.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_resolve_failure(mut self, title: &str) -> Self {
        self.resolve_failures.insert(title.to_string());
        self
    }

    pub fn with_open_failure(mut self, title: &str) -> Self {
        self.open_failures.insert(title.to_string());
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Títulos materializados, en orden.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    fn title_of(url: &str) -> String {
        url.rsplit('/').next().unwrap_or(url).to_string()
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    type Stream = String;

    async fn resolve_url(&self, url: &str) -> Result<MediaDescriptor> {
        let title = Self::title_of(url);
        if self.resolve_failures.contains(&title) {
            anyhow::bail!("no se pudo resolver {url}");
        }
        Ok(descriptor(&title))
    }

    async fn resolve_playlist(&self, query: &str) -> Result<Playlist> {
        let name = query.trim_start_matches("playlist:");
        let titles = self
            .playlists
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("playlist desconocida: {name}"))?;
        Ok(Playlist {
            title: name.to_string(),
            entries: titles
                .iter()
                .map(|title| format!("https://youtu.be/{title}"))
                .collect(),
        })
    }

    async fn search(&self, term: &str) -> Result<MediaDescriptor> {
        Ok(MediaDescriptor {
            title: term.to_string(),
            url: format!("https://youtu.be/{}", term.replace(' ', "-")),
            duration: None,
            thumbnail: None,
        })
    }

    async fn open(&self, descriptor: &MediaDescriptor) -> Result<String> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if self.open_failures.contains(&descriptor.title) {
            anyhow::bail!("sin formatos disponibles para {}", descriptor.title);
        }
        self.opened.lock().unwrap().push(descriptor.title.clone());
        Ok(descriptor.url.clone())
    }

    fn is_playlist_url(&self, query: &str) -> bool {
        query.starts_with("playlist:")
    }

    fn is_media_url(&self, query: &str) -> bool {
        query.starts_with("https://youtu.be/")
    }
}

/// Conector falso: cuenta conexiones y controla cuándo llega `Ready`.
pub struct FakeConnector {
    joins: Arc<AtomicUsize>,
    ready_delay: Option<Duration>,
}

impl FakeConnector {
    /// Conector que llega a `Ready` tras `delay`.
    pub fn ready_after(delay: Duration) -> Self {
        Self {
            joins: Arc::new(AtomicUsize::new(0)),
            ready_delay: Some(delay),
        }
    }

    /// Conector cuyo handshake nunca termina.
    pub fn never_ready() -> Self {
        Self {
            joins: Arc::new(AtomicUsize::new(0)),
            ready_delay: None,
        }
    }

    /// Contador de conexiones iniciadas, utilizable tras ceder el conector.
    pub fn join_counter(&self) -> Arc<AtomicUsize> {
        self.joins.clone()
    }
}

#[async_trait]
impl VoiceConnector for FakeConnector {
    type Backend = FakeBackend;

    async fn join(
        &self,
        _guild_id: GuildId,
        _channel_id: ChannelId,
    ) -> Result<JoinedVoice<FakeBackend>> {
        self.joins.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = watch::channel(LinkState::Signalling);
        let tx = Arc::new(tx);
        if let Some(delay) = self.ready_delay {
            let states = tx.clone();
            tokio::spawn(async move {
                states.send_replace(LinkState::Connecting);
                tokio::time::sleep(delay).await;
                states.send_replace(LinkState::Ready);
            });
        }

        Ok(JoinedVoice {
            backend: FakeBackend::default(),
            states: rx,
            control: Box::new(WatchControl { states: tx }),
        })
    }
}
