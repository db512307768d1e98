//! Adaptadores de songbird a las primitivas de conexión y reproducción.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::Input, tracks::TrackHandle, Call, CoreEvent, Event, EventContext,
    EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{oneshot, watch, Mutex, OnceCell};
use tracing::{debug, warn};

use crate::audio::{
    engine::{AudioBackend, EndSignal},
    voice::{JoinedVoice, LinkControl, LinkState, VoiceConnector},
};

/// Conector de voz sobre el manager de songbird.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    default_volume: f32,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>, default_volume: f32) -> Self {
        Self {
            manager,
            default_volume,
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    type Backend = SongbirdBackend;

    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<JoinedVoice<SongbirdBackend>> {
        let (tx, rx) = watch::channel(LinkState::Signalling);
        let tx = Arc::new(tx);
        let call_slot = Arc::new(OnceCell::new());

        let backend = SongbirdBackend {
            call: Arc::clone(&call_slot),
            current: Mutex::new(None),
            volume: self.default_volume,
        };
        let control = Box::new(SongbirdControl {
            manager: Arc::clone(&self.manager),
            guild_id,
            states: Arc::clone(&tx),
        });

        // El handshake corre aparte: toda la espera vive en await_ready
        let manager = Arc::clone(&self.manager);
        let states = Arc::clone(&tx);
        tokio::spawn(async move {
            states.send_replace(LinkState::Connecting);
            match manager.join(guild_id, channel_id).await {
                Ok(call) => {
                    register_link_events(&call, &states).await;
                    let _ = call_slot.set(call);
                    states.send_replace(LinkState::Ready);
                }
                Err(e) => {
                    warn!(
                        "⚠️ Error al conectar al canal de voz {} en guild {}: {}",
                        channel_id, guild_id, e
                    );
                    states.send_replace(LinkState::Disconnected);
                }
            }
        });

        Ok(JoinedVoice {
            backend,
            states: rx,
            control,
        })
    }
}

async fn register_link_events(call: &Arc<Mutex<Call>>, states: &Arc<watch::Sender<LinkState>>) {
    let mut handler = call.lock().await;
    handler.add_global_event(
        CoreEvent::DriverConnect.into(),
        LinkStateNotifier {
            states: Arc::clone(states),
            state: LinkState::Ready,
        },
    );
    handler.add_global_event(
        CoreEvent::DriverReconnect.into(),
        LinkStateNotifier {
            states: Arc::clone(states),
            state: LinkState::Ready,
        },
    );
    handler.add_global_event(
        CoreEvent::DriverDisconnect.into(),
        LinkStateNotifier {
            states: Arc::clone(states),
            state: LinkState::Disconnected,
        },
    );
}

/// Publica un estado de conexión cuando el driver emite su evento.
struct LinkStateNotifier {
    states: Arc<watch::Sender<LinkState>>,
    state: LinkState,
}

#[async_trait]
impl VoiceEventHandler for LinkStateNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if self.state == LinkState::Disconnected {
            warn!("🔌 Driver de voz desconectado");
        }
        self.states.send_replace(self.state);
        None
    }
}

/// Desmontaje de la conexión vía el manager de songbird.
struct SongbirdControl {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    states: Arc<watch::Sender<LinkState>>,
}

#[async_trait]
impl LinkControl for SongbirdControl {
    async fn disconnect(&self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Salida del canal de voz ya realizada: {}", e);
        }
        self.states.send_replace(LinkState::Destroyed);
    }
}

/// Backend de reproducción sobre el `Call` de songbird.
pub struct SongbirdBackend {
    call: Arc<OnceCell<Arc<Mutex<Call>>>>,
    current: Mutex<Option<TrackHandle>>,
    volume: f32,
}

#[async_trait]
impl AudioBackend for SongbirdBackend {
    type Stream = Input;

    async fn start(&self, stream: Input) -> Result<EndSignal> {
        let call = self
            .call
            .get()
            .ok_or_else(|| anyhow::anyhow!("la conexión de voz aún no está lista"))?;

        let handle = call.lock().await.play_input(stream);
        let _ = handle.set_volume(self.volume);

        let (tx, rx) = oneshot::channel();
        let signal = Arc::new(StdMutex::new(Some(tx)));
        // Fin normal y error del track disparan la misma señal de avance
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    signal: Arc::clone(&signal),
                },
            )
            .map_err(|e| anyhow::anyhow!("no se pudo registrar el evento de fin: {e}"))?;
        handle
            .add_event(Event::Track(TrackEvent::Error), TrackEndNotifier { signal })
            .map_err(|e| anyhow::anyhow!("no se pudo registrar el evento de error: {e}"))?;

        *self.current.lock().await = Some(handle);
        Ok(rx)
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        if let Some(handle) = self.current.lock().await.as_ref() {
            let result = if paused { handle.pause() } else { handle.play() };
            result.map_err(|e| anyhow::anyhow!("control de pausa falló: {e}"))?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.current.lock().await.take() {
            handle
                .stop()
                .map_err(|e| anyhow::anyhow!("no se pudo detener el track: {e}"))?;
        }
        Ok(())
    }
}

/// Señala el fin del track actual; la primera notificación gana.
struct TrackEndNotifier {
    signal: Arc<StdMutex<Option<oneshot::Sender<()>>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if let Some(tx) = self.signal.lock().unwrap().take() {
            let _ = tx.send(());
        }
        None
    }
}
