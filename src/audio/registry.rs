use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    audio::{
        engine::AudioBackend,
        session::Session,
        voice::{LinkState, VoiceConnector, VoiceLink},
    },
    error::PlayerError,
    sources::MediaResolver,
};

use crate::config::Config;

/// Límites operativos de las sesiones.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_queue_size: usize,
    pub join_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_queue_size: 500,
            join_timeout: Duration::from_secs(20),
        }
    }
}

impl From<&Config> for SessionLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            ..Default::default()
        }
    }
}

/// Mapa autoritativo guild → sesión, con semántica de creación única.
///
/// Es el único estado mutable compartido entre guilds; `get_or_create` se
/// serializa por clave, nunca globalmente, para que dos comandos
/// concurrentes del mismo guild no construyan dos conexiones de voz.
pub struct SessionRegistry<C, R>
where
    C: VoiceConnector,
    R: MediaResolver<Stream = <C::Backend as AudioBackend>::Stream>,
{
    connector: C,
    resolver: Arc<R>,
    limits: SessionLimits,
    sessions: DashMap<GuildId, Arc<Session<C::Backend, R>>>,
    // Candado de creación por guild; se conserva entre sesiones del guild
    creating: DashMap<GuildId, Arc<Mutex<()>>>,
}

impl<C, R> SessionRegistry<C, R>
where
    C: VoiceConnector,
    R: MediaResolver<Stream = <C::Backend as AudioBackend>::Stream>,
{
    pub fn new(connector: C, resolver: Arc<R>, limits: SessionLimits) -> Arc<Self> {
        Arc::new(Self {
            connector,
            resolver,
            limits,
            sessions: DashMap::new(),
            creating: DashMap::new(),
        })
    }

    /// Sesión existente del guild, si la hay.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session<C::Backend, R>>> {
        self.sessions.get(&guild_id).map(|s| Arc::clone(s.value()))
    }

    /// Devuelve la sesión del guild, creándola si no existe.
    ///
    /// `channel_id` es el canal de voz del usuario, si está en alguno; solo
    /// se necesita cuando hay que crear la sesión. Un fallo de conexión no
    /// deja nada a medio inicializar en el registro.
    pub async fn get_or_create(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
    ) -> Result<Arc<Session<C::Backend, R>>, PlayerError> {
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }

        let gate = self
            .creating
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // El que perdió la carrera observa la sesión del ganador
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }

        let channel_id = channel_id.ok_or(PlayerError::NoChannel)?;

        let joined = self
            .connector
            .join(guild_id, channel_id)
            .await
            .map_err(|e| {
                warn!("⚠️ No se pudo iniciar la conexión de voz: {}", e);
                PlayerError::Connection(e.to_string())
            })?;
        let link = VoiceLink::new(joined.states, joined.control);

        if let Err(e) = link.await_ready(self.limits.join_timeout).await {
            // Rollback: el guild nunca llegó a entrar al registro
            link.destroy().await;
            return Err(e);
        }

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        let session = Session::new(
            guild_id,
            link,
            joined.backend,
            Arc::clone(&self.resolver),
            self.limits.max_queue_size,
        );
        self.sessions.insert(guild_id, Arc::clone(&session));
        self.spawn_link_watcher(&session);

        Ok(session)
    }

    /// Quita la sesión del registro; quien la tenga referenciada puede
    /// terminar su operación en curso, pero ya no es alcanzable.
    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<Session<C::Backend, R>>> {
        self.sessions.remove(&guild_id).map(|(_, session)| session)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // Observa la conexión de la sesión: pausa al perderla, reanuda al
    // recuperarla y da de baja la sesión cuando el link muere.
    fn spawn_link_watcher(self: &Arc<Self>, session: &Arc<Session<C::Backend, R>>) {
        let registry = Arc::downgrade(self);
        let session = Arc::clone(session);
        let mut states = session.link().subscribe();

        tokio::spawn(async move {
            loop {
                let state = *states.borrow_and_update();
                match state {
                    LinkState::Disconnected => {
                        warn!(
                            "🔌 Conexión de voz perdida en guild {}",
                            session.guild_id()
                        );
                        session.auto_pause().await;
                    }
                    LinkState::Ready => session.auto_resume().await,
                    LinkState::Destroyed => {
                        if let Some(registry) = registry.upgrade() {
                            registry.remove(session.guild_id());
                        }
                        break;
                    }
                    _ => {}
                }
                if states.changed().await.is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testkit::{FakeConnector, FakeResolver};
    use std::time::Duration;

    fn limits(join_timeout: Duration) -> SessionLimits {
        SessionLimits {
            max_queue_size: 100,
            join_timeout,
        }
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_builds_one_session() {
        let connector = FakeConnector::ready_after(Duration::from_millis(30));
        let joins = connector.join_counter();
        let registry = SessionRegistry::new(
            connector,
            Arc::new(FakeResolver::default()),
            limits(Duration::from_secs(1)),
        );

        let guild = GuildId::new(1);
        let channel = Some(ChannelId::new(10));
        let (a, b) = tokio::join!(
            registry.get_or_create(guild, channel),
            registry.get_or_create(guild, channel),
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(joins.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_no_channel_fails_without_side_effects() {
        let connector = FakeConnector::ready_after(Duration::from_millis(1));
        let registry = SessionRegistry::new(
            connector,
            Arc::new(FakeResolver::default()),
            limits(Duration::from_secs(1)),
        );

        let result = registry.get_or_create(GuildId::new(2), None).await;
        assert!(matches!(result, Err(PlayerError::NoChannel)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_join_timeout_rolls_back() {
        let connector = FakeConnector::never_ready();
        let registry = SessionRegistry::new(
            connector,
            Arc::new(FakeResolver::default()),
            limits(Duration::from_millis(50)),
        );

        let guild = GuildId::new(3);
        let result = registry
            .get_or_create(guild, Some(ChannelId::new(30)))
            .await;

        assert!(matches!(result, Err(PlayerError::ConnectionTimeout(_))));
        // Tras el timeout el guild no queda en el registro
        assert!(registry.get(guild).is_none());
    }

    #[tokio::test]
    async fn test_existing_session_needs_no_channel() {
        let connector = FakeConnector::ready_after(Duration::from_millis(1));
        let registry = SessionRegistry::new(
            connector,
            Arc::new(FakeResolver::default()),
            limits(Duration::from_secs(1)),
        );

        let guild = GuildId::new(4);
        let created = registry
            .get_or_create(guild, Some(ChannelId::new(40)))
            .await
            .unwrap();
        // Un comando posterior sin canal de voz reutiliza la sesión
        let reused = registry.get_or_create(guild, None).await.unwrap();
        assert!(Arc::ptr_eq(&created, &reused));
    }

    #[tokio::test]
    async fn test_destroyed_link_unregisters_session() {
        let connector = FakeConnector::ready_after(Duration::from_millis(1));
        let registry = SessionRegistry::new(
            connector,
            Arc::new(FakeResolver::default()),
            limits(Duration::from_secs(1)),
        );

        let guild = GuildId::new(5);
        let session = registry
            .get_or_create(guild, Some(ChannelId::new(50)))
            .await
            .unwrap();

        session.leave().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(registry.get(guild).is_none());
    }
}
