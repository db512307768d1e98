use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::watch;
use tracing::debug;

use crate::{audio::engine::AudioBackend, error::PlayerError};

/// Estados de la conexión al canal de voz. `Destroyed` es terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

/// Control de desmontaje de la conexión subyacente.
#[async_trait]
pub trait LinkControl: Send + Sync {
    /// Abandona el canal de voz y publica `Destroyed` en los estados.
    async fn disconnect(&self);
}

/// Primitiva externa de conexión de voz.
#[async_trait]
pub trait VoiceConnector: Send + Sync + 'static {
    type Backend: AudioBackend;

    /// Inicia la conexión a un canal de voz.
    ///
    /// Debe devolver de inmediato, con los estados en `Signalling`; todo el
    /// tiempo de handshake se consume dentro de [`VoiceLink::await_ready`].
    /// Los errores de conexión se registran y se publican como
    /// `Disconnected`, nunca tumban la sesión.
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<JoinedVoice<Self::Backend>>;
}

/// Resultado de iniciar una conexión de voz.
pub struct JoinedVoice<B> {
    pub backend: B,
    pub states: watch::Receiver<LinkState>,
    pub control: Box<dyn LinkControl>,
}

/// Máquina de estados de conectividad al canal de voz de una sesión.
pub struct VoiceLink {
    states: watch::Receiver<LinkState>,
    control: Box<dyn LinkControl>,
    destroyed: AtomicBool,
}

impl VoiceLink {
    pub fn new(states: watch::Receiver<LinkState>, control: Box<dyn LinkControl>) -> Self {
        Self {
            states,
            control,
            destroyed: AtomicBool::new(false),
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> LinkState {
        *self.states.borrow()
    }

    /// Observa los cambios de estado de la conexión.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.states.clone()
    }

    /// Espera hasta que la conexión esté lista, con límite de tiempo.
    ///
    /// Es la única espera bloqueante del camino de conexión; al exceder el
    /// límite el llamador debe destruir el link.
    pub async fn await_ready(&self, limit: Duration) -> Result<(), PlayerError> {
        let mut states = self.states.clone();
        let reached_ready = async move {
            loop {
                match *states.borrow_and_update() {
                    LinkState::Ready => return true,
                    LinkState::Destroyed => return false,
                    _ => {}
                }
                if states.changed().await.is_err() {
                    return false;
                }
            }
        };

        match tokio::time::timeout(limit, reached_ready).await {
            Ok(true) => Ok(()),
            _ => Err(PlayerError::ConnectionTimeout(limit.as_secs())),
        }
    }

    /// Desmonta la conexión; las llamadas repetidas no tienen efecto.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            debug!("Conexión de voz ya destruida");
            return;
        }
        self.control.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testkit::NullControl;

    #[tokio::test]
    async fn test_await_ready_resolves_when_ready() {
        let (tx, rx) = watch::channel(LinkState::Signalling);
        let link = VoiceLink::new(rx, Box::new(NullControl));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(LinkState::Connecting);
            let _ = tx.send(LinkState::Ready);
        });

        assert!(link.await_ready(Duration::from_secs(1)).await.is_ok());
        assert_eq!(link.state(), LinkState::Ready);
    }

    #[tokio::test]
    async fn test_await_ready_times_out() {
        let (_tx, rx) = watch::channel(LinkState::Signalling);
        let link = VoiceLink::new(rx, Box::new(NullControl));

        let result = link.await_ready(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PlayerError::ConnectionTimeout(_))));
    }

    #[tokio::test]
    async fn test_await_ready_fails_fast_on_destroyed() {
        let (tx, rx) = watch::channel(LinkState::Signalling);
        let link = VoiceLink::new(rx, Box::new(NullControl));

        tokio::spawn(async move {
            let _ = tx.send(LinkState::Destroyed);
        });

        let result = link.await_ready(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(PlayerError::ConnectionTimeout(_))));
    }
}
