use thiserror::Error;

/// Errores visibles para el usuario del subsistema de reproducción.
///
/// El texto de cada variante se muestra tal cual en el canal de texto, así que
/// se mantiene en lenguaje de usuario y sin detalles internos.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("debes estar en un canal de voz para usar este comando")]
    NoChannel,

    #[error("no se pudo conectar al canal de voz en {0} segundos, inténtalo más tarde")]
    ConnectionTimeout(u64),

    #[error("no se pudo resolver el track: {0}")]
    TrackResolution(String),

    #[error("{failed} de {total} elementos de la playlist no se pudieron resolver")]
    PlaylistPartialFailure { failed: usize, total: usize },

    #[error("no estoy reproduciendo nada en este servidor")]
    NotPlaying,

    #[error("la cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error("error de reproducción: {0}")]
    Playback(String),

    #[error("error de conexión de voz: {0}")]
    Connection(String),
}
