pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use ytdlp::YtDlpResolver;

/// Descriptor de un medio ya resuelto, previo a materializar su stream.
///
/// Abrir el stream real tiene costo de red; no ocurre por el solo hecho de
/// que el descriptor espere en una cola.
#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

/// Playlist resuelta: título y URLs de sus elementos en orden original.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub title: String,
    pub entries: Vec<String>,
}

/// Proveedor externo de resolución de medios.
///
/// `Stream` es el recurso reproducible que entiende el backend de audio; el
/// núcleo nunca lo inspecciona, solo lo transporta del resolver al backend.
#[async_trait]
pub trait MediaResolver: Send + Sync + 'static {
    type Stream: Send + 'static;

    /// Resuelve una URL de medio a su descriptor.
    async fn resolve_url(&self, url: &str) -> Result<MediaDescriptor>;

    /// Resuelve una URL de playlist a su lista ordenada de elementos.
    async fn resolve_playlist(&self, url: &str) -> Result<Playlist>;

    /// Busca por término y devuelve el mejor candidato.
    async fn search(&self, term: &str) -> Result<MediaDescriptor>;

    /// Materializa el stream reproducible de un descriptor.
    async fn open(&self, descriptor: &MediaDescriptor) -> Result<Self::Stream>;

    /// Indica si la consulta tiene forma de URL de playlist.
    fn is_playlist_url(&self, query: &str) -> bool;

    /// Indica si la consulta tiene forma de URL de medio individual.
    fn is_media_url(&self, query: &str) -> bool;
}
