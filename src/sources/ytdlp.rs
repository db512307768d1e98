use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use songbird::input::{Input, YoutubeDl};
use std::{sync::OnceLock, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use super::{MediaDescriptor, MediaResolver, Playlist};

const WATCH_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Dominios aceptados para URLs de video y playlist.
const VALID_DOMAINS: [&str; 5] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

fn video_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9A-Za-z_-]{11}$").unwrap())
}

/// Información extraída de yt-dlp (`--dump-json`).
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: String,
    title: String,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    playlist_title: Option<String>,
}

impl YtDlpEntry {
    fn into_descriptor(self) -> MediaDescriptor {
        let url = self
            .webpage_url
            .unwrap_or_else(|| format!("{}{}", WATCH_PREFIX, self.id));
        MediaDescriptor {
            title: self.title,
            url,
            duration: self.duration.map(Duration::from_secs_f64),
            thumbnail: self.thumbnail,
        }
    }
}

/// Resolver de medios sobre yt-dlp.
///
/// Metadata, búsqueda y playlists salen del binario `yt-dlp`; el stream de
/// audio se materializa con el input `YoutubeDl` de songbird.
pub struct YtDlpResolver {
    http: reqwest::Client,
    // Limitar requests concurrentes para evitar rate limiting
    rate_limiter: tokio::sync::Semaphore,
    max_playlist_size: usize,
}

impl YtDlpResolver {
    pub fn new(max_playlist_size: usize) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            rate_limiter: tokio::sync::Semaphore::new(3),
            max_playlist_size,
        }
    }

    async fn run_ytdlp(&self, args: &[&str]) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        let output = Command::new("yt-dlp")
            .args(args)
            .output()
            .await
            .context("error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp falló: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Extrae el id de playlist de una URL con dominio de YouTube.
    pub fn playlist_id(query: &str) -> Option<String> {
        let parsed = Url::parse(query).ok()?;
        let host = parsed.host_str()?;
        if !VALID_DOMAINS.contains(&host) {
            return None;
        }
        parsed
            .query_pairs()
            .find(|(key, _)| key == "list")
            .map(|(_, value)| value.into_owned())
    }

    /// Extrae el id de video de una URL de video de YouTube.
    pub fn video_id(query: &str) -> Option<String> {
        let parsed = Url::parse(query).ok()?;
        let host = parsed.host_str()?;

        let id = if host == "youtu.be" {
            parsed.path().trim_start_matches('/').to_string()
        } else if VALID_DOMAINS.contains(&host) {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())?
        } else {
            return None;
        };

        video_id_pattern().is_match(&id).then_some(id)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    type Stream = Input;

    async fn resolve_url(&self, url: &str) -> Result<MediaDescriptor> {
        debug!("📊 Obteniendo info de: {}", url);

        let stdout = self
            .run_ytdlp(&["--no-playlist", "--dump-json", "--no-warnings", url])
            .await?;
        let entry: YtDlpEntry =
            serde_json::from_str(stdout.trim()).context("error al parsear respuesta de yt-dlp")?;

        Ok(entry.into_descriptor())
    }

    async fn resolve_playlist(&self, url: &str) -> Result<Playlist> {
        let id = Self::playlist_id(url)
            .ok_or_else(|| anyhow::anyhow!("no se encontró id de playlist en: {}", url))?;

        info!("📜 Resolviendo playlist: {}", id);

        let playlist_url = format!("https://www.youtube.com/playlist?list={id}");
        let stdout = self
            .run_ytdlp(&[
                "--flat-playlist",
                "--dump-json",
                "--no-warnings",
                &playlist_url,
            ])
            .await?;

        let mut title = None;
        let mut entries = Vec::new();
        for line in stdout.lines() {
            let entry: YtDlpEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Elemento de playlist ilegible, omitido: {}", e);
                    continue;
                }
            };
            if title.is_none() {
                title = entry.playlist_title.clone();
            }
            if video_id_pattern().is_match(&entry.id) {
                entries.push(format!("{}{}", WATCH_PREFIX, entry.id));
            }
            if entries.len() >= self.max_playlist_size {
                warn!(
                    "📜 Playlist truncada a {} elementos",
                    self.max_playlist_size
                );
                break;
            }
        }

        if entries.is_empty() {
            anyhow::bail!("la playlist no tiene elementos reproducibles");
        }

        Ok(Playlist {
            title: title.unwrap_or_else(|| "playlist".to_string()),
            entries,
        })
    }

    async fn search(&self, term: &str) -> Result<MediaDescriptor> {
        info!("🔍 Buscando en YouTube: {}", term);

        let query = format!("ytsearch1:{term}");
        let stdout = self
            .run_ytdlp(&["--no-playlist", "--dump-json", "--no-warnings", &query])
            .await?;

        let line = stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no se encontraron resultados para: {}", term))?;
        let entry: YtDlpEntry =
            serde_json::from_str(line).context("error al parsear respuesta de yt-dlp")?;

        Ok(entry.into_descriptor())
    }

    async fn open(&self, descriptor: &MediaDescriptor) -> Result<Input> {
        info!("🎵 Creando input para: {}", descriptor.title);

        let ytdl = YoutubeDl::new(self.http.clone(), descriptor.url.clone());
        Ok(Input::from(ytdl))
    }

    fn is_playlist_url(&self, query: &str) -> bool {
        Self::playlist_id(query).is_some()
    }

    fn is_media_url(&self, query: &str) -> bool {
        Self::video_id(query).is_some()
    }
}
