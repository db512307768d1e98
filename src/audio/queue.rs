use std::collections::VecDeque;
use tracing::debug;

use crate::{audio::track::Track, error::PlayerError};

/// Cola FIFO de tracks de una sesión.
///
/// El orden de inserción es el orden de reproducción, sin excepciones. La
/// posee exclusivamente una sesión; un track nunca vive en dos colas.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega un track al final de la cola.
    pub fn push(&mut self, track: Track) -> Result<(), PlayerError> {
        if self.items.len() >= self.max_size {
            return Err(PlayerError::QueueFull(self.max_size));
        }
        debug!("➕ En cola: {}", track.title());
        self.items.push_back(track);
        Ok(())
    }

    /// Saca el siguiente track del frente de la cola.
    pub fn pop(&mut self) -> Option<Track> {
        self.items.pop_front()
    }

    /// Vista de los primeros `n` títulos, sin mutar la cola.
    pub fn preview(&self, n: usize) -> Vec<String> {
        self.items
            .iter()
            .take(n)
            .map(|track| track.title().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Vacía la cola descartando los tracks sin disparar sus callbacks.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }
}
