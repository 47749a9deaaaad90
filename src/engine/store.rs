//! Received audio for the current turn, indexed by arrival order.

use std::time::Instant;

pub type ChunkId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub payload: Vec<u8>,
    pub size_bytes: usize,
    pub received_at: Instant,
    pub annotation: Option<String>,
    pub played: bool,
    pub playback_started_at: Option<Instant>,
}

/// Append-only within a turn. Ids start at 0 and never repeat until `clear`.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        payload: Vec<u8>,
        annotation: Option<String>,
        received_at: Instant,
    ) -> ChunkId {
        let id = self.chunks.len() as ChunkId;
        self.chunks.push(Chunk {
            id,
            size_bytes: payload.len(),
            payload,
            received_at,
            annotation,
            played: false,
            playback_started_at: None,
        });
        id
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        usize::try_from(id).ok().and_then(|idx| self.chunks.get(idx))
    }

    fn get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        usize::try_from(id).ok().and_then(|idx| self.chunks.get_mut(idx))
    }

    pub fn mark_started(&mut self, id: ChunkId, now: Instant) {
        if let Some(chunk) = self.get_mut(id) {
            chunk.playback_started_at = Some(now);
        }
    }

    pub fn mark_played(&mut self, id: ChunkId) {
        if let Some(chunk) = self.get_mut(id) {
            chunk.played = true;
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.size_bytes).sum()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}
