//! The ordered sequence of tracks of one session.
//!
//! [`Queue`] is plain data. The session keeps it behind a single mutex and
//! never holds that lock across an await, so each operation here is atomic
//! with respect to the others and to the playback loop.
//!
//! While a track streams it is the *active* entry, which is always the head
//! of the queue. Operations that remove entries return the removed tracks;
//! the caller decides on cache eviction with [`Queue::evictable`] after
//! releasing the lock.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use crate::track::{self, Track, TrackId};

/// What happens to a track after it finished playing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopMode {
    /// Keep the track at the head and play it again.
    pub song: bool,
    /// Move the track to the tail.
    pub queue: bool,
}

/// Queue contents for display.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub active: Option<Arc<Track>>,
    /// All entries in order. While playing, the first one is `active`.
    pub entries: Vec<Arc<Track>>,
    /// Sum of the advertised durations of `entries`.
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct Queue {
    entries: VecDeque<Arc<Track>>,
    active: Option<Arc<Track>>,
}

impl Queue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `tracks` to the tail, keeping their order.
    pub fn append(&mut self, tracks: impl IntoIterator<Item = Arc<Track>>) {
        self.entries.extend(tracks);
    }

    #[must_use]
    pub fn head(&self) -> Option<Arc<Track>> {
        self.entries.front().cloned()
    }

    /// The entry that plays after the head.
    #[must_use]
    pub fn upcoming(&self) -> Option<Arc<Track>> {
        self.entries.get(1).cloned()
    }

    #[must_use]
    pub fn active(&self) -> Option<&Arc<Track>> {
        self.active.as_ref()
    }

    /// Whether the active track is still the head entry. False after the
    /// active entry was removed from the queue while streaming.
    #[must_use]
    pub fn is_active_at_head(&self) -> bool {
        match (&self.active, self.entries.front()) {
            (Some(active), Some(head)) => Arc::ptr_eq(active, head),
            _ => false,
        }
    }

    /// Marks the head as the active entry and returns it.
    pub fn activate(&mut self) -> Option<Arc<Track>> {
        self.active = self.head();
        self.active.clone()
    }

    /// Whether any entry, or the active track, has identity `id`.
    #[must_use]
    pub fn is_referenced(&self, id: &TrackId) -> bool {
        self.active.as_ref().is_some_and(|track| track.id() == id)
            || self.entries.iter().any(|track| track.id() == id)
    }

    /// The identities of `removed` whose cache entries nothing in the queue
    /// needs anymore, without duplicates.
    #[must_use]
    pub fn evictable<'a>(&self, removed: impl IntoIterator<Item = &'a Arc<Track>>) -> Vec<TrackId> {
        let mut seen = HashSet::new();
        removed
            .into_iter()
            .map(|track| track.id())
            .filter(|id| !self.is_referenced(id) && seen.insert(*id))
            .cloned()
            .collect()
    }

    /// Removes the first entry with identity `id`.
    ///
    /// Removing the active entry only affects the bookkeeping: the track
    /// keeps streaming, and is not put back by loop policies afterwards.
    pub fn remove_by_id(&mut self, id: &TrackId) -> Option<Arc<Track>> {
        let position = self.entries.iter().position(|track| track.id() == id)?;
        self.entries.remove(position)
    }

    /// Removes the entry at `position`, counting from the head.
    pub fn remove_at(&mut self, position: usize) -> Option<Arc<Track>> {
        self.entries.remove(position)
    }

    /// Keeps the first entry per track identity, in order.
    pub fn remove_duplicates(&mut self) -> Vec<Arc<Track>> {
        let mut seen = HashSet::new();
        let mut removed = Vec::new();
        self.entries.retain(|track| {
            if seen.insert(track.id().clone()) {
                true
            } else {
                removed.push(Arc::clone(track));
                false
            }
        });
        removed
    }

    /// Shuffles the queue, keeping the active entry at the head.
    ///
    /// Returns the entry that plays next after the shuffle: the new head, or
    /// the entry after the active one.
    pub fn shuffle(&mut self) -> Option<Arc<Track>> {
        let start = usize::from(self.is_active_at_head());
        if self.entries.len().saturating_sub(start) < 2 {
            return None;
        }

        fastrand::shuffle(&mut self.entries.make_contiguous()[start..]);
        self.entries.get(start).cloned()
    }

    /// Removes every entry except the active one.
    pub fn clear(&mut self) -> Vec<Arc<Track>> {
        let keep = if self.is_active_at_head() {
            self.entries.pop_front()
        } else {
            None
        };
        let removed = self.entries.drain(..).collect();
        self.entries.extend(keep);
        removed
    }

    /// Removes everything, including the active entry.
    pub fn drain(&mut self) -> Vec<Arc<Track>> {
        let mut removed: Vec<_> = self.entries.drain(..).collect();
        if let Some(active) = self.active.take() {
            if !removed.iter().any(|track| Arc::ptr_eq(track, &active)) {
                removed.push(active);
            }
        }
        removed
    }

    /// Drops the entries in front of `position` so that it plays next.
    ///
    /// The active entry is not dropped; the caller skips it. Returns `None`
    /// when `position` is out of range or is the active entry itself.
    pub fn skip_to(&mut self, position: usize) -> Option<Vec<Arc<Track>>> {
        let start = usize::from(self.is_active_at_head());
        if position < start || position >= self.entries.len() {
            return None;
        }
        Some(self.entries.drain(start..position).collect())
    }

    /// Applies the loop policy to the active track after it stopped playing
    /// and clears the active marker.
    ///
    /// Loop-song wins over loop-queue. Returns the track when it left the
    /// queue: either removed now, or removed earlier while it was streaming.
    pub fn advance(&mut self, mode: LoopMode) -> Option<Arc<Track>> {
        let finished = self.active.take()?;
        let Some(position) = self
            .entries
            .iter()
            .position(|track| Arc::ptr_eq(track, &finished))
        else {
            return Some(finished);
        };

        if mode.song {
            None
        } else if mode.queue {
            if let Some(track) = self.entries.remove(position) {
                self.entries.push_back(track);
            }
            None
        } else {
            self.entries.remove(position)
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let entries: Vec<_> = self.entries.iter().cloned().collect();
        Snapshot {
            active: self.active.clone(),
            duration: track::total_duration(entries.iter().map(Arc::as_ref)),
            entries,
        }
    }
}
