//! On-disk cache of downloaded tracks.
//!
//! Each track is stored once as `{track id}.{container extension}` in the
//! cache directory. An entry only counts when it is a non-empty file: a
//! missing or zero-byte file is downloaded again.
//!
//! Downloads are written to a temporary file in the same directory and
//! renamed into place when complete, so a half-written entry is never
//! visible. Concurrent [`Cache::ensure_local`] calls for the same track wait
//! for a single download. [`Cache::evict`] aborts a download that is still
//! running for the track, so nothing is persisted after an eviction.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use futures_util::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, ErrorKind, Result},
    format,
    resolver::Resolver,
    track::{Codec, Container, Encoding, Track, TrackId},
};

/// A valid cache entry, ready to be demuxed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    path: PathBuf,
    container: Container,
}

impl Entry {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn container(&self) -> Container {
        self.container
    }
}

/// Per-track coordination between downloads and evictions.
#[derive(Default)]
struct Slot {
    lock: tokio::sync::Mutex<()>,
    evicted: CancellationToken,
}

struct Inner {
    dir: PathBuf,
    resolver: Arc<dyn Resolver>,
    preferred: Codec,
    in_flight: Mutex<HashMap<TrackId, Arc<Slot>>>,
}

impl Inner {
    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<TrackId, Arc<Slot>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a track's slot and forgets it once nobody else does.
struct Claim<'a> {
    inner: &'a Inner,
    id: &'a TrackId,
    slot: Arc<Slot>,
}

impl<'a> Claim<'a> {
    fn new(inner: &'a Inner, id: &'a TrackId) -> Self {
        let slot = Arc::clone(inner.in_flight().entry(id.clone()).or_default());
        Self { inner, id, slot }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight();
        // One reference in the map and one in this claim. An evicted slot
        // has already been replaced or removed.
        let current = in_flight
            .get(self.id)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot));
        if current && Arc::strong_count(&self.slot) <= 2 {
            in_flight.remove(self.id);
        }
    }
}

#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

/// Errors from the resolver keep their kind when they already describe a
/// track failure and are reclassified as `fallback` otherwise.
fn classify(e: Error, fallback: ErrorKind) -> Error {
    if e.kind.is_track_failure() {
        e
    } else {
        Error::new(fallback, e.to_string())
    }
}

impl Cache {
    /// Opens the cache in `dir`, creating the directory when needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub async fn open(
        dir: impl Into<PathBuf>,
        resolver: Arc<dyn Resolver>,
        preferred: Codec,
    ) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!("cache directory: {}", dir.display());

        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                resolver,
                preferred,
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Where the entry for `id` in `container` lives.
    #[must_use]
    pub fn entry_path(&self, id: &TrackId, container: Container) -> PathBuf {
        self.inner
            .dir
            .join(format!("{id}.{}", container.extension()))
    }

    async fn is_valid(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|metadata| metadata.is_file() && metadata.len() > 0)
    }

    /// Finds a valid entry for `id` in any container.
    async fn lookup(&self, id: &TrackId) -> Option<Entry> {
        for container in Container::ALL {
            let path = self.entry_path(id, container);
            if Self::is_valid(&path).await {
                return Some(Entry { path, container });
            }
        }
        None
    }

    /// Makes sure `track` is cached and returns its entry.
    ///
    /// A cache hit returns right away without network access. Otherwise the
    /// track's info is resolved when it has none yet, an encoding is selected
    /// and downloaded.
    ///
    /// # Errors
    ///
    /// * `Resolution` when the track info cannot be resolved
    /// * `NoPlayableEncoding` when no encoding is in the preferred codec
    /// * `Download` when the transfer or the disk write fails
    /// * `Cancelled` when the track is evicted meanwhile
    pub async fn ensure_local(&self, track: &Track) -> Result<Entry> {
        let claim = Claim::new(&self.inner, track.id());
        let evicted = claim.slot.evicted.clone();

        tokio::select! {
            biased;

            () = evicted.cancelled() => {
                debug!("{track} was evicted while caching");
                Err(Error::cancelled(format!("{track} was evicted")))
            }
            result = self.fetch(track, &claim.slot) => result,
        }
    }

    async fn fetch(&self, track: &Track, slot: &Slot) -> Result<Entry> {
        let id = track.id();
        let _guard = slot.lock.lock().await;
        if let Some(entry) = self.lookup(id).await {
            debug!("cache hit for {track}");
            return Ok(entry);
        }

        debug!("cache miss for {track}");
        let info = match track.info() {
            Some(info) => info,
            None => {
                let info = self
                    .inner
                    .resolver
                    .resolve_info(track)
                    .await
                    .map_err(|e| classify(e, ErrorKind::Resolution))?;
                track.set_info(info)
            }
        };

        let preferred = self.inner.preferred;
        let encoding = format::select(&info.encodings, preferred).ok_or_else(|| {
            Error::no_playable_encoding(format!("{track} has no {preferred} encoding"))
        })?;

        let path = self.entry_path(id, encoding.container);
        self.download(encoding, &path).await?;
        info!("cached {track} as {encoding}");

        Ok(Entry {
            path,
            container: encoding.container,
        })
    }

    async fn download(&self, encoding: &Encoding, path: &Path) -> Result<()> {
        let mut stream = self
            .inner
            .resolver
            .download(encoding)
            .await
            .map_err(|e| classify(e, ErrorKind::Download))?;

        // The temporary file is deleted when dropped, so an aborted download
        // leaves nothing behind.
        let (file, temp_path) = NamedTempFile::new_in(&self.inner.dir)
            .map_err(Error::download)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify(e, ErrorKind::Download))?;
            file.write_all(&chunk).await.map_err(Error::download)?;
            written += chunk.len() as u64;
            trace!("{}: {written} bytes", path.display());
        }
        file.flush().await.map_err(Error::download)?;
        drop(file);

        if written == 0 {
            return Err(Error::download(format!("{} is empty", encoding.url)));
        }

        temp_path
            .persist(path)
            .map_err(|e| Error::download(e.error))?;
        Ok(())
    }

    /// Deletes every entry for `id`. Absent entries are not an error.
    ///
    /// A download of `id` that is still running is aborted first, and its
    /// callers get `Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing entry cannot be deleted.
    pub async fn evict(&self, id: &TrackId) -> Result<()> {
        // Callers arriving from now on get a fresh slot.
        let slot = self.inner.in_flight().remove(id);
        let _guard = match &slot {
            Some(slot) => {
                slot.evicted.cancel();
                // Wait for the aborted download to let go of the track.
                Some(slot.lock.lock().await)
            }
            None => None,
        };

        for container in Container::ALL {
            let path = self.entry_path(id, container);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("evicted {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Whether a valid entry for `id` exists.
    pub async fn contains(&self, id: &TrackId) -> bool {
        self.lookup(id).await.is_some()
    }
}
