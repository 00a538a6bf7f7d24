//! Playback session and its controller.
//!
//! A [`Player`] owns one queue, its loop flags and the connection to one
//! sink. After [`play`](Player::play) a background task drives the queue:
//! it activates the head, makes sure it is cached while prefetching the
//! entry after it, and streams it through the send loop. When the stream
//! ends the loop policy decides whether the track stays, moves to the tail
//! or leaves the queue, and the next head starts right away.
//!
//! # States
//!
//! * `Idle`: nothing streams; the queue may hold entries
//! * `Playing`: the background task is running
//! * `Stopped`: disconnected; every further command fails
//!
//! # Failures
//!
//! A track that cannot be resolved, downloaded or demuxed is removed from
//! the queue and reported with [`Event::TrackFailed`]. Playback continues
//! with the next entry; only [`disconnect`](Player::disconnect) ends the
//! session.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use url::Url;

use crate::{
    cache::Cache,
    config::Config,
    control::Control,
    error::{Error, ErrorKind, Result},
    events::{EndReason, Event},
    pipe::{self, Outcome},
    queue::{LoopMode, Queue, Snapshot},
    resolver::Resolver,
    sink::Sink,
    track::{self, Track, TrackId},
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Idle,
    Playing,
    Stopped,
}

/// What [`Player::enqueue_url`] added to the queue.
#[derive(Clone, Debug)]
pub enum Enqueued {
    Track(Arc<Track>),
    Playlist {
        title: String,
        /// Number of tracks appended.
        added: usize,
        /// Number of unplayable tracks left out.
        skipped: usize,
        /// Total advertised duration of the appended tracks.
        duration: Duration,
    },
}

pub struct Player {
    /// Lifecycle state. Locked before `queue` when both are needed.
    state: Mutex<State>,
    queue: Mutex<Queue>,

    loop_song: AtomicBool,
    loop_queue: AtomicBool,

    /// Transport for the next stream, set by [`join`](Self::join).
    sink: Mutex<Option<Arc<dyn Sink>>>,

    control: Control,

    /// Cancelled on disconnect; stops downloads as well as streams.
    stop: CancellationToken,

    /// Tracks the playback task, prefetches and playlist expansions.
    tasks: TaskTracker,

    cache: Cache,
    resolver: Arc<dyn Resolver>,

    events: Mutex<Option<UnboundedSender<Event>>>,

    frame_buffer: usize,
    prefetch: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Player {
    /// Creates an idle session without a sink.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid configuration, or an error
    /// when the cache directory cannot be created.
    pub async fn new(config: &Config, resolver: Arc<dyn Resolver>) -> Result<Arc<Self>> {
        config.validate()?;

        let cache = Cache::open(
            config.cache_dir.clone(),
            Arc::clone(&resolver),
            config.preferred_codec,
        )
        .await?;

        let stop = CancellationToken::new();
        Ok(Arc::new(Self {
            state: Mutex::new(State::Idle),
            queue: Mutex::new(Queue::new()),

            loop_song: AtomicBool::new(false),
            loop_queue: AtomicBool::new(false),

            sink: Mutex::new(None),
            control: Control::new(stop.clone()),
            stop,
            tasks: TaskTracker::new(),

            cache,
            resolver,

            events: Mutex::new(None),

            frame_buffer: config.frame_buffer,
            prefetch: config.prefetch,
        }))
    }

    /// Sends playback events to `tx` from now on.
    pub fn register(&self, tx: UnboundedSender<Event>) {
        *lock(&self.events) = Some(tx);
    }

    fn emit(&self, event: Event) {
        let mut events = lock(&self.events);
        if events.as_ref().is_some_and(|tx| tx.send(event).is_err()) {
            debug!("event receiver dropped");
            *events = None;
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        *lock(&self.state)
    }

    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    fn check_connected(state: State) -> Result<()> {
        if state == State::Stopped {
            Err(Error::failed_precondition("session is disconnected"))
        } else {
            Ok(())
        }
    }

    /// Attaches the transport that tracks are streamed to.
    ///
    /// A stream that is already running keeps its sink; the new one is used
    /// from the next [`play`](Self::play) on.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` after [`disconnect`](Self::disconnect).
    pub fn join(&self, sink: Arc<dyn Sink>) -> Result<()> {
        let state = lock(&self.state);
        Self::check_connected(*state)?;
        if lock(&self.sink).replace(sink).is_some() {
            debug!("replaced sink");
        }
        Ok(())
    }

    /// Resolves `url` and appends the track, or the playable tracks of the
    /// playlist, to the queue.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` when `url` is not a URL
    /// * `Resolution` when it cannot be resolved
    /// * `NoPlayableEncoding` when nothing playable was found
    /// * `FailedPrecondition` after [`disconnect`](Self::disconnect)
    pub async fn enqueue_url(&self, url: &str) -> Result<Enqueued> {
        Self::check_connected(self.state())?;
        let url = Url::parse(url.trim())?;

        if self.resolver.is_playlist(&url) {
            self.enqueue_playlist(url).await
        } else {
            let track = self
                .resolver
                .resolve_track(&url)
                .await
                .map_err(|e| Error::resolution(e.to_string()))?;
            if !track.is_playable() {
                return Err(Error::no_playable_encoding(format!(
                    "{track} cannot be played"
                )));
            }

            let track = Arc::new(track);
            self.append([Arc::clone(&track)])?;
            info!("queued {track}");
            Ok(Enqueued::Track(track))
        }
    }

    async fn enqueue_playlist(&self, url: Url) -> Result<Enqueued> {
        // Expansion may fetch a lot of metadata; run it as a session task so
        // that disconnecting waits for it.
        let resolver = Arc::clone(&self.resolver);
        let stop = self.stop.clone();
        let expansion = self.tasks.spawn(async move {
            tokio::select! {
                result = resolver.resolve_playlist(&url) => Some(result),
                () = stop.cancelled() => None,
            }
        });

        let playlist = expansion
            .await?
            .ok_or_else(|| Error::cancelled("session is disconnecting"))?
            .map_err(|e| Error::resolution(e.to_string()))?;

        let (playable, unplayable): (Vec<_>, Vec<_>) = playlist
            .tracks
            .into_iter()
            .partition(Track::is_playable);
        for track in &unplayable {
            debug!("leaving out unplayable {track}");
        }

        if playable.is_empty() {
            return Err(Error::no_playable_encoding(format!(
                "playlist \"{}\" has no playable tracks",
                playlist.title
            )));
        }

        let tracks: Vec<_> = playable.into_iter().map(Arc::new).collect();
        let added = tracks.len();
        let duration = track::total_duration(tracks.iter().map(Arc::as_ref));
        self.append(tracks)?;
        info!(
            "queued {added} tracks from playlist \"{}\" ({} left out)",
            playlist.title,
            unplayable.len()
        );

        Ok(Enqueued::Playlist {
            title: playlist.title,
            added,
            skipped: unplayable.len(),
            duration,
        })
    }

    fn append(&self, tracks: impl IntoIterator<Item = Arc<Track>>) -> Result<()> {
        let state = lock(&self.state);
        Self::check_connected(*state)?;
        lock(&self.queue).append(tracks);
        Ok(())
    }

    /// Starts playing the queue. A no-op while already playing.
    ///
    /// # Errors
    ///
    /// * `SinkUnavailable` without a joined sink
    /// * `FailedPrecondition` when the queue is empty or after
    ///   [`disconnect`](Self::disconnect)
    pub fn play(self: &Arc<Self>) -> Result<()> {
        let mut state = lock(&self.state);
        match *state {
            State::Stopped => return Self::check_connected(*state),
            State::Playing => {
                debug!("already playing");
                return Ok(());
            }
            State::Idle => {}
        }

        let sink = lock(&self.sink)
            .clone()
            .ok_or_else(|| Error::sink_unavailable("join an audio channel first"))?;
        if lock(&self.queue).is_empty() {
            return Err(Error::failed_precondition("the queue is empty"));
        }

        *state = State::Playing;
        debug!("state: idle -> playing");

        let player = Arc::clone(self);
        self.tasks.spawn(async move { player.run(sink).await });
        Ok(())
    }

    /// The playback loop, running until the queue is empty or the session
    /// is stopped.
    async fn run(self: Arc<Self>, sink: Arc<dyn Sink>) {
        loop {
            let track = {
                let mut state = lock(&self.state);
                if *state != State::Playing {
                    return;
                }

                let mut queue = lock(&self.queue);
                if let Some(track) = queue.activate() {
                    track
                } else {
                    *state = State::Idle;
                    // Signals for a track that will never play are void.
                    self.control.reset();
                    drop(queue);
                    drop(state);

                    info!("queue is empty");
                    debug!("state: playing -> idle");
                    self.emit(Event::Idle);
                    return;
                }
            };

            info!("now playing {track}");
            self.emit(Event::TrackChanged(track.id().clone()));

            let result = self.play_track(&track, sink.as_ref()).await;

            let (mode, forced_eviction) = match result {
                Ok(Outcome::Stopped) => return,
                Ok(Outcome::Finished) => {
                    self.emit(Event::TrackEnded(track.id().clone(), EndReason::Finished));
                    (self.loop_mode(), false)
                }
                Ok(Outcome::Skipped) => {
                    self.emit(Event::TrackEnded(track.id().clone(), EndReason::Skipped));
                    let mode = LoopMode {
                        song: false,
                        ..self.loop_mode()
                    };
                    (mode, false)
                }
                Err(e) => {
                    error!("failed to play {track}: {e}");
                    self.emit(Event::TrackFailed(track.id().clone(), e.kind));
                    (LoopMode::default(), e.kind == ErrorKind::Decode)
                }
            };

            let evict = {
                let mut queue = lock(&self.queue);
                let removed = queue.advance(mode);
                if forced_eviction {
                    // The cached file is broken, whoever else refers to it.
                    vec![track.id().clone()]
                } else {
                    queue.evictable(removed.as_ref())
                }
            };
            self.evict(&evict).await;
        }
    }

    /// Caches and streams one track.
    async fn play_track(
        self: &Arc<Self>,
        track: &Arc<Track>,
        sink: &dyn Sink,
    ) -> Result<Outcome> {
        if !track.is_playable() {
            return Err(Error::no_playable_encoding(format!(
                "{track} cannot be played"
            )));
        }

        let entry = tokio::select! {
            result = self.cache.ensure_local(track) => result?,
            () = self.stop.cancelled() => return Ok(Outcome::Stopped),
        };

        if self.prefetch {
            let upcoming = lock(&self.queue).upcoming();
            if let Some(upcoming) = upcoming {
                self.prefetch(upcoming);
            }
        }

        self.emit(Event::Play(track.id().clone()));
        pipe::stream(
            entry.path(),
            entry.container(),
            sink,
            &self.control,
            self.frame_buffer,
        )
        .await
    }

    /// Caches `track` in the background. Failures are only logged: the
    /// track is tried again when it comes up for playing.
    ///
    /// A track that left the queue before its download got under way is
    /// evicted again once the download is done.
    fn prefetch(self: &Arc<Self>, track: Arc<Track>) {
        if !track.is_playable() {
            return;
        }

        let player = Arc::clone(self);
        self.tasks.spawn(async move {
            let result = tokio::select! {
                result = player.cache.ensure_local(&track) => result,
                () = player.stop.cancelled() => return,
            };

            match result {
                Ok(_) => {
                    let orphaned = !lock(&player.queue).is_referenced(track.id());
                    if orphaned {
                        debug!("{track} left the queue while prefetching");
                        player.evict(&[track.id().clone()]).await;
                    } else {
                        debug!("prefetched {track}");
                    }
                }
                Err(e) if e.kind == ErrorKind::Cancelled => debug!("prefetch of {track} aborted"),
                Err(e) => warn!("failed to prefetch {track}: {e}"),
            }
        });
    }

    async fn evict(&self, ids: &[TrackId]) {
        for id in ids {
            if let Err(e) = self.cache.evict(id).await {
                warn!("failed to evict {id}: {e}");
            }
        }
    }

    fn loop_mode(&self) -> LoopMode {
        LoopMode {
            song: self.loop_song.load(Ordering::SeqCst),
            queue: self.loop_queue.load(Ordering::SeqCst),
        }
    }

    /// Ends the current track. Loop-song does not apply to it; loop-queue
    /// does. A no-op while idle.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` after [`disconnect`](Self::disconnect).
    pub fn skip(&self) -> Result<()> {
        let state = lock(&self.state);
        match *state {
            State::Playing => {
                debug!("skip requested");
                self.control.skip();
                Ok(())
            }
            State::Idle => {
                debug!("nothing to skip");
                Ok(())
            }
            State::Stopped => Self::check_connected(*state),
        }
    }

    /// Restarts the current track from the beginning.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` while idle or after
    /// [`disconnect`](Self::disconnect).
    pub fn replay(&self) -> Result<()> {
        let state = lock(&self.state);
        Self::check_playing(*state)?;
        debug!("replay requested");
        self.control.replay();
        Ok(())
    }

    fn check_playing(state: State) -> Result<()> {
        Self::check_connected(state)?;
        if state == State::Playing {
            Ok(())
        } else {
            Err(Error::failed_precondition("nothing is playing"))
        }
    }

    /// Freezes frame delivery at the next frame boundary.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` while idle or after
    /// [`disconnect`](Self::disconnect).
    pub fn pause(&self) -> Result<()> {
        let state = lock(&self.state);
        Self::check_playing(*state)?;
        if !self.control.set_paused(true) {
            info!("paused");
            self.emit(Event::Pause);
        }
        Ok(())
    }

    /// Continues frame delivery where [`pause`](Self::pause) left off.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` while idle or after
    /// [`disconnect`](Self::disconnect).
    pub fn resume(&self) -> Result<()> {
        let state = lock(&self.state);
        Self::check_playing(*state)?;
        if self.control.set_paused(false) {
            info!("resumed");
            self.emit(Event::Resume);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Sets loop-song and returns the previous value.
    pub fn set_loop_song(&self, enabled: bool) -> bool {
        let previous = self.loop_song.swap(enabled, Ordering::SeqCst);
        debug!("loop song: {enabled}");
        previous
    }

    /// Sets loop-queue and returns the previous value.
    pub fn set_loop_queue(&self, enabled: bool) -> bool {
        let previous = self.loop_queue.swap(enabled, Ordering::SeqCst);
        debug!("loop queue: {enabled}");
        previous
    }

    #[must_use]
    pub fn loop_song(&self) -> bool {
        self.loop_song.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn loop_queue(&self) -> bool {
        self.loop_queue.load(Ordering::SeqCst)
    }

    /// Removes the first entry of track `id` and evicts its cache entry when
    /// nothing else in the queue refers to it.
    ///
    /// Removing the active track does not interrupt it; use
    /// [`skip`](Self::skip) for that.
    ///
    /// # Errors
    ///
    /// `NotFound` when no entry has that identity.
    pub async fn remove_by_id(&self, id: &TrackId) -> Result<Arc<Track>> {
        let (removed, evict) = {
            let mut queue = lock(&self.queue);
            let removed = queue
                .remove_by_id(id)
                .ok_or_else(|| Error::not_found(format!("{id} is not queued")))?;
            let evict = queue.evictable([&removed]);
            (removed, evict)
        };

        info!("removed {removed}");
        self.evict(&evict).await;
        Ok(removed)
    }

    /// Removes the entry at `position`, counting from the head.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue is shorter.
    pub async fn remove_at(&self, position: usize) -> Result<Arc<Track>> {
        let (removed, evict) = {
            let mut queue = lock(&self.queue);
            let removed = queue
                .remove_at(position)
                .ok_or_else(|| Error::not_found(format!("nothing queued at {position}")))?;
            let evict = queue.evictable([&removed]);
            (removed, evict)
        };

        info!("removed {removed}");
        self.evict(&evict).await;
        Ok(removed)
    }

    /// Makes the entry at `position` play next by dropping the entries in
    /// front of it, and skips the current track.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `position` is out of range or is the active
    /// track; `FailedPrecondition` after [`disconnect`](Self::disconnect).
    pub async fn skip_to(&self, position: usize) -> Result<()> {
        let evict = {
            let state = lock(&self.state);
            Self::check_connected(*state)?;

            let mut queue = lock(&self.queue);
            let dropped = queue
                .skip_to(position)
                .ok_or_else(|| Error::invalid_argument(format!("cannot skip to {position}")))?;
            if *state == State::Playing && queue.is_active_at_head() {
                self.control.skip();
            }
            queue.evictable(&dropped)
        };

        self.evict(&evict).await;
        Ok(())
    }

    /// Removes every entry except the active one. Returns how many were
    /// removed.
    pub async fn clear(&self) -> usize {
        let (count, evict) = {
            let mut queue = lock(&self.queue);
            let removed = queue.clear();
            (removed.len(), queue.evictable(&removed))
        };

        info!("cleared {count} tracks");
        self.evict(&evict).await;
        count
    }

    /// Shuffles the queue, keeping the active track at the head, and
    /// prefetches the track that now plays next.
    pub fn shuffle(self: &Arc<Self>) {
        let next = {
            let state = lock(&self.state);
            let next = lock(&self.queue).shuffle();
            next.filter(|_| *state != State::Stopped && self.prefetch)
        };

        if let Some(next) = next {
            debug!("shuffled, {next} is up next");
            self.prefetch(next);
        }
    }

    /// Keeps only the first entry per track. Returns how many were removed.
    pub fn remove_duplicates(&self) -> usize {
        let count = lock(&self.queue).remove_duplicates().len();
        debug!("removed {count} duplicates");
        count
    }

    #[must_use]
    pub fn queue_snapshot(&self) -> Snapshot {
        lock(&self.queue).snapshot()
    }

    /// The track being prepared or streamed.
    #[must_use]
    pub fn active_track(&self) -> Option<Arc<Track>> {
        lock(&self.queue).active().cloned()
    }

    /// Tears the session down: stops the stream and every background task,
    /// clears the queue with its cache entries and releases the sink.
    ///
    /// Returns once all tasks have finished.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` when already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            Self::check_connected(*state)?;
            *state = State::Stopped;
        }
        debug!("state: stopped");

        self.control.stop();
        self.tasks.close();
        self.tasks.wait().await;

        let drained = lock(&self.queue).drain();
        let mut seen = HashSet::new();
        let ids: Vec<_> = drained
            .iter()
            .map(|track| track.id().clone())
            .filter(|id| seen.insert(id.clone()))
            .collect();
        self.evict(&ids).await;

        let sink = lock(&self.sink).take();
        if let Some(sink) = sink {
            if let Err(e) = sink.disconnect().await {
                warn!("failed to release sink: {e}");
            }
        }

        info!("disconnected");
        self.emit(Event::Disconnected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{FakeResolver, RecordingSink},
        track::Codec,
    };
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const SHORT: Duration = Duration::from_millis(300);
    const LONG: Duration = Duration::from_secs(30);

    struct Session {
        _dir: tempfile::TempDir,
        resolver: Arc<FakeResolver>,
        sink: Arc<RecordingSink>,
        player: Arc<Player>,
        events: UnboundedReceiver<Event>,
    }

    async fn session() -> Session {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_dir: dir.path().join("cache"),
            preferred_codec: Codec::Pcm,
            frame_buffer: 4,
            ..Config::default()
        };

        let resolver = Arc::new(FakeResolver::new());
        let player = Player::new(&config, resolver.clone()).await.unwrap();
        let sink = Arc::new(RecordingSink::new());
        player.join(sink.clone()).unwrap();

        let (tx, events) = mpsc::unbounded_channel();
        player.register(tx);

        Session {
            _dir: dir,
            resolver,
            sink,
            player,
            events,
        }
    }

    impl Session {
        async fn enqueue(&self, url: &Url) {
            self.player.enqueue_url(url.as_str()).await.unwrap();
        }

        /// Waits for `expected`, skipping other events.
        async fn expect(&mut self, expected: Event) {
            let wait = async {
                while let Some(event) = self.events.recv().await {
                    if event == expected {
                        return;
                    }
                }
                panic!("event channel closed before {expected}");
            };
            tokio::time::timeout(Duration::from_secs(10), wait)
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {expected}"));
        }

        fn queued(&self) -> Vec<String> {
            self.player
                .queue_snapshot()
                .entries
                .iter()
                .map(|track| track.id().to_string())
                .collect()
        }
    }

    fn id(name: &str) -> TrackId {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn play_needs_a_sink() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let player = Player::new(&config, Arc::new(FakeResolver::new()))
            .await
            .unwrap();

        let err = player.play().unwrap_err();
        assert_eq!(err.kind, ErrorKind::SinkUnavailable);
        assert_eq!(player.state(), State::Idle);
    }

    #[tokio::test]
    async fn natural_end_advances_to_the_next_track() {
        let mut s = session().await;
        let a = s.resolver.add("a", SHORT);
        let b = s.resolver.add("b", LONG);
        s.enqueue(&a).await;
        s.enqueue(&b).await;

        s.player.play().unwrap();
        s.expect(Event::TrackEnded(id("a"), EndReason::Finished)).await;
        s.expect(Event::Play(id("b"))).await;

        assert_eq!(s.queued(), ["b"]);
        assert_eq!(s.player.active_track().unwrap().id(), &id("b"));
        assert!(!s.player.cache().contains(&id("a")).await);
        assert_eq!(s.player.state(), State::Playing);
        // b was prefetched while a was playing.
        assert_eq!(s.resolver.downloads(), 2);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn stays_playing_between_tracks() {
        let mut s = session().await;
        let a = s.resolver.add("a", SHORT);
        let b = s.resolver.add("b", LONG);
        s.enqueue(&a).await;
        s.enqueue(&b).await;

        s.player.play().unwrap();
        s.expect(Event::TrackEnded(id("a"), EndReason::Finished)).await;
        // The next head is not active yet, but the session is not idle.
        loop {
            assert_eq!(s.player.state(), State::Playing);
            if s.player.active_track().is_some_and(|track| track.id() == &id("b")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn loop_song_replays_without_downloading_again() {
        let mut s = session().await;
        let a = s.resolver.add("a", SHORT);
        s.enqueue(&a).await;
        assert!(!s.player.set_loop_song(true));

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;
        s.expect(Event::TrackEnded(id("a"), EndReason::Finished)).await;
        s.expect(Event::Play(id("a"))).await;

        assert_eq!(s.queued(), ["a"]);
        assert_eq!(s.resolver.downloads(), 1);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn skip_overrides_loop_song() {
        let mut s = session().await;
        let a = s.resolver.add("a", LONG);
        let b = s.resolver.add("b", LONG);
        s.enqueue(&a).await;
        s.enqueue(&b).await;
        s.player.set_loop_song(true);

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;
        s.player.skip().unwrap();
        s.expect(Event::TrackEnded(id("a"), EndReason::Skipped)).await;
        s.expect(Event::Play(id("b"))).await;

        assert_eq!(s.queued(), ["b"]);
        assert!(s.player.loop_song());
        assert!(!s.player.cache().contains(&id("a")).await);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn loop_queue_moves_finished_track_to_the_tail() {
        let mut s = session().await;
        let a = s.resolver.add("a", SHORT);
        let b = s.resolver.add("b", LONG);
        s.enqueue(&a).await;
        s.enqueue(&b).await;
        s.player.set_loop_queue(true);

        s.player.play().unwrap();
        s.expect(Event::Play(id("b"))).await;

        assert_eq!(s.queued(), ["b", "a"]);
        assert!(s.player.cache().contains(&id("a")).await);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn skip_requested_during_download_is_not_lost() {
        let mut s = session().await;
        s.resolver.set_download_delay(Duration::from_millis(300));
        let a = s.resolver.add("a", LONG);
        s.enqueue(&a).await;

        s.player.play().unwrap();
        s.expect(Event::TrackChanged(id("a"))).await;
        s.player.skip().unwrap();

        s.expect(Event::TrackEnded(id("a"), EndReason::Skipped)).await;
        s.expect(Event::Idle).await;
        assert_eq!(s.player.state(), State::Idle);
        assert!(s.queued().is_empty());
    }

    #[tokio::test]
    async fn broken_tracks_are_removed_and_evicted() {
        let mut s = session().await;
        let c = s.resolver.add_corrupt("c");
        let x = s.resolver.add_without_encodings("x");
        let a = s.resolver.add("a", LONG);
        s.enqueue(&c).await;
        s.enqueue(&x).await;
        s.enqueue(&a).await;
        s.player.set_loop_song(true);

        s.player.play().unwrap();
        s.expect(Event::TrackFailed(id("c"), ErrorKind::Decode)).await;
        s.expect(Event::TrackFailed(id("x"), ErrorKind::NoPlayableEncoding))
            .await;
        s.expect(Event::Play(id("a"))).await;

        assert_eq!(s.queued(), ["a"]);
        assert!(!s.player.cache().contains(&id("c")).await);
        assert!(!s.sink.is_disconnected());

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn failing_sink_fails_the_track_and_moves_on() {
        let mut s = session().await;
        let a = s.resolver.add("a", LONG);
        let b = s.resolver.add("b", LONG);
        s.enqueue(&a).await;
        s.enqueue(&b).await;
        s.sink.fail_sends(1);

        s.player.play().unwrap();
        s.expect(Event::TrackFailed(id("a"), ErrorKind::SinkUnavailable))
            .await;
        s.expect(Event::Play(id("b"))).await;

        assert_eq!(s.queued(), ["b"]);
        assert_eq!(s.sink.speaking_history()[..2], [true, false]);
        assert!(!s.player.cache().contains(&id("a")).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(s.sink.is_speaking());
        assert!(!s.sink.frames().is_empty());

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn empty_queue_goes_idle_and_can_restart() {
        let mut s = session().await;
        let a = s.resolver.add("a", SHORT);
        s.enqueue(&a).await;

        s.player.play().unwrap();
        s.expect(Event::Idle).await;
        assert_eq!(s.player.state(), State::Idle);
        assert!(s.player.active_track().is_none());
        assert!(!s.sink.is_speaking());

        s.player.skip().unwrap();
        assert_eq!(
            s.player.play().unwrap_err().kind,
            ErrorKind::FailedPrecondition
        );

        s.enqueue(&a).await;
        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;
        s.expect(Event::Idle).await;
    }

    #[tokio::test]
    async fn play_twice_is_a_noop() {
        let mut s = session().await;
        let a = s.resolver.add("a", LONG);
        s.enqueue(&a).await;

        s.player.play().unwrap();
        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;
        assert_eq!(s.resolver.downloads(), 1);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let mut s = session().await;
        let a = s.resolver.add("a", LONG);
        s.enqueue(&a).await;
        assert_eq!(
            s.player.pause().unwrap_err().kind,
            ErrorKind::FailedPrecondition
        );

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;

        s.player.pause().unwrap();
        s.expect(Event::Pause).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!s.sink.is_speaking());
        let frozen = s.sink.frames().len();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(s.sink.frames().len(), frozen);

        s.player.resume().unwrap();
        s.expect(Event::Resume).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(s.sink.is_speaking());
        assert!(s.sink.frames().len() > frozen);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn replay_keeps_the_track_active() {
        let mut s = session().await;
        let a = s.resolver.add("a", LONG);
        s.enqueue(&a).await;

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        s.player.replay().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let restarts = s
            .sink
            .frames()
            .iter()
            .filter(|frame| frame.timestamp == Duration::ZERO)
            .count();
        assert_eq!(restarts, 2);
        assert_eq!(s.player.active_track().unwrap().id(), &id("a"));

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn removing_the_active_track_keeps_it_streaming() {
        let mut s = session().await;
        let a = s.resolver.add("a", LONG);
        let b = s.resolver.add("b", LONG);
        s.enqueue(&a).await;
        s.enqueue(&b).await;

        let err = s.player.remove_by_id(&id("zzz")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(s.queued(), ["a", "b"]);

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;
        s.player.remove_by_id(&id("a")).await.unwrap();
        assert_eq!(s.queued(), ["b"]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(s.player.active_track().unwrap().id(), &id("a"));
        assert!(s.player.cache().contains(&id("a")).await);

        s.player.skip().unwrap();
        s.expect(Event::Play(id("b"))).await;
        assert!(!s.player.cache().contains(&id("a")).await);
        assert_eq!(s.queued(), ["b"]);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn removing_a_prefetching_track_leaves_no_entry() {
        let mut s = session().await;
        s.resolver.set_download_delay(Duration::from_millis(400));
        let a = s.resolver.add("a", LONG);
        let b = s.resolver.add("b", LONG);
        s.enqueue(&a).await;
        s.enqueue(&b).await;

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;
        s.player.remove_by_id(&id("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(s.queued(), ["a"]);
        assert!(!s.player.cache().contains(&id("b")).await);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn queue_edits_while_playing() {
        let mut s = session().await;
        for name in ["a", "b", "c", "d"] {
            let url = s.resolver.add(name, LONG);
            s.enqueue(&url).await;
        }
        s.enqueue(&crate::testing::url("b")).await;

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;

        assert_eq!(s.player.remove_duplicates(), 1);
        s.player.shuffle();
        assert_eq!(s.queued()[0], "a");

        assert_eq!(s.player.clear().await, 3);
        assert_eq!(s.queued(), ["a"]);
        assert_eq!(s.player.active_track().unwrap().id(), &id("a"));

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn skip_to_drops_entries_in_front() {
        let mut s = session().await;
        for name in ["a", "b", "c"] {
            let url = s.resolver.add(name, LONG);
            s.enqueue(&url).await;
        }

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;
        assert_eq!(
            s.player.skip_to(0).await.unwrap_err().kind,
            ErrorKind::InvalidArgument
        );

        s.player.skip_to(2).await.unwrap();
        s.expect(Event::Play(id("c"))).await;
        assert_eq!(s.queued(), ["c"]);

        s.player.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn playlists_leave_out_unplayable_tracks() {
        let s = session().await;
        s.resolver.add("a", LONG);
        s.resolver.add("b", LONG);
        s.resolver.add_unplayable("u");
        let list = s.resolver.add_playlist("mix", &["a", "u", "b"]);

        let enqueued = s.player.enqueue_url(list.as_str()).await.unwrap();
        match enqueued {
            Enqueued::Playlist {
                added,
                skipped,
                duration,
                ..
            } => {
                assert_eq!(added, 2);
                assert_eq!(skipped, 1);
                assert_eq!(duration, LONG * 2);
            }
            Enqueued::Track(track) => panic!("expected a playlist, got {track}"),
        }
        assert_eq!(s.queued(), ["a", "b"]);

        let err = s
            .player
            .enqueue_url("https://tracks.test/missing.wav")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert_eq!(
            s.player.enqueue_url("not a url").await.unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
    }

    #[tokio::test]
    async fn shuffle_on_an_empty_queue_is_a_noop() {
        let s = session().await;
        s.player.shuffle();
        assert!(s.queued().is_empty());
        assert_eq!(s.player.state(), State::Idle);
    }

    #[tokio::test]
    async fn disconnect_tears_everything_down() {
        let mut s = session().await;
        let a = s.resolver.add("a", LONG);
        let b = s.resolver.add("b", LONG);
        s.enqueue(&a).await;
        s.enqueue(&b).await;

        s.player.play().unwrap();
        s.expect(Event::Play(id("a"))).await;

        s.player.disconnect().await.unwrap();
        s.expect(Event::Disconnected).await;

        assert_eq!(s.player.state(), State::Stopped);
        assert!(s.queued().is_empty());
        assert!(s.player.active_track().is_none());
        assert!(s.sink.is_disconnected());
        assert!(!s.sink.is_speaking());
        assert!(!s.player.cache().contains(&id("a")).await);
        assert!(!s.player.cache().contains(&id("b")).await);

        assert_eq!(
            s.player.play().unwrap_err().kind,
            ErrorKind::FailedPrecondition
        );
        assert_eq!(
            s.player.skip().unwrap_err().kind,
            ErrorKind::FailedPrecondition
        );
        assert!(s.player.disconnect().await.is_err());
    }
}
