//! Events emitted by a playback session.
//!
//! Front-ends register a channel with [`Player::register`] to announce what
//! is playing, or to report tracks that could not be played.
//!
//! [`Player::register`]: crate::player::Player::register
//!
//! # Example
//!
//! ```rust
//! use tuneloop::events::Event;
//!
//! fn describe(event: &Event) -> String {
//!     match event {
//!         Event::Play(id) => format!("now playing {id}"),
//!         Event::TrackFailed(id, reason) => format!("skipped {id}: {reason}"),
//!         _ => event.to_string(),
//!     }
//! }
//! ```

use std::fmt;

use crate::{error::ErrorKind, track::TrackId};

/// Why a track stopped playing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// All of it was played.
    Finished,
    /// Playback was skipped.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// The head of the queue became the active track and is being prepared.
    TrackChanged(TrackId),

    /// The active track started streaming.
    Play(TrackId),

    /// Playback has paused.
    Pause,

    /// Playback has resumed after a pause.
    Resume,

    /// The active track stopped streaming.
    TrackEnded(TrackId, EndReason),

    /// The active track could not be played and was removed.
    TrackFailed(TrackId, ErrorKind),

    /// The queue ran empty.
    Idle,

    /// The session was torn down.
    Disconnected,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrackChanged(id) => write!(f, "track changed to {id}"),
            Self::Play(id) => write!(f, "playing {id}"),
            Self::Pause => write!(f, "paused"),
            Self::Resume => write!(f, "resumed"),
            Self::TrackEnded(id, EndReason::Finished) => write!(f, "{id} finished"),
            Self::TrackEnded(id, EndReason::Skipped) => write!(f, "{id} skipped"),
            Self::TrackFailed(id, kind) => write!(f, "{id} failed: {kind}"),
            Self::Idle => write!(f, "idle"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}
