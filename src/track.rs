//! Tracks, playlists and the audio encodings they can be fetched in.
//!
//! A [`Track`] is created as soon as a URL is submitted or a playlist is
//! expanded, usually with only the cheap metadata: identity, title, duration.
//! The full metadata ([`TrackInfo`], most importantly the encoding candidates)
//! may be attached later by the resolver. Once attached it never changes.
//!
//! Tracks are shared as `Arc<Track>` between the queue, the controller and
//! prefetch tasks.

use std::{
    fmt,
    str::FromStr,
    sync::OnceLock,
    time::Duration,
};

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Opaque, stable identity of a track, such as a video ID.
///
/// The identifier doubles as the stem of the cache entry file name, so it is
/// restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(String);

impl TrackId {
    /// Longest identifier accepted.
    const MAX_LEN: usize = 128;

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TrackId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > Self::MAX_LEN {
            return Err(Error::invalid_argument(format!(
                "track id must be 1 to {} characters long",
                Self::MAX_LEN
            )));
        }

        if !s
            .chars()
            .all(|chr| chr.is_ascii_alphanumeric() || chr == '-' || chr == '_')
        {
            return Err(Error::invalid_argument(format!(
                "track id {s:?} contains invalid characters"
            )));
        }

        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for TrackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Audio codec of an encoding.
///
/// Frames are handed to the sink as they are stored, so the codec of the
/// chosen encoding must be what the sink expects.
#[derive(
    Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Opus,
    Vorbis,
    Aac,
    Mp3,
    Flac,
    Pcm,
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "opus" => Ok(Self::Opus),
            "vorbis" => Ok(Self::Vorbis),
            "aac" | "mp4a" => Ok(Self::Aac),
            "mp3" => Ok(Self::Mp3),
            "flac" => Ok(Self::Flac),
            "pcm" => Ok(Self::Pcm),
            other => Err(Error::invalid_argument(format!("unknown codec {other:?}"))),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Pcm => "pcm",
        };
        write!(f, "{name}")
    }
}

/// File container an encoding is delivered in.
///
/// Determines both the cache entry extension and the demuxer used to read
/// it back.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Container {
    WebM,
    Ogg,
    Mp4,
    Adts,
    Mpeg,
    Flac,
    Wav,
}

impl Container {
    /// All containers, in the order their extensions are probed when looking
    /// for an existing cache entry.
    pub const ALL: [Self; 7] = [
        Self::WebM,
        Self::Ogg,
        Self::Mp4,
        Self::Adts,
        Self::Mpeg,
        Self::Flac,
        Self::Wav,
    ];

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::WebM => "webm",
            Self::Ogg => "ogg",
            Self::Mp4 => "m4a",
            Self::Adts => "aac",
            Self::Mpeg => "mp3",
            Self::Flac => "flac",
            Self::Wav => "wav",
        }
    }

    /// Guesses the container and codec from a file extension.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<(Self, Codec)> {
        let guess = match extension.to_ascii_lowercase().as_str() {
            "webm" | "mka" => (Self::WebM, Codec::Opus),
            "opus" => (Self::Ogg, Codec::Opus),
            "ogg" | "oga" => (Self::Ogg, Codec::Vorbis),
            "m4a" | "mp4" => (Self::Mp4, Codec::Aac),
            "aac" => (Self::Adts, Codec::Aac),
            "mp3" => (Self::Mpeg, Codec::Mp3),
            "flac" => (Self::Flac, Codec::Flac),
            "wav" => (Self::Wav, Codec::Pcm),
            _ => return None,
        };
        Some(guess)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// One downloadable variant of a track.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Encoding {
    pub codec: Codec,
    pub container: Container,
    /// Average bitrate in kbps, or 0 when unknown.
    pub bitrate: u32,
    pub url: Url,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.codec, self.container)?;
        if self.bitrate > 0 {
            write!(f, " {} kbps", self.bitrate)?;
        }
        Ok(())
    }
}

/// Full metadata of a track, as resolved on demand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackInfo {
    /// Encoding candidates, in the order the resolver ranked them.
    pub encodings: Vec<Encoding>,
}

#[derive(Debug)]
pub struct Track {
    id: TrackId,
    source: Url,
    title: String,
    duration: Duration,
    thumbnail: Option<Url>,
    playable: bool,
    info: OnceLock<TrackInfo>,
}

impl Track {
    /// Creates a playable track with unknown duration and no resolved info.
    #[must_use]
    pub fn new(id: TrackId, source: Url, title: impl Into<String>) -> Self {
        Self {
            id,
            source,
            title: title.into(),
            duration: Duration::ZERO,
            thumbnail: None,
            playable: true,
            info: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_thumbnail(mut self, thumbnail: Url) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    #[must_use]
    pub fn with_playable(mut self, playable: bool) -> Self {
        self.playable = playable;
        self
    }

    #[must_use]
    pub fn with_info(self, info: TrackInfo) -> Self {
        // Cannot fail: the cell was created empty in `new`.
        let _ = self.info.set(info);
        self
    }

    #[must_use]
    pub fn id(&self) -> &TrackId {
        &self.id
    }

    /// The URL this track was submitted as or expanded from.
    #[must_use]
    pub fn source(&self) -> &Url {
        &self.source
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Duration as advertised by the resolver. Zero when unknown.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn thumbnail(&self) -> Option<&Url> {
        self.thumbnail.as_ref()
    }

    #[must_use]
    pub fn is_playable(&self) -> bool {
        self.playable
    }

    /// The resolved metadata, if it has been attached yet.
    #[must_use]
    pub fn info(&self) -> Option<&TrackInfo> {
        self.info.get()
    }

    /// Attaches resolved metadata.
    ///
    /// Returns the metadata that is attached after the call. When another
    /// caller won the race, that is theirs and `info` is dropped.
    pub fn set_info(&self, info: TrackInfo) -> &TrackInfo {
        self.info.get_or_init(|| info)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: \"{}\"", self.id, self.title)
    }
}

/// Sum of the advertised durations, saturating at `Duration::MAX`.
///
/// Durations come from remote metadata and can be arbitrarily large.
pub fn total_duration<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Duration {
    tracks
        .into_iter()
        .map(Track::duration)
        .fold(Duration::ZERO, Duration::saturating_add)
}

/// A list of tracks as returned by the resolver.
///
/// Playlists have no lifecycle of their own: their tracks are moved into the
/// queue right away.
#[derive(Debug)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<Url>,
    pub tracks: Vec<Track>,
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: \"{}\"", self.id, self.title)
    }
}
