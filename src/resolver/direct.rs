//! Resolver for plain audio file URLs and M3U playlists.
//!
//! Any `http` or `https` URL whose path ends in a known audio extension is a
//! track. The container and codec are guessed from that extension, and the
//! file itself is the single encoding candidate. URLs ending in `.m3u` or
//! `.m3u8` are playlists; `#EXTINF` lines supply durations and titles.
//!
//! Track identifiers are the hex MD5 digest of the URL, which keeps them
//! stable across sessions and safe to use as file names.

use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use url::Url;

use super::{ByteStream, Resolver};
use crate::{
    error::{Error, Result},
    http,
    track::{Container, Encoding, Playlist, Track, TrackId, TrackInfo},
};

pub struct DirectResolver {
    client: http::Client,
}

impl DirectResolver {
    const PLAYLIST_EXTENSIONS: [&'static str; 2] = ["m3u", "m3u8"];

    #[must_use]
    pub fn new(client: http::Client) -> Self {
        Self { client }
    }
}

/// Lowercase extension of the last path segment, if any.
fn extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, extension) = segment.rsplit_once('.')?;
    Some(extension.to_ascii_lowercase())
}

/// Human-readable fallback title: the file name without its extension.
fn file_title(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| {
            segment
                .rsplit_once('.')
                .map_or(segment, |(stem, _)| stem)
                .replace("%20", " ")
        })
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| url.to_string())
}

fn digest(url: &Url) -> String {
    Md5::digest(url.as_str().as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::resolution(format!("unsupported scheme {other:?}"))),
    }
}

/// Builds a track for `url` without touching the network.
///
/// Tracks with an unknown extension are returned as unplayable.
fn track_for(url: Url, title: Option<String>, duration: Duration) -> Result<Track> {
    let id: TrackId = digest(&url).parse()?;
    let playable = extension(&url)
        .as_deref()
        .and_then(Container::from_extension)
        .is_some();
    let title = title.unwrap_or_else(|| file_title(&url));

    Ok(Track::new(id, url, title)
        .with_duration(duration)
        .with_playable(playable))
}

/// Parses an M3U or extended M3U document.
///
/// Relative entries are resolved against `base`. Entries that are not valid
/// URLs are skipped with a warning.
fn parse_m3u(base: &Url, body: &str) -> Result<Playlist> {
    let mut title = None;
    let mut tracks = Vec::new();
    let mut pending: Option<(Duration, Option<String>)> = None;

    for line in body.lines().map(str::trim) {
        if line.is_empty() || line == "#EXTM3U" {
            continue;
        }

        if let Some(name) = line.strip_prefix("#PLAYLIST:") {
            title = Some(name.trim().to_owned());
            continue;
        }

        if let Some(info) = line.strip_prefix("#EXTINF:") {
            let (seconds, name) = info.split_once(',').unwrap_or((info, ""));
            // Attributes may follow the duration, separated by spaces.
            let seconds = seconds.split_whitespace().next().unwrap_or_default();
            let duration = seconds
                .parse::<f64>()
                .ok()
                .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
                .unwrap_or_default();
            let name = Some(name.trim().to_owned()).filter(|name| !name.is_empty());
            pending = Some((duration, name));
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let (duration, name) = pending.take().unwrap_or_default();
        match base.join(line) {
            Ok(url) => tracks.push(track_for(url, name, duration)?),
            Err(e) => warn!("skipping playlist entry {line:?}: {e}"),
        }
    }

    Ok(Playlist {
        id: digest(base),
        title: title.unwrap_or_else(|| file_title(base)),
        description: String::new(),
        thumbnail: None,
        tracks,
    })
}

#[async_trait]
impl Resolver for DirectResolver {
    fn is_playlist(&self, url: &Url) -> bool {
        extension(url).is_some_and(|extension| {
            Self::PLAYLIST_EXTENSIONS.contains(&extension.as_str())
        })
    }

    async fn resolve_track(&self, url: &Url) -> Result<Track> {
        check_scheme(url)?;
        let track = track_for(url.clone(), None, Duration::ZERO)?;
        if !track.is_playable() {
            return Err(Error::resolution(format!("{url} is not an audio file")));
        }
        Ok(track)
    }

    async fn resolve_playlist(&self, url: &Url) -> Result<Playlist> {
        check_scheme(url)?;
        let body = self
            .client
            .text(url.clone())
            .await
            .map_err(|e| Error::resolution(e.to_string()))?;
        parse_m3u(url, &body)
    }

    async fn resolve_info(&self, track: &Track) -> Result<TrackInfo> {
        let (container, codec) = extension(track.source())
            .as_deref()
            .and_then(Container::from_extension)
            .ok_or_else(|| {
                Error::resolution(format!("{} is not an audio file", track.source()))
            })?;

        Ok(TrackInfo {
            encodings: vec![Encoding {
                codec,
                container,
                bitrate: 0,
                url: track.source().clone(),
            }],
        })
    }

    async fn download(&self, encoding: &Encoding) -> Result<ByteStream> {
        self.client
            .stream(encoding.url.clone())
            .await
            .map_err(|e| Error::download(e.to_string()))
    }
}
