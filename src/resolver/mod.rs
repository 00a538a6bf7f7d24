//! Metadata resolution.
//!
//! A [`Resolver`] turns user-submitted URLs into [`Track`]s and
//! [`Playlist`]s, fills in the encoding candidates of a track on demand and
//! downloads the bytes of a chosen encoding. Everything that depends on the
//! shape of an external page or API response stays behind this trait.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use url::Url;

use crate::{
    error::Result,
    track::{Encoding, Playlist, Track, TrackInfo},
};

pub mod direct;

/// Body of a download, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Whether `url` names a playlist rather than a single track.
    fn is_playlist(&self, url: &Url) -> bool;

    /// Resolves a single track.
    ///
    /// # Errors
    ///
    /// `Resolution` when the track does not exist or cannot be fetched.
    async fn resolve_track(&self, url: &Url) -> Result<Track>;

    /// Resolves a playlist with its tracks.
    ///
    /// # Errors
    ///
    /// `Resolution` when the playlist does not exist or cannot be fetched.
    async fn resolve_playlist(&self, url: &Url) -> Result<Playlist>;

    /// Fetches the full metadata of `track`, including its encodings.
    ///
    /// # Errors
    ///
    /// `Resolution` when the track can no longer be fetched.
    async fn resolve_info(&self, track: &Track) -> Result<TrackInfo>;

    /// Starts downloading `encoding`.
    ///
    /// # Errors
    ///
    /// `Download` when the transfer cannot be started.
    async fn download(&self, encoding: &Encoding) -> Result<ByteStream>;
}
