//! Test doubles: a scripted resolver, a recording sink and a WAV generator.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use url::Url;

use crate::{
    error::{Error, Result},
    resolver::{ByteStream, Resolver},
    sink::{Frame, Sink},
    track::{Codec, Container, Encoding, Playlist, Track, TrackInfo},
};

pub const SAMPLE_RATE: u32 = 8_000;

/// A mono 16-bit PCM WAV file of `length`, filled with a quiet square wave.
pub fn wav(length: Duration) -> Vec<u8> {
    let frames = u32::try_from(length.as_millis()).unwrap() * SAMPLE_RATE / 1000;
    let data_len = frames * 2;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes()); // byte rate
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let sample: i16 = if (i / 20) % 2 == 0 { 1_000 } else { -1_000 };
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

pub fn url(name: &str) -> Url {
    Url::parse(&format!("https://tracks.test/{name}.wav")).unwrap()
}

struct Scripted {
    length: Duration,
    playable: bool,
    encodings: bool,
    fail_download: bool,
    corrupt: bool,
}

/// In-memory resolver. Tracks are WAV files generated on download.
#[derive(Default)]
pub struct FakeResolver {
    tracks: Mutex<HashMap<String, Scripted>>,
    playlists: Mutex<HashMap<String, Vec<String>>>,
    download_delay: Mutex<Duration>,
    infos: AtomicUsize,
    downloads: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, name: &str, scripted: Scripted) -> Url {
        self.tracks.lock().unwrap().insert(name.to_owned(), scripted);
        url(name)
    }

    /// Registers a playable track of `length`.
    pub fn add(&self, name: &str, length: Duration) -> Url {
        self.script(
            name,
            Scripted {
                length,
                playable: true,
                encodings: true,
                fail_download: false,
                corrupt: false,
            },
        )
    }

    /// Registers a track that is flagged unplayable.
    pub fn add_unplayable(&self, name: &str) -> Url {
        self.script(
            name,
            Scripted {
                length: Duration::from_secs(1),
                playable: false,
                encodings: true,
                fail_download: false,
                corrupt: false,
            },
        )
    }

    /// Registers a track without any encoding candidates.
    pub fn add_without_encodings(&self, name: &str) -> Url {
        self.script(
            name,
            Scripted {
                length: Duration::from_secs(1),
                playable: true,
                encodings: false,
                fail_download: false,
                corrupt: false,
            },
        )
    }

    /// Registers a track whose download breaks off halfway.
    pub fn add_failing(&self, name: &str) -> Url {
        self.script(
            name,
            Scripted {
                length: Duration::from_secs(1),
                playable: true,
                encodings: true,
                fail_download: true,
                corrupt: false,
            },
        )
    }

    /// Registers a track whose download is not a WAV file.
    pub fn add_corrupt(&self, name: &str) -> Url {
        self.script(
            name,
            Scripted {
                length: Duration::from_secs(1),
                playable: true,
                encodings: true,
                fail_download: false,
                corrupt: true,
            },
        )
    }

    pub fn add_playlist(&self, name: &str, tracks: &[&str]) -> Url {
        self.playlists.lock().unwrap().insert(
            name.to_owned(),
            tracks.iter().map(|track| (*track).to_owned()).collect(),
        );
        Url::parse(&format!("https://tracks.test/lists/{name}")).unwrap()
    }

    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.lock().unwrap() = delay;
    }

    /// Number of `resolve_info` calls so far.
    pub fn infos(&self) -> usize {
        self.infos.load(Ordering::SeqCst)
    }

    /// Number of downloads started so far.
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn name_of(url: &Url) -> Result<String> {
        url.path()
            .strip_prefix('/')
            .and_then(|path| path.strip_suffix(".wav"))
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::resolution(format!("{url} is not a test track")))
    }

    fn track(&self, name: &str) -> Result<Track> {
        let tracks = self.tracks.lock().unwrap();
        let scripted = tracks
            .get(name)
            .ok_or_else(|| Error::resolution(format!("{name} does not exist")))?;
        Ok(Track::new(name.parse()?, url(name), name.to_uppercase())
            .with_duration(scripted.length)
            .with_playable(scripted.playable))
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    fn is_playlist(&self, url: &Url) -> bool {
        url.path().starts_with("/lists/")
    }

    async fn resolve_track(&self, url: &Url) -> Result<Track> {
        self.track(&Self::name_of(url)?)
    }

    async fn resolve_playlist(&self, url: &Url) -> Result<Playlist> {
        let name = url.path().trim_start_matches("/lists/").to_owned();
        let names = self
            .playlists
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::resolution(format!("{name} does not exist")))?;

        let tracks = names
            .iter()
            .map(|name| self.track(name))
            .collect::<Result<Vec<_>>>()?;

        Ok(Playlist {
            id: name.clone(),
            title: name,
            description: String::new(),
            thumbnail: None,
            tracks,
        })
    }

    async fn resolve_info(&self, track: &Track) -> Result<TrackInfo> {
        self.infos.fetch_add(1, Ordering::SeqCst);
        let tracks = self.tracks.lock().unwrap();
        let scripted = tracks
            .get(track.id().as_str())
            .ok_or_else(|| Error::resolution(format!("{track} was removed")))?;

        let encodings = if scripted.encodings {
            vec![
                Encoding {
                    codec: Codec::Opus,
                    container: Container::WebM,
                    bitrate: 160,
                    url: track.source().clone(),
                },
                Encoding {
                    codec: Codec::Pcm,
                    container: Container::Wav,
                    bitrate: 128,
                    url: track.source().clone(),
                },
            ]
        } else {
            Vec::new()
        };
        Ok(TrackInfo { encodings })
    }

    async fn download(&self, encoding: &Encoding) -> Result<ByteStream> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.download_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let name = Self::name_of(&encoding.url)?;
        let (bytes, fail) = {
            let tracks = self.tracks.lock().unwrap();
            let scripted = tracks
                .get(&name)
                .ok_or_else(|| Error::download(format!("{name} is gone")))?;
            let bytes = if scripted.corrupt {
                b"this is not a wav file at all".to_vec()
            } else {
                wav(scripted.length)
            };
            (bytes, scripted.fail_download)
        };

        let half = bytes.len() / 2;
        let first: Result<Bytes> = Ok(Bytes::copy_from_slice(&bytes[..half]));
        let second: Result<Bytes> = if fail {
            Err(Error::download("connection reset"))
        } else {
            Ok(Bytes::copy_from_slice(&bytes[half..]))
        };
        Ok(stream::iter([first, second]).boxed())
    }
}

/// Sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<Frame>>,
    speaking: Mutex<Vec<bool>>,
    disconnected: AtomicBool,
    failing_sends: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` sends fail as if the transport had dropped.
    pub fn fail_sends(&self, count: usize) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Every speaking toggle, in order.
    pub fn speaking_history(&self) -> Vec<bool> {
        self.speaking.lock().unwrap().clone()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.lock().unwrap().last().copied().unwrap_or(false)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn speaking(&self, speaking: bool) -> Result<()> {
        self.speaking.lock().unwrap().push(speaking);
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::sink_unavailable("voice connection dropped"));
        }

        self.frames.lock().unwrap().push(frame);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
