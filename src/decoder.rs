//! Demuxer for cached audio files using Symphonia.
//!
//! Tracks are passed to the sink in the codec they were downloaded in, so no
//! audio is decoded here. The decoder only splits the container into its
//! encoded packets and timestamps them.
//!
//! # Format Support
//!
//! * WebM/Matroska: typically Opus
//! * Ogg: Opus or Vorbis
//! * MP4: typically AAC
//! * ADTS: AAC
//! * MP3, FLAC and WAV
//!
//! # Timing
//!
//! Timestamps and durations come from the container's time base. When the
//! container has none, the sample rate is used instead, and when that is
//! unknown too every packet is assumed to last 20 ms.

use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use symphonia::{
    core::{
        errors::Error as SymphoniaError,
        formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
        io::{MediaSourceStream, MediaSourceStreamOptions},
        meta::MetadataOptions,
        probe::{Hint, Probe},
        units::TimeBase,
    },
    default::formats::{
        AdtsReader, FlacReader, IsoMp4Reader, MkvReader, MpaReader, OggReader, WavReader,
    },
};

use crate::{
    error::{Error, Result},
    sink::Frame,
    track::Container,
};

/// Maximum number of consecutive corrupted packets to skip before giving up.
const MAX_RETRIES: usize = 3;

/// Duration assumed for packets when the container carries no timing.
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Sequential reader of the encoded frames in a cached file.
///
/// The sequence is finite and can be restarted with [`rewind`](Self::rewind).
pub struct Decoder {
    /// Format reader (demuxer) for extracting encoded audio packets
    demuxer: Box<dyn FormatReader>,

    /// Track within the container that is being read
    track_id: u32,

    /// Time base of the track, if the container or codec provides one
    time_base: Option<TimeBase>,

    /// Number of packets read since the start, for containers without timing
    position: u32,

    path: PathBuf,
    container: Container,
}

impl Decoder {
    /// Opens the cached file at `path`, stored in `container`.
    ///
    /// Only the demuxer for `container` is registered, so a file that does
    /// not match its extension is rejected instead of guessed at.
    ///
    /// # Errors
    ///
    /// `Decode` when the file cannot be opened or contains no audio track.
    pub fn open(path: &Path, container: Container) -> Result<Self> {
        let file = File::open(path).map_err(Error::decode)?;
        let stream = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut probe = Probe::default();
        match container {
            Container::WebM => probe.register_all::<MkvReader>(),
            Container::Ogg => probe.register_all::<OggReader>(),
            Container::Mp4 => probe.register_all::<IsoMp4Reader>(),
            Container::Adts => probe.register_all::<AdtsReader>(),
            Container::Mpeg => probe.register_all::<MpaReader>(),
            Container::Flac => probe.register_all::<FlacReader>(),
            Container::Wav => probe.register_all::<WavReader>(),
        }

        let mut hint = Hint::new();
        hint.with_extension(container.extension());

        let demuxer = probe
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )?
            .format;
        let default_track = demuxer
            .default_track()
            .ok_or_else(|| Error::decode("no audio track found"))?;

        let track_id = default_track.id;
        let codec_params = &default_track.codec_params;
        let time_base = codec_params
            .time_base
            .or_else(|| codec_params.sample_rate.map(|rate| TimeBase::new(1, rate)));

        debug!(
            "opened {} ({container}, codec {:?}, time base {time_base:?})",
            path.display(),
            codec_params.codec,
        );

        Ok(Self {
            demuxer,
            track_id,
            time_base,
            position: 0,
            path: path.to_path_buf(),
            container,
        })
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` at the end of the stream.
    ///
    /// # Errors
    ///
    /// `Decode` when the file is unreadable or too many consecutive packets
    /// are malformed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut skipped = 0;
        loop {
            match self.demuxer.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != self.track_id {
                        continue;
                    }

                    let (timestamp, duration) = match self.time_base {
                        Some(time_base) => (
                            time_base.calc_time(packet.ts()).into(),
                            time_base.calc_time(packet.dur()).into(),
                        ),
                        None => (
                            DEFAULT_FRAME_DURATION * self.position,
                            DEFAULT_FRAME_DURATION,
                        ),
                    };
                    self.position = self.position.saturating_add(1);

                    let duration = if duration == Duration::ZERO {
                        DEFAULT_FRAME_DURATION
                    } else {
                        duration
                    };

                    return Ok(Some(Frame {
                        data: packet.data,
                        timestamp,
                        duration,
                    }));
                }

                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    // Not an error, just the end of the stream.
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    // A new chained stream starts here; treat as the end.
                    return Ok(None);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    skipped += 1;
                    if skipped > MAX_RETRIES {
                        return Err(Error::decode(format!(
                            "skipped too many malformed packets: {e}"
                        )));
                    }
                    warn!("skipping malformed packet: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Restarts the sequence from the first frame.
    ///
    /// Seeks when the container supports it and reopens the file otherwise.
    ///
    /// # Errors
    ///
    /// `Decode` when the file can no longer be opened.
    pub fn rewind(&mut self) -> Result<()> {
        let seek = self.demuxer.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                // `track_id: None` implies the default track
                track_id: None,
                time: Duration::ZERO.into(),
            },
        );

        match seek {
            Ok(_) => {
                self.position = 0;
                Ok(())
            }
            Err(e) => {
                debug!("seeking failed, reopening {}: {e}", self.path.display());
                *self = Self::open(&self.path, self.container)?;
                Ok(())
            }
        }
    }
}
