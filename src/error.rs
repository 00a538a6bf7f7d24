//! Error handling for tuneloop.
//!
//! Provides a unified error type that pairs a classification ([`ErrorKind`])
//! with the underlying error. The kinds cover the playback domain (resolving,
//! selecting an encoding, downloading, decoding, reaching the sink) as well
//! as a handful of generic categories for everything else.
//!
//! The `Display` of an [`ErrorKind`] is short and human-readable, so that a
//! command front-end can hand it to the user as the reason a command failed.
//!
//! # Example
//!
//! ```rust
//! use tuneloop::error::{Error, ErrorKind, Result};
//!
//! fn lookup(found: bool) -> Result<()> {
//!     if !found {
//!         return Err(Error::not_found("track is not queued"));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// # Returns
    /// * `Some(&E)` - If the underlying error is of type `E`
    /// * `None` - If the underlying error is not of type `E`
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for tuneloop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
///
/// The first five variants are the per-track failures of the playback
/// engine. All of them are contained by the controller: the affected track
/// is skipped and the session keeps running.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Track or playlist cannot be identified or fetched.
    #[error("could not find or fetch that URL")]
    Resolution,

    /// Track was resolved, but none of its encodings is acceptable.
    #[error("no playable audio stream available")]
    NoPlayableEncoding,

    /// Network or disk failure while caching a track.
    #[error("download failed")]
    Download,

    /// Cached file is unreadable or corrupt.
    #[error("audio could not be decoded")]
    Decode,

    /// No audio connection has been established.
    #[error("not connected to an audio channel")]
    SinkUnavailable,

    #[error("not found")]
    NotFound,

    #[error("invalid argument specified")]
    InvalidArgument,

    #[error("invalid state")]
    FailedPrecondition,

    #[error("service unavailable")]
    Unavailable,

    #[error("operation timed out")]
    DeadlineExceeded,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("internal error")]
    Internal,

    #[error("unknown error")]
    Unknown,
}

impl ErrorKind {
    /// Whether this kind describes a failure of one particular track, as
    /// opposed to a failure of the session or of a command.
    #[must_use]
    pub fn is_track_failure(self) -> bool {
        matches!(
            self,
            Self::Resolution | Self::NoPlayableEncoding | Self::Download | Self::Decode
        )
    }
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "track not queued");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for URLs, tracks or playlists that cannot be
    /// resolved, whether because the content was removed or because the
    /// network request failed.
    pub fn resolution<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Resolution, error)
    }

    /// Creates an error for tracks without an acceptable encoding.
    pub fn no_playable_encoding<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NoPlayableEncoding, error)
    }

    /// Creates an error for failed downloads into the cache.
    ///
    /// Use for both the network side (the stream broke off) and the disk
    /// side (the entry could not be written).
    pub fn download<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Download, error)
    }

    /// Creates an error for cache entries that cannot be demuxed.
    pub fn decode<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Decode, error)
    }

    /// Creates an error for commands that need a sink while none is joined,
    /// or for a sink that stopped accepting frames.
    pub fn sink_unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::SinkUnavailable, error)
    }

    /// Creates an error for missing resources.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::not_found("track is not queued");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    /// Creates an error for invalid arguments.
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Creates an error for operations that cannot proceed due to the
    /// current state, such as commands on a disconnected session.
    pub fn failed_precondition<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::FailedPrecondition, error)
    }

    /// Creates an error for services that are temporarily unavailable.
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    /// Creates an error for operations that exceeded their deadline.
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// Creates an error for cancelled operations.
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// Creates an error for unexpected internal errors.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Creates an error that doesn't fit any other category.
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Callers that know the context (writing a cache entry, opening a file for
/// demuxing) should wrap explicitly with [`Error::download`] or
/// [`Error::decode`] instead.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::unavailable(err),
            Interrupted => Self::cancelled(err),
            UnexpectedEof | InvalidData => Self::decode(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput => Self::invalid_argument(err),
            WriteZero => Self::download(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// * Body errors -> `Download`
/// * Decode errors -> `Resolution`
/// * Connect and redirect errors -> `Unavailable`
/// * Status errors -> `Resolution`
/// * Timeout errors -> `DeadlineExceeded`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() {
            return Self::download(err);
        }

        if err.is_decode() || err.is_status() {
            return Self::resolution(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() || err.is_redirect() {
            return Self::unavailable(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unknown(err)
    }
}

/// Converts Symphonia errors into `Decode`, except for resource limits.
impl From<symphonia::core::errors::Error> for Error {
    fn from(e: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error::*;
        match e {
            IoError(e) => Self::decode(e),
            DecodeError(e) => Self::decode(e),
            LimitError(e) => Self::internal(e),
            ResetRequired => Self::decode("reset required"),
            SeekError(e) => Self::decode(format!("seek error: {e:?}")),
            Unsupported(e) => Self::decode(e),
        }
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts configuration file errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts task join errors: a cancelled task is `Cancelled`, a panicked
/// one is `Internal`.
impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}

/// Converts mutex poisoning errors to `Internal`.
impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}
