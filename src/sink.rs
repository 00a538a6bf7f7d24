//! The real-time audio transport that frames are delivered to.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;

use crate::error::Result;

/// One encoded audio packet, ready to be sent as is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub data: Box<[u8]>,

    /// Presentation time relative to the start of the track.
    pub timestamp: Duration,

    /// How long this frame plays. The send loop waits this long before
    /// handing over the next frame.
    pub duration: Duration,
}

/// A connection to a real-time audio transport, such as a voice channel.
///
/// Frames arrive at playback pace, so implementations may send them right
/// away without buffering.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Toggles the "speaking" indicator of the transport.
    async fn speaking(&self, speaking: bool) -> Result<()>;

    /// Delivers one frame.
    ///
    /// # Errors
    ///
    /// `SinkUnavailable` when the transport went away. The current track is
    /// abandoned then.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Releases the transport. Called once when the session is torn down.
    async fn disconnect(&self) -> Result<()>;
}

/// A sink that only keeps time: frames are counted and dropped.
///
/// Useful to drive a session without any audio transport.
#[derive(Debug, Default)]
pub struct Pacer {
    speaking: AtomicBool,
    frames: AtomicU64,
}

impl Pacer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames received so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for Pacer {
    async fn speaking(&self, speaking: bool) -> Result<()> {
        if self.speaking.swap(speaking, Ordering::Relaxed) != speaking {
            debug!("speaking: {speaking}");
        }
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        let count = self.frames.fetch_add(1, Ordering::Relaxed);
        trace!(
            "frame {count}: {} bytes at {:?}",
            frame.data.len(),
            frame.timestamp
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.speaking.store(false, Ordering::Relaxed);
        debug!("sink released after {} frames", self.frames());
        Ok(())
    }
}
