//! Encoding selection.
//!
//! Frames are passed through to the sink without transcoding, so only
//! encodings in the codec the sink expects are eligible. Among those the
//! highest bitrate wins.

use crate::track::{Codec, Encoding};

/// Picks the best encoding in the `preferred` codec.
///
/// Returns `None` when no candidate is in the preferred codec; the track
/// cannot be played then. On equal bitrates the candidate listed first
/// wins, so the result only depends on the candidate list.
#[must_use]
pub fn select(candidates: &[Encoding], preferred: Codec) -> Option<&Encoding> {
    let mut best: Option<&Encoding> = None;
    for candidate in candidates.iter().filter(|e| e.codec == preferred) {
        if best.is_none_or(|best| candidate.bitrate > best.bitrate) {
            best = Some(candidate);
        }
    }

    if let Some(encoding) = best {
        trace!("selected {encoding} out of {} candidates", candidates.len());
    }

    best
}
