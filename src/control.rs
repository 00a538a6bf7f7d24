//! Out-of-band signals for the send loop.
//!
//! Skip and replay requests are kept as pending flags rather than messages,
//! so a request made while no track is streaming (for example while the next
//! track is still downloading) is applied when the next send loop starts.
//! Each flag holds at most one request: skipping twice before the loop gets
//! to it skips once.

use std::sync::{Mutex, PoisonError};

use tokio::sync::{futures::Notified, Notify};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Pending {
    skip: bool,
    replay: bool,
    paused: bool,
}

/// What the send loop should do before its next frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    Stop,
    Skip,
    Replay,
}

#[derive(Debug)]
pub struct Control {
    pending: Mutex<Pending>,
    changed: Notify,
    stop: CancellationToken,
}

impl Control {
    #[must_use]
    pub fn new(stop: CancellationToken) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            changed: Notify::new(),
            stop,
        }
    }

    fn update(&self, f: impl FnOnce(&mut Pending)) {
        f(&mut self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        // Stores a permit when nobody is waiting, so a change made between
        // `take` and `notified` still wakes the loop.
        self.changed.notify_one();
    }

    pub fn skip(&self) {
        self.update(|pending| pending.skip = true);
    }

    pub fn replay(&self) {
        self.update(|pending| pending.replay = true);
    }

    /// Sets the paused flag and returns its previous value.
    pub fn set_paused(&self, paused: bool) -> bool {
        let mut previous = false;
        self.update(|pending| previous = std::mem::replace(&mut pending.paused, paused));
        previous
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .paused
    }

    /// Forces every current and future send loop to exit.
    pub fn stop(&self) {
        self.stop.cancel();
        self.changed.notify_one();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Drops pending skip and replay requests and unpauses.
    pub fn reset(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = Pending::default();
    }

    /// Consumes the most important pending signal.
    ///
    /// Stop wins over skip, and skip wins over replay: a replay pending
    /// together with a skip is dropped, since the track it would restart is
    /// being abandoned.
    pub fn take(&self) -> Option<Signal> {
        if self.stop.is_cancelled() {
            return Some(Signal::Stop);
        }

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if std::mem::take(&mut pending.skip) {
            pending.replay = false;
            return Some(Signal::Skip);
        }
        if std::mem::take(&mut pending.replay) {
            return Some(Signal::Replay);
        }
        None
    }

    /// Completes after the next change to any signal.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Completes when the session is stopped.
    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }
}
