//! The send loop: streams one cached track to the sink at playback pace.
//!
//! Demuxing is blocking file I/O, so it runs on a blocking thread that feeds
//! frames into a bounded channel. The send loop owns the pacing: each frame
//! is handed to the sink when the previous one has finished playing.
//!
//! Between frames the loop reacts to [`Control`] signals. A replay bumps the
//! epoch and asks the producer to rewind; frames from an older epoch that
//! are still in the channel are dropped.

use std::{
    path::{Path, PathBuf},
    sync::mpsc as std_mpsc,
};

use tokio::{sync::mpsc, time::Instant};

use crate::{
    control::{Control, Signal},
    decoder::Decoder,
    error::{Error, Result},
    sink::{Frame, Sink},
    track::Container,
};

/// How a stream ended without error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// All frames were delivered.
    Finished,
    /// A skip was requested.
    Skipped,
    /// The session is shutting down.
    Stopped,
}

enum Produced {
    Frame(u64, Frame),
    End(u64),
    Failed(Error),
}

enum Command {
    Rewind(u64),
}

/// Demuxes `decoder` into `frames` until the consumer goes away.
///
/// At the end of the stream the producer parks until it is told to rewind,
/// so a replay of a finished track does not have to reopen the file.
fn produce(
    mut decoder: Decoder,
    frames: &mpsc::Sender<Produced>,
    commands: &std_mpsc::Receiver<Command>,
) {
    let mut epoch = 0;

    let rewind = |decoder: &mut Decoder, epoch: &mut u64, to: u64| -> bool {
        *epoch = to;
        match decoder.rewind() {
            Ok(()) => true,
            Err(e) => {
                let _ = frames.blocking_send(Produced::Failed(e));
                false
            }
        }
    };

    loop {
        while let Ok(Command::Rewind(to)) = commands.try_recv() {
            if !rewind(&mut decoder, &mut epoch, to) {
                return;
            }
        }

        match decoder.next_frame() {
            Ok(Some(frame)) => {
                if frames.blocking_send(Produced::Frame(epoch, frame)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                if frames.blocking_send(Produced::End(epoch)).is_err() {
                    return;
                }
                match commands.recv() {
                    Ok(Command::Rewind(to)) => {
                        if !rewind(&mut decoder, &mut epoch, to) {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
            Err(e) => {
                let _ = frames.blocking_send(Produced::Failed(e));
                return;
            }
        }
    }
}

/// Toggles the speaking indicator when it differs from the current state.
/// Failures are logged only.
async fn set_speaking(sink: &dyn Sink, current: &mut bool, speaking: bool) {
    if *current == speaking {
        return;
    }
    *current = speaking;
    if let Err(e) = sink.speaking(speaking).await {
        warn!("failed to set speaking to {speaking}: {e}");
    }
}

/// Streams the cached file at `path` to `sink`.
///
/// `buffer` is the number of frames demuxed ahead of the sink.
///
/// The sink's speaking indicator is on while the loop runs and turned off on
/// every exit, including errors.
///
/// # Errors
///
/// `Decode` when the file cannot be demuxed, or the sink's error when a frame
/// cannot be delivered.
pub async fn stream(
    path: &Path,
    container: Container,
    sink: &dyn Sink,
    control: &Control,
    buffer: usize,
) -> Result<Outcome> {
    let path: PathBuf = path.to_path_buf();
    let decoder = tokio::task::spawn_blocking(move || Decoder::open(&path, container)).await??;

    let (frames_tx, mut frames) = mpsc::channel(buffer.max(1));
    let (commands, commands_rx) = std_mpsc::channel();
    tokio::task::spawn_blocking(move || produce(decoder, &frames_tx, &commands_rx));

    let mut speaking = false;
    set_speaking(sink, &mut speaking, true).await;

    let result = send_loop(sink, control, &mut frames, &commands, &mut speaking).await;

    set_speaking(sink, &mut speaking, false).await;
    result
}

async fn send_loop(
    sink: &dyn Sink,
    control: &Control,
    frames: &mut mpsc::Receiver<Produced>,
    commands: &std_mpsc::Sender<Command>,
    speaking: &mut bool,
) -> Result<Outcome> {
    let mut epoch = 0;
    let mut pending: Option<Frame> = None;
    let mut ended = false;
    let mut deadline = Instant::now();
    let mut sent: u64 = 0;

    loop {
        match control.take() {
            Some(Signal::Stop) => return Ok(Outcome::Stopped),
            Some(Signal::Skip) => {
                debug!("skipped after {sent} frames");
                return Ok(Outcome::Skipped);
            }
            Some(Signal::Replay) => {
                debug!("replaying after {sent} frames");
                epoch += 1;
                // A send error means the producer has failed and its error
                // is waiting in the channel.
                let _ = commands.send(Command::Rewind(epoch));
                pending = None;
                ended = false;
                deadline = Instant::now();
            }
            None => {}
        }

        if control.is_paused() {
            set_speaking(sink, speaking, false).await;
            tokio::select! {
                () = control.changed() => {}
                () = control.stopped() => {}
            }
            if !control.is_paused() {
                set_speaking(sink, speaking, true).await;
                deadline = Instant::now();
            }
            continue;
        }

        match pending.take() {
            Some(frame) => {
                tokio::select! {
                    () = control.changed() => pending = Some(frame),
                    () = control.stopped() => pending = Some(frame),
                    () = tokio::time::sleep_until(deadline) => {
                        trace!("sending frame at {:?}", frame.timestamp);
                        let duration = frame.duration;
                        sink.send(frame).await?;
                        sent += 1;
                        deadline = (deadline + duration).max(Instant::now());
                    }
                }
            }
            None if ended => {
                // Let the last frame play out before reporting the end.
                tokio::select! {
                    () = control.changed() => {}
                    () = control.stopped() => {}
                    () = tokio::time::sleep_until(deadline) => {
                        debug!("finished after {sent} frames");
                        return Ok(Outcome::Finished);
                    }
                }
            }
            None => {
                tokio::select! {
                    () = control.changed() => {}
                    () = control.stopped() => {}
                    produced = frames.recv() => match produced {
                        Some(Produced::Frame(from, frame)) => {
                            if from == epoch {
                                pending = Some(frame);
                            }
                        }
                        Some(Produced::End(from)) => {
                            if from == epoch {
                                ended = true;
                            }
                        }
                        Some(Produced::Failed(e)) => return Err(e),
                        None => return Err(Error::internal("demuxer exited unexpectedly")),
                    },
                }
            }
        }
    }
}
