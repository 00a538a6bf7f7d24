use std::{error::Error, path::PathBuf, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

use tuneloop::{
    config::Config,
    events::Event,
    http,
    player::{Enqueued, Player, State},
    resolver::direct::DirectResolver,
    signal,
    sink::Pacer,
    track::{Codec, TrackId},
};

/// Build profile shown in the startup log line.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URLs of tracks or M3U playlists to queue at startup
    ///
    /// Playback starts right away when any of them could be queued.
    #[arg(value_hint = ValueHint::Url)]
    urls: Vec<String>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "TUNELOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Cache directory
    ///
    /// [default: a directory in the system temporary directory]
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath, env = "TUNELOOP_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Codec to stream
    ///
    /// Only encodings in this codec are downloaded: frames are passed through
    /// as they are.
    ///
    /// [default: opus]
    #[arg(long, env = "TUNELOOP_CODEC")]
    codec: Option<Codec>,

    /// Number of frames to demux ahead of the sink
    #[arg(long, value_name = "FRAMES")]
    frame_buffer: Option<usize>,

    /// Don't cache the next track while the current one plays
    #[arg(long, default_value_t = false)]
    no_prefetch: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

const HELP: &str = "\
commands:
  play [URL]        queue URL if given, then start playing
  add URL           queue a track or playlist
  skip              skip the current track
  skipto N          drop the tracks before position N and skip to it
  replay            restart the current track
  pause, resume     freeze or continue playback
  loop song|queue   toggle a loop mode
  remove N          remove the track at position N
  clear             remove everything but the current track
  shuffle           shuffle the queue
  dedupe            remove duplicate tracks
  queue             show the queue
  now               show the current track
  quit              disconnect and exit";

/// Formats a duration as `m:ss`.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Parses a 1-based queue position as shown by the `queue` command.
fn parse_position(arg: &str) -> Option<usize> {
    arg.parse::<usize>().ok()?.checked_sub(1)
}

async fn enqueue(player: &Player, url: &str) -> tuneloop::error::Result<()> {
    match player.enqueue_url(url).await? {
        Enqueued::Track(track) => {
            println!(
                "queued {} [{}]",
                track.title(),
                format_duration(track.duration())
            );
        }
        Enqueued::Playlist {
            title,
            added,
            skipped,
            duration,
        } => {
            print!(
                "queued {added} tracks from {title} [{}]",
                format_duration(duration)
            );
            if skipped > 0 {
                print!(", left out {skipped} unplayable");
            }
            println!();
        }
    }
    Ok(())
}

fn show_queue(player: &Player) {
    let snapshot = player.queue_snapshot();
    if snapshot.entries.is_empty() {
        println!("the queue is empty");
        return;
    }

    for (i, track) in snapshot.entries.iter().enumerate() {
        let marker = if snapshot
            .active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, track))
        {
            '>'
        } else {
            ' '
        };
        println!(
            "{marker} {:>3}. {} [{}]",
            i + 1,
            track.title(),
            format_duration(track.duration())
        );
    }
    println!(
        "{} tracks, {}",
        snapshot.entries.len(),
        format_duration(snapshot.duration)
    );
}

/// Runs one command line. Returns `false` when the user asked to quit.
async fn execute(player: &Arc<Player>, line: &str) -> tuneloop::error::Result<bool> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(true);
    };
    let arg = words.next();

    match (verb, arg) {
        ("play", url) => {
            if let Some(url) = url {
                enqueue(player, url).await?;
            }
            player.play()?;
        }
        ("add", Some(url)) => enqueue(player, url).await?,
        ("skip" | "next", None) => player.skip()?,
        ("skipto", Some(n)) => {
            let position = parse_position(n).ok_or_else(|| {
                tuneloop::error::Error::invalid_argument(format!("{n} is not a position"))
            })?;
            player.skip_to(position).await?;
        }
        ("replay", None) => player.replay()?,
        ("pause", None) => player.pause()?,
        ("resume", None) => player.resume()?,
        ("loop", Some("song")) => {
            let was = player.set_loop_song(!player.loop_song());
            println!("loop song {}", if was { "disabled" } else { "enabled" });
        }
        ("loop", Some("queue")) => {
            let was = player.set_loop_queue(!player.loop_queue());
            println!("loop queue {}", if was { "disabled" } else { "enabled" });
        }
        ("remove", Some(arg)) => {
            let track = if let Some(position) = parse_position(arg) {
                player.remove_at(position).await?
            } else {
                let id: TrackId = arg.parse()?;
                player.remove_by_id(&id).await?
            };
            println!("removed {}", track.title());
        }
        ("clear", None) => println!("removed {} tracks", player.clear().await),
        ("shuffle", None) => player.shuffle(),
        ("dedupe", None) => println!("removed {} duplicates", player.remove_duplicates()),
        ("queue", None) => show_queue(player),
        ("now", None) => match player.active_track() {
            Some(track) => println!(
                "now playing {} [{}]",
                track.title(),
                format_duration(track.duration())
            ),
            None => println!("nothing is playing"),
        },
        ("quit" | "exit" | "disconnect", None) => return Ok(false),
        _ => println!("{HELP}"),
    }

    Ok(true)
}

/// Main application loop.
///
/// Reads commands from standard input until it is closed and playback has
/// gone idle, the user quits, or a shutdown signal arrives.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::default();
    if let Some(path) = &args.config {
        config.load(path)?;
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(codec) = args.codec {
        config.preferred_codec = codec;
    }
    if let Some(frame_buffer) = args.frame_buffer {
        config.frame_buffer = frame_buffer;
    }
    if args.no_prefetch {
        config.prefetch = false;
    }
    config.validate()?;
    debug!("{config:#?}");

    let shutdown = signal::requested();
    tokio::pin!(shutdown);

    let client = http::Client::new(&config)?;
    let resolver = Arc::new(DirectResolver::new(client));
    let player = Player::new(&config, resolver).await?;
    player.join(Arc::new(Pacer::new()))?;

    let (tx, mut events) = mpsc::unbounded_channel();
    player.register(tx);

    for url in &args.urls {
        if let Err(e) = enqueue(&player, url).await {
            error!("{url}: {e}");
        }
    }
    if !player.queue_snapshot().entries.is_empty() {
        player.play()?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interactive = true;

    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            reason = &mut shutdown => {
                info!("received {reason}, shutting down gracefully");
                break;
            }

            Some(event) = events.recv() => {
                info!("{event}");
                if event == Event::Idle && !interactive {
                    break;
                }
            }

            line = lines.next_line(), if interactive => match line? {
                Some(line) => match execute(&player, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        debug!("{line}: {e}");
                        println!("{}", e.kind);
                    }
                },
                None => {
                    debug!("standard input closed");
                    interactive = false;
                    if player.state() == State::Idle {
                        break;
                    }
                }
            },
        }
    }

    player.disconnect().await?;
    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
