//! LyricSync - Word-synced lyrics in the terminal
//! Streams a track and follows it with syllable-level lyric highlighting

mod api;
mod audio;
mod cache;
mod clock;
mod display;
mod lyrics;
mod render;
mod session;
mod settings;
mod utils;

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, AuthProvider, normalize_track_id};
use crate::audio::spawn_audio_thread;
use crate::cache::{CacheStore, JsonFileStore, MemoryStore, StreamCache};
use crate::clock::{PlaybackSource, SilentSource};
use crate::display::DisplayOptions;
use crate::lyrics::{LyricDocument, evaluate};
use crate::render::LoopConfig;
use crate::session::TrackSession;
use crate::settings::Settings;
use crate::utils::{SystemClock, WallClock, format_duration, format_seconds};

const HELP: &str = "\
lyricsync - word-synced lyrics in the terminal

USAGE:
  lyricsync [OPTIONS] play <TRACK>     Play a track id, spotify:track: URI or link
  lyricsync [OPTIONS] search <QUERY>   Search the catalog
  lyricsync cache [clear]              Show or clear cached stream URLs
  lyricsync [OPTIONS] config [save]    Show or save the settings
  lyricsync eval <FILE> <SECS>         Evaluate a local lyric payload at a time

OPTIONS:
  --no-audio          Keep time without sound output
  --fps <N>           Render loop frame rate
  --base-url <URL>    Lyrics/stream service base URL
  --diagnostics       Print timing diagnostics under each line
  -h, --help          Print this help

CONTROLS (while playing):
  p           Play / pause
  + / -       Seek 5 seconds forward / back
  s <SECS>    Seek to position
  v <0-1>     Set volume
  q           Quit
";

/// Seek step for the `+`/`-` controls
const SEEK_STEP: f64 = 5.0;

/// How long to wait for the audio thread on exit
const AUDIO_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Play(String),
    Search(String),
    Cache { clear: bool },
    Config { save: bool },
    Eval { path: PathBuf, at: f64 },
    Help,
}

#[derive(Debug, Clone, PartialEq)]
struct Args {
    command: Command,
    no_audio: bool,
    fps: Option<u32>,
    base_url: Option<String>,
    diagnostics: bool,
}

impl Args {
    /// Apply command line overrides on top of the saved settings
    fn apply(&self, settings: &mut Settings) {
        if self.no_audio {
            settings.playback.audio_output = false;
        }
        if let Some(fps) = self.fps {
            settings.render.frame_rate = fps;
        }
        if let Some(base_url) = &self.base_url {
            settings.api.base_url = base_url.clone();
        }
        if self.diagnostics {
            settings.display.show_diagnostics = true;
        }
    }
}

fn parse_args(raw: Vec<OsString>) -> Result<Args> {
    let mut args = pico_args::Arguments::from_vec(raw);
    if args.contains(["-h", "--help"]) {
        return Ok(Args {
            command: Command::Help,
            no_audio: false,
            fps: None,
            base_url: None,
            diagnostics: false,
        });
    }

    let no_audio = args.contains("--no-audio");
    let diagnostics = args.contains("--diagnostics");
    let fps: Option<u32> = args.opt_value_from_str("--fps")?;
    let base_url: Option<String> = args.opt_value_from_str("--base-url")?;
    let subcommand = args.subcommand()?;
    let rest: Vec<String> = args
        .finish()
        .into_iter()
        .filter_map(|s| s.into_string().ok())
        .collect();

    let command = match subcommand.as_deref() {
        Some("play") => Command::Play(
            rest.into_iter()
                .next()
                .ok_or_else(|| anyhow!("play needs a track id"))?,
        ),
        Some("search") => {
            let query = rest.join(" ");
            if query.trim().is_empty() {
                bail!("search needs a query");
            }
            Command::Search(query)
        }
        Some("cache") => Command::Cache {
            clear: rest.first().is_some_and(|s| s == "clear"),
        },
        Some("config") => Command::Config {
            save: rest.first().is_some_and(|s| s == "save"),
        },
        Some("eval") => match rest.as_slice() {
            [path, at] => Command::Eval {
                path: PathBuf::from(path),
                at: at.parse().with_context(|| format!("Not a time in seconds: {}", at))?,
            },
            _ => bail!("eval needs a lyric file and a time"),
        },
        None => Command::Help,
        Some(other) => bail!("Unknown command: {}", other),
    };

    Ok(Args {
        command,
        no_audio,
        fps,
        base_url,
        diagnostics,
    })
}

/// Playback control typed on stdin
#[derive(Debug, Clone, Copy, PartialEq)]
enum Control {
    Toggle,
    SeekBy(f64),
    SeekTo(f64),
    Volume(f32),
    Quit,
}

fn parse_control(line: &str) -> Option<Control> {
    let mut parts = line.split_whitespace();
    let control = match parts.next()? {
        "p" => Control::Toggle,
        "+" => Control::SeekBy(SEEK_STEP),
        "-" => Control::SeekBy(-SEEK_STEP),
        "s" => Control::SeekTo(parts.next()?.parse().ok()?),
        "v" => Control::Volume(parts.next()?.parse().ok()?),
        "q" => Control::Quit,
        _ => return None,
    };
    Some(control)
}

fn build_http_client(settings: &Settings, request_timeout: bool) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .cookie_store(true)
        .gzip(true)
        .connect_timeout(Duration::from_secs(10));
    // Audio downloads outlive any sensible per-request timeout
    if request_timeout {
        builder = builder.timeout(Duration::from_secs(settings.api.request_timeout_secs));
    }
    if let Some(proxy) = settings.network.proxy_url() {
        info!("Using {} proxy {}", settings.network.proxy_type, proxy);
        builder = builder
            .proxy(reqwest::Proxy::all(&proxy).with_context(|| format!("Invalid proxy URL {}", proxy))?);
    }
    builder.build().context("Failed to build HTTP client")
}

fn open_stream_store(settings: &Settings) -> Arc<dyn CacheStore> {
    let max_entries = settings.cache.max_entries;
    if settings.cache.persist {
        if let Some(path) = JsonFileStore::default_path() {
            return Arc::new(JsonFileStore::open_or_empty(
                &path,
                max_entries,
                SystemClock.now_millis(),
            ));
        }
        warn!("No cache directory available, stream URLs will not be persisted");
    }
    Arc::new(MemoryStore::new(max_entries))
}

struct Services {
    api: Arc<ApiClient>,
    streams: Arc<StreamCache<ApiClient>>,
}

impl Services {
    fn new(settings: &Settings) -> Result<Self> {
        let http = build_http_client(settings, true)?;
        let auth = Arc::new(AuthProvider::new(
            http.clone(),
            settings.api.session_url.clone(),
            Arc::new(SystemClock),
        ));
        let api = Arc::new(ApiClient::new(http, &settings.api.base_url, auth));
        let streams = Arc::new(
            StreamCache::new(api.clone(), open_stream_store(settings))
                .with_ttl(settings.cache.stream_ttl()),
        );
        Ok(Self { api, streams })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = match parse_args(std::env::args_os().skip(1).collect()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, HELP);
            std::process::exit(2);
        }
    };
    let mut settings = Settings::load();
    args.apply(&mut settings);

    match args.command {
        Command::Help => {
            print!("{}", HELP);
            Ok(())
        }
        Command::Config { save } => {
            if save {
                settings.save()?;
            }
            match Settings::file_path() {
                Some(path) => println!("# {}", path.display()),
                None => println!("# no config directory"),
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Cache { clear } => {
            let services = Services::new(&settings)?;
            let count = services.streams.len();
            if clear {
                services.streams.clear();
                println!("Cleared {} cached stream URLs", count);
            } else {
                println!("{} cached stream URLs", count);
            }
            Ok(())
        }
        Command::Search(query) => {
            let services = Services::new(&settings)?;
            let tracks = services.api.search(&query).await?;
            if tracks.is_empty() {
                println!("No results for \"{}\"", query);
            }
            for track in tracks {
                println!(
                    "{}  {} - {} ({})",
                    track.id,
                    track.name,
                    track.artist_names(),
                    format_duration(track.duration_secs())
                );
            }
            Ok(())
        }
        Command::Eval { path, at } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let document = LyricDocument::parse_str(&raw)?;
            let result = evaluate(&document, at);
            if result.is_cleared() {
                println!("(nothing sung at {})", format_seconds(Some(at)));
            } else {
                println!("lead:       {}", result.lead_text);
                println!("background: {}", result.background_text);
            }
            println!("time next verse: {}", format_seconds(result.next_verse_in));
            println!("time next word: {}", format_seconds(result.next_word_in));
            Ok(())
        }
        Command::Play(input) => {
            let track_id =
                normalize_track_id(&input).ok_or_else(|| anyhow!("Not a track id: {}", input))?;
            play(&settings, &track_id).await
        }
    }
}

async fn play(settings: &Settings, track_id: &str) -> Result<()> {
    let services = Services::new(settings)?;

    if settings.playback.audio_output {
        let http = build_http_client(settings, false)?;
        match spawn_audio_thread(
            settings.playback.output_device.as_deref(),
            http,
            settings.playback.load_timeout(),
        ) {
            Ok(audio) => {
                let result = run_session(services, audio.handle.clone(), settings, track_id).await;
                if let Err(e) = audio.join(AUDIO_SHUTDOWN_TIMEOUT) {
                    warn!("{}", e);
                }
                return result;
            }
            Err(e) => warn!("Audio output unavailable ({}), keeping time silently", e),
        }
    }

    run_session(services, SilentSource::default(), settings, track_id).await
}

async fn run_session<S: PlaybackSource>(
    services: Services,
    source: S,
    settings: &Settings,
    track_id: &str,
) -> Result<()> {
    let loop_config = LoopConfig::new(
        settings.render.frame_rate,
        Duration::from_millis(settings.render.lag_threshold_ms),
    );
    let mut session = TrackSession::new(services.api, services.streams, source, loop_config);
    session.set_volume(settings.playback.volume);

    // An unplayable track keeps the session up in its unavailable state
    let load_error = session.load(track_id).await.err();
    if let Some(e) = &load_error {
        println!("Track {} is not playable: {} (q to quit)", track_id, e);
    }

    if let Some(track) = session.track() {
        println!(
            "{} - {} ({})",
            track.name,
            track.artist_names(),
            format_duration(track.duration_secs())
        );
        if let Some(cover) = track.cover_url() {
            debug!("Cover art: {}", cover);
        }
    }
    if !session.has_lyrics() {
        println!("No lyrics available");
    }

    let lead_width = session.document().map_or(0, |doc| doc.widest_line_len());
    let display = tokio::spawn(display::run(
        session.subscribe(),
        session.subscribe_status(),
        DisplayOptions::new(&settings.display, lead_width),
    ));

    if settings.playback.autoplay && load_error.is_none() {
        if let Err(e) = session.play().await {
            error!("{}", e);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut end_check = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_control(&line) {
                    Some(Control::Quit) => break,
                    Some(Control::Toggle) => {
                        if let Err(e) = session.toggle_play().await {
                            error!("{}", e);
                        }
                    }
                    Some(Control::SeekBy(delta)) => session.seek_by(delta),
                    Some(Control::SeekTo(secs)) => session.seek(secs),
                    Some(Control::Volume(volume)) => session.set_volume(volume),
                    None => {
                        if !line.trim().is_empty() {
                            println!("Unknown control: {}", line.trim());
                        }
                    }
                },
                Ok(None) => {
                    stdin_open = false;
                    if load_error.is_some() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read controls: {}", e);
                    stdin_open = false;
                }
            },
            _ = end_check.tick() => {
                if session.is_finished() {
                    info!("Playback finished");
                    break;
                }
            }
        }
    }

    session.close().await;
    display.abort();
    match load_error {
        Some(e) => Err(anyhow!("Track {} is not playable: {}", track_id, e)),
        None => Ok(()),
    }
}
