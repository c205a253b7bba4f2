use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pianola::core::Song;
use pianola::hardware::{list_ports, open_sink, select_port};
use pianola::index::{store, TimestampIndex};
use pianola::input::load_file;
use pianola::playback::{clamp_speed, PlaybackController, PlaybackEvent, PlaybackState};
use pianola::{Playlist, Settings};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Plays recorded performances on a player instrument
#[derive(Parser, Debug)]
#[command(name = "pianola")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List output ports
    Ports {
        /// Include the virtual "null" port
        #[arg(long = "virtual")]
        include_virtual: bool,
    },
    /// Show song metadata and index statistics
    Info { file: PathBuf },
    /// Build and store the timestamp index for a song
    Index {
        file: PathBuf,
        /// Bucket width in seconds
        #[arg(long)]
        bucket: Option<f64>,
    },
    /// List the songs in a directory
    Playlist {
        #[arg(env = "PIANOLA_SONGS")]
        dir: Option<PathBuf>,
    },
    /// Play a song
    Play(PlayArgs),
    /// Show or change the stored settings
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Output port used when none is named
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    #[arg(long)]
    speed: Option<f64>,

    /// Directory listed by `playlist`
    #[arg(long)]
    songs_dir: Option<PathBuf>,

    /// Offer the virtual "null" port
    #[arg(long = "virtual")]
    include_virtual: Option<bool>,
}

#[derive(Args, Debug)]
struct PlayArgs {
    file: PathBuf,

    /// Output port name
    #[arg(short, long, env = "PIANOLA_PORT")]
    port: Option<String>,

    /// Serial baud rate
    #[arg(short, long, env = "PIANOLA_BAUD")]
    baud: Option<u32>,

    #[arg(short, long)]
    speed: Option<f64>,

    /// Start position as a fraction of the song (0.0 - 1.0)
    #[arg(long, default_value_t = 0.0)]
    from: f64,

    /// Play at this tempo instead of the recorded one
    #[arg(long)]
    bpm: Option<u32>,

    /// Allow the virtual "null" port
    #[arg(long = "virtual")]
    include_virtual: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pianola=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load();

    match cli.command {
        Command::Ports { include_virtual } => ports(include_virtual || settings.virtual_port),
        Command::Info { file } => song_info(&file, &settings),
        Command::Index { file, bucket } => build_index(&file, bucket.unwrap_or(settings.bucket_size)),
        Command::Playlist { dir } => playlist(dir.or(settings.songs_dir.clone())),
        Command::Play(args) => play(args, &settings).await,
        Command::Config(args) => configure(args, settings),
    }
}

fn configure(args: ConfigArgs, mut settings: Settings) -> Result<()> {
    let changed = args.port.is_some()
        || args.baud.is_some()
        || args.speed.is_some()
        || args.songs_dir.is_some()
        || args.include_virtual.is_some();

    if let Some(port) = args.port {
        settings.default_port = Some(port);
    }
    if let Some(baud) = args.baud {
        settings.baud_rate = baud;
    }
    if let Some(speed) = args.speed {
        settings.default_speed = clamp_speed(speed);
    }
    if let Some(dir) = args.songs_dir {
        settings.songs_dir = Some(dir);
    }
    if let Some(include_virtual) = args.include_virtual {
        settings.virtual_port = include_virtual;
    }

    if changed {
        settings.save().context("Failed to save settings")?;
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn ports(include_virtual: bool) -> Result<()> {
    let ports = list_ports(include_virtual);
    if ports.is_empty() {
        println!("No output ports found");
    }
    for port in ports {
        println!(
            "{:<24} {:<8} {}",
            port.name,
            format!("{:?}", port.port_type),
            port.description.unwrap_or_default()
        );
    }
    Ok(())
}

fn load_song(file: &Path) -> Result<Song> {
    load_file(file).with_context(|| format!("Failed to load {}", file.display()))
}

fn song_info(file: &Path, settings: &Settings) -> Result<()> {
    let song = load_song(file)?;
    let index = TimestampIndex::build_with(song.events(), song.tempo_scale(), settings.bucket_size);

    println!("Title:    {}", song.info.title);
    println!("Location: {}", song.info.location.display());
    println!("Length:   {}", format_time(song.info.length));
    println!("Tempo:    {} bpm", song.info.bpm);
    println!(
        "Events:   {} ({} playable)",
        song.events().len(),
        song.playable_count()
    );
    println!(
        "Index:    {} buckets of {}s",
        index.bucket_count(),
        index.bucket_size
    );
    Ok(())
}

fn build_index(file: &Path, bucket_size: f64) -> Result<()> {
    if bucket_size <= 0.0 {
        bail!("Bucket size must be positive");
    }
    let song = load_song(file)?;
    let index = TimestampIndex::build_with(song.events(), song.tempo_scale(), bucket_size);
    let path = store::index_path(file);
    store::save(&path, &index).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {} buckets to {}", index.bucket_count(), path.display());
    Ok(())
}

fn playlist(dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| PathBuf::from("."));
    let playlist = Playlist::scan(&dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for (i, info) in playlist.infos().iter().enumerate() {
        println!(
            "{:>3}  {:<40} {:>8}  {:>3} bpm  {}",
            i + 1,
            info.title,
            format_time(info.length),
            info.bpm,
            "*".repeat(info.stars as usize)
        );
    }
    Ok(())
}

async fn play(args: PlayArgs, settings: &Settings) -> Result<()> {
    let mut song = load_song(&args.file)?;
    if args.bpm.is_some() {
        song.set_user_bpm(args.bpm);
    }

    let config = settings.playback_config();
    let index = store::load_or_build(
        &args.file,
        song.events(),
        song.tempo_scale(),
        config.bucket_size,
    );

    let ports = list_ports(args.include_virtual || settings.virtual_port);
    let name = args.port.as_deref().or(settings.default_port.as_deref());
    let port = select_port(&ports, name)?;
    let sink = open_sink(port, args.baud.unwrap_or(settings.baud_rate))
        .with_context(|| format!("Failed to open {}", port.name))?;

    let mut controller = PlaybackController::new(config);
    controller.load_song(song, index).await;
    controller.set_output(sink).await;

    let mut speed = args.speed.map(clamp_speed).unwrap_or_else(|| settings.speed());
    let mut events = controller.subscribe();
    controller.play(args.from, speed, None).await?;
    eprintln!("Controls: p pause, r resume, s stop, +/- speed, seek <0.0-1.0>");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping playback");
                controller.stop().await;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !control(&mut controller, line.trim(), &mut speed).await? {
                        break;
                    }
                }
                _ => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(PlaybackEvent::Progress { position, .. }) => {
                    eprint!("\r{} / {}  ", format_time(position), format_time(controller.duration()));
                }
                Ok(PlaybackEvent::StateChanged { state, position }) => {
                    eprintln!("\r{:?} at {}", state, format_time(position));
                    if state.is_finished() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    if controller.state() != PlaybackState::Stopped {
        controller.stop().await;
    }
    Ok(())
}

/// Apply one control line; false when playback should end
async fn control(controller: &mut PlaybackController, line: &str, speed: &mut f64) -> Result<bool> {
    match line {
        "" => {}
        "p" => controller.pause(),
        "r" => controller.resume(),
        "s" | "q" => {
            controller.stop().await;
            return Ok(false);
        }
        "+" | "-" => {
            let step = if line == "+" { 0.1 } else { -0.1 };
            *speed = clamp_speed(*speed + step);
            controller.set_speed(*speed);
            eprintln!("Speed {:.1}x", speed);
        }
        _ => match line.strip_prefix("seek").map(|f| f.trim().parse::<f64>()) {
            Some(Ok(fraction)) => {
                let position = controller.seek(fraction);
                eprintln!("Seeking to {}", format_time(position));
                controller.play(fraction, *speed, None).await?;
            }
            _ => eprintln!("Unknown command {:?}", line),
        },
    }
    Ok(true)
}

fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
