mod cli;

use sceneforged_common::{MediaId, PlaybackSource};
use sceneforged_player::{
    config::{self, PlayerConfig},
    gateway::{HttpGateway, TrackDiscovery, TranscodeStatusSource},
    playback::{BufferGate, BufferState, TrackResolver},
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "sceneforged_player=trace,sceneforged_common=debug,reqwest=debug".to_string()
        } else {
            "sceneforged_player=info,reqwest=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Info { media_id, json } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(show_info(&config, &media_id, json))
        }
        Commands::Status {
            media_id,
            audio,
            buffered,
            json,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(show_status(&config, &media_id, audio, buffered, json))
        }
        Commands::Version => {
            println!("sceneforged-player {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn parse_media_id(raw: &str) -> Result<MediaId> {
    raw.parse()
        .with_context(|| format!("Invalid media ID: {raw}"))
}

async fn show_info(config: &PlayerConfig, media_id: &str, json: bool) -> Result<()> {
    let media_id = parse_media_id(media_id)?;
    let gateway = HttpGateway::new(&config.gateway)?;

    tracing::info!(media_id = %media_id, "Querying track discovery");
    let info = gateway.discover(media_id).await?;

    let resolver = TrackResolver::new(&config.tracks);
    let audio = resolver.resolve_audio(&info.tracks, None, None);
    let subtitle = resolver.resolve_subtitle(&info.tracks, &audio, None, None);

    if json {
        let out = serde_json::json!({
            "media_id": media_id,
            "info": info,
            "audio": audio,
            "subtitle": subtitle,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match info.duration_secs {
        Some(d) => {
            let secs = d as u64;
            println!(
                "Duration: {:02}:{:02}:{:02}",
                secs / 3600,
                (secs / 60) % 60,
                secs % 60
            );
        }
        None => println!("Duration: unknown"),
    }

    println!("\nAudio Tracks: {}", info.tracks.audio.len());
    for track in &info.tracks.audio {
        print!("  [{}] {}", track.index, track.language);
        if let Some(ref codec) = track.codec {
            print!(" {}", codec);
        }
        if let Some(ref title) = track.title {
            print!(" \"{}\"", title);
        }
        if track.index == audio.index {
            print!(" [selected]");
        }
        println!();
    }

    println!("\nSubtitle Tracks: {}", info.tracks.subtitles.len());
    for track in &info.tracks.subtitles {
        print!("  [{}] {}", track.index, track.language);
        if track.forced {
            print!(" [forced]");
        }
        if subtitle.selection.index() == Some(track.index) {
            print!(" [selected]");
        }
        println!();
    }

    println!("\nDefault audio: {} ({:?})", audio.index, audio.reason);
    println!(
        "Default subtitle: {} ({:?})",
        subtitle.selection, subtitle.reason
    );

    Ok(())
}

async fn show_status(
    config: &PlayerConfig,
    media_id: &str,
    audio: usize,
    buffered: f64,
    json: bool,
) -> Result<()> {
    let media_id = parse_media_id(media_id)?;
    let gateway = HttpGateway::new(&config.gateway)?;

    tracing::info!(media_id = %media_id, audio, "Querying transcode status");
    let status = gateway.transcode_status(media_id, audio).await?;

    // The status endpoint only exists for segmented sources.
    let source = PlaybackSource::segmented(media_id, "", status.pre_transcoded);
    let gate = BufferGate::new(&config.buffer, &source);
    let mut state = BufferState::for_source(&source);
    state.advance(buffered, Some(&status));
    let rule = gate.rule(&state);
    let admitted = gate.admits(&state);

    if json {
        let out = serde_json::json!({
            "media_id": media_id,
            "status": status,
            "buffer": state,
            "rule": format!("{rule:?}"),
            "admitted": admitted,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Segments ready: {}", status.segments_ready);
    println!("Transcode complete: {}", status.is_complete);
    println!("Pre-transcoded: {}", status.pre_transcoded);
    println!("Admission rule: {:?}", rule);
    if admitted {
        println!("✓ Playback would start now");
    } else {
        println!("✗ Playback would keep buffering");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            PlayerConfig::default()
        }
    };

    println!("  Server: {}", config.gateway.base_url);
    println!("  API key: {}", if config.gateway.api_key.is_some() { "set" } else { "not set" });
    println!(
        "  Admission: {}s unrestricted, {}s complete, {} segments / {}s in progress",
        config.buffer.unrestricted_min_ahead_secs,
        config.buffer.complete_min_ahead_secs,
        config.buffer.in_progress_min_segments,
        config.buffer.in_progress_min_ahead_secs
    );
    println!("  Default language: {}", config.tracks.default_language);
    println!("  Subtitle heuristic: {:?}", config.tracks.subtitle_heuristic);
    println!(
        "  Network retries: {:?}s",
        config.recovery.network_backoff_secs
    );

    Ok(())
}
