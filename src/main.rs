mod cli;

use tsforged::{
    config,
    io,
    transmux::{
        drain_into_sink, FileSink, MediaDataSource, MediaSegmentSource, TransmuxCommand,
        TransmuxEvent, TransmuxingController,
    },
};
use tsforged_common::{MediaInfo, TransmuxConfig};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tsforged=trace,tsforged_media=debug,tsforged_probe=debug,tsforged_common=debug,reqwest=debug".to_string()
        } else {
            "tsforged=info,tsforged_media=info,tsforged_probe=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Transmux {
            inputs,
            out_dir,
            durations,
            live,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(transmux(
                &inputs,
                out_dir,
                &durations,
                live,
                cli.config.as_deref(),
            ))
        }
        Commands::Probe { input, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_input(&input, json, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("tsforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Build one segment per input, with local file sizes filled in.
fn media_source(inputs: &[String], durations: &[u64]) -> Result<MediaDataSource> {
    if !durations.is_empty() && durations.len() != inputs.len() {
        anyhow::bail!(
            "Got {} durations for {} inputs",
            durations.len(),
            inputs.len()
        );
    }

    let mut segments = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let mut segment = MediaSegmentSource::new(input.as_str());
        if !io::is_remote(input) {
            let metadata = std::fs::metadata(input)
                .with_context(|| format!("Input file does not exist: {}", input))?;
            segment = segment.with_filesize(metadata.len());
        }
        if let Some(&duration) = durations.get(i) {
            segment = segment.with_duration(duration);
        }
        segments.push(segment);
    }
    Ok(MediaDataSource::from_segments(segments))
}

fn controller_for(
    source: MediaDataSource,
    config: TransmuxConfig,
) -> Result<(
    TransmuxingController,
    tokio::sync::mpsc::UnboundedReceiver<TransmuxEvent>,
)> {
    let first = source.segments.first().context("No inputs")?;
    let loader = io::loader_for(&first.url, &config)?;
    let (controller, events) = TransmuxingController::new(source, config, loader)?;
    Ok((controller, events))
}

async fn transmux(
    inputs: &[String],
    out_dir: Option<PathBuf>,
    durations: &[u64],
    live: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if live {
        config.transmux.is_live = true;
    }
    let out_dir = out_dir.unwrap_or_else(|| config.output.dir.clone());

    let source = media_source(inputs, durations)?;
    tracing::info!(
        segments = source.segment_count(),
        out_dir = %out_dir.display(),
        "Starting transmux"
    );

    let (controller, mut events) = controller_for(source, config.transmux)?;
    let mut sink = FileSink::create(&out_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", out_dir))?
        .with_media_info(config.output.write_media_info);

    let handle = controller.spawn();
    handle.send(TransmuxCommand::Start).await;

    let result = tokio::select! {
        result = drain_into_sink(&mut events, &mut sink) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    handle.shutdown().await;

    match result {
        Some(Ok(summary)) => {
            println!(
                "Wrote {} init, {} video and {} audio segments to {}",
                summary.init_segments,
                summary.video_segments,
                summary.audio_segments,
                out_dir.display()
            );
            Ok(())
        }
        Some(Err(e)) => Err(e).context("Transmux failed"),
        None => {
            println!("Interrupted after {} files", sink.written().len());
            Ok(())
        }
    }
}

async fn probe_input(input: &str, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let source = media_source(&[input.to_string()], &[])?;
    let (controller, mut events) = controller_for(source, config.transmux)?;

    let handle = controller.spawn();
    handle.send(TransmuxCommand::Start).await;

    let mut media_info = None;
    let mut failure = None;
    while let Some(event) = events.recv().await {
        match event {
            TransmuxEvent::MediaInfo(info) => {
                media_info = Some(info);
                break;
            }
            TransmuxEvent::IoError(e) => {
                failure = Some(e.to_string());
                break;
            }
            TransmuxEvent::DemuxError(kind, message) => {
                failure = Some(format!("{}: {}", kind, message));
                break;
            }
            TransmuxEvent::LoadingComplete => break,
            _ => {}
        }
    }
    handle.shutdown().await;

    if let Some(message) = failure {
        anyhow::bail!("Probe failed: {}", message);
    }
    let info = media_info.context("Stream ended before media info was complete")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_media_info(input, &info);
    }
    Ok(())
}

fn print_media_info(input: &str, info: &MediaInfo) {
    println!("Input: {}", input);
    if let Some(ref mime_type) = info.mime_type {
        println!("MIME type: {}", mime_type);
    }
    if let Some(duration) = info.duration {
        let secs = duration / 1000;
        println!(
            "Duration: {:02}:{:02}:{:02}.{:03}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            duration % 1000
        );
    }

    if info.has_video == Some(true) {
        print!("\nVideo: {}", info.video_codec.as_deref().unwrap_or("unknown"));
        if let (Some(width), Some(height)) = (info.width, info.height) {
            print!(" {}x{}", width, height);
        }
        if let Some(fps) = info.fps {
            print!(", {:.3} fps", fps);
        }
        println!();
    }
    if info.has_audio == Some(true) {
        print!("Audio: {}", info.audio_codec.as_deref().unwrap_or("unknown"));
        if let Some(rate) = info.audio_sample_rate {
            print!(" {} Hz", rate);
        }
        if let Some(channels) = info.audio_channel_count {
            print!(" {}ch", channels);
        }
        println!();
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Live: {}", config.transmux.is_live);
            println!("  Stash buffer: {}", config.transmux.enable_stash_buffer);
            println!("  Seek type: {:?}", config.transmux.seek_type);
            println!("  Extra headers: {}", config.transmux.headers.len());
            println!("  Output dir: {}", config.output.dir.display());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Seek type: {:?}", config.transmux.seek_type);
            println!("  Output dir: {}", config.output.dir.display());
        }
    }

    Ok(())
}
