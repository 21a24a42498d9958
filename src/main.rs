use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ffmpeg_transcode::{
    CodecPolicy, FfmpegEngine, FilterPolicy, StreamAction, TranscodeConfig, UnknownStreamPolicy,
};
use tokio_util::sync::CancellationToken;

/// Transcodes a media file: decode, filter and re-encode video and audio,
/// copy every other stream.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    input: PathBuf,

    output: PathBuf,

    /// Raise log verbosity; once also enables FFmpeg debug output and format dumps
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Video encoder or codec name, or "copy"
    #[clap(long, default_value = ffmpeg_transcode::policy::DEFAULT_VIDEO_CODEC)]
    video_codec: String,

    /// Audio encoder or codec name, or "copy"
    #[clap(long, default_value = ffmpeg_transcode::policy::DEFAULT_AUDIO_CODEC)]
    audio_codec: String,

    /// Filter graph applied to transcoded video, e.g. "scale=1280:720" to resize
    #[clap(long, default_value = ffmpeg_transcode::policy::NULL_FILTER)]
    filter: String,

    /// Leave streams of unknown type out instead of failing
    #[clap(long)]
    skip_unknown_streams: bool,

    /// Print per-stream statistics as JSON
    #[clap(long)]
    json: bool,
}

impl Args {
    fn config(&self) -> TranscodeConfig {
        TranscodeConfig {
            codecs: CodecPolicy {
                video: StreamAction::parse(&self.video_codec),
                audio: StreamAction::parse(&self.audio_codec),
                unknown: if self.skip_unknown_streams {
                    UnknownStreamPolicy::Skip
                } else {
                    UnknownStreamPolicy::Abort
                },
            },
            filters: FilterPolicy {
                video: Some(self.filter.clone()),
            },
            verbose: self.verbose > 0,
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("ffmpeg_transcode", level)
        .filter_module("transcoder", level)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    ffmpeg_transcode::init().context("Failed to initialize FFmpeg")?;
    ffmpeg_transcode::set_ffmpeg_debug_logging(args.verbose > 0);

    let config = args.config();
    let cancel = CancellationToken::new();

    let mut task = {
        let cancel = cancel.clone();
        let input = args.input.clone();
        let output = args.output.clone();
        tokio::task::spawn_blocking(move || {
            ffmpeg_transcode::transcode(FfmpegEngine::new(), &input, &output, &config, cancel)
        })
    };

    let result = loop {
        tokio::select! {
            result = &mut task => break result,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                log::warn!("interrupted, stopping after the current packet");
                cancel.cancel();
            },
        }
    };

    let stats = result
        .context("transcode task panicked")?
        .with_context(|| {
            format!(
                "Failed to transcode {} to {}",
                args.input.display(),
                args.output.display()
            )
        })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    log::info!("wrote {}", args.output.display());
    Ok(())
}
