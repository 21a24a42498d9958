/// Registers FFmpeg components. Call once at startup before opening any file.
pub fn init() -> Result<(), ffmpeg_next::Error> {
    ffmpeg_next::init()
}

/// Lets FFmpeg print its own debug output on stderr.
pub fn set_ffmpeg_debug_logging(enabled: bool) {
    let level = if enabled {
        ffmpeg_next::util::log::Level::Debug
    } else {
        ffmpeg_next::util::log::Level::Info
    };
    ffmpeg_next::util::log::set_level(level);
}

pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod filter;
pub mod frame;
pub mod input;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod policy;
pub mod session;
pub mod stats;
pub mod stream;

#[cfg(test)]
mod fake;

pub use error::{Error, Result, Stage};
pub use ffmpeg::FfmpegEngine;
pub use policy::{CodecPolicy, FilterPolicy, StreamAction, TranscodeConfig, UnknownStreamPolicy};
pub use session::{Session, transcode};
pub use stats::{StreamRoute, StreamStats};
