//! What to do with each kind of input stream.

pub const DEFAULT_VIDEO_CODEC: &str = "h264";
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Filter expression that forwards frames unchanged.
pub const NULL_FILTER: &str = "null";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    /// Decode and re-encode with the named encoder (encoder or codec name).
    Encode(String),
    /// Copy packets without decoding.
    Copy,
}

impl StreamAction {
    /// Parses a command-line codec argument; `copy` selects pass-through.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("copy") {
            StreamAction::Copy
        } else {
            StreamAction::Encode(value.to_string())
        }
    }
}

/// Streams whose media kind is not known to the demuxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownStreamPolicy {
    /// Fail output configuration with `UnsupportedStream`.
    #[default]
    Abort,
    /// Leave the stream out of the output.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPolicy {
    pub video: StreamAction,
    pub audio: StreamAction,
    pub unknown: UnknownStreamPolicy,
}

impl Default for CodecPolicy {
    fn default() -> Self {
        Self {
            video: StreamAction::Encode(DEFAULT_VIDEO_CODEC.to_string()),
            audio: StreamAction::Encode(DEFAULT_AUDIO_CODEC.to_string()),
            unknown: UnknownStreamPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    /// Filter expression applied to transcoded video; `None` means `null`.
    pub video: Option<String>,
}

impl FilterPolicy {
    pub fn video_expression(&self) -> &str {
        self.video.as_deref().unwrap_or(NULL_FILTER)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TranscodeConfig {
    pub codecs: CodecPolicy,
    pub filters: FilterPolicy,
    /// Dump input and output formats before running.
    pub verbose: bool,
}
