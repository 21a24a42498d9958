//! Error types for ffmpeg-transcode.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::engine::EngineError;

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline step an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    Configure,
    Demux,
    Decode,
    Filter,
    Encode,
    Mux,
    Finish,
    Session,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Open => "open",
            Stage::Configure => "configure",
            Stage::Demux => "demux",
            Stage::Decode => "decode",
            Stage::Filter => "filter",
            Stage::Encode => "encode",
            Stage::Mux => "mux",
            Stage::Finish => "finish",
            Stage::Session => "session",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot open input {}: {source}", path.display())]
    InputOpen { path: PathBuf, source: EngineError },

    /// Stream information could not be read, for the whole container
    /// (`stream` is `None`) or for one stream whose decoder lacks parameters.
    #[error(
        "cannot find stream information{}: {source}",
        .stream.map(|s| format!(" for stream #{s}")).unwrap_or_default()
    )]
    StreamInfo {
        stream: Option<usize>,
        source: EngineError,
    },

    #[error("no decoder for stream #{stream} ({codec})")]
    DecoderNotFound { stream: usize, codec: String },

    #[error("cannot open decoder for stream #{stream}: {source}")]
    DecoderOpen { stream: usize, source: EngineError },

    #[error("cannot create output {}: {source}", path.display())]
    OutputOpen { path: PathBuf, source: EngineError },

    /// Stream kind the pipeline can neither transcode nor copy.
    #[error("stream #{stream} is of unsupported type {kind}")]
    UnsupportedStream { stream: usize, kind: String },

    #[error("encoder {codec} not found for stream #{stream}")]
    EncoderNotFound { stream: usize, codec: String },

    #[error("cannot open encoder for stream #{stream}: {source}")]
    EncoderOpen { stream: usize, source: EngineError },

    #[error("cannot write output header: {source}")]
    HeaderWrite { source: EngineError },

    #[error("cannot configure filter graph for stream #{stream}: {source}")]
    FilterConfig { stream: usize, source: EngineError },

    #[error("cannot read input packet: {source}")]
    Demux { source: EngineError },

    #[error("decoding failed on stream #{stream}: {source}")]
    Decode { stream: usize, source: EngineError },

    #[error("filtering failed on stream #{stream}: {source}")]
    Filter { stream: usize, source: EngineError },

    #[error("encoding failed on stream #{stream}: {source}")]
    Encode { stream: usize, source: EngineError },

    #[error("cannot write packet for stream #{stream}: {source}")]
    Mux { stream: usize, source: EngineError },

    #[error("cannot write output trailer: {source}")]
    TrailerWrite { source: EngineError },

    #[error(
        "out of memory during {stage}{}",
        .stream.map(|s| format!(" on stream #{s}")).unwrap_or_default()
    )]
    Allocation { stream: Option<usize>, stage: Stage },

    #[error("transcode cancelled")]
    Cancelled,

    /// Operation called out of lifecycle order.
    #[error("session is not ready to {operation} (state: {state})")]
    NotReady {
        operation: &'static str,
        state: &'static str,
    },
}

impl Error {
    /// Input stream the failure belongs to, if any.
    pub fn stream(&self) -> Option<usize> {
        match self {
            Error::DecoderNotFound { stream, .. }
            | Error::DecoderOpen { stream, .. }
            | Error::UnsupportedStream { stream, .. }
            | Error::EncoderNotFound { stream, .. }
            | Error::EncoderOpen { stream, .. }
            | Error::FilterConfig { stream, .. }
            | Error::Decode { stream, .. }
            | Error::Filter { stream, .. }
            | Error::Encode { stream, .. }
            | Error::Mux { stream, .. } => Some(*stream),
            Error::StreamInfo { stream, .. } | Error::Allocation { stream, .. } => *stream,
            _ => None,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Error::InputOpen { .. }
            | Error::StreamInfo { .. }
            | Error::DecoderNotFound { .. }
            | Error::DecoderOpen { .. } => Stage::Open,
            Error::OutputOpen { .. }
            | Error::UnsupportedStream { .. }
            | Error::EncoderNotFound { .. }
            | Error::EncoderOpen { .. }
            | Error::HeaderWrite { .. }
            | Error::FilterConfig { .. } => Stage::Configure,
            Error::Demux { .. } => Stage::Demux,
            Error::Decode { .. } => Stage::Decode,
            Error::Filter { .. } => Stage::Filter,
            Error::Encode { .. } => Stage::Encode,
            Error::Mux { .. } => Stage::Mux,
            Error::TrailerWrite { .. } => Stage::Finish,
            Error::Allocation { stage, .. } => *stage,
            Error::Cancelled | Error::NotReady { .. } => Stage::Session,
        }
    }

    pub(crate) fn decoder_open(stream: usize, source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(Some(stream), Stage::Open),
            EngineError::MissingParameters(_) => Error::StreamInfo {
                stream: Some(stream),
                source,
            },
            source => Error::DecoderOpen { stream, source },
        }
    }

    pub(crate) fn input_open(path: &Path, source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(None, Stage::Open),
            EngineError::StreamInfo(_) => Error::StreamInfo {
                stream: None,
                source,
            },
            source => Error::InputOpen {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub(crate) fn encoder_open(stream: usize, source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(Some(stream), Stage::Configure),
            source => Error::EncoderOpen { stream, source },
        }
    }

    pub(crate) fn filter_config(stream: usize, source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(Some(stream), Stage::Configure),
            source => Error::FilterConfig { stream, source },
        }
    }

    pub(crate) fn decode(stream: usize, source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(Some(stream), Stage::Decode),
            source => Error::Decode { stream, source },
        }
    }

    pub(crate) fn filter(stream: usize, source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(Some(stream), Stage::Filter),
            source => Error::Filter { stream, source },
        }
    }

    pub(crate) fn encode(stream: usize, source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(Some(stream), Stage::Encode),
            source => Error::Encode { stream, source },
        }
    }

    pub(crate) fn mux(stream: usize, source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(Some(stream), Stage::Mux),
            source => Error::Mux { stream, source },
        }
    }

    pub(crate) fn demux(source: EngineError) -> Self {
        match source {
            EngineError::OutOfMemory => Self::allocation(None, Stage::Demux),
            source => Error::Demux { source },
        }
    }

    fn allocation(stream: Option<usize>, stage: Stage) -> Self {
        Error::Allocation { stream, stage }
    }
}
