//! Collaborator interfaces the transcode pipeline is written against.
//!
//! The pipeline never talks to FFmpeg directly. It drives these traits, which
//! [`FfmpegEngine`](crate::ffmpeg::FfmpegEngine) implements on top of
//! `ffmpeg-next`. Every pull-style operation reports [`Drain`] so "no output
//! yet" and "end of stream" never surface as errors.

use std::path::Path;

use ffmpeg_next::Rational;

use crate::stream::StreamDescriptor;

/// Outcome of pulling one unit out of a buffering stage into a reusable buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// The buffer now holds a fresh unit.
    Ready,
    /// The stage needs more input before it can emit anything.
    Pending,
    /// The stage was flushed and has nothing left.
    EndOfStream,
}

/// Outcome of reading one packet from the demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    Packet,
    EndOfInput,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("ffmpeg: {0}")]
    Ffmpeg(ffmpeg_next::Error),

    /// The container opened but its stream information could not be read.
    #[error("cannot read stream information: {0}")]
    StreamInfo(ffmpeg_next::Error),

    /// Stream parameters are too incomplete to open a codec.
    #[error("missing codec parameters: {0}")]
    MissingParameters(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<ffmpeg_next::Error> for EngineError {
    fn from(err: ffmpeg_next::Error) -> Self {
        match err {
            ffmpeg_next::Error::Other { errno } if errno == ffmpeg_next::util::error::ENOMEM => {
                EngineError::OutOfMemory
            }
            err => EngineError::Ffmpeg(err),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

pub trait MediaPacket {
    fn stream_index(&self) -> usize;
    fn set_stream_index(&mut self, index: usize);
    fn size(&self) -> usize;
    fn pts(&self) -> Option<i64>;
    /// Rescales pts, dts and duration; absent timestamps stay absent.
    fn rescale_ts(&mut self, from: Rational, to: Rational);
    /// Drops the payload reference. The buffer may be reused afterwards.
    fn release(&mut self);
}

pub trait MediaFrame {
    fn pts(&self) -> Option<i64>;
    fn set_pts(&mut self, pts: Option<i64>);
    fn best_effort_timestamp(&self) -> Option<i64>;
    fn time_base(&self) -> Rational;
    fn set_time_base(&mut self, time_base: Rational);
    fn clear_picture_type(&mut self);
    /// Drops the payload reference. The buffer may be reused afterwards.
    fn release(&mut self);
}

pub trait Demuxer {
    type Packet: MediaPacket;

    fn streams(&self) -> &[StreamDescriptor];
    fn read_packet(&mut self, packet: &mut Self::Packet) -> EngineResult<Read>;
    /// Container-level tags such as title or encoder, in container order.
    fn metadata(&self) -> Vec<(String, String)>;
    fn dump(&self, _url: &str) {}
}

pub trait Muxer {
    type Packet: MediaPacket;

    /// Replaces the container-level tags. Only honoured before the header.
    fn set_metadata(&mut self, tags: &[(String, String)]);
    fn write_header(&mut self) -> EngineResult<()>;
    fn write_interleaved(&mut self, packet: &mut Self::Packet) -> EngineResult<()>;
    fn write_trailer(&mut self) -> EngineResult<()>;
    /// Time base of an output stream. Only final once the header is written.
    fn stream_time_base(&self, index: usize) -> Option<Rational>;
    fn dump(&self, _url: &str) {}
}

pub trait Decoder {
    type Packet: MediaPacket;
    type Frame: MediaFrame;

    fn alloc_frame(&self) -> Self::Frame;
    /// `None` signals end of stream.
    fn send_packet(&mut self, packet: Option<&Self::Packet>) -> EngineResult<()>;
    fn receive_frame(&mut self, frame: &mut Self::Frame) -> EngineResult<Drain>;
    fn packet_time_base(&self) -> Rational;
}

pub trait Encoder {
    type Packet: MediaPacket;
    type Frame: MediaFrame;

    /// `None` signals end of stream.
    fn send_frame(&mut self, frame: Option<&Self::Frame>) -> EngineResult<()>;
    fn receive_packet(&mut self, packet: &mut Self::Packet) -> EngineResult<Drain>;
    fn time_base(&self) -> Rational;
    /// Whether the codec holds frames back and therefore needs an explicit flush.
    fn buffers_internally(&self) -> bool;
}

pub trait FilterGraph {
    type Frame: MediaFrame;

    /// `None` signals end of stream.
    fn push_frame(&mut self, frame: Option<&Self::Frame>) -> EngineResult<()>;
    fn pull_frame(&mut self, frame: &mut Self::Frame) -> EngineResult<Drain>;
    fn sink_time_base(&self) -> Rational;
}

/// Factory and binder for the per-handle traits above.
pub trait Engine {
    type Codec;
    type Packet: MediaPacket;
    type Frame: MediaFrame;
    type Input: Demuxer<Packet = Self::Packet>;
    type Output: Muxer<Packet = Self::Packet>;
    type Decoder: Decoder<Packet = Self::Packet, Frame = Self::Frame>;
    type Encoder: Encoder<Packet = Self::Packet, Frame = Self::Frame>;
    type Filter: FilterGraph<Frame = Self::Frame>;

    fn open_input(&self, path: &Path) -> EngineResult<Self::Input>;

    fn find_decoder(&self, stream: &StreamDescriptor) -> Option<Self::Codec>;

    fn open_decoder(
        &self,
        codec: &Self::Codec,
        input: &Self::Input,
        stream: &StreamDescriptor,
    ) -> EngineResult<Self::Decoder>;

    fn create_output(&self, path: &Path) -> EngineResult<Self::Output>;

    fn find_encoder(&self, name: &str) -> Option<Self::Codec>;

    /// Opens an encoder whose parameters are derived from `decoder`.
    fn open_encoder(
        &self,
        codec: &Self::Codec,
        stream: &StreamDescriptor,
        decoder: &Self::Decoder,
        output: &Self::Output,
    ) -> EngineResult<Self::Encoder>;

    /// Creates an output stream carrying the encoder's parameters and returns its index.
    fn add_encoded_stream(
        &self,
        output: &mut Self::Output,
        encoder: &Self::Encoder,
    ) -> EngineResult<usize>;

    /// Creates an output stream with the input stream's parameters copied verbatim.
    fn add_copied_stream(
        &self,
        output: &mut Self::Output,
        input: &Self::Input,
        stream: &StreamDescriptor,
    ) -> EngineResult<usize>;

    /// Builds and configures `source -> expression -> sink` for one stream.
    fn build_filter(
        &self,
        decoder: &Self::Decoder,
        encoder: &Self::Encoder,
        expression: &str,
    ) -> EngineResult<Self::Filter>;

    fn alloc_packet(&self) -> Self::Packet;
}
