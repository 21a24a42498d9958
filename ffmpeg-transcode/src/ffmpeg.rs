//! [`Engine`] implementation backed by `ffmpeg-next`.

use std::{ffi::CString, path::Path};

use ffmpeg_next::{Codec, codec};

use crate::{
    decoder::AvDecoder,
    encoder::AvEncoder,
    engine::{Engine, EngineResult},
    filter::AvFilter,
    frame::AvFrame,
    input::AvInput,
    output::AvOutput,
    packet::AvPacket,
    stream::StreamDescriptor,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> Self {
        Self
    }

    /// Resolves an encoder by its own name ("libx264") or by codec name ("h264").
    fn find_encoder_by_codec_name(name: &str) -> Option<Codec> {
        let cname = CString::new(name).ok()?;
        let descriptor = unsafe { ffmpeg_next::ffi::avcodec_descriptor_get_by_name(cname.as_ptr()) };
        if descriptor.is_null() {
            return None;
        }
        let id = codec::Id::from(unsafe { (*descriptor).id });
        ffmpeg_next::encoder::find(id)
    }
}

impl Engine for FfmpegEngine {
    type Codec = Codec;
    type Packet = AvPacket;
    type Frame = AvFrame;
    type Input = AvInput;
    type Output = AvOutput;
    type Decoder = AvDecoder;
    type Encoder = AvEncoder;
    type Filter = AvFilter;

    fn open_input(&self, path: &Path) -> EngineResult<AvInput> {
        AvInput::new(path)
    }

    fn find_decoder(&self, stream: &StreamDescriptor) -> Option<Codec> {
        ffmpeg_next::decoder::find(stream.codec_id())
    }

    fn open_decoder(
        &self,
        codec: &Codec,
        input: &AvInput,
        stream: &StreamDescriptor,
    ) -> EngineResult<AvDecoder> {
        AvDecoder::new(codec, input, stream)
    }

    fn create_output(&self, path: &Path) -> EngineResult<AvOutput> {
        AvOutput::new(path)
    }

    fn find_encoder(&self, name: &str) -> Option<Codec> {
        ffmpeg_next::encoder::find_by_name(name).or_else(|| Self::find_encoder_by_codec_name(name))
    }

    fn open_encoder(
        &self,
        codec: &Codec,
        _stream: &StreamDescriptor,
        decoder: &AvDecoder,
        output: &AvOutput,
    ) -> EngineResult<AvEncoder> {
        AvEncoder::new(codec, decoder, output.needs_global_header())
    }

    fn add_encoded_stream(&self, output: &mut AvOutput, encoder: &AvEncoder) -> EngineResult<usize> {
        output.add_encoded_stream(encoder)
    }

    fn add_copied_stream(
        &self,
        output: &mut AvOutput,
        input: &AvInput,
        stream: &StreamDescriptor,
    ) -> EngineResult<usize> {
        output.add_copied_stream(input, stream)
    }

    fn build_filter(
        &self,
        decoder: &AvDecoder,
        encoder: &AvEncoder,
        expression: &str,
    ) -> EngineResult<AvFilter> {
        AvFilter::video(decoder, encoder, expression)
    }

    fn alloc_packet(&self) -> AvPacket {
        AvPacket::empty()
    }
}

#[cfg(test)]
#[path = "ffmpeg_test.rs"]
mod ffmpeg_test;
