use std::ffi::CStr;

use ffmpeg_next::{Codec, Rational, ffi};

use crate::{
    engine::{Decoder, Drain, EngineError, EngineResult},
    frame::AvFrame,
    input::AvInput,
    packet::AvPacket,
    stream::StreamDescriptor,
};

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

impl DecoderType {
    fn opened(&mut self) -> &mut ffmpeg_next::codec::decoder::Opened {
        match self {
            DecoderType::Video(video_decoder) => &mut **video_decoder,
            DecoderType::Audio(audio_decoder) => &mut **audio_decoder,
        }
    }
}

pub struct AvDecoder {
    stream: StreamDescriptor,
    inner: DecoderType,
}

impl AvDecoder {
    pub fn new(codec: &Codec, input: &AvInput, stream: &StreamDescriptor) -> EngineResult<Self> {
        let input_stream = input.stream(stream.index()).ok_or_else(|| {
            EngineError::other(format!("input stream #{} not found", stream.index()))
        })?;
        let mut decoder_ctx =
            ffmpeg_next::codec::Context::from_parameters(input_stream.parameters())?;
        unsafe {
            (*decoder_ctx.as_mut_ptr()).pkt_timebase = stream.time_base().into();
            if stream.is_video() {
                (*decoder_ctx.as_mut_ptr()).framerate = stream.rate().into();
            }
        }

        let opened = decoder_ctx.decoder().open_as(*codec)?;
        let inner = if stream.is_video() {
            let video_decoder = opened.video()?;
            if video_decoder.format() == ffmpeg_next::format::Pixel::None
                || video_decoder.width() == 0
                || video_decoder.height() == 0
            {
                return Err(EngineError::MissingParameters(format!(
                    "video stream #{} has no size or pixel format",
                    stream.index()
                )));
            }
            DecoderType::Video(video_decoder)
        } else if stream.is_audio() {
            let audio_decoder = opened.audio()?;
            if audio_decoder.rate() == 0 {
                return Err(EngineError::MissingParameters(format!(
                    "audio stream #{} has no sample rate",
                    stream.index()
                )));
            }
            DecoderType::Audio(audio_decoder)
        } else {
            return Err(EngineError::other("unsupported stream type"));
        };

        Ok(Self {
            stream: stream.clone(),
            inner,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream.index()
    }

    /// Frame rate guessed from the container.
    pub fn frame_rate(&self) -> Rational {
        self.stream.rate()
    }

    pub fn video(&self) -> Option<&ffmpeg_next::codec::decoder::Video> {
        match &self.inner {
            DecoderType::Video(video_decoder) => Some(video_decoder),
            DecoderType::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&ffmpeg_next::codec::decoder::Audio> {
        match &self.inner {
            DecoderType::Audio(audio_decoder) => Some(audio_decoder),
            DecoderType::Video(_) => None,
        }
    }

    /// Channel layout of an audio stream in FFmpeg's string form ("stereo",
    /// "5.1(side)"). Streams that only know their channel count get the
    /// default layout for it.
    pub fn channel_layout_name(&self) -> EngineResult<String> {
        let audio_decoder = self
            .audio()
            .ok_or_else(|| EngineError::other("not an audio decoder"))?;
        unsafe {
            let source = &(*audio_decoder.as_ptr()).ch_layout;
            let mut fallback: ffi::AVChannelLayout = std::mem::zeroed();
            let layout = if source.order == ffi::AVChannelOrder::AV_CHANNEL_ORDER_UNSPEC {
                ffi::av_channel_layout_default(&mut fallback, source.nb_channels);
                &fallback
            } else {
                source
            };

            let mut name = [0 as std::os::raw::c_char; 128];
            let ret = ffi::av_channel_layout_describe(layout, name.as_mut_ptr(), name.len());
            if ret < 0 {
                return Err(ffmpeg_next::Error::from(ret).into());
            }
            Ok(CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned())
        }
    }
}

impl Decoder for AvDecoder {
    type Packet = AvPacket;
    type Frame = AvFrame;

    fn alloc_frame(&self) -> AvFrame {
        AvFrame::empty()
    }

    fn send_packet(&mut self, packet: Option<&AvPacket>) -> EngineResult<()> {
        let decoder = self.inner.opened();
        match packet {
            Some(packet) => decoder.send_packet(packet.packet())?,
            None => decoder.send_eof()?,
        }
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut AvFrame) -> EngineResult<Drain> {
        match self.inner.opened().receive_frame(frame.get_mut()) {
            Ok(()) => Ok(Drain::Ready),
            Err(ffmpeg_next::Error::Eof) => Ok(Drain::EndOfStream),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(Drain::Pending)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn packet_time_base(&self) -> Rational {
        self.stream.time_base()
    }
}
