use std::ffi::CString;

use ffmpeg_next::{
    Codec, Rational,
    codec::capabilities::Capabilities,
    ffi,
    format::{Pixel, stream::StreamMut},
};

use crate::{
    decoder::AvDecoder,
    engine::{Decoder as _, Drain, Encoder, EngineError, EngineResult, FilterGraph, MediaFrame},
    filter::AvFilter,
    frame::AvFrame,
    packet::AvPacket,
};

pub enum EncoderType {
    Video(ffmpeg_next::codec::encoder::video::Encoder),
    Audio(ffmpeg_next::codec::encoder::audio::Encoder),
}

impl EncoderType {
    fn opened(&mut self) -> &mut ffmpeg_next::codec::encoder::Encoder {
        match self {
            EncoderType::Video(encoder) => &mut **encoder,
            EncoderType::Audio(encoder) => &mut **encoder,
        }
    }
}

/// Audio frames pass through here before the codec sees them: decoders hand
/// out whatever sample format and frame length they like, most encoders
/// accept one format and a fixed number of samples per frame.
struct AudioAdapter {
    graph: AvFilter,
    frame: AvFrame,
    eof_sent: bool,
}

pub struct AvEncoder {
    codec: Codec,
    inner: EncoderType,
    pixel_format: Option<Pixel>,
    encoder_time_base: Rational,
    delay: bool,
    adapter: Option<AudioAdapter>,
}

impl AvEncoder {
    /// Opens `codec` with parameters taken from the stream's decoder.
    pub fn new(codec: &Codec, decoder: &AvDecoder, global_header: bool) -> EngineResult<Self> {
        let mut pixel_format = None;
        let mut adapter = None;
        let (inner, encoder_time_base) = if let Some(video_decoder) = decoder.video() {
            let mut encoder = ffmpeg_next::codec::Context::new_with_codec(*codec)
                .encoder()
                .video()?;
            encoder.set_width(video_decoder.width());
            encoder.set_height(video_decoder.height());
            encoder.set_aspect_ratio(video_decoder.aspect_ratio());
            // first format the encoder lists; the filter graph converts to it
            let format = codec
                .video()?
                .formats()
                .and_then(|mut formats| formats.next())
                .unwrap_or(video_decoder.format());
            encoder.set_format(format);
            pixel_format = Some(format);

            let frame_rate = decoder.frame_rate();
            let time_base = if frame_rate.numerator() > 0 && frame_rate.denominator() > 0 {
                encoder.set_frame_rate(Some(frame_rate));
                frame_rate.invert()
            } else {
                decoder.packet_time_base()
            };
            encoder.set_time_base(time_base);
            if global_header {
                encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
            }

            let encoder = encoder.open_as(*codec)?;
            (EncoderType::Video(encoder), time_base)
        } else if let Some(audio_decoder) = decoder.audio() {
            let mut encoder = ffmpeg_next::codec::Context::new_with_codec(*codec)
                .encoder()
                .audio()?;
            let audio_codec = codec.audio()?;

            // keep the source rate unless the codec only takes a fixed set
            let source_rate = audio_decoder.rate() as i32;
            let rate = audio_codec
                .rates()
                .map(|rates| rates.collect::<Vec<_>>())
                .filter(|rates| !rates.is_empty() && !rates.contains(&source_rate))
                .map_or(source_rate, |rates| rates[0]);
            encoder.set_rate(rate);

            let layout = decoder.channel_layout_name()?;
            let layout_name = CString::new(layout.as_str())
                .map_err(|e| EngineError::other(format!("invalid channel layout {layout}: {e}")))?;
            let ret = unsafe {
                ffi::av_channel_layout_from_string(
                    &mut (*encoder.as_mut_ptr()).ch_layout,
                    layout_name.as_ptr(),
                )
            };
            if ret < 0 {
                return Err(ffmpeg_next::Error::from(ret).into());
            }

            let format = audio_codec
                .formats()
                .and_then(|mut formats| formats.next())
                .unwrap_or(audio_decoder.format());
            encoder.set_format(format);

            let time_base = Rational::new(1, rate);
            encoder.set_time_base(time_base);
            if global_header {
                encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
            }

            let encoder = encoder.open_as(*codec)?;
            let frame_size = (!codec
                .capabilities()
                .contains(Capabilities::VARIABLE_FRAME_SIZE)
                && encoder.frame_size() > 0)
                .then(|| encoder.frame_size());
            let graph = AvFilter::audio(
                decoder,
                time_base,
                format,
                rate as u32,
                &layout,
                frame_size,
            )?;
            adapter = Some(AudioAdapter {
                graph,
                frame: AvFrame::empty(),
                eof_sent: false,
            });
            (EncoderType::Audio(encoder), time_base)
        } else {
            return Err(EngineError::other("decoder is neither video nor audio"));
        };

        log::info!(
            "encoder opened: {} for stream #{}",
            codec.name(),
            decoder.stream_index()
        );

        Ok(Self {
            codec: *codec,
            inner,
            pixel_format,
            encoder_time_base,
            delay: codec.capabilities().contains(Capabilities::DELAY),
            adapter,
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Pixel format the encoder was opened with; `None` for audio.
    pub fn pixel_format(&self) -> Option<Pixel> {
        self.pixel_format
    }

    /// Copies the opened encoder's parameters into an output stream.
    pub fn write_parameters(&self, stream: &mut StreamMut<'_>) {
        match &self.inner {
            EncoderType::Video(encoder) => stream.set_parameters(encoder),
            EncoderType::Audio(encoder) => stream.set_parameters(encoder),
        }
    }
}

impl Encoder for AvEncoder {
    type Packet = AvPacket;
    type Frame = AvFrame;

    fn send_frame(&mut self, frame: Option<&AvFrame>) -> EngineResult<()> {
        if let Some(adapter) = &mut self.adapter {
            return adapter.graph.push_frame(frame);
        }
        let encoder = self.inner.opened();
        match frame {
            Some(frame) => encoder.send_frame(frame.frame())?,
            None => encoder.send_eof()?,
        }
        Ok(())
    }

    fn receive_packet(&mut self, packet: &mut AvPacket) -> EngineResult<Drain> {
        loop {
            match self.inner.opened().receive_packet(packet.get_mut()) {
                Ok(()) => return Ok(Drain::Ready),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN => {}
                Err(ffmpeg_next::Error::Eof) => return Ok(Drain::EndOfStream),
                Err(err) => return Err(err.into()),
            }

            // the codec takes one more frame only once it asked for input
            let Some(adapter) = &mut self.adapter else {
                return Ok(Drain::Pending);
            };
            match adapter.graph.pull_frame(&mut adapter.frame)? {
                Drain::Ready => {
                    let result = self.inner.opened().send_frame(adapter.frame.frame());
                    adapter.frame.release();
                    result?;
                }
                Drain::Pending => return Ok(Drain::Pending),
                Drain::EndOfStream if !adapter.eof_sent => {
                    adapter.eof_sent = true;
                    self.inner.opened().send_eof()?;
                }
                Drain::EndOfStream => return Ok(Drain::EndOfStream),
            }
        }
    }

    fn time_base(&self) -> Rational {
        self.encoder_time_base
    }

    /// Audio always counts as buffering: the adapter holds back samples
    /// until a full frame is available.
    fn buffers_internally(&self) -> bool {
        self.delay || self.adapter.is_some()
    }
}
