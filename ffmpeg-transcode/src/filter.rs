use ffmpeg_next::{Rational, filter, format::Sample};

use crate::{
    decoder::AvDecoder,
    encoder::AvEncoder,
    engine::{Decoder as _, Drain, EngineError, EngineResult, FilterGraph},
    frame::AvFrame,
};

const SOURCE: &str = "in";
const SINK: &str = "out";

/// Filter graph `source -> expression -> sink`: user-configurable for video,
/// a fixed format adapter in front of audio encoders.
pub struct AvFilter {
    graph: filter::Graph,
    sink_time_base: Rational,
}

impl AvFilter {
    pub fn video(
        decoder: &AvDecoder,
        encoder: &AvEncoder,
        expression: &str,
    ) -> EngineResult<Self> {
        let video_decoder = decoder
            .video()
            .ok_or_else(|| EngineError::other("filter source needs a video decoder"))?;
        let pixel_format = encoder
            .pixel_format()
            .ok_or_else(|| EngineError::other("filter sink needs a video encoder"))?;

        let buffer = filter::find("buffer")
            .ok_or_else(|| EngineError::other("filtering source element not found"))?;
        let buffersink = filter::find("buffersink")
            .ok_or_else(|| EngineError::other("filtering sink element not found"))?;

        let time_base = decoder.packet_time_base();
        let mut aspect = video_decoder.aspect_ratio();
        if aspect.denominator() == 0 {
            aspect = Rational::new(0, 1);
        }
        let args = format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
            video_decoder.width(),
            video_decoder.height(),
            ffmpeg_next::ffi::AVPixelFormat::from(video_decoder.format()) as i32,
            time_base.numerator(),
            time_base.denominator(),
            aspect.numerator(),
            aspect.denominator()
        );

        let mut graph = filter::Graph::new();
        graph.add(&buffer, SOURCE, &args)?;
        graph.add(&buffersink, SINK, "")?;
        graph
            .get(SINK)
            .ok_or_else(|| EngineError::other("buffer sink missing from graph"))?
            .set_pixel_format(pixel_format);

        graph.output(SOURCE, 0)?.input(SINK, 0)?.parse(expression)?;
        graph.validate()?;

        let sink_time_base = configured_time_base(&mut graph)?;

        log::debug!(
            "filter graph configured for stream #{}: {} ({})",
            decoder.stream_index(),
            expression,
            args
        );

        Ok(Self {
            graph,
            sink_time_base,
        })
    }

    /// Converts decoded audio to the encoder's sample format, rate and channel
    /// layout. `time_base` is the one the incoming frames' pts are in. With a
    /// `frame_size` the sink hands out frames of exactly that many samples,
    /// only the last one may be shorter.
    pub fn audio(
        decoder: &AvDecoder,
        time_base: Rational,
        format: Sample,
        rate: u32,
        layout: &str,
        frame_size: Option<u32>,
    ) -> EngineResult<Self> {
        let audio_decoder = decoder
            .audio()
            .ok_or_else(|| EngineError::other("audio adapter needs an audio decoder"))?;

        let abuffer = filter::find("abuffer")
            .ok_or_else(|| EngineError::other("audio source element not found"))?;
        let abuffersink = filter::find("abuffersink")
            .ok_or_else(|| EngineError::other("audio sink element not found"))?;

        let args = format!(
            "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout={}",
            time_base.numerator(),
            time_base.denominator(),
            audio_decoder.rate(),
            audio_decoder.format().name(),
            decoder.channel_layout_name()?
        );
        let conversion = format!(
            "aformat=sample_fmts={}:sample_rates={}:channel_layouts={}",
            format.name(),
            rate,
            layout
        );

        let mut graph = filter::Graph::new();
        graph.add(&abuffer, SOURCE, &args)?;
        graph.add(&abuffersink, SINK, "")?;
        graph.output(SOURCE, 0)?.input(SINK, 0)?.parse(&conversion)?;
        graph.validate()?;

        if let Some(frame_size) = frame_size {
            graph
                .get(SINK)
                .ok_or_else(|| EngineError::other("buffer sink missing from graph"))?
                .sink()
                .set_frame_size(frame_size);
        }
        let sink_time_base = configured_time_base(&mut graph)?;

        log::debug!(
            "audio adapter for stream #{}: {} -> {} ({:?} samples per frame)",
            decoder.stream_index(),
            args,
            conversion,
            frame_size
        );

        Ok(Self {
            graph,
            sink_time_base,
        })
    }

    fn node(&mut self, name: &str) -> EngineResult<filter::Context<'_>> {
        self.graph
            .get(name)
            .ok_or_else(|| EngineError::other(format!("filter node {name} missing")))
    }
}

impl FilterGraph for AvFilter {
    type Frame = AvFrame;

    fn push_frame(&mut self, frame: Option<&AvFrame>) -> EngineResult<()> {
        let mut source = self.node(SOURCE)?;
        match frame {
            Some(frame) => source.source().add(frame.frame())?,
            None => source.source().flush()?,
        }
        Ok(())
    }

    fn pull_frame(&mut self, frame: &mut AvFrame) -> EngineResult<Drain> {
        let mut out_ctx = self.node(SINK)?;
        let mut sink = out_ctx.sink();
        match sink.frame(frame.get_mut()) {
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

    fn sink_time_base(&self) -> Rational {
        self.sink_time_base
    }
}

fn configured_time_base(graph: &mut filter::Graph) -> EngineResult<Rational> {
    let sink = graph
        .get(SINK)
        .ok_or_else(|| EngineError::other("buffer sink missing from graph"))?;
    let time_base = unsafe { ffmpeg_next::ffi::av_buffersink_get_time_base(sink.as_ptr()) };
    Ok(Rational::from(time_base))
}
