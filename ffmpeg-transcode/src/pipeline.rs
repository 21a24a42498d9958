//! Per-stream decode -> filter -> encode -> mux stages.
//!
//! Every stage follows the same cycle: submit one unit (or `None` to flush),
//! then pull from the stage into a reused buffer until it reports
//! [`Drain::Pending`] or [`Drain::EndOfStream`]. Each pulled unit is handed
//! downstream and released before the next pull.

use ffmpeg_next::util::mathematics::Rescale;

use crate::{
    engine::{
        Decoder, Drain, Encoder, Engine, EngineError, FilterGraph, MediaFrame, MediaPacket, Muxer,
    },
    error::{Error, Result},
    stats::{StreamRoute, StreamStats},
    stream::StreamDescriptor,
};

/// Encoder plus the packet buffer it drains into.
pub struct EncodeStage<E: Engine> {
    encoder: E::Encoder,
    packet: E::Packet,
    output_index: usize,
}

impl<E: Engine> EncodeStage<E> {
    pub fn new(encoder: E::Encoder, packet: E::Packet, output_index: usize) -> Self {
        Self {
            encoder,
            packet,
            output_index,
        }
    }

    pub fn encoder(&self) -> &E::Encoder {
        &self.encoder
    }

    pub fn output_index(&self) -> usize {
        self.output_index
    }

    pub fn buffers_internally(&self) -> bool {
        self.encoder.buffers_internally()
    }

    /// Encodes `frame` (or flushes the encoder on `None`) and writes every
    /// packet the encoder hands back.
    pub fn encode_write(
        &mut self,
        stream: usize,
        frame: Option<&mut E::Frame>,
        output: &mut E::Output,
        stats: &mut StreamStats,
    ) -> Result<()> {
        self.packet.release();

        let encoder_time_base = self.encoder.time_base();
        let frame = frame.map(|frame| {
            if let Some(pts) = frame.pts() {
                let frame_time_base = frame.time_base();
                if frame_time_base.denominator() != 0 {
                    frame.set_pts(Some(pts.rescale(frame_time_base, encoder_time_base)));
                }
            }
            frame.set_time_base(encoder_time_base);
            &*frame
        });

        self.encoder
            .send_frame(frame)
            .map_err(|err| Error::encode(stream, err))?;

        loop {
            match self
                .encoder
                .receive_packet(&mut self.packet)
                .map_err(|err| Error::encode(stream, err))?
            {
                Drain::Ready => {}
                Drain::Pending => return Ok(()),
                Drain::EndOfStream => {
                    stats.encoder_drained = true;
                    return Ok(());
                }
            }

            let output_time_base = output.stream_time_base(self.output_index).ok_or_else(|| {
                Error::mux(
                    stream,
                    EngineError::other(format!("output stream #{} not found", self.output_index)),
                )
            })?;
            self.packet.set_stream_index(self.output_index);
            self.packet.rescale_ts(encoder_time_base, output_time_base);

            let size = self.packet.size();
            output
                .write_interleaved(&mut self.packet)
                .map_err(|err| Error::mux(stream, err))?;
            stats.written(size);
        }
    }
}

/// Filter graph plus the buffer its sink is drained into.
pub struct FilterStage<E: Engine> {
    graph: E::Filter,
    filtered: E::Frame,
}

impl<E: Engine> FilterStage<E> {
    pub fn new(graph: E::Filter, filtered: E::Frame) -> Self {
        Self { graph, filtered }
    }

    /// Pushes `frame` (or flushes the graph on `None`) and encodes every frame
    /// the sink emits.
    pub fn filter_encode_write(
        &mut self,
        stream: usize,
        frame: Option<&E::Frame>,
        encode: &mut EncodeStage<E>,
        output: &mut E::Output,
        stats: &mut StreamStats,
    ) -> Result<()> {
        self.graph
            .push_frame(frame)
            .map_err(|err| Error::filter(stream, err))?;

        loop {
            match self
                .graph
                .pull_frame(&mut self.filtered)
                .map_err(|err| Error::filter(stream, err))?
            {
                Drain::Ready => {}
                Drain::Pending => return Ok(()),
                Drain::EndOfStream => {
                    stats.filter_drained = true;
                    return Ok(());
                }
            }
            stats.frames_filtered += 1;

            self.filtered.set_time_base(self.graph.sink_time_base());
            self.filtered.clear_picture_type();
            let result = encode.encode_write(stream, Some(&mut self.filtered), output, stats);
            self.filtered.release();
            result?;
        }
    }
}

/// Decoder, encoder and optional filter of one transcoded stream.
pub struct Transcoder<E: Engine> {
    stream: usize,
    decoder: E::Decoder,
    decoded: E::Frame,
    encode: EncodeStage<E>,
    filter: Option<FilterStage<E>>,
}

impl<E: Engine> Transcoder<E> {
    pub fn new(stream: usize, decoder: E::Decoder, encode: EncodeStage<E>) -> Self {
        let decoded = decoder.alloc_frame();
        Self {
            stream,
            decoder,
            decoded,
            encode,
            filter: None,
        }
    }

    pub fn decoder(&self) -> &E::Decoder {
        &self.decoder
    }

    pub fn encoder(&self) -> &E::Encoder {
        self.encode.encoder()
    }

    pub fn output_index(&self) -> usize {
        self.encode.output_index()
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn attach_filter(&mut self, graph: E::Filter) {
        let filtered = self.decoder.alloc_frame();
        self.filter = Some(FilterStage::new(graph, filtered));
    }

    /// Decodes `packet` (or flushes the decoder on `None`) and forwards every
    /// decoded frame to the filter, or straight to the encoder.
    pub fn transcode_packet(
        &mut self,
        packet: Option<&E::Packet>,
        output: &mut E::Output,
        stats: &mut StreamStats,
    ) -> Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(|err| Error::decode(self.stream, err))?;

        loop {
            match self
                .decoder
                .receive_frame(&mut self.decoded)
                .map_err(|err| Error::decode(self.stream, err))?
            {
                Drain::Ready => {}
                Drain::Pending => return Ok(()),
                Drain::EndOfStream => {
                    stats.decoder_drained = true;
                    return Ok(());
                }
            }
            stats.frames_decoded += 1;

            let pts = self.decoded.best_effort_timestamp();
            self.decoded.set_pts(pts);
            self.decoded.set_time_base(self.decoder.packet_time_base());

            let result = match &mut self.filter {
                Some(filter) => filter.filter_encode_write(
                    self.stream,
                    Some(&self.decoded),
                    &mut self.encode,
                    output,
                    stats,
                ),
                None => {
                    self.encode
                        .encode_write(self.stream, Some(&mut self.decoded), output, stats)
                }
            };
            self.decoded.release();
            result?;
        }
    }

    /// Drains the stages in fill order: decoder, filter, then the encoder if
    /// it holds frames back.
    pub fn flush(&mut self, output: &mut E::Output, stats: &mut StreamStats) -> Result<()> {
        log::debug!("flushing decoder for stream #{}", self.stream);
        self.transcode_packet(None, output, stats)?;

        if let Some(filter) = &mut self.filter {
            log::debug!("flushing filter for stream #{}", self.stream);
            filter.filter_encode_write(self.stream, None, &mut self.encode, output, stats)?;
        }

        if self.encode.buffers_internally() {
            log::debug!("flushing encoder for stream #{}", self.stream);
            self.encode.encode_write(self.stream, None, output, stats)?;
        }
        Ok(())
    }
}

pub enum Route<E: Engine> {
    /// Opened but not yet routed; holds the decoder of video and audio streams.
    Pending { decoder: Option<E::Decoder> },
    PassThrough { output_index: usize },
    Transcode(Box<Transcoder<E>>),
    Skipped,
    Released,
}

/// Everything the session keeps for one input stream.
pub struct StreamPipeline<E: Engine> {
    descriptor: StreamDescriptor,
    stats: StreamStats,
    route: Route<E>,
}

impl<E: Engine> StreamPipeline<E> {
    pub fn new(descriptor: StreamDescriptor, decoder: Option<E::Decoder>) -> Self {
        let kind = format!("{:?}", descriptor.medium()).to_lowercase();
        Self {
            stats: StreamStats::new(descriptor.index(), kind),
            descriptor,
            route: Route::Pending { decoder },
        }
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn route(&self) -> &Route<E> {
        &self.route
    }

    pub fn route_mut(&mut self) -> &mut Route<E> {
        &mut self.route
    }

    /// Takes the decoder opened for this stream, leaving the route pending.
    pub fn take_decoder(&mut self) -> Option<E::Decoder> {
        match &mut self.route {
            Route::Pending { decoder } => decoder.take(),
            _ => None,
        }
    }

    pub fn pass_through(&mut self, output_index: usize) {
        self.route = Route::PassThrough { output_index };
        self.stats.route = StreamRoute::Copy;
        self.stats.output_index = Some(output_index);
    }

    pub fn transcode(&mut self, transcoder: Transcoder<E>) {
        self.stats.route = StreamRoute::Transcode;
        self.stats.output_index = Some(transcoder.output_index());
        self.route = Route::Transcode(Box::new(transcoder));
    }

    pub fn skip(&mut self) {
        self.route = Route::Skipped;
        self.stats.route = StreamRoute::Skip;
    }

    /// Routes one demuxed packet. The caller keeps ownership of the buffer and
    /// releases it afterwards.
    pub fn process_packet(&mut self, packet: &mut E::Packet, output: &mut E::Output) -> Result<()> {
        let stream = self.descriptor.index();
        self.stats.read(packet.size());

        match &mut self.route {
            Route::Transcode(transcoder) => {
                transcoder.transcode_packet(Some(&*packet), output, &mut self.stats)
            }
            Route::PassThrough { output_index } => {
                let output_index = *output_index;
                let output_time_base = output.stream_time_base(output_index).ok_or_else(|| {
                    Error::mux(
                        stream,
                        EngineError::other(format!("output stream #{output_index} not found")),
                    )
                })?;
                packet.set_stream_index(output_index);
                packet.rescale_ts(self.descriptor.time_base(), output_time_base);

                let size = packet.size();
                output
                    .write_interleaved(packet)
                    .map_err(|err| Error::mux(stream, err))?;
                self.stats.written(size);
                Ok(())
            }
            Route::Skipped | Route::Pending { .. } | Route::Released => {
                self.stats.packets_dropped += 1;
                Ok(())
            }
        }
    }

    /// End-of-input flush; only transcoded streams hold buffered data.
    pub fn flush(&mut self, output: &mut E::Output) -> Result<()> {
        match &mut self.route {
            Route::Transcode(transcoder) => transcoder.flush(output, &mut self.stats),
            _ => Ok(()),
        }
    }

    /// Drops every codec and filter handle of the stream. Safe to call twice.
    pub fn release(&mut self) {
        if !matches!(self.route, Route::Released) {
            log::debug!("releasing stream #{}", self.descriptor.index());
            self.route = Route::Released;
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
