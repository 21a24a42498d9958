//! Transcode session: open, configure, run, flush and teardown.

use std::path::{Path, PathBuf};

use ffmpeg_next::media;
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{Demuxer, Engine, EngineError, MediaPacket, Muxer, Read},
    error::{Error, Result},
    pipeline::{EncodeStage, Route, StreamPipeline, Transcoder},
    policy::{CodecPolicy, FilterPolicy, StreamAction, TranscodeConfig, UnknownStreamPolicy},
    stats::StreamStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Opened,
    OutputConfigured,
    FiltersConfigured,
    Finished,
    Closed,
}

impl State {
    fn as_str(&self) -> &'static str {
        match self {
            State::Opened => "opened",
            State::OutputConfigured => "output configured",
            State::FiltersConfigured => "filters configured",
            State::Finished => "finished",
            State::Closed => "closed",
        }
    }
}

pub struct Session<E: Engine> {
    engine: E,
    input_path: PathBuf,
    output_path: Option<PathBuf>,
    input: Option<E::Input>,
    output: Option<E::Output>,
    streams: Vec<StreamPipeline<E>>,
    state: State,
    cancel: CancellationToken,
}

impl<E: Engine> Session<E> {
    /// Opens the input container and a decoder for every video and audio
    /// stream. Decoders opened before a failure are released again.
    pub fn open(engine: E, path: &Path) -> Result<Self> {
        let input = engine
            .open_input(path)
            .map_err(|err| Error::input_open(path, err))?;
        for (key, value) in input.metadata() {
            log::debug!("{}: {key}: {value}", path.display());
        }

        // on early return the decoders in `streams` drop before `input`
        let mut streams = Vec::with_capacity(input.streams().len());
        for descriptor in input.streams() {
            let decoder = if descriptor.is_media() {
                let codec = engine.find_decoder(descriptor).ok_or_else(|| {
                    Error::DecoderNotFound {
                        stream: descriptor.index(),
                        codec: format!("{:?}", descriptor.codec_id()),
                    }
                })?;
                let decoder = engine
                    .open_decoder(&codec, &input, descriptor)
                    .map_err(|err| Error::decoder_open(descriptor.index(), err))?;
                Some(decoder)
            } else {
                None
            };
            log::info!("opened {descriptor}");
            streams.push(StreamPipeline::new(descriptor.clone(), decoder));
        }

        Ok(Self {
            engine,
            input_path: path.to_path_buf(),
            output_path: None,
            input: Some(input),
            output: None,
            streams,
            state: State::Opened,
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the token `run` checks between packets.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stream_stats(&self) -> Vec<StreamStats> {
        self.streams
            .iter()
            .map(|pipeline| pipeline.stats().clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub fn dump_input(&self) {
        if let Some(input) = &self.input {
            input.dump(&self.input_path.to_string_lossy());
        }
    }

    pub fn dump_output(&self) {
        if let (Some(output), Some(path)) = (&self.output, &self.output_path) {
            output.dump(&path.to_string_lossy());
        }
    }

    /// Creates the output container, routes every stream and writes the header.
    pub fn configure_output(&mut self, path: &Path, policy: &CodecPolicy) -> Result<()> {
        self.expect_state(&[State::Opened], "configure output")?;
        let result = self.try_configure_output(path, policy);
        match result {
            Ok(()) => self.state = State::OutputConfigured,
            Err(ref err) => self.fail(err),
        }
        result
    }

    fn try_configure_output(&mut self, path: &Path, policy: &CodecPolicy) -> Result<()> {
        let output = self
            .engine
            .create_output(path)
            .map_err(|source| Error::OutputOpen {
                path: path.to_path_buf(),
                source,
            })?;
        self.output_path = Some(path.to_path_buf());
        let output = self.output.insert(output);
        let Some(input) = self.input.as_ref() else {
            return Err(Error::NotReady {
                operation: "configure output",
                state: self.state.as_str(),
            });
        };

        for pipeline in &mut self.streams {
            let descriptor = pipeline.descriptor().clone();
            let stream = descriptor.index();
            let action = match descriptor.medium() {
                media::Type::Video => policy.video.clone(),
                media::Type::Audio => policy.audio.clone(),
                media::Type::Unknown => match policy.unknown {
                    UnknownStreamPolicy::Abort => {
                        return Err(Error::UnsupportedStream {
                            stream,
                            kind: pipeline.stats().kind.clone(),
                        });
                    }
                    UnknownStreamPolicy::Skip => {
                        log::warn!("skipping {descriptor}: unknown stream type");
                        pipeline.skip();
                        continue;
                    }
                },
                // data, subtitle and attachment streams are only ever copied
                _ => StreamAction::Copy,
            };

            match action {
                StreamAction::Copy => {
                    let output_index = self
                        .engine
                        .add_copied_stream(output, input, &descriptor)
                        .map_err(|source| Error::OutputOpen {
                            path: path.to_path_buf(),
                            source,
                        })?;
                    log::info!("copying {descriptor} to output stream #{output_index}");
                    pipeline.pass_through(output_index);
                }
                StreamAction::Encode(name) => {
                    let codec = self.engine.find_encoder(&name).ok_or_else(|| {
                        Error::EncoderNotFound {
                            stream,
                            codec: name.clone(),
                        }
                    })?;
                    let decoder = pipeline.take_decoder().ok_or_else(|| {
                        Error::encoder_open(
                            stream,
                            EngineError::other("stream has no decoder to feed the encoder"),
                        )
                    })?;
                    let encoder = self
                        .engine
                        .open_encoder(&codec, &descriptor, &decoder, output)
                        .map_err(|err| Error::encoder_open(stream, err))?;
                    let output_index = self
                        .engine
                        .add_encoded_stream(output, &encoder)
                        .map_err(|err| Error::encoder_open(stream, err))?;
                    log::info!("encoding {descriptor} as {name} to output stream #{output_index}");

                    let encode = EncodeStage::new(encoder, self.engine.alloc_packet(), output_index);
                    pipeline.transcode(Transcoder::new(stream, decoder, encode));
                }
            }
        }

        output.set_metadata(&input.metadata());
        output
            .write_header()
            .map_err(|source| Error::HeaderWrite { source })
    }

    /// Builds a filter graph for every transcoded video stream.
    pub fn configure_filters(&mut self, policy: &FilterPolicy) -> Result<()> {
        self.expect_state(&[State::OutputConfigured], "configure filters")?;
        let result = self.try_configure_filters(policy);
        match result {
            Ok(()) => self.state = State::FiltersConfigured,
            Err(ref err) => self.fail(err),
        }
        result
    }

    fn try_configure_filters(&mut self, policy: &FilterPolicy) -> Result<()> {
        let expression = policy.video_expression();
        for pipeline in &mut self.streams {
            if !pipeline.descriptor().is_video() {
                continue;
            }
            let stream = pipeline.descriptor().index();
            if let Route::Transcode(transcoder) = pipeline.route_mut() {
                let graph = self
                    .engine
                    .build_filter(transcoder.decoder(), transcoder.encoder(), expression)
                    .map_err(|err| Error::filter_config(stream, err))?;
                transcoder.attach_filter(graph);
                log::info!("filter \"{expression}\" attached to stream #{stream}");
            }
        }
        Ok(())
    }

    /// Reads the whole input, flushes every transcoded stream and writes the
    /// trailer. The session is closed before any error is returned.
    pub fn run(&mut self) -> Result<()> {
        self.expect_state(&[State::OutputConfigured, State::FiltersConfigured], "run")?;
        let result = self.read_all().and_then(|()| self.finish());
        self.state = State::Finished;
        if let Err(ref err) = result {
            self.fail(err);
        }
        result
    }

    fn read_all(&mut self) -> Result<()> {
        let mut packet = self.engine.alloc_packet();
        let (Some(input), Some(output)) = (self.input.as_mut(), self.output.as_mut()) else {
            return Err(Error::NotReady {
                operation: "run",
                state: self.state.as_str(),
            });
        };

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match input.read_packet(&mut packet) {
                Ok(Read::Packet) => {}
                Ok(Read::EndOfInput) => break,
                Err(err) => {
                    packet.release();
                    return Err(Error::demux(err));
                }
            }

            let index = packet.stream_index();
            let result = match self.streams.get_mut(index) {
                Some(pipeline) => pipeline.process_packet(&mut packet, output),
                None => {
                    log::warn!("dropping packet of unknown stream #{index}");
                    Ok(())
                }
            };
            packet.release();
            result?;
        }
        log::debug!("end of input {}", self.input_path.display());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(output) = self.output.as_mut() else {
            return Err(Error::NotReady {
                operation: "finish",
                state: self.state.as_str(),
            });
        };
        for pipeline in &mut self.streams {
            pipeline.flush(output)?;
        }
        output
            .write_trailer()
            .map_err(|source| Error::TrailerWrite { source })?;

        for pipeline in &self.streams {
            pipeline.stats().log_summary();
        }
        Ok(())
    }

    /// Releases codec and filter handles stream by stream, then the input,
    /// then the output. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        for pipeline in &mut self.streams {
            pipeline.release();
        }
        self.input = None;
        self.output = None;
        self.state = State::Closed;
        log::debug!("session for {} closed", self.input_path.display());
    }

    fn fail(&mut self, err: &Error) {
        match err.stream() {
            Some(stream) => log::error!("{} failed on stream #{stream}: {err}", err.stage()),
            None => log::error!("{} failed: {err}", err.stage()),
        }
        self.close();
    }

    fn expect_state(&self, allowed: &[State], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.not_ready(operation))
        }
    }

    fn not_ready(&self, operation: &'static str) -> Error {
        Error::NotReady {
            operation,
            state: self.state.as_str(),
        }
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs a complete transcode of `input` into `output` and returns the
/// per-stream statistics.
pub fn transcode<E: Engine>(
    engine: E,
    input: &Path,
    output: &Path,
    config: &TranscodeConfig,
    cancel: CancellationToken,
) -> Result<Vec<StreamStats>> {
    let mut session = Session::open(engine, input)?.with_cancellation(cancel);
    if config.verbose {
        session.dump_input();
    }

    session.configure_output(output, &config.codecs)?;
    session.configure_filters(&config.filters)?;
    if config.verbose {
        session.dump_output();
    }

    session.run()?;
    session.close();
    Ok(session.stream_stats())
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
